use std::env;
use std::time::Duration;

/// Application configuration loaded from environment variables.
///
/// Collaborator endpoints are all optional: the pipeline degrades to
/// heuristic extraction and no-op enrichment when a key is absent, so a
/// bare `tradescope <url>` still produces a result.
#[derive(Debug, Clone)]
pub struct Config {
    // AI providers
    pub anthropic_api_key: Option<String>,
    pub extraction_model: String,
    pub validation_model: String,

    // Headless browser service
    pub browserless_url: Option<String>,
    pub browserless_token: Option<String>,

    // Enrichment collaborators
    pub compliance_api_url: Option<String>,
    pub compliance_api_key: Option<String>,
    pub market_api_url: Option<String>,
    pub market_api_key: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            anthropic_api_key: env::var("ANTHROPIC_API_KEY").ok(),
            extraction_model: env::var("EXTRACTION_MODEL")
                .unwrap_or_else(|_| "claude-haiku-4-5-20251001".to_string()),
            validation_model: env::var("VALIDATION_MODEL")
                .unwrap_or_else(|_| "claude-haiku-4-5-20251001".to_string()),
            browserless_url: env::var("BROWSERLESS_URL").ok(),
            browserless_token: env::var("BROWSERLESS_TOKEN").ok(),
            compliance_api_url: env::var("COMPLIANCE_API_URL").ok(),
            compliance_api_key: env::var("COMPLIANCE_API_KEY").ok(),
            market_api_url: env::var("MARKET_API_URL").ok(),
            market_api_key: env::var("MARKET_API_KEY").ok(),
        }
    }
}

/// Empirically tuned pipeline constants.
///
/// None of these carry a derivation — they are the values the pipeline was
/// tuned to, kept in one place so each is independently overridable instead
/// of hard-coded at its use site.
#[derive(Debug, Clone)]
pub struct Tunables {
    // Extraction
    /// Maximum characters of page text submitted to the extraction model.
    pub content_max_chars: usize,
    /// Minimum model confidence for a product entity to survive.
    pub product_confidence_floor: f32,
    /// Minimum model confidence for location/contact entities.
    pub detail_confidence_floor: f32,
    /// Confidence of a business identity synthesized from the URL.
    pub fallback_business_confidence: f32,
    /// Same, on the partial-extraction path (some entities were found, the
    /// business just wasn't among them).
    pub partial_fallback_business_confidence: f32,
    /// Confidence assigned to products found by the heuristic HTML pass.
    pub heuristic_product_confidence: f32,

    // Validation
    /// Recombined confidence above which a product counts as verified.
    pub verification_threshold: f32,
    /// Absolute floor on verified products for a non-empty product set.
    pub min_verified_count: usize,
    /// Fractional floor on verified products.
    pub min_verified_fraction: f32,
    pub web_presence_weight: f32,
    pub market_correlation_weight: f32,
    pub industry_alignment_weight: f32,

    // Enrichment
    /// Confidence marker for a failed collaborator call.
    pub enrichment_fallback_confidence: f32,
    /// Confidence multiplier when compliance and market data disagree.
    pub inconsistency_penalty: f32,
    /// Confidence multiplier when they agree (result capped at 1.0).
    pub consistency_boost: f32,
    /// Concurrent in-flight enrichment calls.
    pub enrichment_concurrency: usize,
    /// Whether to cross-check compliance codes against market categories.
    pub cross_validate_enrichment: bool,

    // Consolidation
    /// Overall score a variant must reach to join an existing group.
    pub group_match_threshold: f64,
    /// Attribute-compatibility hard gate. Below this, a variant never joins
    /// a group regardless of name similarity.
    pub attribute_compat_gate: f64,
    /// Near-equality threshold for two attribute values to count as shared.
    pub attribute_value_similarity: f64,
    /// Fraction of variants that must share a value for it to become a
    /// group attribute.
    pub attribute_majority_fraction: f64,
    pub max_variants_per_group: usize,

    // Acquisition
    pub direct_fetch_timeout: Duration,
    pub browser_attempts: u32,
    pub browser_backoff_base: Duration,
    pub browser_backoff_cap: Duration,
    pub max_redirects: usize,

    // Browser pool
    pub pool_size: usize,
    pub pool_idle_ttl: Duration,
    pub pool_sweep_interval: Duration,

    // Cache and budget
    pub cache_ttl: Duration,
    /// Overall wall-clock budget for one URL, independent of per-call
    /// timeouts.
    pub url_budget: Duration,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            content_max_chars: 20_000,
            product_confidence_floor: 0.3,
            detail_confidence_floor: 0.2,
            fallback_business_confidence: 0.6,
            partial_fallback_business_confidence: 0.7,
            heuristic_product_confidence: 0.4,

            verification_threshold: 0.35,
            min_verified_count: 2,
            min_verified_fraction: 0.3,
            web_presence_weight: 0.4,
            market_correlation_weight: 0.3,
            industry_alignment_weight: 0.3,

            enrichment_fallback_confidence: 0.2,
            inconsistency_penalty: 0.8,
            consistency_boost: 1.1,
            enrichment_concurrency: 4,
            cross_validate_enrichment: true,

            group_match_threshold: 0.75,
            attribute_compat_gate: 0.5,
            attribute_value_similarity: 0.7,
            attribute_majority_fraction: 0.3,
            max_variants_per_group: 25,

            direct_fetch_timeout: Duration::from_secs(30),
            browser_attempts: 3,
            browser_backoff_base: Duration::from_millis(1500),
            browser_backoff_cap: Duration::from_secs(10),
            max_redirects: 5,

            pool_size: 3,
            pool_idle_ttl: Duration::from_secs(30 * 60),
            pool_sweep_interval: Duration::from_secs(5 * 60),

            cache_ttl: Duration::from_secs(24 * 60 * 60),
            url_budget: Duration::from_secs(180),
        }
    }
}
