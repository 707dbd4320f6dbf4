//! Pipeline-level tests: fixture HTML through the full analyzer with fake
//! collaborators. No network, no containers.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use ai_client::CompletionAgent;
use tradescope_common::{EntityKind, ExtractionStatus, TradescopeError, Tunables};
use tradescope_pipeline::acquire::{AcquiredContent, ContentFetcher, FetchStrategy};
use tradescope_pipeline::analyzer::Analyzer;
use tradescope_pipeline::cache::MemoryStore;
use tradescope_pipeline::collaborators::{
    ComplianceInfo, ComplianceLookup, ComplianceRequest, MarketIntel, MarketInfo, MarketRequest,
};
use tradescope_pipeline::enrich::EnrichmentEngine;
use tradescope_pipeline::extract::EntityExtractionEngine;
use tradescope_pipeline::validate::ValidationEngine;

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

struct FixtureFetcher {
    html: &'static str,
    calls: AtomicU32,
}

impl FixtureFetcher {
    fn new(html: &'static str) -> Self {
        Self {
            html,
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl ContentFetcher for FixtureFetcher {
    async fn fetch(&self, _url: &str) -> Result<AcquiredContent, TradescopeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(AcquiredContent {
            html: self.html.to_string(),
            strategy: FetchStrategy::DirectHttp,
            partial: false,
            attempts: 1,
        })
    }
}

struct DeadFetcher;

#[async_trait]
impl ContentFetcher for DeadFetcher {
    async fn fetch(&self, url: &str) -> Result<AcquiredContent, TradescopeError> {
        Err(TradescopeError::Fetch(format!(
            "All acquisition strategies exhausted for {url}: connection refused"
        )))
    }
}

struct CannedAgent(String);

#[async_trait]
impl CompletionAgent for CannedAgent {
    async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
        Ok(self.0.clone())
    }
}

struct FakeCompliance;

#[async_trait]
impl ComplianceLookup for FakeCompliance {
    async fn classify(&self, _request: &ComplianceRequest) -> Result<ComplianceInfo> {
        Ok(ComplianceInfo {
            hs_code: Some("0409.00".to_string()),
            confidence: 0.8,
            ..Default::default()
        })
    }
}

struct FakeMarket;

#[async_trait]
impl MarketIntel for FakeMarket {
    async fn profile(&self, _request: &MarketRequest) -> Result<MarketInfo> {
        Ok(MarketInfo {
            category: Some("honey and dairy products".to_string()),
            confidence: 0.7,
            ..Default::default()
        })
    }
}

fn analyzer_with(
    fetcher: Arc<dyn ContentFetcher>,
    extraction_agent: Option<Arc<dyn CompletionAgent>>,
    validation_agent: Option<Arc<dyn CompletionAgent>>,
    enrichment: Option<EnrichmentEngine>,
    cached: bool,
) -> Analyzer {
    let tunables = Arc::new(Tunables::default());
    let store = cached.then(|| {
        Arc::new(MemoryStore::new(tunables.cache_ttl))
            as Arc<dyn tradescope_pipeline::cache::ResultStore>
    });
    Analyzer::new(
        fetcher,
        EntityExtractionEngine::new(extraction_agent, Arc::clone(&tunables)),
        ValidationEngine::new(validation_agent, Arc::clone(&tunables)),
        enrichment,
        store,
        tunables,
    )
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

const PRODUCT_PAGE: &str = r#"
<html>
  <head><title>Willow Farm Shop</title></head>
  <body>
    <nav><a href="/">Home</a> <a href="/cart">Cart</a></nav>
    <div class="product"><h2>Organic Honey 500g</h2></div>
  </body>
</html>
"#;

#[tokio::test]
async fn heuristic_fallback_extracts_products_without_a_model() {
    let analyzer = analyzer_with(
        Arc::new(FixtureFetcher::new(PRODUCT_PAGE)),
        None,
        None,
        None,
        false,
    );

    let result = analyzer.analyze("willow-farm.com").await.unwrap();

    let product = result
        .entities
        .iter()
        .find(|e| e.kind == EntityKind::Product)
        .expect("heuristic product");
    assert_eq!(product.name, "Organic Honey 500g");
    assert_eq!(product.confidence, 0.4);

    let business = result
        .entities
        .iter()
        .find(|e| e.kind == EntityKind::Business)
        .expect("business entity");
    assert_eq!(business.name, "Willow Farm");
    assert!(business.attributes.extracted_from_url);

    assert!(!result.metrics.json_parsed);
    assert_eq!(result.status, ExtractionStatus::Partial);
}

#[tokio::test]
async fn total_fetch_failure_still_yields_a_business_identity() {
    let analyzer = analyzer_with(Arc::new(DeadFetcher), None, None, None, false);

    let result = analyzer.analyze("https://willow-farm.com").await.unwrap();

    assert_eq!(result.status, ExtractionStatus::Failed);
    assert!(result.error.is_some());

    let business = result
        .entities
        .iter()
        .find(|e| e.kind == EntityKind::Business)
        .expect("fallback business");
    assert_eq!(business.name, "Willow Farm");
    assert!(!business.name.is_empty());
}

#[tokio::test]
async fn repeated_urls_are_served_from_cache() {
    let fetcher = Arc::new(FixtureFetcher::new(PRODUCT_PAGE));
    let analyzer = analyzer_with(Arc::clone(&fetcher) as Arc<dyn ContentFetcher>, None, None, None, true);

    let first = analyzer.analyze("willow-farm.com").await.unwrap();
    let second = analyzer.analyze("willow-farm.com").await.unwrap();

    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    assert_eq!(first.created_at, second.created_at);
}

#[tokio::test]
async fn full_pipeline_with_model_validation_and_enrichment() {
    let extraction_response = serde_json::json!({
        "business": {"name": "Willow Farm", "description": "Family apiary", "confidence": 0.9},
        "products": [
            {"name": "Organic Honey 500g", "category": "honey", "confidence": 0.8},
            {"name": "Beeswax Candles", "category": "home", "confidence": 0.7},
        ],
    });
    let validation_response = serde_json::json!({
        "business_validation": {"plausible": true, "confidence": 0.9},
        "product_validations": [
            {"index": 1, "confidence": 0.9},
            {"index": 2, "confidence": 0.8},
        ],
    });

    let enrichment = EnrichmentEngine::new(
        Arc::new(FakeCompliance),
        Arc::new(FakeMarket),
        Arc::new(Tunables::default()),
    );
    let analyzer = analyzer_with(
        Arc::new(FixtureFetcher::new(PRODUCT_PAGE)),
        Some(Arc::new(CannedAgent(extraction_response.to_string()))),
        Some(Arc::new(CannedAgent(validation_response.to_string()))),
        Some(enrichment),
        false,
    );

    let result = analyzer.analyze("https://willow-farm.com").await.unwrap();

    assert_eq!(result.status, ExtractionStatus::Completed);
    assert!(result.metrics.json_parsed);
    assert_eq!(result.metrics.product_count, 2);

    let honey = result
        .entities
        .iter()
        .find(|e| e.name == "Organic Honey 500g")
        .unwrap();
    assert!(honey.verified);
    assert!(!honey.attributes.forced_verification);
    assert_eq!(honey.attributes.hs_code.as_deref(), Some("0409.00"));

    // Confidence stayed clamped through every stage.
    for entity in &result.entities {
        assert!((0.0..=1.0).contains(&entity.confidence));
    }
    assert!((0.0..=1.0).contains(&result.confidence));
}

#[tokio::test]
async fn model_garbage_degrades_to_heuristics_not_failure() {
    let analyzer = analyzer_with(
        Arc::new(FixtureFetcher::new(PRODUCT_PAGE)),
        Some(Arc::new(CannedAgent("I can't help with that.".to_string()))),
        None,
        None,
        false,
    );

    let result = analyzer.analyze("willow-farm.com").await.unwrap();

    assert!(!result.metrics.json_parsed);
    assert_eq!(result.metrics.extraction_attempts, 2);
    assert!(result
        .entities
        .iter()
        .any(|e| e.kind == EntityKind::Product && e.name == "Organic Honey 500g"));
}
