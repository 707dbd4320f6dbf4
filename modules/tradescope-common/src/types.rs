use std::collections::HashMap;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Clamp a confidence score into [0, 1].
pub fn clamp_confidence(value: f32) -> f32 {
    value.clamp(0.0, 1.0)
}

// --- Entity model ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Business,
    Product,
    Location,
    Contact,
    Person,
    Service,
    Metadata,
}

impl EntityKind {
    /// Weight this kind carries in the overall-confidence aggregate.
    /// Business identity dominates; diagnostics barely register.
    pub fn confidence_weight(&self) -> f32 {
        match self {
            EntityKind::Business => 0.4,
            EntityKind::Product => 0.3,
            EntityKind::Service => 0.3,
            EntityKind::Location => 0.2,
            EntityKind::Contact => 0.1,
            EntityKind::Person => 0.1,
            EntityKind::Metadata => 0.1,
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Business => write!(f, "business"),
            EntityKind::Product => write!(f, "product"),
            EntityKind::Location => write!(f, "location"),
            EntityKind::Contact => write!(f, "contact"),
            EntityKind::Person => write!(f, "person"),
            EntityKind::Service => write!(f, "service"),
            EntityKind::Metadata => write!(f, "metadata"),
        }
    }
}

/// Closed attribute set for an entity, plus an `extra` map for
/// collaborator-specific fields that have no typed slot yet.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityAttributes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,

    /// Set when the business identity was synthesized from the URL rather
    /// than extracted from page content.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub extracted_from_url: bool,

    // Compliance enrichment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hs_code: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_documents: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub tariff_rates: HashMap<String, f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compliance_notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compliance_confidence: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compliance_error: Option<String>,

    // Market enrichment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market_size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market_growth: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub competitors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market_category: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trends: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market_confidence: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market_error: Option<String>,

    // Validation bookkeeping
    /// True when the minimum-preservation floor rescued this entity rather
    /// than the validator genuinely confirming it.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub forced_verification: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consistency_warning: Option<String>,

    /// Extension map for anything without a typed slot.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, serde_json::Value>,
}

/// A typed, confidence-scored fact extracted from a source page.
///
/// Invariant: every non-metadata entity has a non-empty `name`, and
/// `confidence` is always within [0, 1].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedEntity {
    pub id: Uuid,
    pub kind: EntityKind,
    pub name: String,
    pub value: String,
    pub confidence: f32,
    /// Origin URL this entity was extracted from.
    pub source: String,
    pub verified: bool,
    pub user_modified: bool,
    pub attributes: EntityAttributes,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExtractedEntity {
    pub fn new(
        kind: EntityKind,
        name: impl Into<String>,
        value: impl Into<String>,
        confidence: f32,
        source: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            kind,
            name: name.into(),
            value: value.into(),
            confidence: clamp_confidence(confidence),
            source: source.into(),
            verified: false,
            user_modified: false,
            attributes: EntityAttributes::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Replace the confidence score, clamping and stamping the update time.
    pub fn set_confidence(&mut self, confidence: f32) {
        self.confidence = clamp_confidence(confidence);
        self.updated_at = Utc::now();
    }
}

// --- Extraction result ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStatus {
    Completed,
    Partial,
    Failed,
}

impl std::fmt::Display for ExtractionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractionStatus::Completed => write!(f, "completed"),
            ExtractionStatus::Partial => write!(f, "partial"),
            ExtractionStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Diagnostics for one extraction run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub business_count: usize,
    pub product_count: usize,
    /// Whether the collaborator response parsed as JSON (false means the
    /// heuristic fallback produced the entities).
    pub json_parsed: bool,
    pub fetch_attempts: u32,
    pub extraction_attempts: u32,
}

/// One extraction run's output. Immutable after return, except for cache
/// storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub source_url: String,
    /// Raw acquired content. Can be very large.
    pub raw_content: String,
    pub entities: Vec<ExtractedEntity>,
    /// Aggregate confidence, weighted by entity kind.
    pub confidence: f32,
    pub processing_time_ms: u64,
    pub status: ExtractionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub metrics: QualityMetrics,
    pub created_at: DateTime<Utc>,
}

// --- Product consolidation model ---

/// One concrete SKU-like listing. Exists only within a consolidation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductVariant {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, String>,
    #[serde(default)]
    pub selected: bool,
}

impl ProductVariant {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            sku: None,
            price: None,
            attributes: HashMap::new(),
            selected: false,
        }
    }
}

/// A product family: one base type with its variants and the attributes the
/// variants agree on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductGroup {
    pub base_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub confidence: f32,
    pub variants: Vec<ProductVariant>,
    /// Majority-vote attributes: a value appears here only when enough of
    /// the variants share it.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_is_clamped_on_construction() {
        let e = ExtractedEntity::new(EntityKind::Product, "Widget", "", 1.7, "https://a.com");
        assert_eq!(e.confidence, 1.0);

        let e = ExtractedEntity::new(EntityKind::Product, "Widget", "", -0.2, "https://a.com");
        assert_eq!(e.confidence, 0.0);
    }

    #[test]
    fn set_confidence_clamps_and_touches_updated_at() {
        let mut e = ExtractedEntity::new(EntityKind::Business, "Acme", "", 0.5, "https://a.com");
        e.set_confidence(2.0);
        assert_eq!(e.confidence, 1.0);
        assert!(e.updated_at >= e.created_at);
    }

    #[test]
    fn business_weight_dominates() {
        assert!(EntityKind::Business.confidence_weight() > EntityKind::Product.confidence_weight());
        assert!(EntityKind::Metadata.confidence_weight() < EntityKind::Location.confidence_weight());
    }
}
