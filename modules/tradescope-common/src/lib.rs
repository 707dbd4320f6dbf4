pub mod config;
pub mod error;
pub mod types;

pub use config::{Config, Tunables};
pub use error::TradescopeError;
pub use types::{
    clamp_confidence, EntityAttributes, EntityKind, ExtractedEntity, ExtractionResult,
    ExtractionStatus, ProductGroup, ProductVariant, QualityMetrics,
};
