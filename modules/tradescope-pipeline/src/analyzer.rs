use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tradescope_common::{
    EntityKind, ExtractionResult, ExtractionStatus, QualityMetrics, Tunables,
};
use tracing::{info, warn};

use crate::acquire::ContentFetcher;
use crate::cache::{cache_key, ResultStore};
use crate::enrich::EnrichmentEngine;
use crate::extract::{calculate_overall_confidence, EntityExtractionEngine};
use crate::validate::ValidationEngine;

/// Wall-clock budget for one URL, consulted at every suspension point so a
/// single slow stage cannot eat the whole pipeline's time.
pub struct Deadline {
    started: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn new(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.started.elapsed())
    }
}

/// Top-level pipeline: acquisition, extraction, validation, enrichment, in
/// that order, each stage degrading to the best available partial result
/// instead of aborting the run. The caller never receives an empty result
/// for a resolvable domain — total acquisition failure still yields a
/// URL-derived business entity under `status: failed`.
pub struct Analyzer {
    fetcher: Arc<dyn ContentFetcher>,
    extraction: EntityExtractionEngine,
    validation: ValidationEngine,
    enrichment: Option<EnrichmentEngine>,
    store: Option<Arc<dyn ResultStore>>,
    tunables: Arc<Tunables>,
}

impl Analyzer {
    pub fn new(
        fetcher: Arc<dyn ContentFetcher>,
        extraction: EntityExtractionEngine,
        validation: ValidationEngine,
        enrichment: Option<EnrichmentEngine>,
        store: Option<Arc<dyn ResultStore>>,
        tunables: Arc<Tunables>,
    ) -> Self {
        Self {
            fetcher,
            extraction,
            validation,
            enrichment,
            store,
            tunables,
        }
    }

    pub async fn analyze(&self, raw_url: &str) -> Result<ExtractionResult> {
        let url = normalize_url(raw_url)?;
        let key = cache_key(&url);

        if let Some(store) = &self.store {
            if let Some(cached) = store.get(&key).await {
                info!(url, "Returning cached extraction result");
                return Ok(cached);
            }
        }

        let started = Instant::now();
        let deadline = Deadline::new(self.tunables.url_budget);

        let mut result =
            match tokio::time::timeout(deadline.remaining(), self.fetcher.fetch(&url)).await {
                Ok(Ok(content)) => self.run_stages(&url, content, &deadline).await,
                Ok(Err(err)) => {
                    warn!(url, error = %err, "Acquisition failed entirely");
                    self.failed_result(&url, err.to_string())
                }
                Err(_) => {
                    warn!(url, "Acquisition exceeded the URL budget");
                    self.failed_result(&url, "Acquisition exceeded the URL wall-clock budget".into())
                }
            };

        result.processing_time_ms = started.elapsed().as_millis() as u64;

        if let Some(store) = &self.store {
            store.set(&key, result.clone()).await;
        }

        info!(
            url,
            status = %result.status,
            entities = result.entities.len(),
            confidence = result.confidence,
            elapsed_ms = result.processing_time_ms,
            "Analysis complete"
        );
        Ok(result)
    }

    async fn run_stages(
        &self,
        url: &str,
        content: crate::acquire::AcquiredContent,
        deadline: &Deadline,
    ) -> ExtractionResult {
        let outcome = match tokio::time::timeout(
            deadline.remaining(),
            self.extraction.extract(&content.html, url),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(url, "Extraction exceeded the URL budget, using heuristics only");
                self.extraction.extract_heuristic(&content.html, url)
            }
        };

        let entities = outcome.entities;

        let entities = match tokio::time::timeout(
            deadline.remaining(),
            self.validation.validate(entities.clone(), url),
        )
        .await
        {
            Ok(validated) => validated,
            Err(_) => {
                warn!(url, "Validation exceeded the URL budget, keeping entities unchanged");
                entities
            }
        };

        let entities = match &self.enrichment {
            Some(engine) => {
                match tokio::time::timeout(
                    deadline.remaining(),
                    engine.enrich(entities.clone(), url),
                )
                .await
                {
                    Ok(enriched) => enriched,
                    Err(_) => {
                        warn!(url, "Enrichment exceeded the URL budget, keeping entities unchanged");
                        entities
                    }
                }
            }
            None => entities,
        };

        let business_count = entities
            .iter()
            .filter(|e| e.kind == EntityKind::Business)
            .count();
        let product_count = entities
            .iter()
            .filter(|e| e.kind == EntityKind::Product)
            .count();
        let business_extracted = entities
            .iter()
            .any(|e| e.kind == EntityKind::Business && !e.attributes.extracted_from_url);

        // Partial means the page resolved but one side of the catalog is
        // missing or synthesized: products with a URL-derived business, a
        // business with no products, or a degraded-wait DOM.
        let status = if product_count > 0 && business_extracted && !content.partial {
            ExtractionStatus::Completed
        } else {
            ExtractionStatus::Partial
        };

        ExtractionResult {
            source_url: url.to_string(),
            raw_content: content.html,
            confidence: calculate_overall_confidence(&entities),
            entities,
            processing_time_ms: 0,
            status,
            error: None,
            metrics: QualityMetrics {
                business_count,
                product_count,
                json_parsed: outcome.json_parsed,
                fetch_attempts: content.attempts,
                extraction_attempts: outcome.attempts,
            },
            created_at: chrono::Utc::now(),
        }
    }

    fn failed_result(&self, url: &str, error: String) -> ExtractionResult {
        let business = self.extraction.fallback_business_entity(url);
        let entities = vec![business];

        ExtractionResult {
            source_url: url.to_string(),
            raw_content: String::new(),
            confidence: calculate_overall_confidence(&entities),
            entities,
            processing_time_ms: 0,
            status: ExtractionStatus::Failed,
            error: Some(error),
            metrics: QualityMetrics {
                business_count: 1,
                ..QualityMetrics::default()
            },
            created_at: chrono::Utc::now(),
        }
    }
}

/// Accepts bare domains or full URLs; a missing scheme defaults to https.
pub fn normalize_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    anyhow::ensure!(!trimmed.is_empty(), "URL is empty");

    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };

    let parsed = url::Url::parse(&candidate).with_context(|| format!("Invalid URL: {raw}"))?;
    anyhow::ensure!(parsed.host_str().is_some(), "URL has no host: {raw}");
    Ok(parsed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_domain_defaults_to_https() {
        assert_eq!(normalize_url("acme.com").unwrap(), "https://acme.com/");
        assert_eq!(
            normalize_url("  shop.acme.co.uk/products  ").unwrap(),
            "https://shop.acme.co.uk/products"
        );
    }

    #[test]
    fn explicit_scheme_is_preserved() {
        assert_eq!(normalize_url("http://acme.com").unwrap(), "http://acme.com/");
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(normalize_url("").is_err());
        assert!(normalize_url("https://").is_err());
    }

    #[test]
    fn deadline_counts_down() {
        let deadline = Deadline::new(Duration::from_secs(10));
        assert!(deadline.remaining() <= Duration::from_secs(10));
        assert!(deadline.remaining() > Duration::from_secs(9));
    }
}
