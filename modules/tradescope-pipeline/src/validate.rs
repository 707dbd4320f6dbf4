use std::sync::Arc;

use ai_client::{util, CompletionAgent};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tradescope_common::{EntityKind, ExtractedEntity, TradescopeError, Tunables};
use tracing::{info, warn};

const VALIDATION_SYSTEM_PROMPT: &str = r#"You are a trade-data reviewer. You are given a business identity and a numbered list of products that were automatically extracted from the business's website. Assess real-world plausibility: does this business exist as described, and is each listed product something a business of this kind actually sells? Flag entries that look like navigation labels, UI chrome, or code fragments rather than products.

Respond with a single JSON object:

{
  "business_validation": {"plausible": true, "confidence": 0.0-1.0, "notes": "string or null"},
  "product_validations": [
    {"index": 1, "confidence": 0.0-1.0, "is_navigation_artifact": false, "notes": "string or null"}
  ]
}

Indexes refer to the numbered product list. Confidence reflects how strongly the product correlates with the business's apparent market and industry."#;

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ValidationResponse {
    #[serde(default)]
    pub business_validation: Option<BusinessValidation>,
    #[serde(default)]
    pub product_validations: Vec<ProductValidation>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BusinessValidation {
    #[serde(default)]
    pub plausible: bool,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ProductValidation {
    /// 1-based position in the submitted product list.
    pub index: usize,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub is_navigation_artifact: bool,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Cross-checks extracted entities through a second, independent completion
/// collaborator. Strictly additive: on any collaborator or parse failure the
/// input entities come back unchanged, and a minimum-preservation floor
/// keeps validation from zeroing out a non-empty product set.
pub struct ValidationEngine {
    agent: Option<Arc<dyn CompletionAgent>>,
    tunables: Arc<Tunables>,
}

impl ValidationEngine {
    pub fn new(agent: Option<Arc<dyn CompletionAgent>>, tunables: Arc<Tunables>) -> Self {
        Self { agent, tunables }
    }

    pub async fn validate(
        &self,
        entities: Vec<ExtractedEntity>,
        url: &str,
    ) -> Vec<ExtractedEntity> {
        let has_business = entities.iter().any(|e| e.kind == EntityKind::Business);
        let has_products = entities.iter().any(|e| e.kind == EntityKind::Product);
        if !has_business && !has_products {
            return entities;
        }

        let Some(agent) = &self.agent else {
            return entities;
        };

        let user_prompt = build_comparison_prompt(&entities, url);

        let response = match agent.complete(VALIDATION_SYSTEM_PROMPT, &user_prompt).await {
            Ok(text) => text,
            Err(err) => {
                warn!(url, error = %err, "Validation collaborator failed, keeping entities unchanged");
                return entities;
            }
        };

        let parsed = match parse_validation_response(&response) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(url, error = %err, "Validation response unparseable, keeping entities unchanged");
                return entities;
            }
        };

        let mut entities = entities;
        self.apply(&mut entities, &parsed);
        self.enforce_preservation_floor(&mut entities);

        let verified = entities
            .iter()
            .filter(|e| e.kind == EntityKind::Product && e.verified)
            .count();
        info!(url, verified, "Validation applied");

        entities
    }

    /// Fold the validator's assessments back into the entities.
    fn apply(&self, entities: &mut [ExtractedEntity], response: &ValidationResponse) {
        if let Some(bv) = &response.business_validation {
            if let Some(business) = entities
                .iter_mut()
                .find(|e| e.kind == EntityKind::Business)
            {
                business.set_confidence((business.confidence + bv.confidence) / 2.0);
                business.verified = bv.plausible;
                if let Some(notes) = &bv.notes {
                    business
                        .attributes
                        .extra
                        .insert("validation_notes".to_string(), serde_json::json!(notes));
                }
            }
        }

        let product_ids: Vec<usize> = entities
            .iter()
            .enumerate()
            .filter(|(_, e)| e.kind == EntityKind::Product)
            .map(|(i, _)| i)
            .collect();

        for pv in &response.product_validations {
            // Indexes are 1-based positions in the submitted list.
            let Some(&entity_idx) = pv.index.checked_sub(1).and_then(|i| product_ids.get(i))
            else {
                continue;
            };
            let entity = &mut entities[entity_idx];

            let assessed = if pv.is_navigation_artifact {
                0.0
            } else {
                pv.confidence
            };
            let recombined = self.recombine(assessed);
            entity.set_confidence(recombined);
            entity.verified = recombined > self.tunables.verification_threshold;
            if let Some(notes) = &pv.notes {
                entity
                    .attributes
                    .extra
                    .insert("validation_notes".to_string(), serde_json::json!(notes));
            }
        }
    }

    /// Weighted blend of web-presence, market-correlation, and
    /// industry-alignment terms. The validator returns one confidence value;
    /// all three terms derive from it, but the weights stay independently
    /// tunable.
    fn recombine(&self, assessed: f32) -> f32 {
        let t = &self.tunables;
        let web_presence = assessed;
        let market_correlation = assessed;
        let industry_alignment = assessed;
        tradescope_common::clamp_confidence(
            t.web_presence_weight * web_presence
                + t.market_correlation_weight * market_correlation
                + t.industry_alignment_weight * industry_alignment,
        )
    }

    /// Validation never leaves a non-empty product set with zero verified
    /// products: the top scorers by confidence are force-verified until the
    /// floor of max(min count, fraction of total) is met. Rescued products
    /// are tagged so downstream consumers can tell genuine confidence from
    /// forced.
    fn enforce_preservation_floor(&self, entities: &mut [ExtractedEntity]) {
        let t = &self.tunables;

        let mut product_ids: Vec<usize> = entities
            .iter()
            .enumerate()
            .filter(|(_, e)| e.kind == EntityKind::Product)
            .map(|(i, _)| i)
            .collect();
        let total = product_ids.len();
        if total == 0 {
            return;
        }

        let fractional = (t.min_verified_fraction * total as f32).ceil() as usize;
        let floor = t.min_verified_count.max(fractional).min(total);

        let mut verified = product_ids.iter().filter(|&&i| entities[i].verified).count();
        if verified >= floor {
            return;
        }

        // Highest-confidence unverified products first.
        product_ids.sort_by(|&a, &b| {
            entities[b]
                .confidence
                .partial_cmp(&entities[a].confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        for idx in product_ids {
            if verified >= floor {
                break;
            }
            let entity = &mut entities[idx];
            if entity.verified {
                continue;
            }
            entity.verified = true;
            entity.attributes.forced_verification = true;
            verified += 1;
        }
    }
}

fn parse_validation_response(response: &str) -> Result<ValidationResponse, TradescopeError> {
    let object = util::first_json_object(response)
        .ok_or_else(|| TradescopeError::Parse("no JSON object in response".to_string()))?;
    serde_json::from_str(object).map_err(|err| TradescopeError::Parse(err.to_string()))
}

fn build_comparison_prompt(entities: &[ExtractedEntity], url: &str) -> String {
    let business = entities
        .iter()
        .find(|e| e.kind == EntityKind::Business)
        .map(|b| {
            if b.value.is_empty() {
                b.name.clone()
            } else {
                format!("{} — {}", b.name, b.value)
            }
        })
        .unwrap_or_else(|| "(no business identity extracted)".to_string());

    let mut prompt = format!("Source URL: {url}\n\nBusiness: {business}\n\nProducts:\n");
    let mut index = 0usize;
    for entity in entities.iter().filter(|e| e.kind == EntityKind::Product) {
        index += 1;
        let detail = entity
            .attributes
            .category
            .as_deref()
            .map(|c| format!(" (category: {c})"))
            .unwrap_or_default();
        prompt.push_str(&format!("{index}. {}{detail}\n", entity.name));
    }
    if index == 0 {
        prompt.push_str("(none)\n");
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;

    struct CannedAgent(String);

    #[async_trait]
    impl CompletionAgent for CannedAgent {
        async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
            Ok(self.0.clone())
        }
    }

    struct FailingAgent;

    #[async_trait]
    impl CompletionAgent for FailingAgent {
        async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
            anyhow::bail!("connection refused")
        }
    }

    fn product(name: &str, confidence: f32) -> ExtractedEntity {
        ExtractedEntity::new(EntityKind::Product, name, "", confidence, "https://acme.com")
    }

    fn business() -> ExtractedEntity {
        ExtractedEntity::new(EntityKind::Business, "Acme", "", 0.8, "https://acme.com")
    }

    fn engine_with(agent: Option<Arc<dyn CompletionAgent>>) -> ValidationEngine {
        ValidationEngine::new(agent, Arc::new(Tunables::default()))
    }

    #[tokio::test]
    async fn collaborator_failure_keeps_entities_unchanged() {
        let entities = vec![business(), product("Chili Jam", 0.7)];
        let before: Vec<f32> = entities.iter().map(|e| e.confidence).collect();

        let engine = engine_with(Some(Arc::new(FailingAgent)));
        let after = engine.validate(entities, "https://acme.com").await;

        let confidences: Vec<f32> = after.iter().map(|e| e.confidence).collect();
        assert_eq!(before, confidences);
        assert!(after.iter().all(|e| !e.attributes.forced_verification));
    }

    #[tokio::test]
    async fn all_low_scores_still_leave_the_floor_verified() {
        let entities = vec![
            business(),
            product("A", 0.50),
            product("B", 0.45),
            product("C", 0.40),
            product("D", 0.35),
            product("E", 0.30),
        ];

        // Validator scores everything below the verification threshold.
        let response = serde_json::json!({
            "business_validation": {"plausible": true, "confidence": 0.9},
            "product_validations": (1..=5).map(|i| serde_json::json!({
                "index": i, "confidence": 0.1, "is_navigation_artifact": false
            })).collect::<Vec<_>>(),
        });
        let engine = engine_with(Some(Arc::new(CannedAgent(response.to_string()))));
        let after = engine.validate(entities, "https://acme.com").await;

        let verified: Vec<&ExtractedEntity> = after
            .iter()
            .filter(|e| e.kind == EntityKind::Product && e.verified)
            .collect();
        assert_eq!(verified.len(), 2);
        assert!(verified.iter().all(|e| e.attributes.forced_verification));
    }

    #[tokio::test]
    async fn genuinely_verified_products_are_not_tagged_forced() {
        let entities = vec![business(), product("A", 0.5), product("B", 0.5)];

        let response = serde_json::json!({
            "product_validations": [
                {"index": 1, "confidence": 0.9},
                {"index": 2, "confidence": 0.8},
            ],
        });
        let engine = engine_with(Some(Arc::new(CannedAgent(response.to_string()))));
        let after = engine.validate(entities, "https://acme.com").await;

        let products: Vec<&ExtractedEntity> = after
            .iter()
            .filter(|e| e.kind == EntityKind::Product)
            .collect();
        assert!(products.iter().all(|e| e.verified));
        assert!(products.iter().all(|e| !e.attributes.forced_verification));
    }

    #[tokio::test]
    async fn navigation_artifacts_score_zero_but_floor_still_holds() {
        let entities = vec![business(), product("Home", 0.6), product("Cart", 0.5)];

        let response = serde_json::json!({
            "product_validations": [
                {"index": 1, "confidence": 0.7, "is_navigation_artifact": true},
                {"index": 2, "confidence": 0.6, "is_navigation_artifact": true},
            ],
        });
        let engine = engine_with(Some(Arc::new(CannedAgent(response.to_string()))));
        let after = engine.validate(entities, "https://acme.com").await;

        let products: Vec<&ExtractedEntity> = after
            .iter()
            .filter(|e| e.kind == EntityKind::Product)
            .collect();
        // Scored to zero, then rescued by the preservation floor.
        assert!(products.iter().all(|e| e.confidence == 0.0));
        assert!(products.iter().all(|e| e.verified && e.attributes.forced_verification));
    }

    #[tokio::test]
    async fn unparseable_response_keeps_entities_unchanged() {
        let entities = vec![business(), product("Chili Jam", 0.7)];
        let engine = engine_with(Some(Arc::new(CannedAgent(
            "I could not assess this business.".to_string(),
        ))));
        let after = engine.validate(entities, "https://acme.com").await;
        assert_eq!(after[1].confidence, 0.7);
        assert!(!after[1].verified);
    }
}
