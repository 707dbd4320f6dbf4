use std::sync::Arc;

use ai_client::{util, CompletionAgent};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tradescope_common::{EntityKind, ExtractedEntity, TradescopeError, Tunables};
use tracing::{info, warn};

use crate::heuristics;

const EXTRACTION_SYSTEM_PROMPT: &str = r#"You are a business-website analyst. Given the text of a company web page, extract the business identity, its products or services, locations, and contact details.

Respond with a single JSON object matching this schema:

{
  "business": {
    "name": "string",
    "description": "string or null",
    "industry": "string or null",
    "confidence": 0.0-1.0
  },
  "products": [
    {
      "name": "string",
      "description": "string or null",
      "category": "string or null",
      "price": "string or null",
      "sku": "string or null",
      "keywords": ["string"],
      "confidence": 0.0-1.0
    }
  ],
  "services": [ same shape as products ],
  "locations": [ {"name": "string", "value": "address or region", "confidence": 0.0-1.0} ],
  "contacts": [ {"name": "string", "value": "email/phone/handle", "confidence": 0.0-1.0} ],
  "enrichment_flags": {"compliance": true, "market": true, "cross_validate": true}
}

Rules:
- Products are things the business sells, not navigation links, category pages, or UI labels.
- Confidence reflects how certain you are the fact is real, from the page text alone.
- Omit the business object entirely if the page gives no usable identity.
- Set enrichment_flags to false only for lookups that clearly do not apply (e.g. a pure services firm needs no tariff classification).
- Keep extra prose out if you can; if you must explain, the JSON object must still appear intact."#;

// --- Collaborator response schema ---

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ModelExtraction {
    #[serde(default)]
    pub business: Option<ModelBusiness>,
    #[serde(default)]
    pub products: Vec<ModelProduct>,
    #[serde(default)]
    pub services: Vec<ModelProduct>,
    #[serde(default)]
    pub locations: Vec<ModelDetail>,
    #[serde(default)]
    pub contacts: Vec<ModelDetail>,
    #[serde(default)]
    pub enrichment_flags: Option<EnrichmentFlags>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ModelBusiness {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub industry: Option<String>,
    #[serde(default)]
    pub confidence: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ModelProduct {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub price: Option<String>,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub confidence: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ModelDetail {
    pub name: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub confidence: f32,
}

/// Which enrichment collaborators downstream stages should call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema)]
pub struct EnrichmentFlags {
    #[serde(default = "default_true")]
    pub compliance: bool,
    #[serde(default = "default_true")]
    pub market: bool,
    #[serde(default = "default_true")]
    pub cross_validate: bool,
}

fn default_true() -> bool {
    true
}

impl Default for EnrichmentFlags {
    fn default() -> Self {
        Self {
            compliance: true,
            market: true,
            cross_validate: true,
        }
    }
}

/// One extraction pass over acquired content.
#[derive(Debug, Clone)]
pub struct ExtractionOutcome {
    pub entities: Vec<ExtractedEntity>,
    pub json_parsed: bool,
    /// Extraction passes taken: 1 for a clean model parse, 2 when the model
    /// failed and heuristics ran.
    pub attempts: u32,
}

/// Turns acquired HTML into typed entities via the completion collaborator,
/// falling back to heuristic HTML extraction when the collaborator is
/// absent or its output is not JSON-shaped. A business entity is always
/// produced, synthesized from the URL's domain if nothing better exists.
pub struct EntityExtractionEngine {
    agent: Option<Arc<dyn CompletionAgent>>,
    tunables: Arc<Tunables>,
}

impl EntityExtractionEngine {
    pub fn new(agent: Option<Arc<dyn CompletionAgent>>, tunables: Arc<Tunables>) -> Self {
        Self { agent, tunables }
    }

    pub async fn extract(&self, html: &str, url: &str) -> ExtractionOutcome {
        let content = text_projection(html, self.tunables.content_max_chars);
        let mut attempts = 0u32;

        if let Some(agent) = &self.agent {
            attempts += 1;
            let user_prompt = format!(
                "Extract business facts from this page.\n\nSource URL: {url}\n\n---\n\n{content}"
            );
            match agent.complete(EXTRACTION_SYSTEM_PROMPT, &user_prompt).await {
                Ok(response) => match parse_model_response(&response) {
                    Ok(parsed) => {
                        let entities = self.entities_from_model(parsed, url);
                        info!(url, count = entities.len(), "Extracted entities from model output");
                        return ExtractionOutcome {
                            entities,
                            json_parsed: true,
                            attempts,
                        };
                    }
                    Err(err) => {
                        warn!(url, error = %err, "Model output not JSON-shaped, using heuristics");
                    }
                },
                Err(err) => {
                    warn!(url, error = %err, "Extraction collaborator failed, using heuristics");
                }
            }
        }

        attempts += 1;
        let entities = self.entities_from_heuristics(html, url);
        info!(url, count = entities.len(), "Extracted entities heuristically");
        ExtractionOutcome {
            entities,
            json_parsed: false,
            attempts,
        }
    }

    /// Heuristic-only pass, used when the collaborator path has run out of
    /// wall-clock budget.
    pub fn extract_heuristic(&self, html: &str, url: &str) -> ExtractionOutcome {
        ExtractionOutcome {
            entities: self.entities_from_heuristics(html, url),
            json_parsed: false,
            attempts: 1,
        }
    }

    /// The best-effort business identity for a URL that produced no usable
    /// content at all.
    pub fn fallback_business_entity(&self, url: &str) -> ExtractedEntity {
        self.fallback_business(url, false)
    }

    fn entities_from_model(&self, parsed: ModelExtraction, url: &str) -> Vec<ExtractedEntity> {
        let t = &self.tunables;
        let mut entities = Vec::new();

        for (kind, listings) in [
            (EntityKind::Product, &parsed.products),
            (EntityKind::Service, &parsed.services),
        ] {
            for listing in listings {
                let name = listing.name.trim();
                if listing.confidence < t.product_confidence_floor
                    || heuristics::is_navigation_label(name)
                    || heuristics::looks_like_markup(name)
                {
                    continue;
                }
                let mut entity = ExtractedEntity::new(
                    kind,
                    name,
                    listing.description.clone().unwrap_or_default(),
                    listing.confidence,
                    url,
                );
                entity.attributes.description = listing.description.clone();
                entity.attributes.category = listing.category.clone();
                entity.attributes.price = listing.price.clone();
                entity.attributes.sku = listing.sku.clone();
                entity.attributes.keywords = listing.keywords.clone();
                entities.push(entity);
            }
        }

        for (kind, details) in [
            (EntityKind::Location, &parsed.locations),
            (EntityKind::Contact, &parsed.contacts),
        ] {
            for detail in details {
                if detail.confidence < t.detail_confidence_floor || detail.name.trim().is_empty() {
                    continue;
                }
                entities.push(ExtractedEntity::new(
                    kind,
                    detail.name.trim(),
                    detail.value.trim(),
                    detail.confidence,
                    url,
                ));
            }
        }

        let business = match &parsed.business {
            Some(b) if !b.name.trim().is_empty() && b.confidence > 0.0 => {
                let mut entity = ExtractedEntity::new(
                    EntityKind::Business,
                    b.name.trim(),
                    b.description.clone().unwrap_or_default(),
                    b.confidence,
                    url,
                );
                entity.attributes.description = b.description.clone();
                entity.attributes.category = b.industry.clone();
                entity
            }
            _ => self.fallback_business(url, !entities.is_empty()),
        };
        entities.insert(0, business);

        let flags = parsed.enrichment_flags.unwrap_or_default();
        let metadata = self.metadata_entity(url, true, &entities, flags);
        entities.insert(0, metadata);

        entities
    }

    fn entities_from_heuristics(&self, html: &str, url: &str) -> Vec<ExtractedEntity> {
        let mut entities = Vec::new();

        for name in heuristics::extract_product_candidates(html) {
            entities.push(ExtractedEntity::new(
                EntityKind::Product,
                name,
                "",
                self.tunables.heuristic_product_confidence,
                url,
            ));
        }

        let (hint_name, hint_description) = heuristics::extract_business_hint(html);
        let mut business = self.fallback_business(url, !entities.is_empty());
        if let Some(description) = hint_description {
            business.value = description.clone();
            business.attributes.description = Some(description);
        }
        if let Some(name) = hint_name {
            // The page title is a hint, not an identity: the URL-derived name
            // stays authoritative, the title rides along for review.
            business
                .attributes
                .extra
                .insert("site_title".to_string(), serde_json::json!(name));
        }
        entities.insert(0, business);

        let metadata = self.metadata_entity(url, false, &entities, EnrichmentFlags::default());
        entities.insert(0, metadata);

        entities
    }

    /// Synthesize the always-present business identity from the URL domain.
    fn fallback_business(&self, url: &str, partial_extraction: bool) -> ExtractedEntity {
        let confidence = if partial_extraction {
            self.tunables.partial_fallback_business_confidence
        } else {
            self.tunables.fallback_business_confidence
        };
        let name = business_name_from_url(url);
        let mut entity = ExtractedEntity::new(EntityKind::Business, name, "", confidence, url);
        entity.attributes.extracted_from_url = true;
        entity
    }

    fn metadata_entity(
        &self,
        url: &str,
        json_parsed: bool,
        entities: &[ExtractedEntity],
        flags: EnrichmentFlags,
    ) -> ExtractedEntity {
        let has_products = entities
            .iter()
            .any(|e| matches!(e.kind, EntityKind::Product | EntityKind::Service));
        let has_business = entities.iter().any(|e| e.kind == EntityKind::Business);

        let mut entity =
            ExtractedEntity::new(EntityKind::Metadata, "extraction_diagnostics", "", 1.0, url);
        entity.attributes.extra.insert(
            "json_parsed".to_string(),
            serde_json::Value::Bool(json_parsed),
        );
        entity.attributes.extra.insert(
            "has_products".to_string(),
            serde_json::Value::Bool(has_products),
        );
        entity.attributes.extra.insert(
            "has_business".to_string(),
            serde_json::Value::Bool(has_business),
        );
        entity.attributes.extra.insert(
            "product_confidence_floor".to_string(),
            serde_json::json!(self.tunables.product_confidence_floor),
        );
        entity.attributes.extra.insert(
            "detail_confidence_floor".to_string(),
            serde_json::json!(self.tunables.detail_confidence_floor),
        );
        entity.attributes.extra.insert(
            "enrichment_flags".to_string(),
            serde_json::to_value(flags).unwrap_or(serde_json::Value::Null),
        );
        entity
    }
}

/// Find and parse the first top-level JSON object in collaborator output.
fn parse_model_response(response: &str) -> Result<ModelExtraction, TradescopeError> {
    let object = util::first_json_object(response)
        .ok_or_else(|| TradescopeError::Parse("no JSON object in response".to_string()))?;
    serde_json::from_str(object).map_err(|err| TradescopeError::Parse(err.to_string()))
}

/// Bounded text-only projection of the HTML: scripts and styles excluded,
/// tags stripped, whitespace collapsed.
pub fn text_projection(html: &str, max_chars: usize) -> String {
    let script_re =
        regex::Regex::new(r"(?is)<(script|style|noscript)[^>]*>.*?</(script|style|noscript)>")
            .expect("valid regex");
    let comment_re = regex::Regex::new(r"(?s)<!--.*?-->").expect("valid regex");
    let tag_re = regex::Regex::new(r"<[^>]+>").expect("valid regex");

    let without_scripts = script_re.replace_all(html, " ");
    let without_comments = comment_re.replace_all(&without_scripts, " ");
    let text = tag_re.replace_all(&without_comments, " ");
    let decoded = text
        .replace("&amp;", "&")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&nbsp;", " ");

    let collapsed = decoded.split_whitespace().collect::<Vec<_>>().join(" ");
    util::truncate_to_char_boundary(&collapsed, max_chars).to_string()
}

/// Derive a business name from the URL's domain: `www.` and the TLD
/// stripped, separators split, words title-cased.
pub fn business_name_from_url(url: &str) -> String {
    let host = url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(String::from))
        .unwrap_or_else(|| url.to_string());

    let domain = host.trim_start_matches("www.");
    let label = domain.split('.').next().unwrap_or(domain);

    let name: Vec<String> = label
        .split(['-', '_'])
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect();

    if name.is_empty() {
        "Unknown Business".to_string()
    } else {
        name.join(" ")
    }
}

/// Fixed per-kind weighted average over entity confidences. Empty input
/// scores zero.
pub fn calculate_overall_confidence(entities: &[ExtractedEntity]) -> f32 {
    if entities.is_empty() {
        return 0.0;
    }
    let (weighted, weights) = entities.iter().fold((0.0f32, 0.0f32), |(sum, total), e| {
        let w = e.kind.confidence_weight();
        (sum + e.confidence * w, total + w)
    });
    if weights == 0.0 {
        0.0
    } else {
        tradescope_common::clamp_confidence(weighted / weights)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> EntityExtractionEngine {
        EntityExtractionEngine::new(None, Arc::new(Tunables::default()))
    }

    #[test]
    fn business_name_from_bare_domain() {
        assert_eq!(
            business_name_from_url("https://www.organic-honey.co.uk"),
            "Organic Honey"
        );
        assert_eq!(business_name_from_url("https://acme.com"), "Acme");
    }

    #[test]
    fn overall_confidence_of_empty_is_zero() {
        assert_eq!(calculate_overall_confidence(&[]), 0.0);
    }

    #[test]
    fn overall_confidence_weights_business_over_contact() {
        let business =
            ExtractedEntity::new(EntityKind::Business, "Acme", "", 1.0, "https://acme.com");
        let contact =
            ExtractedEntity::new(EntityKind::Contact, "sales", "a@b.com", 0.0, "https://acme.com");
        let score = calculate_overall_confidence(&[business, contact]);
        // 0.4 weight on 1.0 against 0.1 weight on 0.0
        assert!((score - 0.8).abs() < 1e-6);
    }

    #[tokio::test]
    async fn extraction_without_agent_still_yields_business() {
        let outcome = engine().extract("<html></html>", "https://willow-farm.com").await;
        assert!(!outcome.json_parsed);

        let business = outcome
            .entities
            .iter()
            .find(|e| e.kind == EntityKind::Business)
            .expect("business entity");
        assert_eq!(business.name, "Willow Farm");
        assert!(business.attributes.extracted_from_url);
        assert_eq!(business.confidence, 0.6);
    }

    #[tokio::test]
    async fn heuristic_product_gets_fixed_confidence_and_raises_business_to_partial() {
        let html = r#"<div class="product"><h2>Organic Honey 500g</h2></div>"#;
        let outcome = engine().extract(html, "https://willow-farm.com").await;

        let product = outcome
            .entities
            .iter()
            .find(|e| e.kind == EntityKind::Product)
            .expect("product entity");
        assert_eq!(product.name, "Organic Honey 500g");
        assert_eq!(product.confidence, 0.4);

        let business = outcome
            .entities
            .iter()
            .find(|e| e.kind == EntityKind::Business)
            .unwrap();
        assert_eq!(business.confidence, 0.7);
    }

    #[test]
    fn metadata_entity_comes_first() {
        let outcome = engine().entities_from_heuristics("<html></html>", "https://acme.com");
        assert_eq!(outcome[0].kind, EntityKind::Metadata);
        assert_eq!(
            outcome[0].attributes.extra.get("json_parsed"),
            Some(&serde_json::Value::Bool(false))
        );
    }

    #[test]
    fn model_products_below_floor_or_navigation_are_dropped() {
        let parsed = ModelExtraction {
            business: Some(ModelBusiness {
                name: "Acme Foods".to_string(),
                description: None,
                industry: None,
                confidence: 0.9,
            }),
            products: vec![
                ModelProduct {
                    name: "Cart".to_string(),
                    description: None,
                    category: None,
                    price: None,
                    sku: None,
                    keywords: vec![],
                    confidence: 0.9,
                },
                ModelProduct {
                    name: "Maybe A Thing".to_string(),
                    description: None,
                    category: None,
                    price: None,
                    sku: None,
                    keywords: vec![],
                    confidence: 0.1,
                },
                ModelProduct {
                    name: "Chili Jam".to_string(),
                    description: None,
                    category: Some("condiments".to_string()),
                    price: None,
                    sku: None,
                    keywords: vec![],
                    confidence: 0.8,
                },
            ],
            ..Default::default()
        };

        let entities = engine().entities_from_model(parsed, "https://acme-foods.com");
        let products: Vec<_> = entities
            .iter()
            .filter(|e| e.kind == EntityKind::Product)
            .collect();
        assert_eq!(products.len(), 1);
        assert_eq!(products[0].name, "Chili Jam");
    }

    #[test]
    fn prose_wrapped_json_parses() {
        let response = "Sure, here is what I found:\n{\"business\": {\"name\": \"Acme\", \"confidence\": 0.8}, \"products\": []}\nLet me know if you need more.";
        let parsed = parse_model_response(response).unwrap();
        assert_eq!(parsed.business.unwrap().name, "Acme");
    }

    #[test]
    fn projection_strips_scripts_and_tags() {
        let html = "<html><script>var x = 1;</script><body><h1>Hello</h1> <p>World &amp; co</p></body></html>";
        assert_eq!(text_projection(html, 20_000), "Hello World & co");
    }

    #[test]
    fn projection_is_bounded() {
        let html = format!("<p>{}</p>", "word ".repeat(10_000));
        assert!(text_projection(&html, 100).len() <= 100);
    }
}
