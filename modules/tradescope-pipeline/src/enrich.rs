use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tradescope_common::{clamp_confidence, EntityKind, ExtractedEntity, Tunables};
use tracing::{info, warn};

use crate::collaborators::{
    ComplianceLookup, ComplianceRequest, MarketIntel, MarketRequest,
};
use crate::extract::EnrichmentFlags;

/// Category keywords consistent with a two-digit HS chapter prefix. Only
/// chapters this pipeline sees with any frequency are mapped; unknown
/// prefixes skip the cross-check.
fn chapter_keywords(prefix: &str) -> Option<&'static [&'static str]> {
    let keywords: &[&str] = match prefix {
        "02" => &["meat", "poultry"],
        "03" => &["fish", "seafood"],
        "04" => &["dairy", "cheese", "milk", "egg", "honey"],
        "08" => &["fruit", "nut"],
        "09" => &["coffee", "tea", "spice"],
        "19" => &["bakery", "cereal", "pasta", "snack", "bread"],
        "20" => &["vegetable", "fruit", "preserve", "juice"],
        "21" => &["food", "sauce", "condiment", "snack"],
        "22" => &["beverage", "drink", "wine", "beer", "spirit", "water"],
        "33" => &["cosmetic", "perfume", "beauty", "skincare"],
        "42" => &["leather", "bag", "luggage"],
        "61" | "62" => &["apparel", "clothing", "garment", "textile", "fashion"],
        "64" => &["footwear", "shoe", "boot"],
        "69" => &["ceramic", "pottery", "porcelain"],
        "71" => &["jewelry", "jewellery", "gem"],
        "85" => &["electronic", "electrical", "appliance"],
        "94" => &["furniture", "lighting", "bedding"],
        "95" => &["toy", "game", "sport"],
        _ => return None,
    };
    Some(keywords)
}

/// Fans product entities out to the compliance and market collaborators
/// concurrently, merging results into entity attributes. Individual failures
/// become explicit fallback markers; the batch never aborts, and every
/// sibling result is collected before the engine returns.
pub struct EnrichmentEngine {
    compliance: Arc<dyn ComplianceLookup>,
    market: Arc<dyn MarketIntel>,
    tunables: Arc<Tunables>,
}

impl EnrichmentEngine {
    pub fn new(
        compliance: Arc<dyn ComplianceLookup>,
        market: Arc<dyn MarketIntel>,
        tunables: Arc<Tunables>,
    ) -> Self {
        Self {
            compliance,
            market,
            tunables,
        }
    }

    pub async fn enrich(
        &self,
        entities: Vec<ExtractedEntity>,
        url: &str,
    ) -> Vec<ExtractedEntity> {
        let flags = read_enrichment_flags(&entities);
        if !flags.compliance && !flags.market {
            info!(url, "Enrichment disabled by extraction flags");
            return entities;
        }

        let mut entities = entities;
        let product_slots: Vec<usize> = entities
            .iter()
            .enumerate()
            .filter(|(_, e)| e.kind == EntityKind::Product)
            .map(|(i, _)| i)
            .collect();

        if product_slots.is_empty() {
            return entities;
        }

        let jobs: Vec<(usize, ExtractedEntity)> = product_slots
            .iter()
            .map(|&i| (i, entities[i].clone()))
            .collect();

        // Fan out, collecting every result — a failed sibling never drops
        // another product's enrichment.
        let enriched: Vec<(usize, ExtractedEntity)> = stream::iter(jobs)
            .map(|(slot, entity)| {
                let flags = flags;
                async move { (slot, self.enrich_product(entity, flags).await) }
            })
            .buffer_unordered(self.tunables.enrichment_concurrency)
            .collect()
            .await;

        for (slot, entity) in enriched {
            entities[slot] = entity;
        }

        info!(url, products = product_slots.len(), "Enrichment complete");
        entities
    }

    async fn enrich_product(
        &self,
        mut entity: ExtractedEntity,
        flags: EnrichmentFlags,
    ) -> ExtractedEntity {
        let attrs = &entity.attributes;
        let compliance_request = ComplianceRequest {
            product_name: entity.name.clone(),
            description: attrs.description.clone(),
            category: attrs.category.clone(),
            product_type: attrs.product_type.clone(),
            keywords: attrs.keywords.clone(),
        };
        let market_request = MarketRequest {
            product_name: entity.name.clone(),
            category: attrs.category.clone(),
            product_type: attrs.product_type.clone(),
            keywords: attrs.keywords.clone(),
            hs_code: attrs.hs_code.clone(),
        };

        let compliance_call = async {
            if flags.compliance {
                Some(self.compliance.classify(&compliance_request).await)
            } else {
                None
            }
        };
        let market_call = async {
            if flags.market {
                Some(self.market.profile(&market_request).await)
            } else {
                None
            }
        };
        let (compliance_result, market_result) = tokio::join!(compliance_call, market_call);

        let mut reported = Vec::new();

        match compliance_result {
            Some(Ok(info)) => {
                entity.attributes.hs_code = info.hs_code;
                entity.attributes.required_documents = info.required_documents;
                entity.attributes.tariff_rates = info.tariff_rates;
                entity.attributes.compliance_notes = info.notes;
                entity.attributes.compliance_confidence = Some(info.confidence);
                reported.push(info.confidence);
            }
            Some(Err(err)) => {
                warn!(product = %entity.name, error = %err, "Compliance lookup failed");
                entity.attributes.compliance_error = Some(err.to_string());
                entity.attributes.compliance_confidence =
                    Some(self.tunables.enrichment_fallback_confidence);
            }
            None => {}
        }

        match market_result {
            Some(Ok(info)) => {
                entity.attributes.market_size = info.market_size;
                entity.attributes.market_growth = info.market_growth;
                entity.attributes.competitors = info.competitors;
                entity.attributes.market_category = info.category;
                entity.attributes.trends = info.trends;
                entity.attributes.market_confidence = Some(info.confidence);
                reported.push(info.confidence);
            }
            Some(Err(err)) => {
                warn!(product = %entity.name, error = %err, "Market lookup failed");
                entity.attributes.market_error = Some(err.to_string());
                entity.attributes.market_confidence =
                    Some(self.tunables.enrichment_fallback_confidence);
            }
            None => {}
        }

        if !reported.is_empty() {
            let mean = reported.iter().sum::<f32>() / reported.len() as f32;
            entity.set_confidence((entity.confidence + mean) / 2.0);
        }

        if flags.cross_validate && self.tunables.cross_validate_enrichment {
            self.cross_reference(&mut entity);
        }

        entity
    }

    /// Consistency check between the regulatory code and the market
    /// category: the HS chapter prefix maps to category keywords; agreement
    /// nudges confidence up, disagreement penalizes it and leaves a warning.
    fn cross_reference(&self, entity: &mut ExtractedEntity) {
        let Some(hs_code) = entity.attributes.hs_code.clone() else {
            return;
        };
        let Some(category) = entity.attributes.market_category.clone() else {
            return;
        };

        let prefix: String = hs_code.chars().filter(|c| c.is_ascii_digit()).take(2).collect();
        let Some(keywords) = chapter_keywords(&prefix) else {
            return;
        };

        let category_lower = category.to_lowercase();
        let consistent = keywords.iter().any(|k| category_lower.contains(k));

        if consistent {
            entity.set_confidence(clamp_confidence(
                entity.confidence * self.tunables.consistency_boost,
            ));
        } else {
            let warning = format!(
                "HS chapter {prefix} does not match market category \"{category}\""
            );
            warn!(product = %entity.name, %warning, "Enrichment cross-check inconsistency");
            entity.set_confidence(entity.confidence * self.tunables.inconsistency_penalty);
            entity.attributes.consistency_warning = Some(warning);
        }
    }
}

/// Read the enrichment flags the extraction stage recorded on its metadata
/// entity. Absence means enrich everything.
fn read_enrichment_flags(entities: &[ExtractedEntity]) -> EnrichmentFlags {
    entities
        .iter()
        .find(|e| e.kind == EntityKind::Metadata)
        .and_then(|e| e.attributes.extra.get("enrichment_flags"))
        .and_then(|value| serde_json::from_value(value.clone()).ok())
        .unwrap_or_default()
}
