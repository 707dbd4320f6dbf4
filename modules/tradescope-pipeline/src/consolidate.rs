use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use anyhow::Result;
use regex::Regex;
use tradescope_common::{EntityKind, ExtractedEntity, ProductGroup, ProductVariant, Tunables};
use tracing::{debug, warn};

use crate::attributes::{AttributeExtractor, IDENTITY_KEYS};

/// Bridge from pipeline output to consolidation input: product entities
/// become raw variants.
pub fn variants_from_entities(entities: &[ExtractedEntity]) -> Vec<ProductVariant> {
    entities
        .iter()
        .filter(|e| e.kind == EntityKind::Product)
        .map(|e| ProductVariant {
            name: e.name.clone(),
            description: e.attributes.description.clone(),
            sku: e.attributes.sku.clone(),
            price: e.attributes.price.clone(),
            attributes: HashMap::new(),
            selected: false,
        })
        .collect()
}

/// A rule that claims variants for a named product family before fuzzy
/// clustering runs. First matching rule wins.
struct ConsolidationRule {
    name: &'static str,
    pattern: Regex,
    base_type: &'static str,
    /// Rule-specific ingredient extraction applied to claimed variants.
    ingredient: Option<Regex>,
}

fn default_rules() -> Vec<ConsolidationRule> {
    let ingredient =
        || Regex::new(r"(?i)\b(chicken|beef|pork|shrimp|vegetable|veggie|cheese)\b").expect("valid regex");

    vec![
        ConsolidationRule {
            name: "snack-wraps",
            pattern: Regex::new(r"(?i)\b(?:spring rolls?|egg rolls?|wraps?|samosas?|dumplings?|empanadas?)\b")
                .expect("valid regex"),
            base_type: "Snack Wraps",
            ingredient: Some(ingredient()),
        },
        ConsolidationRule {
            name: "corn-dogs",
            pattern: Regex::new(r"(?i)\bcorn\s?dogs?\b").expect("valid regex"),
            base_type: "Corn Dogs",
            ingredient: Some(ingredient()),
        },
        ConsolidationRule {
            name: "cheese",
            pattern: Regex::new(r"(?i)\bcheeses?\b").expect("valid regex"),
            base_type: "Cheese",
            ingredient: None,
        },
    ]
}

/// A group being assembled during one consolidation run.
struct GroupDraft {
    base_type: String,
    rule: Option<&'static str>,
    variants: Vec<ProductVariant>,
    /// Lowercased, variant-token-free names, parallel to `variants`.
    core_names: Vec<String>,
    core_base: String,
    join_scores: Vec<f64>,
}

impl GroupDraft {
    fn new(base_type: String, rule: Option<&'static str>) -> Self {
        let core_base = base_type.to_lowercase();
        Self {
            base_type,
            rule,
            variants: Vec::new(),
            core_names: Vec::new(),
            core_base,
            join_scores: Vec::new(),
        }
    }

    fn push(&mut self, variant: ProductVariant, core_name: String) {
        self.variants.push(variant);
        self.core_names.push(core_name);
    }
}

/// Groups raw product variants into coherent families: rule matching first,
/// then fuzzy-similarity clustering of the remainder, then a post-processing
/// pass that merges majority attributes and caps variant lists.
///
/// Deterministic for a fixed input order and rule set. If consolidation
/// fails internally it degrades to one singleton group per variant rather
/// than losing data.
pub struct ProductConsolidationEngine {
    rules: Vec<ConsolidationRule>,
    extractor: AttributeExtractor,
    tunables: Arc<Tunables>,
}

impl ProductConsolidationEngine {
    pub fn new(tunables: Arc<Tunables>) -> Self {
        Self {
            rules: default_rules(),
            extractor: AttributeExtractor::new(),
            tunables,
        }
    }

    pub fn consolidate(&self, variants: Vec<ProductVariant>) -> Vec<ProductGroup> {
        if variants.is_empty() {
            return Vec::new();
        }

        match self.try_consolidate(variants.clone()) {
            Ok(groups) => groups,
            Err(err) => {
                warn!(error = %err, "Consolidation failed, degrading to singleton groups");
                variants.into_iter().map(singleton_group).collect()
            }
        }
    }

    fn try_consolidate(&self, variants: Vec<ProductVariant>) -> Result<Vec<ProductGroup>> {
        let mut groups: Vec<GroupDraft> = Vec::new();
        let mut unmatched: Vec<ProductVariant> = Vec::new();

        // Phase 1: rule matching.
        for mut variant in variants {
            let extracted = self
                .extractor
                .extract(&variant.name, variant.description.as_deref());
            for (key, value) in extracted {
                variant.attributes.entry(key).or_insert(value);
            }

            match self.rules.iter().find(|r| r.pattern.is_match(&variant.name)) {
                Some(rule) => {
                    if let Some(ingredient_re) = &rule.ingredient {
                        if let Some(m) = ingredient_re.find(&variant.name) {
                            variant
                                .attributes
                                .entry("ingredient".to_string())
                                .or_insert(m.as_str().to_lowercase());
                        }
                    }
                    let core = self.extractor.core_name(&variant.name);
                    match groups
                        .iter_mut()
                        .find(|g| g.rule == Some(rule.name))
                    {
                        Some(group) => group.push(variant, core),
                        None => {
                            let mut group =
                                GroupDraft::new(rule.base_type.to_string(), Some(rule.name));
                            group.push(variant, core);
                            groups.push(group);
                        }
                    }
                }
                None => unmatched.push(variant),
            }
        }

        // Phase 2: fuzzy clustering of the remainder.
        for variant in unmatched {
            let core = self.extractor.core_name(&variant.name);

            let mut best: Option<(usize, f64, f64)> = None;
            for (idx, group) in groups.iter().enumerate() {
                let compat = self.group_compatibility(&variant, group);
                let name_sim = strsim::normalized_levenshtein(&core, &group.core_base);
                let best_variant_sim = group
                    .core_names
                    .iter()
                    .map(|other| strsim::normalized_levenshtein(&core, other))
                    .fold(0.0f64, f64::max);

                // Name dominates, attributes gate.
                let score = 0.5 * name_sim + 0.3 * best_variant_sim + 0.2 * compat;
                if best.map(|(_, s, _)| score > s).unwrap_or(true) {
                    best = Some((idx, score, compat));
                }
            }

            match best {
                Some((idx, score, compat))
                    if score >= self.tunables.group_match_threshold
                        && compat >= self.tunables.attribute_compat_gate =>
                {
                    debug!(
                        variant = %variant.name,
                        group = %groups[idx].base_type,
                        score,
                        "Variant joined group"
                    );
                    groups[idx].join_scores.push(score);
                    groups[idx].push(variant, core);
                }
                _ => {
                    let base_type = self.derive_base_type(&variant);
                    let mut group = GroupDraft::new(base_type, None);
                    group.push(variant, core);
                    groups.push(group);
                }
            }
        }

        // Phase 3: post-processing.
        let groups = groups
            .into_iter()
            .map(|draft| self.finalize(draft))
            .filter(|group| !group.variants.is_empty())
            .collect();

        Ok(groups)
    }

    /// Identity-attribute compatibility between a candidate and a group:
    /// the worst pairwise score against the group's variants. A variant with
    /// no shared identity keys is neutral; conflicting values (similarity
    /// below the near-equality threshold) pull the score toward zero.
    fn group_compatibility(&self, candidate: &ProductVariant, group: &GroupDraft) -> f64 {
        group
            .variants
            .iter()
            .map(|other| self.pair_compatibility(&candidate.attributes, &other.attributes))
            .fold(1.0f64, f64::min)
    }

    fn pair_compatibility(
        &self,
        a: &HashMap<String, String>,
        b: &HashMap<String, String>,
    ) -> f64 {
        let shared: Vec<&str> = IDENTITY_KEYS
            .iter()
            .copied()
            .filter(|key| a.contains_key(*key) && b.contains_key(*key))
            .collect();

        if shared.is_empty() {
            // Nothing conflicts, nothing confirms.
            return 0.5;
        }

        let near_equal = |key: &str| {
            let left = a[key].to_lowercase();
            let right = b[key].to_lowercase();
            strsim::normalized_levenshtein(&left, &right)
                >= self.tunables.attribute_value_similarity
        };

        // A material contradiction is a different product, full stop — no
        // amount of agreement on softer keys outweighs it.
        if shared.contains(&"material") && !near_equal("material") {
            return 0.0;
        }

        let matching = shared.iter().filter(|&&key| near_equal(key)).count();
        matching as f64 / shared.len() as f64
    }

    /// New-group base type: the first 1-3 words of the variant-token-free
    /// name, prefixed by a detected material or form when the name itself
    /// does not carry it.
    fn derive_base_type(&self, variant: &ProductVariant) -> String {
        let stripped = self.extractor.strip_variant_tokens(&variant.name);
        let words: Vec<&str> = stripped.split_whitespace().take(3).collect();
        let mut base = if words.is_empty() {
            variant.name.trim().to_string()
        } else {
            words.join(" ")
        };

        for key in ["material", "form"] {
            if let Some(value) = variant.attributes.get(key) {
                if !base.to_lowercase().contains(value.as_str()) {
                    base = format!("{} {}", title_case(value), base);
                }
                break;
            }
        }

        base
    }

    fn finalize(&self, draft: GroupDraft) -> ProductGroup {
        let confidence = if draft.rule.is_some() {
            0.9
        } else if draft.join_scores.is_empty() {
            0.6
        } else {
            let mean =
                draft.join_scores.iter().sum::<f64>() / draft.join_scores.len() as f64;
            mean as f32
        };

        let attributes = merge_majority_attributes(
            &draft.variants,
            self.tunables.attribute_majority_fraction,
        );

        let description = draft
            .variants
            .iter()
            .find_map(|v| v.description.clone());

        let mut variants = draft.variants;
        variants.truncate(self.tunables.max_variants_per_group);

        ProductGroup {
            base_type: draft.base_type,
            description,
            confidence: tradescope_common::clamp_confidence(confidence),
            variants,
            attributes,
        }
    }
}

/// Majority-vote attribute merge: a value is kept only when it is the
/// uniquely most frequent value for its key and appears in at least the
/// given fraction of variants.
fn merge_majority_attributes(
    variants: &[ProductVariant],
    majority_fraction: f64,
) -> HashMap<String, String> {
    let total = variants.len();
    if total == 0 {
        return HashMap::new();
    }

    let keys: BTreeSet<&str> = variants
        .iter()
        .flat_map(|v| v.attributes.keys().map(String::as_str))
        .collect();

    let mut merged = HashMap::new();
    for key in keys {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for variant in variants {
            if let Some(value) = variant.attributes.get(key) {
                *counts.entry(value.as_str()).or_default() += 1;
            }
        }

        let Some((&winner, &count)) = counts.iter().max_by_key(|(_, &count)| count) else {
            continue;
        };
        let dominant = counts
            .iter()
            .all(|(&value, &c)| value == winner || c < count);
        if dominant && count as f64 >= majority_fraction * total as f64 {
            merged.insert(key.to_string(), winner.to_string());
        }
    }

    merged
}

fn singleton_group(variant: ProductVariant) -> ProductGroup {
    ProductGroup {
        base_type: variant.name.clone(),
        description: variant.description.clone(),
        confidence: 0.5,
        attributes: variant.attributes.clone(),
        variants: vec![variant],
    }
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> ProductConsolidationEngine {
        ProductConsolidationEngine::new(Arc::new(Tunables::default()))
    }

    fn variant(name: &str) -> ProductVariant {
        ProductVariant::named(name)
    }

    #[test]
    fn empty_input_yields_no_groups() {
        assert!(engine().consolidate(vec![]).is_empty());
    }

    #[test]
    fn size_variants_collapse_into_one_group() {
        let groups = engine().consolidate(vec![
            variant("Red Wine 750ml"),
            variant("Red Wine 1.5L"),
        ]);

        assert_eq!(groups.len(), 1);
        let group = &groups[0];
        assert_eq!(group.base_type, "Red Wine");
        assert_eq!(group.variants.len(), 2);
        // Sizes differ per variant with no dominant value, so the group
        // carries no size attribute.
        assert!(group.attributes.get("size").is_none());
    }

    #[test]
    fn dominant_size_survives_the_majority_vote() {
        let groups = engine().consolidate(vec![
            variant("Olive Oil 500ml"),
            variant("Olive Oil 500ml"),
            variant("Olive Oil 250ml"),
        ]);

        assert_eq!(groups.len(), 1);
        assert_eq!(
            groups[0].attributes.get("size").map(String::as_str),
            Some("500ml")
        );
    }

    #[test]
    fn conflicting_materials_veto_identical_names() {
        let mut cotton = variant("Classic Tote Bag");
        cotton
            .attributes
            .insert("material".to_string(), "cotton".to_string());
        let mut leather = variant("Classic Tote Bag");
        leather
            .attributes
            .insert("material".to_string(), "leather".to_string());

        let groups = engine().consolidate(vec![cotton, leather]);
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn rule_matched_variants_share_a_family() {
        let groups = engine().consolidate(vec![
            variant("Chicken Corn Dogs 12 pack"),
            variant("Beef Corn Dog"),
        ]);

        assert_eq!(groups.len(), 1);
        let group = &groups[0];
        assert_eq!(group.base_type, "Corn Dogs");
        assert_eq!(group.confidence, 0.9);
        assert_eq!(
            group.variants[0].attributes.get("ingredient").map(String::as_str),
            Some("chicken")
        );
    }

    #[test]
    fn unrelated_products_stay_apart() {
        let groups = engine().consolidate(vec![
            variant("Red Wine 750ml"),
            variant("Stainless Steel Water Bottle"),
        ]);
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn consolidation_is_deterministic() {
        let input = vec![
            variant("Red Wine 750ml"),
            variant("Red Wine 1.5L"),
            variant("Chicken Corn Dogs 12 pack"),
            variant("Stainless Steel Water Bottle"),
            variant("White Wine 750ml"),
        ];

        let first = engine().consolidate(input.clone());
        let second = engine().consolidate(input);

        let shape = |groups: &[ProductGroup]| -> Vec<(String, Vec<String>)> {
            groups
                .iter()
                .map(|g| {
                    (
                        g.base_type.clone(),
                        g.variants.iter().map(|v| v.name.clone()).collect(),
                    )
                })
                .collect()
        };
        assert_eq!(shape(&first), shape(&second));
    }

    #[test]
    fn variant_lists_are_capped() {
        let tunables = Tunables {
            max_variants_per_group: 2,
            ..Tunables::default()
        };
        let engine = ProductConsolidationEngine::new(Arc::new(tunables));

        let groups = engine.consolidate(vec![
            variant("Green Tea 50g"),
            variant("Green Tea 100g"),
            variant("Green Tea 200g"),
        ]);

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].variants.len(), 2);
    }

    #[test]
    fn material_prefix_lands_in_new_group_base_type() {
        let groups = engine().consolidate(vec![variant("Handcrafted bowl, ceramic 12cm")]);
        assert_eq!(groups.len(), 1);
        assert!(groups[0].base_type.to_lowercase().contains("ceramic"));
    }

    #[test]
    fn majority_attribute_round_trip() {
        let mut a = variant("Wool Scarf Grey");
        a.attributes
            .insert("material".to_string(), "wool".to_string());
        let mut b = variant("Wool Scarf Navy");
        b.attributes
            .insert("material".to_string(), "wool".to_string());
        let mut c = variant("Wool Scarf Red");
        c.attributes
            .insert("material".to_string(), "wool".to_string());

        let groups = engine().consolidate(vec![a, b, c]);
        assert_eq!(groups.len(), 1);
        assert_eq!(
            groups[0].attributes.get("material").map(String::as_str),
            Some("wool")
        );
    }
}
