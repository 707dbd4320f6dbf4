//! Regex attribute extraction over product names and descriptions.
//!
//! Each category is independently optional and the first match wins. The
//! same battery feeds both consolidation (compatibility gating, base-type
//! derivation) and group attribute merging.

use std::collections::HashMap;

use regex::Regex;

/// Attribute keys that distinguish variants within one product family.
/// These never gate group compatibility — differing sizes are exactly what a
/// variant list is for.
pub const VARIANT_KEYS: &[&str] = &["size", "quantity", "dimensions", "color", "flavor"];

/// Attribute keys that describe what a product *is*. Conflicts here veto a
/// group join regardless of name similarity.
pub const IDENTITY_KEYS: &[&str] = &[
    "material",
    "form",
    "quality",
    "packaging",
    "preparation",
    "age_group",
    "ingredient",
];

pub struct AttributeExtractor {
    categories: Vec<(&'static str, Regex)>,
    variant_token: Regex,
}

impl AttributeExtractor {
    pub fn new() -> Self {
        let patterns: &[(&str, &str)] = &[
            (
                "dimensions",
                r"(?i)\b\d+(?:[.,]\d+)?\s?(?:x|×)\s?\d+(?:[.,]\d+)?(?:\s?(?:x|×)\s?\d+(?:[.,]\d+)?)?\s?(?:cm|mm|m|in|inches|ft)?\b",
            ),
            (
                "size",
                r"(?i)\b\d+(?:[.,]\d+)?\s?(?:kg|mg|g|lbs|lb|oz|ml|cl|litres|litre|liters|liter|gallons|gallon|l)\b",
            ),
            (
                "quantity",
                r"(?i)\b(?:pack|set|box|case)\s+of\s+\d+\b|\b\d+\s?(?:pack|pcs|pieces|count|ct)\b",
            ),
            (
                "material",
                r"(?i)\b(?:cotton|leather|wool|silk|polyester|nylon|denim|linen|bamboo|wooden|wood|metal|stainless|steel|aluminium|aluminum|plastic|glass|ceramic|rubber|canvas|suede)\b",
            ),
            (
                "color",
                r"(?i)\b(?:black|white|red|blue|green|yellow|orange|purple|pink|brown|grey|gray|beige|navy|gold|silver)\b",
            ),
            (
                "flavor",
                r"(?i)\b(?:chocolate|vanilla|strawberry|caramel|mint|lemon|mango|banana|coconut|coffee|hazelnut|spicy|bbq|barbecue|garlic|chilli|chili)\b",
            ),
            (
                "quality",
                r"(?i)\b(?:premium|organic|natural|artisanal|artisan|handmade|gourmet|luxury|classic|traditional|deluxe)\b",
            ),
            (
                "packaging",
                r"(?i)\b(?:boxed|box|bagged|bag|bottled|bottle|canned|can|jarred|jar|pouch|tub|tin|carton|wrapped)\b",
            ),
            (
                "form",
                r"(?i)\b(?:powdered|powder|liquid|granulated|granule|sliced|whole|ground|shredded|diced|frozen|dried|fresh|instant)\b",
            ),
            (
                "preparation",
                r"(?i)\b(?:fried|baked|roasted|grilled|smoked|raw|cooked|breaded|battered|marinated)\b",
            ),
            (
                "age_group",
                r"(?i)\b(?:kids|children|baby|infant|toddler|junior|youth|adult|senior)\b",
            ),
        ];

        let categories = patterns
            .iter()
            .map(|(key, pattern)| (*key, Regex::new(pattern).expect("valid regex")))
            .collect();

        // Tokens stripped when deriving a product's core name: sizes,
        // quantities, and dimensions, which vary per SKU.
        let variant_token = Regex::new(
            r"(?i)\b\d+(?:[.,]\d+)?\s?(?:kg|mg|g|lbs|lb|oz|ml|cl|litres|litre|liters|liter|gallons|gallon|l)\b|\b(?:pack|set|box|case)\s+of\s+\d+\b|\b\d+\s?(?:pack|pcs|pieces|count|ct)\b|\b\d+(?:[.,]\d+)?\s?(?:x|×)\s?\d+(?:[.,]\d+)?\b",
        )
        .expect("valid regex");

        Self {
            categories,
            variant_token,
        }
    }

    /// Run the battery over `name + description`. First match wins per
    /// category; values are lowercased for comparability.
    pub fn extract(&self, name: &str, description: Option<&str>) -> HashMap<String, String> {
        let haystack = match description {
            Some(d) => format!("{name} {d}"),
            None => name.to_string(),
        };

        let mut attributes = HashMap::new();
        for (key, pattern) in &self.categories {
            if let Some(m) = pattern.find(&haystack) {
                attributes.insert(
                    key.to_string(),
                    m.as_str().trim().to_lowercase(),
                );
            }
        }
        attributes
    }

    /// Remove per-SKU tokens (size, quantity, dimensions) from a name,
    /// preserving the remaining casing.
    pub fn strip_variant_tokens(&self, name: &str) -> String {
        let stripped = self.variant_token.replace_all(name, " ");
        stripped.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// Lowercased, variant-token-free projection of a name, used for
    /// similarity comparisons.
    pub fn core_name(&self, name: &str) -> String {
        self.strip_variant_tokens(name).to_lowercase()
    }
}

impl Default for AttributeExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_and_quality_are_extracted() {
        let extractor = AttributeExtractor::new();
        let attrs = extractor.extract("Organic Honey 500g", None);
        assert_eq!(attrs.get("size").map(String::as_str), Some("500g"));
        assert_eq!(attrs.get("quality").map(String::as_str), Some("organic"));
    }

    #[test]
    fn first_match_wins_per_category() {
        let extractor = AttributeExtractor::new();
        let attrs = extractor.extract("Cotton and leather satchel", None);
        assert_eq!(attrs.get("material").map(String::as_str), Some("cotton"));
    }

    #[test]
    fn description_contributes_attributes() {
        let extractor = AttributeExtractor::new();
        let attrs = extractor.extract("Satchel", Some("Handmade from full-grain leather"));
        assert_eq!(attrs.get("material").map(String::as_str), Some("leather"));
        assert_eq!(attrs.get("quality").map(String::as_str), Some("handmade"));
    }

    #[test]
    fn quantity_phrases_are_matched() {
        let extractor = AttributeExtractor::new();
        let attrs = extractor.extract("Sparkling Water, pack of 6", None);
        assert_eq!(attrs.get("quantity").map(String::as_str), Some("pack of 6"));
    }

    #[test]
    fn core_name_strips_sizes_but_keeps_colors() {
        let extractor = AttributeExtractor::new();
        assert_eq!(extractor.core_name("Red Wine 750ml"), "red wine");
        assert_eq!(extractor.core_name("Red Wine 1.5L"), "red wine");
        assert_eq!(extractor.core_name("Navy Wool Scarf"), "navy wool scarf");
    }

    #[test]
    fn no_match_leaves_category_absent() {
        let extractor = AttributeExtractor::new();
        let attrs = extractor.extract("Gift Voucher", None);
        assert!(attrs.get("material").is_none());
        assert!(attrs.get("size").is_none());
    }
}
