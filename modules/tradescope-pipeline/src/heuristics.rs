//! Heuristic HTML extraction, used when the completion collaborator is
//! unavailable or returns something that is not JSON-shaped.
//!
//! Candidates come from three passes over the raw HTML: product-classed
//! containers, schema.org JSON-LD blocks, and meta tags. Every candidate is
//! filtered through a "looks like markup, not a product name" rejector and a
//! "looks like a navigation label" rejector.

use std::collections::HashSet;

use tracing::debug;

/// Labels that show up in storefront navigation chrome and get misread as
/// product names.
const NAVIGATION_TERMS: &[&str] = &["home", "cart", "login", "search", "next", "previous"];

/// Window after a product-container open tag in which a heading is taken as
/// the product name.
const CONTAINER_SCAN_WINDOW: usize = 600;

/// Reject navigation chrome masquerading as a product name.
pub fn is_navigation_label(name: &str) -> bool {
    let lowered = name.trim().to_lowercase();
    NAVIGATION_TERMS.iter().any(|term| lowered == *term)
}

/// Reject code and markup fragments: HTML tags, CSS selectors, JS keywords
/// and literals, and anything too short to be a name.
pub fn looks_like_markup(name: &str) -> bool {
    let trimmed = name.trim();
    if trimmed.chars().count() < 3 {
        return true;
    }
    if trimmed.contains('<') || trimmed.contains('>') || trimmed.contains('{') || trimmed.contains('}') {
        return true;
    }
    // CSS selector shapes
    if trimmed.starts_with('.') || trimmed.starts_with('#') || trimmed.contains("::") {
        return true;
    }
    let lowered = trimmed.to_lowercase();
    const JS_FRAGMENTS: &[&str] = &[
        "function", "var ", "const ", "let ", "return", "null", "undefined", "=>", "();",
    ];
    if JS_FRAGMENTS.iter().any(|frag| lowered.contains(frag)) {
        return true;
    }
    false
}

fn is_plausible_product_name(name: &str) -> bool {
    !name.is_empty()
        && name.chars().count() <= 120
        && !looks_like_markup(name)
        && !is_navigation_label(name)
}

/// Strip inner tags, decode common entities, and collapse whitespace.
fn clean_fragment(fragment: &str) -> String {
    let tag_re = regex::Regex::new(r"<[^>]+>").expect("valid regex");
    let no_tags = tag_re.replace_all(fragment, " ");
    let decoded = no_tags
        .replace("&amp;", "&")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&nbsp;", " ");
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Scan raw HTML for product-name candidates. Order of discovery is
/// preserved; duplicates are dropped.
pub fn extract_product_candidates(html: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut candidates = Vec::new();

    let mut push = |name: String| {
        if is_plausible_product_name(&name) && seen.insert(name.to_lowercase()) {
            candidates.push(name);
        }
    };

    // Pass 1: product-classed containers, taking the first heading inside
    // each container's scan window.
    let container_re = regex::Regex::new(
        r#"(?i)<(?:div|li|article|section)[^>]*class\s*=\s*["'][^"']*product[^"']*["'][^>]*>"#,
    )
    .expect("valid regex");
    let heading_re =
        regex::Regex::new(r"(?is)<h[1-6][^>]*>(.*?)</h[1-6]>").expect("valid regex");

    for container in container_re.find_iter(html) {
        let start = container.end();
        let end = (start + CONTAINER_SCAN_WINDOW).min(html.len());
        let window = &html[start..end];
        if let Some(cap) = heading_re.captures(window) {
            push(clean_fragment(&cap[1]));
        }
    }

    // Pass 2: schema.org JSON-LD Product blocks.
    let ld_re = regex::Regex::new(
        r#"(?is)<script[^>]*type\s*=\s*["']application/ld\+json["'][^>]*>(.*?)</script>"#,
    )
    .expect("valid regex");
    for cap in ld_re.captures_iter(html) {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(cap[1].trim()) {
            for name in json_ld_product_names(&value) {
                push(name);
            }
        }
    }

    // Pass 3: meta tags that commonly carry the product name.
    for property in ["og:title", "product:name", "twitter:title"] {
        let meta_re = regex::Regex::new(&format!(
            r#"(?i)<meta[^>]*(?:property|name)\s*=\s*["']{}["'][^>]*content\s*=\s*["']([^"']+)["']"#,
            regex::escape(property)
        ))
        .expect("valid regex");
        for cap in meta_re.captures_iter(html) {
            push(clean_fragment(&cap[1]));
        }
    }

    debug!(count = candidates.len(), "Heuristic product candidates");
    candidates
}

/// Walk a JSON-LD value collecting names of Product-typed nodes, including
/// ones nested under @graph or in top-level arrays.
fn json_ld_product_names(value: &serde_json::Value) -> Vec<String> {
    let mut names = Vec::new();
    collect_product_names(value, &mut names);
    names
}

fn collect_product_names(value: &serde_json::Value, out: &mut Vec<String>) {
    match value {
        serde_json::Value::Array(items) => {
            for item in items {
                collect_product_names(item, out);
            }
        }
        serde_json::Value::Object(map) => {
            let is_product = map
                .get("@type")
                .map(|t| match t {
                    serde_json::Value::String(s) => s.eq_ignore_ascii_case("product"),
                    serde_json::Value::Array(types) => types
                        .iter()
                        .filter_map(|v| v.as_str())
                        .any(|s| s.eq_ignore_ascii_case("product")),
                    _ => false,
                })
                .unwrap_or(false);

            if is_product {
                if let Some(name) = map.get("name").and_then(|n| n.as_str()) {
                    out.push(name.trim().to_string());
                }
            }
            if let Some(graph) = map.get("@graph") {
                collect_product_names(graph, out);
            }
        }
        _ => {}
    }
}

/// Pull a business-name hint and description out of page metadata.
pub fn extract_business_hint(html: &str) -> (Option<String>, Option<String>) {
    let site_name_re = regex::Regex::new(
        r#"(?i)<meta[^>]*property\s*=\s*["']og:site_name["'][^>]*content\s*=\s*["']([^"']+)["']"#,
    )
    .expect("valid regex");
    let title_re = regex::Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("valid regex");
    let description_re = regex::Regex::new(
        r#"(?i)<meta[^>]*name\s*=\s*["']description["'][^>]*content\s*=\s*["']([^"']+)["']"#,
    )
    .expect("valid regex");

    let name = site_name_re
        .captures(html)
        .map(|cap| clean_fragment(&cap[1]))
        .or_else(|| title_re.captures(html).map(|cap| clean_fragment(&cap[1])))
        .filter(|n| !n.is_empty());

    let description = description_re
        .captures(html)
        .map(|cap| clean_fragment(&cap[1]))
        .filter(|d| !d.is_empty());

    (name, description)
}
