//! Embedded-data tier: app-state and structured-data payloads.
//!
//! Modern sites frequently ship their catalog inside a hydration payload
//! even when the rendered DOM is empty. This tier scans for known payload
//! carriers (framework hydration blobs, global state assignments, JSON-LD),
//! parses them leniently, and searches the parsed structure for arrays of
//! item-shaped objects.
//!
//! Nothing beyond shape is trusted: parsing recovers from trailing commas
//! but enforces hard depth and size bounds against pathological inputs.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::debug;

/// Recursion bound while validating and searching parsed payloads.
const MAX_JSON_DEPTH: usize = 24;
/// Payloads above this size are skipped rather than parsed.
const MAX_PAYLOAD_BYTES: usize = 4 * 1024 * 1024;
/// Most items mapped to text from a single payload.
const MAX_ITEMS: usize = 500;

/// Payload carriers in priority order. Hydration blobs come first: they
/// carry the full app state, while JSON-LD is often just a storefront stub.
static PAYLOAD_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r#"(?s)<script[^>]*id="__NEXT_DATA__"[^>]*>(.*?)</script>"#,
        r#"(?s)window\.__INITIAL_STATE__\s*=\s*(\{.*?\})\s*(?:;|</script>)"#,
        r#"(?s)window\.__APOLLO_STATE__\s*=\s*(\{.*?\})\s*(?:;|</script>)"#,
        r#"(?s)window\.__PRELOADED_STATE__\s*=\s*(\{.*?\})\s*(?:;|</script>)"#,
        r#"(?s)<script[^>]*type="application/ld\+json"[^>]*>(.*?)</script>"#,
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("static payload pattern"))
    .collect()
});

static TRAILING_COMMA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s*([}\]])").expect("static trailing comma pattern"));

const NAME_KEYS: &[&str] = &["name", "title", "label", "itemName", "productName"];
const PRICE_KEYS: &[&str] = &[
    "price",
    "amount",
    "cost",
    "priceCents",
    "price_cents",
    "unitPrice",
    "priceRange",
];
const DETAIL_KEYS: &[&str] = &["description", "summary", "details", "subtitle"];

/// Result of the embedded-data tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedExtraction {
    /// Item lines, one per matched object.
    pub text: String,
    /// Matched objects carrying both a name and a price.
    pub item_count: usize,
    /// Matched objects carrying a name but no price-like field. Kept, but
    /// counted so callers can observe heuristic quality.
    pub low_confidence: usize,
}

/// Scan HTML for embedded payloads and map item-shaped objects to text.
///
/// Returns `None` when no payload parses or no item-shaped arrays exist.
pub fn extract_embedded_items(html: &str) -> Option<EmbeddedExtraction> {
    let mut items: Vec<ItemLine> = Vec::new();

    for pattern in PAYLOAD_PATTERNS.iter() {
        for captures in pattern.captures_iter(html) {
            let Some(raw) = captures.get(1) else { continue };
            let Some(value) = parse_lenient(raw.as_str()) else {
                continue;
            };
            collect_items(&value, 0, &mut items);
            if items.len() >= MAX_ITEMS {
                break;
            }
        }
        // Higher-priority carriers that matched make lower tiers redundant.
        if !items.is_empty() {
            break;
        }
    }

    if items.is_empty() {
        return None;
    }
    items.truncate(MAX_ITEMS);

    let low_confidence = items.iter().filter(|item| item.price.is_none()).count();
    if low_confidence > 0 {
        debug!(
            low_confidence,
            total = items.len(),
            "embedded items matched without a price-like field"
        );
    }

    let text = items
        .iter()
        .map(ItemLine::render)
        .collect::<Vec<_>>()
        .join("\n");

    Some(EmbeddedExtraction {
        text,
        item_count: items.len() - low_confidence,
        low_confidence,
    })
}

/// Parse untrusted JSON, recovering from trailing commas, within hard
/// size and depth bounds.
pub fn parse_lenient(raw: &str) -> Option<Value> {
    let raw = raw.trim();
    if raw.is_empty() || raw.len() > MAX_PAYLOAD_BYTES {
        return None;
    }

    let value = serde_json::from_str::<Value>(raw).ok().or_else(|| {
        let repaired = TRAILING_COMMA.replace_all(raw, "$1");
        serde_json::from_str::<Value>(&repaired).ok()
    })?;

    within_depth(&value, 0).then_some(value)
}

fn within_depth(value: &Value, depth: usize) -> bool {
    if depth > MAX_JSON_DEPTH {
        return false;
    }
    match value {
        Value::Array(values) => values.iter().all(|v| within_depth(v, depth + 1)),
        Value::Object(map) => map.values().all(|v| within_depth(v, depth + 1)),
        _ => true,
    }
}

struct ItemLine {
    name: String,
    price: Option<String>,
    detail: Option<String>,
}

impl ItemLine {
    fn render(&self) -> String {
        let mut line = self.name.clone();
        if let Some(price) = &self.price {
            line.push_str(" — ");
            line.push_str(price);
        }
        if let Some(detail) = &self.detail {
            line.push_str(" — ");
            line.push_str(detail);
        }
        line
    }
}

fn collect_items(value: &Value, depth: usize, out: &mut Vec<ItemLine>) {
    if depth > MAX_JSON_DEPTH || out.len() >= MAX_ITEMS {
        return;
    }
    match value {
        Value::Array(values) => {
            let shaped: Vec<&serde_json::Map<String, Value>> = values
                .iter()
                .filter_map(Value::as_object)
                .filter(|&map| named(map).is_some())
                .collect();
            // An array only counts as a catalog when item-shaped objects
            // dominate it; isolated name-bearing objects are config noise.
            if shaped.len() >= 2 && shaped.iter().any(|&map| priced(map).is_some()) {
                for map in shaped {
                    if out.len() >= MAX_ITEMS {
                        return;
                    }
                    out.push(to_line(map));
                }
            } else {
                for inner in values {
                    collect_items(inner, depth + 1, out);
                }
            }
        }
        Value::Object(map) => {
            // JSON-LD products appear as single objects, not arrays.
            if is_ld_item(map) {
                out.push(to_line(map));
            }
            for inner in map.values() {
                collect_items(inner, depth + 1, out);
            }
        }
        _ => {}
    }
}

fn is_ld_item(map: &serde_json::Map<String, Value>) -> bool {
    let Some(kind) = map.get("@type").and_then(Value::as_str) else {
        return false;
    };
    matches!(kind, "Product" | "MenuItem" | "Service" | "Offer") && named(map).is_some()
}

fn named(map: &serde_json::Map<String, Value>) -> Option<String> {
    NAME_KEYS
        .iter()
        .find_map(|key| map.get(*key))
        .and_then(string_like)
}

fn priced(map: &serde_json::Map<String, Value>) -> Option<String> {
    for key in PRICE_KEYS {
        if let Some(value) = map.get(*key) {
            match value {
                Value::Number(num) => return Some(num.to_string()),
                Value::String(text) if looks_like_price(text) => return Some(text.clone()),
                // JSON-LD nests the price inside an offers object.
                Value::Object(inner) => {
                    if let Some(nested) = priced(inner) {
                        return Some(nested);
                    }
                }
                _ => {}
            }
        }
    }
    map.get("offers")
        .and_then(Value::as_object)
        .and_then(priced)
}

fn looks_like_price(text: &str) -> bool {
    let trimmed = text.trim();
    !trimmed.is_empty()
        && trimmed.len() <= 24
        && trimmed.chars().any(|c| c.is_ascii_digit())
        && trimmed
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '$' | '€' | '£' | '.' | ',' | ' ') || c.is_ascii_alphabetic())
}

fn string_like(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => {
            let trimmed = text.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        _ => None,
    }
}

fn to_line(map: &serde_json::Map<String, Value>) -> ItemLine {
    ItemLine {
        name: named(map).unwrap_or_default(),
        price: priced(map),
        detail: DETAIL_KEYS
            .iter()
            .find_map(|key| map.get(*key))
            .and_then(string_like),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_data_payload_yields_items() {
        let html = r#"<html><body><div id="__next"></div>
<script id="__NEXT_DATA__" type="application/json">
{"props":{"pageProps":{"menu":[
  {"name":"Espresso","price":3.5,"description":"double shot"},
  {"name":"Cortado","price":4.25},
  {"name":"Day-old pastry","price":"2.00"}
]}}}
</script></body></html>"#;

        let extraction = extract_embedded_items(html).unwrap();
        assert_eq!(extraction.item_count, 3);
        assert_eq!(extraction.low_confidence, 0);
        assert!(extraction.text.contains("Espresso — 3.5 — double shot"));
        assert!(extraction.text.contains("Cortado — 4.25"));
    }

    #[test]
    fn trailing_commas_are_recovered() {
        let value = parse_lenient(r#"{"items":[{"name":"a","price":1,},],}"#).unwrap();
        assert!(value.get("items").is_some());
    }

    #[test]
    fn depth_bound_rejects_pathological_nesting() {
        let mut raw = String::new();
        for _ in 0..40 {
            raw.push_str("{\"a\":");
        }
        raw.push('1');
        for _ in 0..40 {
            raw.push('}');
        }
        assert!(parse_lenient(&raw).is_none());
    }

    #[test]
    fn json_ld_product_is_matched() {
        let html = r#"<script type="application/ld+json">
{"@context":"https://schema.org","@type":"Product","name":"Walking tour",
 "offers":{"@type":"Offer","price":"25.00","priceCurrency":"USD"}}
</script>"#;
        let extraction = extract_embedded_items(html).unwrap();
        assert_eq!(extraction.item_count, 1);
        assert!(extraction.text.contains("Walking tour — 25.00"));
    }

    #[test]
    fn nameless_arrays_are_ignored() {
        let html = r#"<script id="__NEXT_DATA__" type="application/json">
{"props":{"routes":[{"path":"/a"},{"path":"/b"}]}}
</script>"#;
        assert!(extract_embedded_items(html).is_none());
    }

    #[test]
    fn low_confidence_items_are_kept_and_counted() {
        let html = r#"<script id="__NEXT_DATA__" type="application/json">
{"services":[
  {"name":"Beard trim","price":15},
  {"name":"Consultation"},
  {"name":"Hot towel shave","price":30}
]}
</script>"#;
        let extraction = extract_embedded_items(html).unwrap();
        assert_eq!(extraction.item_count, 2);
        assert_eq!(extraction.low_confidence, 1);
        assert!(extraction.text.contains("Consultation"));
    }

    #[test]
    fn oversized_payload_is_skipped() {
        let raw = format!("{{\"a\":\"{}\"}}", "x".repeat(MAX_PAYLOAD_BYTES + 1));
        assert!(parse_lenient(&raw).is_none());
    }
}
