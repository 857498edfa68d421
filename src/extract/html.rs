//! Static HTML tier: selector-driven text extraction.
//!
//! The cheapest tier. Strips script/style/navigation boilerplate, then pulls
//! text from the first content-area selector that yields enough of it,
//! falling back to the whole body.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

static BOILERPLATE_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("script, style, noscript, svg, nav, footer, header, form, iframe")
        .expect("static boilerplate selector")
});

/// Content-area selectors tried in priority order before the body fallback.
static CONTENT_SELECTORS: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    [
        "main",
        "article",
        "[role=\"main\"]",
        "#content",
        "#main",
        ".main-content",
        ".content",
    ]
    .iter()
    .map(|sel| Selector::parse(sel).expect("static content selector"))
    .collect()
});

static BODY_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("body").expect("static body selector"));

static TITLE_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("title").expect("static title selector"));

static ANCHOR_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("static anchor selector"));

static SHELL_MARKERS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)enable javascript|javascript is required|loading\.\.\.|please wait")
        .expect("static shell marker pattern")
});

/// Extract main-content text from static HTML.
///
/// Returns `None` when the page yields less than `min_chars` of text, which
/// signals the caller to try the next tier.
pub fn extract_static_text(html: &str, min_chars: usize) -> Option<String> {
    let document = strip_boilerplate(html);

    for selector in CONTENT_SELECTORS.iter() {
        if let Some(element) = document.select(selector).next() {
            let text = element_text(&element);
            if text.chars().count() >= min_chars {
                return Some(text);
            }
        }
    }

    let body = document.select(&BODY_SELECTOR).next()?;
    let text = element_text(&body);
    (text.chars().count() >= min_chars).then_some(text)
}

/// The page `<title>`, used as a citation-friendly source name.
pub fn page_title(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let title = document.select(&TITLE_SELECTOR).next()?;
    let text = element_text(&title);
    (!text.is_empty()).then_some(text)
}

/// Visible body text length plus script-tag count, the inputs to app-shell
/// detection.
pub fn body_profile(html: &str) -> (usize, usize) {
    let script_count = Html::parse_document(html)
        .select(&Selector::parse("script").expect("static script selector"))
        .count();
    let document = strip_boilerplate(html);
    let text_len = document
        .select(&BODY_SELECTOR)
        .next()
        .map(|body| element_text(&body).chars().count())
        .unwrap_or(0);
    (text_len, script_count)
}

/// Heuristic: is this page an empty JavaScript application shell?
///
/// Thin body text combined with loading markers, an empty root container, or
/// script-tag dominance means a rendering tier is needed rather than
/// concluding the page has no content.
pub fn looks_like_app_shell(html: &str, min_chars: usize) -> bool {
    let (text_len, script_count) = body_profile(html);
    if text_len >= min_chars {
        return false;
    }
    if SHELL_MARKERS.is_match(html) {
        return true;
    }
    if html.contains("id=\"root\"") || html.contains("id=\"app\"") || html.contains("id=\"__next\"")
    {
        return true;
    }
    script_count >= 4 && text_len < min_chars / 2
}

/// Same-origin anchors with their visible text, for candidate-link scoring.
pub fn same_origin_links(html: &str, base: &url::Url) -> Vec<(url::Url, String)> {
    let document = Html::parse_document(html);
    let mut links = Vec::new();
    for anchor in document.select(&ANCHOR_SELECTOR) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let Ok(resolved) = base.join(href) else {
            continue;
        };
        if resolved.host_str() != base.host_str() || resolved.scheme() != base.scheme() {
            continue;
        }
        // Same-page fragments are never new content.
        if resolved.path() == base.path() && resolved.fragment().is_some() {
            continue;
        }
        links.push((resolved, element_text(&anchor)));
    }
    links
}

fn strip_boilerplate(html: &str) -> Html {
    let mut document = Html::parse_document(html);
    let ids: Vec<_> = document
        .select(&BOILERPLATE_SELECTOR)
        .map(|element| element.id())
        .collect();
    for id in ids {
        if let Some(mut node) = document.tree.get_mut(id) {
            node.detach();
        }
    }
    document
}

fn element_text(element: &ElementRef<'_>) -> String {
    let mut out = String::new();
    for piece in element.text() {
        let trimmed = piece.trim();
        if trimmed.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(trimmed);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>Corner Bakery — Menu</title><style>body { color: red; }</style></head>
<body>
  <nav><a href="/">Home</a><a href="/about">About</a></nav>
  <main>
    <h1>Menu</h1>
    <p>Sourdough loaf baked daily, made with our century-old starter. 6.50</p>
    <p>Seasonal fruit galette with almond cream, serves two people. 14.00</p>
  </main>
  <footer>Copyright 2025 Corner Bakery</footer>
  <script>console.log("analytics");</script>
</body>
</html>"#;

    #[test]
    fn extracts_main_content_without_boilerplate() {
        let text = extract_static_text(PAGE, 40).unwrap();
        assert!(text.contains("Sourdough loaf"));
        assert!(!text.contains("analytics"));
        assert!(!text.contains("Copyright"));
        assert!(!text.contains("color: red"));
    }

    #[test]
    fn thin_page_returns_none() {
        let html = "<html><body><main><p>hi</p></main></body></html>";
        assert!(extract_static_text(html, 40).is_none());
    }

    #[test]
    fn falls_back_to_body_when_no_content_area_matches() {
        let html = format!(
            "<html><body><div><p>{}</p></div></body></html>",
            "plain text without a content landmark, repeated for length. ".repeat(3)
        );
        let text = extract_static_text(&html, 40).unwrap();
        assert!(text.contains("content landmark"));
    }

    #[test]
    fn title_is_extracted() {
        assert_eq!(page_title(PAGE).unwrap(), "Corner Bakery — Menu");
    }

    #[test]
    fn app_shell_is_detected() {
        let shell = r#"<html><body><div id="root"></div>
            <script src="/a.js"></script><script src="/b.js"></script></body></html>"#;
        assert!(looks_like_app_shell(shell, 200));
        assert!(!looks_like_app_shell(PAGE, 40));
    }

    #[test]
    fn same_origin_links_resolve_and_filter() {
        let base = url::Url::parse("https://bakery.example/menu").unwrap();
        let html = r##"<html><body>
            <a href="/prices">Our Prices</a>
            <a href="https://other.example/menu">Elsewhere</a>
            <a href="#section">Jump</a>
        </body></html>"##;
        let links = same_origin_links(html, &base);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].0.as_str(), "https://bakery.example/prices");
        assert_eq!(links[0].1, "Our Prices");
    }
}
