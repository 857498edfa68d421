//! Classification of page-extraction outcomes.
//!
//! Every tier reports into one closed taxonomy so callers can distinguish
//! "the site is blocking us" from "there was nothing there" — the two need
//! different operator responses.

use std::sync::LazyLock;

use regex::Regex;

/// Outcome of running the extraction tiers over one fetched page.
#[derive(Debug, Clone, PartialEq)]
pub enum PageExtraction {
    /// Static HTML tier produced meaningful text.
    StaticOk { text: String },
    /// Embedded app-state/structured-data tier produced text.
    EmbeddedJsonOk { text: String },
    /// Rendering collaborator produced text.
    HeadlessOk { text: String },
    /// The page is a JavaScript app shell; a rendering tier is needed.
    JsShellDetected,
    /// Upstream refused the request outright.
    Blocked403,
    /// Upstream is rate limiting.
    RateLimited429,
    /// A CAPTCHA or bot-challenge interstitial was served.
    CaptchaChallenge,
    /// The page rendered but contained nothing meaningful.
    NoItemsFound,
    /// The body could not be parsed at all.
    ParseError { message: String },
}

impl PageExtraction {
    /// Stable label used in logs and persisted errors.
    pub fn label(&self) -> &'static str {
        match self {
            PageExtraction::StaticOk { .. } => "static_ok",
            PageExtraction::EmbeddedJsonOk { .. } => "embedded_json_ok",
            PageExtraction::HeadlessOk { .. } => "headless_json_ok",
            PageExtraction::JsShellDetected => "js_shell_detected",
            PageExtraction::Blocked403 => "blocked_403",
            PageExtraction::RateLimited429 => "rate_limited_429",
            PageExtraction::CaptchaChallenge => "captcha_challenge",
            PageExtraction::NoItemsFound => "no_items_found",
            PageExtraction::ParseError { .. } => "parse_error",
        }
    }

    /// Extracted text, if this outcome carries any.
    pub fn text(&self) -> Option<&str> {
        match self {
            PageExtraction::StaticOk { text }
            | PageExtraction::EmbeddedJsonOk { text }
            | PageExtraction::HeadlessOk { text } => Some(text),
            _ => None,
        }
    }
}

static CHALLENGE_MARKERS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)captcha",
        r"(?i)cf-challenge|challenge-platform|cf_chl_",
        r"(?i)verify (?:that )?you are (?:a )?human",
        r"(?i)are you a robot",
        r"(?i)unusual traffic from your",
        r"(?i)checking your browser before accessing",
        r"(?i)ddos protection by",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("static challenge pattern"))
    .collect()
});

static BLOCK_MARKERS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [r"(?i)access denied", r"(?i)request blocked"]
        .iter()
        .map(|pattern| Regex::new(pattern).expect("static block pattern"))
        .collect()
});

/// Short-circuit classification for blocking/rate-limit/challenge responses.
///
/// Runs before any extraction tier; when this returns `Some`, no further
/// tier is attempted.
pub fn classify_blocking(status: u16, body: &str) -> Option<PageExtraction> {
    // Challenge markers win over the bare status: a 403 carrying a CAPTCHA
    // page is actionable as a challenge, not as a plain block.
    let mut cut = body.len().min(16 * 1024);
    while !body.is_char_boundary(cut) {
        cut -= 1;
    }
    let probe = &body[..cut];
    if CHALLENGE_MARKERS.iter().any(|re| re.is_match(probe)) {
        return Some(PageExtraction::CaptchaChallenge);
    }
    match status {
        403 => Some(PageExtraction::Blocked403),
        429 => Some(PageExtraction::RateLimited429),
        _ if BLOCK_MARKERS.iter().any(|re| re.is_match(probe)) => {
            Some(PageExtraction::Blocked403)
        }
        _ => None,
    }
}
