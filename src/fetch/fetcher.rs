//! Bounded, policy-checked HTTP fetching.
//!
//! Redirects are followed manually so each hop goes back through the
//! [`UrlGuard`](crate::fetch::UrlGuard); the underlying client has redirects
//! disabled entirely. Response size is enforced twice: a `Content-Length`
//! pre-check and a running counter while streaming the body, since the
//! header is attacker-controlled.

use futures_util::StreamExt;
use reqwest::header::{CONTENT_TYPE, LOCATION};
use tracing::debug;
use url::Url;

use crate::config::FetchLimits;
use crate::fetch::guard::UrlGuard;
use crate::types::FetchError;

/// A fully fetched response after redirect resolution.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// URL the body was actually served from (post-redirect).
    pub final_url: Url,
    /// HTTP status of the final response. 4xx/5xx bodies are returned so the
    /// extractor can classify blocking pages.
    pub status: u16,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl FetchedPage {
    /// Body decoded as UTF-8, lossily. Extraction tiers operate on text.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// Fetches URLs within the network policy and resource limits.
pub struct GuardedFetcher {
    client: reqwest::Client,
    guard: UrlGuard,
    limits: FetchLimits,
}

impl GuardedFetcher {
    pub fn new(guard: UrlGuard, limits: FetchLimits) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|err| FetchError::FetchFailed(err.to_string()))?;
        Ok(Self {
            client,
            guard,
            limits,
        })
    }

    /// Fetch `url`, following up to the configured number of redirects, under
    /// one wall-clock deadline independent of body size.
    pub async fn fetch(&self, url: &Url) -> Result<FetchedPage, FetchError> {
        let seconds = self.limits.timeout.as_secs();
        tokio::time::timeout(self.limits.timeout, self.fetch_with_redirects(url))
            .await
            .map_err(|_| FetchError::Timeout { seconds })?
    }

    async fn fetch_with_redirects(&self, url: &Url) -> Result<FetchedPage, FetchError> {
        let mut current = url.clone();

        for hop in 0..=self.limits.max_redirects {
            self.guard.validate(&current).await?;

            let response = self
                .client
                .get(current.clone())
                .send()
                .await
                .map_err(|err| FetchError::FetchFailed(err.to_string()))?;

            if response.status().is_redirection() {
                if hop == self.limits.max_redirects {
                    return Err(FetchError::FetchFailed(format!(
                        "redirect limit of {} exceeded",
                        self.limits.max_redirects
                    )));
                }
                let location = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|value| value.to_str().ok())
                    .ok_or_else(|| {
                        FetchError::FetchFailed("redirect without a usable location".into())
                    })?;
                let next = current
                    .join(location)
                    .map_err(|err| FetchError::FetchFailed(format!("bad redirect target: {err}")))?;
                debug!(from = %current, to = %next, hop, "following redirect");
                current = next;
                continue;
            }

            return self.read_body(current, response).await;
        }

        Err(FetchError::FetchFailed(format!(
            "redirect limit of {} exceeded",
            self.limits.max_redirects
        )))
    }

    async fn read_body(
        &self,
        final_url: Url,
        response: reqwest::Response,
    ) -> Result<FetchedPage, FetchError> {
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());

        let limit = if is_textual(content_type.as_deref()) {
            self.limits.max_html_bytes
        } else {
            self.limits.max_asset_bytes
        };

        // Pre-check the declared length, then count while streaming; the
        // header alone cannot be trusted.
        if let Some(declared) = response.content_length() {
            if declared > limit {
                return Err(FetchError::TooLarge { limit });
            }
        }

        let mut bytes: Vec<u8> = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(piece) = stream.next().await {
            let piece = piece.map_err(|err| FetchError::FetchFailed(err.to_string()))?;
            if bytes.len() as u64 + piece.len() as u64 > limit {
                return Err(FetchError::TooLarge { limit });
            }
            bytes.extend_from_slice(&piece);
        }

        debug!(url = %final_url, status, bytes = bytes.len(), "fetched");

        Ok(FetchedPage {
            final_url,
            status,
            content_type,
            bytes,
        })
    }
}

fn is_textual(content_type: Option<&str>) -> bool {
    let Some(value) = content_type else {
        // No header: assume the smaller text cap; pages are the common case.
        return true;
    };
    let value = value.to_ascii_lowercase();
    value.starts_with("text/")
        || value.contains("html")
        || value.contains("json")
        || value.contains("xml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn textual_detection_covers_common_types() {
        assert!(is_textual(Some("text/html; charset=utf-8")));
        assert!(is_textual(Some("application/json")));
        assert!(is_textual(Some("application/ld+json")));
        assert!(is_textual(None));
        assert!(!is_textual(Some("application/pdf")));
        assert!(!is_textual(Some("image/png")));
    }
}
