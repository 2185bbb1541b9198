use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;
use tracing::debug;

/// URL content extraction failure.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Fetch failed: {message}")]
    Fetch { message: String },

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },
}

/// Resolves a URL to its readable body text.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContentExtractor: Send + Sync {
    /// Fetch the URL and return its text content.
    async fn extract(&self, url: &str) -> Result<String, ExtractError>;
}

/// Fetches pages over HTTP and strips markup.
#[derive(Clone)]
pub struct HttpContentExtractor {
    client: Client,
}

impl HttpContentExtractor {
    /// Create an extractor with the given per-request timeout.
    pub fn new(timeout_ms: u64) -> Result<Self, ExtractError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| ExtractError::Fetch {
                message: e.to_string(),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ContentExtractor for HttpContentExtractor {
    async fn extract(&self, url: &str) -> Result<String, ExtractError> {
        debug!(url = %url, "Fetching page content");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ExtractError::Fetch {
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExtractError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = response.text().await.map_err(|e| ExtractError::Fetch {
            message: e.to_string(),
        })?;

        Ok(strip_html(&body))
    }
}

/// Drop tags plus `<script>`/`<style>` bodies and decode common entities.
pub fn strip_html(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut rest = html;

    while let Some(open) = rest.find('<') {
        out.push_str(&rest[..open]);
        let after = &rest[open..];
        let Some(close) = after.find('>') else {
            rest = "";
            break;
        };
        let tag = after[1..close].trim().to_ascii_lowercase();
        rest = &after[close + 1..];

        for skipped in ["script", "style"] {
            if tag == skipped || tag.starts_with(&format!("{} ", skipped)) {
                let end_tag = format!("</{}", skipped);
                rest = match rest.to_ascii_lowercase().find(&end_tag) {
                    Some(end) => {
                        let tail = &rest[end..];
                        tail.find('>').map(|i| &tail[i + 1..]).unwrap_or("")
                    }
                    None => "",
                };
            }
        }
        out.push(' ');
    }
    out.push_str(rest);

    out.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}
