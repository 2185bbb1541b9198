use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use super::{Detector, DetectorContext, DetectorKind, DetectorResult};
use crate::canonical::CanonicalInput;
use crate::config::{DetectorConfig, RequestConfig};
use crate::error::{DetectorError, DetectorOutcome};

/// Body POSTed to a remote detector.
#[derive(Debug, Serialize)]
struct DetectorRequest<'a> {
    input: &'a CanonicalInput,
    context: &'a DetectorContext,
}

/// Detector reached over HTTP at `{base_url}/{kind}`.
///
/// Performs a single attempt per call. Retries belong to the pipeline so
/// that every detector, remote or not, gets the same backoff policy.
#[derive(Clone)]
pub struct HttpDetector {
    client: Client,
    kind: DetectorKind,
    endpoint: String,
    api_key: Option<String>,
    timeout_ms: u64,
}

impl HttpDetector {
    /// Create a detector client for one stage.
    pub fn new(
        kind: DetectorKind,
        config: &DetectorConfig,
        request_config: &RequestConfig,
    ) -> DetectorOutcome<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(request_config.timeout_ms))
            .build()?;

        Ok(Self {
            client,
            kind,
            endpoint: format!("{}/{}", config.base_url.trim_end_matches('/'), kind.as_str()),
            api_key: config.api_key.clone(),
            timeout_ms: request_config.timeout_ms,
        })
    }

    /// Full URL this detector posts to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Detector for HttpDetector {
    fn kind(&self) -> DetectorKind {
        self.kind
    }

    async fn run(
        &self,
        input: &CanonicalInput,
        context: &DetectorContext,
    ) -> DetectorOutcome<DetectorResult> {
        debug!(
            stage = %self.kind,
            endpoint = %self.endpoint,
            fingerprint = %input.fingerprint(),
            "Calling remote detector"
        );
        let start = Instant::now();

        let mut request = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(&DetectorRequest { input, context });
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                DetectorError::Timeout {
                    timeout_ms: self.timeout_ms,
                }
            } else {
                DetectorError::from(e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(DetectorError::Api {
                status: status.as_u16(),
                message: error_body,
            });
        }

        let result: DetectorResult =
            response
                .json()
                .await
                .map_err(|e| DetectorError::InvalidResponse {
                    message: format!("Failed to parse detector response: {}", e),
                })?;
        result.validate(self.kind)?;

        debug!(
            stage = %self.kind,
            latency_ms = start.elapsed().as_millis(),
            confidence = result.confidence,
            "Remote detector responded"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_uses_kind_path() {
        let config = DetectorConfig {
            base_url: "http://detectors.local/".to_string(),
            ..Default::default()
        };
        let detector =
            HttpDetector::new(DetectorKind::AiDetection, &config, &RequestConfig::default())
                .unwrap();
        assert_eq!(detector.endpoint(), "http://detectors.local/ai_detection");
        assert_eq!(detector.kind(), DetectorKind::AiDetection);
    }
}
