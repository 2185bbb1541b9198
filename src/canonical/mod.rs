//! Input canonicalization and fingerprinting.
//!
//! This module turns a raw [`AnalyzeRequest`] into an immutable
//! [`CanonicalInput`]:
//! - Control characters stripped, whitespace collapsed, length bounded
//! - URL inputs resolved to body text through a [`ContentExtractor`]
//! - Language taken from the request or a [`LanguageDetector`]
//! - A stable SHA-256 [`Fingerprint`] used as the cache key

mod extract;
mod language;

pub use extract::*;
pub use language::*;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::config::PipelineConfig;
use crate::error::{AnalysisError, AnalysisResult};

// ============================================================================
// Fingerprint
// ============================================================================

/// Stable hash of canonicalized input, used as the cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Wrap raw digest bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parse a 64-character hex string.
    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        let array: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(array))
    }

    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex encoding.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Fingerprint::from_hex(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid fingerprint: {}", s)))
    }
}

// ============================================================================
// Request / Canonical Input
// ============================================================================

/// Options that change the analysis output and therefore the fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisOptions {
    /// Build the argument graph section of the report.
    #[serde(default = "default_true")]
    pub include_graph: bool,
}

fn default_true() -> bool {
    true
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            include_graph: true,
        }
    }
}

/// Inbound analysis request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalyzeRequest {
    /// Claim text to analyze.
    #[serde(default)]
    pub text: Option<String>,
    /// URL whose body text should be analyzed.
    #[serde(default)]
    pub url: Option<String>,
    /// Language override (ISO 639-1).
    #[serde(default)]
    pub language: Option<String>,
    /// Free-form caller metadata. Not part of the fingerprint.
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// Output-affecting options.
    #[serde(default)]
    pub options: AnalysisOptions,
    /// Reviewing session the analysis belongs to. Not part of the fingerprint.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Requesting user. Not part of the fingerprint.
    #[serde(default)]
    pub user_id: Option<String>,
}

impl AnalyzeRequest {
    /// Request for plain text.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    /// Request for a URL.
    pub fn url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Default::default()
        }
    }

    /// Attribute the analysis to a session and, optionally, a user.
    pub fn with_session(mut self, session_id: impl Into<String>, user_id: Option<&str>) -> Self {
        self.session_id = Some(session_id.into());
        self.user_id = user_id.map(str::to_string);
        self
    }

    /// Set the language override.
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Attach a metadata value.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Replace the analysis options.
    pub fn with_options(mut self, options: AnalysisOptions) -> Self {
        self.options = options;
        self
    }
}

/// Canonical, immutable analysis input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalInput {
    fingerprint: Fingerprint,
    normalized_text: String,
    source_url: Option<String>,
    detected_language: String,
    metadata: BTreeMap<String, serde_json::Value>,
    options: AnalysisOptions,
    truncated: bool,
}

impl CanonicalInput {
    /// Build from already-normalized parts, computing the fingerprint.
    pub fn from_parts(
        normalized_text: impl Into<String>,
        source_url: Option<String>,
        detected_language: impl Into<String>,
        metadata: BTreeMap<String, serde_json::Value>,
        options: AnalysisOptions,
    ) -> Self {
        let normalized_text = normalized_text.into();
        let detected_language = detected_language.into().to_lowercase();
        let source_url = source_url.map(|u| normalize_url(&u)).filter(|u| !u.is_empty());
        let fingerprint = compute_fingerprint(
            &normalized_text,
            source_url.as_deref(),
            &detected_language,
            &options,
        );
        Self {
            fingerprint,
            normalized_text,
            source_url,
            detected_language,
            metadata,
            options,
            truncated: false,
        }
    }

    /// Cache key for this input.
    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    /// Normalized claim text.
    pub fn text(&self) -> &str {
        &self.normalized_text
    }

    /// Normalized source URL, if the claim came from one.
    pub fn source_url(&self) -> Option<&str> {
        self.source_url.as_deref()
    }

    /// Detected (or requested) language code.
    pub fn language(&self) -> &str {
        &self.detected_language
    }

    /// Caller metadata.
    pub fn metadata(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.metadata
    }

    /// Output-affecting options.
    pub fn options(&self) -> &AnalysisOptions {
        &self.options
    }

    /// Whether the text was cut to the configured maximum length.
    pub fn was_truncated(&self) -> bool {
        self.truncated
    }

    /// Same input carrying translated text. The fingerprint stays that of the
    /// original so every stage is keyed by what the caller submitted.
    pub(crate) fn with_translated_text(&self, text: String, language: &str) -> Self {
        Self {
            normalized_text: text,
            detected_language: language.to_string(),
            ..self.clone()
        }
    }
}

// ============================================================================
// Normalization
// ============================================================================

/// Strip control characters, collapse whitespace, and bound the length.
///
/// Returns the normalized text and whether it was truncated. Truncation
/// counts characters, so multi-byte sequences are never split.
pub fn normalize_text(raw: &str, max_chars: usize) -> (String, bool) {
    let cleaned: String = raw
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.chars().count() <= max_chars {
        return (collapsed, false);
    }

    let truncated: String = collapsed.chars().take(max_chars).collect();
    (truncated.trim_end().to_string(), true)
}

/// Trim a URL, lowercase its scheme and host, and drop a trailing slash.
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    match trimmed.split_once("://") {
        Some((scheme, rest)) => {
            let (host, path) = match rest.find('/') {
                Some(idx) => rest.split_at(idx),
                None => (rest, ""),
            };
            format!("{}://{}{}", scheme.to_lowercase(), host.to_lowercase(), path)
        }
        None => trimmed.to_string(),
    }
}

fn write_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

/// Fingerprint over `(lowercased text, url, language, options)`.
///
/// Fields are length-prefixed so no two distinct tuples share an encoding.
pub fn compute_fingerprint(
    normalized_text: &str,
    source_url: Option<&str>,
    language: &str,
    options: &AnalysisOptions,
) -> Fingerprint {
    let mut hasher = Sha256::new();
    write_field(&mut hasher, normalized_text.to_lowercase().as_bytes());
    match source_url {
        Some(url) => {
            hasher.update([1u8]);
            write_field(&mut hasher, url.as_bytes());
        }
        None => hasher.update([0u8]),
    }
    write_field(&mut hasher, language.to_lowercase().as_bytes());
    hasher.update([options.include_graph as u8]);
    Fingerprint(hasher.finalize().into())
}

// ============================================================================
// Canonicalizer
// ============================================================================

/// Builds [`CanonicalInput`] records from requests.
#[derive(Clone)]
pub struct Canonicalizer {
    extractor: Option<Arc<dyn ContentExtractor>>,
    language_detector: Arc<dyn LanguageDetector>,
    max_input_chars: usize,
    default_language: String,
}

impl Canonicalizer {
    /// Create a canonicalizer using the pipeline limits from configuration.
    pub fn new(config: &PipelineConfig, language_detector: Arc<dyn LanguageDetector>) -> Self {
        Self {
            extractor: None,
            language_detector,
            max_input_chars: config.max_input_chars,
            default_language: config.default_language.clone(),
        }
    }

    /// Attach the URL → text collaborator.
    pub fn with_extractor(mut self, extractor: Arc<dyn ContentExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// Normalize a request into a canonical input.
    pub async fn canonicalize(&self, request: &AnalyzeRequest) -> AnalysisResult<CanonicalInput> {
        let url = request
            .url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty());

        let (mut text, mut truncated) = request
            .text
            .as_deref()
            .map(|t| normalize_text(t, self.max_input_chars))
            .unwrap_or_default();

        if text.is_empty() {
            if let Some(url) = url {
                let extracted = self.extract(url).await?;
                (text, truncated) = normalize_text(&extracted, self.max_input_chars);
            }
        }

        if text.is_empty() {
            return Err(AnalysisError::InvalidInput {
                message: match url {
                    Some(url) => format!("No text could be extracted from {}", url),
                    None => "Either 'text' or 'url' must be provided".to_string(),
                },
            });
        }

        let language = request
            .language
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_lowercase)
            .or_else(|| self.language_detector.detect(&text))
            .unwrap_or_else(|| self.default_language.clone());

        let mut input = CanonicalInput::from_parts(
            text,
            url.map(str::to_string),
            language,
            request.metadata.clone(),
            request.options.clone(),
        );
        input.truncated = truncated;

        debug!(
            fingerprint = %input.fingerprint(),
            language = %input.language(),
            chars = input.text().chars().count(),
            truncated = truncated,
            "Input canonicalized"
        );

        Ok(input)
    }

    async fn extract(&self, url: &str) -> AnalysisResult<String> {
        let Some(extractor) = &self.extractor else {
            return Err(AnalysisError::InvalidInput {
                message: "URL input is not supported without a content extractor".to_string(),
            });
        };

        extractor.extract(url).await.map_err(|e| {
            warn!(url = %url, error = %e, "Content extraction failed");
            AnalysisError::InvalidInput {
                message: format!("Could not resolve URL {}: {}", url, e),
            }
        })
    }
}
