//! Detector adapter contract.
//!
//! Every external analyzer (evidence retrieval, fallacy classifier,
//! AI-content classifier, verifier, translator) sits behind [`Detector`].
//! The pipeline only sees `run(input, context) -> DetectorResult`.

mod http;
mod types;

pub use http::*;
pub use types::*;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::canonical::CanonicalInput;
use crate::error::{AppError, DetectorOutcome};

/// Pipeline stage a detector serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    Translation,
    Evidence,
    Fallacy,
    AiDetection,
    Verification,
}

impl DetectorKind {
    /// All kinds in pipeline order.
    pub const ALL: [DetectorKind; 5] = [
        DetectorKind::Translation,
        DetectorKind::Evidence,
        DetectorKind::Fallacy,
        DetectorKind::AiDetection,
        DetectorKind::Verification,
    ];

    /// Stable stage name.
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectorKind::Translation => "translation",
            DetectorKind::Evidence => "evidence",
            DetectorKind::Fallacy => "fallacy",
            DetectorKind::AiDetection => "ai_detection",
            DetectorKind::Verification => "verification",
        }
    }

    /// Essential stages abort the analysis when they fail.
    pub fn is_essential(&self) -> bool {
        matches!(self, DetectorKind::Evidence | DetectorKind::Verification)
    }
}

impl std::fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DetectorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DetectorKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("Unknown detector kind: {}", s))
    }
}

/// Results of earlier stages made available to later ones.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectorContext {
    /// Language detectors operate in.
    pub processing_language: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence: Vec<EvidenceItem>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fallacies: Vec<FallacyItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_detection: Option<AiDetectionResult>,
}

impl DetectorContext {
    pub fn new(processing_language: impl Into<String>) -> Self {
        Self {
            processing_language: processing_language.into(),
            ..Default::default()
        }
    }
}

/// A single external analyzer.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Detector: Send + Sync {
    /// Stage this detector serves.
    fn kind(&self) -> DetectorKind;

    /// Analyze the input. Must not mutate shared state.
    async fn run(
        &self,
        input: &CanonicalInput,
        context: &DetectorContext,
    ) -> DetectorOutcome<DetectorResult>;
}

/// Detectors keyed by the stage they serve.
#[derive(Clone, Default)]
pub struct DetectorRegistry {
    detectors: HashMap<DetectorKind, Arc<dyn Detector>>,
}

impl DetectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a detector under its own kind, replacing any previous one.
    pub fn register(mut self, detector: Arc<dyn Detector>) -> Self {
        self.detectors.insert(detector.kind(), detector);
        self
    }

    /// Detector for a stage, if registered.
    pub fn get(&self, kind: DetectorKind) -> Option<&Arc<dyn Detector>> {
        self.detectors.get(&kind)
    }

    /// Whether a stage has a detector.
    pub fn has(&self, kind: DetectorKind) -> bool {
        self.detectors.contains_key(&kind)
    }

    /// Registered stages in pipeline order.
    pub fn kinds(&self) -> Vec<DetectorKind> {
        DetectorKind::ALL
            .into_iter()
            .filter(|k| self.has(*k))
            .collect()
    }

    /// Fail unless every essential stage is covered.
    pub fn ensure_essential(&self) -> Result<(), AppError> {
        let missing: Vec<&str> = DetectorKind::ALL
            .iter()
            .filter(|k| k.is_essential() && !self.has(**k))
            .map(|k| k.as_str())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(AppError::Config {
                message: format!("Missing essential detectors: {}", missing.join(", ")),
            })
        }
    }
}
