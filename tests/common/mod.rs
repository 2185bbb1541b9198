//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use failsafe_pipeline::canonical::{CanonicalInput, Canonicalizer, StopwordLanguageDetector};
use failsafe_pipeline::config::{Config, RequestConfig};
use failsafe_pipeline::detectors::{
    AiDetectionResult, Detector, DetectorContext, DetectorKind, DetectorRegistry, DetectorResult,
    EvidenceItem, FallacyItem, Stance, VerificationResult,
};
use failsafe_pipeline::error::{DetectorError, DetectorOutcome};
use failsafe_pipeline::server::FactCheckService;

type Respond = dyn Fn(&CanonicalInput) -> DetectorOutcome<DetectorResult> + Send + Sync;

/// Detector driven by a closure, counting its calls.
pub struct ScriptedDetector {
    kind: DetectorKind,
    calls: AtomicUsize,
    delay: Duration,
    respond: Box<Respond>,
}

impl ScriptedDetector {
    pub fn new<F>(kind: DetectorKind, respond: F) -> Self
    where
        F: Fn(&CanonicalInput) -> DetectorOutcome<DetectorResult> + Send + Sync + 'static,
    {
        Self {
            kind,
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
            respond: Box::new(respond),
        }
    }

    pub fn returning(kind: DetectorKind, result: DetectorResult) -> Self {
        Self::new(kind, move |_| Ok(result.clone()))
    }

    pub fn failing(kind: DetectorKind, status: u16) -> Self {
        Self::new(kind, move |_| {
            Err(DetectorError::Api {
                status,
                message: "detector exploded".to_string(),
            })
        })
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Detector for ScriptedDetector {
    fn kind(&self) -> DetectorKind {
        self.kind
    }

    async fn run(
        &self,
        input: &CanonicalInput,
        _context: &DetectorContext,
    ) -> DetectorOutcome<DetectorResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        (self.respond)(input)
    }
}

pub fn flat_earth_evidence() -> DetectorResult {
    DetectorResult::evidence(
        vec![
            EvidenceItem::new("nasa.gov", 0.97, Stance::Contradicts)
                .with_title("Earth from space")
                .with_snippet("Satellite imagery shows a spherical Earth"),
            EvidenceItem::new("esa.int", 0.94, Stance::Contradicts),
            EvidenceItem::new("noaa.gov", 0.9, Stance::Contradicts),
        ],
        0.95,
    )
    .with_method("web_search")
}

pub fn strong_verification() -> DetectorResult {
    DetectorResult::verification(VerificationResult {
        confidence: 0.95,
        method: "nli".to_string(),
        notes: Some("Contradicted by satellite imagery".to_string()),
    })
}

pub fn strawman() -> DetectorResult {
    DetectorResult::fallacies(
        vec![FallacyItem::new("appeal_to_ignorance", 0.7)],
        0.7,
    )
}

pub fn human_written() -> DetectorResult {
    DetectorResult::ai_detection(AiDetectionResult {
        is_ai_generated: false,
        confidence: 0.82,
        method: "ensemble".to_string(),
        scores: Default::default(),
    })
}

/// Handles to every stage of a fully stocked registry.
pub struct Detectors {
    pub evidence: Arc<ScriptedDetector>,
    pub fallacy: Arc<ScriptedDetector>,
    pub ai: Arc<ScriptedDetector>,
    pub verification: Arc<ScriptedDetector>,
}

impl Detectors {
    pub fn flat_earth() -> Self {
        Self {
            evidence: Arc::new(ScriptedDetector::returning(
                DetectorKind::Evidence,
                flat_earth_evidence(),
            )),
            fallacy: Arc::new(ScriptedDetector::returning(DetectorKind::Fallacy, strawman())),
            ai: Arc::new(ScriptedDetector::returning(
                DetectorKind::AiDetection,
                human_written(),
            )),
            verification: Arc::new(ScriptedDetector::returning(
                DetectorKind::Verification,
                strong_verification(),
            )),
        }
    }

    pub fn registry(&self) -> DetectorRegistry {
        DetectorRegistry::new()
            .register(self.evidence.clone())
            .register(self.fallacy.clone())
            .register(self.ai.clone())
            .register(self.verification.clone())
    }
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.request = RequestConfig {
        timeout_ms: 2_000,
        max_retries: 1,
        retry_delay_ms: 1,
    };
    config
}

pub fn service(detectors: &Detectors) -> FactCheckService {
    service_with(test_config(), detectors.registry())
}

pub fn service_with(config: Config, registry: DetectorRegistry) -> FactCheckService {
    let canonicalizer =
        Canonicalizer::new(&config.pipeline, Arc::new(StopwordLanguageDetector::new()));
    FactCheckService::new(config, canonicalizer, registry).expect("service should build")
}
