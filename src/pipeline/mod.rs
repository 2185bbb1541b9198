//! Analysis orchestration.
//!
//! Drives the detector stages for one canonical input:
//! - translation (when the input language differs from the processing language)
//! - evidence, fallacy and AI-content detection, concurrently
//! - verification over everything gathered so far
//! - scoring, argument graph and the final report
//!
//! Every stage writes a provenance entry. Non-essential failures degrade the
//! report; essential failures abort the analysis.

mod report;
pub mod scoring;

pub use report::*;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::json;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cache::ResultCache;
use crate::canonical::CanonicalInput;
use crate::config::{PipelineConfig, RequestConfig};
use crate::detectors::{
    AiDetectionResult, Detector, DetectorContext, DetectorKind, DetectorPayload,
    DetectorRegistry, DetectorResult, EvidenceItem, FallacyItem, MultilingualInfo,
    VerificationResult,
};
use crate::error::{AnalysisError, AnalysisResult, AppResult, DetectorError, DetectorOutcome};
use crate::graph;
use crate::provenance::{EntryId, EntryKind, EntryStatus, NewEntry, ProvenanceLedger};

/// Cache of completed reports keyed by input fingerprint.
pub type ReportCache = ResultCache<Report>;

/// Outcome of a non-essential stage.
enum StageOutcome {
    Completed { result: DetectorResult, entry: EntryId },
    Degraded { entry: EntryId },
    Skipped,
}

impl StageOutcome {
    fn entry(&self) -> Option<&EntryId> {
        match self {
            StageOutcome::Completed { entry, .. } | StageOutcome::Degraded { entry } => Some(entry),
            StageOutcome::Skipped => None,
        }
    }

    fn result(&self) -> Option<&DetectorResult> {
        match self {
            StageOutcome::Completed { result, .. } => Some(result),
            _ => None,
        }
    }
}

/// Everything one detector round produced.
struct RoundOutcome {
    evidence: Vec<EvidenceItem>,
    evidence_confidence: f64,
    fallacies: Vec<FallacyItem>,
    ai_detection: Option<AiDetectionResult>,
    verification: VerificationResult,
    verification_entry: EntryId,
    degraded: Vec<DetectorKind>,
    breakdown: scoring::ScoreBreakdown,
}

fn entry_kind_for(kind: DetectorKind) -> EntryKind {
    match kind {
        DetectorKind::Translation => EntryKind::Processing,
        DetectorKind::Evidence => EntryKind::Evidence,
        DetectorKind::Fallacy | DetectorKind::AiDetection => EntryKind::Analysis,
        DetectorKind::Verification => EntryKind::Verification,
    }
}

fn is_retryable(err: &DetectorError) -> bool {
    match err {
        DetectorError::Api { status, .. } => *status == 429 || *status >= 500,
        DetectorError::Timeout { .. }
        | DetectorError::Transport { .. }
        | DetectorError::Unavailable { .. } => true,
        DetectorError::InvalidResponse { .. } | DetectorError::KindMismatch { .. } => false,
    }
}

/// Delay before retry number `retry` (1-based): the base delay doubled per
/// earlier retry, saturating at `u64::MAX` milliseconds.
fn backoff_delay(base_ms: u64, retry: u32) -> Duration {
    let factor = 2_u64.saturating_pow(retry.saturating_sub(1));
    Duration::from_millis(base_ms.saturating_mul(factor))
}

/// Orchestrates detectors for a single analysis.
#[derive(Clone)]
pub struct Pipeline {
    detectors: DetectorRegistry,
    ledger: Arc<ProvenanceLedger>,
    config: PipelineConfig,
    request: RequestConfig,
}

impl Pipeline {
    /// Create a pipeline. Fails if an essential detector is missing.
    pub fn new(
        detectors: DetectorRegistry,
        ledger: Arc<ProvenanceLedger>,
        config: &PipelineConfig,
        request: &RequestConfig,
    ) -> AppResult<Self> {
        detectors.ensure_essential()?;
        Ok(Self {
            detectors,
            ledger,
            config: config.clone(),
            request: request.clone(),
        })
    }

    /// Ledger this pipeline records into.
    pub fn ledger(&self) -> &Arc<ProvenanceLedger> {
        &self.ledger
    }

    /// Analyze one input within the configured overall timeout.
    pub async fn analyze(&self, input: &CanonicalInput) -> AnalysisResult<Report> {
        let analysis_id = Uuid::new_v4().to_string();
        self.analyze_with_id(&analysis_id, input).await
    }

    /// Analyze under a caller-chosen analysis id, so the caller can find the
    /// provenance of a failed run.
    pub async fn analyze_with_id(
        &self,
        analysis_id: &str,
        input: &CanonicalInput,
    ) -> AnalysisResult<Report> {
        let timeout_ms = self.config.analysis_timeout_ms;
        let run = self.run(analysis_id, input);
        match tokio::time::timeout(Duration::from_millis(timeout_ms), run).await {
            Ok(result) => result,
            Err(_) => {
                error!(
                    analysis_id = %analysis_id,
                    fingerprint = %input.fingerprint(),
                    timeout_ms = timeout_ms,
                    "Analysis timed out"
                );
                Err(AnalysisError::AnalysisTimeout { timeout_ms })
            }
        }
    }

    async fn run(&self, analysis_id: &str, input: &CanonicalInput) -> AnalysisResult<Report> {
        let start = Instant::now();

        let root = self
            .ledger
            .append(NewEntry::input(
                analysis_id,
                json!({
                    "fingerprint": input.fingerprint(),
                    "text": input.text(),
                    "source_url": input.source_url(),
                    "language": input.language(),
                    "truncated": input.was_truncated(),
                }),
            ))
            .await?;

        info!(
            analysis_id = %analysis_id,
            fingerprint = %input.fingerprint(),
            language = %input.language(),
            "Analysis started"
        );

        // Translation
        let (working, multilingual, translation) = self.translate(analysis_id, &root, input).await?;
        let upstream = translation.entry().cloned().unwrap_or_else(|| root.clone());
        let context = DetectorContext::new(&self.config.processing_language);

        // Detector rounds
        let max_rounds = self.config.max_rounds.max(1);
        let mut rounds = 1;
        let round = loop {
            let round = self
                .run_round(analysis_id, &upstream, &working, &context)
                .await?;
            let confidence = round.breakdown.confidence;
            if confidence >= self.config.confidence_threshold || rounds >= max_rounds {
                break round;
            }
            info!(
                analysis_id = %analysis_id,
                round = rounds,
                confidence = confidence,
                threshold = self.config.confidence_threshold,
                "Confidence below threshold, running another round"
            );
            rounds += 1;
        };

        let mut degraded = Vec::new();
        if matches!(translation, StageOutcome::Degraded { .. }) {
            degraded.push(DetectorKind::Translation);
        }
        degraded.extend(round.degraded);
        let breakdown = round.breakdown;

        // Argument graph
        let mut output_parents = vec![round.verification_entry.clone()];
        let sag = if input.options().include_graph {
            let mut results = vec![
                DetectorResult::evidence(round.evidence.clone(), round.evidence_confidence),
                DetectorResult::fallacies(round.fallacies.clone(), 1.0),
            ];
            results.extend(translation.result().cloned());
            let graph_start = Instant::now();
            let sag = graph::build(input, &results, breakdown.verdict);
            let graph_entry = self
                .ledger
                .append(
                    NewEntry::new(analysis_id, EntryKind::Analysis, "argument_graph")
                        .with_parent(&round.verification_entry)
                        .with_payload(json!({
                            "nodes": sag.nodes.len(),
                            "edges": sag.edges.len(),
                            "digest": sag.digest(),
                        }))
                        .with_processing_time(graph_start.elapsed().as_millis() as u64),
                )
                .await?;
            output_parents.push(graph_entry);
            Some(sag)
        } else {
            None
        };

        let processing_time_ms = start.elapsed().as_millis() as u64;
        let output = self
            .ledger
            .append(
                NewEntry::new(analysis_id, EntryKind::Output, "report")
                    .with_parents(output_parents)
                    .with_payload(json!({
                        "fingerprint": input.fingerprint(),
                        "verdict": breakdown.verdict,
                        "scores": breakdown,
                        "degraded_stages": degraded,
                        "rounds": rounds,
                    }))
                    .with_confidence(breakdown.confidence)
                    .with_processing_time(processing_time_ms),
            )
            .await?;

        info!(
            analysis_id = %analysis_id,
            verdict = %breakdown.verdict,
            confidence = breakdown.confidence,
            rounds = rounds,
            degraded = degraded.len(),
            latency_ms = processing_time_ms,
            "Analysis completed"
        );

        Ok(Report {
            claim_id: analysis_id.to_string(),
            fingerprint: input.fingerprint(),
            verdict: breakdown.verdict,
            confidence: breakdown.confidence,
            evidence: round.evidence,
            fallacies: round.fallacies,
            ai_detection: round.ai_detection,
            multilingual,
            sag,
            verification: round.verification,
            degraded_stages: degraded,
            provenance_root: root,
            provenance_output: output,
            created_at: Utc::now(),
            processing_time_ms,
        })
    }

    /// One pass of evidence, fallacy and AI detection followed by
    /// verification and scoring.
    async fn run_round(
        &self,
        analysis_id: &str,
        upstream: &EntryId,
        working: &CanonicalInput,
        context: &DetectorContext,
    ) -> AnalysisResult<RoundOutcome> {
        let (evidence, fallacy, ai) = tokio::try_join!(
            self.essential_stage(DetectorKind::Evidence, analysis_id, upstream, working, context),
            self.optional_stage(DetectorKind::Fallacy, analysis_id, upstream, working, context),
            self.optional_stage(DetectorKind::AiDetection, analysis_id, upstream, working, context),
        )?;

        let (evidence_result, evidence_entry) = evidence;
        let evidence_confidence = evidence_result.confidence;
        let mut evidence_items = match evidence_result.payload {
            DetectorPayload::Evidence { items } => items,
            _ => Vec::new(),
        };
        evidence_items.sort_by(|a, b| b.score.total_cmp(&a.score));

        let fallacies: Vec<FallacyItem> = match fallacy.result().map(|r| &r.payload) {
            Some(DetectorPayload::Fallacy { items }) => items.clone(),
            _ => Vec::new(),
        };
        let ai_detection: Option<AiDetectionResult> = match ai.result().map(|r| &r.payload) {
            Some(DetectorPayload::AiDetection(result)) => Some(result.clone()),
            _ => None,
        };
        let mut degraded = Vec::new();
        for (kind, outcome) in [(DetectorKind::Fallacy, &fallacy), (DetectorKind::AiDetection, &ai)] {
            if matches!(outcome, StageOutcome::Degraded { .. }) {
                degraded.push(kind);
            }
        }

        // Verification
        let verification_context = DetectorContext {
            evidence: evidence_items.clone(),
            fallacies: fallacies.clone(),
            ai_detection: ai_detection.clone(),
            ..context.clone()
        };
        let mut verification_parents = vec![evidence_entry];
        verification_parents.extend(fallacy.entry().cloned());
        verification_parents.extend(ai.entry().cloned());

        let (verification_result, verification_entry) = self
            .run_essential(
                DetectorKind::Verification,
                analysis_id,
                verification_parents,
                working,
                &verification_context,
            )
            .await?;
        let verification = match verification_result.payload {
            DetectorPayload::Verification(result) => result,
            _ => VerificationResult {
                confidence: verification_result.confidence,
                method: verification_result.method,
                notes: None,
            },
        };

        let breakdown = scoring::score(&evidence_items, verification.confidence, &self.config.scoring);

        Ok(RoundOutcome {
            evidence: evidence_items,
            evidence_confidence,
            fallacies,
            ai_detection,
            verification,
            verification_entry,
            degraded,
            breakdown,
        })
    }

    /// Translate into the processing language when needed.
    ///
    /// Returns the input downstream stages should see, the report's
    /// multilingual section, and how the stage went.
    async fn translate(
        &self,
        analysis_id: &str,
        root: &EntryId,
        input: &CanonicalInput,
    ) -> AnalysisResult<(CanonicalInput, Option<MultilingualInfo>, StageOutcome)> {
        let processing = self.config.processing_language.as_str();
        if input.language() == processing {
            return Ok((input.clone(), None, StageOutcome::Skipped));
        }

        let mut info = MultilingualInfo {
            detected_language: input.language().to_string(),
            processing_language: processing.to_string(),
            translated: false,
            translated_text: None,
        };

        let context = DetectorContext::new(processing);
        let outcome = self
            .optional_stage(DetectorKind::Translation, analysis_id, root, input, &context)
            .await?;

        let translated_text = match outcome.result().map(|r| &r.payload) {
            Some(DetectorPayload::Translation(t)) => Some(t.translated_text.clone()),
            _ => None,
        };

        match translated_text {
            Some(text) => {
                info.translated = true;
                info.translated_text = Some(text.clone());
                let working = input.with_translated_text(text, processing);
                Ok((working, Some(info), outcome))
            }
            None => Ok((input.clone(), Some(info), outcome)),
        }
    }

    async fn essential_stage(
        &self,
        kind: DetectorKind,
        analysis_id: &str,
        parent: &EntryId,
        input: &CanonicalInput,
        context: &DetectorContext,
    ) -> AnalysisResult<(DetectorResult, EntryId)> {
        self.run_essential(kind, analysis_id, vec![parent.clone()], input, context)
            .await
    }

    async fn run_essential(
        &self,
        kind: DetectorKind,
        analysis_id: &str,
        parents: Vec<EntryId>,
        input: &CanonicalInput,
        context: &DetectorContext,
    ) -> AnalysisResult<(DetectorResult, EntryId)> {
        let Some(detector) = self.detectors.get(kind) else {
            return Err(AnalysisError::AnalysisFailed {
                stage: kind,
                source: DetectorError::Unavailable {
                    message: "no detector registered".to_string(),
                    retries: 0,
                },
            });
        };

        let start = Instant::now();
        match self.call_with_retry(kind, detector.as_ref(), input, context).await {
            Ok(result) => {
                let entry = self
                    .record(kind, analysis_id, parents, EntryStatus::Ok, &result, start)
                    .await?;
                Ok((result, entry))
            }
            Err(source) => {
                error!(
                    analysis_id = %analysis_id,
                    stage = %kind,
                    error = %source,
                    "Essential stage failed"
                );
                self.ledger
                    .append(
                        NewEntry::new(analysis_id, entry_kind_for(kind), kind.as_str())
                            .with_parents(parents)
                            .with_status(EntryStatus::Failed)
                            .with_payload(json!({ "error": source.to_string() }))
                            .with_processing_time(start.elapsed().as_millis() as u64),
                    )
                    .await?;
                Err(AnalysisError::AnalysisFailed {
                    stage: kind,
                    source,
                })
            }
        }
    }

    /// Run a stage whose failure only degrades the report.
    async fn optional_stage(
        &self,
        kind: DetectorKind,
        analysis_id: &str,
        parent: &EntryId,
        input: &CanonicalInput,
        context: &DetectorContext,
    ) -> AnalysisResult<StageOutcome> {
        let Some(detector) = self.detectors.get(kind) else {
            debug!(stage = %kind, "No detector registered, skipping stage");
            return Ok(StageOutcome::Skipped);
        };

        let start = Instant::now();
        let parents = vec![parent.clone()];
        match self.call_with_retry(kind, detector.as_ref(), input, context).await {
            Ok(result) => {
                let entry = self
                    .record(kind, analysis_id, parents, EntryStatus::Ok, &result, start)
                    .await?;
                Ok(StageOutcome::Completed { result, entry })
            }
            Err(e) => {
                warn!(
                    analysis_id = %analysis_id,
                    stage = %kind,
                    error = %e,
                    "Non-essential stage failed, continuing without it"
                );
                let entry = self
                    .ledger
                    .append(
                        NewEntry::new(analysis_id, entry_kind_for(kind), kind.as_str())
                            .with_parents(parents)
                            .with_status(EntryStatus::Degraded)
                            .with_payload(json!({ "error": e.to_string() }))
                            .with_processing_time(start.elapsed().as_millis() as u64),
                    )
                    .await?;
                Ok(StageOutcome::Degraded { entry })
            }
        }
    }

    async fn record(
        &self,
        kind: DetectorKind,
        analysis_id: &str,
        parents: Vec<EntryId>,
        status: EntryStatus,
        result: &DetectorResult,
        start: Instant,
    ) -> AnalysisResult<EntryId> {
        let payload = serde_json::to_value(result).unwrap_or_else(|e| {
            json!({ "error": format!("unserializable detector result: {}", e) })
        });
        let entry = self
            .ledger
            .append(
                NewEntry::new(analysis_id, entry_kind_for(kind), kind.as_str())
                    .with_parents(parents)
                    .with_status(status)
                    .with_payload(payload)
                    .with_confidence(result.confidence)
                    .with_processing_time(start.elapsed().as_millis() as u64),
            )
            .await?;
        Ok(entry)
    }

    /// Call a detector with per-attempt timeout and exponential backoff.
    async fn call_with_retry(
        &self,
        kind: DetectorKind,
        detector: &dyn Detector,
        input: &CanonicalInput,
        context: &DetectorContext,
    ) -> DetectorOutcome<DetectorResult> {
        let attempt_timeout = Duration::from_millis(self.request.timeout_ms);
        let mut last_error = None;
        let mut retries = 0;

        while retries <= self.request.max_retries {
            if retries > 0 {
                let delay = backoff_delay(self.request.retry_delay_ms, retries);
                warn!(
                    stage = %kind,
                    retry = retries,
                    delay_ms = delay.as_millis(),
                    "Retrying detector call"
                );
                tokio::time::sleep(delay).await;
            }

            let start = Instant::now();
            let attempt = match tokio::time::timeout(attempt_timeout, detector.run(input, context)).await {
                Ok(result) => result.and_then(|r| r.validate(kind).map(|_| r)),
                Err(_) => Err(DetectorError::Timeout {
                    timeout_ms: self.request.timeout_ms,
                }),
            };

            match attempt {
                Ok(result) => {
                    debug!(
                        stage = %kind,
                        latency_ms = start.elapsed().as_millis(),
                        confidence = result.confidence,
                        "Detector call succeeded"
                    );
                    return Ok(result);
                }
                Err(e) => {
                    warn!(
                        stage = %kind,
                        error = %e,
                        latency_ms = start.elapsed().as_millis(),
                        retry = retries,
                        "Detector call failed"
                    );
                    if !is_retryable(&e) {
                        return Err(e);
                    }
                    last_error = Some(e);
                    retries += 1;
                }
            }
        }

        match last_error {
            Some(e @ DetectorError::Api { .. }) => Err(e),
            Some(e) => Err(DetectorError::Unavailable {
                message: e.to_string(),
                retries: retries.saturating_sub(1),
            }),
            None => Err(DetectorError::Unavailable {
                message: "Unknown error".to_string(),
                retries,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::AnalysisOptions;
    use crate::detectors::{MockDetector, Stance, TranslationResult};
    use std::collections::BTreeMap;

    fn input(text: &str, language: &str) -> CanonicalInput {
        CanonicalInput::from_parts(
            text,
            None,
            language,
            BTreeMap::new(),
            AnalysisOptions::default(),
        )
    }

    fn fast_request() -> RequestConfig {
        RequestConfig {
            timeout_ms: 1_000,
            max_retries: 2,
            retry_delay_ms: 1,
        }
    }

    fn detector_returning(kind: DetectorKind, result: DetectorResult) -> Arc<dyn Detector> {
        let mut mock = MockDetector::new();
        mock.expect_kind().return_const(kind);
        mock.expect_run().returning(move |_, _| Ok(result.clone()));
        Arc::new(mock)
    }

    fn evidence() -> Arc<dyn Detector> {
        detector_returning(
            DetectorKind::Evidence,
            DetectorResult::evidence(
                vec![
                    EvidenceItem::new("nasa.gov", 0.95, Stance::Contradicts),
                    EvidenceItem::new("esa.int", 0.9, Stance::Contradicts),
                ],
                0.9,
            ),
        )
    }

    fn verification(confidence: f64) -> Arc<dyn Detector> {
        detector_returning(
            DetectorKind::Verification,
            DetectorResult::verification(VerificationResult {
                confidence,
                method: "nli".to_string(),
                notes: None,
            }),
        )
    }

    fn pipeline(registry: DetectorRegistry) -> Pipeline {
        Pipeline::new(
            registry,
            Arc::new(ProvenanceLedger::new()),
            &PipelineConfig::default(),
            &fast_request(),
        )
        .unwrap()
    }

    #[test]
    fn test_missing_essential_detector_rejected() {
        let result = Pipeline::new(
            DetectorRegistry::new().register(evidence()),
            Arc::new(ProvenanceLedger::new()),
            &PipelineConfig::default(),
            &fast_request(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_retryable_errors() {
        assert!(is_retryable(&DetectorError::Api {
            status: 503,
            message: String::new()
        }));
        assert!(is_retryable(&DetectorError::Api {
            status: 429,
            message: String::new()
        }));
        assert!(!is_retryable(&DetectorError::Api {
            status: 400,
            message: String::new()
        }));
        assert!(!is_retryable(&DetectorError::InvalidResponse {
            message: String::new()
        }));
    }

    #[tokio::test]
    async fn test_retry_then_succeed() {
        let mut flaky = MockDetector::new();
        flaky.expect_kind().return_const(DetectorKind::Verification);
        let mut seq = mockall::Sequence::new();
        flaky
            .expect_run()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| {
                Err(DetectorError::Transport {
                    message: "reset".to_string(),
                })
            });
        flaky
            .expect_run()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| {
                Ok(DetectorResult::verification(VerificationResult {
                    confidence: 0.9,
                    method: "nli".to_string(),
                    notes: None,
                }))
            });

        let pipeline = pipeline(
            DetectorRegistry::new()
                .register(evidence())
                .register(Arc::new(flaky)),
        );
        let report = pipeline.analyze(&input("The Earth is flat", "en")).await.unwrap();
        assert_eq!(report.verdict, Verdict::False);
    }

    #[tokio::test]
    async fn test_exhausted_retries_report_unavailable() {
        let mut down = MockDetector::new();
        down.expect_kind().return_const(DetectorKind::Evidence);
        down.expect_run().times(3).returning(|_, _| {
            Err(DetectorError::Timeout { timeout_ms: 10 })
        });

        let pipeline = pipeline(
            DetectorRegistry::new()
                .register(Arc::new(down))
                .register(verification(0.9)),
        );
        let err = pipeline.analyze(&input("claim", "en")).await.unwrap_err();
        match err {
            AnalysisError::AnalysisFailed { stage, source } => {
                assert_eq!(stage, DetectorKind::Evidence);
                assert_eq!(
                    source,
                    DetectorError::Unavailable {
                        message: "Request timeout after 10ms".to_string(),
                        retries: 2,
                    }
                );
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_wrong_payload_kind_is_not_retried() {
        let mut confused = MockDetector::new();
        confused.expect_kind().return_const(DetectorKind::Evidence);
        confused
            .expect_run()
            .times(1)
            .returning(|_, _| Ok(DetectorResult::fallacies(vec![], 0.5)));

        let pipeline = pipeline(
            DetectorRegistry::new()
                .register(Arc::new(confused))
                .register(verification(0.9)),
        );
        let err = pipeline.analyze(&input("claim", "en")).await.unwrap_err();
        assert!(matches!(
            err,
            AnalysisError::AnalysisFailed {
                source: DetectorError::KindMismatch { .. },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_translation_feeds_downstream_stages() {
        let translator = detector_returning(
            DetectorKind::Translation,
            DetectorResult::translation(
                TranslationResult {
                    translated_text: "The Earth is flat".to_string(),
                    source_language: "es".to_string(),
                    target_language: "en".to_string(),
                },
                0.9,
            ),
        );
        let mut evidence_detector = MockDetector::new();
        evidence_detector
            .expect_kind()
            .return_const(DetectorKind::Evidence);
        evidence_detector
            .expect_run()
            .withf(|input, _| input.text() == "The Earth is flat" && input.language() == "en")
            .times(1)
            .returning(|_, _| {
                Ok(DetectorResult::evidence(
                    vec![
                        EvidenceItem::new("a", 0.9, Stance::Contradicts),
                        EvidenceItem::new("b", 0.9, Stance::Contradicts),
                    ],
                    0.9,
                ))
            });

        let pipeline = pipeline(
            DetectorRegistry::new()
                .register(translator)
                .register(Arc::new(evidence_detector))
                .register(verification(0.9)),
        );
        let original = input("La Tierra es plana", "es");
        let report = pipeline.analyze(&original).await.unwrap();

        let multilingual = report.multilingual.unwrap();
        assert!(multilingual.translated);
        assert_eq!(multilingual.detected_language, "es");
        assert_eq!(report.fingerprint, original.fingerprint());

        let sag = report.sag.unwrap();
        assert!(sag
            .nodes
            .iter()
            .any(|n| n.node_type == crate::graph::NodeType::Assumption));
    }

    #[tokio::test]
    async fn test_graph_omitted_when_not_requested() {
        let pipeline = pipeline(
            DetectorRegistry::new()
                .register(evidence())
                .register(verification(0.9)),
        );
        let input = CanonicalInput::from_parts(
            "claim",
            None,
            "en",
            BTreeMap::new(),
            AnalysisOptions {
                include_graph: false,
            },
        );
        let report = pipeline.analyze(&input).await.unwrap();
        assert!(report.sag.is_none());

        let chain = pipeline.ledger().chain(&report.provenance_output).await.unwrap();
        assert!(chain.iter().all(|e| e.operation != "argument_graph"));
    }

    fn pipeline_with_rounds(registry: DetectorRegistry, max_rounds: u32) -> Pipeline {
        let config = PipelineConfig {
            max_rounds,
            confidence_threshold: 0.75,
            ..Default::default()
        };
        Pipeline::new(registry, Arc::new(ProvenanceLedger::new()), &config, &fast_request()).unwrap()
    }

    fn verification_sequence(confidences: &[f64]) -> Arc<dyn Detector> {
        let mut mock = MockDetector::new();
        mock.expect_kind().return_const(DetectorKind::Verification);
        let mut seq = mockall::Sequence::new();
        for &confidence in confidences {
            mock.expect_run()
                .times(1)
                .in_sequence(&mut seq)
                .returning(move |_, _| {
                    Ok(DetectorResult::verification(VerificationResult {
                        confidence,
                        method: "nli".to_string(),
                        notes: None,
                    }))
                });
        }
        Arc::new(mock)
    }

    #[tokio::test]
    async fn test_low_confidence_triggers_another_round() {
        let pipeline = pipeline_with_rounds(
            DetectorRegistry::new()
                .register(evidence())
                .register(verification_sequence(&[0.3, 0.95])),
            3,
        );
        let report = pipeline.analyze(&input("The Earth is flat", "en")).await.unwrap();
        assert!(report.confidence >= 0.75);
        assert_eq!(report.verdict, Verdict::False);

        let entries = pipeline.ledger().entries_for(&report.claim_id).await.unwrap();
        let count = |op: &str| entries.iter().filter(|e| e.operation == op).count();
        assert_eq!(count("evidence"), 2);
        assert_eq!(count("verification"), 2);
        assert_eq!(count("report"), 1);

        let output = entries.iter().find(|e| e.id == report.provenance_output).unwrap();
        assert_eq!(output.payload["rounds"], 2);
        assert!(pipeline.ledger().verify(&report.provenance_output).await.unwrap());
    }

    #[tokio::test]
    async fn test_rounds_stop_at_limit() {
        let pipeline = pipeline_with_rounds(
            DetectorRegistry::new()
                .register(evidence())
                .register(verification_sequence(&[0.1, 0.2])),
            2,
        );
        let report = pipeline.analyze(&input("claim", "en")).await.unwrap();
        assert!(report.confidence < 0.75);
        assert!((report.verification.confidence - 0.2).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_single_round_by_default() {
        let pipeline = pipeline(
            DetectorRegistry::new()
                .register(evidence())
                .register(verification_sequence(&[0.1])),
        );
        let report = pipeline.analyze(&input("claim", "en")).await.unwrap();
        assert_eq!(report.verdict, Verdict::Unverifiable);
    }

    #[tokio::test]
    async fn test_failed_analysis_keeps_provenance_under_given_id() {
        let mut down = MockDetector::new();
        down.expect_kind().return_const(DetectorKind::Verification);
        down.expect_run().returning(|_, _| {
            Err(DetectorError::Api {
                status: 400,
                message: "bad request".to_string(),
            })
        });
        let pipeline = pipeline(
            DetectorRegistry::new()
                .register(evidence())
                .register(Arc::new(down)),
        );

        let err = pipeline
            .analyze_with_id("fixed-id", &input("claim", "en"))
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::AnalysisFailed { stage: DetectorKind::Verification, .. }));

        let entries = pipeline.ledger().entries_for("fixed-id").await.unwrap();
        assert_eq!(entries[0].kind, EntryKind::Input);
        let failed = entries.iter().find(|e| e.operation == "verification").unwrap();
        assert_eq!(failed.status, EntryStatus::Failed);
    }

    #[test]
    fn test_backoff_doubles_and_saturates() {
        assert_eq!(backoff_delay(100, 1), Duration::from_millis(100));
        assert_eq!(backoff_delay(100, 3), Duration::from_millis(400));
        assert_eq!(backoff_delay(1_000, 80), Duration::from_millis(u64::MAX));
        assert_eq!(backoff_delay(u64::MAX / 2, 3), Duration::from_millis(u64::MAX));
    }

    #[tokio::test(start_paused = true)]
    async fn test_overall_timeout() {
        let mut slow = MockDetector::new();
        slow.expect_kind().return_const(DetectorKind::Verification);
        slow.expect_run().returning(|_, _| {
            Err(DetectorError::Timeout { timeout_ms: 1_000 })
        });

        let config = PipelineConfig {
            analysis_timeout_ms: 50,
            ..Default::default()
        };
        let request = RequestConfig {
            timeout_ms: 1_000,
            max_retries: 5,
            retry_delay_ms: 100,
        };
        let pipeline = Pipeline::new(
            DetectorRegistry::new()
                .register(evidence())
                .register(Arc::new(slow)),
            Arc::new(ProvenanceLedger::new()),
            &config,
            &request,
        )
        .unwrap();

        let err = pipeline.analyze(&input("claim", "en")).await.unwrap_err();
        assert_eq!(err, AnalysisError::AnalysisTimeout { timeout_ms: 50 });
    }
}
