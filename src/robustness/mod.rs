//! Adversarial robustness harness.
//!
//! Perturbs each input with every requested attack family, or runs a
//! generated synthetic suite. Both the original and the perturbed text go
//! through canonicalization and the pipeline (bypassing the report cache),
//! and the harness measures how far the outcome moves.

mod attacks;

pub use attacks::*;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::canonical::{AnalyzeRequest, Canonicalizer};
use crate::error::AnalysisResult;
use crate::pipeline::{Pipeline, Report, Verdict};

/// Letter grade for a mean robustness score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RobustnessGrade {
    A,
    B,
    C,
    D,
    F,
}

impl RobustnessGrade {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.9 {
            RobustnessGrade::A
        } else if score >= 0.8 {
            RobustnessGrade::B
        } else if score >= 0.7 {
            RobustnessGrade::C
        } else if score >= 0.6 {
            RobustnessGrade::D
        } else {
            RobustnessGrade::F
        }
    }
}

/// One (input, attack) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttackCase {
    pub input_index: usize,
    pub attack_type: AttackType,
    pub perturbed_text: String,
    pub original_verdict: Option<Verdict>,
    pub perturbed_verdict: Option<Verdict>,
    pub original_confidence: Option<f64>,
    pub perturbed_confidence: Option<f64>,
    /// `|original - perturbed|` confidence, `0.0` for error cases.
    pub confidence_change: f64,
    /// `1 - confidence_change`, `0.0` for error cases.
    pub robustness_score: f64,
    /// The perturbation flipped the verdict.
    pub successful_attack: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregates for a single attack family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttackSummary {
    pub count: usize,
    pub successful_attacks: usize,
    pub success_rate: f64,
    pub mean_robustness: f64,
    pub mean_confidence_change: f64,
}

/// Result of a full suite run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobustnessReport {
    pub total_cases: usize,
    pub successful_attacks: usize,
    pub errors: usize,
    pub attack_success_rate: f64,
    pub mean_robustness: f64,
    pub grade: RobustnessGrade,
    pub by_attack: BTreeMap<AttackType, AttackSummary>,
    pub cases: Vec<AttackCase>,
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

fn summarize(cases: &[&AttackCase]) -> AttackSummary {
    let successful = cases.iter().filter(|c| c.successful_attack).count();
    AttackSummary {
        count: cases.len(),
        successful_attacks: successful,
        success_rate: if cases.is_empty() {
            0.0
        } else {
            successful as f64 / cases.len() as f64
        },
        mean_robustness: mean(cases.iter().map(|c| c.robustness_score)),
        mean_confidence_change: mean(cases.iter().map(|c| c.confidence_change)),
    }
}

impl RobustnessReport {
    /// Aggregate cases. An empty suite grades `F` with a mean of `0.0`.
    pub fn from_cases(cases: Vec<AttackCase>) -> Self {
        let mut grouped: BTreeMap<AttackType, Vec<&AttackCase>> = BTreeMap::new();
        for case in &cases {
            grouped.entry(case.attack_type).or_default().push(case);
        }
        let by_attack = grouped
            .into_iter()
            .map(|(attack, group)| (attack, summarize(&group)))
            .collect();

        let all: Vec<&AttackCase> = cases.iter().collect();
        let overall = summarize(&all);
        Self {
            total_cases: overall.count,
            successful_attacks: overall.successful_attacks,
            errors: cases.iter().filter(|c| c.error.is_some()).count(),
            attack_success_rate: overall.success_rate,
            mean_robustness: overall.mean_robustness,
            grade: RobustnessGrade::from_score(overall.mean_robustness),
            by_attack,
            cases,
        }
    }
}

/// Runs perturbation suites against a pipeline.
///
/// Analyses still land in the pipeline's provenance ledger like any other,
/// but nothing is read from or written to the report cache.
pub struct RobustnessHarness {
    canonicalizer: Arc<Canonicalizer>,
    pipeline: Pipeline,
}

impl RobustnessHarness {
    pub fn new(canonicalizer: Arc<Canonicalizer>, pipeline: Pipeline) -> Self {
        Self {
            canonicalizer,
            pipeline,
        }
    }

    async fn analyze_text(&self, text: &str) -> AnalysisResult<Report> {
        let input = self
            .canonicalizer
            .canonicalize(&AnalyzeRequest::text(text))
            .await?;
        self.pipeline.analyze(&input).await
    }

    /// Run every attack in `attack_types` against every input.
    pub async fn run_suite(
        &self,
        inputs: &[String],
        attack_types: &[AttackType],
        params: &AttackParams,
    ) -> RobustnessReport {
        let cases: Vec<SuiteCase> = inputs
            .iter()
            .enumerate()
            .flat_map(|(index, text)| {
                attack_types.iter().map(move |&attack| SuiteCase {
                    input_index: index,
                    text: text.clone(),
                    attack_type: attack,
                    params: params.clone(),
                    label: format!("{}:{}", index, attack),
                })
            })
            .collect();
        self.run_cases(&cases).await
    }

    /// Run explicit cases. Each distinct input is analyzed unperturbed once.
    pub async fn run_cases(&self, suite: &[SuiteCase]) -> RobustnessReport {
        let mut originals: HashMap<usize, AnalysisResult<Report>> = HashMap::new();
        let mut cases = Vec::with_capacity(suite.len());

        for case in suite {
            let index = case.input_index;
            if !originals.contains_key(&index) {
                let original = self.analyze_text(&case.text).await;
                if let Err(e) = &original {
                    warn!(input_index = index, error = %e, "Original analysis failed");
                }
                originals.insert(index, original);
            }

            let attack = case.attack_type;
            let perturbed_text = case.perturbed_text();
            let result = match originals.get(&index) {
                Some(Ok(original)) => {
                    let perturbed = self.analyze_text(&perturbed_text).await;
                    evaluate(index, attack, perturbed_text, original, perturbed)
                }
                Some(Err(e)) => error_case(index, attack, perturbed_text, None, e.to_string()),
                None => continue,
            };
            cases.push(result);
        }

        let report = RobustnessReport::from_cases(cases);
        info!(
            total_cases = report.total_cases,
            successful_attacks = report.successful_attacks,
            mean_robustness = report.mean_robustness,
            grade = ?report.grade,
            "Robustness suite completed"
        );
        report
    }
}

fn evaluate(
    index: usize,
    attack: AttackType,
    perturbed_text: String,
    original: &Report,
    perturbed: AnalysisResult<Report>,
) -> AttackCase {
    match perturbed {
        Ok(perturbed) => {
            let change = (original.confidence - perturbed.confidence).abs();
            AttackCase {
                input_index: index,
                attack_type: attack,
                perturbed_text,
                original_verdict: Some(original.verdict),
                perturbed_verdict: Some(perturbed.verdict),
                original_confidence: Some(original.confidence),
                perturbed_confidence: Some(perturbed.confidence),
                confidence_change: change,
                robustness_score: (1.0 - change).clamp(0.0, 1.0),
                successful_attack: original.verdict != perturbed.verdict,
                error: None,
            }
        }
        Err(e) => {
            warn!(input_index = index, attack = %attack, error = %e, "Perturbed analysis failed");
            error_case(index, attack, perturbed_text, Some(original), e.to_string())
        }
    }
}

fn error_case(
    index: usize,
    attack: AttackType,
    perturbed_text: String,
    original: Option<&Report>,
    error: String,
) -> AttackCase {
    AttackCase {
        input_index: index,
        attack_type: attack,
        perturbed_text,
        original_verdict: original.map(|r| r.verdict),
        perturbed_verdict: None,
        original_confidence: original.map(|r| r.confidence),
        perturbed_confidence: None,
        confidence_change: 0.0,
        robustness_score: 0.0,
        successful_attack: false,
        error: Some(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::StopwordLanguageDetector;
    use crate::config::{PipelineConfig, RequestConfig};
    use crate::detectors::{
        Detector, DetectorKind, DetectorRegistry, DetectorResult, EvidenceItem, MockDetector,
        Stance, VerificationResult,
    };
    use crate::error::DetectorError;
    use crate::provenance::ProvenanceLedger;

    fn verification() -> Arc<dyn Detector> {
        let mut mock = MockDetector::new();
        mock.expect_kind().return_const(DetectorKind::Verification);
        mock.expect_run().returning(|_, _| {
            Ok(DetectorResult::verification(VerificationResult {
                confidence: 0.9,
                method: "nli".to_string(),
                notes: None,
            }))
        });
        Arc::new(mock)
    }

    const OFF_TOPIC: &[&str] = &[
        "weather", "breakfast", "traffic", "color", "music", "stock", "groceries", "dog",
    ];
    const CITED: &[&str] = &["University", "MIT", "Stanford", "Caltech"];

    /// Contradicting evidence, unless the text cites a source. Off-topic
    /// text is rejected.
    fn source_sensitive_evidence() -> Arc<dyn Detector> {
        let mut mock = MockDetector::new();
        mock.expect_kind().return_const(DetectorKind::Evidence);
        mock.expect_run().returning(|input, _| {
            let text = input.text();
            if OFF_TOPIC.iter().any(|w| text.contains(w)) {
                return Err(DetectorError::InvalidResponse {
                    message: "off topic".to_string(),
                });
            }
            let stance = if CITED.iter().any(|w| text.contains(w)) {
                Stance::Supports
            } else {
                Stance::Contradicts
            };
            Ok(DetectorResult::evidence(
                vec![
                    EvidenceItem::new("nasa.gov", 0.9, stance),
                    EvidenceItem::new("esa.int", 0.9, stance),
                ],
                0.9,
            ))
        });
        Arc::new(mock)
    }

    fn harness() -> RobustnessHarness {
        let config = PipelineConfig::default();
        let request = RequestConfig {
            timeout_ms: 1_000,
            max_retries: 0,
            retry_delay_ms: 1,
        };
        let registry = DetectorRegistry::new()
            .register(source_sensitive_evidence())
            .register(verification());
        let pipeline = Pipeline::new(
            registry,
            Arc::new(ProvenanceLedger::new()),
            &config,
            &request,
        )
        .unwrap();
        let canonicalizer = Canonicalizer::new(&config, Arc::new(StopwordLanguageDetector::new()));
        RobustnessHarness::new(Arc::new(canonicalizer), pipeline)
    }

    fn inputs() -> Vec<String> {
        vec!["The Earth is flat.".to_string()]
    }

    #[test]
    fn test_grade_thresholds() {
        assert_eq!(RobustnessGrade::from_score(0.95), RobustnessGrade::A);
        assert_eq!(RobustnessGrade::from_score(0.9), RobustnessGrade::A);
        assert_eq!(RobustnessGrade::from_score(0.85), RobustnessGrade::B);
        assert_eq!(RobustnessGrade::from_score(0.7), RobustnessGrade::C);
        assert_eq!(RobustnessGrade::from_score(0.6), RobustnessGrade::D);
        assert_eq!(RobustnessGrade::from_score(0.2), RobustnessGrade::F);
    }

    #[test]
    fn test_empty_suite() {
        let report = RobustnessReport::from_cases(Vec::new());
        assert_eq!(report.total_cases, 0);
        assert_eq!(report.mean_robustness, 0.0);
        assert_eq!(report.grade, RobustnessGrade::F);
    }

    #[tokio::test]
    async fn test_stable_attack_scores_full_robustness() {
        let report = harness()
            .run_suite(&inputs(), &[AttackType::SemanticPerturbation], &AttackParams::default())
            .await;
        assert_eq!(report.total_cases, 1);
        let case = &report.cases[0];
        assert_eq!(case.original_verdict, Some(Verdict::False));
        assert_eq!(case.perturbed_verdict, Some(Verdict::False));
        assert!((case.robustness_score - 1.0).abs() < 1e-9);
        assert!(!case.successful_attack);
        assert_eq!(report.grade, RobustnessGrade::A);
    }

    #[tokio::test]
    async fn test_verdict_flip_is_successful_attack() {
        let report = harness()
            .run_suite(&inputs(), &[AttackType::EvidencePoisoning], &AttackParams::default())
            .await;
        let case = &report.cases[0];
        assert_eq!(case.original_verdict, Some(Verdict::False));
        assert_eq!(case.perturbed_verdict, Some(Verdict::True));
        assert!(case.successful_attack);
        assert_eq!(report.successful_attacks, 1);
        assert_eq!(report.attack_success_rate, 1.0);
    }

    #[tokio::test]
    async fn test_failed_perturbed_analysis_scores_zero() {
        let report = harness()
            .run_suite(
                &inputs(),
                &[AttackType::ContextManipulation, AttackType::SemanticPerturbation],
                &AttackParams::default(),
            )
            .await;
        assert_eq!(report.total_cases, 2);
        assert_eq!(report.errors, 1);

        let context = &report.by_attack[&AttackType::ContextManipulation];
        assert_eq!(context.count, 1);
        assert_eq!(context.mean_robustness, 0.0);

        let failed = report
            .cases
            .iter()
            .find(|c| c.attack_type == AttackType::ContextManipulation)
            .unwrap();
        assert!(failed.error.is_some());
        assert!(!failed.successful_attack);
        assert!((report.mean_robustness - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_suite_is_deterministic() {
        let params = AttackParams::default();
        let first = harness().run_suite(&inputs(), &AttackType::ALL, &params).await;
        let second = harness().run_suite(&inputs(), &AttackType::ALL, &params).await;
        let texts = |r: &RobustnessReport| {
            r.cases
                .iter()
                .map(|c| c.perturbed_text.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(texts(&first), texts(&second));
        assert_eq!(first.total_cases, AttackType::ALL.len());
    }

    #[tokio::test]
    async fn test_failed_original_makes_every_case_an_error() {
        let report = harness()
            .run_suite(
                &["   ".to_string()],
                &[AttackType::NoiseInjection, AttackType::ConfidenceAttack],
                &AttackParams::default(),
            )
            .await;
        assert_eq!(report.errors, 2);
        assert!(report.cases.iter().all(|c| c.original_verdict.is_none()));
    }

    #[tokio::test]
    async fn test_run_cases_matches_run_suite() {
        let params = AttackParams::default();
        let cases: Vec<SuiteCase> = [AttackType::NoiseInjection, AttackType::ConfidenceAttack]
            .into_iter()
            .map(|attack| SuiteCase {
                input_index: 0,
                text: inputs()[0].clone(),
                attack_type: attack,
                params: params.clone(),
                label: format!("0:{}", attack),
            })
            .collect();
        let explicit = harness().run_cases(&cases).await;
        let suite = harness()
            .run_suite(
                &inputs(),
                &[AttackType::NoiseInjection, AttackType::ConfidenceAttack],
                &params,
            )
            .await;
        assert_eq!(explicit.cases, suite.cases);
    }

    #[tokio::test]
    async fn test_synthetic_suite_runs_every_case() {
        let cases = synthetic_cases(12, 3);
        let report = harness().run_cases(&cases).await;
        assert_eq!(report.total_cases, 12);
        for (case, result) in cases.iter().zip(&report.cases) {
            assert_eq!(result.attack_type, case.attack_type);
            assert_eq!(result.input_index, case.input_index);
        }
    }
}
