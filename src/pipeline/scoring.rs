//! Confidence aggregation and verdict policy.
//!
//! Pure functions over detector output. All weights are non-negative, so
//! confidence never decreases when any input score increases.

use serde::Serialize;

use super::Verdict;
use crate::config::ScoringConfig;
use crate::detectors::{EvidenceItem, Stance};

/// Intermediate values behind a verdict.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub evidence_quality: f64,
    pub verification_confidence: f64,
    pub confidence: f64,
    pub supporting: usize,
    pub contradicting: usize,
    pub neutral: usize,
    pub verdict: Verdict,
}

/// Mean of the `top_k` highest evidence scores, `0.0` without evidence.
pub fn evidence_quality(evidence: &[EvidenceItem], top_k: usize) -> f64 {
    let mut scores: Vec<f64> = evidence.iter().map(|e| e.score).collect();
    scores.sort_by(|a, b| b.total_cmp(a));
    scores.truncate(top_k.max(1));
    if scores.is_empty() {
        return 0.0;
    }
    scores.iter().sum::<f64>() / scores.len() as f64
}

/// Weighted sum of verification confidence and evidence quality, clamped
/// to `[0, 1]`.
pub fn aggregate_confidence(verification: f64, quality: f64, config: &ScoringConfig) -> f64 {
    let raw = config.verification_weight * verification + config.evidence_weight * quality;
    raw.clamp(0.0, 1.0)
}

fn stance_counts(evidence: &[EvidenceItem]) -> (usize, usize, usize) {
    evidence
        .iter()
        .fold((0, 0, 0), |(s, c, n), item| match item.stance {
            Stance::Supports => (s + 1, c, n),
            Stance::Contradicts => (s, c + 1, n),
            Stance::Neutral => (s, c, n + 1),
        })
}

/// Verdict rule, checked in order:
/// 1. too little evidence or confidence below the low threshold: unverifiable
/// 2. both directions present and balanced: mixed
/// 3. confident verification with a directional majority: true / false
/// 4. otherwise: unverifiable
pub fn decide_verdict(
    evidence: &[EvidenceItem],
    verification_confidence: f64,
    confidence: f64,
    config: &ScoringConfig,
) -> Verdict {
    if evidence.len() < config.min_evidence || confidence < config.low_threshold {
        return Verdict::Unverifiable;
    }

    let (supporting, contradicting, _) = stance_counts(evidence);
    let majority = supporting.max(contradicting);
    let minority = supporting.min(contradicting);

    if minority > 0 && minority as f64 / majority as f64 >= config.mixed_balance_threshold {
        return Verdict::Mixed;
    }

    if verification_confidence >= config.high_threshold && supporting != contradicting {
        return if supporting > contradicting {
            Verdict::True
        } else {
            Verdict::False
        };
    }

    Verdict::Unverifiable
}

/// Score a finished set of evidence and a verification confidence.
pub fn score(
    evidence: &[EvidenceItem],
    verification_confidence: f64,
    config: &ScoringConfig,
) -> ScoreBreakdown {
    let quality = evidence_quality(evidence, config.top_k);
    let confidence = aggregate_confidence(verification_confidence, quality, config);
    let (supporting, contradicting, neutral) = stance_counts(evidence);
    ScoreBreakdown {
        evidence_quality: quality,
        verification_confidence,
        confidence,
        supporting,
        contradicting,
        neutral,
        verdict: decide_verdict(evidence, verification_confidence, confidence, config),
    }
}
