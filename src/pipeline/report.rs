use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::canonical::Fingerprint;
use crate::detectors::{
    AiDetectionResult, DetectorKind, EvidenceItem, FallacyItem, MultilingualInfo,
    VerificationResult,
};
use crate::graph::ArgumentGraph;
use crate::provenance::EntryId;

/// Truth verdict for a claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    True,
    False,
    Mixed,
    Unverifiable,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::True => "true",
            Verdict::False => "false",
            Verdict::Mixed => "mixed",
            Verdict::Unverifiable => "unverifiable",
        }
    }

    /// Human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            Verdict::True => "Likely true",
            Verdict::False => "Likely false",
            Verdict::Mixed => "Mixed evidence",
            Verdict::Unverifiable => "Unverifiable",
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Verdict {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "true" => Ok(Verdict::True),
            "false" => Ok(Verdict::False),
            "mixed" => Ok(Verdict::Mixed),
            "unverifiable" => Ok(Verdict::Unverifiable),
            other => Err(format!("Unknown verdict: {}", other)),
        }
    }
}

/// Completed analysis. Never mutated once built; overrides are layered on
/// top by the collaboration ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    /// Analysis id; also the provenance analysis key.
    pub claim_id: String,
    pub fingerprint: Fingerprint,
    pub verdict: Verdict,
    pub confidence: f64,
    /// Ordered by score, highest first.
    pub evidence: Vec<EvidenceItem>,
    pub fallacies: Vec<FallacyItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_detection: Option<AiDetectionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multilingual: Option<MultilingualInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sag: Option<ArgumentGraph>,
    pub verification: VerificationResult,
    /// Non-essential stages that failed and were left out.
    #[serde(default)]
    pub degraded_stages: Vec<DetectorKind>,
    pub provenance_root: EntryId,
    pub provenance_output: EntryId,
    pub created_at: DateTime<Utc>,
    pub processing_time_ms: u64,
}

impl Report {
    /// Whether every stage contributed.
    pub fn is_complete(&self) -> bool {
        self.degraded_stages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_round_trip() {
        for verdict in [
            Verdict::True,
            Verdict::False,
            Verdict::Mixed,
            Verdict::Unverifiable,
        ] {
            assert_eq!(verdict.as_str().parse::<Verdict>().unwrap(), verdict);
            let json = serde_json::to_string(&verdict).unwrap();
            assert_eq!(json, format!("\"{}\"", verdict));
        }
        assert!("maybe".parse::<Verdict>().is_err());
    }

    #[test]
    fn test_verdict_label() {
        assert_eq!(Verdict::False.label(), "Likely false");
        assert_eq!(Verdict::Unverifiable.label(), "Unverifiable");
    }
}
