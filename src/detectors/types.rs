use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::DetectorKind;
use crate::error::{DetectorError, DetectorOutcome};

/// Direction an evidence item pushes the claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stance {
    Supports,
    Contradicts,
    Neutral,
}

impl Stance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stance::Supports => "supports",
            Stance::Contradicts => "contradicts",
            Stance::Neutral => "neutral",
        }
    }
}

/// A retrieved source bearing on the claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    /// Relevance/quality score in `[0, 1]`.
    pub score: f64,
    pub stance: Stance,
}

impl EvidenceItem {
    pub fn new(source: impl Into<String>, score: f64, stance: Stance) -> Self {
        Self {
            source: source.into(),
            title: None,
            snippet: None,
            score,
            stance,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = Some(snippet.into());
        self
    }
}

/// A detected logical fallacy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallacyItem {
    pub fallacy_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    pub confidence: f64,
}

impl FallacyItem {
    pub fn new(fallacy_type: impl Into<String>, confidence: f64) -> Self {
        Self {
            fallacy_type: fallacy_type.into(),
            span: None,
            explanation: None,
            confidence,
        }
    }
}

/// AI-generated content assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiDetectionResult {
    pub is_ai_generated: bool,
    pub confidence: f64,
    pub method: String,
    #[serde(default)]
    pub scores: BTreeMap<String, f64>,
}

/// Verifier outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub confidence: f64,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Translator outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationResult {
    pub translated_text: String,
    pub source_language: String,
    pub target_language: String,
}

/// Multilingual section of a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultilingualInfo {
    pub detected_language: String,
    pub processing_language: String,
    pub translated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translated_text: Option<String>,
}

/// Stage-specific detector output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DetectorPayload {
    Evidence { items: Vec<EvidenceItem> },
    Fallacy { items: Vec<FallacyItem> },
    AiDetection(AiDetectionResult),
    Verification(VerificationResult),
    Translation(TranslationResult),
}

/// What every detector returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorResult {
    pub confidence: f64,
    pub method: String,
    pub payload: DetectorPayload,
}

impl DetectorResult {
    pub fn evidence(items: Vec<EvidenceItem>, confidence: f64) -> Self {
        Self {
            confidence,
            method: "evidence_retrieval".to_string(),
            payload: DetectorPayload::Evidence { items },
        }
    }

    pub fn fallacies(items: Vec<FallacyItem>, confidence: f64) -> Self {
        Self {
            confidence,
            method: "fallacy_classifier".to_string(),
            payload: DetectorPayload::Fallacy { items },
        }
    }

    pub fn ai_detection(result: AiDetectionResult) -> Self {
        Self {
            confidence: result.confidence,
            method: result.method.clone(),
            payload: DetectorPayload::AiDetection(result),
        }
    }

    pub fn verification(result: VerificationResult) -> Self {
        Self {
            confidence: result.confidence,
            method: result.method.clone(),
            payload: DetectorPayload::Verification(result),
        }
    }

    pub fn translation(result: TranslationResult, confidence: f64) -> Self {
        Self {
            confidence,
            method: "translator".to_string(),
            payload: DetectorPayload::Translation(result),
        }
    }

    /// Override the reported method.
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    /// Stage the payload belongs to.
    pub fn kind(&self) -> DetectorKind {
        match self.payload {
            DetectorPayload::Evidence { .. } => DetectorKind::Evidence,
            DetectorPayload::Fallacy { .. } => DetectorKind::Fallacy,
            DetectorPayload::AiDetection(_) => DetectorKind::AiDetection,
            DetectorPayload::Verification(_) => DetectorKind::Verification,
            DetectorPayload::Translation(_) => DetectorKind::Translation,
        }
    }

    /// Check the result belongs to `expected` and every score is a
    /// probability.
    pub fn validate(&self, expected: DetectorKind) -> DetectorOutcome<()> {
        let actual = self.kind();
        if actual != expected {
            return Err(DetectorError::KindMismatch { expected, actual });
        }

        let mut scores = vec![("confidence", self.confidence)];
        match &self.payload {
            DetectorPayload::Evidence { items } => {
                scores.extend(items.iter().map(|i| ("evidence.score", i.score)));
            }
            DetectorPayload::Fallacy { items } => {
                scores.extend(items.iter().map(|i| ("fallacy.confidence", i.confidence)));
            }
            DetectorPayload::AiDetection(r) => scores.push(("ai_detection.confidence", r.confidence)),
            DetectorPayload::Verification(r) => scores.push(("verification.confidence", r.confidence)),
            DetectorPayload::Translation(_) => {}
        }

        match scores.into_iter().find(|(_, v)| !(0.0..=1.0).contains(v)) {
            Some((field, value)) => Err(DetectorError::InvalidResponse {
                message: format!("{} out of range: {}", field, value),
            }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_tagging() {
        let result = DetectorResult::verification(VerificationResult {
            confidence: 0.9,
            method: "nli".to_string(),
            notes: None,
        });
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["payload"]["kind"], "verification");
        assert_eq!(json["payload"]["confidence"], 0.9);
        assert_eq!(json["method"], "nli");

        let back: DetectorResult = serde_json::from_value(json).unwrap();
        assert_eq!(back.kind(), DetectorKind::Verification);
    }

    #[test]
    fn test_evidence_payload_from_wire() {
        let json = serde_json::json!({
            "confidence": 0.8,
            "method": "search",
            "payload": {
                "kind": "evidence",
                "items": [{"source": "nasa.gov", "score": 0.95, "stance": "contradicts"}]
            }
        });
        let result: DetectorResult = serde_json::from_value(json).unwrap();
        match result.payload {
            DetectorPayload::Evidence { items } => {
                assert_eq!(items.len(), 1);
                assert_eq!(items[0].stance, Stance::Contradicts);
                assert!(items[0].title.is_none());
            }
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_kind_mismatch() {
        let result = DetectorResult::fallacies(vec![], 0.5);
        assert_eq!(
            result.validate(DetectorKind::Evidence),
            Err(DetectorError::KindMismatch {
                expected: DetectorKind::Evidence,
                actual: DetectorKind::Fallacy,
            })
        );
    }

    #[test]
    fn test_validate_rejects_out_of_range_scores() {
        let result = DetectorResult::evidence(
            vec![EvidenceItem::new("a", 1.2, Stance::Supports)],
            0.5,
        );
        assert!(matches!(
            result.validate(DetectorKind::Evidence),
            Err(DetectorError::InvalidResponse { .. })
        ));

        let result = DetectorResult::evidence(vec![], f64::NAN);
        assert!(result.validate(DetectorKind::Evidence).is_err());
    }

    #[test]
    fn test_validate_accepts_well_formed() {
        let result = DetectorResult::evidence(
            vec![EvidenceItem::new("a", 0.7, Stance::Neutral).with_title("A")],
            0.7,
        );
        assert!(result.validate(DetectorKind::Evidence).is_ok());
    }
}
