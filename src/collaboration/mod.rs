//! Human feedback and overrides layered on completed analyses.
//!
//! Records are append-only and never touch the stored [`Report`]; callers
//! get an adjusted [`ReportView`] through [`CollaborationLedger::current_view`].

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::error::{CollaborationError, CollaborationResult};
use crate::pipeline::{Report, Verdict};
use crate::provenance::ProvenanceLedger;

/// Aspect of a report a reviewer rated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackType {
    Accuracy,
    Relevance,
    Completeness,
    Clarity,
    Bias,
    Confidence,
    SourceQuality,
    LogicalFlow,
}

impl FeedbackType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackType::Accuracy => "accuracy",
            FeedbackType::Relevance => "relevance",
            FeedbackType::Completeness => "completeness",
            FeedbackType::Clarity => "clarity",
            FeedbackType::Bias => "bias",
            FeedbackType::Confidence => "confidence",
            FeedbackType::SourceQuality => "source_quality",
            FeedbackType::LogicalFlow => "logical_flow",
        }
    }
}

impl std::fmt::Display for FeedbackType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Feedback submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewFeedback {
    pub claim_id: String,
    pub session_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    pub feedback_type: FeedbackType,
    /// 1 (poor) to 5 (excellent).
    pub rating: u8,
    #[serde(default)]
    pub comment: Option<String>,
    /// Evidence source, fallacy type or graph node the rating is about.
    #[serde(default)]
    pub specific_element: Option<String>,
}

/// Stored feedback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub id: String,
    pub claim_id: String,
    pub session_id: String,
    pub user_id: Option<String>,
    pub feedback_type: FeedbackType,
    pub rating: u8,
    pub comment: Option<String>,
    pub specific_element: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// What an override changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OverrideChange {
    Verdict { verdict: Verdict },
    Confidence { confidence: f64 },
    Note { text: String },
}

/// Override submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOverride {
    pub claim_id: String,
    pub session_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    pub change: OverrideChange,
    pub reason: String,
    /// Reviewer's confidence in the override, within `[0, 1]`.
    pub reviewer_confidence: f64,
}

/// Stored override.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverrideRecord {
    pub id: String,
    pub claim_id: String,
    pub session_id: String,
    pub user_id: Option<String>,
    pub change: OverrideChange,
    pub reason: String,
    pub reviewer_confidence: f64,
    pub created_at: DateTime<Utc>,
}

/// A report with the latest overrides applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportView {
    pub report: Report,
    pub verdict: Verdict,
    pub confidence: f64,
    pub overridden: bool,
    pub notes: Vec<String>,
    pub override_ids: Vec<String>,
}

/// Aggregate reviewer signal for calibrating thresholds.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct CalibrationSignal {
    pub feedback_count: usize,
    pub override_count: usize,
    /// Mean rating of `accuracy` feedback.
    pub mean_accuracy_rating: Option<f64>,
    pub mean_rating_by_type: BTreeMap<FeedbackType, f64>,
    /// Reviewed analyses that received a verdict override.
    pub verdict_override_rate: f64,
    pub reviewed_analyses: usize,
}

fn validation(field: &str, reason: impl Into<String>) -> CollaborationError {
    CollaborationError::Validation {
        field: field.to_string(),
        reason: reason.into(),
    }
}

fn unit_interval(field: &str, value: f64) -> CollaborationResult<()> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(validation(field, format!("must be within [0, 1], got {}", value)))
    }
}

/// Append-only store of reviewer feedback and overrides.
pub struct CollaborationLedger {
    provenance: Arc<ProvenanceLedger>,
    feedback: RwLock<Vec<FeedbackRecord>>,
    overrides: RwLock<Vec<OverrideRecord>>,
}

impl CollaborationLedger {
    pub fn new(provenance: Arc<ProvenanceLedger>) -> Self {
        Self {
            provenance,
            feedback: RwLock::new(Vec::new()),
            overrides: RwLock::new(Vec::new()),
        }
    }

    async fn ensure_analysis(&self, claim_id: &str) -> CollaborationResult<()> {
        if self.provenance.has_output(claim_id).await {
            Ok(())
        } else {
            Err(CollaborationError::UnknownAnalysis {
                claim_id: claim_id.to_string(),
            })
        }
    }

    /// Validate a feedback submission and build its record without storing
    /// it. Pair with [`commit_feedback`](Self::commit_feedback) once the
    /// record is durable.
    pub async fn prepare_feedback(&self, new: NewFeedback) -> CollaborationResult<FeedbackRecord> {
        if !(1..=5).contains(&new.rating) {
            return Err(validation(
                "rating",
                format!("must be between 1 and 5, got {}", new.rating),
            ));
        }
        self.ensure_analysis(&new.claim_id).await?;

        Ok(FeedbackRecord {
            id: Uuid::new_v4().to_string(),
            claim_id: new.claim_id,
            session_id: new.session_id,
            user_id: new.user_id,
            feedback_type: new.feedback_type,
            rating: new.rating,
            comment: new.comment,
            specific_element: new.specific_element,
            created_at: Utc::now(),
        })
    }

    /// Append a prepared feedback record.
    pub async fn commit_feedback(&self, record: FeedbackRecord) {
        info!(
            feedback_id = %record.id,
            claim_id = %record.claim_id,
            feedback_type = %record.feedback_type,
            rating = record.rating,
            "Feedback recorded"
        );
        self.feedback.write().await.push(record);
    }

    /// Record feedback on a completed analysis.
    pub async fn record_feedback(&self, new: NewFeedback) -> CollaborationResult<FeedbackRecord> {
        let record = self.prepare_feedback(new).await?;
        self.commit_feedback(record.clone()).await;
        Ok(record)
    }

    /// Validate an override submission and build its record without storing
    /// it.
    pub async fn prepare_override(&self, new: NewOverride) -> CollaborationResult<OverrideRecord> {
        unit_interval("reviewer_confidence", new.reviewer_confidence)?;
        if let OverrideChange::Confidence { confidence } = &new.change {
            unit_interval("confidence", *confidence)?;
        }
        if new.reason.trim().is_empty() {
            return Err(validation("reason", "must not be empty"));
        }
        self.ensure_analysis(&new.claim_id).await?;

        Ok(OverrideRecord {
            id: Uuid::new_v4().to_string(),
            claim_id: new.claim_id,
            session_id: new.session_id,
            user_id: new.user_id,
            change: new.change,
            reason: new.reason,
            reviewer_confidence: new.reviewer_confidence,
            created_at: Utc::now(),
        })
    }

    /// Append a prepared override record.
    pub async fn commit_override(&self, record: OverrideRecord) {
        info!(
            override_id = %record.id,
            claim_id = %record.claim_id,
            "Override recorded"
        );
        self.overrides.write().await.push(record);
    }

    /// Record an override of a completed analysis.
    pub async fn record_override(&self, new: NewOverride) -> CollaborationResult<OverrideRecord> {
        let record = self.prepare_override(new).await?;
        self.commit_override(record.clone()).await;
        Ok(record)
    }

    pub async fn feedback_for(&self, claim_id: &str) -> Vec<FeedbackRecord> {
        self.feedback
            .read()
            .await
            .iter()
            .filter(|f| f.claim_id == claim_id)
            .cloned()
            .collect()
    }

    pub async fn overrides_for(&self, claim_id: &str) -> Vec<OverrideRecord> {
        self.overrides
            .read()
            .await
            .iter()
            .filter(|o| o.claim_id == claim_id)
            .cloned()
            .collect()
    }

    pub async fn feedback_for_session(&self, session_id: &str) -> Vec<FeedbackRecord> {
        self.feedback
            .read()
            .await
            .iter()
            .filter(|f| f.session_id == session_id)
            .cloned()
            .collect()
    }

    pub async fn overrides_for_session(&self, session_id: &str) -> Vec<OverrideRecord> {
        self.overrides
            .read()
            .await
            .iter()
            .filter(|o| o.session_id == session_id)
            .cloned()
            .collect()
    }

    pub async fn feedback_for_user(&self, user_id: &str) -> Vec<FeedbackRecord> {
        self.feedback
            .read()
            .await
            .iter()
            .filter(|f| f.user_id.as_deref() == Some(user_id))
            .cloned()
            .collect()
    }

    pub async fn overrides_for_user(&self, user_id: &str) -> Vec<OverrideRecord> {
        self.overrides
            .read()
            .await
            .iter()
            .filter(|o| o.user_id.as_deref() == Some(user_id))
            .cloned()
            .collect()
    }

    /// Clear `user_id` from every record. Returns (feedback, overrides)
    /// counts touched.
    pub async fn anonymize_user(&self, user_id: &str) -> (usize, usize) {
        let mut feedback = 0;
        for record in self.feedback.write().await.iter_mut() {
            if record.user_id.as_deref() == Some(user_id) {
                record.user_id = None;
                feedback += 1;
            }
        }
        let mut overrides = 0;
        for record in self.overrides.write().await.iter_mut() {
            if record.user_id.as_deref() == Some(user_id) {
                record.user_id = None;
                overrides += 1;
            }
        }
        (feedback, overrides)
    }

    /// Layer the most recent verdict and confidence overrides on `report`.
    pub async fn current_view(&self, report: &Report) -> ReportView {
        let overrides = self.overrides_for(&report.claim_id).await;

        let mut view = ReportView {
            report: report.clone(),
            verdict: report.verdict,
            confidence: report.confidence,
            overridden: false,
            notes: Vec::new(),
            override_ids: Vec::new(),
        };
        // Records are kept in append order, so later ones win.
        for record in overrides {
            match &record.change {
                OverrideChange::Verdict { verdict } => {
                    view.verdict = *verdict;
                    view.overridden = true;
                }
                OverrideChange::Confidence { confidence } => {
                    view.confidence = *confidence;
                    view.overridden = true;
                }
                OverrideChange::Note { text } => view.notes.push(text.clone()),
            }
            view.override_ids.push(record.id);
        }
        view
    }

    /// Reviewer signal across every recorded analysis.
    pub async fn calibration_signal(&self) -> CalibrationSignal {
        let feedback = self.feedback.read().await;
        let overrides = self.overrides.read().await;

        let mut by_type: BTreeMap<FeedbackType, (u32, usize)> = BTreeMap::new();
        for record in feedback.iter() {
            let slot = by_type.entry(record.feedback_type).or_default();
            slot.0 += u32::from(record.rating);
            slot.1 += 1;
        }
        let mean_rating_by_type: BTreeMap<FeedbackType, f64> = by_type
            .into_iter()
            .map(|(kind, (sum, count))| (kind, f64::from(sum) / count as f64))
            .collect();

        let reviewed: HashSet<&str> = feedback
            .iter()
            .map(|f| f.claim_id.as_str())
            .chain(overrides.iter().map(|o| o.claim_id.as_str()))
            .collect();
        let verdict_overridden: HashSet<&str> = overrides
            .iter()
            .filter(|o| matches!(o.change, OverrideChange::Verdict { .. }))
            .map(|o| o.claim_id.as_str())
            .collect();

        CalibrationSignal {
            feedback_count: feedback.len(),
            override_count: overrides.len(),
            mean_accuracy_rating: mean_rating_by_type.get(&FeedbackType::Accuracy).copied(),
            mean_rating_by_type,
            verdict_override_rate: if reviewed.is_empty() {
                0.0
            } else {
                verdict_overridden.len() as f64 / reviewed.len() as f64
            },
            reviewed_analyses: reviewed.len(),
        }
    }

    /// Reload persisted records, skipping ids already present.
    pub async fn restore(
        &self,
        feedback: Vec<FeedbackRecord>,
        overrides: Vec<OverrideRecord>,
    ) -> usize {
        let mut loaded = 0;

        let mut stored = self.feedback.write().await;
        let known: HashSet<String> = stored.iter().map(|f| f.id.clone()).collect();
        for record in feedback {
            if !known.contains(&record.id) {
                stored.push(record);
                loaded += 1;
            }
        }
        stored.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        drop(stored);

        let mut stored = self.overrides.write().await;
        let known: HashSet<String> = stored.iter().map(|o| o.id.clone()).collect();
        for record in overrides {
            if !known.contains(&record.id) {
                stored.push(record);
                loaded += 1;
            }
        }
        stored.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        loaded
    }
}
