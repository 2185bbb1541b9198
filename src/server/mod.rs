//! Service facade and JSON-RPC transport.
//!
//! This module provides:
//! - [`FactCheckService`], which wires canonicalization, the report cache,
//!   the pipeline and both ledgers together
//! - method routing for the JSON-RPC surface
//! - a line-delimited JSON-RPC 2.0 server over stdio

mod handlers;
mod rpc;

pub use handlers::*;
pub use rpc::*;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::cache::CacheStats;
use crate::canonical::{
    AnalyzeRequest, Canonicalizer, Fingerprint, HttpContentExtractor, StopwordLanguageDetector,
};
use crate::collaboration::{
    CalibrationSignal, CollaborationLedger, FeedbackRecord, NewFeedback, NewOverride,
    OverrideRecord, ReportView,
};
use crate::config::Config;
use crate::detectors::{DetectorKind, DetectorRegistry, HttpDetector};
use crate::error::{AppError, AppResult, LedgerError};
use crate::pipeline::{Pipeline, Report, ReportCache};
use crate::provenance::{AnalysisTag, ProvenanceEntry, ProvenanceLedger, ProvenanceStats};
use crate::robustness::{
    synthetic_cases, AttackParams, AttackType, RobustnessHarness, RobustnessReport,
};
use crate::storage::Storage;

/// Largest synthetic robustness suite a caller may request.
pub const MAX_SYNTHETIC_CASES: usize = 500;

/// Counts of records reloaded from durable storage.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RestoreSummary {
    pub provenance_entries: usize,
    pub reports: usize,
    pub collaboration_records: usize,
    /// Session and user links.
    pub tags: usize,
}

/// What a provenance export is keyed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportScope {
    Session,
    User,
}

/// Provenance and review records for one session or one user.
#[derive(Debug, Clone, Serialize)]
pub struct ProvenanceExport {
    pub scope: ExportScope,
    pub id: String,
    pub exported_at: DateTime<Utc>,
    pub analyses: BTreeSet<String>,
    pub total_entries: usize,
    pub entries: Vec<ProvenanceEntry>,
    pub feedback: Vec<FeedbackRecord>,
    pub overrides: Vec<OverrideRecord>,
}

/// What anonymizing a user removed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnonymizeSummary {
    /// Analyses no longer linked to the user.
    pub analyses: usize,
    pub feedback: usize,
    pub overrides: usize,
    /// Rows rewritten in durable storage.
    pub stored_rows: u64,
}

/// Save every entry of one analysis. Missing analyses are skipped.
async fn persist_provenance(storage: &dyn Storage, ledger: &ProvenanceLedger, analysis_id: &str) {
    let entries = match ledger.entries_for(analysis_id).await {
        Ok(entries) => entries,
        Err(LedgerError::UnknownAnalysis { .. }) => return,
        Err(e) => {
            error!(analysis_id = %analysis_id, error = %e, "Failed to read provenance");
            return;
        }
    };
    if let Err(e) = storage.save_provenance_entries(&entries).await {
        error!(analysis_id = %analysis_id, error = %e, "Failed to persist provenance");
    }
}

/// Entry point for every caller-facing operation.
pub struct FactCheckService {
    config: Config,
    canonicalizer: Arc<Canonicalizer>,
    pipeline: Pipeline,
    cache: ReportCache,
    ledger: Arc<ProvenanceLedger>,
    collaboration: CollaborationLedger,
    /// Completed reports by claim id.
    reports: RwLock<HashMap<String, Arc<Report>>>,
    storage: Option<Arc<dyn Storage>>,
}

impl FactCheckService {
    /// Assemble a service from explicit collaborators.
    pub fn new(
        config: Config,
        canonicalizer: Canonicalizer,
        detectors: DetectorRegistry,
    ) -> AppResult<Self> {
        config.validate()?;
        let ledger = Arc::new(ProvenanceLedger::new());
        let pipeline = Pipeline::new(
            detectors,
            Arc::clone(&ledger),
            &config.pipeline,
            &config.request,
        )?;

        Ok(Self {
            cache: ReportCache::new(&config.cache),
            collaboration: CollaborationLedger::new(Arc::clone(&ledger)),
            canonicalizer: Arc::new(canonicalizer),
            pipeline,
            ledger,
            reports: RwLock::new(HashMap::new()),
            storage: None,
            config,
        })
    }

    /// Build the default service: HTTP detectors for every stage, HTTP
    /// content extraction and stopword language detection.
    pub fn from_config(config: Config) -> AppResult<Self> {
        let mut registry = DetectorRegistry::new();
        for kind in DetectorKind::ALL {
            if kind == DetectorKind::Translation && !config.detectors.enable_translation {
                continue;
            }
            let detector = HttpDetector::new(kind, &config.detectors, &config.request).map_err(
                |e| AppError::Config {
                    message: format!("Failed to create {} detector: {}", kind, e),
                },
            )?;
            registry = registry.register(Arc::new(detector));
        }

        let extractor =
            HttpContentExtractor::new(config.request.timeout_ms).map_err(|e| AppError::Config {
                message: format!("Failed to create content extractor: {}", e),
            })?;
        let canonicalizer =
            Canonicalizer::new(&config.pipeline, Arc::new(StopwordLanguageDetector::new()))
                .with_extractor(Arc::new(extractor));

        Self::new(config, canonicalizer, registry)
    }

    /// Persist reports, provenance and collaboration records to `storage`.
    pub fn with_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<ProvenanceLedger> {
        &self.ledger
    }

    // ========================================================================
    // Analysis
    // ========================================================================

    /// Analyze a claim, reusing a cached report for the same fingerprint.
    ///
    /// A failed analysis keeps its provenance, in memory and in storage.
    pub async fn analyze(&self, request: &AnalyzeRequest) -> AppResult<Arc<Report>> {
        let input = self.canonicalizer.canonicalize(request).await?;
        let fingerprint = input.fingerprint();
        let input = &input;
        let (session_id, user_id) = (&request.session_id, &request.user_id);

        let report = self
            .cache
            .get_or_compute(fingerprint, move || async move {
                let analysis_id = Uuid::new_v4().to_string();
                let result = self.pipeline.analyze_with_id(&analysis_id, input).await;
                if let Err(e) = &result {
                    warn!(analysis_id = %analysis_id, error = %e, "Analysis failed");
                    self.tag_analysis(AnalysisTag::new(
                        analysis_id.as_str(),
                        session_id.clone(),
                        user_id.clone(),
                    ))
                    .await;
                    if let Some(storage) = &self.storage {
                        persist_provenance(storage.as_ref(), &self.ledger, &analysis_id).await;
                    }
                }
                result
            })
            .await?;

        let inserted = {
            let mut reports = self.reports.write().await;
            if reports.contains_key(&report.claim_id) {
                false
            } else {
                reports.insert(report.claim_id.clone(), Arc::clone(&report));
                true
            }
        };
        if inserted {
            info!(
                claim_id = %report.claim_id,
                verdict = %report.verdict,
                confidence = report.confidence,
                "Report completed"
            );
            self.persist_report(&report).await;
        }
        self.tag_analysis(AnalysisTag::new(
            report.claim_id.as_str(),
            request.session_id.clone(),
            request.user_id.clone(),
        ))
        .await;

        Ok(report)
    }

    async fn persist_report(&self, report: &Report) {
        let Some(storage) = &self.storage else {
            return;
        };
        persist_provenance(storage.as_ref(), &self.ledger, &report.claim_id).await;
        if let Err(e) = storage.save_report(report).await {
            error!(claim_id = %report.claim_id, error = %e, "Failed to persist report");
        }
    }

    /// Link an analysis to a session or user, persisting new links.
    async fn tag_analysis(&self, tag: AnalysisTag) {
        if tag.is_empty() || !self.ledger.tag(&tag).await {
            return;
        }
        if let Some(storage) = &self.storage {
            if let Err(e) = storage.save_tag(&tag).await {
                error!(analysis_id = %tag.analysis_id, error = %e, "Failed to persist tag");
            }
        }
    }

    /// A completed report by claim id.
    pub async fn report(&self, claim_id: &str) -> AppResult<Arc<Report>> {
        if let Some(report) = self.reports.read().await.get(claim_id) {
            return Ok(Arc::clone(report));
        }
        if let Some(storage) = &self.storage {
            if let Some(report) = storage.get_report(claim_id).await? {
                let report = Arc::new(report);
                self.reports
                    .write()
                    .await
                    .insert(claim_id.to_string(), Arc::clone(&report));
                return Ok(report);
            }
        }
        Err(AppError::ReportNotFound {
            claim_id: claim_id.to_string(),
        })
    }

    /// A report with reviewer overrides applied.
    pub async fn current_report(&self, claim_id: &str) -> AppResult<ReportView> {
        let report = self.report(claim_id).await?;
        Ok(self.collaboration.current_view(&report).await)
    }

    // ========================================================================
    // Provenance
    // ========================================================================

    pub async fn provenance_chain(&self, entry_id: &str) -> AppResult<Vec<ProvenanceEntry>> {
        Ok(self.ledger.chain(entry_id).await?)
    }

    pub async fn verify_provenance(&self, entry_id: &str) -> AppResult<bool> {
        Ok(self.ledger.verify(entry_id).await?)
    }

    pub async fn provenance_stats(&self) -> ProvenanceStats {
        self.ledger.statistics().await
    }

    /// Everything recorded for analyses linked to a session.
    pub async fn export_session(&self, session_id: &str) -> AppResult<ProvenanceExport> {
        let session_id = required("session_id", session_id)?;
        let entries = self.ledger.entries_for_session(session_id).await;
        let export = ProvenanceExport {
            scope: ExportScope::Session,
            id: session_id.to_string(),
            exported_at: Utc::now(),
            analyses: self.ledger.analyses_for_session(session_id).await,
            total_entries: entries.len(),
            entries,
            feedback: self.collaboration.feedback_for_session(session_id).await,
            overrides: self.collaboration.overrides_for_session(session_id).await,
        };
        info!(
            session_id = %session_id,
            analyses = export.analyses.len(),
            entries = export.total_entries,
            "Session provenance exported"
        );
        Ok(export)
    }

    /// Everything recorded for analyses linked to a user.
    pub async fn export_user_data(&self, user_id: &str) -> AppResult<ProvenanceExport> {
        let user_id = required("user_id", user_id)?;
        let entries = self.ledger.entries_for_user(user_id).await;
        let export = ProvenanceExport {
            scope: ExportScope::User,
            id: user_id.to_string(),
            exported_at: Utc::now(),
            analyses: self.ledger.analyses_for_user(user_id).await,
            total_entries: entries.len(),
            entries,
            feedback: self.collaboration.feedback_for_user(user_id).await,
            overrides: self.collaboration.overrides_for_user(user_id).await,
        };
        info!(
            analyses = export.analyses.len(),
            entries = export.total_entries,
            "User provenance exported"
        );
        Ok(export)
    }

    /// Remove a user id from links and review records. Hash chains are
    /// untouched, so verification still passes afterwards.
    ///
    /// Storage is rewritten first; memory only changes once that succeeds.
    pub async fn anonymize_user_data(&self, user_id: &str) -> AppResult<AnonymizeSummary> {
        let user_id = required("user_id", user_id)?;
        let stored_rows = match &self.storage {
            Some(storage) => storage.anonymize_user(user_id).await?,
            None => 0,
        };
        let analyses = self.ledger.forget_user(user_id).await;
        let (feedback, overrides) = self.collaboration.anonymize_user(user_id).await;
        let summary = AnonymizeSummary {
            analyses,
            feedback,
            overrides,
            stored_rows,
        };
        info!(
            analyses = summary.analyses,
            feedback = summary.feedback,
            overrides = summary.overrides,
            stored_rows = summary.stored_rows,
            "User data anonymized"
        );
        Ok(summary)
    }

    // ========================================================================
    // Collaboration
    // ========================================================================

    /// Validate, persist, then apply feedback. Nothing is applied when
    /// persisting fails.
    pub async fn record_feedback(&self, feedback: NewFeedback) -> AppResult<FeedbackRecord> {
        let record = self.collaboration.prepare_feedback(feedback).await?;
        if let Some(storage) = &self.storage {
            storage.save_feedback(&record).await?;
        }
        self.collaboration.commit_feedback(record.clone()).await;
        self.tag_analysis(AnalysisTag::new(
            record.claim_id.as_str(),
            Some(record.session_id.clone()),
            record.user_id.clone(),
        ))
        .await;
        Ok(record)
    }

    /// Validate, persist, then apply an override. Nothing is applied when
    /// persisting fails.
    pub async fn record_override(&self, change: NewOverride) -> AppResult<OverrideRecord> {
        let record = self.collaboration.prepare_override(change).await?;
        if let Some(storage) = &self.storage {
            storage.save_override(&record).await?;
        }
        self.collaboration.commit_override(record.clone()).await;
        self.tag_analysis(AnalysisTag::new(
            record.claim_id.as_str(),
            Some(record.session_id.clone()),
            record.user_id.clone(),
        ))
        .await;
        Ok(record)
    }

    pub async fn calibration_signal(&self) -> CalibrationSignal {
        self.collaboration.calibration_signal().await
    }

    // ========================================================================
    // Cache administration
    // ========================================================================

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Drop the cached report for a hex fingerprint.
    pub fn invalidate_cache(&self, fingerprint: &str) -> AppResult<bool> {
        let fingerprint =
            Fingerprint::from_hex(fingerprint).ok_or_else(|| AppError::InvalidRequest {
                message: format!("Invalid fingerprint: {}", fingerprint),
            })?;
        Ok(self.cache.invalidate(&fingerprint))
    }

    pub fn clear_cache(&self) -> usize {
        self.cache.clear()
    }

    // ========================================================================
    // Robustness
    // ========================================================================

    /// Run a perturbation suite. Bypasses the report cache.
    pub async fn run_robustness(
        &self,
        inputs: &[String],
        attack_types: &[AttackType],
        params: &AttackParams,
    ) -> RobustnessReport {
        RobustnessHarness::new(Arc::clone(&self.canonicalizer), self.pipeline.clone())
            .run_suite(inputs, attack_types, params)
            .await
    }

    /// Run `count` generated cases drawn from built-in claims and attack
    /// configurations. Bypasses the report cache.
    pub async fn run_synthetic_robustness(
        &self,
        count: usize,
        seed: u64,
    ) -> AppResult<RobustnessReport> {
        if count == 0 || count > MAX_SYNTHETIC_CASES {
            return Err(AppError::InvalidRequest {
                message: format!(
                    "count must be between 1 and {}, got {}",
                    MAX_SYNTHETIC_CASES, count
                ),
            });
        }
        let cases = synthetic_cases(count, seed);
        Ok(
            RobustnessHarness::new(Arc::clone(&self.canonicalizer), self.pipeline.clone())
                .run_cases(&cases)
                .await,
        )
    }

    // ========================================================================
    // Durability
    // ========================================================================

    /// Reload ledgers and reports from storage. A no-op without storage.
    pub async fn restore(&self) -> AppResult<RestoreSummary> {
        let Some(storage) = &self.storage else {
            return Ok(RestoreSummary::default());
        };

        let entries = storage.load_provenance_entries().await?;
        let provenance_entries = self.ledger.restore(entries).await;

        let loaded = storage.load_reports().await?;
        let mut reports = self.reports.write().await;
        let before = reports.len();
        for report in loaded {
            reports
                .entry(report.claim_id.clone())
                .or_insert_with(|| Arc::new(report));
        }
        let restored_reports = reports.len() - before;
        drop(reports);

        let feedback = storage.load_feedback().await?;
        let overrides = storage.load_overrides().await?;
        let collaboration_records = self.collaboration.restore(feedback, overrides).await;

        let tags = storage.load_tags().await?;
        let tags = self.ledger.restore_tags(&tags).await;

        let summary = RestoreSummary {
            provenance_entries,
            reports: restored_reports,
            collaboration_records,
            tags,
        };
        info!(
            provenance_entries = summary.provenance_entries,
            reports = summary.reports,
            collaboration_records = summary.collaboration_records,
            tags = summary.tags,
            "State restored from storage"
        );
        Ok(summary)
    }
}

fn required<'a>(field: &str, value: &'a str) -> AppResult<&'a str> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AppError::InvalidRequest {
            message: format!("{} must not be empty", field),
        });
    }
    Ok(value)
}

/// Shared service handle
pub type SharedState = Arc<FactCheckService>;
