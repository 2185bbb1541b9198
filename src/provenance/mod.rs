//! Append-only, hash-linked provenance ledger.
//!
//! Each analysis owns a DAG rooted at a single `INPUT` entry and closed by an
//! `OUTPUT` sink. Every entry's `data_hash` covers its own content plus the
//! hashes of its parents, so editing any ancestor is caught by [`verify`].
//!
//! [`verify`]: ProvenanceLedger::verify

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};

/// Identifier of a provenance entry.
pub type EntryId = String;

// ============================================================================
// Entry Types
// ============================================================================

/// Pipeline step an entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryKind {
    Input,
    Processing,
    Evidence,
    Verification,
    Analysis,
    Output,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Input => "INPUT",
            EntryKind::Processing => "PROCESSING",
            EntryKind::Evidence => "EVIDENCE",
            EntryKind::Verification => "VERIFICATION",
            EntryKind::Analysis => "ANALYSIS",
            EntryKind::Output => "OUTPUT",
        }
    }
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of the recorded step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Ok,
    /// A non-essential stage failed and its section was dropped.
    Degraded,
    /// An essential stage failed and the analysis was aborted.
    Failed,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Ok => "ok",
            EntryStatus::Degraded => "degraded",
            EntryStatus::Failed => "failed",
        }
    }
}

/// A committed ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceEntry {
    pub id: EntryId,
    pub analysis_id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: EntryKind,
    pub operation: String,
    pub status: EntryStatus,
    pub parent_ids: BTreeSet<EntryId>,
    pub payload: serde_json::Value,
    /// Hex SHA-256 over content and parent hashes.
    pub data_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    pub processing_time_ms: u64,
}

/// Entry contents supplied by a caller. The ledger assigns id, timestamp and
/// hash.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub analysis_id: String,
    pub kind: EntryKind,
    pub operation: String,
    pub status: EntryStatus,
    pub parent_ids: BTreeSet<EntryId>,
    pub payload: serde_json::Value,
    pub confidence: Option<f64>,
    pub processing_time_ms: u64,
}

impl NewEntry {
    pub fn new(analysis_id: impl Into<String>, kind: EntryKind, operation: impl Into<String>) -> Self {
        Self {
            analysis_id: analysis_id.into(),
            kind,
            operation: operation.into(),
            status: EntryStatus::Ok,
            parent_ids: BTreeSet::new(),
            payload: serde_json::Value::Null,
            confidence: None,
            processing_time_ms: 0,
        }
    }

    /// Root entry of an analysis.
    pub fn input(analysis_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self::new(analysis_id, EntryKind::Input, "canonicalize").with_payload(payload)
    }

    pub fn with_parent(mut self, parent_id: impl Into<EntryId>) -> Self {
        self.parent_ids.insert(parent_id.into());
        self
    }

    pub fn with_parents<I, S>(mut self, parent_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<EntryId>,
    {
        self.parent_ids.extend(parent_ids.into_iter().map(Into::into));
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_status(mut self, status: EntryStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_processing_time(mut self, processing_time_ms: u64) -> Self {
        self.processing_time_ms = processing_time_ms;
        self
    }
}

// ============================================================================
// Hashing
// ============================================================================

fn write_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

impl ProvenanceEntry {
    /// Hash this entry's recorded fields together with its parents' hashes.
    ///
    /// Covers everything except `data_hash` itself. `parent_hashes` must be
    /// supplied in parent-id order. Payload keys are serialized sorted, so
    /// logically equal payloads hash equally.
    pub fn compute_hash<'a>(&self, parent_hashes: impl IntoIterator<Item = &'a str>) -> String {
        let mut hasher = Sha256::new();
        write_field(&mut hasher, self.id.as_bytes());
        write_field(&mut hasher, self.analysis_id.as_bytes());
        write_field(
            &mut hasher,
            self.timestamp
                .to_rfc3339_opts(SecondsFormat::Nanos, true)
                .as_bytes(),
        );
        write_field(&mut hasher, self.kind.as_str().as_bytes());
        write_field(&mut hasher, self.operation.as_bytes());
        write_field(&mut hasher, self.status.as_str().as_bytes());
        write_field(&mut hasher, self.payload.to_string().as_bytes());
        match self.confidence {
            Some(c) => {
                hasher.update([1u8]);
                hasher.update(c.to_bits().to_le_bytes());
            }
            None => hasher.update([0u8]),
        }
        hasher.update(self.processing_time_ms.to_le_bytes());
        for parent_hash in parent_hashes {
            write_field(&mut hasher, parent_hash.as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

// ============================================================================
// Session / User Tags
// ============================================================================

/// Links an analysis to the session and user that touched it.
///
/// Tags sit outside the hash chain, so unlinking a user never invalidates a
/// verified chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisTag {
    pub analysis_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl AnalysisTag {
    pub fn new(
        analysis_id: impl Into<String>,
        session_id: Option<String>,
        user_id: Option<String>,
    ) -> Self {
        Self {
            analysis_id: analysis_id.into(),
            session_id: session_id.filter(|s| !s.is_empty()),
            user_id: user_id.filter(|u| !u.is_empty()),
        }
    }

    /// Whether the tag links the analysis to anything.
    pub fn is_empty(&self) -> bool {
        self.session_id.is_none() && self.user_id.is_none()
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Confidence buckets: high ≥ 0.8, medium ≥ 0.6, low otherwise.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceDistribution {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

/// Ledger-wide summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceStats {
    pub total_entries: usize,
    pub analyses: usize,
    pub by_kind: BTreeMap<String, usize>,
    pub by_status: BTreeMap<String, usize>,
    pub average_processing_time_ms: f64,
    pub confidence_distribution: ConfidenceDistribution,
}

// ============================================================================
// Ledger
// ============================================================================

#[derive(Debug, Default)]
struct AnalysisLog {
    /// Insertion order, which is also a topological order.
    entries: Vec<ProvenanceEntry>,
    positions: HashMap<EntryId, usize>,
    root: Option<EntryId>,
}

impl AnalysisLog {
    fn get(&self, id: &str) -> Option<&ProvenanceEntry> {
        self.positions.get(id).map(|&i| &self.entries[i])
    }

    fn push(&mut self, entry: ProvenanceEntry) {
        if entry.kind == EntryKind::Input && self.root.is_none() {
            self.root = Some(entry.id.clone());
        }
        self.positions.insert(entry.id.clone(), self.entries.len());
        self.entries.push(entry);
    }

    /// The entry and all its ancestors in insertion order.
    fn ancestry(&self, entry_id: &str) -> Vec<ProvenanceEntry> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut stack = vec![entry_id];
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            if let Some(entry) = self.get(id) {
                stack.extend(entry.parent_ids.iter().map(String::as_str));
            }
        }
        self.entries
            .iter()
            .filter(|e| seen.contains(e.id.as_str()))
            .cloned()
            .collect()
    }
}

/// Shared provenance ledger.
///
/// Appends to one analysis serialize on that analysis' lock only.
#[derive(Debug, Default)]
pub struct ProvenanceLedger {
    analyses: RwLock<HashMap<String, Arc<Mutex<AnalysisLog>>>>,
    index: RwLock<HashMap<EntryId, String>>,
    /// Session id to analysis ids.
    sessions: RwLock<HashMap<String, BTreeSet<String>>>,
    /// User id to analysis ids.
    users: RwLock<HashMap<String, BTreeSet<String>>>,
}

impl ProvenanceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    async fn log(&self, analysis_id: &str) -> Option<Arc<Mutex<AnalysisLog>>> {
        self.analyses.read().await.get(analysis_id).cloned()
    }

    async fn log_for_entry(&self, entry_id: &str) -> LedgerResult<Arc<Mutex<AnalysisLog>>> {
        let analysis_id = self
            .index
            .read()
            .await
            .get(entry_id)
            .cloned()
            .ok_or_else(|| LedgerError::UnknownEntry {
                entry_id: entry_id.to_string(),
            })?;
        self.log(&analysis_id)
            .await
            .ok_or(LedgerError::UnknownAnalysis { analysis_id })
    }

    /// Append an entry and return its id.
    pub async fn append(&self, new: NewEntry) -> LedgerResult<EntryId> {
        let log = if new.kind == EntryKind::Input {
            if !new.parent_ids.is_empty() {
                return Err(LedgerError::RootWithParents {
                    analysis_id: new.analysis_id,
                });
            }
            let mut analyses = self.analyses.write().await;
            analyses
                .entry(new.analysis_id.clone())
                .or_default()
                .clone()
        } else {
            if new.parent_ids.is_empty() {
                return Err(LedgerError::MissingParent {
                    kind: new.kind.to_string(),
                });
            }
            self.log(&new.analysis_id)
                .await
                .ok_or_else(|| LedgerError::RootRequired {
                    analysis_id: new.analysis_id.clone(),
                })?
        };

        let mut log = log.lock().await;

        if new.kind == EntryKind::Input && log.root.is_some() {
            return Err(LedgerError::DuplicateRoot {
                analysis_id: new.analysis_id,
            });
        }

        let mut parent_hashes = Vec::with_capacity(new.parent_ids.len());
        for parent_id in &new.parent_ids {
            let Some(parent) = log.get(parent_id) else {
                return Err(if self.index.read().await.contains_key(parent_id) {
                    LedgerError::ParentOutsideAnalysis {
                        parent_id: parent_id.clone(),
                        analysis_id: new.analysis_id,
                    }
                } else {
                    LedgerError::UnknownEntry {
                        entry_id: parent_id.clone(),
                    }
                });
            };
            if parent.kind == EntryKind::Output {
                return Err(LedgerError::ParentIsSink {
                    parent_id: parent_id.clone(),
                });
            }
            parent_hashes.push(parent.data_hash.clone());
        }

        let mut entry = ProvenanceEntry {
            id: Uuid::new_v4().to_string(),
            analysis_id: new.analysis_id,
            timestamp: Utc::now(),
            kind: new.kind,
            operation: new.operation,
            status: new.status,
            parent_ids: new.parent_ids,
            payload: new.payload,
            data_hash: String::new(),
            confidence: new.confidence,
            processing_time_ms: new.processing_time_ms,
        };
        entry.data_hash = entry.compute_hash(parent_hashes.iter().map(String::as_str));
        let id = entry.id.clone();

        debug!(
            analysis_id = %entry.analysis_id,
            entry_id = %id,
            kind = %entry.kind,
            operation = %entry.operation,
            status = entry.status.as_str(),
            "Provenance entry appended"
        );

        self.index
            .write()
            .await
            .insert(id.clone(), entry.analysis_id.clone());
        log.push(entry);

        Ok(id)
    }

    /// Fetch one entry.
    pub async fn entry(&self, entry_id: &str) -> LedgerResult<ProvenanceEntry> {
        let log = self.log_for_entry(entry_id).await?;
        let log = log.lock().await;
        log.get(entry_id)
            .cloned()
            .ok_or_else(|| LedgerError::UnknownEntry {
                entry_id: entry_id.to_string(),
            })
    }

    /// Ancestors of `entry_id` in topological order, from the INPUT root to
    /// the entry itself.
    pub async fn chain(&self, entry_id: &str) -> LedgerResult<Vec<ProvenanceEntry>> {
        let log = self.log_for_entry(entry_id).await?;
        let log = log.lock().await;
        if log.get(entry_id).is_none() {
            return Err(LedgerError::UnknownEntry {
                entry_id: entry_id.to_string(),
            });
        }
        Ok(log.ancestry(entry_id))
    }

    /// EVIDENCE entries among the ancestors of `entry_id`.
    pub async fn evidence_chain(&self, entry_id: &str) -> LedgerResult<Vec<ProvenanceEntry>> {
        Ok(self
            .chain(entry_id)
            .await?
            .into_iter()
            .filter(|e| e.kind == EntryKind::Evidence)
            .collect())
    }

    /// Recompute every hash in the chain of `entry_id`.
    ///
    /// Returns `false` if any stored hash disagrees with its content or its
    /// parents' stored hashes.
    pub async fn verify(&self, entry_id: &str) -> LedgerResult<bool> {
        let chain = self.chain(entry_id).await?;
        let hashes: HashMap<&str, &str> = chain
            .iter()
            .map(|e| (e.id.as_str(), e.data_hash.as_str()))
            .collect();

        for entry in &chain {
            let mut parent_hashes = Vec::with_capacity(entry.parent_ids.len());
            for parent_id in &entry.parent_ids {
                match hashes.get(parent_id.as_str()) {
                    Some(hash) => parent_hashes.push(*hash),
                    None => {
                        warn!(entry_id = %entry.id, parent_id = %parent_id, "Dangling parent in chain");
                        return Ok(false);
                    }
                }
            }
            let expected = entry.compute_hash(parent_hashes);
            if expected != entry.data_hash {
                warn!(
                    entry_id = %entry.id,
                    kind = %entry.kind,
                    "Provenance hash mismatch"
                );
                return Ok(false);
            }
        }

        let roots = chain.iter().filter(|e| e.kind == EntryKind::Input).count();
        Ok(roots == 1 && chain.first().map(|e| e.kind) == Some(EntryKind::Input))
    }

    /// All entries of an analysis in insertion order.
    pub async fn entries_for(&self, analysis_id: &str) -> LedgerResult<Vec<ProvenanceEntry>> {
        let log = self
            .log(analysis_id)
            .await
            .ok_or_else(|| LedgerError::UnknownAnalysis {
                analysis_id: analysis_id.to_string(),
            })?;
        let log = log.lock().await;
        Ok(log.entries.clone())
    }

    /// Root INPUT entry id of an analysis.
    pub async fn root_of(&self, analysis_id: &str) -> Option<EntryId> {
        let log = self.log(analysis_id).await?;
        let log = log.lock().await;
        log.root.clone()
    }

    /// The OUTPUT entry of an analysis, if it completed.
    pub async fn output_of(&self, analysis_id: &str) -> Option<ProvenanceEntry> {
        let log = self.log(analysis_id).await?;
        let log = log.lock().await;
        log.entries
            .iter()
            .rev()
            .find(|e| e.kind == EntryKind::Output)
            .cloned()
    }

    /// Whether the analysis exists and reached an OUTPUT entry.
    pub async fn has_output(&self, analysis_id: &str) -> bool {
        self.output_of(analysis_id).await.is_some()
    }

    /// Load previously persisted entries verbatim.
    ///
    /// Hashes are not recomputed, so a tampered store is caught by
    /// [`verify`](Self::verify). Entries whose id is already present are
    /// skipped. Returns the number of entries loaded.
    pub async fn restore(&self, entries: Vec<ProvenanceEntry>) -> usize {
        let mut loaded = 0;
        for entry in entries {
            if self.index.read().await.contains_key(&entry.id) {
                continue;
            }
            let log = {
                let mut analyses = self.analyses.write().await;
                analyses
                    .entry(entry.analysis_id.clone())
                    .or_default()
                    .clone()
            };
            self.index
                .write()
                .await
                .insert(entry.id.clone(), entry.analysis_id.clone());
            log.lock().await.push(entry);
            loaded += 1;
        }
        loaded
    }

    /// Link an analysis to a session and/or user.
    ///
    /// Returns `true` if the tag added a link that was not already known.
    pub async fn tag(&self, tag: &AnalysisTag) -> bool {
        let mut added = false;
        if let Some(session_id) = &tag.session_id {
            added |= self
                .sessions
                .write()
                .await
                .entry(session_id.clone())
                .or_default()
                .insert(tag.analysis_id.clone());
        }
        if let Some(user_id) = &tag.user_id {
            added |= self
                .users
                .write()
                .await
                .entry(user_id.clone())
                .or_default()
                .insert(tag.analysis_id.clone());
        }
        if added {
            debug!(
                analysis_id = %tag.analysis_id,
                session_id = ?tag.session_id,
                user_id = ?tag.user_id,
                "Analysis tagged"
            );
        }
        added
    }

    /// Reload persisted tags. Returns how many added a new link.
    pub async fn restore_tags(&self, tags: &[AnalysisTag]) -> usize {
        let mut loaded = 0;
        for tag in tags {
            if self.tag(tag).await {
                loaded += 1;
            }
        }
        loaded
    }

    async fn entries_of(&self, analysis_ids: BTreeSet<String>) -> Vec<ProvenanceEntry> {
        let mut entries = Vec::new();
        for analysis_id in analysis_ids {
            if let Some(log) = self.log(&analysis_id).await {
                entries.extend(log.lock().await.entries.iter().cloned());
            }
        }
        // stable, so entries sharing a timestamp keep insertion order
        entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        entries
    }

    /// Analyses linked to a session.
    pub async fn analyses_for_session(&self, session_id: &str) -> BTreeSet<String> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Analyses linked to a user.
    pub async fn analyses_for_user(&self, user_id: &str) -> BTreeSet<String> {
        self.users
            .read()
            .await
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Every entry of every analysis linked to `session_id`, oldest first.
    pub async fn entries_for_session(&self, session_id: &str) -> Vec<ProvenanceEntry> {
        let ids = self.analyses_for_session(session_id).await;
        self.entries_of(ids).await
    }

    /// Every entry of every analysis linked to `user_id`, oldest first.
    pub async fn entries_for_user(&self, user_id: &str) -> Vec<ProvenanceEntry> {
        let ids = self.analyses_for_user(user_id).await;
        self.entries_of(ids).await
    }

    /// Drop every link to `user_id`. Entries and session links stay.
    ///
    /// Returns the number of analyses unlinked.
    pub async fn forget_user(&self, user_id: &str) -> usize {
        let removed = self
            .users
            .write()
            .await
            .remove(user_id)
            .map(|ids| ids.len())
            .unwrap_or(0);
        if removed > 0 {
            info!(analyses = removed, "User unlinked from provenance");
        }
        removed
    }

    /// Totals by kind and status, mean processing time, confidence buckets.
    pub async fn statistics(&self) -> ProvenanceStats {
        let logs: Vec<Arc<Mutex<AnalysisLog>>> =
            self.analyses.read().await.values().cloned().collect();

        let mut stats = ProvenanceStats {
            analyses: logs.len(),
            ..Default::default()
        };
        let mut total_time: u64 = 0;

        for log in logs {
            let log = log.lock().await;
            for entry in &log.entries {
                stats.total_entries += 1;
                total_time += entry.processing_time_ms;
                *stats.by_kind.entry(entry.kind.to_string()).or_default() += 1;
                *stats
                    .by_status
                    .entry(entry.status.as_str().to_string())
                    .or_default() += 1;
                if let Some(confidence) = entry.confidence {
                    let bucket = &mut stats.confidence_distribution;
                    if confidence >= 0.8 {
                        bucket.high += 1;
                    } else if confidence >= 0.6 {
                        bucket.medium += 1;
                    } else {
                        bucket.low += 1;
                    }
                }
            }
        }

        if stats.total_entries > 0 {
            stats.average_processing_time_ms = total_time as f64 / stats.total_entries as f64;
        }
        stats
    }
}
