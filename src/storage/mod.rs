//! Durable document store.
//!
//! Provenance entries, reports and collaboration records are persisted as
//! JSON documents so the in-memory ledgers can be rebuilt after a restart.

mod sqlite;

pub use sqlite::SqliteStorage;

use async_trait::async_trait;

use crate::collaboration::{FeedbackRecord, OverrideRecord};
use crate::error::StorageResult;
use crate::pipeline::Report;
use crate::provenance::{AnalysisTag, ProvenanceEntry};

/// Persistence operations used by the service facade.
///
/// Writes are idempotent on record id. Loads return records in the order
/// they were first written.
#[async_trait]
pub trait Storage: Send + Sync {
    // Provenance

    /// Persist entries; ids already stored are ignored.
    async fn save_provenance_entries(&self, entries: &[ProvenanceEntry]) -> StorageResult<()>;
    /// Every stored entry, parents before children.
    async fn load_provenance_entries(&self) -> StorageResult<Vec<ProvenanceEntry>>;

    // Reports

    async fn save_report(&self, report: &Report) -> StorageResult<()>;
    async fn get_report(&self, claim_id: &str) -> StorageResult<Option<Report>>;
    async fn load_reports(&self) -> StorageResult<Vec<Report>>;

    // Collaboration

    async fn save_feedback(&self, record: &FeedbackRecord) -> StorageResult<()>;
    async fn load_feedback(&self) -> StorageResult<Vec<FeedbackRecord>>;
    async fn save_override(&self, record: &OverrideRecord) -> StorageResult<()>;
    async fn load_overrides(&self) -> StorageResult<Vec<OverrideRecord>>;

    // Session / user links

    async fn save_tag(&self, tag: &AnalysisTag) -> StorageResult<()>;
    async fn load_tags(&self) -> StorageResult<Vec<AnalysisTag>>;
    /// Strip `user_id` from tags and collaboration records. Returns the
    /// number of rows changed.
    async fn anonymize_user(&self, user_id: &str) -> StorageResult<u64>;
}
