use async_trait::async_trait;
use serde::de::DeserializeOwned;
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::{debug, info};

use super::Storage;
use crate::collaboration::{FeedbackRecord, OverrideRecord};
use crate::config::DatabaseConfig;
use crate::error::{StorageError, StorageResult};
use crate::pipeline::Report;
use crate::provenance::{AnalysisTag, ProvenanceEntry};

/// Static migrator that embeds migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// SQLite-backed storage implementation
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) the database file and run migrations.
    pub async fn new(config: &DatabaseConfig) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Connection {
                message: format!("Failed to create database directory: {}", e),
            })?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", config.path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Private in-memory database, mainly for tests.
    ///
    /// Limited to one connection since every connection to `:memory:` opens
    /// its own database.
    pub async fn new_in_memory() -> StorageResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to open in-memory database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Run database migrations using embedded sqlx migrations
    async fn run_migrations(&self) -> StorageResult<()> {
        info!("Running database migrations...");

        MIGRATOR.run(&self.pool).await.map_err(|e| StorageError::Migration {
            message: format!("Failed to run migrations: {}", e),
        })?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying pool for advanced queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn load_documents<T: DeserializeOwned>(&self, sql: &str) -> StorageResult<Vec<T>> {
        let rows: Vec<DocumentRow> = sqlx::query_as(sql).fetch_all(&self.pool).await?;
        rows.into_iter().map(DocumentRow::decode).collect()
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn save_provenance_entries(&self, entries: &[ProvenanceEntry]) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;
        for entry in entries {
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO provenance_entries (id, analysis_id, kind, timestamp, document)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(&entry.id)
            .bind(&entry.analysis_id)
            .bind(entry.kind.as_str())
            .bind(entry.timestamp.to_rfc3339())
            .bind(serde_json::to_string(entry)?)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        debug!(count = entries.len(), "Provenance entries persisted");
        Ok(())
    }

    async fn load_provenance_entries(&self) -> StorageResult<Vec<ProvenanceEntry>> {
        self.load_documents("SELECT document FROM provenance_entries ORDER BY seq ASC")
            .await
    }

    async fn save_report(&self, report: &Report) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO reports (claim_id, fingerprint, verdict, confidence, created_at, document)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&report.claim_id)
        .bind(report.fingerprint.to_hex())
        .bind(report.verdict.as_str())
        .bind(report.confidence)
        .bind(report.created_at.to_rfc3339())
        .bind(serde_json::to_string(report)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_report(&self, claim_id: &str) -> StorageResult<Option<Report>> {
        let row: Option<DocumentRow> =
            sqlx::query_as("SELECT document FROM reports WHERE claim_id = ?")
                .bind(claim_id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(DocumentRow::decode).transpose()
    }

    async fn load_reports(&self) -> StorageResult<Vec<Report>> {
        self.load_documents("SELECT document FROM reports ORDER BY created_at ASC")
            .await
    }

    async fn save_feedback(&self, record: &FeedbackRecord) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO feedback (id, claim_id, feedback_type, rating, created_at, document)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.claim_id)
        .bind(record.feedback_type.as_str())
        .bind(i64::from(record.rating))
        .bind(record.created_at.to_rfc3339())
        .bind(serde_json::to_string(record)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_feedback(&self) -> StorageResult<Vec<FeedbackRecord>> {
        self.load_documents("SELECT document FROM feedback ORDER BY created_at ASC")
            .await
    }

    async fn save_override(&self, record: &OverrideRecord) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO overrides (id, claim_id, created_at, document)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.claim_id)
        .bind(record.created_at.to_rfc3339())
        .bind(serde_json::to_string(record)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_overrides(&self) -> StorageResult<Vec<OverrideRecord>> {
        self.load_documents("SELECT document FROM overrides ORDER BY created_at ASC")
            .await
    }

    async fn save_tag(&self, tag: &AnalysisTag) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO analysis_tags (analysis_id, session_id, user_id)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(&tag.analysis_id)
        .bind(tag.session_id.as_deref().unwrap_or(""))
        .bind(tag.user_id.as_deref().unwrap_or(""))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_tags(&self) -> StorageResult<Vec<AnalysisTag>> {
        let rows: Vec<TagRow> = sqlx::query_as(
            "SELECT analysis_id, session_id, user_id FROM analysis_tags ORDER BY seq ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| AnalysisTag::new(row.analysis_id, Some(row.session_id), Some(row.user_id)))
            .filter(|tag| !tag.is_empty())
            .collect())
    }

    async fn anonymize_user(&self, user_id: &str) -> StorageResult<u64> {
        let mut tx = self.pool.begin().await?;
        let mut changed = 0;

        // Rows that would collide with an existing anonymous tag are deleted below.
        changed += sqlx::query("UPDATE OR IGNORE analysis_tags SET user_id = '' WHERE user_id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        changed += sqlx::query("DELETE FROM analysis_tags WHERE user_id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        for table in ["feedback", "overrides"] {
            let sql = format!(
                "UPDATE {} SET document = json_set(document, '$.user_id', NULL) \
                 WHERE json_extract(document, '$.user_id') = ?",
                table
            );
            changed += sqlx::query(&sql)
                .bind(user_id)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }

        tx.commit().await?;
        debug!(rows = changed, "User anonymized in storage");
        Ok(changed)
    }
}

// Internal row type for SQLx mapping
#[derive(sqlx::FromRow)]
struct DocumentRow {
    document: String,
}

impl DocumentRow {
    fn decode<T: DeserializeOwned>(self) -> StorageResult<T> {
        Ok(serde_json::from_str(&self.document)?)
    }
}

#[derive(sqlx::FromRow)]
struct TagRow {
    analysis_id: String,
    session_id: String,
    user_id: String,
}
