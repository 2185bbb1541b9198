//! # FailSafe claim analysis pipeline
//!
//! Analyzes a claim (free text or the text behind a URL) and produces a
//! verdict report with evidence, fallacies, AI-content assessment and an
//! argument graph.
//!
//! ## Architecture
//!
//! ```text
//! request → Canonicalizer → ReportCache ─(miss)→ Pipeline → Detectors (HTTP)
//!                                                   ↓
//!                                          ProvenanceLedger → Storage (SQLite)
//! ```
//!
//! Every pipeline stage is recorded in a hash-linked provenance ledger.
//! Reviewer feedback and overrides are layered on completed reports by the
//! collaboration ledger, and the robustness harness replays perturbed
//! inputs through the same pipeline.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use failsafe_pipeline::{AnalyzeRequest, Config, FactCheckService, RpcServer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let service = Arc::new(FactCheckService::from_config(config)?);
//!     let report = service.analyze(&AnalyzeRequest::text("The Earth is flat.")).await?;
//!     println!("{} ({:.2})", report.verdict, report.confidence);
//!     RpcServer::new(service).run().await?;
//!     Ok(())
//! }
//! ```

/// Fingerprint-keyed report cache with in-flight deduplication.
pub mod cache;
/// Input normalization, fingerprinting, URL extraction and language detection.
pub mod canonical;
/// Reviewer feedback and overrides.
pub mod collaboration;
/// Configuration loaded from environment variables.
pub mod config;
/// Detector contract, registry and HTTP adapter.
pub mod detectors;
/// Error types and result aliases.
pub mod error;
/// Structured argument graph construction and export.
pub mod graph;
/// Stage orchestration, scoring and reports.
pub mod pipeline;
/// Hash-linked provenance ledger.
pub mod provenance;
/// Adversarial perturbation suites.
pub mod robustness;
/// Service facade and JSON-RPC transport.
pub mod server;
/// SQLite document storage.
pub mod storage;

pub use canonical::AnalyzeRequest;
pub use config::Config;
pub use error::{AppError, AppResult};
pub use pipeline::{Report, Verdict};
pub use server::{FactCheckService, RpcServer, SharedState};
