use serde::Serialize;
use thiserror::Error;

use crate::detectors::DetectorKind;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    #[error("Provenance error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Collaboration error: {0}")]
    Collaboration(#[from] CollaborationError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Report not found: {claim_id}")]
    ReportNotFound { claim_id: String },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Errors raised by a single detector adapter call.
///
/// Cloneable because one failed computation is fanned out to every cache
/// waiter subscribed to the same fingerprint.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DetectorError {
    #[error("Detector unavailable: {message} (retries: {retries})")]
    Unavailable { message: String, retries: u32 },

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Detector returned {actual} result for {expected} stage")]
    KindMismatch {
        expected: DetectorKind,
        actual: DetectorKind,
    },
}

impl From<reqwest::Error> for DetectorError {
    fn from(err: reqwest::Error) -> Self {
        DetectorError::Transport {
            message: err.to_string(),
        }
    }
}

/// Provenance ledger errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LedgerError {
    #[error("Provenance entry not found: {entry_id}")]
    UnknownEntry { entry_id: String },

    #[error("Analysis not found: {analysis_id}")]
    UnknownAnalysis { analysis_id: String },

    #[error("Entry of kind {kind} requires at least one parent")]
    MissingParent { kind: String },

    #[error("Analysis {analysis_id} already has an INPUT root")]
    DuplicateRoot { analysis_id: String },

    #[error("Analysis {analysis_id} must start with an INPUT entry")]
    RootRequired { analysis_id: String },

    #[error("INPUT entry for {analysis_id} cannot have parents")]
    RootWithParents { analysis_id: String },

    #[error("Entry {parent_id} is an OUTPUT sink and cannot have children")]
    ParentIsSink { parent_id: String },

    #[error("Parent {parent_id} does not belong to analysis {analysis_id}")]
    ParentOutsideAnalysis {
        parent_id: String,
        analysis_id: String,
    },
}

/// Errors produced while analyzing a claim.
///
/// Cloneable so the cache can hand the same failure to every waiter.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AnalysisError {
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Analysis failed at {stage} stage: {source}")]
    AnalysisFailed {
        stage: DetectorKind,
        #[source]
        source: DetectorError,
    },

    #[error("Analysis timed out after {timeout_ms}ms")]
    AnalysisTimeout { timeout_ms: u64 },

    #[error("Cache inconsistency: {message}")]
    CacheInconsistency { message: String },

    #[error("Analysis was cancelled before completion")]
    Cancelled,

    #[error("Provenance error: {0}")]
    Provenance(#[from] LedgerError),
}

/// Human feedback / override errors
#[derive(Debug, Error)]
pub enum CollaborationError {
    #[error("Unknown analysis: {claim_id}")]
    UnknownAnalysis { claim_id: String },

    #[error("Validation failed: {field} - {reason}")]
    Validation { field: String, reason: String },
}

/// Storage layer errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database connection failed: {message}")]
    Connection { message: String },

    #[error("Query failed: {message}")]
    Query { message: String },

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Stable error codes surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,
    NotFound,
    RateLimitExceeded,
    InternalError,
    ServiceUnavailable,
}

impl ErrorCode {
    /// Wire representation of the code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Caller-facing error body: `{code, message, details}`.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl AppError {
    /// Map the error onto the stable wire code.
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Analysis(err) => match err {
                AnalysisError::InvalidInput { .. } => ErrorCode::ValidationError,
                AnalysisError::AnalysisFailed { source, .. } => match source {
                    DetectorError::Api { status: 429, .. } => ErrorCode::RateLimitExceeded,
                    _ => ErrorCode::ServiceUnavailable,
                },
                AnalysisError::AnalysisTimeout { .. } => ErrorCode::ServiceUnavailable,
                AnalysisError::Cancelled => ErrorCode::ServiceUnavailable,
                AnalysisError::CacheInconsistency { .. } | AnalysisError::Provenance(_) => {
                    ErrorCode::InternalError
                }
            },
            AppError::Ledger(LedgerError::UnknownEntry { .. })
            | AppError::Ledger(LedgerError::UnknownAnalysis { .. }) => ErrorCode::NotFound,
            AppError::Ledger(_) => ErrorCode::InternalError,
            AppError::Collaboration(CollaborationError::UnknownAnalysis { .. }) => {
                ErrorCode::NotFound
            }
            AppError::Collaboration(CollaborationError::Validation { .. }) => {
                ErrorCode::ValidationError
            }
            AppError::ReportNotFound { .. } => ErrorCode::NotFound,
            AppError::InvalidRequest { .. } => ErrorCode::ValidationError,
            AppError::Config { .. } | AppError::Storage(_) | AppError::Internal { .. } => {
                ErrorCode::InternalError
            }
        }
    }

    /// Build the caller-facing body. Internal failures get a generic message
    /// so storage and configuration details never leak.
    pub fn to_response(&self) -> ErrorResponse {
        let code = self.code();
        let message = match code {
            ErrorCode::InternalError => "Internal error".to_string(),
            _ => self.to_string(),
        };
        let details = match self {
            AppError::Analysis(AnalysisError::AnalysisFailed { stage, .. }) => {
                Some(serde_json::json!({ "stage": stage.as_str() }))
            }
            AppError::Analysis(AnalysisError::AnalysisTimeout { timeout_ms }) => {
                Some(serde_json::json!({ "timeout_ms": timeout_ms }))
            }
            AppError::Collaboration(CollaborationError::Validation { field, .. }) => {
                Some(serde_json::json!({ "field": field }))
            }
            _ => None,
        };
        ErrorResponse {
            code,
            message,
            details,
        }
    }
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for analysis operations
pub type AnalysisResult<T> = Result<T, AnalysisError>;

/// Result type alias for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Result type alias for feedback and override operations
pub type CollaborationResult<T> = Result<T, CollaborationError>;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for a single detector call
pub type DetectorOutcome<T> = Result<T, DetectorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detector_error_display() {
        let err = DetectorError::Unavailable {
            message: "server down".to_string(),
            retries: 3,
        };
        assert_eq!(err.to_string(), "Detector unavailable: server down (retries: 3)");

        let err = DetectorError::Timeout { timeout_ms: 5000 };
        assert_eq!(err.to_string(), "Request timeout after 5000ms");

        let err = DetectorError::KindMismatch {
            expected: DetectorKind::Evidence,
            actual: DetectorKind::Fallacy,
        };
        assert_eq!(
            err.to_string(),
            "Detector returned fallacy result for evidence stage"
        );
    }

    #[test]
    fn test_analysis_error_display() {
        let err = AnalysisError::AnalysisFailed {
            stage: DetectorKind::Evidence,
            source: DetectorError::Api {
                status: 502,
                message: "bad gateway".to_string(),
            },
        };
        assert_eq!(
            err.to_string(),
            "Analysis failed at evidence stage: API error: 502 - bad gateway"
        );

        let err = AnalysisError::AnalysisTimeout { timeout_ms: 100 };
        assert_eq!(err.to_string(), "Analysis timed out after 100ms");
    }

    #[test]
    fn test_invalid_input_maps_to_validation_error() {
        let err: AppError = AnalysisError::InvalidInput {
            message: "empty".to_string(),
        }
        .into();
        assert_eq!(err.code(), ErrorCode::ValidationError);
        assert_eq!(err.code().as_str(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_rate_limited_detector_maps_to_rate_limit_code() {
        let err: AppError = AnalysisError::AnalysisFailed {
            stage: DetectorKind::Verification,
            source: DetectorError::Api {
                status: 429,
                message: "slow down".to_string(),
            },
        }
        .into();
        assert_eq!(err.code(), ErrorCode::RateLimitExceeded);
        let response = err.to_response();
        assert_eq!(response.details.unwrap()["stage"], "verification");
    }

    #[test]
    fn test_unknown_analysis_maps_to_not_found() {
        let err: AppError = CollaborationError::UnknownAnalysis {
            claim_id: "abc".to_string(),
        }
        .into();
        assert_eq!(err.code(), ErrorCode::NotFound);

        let err: AppError = LedgerError::UnknownEntry {
            entry_id: "e-1".to_string(),
        }
        .into();
        assert_eq!(err.code(), ErrorCode::NotFound);
    }

    #[test]
    fn test_internal_errors_do_not_leak_details() {
        let err = AppError::Storage(StorageError::Query {
            message: "SELECT * FROM secrets failed".to_string(),
        });
        let response = err.to_response();
        assert_eq!(response.code, ErrorCode::InternalError);
        assert_eq!(response.message, "Internal error");
        assert!(response.details.is_none());
    }

    #[test]
    fn test_error_response_serializes_code() {
        let err: AppError = AnalysisError::AnalysisTimeout { timeout_ms: 250 }.into();
        let json = serde_json::to_value(err.to_response()).unwrap();
        assert_eq!(json["code"], "SERVICE_UNAVAILABLE");
        assert_eq!(json["details"]["timeout_ms"], 250);
    }

    #[test]
    fn test_ledger_error_converts_into_analysis_error() {
        let err: AnalysisError = LedgerError::UnknownAnalysis {
            analysis_id: "a".to_string(),
        }
        .into();
        assert!(matches!(err, AnalysisError::Provenance(_)));
    }
}
