use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::AppError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub request: RequestConfig,
    pub database: Option<DatabaseConfig>,
    pub cache: CacheConfig,
    pub pipeline: PipelineConfig,
    pub detectors: DetectorConfig,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Detector call configuration (per-attempt timeout and retry policy)
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

/// Report cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    pub capacity: usize,
    pub shards: usize,
}

/// Pipeline behavior configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Language detectors operate in; other languages are translated first.
    pub processing_language: String,
    /// Language assumed when detection gives no answer.
    pub default_language: String,
    pub max_input_chars: usize,
    pub analysis_timeout_ms: u64,
    /// Confidence at which detector rounds stop early.
    pub confidence_threshold: f64,
    /// Upper bound on detector rounds per analysis; `1` disables re-runs.
    pub max_rounds: u32,
    pub scoring: ScoringConfig,
}

/// Confidence aggregation weights and verdict thresholds.
///
/// Weights must be non-negative so aggregation stays monotonic in every input.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoringConfig {
    pub verification_weight: f64,
    pub evidence_weight: f64,
    /// Number of highest-scoring evidence items averaged into evidence quality.
    pub top_k: usize,
    pub high_threshold: f64,
    pub low_threshold: f64,
    /// Minority/majority stance ratio at or above which the verdict is `mixed`.
    pub mixed_balance_threshold: f64,
    pub min_evidence: usize,
}

/// Remote detector endpoints
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub enable_translation: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30000,
            max_retries: 3,
            retry_delay_ms: 1000,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 3600,
            capacity: 1000,
            shards: 16,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            processing_language: "en".to_string(),
            default_language: "en".to_string(),
            max_input_chars: 10_000,
            analysis_timeout_ms: 60_000,
            confidence_threshold: 0.75,
            max_rounds: 1,
            scoring: ScoringConfig::default(),
        }
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            verification_weight: 0.6,
            evidence_weight: 0.4,
            top_k: 5,
            high_threshold: 0.75,
            low_threshold: 0.3,
            mixed_balance_threshold: 0.6,
            min_evidence: 2,
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8600".to_string(),
            api_key: None,
            enable_translation: true,
        }
    }
}

/// Retry ceiling. Backoff doubles per retry, so larger values only stall.
pub const MAX_RETRIES_LIMIT: u32 = 10;

fn parse_var<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let request = RequestConfig {
            timeout_ms: parse_var("REQUEST_TIMEOUT_MS", 30000),
            max_retries: parse_var("MAX_RETRIES", 3),
            retry_delay_ms: parse_var("RETRY_DELAY_MS", 1000),
        };

        let database = env::var("DATABASE_PATH").ok().map(|path| DatabaseConfig {
            path: PathBuf::from(path),
            max_connections: parse_var("DATABASE_MAX_CONNECTIONS", 5),
        });

        let cache = CacheConfig {
            ttl_secs: parse_var("CACHE_TTL_SECS", 3600),
            capacity: parse_var("CACHE_CAPACITY", 1000),
            shards: parse_var("CACHE_SHARDS", 16),
        };

        let defaults = ScoringConfig::default();
        let scoring = ScoringConfig {
            verification_weight: parse_var("SCORE_VERIFICATION_WEIGHT", defaults.verification_weight),
            evidence_weight: parse_var("SCORE_EVIDENCE_WEIGHT", defaults.evidence_weight),
            top_k: parse_var("SCORE_TOP_K", defaults.top_k),
            high_threshold: parse_var("VERDICT_HIGH_THRESHOLD", defaults.high_threshold),
            low_threshold: parse_var("VERDICT_LOW_THRESHOLD", defaults.low_threshold),
            mixed_balance_threshold: parse_var(
                "VERDICT_MIXED_BALANCE",
                defaults.mixed_balance_threshold,
            ),
            min_evidence: parse_var("VERDICT_MIN_EVIDENCE", defaults.min_evidence),
        };

        let pipeline = PipelineConfig {
            processing_language: env::var("PROCESSING_LANGUAGE")
                .unwrap_or_else(|_| "en".to_string())
                .to_lowercase(),
            default_language: env::var("DEFAULT_LANGUAGE")
                .unwrap_or_else(|_| "en".to_string())
                .to_lowercase(),
            max_input_chars: parse_var("MAX_INPUT_CHARS", 10_000),
            analysis_timeout_ms: parse_var("ANALYSIS_TIMEOUT_MS", 60_000),
            confidence_threshold: parse_var("CONFIDENCE_THRESHOLD", 0.75),
            max_rounds: parse_var("MAX_ROUNDS", 1),
            scoring,
        };

        let detectors = DetectorConfig {
            base_url: env::var("DETECTOR_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8600".to_string()),
            api_key: env::var("DETECTOR_API_KEY").ok().filter(|k| !k.is_empty()),
            enable_translation: env::var("ENABLE_TRANSLATION")
                .map(|v| v.to_lowercase() != "false")
                .unwrap_or(true),
        };

        let config = Config {
            logging,
            request,
            database,
            cache,
            pipeline,
            detectors,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would break scoring invariants or the cache.
    pub fn validate(&self) -> Result<(), AppError> {
        let scoring = &self.pipeline.scoring;
        let invalid = |message: String| Err(AppError::Config { message });

        let weights = [scoring.verification_weight, scoring.evidence_weight];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return invalid("Scoring weights must be finite and non-negative".to_string());
        }
        if scoring.verification_weight + scoring.evidence_weight <= 0.0 {
            return invalid("At least one scoring weight must be positive".to_string());
        }
        for (name, value) in [
            ("VERDICT_HIGH_THRESHOLD", scoring.high_threshold),
            ("VERDICT_LOW_THRESHOLD", scoring.low_threshold),
            ("VERDICT_MIXED_BALANCE", scoring.mixed_balance_threshold),
            ("CONFIDENCE_THRESHOLD", self.pipeline.confidence_threshold),
        ] {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return invalid(format!("{} must be within [0, 1], got {}", name, value));
            }
        }
        if scoring.low_threshold > scoring.high_threshold {
            return invalid("VERDICT_LOW_THRESHOLD cannot exceed VERDICT_HIGH_THRESHOLD".to_string());
        }
        if scoring.top_k == 0 {
            return invalid("SCORE_TOP_K must be at least 1".to_string());
        }
        if self.cache.capacity == 0 || self.cache.shards == 0 {
            return invalid("CACHE_CAPACITY and CACHE_SHARDS must be at least 1".to_string());
        }
        if self.pipeline.max_input_chars == 0 {
            return invalid("MAX_INPUT_CHARS must be at least 1".to_string());
        }
        if self.pipeline.max_rounds == 0 {
            return invalid("MAX_ROUNDS must be at least 1".to_string());
        }
        if self.request.max_retries > MAX_RETRIES_LIMIT {
            return invalid(format!(
                "MAX_RETRIES cannot exceed {}, got {}",
                MAX_RETRIES_LIMIT, self.request.max_retries
            ));
        }
        Ok(())
    }
}
