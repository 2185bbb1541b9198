use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use super::SharedState;
use crate::canonical::AnalyzeRequest;
use crate::collaboration::{NewFeedback, NewOverride};
use crate::error::{AppError, AppResult};
use crate::robustness::{AttackParams, AttackType};

/// Methods served over JSON-RPC.
pub const METHODS: &[&str] = &[
    "analyze",
    "report.get",
    "report.current",
    "provenance.chain",
    "provenance.verify",
    "provenance.stats",
    "provenance.export_session",
    "provenance.export_user",
    "provenance.anonymize_user",
    "collaboration.feedback",
    "collaboration.override",
    "collaboration.calibration",
    "cache.stats",
    "cache.invalidate",
    "cache.clear",
    "robustness.run",
    "robustness.synthetic",
];

#[derive(Debug, Deserialize)]
struct ClaimParams {
    claim_id: String,
}

#[derive(Debug, Deserialize)]
struct EntryParams {
    entry_id: String,
}

#[derive(Debug, Deserialize)]
struct FingerprintParams {
    fingerprint: String,
}

#[derive(Debug, Deserialize)]
struct SessionParams {
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct UserParams {
    user_id: String,
}

#[derive(Debug, Deserialize)]
struct SyntheticParams {
    #[serde(default = "default_synthetic_count")]
    count: usize,
    #[serde(default = "default_synthetic_seed")]
    seed: u64,
}

fn default_synthetic_count() -> usize {
    100
}

fn default_synthetic_seed() -> u64 {
    AttackParams::default().seed
}

#[derive(Debug, Deserialize)]
struct RobustnessParams {
    inputs: Vec<String>,
    #[serde(default)]
    attack_types: Option<Vec<AttackType>>,
    #[serde(default)]
    params: AttackParams,
}

/// Route a method call to the service.
pub async fn handle_method(
    state: &SharedState,
    method: &str,
    params: Option<Value>,
) -> AppResult<Value> {
    info!(method = %method, "Routing method call");

    match method {
        "analyze" => {
            execute_handler(method, params, |request: AnalyzeRequest| async move {
                state.analyze(&request).await.map(|r| r.as_ref().clone())
            })
            .await
        }
        "report.get" => {
            execute_handler(method, params, |p: ClaimParams| async move {
                state.report(&p.claim_id).await.map(|r| r.as_ref().clone())
            })
            .await
        }
        "report.current" => {
            execute_handler(method, params, |p: ClaimParams| async move {
                state.current_report(&p.claim_id).await
            })
            .await
        }
        "provenance.chain" => {
            execute_handler(method, params, |p: EntryParams| async move {
                state.provenance_chain(&p.entry_id).await
            })
            .await
        }
        "provenance.verify" => {
            let p: EntryParams = parse_arguments(method, params)?;
            let valid = state.verify_provenance(&p.entry_id).await?;
            Ok(json!({ "entry_id": p.entry_id, "valid": valid }))
        }
        "provenance.stats" => to_value(state.provenance_stats().await),
        "provenance.export_session" => {
            execute_handler(method, params, |p: SessionParams| async move {
                state.export_session(&p.session_id).await
            })
            .await
        }
        "provenance.export_user" => {
            execute_handler(method, params, |p: UserParams| async move {
                state.export_user_data(&p.user_id).await
            })
            .await
        }
        "provenance.anonymize_user" => {
            execute_handler(method, params, |p: UserParams| async move {
                state.anonymize_user_data(&p.user_id).await
            })
            .await
        }
        "collaboration.feedback" => {
            execute_handler(method, params, |feedback: NewFeedback| async move {
                state.record_feedback(feedback).await
            })
            .await
        }
        "collaboration.override" => {
            execute_handler(method, params, |change: NewOverride| async move {
                state.record_override(change).await
            })
            .await
        }
        "collaboration.calibration" => to_value(state.calibration_signal().await),
        "cache.stats" => to_value(state.cache_stats()),
        "cache.invalidate" => {
            let p: FingerprintParams = parse_arguments(method, params)?;
            let invalidated = state.invalidate_cache(&p.fingerprint)?;
            Ok(json!({ "fingerprint": p.fingerprint, "invalidated": invalidated }))
        }
        "cache.clear" => Ok(json!({ "cleared": state.clear_cache() })),
        "robustness.run" => {
            let p: RobustnessParams = parse_arguments(method, params)?;
            let attacks = p
                .attack_types
                .unwrap_or_else(|| AttackType::ALL.to_vec());
            to_value(state.run_robustness(&p.inputs, &attacks, &p.params).await)
        }
        "robustness.synthetic" => {
            execute_handler(method, params, |p: SyntheticParams| async move {
                state.run_synthetic_robustness(p.count, p.seed).await
            })
            .await
        }
        _ => Err(AppError::InvalidRequest {
            message: format!("Unknown method: {}", method),
        }),
    }
}

fn to_value<T: Serialize>(value: T) -> AppResult<Value> {
    serde_json::to_value(value).map_err(|e| AppError::Internal {
        message: format!("Failed to serialize result: {}", e),
    })
}

/// Deserialize method params; absent params are treated as `{}`.
fn parse_arguments<T: serde::de::DeserializeOwned>(
    method: &str,
    params: Option<Value>,
) -> AppResult<T> {
    let params = params.unwrap_or_else(|| Value::Object(Default::default()));
    serde_json::from_value(params).map_err(|e| AppError::InvalidRequest {
        message: format!("Invalid params for {}: {}", method, e),
    })
}

/// Parse params, run the operation and serialize its result.
async fn execute_handler<P, R, F, Fut>(
    method: &str,
    params: Option<Value>,
    operation: F,
) -> AppResult<Value>
where
    P: serde::de::DeserializeOwned,
    R: Serialize,
    F: FnOnce(P) -> Fut,
    Fut: std::future::Future<Output = AppResult<R>>,
{
    let params: P = parse_arguments(method, params)?;
    let result = operation(params).await?;
    to_value(result)
}
