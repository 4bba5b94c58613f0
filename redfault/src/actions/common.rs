//! Helpers shared by the actions.

use rand::Rng;
use redfault_shared::errors::{FaultError, FaultResult};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::lifecycle::Engine;
use crate::target::{InfoSection, TargetDescriptor};

pub(crate) const MB: u64 = 1024 * 1024;

/// Deserialize an action's raw fields, mapping failures to validation errors.
pub(crate) fn parse_config<T: DeserializeOwned>(action: &str, config: &Value) -> FaultResult<T> {
    serde_json::from_value(config.clone())
        .map_err(|e| FaultError::Validation(format!("{}: {}", action, e)))
}

/// A required, non-blank string field.
pub(crate) fn require(field: &str, value: Option<String>) -> FaultResult<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(FaultError::Validation(format!("{} is required", field))),
    }
}

/// Clamp a possibly negative integer into `[min, max]`.
pub(crate) fn clamp(value: Option<i64>, default: u64, min: u64, max: u64) -> u64 {
    match value {
        Some(v) if v < 0 => min,
        Some(v) => (v as u64).clamp(min, max),
        None => default,
    }
}

/// Clamp a floating-point threshold into `[min, max]`. NaN takes the default.
pub(crate) fn clamp_f64(value: Option<f64>, default: f64, min: f64, max: f64) -> f64 {
    match value {
        Some(v) if v.is_nan() => default,
        Some(v) => v.clamp(min, max),
        None => default,
    }
}

/// Random bytes for values written to the target.
pub(crate) fn random_payload(size: usize) -> Vec<u8> {
    let mut payload = vec![0u8; size];
    rand::rng().fill(&mut payload[..]);
    payload
}

/// Open a short-lived handle and read one `INFO` section.
pub(crate) async fn sample_info(
    engine: &Engine,
    target: &TargetDescriptor,
    section: &str,
) -> FaultResult<InfoSection> {
    let mut handle = engine.connector().open(target).await?;
    let result = handle.info(section).await;
    handle.close().await;
    result
}
