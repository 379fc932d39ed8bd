use thiserror::Error;

/// Errors raised while parsing a threshold document.
///
/// Only the strict [`Thresholds::parse`](crate::Thresholds::parse) surfaces
/// these; classification itself never fails on configuration problems.
#[derive(Debug, Error)]
pub enum ThresholdError {
    #[error("threshold document is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("threshold document must be a JSON object, found {0}")]
    NotAnObject(&'static str),
}

/// Errors raised while parsing a modem snapshot document.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("snapshot must be a JSON object, found {0}")]
    NotAnObject(&'static str),
}

/// Name of a JSON value's kind, for error messages.
pub(crate) fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}
