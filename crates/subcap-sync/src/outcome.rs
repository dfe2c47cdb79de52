//! Uniform result shape returned to the UI layer.

use serde::Serialize;
use subcap_core::{ErrorKind, SyncError};

/// `{ success, value?, error?, warning?, message?, kind? }`
///
/// Expected failures (validation, network, locked state) are reported here
/// instead of as `Err`. A `warning` never turns a success into a failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outcome<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
}

impl<T> Outcome<T> {
    pub fn ok(value: T) -> Self {
        Self {
            success: true,
            value: Some(value),
            error: None,
            warning: None,
            message: None,
            kind: None,
        }
    }

    pub fn failed(err: &SyncError) -> Self {
        Self::failed_message(err.kind(), err.to_string())
    }

    /// Failure whose message is prefixed with what was being attempted.
    pub fn failed_during(action: &str, err: &SyncError) -> Self {
        Self::failed_message(err.kind(), format!("{action}: {err}"))
    }

    pub fn failed_message(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            value: None,
            error: Some(message.into()),
            warning: None,
            message: None,
            kind: Some(kind),
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warning = Some(warning.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.success
    }
}

impl Outcome<()> {
    pub fn done() -> Self {
        Self::ok(())
    }
}
