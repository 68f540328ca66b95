//! The JSON command envelope every subcommand can emit in `--json` mode
//!: `{success, command, timestamp, data?, error?, metadata?}`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::error::CassMemoryError;

#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct CommandEnvelope {
    pub success: bool,
    pub command: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorEnvelope>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl CommandEnvelope {
    pub fn ok(command: &str, data: Value, now: DateTime<Utc>) -> Self {
        Self { success: true, command: command.to_string(), timestamp: now, data: Some(data), error: None, metadata: None }
    }

    /// Validation failures use `INVALID_INPUT` regardless of the underlying
    /// error variant; everything else maps through `code()`.
    pub fn validation_error(command: &str, message: String, now: DateTime<Utc>) -> Self {
        Self {
            success: false,
            command: command.to_string(),
            timestamp: now,
            data: None,
            error: Some(ErrorEnvelope { code: "INVALID_INPUT".into(), message, details: None }),
            metadata: None,
        }
    }

    pub fn missing_required(command: &str, field: &str, now: DateTime<Utc>) -> Self {
        Self {
            success: false,
            command: command.to_string(),
            timestamp: now,
            data: None,
            error: Some(ErrorEnvelope { code: "MISSING_REQUIRED".into(), message: format!("missing required field: {field}"), details: None }),
            metadata: None,
        }
    }

    pub fn from_error(command: &str, err: &CassMemoryError, now: DateTime<Utc>) -> Self {
        let code = match err {
            CassMemoryError::ValidationFailure { .. } => "INVALID_INPUT".to_string(),
            other => other.code().to_string(),
        };
        Self {
            success: false,
            command: command.to_string(),
            timestamp: now,
            data: None,
            error: Some(ErrorEnvelope { code, message: err.to_string(), details: None }),
            metadata: None,
        }
    }

    /// Process exit code for this envelope: 2 on validation failure, 1 on
    /// any other error, 0 on success.
    pub fn exit_code(&self) -> i32 {
        match &self.error {
            None => 0,
            Some(e) if e.code == "INVALID_INPUT" || e.code == "MISSING_REQUIRED" => 2,
            Some(_) => 1,
        }
    }
}
