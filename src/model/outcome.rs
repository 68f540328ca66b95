//! Outcome of a completed session, as recorded by the host agent. Read back
//! by the evidence gate and the context assembler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
    Mixed,
    Partial,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub session_id: String,
    pub outcome: Outcome,
    #[serde(default)]
    pub rules_used: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_sec: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub had_retries: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub recorded_at: DateTime<Utc>,
    pub path: String,
}

/// One line of the append-only processed-sessions log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedLogEntry {
    pub session_path: String,
    pub processed_at: DateTime<Utc>,
    pub diary_id: String,
    pub deltas_generated: u32,
}
