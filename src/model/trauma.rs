//! A regex pattern marking a command the safety guard must block, recorded
//! after a human explicitly flags a catastrophic command. Grounded in
//! `ironclaw`'s `safety::command_guard`, but the patterns here are
//! user-supplied data rather than a compiled-in pattern catalog.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Critical,
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraumaStatus {
    Active,
    Healed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub session_path: String,
    pub timestamp: DateTime<Utc>,
    pub human_message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraumaEntry {
    pub id: String,
    pub severity: Severity,
    /// Regex source; compiled lazily by the guard, never stored compiled.
    pub pattern: String,
    pub scope: String,
    pub status: TraumaStatus,
    pub trigger_event: TriggerEvent,
    pub created_at: DateTime<Utc>,
}

impl TraumaEntry {
    pub fn is_active(&self) -> bool {
        self.status == TraumaStatus::Active
    }
}
