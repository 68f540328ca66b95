//! Adapter for the optional external history indexer binary.
//!
//! Grounded on `ironclaw`'s tilth subprocess tools
//! (`src/tools/builtin/tilth.rs`): probe for the binary, shell out with a
//! bounded timeout, and fall back gracefully when it is missing or fails.
//! Here the binary is `cass`, never implemented by this crate.

pub mod sanitize;

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::config::Config;
use crate::error::{CassMemoryError, Result};

/// Exit codes surfaced by the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success,
    UsageError,
    IndexMissing,
    NotFound,
    IdempotencyMismatch,
    Unknown,
    Timeout,
}

impl ExitCode {
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Success,
            2 => Self::UsageError,
            3 => Self::IndexMissing,
            4 => Self::NotFound,
            5 => Self::IdempotencyMismatch,
            10 => Self::Timeout,
            _ => Self::Unknown,
        }
    }

    pub fn as_i32(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::UsageError => 2,
            Self::IndexMissing => 3,
            Self::NotFound => 4,
            Self::IdempotencyMismatch => 5,
            Self::Unknown => 9,
            Self::Timeout => 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Text,
    Markdown,
    Json,
}

impl ExportFormat {
    fn as_arg(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Markdown => "markdown",
            Self::Json => "json",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AgentFilter {
    One(String),
    Many(Vec<String>),
}

/// Options accepted by `search`.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub limit: Option<u32>,
    pub days: Option<u32>,
    pub agent: Option<AgentFilter>,
    pub workspace: Option<String>,
    pub fields: Option<Vec<String>>,
    pub timeout: Option<Duration>,
}

/// A single search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Hit {
    pub source_path: String,
    #[serde(default)]
    pub line_number: Option<u32>,
    pub snippet: String,
    #[serde(default)]
    pub agent: Option<String>,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct SearchHitsEnvelope {
    #[serde(default)]
    hits: Vec<Hit>,
}

/// What to do when the history tool is unavailable.
pub struct UnavailableOutcome {
    pub can_continue: bool,
    pub fallback_mode: &'static str,
    pub message: String,
}

pub fn handle_unavailable(reason: &str) -> UnavailableOutcome {
    UnavailableOutcome {
        can_continue: true,
        fallback_mode: "playbook-only",
        message: format!("history tool unavailable, continuing playbook-only: {reason}"),
    }
}

#[async_trait]
pub trait HistoryTool: Send + Sync {
    async fn available(&self) -> bool;
    async fn search(&self, query: &str, options: &SearchOptions) -> Result<Vec<Hit>>;
    async fn export(&self, session_path: &str, format: ExportFormat, config: &Config) -> Result<Option<String>>;

    /// Never fails: any error collapses to an empty hit list.
    async fn safe_search(&self, query: &str, options: &SearchOptions) -> Vec<Hit> {
        match self.search(query, options).await {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!(error = %e, "history search failed, returning no hits");
                Vec::new()
            }
        }
    }
}

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Adapter that shells out to the `cass` binary.
pub struct CassAdapter {
    binary: String,
}

impl CassAdapter {
    pub fn new(binary: impl Into<String>) -> Self {
        Self { binary: binary.into() }
    }

    async fn run(&self, args: &[&str], timeout: Duration) -> Result<std::process::Output> {
        let child = Command::new(&self.binary)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output();

        match tokio::time::timeout(timeout, child).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(CassMemoryError::ToolUnavailable { reason: format!("binary not found: {}", self.binary) })
            }
            Ok(Err(e)) => Err(CassMemoryError::ToolFailure { exit_code: ExitCode::Unknown.as_i32(), message: e.to_string() }),
            Err(_) => Err(CassMemoryError::ToolFailure { exit_code: ExitCode::Timeout.as_i32(), message: "timed out".into() }),
        }
    }
}

#[async_trait]
impl HistoryTool for CassAdapter {
    async fn available(&self) -> bool {
        self.run(&["--version"], Duration::from_secs(3)).await.map(|o| o.status.success()).unwrap_or(false)
    }

    async fn search(&self, query: &str, options: &SearchOptions) -> Result<Vec<Hit>> {
        let limit = options.limit.unwrap_or(20).to_string();
        let mut args: Vec<String> = vec!["search".into(), query.into(), "--format".into(), "json".into(), "--limit".into(), limit];
        if let Some(days) = options.days {
            args.push("--days".into());
            args.push(days.to_string());
        }
        match &options.agent {
            Some(AgentFilter::One(a)) => {
                args.push("--agent".into());
                args.push(a.clone());
            }
            Some(AgentFilter::Many(list)) => {
                for a in list {
                    args.push("--agent".into());
                    args.push(a.clone());
                }
            }
            None => {}
        }
        if let Some(ws) = &options.workspace {
            args.push("--workspace".into());
            args.push(ws.clone());
        }

        let timeout = options.timeout.unwrap_or(DEFAULT_TIMEOUT);
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.run(&arg_refs, timeout).await?;

        if !output.status.success() {
            let code = output.status.code().unwrap_or(9);
            return Err(CassMemoryError::ToolFailure {
                exit_code: code,
                message: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        serde_json::from_str::<SearchHitsEnvelope>(&stdout)
            .map(|e| e.hits)
            .or_else(|_| serde_json::from_str::<Vec<Hit>>(&stdout))
            .map_err(|e| CassMemoryError::parse_json("<cass search output>", e))
    }

    async fn export(&self, session_path: &str, format: ExportFormat, config: &Config) -> Result<Option<String>> {
        let args = ["export", session_path, "--format", format.as_arg()];
        let exported = match self.run(&args, DEFAULT_TIMEOUT).await {
            Ok(output) if output.status.success() => {
                Some(String::from_utf8_lossy(&output.stdout).into_owned())
            }
            _ => fallback_export(Path::new(session_path)),
        };
        Ok(exported.map(|text| sanitize::sanitize(&text, &config.sanitization)))
    }
}

/// Parse a session transcript directly when the binary is unavailable or
/// fails.
pub fn fallback_export(path: &Path) -> Option<String> {
    let text = std::fs::read_to_string(path).ok()?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("jsonl") => parse_jsonl_session(&text),
        Some("json") => parse_json_session(&text),
        Some("md") => Some(text),
        _ => None,
    }
}

fn message_line(value: &serde_json::Value) -> Option<String> {
    let obj = value.as_object()?;
    let role = obj.get("role").or_else(|| obj.get("type")).and_then(|v| v.as_str())?;
    let content = obj.get("content")?;
    let text = match content {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string).or_else(|| v.get("text").and_then(|t| t.as_str()).map(str::to_string)))
            .collect::<Vec<_>>()
            .join("\n"),
        serde_json::Value::Object(o) => o.get("text").and_then(|t| t.as_str()).unwrap_or_default().to_string(),
        _ => return None,
    };
    Some(format!("[{role}] {text}"))
}

fn parse_jsonl_session(text: &str) -> Option<String> {
    let mut lines = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let value: serde_json::Value = serde_json::from_str(trimmed).ok()?;
        if let Some(rendered) = message_line(&value) {
            lines.push(rendered);
        }
    }
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

fn parse_json_session(text: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    let messages = value.as_array().cloned().or_else(|| value.get("messages")?.as_array().cloned())?;
    let lines: Vec<String> = messages.iter().filter_map(message_line).collect();
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_roundtrips_known_values() {
        for code in [0, 2, 3, 4, 5, 10] {
            assert_eq!(ExitCode::from_code(code).as_i32(), code);
        }
    }

    #[test]
    fn unknown_exit_code_maps_to_unknown() {
        assert_eq!(ExitCode::from_code(77), ExitCode::Unknown);
    }

    #[test]
    fn parse_jsonl_session_renders_role_and_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.jsonl");
        std::fs::write(&path, "{\"role\":\"user\",\"content\":\"Hello\"}\n{\"role\":\"assistant\",\"content\":\"Hi there\"}\n").unwrap();
        let rendered = fallback_export(&path).unwrap();
        assert_eq!(rendered, "[user] Hello\n[assistant] Hi there");
    }

    #[test]
    fn parse_jsonl_session_skips_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.jsonl");
        std::fs::write(&path, "{\"role\":\"user\",\"content\":\"Hi\"}\n\n").unwrap();
        assert_eq!(fallback_export(&path).unwrap(), "[user] Hi");
    }

    #[test]
    fn parse_json_session_accepts_messages_wrapper() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.json");
        std::fs::write(&path, r#"{"messages":[{"type":"user","content":"Hello"}]}"#).unwrap();
        assert_eq!(fallback_export(&path).unwrap(), "[user] Hello");
    }

    #[test]
    fn fallback_export_on_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.jsonl");
        assert!(fallback_export(&path).is_none());
    }

    #[test]
    fn markdown_session_returns_raw_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.md");
        std::fs::write(&path, "# Notes\n").unwrap();
        assert_eq!(fallback_export(&path).unwrap(), "# Notes\n");
    }

    #[test]
    fn handle_unavailable_allows_continuing() {
        let outcome = handle_unavailable("not installed");
        assert!(outcome.can_continue);
        assert_eq!(outcome.fallback_mode, "playbook-only");
    }
}
