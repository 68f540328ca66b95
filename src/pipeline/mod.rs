//! Orchestrates the principal `reflect` control flow:
//! `discover unprocessed sessions -> for each: export+sanitize -> extract
//! diary -> iterate reflection -> validate each delta -> accumulate ->
//! under lock: reload playbook -> curate -> persist -> mark processed`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::config::Config;
use crate::curation::curate;
use crate::error::{CassMemoryError, Result};
use crate::history::{ExportFormat, HistoryTool};
use crate::model::{DiaryEntry, PlaybookDelta, ProcessedLogEntry};
use crate::reflection::{reflect, Oracle};
use crate::storage::{diary_store, jsonl, playbook_store, toxic_log};
use crate::validation::evidence_count_gate;

const SESSION_EXTENSIONS: &[&str] = &["jsonl", "json", "md"];

/// Session files under `sessions_dir` not already in the processed log,
/// oldest first. `lookback_days` bounds how far back to
/// look, matching `sessionLookbackDays`; a file older than that
/// is treated as already seen and skipped.
pub fn discover_unprocessed_sessions(sessions_dir: &Path, processed: &[ProcessedLogEntry], lookback_days: u32, now: DateTime<Utc>) -> Vec<PathBuf> {
    let already: std::collections::HashSet<&str> = processed.iter().map(|p| p.session_path.as_str()).collect();

    let read_dir = match std::fs::read_dir(sessions_dir) {
        Ok(rd) => rd,
        Err(_) => return Vec::new(),
    };

    let cutoff = now - chrono::Duration::days(lookback_days as i64);
    let mut found: Vec<(PathBuf, std::time::SystemTime)> = Vec::new();
    for entry in read_dir.flatten() {
        let path = entry.path();
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else { continue };
        if !SESSION_EXTENSIONS.contains(&ext) {
            continue;
        }
        let path_str = path.to_string_lossy().into_owned();
        if already.contains(path_str.as_str()) {
            continue;
        }
        let Ok(metadata) = entry.metadata() else { continue };
        let Ok(modified) = metadata.modified() else { continue };
        let modified_utc: DateTime<Utc> = modified.into();
        if modified_utc < cutoff {
            continue;
        }
        found.push((path, modified));
    }
    found.sort_by_key(|(_, m)| *m);
    found.into_iter().map(|(p, _)| p).collect()
}

fn diary_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "status": { "enum": ["success", "failure", "mixed"] },
            "accomplishments": { "type": "array" },
            "decisions": { "type": "array" },
            "challenges": { "type": "array" },
            "preferences": { "type": "array" },
            "key_learnings": { "type": "array" },
            "tags": { "type": "array" }
        },
        "required": ["status"]
    })
}

/// Ask the oracle to summarize a sanitized session transcript into a
/// `DiaryEntry`.
pub async fn extract_diary(session_path: &str, transcript: &str, agent: &str, oracle: &dyn Oracle, config: &Config, now: DateTime<Utc>) -> Result<DiaryEntry> {
    let prompt = format!("Summarize this coding session transcript into the given schema.\n\n{transcript}");
    let response = oracle.extract(&diary_schema(), &prompt, config).await?;

    let status = response
        .get("status")
        .and_then(|v| v.as_str())
        .ok_or_else(|| CassMemoryError::OracleFailure { reason: "diary extraction missing status".into() })?;
    let status = serde_json::from_value(serde_json::Value::String(status.to_string()))
        .map_err(|e| CassMemoryError::OracleFailure { reason: format!("invalid diary status: {e}") })?;

    let strings = |field: &str| -> Vec<String> {
        response
            .get(field)
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default()
    };

    Ok(DiaryEntry {
        id: format!("d-{}", now.timestamp_millis()),
        session_path: session_path.to_string(),
        timestamp: now,
        agent: agent.to_string(),
        workspace: None,
        status,
        accomplishments: strings("accomplishments"),
        decisions: strings("decisions"),
        challenges: strings("challenges"),
        preferences: strings("preferences"),
        key_learnings: strings("key_learnings"),
        tags: strings("tags"),
        search_anchors: Vec::new(),
        related_sessions: Vec::new(),
    })
}

#[derive(Debug)]
pub struct SessionOutcome {
    pub session_path: String,
    pub diary_id: String,
    pub deltas_generated: usize,
}

#[derive(Debug, Default)]
pub struct PipelineReport {
    pub sessions: Vec<SessionOutcome>,
    pub applied: usize,
    pub skipped: usize,
    pub inversions: usize,
}

/// Run the full `reflect` pipeline over `sessions_dir`.
pub async fn run_reflect(
    sessions_dir: &Path,
    agent: &str,
    config: &Config,
    oracle: &dyn Oracle,
    history: &dyn HistoryTool,
    now: DateTime<Utc>,
) -> Result<PipelineReport> {
    let processed = jsonl::read_all::<ProcessedLogEntry>(&config.processed_log_path())?;
    let unprocessed = discover_unprocessed_sessions(sessions_dir, &processed, config.session_lookback_days, now);

    let mut accumulated_deltas: Vec<PlaybookDelta> = Vec::new();
    let mut report = PipelineReport::default();

    for session_path in &unprocessed {
        let path_str = session_path.to_string_lossy().into_owned();

        let transcript = match history.export(&path_str, ExportFormat::Text, config).await {
            Ok(Some(text)) => text,
            Ok(None) => {
                tracing::warn!(session = %path_str, "could not export session, skipping");
                continue;
            }
            Err(e) => {
                tracing::warn!(session = %path_str, error = %e, "session export failed, skipping");
                continue;
            }
        };

        let diary = match extract_diary(&path_str, &transcript, agent, oracle, config, now).await {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(session = %path_str, error = %e, "diary extraction failed, skipping session");
                continue;
            }
        };
        diary_store::save(&config.diary_dir(), &diary)?;

        let merged = playbook_store::load_merged(config, now)?;
        let history_hits = history.safe_search(&diary.key_learnings.join(" "), &Default::default()).await;
        let outcome = reflect(&diary, &merged, &history_hits, oracle, config, now).await;

        let mut validated = Vec::new();
        for mut delta in outcome.deltas {
            if let PlaybookDelta::Add { bullet, .. } = &delta {
                let verdict = evidence_count_gate(&bullet.content, config, history).await;
                if !verdict.passed {
                    report.skipped += 1;
                    continue;
                }
                delta.set_suggested_state(verdict.suggested_bullet_state());
            }
            validated.push(delta);
        }

        let deltas_generated = validated.len() as u32;
        report.sessions.push(SessionOutcome {
            session_path: path_str.clone(),
            diary_id: diary.id.clone(),
            deltas_generated: validated.len(),
        });
        accumulated_deltas.extend(validated);

        jsonl::append(
            &config.processed_log_path(),
            &ProcessedLogEntry {
                session_path: path_str,
                processed_at: now,
                diary_id: diary.id,
                deltas_generated,
            },
        )?;
    }

    if !accumulated_deltas.is_empty() {
        let toxic_path = config.toxic_bullets_log_path();
        let toxic_content = toxic_log::load(&toxic_path);
        let mut newly_toxic = Vec::new();

        playbook_store::mutate(&config.global_playbook_path(), "reflect_curate", now, |playbook| {
            let result = curate(playbook, &accumulated_deltas, &toxic_content, config, now);
            report.applied = result.applied;
            report.skipped += result.skipped.len();
            report.inversions = result.inversions.len();
            newly_toxic = result.newly_toxic;
            *playbook = result.playbook;
            playbook.metadata.total_reflections += 1;
            playbook.metadata.last_reflection = Some(now);
            playbook.metadata.updated_at = now;
            Ok(())
        })?;

        toxic_log::append(&toxic_path, &newly_toxic)?;
    }

    Ok(report)
}
