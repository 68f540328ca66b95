//! Subcommand implementations: load config/state, call into the engine
//! modules, and render either the JSON envelope or a human-readable line.

use chrono::Utc;
use serde_json::{json, Value};

use crate::config::Config;
use crate::context::{self, ContextOptions};
use crate::error::{CassMemoryError, Result};
use crate::history::{CassAdapter, HistoryTool};
use crate::model::{OutcomeRecord, Playbook, TriggerEvent};
use crate::pipeline;
use crate::reflection::Oracle;
use crate::safety::{self, AuditChainWriter};
use crate::scoring::{self, score_bucket, ScoreBucket};
use crate::storage::{jsonl, playbook_store};

use super::envelope::CommandEnvelope;
use super::{Cli, Command, OutcomeCommand, PlaybookCommand, TraumaCommand};

/// The oracle this crate ships: always fails. A host embedding this engine
/// wires in a real LLM-backed `Oracle` and calls `pipeline::run_reflect`
/// directly rather than through this CLI; no LLM provider implementation
/// lives here.
struct NoOracle;

#[async_trait::async_trait]
impl Oracle for NoOracle {
    async fn extract(&self, _schema: &Value, _prompt: &str, _config: &Config) -> Result<Value> {
        Err(CassMemoryError::OracleFailure { reason: "no oracle provider is configured in this build".into() })
    }
}

/// Run the parsed CLI, print the result, and return the process exit code.
pub async fn run(cli: Cli, config: &Config) -> i32 {
    let now = Utc::now();
    let (name, outcome) = dispatch(&cli.command, config, now).await;

    let envelope = match outcome {
        Ok(data) => CommandEnvelope::ok(&name, data, now),
        Err(err) => CommandEnvelope::from_error(&name, &err, now),
    };
    let exit_code = envelope.exit_code();

    if cli.json {
        match serde_json::to_string_pretty(&envelope) {
            Ok(text) => println!("{text}"),
            Err(e) => eprintln!("Error: failed to serialize command envelope: {e}"),
        }
    } else if let Some(err) = &envelope.error {
        eprintln!("Error: {}", err.message);
        if cli.verbose {
            eprintln!("  code: {}", err.code);
        }
    } else if let Some(data) = &envelope.data {
        print_human(&name, data);
    }

    exit_code
}

async fn dispatch(command: &Command, config: &Config, now: chrono::DateTime<Utc>) -> (String, Result<Value>) {
    match command {
        Command::Reflect { session, agent } => ("reflect".to_string(), reflect(session.as_deref(), agent, config, now).await),
        Command::Context { task } => ("context".to_string(), context_cmd(task, config, now).await),
        Command::Status => ("status".to_string(), status(config, now)),
        Command::Trauma(args) => trauma(&args.command, config, now),
        Command::Outcome(args) => outcome(&args.command, config, now),
        Command::Playbook(args) => playbook(&args.command, config, now),
    }
}

async fn reflect(session: Option<&std::path::Path>, agent: &str, config: &Config, now: chrono::DateTime<Utc>) -> Result<Value> {
    let sessions_dir = match session {
        Some(p) => p.to_path_buf(),
        None => config
            .repo_overlay_dir()
            .map(|d| d.join("sessions"))
            .unwrap_or_else(|| config.cwd.clone()),
    };

    let history = CassAdapter::new(config.cass_binary_path());
    let oracle = NoOracle;
    let report = pipeline::run_reflect(&sessions_dir, agent, config, &oracle, &history, now).await?;

    Ok(json!({
        "sessions_scanned": report.sessions.len(),
        "deltas_applied": report.applied,
        "deltas_skipped": report.skipped,
        "inversions": report.inversions,
        "sessions": report.sessions.iter().map(|s| json!({
            "session_path": s.session_path,
            "diary_id": s.diary_id,
            "deltas_generated": s.deltas_generated,
        })).collect::<Vec<_>>(),
    }))
}

async fn context_cmd(task: &str, config: &Config, now: chrono::DateTime<Utc>) -> Result<Value> {
    let playbook = load_merged_tolerant(config, now)?;
    let options = ContextOptions::from_config(config);

    let adapter = CassAdapter::new(config.cass_binary_path());
    let history: Option<&dyn HistoryTool> = if adapter.available().await { Some(&adapter) } else { None };

    let assembled = context::assemble(task, &playbook, config, &options, history, now).await;

    Ok(json!({
        "task": assembled.task,
        "relevant_bullets": assembled.relevant_bullets.iter().map(|r| json!({
            "id": r.bullet.id,
            "content": r.bullet.content,
            "category": r.bullet.category,
            "relevance": r.relevance,
        })).collect::<Vec<_>>(),
        "anti_patterns": assembled.anti_patterns.iter().map(|r| json!({
            "id": r.bullet.id,
            "content": r.bullet.content,
            "relevance": r.relevance,
        })).collect::<Vec<_>>(),
        "history_snippets": assembled.history_snippets.iter().map(|s| json!({
            "source_path": s.source_path,
            "snippet": s.snippet,
        })).collect::<Vec<_>>(),
        "deprecated_warnings": assembled.deprecated_warnings,
        "suggested_queries": assembled.suggested_queries,
    }))
}

/// Load the merged playbook, degrading to an empty one on a corrupt file
/// rather than aborting: this is the read path agents call on every turn,
/// and a transiently malformed repo overlay should not take it down.
fn load_merged_tolerant(config: &Config, now: chrono::DateTime<Utc>) -> Result<Playbook> {
    match playbook_store::load_merged(config, now) {
        Ok(playbook) => Ok(playbook),
        Err(err @ (CassMemoryError::Parse { .. } | CassMemoryError::Schema { .. })) => {
            tracing::warn!(error = %err, "playbook failed to load, falling back to an empty playbook");
            Ok(Playbook::new(now))
        }
        Err(err) => Err(err),
    }
}

fn status(config: &Config, now: chrono::DateTime<Utc>) -> Result<Value> {
    let playbook = load_merged_tolerant(config, now)?;

    let mut buckets = std::collections::BTreeMap::new();
    let mut maturities = std::collections::BTreeMap::new();
    let mut active = 0usize;

    for bullet in &playbook.bullets {
        if !bullet.is_active() {
            continue;
        }
        active += 1;
        let score = scoring::effective_score(bullet, config, now);
        let bucket_name = match score_bucket(score) {
            ScoreBucket::Excellent => "excellent",
            ScoreBucket::Good => "good",
            ScoreBucket::Neutral => "neutral",
            ScoreBucket::AtRisk => "at_risk",
        };
        *buckets.entry(bucket_name).or_insert(0usize) += 1;
        *maturities.entry(format!("{:?}", bullet.maturity)).or_insert(0usize) += 1;
    }

    let processed = jsonl::read_all::<crate::model::ProcessedLogEntry>(&config.processed_log_path())?;

    Ok(json!({
        "active_bullets": active,
        "total_bullets": playbook.bullets.len(),
        "score_buckets": buckets,
        "maturity_distribution": maturities,
        "total_reflections": playbook.metadata.total_reflections,
        "last_reflection": playbook.metadata.last_reflection,
        "sessions_processed": processed.len(),
    }))
}

/// Resolve where a trauma entry and its audit trail live for `scope`:
/// `"repo"` goes to the repo overlay when one is discoverable, everything
/// else (including `"global"` and an undiscoverable repo) falls back to the
/// global store.
fn trauma_paths_for_scope(scope: &str, config: &Config) -> (std::path::PathBuf, std::path::PathBuf) {
    if scope == "repo" {
        if let (Some(traumas), Some(audit)) = (config.repo_traumas_path(), config.repo_trauma_audit_path()) {
            return (traumas, audit);
        }
    }
    (config.global_traumas_path(), config.global_trauma_audit_path())
}

fn trauma(command: &TraumaCommand, config: &Config, now: chrono::DateTime<Utc>) -> (String, Result<Value>) {
    match command {
        TraumaCommand::List => {
            let result = (|| -> Result<Value> {
                let entries = safety::load_active_entries(config);
                Ok(json!({
                    "entries": entries.iter().map(|e| json!({
                        "id": e.id,
                        "severity": format!("{:?}", e.severity),
                        "pattern": e.pattern,
                        "scope": e.scope,
                    })).collect::<Vec<_>>(),
                }))
            })();
            ("trauma list".to_string(), result)
        }

        TraumaCommand::Add { pattern, severity, scope, session, message } => {
            let result = (|| -> Result<Value> {
                if pattern.trim().is_empty() {
                    return Err(CassMemoryError::ValidationFailure { reason: "pattern must not be empty".into() });
                }
                if regex::Regex::new(pattern).is_err() {
                    return Err(CassMemoryError::ValidationFailure { reason: format!("invalid regex pattern: {pattern}") });
                }

                let (traumas_path, audit_path) = trauma_paths_for_scope(scope, config);

                let trigger = TriggerEvent { session_path: session.clone(), timestamp: now, human_message: message.clone() };
                let entry = safety::new_trauma_entry(pattern.clone(), (*severity).into(), scope.clone(), trigger, now);
                jsonl::append(&traumas_path, &entry)?;

                let writer = AuditChainWriter::new(audit_path);
                writer.append("trauma_added", &entry.id, Some(pattern.clone()), now)?;

                Ok(json!({ "id": entry.id, "pattern": entry.pattern, "scope": entry.scope }))
            })();
            ("trauma add".to_string(), result)
        }

        TraumaCommand::Heal { id } => {
            let result = (|| -> Result<Value> {
                let mut healed = safety::heal_entry(&config.global_traumas_path(), id, now)?;
                let mut audit_path = config.global_trauma_audit_path();

                if !healed {
                    if let Some(repo_path) = config.repo_traumas_path() {
                        healed = safety::heal_entry(&repo_path, id, now)?;
                        if healed {
                            audit_path = config.repo_trauma_audit_path().expect("repo_traumas_path implies repo_trauma_audit_path");
                        }
                    }
                }

                if !healed {
                    return Err(CassMemoryError::ValidationFailure { reason: format!("no active trauma entry with id {id}") });
                }
                let writer = AuditChainWriter::new(audit_path);
                writer.append("trauma_healed", id, None, now)?;
                Ok(json!({ "id": id, "healed": true }))
            })();
            ("trauma heal".to_string(), result)
        }
    }
}

fn outcome(command: &OutcomeCommand, config: &Config, now: chrono::DateTime<Utc>) -> (String, Result<Value>) {
    match command {
        OutcomeCommand::Record { session_id, outcome, rules_used, duration_sec, error_count, had_retries, sentiment, notes, path } => {
            let result = (|| -> Result<Value> {
                if session_id.trim().is_empty() {
                    return Err(CassMemoryError::ValidationFailure { reason: "session_id must not be empty".into() });
                }
                let record = OutcomeRecord {
                    session_id: session_id.clone(),
                    outcome: (*outcome).into(),
                    rules_used: rules_used.clone(),
                    duration_sec: *duration_sec,
                    error_count: *error_count,
                    had_retries: *had_retries,
                    sentiment: sentiment.clone(),
                    notes: notes.clone(),
                    recorded_at: now,
                    path: path.clone(),
                };
                jsonl::append(&config.global_outcomes_path(), &record)?;
                Ok(json!({ "session_id": record.session_id, "recorded_at": record.recorded_at }))
            })();
            ("outcome record".to_string(), result)
        }
    }
}

fn playbook(command: &PlaybookCommand, config: &Config, now: chrono::DateTime<Utc>) -> (String, Result<Value>) {
    match command {
        PlaybookCommand::Show => {
            let result = (|| -> Result<Value> {
                let playbook = playbook_store::load_merged(config, now)?;
                Ok(json!({
                    "bullets": playbook.bullets.iter().map(|b| json!({
                        "id": b.id,
                        "content": b.content,
                        "category": b.category,
                        "maturity": format!("{:?}", b.maturity),
                        "state": format!("{:?}", b.state),
                        "helpful_count": b.helpful_count,
                        "harmful_count": b.harmful_count,
                        "is_negative": b.is_negative,
                    })).collect::<Vec<_>>(),
                    "deprecated_patterns": playbook.deprecated_patterns.iter().map(|p| json!({
                        "pattern": p.pattern,
                        "replacement": p.replacement,
                        "reason": p.reason,
                    })).collect::<Vec<_>>(),
                }))
            })();
            ("playbook show".to_string(), result)
        }

        PlaybookCommand::Prune { max_age_days } => {
            let max_age_days = *max_age_days as f64;
            let result = playbook_store::mutate(&config.global_playbook_path(), "playbook_prune", now, |pb| {
                let mut pruned = Vec::new();
                for bullet in pb.bullets.iter_mut() {
                    if bullet.is_active() && !bullet.pinned && scoring::is_stale(bullet, max_age_days, now) {
                        bullet.deprecate("pruned: stale".into(), None, now);
                        pruned.push(bullet.id.clone());
                    }
                }
                Ok(pruned)
            })
            .map(|pruned| json!({ "pruned": pruned }));
            ("playbook prune".to_string(), result)
        }
    }
}

fn print_human(command: &str, data: &Value) {
    match command {
        "status" => {
            println!(
                "active bullets: {}  total: {}",
                data.get("active_bullets").and_then(Value::as_u64).unwrap_or(0),
                data.get("total_bullets").and_then(Value::as_u64).unwrap_or(0),
            );
            if let Some(buckets) = data.get("score_buckets").and_then(Value::as_object) {
                for (name, count) in buckets {
                    println!("  {name}: {count}");
                }
            }
        }
        "context" => {
            if let Some(bullets) = data.get("relevant_bullets").and_then(Value::as_array) {
                for bullet in bullets {
                    println!("- {}", bullet.get("content").and_then(Value::as_str).unwrap_or(""));
                }
            }
            if let Some(warnings) = data.get("deprecated_warnings").and_then(Value::as_array) {
                for w in warnings {
                    if let Some(text) = w.as_str() {
                        println!("! {text}");
                    }
                }
            }
        }
        _ => {
            if let Ok(pretty) = serde_json::to_string_pretty(data) {
                println!("{pretty}");
            }
        }
    }
}
