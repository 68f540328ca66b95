//! Iterative delta extraction from one diary entry.
//!
//! The oracle is abstracted as `extract(schema, prompt, config) ->
//! Result<object>`, so a production implementation and a deterministic test
//! stub share the same trait. No concrete LLM-backed implementation lives
//! in this crate.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::config::Config;
use crate::error::{CassMemoryError, Result};
use crate::history::Hit;
use crate::model::{dedup_deltas, DiaryEntry, Maturity, Playbook, PlaybookDelta};

const MAX_DELTAS: usize = 20;
const HISTORY_SNIPPET_LIMIT: usize = 5;
const HISTORY_SNIPPET_MAX_LEN: usize = 200;

/// The extraction oracle capability. A real implementation
/// would wrap an LLM call; this crate ships no such implementation.
#[async_trait::async_trait]
pub trait Oracle: Send + Sync {
    async fn extract(&self, schema: &Value, prompt: &str, config: &Config) -> Result<Value>;
}

fn maturity_glyph(maturity: Maturity) -> &'static str {
    match maturity {
        Maturity::Proven => "★",
        Maturity::Established => "✓",
        Maturity::Candidate => "·",
        Maturity::Deprecated => "✗",
    }
}

/// Format the playbook compactly: grouped by category, maturity glyphs,
/// counts.
pub fn format_playbook(playbook: &Playbook) -> String {
    use std::collections::BTreeMap;

    let mut by_category: BTreeMap<&str, Vec<_>> = BTreeMap::new();
    for bullet in &playbook.bullets {
        if !bullet.is_active() {
            continue;
        }
        by_category.entry(bullet.category.as_str()).or_default().push(bullet);
    }

    let mut out = String::new();
    for (category, bullets) in by_category {
        out.push_str(&format!("## {category}\n"));
        for bullet in bullets {
            out.push_str(&format!(
                "- [{}] {} (helpful={}, harmful={}) id={}\n",
                maturity_glyph(bullet.maturity),
                bullet.content,
                bullet.helpful_count,
                bullet.harmful_count,
                bullet.id,
            ));
        }
    }
    out
}

/// Format up to 5 history snippets, each truncated to 200 chars.
pub fn format_history_snippets(hits: &[Hit]) -> String {
    let mut out = String::new();
    for hit in hits.iter().take(HISTORY_SNIPPET_LIMIT) {
        let snippet: String = hit.snippet.chars().take(HISTORY_SNIPPET_MAX_LEN).collect();
        out.push_str(&format!("- ({}) {snippet}\n", hit.source_path));
    }
    out
}

fn extraction_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "deltas": { "type": "array" }
        },
        "required": ["deltas"]
    })
}

fn build_prompt(playbook_text: &str, diary_text: &str, history_text: &str) -> String {
    format!(
        "# Current playbook\n{playbook_text}\n\n# Session diary\n{diary_text}\n\n# Related history\n{history_text}\n\nExtract playbook deltas as {{\"deltas\": [...]}}.",
    )
}

#[derive(Debug)]
pub struct ReflectionOutcome {
    pub deltas: Vec<PlaybookDelta>,
    pub iterations_run: u32,
    pub oracle_failed: bool,
}

/// Run the reflection loop for one diary entry against a merged playbook
/// and related-history snippets. Tolerates oracle
/// failure by returning whatever deltas were already gathered.
pub async fn reflect(
    diary: &DiaryEntry,
    playbook: &Playbook,
    history_hits: &[Hit],
    oracle: &dyn Oracle,
    config: &Config,
    _now: DateTime<Utc>,
) -> ReflectionOutcome {
    let playbook_text = format_playbook(playbook);
    let diary_text = diary.format_for_prompt();
    let history_text = format_history_snippets(history_hits);
    let schema = extraction_schema();

    let mut all_deltas: Vec<PlaybookDelta> = Vec::new();
    let mut oracle_failed = false;
    let mut iterations_run = 0;

    for iteration in 0..config.max_reflector_iterations {
        iterations_run = iteration + 1;
        let prompt = build_prompt(&playbook_text, &diary_text, &history_text);

        let response = match oracle.extract(&schema, &prompt, config).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, iteration, "oracle extraction failed, ending reflection loop");
                oracle_failed = true;
                break;
            }
        };

        let new_deltas = match parse_deltas(&response) {
            Ok(deltas) => deltas,
            Err(e) => {
                tracing::warn!(error = %e, iteration, "oracle returned an invalid shape, ending reflection loop");
                oracle_failed = true;
                break;
            }
        };

        let mut fresh = dedup_deltas(&all_deltas, &new_deltas);
        for delta in &mut fresh {
            delta.fill_missing_source_session(&diary.session_path);
        }

        if fresh.is_empty() {
            break;
        }

        all_deltas.extend(fresh);
        if all_deltas.len() >= MAX_DELTAS {
            all_deltas.truncate(MAX_DELTAS);
            break;
        }
    }

    ReflectionOutcome { deltas: all_deltas, iterations_run, oracle_failed }
}

fn parse_deltas(response: &Value) -> Result<Vec<PlaybookDelta>> {
    let deltas_value = response
        .get("deltas")
        .ok_or_else(|| CassMemoryError::OracleFailure { reason: "missing `deltas` field".into() })?;
    serde_json::from_value(deltas_value.clone())
        .map_err(|e| CassMemoryError::OracleFailure { reason: format!("invalid delta shape: {e}") })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BulletKind, Scope, SessionStatus};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn now() -> DateTime<Utc> {
        "2026-01-01T00:00:00Z".parse().unwrap()
    }

    fn diary() -> DiaryEntry {
        DiaryEntry {
            id: "d-1".into(),
            session_path: "/tmp/s1.jsonl".into(),
            timestamp: now(),
            agent: "claude".into(),
            workspace: None,
            status: SessionStatus::Success,
            accomplishments: vec!["Fixed the flaky retry test".into()],
            decisions: vec![],
            challenges: vec![],
            preferences: vec![],
            key_learnings: vec!["Always seed the RNG".into()],
            tags: vec![],
            search_anchors: vec![],
            related_sessions: vec![],
        }
    }

    fn add_delta_json(content: &str) -> Value {
        serde_json::json!({
            "op": "add",
            "bullet": { "content": content, "category": "testing", "scope": "global", "kind": "workflow_rule", "is_negative": false },
            "reason": "seen in session"
        })
    }

    struct ScriptedOracle {
        responses: Vec<Value>,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Oracle for ScriptedOracle {
        async fn extract(&self, _schema: &Value, _prompt: &str, _config: &Config) -> Result<Value> {
            let idx = self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses.get(idx).cloned().ok_or_else(|| CassMemoryError::OracleFailure { reason: "no more scripted responses".into() })
        }
    }

    struct FailingOracle;

    #[async_trait::async_trait]
    impl Oracle for FailingOracle {
        async fn extract(&self, _schema: &Value, _prompt: &str, _config: &Config) -> Result<Value> {
            Err(CassMemoryError::OracleFailure { reason: "connection refused".into() })
        }
    }

    #[tokio::test]
    async fn reflect_collects_deltas_until_empty_iteration() {
        let oracle = ScriptedOracle {
            responses: vec![
                serde_json::json!({ "deltas": [add_delta_json("Always seed the RNG in tests")] }),
                serde_json::json!({ "deltas": [] }),
            ],
            calls: AtomicUsize::new(0),
        };
        let playbook = Playbook::new(now());
        let outcome = reflect(&diary(), &playbook, &[], &oracle, &Config::default(), now()).await;
        assert_eq!(outcome.deltas.len(), 1);
        assert_eq!(outcome.iterations_run, 2);
        assert!(!outcome.oracle_failed);
    }

    #[tokio::test]
    async fn reflect_deduplicates_across_iterations() {
        let oracle = ScriptedOracle {
            responses: vec![
                serde_json::json!({ "deltas": [add_delta_json("Always seed the RNG")] }),
                serde_json::json!({ "deltas": [add_delta_json("always SEED the rng")] }),
                serde_json::json!({ "deltas": [] }),
            ],
            calls: AtomicUsize::new(0),
        };
        let playbook = Playbook::new(now());
        let outcome = reflect(&diary(), &playbook, &[], &oracle, &Config::default(), now()).await;
        assert_eq!(outcome.deltas.len(), 1);
    }

    #[tokio::test]
    async fn reflect_tolerates_oracle_failure() {
        let playbook = Playbook::new(now());
        let outcome = reflect(&diary(), &playbook, &[], &FailingOracle, &Config::default(), now()).await;
        assert!(outcome.deltas.is_empty());
        assert!(outcome.oracle_failed);
    }

    #[tokio::test]
    async fn reflect_fills_missing_source_session() {
        let oracle = ScriptedOracle {
            responses: vec![
                serde_json::json!({ "deltas": [add_delta_json("Always seed the RNG")] }),
                serde_json::json!({ "deltas": [] }),
            ],
            calls: AtomicUsize::new(0),
        };
        let playbook = Playbook::new(now());
        let outcome = reflect(&diary(), &playbook, &[], &oracle, &Config::default(), now()).await;
        let PlaybookDelta::Add { source_session, .. } = &outcome.deltas[0] else { panic!("expected add delta") };
        assert_eq!(source_session, "/tmp/s1.jsonl");
    }

    #[test]
    fn format_playbook_groups_by_category_with_glyphs() {
        let mut playbook = Playbook::new(now());
        playbook.bullets.push(active_test_bullet());
        let rendered = format_playbook(&playbook);
        assert!(rendered.contains("## testing"));
        assert!(rendered.contains("·"));
    }

    fn active_test_bullet() -> crate::model::PlaybookBullet {
        let mut b = crate::model::PlaybookBullet::new("Always run tests".into(), "testing".into(), BulletKind::WorkflowRule, Scope::Global, None, 90.0, now());
        b.state = crate::model::BulletState::Active;
        b
    }

    #[test]
    fn format_history_snippets_truncates_and_limits_count() {
        let hits: Vec<Hit> = (0..8)
            .map(|i| Hit { source_path: format!("s{i}"), line_number: None, snippet: "x".repeat(250), agent: None, score: None, timestamp: None })
            .collect();
        let rendered = format_history_snippets(&hits);
        assert_eq!(rendered.matches("- (").count(), HISTORY_SNIPPET_LIMIT);
    }
}
