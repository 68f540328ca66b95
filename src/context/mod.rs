//! Context assembler: ranks playbook bullets and optional history snippets
//! against a task description.

use chrono::{DateTime, Utc};

use crate::config::Config;
use crate::history::{HistoryTool, SearchOptions};
use crate::model::{Playbook, PlaybookBullet};
use crate::scoring::effective_score;
use crate::validation::extract_keywords;

const CATEGORY_BOOST: f64 = 0.25;
const SNIPPET_MAX_LEN: usize = 200;

#[derive(Debug, Clone)]
pub struct RankedBullet {
    pub bullet: PlaybookBullet,
    pub relevance: f64,
}

#[derive(Debug, Clone)]
pub struct HistorySnippet {
    pub source_path: String,
    pub snippet: String,
}

#[derive(Debug, Clone)]
pub struct ContextOptions {
    pub workspace: Option<String>,
    pub days: Option<u32>,
    pub max_bullets: usize,
    pub max_history: usize,
}

impl ContextOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            workspace: None,
            days: None,
            max_bullets: config.max_bullets_in_context,
            max_history: config.max_history_in_context,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AssembledContext {
    pub task: String,
    pub relevant_bullets: Vec<RankedBullet>,
    pub anti_patterns: Vec<RankedBullet>,
    pub history_snippets: Vec<HistorySnippet>,
    pub deprecated_warnings: Vec<String>,
    pub suggested_queries: Vec<String>,
}

fn keyword_overlap_score(keywords: &[String], bullet: &PlaybookBullet) -> f64 {
    if keywords.is_empty() {
        return 0.0;
    }
    let content_lower = bullet.content.to_lowercase();
    let tag_words: Vec<String> = bullet.tags.iter().map(|t| t.to_lowercase()).collect();

    let mut hits = 0usize;
    for kw in keywords {
        if content_lower.contains(kw.as_str()) || tag_words.iter().any(|t| t == kw) {
            hits += 1;
        }
    }
    hits as f64 / keywords.len() as f64
}

fn truncate_snippet(text: &str) -> String {
    if text.chars().count() <= SNIPPET_MAX_LEN {
        text.to_string()
    } else {
        let truncated: String = text.chars().take(SNIPPET_MAX_LEN).collect();
        format!("{truncated}...")
    }
}

/// Rank and assemble context for `task`. Pass
/// `history` as `None` to skip the optional history query.
pub async fn assemble(
    task: &str,
    playbook: &Playbook,
    config: &Config,
    options: &ContextOptions,
    history: Option<&dyn HistoryTool>,
    now: DateTime<Utc>,
) -> AssembledContext {
    let keywords = extract_keywords(task);

    let mut positive: Vec<RankedBullet> = Vec::new();
    let mut negative: Vec<RankedBullet> = Vec::new();

    for bullet in &playbook.bullets {
        if !bullet.is_active() {
            continue;
        }
        let overlap = keyword_overlap_score(&keywords, bullet);
        if overlap <= 0.0 {
            continue;
        }
        let category_match = keywords.iter().any(|k| bullet.category.to_lowercase() == *k);
        let boost = if category_match { CATEGORY_BOOST } else { 0.0 };
        let score = effective_score(bullet, config, now);
        let relevance = overlap * (score.max(0.0) + 1.0) + boost;

        if bullet.is_negative {
            negative.push(RankedBullet { bullet: bullet.clone(), relevance });
        } else {
            positive.push(RankedBullet { bullet: bullet.clone(), relevance });
        }
    }

    positive.sort_by(|a, b| b.relevance.partial_cmp(&a.relevance).unwrap_or(std::cmp::Ordering::Equal));
    negative.sort_by(|a, b| b.relevance.partial_cmp(&a.relevance).unwrap_or(std::cmp::Ordering::Equal));
    positive.truncate(options.max_bullets);

    let history_snippets = if let Some(tool) = history {
        if keywords.is_empty() {
            Vec::new()
        } else {
            let query = keywords.join(" ");
            let search_options = SearchOptions {
                limit: Some(options.max_history as u32),
                days: options.days,
                agent: None,
                workspace: options.workspace.clone(),
                fields: None,
                timeout: None,
            };
            tool.safe_search(&query, &search_options)
                .await
                .into_iter()
                .take(options.max_history)
                .map(|hit| HistorySnippet { source_path: hit.source_path, snippet: truncate_snippet(&hit.snippet) })
                .collect()
        }
    } else {
        Vec::new()
    };

    let deprecated_warnings: Vec<String> = playbook
        .deprecated_patterns
        .iter()
        .filter(|p| keywords.iter().any(|k| p.pattern.to_lowercase().contains(k.as_str())))
        .map(|p| format!("{} is deprecated: {} (use {} instead)", p.pattern, p.reason, p.replacement))
        .collect();

    let suggested_queries = keywords.iter().take(3).map(|k| format!("{k} examples in this codebase")).collect();

    AssembledContext {
        task: task.to_string(),
        relevant_bullets: positive,
        anti_patterns: negative,
        history_snippets,
        deprecated_warnings,
        suggested_queries,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BulletKind, Scope};

    fn now() -> DateTime<Utc> {
        "2026-01-01T00:00:00Z".parse().unwrap()
    }

    fn bullet(content: &str, category: &str) -> PlaybookBullet {
        let mut b = PlaybookBullet::new(content.into(), category.into(), BulletKind::WorkflowRule, Scope::Global, None, 90.0, now());
        b.state = crate::model::BulletState::Active;
        b
    }

    #[tokio::test]
    async fn assemble_ranks_bullets_by_keyword_overlap() {
        let mut playbook = Playbook::new(now());
        playbook.bullets.push(bullet("Always run cargo clippy before committing", "testing"));
        playbook.bullets.push(bullet("Prefer tabs over spaces", "style"));

        let options = ContextOptions::from_config(&Config::default());
        let ctx = assemble("how do I run clippy", &playbook, &Config::default(), &options, None, now()).await;
        assert_eq!(ctx.relevant_bullets.len(), 1);
        assert!(ctx.relevant_bullets[0].bullet.content.contains("clippy"));
    }

    #[tokio::test]
    async fn assemble_separates_anti_patterns() {
        let mut playbook = Playbook::new(now());
        let mut anti = bullet("AVOID: using var for everything", "style");
        anti.is_negative = true;
        playbook.bullets.push(anti);

        let options = ContextOptions::from_config(&Config::default());
        let ctx = assemble("var usage style", &playbook, &Config::default(), &options, None, now()).await;
        assert!(ctx.relevant_bullets.is_empty());
        assert_eq!(ctx.anti_patterns.len(), 1);
    }

    #[test]
    fn truncate_snippet_adds_ellipsis_only_when_over_limit() {
        let short = "a short snippet";
        assert_eq!(truncate_snippet(short), short);

        let long = "x".repeat(250);
        let truncated = truncate_snippet(&long);
        assert!(truncated.ends_with("..."));
        assert!(truncated.len() < long.len());
    }

    #[tokio::test]
    async fn deprecated_warnings_surface_matching_patterns() {
        let mut playbook = Playbook::new(now());
        playbook.deprecated_patterns.push(crate::model::DeprecatedPattern {
            pattern: "global mutable config".into(),
            replacement: "explicit config passing".into(),
            reason: "breaks concurrent invocations".into(),
            deprecated_at: now(),
        });
        let options = ContextOptions::from_config(&Config::default());
        let ctx = assemble("global config pattern", &playbook, &Config::default(), &options, None, now()).await;
        assert_eq!(ctx.deprecated_warnings.len(), 1);
    }
}
