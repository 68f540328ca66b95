//! Structured summary of one coding session, produced by the oracle from a
//! raw session transcript and consumed by the reflection loop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Success,
    Failure,
    Mixed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiaryEntry {
    pub id: String,
    pub session_path: String,
    pub timestamp: DateTime<Utc>,
    pub agent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
    pub status: SessionStatus,
    #[serde(default)]
    pub accomplishments: Vec<String>,
    #[serde(default)]
    pub decisions: Vec<String>,
    #[serde(default)]
    pub challenges: Vec<String>,
    #[serde(default)]
    pub preferences: Vec<String>,
    #[serde(default)]
    pub key_learnings: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub search_anchors: Vec<String>,
    #[serde(default)]
    pub related_sessions: Vec<String>,
}

impl DiaryEntry {
    /// Compact, section-by-section rendering for oracle prompts: omits
    /// empty sections rather than printing "(none)" noise.
    pub fn format_for_prompt(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("# Session: {}\n", self.session_path));
        out.push_str(&format!("agent={} status={:?}\n\n", self.agent, self.status));

        let sections: [(&str, &[String]); 6] = [
            ("Accomplishments", &self.accomplishments),
            ("Decisions", &self.decisions),
            ("Challenges", &self.challenges),
            ("Preferences", &self.preferences),
            ("Key learnings", &self.key_learnings),
            ("Tags", &self.tags),
        ];

        for (title, items) in sections {
            if items.is_empty() {
                continue;
            }
            out.push_str(&format!("## {title}\n"));
            for item in items {
                out.push_str(&format!("- {item}\n"));
            }
            out.push('\n');
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> DiaryEntry {
        DiaryEntry {
            id: "d-1".into(),
            session_path: "/tmp/s1.jsonl".into(),
            timestamp: "2026-01-01T00:00:00Z".parse().unwrap(),
            agent: "claude".into(),
            workspace: None,
            status: SessionStatus::Success,
            accomplishments: vec!["Fixed the flaky test".into()],
            decisions: vec![],
            challenges: vec![],
            preferences: vec![],
            key_learnings: vec!["Always seed the RNG in tests".into()],
            tags: vec![],
            search_anchors: vec![],
            related_sessions: vec![],
        }
    }

    #[test]
    fn empty_sections_are_omitted() {
        let rendered = entry().format_for_prompt();
        assert!(rendered.contains("## Accomplishments"));
        assert!(!rendered.contains("## Decisions"));
        assert!(!rendered.contains("## Challenges"));
    }
}
