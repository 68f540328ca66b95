//! Evidence-count gate and oracle-verdict normalization.

use std::collections::HashSet;

use crate::config::Config;
use crate::history::{Hit, HistoryTool, SearchOptions};
use crate::model::BulletState;

const SUCCESS_MARKERS: &[&str] = &["fixed", "solved", "resolved", "works", "working"];
const FAILURE_MARKERS: &[&str] = &["failed", "crashed", "doesn't work", "error"];
/// Markers that merely *contain* a success marker as a substring but are not
/// one — `fixed-width` must not count as `fixed`.
const SUCCESS_EXCLUSIONS: &[&str] = &["fixed-width"];

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "that", "this", "from", "have", "has", "was", "were", "are",
    "but", "not", "you", "your", "they", "them", "will", "can", "should", "would", "could",
    "into", "when", "then", "than", "all", "any", "its", "it's", "use", "used", "using",
];

pub fn extract_keywords(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for raw in text.split(|c: char| !c.is_alphanumeric()) {
        let word = raw.to_lowercase();
        if word.len() < 3 || STOPWORDS.contains(&word.as_str()) {
            continue;
        }
        if seen.insert(word.clone()) {
            out.push(word);
        }
    }
    out
}

fn contains_success_marker(snippet_lower: &str) -> bool {
    SUCCESS_MARKERS.iter().any(|marker| {
        snippet_lower.match_indices(marker).any(|(idx, _)| {
            !SUCCESS_EXCLUSIONS.iter().any(|excl| {
                let excl_start = excl.find(marker).unwrap_or(0);
                let window_start = idx.saturating_sub(excl_start);
                snippet_lower[window_start..].starts_with(excl)
            })
        })
    })
}

fn contains_failure_marker(snippet_lower: &str) -> bool {
    FAILURE_MARKERS.iter().any(|marker| snippet_lower.contains(marker))
}

#[derive(Debug, Clone, PartialEq)]
pub struct GateVerdict {
    pub passed: bool,
    pub suggested_state: &'static str,
    pub session_count: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub reason: String,
}

impl GateVerdict {
    /// `suggested_state` as the bullet lifecycle state it names.
    pub fn suggested_bullet_state(&self) -> BulletState {
        match self.suggested_state {
            "active" => BulletState::Active,
            _ => BulletState::Draft,
        }
    }
}

/// Verify a proposed rule against recorded history.
pub async fn evidence_count_gate(candidate_content: &str, config: &Config, history: &dyn HistoryTool) -> GateVerdict {
    let keywords = extract_keywords(candidate_content);
    if keywords.is_empty() {
        return GateVerdict {
            passed: true,
            suggested_state: "draft",
            session_count: 0,
            success_count: 0,
            failure_count: 0,
            reason: "No meaningful keywords".into(),
        };
    }

    let query = keywords.join(" ");
    let options = SearchOptions { limit: Some(50), ..Default::default() };
    let hits = history.safe_search(&query, &options).await;

    let by_session = group_by_session(&hits);
    let session_count = by_session.len();
    let mut success_count = 0;
    let mut failure_count = 0;
    for snippets in by_session.values() {
        let combined: String = snippets.join(" ").to_lowercase();
        if contains_success_marker(&combined) {
            success_count += 1;
        }
        if contains_failure_marker(&combined) {
            failure_count += 1;
        }
    }

    if failure_count >= 2 {
        return GateVerdict {
            passed: false,
            suggested_state: "draft",
            session_count,
            success_count,
            failure_count,
            reason: "Strong failure signal".into(),
        };
    }
    if success_count >= 5 {
        return GateVerdict {
            passed: true,
            suggested_state: "active",
            session_count,
            success_count,
            failure_count,
            reason: "Auto-accepting".into(),
        };
    }

    GateVerdict {
        passed: true,
        suggested_state: "draft",
        session_count,
        success_count,
        failure_count,
        reason: "ambiguous".into(),
    }
}

fn group_by_session(hits: &[Hit]) -> std::collections::HashMap<&str, Vec<&str>> {
    let mut map: std::collections::HashMap<&str, Vec<&str>> = std::collections::HashMap::new();
    for hit in hits {
        map.entry(hit.source_path.as_str()).or_default().push(hit.snippet.as_str());
    }
    map
}

/// Oracle-reported verdict before normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawVerdict {
    Accept,
    Refine,
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormalizedVerdict {
    Accept,
    AcceptWithCaution,
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedResult {
    pub verdict: NormalizedVerdict,
    pub valid: bool,
    pub confidence: f64,
}

/// `normalizeValidatorVerdict`.
pub fn normalize_validator_verdict(raw: RawVerdict, confidence: f64) -> NormalizedResult {
    match raw {
        RawVerdict::Accept => NormalizedResult { verdict: NormalizedVerdict::Accept, valid: true, confidence },
        RawVerdict::Refine => NormalizedResult {
            verdict: NormalizedVerdict::AcceptWithCaution,
            valid: true,
            confidence: confidence * 0.8,
        },
        RawVerdict::Reject => NormalizedResult { verdict: NormalizedVerdict::Reject, valid: false, confidence },
    }
}
