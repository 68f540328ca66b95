//! Proposed mutations to the playbook.
//!
//! Modeled as a tagged sum: each variant carries only the payload it needs,
//! and the dedup hash function pattern-matches on the tag.

use serde::{Deserialize, Serialize};

use super::bullet::{BulletKind, BulletState, Scope};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBullet {
    pub content: String,
    pub category: String,
    pub scope: Scope,
    pub kind: BulletKind,
    #[serde(default)]
    pub is_negative: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PlaybookDelta {
    Add {
        bullet: NewBullet,
        #[serde(default)]
        source_session: String,
        reason: String,
        /// State the evidence gate assigned this bullet (`Draft` pending
        /// more evidence, `Active` on auto-accept). `None` until the
        /// validation stage runs; an oracle response never sets this.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        suggested_state: Option<BulletState>,
    },
    Replace {
        bullet_id: String,
        new_content: String,
        reason: String,
    },
    Merge {
        bullet_ids: Vec<String>,
        merged_content: String,
        reason: String,
    },
    Deprecate {
        bullet_id: String,
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        replaced_by: Option<String>,
    },
    Helpful {
        bullet_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source_session: Option<String>,
        reason: String,
    },
    Harmful {
        bullet_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source_session: Option<String>,
        reason: String,
    },
}

impl PlaybookDelta {
    /// Structural, case-folded dedup key.
    pub fn dedup_hash(&self) -> String {
        match self {
            Self::Add { bullet, .. } => format!("add:{}", bullet.content.trim().to_lowercase()),
            Self::Replace { bullet_id, new_content, .. } => {
                format!("replace:{bullet_id}:{}", new_content.trim().to_lowercase())
            }
            Self::Merge { bullet_ids, .. } => {
                let mut ids = bullet_ids.clone();
                ids.sort();
                format!("merge:{}", ids.join(","))
            }
            Self::Helpful { bullet_id, .. } => format!("helpful:{bullet_id}"),
            Self::Harmful { bullet_id, .. } => format!("harmful:{bullet_id}"),
            Self::Deprecate { bullet_id, .. } => format!("deprecate:{bullet_id}"),
        }
    }

    /// Record the evidence gate's verdict on an `Add` delta's initial
    /// state. No-op on every other variant.
    pub fn set_suggested_state(&mut self, state: BulletState) {
        if let Self::Add { suggested_state, .. } = self {
            *suggested_state = Some(state);
        }
    }

    /// Inject `source_session` for deltas that carry one but lack a value.
    /// `Deprecate`/`Replace`/`Merge` have no `source_session` field by
    /// design and are left unchanged.
    pub fn fill_missing_source_session(&mut self, session_path: &str) {
        match self {
            Self::Add { source_session, .. } if source_session.is_empty() => {
                *source_session = session_path.to_string();
            }
            Self::Helpful { source_session, .. } | Self::Harmful { source_session, .. } => {
                if source_session.is_none() {
                    *source_session = Some(session_path.to_string());
                }
            }
            _ => {}
        }
    }
}

/// Deduplicate `incoming` against both `already_seen` and itself, preserving
/// order and returning only first-occurrence deltas.
pub fn dedup_deltas(already_seen: &[PlaybookDelta], incoming: &[PlaybookDelta]) -> Vec<PlaybookDelta> {
    let mut seen: std::collections::HashSet<String> =
        already_seen.iter().map(|d| d.dedup_hash()).collect();
    let mut out = Vec::new();
    for delta in incoming {
        let hash = delta.dedup_hash();
        if seen.insert(hash) {
            out.push(delta.clone());
        }
    }
    out
}
