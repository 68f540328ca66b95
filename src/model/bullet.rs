//! The playbook's atomic unit: a rule (or anti-pattern) with evidence-backed
//! confidence. Modeled on `ironclaw`'s `workspace::learnings::Learning`, but
//! file-backed instead of Postgres-backed and carrying the richer lifecycle
//! (maturity, scope overlay, inversion/deprecation provenance) a curation
//! engine needs.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Taxonomy of what kind of statement a bullet makes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulletKind {
    WorkflowRule,
    StackPattern,
    AntiPattern,
}

impl Default for BulletKind {
    fn default() -> Self {
        Self::WorkflowRule
    }
}

/// Where a bullet applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Global,
    Workspace,
}

/// Lifecycle state, distinct from `Maturity` (confidence tier).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulletState {
    Draft,
    Active,
    Retired,
}

/// Confidence tier, recomputed on every scoring update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Maturity {
    Candidate,
    Established,
    Proven,
    Deprecated,
}

impl Maturity {
    /// Multiplier applied to `effectiveScore`.
    pub fn factor(self) -> f64 {
        match self {
            Self::Proven => 1.5,
            Self::Established => 1.2,
            Self::Candidate => 1.0,
            Self::Deprecated => 0.0,
        }
    }
}

/// One recorded helpful/harmful signal against a bullet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackKind {
    Helpful,
    Harmful,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackEvent {
    #[serde(rename = "type")]
    pub kind: FeedbackKind,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_path: Option<String>,
}

/// An atomic rule in the playbook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybookBullet {
    pub id: String,
    pub content: String,
    pub category: String,
    pub kind: BulletKind,
    #[serde(default)]
    pub is_negative: bool,
    pub scope: Scope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
    pub state: BulletState,
    pub maturity: Maturity,
    #[serde(default)]
    pub helpful_count: u32,
    #[serde(default)]
    pub harmful_count: u32,
    #[serde(default)]
    pub feedback_events: Vec<FeedbackEvent>,
    pub confidence_decay_half_life_days: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deprecated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub source_sessions: Vec<String>,
    #[serde(default)]
    pub source_agents: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub deprecated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deprecation_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replaced_by: Option<String>,
}

impl PlaybookBullet {
    /// Generate a new bullet id: `b-<unix millis>-<6 hex chars>`.
    pub fn generate_id(now: DateTime<Utc>) -> String {
        let mut rng = rand::thread_rng();
        let suffix: String = (0..6)
            .map(|_| {
                let n: u8 = rng.gen_range(0..16);
                std::char::from_digit(n as u32, 16).unwrap()
            })
            .collect();
        format!("b-{}-{}", now.timestamp_millis(), suffix)
    }

    /// Construct a freshly-added bullet (invariant 1: counters start at zero
    /// and agree with an empty `feedback_events`).
    pub fn new(
        content: String,
        category: String,
        kind: BulletKind,
        scope: Scope,
        workspace: Option<String>,
        default_half_life_days: f64,
        now: DateTime<Utc>,
    ) -> Self {
        let is_negative = kind == BulletKind::AntiPattern;
        Self {
            id: Self::generate_id(now),
            content,
            category,
            kind,
            is_negative,
            scope,
            workspace,
            state: BulletState::Draft,
            maturity: Maturity::Candidate,
            helpful_count: 0,
            harmful_count: 0,
            feedback_events: Vec::new(),
            confidence_decay_half_life_days: default_half_life_days,
            created_at: now,
            updated_at: now,
            deprecated_at: None,
            source_sessions: Vec::new(),
            source_agents: Vec::new(),
            tags: Vec::new(),
            pinned: false,
            deprecated: false,
            deprecation_reason: None,
            replaced_by: None,
        }
    }

    /// Case-folded content, used for dedup/identity comparisons (invariant 5).
    pub fn content_key(&self) -> String {
        self.content.trim().to_lowercase()
    }

    /// Append a feedback event and keep `helpful_count`/`harmful_count` in
    /// sync with it (invariant 1).
    pub fn push_feedback(&mut self, kind: FeedbackKind, source_session: Option<String>, now: DateTime<Utc>) {
        match kind {
            FeedbackKind::Helpful => self.helpful_count += 1,
            FeedbackKind::Harmful => self.harmful_count += 1,
        }
        self.feedback_events.push(FeedbackEvent { kind, timestamp: now, session_path: source_session });
        self.updated_at = now;
    }

    /// Mark the bullet deprecated (invariant 2: deprecated ⇒ retired + deprecated maturity).
    pub fn deprecate(&mut self, reason: String, replaced_by: Option<String>, now: DateTime<Utc>) {
        self.deprecated = true;
        self.state = BulletState::Retired;
        self.maturity = Maturity::Deprecated;
        self.deprecation_reason = Some(reason);
        self.replaced_by = replaced_by;
        self.deprecated_at = Some(now);
        self.updated_at = now;
    }

    pub fn is_active(&self) -> bool {
        self.state != BulletState::Retired && !self.deprecated
    }

    /// Age in days since the last feedback event, or since creation if none.
    pub fn last_feedback_age_days(&self, now: DateTime<Utc>) -> f64 {
        let reference = self
            .feedback_events
            .last()
            .map(|e| e.timestamp)
            .unwrap_or(self.created_at);
        (now - reference).num_seconds() as f64 / 86_400.0
    }
}

/// A deprecated pattern remembered globally (not tied to one bullet) — used
/// for "don't re-suggest this" style warnings surfaced by the context
/// assembler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeprecatedPattern {
    pub pattern: String,
    pub replacement: String,
    pub reason: String,
    pub deprecated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybookMetadata {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub total_reflections: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reflection: Option<DateTime<Utc>>,
}

impl PlaybookMetadata {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { version: 1, created_at: now, updated_at: now, total_reflections: 0, last_reflection: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Playbook {
    #[serde(default = "schema_version_default")]
    pub schema_version: u32,
    pub metadata: PlaybookMetadata,
    #[serde(default)]
    pub bullets: Vec<PlaybookBullet>,
    #[serde(default)]
    pub deprecated_patterns: Vec<DeprecatedPattern>,
}

fn schema_version_default() -> u32 {
    1
}

impl Playbook {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            schema_version: 1,
            metadata: PlaybookMetadata::new(now),
            bullets: Vec::new(),
            deprecated_patterns: Vec::new(),
        }
    }

    pub fn find(&self, id: &str) -> Option<&PlaybookBullet> {
        self.bullets.iter().find(|b| b.id == id)
    }

    pub fn find_mut(&mut self, id: &str) -> Option<&mut PlaybookBullet> {
        self.bullets.iter_mut().find(|b| b.id == id)
    }

    /// Whether an *active* bullet with identical case-folded content already
    /// exists in the given scope (invariant 5).
    pub fn has_active_duplicate(&self, content: &str, scope: Scope) -> bool {
        let key = content.trim().to_lowercase();
        self.bullets
            .iter()
            .any(|b| b.is_active() && b.scope == scope && b.content_key() == key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        "2026-01-01T00:00:00Z".parse().unwrap()
    }

    #[test]
    fn new_bullet_has_zeroed_counters() {
        let b = PlaybookBullet::new(
            "Always run tests before committing".into(),
            "testing".into(),
            BulletKind::WorkflowRule,
            Scope::Global,
            None,
            90.0,
            now(),
        );
        assert_eq!(b.helpful_count, 0);
        assert_eq!(b.harmful_count, 0);
        assert!(b.feedback_events.is_empty());
        assert_eq!(b.maturity, Maturity::Candidate);
        assert_eq!(b.state, BulletState::Draft);
    }

    #[test]
    fn push_feedback_keeps_counters_in_sync_with_events() {
        let mut b = PlaybookBullet::new("x".into(), "c".into(), BulletKind::WorkflowRule, Scope::Global, None, 90.0, now());
        b.push_feedback(FeedbackKind::Helpful, Some("s1".into()), now());
        b.push_feedback(FeedbackKind::Helpful, None, now());
        b.push_feedback(FeedbackKind::Harmful, None, now());

        let helpful = b.feedback_events.iter().filter(|e| e.kind == FeedbackKind::Helpful).count();
        let harmful = b.feedback_events.iter().filter(|e| e.kind == FeedbackKind::Harmful).count();
        assert_eq!(b.helpful_count as usize, helpful);
        assert_eq!(b.harmful_count as usize, harmful);
    }

    #[test]
    fn deprecate_sets_retired_and_deprecated_maturity() {
        let mut b = PlaybookBullet::new("x".into(), "c".into(), BulletKind::WorkflowRule, Scope::Global, None, 90.0, now());
        b.deprecate("superseded".into(), None, now());
        assert_eq!(b.state, BulletState::Retired);
        assert_eq!(b.maturity, Maturity::Deprecated);
        assert!(b.deprecated);
        assert!(!b.is_active());
    }

    #[test]
    fn content_key_is_case_and_trim_insensitive() {
        let b1 = PlaybookBullet::new("  Use Cargo Clippy  ".into(), "c".into(), BulletKind::WorkflowRule, Scope::Global, None, 90.0, now());
        let b2 = PlaybookBullet::new("use cargo clippy".into(), "c".into(), BulletKind::WorkflowRule, Scope::Global, None, 90.0, now());
        assert_eq!(b1.content_key(), b2.content_key());
    }

    #[test]
    fn has_active_duplicate_ignores_retired_bullets() {
        let mut playbook = Playbook::new(now());
        let mut b = PlaybookBullet::new("Use rustfmt".into(), "style".into(), BulletKind::WorkflowRule, Scope::Global, None, 90.0, now());
        b.deprecate("stale".into(), None, now());
        playbook.bullets.push(b);
        assert!(!playbook.has_active_duplicate("use rustfmt", Scope::Global));
    }
}
