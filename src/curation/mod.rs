//! The curation merger: applies a batch of deltas to a playbook and inverts
//! persistently harmful bullets into anti-patterns.

use chrono::{DateTime, Utc};

use crate::config::Config;
use crate::model::{dedup_deltas, BulletKind, Playbook, PlaybookBullet, PlaybookDelta};
use crate::scoring::decayed_counts;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    DuplicateContent,
    UnknownBulletId(String),
    EmptyMergeSet,
    ToxicContent,
}

#[derive(Debug)]
pub struct CurationResult {
    pub playbook: Playbook,
    pub applied: usize,
    pub skipped: Vec<SkipReason>,
    pub inversions: Vec<PlaybookBullet>,
    /// Case-folded content of anti-patterns that themselves just proved
    /// harmful; callers append these to the toxic-bullets log.
    pub newly_toxic: Vec<String>,
}

/// `curate(playbook, deltas, toxic_content, config) ->
/// {playbook', applied, skipped, inversions, newly_toxic}`. Operates on a
/// cloned copy; callers persist the result. `toxic_content` is the
/// case-folded content already on the toxic-bullets log; `Add` deltas
/// matching an entry are refused.
pub fn curate(playbook: &Playbook, deltas: &[PlaybookDelta], toxic_content: &[String], config: &Config, now: DateTime<Utc>) -> CurationResult {
    let deduped = dedup_deltas(&[], deltas);

    let mut next = playbook.clone();
    let mut applied = 0;
    let mut skipped = Vec::new();

    for delta in &deduped {
        match apply_one(&mut next, delta, toxic_content, config, now) {
            Ok(()) => applied += 1,
            Err(reason) => skipped.push(reason),
        }
    }

    let (inversions, newly_toxic) = invert_harmful_bullets(&mut next, config, now);

    CurationResult { playbook: next, applied, skipped, inversions, newly_toxic }
}

fn apply_one(playbook: &mut Playbook, delta: &PlaybookDelta, toxic_content: &[String], config: &Config, now: DateTime<Utc>) -> Result<(), SkipReason> {
    match delta {
        PlaybookDelta::Add { bullet, source_session, suggested_state, .. } => {
            if playbook.has_active_duplicate(&bullet.content, bullet.scope) {
                return Err(SkipReason::DuplicateContent);
            }
            let folded = bullet.content.trim().to_lowercase();
            if toxic_content.iter().any(|t| t == &folded) {
                return Err(SkipReason::ToxicContent);
            }
            let mut new_bullet = PlaybookBullet::new(
                bullet.content.clone(),
                bullet.category.clone(),
                bullet.kind,
                bullet.scope,
                None,
                config.decay_half_life_days,
                now,
            );
            new_bullet.is_negative = bullet.is_negative;
            new_bullet.state = suggested_state.unwrap_or(crate::model::BulletState::Active);
            if !source_session.is_empty() {
                new_bullet.source_sessions.push(source_session.clone());
            }
            playbook.bullets.push(new_bullet);
            Ok(())
        }

        PlaybookDelta::Replace { bullet_id, new_content, .. } => {
            let bullet = playbook.find_mut(bullet_id).ok_or_else(|| SkipReason::UnknownBulletId(bullet_id.clone()))?;
            bullet.content = new_content.clone();
            bullet.updated_at = now;
            if bullet.maturity == crate::model::Maturity::Deprecated {
                bullet.maturity = crate::model::Maturity::Candidate;
            }
            Ok(())
        }

        PlaybookDelta::Merge { bullet_ids, merged_content, .. } => {
            if bullet_ids.is_empty() {
                return Err(SkipReason::EmptyMergeSet);
            }
            let mut sources: Vec<PlaybookBullet> = Vec::new();
            for id in bullet_ids {
                match playbook.find(id) {
                    Some(b) => sources.push(b.clone()),
                    None => return Err(SkipReason::UnknownBulletId(id.clone())),
                }
            }

            let first = &sources[0];
            let mut merged = PlaybookBullet::new(
                merged_content.clone(),
                first.category.clone(),
                first.kind,
                first.scope,
                first.workspace.clone(),
                config.decay_half_life_days,
                now,
            );
            for source in &sources {
                for session in &source.source_sessions {
                    if !merged.source_sessions.contains(session) {
                        merged.source_sessions.push(session.clone());
                    }
                }
                for agent in &source.source_agents {
                    if !merged.source_agents.contains(agent) {
                        merged.source_agents.push(agent.clone());
                    }
                }
            }
            let merged_id = merged.id.clone();
            playbook.bullets.push(merged);

            for id in bullet_ids {
                if let Some(b) = playbook.find_mut(id) {
                    b.deprecate("merged into a combined rule".into(), Some(merged_id.clone()), now);
                }
            }
            Ok(())
        }

        PlaybookDelta::Deprecate { bullet_id, reason, replaced_by } => {
            let bullet = playbook.find_mut(bullet_id).ok_or_else(|| SkipReason::UnknownBulletId(bullet_id.clone()))?;
            bullet.deprecate(reason.clone(), replaced_by.clone(), now);
            Ok(())
        }

        PlaybookDelta::Helpful { bullet_id, source_session, .. } => {
            let bullet = playbook.find_mut(bullet_id).ok_or_else(|| SkipReason::UnknownBulletId(bullet_id.clone()))?;
            bullet.push_feedback(crate::model::FeedbackKind::Helpful, source_session.clone(), now);
            bullet.maturity = crate::scoring::calculate_maturity_state(bullet, config, now);
            Ok(())
        }

        PlaybookDelta::Harmful { bullet_id, source_session, .. } => {
            let bullet = playbook.find_mut(bullet_id).ok_or_else(|| SkipReason::UnknownBulletId(bullet_id.clone()))?;
            bullet.push_feedback(crate::model::FeedbackKind::Harmful, source_session.clone(), now);
            bullet.maturity = crate::scoring::calculate_maturity_state(bullet, config, now);
            Ok(())
        }
    }
}

/// After applying deltas, deprecate + invert any non-pinned bullet whose
/// decayed harmful count has crossed the prune threshold and whose harmful
/// ratio is at least half. When the bullet being inverted is itself an
/// anti-pattern (a prior inversion that has now also proven harmful), its
/// original content is reported as newly toxic instead of inverted again.
fn invert_harmful_bullets(playbook: &mut Playbook, config: &Config, now: DateTime<Utc>) -> (Vec<PlaybookBullet>, Vec<String>) {
    let mut inversions = Vec::new();
    let mut newly_toxic = Vec::new();
    let candidate_ids: Vec<String> = playbook
        .bullets
        .iter()
        .filter(|b| b.is_active() && !b.pinned)
        .map(|b| b.id.clone())
        .collect();

    for id in candidate_ids {
        let Some(bullet) = playbook.find(&id) else { continue };
        let counts = decayed_counts(bullet, now);
        let total = counts.helpful + counts.harmful;
        let ratio = if total > 0.0 { counts.harmful / total } else { 0.0 };

        if counts.harmful < config.prune_harmful_threshold || ratio < 0.5 {
            continue;
        }

        if bullet.kind == BulletKind::AntiPattern {
            let original = bullet.content.strip_prefix("AVOID: ").unwrap_or(&bullet.content);
            newly_toxic.push(original.trim().to_lowercase());
            if let Some(b) = playbook.find_mut(&id) {
                b.deprecate("inverted anti-pattern itself proved harmful".into(), None, now);
            }
            continue;
        }

        let mut anti_pattern = PlaybookBullet::new(
            format!("AVOID: {}", bullet.content),
            bullet.category.clone(),
            BulletKind::AntiPattern,
            bullet.scope,
            bullet.workspace.clone(),
            config.scoring.decay_half_life_days,
            now,
        );
        anti_pattern.is_negative = true;
        anti_pattern.state = crate::model::BulletState::Active;
        anti_pattern.source_sessions = bullet.source_sessions.clone();
        anti_pattern.source_agents = bullet.source_agents.clone();
        anti_pattern.tags = bullet.tags.clone();

        if let Some(b) = playbook.find_mut(&id) {
            b.deprecate("inverted: persistently harmful".into(), Some(anti_pattern.id.clone()), now);
        }
        playbook.bullets.push(anti_pattern.clone());
        inversions.push(anti_pattern);
    }

    (inversions, newly_toxic)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FeedbackKind, Scope};

    fn now() -> DateTime<Utc> {
        "2026-01-01T00:00:00Z".parse().unwrap()
    }

    fn config() -> Config {
        let mut c = Config::default();
        c.prune_harmful_threshold = 3.0;
        c
    }

    #[test]
    fn add_delta_appends_new_bullet() {
        let playbook = Playbook::new(now());
        let delta = PlaybookDelta::Add {
            bullet: crate::model::NewBullet {
                content: "Always run clippy before pushing".into(),
                category: "testing".into(),
                scope: Scope::Global,
                kind: BulletKind::WorkflowRule,
                is_negative: false,
            },
            source_session: "s1".into(),
            reason: "seen twice".into(),
            suggested_state: None,
        };
        let result = curate(&playbook, &[delta], &[], &config(), now());
        assert_eq!(result.applied, 1);
        assert_eq!(result.playbook.bullets.len(), 1);
        assert_eq!(result.playbook.bullets[0].maturity, crate::model::Maturity::Candidate);
    }

    #[test]
    fn add_delta_rejects_active_duplicate() {
        let mut playbook = Playbook::new(now());
        playbook.bullets.push(PlaybookBullet::new("Use rustfmt".into(), "style".into(), BulletKind::WorkflowRule, Scope::Global, None, 90.0, now()));
        let delta = PlaybookDelta::Add {
            bullet: crate::model::NewBullet { content: "use RUSTFMT".into(), category: "style".into(), scope: Scope::Global, kind: BulletKind::WorkflowRule, is_negative: false },
            source_session: "s1".into(),
            reason: "dup".into(),
            suggested_state: None,
        };
        let result = curate(&playbook, &[delta], &[], &config(), now());
        assert_eq!(result.applied, 0);
        assert_eq!(result.skipped, vec![SkipReason::DuplicateContent]);
    }

    #[test]
    fn harmful_delta_on_unknown_id_is_skipped_not_fatal() {
        let playbook = Playbook::new(now());
        let delta = PlaybookDelta::Harmful { bullet_id: "missing".into(), source_session: None, reason: "bad".into() };
        let result = curate(&playbook, &[delta], &[], &config(), now());
        assert_eq!(result.applied, 0);
        assert_eq!(result.skipped.len(), 1);
    }

    #[test]
    fn auto_deprecate_scenario_produces_avoid_inversion() {
        let mut playbook = Playbook::new(now());
        let mut bullet = PlaybookBullet::new("Always use var for everything".into(), "style".into(), BulletKind::WorkflowRule, Scope::Global, None, 90.0, now());
        for _ in 0..5 {
            bullet.push_feedback(FeedbackKind::Harmful, None, now());
        }
        playbook.bullets.push(bullet);

        let result = curate(&playbook, &[], &[], &config(), now());
        assert_eq!(result.inversions.len(), 1);
        assert!(result.inversions[0].content.starts_with("AVOID:"));
        assert!(result.inversions[0].is_negative);

        let original = result.playbook.bullets.iter().find(|b| b.content == "Always use var for everything").unwrap();
        assert!(original.deprecated);
    }

    #[test]
    fn pinned_bullet_is_never_inverted() {
        let mut playbook = Playbook::new(now());
        let mut bullet = PlaybookBullet::new("Pinned rule".into(), "style".into(), BulletKind::WorkflowRule, Scope::Global, None, 90.0, now());
        bullet.pinned = true;
        for _ in 0..5 {
            bullet.push_feedback(FeedbackKind::Harmful, None, now());
        }
        playbook.bullets.push(bullet);
        let result = curate(&playbook, &[], &[], &config(), now());
        assert!(result.inversions.is_empty());
    }

    #[test]
    fn anti_pattern_that_turns_harmful_is_reported_toxic_not_reinverted() {
        let mut playbook = Playbook::new(now());
        let mut anti_pattern = PlaybookBullet::new(
            "AVOID: Always use var for everything".into(),
            "style".into(),
            BulletKind::AntiPattern,
            Scope::Global,
            None,
            90.0,
            now(),
        );
        for _ in 0..5 {
            anti_pattern.push_feedback(FeedbackKind::Harmful, None, now());
        }
        playbook.bullets.push(anti_pattern);

        let result = curate(&playbook, &[], &[], &config(), now());
        assert!(result.inversions.is_empty());
        assert_eq!(result.newly_toxic, vec!["always use var for everything".to_string()]);
    }

    #[test]
    fn add_delta_rejects_toxic_content() {
        let playbook = Playbook::new(now());
        let delta = PlaybookDelta::Add {
            bullet: crate::model::NewBullet {
                content: "Always use var for everything".into(),
                category: "style".into(),
                scope: Scope::Global,
                kind: BulletKind::WorkflowRule,
                is_negative: false,
            },
            source_session: "s1".into(),
            reason: "seen again".into(),
            suggested_state: None,
        };
        let toxic = vec!["always use var for everything".to_string()];
        let result = curate(&playbook, &[delta], &toxic, &config(), now());
        assert_eq!(result.applied, 0);
        assert_eq!(result.skipped, vec![SkipReason::ToxicContent]);
    }

    #[test]
    fn merge_deprecates_sources_and_creates_combined_bullet() {
        let mut playbook = Playbook::new(now());
        let b1 = PlaybookBullet::new("Use tabs".into(), "style".into(), BulletKind::WorkflowRule, Scope::Global, None, 90.0, now());
        let b2 = PlaybookBullet::new("Use 4 spaces".into(), "style".into(), BulletKind::WorkflowRule, Scope::Global, None, 90.0, now());
        let (id1, id2) = (b1.id.clone(), b2.id.clone());
        playbook.bullets.push(b1);
        playbook.bullets.push(b2);

        let delta = PlaybookDelta::Merge { bullet_ids: vec![id1.clone(), id2.clone()], merged_content: "Use consistent indentation".into(), reason: "duplicate intent".into() };
        let result = curate(&playbook, &[delta], &[], &config(), now());
        assert_eq!(result.applied, 1);
        assert!(result.playbook.find(&id1).unwrap().deprecated);
        assert!(result.playbook.find(&id2).unwrap().deprecated);
        assert!(result.playbook.bullets.iter().any(|b| b.content == "Use consistent indentation"));
    }
}
