//! Time-decayed scoring, maturity transitions, and staleness.
//!
//! Every function here is pure: deterministic given a bullet, a config, and
//! `now`. No function reads the clock or mutates anything — callers pass
//! `now` explicitly, matching the per-invocation config-loading discipline
//! used throughout this crate.

use chrono::{DateTime, Utc};

use crate::config::Config;
use crate::model::{FeedbackKind, Maturity, PlaybookBullet};

/// `value(event) = 2^(-age_days / half_life)`, clamped to `[0, 1]`.
pub fn decay_value(age_days: f64, half_life_days: f64) -> f64 {
    if half_life_days <= 0.0 {
        return if age_days <= 0.0 { 1.0 } else { 0.0 };
    }
    let value = 2f64.powf(-age_days / half_life_days);
    value.clamp(0.0, 1.0)
}

/// Decayed helpful and harmful counts as of `now`.
pub struct DecayedCounts {
    pub helpful: f64,
    pub harmful: f64,
}

pub fn decayed_counts(bullet: &PlaybookBullet, now: DateTime<Utc>) -> DecayedCounts {
    let half_life = bullet.confidence_decay_half_life_days;
    let mut helpful = 0.0;
    let mut harmful = 0.0;
    for event in &bullet.feedback_events {
        let age_days = (now - event.timestamp).num_seconds() as f64 / 86_400.0;
        let value = decay_value(age_days.max(0.0), half_life);
        match event.kind {
            FeedbackKind::Helpful => helpful += value,
            FeedbackKind::Harmful => harmful += value,
        }
    }
    DecayedCounts { helpful, harmful }
}

/// `effectiveScore = (decayedHelpful - harmfulMultiplier * decayedHarmful) * maturityFactor`.
pub fn effective_score(bullet: &PlaybookBullet, config: &Config, now: DateTime<Utc>) -> f64 {
    let counts = decayed_counts(bullet, now);
    (counts.helpful - config.harmful_multiplier * counts.harmful) * bullet.maturity.factor()
}

/// Harmful ratio: `decayedHarmful / (decayedHelpful + decayedHarmful)`, 0 when
/// there is no feedback at all.
fn harmful_ratio(counts: &DecayedCounts) -> f64 {
    let total = counts.helpful + counts.harmful;
    if total <= 0.0 {
        0.0
    } else {
        counts.harmful / total
    }
}

/// Recompute maturity from scratch given the bullet's current feedback
/// history. Deprecation, once reached,
/// is never silently revived by this function; callers must go through an
/// explicit un-deprecate delta, which this engine does not offer.
pub fn calculate_maturity_state(bullet: &PlaybookBullet, config: &Config, now: DateTime<Utc>) -> Maturity {
    if bullet.maturity == Maturity::Deprecated {
        return Maturity::Deprecated;
    }

    let counts = decayed_counts(bullet, now);
    let ratio = harmful_ratio(&counts);

    if ratio >= 0.5 && counts.harmful >= 2.0 {
        return Maturity::Deprecated;
    }

    if counts.helpful >= config.maturity_proven_threshold
        && ratio <= config.scoring.max_harmful_ratio_for_proven
    {
        return Maturity::Proven;
    }

    if counts.helpful >= config.maturity_promotion_threshold && ratio <= 0.2 {
        return Maturity::Established;
    }

    Maturity::Candidate
}

/// Whether the bullet now qualifies for promotion one tier up from its
/// *current* maturity.
pub fn check_for_promotion(bullet: &PlaybookBullet, config: &Config, now: DateTime<Utc>) -> Option<Maturity> {
    let computed = calculate_maturity_state(bullet, config, now);
    if computed > bullet.maturity && computed != Maturity::Deprecated {
        Some(computed)
    } else {
        None
    }
}

/// Demotion verdict: `"auto-deprecate"` when decayed harmful
/// exceeds `pruneHarmfulThreshold`; otherwise a one-tier downgrade when the
/// effective score has gone negative but not catastrophically so.
#[derive(Debug, Clone, PartialEq)]
pub enum DemotionVerdict {
    None,
    Demote(Maturity),
    AutoDeprecate,
}

pub fn check_for_demotion(bullet: &PlaybookBullet, config: &Config, now: DateTime<Utc>) -> DemotionVerdict {
    let counts = decayed_counts(bullet, now);

    if counts.harmful >= config.prune_harmful_threshold {
        return DemotionVerdict::AutoDeprecate;
    }

    let score = effective_score(bullet, config, now);
    if score < 0.0 && counts.harmful < config.prune_harmful_threshold {
        let demoted = match bullet.maturity {
            Maturity::Proven => Some(Maturity::Established),
            Maturity::Established => Some(Maturity::Candidate),
            Maturity::Candidate | Maturity::Deprecated => None,
        };
        if let Some(m) = demoted {
            return DemotionVerdict::Demote(m);
        }
    }

    DemotionVerdict::None
}

/// A bullet is stale when it has never received feedback and is older than
/// `max_age_days`, or when its most recent feedback predates `max_age_days`
/// Half-life decay and `maxAgeDays` staleness are deliberately independent
/// configurables, not derived from one another.
pub fn is_stale(bullet: &PlaybookBullet, max_age_days: f64, now: DateTime<Utc>) -> bool {
    if bullet.feedback_events.is_empty() {
        let age_days = (now - bullet.created_at).num_seconds() as f64 / 86_400.0;
        age_days > max_age_days
    } else {
        bullet.last_feedback_age_days(now) > max_age_days
    }
}

/// Distribution bucket for statistics/status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreBucket {
    Excellent,
    Good,
    Neutral,
    AtRisk,
}

pub fn score_bucket(score: f64) -> ScoreBucket {
    if score >= 5.0 {
        ScoreBucket::Excellent
    } else if score >= 2.0 {
        ScoreBucket::Good
    } else if score > -2.0 {
        ScoreBucket::Neutral
    } else {
        ScoreBucket::AtRisk
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BulletKind, Scope};

    fn config() -> Config {
        Config::default()
    }

    fn now() -> DateTime<Utc> {
        "2026-01-01T00:00:00Z".parse().unwrap()
    }

    fn bullet_with_feedback(events: &[(FeedbackKind, f64)], now: DateTime<Utc>) -> PlaybookBullet {
        let mut b = PlaybookBullet::new("x".into(), "c".into(), BulletKind::WorkflowRule, Scope::Global, None, 90.0, now);
        for (kind, age_days) in events {
            let ts = now - chrono::Duration::seconds((*age_days * 86_400.0) as i64);
            b.push_feedback(kind.clone(), None, ts);
        }
        b
    }

    #[test]
    fn decay_value_at_zero_age_is_near_one() {
        let v = decay_value(0.0, 90.0);
        assert!(v > 0.99 && v <= 1.0, "got {v}");
    }

    #[test]
    fn decay_value_at_half_life_is_one_half() {
        let v = decay_value(90.0, 90.0);
        assert!((v - 0.5).abs() < 0.01, "got {v}");
    }

    #[test]
    fn effective_score_is_non_increasing_in_harmful() {
        let b1 = bullet_with_feedback(&[(FeedbackKind::Helpful, 0.0)], now());
        let b2 = bullet_with_feedback(&[(FeedbackKind::Helpful, 0.0), (FeedbackKind::Harmful, 0.0)], now());
        let c = config();
        assert!(effective_score(&b2, &c, now()) <= effective_score(&b1, &c, now()));
    }

    #[test]
    fn promotion_scenario_ten_helpful_today_is_proven() {
        let events: Vec<_> = (0..10).map(|_| (FeedbackKind::Helpful, 0.0)).collect();
        let b = bullet_with_feedback(&events, now());
        let c = config();
        assert_eq!(calculate_maturity_state(&b, &c, now()), Maturity::Proven);
    }

    #[test]
    fn promotion_scenario_three_helpful_today_is_established() {
        let mut b = bullet_with_feedback(&[], now());
        for _ in 0..3 {
            b.push_feedback(FeedbackKind::Helpful, None, now());
        }
        let c = config();
        assert_eq!(check_for_promotion(&b, &c, now()), Some(Maturity::Established));
    }

    #[test]
    fn auto_deprecate_scenario_five_harmful_events() {
        let events: Vec<_> = (0..5).map(|_| (FeedbackKind::Harmful, 0.0)).collect();
        let b = bullet_with_feedback(&events, now());
        let mut c = config();
        c.prune_harmful_threshold = 3.0;
        assert_eq!(check_for_demotion(&b, &c, now()), DemotionVerdict::AutoDeprecate);
    }

    #[test]
    fn harmful_ratio_deprecation_trigger() {
        let events = vec![(FeedbackKind::Helpful, 0.0), (FeedbackKind::Harmful, 0.0), (FeedbackKind::Harmful, 0.0)];
        let b = bullet_with_feedback(&events, now());
        let c = config();
        assert_eq!(calculate_maturity_state(&b, &c, now()), Maturity::Deprecated);
    }

    #[test]
    fn deprecated_maturity_is_never_revived() {
        let mut b = bullet_with_feedback(&[], now());
        b.maturity = Maturity::Deprecated;
        for _ in 0..20 {
            b.push_feedback(FeedbackKind::Helpful, None, now());
        }
        let c = config();
        assert_eq!(calculate_maturity_state(&b, &c, now()), Maturity::Deprecated);
    }

    #[test]
    fn is_stale_with_no_feedback_and_old_creation() {
        let b = PlaybookBullet::new("x".into(), "c".into(), BulletKind::WorkflowRule, Scope::Global, None, 90.0, now() - chrono::Duration::days(100));
        assert!(is_stale(&b, 30.0, now()));
    }

    #[test]
    fn is_stale_false_with_recent_feedback() {
        let b = bullet_with_feedback(&[(FeedbackKind::Helpful, 1.0)], now());
        assert!(!is_stale(&b, 30.0, now()));
    }

    #[test]
    fn score_buckets_match_thresholds() {
        assert_eq!(score_bucket(5.0), ScoreBucket::Excellent);
        assert_eq!(score_bucket(2.0), ScoreBucket::Good);
        assert_eq!(score_bucket(0.0), ScoreBucket::Neutral);
        assert_eq!(score_bucket(-2.0), ScoreBucket::AtRisk);
    }
}
