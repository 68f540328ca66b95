//! Data model for the curation engine.

pub mod bullet;
pub mod delta;
pub mod diary;
pub mod outcome;
pub mod trauma;

pub use bullet::{
    BulletKind, BulletState, DeprecatedPattern, FeedbackEvent, FeedbackKind, Maturity, Playbook,
    PlaybookBullet, PlaybookMetadata, Scope,
};
pub use delta::{dedup_deltas, NewBullet, PlaybookDelta};
pub use diary::{DiaryEntry, SessionStatus};
pub use outcome::{Outcome, OutcomeRecord, ProcessedLogEntry};
pub use trauma::{Severity, TraumaEntry, TraumaStatus, TriggerEvent};
