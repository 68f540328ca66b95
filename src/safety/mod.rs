//! Trauma safety guard and its hash-chained audit log. Grounded on
//! `ironclaw`'s `safety::integrity::IntegrityMonitor`
//! audit chain (`append_audit`): each entry's hash covers the previous
//! entry's hash plus its own canonical payload, so the log cannot be
//! silently truncated or reordered without breaking the chain.

use chrono::{DateTime, Utc};
use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::Config;
use crate::error::Result;
use crate::model::{Severity, TraumaEntry, TraumaStatus, TriggerEvent};
use crate::storage::jsonl;

const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Outcome of checking a command against the trauma list.
#[derive(Debug, Clone, PartialEq)]
pub struct GuardDecision {
    pub decision: &'static str,
    pub reason: String,
    pub pattern: String,
    pub entry_id: String,
}

/// Load the union of active global and repo trauma patterns. Fails open:
/// any read error yields no patterns, never a block.
pub fn load_active_entries(config: &Config) -> Vec<TraumaEntry> {
    let mut entries = match jsonl::read_all::<TraumaEntry>(&config.global_traumas_path()) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "failed to read global trauma list, failing open");
            Vec::new()
        }
    };

    if let Some(overlay) = config.repo_overlay_dir() {
        let repo_path = overlay.join("traumas.jsonl");
        match jsonl::read_all::<TraumaEntry>(&repo_path) {
            Ok(mut v) => entries.append(&mut v),
            Err(e) => tracing::warn!(error = %e, "failed to read repo trauma list, failing open"),
        }
    }

    entries.retain(TraumaEntry::is_active);
    entries
}

/// Check `command` against every active pattern (case-insensitive). Returns
/// the first match, if any.
pub fn check_command(command: &str, entries: &[TraumaEntry]) -> Option<GuardDecision> {
    for entry in entries {
        let Ok(re) = RegexBuilder::new(&entry.pattern).case_insensitive(true).build() else {
            tracing::warn!(pattern = %entry.pattern, "invalid trauma pattern, skipping");
            continue;
        };
        if re.is_match(command) {
            return Some(GuardDecision {
                decision: "deny",
                reason: format!("matches trauma entry {}", entry.id),
                pattern: entry.pattern.clone(),
                entry_id: entry.id.clone(),
            });
        }
    }
    None
}

/// Convenience: load then check in one call.
pub fn guard(command: &str, config: &Config) -> Option<GuardDecision> {
    let entries = load_active_entries(config);
    check_command(command, &entries)
}

pub fn new_trauma_entry(pattern: String, severity: Severity, scope: String, trigger: TriggerEvent, now: DateTime<Utc>) -> TraumaEntry {
    TraumaEntry {
        id: format!("t-{}", now.timestamp_millis()),
        severity,
        pattern,
        scope,
        status: TraumaStatus::Active,
        trigger_event: trigger,
        created_at: now,
    }
}

/// Mark a trauma entry healed by rewriting the JSONL file under lock.
pub fn heal_entry(path: &std::path::Path, entry_id: &str, now: DateTime<Utc>) -> Result<bool> {
    crate::storage::with_lock(path, "trauma_heal", || {
        let mut entries = jsonl::read_all::<TraumaEntry>(path)?;
        let mut found = false;
        for entry in &mut entries {
            if entry.id == entry_id {
                entry.status = TraumaStatus::Healed;
                found = true;
            }
        }
        if found {
            jsonl::write_all(path, &entries)?;
        }
        let _ = now;
        Ok(found)
    })
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// One hash-chained entry recording a guard decision or trauma-list
/// mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub event: String,
    pub entry_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub chain: AuditChain,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditChain {
    pub prev: String,
    pub hash: String,
}

/// Appends one entry at a time to the audit log, each covering the previous
/// entry's hash. Unlike `IntegrityMonitor`, state is not cached across
/// invocations: `last_hash` is recomputed from the on-disk tail each time,
/// since this process does not keep a long-lived monitor instance.
pub struct AuditChainWriter {
    path: std::path::PathBuf,
}

impl AuditChainWriter {
    pub fn new(path: std::path::PathBuf) -> Self {
        Self { path }
    }

    fn last_hash(&self) -> Result<String> {
        let entries = jsonl::read_all::<AuditEntry>(&self.path)?;
        Ok(entries.last().map(|e| e.chain.hash.clone()).unwrap_or_else(|| GENESIS_HASH.to_string()))
    }

    pub fn append(&self, event: &str, entry_id: &str, detail: Option<String>, now: DateTime<Utc>) -> Result<AuditEntry> {
        let prev = self.last_hash()?;
        let payload_without_chain = serde_json::json!({
            "timestamp": now.to_rfc3339(),
            "event": event,
            "entry_id": entry_id,
            "detail": detail,
        });
        let canonical = serde_json::to_string(&payload_without_chain).unwrap_or_default();
        let hash = sha256_hex(format!("{prev}\n{canonical}").as_bytes());

        let entry = AuditEntry {
            timestamp: now,
            event: event.to_string(),
            entry_id: entry_id.to_string(),
            detail,
            chain: AuditChain { prev, hash },
        };
        jsonl::append(&self.path, &entry)?;
        Ok(entry)
    }

    /// Verify the chain has not been tampered with: each entry's hash must
    /// match a fresh recomputation from its predecessor.
    pub fn verify(&self) -> Result<bool> {
        let entries = jsonl::read_all::<AuditEntry>(&self.path)?;
        let mut expected_prev = GENESIS_HASH.to_string();
        for entry in &entries {
            if entry.chain.prev != expected_prev {
                return Ok(false);
            }
            let payload_without_chain = serde_json::json!({
                "timestamp": entry.timestamp.to_rfc3339(),
                "event": entry.event,
                "entry_id": entry.entry_id,
                "detail": entry.detail,
            });
            let canonical = serde_json::to_string(&payload_without_chain).unwrap_or_default();
            let hash = sha256_hex(format!("{expected_prev}\n{canonical}").as_bytes());
            if hash != entry.chain.hash {
                return Ok(false);
            }
            expected_prev = entry.chain.hash.clone();
        }
        Ok(true)
    }
}
