//! Playbook persistence: YAML on disk, global+repo overlay merge.
//!
//! The loader normalizes both camelCase and snake_case keys before
//! deserializing, since bullets may originate from tooling that emits
//! either convention.

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{CassMemoryError, Result};
use crate::model::{Playbook, PlaybookBullet, Scope};

use super::atomic::write_atomic;
use super::lock::with_lock;

/// Convert a single `camelCase` or `PascalCase` key to `snake_case`. Already
/// snake_case keys pass through unchanged.
fn camel_to_snake(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for (i, ch) in key.chars().enumerate() {
        if ch.is_uppercase() {
            if i != 0 {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

/// Recursively rewrite every object key in `value` through `camel_to_snake`.
fn normalize_keys(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut normalized = serde_json::Map::new();
            for (key, v) in map {
                normalized.insert(camel_to_snake(&key), normalize_keys(v));
            }
            serde_json::Value::Object(normalized)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.into_iter().map(normalize_keys).collect())
        }
        other => other,
    }
}

/// Load a playbook from a YAML file at `path`. Returns a fresh empty
/// playbook if the file does not exist (first run). A parse failure on the
/// playbook itself is fatal.
pub fn load(path: &Path, now: chrono::DateTime<chrono::Utc>) -> Result<Playbook> {
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Playbook::new(now)),
        Err(e) => return Err(CassMemoryError::io(path, e)),
    };

    let raw: serde_json::Value =
        serde_yaml::from_str(&text).map_err(|e| CassMemoryError::parse_yaml(path, e))?;
    let normalized = normalize_keys(raw);
    serde_json::from_value(normalized).map_err(|e| CassMemoryError::parse_json(path, e))
}

/// Persist a playbook to `path` atomically, as YAML.
pub fn save(path: &Path, playbook: &Playbook) -> Result<()> {
    let yaml = serde_yaml::to_string(playbook).map_err(|e| CassMemoryError::parse_yaml(path, e))?;
    write_atomic(path, yaml.as_bytes())
}

/// Load, mutate under lock, and persist. `mutator` receives a fresh
/// from-disk read (never a stale in-memory copy), preserving the
/// lock → read-fresh → mutate → atomic-write → release discipline.
pub fn mutate<T>(
    path: &Path,
    operation: &str,
    now: chrono::DateTime<chrono::Utc>,
    mutator: impl FnOnce(&mut Playbook) -> Result<T>,
) -> Result<T> {
    with_lock(path, operation, || {
        let mut playbook = load(path, now)?;
        let result = mutator(&mut playbook)?;
        save(path, &playbook)?;
        Ok(result)
    })
}

/// Merge the global and repo-overlay playbooks: union of
/// bullets keyed by id, repo entries override; `deprecatedPatterns`
/// concatenated with repo last; `metadata.updatedAt` takes the max.
pub fn merge(global: &Playbook, repo: Option<&Playbook>) -> Playbook {
    let Some(repo) = repo else {
        return global.clone();
    };

    let mut by_id: BTreeMap<String, PlaybookBullet> =
        global.bullets.iter().map(|b| (b.id.clone(), b.clone())).collect();
    for bullet in &repo.bullets {
        by_id.insert(bullet.id.clone(), bullet.clone());
    }
    let mut bullets: Vec<PlaybookBullet> = by_id.into_values().collect();
    bullets.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

    let mut deprecated_patterns = global.deprecated_patterns.clone();
    deprecated_patterns.extend(repo.deprecated_patterns.iter().cloned());

    let updated_at = global.metadata.updated_at.max(repo.metadata.updated_at);

    Playbook {
        schema_version: global.schema_version.max(repo.schema_version),
        metadata: crate::model::PlaybookMetadata {
            version: global.metadata.version.max(repo.metadata.version),
            created_at: global.metadata.created_at,
            updated_at,
            total_reflections: global.metadata.total_reflections + repo.metadata.total_reflections,
            last_reflection: global.metadata.last_reflection.max(repo.metadata.last_reflection),
        },
        bullets,
        deprecated_patterns,
    }
}

/// Load and merge the global and (if present) repo playbooks for `config`.
pub fn load_merged(config: &crate::config::Config, now: chrono::DateTime<chrono::Utc>) -> Result<Playbook> {
    let global = load(&config.global_playbook_path(), now)?;
    let repo = match config.repo_overlay_dir() {
        Some(dir) => {
            let path = dir.join("playbook.yaml");
            if path.exists() {
                Some(load(&path, now)?)
            } else {
                None
            }
        }
        None => None,
    };
    Ok(merge(&global, repo.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BulletKind;
    use pretty_assertions::assert_eq;

    fn now() -> chrono::DateTime<chrono::Utc> {
        "2026-01-01T00:00:00Z".parse().unwrap()
    }

    #[test]
    fn load_missing_file_returns_empty_playbook() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("playbook.yaml");
        let playbook = load(&path, now()).unwrap();
        assert!(playbook.bullets.is_empty());
    }

    #[test]
    fn save_then_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("playbook.yaml");
        let mut playbook = Playbook::new(now());
        playbook.bullets.push(PlaybookBullet::new(
            "Use cargo clippy before pushing".into(),
            "testing".into(),
            BulletKind::WorkflowRule,
            Scope::Global,
            None,
            90.0,
            now(),
        ));
        save(&path, &playbook).unwrap();
        let loaded = load(&path, now()).unwrap();
        assert_eq!(loaded.bullets.len(), 1);
        assert_eq!(loaded.bullets[0].content, "Use cargo clippy before pushing");
    }

    #[test]
    fn load_normalizes_camel_case_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("playbook.yaml");
        let yaml = r#"
schemaVersion: 1
metadata:
  version: 1
  createdAt: 2026-01-01T00:00:00Z
  updatedAt: 2026-01-01T00:00:00Z
  totalReflections: 0
bullets:
  - id: b-1
    content: Always write a test first
    category: testing
    kind: workflow_rule
    scope: global
    state: active
    maturity: candidate
    helpfulCount: 3
    harmfulCount: 0
    confidenceDecayHalfLifeDays: 90
    createdAt: 2026-01-01T00:00:00Z
    updatedAt: 2026-01-01T00:00:00Z
deprecatedPatterns: []
"#;
        std::fs::write(&path, yaml).unwrap();
        let playbook = load(&path, now()).unwrap();
        assert_eq!(playbook.bullets.len(), 1);
        assert_eq!(playbook.bullets[0].helpful_count, 3);
    }

    #[test]
    fn merge_prefers_repo_bullet_for_shared_id() {
        let mut global = Playbook::new(now());
        let mut bullet = PlaybookBullet::new("old content".into(), "c".into(), BulletKind::WorkflowRule, Scope::Global, None, 90.0, now());
        bullet.id = "b-shared".into();
        global.bullets.push(bullet.clone());
        global.metadata.updated_at = now();

        let mut repo = Playbook::new(now());
        let mut updated = bullet.clone();
        updated.content = "new content".into();
        let later = now() + chrono::Duration::days(1);
        updated.updated_at = later;
        repo.bullets.push(updated);
        repo.metadata.updated_at = later;

        let merged = merge(&global, Some(&repo));
        assert_eq!(merged.bullets.len(), 1);
        assert_eq!(merged.bullets[0].content, "new content");
        assert_eq!(merged.metadata.updated_at, later);
    }

    #[test]
    fn merge_without_repo_returns_global_unchanged() {
        let mut global = Playbook::new(now());
        global.bullets.push(PlaybookBullet::new("x".into(), "c".into(), BulletKind::WorkflowRule, Scope::Global, None, 90.0, now()));
        let merged = merge(&global, None);
        assert_eq!(merged.bullets.len(), 1);
    }
}
