//! Diary persistence: one JSON file per entry under `diary/<id>.json`.
//! A diary that fails to parse is a peripheral-file error (logged and
//! skipped), not fatal to the caller.

use std::path::Path;

use crate::error::{CassMemoryError, Result};
use crate::model::DiaryEntry;

use super::atomic::write_atomic;

pub fn path_for(diary_dir: &Path, id: &str) -> std::path::PathBuf {
    diary_dir.join(format!("{id}.json"))
}

pub fn save(diary_dir: &Path, entry: &DiaryEntry) -> Result<()> {
    let path = path_for(diary_dir, &entry.id);
    let json = serde_json::to_vec_pretty(entry).map_err(|e| CassMemoryError::parse_json(&path, e))?;
    write_atomic(&path, &json)
}

pub fn load(path: &Path) -> Result<DiaryEntry> {
    let text = std::fs::read_to_string(path).map_err(|e| CassMemoryError::io(path, e))?;
    serde_json::from_str(&text).map_err(|e| CassMemoryError::parse_json(path, e))
}

/// List every diary entry under `diary_dir`, skipping and logging any file
/// that fails to parse.
pub fn load_all(diary_dir: &Path) -> Result<Vec<DiaryEntry>> {
    let read_dir = match std::fs::read_dir(diary_dir) {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(CassMemoryError::io(diary_dir, e)),
    };

    let mut out = Vec::new();
    for entry in read_dir {
        let entry = entry.map_err(|e| CassMemoryError::io(diary_dir, e))?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        match load(&path) {
            Ok(diary) => out.push(diary),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable diary entry"),
        }
    }
    out.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    Ok(out)
}
