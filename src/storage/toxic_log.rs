//! The toxic-bullets log: case-folded content of anti-patterns that
//! themselves later proved harmful. Once content lands here, curation
//! refuses to re-add it via an `Add` delta.

use std::io::Write;
use std::path::Path;

use crate::error::{CassMemoryError, Result};

/// Read every line, trimmed, skipping blanks. Missing file yields an empty
/// list.
pub fn load(path: &Path) -> Vec<String> {
    match std::fs::read_to_string(path) {
        Ok(text) => text.lines().map(str::trim).filter(|l| !l.is_empty()).map(str::to_string).collect(),
        Err(_) => Vec::new(),
    }
}

/// Append new entries, one per line. No-op if `entries` is empty.
pub fn append(path: &Path, entries: &[String]) -> Result<()> {
    if entries.is_empty() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| CassMemoryError::io(parent, e))?;
    }
    let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path).map_err(|e| CassMemoryError::io(path, e))?;
    for entry in entries {
        writeln!(file, "{entry}").map_err(|e| CassMemoryError::io(path, e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn load_on_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(load(&dir.path().join("toxic_bullets.log")), Vec::<String>::new());
    }

    #[test]
    fn append_then_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("toxic_bullets.log");
        append(&path, &["always use var for everything".into()]).unwrap();
        append(&path, &["never write tests".into()]).unwrap();
        assert_eq!(load(&path), vec!["always use var for everything".to_string(), "never write tests".to_string()]);
    }

    #[test]
    fn append_with_empty_slice_does_not_create_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("toxic_bullets.log");
        append(&path, &[]).unwrap();
        assert!(!path.exists());
    }
}
