//! Generic JSONL persistence for append-only logs: outcomes, the processed
//! log, trauma entries, and the toxic-bullets log.
//!
//! Readers tolerate malformed lines by skipping them; only the
//! playbook itself is strict enough to abort on a parse failure.

use std::io::Write;
use std::path::Path;

use serde::{de::DeserializeOwned, Serialize};

use crate::error::{CassMemoryError, Result};

/// Read every well-formed JSON line from `path`. Missing file yields an
/// empty vec. Blank lines and lines that fail to parse are skipped with a
/// warning, never aborting the read.
pub fn read_all<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(CassMemoryError::io(path, e)),
    };

    let mut out = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<T>(trimmed) {
            Ok(value) => out.push(value),
            Err(e) => {
                tracing::warn!(path = %path.display(), line = line_no + 1, error = %e, "skipping malformed JSONL line");
            }
        }
    }
    Ok(out)
}

/// Append one record as a single JSON line. Caller is responsible for
/// holding any necessary lock; this performs a plain `O_APPEND` write, which
/// is safe for single-line appends even without a lock on POSIX systems, but
/// callers that need read-modify-write semantics (e.g. marking entries
/// healed) must still go through `with_lock`.
pub fn append<T: Serialize>(path: &Path, record: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| CassMemoryError::io(parent, e))?;
    }
    let mut line = serde_json::to_string(record).map_err(|e| CassMemoryError::parse_json(path, e))?;
    line.push('\n');

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| CassMemoryError::io(path, e))?;
    file.write_all(line.as_bytes()).map_err(|e| CassMemoryError::io(path, e))?;
    Ok(())
}

/// Rewrite the whole file atomically from `records` — used when healing or
/// pruning entries, always invoked under `with_lock`.
pub fn write_all<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    let mut buf = String::new();
    for record in records {
        let line = serde_json::to_string(record).map_err(|e| CassMemoryError::parse_json(path, e))?;
        buf.push_str(&line);
        buf.push('\n');
    }
    super::atomic::write_atomic(path, buf.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Rec {
        n: u32,
    }

    #[test]
    fn read_all_on_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.jsonl");
        assert_eq!(read_all::<Rec>(&path).unwrap(), Vec::new());
    }

    #[test]
    fn read_all_skips_malformed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        std::fs::write(&path, "{\"n\":1}\nnot json\n{\"n\":2}\n\n").unwrap();
        let records = read_all::<Rec>(&path).unwrap();
        assert_eq!(records, vec![Rec { n: 1 }, Rec { n: 2 }]);
    }

    #[test]
    fn append_then_read_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        append(&path, &Rec { n: 1 }).unwrap();
        append(&path, &Rec { n: 2 }).unwrap();
        assert_eq!(read_all::<Rec>(&path).unwrap(), vec![Rec { n: 1 }, Rec { n: 2 }]);
    }

    #[test]
    fn write_all_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        append(&path, &Rec { n: 1 }).unwrap();
        write_all(&path, &[Rec { n: 9 }]).unwrap();
        assert_eq!(read_all::<Rec>(&path).unwrap(), vec![Rec { n: 9 }]);
    }
}
