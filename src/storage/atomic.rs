//! Atomic persistence: write to a sidecar temp path, flush,
//! restrict permissions, then rename into place. A partial file is never
//! observable at the final path; any failure before the rename leaves the
//! prior content (if any) untouched and removes the stray temp file.

use std::io::Write;
use std::path::{Path, PathBuf};

use rand::Rng;

use crate::error::{CassMemoryError, Result};

fn temp_path_for(target: &Path) -> PathBuf {
    let pid = std::process::id();
    let mut rng = rand::thread_rng();
    let rand_suffix: u32 = rng.gen();
    let file_name = target.file_name().and_then(|n| n.to_str()).unwrap_or("tmp");
    target.with_file_name(format!("{file_name}.tmp.{pid}.{rand_suffix:08x}"))
}

/// Write `contents` to `target` atomically. On any failure the temp file is
/// removed and `target` is left exactly as it was before the call.
pub fn write_atomic(target: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent).map_err(|e| CassMemoryError::io(parent, e))?;
    }

    let temp_path = temp_path_for(target);

    let result = (|| -> Result<()> {
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(|e| CassMemoryError::io(&temp_path, e))?;

        file.write_all(contents).map_err(|e| CassMemoryError::io(&temp_path, e))?;
        file.flush().map_err(|e| CassMemoryError::io(&temp_path, e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&temp_path, perms).map_err(|e| CassMemoryError::io(&temp_path, e))?;
        }

        drop(file);
        std::fs::rename(&temp_path, target).map_err(|e| CassMemoryError::io(target, e))?;
        Ok(())
    })();

    if result.is_err() {
        let _ = std::fs::remove_file(&temp_path);
    }

    result
}
