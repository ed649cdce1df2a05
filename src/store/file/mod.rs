//! File-based storage implementations.
//!
//! The job set lives in a single JSON document. Writes go through
//! [`atomic_write_file`] (temp file + fsync + rename) so a crash mid-write
//! never leaves a truncated file behind.

mod job;

pub use job::FileJobStore;

use std::path::Path;

use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::{StorageError, StorageResult};

/// Write `content` to `path` atomically.
///
/// Creates the parent directory when needed.
pub async fn atomic_write_file(path: &Path, content: &[u8]) -> StorageResult<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| StorageError::file_io(parent, e))?;
    }

    let mut temp_name = path.as_os_str().to_owned();
    temp_name.push(".tmp");
    let temp_path = Path::new(&temp_name);

    let mut file = fs::File::create(temp_path)
        .await
        .map_err(|e| StorageError::file_io(temp_path, e))?;
    file.write_all(content)
        .await
        .map_err(|e| StorageError::file_io(temp_path, e))?;
    file.sync_all()
        .await
        .map_err(|e| StorageError::file_io(temp_path, e))?;
    drop(file);

    fs::rename(temp_path, path)
        .await
        .map_err(|e| StorageError::file_io(path, e))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn atomic_write_creates_parent_and_leaves_no_temp() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("jobs.json");

        atomic_write_file(&path, b"{}").await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{}");
        assert!(!temp_dir.path().join("nested").join("jobs.json.tmp").exists());
    }

    #[tokio::test]
    async fn atomic_write_replaces_existing_content() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("jobs.json");

        atomic_write_file(&path, b"first").await.unwrap();
        atomic_write_file(&path, b"second").await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");
    }
}
