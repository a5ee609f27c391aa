use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use uuid::Uuid;

/// Writes `content` to `path` so that readers only ever see the old file or
/// the complete new one.
///
/// The data goes to a hidden temp file in the same directory first, is synced,
/// and is then renamed over `path`. Rename is atomic on the same filesystem.
pub fn write_atomic(path: &Path, content: &[u8]) -> io::Result<()> {
    let tmp = temp_path_for(path);

    let result = (|| {
        let mut file = File::create(&tmp)?;
        file.write_all(content)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

/// Removes `path`, treating an already-missing file as success.
pub fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("file");
    let tmp_name = format!(".{}.{}.partial", name, Uuid::new_v4().simple());
    match path.parent() {
        Some(parent) => parent.join(tmp_name),
        None => PathBuf::from(tmp_name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_atomic_creates_and_replaces() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");

        write_atomic(&path, b"first").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"first");

        write_atomic(&path, b"second, longer").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"second, longer");

        // No temp files left behind
        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_write_atomic_missing_directory_fails_cleanly() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing").join("state.json");
        assert!(write_atomic(&path, b"data").is_err());
        assert!(!path.exists());
    }

    #[test]
    fn test_remove_if_exists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gone.tmp");
        assert!(!remove_if_exists(&path).unwrap());
        fs::write(&path, b"x").unwrap();
        assert!(remove_if_exists(&path).unwrap());
        assert!(!path.exists());
    }
}
