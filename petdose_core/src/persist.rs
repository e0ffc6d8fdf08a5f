//! Locked JSON file persistence.
//!
//! Reads take a shared lock; writes go to a temp file in the same directory
//! under an exclusive lock and are renamed over the target.

use crate::{Error, Result};
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Read and parse a JSON file with shared locking.
///
/// Returns `Ok(None)` if the file doesn't exist.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }

    let file = File::open(path)?;
    file.lock_shared()?;

    let mut contents = String::new();
    let read = std::io::BufReader::new(&file).read_to_string(&mut contents);
    file.unlock()?;
    read?;

    if contents.trim().is_empty() {
        return Ok(None);
    }

    Ok(Some(serde_json::from_str(&contents)?))
}

/// Atomically replace `path` with the JSON form of `value`
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let parent = parent_dir(path)?;
    std::fs::create_dir_all(&parent)?;

    let temp = NamedTempFile::new_in(&parent)?;

    {
        let mut writer = std::io::BufWriter::new(temp.as_file());
        let contents = serde_json::to_string_pretty(value)?;
        writer.write_all(contents.as_bytes())?;
        writer.flush()?;
    }

    temp.as_file().sync_all()?;

    temp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

/// Run `f` while holding an exclusive lock on `<path>.lock`.
///
/// Serializes read-modify-write cycles between processes sharing a file.
pub fn with_exclusive_lock<T, F>(path: &Path, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    let parent = parent_dir(path)?;
    std::fs::create_dir_all(&parent)?;

    let lock_path = lock_path_for(path);
    let lock = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)?;
    lock.lock_exclusive()?;

    let result = f();
    lock.unlock()?;
    result
}

fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".lock");
    path.with_file_name(name)
}

fn parent_dir(path: &Path) -> Result<PathBuf> {
    match path.parent() {
        Some(p) if p.as_os_str().is_empty() => Ok(PathBuf::from(".")),
        Some(p) => Ok(p.to_path_buf()),
        None => Err(Error::Other(format!("{:?} has no parent directory", path))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_write_and_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");

        let mut value = BTreeMap::new();
        value.insert("rex".to_string(), 3);
        write_json_atomic(&path, &value).unwrap();

        let loaded: BTreeMap<String, i32> = read_json(&path).unwrap().unwrap();
        assert_eq!(loaded, value);
    }

    #[test]
    fn test_missing_file_reads_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded: Option<Vec<i32>> = read_json(&dir.path().join("missing.json")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_corrupt_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ invalid json }").unwrap();

        let result: Result<Option<Vec<i32>>> = read_json(&path);
        assert!(matches!(result, Err(Error::Json(_))));
    }

    #[test]
    fn test_atomic_write_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        write_json_atomic(&path, &vec![1, 2, 3]).unwrap();

        let extras: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name() != "data.json")
            .collect();
        assert!(extras.is_empty(), "unexpected files: {:?}", extras);
    }

    #[test]
    fn test_exclusive_lock_runs_closure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");

        let value = with_exclusive_lock(&path, || Ok(42)).unwrap();
        assert_eq!(value, 42);
        assert!(dir.path().join("data.json.lock").exists());
    }

    #[test]
    fn test_atomic_write_under_sidecar_lock() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        write_json_atomic(&path, &vec![1]).unwrap();

        with_exclusive_lock(&path, || {
            let mut current: Vec<i32> = read_json(&path)?.unwrap_or_default();
            current.push(2);
            write_json_atomic(&path, &current)
        })
        .unwrap();

        let loaded: Vec<i32> = read_json(&path).unwrap().unwrap();
        assert_eq!(loaded, vec![1, 2]);
    }
}
