//! Directory-backed store for chunk result caches and sweep checkpoints.
//!
//! Layout: `{root}/{subject}/chunk_{index:06}.json` and `{root}/{subject}/progress.json`
//!
//! - Chunk blobs are write-once: published with a hard link, so a readable
//!   blob is never replaced. An unreadable one is removed and republished.
//! - Checkpoints are overwritten atomically (write to .tmp, rename into place)
//! - Subject names are sanitized into a single path component

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use exitlab_core::schema::PortfolioRecord;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

pub const CHECKPOINT_FILE: &str = "progress.json";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O failed for {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },

    #[error("corrupt cache file {}: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to encode cache file {}: {source}", path.display())]
    Encode {
        path: PathBuf,
        source: serde_json::Error,
    },
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> CacheError + '_ {
    move |source| CacheError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// All successful records of one chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkCache {
    pub subject: String,
    pub chunk_index: usize,
    pub created_at: DateTime<Utc>,
    pub records: Vec<PortfolioRecord>,
}

#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn subject_dir(&self, subject: &str) -> PathBuf {
        self.root.join(sanitize_subject(subject))
    }

    pub fn chunk_path(&self, subject: &str, chunk_index: usize) -> PathBuf {
        self.subject_dir(subject)
            .join(format!("chunk_{chunk_index:06}.json"))
    }

    pub fn checkpoint_path(&self, subject: &str) -> PathBuf {
        self.subject_dir(subject).join(CHECKPOINT_FILE)
    }

    /// Publish a chunk blob. Returns `false` if a readable blob for this chunk
    /// already exists; that blob is left untouched. A corrupt blob is
    /// replaced.
    pub fn write_chunk(&self, cache: &ChunkCache) -> Result<bool, CacheError> {
        let path = self.chunk_path(&cache.subject, cache.chunk_index);
        if path.exists() {
            match read_json::<ChunkCache>(&path) {
                Err(CacheError::Corrupt { source, .. }) => {
                    warn!(path = %path.display(), error = %source, "replacing corrupt chunk blob");
                    match fs::remove_file(&path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                        Err(source) => return Err(CacheError::Io { path, source }),
                    }
                }
                _ => return Ok(false),
            }
        }
        let dir = self.subject_dir(&cache.subject);
        fs::create_dir_all(&dir).map_err(io_err(&dir))?;

        let tmp = tmp_path(&path);
        let json = serde_json::to_vec(cache).map_err(|source| CacheError::Encode {
            path: path.clone(),
            source,
        })?;
        fs::write(&tmp, json).map_err(io_err(&tmp))?;

        let published = match fs::hard_link(&tmp, &path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            // Filesystems without hard links: fall back to a rename.
            Err(_) if !path.exists() => fs::rename(&tmp, &path).map(|_| true).map_err(io_err(&path)),
            Err(_) => Ok(false),
        };
        let _ = fs::remove_file(&tmp);
        published
    }

    /// Read one chunk blob. `Ok(None)` when it does not exist.
    pub fn read_chunk(
        &self,
        subject: &str,
        chunk_index: usize,
    ) -> Result<Option<ChunkCache>, CacheError> {
        read_json(&self.chunk_path(subject, chunk_index))
    }

    /// Indices of all chunk blobs for a subject, ascending.
    pub fn chunk_indices(&self, subject: &str) -> Result<Vec<usize>, CacheError> {
        let dir = self.subject_dir(subject);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut indices: Vec<usize> = fs::read_dir(&dir)
            .map_err(io_err(&dir))?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name();
                let name = name.to_str()?;
                name.strip_prefix("chunk_")?
                    .strip_suffix(".json")?
                    .parse()
                    .ok()
            })
            .collect();
        indices.sort_unstable();
        Ok(indices)
    }

    /// Atomically replace the subject's checkpoint.
    pub fn write_checkpoint<T: Serialize>(&self, subject: &str, state: &T) -> Result<(), CacheError> {
        let dir = self.subject_dir(subject);
        fs::create_dir_all(&dir).map_err(io_err(&dir))?;

        let path = self.checkpoint_path(subject);
        let tmp = tmp_path(&path);
        let json = serde_json::to_vec_pretty(state).map_err(|source| CacheError::Encode {
            path: path.clone(),
            source,
        })?;
        fs::write(&tmp, json).map_err(io_err(&tmp))?;
        fs::rename(&tmp, &path).map_err(io_err(&path))
    }

    pub fn read_checkpoint<T: DeserializeOwned>(&self, subject: &str) -> Result<Option<T>, CacheError> {
        read_json(&self.checkpoint_path(subject))
    }

    /// Remove every cache file of a subject.
    pub fn clear_subject(&self, subject: &str) -> Result<(), CacheError> {
        let dir = self.subject_dir(subject);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(CacheError::Io { path: dir, source }),
        }
    }

    /// Sanitized names of subjects with a cache directory, sorted.
    pub fn subjects(&self) -> Result<Vec<String>, CacheError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut subjects: Vec<String> = fs::read_dir(&self.root)
            .map_err(io_err(&self.root))?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .collect();
        subjects.sort();
        Ok(subjects)
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, CacheError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(CacheError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| CacheError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".tmp{}", std::process::id()));
    path.with_file_name(name)
}

/// Map a subject to a safe directory name: anything other than ASCII
/// alphanumerics, `-`, `_`, and `.` becomes `_`.
///
/// A name that had to change gets a short blake3 suffix of the original, so
/// `^GSPC` and `_GSPC` do not share a directory.
pub fn sanitize_subject(subject: &str) -> String {
    let cleaned: String = subject
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = match cleaned.as_str() {
        "" | "." | ".." => format!("_{cleaned}"),
        _ => cleaned,
    };
    if cleaned == subject {
        return cleaned;
    }
    let hash = blake3::hash(subject.as_bytes()).to_hex();
    format!("{cleaned}-{}", &hash.as_str()[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn chunk(subject: &str, index: usize) -> ChunkCache {
        ChunkCache {
            subject: subject.into(),
            chunk_index: index,
            created_at: Utc::now(),
            records: Vec::new(),
        }
    }

    #[test]
    fn sanitizes_subjects() {
        assert_eq!(sanitize_subject("BTC-USD"), "BTC-USD");
        assert_eq!(sanitize_subject("_GSPC"), "_GSPC");
        assert!(sanitize_subject("^GSPC").starts_with("_GSPC-"));
        assert!(sanitize_subject("a/b").starts_with("a_b-"));
        assert!(sanitize_subject("..").starts_with("_..-"));
        assert!(sanitize_subject("").starts_with("_-"));
        let suffix = sanitize_subject("a/b").rsplit('-').next().unwrap().to_string();
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn distinct_subjects_get_distinct_directories() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::new(dir.path());
        for (a, b) in [("^GSPC", "_GSPC"), ("a/b", "a_b"), ("BRK.B", "BRK/B")] {
            assert_ne!(store.subject_dir(a), store.subject_dir(b), "{a} vs {b}");
        }
        assert_eq!(sanitize_subject("^GSPC"), sanitize_subject("^GSPC"));

        store.write_checkpoint("^GSPC", &vec![1]).unwrap();
        let other: Option<Vec<i32>> = store.read_checkpoint("_GSPC").unwrap();
        assert_eq!(other, None);
    }

    #[test]
    fn chunk_blobs_are_write_once() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::new(dir.path());

        let first = chunk("SPY", 3);
        assert!(store.write_chunk(&first).unwrap());

        let mut second = chunk("SPY", 3);
        second.created_at = first.created_at + chrono::Duration::hours(1);
        assert!(!store.write_chunk(&second).unwrap());

        let stored = store.read_chunk("SPY", 3).unwrap().unwrap();
        assert_eq!(stored.created_at, first.created_at);
        assert!(store.chunk_path("SPY", 3).ends_with("SPY/chunk_000003.json"));
    }

    #[test]
    fn lists_chunk_indices_in_order() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::new(dir.path());
        for index in [10, 2, 7] {
            store.write_chunk(&chunk("ETH-USD", index)).unwrap();
        }
        store.write_checkpoint("ETH-USD", &serde_json::json!({"k": 1})).unwrap();

        assert_eq!(store.chunk_indices("ETH-USD").unwrap(), vec![2, 7, 10]);
        assert_eq!(store.subjects().unwrap(), vec!["ETH-USD".to_string()]);
        assert!(store.chunk_indices("NOPE").unwrap().is_empty());
    }

    #[test]
    fn checkpoint_overwrites_and_clear_removes() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::new(dir.path());
        store.write_checkpoint("SPY", &vec![1, 2]).unwrap();
        store.write_checkpoint("SPY", &vec![3]).unwrap();
        let read: Option<Vec<i32>> = store.read_checkpoint("SPY").unwrap();
        assert_eq!(read, Some(vec![3]));

        store.clear_subject("SPY").unwrap();
        let read: Option<Vec<i32>> = store.read_checkpoint("SPY").unwrap();
        assert_eq!(read, None);
        store.clear_subject("SPY").unwrap();
    }

    #[test]
    fn corrupt_blob_is_reported() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::new(dir.path());
        store.write_chunk(&chunk("SPY", 0)).unwrap();
        fs::write(store.chunk_path("SPY", 0), b"{not json").unwrap();
        assert!(matches!(
            store.read_chunk("SPY", 0),
            Err(CacheError::Corrupt { .. })
        ));
    }

    #[test]
    fn corrupt_blob_is_replaced_on_write() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::new(dir.path());
        store.write_chunk(&chunk("SPY", 0)).unwrap();
        fs::write(store.chunk_path("SPY", 0), b"{\"truncated\":").unwrap();

        let fresh = chunk("SPY", 0);
        assert!(store.write_chunk(&fresh).unwrap());
        assert_eq!(store.read_chunk("SPY", 0).unwrap(), Some(fresh));
    }
}
