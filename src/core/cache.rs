//! Crash-safe submission cache.
//!
//! One JSON file per tracked job. The two-phase discipline is what makes
//! submission idempotent across crashes:
//!
//!   claim:  create-if-absent (write temp, hard-link into place) BEFORE the
//!           submit command runs, with `job_id` still unset;
//!   fill:   write temp + atomic rename once the scheduler returned an id.
//!
//! A reader can therefore trust every entry it finds: either the submission
//! finished (id present) or it is in flight / died mid-submit (id absent).

#[cfg(test)]
mod tests;

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::core::status::JobStatus;

/// Bumped whenever the entry layout changes incompatibly.
pub const CACHE_SCHEMA_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum CacheError {
  #[error("Cache I/O error: {0}")]
  Io(#[from] std::io::Error),
  #[error("Corrupt cache entry '{key}': {reason}")]
  Corrupt { key: String, reason: String },
  #[error(
    "Cache entry '{key}' has schema version {found}, supported up to {supported}"
  )]
  UnsupportedSchema { key: String, found: u32, supported: u32 },
  #[error("Cache entry '{0}' already exists")]
  AlreadyExists(String),
}

/// Persistent state of one tracked job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
  pub schema_version: u32,
  pub cache_key: String,
  /// `None` while a submission is in flight (or died mid-submit).
  pub job_id: Option<String>,
  pub backend: String,
  pub remote: Option<String>,
  pub status: JobStatus,
  pub submitted_at: DateTime<Utc>,
  pub poll_interval_secs: u64,
  /// Consecutive polls that came back unreadable.
  #[serde(default)]
  pub unknown_polls: u32,
  /// Epilogue body rendered at submit time, replayed on completion.
  #[serde(default)]
  pub epilogue: Option<String>,
  #[serde(default)]
  pub epilogue_done: bool,
}

impl CacheEntry {
  /// Entries from a newer clusterjob are refused rather than misread.
  pub fn check_schema(&self) -> Result<(), CacheError> {
    if self.schema_version > CACHE_SCHEMA_VERSION || self.schema_version == 0 {
      return Err(CacheError::UnsupportedSchema {
        key: self.cache_key.clone(),
        found: self.schema_version,
        supported: CACHE_SCHEMA_VERSION,
      });
    }
    Ok(())
  }
}

/// Directory of cache entry files.
#[derive(Debug, Clone)]
pub struct CacheStore {
  dir: PathBuf,
  prefix: String,
}

impl CacheStore {
  pub fn new(dir: &Path) -> Result<Self, CacheError> {
    fs::create_dir_all(dir)?;
    Ok(CacheStore {
      dir: dir.to_path_buf(),
      prefix: "clusterjob".to_string(),
    })
  }

  /// Platform cache directory, e.g. `~/.cache/clusterjob` on Linux.
  pub fn default_dir() -> PathBuf {
    dirs::cache_dir()
      .unwrap_or_else(std::env::temp_dir)
      .join("clusterjob")
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  fn entry_path(&self, key: &str) -> PathBuf {
    self
      .dir
      .join(format!("{}.{}.json", self.prefix, sanitize_key(key)))
  }

  fn temp_path(&self, key: &str) -> PathBuf {
    self.dir.join(format!(
      ".{}.{}.{}.tmp",
      self.prefix,
      sanitize_key(key),
      std::process::id()
    ))
  }

  /// Read an entry. A missing file is `Ok(None)`; an unreadable one is an
  /// error, never silently treated as absent.
  pub fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
    let path = self.entry_path(key);
    let data = match fs::read_to_string(&path) {
      Ok(data) => data,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(CacheError::Io(e)),
    };
    let entry: CacheEntry =
      serde_json::from_str(&data).map_err(|e| CacheError::Corrupt {
        key: key.to_string(),
        reason: e.to_string(),
      })?;
    entry.check_schema()?;
    Ok(Some(entry))
  }

  /// Create the entry only if no entry for the key exists yet. The hard
  /// link is the atomic create-if-absent: it fails with `AlreadyExists`
  /// when another process got there first.
  pub fn claim(&self, entry: &CacheEntry) -> Result<(), CacheError> {
    let path = self.entry_path(&entry.cache_key);
    let temp = self.temp_path(&entry.cache_key);
    write_json(&temp, entry)?;
    let linked = fs::hard_link(&temp, &path);
    let _ = fs::remove_file(&temp);
    match linked {
      Ok(()) => {
        debug!("Claimed cache entry '{}'", entry.cache_key);
        Ok(())
      }
      Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
        Err(CacheError::AlreadyExists(entry.cache_key.clone()))
      }
      Err(e) => Err(CacheError::Io(e)),
    }
  }

  /// Overwrite an entry atomically (write temp, rename over).
  pub fn update(&self, entry: &CacheEntry) -> Result<(), CacheError> {
    let path = self.entry_path(&entry.cache_key);
    let temp = self.temp_path(&entry.cache_key);
    write_json(&temp, entry)?;
    fs::rename(&temp, &path)?;
    Ok(())
  }

  /// Delete an entry; deleting a missing entry is not an error.
  pub fn remove(&self, key: &str) -> Result<(), CacheError> {
    match fs::remove_file(self.entry_path(key)) {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(CacheError::Io(e)),
    }
  }

  /// Delete every entry this store owns (matching its filename prefix).
  pub fn clear(&self) -> Result<(), CacheError> {
    let marker = format!("{}.", self.prefix);
    for item in fs::read_dir(&self.dir)? {
      let item = item?;
      let name = item.file_name().to_string_lossy().to_string();
      if name.starts_with(&marker) && name.ends_with(".json") {
        fs::remove_file(item.path())?;
      }
    }
    Ok(())
  }
}

fn write_json(path: &Path, entry: &CacheEntry) -> Result<(), CacheError> {
  let data = serde_json::to_string_pretty(entry).map_err(|e| CacheError::Corrupt {
    key: entry.cache_key.clone(),
    reason: e.to_string(),
  })?;
  fs::write(path, data)?;
  Ok(())
}

/// Filesystem-safe rendition of a cache key. Mangled keys get a digest
/// suffix so two keys differing only in stripped characters cannot collide.
fn sanitize_key(key: &str) -> String {
  let safe: String = key
    .chars()
    .map(|c| {
      if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
        c
      } else {
        '_'
      }
    })
    .collect();
  if safe == key {
    safe
  } else {
    format!("{}-{}", safe, short_digest(key))
  }
}

fn short_digest(input: &str) -> String {
  let digest = Sha256::digest(input.as_bytes());
  digest[..4].iter().map(|b| format!("{:02x}", b)).collect()
}

/// Default cache key for a job: the jobname plus a digest over everything
/// that shapes the submission identity.
pub fn derived_cache_key(jobname: &str, filename: &str, backend: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(jobname.as_bytes());
  hasher.update(b"\0");
  hasher.update(filename.as_bytes());
  hasher.update(b"\0");
  hasher.update(backend.as_bytes());
  let digest = hasher.finalize();
  let hex: String = digest[..8].iter().map(|b| format!("{:02x}", b)).collect();
  format!("{}-{}", jobname, hex)
}
