use super::*;
use crate::core::status::JobStatus;
use crate::core::utils::get_timestamp;

fn entry(key: &str) -> CacheEntry {
  CacheEntry {
    schema_version: CACHE_SCHEMA_VERSION,
    cache_key: key.to_string(),
    job_id: None,
    backend: "slurm".to_string(),
    remote: None,
    status: JobStatus::Pending,
    submitted_at: get_timestamp(),
    poll_interval_secs: 60,
    unknown_polls: 0,
    epilogue: None,
    epilogue_done: false,
  }
}

fn store() -> (tempfile::TempDir, CacheStore) {
  let dir = tempfile::tempdir().unwrap();
  let store = CacheStore::new(dir.path()).unwrap();
  (dir, store)
}

#[test]
fn test_get_missing_is_none() {
  let (_dir, store) = store();
  assert!(store.get("nothing").unwrap().is_none());
}

#[test]
fn test_claim_then_get() {
  let (_dir, store) = store();
  store.claim(&entry("job-a")).unwrap();
  let loaded = store.get("job-a").unwrap().unwrap();
  assert_eq!(loaded.cache_key, "job-a");
  assert_eq!(loaded.job_id, None);
  assert_eq!(loaded.status, JobStatus::Pending);
}

#[test]
fn test_claim_twice_fails() {
  let (_dir, store) = store();
  store.claim(&entry("job-a")).unwrap();
  match store.claim(&entry("job-a")) {
    Err(CacheError::AlreadyExists(key)) => assert_eq!(key, "job-a"),
    other => panic!("expected AlreadyExists, got {:?}", other),
  }
}

#[test]
fn test_update_fills_job_id() {
  let (_dir, store) = store();
  let mut e = entry("job-a");
  store.claim(&e).unwrap();
  e.job_id = Some("1234".to_string());
  e.status = JobStatus::Running;
  store.update(&e).unwrap();
  let loaded = store.get("job-a").unwrap().unwrap();
  assert_eq!(loaded.job_id.as_deref(), Some("1234"));
  assert_eq!(loaded.status, JobStatus::Running);
}

#[test]
fn test_remove_is_idempotent() {
  let (_dir, store) = store();
  store.claim(&entry("job-a")).unwrap();
  store.remove("job-a").unwrap();
  assert!(store.get("job-a").unwrap().is_none());
  store.remove("job-a").unwrap();
}

#[test]
fn test_corrupt_entry_is_an_error_not_absent() {
  let (_dir, store) = store();
  store.claim(&entry("job-a")).unwrap();
  let path = store.dir().join("clusterjob.job-a.json");
  std::fs::write(&path, "{ not json").unwrap();
  match store.get("job-a") {
    Err(CacheError::Corrupt { key, .. }) => assert_eq!(key, "job-a"),
    other => panic!("expected Corrupt, got {:?}", other.map(|_| ())),
  }
}

#[test]
fn test_newer_schema_is_refused() {
  let (_dir, store) = store();
  let mut e = entry("job-a");
  e.schema_version = CACHE_SCHEMA_VERSION + 1;
  store.claim(&e).unwrap();
  match store.get("job-a") {
    Err(CacheError::UnsupportedSchema { found, supported, .. }) => {
      assert_eq!(found, CACHE_SCHEMA_VERSION + 1);
      assert_eq!(supported, CACHE_SCHEMA_VERSION);
    }
    other => panic!("expected UnsupportedSchema, got {:?}", other.map(|_| ())),
  }
}

#[test]
fn test_clear_removes_only_owned_files() {
  let (_dir, store) = store();
  store.claim(&entry("job-a")).unwrap();
  store.claim(&entry("job-b")).unwrap();
  let stranger = store.dir().join("unrelated.json");
  std::fs::write(&stranger, "{}").unwrap();
  store.clear().unwrap();
  assert!(store.get("job-a").unwrap().is_none());
  assert!(store.get("job-b").unwrap().is_none());
  assert!(stranger.exists());
}

#[test]
fn test_sanitized_keys_do_not_collide() {
  assert_eq!(sanitize_key("plain-key_1"), "plain-key_1");
  let a = sanitize_key("job/a");
  let b = sanitize_key("job:a");
  assert_ne!(a, b);
  assert!(a.starts_with("job_a-"));
}

#[test]
fn test_entries_with_odd_keys_round_trip() {
  let (_dir, store) = store();
  store.claim(&entry("run/2026-08: final")).unwrap();
  let loaded = store.get("run/2026-08: final").unwrap().unwrap();
  assert_eq!(loaded.cache_key, "run/2026-08: final");
}

#[test]
fn test_derived_cache_key_shape() {
  let key = derived_cache_key("myjob", "myjob.slr", "slurm");
  assert!(key.starts_with("myjob-"));
  assert_eq!(key.len(), "myjob-".len() + 16);
  // any input change moves the digest
  assert_ne!(key, derived_cache_key("myjob", "myjob.pbs", "pbs"));
  assert_eq!(key, derived_cache_key("myjob", "myjob.slr", "slurm"));
}

#[test]
fn test_unknown_polls_default_for_old_entries() {
  // entries written before the field existed deserialize with 0 / false
  let (_dir, store) = store();
  let path = store.dir().join("clusterjob.old.json");
  let data = serde_json::json!({
    "schema_version": 1,
    "cache_key": "old",
    "job_id": "7",
    "backend": "slurm",
    "remote": null,
    "status": "RUNNING",
    "submitted_at": "2026-01-01T00:00:00Z",
    "poll_interval_secs": 60
  });
  std::fs::write(&path, serde_json::to_string(&data).unwrap()).unwrap();
  let loaded = store.get("old").unwrap().unwrap();
  assert_eq!(loaded.unknown_polls, 0);
  assert_eq!(loaded.epilogue, None);
  assert!(!loaded.epilogue_done);
}
