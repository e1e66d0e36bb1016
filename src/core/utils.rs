use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::core::jobs::JobError;

/// Get current timestamp as DateTime<Utc>
pub fn get_timestamp() -> DateTime<Utc> {
  Utc::now()
}

static WALLTIME_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
  [
    r"^(?P<hours>\d+):(?P<minutes>\d+):(?P<seconds>\d+)$",
    r"^(?P<days>\d+)-(?P<hours>\d+)$",
    r"^(?P<minutes>\d+)$",
    r"^(?P<minutes>\d+):(?P<seconds>\d+)$",
    r"^(?P<days>\d+)-(?P<hours>\d+):(?P<minutes>\d+)$",
    r"^(?P<days>\d+)-(?P<hours>\d+):(?P<minutes>\d+):(?P<seconds>\d+)$",
    r"^(?P<days>\d+):(?P<hours>\d+):(?P<minutes>\d+):(?P<seconds>\d+)$",
  ]
  .iter()
  .map(|p| Regex::new(p).unwrap())
  .collect()
});

/// Parse a walltime string into seconds.
///
/// Accepted formats: "minutes", "minutes:seconds", "hours:minutes:seconds",
/// "days-hours", "days-hours:minutes", "days-hours:minutes:seconds" and
/// "days:hours:minutes:seconds", which covers the syntax of every supported
/// scheduler.
pub fn parse_time_to_seconds(time_str: &str) -> Result<u64, JobError> {
  let time_str = time_str.trim();
  for pattern in WALLTIME_PATTERNS.iter() {
    if let Some(captures) = pattern.captures(time_str) {
      let field = |name: &str| -> u64 {
        captures
          .name(name)
          .map(|m| m.as_str().parse().unwrap_or(0))
          .unwrap_or(0)
      };
      return Ok(
        field("seconds")
          + 60 * field("minutes")
          + 3600 * field("hours")
          + 86_400 * field("days"),
      );
    }
  }
  Err(JobError::InvalidTimeFormat(time_str.to_string()))
}

/// Path for a short-lived hook script in the system temp directory.
pub fn temp_script_path(tag: &str) -> PathBuf {
  std::env::temp_dir().join(format!(
    "clusterjob_{}_{}_{}.sh",
    tag,
    std::process::id(),
    get_timestamp().timestamp_nanos_opt().unwrap_or(0)
  ))
}

/// Make a script file executable (Unix only)
#[cfg(unix)]
pub fn make_script_executable(script_path: &Path) -> Result<(), std::io::Error> {
  use std::os::unix::fs::PermissionsExt;
  let metadata = std::fs::metadata(script_path)?;
  let mut perms = metadata.permissions();
  perms.set_mode(0o755);
  std::fs::set_permissions(script_path, perms)?;
  Ok(())
}

#[cfg(not(unix))]
pub fn make_script_executable(_script_path: &Path) -> Result<(), std::io::Error> {
  Ok(())
}

/// Strip a trailing slash, as rootdir/workdir are joined with explicit
/// separators later on.
pub fn strip_trailing_slash(dir: &str) -> String {
  let dir = dir.trim();
  dir.strip_suffix('/').unwrap_or(dir).to_string()
}
