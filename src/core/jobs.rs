//! Job descriptions and the submission pipeline.


use std::collections::BTreeMap;
use std::sync::Arc;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::core::backends::{Backend, BackendError};
use crate::core::cache::{self, CacheEntry, CacheError, CacheStore, CACHE_SCHEMA_VERSION};
use crate::core::render::{self, RenderError};
use crate::core::results::AsyncResult;
use crate::core::runner::{run_local_script, CommandRunner, RunnerError};
use crate::core::status::JobStatus;
use crate::core::utils::{get_timestamp, parse_time_to_seconds, strip_trailing_slash};

#[derive(Error, Debug)]
pub enum JobError {
  #[error(transparent)]
  Render(#[from] RenderError),
  #[error(transparent)]
  Backend(#[from] BackendError),
  #[error(transparent)]
  Runner(#[from] RunnerError),
  #[error(transparent)]
  Cache(#[from] CacheError),
  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),
  #[error("Invalid walltime '{0}'")]
  InvalidTimeFormat(String),
  #[error("Submit command failed with exit code {exit_code}: {stderr}")]
  SubmissionFailed {
    exit_code: i32,
    stdout: String,
    stderr: String,
  },
  #[error("Could not extract a job id from submit output: {output}")]
  JobIdParse { output: String },
  #[error(
    "A submission for '{0}' is already in flight (or died mid-submit); \
     resubmit with force to take over"
  )]
  SubmissionInProgress(String),
  #[error("Status query for job {job_id} failed {attempts} times in a row")]
  StatusQuery { job_id: String, attempts: u32 },
  #[error("Cancel command for job {job_id} failed: {output}")]
  Cancel { job_id: String, output: String },
  #[error("Job {job_id} did not finish within {timeout_secs} seconds")]
  WaitTimeout { job_id: String, timeout_secs: u64 },
  #[error("Prologue script failed with exit code {exit_code}: {stderr}")]
  PrologueFailed { exit_code: i32, stderr: String },
  #[error("Epilogue script failed with exit code {exit_code}: {stderr}")]
  EpilogueFailed { exit_code: i32, stderr: String },
}

/// Everything needed to submit one job: the script body plus scheduler
/// resources, both still scheduler-agnostic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDescription {
  pub jobname: String,
  pub body: String,
  pub backend: String,
  pub shell: String,
  /// Script filename; defaults to `<jobname>.<backend extension>`.
  pub filename: Option<String>,
  /// SSH host of the cluster head node; `None` submits locally.
  pub remote: Option<String>,
  pub rootdir: Option<String>,
  pub workdir: Option<String>,
  /// Shell snippet run locally right before submission.
  pub prologue: Option<String>,
  /// Shell snippet run locally once after the job first turns terminal.
  pub epilogue: Option<String>,
  pub resources: BTreeMap<String, Value>,
  pub placeholders: BTreeMap<String, String>,
}

impl JobDescription {
  pub fn new(body: &str, jobname: &str) -> Self {
    JobDescription {
      jobname: jobname.to_string(),
      body: body.to_string(),
      backend: "slurm".to_string(),
      shell: "/bin/bash".to_string(),
      filename: None,
      remote: None,
      rootdir: None,
      workdir: None,
      prologue: None,
      epilogue: None,
      resources: BTreeMap::new(),
      placeholders: BTreeMap::new(),
    }
  }

  pub fn backend(mut self, backend: &str) -> Self {
    self.backend = backend.to_string();
    self
  }

  pub fn remote(mut self, host: &str) -> Self {
    self.remote = Some(host.to_string());
    self
  }

  pub fn rootdir(mut self, dir: &str) -> Self {
    self.rootdir = Some(strip_trailing_slash(dir));
    self
  }

  pub fn workdir(mut self, dir: &str) -> Self {
    self.workdir = Some(strip_trailing_slash(dir));
    self
  }

  pub fn resource(mut self, key: &str, value: impl Into<Value>) -> Self {
    self.resources.insert(key.to_string(), value.into());
    self
  }

  pub fn placeholder(mut self, key: &str, value: &str) -> Self {
    self.placeholders.insert(key.to_string(), value.to_string());
    self
  }

  pub fn prologue(mut self, body: &str) -> Self {
    self.prologue = Some(body.to_string());
    self
  }

  pub fn epilogue(mut self, body: &str) -> Self {
    self.epilogue = Some(body.to_string());
    self
  }

  /// The script filename for a given backend.
  pub fn script_filename(&self, backend: &Backend) -> String {
    match &self.filename {
      Some(name) => name.clone(),
      None => format!("{}.{}", self.jobname, backend.descriptor.extension),
    }
  }

  /// rootdir and workdir joined; either may be empty.
  pub fn fulldir(&self) -> String {
    match (self.rootdir.as_deref(), self.workdir.as_deref()) {
      (Some(root), Some(work)) => format!("{}/{}", root, work),
      (Some(root), None) => root.to_string(),
      (None, Some(work)) => work.to_string(),
      (None, None) => ".".to_string(),
    }
  }

  /// Where the rendered script is staged before submission.
  pub fn script_path(&self, backend: &Backend) -> String {
    format!("{}/{}", self.fulldir(), self.script_filename(backend))
  }

  pub fn derived_cache_key(&self, backend: &Backend) -> String {
    cache::derived_cache_key(
      &self.jobname,
      &self.script_filename(backend),
      backend.name(),
    )
  }

  /// Poll interval: a tenth of the requested walltime, clamped to
  /// [10, 1800] seconds; 60 when no walltime was requested.
  pub fn poll_interval_secs(&self) -> u64 {
    let Some(time) = self.resources.get("time") else {
      return 60;
    };
    let text = match time {
      Value::String(s) => s.clone(),
      other => other.to_string(),
    };
    match parse_time_to_seconds(&text) {
      Ok(seconds) => (seconds / 10).clamp(10, 1800),
      Err(_) => 60,
    }
  }
}

/// Knobs of the tracking loop.
#[derive(Debug, Clone)]
pub struct TrackerOptions {
  /// Timeout for every individual scheduler command.
  pub command_timeout_secs: u64,
  /// Consecutive unreadable polls tolerated before `status()` errors out.
  pub max_unknown_polls: u32,
}

impl Default for TrackerOptions {
  fn default() -> Self {
    TrackerOptions {
      command_timeout_secs: 60,
      max_unknown_polls: 5,
    }
  }
}

/// Submit `job`, or resume tracking a previous submission under the same
/// cache key.
///
/// The cache entry is claimed (created with `job_id` unset) before the
/// submit command runs and filled in afterwards, so a crash in between
/// leaves a visible in-flight marker instead of a silent double submit.
pub(crate) fn submit_job(
  job: &JobDescription,
  backend: &Backend,
  runner: Arc<dyn CommandRunner>,
  store: &CacheStore,
  cache_key: Option<&str>,
  force: bool,
  options: &TrackerOptions,
) -> Result<AsyncResult, JobError> {
  let key = match cache_key {
    Some(key) => key.to_string(),
    None => job.derived_cache_key(backend),
  };

  match store.get(&key)? {
    Some(_) if force => {
      info!("Discarding cached submission '{}' (force)", key);
      store.remove(&key)?;
    }
    Some(entry) => match entry.job_id.clone() {
      Some(job_id) if !entry.status.is_failed_terminal() => {
        info!("Reusing cached submission '{}' (job {})", key, job_id);
        return Ok(AsyncResult::from_entry(
          entry,
          backend.clone(),
          runner,
          store.clone(),
          options.clone(),
        ));
      }
      Some(job_id) => {
        info!("Cached job {} failed; resubmitting '{}'", job_id, key);
        store.remove(&key)?;
      }
      None => return Err(JobError::SubmissionInProgress(key)),
    },
    None => {}
  }

  let epilogue = match &job.epilogue {
    Some(body) => Some(render::render_hook(body, job, backend)?),
    None => None,
  };

  let entry = CacheEntry {
    schema_version: CACHE_SCHEMA_VERSION,
    cache_key: key.clone(),
    job_id: None,
    backend: backend.name().to_string(),
    remote: job.remote.clone(),
    status: JobStatus::Pending,
    submitted_at: get_timestamp(),
    poll_interval_secs: job.poll_interval_secs(),
    unknown_polls: 0,
    epilogue,
    epilogue_done: false,
  };
  match store.claim(&entry) {
    Ok(()) => {}
    Err(CacheError::AlreadyExists(key)) => {
      return Err(JobError::SubmissionInProgress(key));
    }
    Err(e) => return Err(e.into()),
  }

  match perform_submit(job, backend, runner.as_ref(), options) {
    Ok(job_id) => {
      info!("Submitted '{}' as job {}", key, job_id);
      let mut entry = entry;
      entry.job_id = Some(job_id);
      store.update(&entry)?;
      Ok(AsyncResult::from_entry(
        entry,
        backend.clone(),
        runner,
        store.clone(),
        options.clone(),
      ))
    }
    Err(e) => {
      // On a timeout the scheduler may have accepted the job after all;
      // the claim stays so nothing resubmits behind its back.
      if matches!(e, JobError::Runner(RunnerError::Timeout(_))) {
        warn!(
          "Submit command for '{}' timed out; keeping the in-flight claim",
          key
        );
      } else {
        store.remove(&key)?;
      }
      Err(e)
    }
  }
}

fn perform_submit(
  job: &JobDescription,
  backend: &Backend,
  runner: &dyn CommandRunner,
  options: &TrackerOptions,
) -> Result<String, JobError> {
  let rendered = render::render(job, backend)?;
  for key in &rendered.ignored {
    warn!(
      "Backend '{}' cannot express resource '{}'; dropped",
      backend.name(),
      key
    );
  }

  if let Some(body) = &job.prologue {
    run_prologue(body, job, backend)?;
  }

  let script_path = job.script_path(backend);
  runner.stage_file(&rendered.text, &script_path)?;
  match runner.host() {
    Some(host) => info!("Submitting {} on {}", script_path, host),
    None => info!("Submitting {}", script_path),
  }

  let cmd = backend.descriptor.submit.render(&job.script_filename(backend), "");
  let output = runner.run(&cmd, Some(&job.fulldir()), options.command_timeout_secs)?;
  if !output.success() {
    return Err(JobError::SubmissionFailed {
      exit_code: output.exit_code,
      stdout: output.stdout,
      stderr: output.stderr,
    });
  }

  let combined = output.combined();
  backend
    .parse_job_id(&combined)
    .ok_or(JobError::JobIdParse { output: combined })
}

fn run_prologue(
  body: &str,
  job: &JobDescription,
  backend: &Backend,
) -> Result<(), JobError> {
  let rendered = render::render_hook(body, job, backend)?;
  let output = run_local_script(&rendered, "prologue", 300)?;
  if !output.success() {
    return Err(JobError::PrologueFailed {
      exit_code: output.exit_code,
      stderr: output.stderr,
    });
  }
  Ok(())
}
