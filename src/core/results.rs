//! Tracking handle for a submitted job.


use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::core::backends::{self, Backend};
use crate::core::cache::{CacheEntry, CacheStore};
use crate::core::jobs::{JobError, TrackerOptions};
use crate::core::runner::{run_local_script, runner_for, CommandRunner, RunnerError};
use crate::core::status::JobStatus;

/// A handle on one submitted job. Status queries go to the scheduler;
/// everything learned is persisted back to the cache entry, so a process
/// restart picks up exactly where the last one stopped.
pub struct AsyncResult {
  entry: CacheEntry,
  backend: Backend,
  runner: Arc<dyn CommandRunner>,
  store: CacheStore,
  options: TrackerOptions,
}

impl AsyncResult {
  pub(crate) fn from_entry(
    entry: CacheEntry,
    backend: Backend,
    runner: Arc<dyn CommandRunner>,
    store: CacheStore,
    options: TrackerOptions,
  ) -> Self {
    AsyncResult {
      entry,
      backend,
      runner,
      store,
      options,
    }
  }

  pub fn job_id(&self) -> Option<&str> {
    self.entry.job_id.as_deref()
  }

  pub fn cache_key(&self) -> &str {
    &self.entry.cache_key
  }

  pub fn backend_name(&self) -> &str {
    self.backend.name()
  }

  /// Last status learned from the scheduler, without querying it.
  pub fn cached_status(&self) -> JobStatus {
    self.entry.status
  }

  /// Seconds between polls in `wait()`, derived from the job's walltime.
  pub fn poll_interval_secs(&self) -> u64 {
    self.entry.poll_interval_secs
  }

  fn job_id_required(&self) -> Result<&str, JobError> {
    match self.entry.job_id.as_deref() {
      Some(id) => Ok(id),
      None => Err(JobError::SubmissionInProgress(self.entry.cache_key.clone())),
    }
  }

  /// Query the scheduler for the current status.
  ///
  /// Terminal statuses short-circuit without a query. An unreadable query
  /// returns `Unknown` without clobbering the last good status; after
  /// `max_unknown_polls` consecutive unreadable polls it escalates to
  /// [`JobError::StatusQuery`].
  pub fn status(&mut self) -> Result<JobStatus, JobError> {
    if self.entry.status.is_terminal() {
      return Ok(self.entry.status);
    }
    let job_id = self.job_id_required()?.to_string();

    match self.query_status(&job_id)? {
      Some(status) => {
        let changed =
          status != self.entry.status || self.entry.unknown_polls != 0;
        self.entry.unknown_polls = 0;
        self.entry.status = status;
        if changed {
          self.store.update(&self.entry)?;
        }
        if status.is_terminal() {
          self.run_epilogue()?;
        }
        Ok(status)
      }
      None => {
        self.entry.unknown_polls += 1;
        self.store.update(&self.entry)?;
        warn!(
          "Status of job {} unreadable ({} consecutive polls)",
          job_id, self.entry.unknown_polls
        );
        if self.entry.unknown_polls >= self.options.max_unknown_polls {
          return Err(JobError::StatusQuery {
            job_id,
            attempts: self.entry.unknown_polls,
          });
        }
        Ok(JobStatus::Unknown)
      }
    }
  }

  /// One status round trip: the running-status command first, then the
  /// finished-status fallback for schedulers that forget completed jobs.
  fn query_status(&self, job_id: &str) -> Result<Option<JobStatus>, JobError> {
    let descriptor = &self.backend.descriptor;
    let mut seen: Option<Vec<String>> = None;
    for template in [&descriptor.status_running, &descriptor.status_finished] {
      let cmd = template.render("", job_id);
      // Backends without a separate finished-status command reuse the same
      // template; no point running it twice.
      if seen.as_ref() == Some(&cmd.argv) {
        break;
      }
      seen = Some(cmd.argv.clone());
      let output = match self.runner.run(&cmd, None, self.options.command_timeout_secs) {
        Ok(output) => output,
        // A hung session is a transient failure like garbled output, not a
        // reason to stop tracking.
        Err(RunnerError::Timeout(secs)) => {
          warn!("Status command for job {} timed out after {}s", job_id, secs);
          return Ok(None);
        }
        Err(e) => return Err(e.into()),
      };
      if let Some(status) = self.backend.extract_status(&output.combined()) {
        debug!("Job {} reported {}", job_id, status);
        return Ok(Some(status));
      }
    }
    Ok(None)
  }

  /// Block until the job reaches a terminal status, polling at
  /// `poll_interval_secs` (or the entry's derived interval when `None`).
  /// On timeout the cached status keeps whatever the last poll saw.
  pub fn wait(
    &mut self,
    poll_interval_secs: Option<u64>,
    timeout_secs: Option<u64>,
  ) -> Result<JobStatus, JobError> {
    let interval =
      Duration::from_secs(poll_interval_secs.unwrap_or(self.entry.poll_interval_secs));
    let started = Instant::now();
    loop {
      let status = self.status()?;
      if status.is_terminal() {
        return Ok(status);
      }
      if let Some(timeout) = timeout_secs {
        if started.elapsed() >= Duration::from_secs(timeout) {
          return Err(JobError::WaitTimeout {
            job_id: self.entry.job_id.clone().unwrap_or_default(),
            timeout_secs: timeout,
          });
        }
      }
      std::thread::sleep(interval);
    }
  }

  /// Cancel the job. A no-op when the cached status is already terminal.
  /// A failing cancel command triggers one status re-poll: cancelling a
  /// just-finished job is fine, anything else is an error.
  pub fn cancel(&mut self) -> Result<(), JobError> {
    if self.entry.status.is_terminal() {
      debug!(
        "Job {:?} already {}; nothing to cancel",
        self.entry.job_id, self.entry.status
      );
      return Ok(());
    }
    let job_id = self.job_id_required()?.to_string();

    let cmd = self.backend.descriptor.cancel.render("", &job_id);
    let output = self
      .runner
      .run(&cmd, None, self.options.command_timeout_secs)?;
    if !output.success() {
      if let Ok(Some(status)) = self.query_status(&job_id) {
        if status.is_terminal() {
          self.entry.status = status;
          self.store.update(&self.entry)?;
          // This is still the first terminal observation, so the epilogue
          // fires here like on any other terminal transition.
          self.run_epilogue()?;
          return Ok(());
        }
      }
      return Err(JobError::Cancel {
        job_id,
        output: output.combined(),
      });
    }

    info!("Cancelled job {}", job_id);
    self.entry.status = JobStatus::Cancelled;
    // Cancellation is an operator action, not a completion; the epilogue
    // still runs once the terminal status is sealed.
    self.store.update(&self.entry)?;
    self.run_epilogue()?;
    Ok(())
  }

  /// Run the persisted epilogue exactly once, on the first observation of
  /// a terminal status.
  fn run_epilogue(&mut self) -> Result<(), JobError> {
    if self.entry.epilogue_done {
      return Ok(());
    }
    let Some(body) = self.entry.epilogue.clone() else {
      self.entry.epilogue_done = true;
      self.store.update(&self.entry)?;
      return Ok(());
    };
    // Marked done before running, so a failing epilogue is reported once
    // instead of on every later status call.
    self.entry.epilogue_done = true;
    self.store.update(&self.entry)?;
    let output = run_local_script(&body, "epilogue", 300)?;
    if !output.success() {
      return Err(JobError::EpilogueFailed {
        exit_code: output.exit_code,
        stderr: output.stderr,
      });
    }
    Ok(())
  }

  /// Persist the tracking state as a standalone JSON file, loadable from a
  /// different process or machine.
  pub fn dump(&self, path: &Path) -> Result<(), JobError> {
    let data = serde_json::to_string_pretty(&self.entry)
      .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    // Appended, not swapped in for the extension: dumps of `a.job` and
    // `a.state` in one directory must not share a temp path.
    let mut temp = path.as_os_str().to_owned();
    temp.push(".tmp");
    let temp = std::path::PathBuf::from(temp);
    std::fs::write(&temp, data)?;
    std::fs::rename(&temp, path)?;
    Ok(())
  }

  /// Read and schema-check a `dump()`ed entry.
  pub(crate) fn read_dump(path: &Path) -> Result<CacheEntry, JobError> {
    let data = std::fs::read_to_string(path)?;
    let entry: CacheEntry = serde_json::from_str(&data)
      .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    entry.check_schema().map_err(JobError::Cache)?;
    Ok(entry)
  }

  /// Rebuild a handle from a `dump()`ed file. The backend is resolved from
  /// the entry (built-ins only; go through [`crate::core::Clusterjob::load`]
  /// for registered descriptors); the runner from its recorded remote host.
  pub fn load(path: &Path, store: CacheStore) -> Result<Self, JobError> {
    let entry = Self::read_dump(path)?;
    let backend = backends::builtin(&entry.backend)?;
    let runner = runner_for(entry.remote.as_deref());
    Ok(AsyncResult::from_entry(
      entry,
      backend,
      runner,
      store,
      TrackerOptions::default(),
    ))
  }
}
