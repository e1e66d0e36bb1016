pub mod backends;
pub mod cache;
pub mod jobs;
pub mod parsers;
pub mod render;
pub mod results;
pub mod runner;
pub mod status;
mod utils;

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::core::backends::{Backend, BackendDescriptor, BackendError};
use crate::core::cache::{CacheError, CacheStore};
use crate::core::jobs::{JobDescription, JobError, TrackerOptions, submit_job};
use crate::core::parsers::ParserError;
use crate::core::results::AsyncResult;
use crate::core::runner::{CommandRunner, runner_for};

#[derive(thiserror::Error, Debug)]
pub enum ClusterjobError {
  #[error("Backend Error: {0}")]
  BackendError(#[from] BackendError),
  #[error("Cache Error: {0}")]
  CacheError(#[from] CacheError),
  #[error("Parser Error: {0}")]
  ParserError(#[from] ParserError),
  #[error("Job Error: {0}")]
  JobError(#[from] JobError),
}

/// Entry point: backend registry, cache store and tracking options.
pub struct Clusterjob {
  custom_backends: HashMap<String, Backend>,
  store: CacheStore,
  options: TrackerOptions,
  #[cfg(test)]
  runner_override: Option<Arc<dyn CommandRunner>>,
}

impl Clusterjob {
  /// Open with the platform cache directory.
  pub fn new() -> Result<Self, ClusterjobError> {
    Self::with_cache_dir(&CacheStore::default_dir())
  }

  pub fn with_cache_dir(dir: &Path) -> Result<Self, ClusterjobError> {
    let _ = env_logger::try_init();

    let store = CacheStore::new(dir)?;
    Ok(Clusterjob {
      custom_backends: HashMap::new(),
      store,
      options: TrackerOptions::default(),
      #[cfg(test)]
      runner_override: None,
    })
  }

  pub fn cache_dir(&self) -> &Path {
    self.store.dir()
  }

  pub fn set_tracker_options(&mut self, options: TrackerOptions) {
    self.options = options;
  }

  /// Register a backend descriptor, shadowing a built-in of the same name.
  pub fn register_backend(
    &mut self,
    descriptor: BackendDescriptor,
  ) -> Result<(), ClusterjobError> {
    backends::check_descriptor(&descriptor)?;
    self
      .custom_backends
      .insert(descriptor.name.clone(), Backend::from_descriptor(descriptor));
    Ok(())
  }

  /// Register a backend from a YAML descriptor file.
  pub fn register_backend_file(&mut self, path: &Path) -> Result<(), ClusterjobError> {
    let descriptor = parsers::parse_backend_from_file(path)?;
    self.register_backend(descriptor)
  }

  /// Resolve a backend by name, registered descriptors first.
  pub fn backend(&self, name: &str) -> Result<Backend, ClusterjobError> {
    if let Some(backend) = self.custom_backends.get(name) {
      return Ok(backend.clone());
    }
    Ok(backends::builtin(name)?)
  }

  /// Submit a job, or resume tracking an earlier submission under the same
  /// cache key. `force` discards any cached submission first.
  pub fn submit(
    &self,
    job: &JobDescription,
    force: bool,
  ) -> Result<AsyncResult, ClusterjobError> {
    self.submit_with_key(job, None, force)
  }

  /// Like `submit()`, with an explicit cache key instead of the derived one.
  pub fn submit_with_key(
    &self,
    job: &JobDescription,
    cache_key: Option<&str>,
    force: bool,
  ) -> Result<AsyncResult, ClusterjobError> {
    let backend = self.backend(&job.backend)?;
    let runner = self.runner(job.remote.as_deref());
    Ok(submit_job(
      job,
      &backend,
      runner,
      &self.store,
      cache_key,
      force,
      &self.options,
    )?)
  }

  /// Rebuild a tracking handle from a file written by [`AsyncResult::dump`],
  /// resolving the backend through this instance's registry.
  pub fn load(&self, path: &Path) -> Result<AsyncResult, ClusterjobError> {
    let entry = AsyncResult::read_dump(path)?;
    let backend = self.backend(&entry.backend)?;
    let runner = self.runner(entry.remote.as_deref());
    Ok(AsyncResult::from_entry(
      entry,
      backend,
      runner,
      self.store.clone(),
      self.options.clone(),
    ))
  }

  /// Drop every cached submission this store owns.
  pub fn clear_cache(&self) -> Result<(), ClusterjobError> {
    Ok(self.store.clear()?)
  }

  #[cfg(not(test))]
  fn runner(&self, remote: Option<&str>) -> Arc<dyn CommandRunner> {
    runner_for(remote)
  }

  #[cfg(test)]
  fn runner(&self, remote: Option<&str>) -> Arc<dyn CommandRunner> {
    match &self.runner_override {
      Some(runner) => runner.clone(),
      None => runner_for(remote),
    }
  }

  #[cfg(test)]
  pub(crate) fn set_runner(&mut self, runner: Arc<dyn CommandRunner>) {
    self.runner_override = Some(runner);
  }
}
