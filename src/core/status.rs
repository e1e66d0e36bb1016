use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Scheduler-agnostic job status.
///
/// `Unknown` is not a scheduler state: it marks a status query that failed
/// transiently (dead connection, garbled output). It is absorbed up to a
/// bounded number of consecutive polls before escalating.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum JobStatus {
  Pending,
  Running,
  Completed,
  Failed,
  Cancelled,
  Unknown,
}

impl JobStatus {
  /// A terminal status never changes again; polling stops here.
  pub fn is_terminal(&self) -> bool {
    matches!(
      self,
      JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
    )
  }

  /// Statuses under which a cached entry does not block resubmission.
  pub fn is_failed_terminal(&self) -> bool {
    matches!(self, JobStatus::Failed | JobStatus::Cancelled)
  }
}
