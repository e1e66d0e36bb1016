//! LSF backend descriptor.

use hashlink::LinkedHashMap;

use crate::core::backends::{
  Backend, BackendDescriptor, BackendOverrides, CommandTemplate, DirectiveSpec,
  ParallelLayout, Passthrough, ValueConvert, env_table, status_table,
};
use crate::core::status::JobStatus;

/// bjobs prints a header with column labels; the state sits under `STAT`,
/// whose offset varies with the job id width.
fn extract_status(
  output: &str,
  statuses: &LinkedHashMap<String, JobStatus>,
) -> Option<JobStatus> {
  let mut stat_pos = None;
  for line in output.lines() {
    if line.starts_with("JOBID") {
      stat_pos = line.find("STAT");
      continue;
    }
    let pos = stat_pos?;
    if line.len() <= pos {
      continue;
    }
    if let Some(state) = line[pos..].split_whitespace().next() {
      if let Some(status) = statuses.get(state) {
        return Some(*status);
      }
    }
  }
  None
}

pub fn backend() -> Backend {
  let mut directives: LinkedHashMap<String, Option<DirectiveSpec>> =
    LinkedHashMap::new();
  directives.insert("jobname".to_string(), Some(DirectiveSpec::new("-J {value}")));
  directives.insert("queue".to_string(), Some(DirectiveSpec::new("-q {value}")));
  directives.insert(
    "time".to_string(),
    Some(DirectiveSpec::with_convert(
      "-W {value}",
      ValueConvert::TimeToMinutes,
    )),
  );
  directives.insert("mem".to_string(), Some(DirectiveSpec::new("-M {value}")));
  directives.insert("stdout".to_string(), Some(DirectiveSpec::new("-o {value}")));
  directives.insert("stderr".to_string(), Some(DirectiveSpec::new("-e {value}")));

  Backend {
    descriptor: BackendDescriptor {
      name: "lsf".to_string(),
      prefix: "#BSUB".to_string(),
      extension: "lsf".to_string(),
      // bsub reads the script from stdin, hence the shell redirection.
      submit: CommandTemplate::shell("bsub < \"{script}\""),
      status_running: CommandTemplate::args(&["bjobs", "-a", "{job_id}"]),
      status_finished: CommandTemplate::args(&["bjobs", "-a", "{job_id}"]),
      cancel: CommandTemplate::args(&["bkill", "{job_id}"]),
      job_id_pattern: r"Job <([^>]+)> is submitted".to_string(),
      directives,
      parallel: ParallelLayout::FlatWithTile {
        tasks: "-n {total}".to_string(),
        tile: "-R \"span[ptile={cores_per_node}]\"".to_string(),
      },
      passthrough: Passthrough::SingleDash,
      env: env_table(&[
        ("CJ_JOB_ID", "LSB_JOBID"),
        ("CJ_JOB_NAME", "LSB_JOBNAME"),
        ("CJ_WORKDIR", "LS_SUBCWD"),
        // LSF has no submit-host variable.
        ("CJ_HOST", "`hostname`"),
        ("CJ_NODELIST", "LSB_HOSTS"),
        ("CJ_ARRAY_INDEX", "LSB_JOBINDEX"),
      ]),
      statuses: status_table(&[
        ("PEND", JobStatus::Pending),
        ("PSUSP", JobStatus::Pending),
        ("USUSP", JobStatus::Pending),
        ("SSUSP", JobStatus::Pending),
        ("WAIT", JobStatus::Pending),
        ("UNKWN", JobStatus::Pending),
        ("RUN", JobStatus::Running),
        ("DONE", JobStatus::Completed),
        ("EXIT", JobStatus::Failed),
        ("ZOMBI", JobStatus::Failed),
      ]),
    },
    overrides: BackendOverrides {
      parse_job_id: None,
      extract_status: Some(extract_status),
    },
  }
}
