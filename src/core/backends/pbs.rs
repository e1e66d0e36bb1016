//! PBS/Torque backend descriptor.

use hashlink::LinkedHashMap;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::core::backends::{
  Backend, BackendDescriptor, BackendOverrides, CommandTemplate, DirectiveSpec,
  ParallelLayout, Passthrough, ValueConvert, env_table, status_table,
};
use crate::core::status::JobStatus;

static JOB_ID_RE: Lazy<Regex> =
  Lazy::new(|| Regex::new(r"^(\d+)\.[\w.-]+$").unwrap());

/// qsub prints `<id>.<server>` on its last non-empty line.
fn parse_job_id(output: &str) -> Option<String> {
  let last_line = output
    .lines()
    .map(str::trim)
    .filter(|l| !l.is_empty())
    .last()?;
  JOB_ID_RE
    .captures(last_line)
    .and_then(|c| c.get(1))
    .map(|m| m.as_str().to_string())
}

/// qstat prints a table whose fifth column holds the single-letter state.
/// A forgotten job shows up as "qstat: Unknown Job", which means it left the
/// queue after finishing.
fn extract_status(
  output: &str,
  statuses: &LinkedHashMap<String, JobStatus>,
) -> Option<JobStatus> {
  if output
    .lines()
    .any(|l| l.trim().starts_with("qstat: Unknown Job"))
  {
    return Some(JobStatus::Completed);
  }
  let last_line = output
    .lines()
    .map(str::trim)
    .filter(|l| !l.is_empty())
    .last()?;
  let state = last_line.split_whitespace().nth(4)?;
  statuses.get(state).copied()
}

pub fn backend() -> Backend {
  let mut directives: LinkedHashMap<String, Option<DirectiveSpec>> =
    LinkedHashMap::new();
  directives.insert("jobname".to_string(), Some(DirectiveSpec::new("-N {value}")));
  directives.insert("queue".to_string(), Some(DirectiveSpec::new("-q {value}")));
  directives.insert(
    "time".to_string(),
    Some(DirectiveSpec::new("-l walltime={value}")),
  );
  directives.insert(
    "mem".to_string(),
    Some(DirectiveSpec::with_convert(
      "-l mem={value}",
      ValueConvert::MemAppendMega,
    )),
  );
  directives.insert("stdout".to_string(), Some(DirectiveSpec::new("-o {value}")));
  directives.insert("stderr".to_string(), Some(DirectiveSpec::new("-e {value}")));

  Backend {
    descriptor: BackendDescriptor {
      name: "pbs".to_string(),
      prefix: "#PBS".to_string(),
      extension: "pbs".to_string(),
      submit: CommandTemplate::args(&["qsub", "{script}"]),
      status_running: CommandTemplate::args(&["qstat", "{job_id}"]),
      status_finished: CommandTemplate::args(&["qstat", "{job_id}"]),
      cancel: CommandTemplate::args(&["qdel", "{job_id}"]),
      job_id_pattern: r"(\d+)\.[\w.-]+".to_string(),
      directives,
      // ppn and threads coalesce into per-node cores; the node count is
      // still expressed exactly.
      parallel: ParallelLayout::NodeSelect {
        template: "-l nodes={nodes}:ppn={cores_per_node}".to_string(),
      },
      passthrough: Passthrough::ResourceList,
      env: env_table(&[
        ("CJ_JOB_ID", "PBS_JOBID"),
        ("CJ_JOB_NAME", "PBS_JOBNAME"),
        ("CJ_WORKDIR", "PBS_O_WORKDIR"),
        ("CJ_HOST", "PBS_O_HOST"),
        ("CJ_NODELIST", "`cat $PBS_NODEFILE`"),
        ("CJ_ARRAY_INDEX", "PBS_ARRAYID"),
      ]),
      statuses: status_table(&[
        ("Q", JobStatus::Pending),
        ("H", JobStatus::Pending),
        ("T", JobStatus::Pending),
        ("W", JobStatus::Pending),
        ("S", JobStatus::Pending),
        ("R", JobStatus::Running),
        ("E", JobStatus::Running),
        ("C", JobStatus::Completed),
      ]),
    },
    overrides: BackendOverrides {
      parse_job_id: Some(parse_job_id),
      extract_status: Some(extract_status),
    },
  }
}
