//! SGE (Sun Grid Engine) backend descriptor.
//!
//! SGE expresses core counts through administrator-defined parallel
//! environments, so the default layout emits `-pe smp <total>` and drops the
//! per-node placement. Override the `parallel` field of the descriptor when
//! the cluster names its environment differently.

use hashlink::LinkedHashMap;

use crate::core::backends::{
  Backend, BackendDescriptor, BackendOverrides, CommandTemplate, DirectiveSpec,
  ParallelLayout, Passthrough, env_table, status_table,
};
use crate::core::status::JobStatus;

/// `qstat -j <id>` has no state column: it errors out for jobs that left the
/// queue and prints a job report for everything else.
fn extract_status(
  output: &str,
  _statuses: &LinkedHashMap<String, JobStatus>,
) -> Option<JobStatus> {
  if output.contains("Following jobs do not exist") {
    return Some(JobStatus::Completed);
  }
  if output.trim().is_empty() {
    return None;
  }
  Some(JobStatus::Running)
}

pub fn backend() -> Backend {
  let mut directives: LinkedHashMap<String, Option<DirectiveSpec>> =
    LinkedHashMap::new();
  directives.insert("jobname".to_string(), Some(DirectiveSpec::new("-N {value}")));
  directives.insert("queue".to_string(), Some(DirectiveSpec::new("-q {value}")));
  directives.insert(
    "time".to_string(),
    Some(DirectiveSpec::new("-l h_rt={value}")),
  );
  directives.insert(
    "mem".to_string(),
    Some(DirectiveSpec::new("-l h_vmem={value}")),
  );
  directives.insert("stdout".to_string(), Some(DirectiveSpec::new("-o {value}")));
  directives.insert("stderr".to_string(), Some(DirectiveSpec::new("-e {value}")));

  Backend {
    descriptor: BackendDescriptor {
      name: "sge".to_string(),
      prefix: "#$".to_string(),
      extension: "sge".to_string(),
      submit: CommandTemplate::args(&["qsub", "{script}"]),
      status_running: CommandTemplate::args(&["qstat", "-j", "{job_id}"]),
      status_finished: CommandTemplate::args(&["qstat", "-j", "{job_id}"]),
      cancel: CommandTemplate::args(&["qdel", "{job_id}"]),
      job_id_pattern: r"Your job (\d+) .* has been submitted".to_string(),
      directives,
      parallel: ParallelLayout::FlatTasks {
        template: "-pe smp {total}".to_string(),
      },
      passthrough: Passthrough::ResourceList,
      env: env_table(&[
        ("CJ_JOB_ID", "JOB_ID"),
        ("CJ_JOB_NAME", "JOB_NAME"),
        ("CJ_WORKDIR", "SGE_O_WORKDIR"),
        ("CJ_HOST", "SGE_O_HOST"),
        ("CJ_NODELIST", "HOSTNAME"),
        ("CJ_ARRAY_INDEX", "SGE_TASK_ID"),
      ]),
      // qstat's queue listing states, used when raw strings are mapped
      // directly; the override above handles `qstat -j` output.
      statuses: status_table(&[
        ("qw", JobStatus::Pending),
        ("hqw", JobStatus::Pending),
        ("s", JobStatus::Pending),
        ("S", JobStatus::Pending),
        ("r", JobStatus::Running),
        ("t", JobStatus::Running),
        ("Eqw", JobStatus::Failed),
        ("dr", JobStatus::Cancelled),
      ]),
    },
    overrides: BackendOverrides {
      parse_job_id: None,
      extract_status: Some(extract_status),
    },
  }
}
