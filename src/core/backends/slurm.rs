//! SLURM backend descriptor.

use hashlink::LinkedHashMap;

use crate::core::backends::{
  Backend, BackendDescriptor, CommandTemplate, DirectiveSpec, ParallelLayout,
  Passthrough, env_table, status_table,
};
use crate::core::status::JobStatus;

pub fn backend() -> Backend {
  let mut directives: LinkedHashMap<String, Option<DirectiveSpec>> =
    LinkedHashMap::new();
  directives.insert(
    "jobname".to_string(),
    Some(DirectiveSpec::new("--job-name={value}")),
  );
  directives.insert(
    "queue".to_string(),
    Some(DirectiveSpec::new("--partition={value}")),
  );
  directives.insert(
    "time".to_string(),
    Some(DirectiveSpec::new("--time={value}")),
  );
  directives.insert("mem".to_string(), Some(DirectiveSpec::new("--mem={value}")));
  directives.insert(
    "stdout".to_string(),
    Some(DirectiveSpec::new("--output={value}")),
  );
  directives.insert(
    "stderr".to_string(),
    Some(DirectiveSpec::new("--error={value}")),
  );

  Backend::from_descriptor(BackendDescriptor {
    name: "slurm".to_string(),
    prefix: "#SBATCH".to_string(),
    extension: "slr".to_string(),
    submit: CommandTemplate::args(&["sbatch", "{script}"]),
    status_running: CommandTemplate::args(&[
      "squeue", "-h", "-o", "%T", "-j", "{job_id}",
    ]),
    status_finished: CommandTemplate::args(&[
      "sacct",
      "--format=state",
      "-n",
      "-j",
      "{job_id}",
    ]),
    cancel: CommandTemplate::args(&["scancel", "{job_id}"]),
    job_id_pattern: r"(?m)Submitted batch job (\d+)\s*$".to_string(),
    directives,
    parallel: ParallelLayout::PerResource {
      nodes: "--nodes={value}".to_string(),
      tasks_per_node: "--ntasks-per-node={value}".to_string(),
      cpus_per_task: "--cpus-per-task={value}".to_string(),
    },
    passthrough: Passthrough::GnuFlags,
    env: env_table(&[
      ("CJ_JOB_ID", "SLURM_JOB_ID"),
      ("CJ_JOB_NAME", "SLURM_JOB_NAME"),
      ("CJ_WORKDIR", "SLURM_SUBMIT_DIR"),
      ("CJ_HOST", "SLURM_SUBMIT_HOST"),
      ("CJ_NODELIST", "SLURM_JOB_NODELIST"),
      ("CJ_ARRAY_INDEX", "SLURM_ARRAY_TASK_ID"),
    ]),
    statuses: status_table(&[
      ("PENDING", JobStatus::Pending),
      ("CONFIGURING", JobStatus::Pending),
      ("SUSPENDED", JobStatus::Pending),
      ("RUNNING", JobStatus::Running),
      ("COMPLETING", JobStatus::Running),
      ("COMPLETED", JobStatus::Completed),
      ("CANCELLED", JobStatus::Cancelled),
      ("FAILED", JobStatus::Failed),
      ("NODE_FAIL", JobStatus::Failed),
      ("PREEMPTED", JobStatus::Failed),
      ("TIMEOUT", JobStatus::Failed),
    ]),
  })
}
