use std::io::Write;
use std::sync::Arc;

use super::*;
use crate::core::runner::mock::MockRunner;
use crate::core::status::JobStatus;

fn clusterjob() -> (tempfile::TempDir, Clusterjob) {
  let dir = tempfile::tempdir().unwrap();
  let cj = Clusterjob::with_cache_dir(dir.path()).unwrap();
  (dir, cj)
}

#[test]
fn test_builtin_backend_resolution() {
  let (_dir, cj) = clusterjob();
  assert_eq!(cj.backend("slurm").unwrap().name(), "slurm");
  assert!(matches!(
    cj.backend("moab"),
    Err(ClusterjobError::BackendError(_))
  ));
}

#[test]
fn test_registered_backend_shadows_builtin() {
  let (_dir, mut cj) = clusterjob();
  let mut descriptor = cj.backend("slurm").unwrap().descriptor;
  descriptor.prefix = "#SBATCH-SITE".to_string();
  cj.register_backend(descriptor).unwrap();
  assert_eq!(cj.backend("slurm").unwrap().descriptor.prefix, "#SBATCH-SITE");
}

#[test]
fn test_register_rejects_invalid_descriptor() {
  let (_dir, mut cj) = clusterjob();
  let mut descriptor = cj.backend("slurm").unwrap().descriptor;
  descriptor.job_id_pattern = "[".to_string();
  assert!(cj.register_backend(descriptor).is_err());
}

#[test]
fn test_register_backend_file() {
  let (_dir, mut cj) = clusterjob();
  let mut file = tempfile::NamedTempFile::new().unwrap();
  // a minimal SLURM clone under a site-specific name
  let yaml = r##"
name: sitebatch
prefix: "#SBATCH"
extension: slr
submit: [sbatch, "{script}"]
status: [squeue, -h, -o, "%T", -j, "{job_id}"]
cancel: [scancel, "{job_id}"]
job_id_pattern: 'Submitted batch job (\d+)'
directives:
  jobname: "--job-name={value}"
  queue: "--partition={value}"
  time: "--time={value}"
  mem: "--mem={value}"
  stdout: "--output={value}"
  stderr: "--error={value}"
parallel:
  kind: per_resource
  nodes: "--nodes={value}"
  tasks_per_node: "--ntasks-per-node={value}"
  cpus_per_task: "--cpus-per-task={value}"
passthrough: gnu_flags
env:
  CJ_JOB_ID: SLURM_JOB_ID
  CJ_JOB_NAME: SLURM_JOB_NAME
  CJ_WORKDIR: SLURM_SUBMIT_DIR
  CJ_HOST: SLURM_SUBMIT_HOST
  CJ_NODELIST: SLURM_JOB_NODELIST
  CJ_ARRAY_INDEX: SLURM_ARRAY_TASK_ID
statuses:
  PENDING: PENDING
  RUNNING: RUNNING
  COMPLETED: COMPLETED
  FAILED: FAILED
"##;
  file.write_all(yaml.as_bytes()).unwrap();
  file.flush().unwrap();

  cj.register_backend_file(file.path()).unwrap();
  assert_eq!(cj.backend("sitebatch").unwrap().name(), "sitebatch");
}

#[test]
fn test_submit_and_track_through_facade() {
  let (_dir, mut cj) = clusterjob();
  let runner = Arc::new(MockRunner::new());
  runner.push(MockRunner::ok("Submitted batch job 1234"));
  runner.push(MockRunner::ok("RUNNING"));
  cj.set_runner(runner.clone());

  let job = JobDescription::new("echo hi\n", "myjob").resource("time", "00:10:00");
  let mut result = cj.submit(&job, false).unwrap();
  assert_eq!(result.job_id(), Some("1234"));
  assert_eq!(result.status().unwrap(), JobStatus::Running);

  // a second handle picks up the same submission from the cache
  let again = cj.submit(&job, false).unwrap();
  assert_eq!(again.job_id(), Some("1234"));
  assert_eq!(again.cached_status(), JobStatus::Running);
}

#[test]
fn test_clear_cache_forgets_submissions() {
  let (_dir, mut cj) = clusterjob();
  let runner = Arc::new(MockRunner::new());
  runner.push(MockRunner::ok("Submitted batch job 1"));
  runner.push(MockRunner::ok("Submitted batch job 2"));
  cj.set_runner(runner.clone());

  let job = JobDescription::new("echo hi\n", "myjob");
  let first = cj.submit(&job, false).unwrap();
  cj.clear_cache().unwrap();
  let second = cj.submit(&job, false).unwrap();

  assert_eq!(first.job_id(), Some("1"));
  assert_eq!(second.job_id(), Some("2"));
}
