use super::*;
use crate::core::backends::builtin;
use crate::core::jobs::JobDescription;

fn base_job() -> JobDescription {
  JobDescription::new("echo hello\n", "myjob")
}

#[test]
fn test_render_is_pure() {
  let job = base_job()
    .resource("time", "01:00:00")
    .resource("nodes", 2)
    .resource("ppn", 4)
    .placeholder("data", "/scratch/data");
  let backend = builtin("slurm").unwrap();
  let first = render(&job, &backend).unwrap();
  let second = render(&job, &backend).unwrap();
  assert_eq!(first.text, second.text);
}

#[test]
fn test_slurm_script_layout() {
  let job = JobDescription::new(
    "#!/bin/sh\necho running as $CJ_JOB_ID in ${CJ_WORKDIR}\n",
    "myjob",
  )
  .resource("queue", "batch")
  .resource("time", "01:00:00");
  let backend = builtin("slurm").unwrap();
  let script = render(&job, &backend).unwrap();

  let lines: Vec<&str> = script.text.lines().collect();
  assert_eq!(lines[0], "#!/bin/bash");
  // jobname is injected even when not given as a resource
  assert!(lines.contains(&"#SBATCH --job-name=myjob"));
  assert!(lines.contains(&"#SBATCH --partition=batch"));
  assert!(lines.contains(&"#SBATCH --time=01:00:00"));
  // the body shebang is stripped, aliases are translated
  assert!(!script.text.contains("#!/bin/sh"));
  assert!(
    script
      .text
      .contains("echo running as $SLURM_JOB_ID in ${SLURM_SUBMIT_DIR}")
  );
}

#[test]
fn test_alias_prefix_does_not_clobber_longer_alias() {
  let job = JobDescription::new("echo $CJ_JOB_NAME\n", "myjob");
  let backend = builtin("slurm").unwrap();
  let script = render(&job, &backend).unwrap();
  assert!(script.text.contains("$SLURM_JOB_NAME"));
  assert!(!script.text.contains("$SLURM_JOB_IDNAME"));
}

#[test]
fn test_directive_order_follows_descriptor() {
  let job = base_job()
    .resource("stderr", "err.log")
    .resource("queue", "batch");
  let backend = builtin("slurm").unwrap();
  let script = render(&job, &backend).unwrap();
  let jobname = script.text.find("--job-name").unwrap();
  let queue = script.text.find("--partition").unwrap();
  let stderr = script.text.find("--error").unwrap();
  assert!(jobname < queue && queue < stderr);
}

#[test]
fn test_passthrough_gnu_flags() {
  let job = base_job()
    .resource("contiguous", true)
    .resource("licenses", "foo@server:1");
  let backend = builtin("slurm").unwrap();
  let script = render(&job, &backend).unwrap();
  assert!(script.text.contains("#SBATCH --contiguous\n"));
  assert!(script.text.contains("#SBATCH --licenses=foo@server:1\n"));
}

#[test]
fn test_passthrough_false_flag_renders_nothing() {
  let job = base_job().resource("requeue", false);
  let backend = builtin("slurm").unwrap();
  let script = render(&job, &backend).unwrap();
  assert!(!script.text.contains("requeue"));
  assert!(script.consumed.contains(&"requeue".to_string()));
}

#[test]
fn test_passthrough_resource_list() {
  let job = base_job().backend("pbs").resource("vmem", "4gb");
  let backend = builtin("pbs").unwrap();
  let script = render(&job, &backend).unwrap();
  assert!(script.text.contains("#PBS -l vmem=4gb\n"));
}

#[test]
fn test_unknown_key_without_passthrough_is_an_error() {
  let backend = builtin("slurm").unwrap();
  let mut descriptor = backend.descriptor.clone();
  descriptor.passthrough = Passthrough::None;
  let strict = crate::core::backends::Backend::from_descriptor(descriptor);
  let job = base_job().resource("licenses", "foo");
  match render(&job, &strict) {
    Err(RenderError::UnknownResourceKey { key, .. }) => assert_eq!(key, "licenses"),
    other => panic!("expected UnknownResourceKey, got {:?}", other.map(|s| s.text)),
  }
}

#[test]
fn test_placeholders_and_escaping() {
  let job = base_job()
    .placeholder("data", "/scratch/data")
    .resource("time", "00:10:00");
  let job = JobDescription {
    body: "cp {data}/in . # literal {{braces}} survive\nrun --time {time}\n"
      .to_string(),
    ..job
  };
  let backend = builtin("slurm").unwrap();
  let script = render(&job, &backend).unwrap();
  assert!(script.text.contains("cp /scratch/data/in ."));
  assert!(script.text.contains("literal {braces} survive"));
  assert!(script.text.contains("run --time 00:10:00"));
}

#[test]
fn test_shell_brace_expansion_is_not_a_placeholder() {
  let job = JobDescription::new("echo ${HOME} ${OUTPUT:-default}\n", "myjob");
  let backend = builtin("slurm").unwrap();
  let script = render(&job, &backend).unwrap();
  assert!(script.text.contains("echo ${HOME} ${OUTPUT:-default}"));
}

#[test]
fn test_undefined_placeholder_is_an_error() {
  let job = JobDescription::new("echo {nope}\n", "myjob");
  let backend = builtin("slurm").unwrap();
  match render(&job, &backend) {
    Err(RenderError::PlaceholderMissing(name)) => assert_eq!(name, "nope"),
    other => panic!("expected PlaceholderMissing, got {:?}", other.map(|s| s.text)),
  }
}

#[test]
fn test_lsf_time_converted_to_minutes() {
  let job = base_job().backend("lsf").resource("time", "01:30:10");
  let backend = builtin("lsf").unwrap();
  let script = render(&job, &backend).unwrap();
  // 5410 seconds round up to 91 minutes
  assert!(script.text.contains("#BSUB -W 91\n"));
}

#[test]
fn test_pbs_mem_gets_mega_suffix() {
  let job = base_job().backend("pbs").resource("mem", 2048);
  let backend = builtin("pbs").unwrap();
  let script = render(&job, &backend).unwrap();
  assert!(script.text.contains("#PBS -l mem=2048m\n"));
}

#[test]
fn test_sge_drops_nodes_and_reports_it() {
  let job = base_job()
    .backend("sge")
    .resource("nodes", 4)
    .resource("ppn", 8);
  let backend = builtin("sge").unwrap();
  let script = render(&job, &backend).unwrap();
  assert!(script.text.contains("#$ -pe smp 32\n"));
  assert_eq!(script.ignored, vec!["nodes".to_string()]);
}

#[test]
fn test_parallel_triple_defaults_to_one() {
  let job = base_job().resource("ppn", 16);
  let backend = builtin("slurm").unwrap();
  let script = render(&job, &backend).unwrap();
  assert!(script.text.contains("--nodes=1"));
  assert!(script.text.contains("--ntasks-per-node=16"));
  assert!(script.text.contains("--cpus-per-task=1"));
}

#[test]
fn test_no_parallel_resources_no_parallel_lines() {
  let job = base_job();
  let backend = builtin("slurm").unwrap();
  let script = render(&job, &backend).unwrap();
  assert!(!script.text.contains("--nodes"));
  assert!(!script.text.contains("--ntasks-per-node"));
}

#[test]
fn test_bad_parallel_value() {
  let job = base_job().resource("nodes", 0);
  let backend = builtin("slurm").unwrap();
  assert!(matches!(
    render(&job, &backend),
    Err(RenderError::BadResourceValue { key, .. }) if key == "nodes"
  ));
}

#[test]
fn test_render_hook_keeps_aliases() {
  let job = base_job().placeholder("out", "/results");
  let backend = builtin("slurm").unwrap();
  let hook = render_hook("scp host:{out} . # $CJ_JOB_ID stays\n", &job, &backend).unwrap();
  assert!(hook.contains("scp host:/results ."));
  assert!(hook.contains("$CJ_JOB_ID"));
}
