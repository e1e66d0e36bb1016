use std::io::Write;

use super::*;
use crate::core::backends::{Passthrough, ValueConvert, check_descriptor};
use crate::core::status::JobStatus;

const MOAB_DESCRIPTOR: &str = r##"
name: moab
prefix: "#MSUB"
extension: moab
submit: [msub, "{script}"]
status: [checkjob, "{job_id}"]
cancel: [canceljob, "{job_id}"]
job_id_pattern: '(\d+)'
directives:
  jobname: "-N {value}"
  queue: "-q {value}"
  time:
    template: "-l walltime={value}"
  mem:
    template: "-l mem={value}"
    convert: mem_append_mega
  stdout: "-o {value}"
  stderr: "-e {value}"
  depend: null
parallel:
  kind: node_select
  template: "-l nodes={nodes}:ppn={cores_per_node}"
passthrough: resource_list
env:
  CJ_JOB_ID: MOAB_JOBID
  CJ_JOB_NAME: MOAB_JOBNAME
  CJ_WORKDIR: MOAB_SUBMITDIR
  CJ_HOST: MOAB_MACHINE
  CJ_NODELIST: MOAB_NODELIST
  CJ_ARRAY_INDEX: MOAB_JOBARRAYINDEX
statuses:
  Idle: PENDING
  Starting: PENDING
  Running: RUNNING
  Completed: COMPLETED
  Removed: CANCELLED
"##;

fn descriptor_file(text: &str) -> tempfile::NamedTempFile {
  let mut file = tempfile::NamedTempFile::new().unwrap();
  file.write_all(text.as_bytes()).unwrap();
  file.flush().unwrap();
  file
}

#[test]
fn test_parse_full_descriptor() {
  let file = descriptor_file(MOAB_DESCRIPTOR);
  let descriptor = parse_backend_from_file(file.path()).unwrap();

  assert_eq!(descriptor.name, "moab");
  assert_eq!(descriptor.prefix, "#MSUB");
  assert_eq!(descriptor.extension, "moab");
  assert_eq!(descriptor.submit.argv, vec!["msub", "{script}"]);
  assert!(!descriptor.submit.use_shell);
  // status_finished defaults to the status command
  assert_eq!(descriptor.status_finished.argv, descriptor.status_running.argv);
  assert_eq!(descriptor.passthrough, Passthrough::ResourceList);

  let time = descriptor.directives.get("time").unwrap().as_ref().unwrap();
  assert_eq!(time.template, "-l walltime={value}");
  assert_eq!(time.convert, ValueConvert::Verbatim);
  let mem = descriptor.directives.get("mem").unwrap().as_ref().unwrap();
  assert_eq!(mem.convert, ValueConvert::MemAppendMega);
  // null marks a consumed-but-silent key
  assert!(descriptor.directives.get("depend").unwrap().is_none());

  // declared order survives parsing
  let keys: Vec<&String> = descriptor.directives.keys().collect();
  assert_eq!(keys[0], "jobname");
  assert_eq!(keys[1], "queue");

  assert_eq!(descriptor.statuses.get("Idle"), Some(&JobStatus::Pending));
  assert_eq!(
    descriptor.statuses.get("Removed"),
    Some(&JobStatus::Cancelled)
  );

  // both alias spellings were generated
  assert_eq!(
    descriptor.env.get("$CJ_JOB_ID").map(String::as_str),
    Some("$MOAB_JOBID")
  );
  assert_eq!(
    descriptor.env.get("${CJ_JOB_ID}").map(String::as_str),
    Some("${MOAB_JOBID}")
  );

  check_descriptor(&descriptor).unwrap();
}

#[test]
fn test_shell_submit_command() {
  let text = MOAB_DESCRIPTOR.replace(
    "submit: [msub, \"{script}\"]",
    "submit: 'msub < \"{script}\"'",
  );
  let file = descriptor_file(&text);
  let descriptor = parse_backend_from_file(file.path()).unwrap();
  assert!(descriptor.submit.use_shell);
  assert_eq!(descriptor.submit.argv, vec!["msub < \"{script}\""]);
}

#[test]
fn test_missing_key() {
  let text = MOAB_DESCRIPTOR.replace("name: moab\n", "");
  let file = descriptor_file(&text);
  assert!(matches!(
    parse_backend_from_file(file.path()),
    Err(ParserError::MissingKey(key)) if key == "name"
  ));
}

#[test]
fn test_unknown_status_name() {
  let text = MOAB_DESCRIPTOR.replace("Idle: PENDING", "Idle: NAPPING");
  let file = descriptor_file(&text);
  assert!(matches!(
    parse_backend_from_file(file.path()),
    Err(ParserError::UnknownValue(field, value))
      if field == "statuses" && value == "NAPPING"
  ));
}

#[test]
fn test_unknown_parallel_kind() {
  let text = MOAB_DESCRIPTOR.replace("kind: node_select", "kind: mystery");
  let file = descriptor_file(&text);
  assert!(matches!(
    parse_backend_from_file(file.path()),
    Err(ParserError::UnknownValue(field, _)) if field == "parallel.kind"
  ));
}

#[test]
fn test_empty_file() {
  let file = descriptor_file("");
  assert!(matches!(
    parse_backend_from_file(file.path()),
    Err(ParserError::YamlEmpty)
  ));
}

#[test]
fn test_broken_yaml() {
  let file = descriptor_file("name: [unclosed");
  assert!(matches!(
    parse_backend_from_file(file.path()),
    Err(ParserError::YamlParseFailed(_))
  ));
}
