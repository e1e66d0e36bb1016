mod lsf;
mod pbs;
mod pbspro;
mod sge;
mod slurm;


use hashlink::LinkedHashMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::status::JobStatus;

/// Core environment variable aliases that every backend must translate.
/// Both the `$NAME` and `${NAME}` spellings are substituted.
pub const CORE_ENV_ALIASES: [&str; 6] = [
  "CJ_JOB_ID",
  "CJ_JOB_NAME",
  "CJ_WORKDIR",
  "CJ_HOST",
  "CJ_NODELIST",
  "CJ_ARRAY_INDEX",
];

/// Resource keys every backend must accept, either through its directive
/// table or through a pass-through rule.
pub const COMMON_RESOURCE_KEYS: [&str; 6] =
  ["jobname", "queue", "time", "mem", "stdout", "stderr"];

#[derive(Error, Debug)]
pub enum BackendError {
  #[error("Unknown backend: {0}")]
  UnknownBackend(String),
  #[error("Invalid backend descriptor '{0}': {1}")]
  InvalidDescriptor(String, String),
}

/// A command line template. `{script}` and `{job_id}` tokens are substituted
/// per invocation. `use_shell` marks templates that need shell features such
/// as redirection (`bsub < "{script}"`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandTemplate {
  pub argv: Vec<String>,
  #[serde(default)]
  pub use_shell: bool,
}

impl CommandTemplate {
  pub fn args(argv: &[&str]) -> Self {
    CommandTemplate {
      argv: argv.iter().map(|s| s.to_string()).collect(),
      use_shell: false,
    }
  }

  pub fn shell(line: &str) -> Self {
    CommandTemplate {
      argv: vec![line.to_string()],
      use_shell: true,
    }
  }

  pub fn render(&self, script: &str, job_id: &str) -> crate::core::runner::CommandLine {
    let argv = self
      .argv
      .iter()
      .map(|tok| tok.replace("{script}", script).replace("{job_id}", job_id))
      .collect();
    crate::core::runner::CommandLine {
      argv,
      use_shell: self.use_shell,
    }
  }

  fn contains_token(&self, token: &str) -> bool {
    self.argv.iter().any(|tok| tok.contains(token))
  }
}

/// Conversion applied to a resource value before directive formatting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueConvert {
  Verbatim,
  /// Walltime converted to whole minutes (LSF `-W`).
  TimeToMinutes,
  /// Memory in MB gets the scheduler's `m` suffix (PBS `-l mem=`).
  MemAppendMega,
}

/// One resource-to-directive mapping. The template refers to the converted
/// value as `{value}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectiveSpec {
  pub template: String,
  #[serde(default = "default_convert")]
  pub convert: ValueConvert,
}

fn default_convert() -> ValueConvert {
  ValueConvert::Verbatim
}

impl DirectiveSpec {
  pub fn new(template: &str) -> Self {
    DirectiveSpec {
      template: template.to_string(),
      convert: ValueConvert::Verbatim,
    }
  }

  pub fn with_convert(template: &str, convert: ValueConvert) -> Self {
    DirectiveSpec {
      template: template.to_string(),
      convert,
    }
  }
}

/// How a backend encodes the (nodes, ppn, threads) triple. Every layout
/// preserves the invariant total cores = nodes * ppn * threads; only
/// `FlatTasks` gives up the per-node placement and says so via
/// `drops_nodes()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParallelLayout {
  /// One native directive per triple member (SLURM).
  PerResource {
    nodes: String,
    tasks_per_node: String,
    cpus_per_task: String,
  },
  /// Per-node select line. `{cores_per_node}` = ppn * threads (PBS);
  /// `{ppn}` and `{threads}` are also available for dialects that keep the
  /// triple members separate (PBS Pro's mpiprocs/ompthreads).
  NodeSelect { template: String },
  /// Flat task count plus per-node tile, so the node count stays implied
  /// (LSF: `-n {total}` with `span[ptile={cores_per_node}]`).
  FlatWithTile { tasks: String, tile: String },
  /// Flat task count only. The nodes constraint is dropped (SGE parallel
  /// environments).
  FlatTasks { template: String },
}

impl ParallelLayout {
  /// Capability flag: true when the layout cannot express how tasks are
  /// spread over nodes.
  pub fn drops_nodes(&self) -> bool {
    matches!(self, ParallelLayout::FlatTasks { .. })
  }

  /// Directive bodies for a concrete triple.
  pub fn render(&self, nodes: u64, ppn: u64, threads: u64) -> Vec<String> {
    let total = nodes * ppn * threads;
    let cores_per_node = ppn * threads;
    match self {
      ParallelLayout::PerResource {
        nodes: n,
        tasks_per_node,
        cpus_per_task,
      } => vec![
        n.replace("{value}", &nodes.to_string()),
        tasks_per_node.replace("{value}", &ppn.to_string()),
        cpus_per_task.replace("{value}", &threads.to_string()),
      ],
      ParallelLayout::NodeSelect { template } => vec![
        template
          .replace("{nodes}", &nodes.to_string())
          .replace("{cores_per_node}", &cores_per_node.to_string())
          .replace("{ppn}", &ppn.to_string())
          .replace("{threads}", &threads.to_string()),
      ],
      ParallelLayout::FlatWithTile { tasks, tile } => vec![
        tasks.replace("{total}", &total.to_string()),
        tile.replace("{cores_per_node}", &cores_per_node.to_string()),
      ],
      ParallelLayout::FlatTasks { template } => {
        vec![template.replace("{total}", &total.to_string())]
      }
    }
  }
}

/// Rule for resource keys absent from the directive table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Passthrough {
  /// `-k v` for single letters, `--key=v` otherwise; bare flag for `true`
  /// (SLURM sbatch).
  GnuFlags,
  /// `-l key=value`; `-key` for `true` (PBS/SGE resource lists).
  ResourceList,
  /// `-key value`; bare `-key` for `true` (LSF).
  SingleDash,
  /// Unmapped keys are a translation error.
  None,
}

/// Declarative description of one scheduler dialect. Pure data: adding a
/// scheduler means writing a descriptor (in code or YAML), never touching
/// the translation engine.
#[derive(Debug, Clone)]
pub struct BackendDescriptor {
  pub name: String,
  /// Header line marker, e.g. `#SBATCH`.
  pub prefix: String,
  /// Default job script filename extension.
  pub extension: String,
  pub submit: CommandTemplate,
  pub status_running: CommandTemplate,
  /// Fallback when `status_running` yields nothing, e.g. because the
  /// scheduler forgets finished jobs.
  pub status_finished: CommandTemplate,
  pub cancel: CommandTemplate,
  /// Regex with one capture group extracting the job id from submit output.
  pub job_id_pattern: String,
  /// Resource key -> directive. `None` marks a key that is consumed by the
  /// parallel layout or intentionally produces no header line.
  pub directives: LinkedHashMap<String, Option<DirectiveSpec>>,
  pub parallel: ParallelLayout,
  pub passthrough: Passthrough,
  /// Alias text -> native text, applied to the job body.
  pub env: LinkedHashMap<String, String>,
  /// Documented raw scheduler status -> core status. Total by construction:
  /// anything not listed maps to `Unknown`.
  pub statuses: LinkedHashMap<String, JobStatus>,
}

/// Optional per-backend behavior that cannot be expressed as data. Selected
/// through `builtin()`; descriptors loaded from files run with defaults.
#[derive(Clone, Copy, Default)]
pub struct BackendOverrides {
  pub parse_job_id: Option<fn(&str) -> Option<String>>,
  pub extract_status:
    Option<fn(&str, &LinkedHashMap<String, JobStatus>) -> Option<JobStatus>>,
}

/// A descriptor plus its override table.
#[derive(Clone)]
pub struct Backend {
  pub descriptor: BackendDescriptor,
  pub overrides: BackendOverrides,
}

impl Backend {
  pub fn from_descriptor(descriptor: BackendDescriptor) -> Self {
    Backend {
      descriptor,
      overrides: BackendOverrides::default(),
    }
  }

  pub fn name(&self) -> &str {
    &self.descriptor.name
  }

  /// Extract the scheduler-assigned job id from submit command output.
  pub fn parse_job_id(&self, output: &str) -> Option<String> {
    if let Some(custom) = self.overrides.parse_job_id {
      return custom(output);
    }
    let re = Regex::new(&self.descriptor.job_id_pattern).ok()?;
    re.captures(output)
      .and_then(|c| c.get(1))
      .map(|m| m.as_str().to_string())
  }

  /// Extract a core status from status command output. `None` means the
  /// output carried no recognizable status at all (the caller falls back to
  /// the finished-status command, then to `Unknown`).
  pub fn extract_status(&self, output: &str) -> Option<JobStatus> {
    if let Some(custom) = self.overrides.extract_status {
      return custom(output, &self.descriptor.statuses);
    }
    for line in output.lines() {
      let line = line.trim();
      if line.is_empty() {
        continue;
      }
      if let Some(status) = self.descriptor.statuses.get(line) {
        return Some(*status);
      }
      if let Some(token) = line.split_whitespace().next() {
        if let Some(status) = self.descriptor.statuses.get(token) {
          return Some(*status);
        }
      }
    }
    None
  }

  /// Total mapping from a single raw status string to a core status.
  /// Undocumented strings become `Unknown`, never an error.
  pub fn map_raw_status(&self, raw: &str) -> JobStatus {
    self
      .descriptor
      .statuses
      .get(raw)
      .copied()
      .unwrap_or(JobStatus::Unknown)
  }
}

/// Look up a built-in backend by name.
pub fn builtin(name: &str) -> Result<Backend, BackendError> {
  match name {
    "slurm" => Ok(slurm::backend()),
    "pbs" => Ok(pbs::backend()),
    "pbspro" => Ok(pbspro::backend()),
    "lsf" => Ok(lsf::backend()),
    "sge" => Ok(sge::backend()),
    other => Err(BackendError::UnknownBackend(other.to_string())),
  }
}

pub fn builtin_names() -> &'static [&'static str] {
  &["slurm", "pbs", "pbspro", "lsf", "sge"]
}

/// Structural validation of a descriptor, run before registration.
pub fn check_descriptor(descriptor: &BackendDescriptor) -> Result<(), BackendError> {
  let fail = |reason: String| {
    Err(BackendError::InvalidDescriptor(
      descriptor.name.clone(),
      reason,
    ))
  };
  if descriptor.name.trim().is_empty() {
    return fail("empty name".to_string());
  }
  if descriptor.prefix.trim().is_empty() {
    return fail("empty directive prefix".to_string());
  }
  if !descriptor.submit.contains_token("{script}") {
    return fail("submit command has no {script} token".to_string());
  }
  for (label, cmd) in [
    ("status", &descriptor.status_running),
    ("status_finished", &descriptor.status_finished),
    ("cancel", &descriptor.cancel),
  ] {
    if !cmd.contains_token("{job_id}") {
      return fail(format!("{} command has no {{job_id}} token", label));
    }
  }
  match Regex::new(&descriptor.job_id_pattern) {
    Ok(re) if re.captures_len() >= 2 => {}
    Ok(_) => return fail("job_id_pattern has no capture group".to_string()),
    Err(e) => return fail(format!("job_id_pattern does not compile: {}", e)),
  }
  if descriptor.statuses.is_empty() {
    return fail("empty status table".to_string());
  }
  for alias in CORE_ENV_ALIASES {
    if !descriptor.env.contains_key(&format!("${}", alias)) {
      return fail(format!("missing core env alias ${}", alias));
    }
  }
  if descriptor.passthrough == Passthrough::None {
    for key in COMMON_RESOURCE_KEYS {
      if !descriptor.directives.contains_key(key) {
        return fail(format!(
          "resource key '{}' has neither a directive nor a pass-through rule",
          key
        ));
      }
    }
  }
  Ok(())
}

/// Build the env alias table from `(alias, native)` pairs, generating both
/// the `$NAME` and `${NAME}` spellings. A native value that is not a plain
/// identifier (e.g. a backtick expression) is inserted verbatim.
pub(crate) fn env_table(entries: &[(&str, &str)]) -> LinkedHashMap<String, String> {
  let mut map = LinkedHashMap::new();
  for (alias, native) in entries {
    let is_var = !native.is_empty()
      && native
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if is_var {
      map.insert(format!("${{{}}}", alias), format!("${{{}}}", native));
      map.insert(format!("${}", alias), format!("${}", native));
    } else {
      map.insert(format!("${{{}}}", alias), native.to_string());
      map.insert(format!("${}", alias), native.to_string());
    }
  }
  map
}

/// Build the status table from `(raw, core)` pairs.
pub(crate) fn status_table(
  entries: &[(&str, JobStatus)],
) -> LinkedHashMap<String, JobStatus> {
  entries
    .iter()
    .map(|(raw, status)| (raw.to_string(), *status))
    .collect()
}
