//! Pure translation of a job description into a scheduler submission script.
//!
//! Rendering performs no I/O and touches no global state: the same job and
//! backend always produce byte-identical script text, which is what makes
//! the cached submission path trustworthy.

#[cfg(test)]
mod tests;

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use crate::core::backends::{Backend, Passthrough, ValueConvert};
use crate::core::jobs::JobDescription;
use crate::core::utils::parse_time_to_seconds;

#[derive(Error, Debug)]
pub enum RenderError {
  #[error("Backend '{backend}' has no mapping for resource key '{key}'")]
  UnknownResourceKey { backend: String, key: String },
  #[error("Job body references undefined placeholder '{{{0}}}'")]
  PlaceholderMissing(String),
  #[error("Bad value for resource '{key}': {reason}")]
  BadResourceValue { key: String, reason: String },
}

/// A rendered submission script plus the bookkeeping the caller logs.
#[derive(Debug, Clone)]
pub struct RenderedScript {
  pub text: String,
  /// Resource keys that produced a header line (directive, layout or
  /// pass-through).
  pub consumed: Vec<String>,
  /// Resource keys silently dropped by the backend's layout, e.g. `nodes`
  /// under a scheduler that cannot place tasks.
  pub ignored: Vec<String>,
}

static PLACEHOLDER_RE: Lazy<Regex> =
  Lazy::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap());

// Doubled braces escape literal ones. Masked with sentinels that cannot
// appear in script text before placeholder substitution runs.
const OPEN_MASK: &str = "\u{1}";
const CLOSE_MASK: &str = "\u{2}";
// Shell `${VAR}` syntax must never be mistaken for a placeholder.
const DOLLAR_MASK: &str = "\u{3}";

/// Render `job` for `backend`. Pure: no filesystem, no clock, no randomness.
pub fn render(job: &JobDescription, backend: &Backend) -> Result<RenderedScript, RenderError> {
  let descriptor = &backend.descriptor;
  let mut resources = job.resources.clone();
  resources
    .entry("jobname".to_string())
    .or_insert_with(|| Value::String(job.jobname.clone()));

  let mut consumed = Vec::new();
  let mut ignored = Vec::new();
  let mut header_lines: Vec<String> = Vec::new();

  let triple = take_parallel_triple(&mut resources)?;

  // Directive-table keys first, in descriptor order.
  for (key, spec) in &descriptor.directives {
    let Some(value) = resources.remove(key) else {
      continue;
    };
    consumed.push(key.clone());
    let Some(spec) = spec else {
      continue;
    };
    let text = convert_value(key, &value, spec.convert)?;
    header_lines.push(spec.template.replace("{value}", &text));
  }

  if let Some((nodes, ppn, threads)) = triple {
    if descriptor.parallel.drops_nodes() && nodes > 1 {
      ignored.push("nodes".to_string());
    }
    header_lines.extend(descriptor.parallel.render(nodes, ppn, threads));
    consumed.push("parallel".to_string());
  }

  // Whatever is left goes through the pass-through rule. BTreeMap iteration
  // keeps the output deterministic.
  for (key, value) in &resources {
    match passthrough_option(descriptor.passthrough, key, value) {
      Some(opt) => {
        consumed.push(key.clone());
        if let Some(line) = opt {
          header_lines.push(line);
        }
      }
      None => {
        return Err(RenderError::UnknownResourceKey {
          backend: descriptor.name.clone(),
          key: key.clone(),
        });
      }
    }
  }

  let values = placeholder_values(job, backend);
  let body = render_body(&job.body, backend, &values)?;

  let mut text = format!("#!{}\n", job.shell);
  for line in &header_lines {
    text.push_str(&format!("{} {}\n", descriptor.prefix, line));
  }
  text.push_str(&body);
  if !text.ends_with('\n') {
    text.push('\n');
  }

  Ok(RenderedScript {
    text,
    consumed,
    ignored,
  })
}

/// Render a prologue/epilogue body: env aliases stay untouched (hooks run
/// outside the scheduler), placeholders are filled the same way as the job
/// body.
pub fn render_hook(
  body: &str,
  job: &JobDescription,
  backend: &Backend,
) -> Result<String, RenderError> {
  let values = placeholder_values(job, backend);
  let masked = body.replace("{{", OPEN_MASK).replace("}}", CLOSE_MASK);
  let filled = substitute_placeholders(&masked, &values)?;
  Ok(filled.replace(OPEN_MASK, "{").replace(CLOSE_MASK, "}"))
}

/// Pull the (nodes, ppn, threads) triple out of the resource map. Absent
/// members default to 1; `None` when no member was given at all.
fn take_parallel_triple(
  resources: &mut BTreeMap<String, Value>,
) -> Result<Option<(u64, u64, u64)>, RenderError> {
  let mut any = false;
  let mut member = |key: &str| -> Result<u64, RenderError> {
    match resources.remove(key) {
      None => Ok(1),
      Some(value) => {
        any = true;
        match value.as_u64() {
          Some(n) if n >= 1 => Ok(n),
          _ => Err(RenderError::BadResourceValue {
            key: key.to_string(),
            reason: format!("expected a positive integer, got {}", value),
          }),
        }
      }
    }
  };
  let nodes = member("nodes")?;
  let ppn = member("ppn")?;
  let threads = member("threads")?;
  Ok(if any { Some((nodes, ppn, threads)) } else { None })
}

fn render_body(
  body: &str,
  backend: &Backend,
  values: &BTreeMap<String, String>,
) -> Result<String, RenderError> {
  // A shebang in the body would shadow the one the renderer emits.
  let stripped: String = body
    .lines()
    .filter(|l| !l.trim_start().starts_with("#!"))
    .map(|l| format!("{}\n", l))
    .collect();
  let masked = stripped.replace("{{", OPEN_MASK).replace("}}", CLOSE_MASK);
  let aliased = substitute_env_aliases(&masked, backend);
  let filled = substitute_placeholders(&aliased, values)?;
  Ok(filled.replace(OPEN_MASK, "{").replace(CLOSE_MASK, "}"))
}

/// Replace env aliases with the backend's native spellings. Longest alias
/// first, so `${CJ_JOB_ID}` never matches inside `${CJ_JOB_ID}x` partials
/// and `$CJ_JOB_ID` does not clobber `$CJ_JOB_NAME`.
fn substitute_env_aliases(text: &str, backend: &Backend) -> String {
  let mut pairs: Vec<(&String, &String)> = backend.descriptor.env.iter().collect();
  pairs.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
  let mut out = text.to_string();
  for (alias, native) in pairs {
    out = out.replace(alias.as_str(), native.as_str());
  }
  out
}

fn substitute_placeholders(
  text: &str,
  values: &BTreeMap<String, String>,
) -> Result<String, RenderError> {
  let text = text.replace("${", DOLLAR_MASK);
  let text = text.as_str();
  let mut out = String::with_capacity(text.len());
  let mut last = 0;
  for caps in PLACEHOLDER_RE.captures_iter(text) {
    let whole = caps.get(0).unwrap();
    let name = &caps[1];
    let Some(value) = values.get(name) else {
      return Err(RenderError::PlaceholderMissing(name.to_string()));
    };
    out.push_str(&text[last..whole.start()]);
    out.push_str(value);
    last = whole.end();
  }
  out.push_str(&text[last..]);
  Ok(out.replace(DOLLAR_MASK, "${"))
}

/// The placeholder namespace: job attributes, then resource values, then the
/// job's explicit placeholder map, later entries winning.
fn placeholder_values(job: &JobDescription, backend: &Backend) -> BTreeMap<String, String> {
  let mut values = BTreeMap::new();
  values.insert("jobname".to_string(), job.jobname.clone());
  values.insert("backend".to_string(), backend.name().to_string());
  values.insert("shell".to_string(), job.shell.clone());
  values.insert("rootdir".to_string(), job.rootdir.clone().unwrap_or_default());
  values.insert("workdir".to_string(), job.workdir.clone().unwrap_or_default());
  values.insert("fulldir".to_string(), job.fulldir());
  values.insert("remote".to_string(), job.remote.clone().unwrap_or_default());
  for (key, value) in &job.resources {
    values.insert(key.clone(), json_to_text(value));
  }
  for (key, value) in &job.placeholders {
    values.insert(key.clone(), value.clone());
  }
  values
}

/// Render one pass-through header. `Ok` layer: whether the style accepts
/// the key at all; inner option: a `false` bool flag renders nothing.
fn passthrough_option(
  style: Passthrough,
  key: &str,
  value: &Value,
) -> Option<Option<String>> {
  let flag = |on: String| -> Option<Option<String>> {
    match value {
      Value::Bool(true) => Some(Some(on)),
      Value::Bool(false) => Some(None),
      _ => None,
    }
  };
  match style {
    Passthrough::GnuFlags => {
      if let Value::Bool(_) = value {
        return flag(if key.len() == 1 {
          format!("-{}", key)
        } else {
          format!("--{}", key)
        });
      }
      Some(Some(if key.len() == 1 {
        format!("-{} {}", key, json_to_text(value))
      } else {
        format!("--{}={}", key, json_to_text(value))
      }))
    }
    Passthrough::ResourceList => {
      if let Value::Bool(_) = value {
        return flag(format!("-{}", key));
      }
      Some(Some(format!("-l {}={}", key, json_to_text(value))))
    }
    Passthrough::SingleDash => {
      if let Value::Bool(_) = value {
        return flag(format!("-{}", key));
      }
      Some(Some(format!("-{} {}", key, json_to_text(value))))
    }
    Passthrough::None => None,
  }
}

fn convert_value(key: &str, value: &Value, convert: ValueConvert) -> Result<String, RenderError> {
  let text = json_to_text(value);
  match convert {
    ValueConvert::Verbatim => Ok(text),
    ValueConvert::TimeToMinutes => {
      let seconds =
        parse_time_to_seconds(&text).map_err(|_| RenderError::BadResourceValue {
          key: key.to_string(),
          reason: format!("'{}' is not a walltime", text),
        })?;
      // Rounded up: a sub-minute walltime must not collapse to 0 minutes,
      // and the granted limit never undercuts the requested one.
      Ok(seconds.div_ceil(60).to_string())
    }
    ValueConvert::MemAppendMega => Ok(format!("{}m", text)),
  }
}

fn json_to_text(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    other => other.to_string(),
  }
}
