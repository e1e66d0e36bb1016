//! YAML backend descriptor files.
//!
//! A site can teach clusterjob a new scheduler without writing Rust: a
//! descriptor file carries the directive table, command templates, env
//! aliases and status map, and is registered at runtime. File-loaded
//! backends run with the default id/status parsing (no overrides).

mod utils;

#[cfg(test)]
mod tests;

use std::path::Path;
use std::str::FromStr;

use hashlink::LinkedHashMap;
use log::debug;
use saphyr::{ScalarOwned, YamlOwned};
use thiserror::Error;

use crate::core::backends::{
  BackendDescriptor, CommandTemplate, DirectiveSpec, ParallelLayout, Passthrough,
  ValueConvert,
};
use crate::core::parsers::utils::{load_yaml_from_file, lookup_str, yaml_lookup};
use crate::core::status::JobStatus;

#[derive(Error, Debug)]
pub enum ParserError {
  #[error("IO Error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("YAML parsing failed: {0}")]
  YamlParseFailed(#[from] saphyr::ScanError),
  #[error("YAML file is empty!")]
  YamlEmpty,
  #[error("Missing Key: {0}")]
  MissingKey(String),
  #[error("Wrong type for value \"{0}\", expected type {1}")]
  WrongType(String, String),
  #[error("Unknown value \"{1}\" for field {0}")]
  UnknownValue(String, String),
}

/// Parse one backend descriptor from a YAML file.
pub fn parse_backend_from_file(path: &Path) -> Result<BackendDescriptor, ParserError> {
  debug!("Loading backend descriptor from {:?}", path);
  let yaml = load_yaml_from_file(path)?;
  parse_backend(&yaml)
}

fn parse_backend(yaml: &YamlOwned) -> Result<BackendDescriptor, ParserError> {
  let status_running = parse_command(yaml, "status")?;
  let status_finished = match yaml_lookup(yaml, "status_finished") {
    Some(_) => parse_command(yaml, "status_finished")?,
    None => status_running.clone(),
  };
  Ok(BackendDescriptor {
    name: lookup_str(yaml, "name")?,
    prefix: lookup_str(yaml, "prefix")?,
    extension: lookup_str(yaml, "extension")?,
    submit: parse_command(yaml, "submit")?,
    status_running,
    status_finished,
    cancel: parse_command(yaml, "cancel")?,
    job_id_pattern: lookup_str(yaml, "job_id_pattern")?,
    directives: parse_directives(yaml)?,
    parallel: parse_parallel(yaml)?,
    passthrough: parse_passthrough(yaml)?,
    env: parse_string_table(yaml, "env")?,
    statuses: parse_statuses(yaml)?,
  })
}

/// A command is either a sequence (argv) or a plain string (shell line).
fn parse_command(yaml: &YamlOwned, key: &str) -> Result<CommandTemplate, ParserError> {
  match yaml_lookup(yaml, key) {
    Some(YamlOwned::Sequence(seq)) => {
      let mut argv = Vec::with_capacity(seq.len());
      for item in seq.iter() {
        match item.as_str() {
          Some(s) => argv.push(s.to_string()),
          None => {
            return Err(ParserError::WrongType(
              format!("{:?}", item),
              "string".to_string(),
            ));
          }
        }
      }
      Ok(CommandTemplate { argv, use_shell: false })
    }
    Some(node) => match node.as_str() {
      Some(line) => Ok(CommandTemplate {
        argv: vec![line.to_string()],
        use_shell: true,
      }),
      None => Err(ParserError::WrongType(
        format!("{:?}", node),
        "string or sequence".to_string(),
      )),
    },
    None => Err(ParserError::MissingKey(key.to_string())),
  }
}

/// `directives` maps resource keys to a template string, to a mapping with
/// `template`/`convert`, or to null for keys consumed without output.
fn parse_directives(
  yaml: &YamlOwned,
) -> Result<LinkedHashMap<String, Option<DirectiveSpec>>, ParserError> {
  let node = yaml_lookup(yaml, "directives")
    .ok_or_else(|| ParserError::MissingKey("directives".to_string()))?;
  let YamlOwned::Mapping(map) = node else {
    return Err(ParserError::WrongType(
      format!("{:?}", node),
      "mapping".to_string(),
    ));
  };
  let mut directives = LinkedHashMap::new();
  for (key_node, value_node) in map.iter() {
    let key = key_node
      .as_str()
      .ok_or_else(|| {
        ParserError::WrongType(format!("{:?}", key_node), "string".to_string())
      })?
      .to_string();
    let spec = match value_node {
      YamlOwned::Value(ScalarOwned::Null) => None,
      YamlOwned::Mapping(_) => {
        let template = lookup_str(value_node, "template")?;
        let convert = match yaml_lookup(value_node, "convert") {
          Some(node) => parse_convert(node)?,
          None => ValueConvert::Verbatim,
        };
        Some(DirectiveSpec { template, convert })
      }
      other => match other.as_str() {
        Some(template) => Some(DirectiveSpec::new(template)),
        None => {
          return Err(ParserError::WrongType(
            format!("{:?}", other),
            "string, mapping or null".to_string(),
          ));
        }
      },
    };
    directives.insert(key, spec);
  }
  Ok(directives)
}

fn parse_convert(node: &YamlOwned) -> Result<ValueConvert, ParserError> {
  let text = node.as_str().ok_or_else(|| {
    ParserError::WrongType(format!("{:?}", node), "string".to_string())
  })?;
  match text {
    "verbatim" => Ok(ValueConvert::Verbatim),
    "time_to_minutes" => Ok(ValueConvert::TimeToMinutes),
    "mem_append_mega" => Ok(ValueConvert::MemAppendMega),
    other => Err(ParserError::UnknownValue(
      "convert".to_string(),
      other.to_string(),
    )),
  }
}

fn parse_parallel(yaml: &YamlOwned) -> Result<ParallelLayout, ParserError> {
  let node = yaml_lookup(yaml, "parallel")
    .ok_or_else(|| ParserError::MissingKey("parallel".to_string()))?;
  let kind = lookup_str(node, "kind")?;
  match kind.as_str() {
    "per_resource" => Ok(ParallelLayout::PerResource {
      nodes: lookup_str(node, "nodes")?,
      tasks_per_node: lookup_str(node, "tasks_per_node")?,
      cpus_per_task: lookup_str(node, "cpus_per_task")?,
    }),
    "node_select" => Ok(ParallelLayout::NodeSelect {
      template: lookup_str(node, "template")?,
    }),
    "flat_with_tile" => Ok(ParallelLayout::FlatWithTile {
      tasks: lookup_str(node, "tasks")?,
      tile: lookup_str(node, "tile")?,
    }),
    "flat_tasks" => Ok(ParallelLayout::FlatTasks {
      template: lookup_str(node, "template")?,
    }),
    other => Err(ParserError::UnknownValue(
      "parallel.kind".to_string(),
      other.to_string(),
    )),
  }
}

fn parse_passthrough(yaml: &YamlOwned) -> Result<Passthrough, ParserError> {
  let text = lookup_str(yaml, "passthrough")?;
  match text.as_str() {
    "gnu_flags" => Ok(Passthrough::GnuFlags),
    "resource_list" => Ok(Passthrough::ResourceList),
    "single_dash" => Ok(Passthrough::SingleDash),
    "none" => Ok(Passthrough::None),
    other => Err(ParserError::UnknownValue(
      "passthrough".to_string(),
      other.to_string(),
    )),
  }
}

/// `env` maps alias names (without `$`) to native spellings; both spellings
/// of the alias are generated, matching the built-in tables.
fn parse_string_table(
  yaml: &YamlOwned,
  key: &str,
) -> Result<LinkedHashMap<String, String>, ParserError> {
  let node = yaml_lookup(yaml, key)
    .ok_or_else(|| ParserError::MissingKey(key.to_string()))?;
  let YamlOwned::Mapping(map) = node else {
    return Err(ParserError::WrongType(
      format!("{:?}", node),
      "mapping".to_string(),
    ));
  };
  let mut table = LinkedHashMap::new();
  for (key_node, value_node) in map.iter() {
    let alias = string_of(key_node)?;
    let native = string_of(value_node)?;
    let is_var = !native.is_empty()
      && native
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if is_var {
      table.insert(format!("${{{}}}", alias), format!("${{{}}}", native));
      table.insert(format!("${}", alias), format!("${}", native));
    } else {
      table.insert(format!("${{{}}}", alias), native.clone());
      table.insert(format!("${}", alias), native);
    }
  }
  Ok(table)
}

fn parse_statuses(
  yaml: &YamlOwned,
) -> Result<LinkedHashMap<String, JobStatus>, ParserError> {
  let node = yaml_lookup(yaml, "statuses")
    .ok_or_else(|| ParserError::MissingKey("statuses".to_string()))?;
  let YamlOwned::Mapping(map) = node else {
    return Err(ParserError::WrongType(
      format!("{:?}", node),
      "mapping".to_string(),
    ));
  };
  let mut statuses = LinkedHashMap::new();
  for (key_node, value_node) in map.iter() {
    let raw = string_of(key_node)?;
    let core = string_of(value_node)?;
    let status = JobStatus::from_str(&core).map_err(|_| {
      ParserError::UnknownValue("statuses".to_string(), core.clone())
    })?;
    statuses.insert(raw, status);
  }
  Ok(statuses)
}

fn string_of(node: &YamlOwned) -> Result<String, ParserError> {
  node
    .as_str()
    .map(str::to_string)
    .ok_or_else(|| ParserError::WrongType(format!("{:?}", node), "string".to_string()))
}

