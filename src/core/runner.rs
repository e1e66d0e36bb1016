//! Command execution, locally or over SSH.
//!
//! All scheduler interaction goes through the [`CommandRunner`] trait so the
//! submission and tracking code never cares where the cluster head node
//! actually is. Both implementations wrap commands in coreutils `timeout`,
//! whose exit code 124 is surfaced as [`RunnerError::Timeout`].

use std::fs;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::Arc;

use log::debug;
use thiserror::Error;

use crate::core::utils::{make_script_executable, temp_script_path};

#[derive(Error, Debug)]
pub enum RunnerError {
  #[error("Failed to spawn command '{0}': {1}")]
  Spawn(String, std::io::Error),
  #[error("Command timed out after {0} seconds")]
  Timeout(u64),
  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),
  #[error("Failed to stage file to '{0}': {1}")]
  Staging(String, String),
}

/// A command ready to run. `use_shell` commands carry a single shell line in
/// `argv[0]`.
#[derive(Debug, Clone)]
pub struct CommandLine {
  pub argv: Vec<String>,
  pub use_shell: bool,
}

impl CommandLine {
  pub fn display(&self) -> String {
    self.argv.join(" ")
  }
}

/// Captured result of a finished command. A nonzero exit code is data, not
/// an error: schedulers routinely exit nonzero for vanished jobs.
#[derive(Debug, Clone)]
pub struct CommandOutput {
  pub exit_code: i32,
  pub stdout: String,
  pub stderr: String,
}

impl CommandOutput {
  pub fn success(&self) -> bool {
    self.exit_code == 0
  }

  /// Stdout followed by stderr, for parsers that accept either stream.
  pub fn combined(&self) -> String {
    if self.stderr.is_empty() {
      self.stdout.clone()
    } else if self.stdout.is_empty() {
      self.stderr.clone()
    } else {
      format!("{}\n{}", self.stdout, self.stderr)
    }
  }
}

/// Where and how commands run. One implementation per execution locus.
pub trait CommandRunner: Send + Sync {
  /// Run `cmd` in `workdir` (when given), killing it after `timeout_secs`.
  fn run(
    &self,
    cmd: &CommandLine,
    workdir: Option<&str>,
    timeout_secs: u64,
  ) -> Result<CommandOutput, RunnerError>;

  /// Write `content` to `dest` on the runner's host, creating parent
  /// directories and marking the file executable.
  fn stage_file(&self, content: &str, dest: &str) -> Result<(), RunnerError>;

  /// The remote host, or `None` for local execution.
  fn host(&self) -> Option<&str> {
    None
  }
}

fn capture(mut command: Command, display: &str, timeout_secs: u64) -> Result<CommandOutput, RunnerError> {
  debug!("Running: {}", display);
  let output = command
    .stdin(Stdio::null())
    .output()
    .map_err(|e| RunnerError::Spawn(display.to_string(), e))?;
  let exit_code = output.status.code().unwrap_or(-1);
  if exit_code == 124 {
    return Err(RunnerError::Timeout(timeout_secs));
  }
  Ok(CommandOutput {
    exit_code,
    stdout: String::from_utf8_lossy(&output.stdout).trim_end().to_string(),
    stderr: String::from_utf8_lossy(&output.stderr).trim_end().to_string(),
  })
}

/// Single-quote a string for `sh`, closing and reopening around embedded
/// quotes.
pub fn shell_quote(s: &str) -> String {
  format!("'{}'", s.replace('\'', r"'\''"))
}

/// Runs commands on the machine clusterjob itself runs on.
pub struct LocalRunner;

impl CommandRunner for LocalRunner {
  fn run(
    &self,
    cmd: &CommandLine,
    workdir: Option<&str>,
    timeout_secs: u64,
  ) -> Result<CommandOutput, RunnerError> {
    let mut command = Command::new("timeout");
    command.arg(timeout_secs.to_string());
    if cmd.use_shell {
      command.arg("sh").arg("-c").arg(&cmd.argv[0]);
    } else {
      command.args(&cmd.argv);
    }
    if let Some(dir) = workdir {
      command.current_dir(dir);
    }
    capture(command, &cmd.display(), timeout_secs)
  }

  fn stage_file(&self, content: &str, dest: &str) -> Result<(), RunnerError> {
    let path = Path::new(dest);
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent)?;
    }
    fs::write(path, content)?;
    make_script_executable(path)?;
    Ok(())
  }
}

/// Upper bound on each remote staging step (mkdir, scp). Job scripts are a
/// few kilobytes, so a transfer this slow is a dead link.
const STAGE_TIMEOUT_SECS: u64 = 60;

/// Runs commands on a remote head node through `ssh`, one session per call.
/// `BatchMode=yes` keeps a missing key from degenerating into a password
/// prompt that would hang unattended runs.
pub struct SshRunner {
  host: String,
  connect_timeout_secs: u64,
}

impl SshRunner {
  pub fn new(host: &str) -> Self {
    SshRunner {
      host: host.to_string(),
      connect_timeout_secs: 10,
    }
  }

  fn ssh_base(&self) -> Command {
    let mut command = Command::new("ssh");
    command
      .arg("-o")
      .arg("BatchMode=yes")
      .arg("-o")
      .arg(format!("ConnectTimeout={}", self.connect_timeout_secs))
      .arg(&self.host);
    command
  }

  /// Bounded like every other external call: ConnectTimeout for the session
  /// setup, coreutils timeout for a transfer that stalls after connecting.
  fn scp_command(&self, local: &Path, dest: &str) -> Command {
    let mut command = Command::new("timeout");
    command
      .arg(STAGE_TIMEOUT_SECS.to_string())
      .arg("scp")
      .arg("-o")
      .arg("BatchMode=yes")
      .arg("-o")
      .arg(format!("ConnectTimeout={}", self.connect_timeout_secs))
      .arg(local)
      .arg(format!("{}:{}", self.host, dest));
    command
  }
}

impl CommandRunner for SshRunner {
  fn run(
    &self,
    cmd: &CommandLine,
    workdir: Option<&str>,
    timeout_secs: u64,
  ) -> Result<CommandOutput, RunnerError> {
    let line = if cmd.use_shell {
      cmd.argv[0].clone()
    } else {
      cmd
        .argv
        .iter()
        .map(|a| shell_quote(a))
        .collect::<Vec<_>>()
        .join(" ")
    };
    let line = match workdir {
      Some(dir) => format!("cd {} && {}", shell_quote(dir), line),
      None => line,
    };
    // The remote `timeout` covers the command itself; ConnectTimeout covers
    // the session setup.
    let remote = format!("timeout {} sh -c {}", timeout_secs, shell_quote(&line));
    let mut command = self.ssh_base();
    command.arg(&remote);
    capture(command, &format!("ssh {} {}", self.host, cmd.display()), timeout_secs)
  }

  fn stage_file(&self, content: &str, dest: &str) -> Result<(), RunnerError> {
    let local = temp_script_path("stage");
    let mut file = fs::File::create(&local)?;
    file.write_all(content.as_bytes())?;
    drop(file);
    make_script_executable(&local)?;

    let result = (|| {
      if let Some(parent) = Path::new(dest).parent() {
        let mkdir = CommandLine {
          argv: vec![
            "mkdir".to_string(),
            "-p".to_string(),
            parent.to_string_lossy().to_string(),
          ],
          use_shell: false,
        };
        let out = self.run(&mkdir, None, STAGE_TIMEOUT_SECS)?;
        if !out.success() {
          return Err(RunnerError::Staging(dest.to_string(), out.stderr));
        }
      }
      let out = capture(
        self.scp_command(&local, dest),
        &format!("scp {} {}:{}", local.display(), self.host, dest),
        STAGE_TIMEOUT_SECS,
      )?;
      if !out.success() {
        return Err(RunnerError::Staging(dest.to_string(), out.stderr));
      }
      Ok(())
    })();
    let _ = fs::remove_file(&local);
    result
  }

  fn host(&self) -> Option<&str> {
    Some(&self.host)
  }
}

/// Pick the runner for an optional remote host.
pub fn runner_for(remote: Option<&str>) -> Arc<dyn CommandRunner> {
  match remote {
    Some(host) => Arc::new(SshRunner::new(host)),
    None => Arc::new(LocalRunner),
  }
}

/// Run a prologue/epilogue body on the local machine through a temp script.
pub fn run_local_script(
  body: &str,
  tag: &str,
  timeout_secs: u64,
) -> Result<CommandOutput, RunnerError> {
  let path = temp_script_path(tag);
  fs::write(&path, body)?;
  make_script_executable(&path)?;
  let cmd = CommandLine {
    argv: vec![path.to_string_lossy().to_string()],
    use_shell: false,
  };
  let result = LocalRunner.run(&cmd, None, timeout_secs);
  let _ = fs::remove_file(&path);
  result
}

/// Scriptable runner for tests. Responses are consumed in FIFO order; when
/// the queue is empty the default response is replayed.
#[cfg(test)]
pub mod mock {
  use std::collections::VecDeque;
  use std::sync::Mutex;

  use super::*;

  pub struct MockRunner {
    responses: Mutex<VecDeque<CommandOutput>>,
    default: Mutex<CommandOutput>,
    pub calls: Mutex<Vec<String>>,
    pub staged: Mutex<Vec<(String, String)>>,
  }

  impl MockRunner {
    pub fn new() -> Self {
      MockRunner {
        responses: Mutex::new(VecDeque::new()),
        default: Mutex::new(CommandOutput {
          exit_code: 0,
          stdout: String::new(),
          stderr: String::new(),
        }),
        calls: Mutex::new(Vec::new()),
        staged: Mutex::new(Vec::new()),
      }
    }

    pub fn ok(stdout: &str) -> CommandOutput {
      CommandOutput {
        exit_code: 0,
        stdout: stdout.to_string(),
        stderr: String::new(),
      }
    }

    pub fn fail(exit_code: i32, stderr: &str) -> CommandOutput {
      CommandOutput {
        exit_code,
        stdout: String::new(),
        stderr: stderr.to_string(),
      }
    }

    pub fn push(&self, output: CommandOutput) {
      self.responses.lock().unwrap().push_back(output);
    }

    pub fn set_default(&self, output: CommandOutput) {
      *self.default.lock().unwrap() = output;
    }

    pub fn call_count(&self) -> usize {
      self.calls.lock().unwrap().len()
    }

    pub fn calls_matching(&self, needle: &str) -> usize {
      self
        .calls
        .lock()
        .unwrap()
        .iter()
        .filter(|c| c.contains(needle))
        .count()
    }
  }

  impl CommandRunner for MockRunner {
    fn run(
      &self,
      cmd: &CommandLine,
      _workdir: Option<&str>,
      _timeout_secs: u64,
    ) -> Result<CommandOutput, RunnerError> {
      self.calls.lock().unwrap().push(cmd.display());
      match self.responses.lock().unwrap().pop_front() {
        Some(output) => Ok(output),
        None => Ok(self.default.lock().unwrap().clone()),
      }
    }

    fn stage_file(&self, content: &str, dest: &str) -> Result<(), RunnerError> {
      self
        .staged
        .lock()
        .unwrap()
        .push((dest.to_string(), content.to_string()));
      Ok(())
    }
  }
}
