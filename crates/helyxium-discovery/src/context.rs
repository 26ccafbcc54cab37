//! Host environment handed to every probe, plus the shared subprocess runner

use helyxium_core::ProbeError;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::trace;

/// Operating systems with a probe chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Os {
    Linux,
    Windows,
    Macos,
}

impl Os {
    /// The OS this binary was compiled for, if it has a probe chain
    pub fn host() -> Option<Os> {
        Os::from_name(std::env::consts::OS)
    }

    pub fn from_name(name: &str) -> Option<Os> {
        match name {
            "linux" => Some(Os::Linux),
            "windows" => Some(Os::Windows),
            "macos" => Some(Os::Macos),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Os::Linux => "linux",
            Os::Windows => "windows",
            Os::Macos => "macos",
        }
    }
}

impl std::fmt::Display for Os {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a probe may read about its environment.
///
/// Filesystem roots are explicit so tests can point them at temporary
/// directories instead of the real machine.
#[derive(Debug, Clone)]
pub struct ProbeContext {
    pub os: Os,
    /// Budget for a single probe run, including any subprocesses
    pub timeout: Duration,
    pub home: Option<PathBuf>,
    /// `Program Files` and `Program Files (x86)` on Windows
    pub program_files: Vec<PathBuf>,
    pub local_app_data: Option<PathBuf>,
    /// Root of the USB device tree, normally `/sys/bus/usb/devices`
    pub sysfs_root: PathBuf,
}

impl ProbeContext {
    /// Context for the running host, filled from environment variables
    pub fn from_env(os: Os, timeout: Duration) -> Self {
        let var = |name: &str| std::env::var_os(name).map(PathBuf::from);

        let home = match os {
            Os::Windows => var("USERPROFILE").or_else(|| var("HOME")),
            Os::Linux | Os::Macos => var("HOME"),
        };

        let mut program_files = Vec::new();
        if os == Os::Windows {
            for name in ["ProgramFiles", "ProgramFiles(x86)"] {
                if let Some(path) = var(name) {
                    if !program_files.contains(&path) {
                        program_files.push(path);
                    }
                }
            }
            if program_files.is_empty() {
                program_files.push(PathBuf::from(r"C:\Program Files"));
                program_files.push(PathBuf::from(r"C:\Program Files (x86)"));
            }
        }

        Self {
            os,
            timeout,
            home,
            program_files,
            local_app_data: var("LOCALAPPDATA"),
            sysfs_root: PathBuf::from("/sys/bus/usb/devices"),
        }
    }

    /// Context with no filesystem roots, for tests
    pub fn bare(os: Os, timeout: Duration) -> Self {
        Self {
            os,
            timeout,
            home: None,
            program_files: Vec::new(),
            local_app_data: None,
            sysfs_root: PathBuf::from("/nonexistent"),
        }
    }
}

/// Captured output of a finished subprocess
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    /// Exit code; `None` when the process was killed by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Run a command to completion, killing it if it outlives `timeout`.
///
/// Only spawn problems and timeouts are errors; a non-zero exit is returned
/// to the caller, which knows whether it means "nothing found".
pub async fn capture_command(
    program: &str,
    args: &[&str],
    timeout: Duration,
) -> Result<CommandOutput, ProbeError> {
    trace!(program, ?args, "Running command");

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| match e.kind() {
            ErrorKind::NotFound => ProbeError::Unavailable(format!("{program} not found")),
            ErrorKind::PermissionDenied => ProbeError::PermissionDenied(program.to_string()),
            _ => ProbeError::Unavailable(format!("{program}: {e}")),
        })?;

    // Dropping the future on timeout drops the child, which kills it
    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| ProbeError::Timeout(timeout))?
        .map_err(|e| ProbeError::Unavailable(format!("{program}: {e}")))?;

    Ok(CommandOutput {
        success: output.status.success(),
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Run a command and return its stdout, treating a non-zero exit as failure
pub async fn run_command(program: &str, args: &[&str], timeout: Duration) -> Result<String, ProbeError> {
    let output = capture_command(program, args, timeout).await?;
    if output.success {
        Ok(output.stdout)
    } else {
        Err(classify_failure(program, &output.stderr))
    }
}

/// Whether an executable with this name is on `PATH`
pub fn on_path(program: &str) -> bool {
    which::which(program).is_ok()
}

/// Map a failed command's stderr to a probe error
pub fn classify_failure(program: &str, stderr: &str) -> ProbeError {
    let lower = stderr.to_lowercase();
    if lower.contains("access is denied")
        || lower.contains("permission denied")
        || lower.contains("operation not permitted")
    {
        ProbeError::PermissionDenied(program.to_string())
    } else {
        let detail = stderr.lines().next().unwrap_or("").trim();
        ProbeError::Unavailable(format!("{program} failed: {detail}"))
    }
}
