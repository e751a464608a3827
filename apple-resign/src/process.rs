// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Execution of external processes.
//!
//! Every tool invocation performed while re-signing goes through a
//! [ProcessRunner]. The default implementation, [DuctProcessRunner], spawns
//! processes with `duct` and enforces a per-invocation timeout. Alternate
//! implementations can record or simulate invocations.

use {
    crate::error::ResignError,
    log::{debug, error},
    std::{
        ffi::OsString,
        path::{Path, PathBuf},
        time::{Duration, Instant},
    },
};

/// How often a running child process is polled for completion.
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Describes an external program invocation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ToolInvocation {
    program: PathBuf,
    args: Vec<OsString>,
}

impl ToolInvocation {
    /// Construct a new invocation of a program.
    pub fn new(program: impl AsRef<Path>) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
            args: vec![],
        }
    }

    /// Append an argument.
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// The program being executed.
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Arguments passed to the program.
    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    /// File name of the program, for messages.
    pub fn tool_name(&self) -> String {
        self.program
            .file_name()
            .unwrap_or_else(|| self.program.as_os_str())
            .to_string_lossy()
            .to_string()
    }

    /// Arguments rendered as strings, for messages.
    pub fn args_lossy(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|x| x.to_string_lossy().to_string())
            .collect()
    }
}

/// Result of a completed external program.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ToolOutput {
    /// Exit code. `None` if the process was terminated by a signal.
    pub status: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ToolOutput {
    /// Whether the process exited with status 0.
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Standard output decoded as UTF-8 (lossy).
    pub fn stdout_string(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    /// Standard error decoded as UTF-8 (lossy).
    pub fn stderr_string(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }
}

/// Runs external programs.
pub trait ProcessRunner {
    /// Run a program to completion and capture its output.
    ///
    /// A non-zero exit status is not an error at this layer. Implementations
    /// only fail if the process could not be run or did not finish in time.
    fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutput, ResignError>;

    /// Run a program and require it to exit successfully.
    ///
    /// Non-zero exits become [ResignError::ExternalToolFailed] carrying the
    /// arguments and captured stderr.
    fn run_checked(&self, invocation: &ToolInvocation) -> Result<ToolOutput, ResignError> {
        let output = self.run(invocation)?;

        if output.success() {
            Ok(output)
        } else {
            let stderr = output.stderr_string();

            for line in stderr.lines() {
                error!("{}> {}", invocation.tool_name(), line);
            }

            Err(ResignError::ExternalToolFailed {
                tool: invocation.tool_name(),
                arguments: invocation.args_lossy(),
                status: output.status,
                stderr: stderr.trim().to_string(),
            })
        }
    }
}

/// A [ProcessRunner] spawning real processes via `duct`.
#[derive(Clone, Debug)]
pub struct DuctProcessRunner {
    timeout: Option<Duration>,
}

impl DuctProcessRunner {
    /// Construct an instance that kills processes running longer than `timeout`.
    ///
    /// `None` waits indefinitely.
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

impl ProcessRunner for DuctProcessRunner {
    fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutput, ResignError> {
        debug!(
            "running {} {:?}",
            invocation.program().display(),
            invocation.args_lossy()
        );

        let handle = duct::cmd(invocation.program(), invocation.args())
            .stdin_null()
            .stdout_capture()
            .stderr_capture()
            .unchecked()
            .start()
            .map_err(|source| ResignError::ToolSpawn {
                tool: invocation.tool_name(),
                source,
            })?;

        let deadline = self.timeout.map(|timeout| Instant::now() + timeout);

        loop {
            if let Some(output) = handle.try_wait()? {
                return Ok(ToolOutput {
                    status: output.status.code(),
                    stdout: output.stdout.clone(),
                    stderr: output.stderr.clone(),
                });
            }

            if let (Some(deadline), Some(timeout)) = (deadline, self.timeout) {
                if Instant::now() >= deadline {
                    error!(
                        "{} exceeded {:?}; killing it",
                        invocation.tool_name(),
                        timeout
                    );
                    handle.kill()?;

                    return Err(ResignError::ToolTimeout {
                        tool: invocation.tool_name(),
                        timeout,
                    });
                }
            }

            std::thread::sleep(POLL_INTERVAL);
        }
    }
}
