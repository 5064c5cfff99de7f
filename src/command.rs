/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::{ffi::OsStr, process::Command};

use thiserror::Error;

/// Exit code external tools use for "no such file or directory".
pub const CODE_NOT_FOUND: i32 = 2;
/// Exit code external tools use for "already exists / stripe already set".
pub const CODE_ALREADY_EXISTS: i32 = 17;

#[derive(Error, Debug)]
pub enum RunCommandError {
    #[error("failed to run command {cmd}: {source}")]
    Spawn {
        cmd: String,
        source: std::io::Error,
    },
    #[error("command {cmd} exited with code {code}: {stderr}")]
    Exit {
        cmd: String,
        code: i32,
        stderr: String,
    },
    #[error("command {cmd} terminated by signal")]
    Signaled { cmd: String },
}

impl RunCommandError {
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            RunCommandError::Exit { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.exit_code() == Some(CODE_NOT_FOUND)
    }

    pub fn is_already_exists(&self) -> bool {
        self.exit_code() == Some(CODE_ALREADY_EXISTS)
    }
}

/// Collected output of a completed command. Both streams are fully drained
/// before the caller proceeds.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

pub struct CommandWrapper {
    internal: Command,
}

impl CommandWrapper {
    pub fn new<S: AsRef<OsStr>>(cmd: S) -> Self {
        Self {
            internal: Command::new(cmd),
        }
    }

    pub fn arg<S: AsRef<OsStr>>(&mut self, arg: S) -> &mut Self {
        self.internal.arg(arg);
        self
    }

    /// Run to completion and collect stdout/stderr. Exit code zero is the
    /// only success; any other outcome maps to a [`RunCommandError`]
    /// carrying the code and stderr.
    pub fn output(mut self) -> Result<CommandOutput, RunCommandError> {
        let output = self.internal.output().map_err(|v| RunCommandError::Spawn {
            cmd: format!("{:?}", self.internal),
            source: v,
        })?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        match output.status.code() {
            Some(0) => Ok(CommandOutput { stdout, stderr }),
            Some(code) => Err(RunCommandError::Exit {
                cmd: format!("{:?}", self.internal),
                code,
                stderr,
            }),
            None => Err(RunCommandError::Signaled {
                cmd: format!("{:?}", self.internal),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_collects_both_streams() {
        let mut cmd = CommandWrapper::new("/bin/sh");
        cmd.arg("-c").arg("echo out; echo err >&2");
        let output = cmd.output().unwrap();
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
    }

    #[test]
    fn test_not_found_exit_code() {
        let mut cmd = CommandWrapper::new("/bin/sh");
        cmd.arg("-c").arg("echo missing >&2; exit 2");
        let err = cmd.output().unwrap_err();
        assert!(err.is_not_found());
        assert!(!err.is_already_exists());
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_already_exists_exit_code() {
        let mut cmd = CommandWrapper::new("/bin/sh");
        cmd.arg("-c").arg("exit 17");
        let err = cmd.output().unwrap_err();
        assert!(err.is_already_exists());
        assert_eq!(err.exit_code(), Some(17));
    }

    #[test]
    fn test_spawn_failure() {
        let cmd = CommandWrapper::new("/nonexistent/binary/path");
        assert!(matches!(
            cmd.output(),
            Err(RunCommandError::Spawn { .. })
        ));
    }
}
