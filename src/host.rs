//! Host Access
//!
//! Every shell probe and filesystem check the collectors perform goes through the
//! [`Host`] trait. A command either yields its stdout or a typed [`CommandError`],
//! which lets callers chain fallbacks with plain `match` instead of relying on
//! panics or stringly errors.
//!
//! [`SystemHost`] is the real implementation backed by `tokio::process` and
//! `tokio::fs`. Tests substitute a scripted host.

use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Failure kinds for a single subprocess invocation.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("`{command}` not found")]
    NotFound { command: String },

    #[error("`{command}` exited with status {status}: {stderr}")]
    NonZeroExit {
        command: String,
        status: i32,
        stderr: String,
    },

    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

impl CommandError {
    pub fn command(&self) -> &str {
        match self {
            CommandError::NotFound { command }
            | CommandError::NonZeroExit { command, .. }
            | CommandError::Spawn { command, .. } => command,
        }
    }
}

pub type CommandResult = std::result::Result<String, CommandError>;

/// Operations the collectors need from the machine they run on.
#[async_trait]
pub trait Host: Send + Sync {
    /// Run `program` with `args` and return its stdout.
    async fn run(&self, program: &str, args: &[&str]) -> CommandResult;

    async fn read_to_string(&self, path: &Path) -> std::io::Result<String>;

    async fn exists(&self, path: &Path) -> bool;

    /// True when `path` exists and is a UNIX domain socket.
    async fn is_socket(&self, path: &Path) -> bool;
}

/// Run a list of `(program, args)` candidates in order and return the output of
/// the first one that succeeds, or the last failure.
pub async fn run_first_success(
    host: &dyn Host,
    candidates: &[(&str, &[&str])],
) -> CommandResult {
    let mut last_error = None;
    for (program, args) in candidates {
        match host.run(program, args).await {
            Ok(output) => return Ok(output),
            Err(e) => {
                debug!("{} failed, trying next candidate: {}", program, e);
                last_error = Some(e);
            }
        }
    }
    Err(last_error.unwrap_or_else(|| CommandError::NotFound {
        command: "<none>".to_string(),
    }))
}

/// [`Host`] backed by the real operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemHost;

#[async_trait]
impl Host for SystemHost {
    async fn run(&self, program: &str, args: &[&str]) -> CommandResult {
        let command = render_command(program, args);
        debug!("Running {}", command);

        let output = tokio::process::Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| {
                if source.kind() == std::io::ErrorKind::NotFound {
                    CommandError::NotFound {
                        command: command.clone(),
                    }
                } else {
                    CommandError::Spawn {
                        command: command.clone(),
                        source,
                    }
                }
            })?;

        if !output.status.success() {
            return Err(CommandError::NonZeroExit {
                command,
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn read_to_string(&self, path: &Path) -> std::io::Result<String> {
        tokio::fs::read_to_string(path).await
    }

    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    async fn is_socket(&self, path: &Path) -> bool {
        #[cfg(unix)]
        {
            use std::os::unix::fs::FileTypeExt;
            tokio::fs::metadata(path)
                .await
                .map(|m| m.file_type().is_socket())
                .unwrap_or(false)
        }

        #[cfg(not(unix))]
        {
            let _ = path;
            false
        }
    }
}

pub fn render_command(program: &str, args: &[&str]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}
