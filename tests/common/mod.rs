//! Shared test fixtures.

#![allow(dead_code)]

use async_trait::async_trait;
use portracker_discovery::host::{render_command, CommandError, CommandResult, Host};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Scripted [`Host`]: commands are answered from a table keyed by the full
/// rendered command line; anything unscripted behaves as a missing binary.
#[derive(Default)]
pub struct FakeHost {
    commands: HashMap<String, CommandResult>,
    files: HashMap<PathBuf, String>,
    sockets: HashSet<PathBuf>,
    calls: Mutex<Vec<String>>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_command(mut self, program: &str, args: &[&str], stdout: &str) -> Self {
        self.commands
            .insert(render_command(program, args), Ok(stdout.to_string()));
        self
    }

    pub fn with_failing_command(mut self, program: &str, args: &[&str]) -> Self {
        let command = render_command(program, args);
        self.commands.insert(
            command.clone(),
            Err(CommandError::NonZeroExit {
                command,
                status: 1,
                stderr: "scripted failure".to_string(),
            }),
        );
        self
    }

    pub fn with_file(mut self, path: &str, content: &str) -> Self {
        self.files.insert(PathBuf::from(path), content.to_string());
        self
    }

    pub fn with_socket(mut self, path: &str) -> Self {
        self.sockets.insert(PathBuf::from(path));
        self
    }

    /// Every command line run so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn ran(&self, prefix: &str) -> bool {
        self.calls().iter().any(|c| c.starts_with(prefix))
    }
}

#[async_trait]
impl Host for FakeHost {
    async fn run(&self, program: &str, args: &[&str]) -> CommandResult {
        let command = render_command(program, args);
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(command.clone());
        }
        match self.commands.get(&command) {
            Some(Ok(stdout)) => Ok(stdout.clone()),
            Some(Err(CommandError::NonZeroExit { status, stderr, .. })) => {
                Err(CommandError::NonZeroExit {
                    command,
                    status: *status,
                    stderr: stderr.clone(),
                })
            }
            _ => Err(CommandError::NotFound { command }),
        }
    }

    async fn read_to_string(&self, path: &Path) -> std::io::Result<String> {
        self.files.get(path).cloned().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, path.display().to_string())
        })
    }

    async fn exists(&self, path: &Path) -> bool {
        self.files.contains_key(path) || self.sockets.contains(path)
    }

    async fn is_socket(&self, path: &Path) -> bool {
        self.sockets.contains(path)
    }
}

pub const SS_OUTPUT: &str = "\
Netid State  Recv-Q Send-Q Local Address:Port  Peer Address:Port Process
tcp   LISTEN 0      4096   0.0.0.0:22           0.0.0.0:*         users:((\"sshd\",pid=812,fd=3))
tcp   LISTEN 0      4096   0.0.0.0:8096         0.0.0.0:*         users:((\"docker-proxy\",pid=2001,fd=4))
tcp   LISTEN 0      4096   0.0.0.0:32400        0.0.0.0:*         users:((\"Plex Media Serv\",pid=3100,fd=9))
udp   UNCONN 0      0      0.0.0.0:5353         0.0.0.0:*         users:((\"avahi-daemon\",pid=640,fd=12))
";

pub const NETSTAT_OUTPUT: &str = "\
Active Internet connections (only servers)
Proto Recv-Q Send-Q Local Address           Foreign Address         State       PID/Program name
tcp        0      0 0.0.0.0:22              0.0.0.0:*               LISTEN      812/sshd
tcp        0      0 127.0.0.1:631           0.0.0.0:*               LISTEN      700/cupsd
";
