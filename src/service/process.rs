//! Bridge to a local executable over its stdin/stdout.

use super::relay::relay;
use super::{close, write_response};
use crate::platform;
use crate::protocol::{FOUND, NOT_FOUND};
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// A service provided by spawning an executable per connection.
///
/// The client talks to the child's stdin and reads its stdout; stderr is
/// discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessService {
    path: PathBuf,
    args: Vec<String>,
}

impl ProcessService {
    pub fn new(path: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            path: path.into(),
            args,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.path);
        command
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            // Only reached if the bridge task itself is dropped mid-relay
            .kill_on_drop(true);
        platform::prepare(&mut command);
        command
    }

    pub(super) async fn bridge(&self, mut client: TcpStream, init_data: Bytes) {
        let spawned = self.command().spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to start local service");
                write_response(&mut client, NOT_FOUND).await;
                close(client).await;
                return;
            }
        };
        debug!(path = %self.path.display(), pid = ?child.id(), "Started local service");

        match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => {
                write_response(&mut client, FOUND).await;
                relay(client, stdout, stdin, init_data).await;
            }
            _ => {
                warn!(path = %self.path.display(), "Local service started without stdio pipes");
                write_response(&mut client, NOT_FOUND).await;
                close(client).await;
            }
        }

        reap(&mut child).await;
    }
}

/// Terminate the child and wait for it to exit.
async fn reap(child: &mut Child) {
    let pid = child.id();
    platform::terminate(child);
    match child.wait().await {
        Ok(status) => debug!(pid = ?pid, %status, "Local service exited"),
        Err(e) => warn!(pid = ?pid, error = %e, "Failed to wait for local service"),
    }
}
