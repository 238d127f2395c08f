//! Process group control for Unix.

use super::ProcessControl;
use std::io;
use tokio::process::{Child, Command};
use tracing::{trace, warn};

/// Runs each child in its own process group and signals the group.
pub struct ProcessGroup;

impl ProcessControl for ProcessGroup {
    fn prepare(command: &mut Command) {
        // 0: the child's pid becomes the group id
        command.process_group(0);
    }

    fn terminate(child: &mut Child) {
        let Some(pid) = child.id() else {
            // Already reaped
            return;
        };

        let pgid = unsafe { libc::getpgid(pid as libc::pid_t) };
        if pgid < 0 {
            report(pid, "Failed to look up process group");
            return;
        }

        trace!(pid, pgid, "Sending SIGTERM to process group");
        if unsafe { libc::kill(-pgid, libc::SIGTERM) } < 0 {
            report(pid, "Failed to signal process group");
        }
    }
}

/// Log the last OS error. ESRCH means the group already exited.
fn report(pid: u32, context: &str) {
    let e = io::Error::last_os_error();
    if e.raw_os_error() == Some(libc::ESRCH) {
        trace!(pid, "Process group already gone");
    } else {
        warn!(pid, error = %e, "{}", context);
    }
}
