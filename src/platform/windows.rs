//! Process control for Windows.

use super::ProcessControl;
use tokio::process::{Child, Command};
use tracing::warn;

/// Kills only the direct child; Windows has no process groups to signal.
pub struct DirectChild;

impl ProcessControl for DirectChild {
    fn prepare(_command: &mut Command) {}

    fn terminate(child: &mut Child) {
        if let Err(e) = child.start_kill() {
            warn!(error = %e, "Failed to kill child process");
        }
    }
}
