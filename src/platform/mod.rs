//! Platform-specific child process control.
//!
//! - Unix: the child leads a new process group, and termination signals the
//!   whole group so grandchildren go down with it.
//! - Windows: no grouping; only the direct child is killed.
//!
//! The implementation is picked at compile time through [`Native`].

use tokio::process::{Child, Command};

#[cfg(unix)]
mod unix;

#[cfg(windows)]
mod windows;

/// Prepare and terminate child processes spawned for local services.
pub trait ProcessControl {
    /// Adjust the command before it is spawned.
    fn prepare(command: &mut Command);

    /// Ask a running child (and whatever it grouped with it) to exit.
    ///
    /// Does not wait; the caller reaps the child afterwards.
    fn terminate(child: &mut Child);
}

#[cfg(unix)]
pub type Native = unix::ProcessGroup;

#[cfg(windows)]
pub type Native = windows::DirectChild;

/// Prepare a command with the native process control.
pub fn prepare(command: &mut Command) {
    Native::prepare(command)
}

/// Terminate a child with the native process control.
pub fn terminate(child: &mut Child) {
    Native::terminate(child)
}
