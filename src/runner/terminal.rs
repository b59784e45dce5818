//! Controlling-terminal handover for interactive stages.
//!
//! Stages run in their own process group, so a read from the terminal would
//! stop them with SIGTTIN unless their group is the foreground group.

use std::io;

use tracing::{debug, warn};

/// Makes a stage's process group the terminal's foreground group and hands
/// the terminal back to the previous group on drop.
pub(crate) struct ForegroundGuard {
    previous: libc::pid_t,
}

impl ForegroundGuard {
    /// Returns `None` when stdin is not a terminal or the handover fails.
    pub(crate) fn acquire(pid: u32) -> Option<Self> {
        let pgid = libc::pid_t::try_from(pid).ok()?;
        // SAFETY: isatty and tcgetpgrp only query the descriptor.
        let previous = unsafe {
            if libc::isatty(libc::STDIN_FILENO) != 1 {
                return None;
            }
            libc::tcgetpgrp(libc::STDIN_FILENO)
        };
        if previous < 0 {
            return None;
        }
        if let Err(e) = set_foreground(pgid) {
            warn!(pgid, "Could not hand the terminal to the stage: {}", e);
            return None;
        }
        // A read before the handover left the stage stopped.
        // SAFETY: killpg only delivers a signal to the stage's own group.
        unsafe {
            libc::killpg(pgid, libc::SIGCONT);
        }
        debug!(pgid, previous, "Stage owns the terminal");
        Some(Self { previous })
    }
}

impl Drop for ForegroundGuard {
    fn drop(&mut self) {
        if let Err(e) = set_foreground(self.previous) {
            warn!(pgid = self.previous, "Could not take the terminal back: {}", e);
        }
    }
}

/// tcsetpgrp from a background group raises SIGTTOU unless it is ignored.
fn set_foreground(pgid: libc::pid_t) -> io::Result<()> {
    // SAFETY: the SIGTTOU disposition is restored before returning and no
    // other code in this process installs a SIGTTOU handler.
    unsafe {
        let disposition = libc::signal(libc::SIGTTOU, libc::SIG_IGN);
        let result = if libc::tcsetpgrp(libc::STDIN_FILENO, pgid) == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        };
        libc::signal(libc::SIGTTOU, disposition);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_handover_for_invalid_pid() {
        assert!(ForegroundGuard::acquire(u32::MAX).is_none());
    }
}
