//! Interrupt delivery to the foreground process group
//!
//! With no kernel tty there is nobody to turn ^C into SIGINT. The session
//! records the process group of whatever runs on the tty side once the caller
//! knows it, and the line discipline signals that group directly.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tracing::{debug, warn};

use crate::discipline::line::InterruptSink;

/// Shared cell holding the foreground process group, 0 while unknown
#[derive(Debug, Clone, Default)]
pub struct ForegroundGroup {
    pgid: Arc<AtomicI32>,
}

impl ForegroundGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the process group that should receive interrupts
    pub fn set(&self, pgid: Pid) {
        self.pgid.store(pgid.as_raw(), Ordering::Release);
    }

    pub fn clear(&self) {
        self.pgid.store(0, Ordering::Release);
    }

    pub fn get(&self) -> Option<Pid> {
        match self.pgid.load(Ordering::Acquire) {
            0 => None,
            raw => Some(Pid::from_raw(raw)),
        }
    }
}

impl InterruptSink for ForegroundGroup {
    fn interrupt(&mut self) {
        let Some(pgid) = self.get() else {
            warn!("interrupt typed but no foreground process group is known");
            return;
        };
        match killpg(pgid, Signal::SIGINT) {
            Ok(()) => debug!(%pgid, "sent SIGINT to foreground group"),
            Err(e) => warn!(%pgid, "failed to deliver interrupt: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_by_default() {
        let group = ForegroundGroup::new();
        assert_eq!(group.get(), None);
    }

    #[test]
    fn test_clones_share_the_cell() {
        let group = ForegroundGroup::new();
        let other = group.clone();
        group.set(Pid::from_raw(4242));
        assert_eq!(other.get(), Some(Pid::from_raw(4242)));
        other.clear();
        assert_eq!(group.get(), None);
    }

    #[test]
    fn test_interrupt_without_group_is_harmless() {
        let mut group = ForegroundGroup::new();
        group.interrupt();
    }
}
