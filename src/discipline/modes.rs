//! Terminal mode flags and control characters

use serde::{Deserialize, Serialize};

/// ETX, ^C
pub const INTR: u8 = 0x03;
/// EOT, ^D
pub const EOF: u8 = 0x04;
/// Backspace, ^H
pub const BS: u8 = 0x08;
/// NAK, ^U
pub const KILL: u8 = 0x15;
/// DEL
pub const ERASE: u8 = 0x7f;

/// Visual erase of one echoed character: back up, blank it, back up again.
pub const ERASE_ECHO: &[u8] = b"\x08 \x08";

/// Snapshot of the terminal modes shared by both directions.
///
/// Each worker receives its own copy at startup; nothing mutates it while the
/// workers run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TtyModes {
    /// Mirror input back to the side that typed it
    pub echo: bool,
    /// Bypass line editing and pass every byte through
    pub raw: bool,
}

impl TtyModes {
    /// Cooked mode with echo
    pub fn cooked() -> Self {
        Self {
            echo: true,
            raw: false,
        }
    }

    /// Raw mode without echo
    pub fn raw() -> Self {
        Self {
            echo: false,
            raw: true,
        }
    }

    /// Same modes with echo switched
    pub fn with_echo(self, echo: bool) -> Self {
        Self { echo, ..self }
    }
}

impl Default for TtyModes {
    fn default() -> Self {
        Self::cooked()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_cooked_with_echo() {
        let modes = TtyModes::default();
        assert!(modes.echo);
        assert!(!modes.raw);
    }

    #[test]
    fn test_with_echo_keeps_raw() {
        let modes = TtyModes::raw().with_echo(true);
        assert!(modes.raw);
        assert!(modes.echo);
    }
}
