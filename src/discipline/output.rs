//! Output processing for the driver -> application direction
//!
//! Emulates the output post-processing of a terminal driver: every line feed
//! written on the driver side reaches the application as carriage return +
//! line feed. Everything else passes through untouched.

use crate::error::Result;

use super::{write_full, Downstream, Interpreter, RuleTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputAction {
    /// NL -> CR NL
    Crlf,
}

/// Interpreter for terminal output
#[derive(Debug, Clone)]
pub struct OutputProcessor {
    table: RuleTable<OutputAction>,
}

impl OutputProcessor {
    pub fn new() -> Self {
        Self {
            table: RuleTable::new().with(b'\n', OutputAction::Crlf),
        }
    }
}

impl Default for OutputProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter for OutputProcessor {
    type Action = OutputAction;

    fn rules(&self) -> &RuleTable<OutputAction> {
        &self.table
    }

    fn apply<D: Downstream>(
        &mut self,
        action: OutputAction,
        _rest: &[u8],
        dest: &mut D,
    ) -> Result<usize> {
        match action {
            OutputAction::Crlf => write_full(dest, b"\r\n")?,
        }
        Ok(0)
    }
}
