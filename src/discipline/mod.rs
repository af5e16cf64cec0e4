//! Rule-driven byte stream interpretation
//!
//! This module provides the engine that sits between two channel endpoints
//! and copies bytes from one to the other, consulting a table of
//! single-byte rules on the way:
//!
//! - `output`: cooked output processing (NL -> CR NL)
//! - `line`: input line editing and control characters
//! - `modes`: the echo/raw mode snapshot and control-character constants
//!
//! Bytes that match no rule are passed through verbatim. When a byte matches
//! a rule, everything scanned so far is flushed first, then the rule's action
//! writes its own replacement output and may consume additional input.

pub mod line;
pub mod modes;
pub mod output;

use std::io::{self, Read, Write};

use crate::error::{Error, Result};

pub use line::{LineAction, LineDiscipline};
pub use modes::TtyModes;
pub use output::{OutputAction, OutputProcessor};

/// Size of a single read from the source endpoint
pub const BUFFER_SIZE: usize = 512;

/// A trigger byte bound to an action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rule<A> {
    pub trigger: u8,
    pub action: A,
}

/// Ordered set of rules; the first rule whose trigger matches wins.
///
/// An empty table matches nothing, so every byte passes through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleTable<A> {
    rules: Vec<Rule<A>>,
}

impl<A: Copy> RuleTable<A> {
    /// Create an empty table
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    /// Append a rule
    pub fn with(mut self, trigger: u8, action: A) -> Self {
        self.rules.push(Rule { trigger, action });
        self
    }

    /// Action of the first rule triggered by `byte`
    pub fn lookup(&self, byte: u8) -> Option<A> {
        self.rules
            .iter()
            .find(|rule| rule.trigger == byte)
            .map(|rule| rule.action)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl<A: Copy> Default for RuleTable<A> {
    fn default() -> Self {
        Self::new()
    }
}

/// Destination of an interpreter.
///
/// Besides plain bytes a destination can be told that the user typed the
/// end-of-file character. Transports that cannot represent that ignore it.
pub trait Downstream: Write {
    /// Deliver an end-of-file marker without closing the stream
    fn mark_eof(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Downstream for Vec<u8> {}

impl<D: Downstream + ?Sized> Downstream for &mut D {
    fn mark_eof(&mut self) -> io::Result<()> {
        (**self).mark_eof()
    }
}

/// Behaviour plugged into [`interpret`].
pub trait Interpreter {
    type Action: Copy;

    /// Rules consulted for every input byte
    fn rules(&self) -> &RuleTable<Self::Action>;

    /// Handle a matched rule.
    ///
    /// `rest` is the remainder of the current read batch after the trigger.
    /// Returns how many bytes of `rest` the action consumed.
    fn apply<D: Downstream>(
        &mut self,
        action: Self::Action,
        rest: &[u8],
        dest: &mut D,
    ) -> Result<usize>;

    /// Handle a run of bytes that matched no rule
    fn pass<D: Downstream>(&mut self, bytes: &[u8], dest: &mut D) -> Result<()> {
        write_full(dest, bytes)
    }

    /// Called once a read batch has been fully scanned
    fn end_batch<D: Downstream>(&mut self, _dest: &mut D) -> Result<()> {
        Ok(())
    }
}

/// Copy `source` to `dest` through `interp` until `source` reports
/// end-of-stream.
///
/// Returns `Ok(())` on a zero-length read. Read failures and short writes end
/// the run with an error; nothing is retried except reads interrupted by a
/// signal.
pub fn interpret<S, D, I>(source: &mut S, dest: &mut D, interp: &mut I) -> Result<()>
where
    S: Read + ?Sized,
    D: Downstream,
    I: Interpreter,
{
    let mut buf = [0u8; BUFFER_SIZE];
    loop {
        let n = match source.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::Read(e)),
        };
        scan(&buf[..n], dest, interp)?;
    }
}

/// Run one read batch through the rule table
fn scan<D, I>(batch: &[u8], dest: &mut D, interp: &mut I) -> Result<()>
where
    D: Downstream,
    I: Interpreter,
{
    let mut start = 0;
    let mut pos = 0;
    while pos < batch.len() {
        let Some(action) = interp.rules().lookup(batch[pos]) else {
            pos += 1;
            continue;
        };
        if start < pos {
            interp.pass(&batch[start..pos], dest)?;
        }
        let consumed = interp.apply(action, &batch[pos + 1..], dest)?;
        pos = (pos + 1).saturating_add(consumed).min(batch.len());
        start = pos;
    }
    if start < batch.len() {
        interp.pass(&batch[start..], dest)?;
    }
    interp.end_batch(dest)
}

/// Write all of `bytes` with a single call; anything less is fatal.
pub fn write_full<W: Write + ?Sized>(dest: &mut W, bytes: &[u8]) -> Result<()> {
    if bytes.is_empty() {
        return Ok(());
    }
    loop {
        match dest.write(bytes) {
            Ok(n) if n == bytes.len() => return Ok(()),
            Ok(n) => {
                return Err(Error::ShortWrite {
                    expected: bytes.len(),
                    written: n,
                })
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::Write(e)),
        }
    }
}
