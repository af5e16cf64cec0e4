//! Line discipline for the application -> driver direction
//!
//! In cooked mode input is collected in an edit buffer and only committed to
//! the driver when a line ends (CR or NL), on interrupt (^C) or on
//! end-of-file (^D). Erase (DEL, ^H) and kill (^U) edit the buffer in place.
//! With echo enabled the typed characters, visual erases and the final CR NL
//! are mirrored back to the side the input came from.
//!
//! In raw mode no rules are installed: every byte is forwarded verbatim at the
//! end of the read batch it arrived in.

use std::io::Write;

use tracing::debug;

use crate::error::{Error, Result};

use super::modes::{TtyModes, BS, EOF, ERASE, ERASE_ECHO, INTR, KILL};
use super::{write_full, Downstream, Interpreter, RuleTable};

/// Default bound of the edit buffer
pub const DEFAULT_LINE_CAPACITY: usize = 4096;

/// Receives interrupts typed on the terminal.
///
/// The line discipline has no notion of processes; whoever owns the session
/// decides what an interrupt means.
pub trait InterruptSink: Send {
    fn interrupt(&mut self);
}

impl<F: FnMut() + Send> InterruptSink for F {
    fn interrupt(&mut self) {
        self()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineAction {
    /// CR or NL: end of line
    Commit,
    /// ^C
    Interrupt,
    /// ^D
    EndOfFile,
    /// ^U: erase the whole line
    Kill,
    /// DEL or ^H: erase one character
    Erase,
}

/// Stateful input interpreter.
///
/// `E` receives echo output, `N` receives interrupts.
pub struct LineDiscipline<E, N> {
    modes: TtyModes,
    table: RuleTable<LineAction>,
    line: Vec<u8>,
    capacity: usize,
    /// Prefix of `line` already mirrored to `echo`
    echoed: usize,
    echo: E,
    interrupts: N,
}

impl<E: Write, N: InterruptSink> LineDiscipline<E, N> {
    /// Create a line discipline for the given mode snapshot.
    ///
    /// `capacity` bounds the edit buffer; a full cooked line is committed
    /// without a terminator instead of dropping input.
    pub fn new(modes: TtyModes, capacity: usize, echo: E, interrupts: N) -> Self {
        Self {
            modes,
            table: Self::table_for(modes),
            line: Vec::with_capacity(capacity),
            capacity: capacity.max(1),
            echoed: 0,
            echo,
            interrupts,
        }
    }

    fn table_for(modes: TtyModes) -> RuleTable<LineAction> {
        if modes.raw {
            return RuleTable::new();
        }
        RuleTable::new()
            .with(b'\r', LineAction::Commit)
            .with(b'\n', LineAction::Commit)
            .with(INTR, LineAction::Interrupt)
            .with(EOF, LineAction::EndOfFile)
            .with(KILL, LineAction::Kill)
            .with(ERASE, LineAction::Erase)
            .with(BS, LineAction::Erase)
    }

    pub fn modes(&self) -> TtyModes {
        self.modes
    }

    /// Uncommitted input
    pub fn pending(&self) -> &[u8] {
        &self.line
    }

    /// Echo destination
    pub fn echo(&self) -> &E {
        &self.echo
    }

    pub fn into_parts(self) -> (E, N) {
        (self.echo, self.interrupts)
    }

    fn write_echo(&mut self, bytes: &[u8]) -> Result<()> {
        write_full(&mut self.echo, bytes)
    }

    /// Echo whatever part of the buffer the user has not seen yet
    fn catch_up_echo(&mut self) -> Result<()> {
        if self.modes.echo && self.echoed < self.line.len() {
            write_full(&mut self.echo, &self.line[self.echoed..])?;
        }
        self.echoed = self.line.len();
        Ok(())
    }

    /// Send the buffer downstream and start a new line
    fn commit<D: Downstream>(&mut self, dest: &mut D) -> Result<()> {
        write_full(dest, &self.line)?;
        self.line.clear();
        self.echoed = 0;
        Ok(())
    }

    /// Drop the last buffered byte; true if there was one
    fn rubout(&mut self) -> Result<bool> {
        if self.line.pop().is_none() {
            return Ok(false);
        }
        if self.echoed > self.line.len() {
            self.echoed = self.line.len();
            if self.modes.echo {
                self.write_echo(ERASE_ECHO)?;
            }
        }
        Ok(true)
    }
}

impl<E: Write, N: InterruptSink> Interpreter for LineDiscipline<E, N> {
    type Action = LineAction;

    fn rules(&self) -> &RuleTable<LineAction> {
        &self.table
    }

    fn apply<D: Downstream>(
        &mut self,
        action: LineAction,
        _rest: &[u8],
        dest: &mut D,
    ) -> Result<usize> {
        self.catch_up_echo()?;
        match action {
            LineAction::Commit => {
                self.line.push(b'\n');
                self.commit(dest)?;
                if self.modes.echo {
                    self.write_echo(b"\r\n")?;
                }
            }
            LineAction::Interrupt => {
                self.commit(dest)?;
                debug!("interrupt typed, notifying foreground group");
                self.interrupts.interrupt();
            }
            LineAction::EndOfFile => {
                self.commit(dest)?;
                debug!("end-of-file typed");
                dest.mark_eof().map_err(Error::Write)?;
            }
            LineAction::Kill => while self.rubout()? {},
            LineAction::Erase => {
                self.rubout()?;
            }
        }
        Ok(0)
    }

    fn pass<D: Downstream>(&mut self, mut bytes: &[u8], dest: &mut D) -> Result<()> {
        while !bytes.is_empty() {
            let room = self.capacity.saturating_sub(self.line.len());
            if room == 0 {
                debug!(len = self.line.len(), "edit buffer full, committing");
                self.catch_up_echo()?;
                self.commit(dest)?;
                continue;
            }
            let take = room.min(bytes.len());
            self.line.extend_from_slice(&bytes[..take]);
            bytes = &bytes[take..];
        }
        Ok(())
    }

    fn end_batch<D: Downstream>(&mut self, dest: &mut D) -> Result<()> {
        self.catch_up_echo()?;
        if self.modes.raw {
            self.commit(dest)?;
        }
        Ok(())
    }
}
