//! softpty - pseudo-terminals without a kernel pty device
//!
//! Terminal semantics (echo, cooked and raw input, line editing, control
//! characters, NL -> CR NL output translation) are synthesized in user space
//! by relaying bytes between two socket pairs through interpreting workers.
//!
//! - `discipline`: the rule-driven stream interpreter, output processing and
//!   the line discipline
//! - `pty`: channel pairs, allocation and the lifecycle of the two workers
//! - `config`: mode flags and allocation settings
//!
//! ```no_run
//! use std::io::{Read, Write};
//!
//! let config = softpty::Config::default();
//! let mut alloc = softpty::allocate(&config)?;
//! // Input typed on the tty side is line-edited and committed to the pty side
//! alloc.tty.write_all(b"ls\n")?;
//! let mut buf = [0u8; 64];
//! let n = alloc.pty.read(&mut buf)?;
//! assert_eq!(&buf[..n], b"ls\n");
//!
//! // Output written on the pty side gets NL -> CR NL
//! alloc.pty.write_all(b"total 0\n")?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod discipline;
pub mod error;
pub mod pty;

pub use config::{Config, ConfigError};
pub use discipline::TtyModes;
pub use error::{Error, Result};
pub use pty::{
    allocate, change_window_size, release, Allocation, ChannelKind, Direction, Endpoint, Session,
    SessionReport, WindowSize,
};
