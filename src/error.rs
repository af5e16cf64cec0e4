//! Error types for pty emulation

use std::io;
use std::os::fd::RawFd;

use thiserror::Error;

/// softpty error type
#[derive(Error, Debug)]
pub enum Error {
    /// Channel creation or worker start failed; nothing was handed out
    #[error("No pty available: {0}")]
    NoPty(String),

    /// Reading from a source endpoint failed
    #[error("Failed to read from channel: {0}")]
    Read(#[source] io::Error),

    /// Writing to a destination endpoint failed
    #[error("Failed to write to channel: {0}")]
    Write(#[source] io::Error),

    /// A destination accepted fewer bytes than requested
    #[error("Short write: {written} of {expected} bytes")]
    ShortWrite { expected: usize, written: usize },

    /// An interpreter-internal descriptor could not be closed
    #[error("Failed to close internal descriptor {fd}: {source}")]
    MakeControlling {
        fd: RawFd,
        #[source]
        source: nix::Error,
    },

    /// A worker thread panicked instead of returning
    #[error("Worker {0} panicked")]
    WorkerPanicked(&'static str),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Nix error
    #[error("System error: {0}")]
    Nix(#[from] nix::Error),
}

/// Result type for softpty operations
pub type Result<T> = std::result::Result<T, Error>;
