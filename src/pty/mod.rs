//! Pseudo-terminal emulation in user space
//!
//! There is no pty device behind an allocation. Two channel pairs are created
//! and two worker threads interpret the traffic between them:
//!
//! ```text
//!  pty handle  <==>  [pty inner] --output (NL->CRNL)--> [tty inner]  <==>  tty handle
//!                    [pty inner] <--line discipline--- [tty inner]
//! ```
//!
//! Bytes written to the tty handle are line-edited and committed lines are
//! read from the pty handle; echo goes back to the tty handle. Bytes written
//! to the pty handle reach the tty handle with NL translated to CR NL.

pub mod channel;
pub mod foreground;

use std::mem::ManuallyDrop;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, error, warn};

use crate::config::Config;
use crate::discipline::{interpret, LineDiscipline, OutputProcessor, TtyModes};
use crate::error::{Error, Result};

pub use channel::{channel_pair, ChannelKind, Endpoint};
pub use foreground::ForegroundGroup;

static NEXT_ID: AtomicUsize = AtomicUsize::new(0);

/// Window size for the pty
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSize {
    pub rows: u16,
    pub cols: u16,
    pub pixel_width: u16,
    pub pixel_height: u16,
}

impl WindowSize {
    /// Create a new window size with just rows and columns
    pub fn new(cols: u16, rows: u16) -> Self {
        Self {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        }
    }

    /// Create a new window size with pixel dimensions
    pub fn with_pixels(cols: u16, rows: u16, pixel_width: u16, pixel_height: u16) -> Self {
        Self {
            rows,
            cols,
            pixel_width,
            pixel_height,
        }
    }
}

impl Default for WindowSize {
    fn default() -> Self {
        Self::new(80, 24)
    }
}

/// A freshly allocated pty.
///
/// The caller owns both handles and closes them by dropping them.
#[derive(Debug)]
pub struct Allocation {
    /// Driver-facing handle: reads committed lines, writes output
    pub pty: Endpoint,
    /// Application-facing handle: writes input to be edited, reads output
    pub tty: Endpoint,
    /// Display label; there is no device node behind it
    pub name: String,
    pub session: Session,
}

/// Which worker a result belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// pty -> tty, output processing
    Output,
    /// tty -> pty, line discipline
    Input,
}

impl Direction {
    fn thread_name(self) -> &'static str {
        match self {
            Direction::Output => "softpty-output",
            Direction::Input => "softpty-input",
        }
    }
}

/// How both workers ended
#[derive(Debug)]
pub struct SessionReport {
    pub output: Result<()>,
    pub input: Result<()>,
}

impl SessionReport {
    pub fn is_clean(&self) -> bool {
        self.output.is_ok() && self.input.is_ok()
    }
}

/// The running interpreters of one allocation
#[derive(Debug)]
pub struct Session {
    name: String,
    /// pty-side and tty-side inner endpoints, shared with the workers
    inner: [Arc<Endpoint>; 2],
    output: JoinHandle<Result<()>>,
    input: JoinHandle<Result<()>>,
    foreground: ForegroundGroup,
}

/// Allocate a pty and start its two workers.
///
/// Either both workers are running and both handles are returned, or nothing
/// is left behind and [`Error::NoPty`] is returned.
pub fn allocate(config: &Config) -> Result<Allocation> {
    let (pty, pty_inner) = channel_pair(config.channel)
        .map_err(|e| Error::NoPty(format!("pty channel: {}", e)))?;
    let (tty, tty_inner) = channel_pair(config.channel)
        .map_err(|e| Error::NoPty(format!("tty channel: {}", e)))?;
    let pty_inner = Arc::new(pty_inner);
    let tty_inner = Arc::new(tty_inner);

    let name = format!(
        "{}/{}",
        config.name_prefix,
        NEXT_ID.fetch_add(1, Ordering::Relaxed)
    );

    let output = spawn_worker(Direction::Output, {
        let source = Arc::clone(&pty_inner);
        let dest = Arc::clone(&tty_inner);
        move || run_output(&source, &dest)
    })
    .map_err(|e| Error::NoPty(format!("output worker: {}", e)))?;

    let foreground = ForegroundGroup::new();
    let input = spawn_worker(Direction::Input, {
        let source = Arc::clone(&tty_inner);
        let dest = Arc::clone(&pty_inner);
        let modes = config.modes;
        let capacity = config.line_capacity;
        let foreground = foreground.clone();
        move || run_input(&source, &dest, modes, capacity, foreground)
    });
    let input = match input {
        Ok(handle) => handle,
        Err(e) => {
            // Unblock the output worker so it can be reaped
            let _ = tty_inner.shutdown();
            let _ = pty_inner.shutdown();
            let _ = output.join();
            return Err(Error::NoPty(format!("input worker: {}", e)));
        }
    };

    debug!(
        %name,
        pty = pty.as_raw_fd(),
        tty = tty.as_raw_fd(),
        modes = ?config.modes,
        "allocated pty"
    );

    Ok(Allocation {
        pty,
        tty,
        name: name.clone(),
        session: Session {
            name,
            inner: [pty_inner, tty_inner],
            output,
            input,
            foreground,
        },
    })
}

fn spawn_worker<F>(direction: Direction, run: F) -> std::io::Result<JoinHandle<Result<()>>>
where
    F: FnOnce() -> Result<()> + Send + 'static,
{
    thread::Builder::new()
        .name(direction.thread_name().to_string())
        .spawn(move || {
            let result = run();
            match &result {
                Ok(()) => debug!(?direction, "worker reached end of stream"),
                Err(e) => error!(?direction, "worker failed: {}", e),
            }
            result
        })
}

/// Driver output to the application, NL -> CR NL
fn run_output(source: &Endpoint, dest: &Endpoint) -> Result<()> {
    let mut src = source;
    let mut dst = dest;
    let result = interpret(&mut src, &mut dst, &mut OutputProcessor::new());
    finish(dest, result)
}

/// Application input to the driver through the line discipline; echo goes
/// back where the input came from
fn run_input(
    source: &Endpoint,
    dest: &Endpoint,
    modes: TtyModes,
    capacity: usize,
    foreground: ForegroundGroup,
) -> Result<()> {
    let mut src = source;
    let mut dst = dest;
    let mut discipline = LineDiscipline::new(modes, capacity, source, foreground);
    let result = interpret(&mut src, &mut dst, &mut discipline);
    finish(dest, result)
}

fn join_worker(direction: Direction, handle: JoinHandle<Result<()>>) -> Result<()> {
    handle
        .join()
        .unwrap_or(Err(Error::WorkerPanicked(direction.thread_name())))
}

/// Let the destination's reader see end-of-stream however the worker ended
fn finish(dest: &Endpoint, result: Result<()>) -> Result<()> {
    if let Err(e) = dest.shutdown_write() {
        debug!("shutdown of destination failed: {}", e);
    }
    result
}

impl Session {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Where interrupts typed on this pty are delivered
    pub fn foreground(&self) -> &ForegroundGroup {
        &self.foreground
    }

    /// True once the worker for `direction` has exited
    pub fn finished(&self, direction: Direction) -> bool {
        match direction {
            Direction::Output => self.output.is_finished(),
            Direction::Input => self.input.is_finished(),
        }
    }

    /// True once both workers have exited
    pub fn is_finished(&self) -> bool {
        self.finished(Direction::Output) && self.finished(Direction::Input)
    }

    /// Wait for both workers.
    ///
    /// Workers exit when their source reaches end-of-stream, normally because
    /// the caller dropped the pty or tty handle.
    pub fn wait(self) -> SessionReport {
        SessionReport {
            output: join_worker(Direction::Output, self.output),
            input: join_worker(Direction::Input, self.input),
        }
    }

    /// Descriptors the new controlling process must not inherit
    pub fn inner_fds(&self) -> [RawFd; 2] {
        [self.inner[0].as_raw_fd(), self.inner[1].as_raw_fd()]
    }

    /// Hand a handle over to the process that will run on it.
    ///
    /// Usually that is the tty handle. Closes the interpreter-internal
    /// descriptors. Call exactly once, after `handle` has been moved onto
    /// stdin/stdout and before exec. A failure here means an internal
    /// descriptor may leak into the new program; the caller should abort
    /// rather than exec.
    ///
    /// # Safety
    ///
    /// Must only be called in a child process created by `fork` after
    /// [`allocate`]. The worker threads do not exist there, so nothing else
    /// uses the descriptors being closed. Calling it in the allocating process
    /// would close descriptors the workers still own.
    pub unsafe fn make_controlling(self, handle: &Endpoint) -> Result<()> {
        // The workers' references to the inner endpoints are still counted in
        // the copied address space; closing by hand and forgetting the rest
        // keeps anything from closing the same descriptors again.
        let session = ManuallyDrop::new(self);
        let keep = handle.as_raw_fd();
        let fds = session.inner_fds();
        debug!(name = %session.name, fd = keep, ?fds, "making handle controlling");

        for fd in fds {
            if fd == keep {
                return Err(Error::MakeControlling {
                    fd,
                    source: nix::Error::EINVAL,
                });
            }
        }
        for fd in fds {
            nix::unistd::close(fd).map_err(|source| Error::MakeControlling { fd, source })?;
        }
        Ok(())
    }
}

/// Window size changes are not emulated; the request is only logged.
pub fn change_window_size(pty: &Endpoint, size: WindowSize) {
    warn!(
        pty = pty.as_raw_fd(),
        rows = size.rows,
        cols = size.cols,
        xpixel = size.pixel_width,
        ypixel = size.pixel_height,
        "change_window_size: not implemented"
    );
}

/// Nothing to release; resources go away when the handles are dropped.
pub fn release(name: &str) {
    warn!(%name, "release: not implemented");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_size_default() {
        let size = WindowSize::default();
        assert_eq!(size.cols, 80);
        assert_eq!(size.rows, 24);
    }

    #[test]
    fn test_window_size_with_pixels() {
        let size = WindowSize::with_pixels(80, 24, 800, 600);
        assert_eq!(size.cols, 80);
        assert_eq!(size.rows, 24);
        assert_eq!(size.pixel_width, 800);
        assert_eq!(size.pixel_height, 600);
    }

    #[test]
    fn test_names_are_unique() {
        let config = Config::default();
        let a = allocate(&config).unwrap();
        let b = allocate(&config).unwrap();
        assert_ne!(a.name, b.name);
        assert!(a.name.starts_with(&config.name_prefix));
        assert_eq!(a.session.name(), a.name);
    }

    #[test]
    fn test_inner_fds_differ_from_handles() {
        let alloc = allocate(&Config::default()).unwrap();
        let inner = alloc.session.inner_fds();
        assert!(!inner.contains(&alloc.pty.as_raw_fd()));
        assert!(!inner.contains(&alloc.tty.as_raw_fd()));
        assert_ne!(inner[0], inner[1]);
    }

    #[test]
    fn test_panicking_worker_is_reported() {
        let handle = spawn_worker(Direction::Input, || panic!("interpreter bug")).unwrap();
        let result = join_worker(Direction::Input, handle);
        assert!(matches!(result, Err(Error::WorkerPanicked("softpty-input"))));
    }

    #[test]
    fn test_finished_worker_result_is_kept() {
        let handle = spawn_worker(Direction::Output, || Err(Error::NoPty("gone".into()))).unwrap();
        let result = join_worker(Direction::Output, handle);
        assert!(matches!(result, Err(Error::NoPty(_))));
    }

    #[test]
    fn test_unimplemented_operations_are_noops() {
        let alloc = allocate(&Config::default()).unwrap();
        change_window_size(&alloc.pty, WindowSize::new(132, 43));
        release(&alloc.name);

        let Allocation { pty, tty, session, .. } = alloc;
        drop(pty);
        drop(tty);
        let report = session.wait();
        assert!(report.output.is_ok());
    }
}
