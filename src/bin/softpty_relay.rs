//! softpty relay
//!
//! Runs a command behind an emulated pty and relays the local terminal to it.
//! Used for trying the line discipline interactively without an SSH server.

use std::ffi::CString;
use std::io::{self, IsTerminal, Read, Write};
use std::os::fd::AsRawFd;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;

use clap::Parser;
use nix::sys::termios::{self, LocalFlags, SetArg, SpecialCharacterIndices, Termios};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{dup2, execvp, fork, setsid, ForkResult};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use softpty::{allocate, Allocation, ChannelKind, Config};

/// CLI arguments for the relay
#[derive(Parser, Debug, Clone)]
#[command(name = "softpty-relay")]
#[command(version)]
#[command(about = "Run a command on a user-space pseudo-terminal", long_about = None)]
struct CliArgs {
    /// Path to custom config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Pass input through without line editing
    #[arg(long)]
    raw: bool,

    /// Do not echo input back
    #[arg(long)]
    no_echo: bool,

    /// Use record-preserving channels so ^D reaches the command as end-of-file.
    /// The command must read with buffers of at least 512 bytes.
    #[arg(long)]
    packet: bool,

    /// Command to run (defaults to $SHELL or /bin/sh)
    #[arg(trailing_var_arg = true, value_name = "CMD")]
    command: Vec<String>,
}

impl CliArgs {
    fn apply(&self, config: &mut Config) {
        if self.raw {
            config.modes.raw = true;
        }
        if self.no_echo {
            config.modes.echo = false;
        }
        if self.packet {
            config.channel = ChannelKind::Packet;
        }
    }

    fn argv(&self) -> Result<Vec<CString>, String> {
        let words = if self.command.is_empty() {
            vec![std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())]
        } else {
            self.command.clone()
        };
        words
            .into_iter()
            .map(|w| CString::new(w).map_err(|e| e.to_string()))
            .collect()
    }
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let args = CliArgs::parse();
    let mut config = match Config::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    args.apply(&mut config);
    if let Err(e) = config.validate() {
        eprintln!("{}", e);
        return ExitCode::FAILURE;
    }

    let argv = match args.argv() {
        Ok(argv) => argv,
        Err(e) => {
            eprintln!("Invalid command: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let alloc = match allocate(&config) {
        Ok(alloc) => alloc,
        Err(e) => {
            eprintln!("Failed to allocate pty: {}", e);
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(
        "Allocated {} (echo: {}, raw: {})",
        alloc.name,
        config.modes.echo,
        config.modes.raw
    );

    match relay(alloc, &argv) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Relay failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn relay(alloc: Allocation, argv: &[CString]) -> io::Result<ExitCode> {
    let Allocation {
        pty,
        tty,
        name,
        session,
    } = alloc;

    let child = match unsafe { fork() }.map_err(io::Error::from)? {
        ForkResult::Parent { child } => child,
        ForkResult::Child => {
            // The command writes output and reads committed lines on the pty
            // side; the local terminal is the tty side, where editing happens
            drop(tty);
            if setsid().is_err() {
                exit_child(1);
            }
            let pty_fd = pty.as_raw_fd();
            for target in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
                if dup2(pty_fd, target).is_err() {
                    exit_child(1);
                }
            }
            // SAFETY: this is the forked child; the worker threads are not here
            if unsafe { session.make_controlling(&pty) }.is_err() {
                exit_child(1);
            }
            drop(pty);
            let _ = execvp(&argv[0], argv);
            exit_child(127);
        }
    };

    // The child leads its own session, so its pid is its process group
    session.foreground().set(child);
    drop(pty);
    tracing::info!("Started {:?} on {} as pid {}", argv[0], name, child);

    let _raw_guard = RawModeGuard::new()?;

    // stdin -> tty
    let tty = Arc::new(tty);
    let writer = Arc::clone(&tty);
    thread::Builder::new()
        .name("relay-stdin".to_string())
        .spawn(move || {
            let mut stdin = io::stdin();
            let mut buf = [0u8; 512];
            loop {
                match stdin.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if (&*writer).write_all(&buf[..n]).is_err() {
                            break;
                        }
                    }
                }
            }
        })?;

    // tty -> stdout
    let mut stdout = io::stdout();
    let mut reader = &*tty;
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                stdout.write_all(&buf[..n])?;
                stdout.flush()?;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }

    let status = waitpid(child, None).map_err(io::Error::from)?;
    // The stdin thread may still hold the handle; shutting it down ends the input worker
    let _ = tty.shutdown();
    let report = session.wait();
    if !report.is_clean() {
        tracing::warn!(
            "Session {} ended with output: {:?}, input: {:?}",
            name,
            report.output,
            report.input
        );
    }

    Ok(match status {
        WaitStatus::Exited(_, 0) => ExitCode::SUCCESS,
        WaitStatus::Exited(_, code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        _ => ExitCode::FAILURE,
    })
}

fn exit_child(code: i32) -> ! {
    // SAFETY: _exit is async-signal-safe and skips atexit handlers of the parent
    unsafe { libc::_exit(code) }
}

/// RAII guard for raw terminal mode on stdin.
///
/// The local terminal must not do its own line editing, otherwise the emulated
/// line discipline only ever sees finished lines.
struct RawModeGuard {
    original: Option<Termios>,
}

impl RawModeGuard {
    fn new() -> io::Result<Self> {
        let stdin = io::stdin();
        if !stdin.is_terminal() {
            return Ok(Self { original: None });
        }

        let original = termios::tcgetattr(&stdin).map_err(io::Error::from)?;
        let mut raw = original.clone();

        // Disable canonical mode, echo and signal generation
        raw.local_flags.remove(LocalFlags::ICANON);
        raw.local_flags.remove(LocalFlags::ECHO);
        raw.local_flags.remove(LocalFlags::ISIG);
        raw.local_flags.remove(LocalFlags::IEXTEN);

        raw.control_chars[SpecialCharacterIndices::VMIN as usize] = 1;
        raw.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;

        termios::tcsetattr(&stdin, SetArg::TCSANOW, &raw).map_err(io::Error::from)?;

        Ok(Self {
            original: Some(original),
        })
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Some(original) = &self.original {
            let _ = termios::tcsetattr(io::stdin(), SetArg::TCSANOW, original);
        }
    }
}
