//! Bidirectional byte channels
//!
//! A channel pair is a Unix-domain socket pair. Both endpoints can be read
//! and written; bytes written to one are read, in order, from the other.
//!
//! Writes go through `send(2)` with `MSG_NOSIGNAL` where the platform has it,
//! so writing to a closed peer is an `EPIPE` error rather than a `SIGPIPE`.
//!
//! Packet channels carry records of at most [`MAX_RECORD`] bytes. Writes are
//! split to fit, and a read into a buffer smaller than the pending record is
//! an `InvalidData` error instead of silently dropping its tail.

use std::io::{self, IoSliceMut, Read, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::str::FromStr;

use nix::sys::socket::{
    self, AddressFamily, MsgFlags, Shutdown, SockFlag, SockType, UnixAddr,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::discipline::{Downstream, BUFFER_SIZE};
use crate::error::Result;

/// Socket type backing a channel pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChannelKind {
    /// Byte stream; end-of-file markers are dropped
    #[default]
    Stream,
    /// Record-preserving; a zero-length record reads as end-of-file.
    /// Readers need a buffer of at least [`MAX_RECORD`] bytes.
    Packet,
}

/// Largest record written to a packet channel; the interpreter read size
pub const MAX_RECORD: usize = BUFFER_SIZE;

impl FromStr for ChannelKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "stream" => Ok(ChannelKind::Stream),
            "packet" | "seqpacket" => Ok(ChannelKind::Packet),
            _ => Err(format!("unknown channel kind '{}'", s)),
        }
    }
}

impl ChannelKind {
    fn sock_type(self) -> SockType {
        match self {
            ChannelKind::Stream => SockType::Stream,
            ChannelKind::Packet => SockType::SeqPacket,
        }
    }
}

/// One end of a channel pair
#[derive(Debug)]
pub struct Endpoint {
    fd: OwnedFd,
    kind: ChannelKind,
}

#[cfg(any(target_os = "linux", target_os = "android"))]
const SEND_FLAGS: MsgFlags = MsgFlags::MSG_NOSIGNAL;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const SEND_FLAGS: MsgFlags = MsgFlags::empty();

impl Endpoint {
    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    /// Deliver a zero-length record.
    ///
    /// On packet channels the reader sees a zero-length read and can keep
    /// reading afterwards. Stream channels cannot carry it.
    pub fn send_eof_marker(&self) -> io::Result<()> {
        match self.kind {
            ChannelKind::Packet => {
                socket::send(self.fd.as_raw_fd(), &[], SEND_FLAGS)?;
            }
            ChannelKind::Stream => {
                debug!(fd = self.fd.as_raw_fd(), "stream channel, end-of-file marker dropped");
            }
        }
        Ok(())
    }

    /// Half-close: the peer reads end-of-stream, reading from this end still works
    pub fn shutdown_write(&self) -> io::Result<()> {
        socket::shutdown(self.fd.as_raw_fd(), Shutdown::Write)?;
        Ok(())
    }

    /// Close both directions without releasing the descriptor
    pub fn shutdown(&self) -> io::Result<()> {
        socket::shutdown(self.fd.as_raw_fd(), Shutdown::Both)?;
        Ok(())
    }

    /// Receive one record, failing if it does not fit in `buf`
    fn recv_record(&self, buf: &mut [u8]) -> io::Result<usize> {
        let capacity = buf.len();
        let mut iov = [IoSliceMut::new(buf)];
        let msg =
            socket::recvmsg::<UnixAddr>(self.fd.as_raw_fd(), &mut iov, None, MsgFlags::empty())?;
        if msg.flags.contains(MsgFlags::MSG_TRUNC) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("record truncated by {} byte read buffer", capacity),
            ));
        }
        Ok(msg.bytes)
    }

    /// Send `buf` as records of at most [`MAX_RECORD`] bytes
    fn send_records(&self, buf: &[u8]) -> io::Result<usize> {
        let mut sent = 0;
        for record in buf.chunks(MAX_RECORD) {
            match socket::send(self.fd.as_raw_fd(), record, SEND_FLAGS) {
                Ok(n) => sent += n,
                Err(_) if sent > 0 => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(sent)
    }
}

impl Read for &Endpoint {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.kind {
            ChannelKind::Stream => Ok(nix::unistd::read(self.fd.as_raw_fd(), buf)?),
            ChannelKind::Packet => self.recv_record(buf),
        }
    }
}

impl Write for &Endpoint {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.kind {
            ChannelKind::Stream => Ok(socket::send(self.fd.as_raw_fd(), buf, SEND_FLAGS)?),
            ChannelKind::Packet => self.send_records(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Read for Endpoint {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (&*self).read(buf)
    }
}

impl Write for Endpoint {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (&*self).write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Downstream for &Endpoint {
    fn mark_eof(&mut self) -> io::Result<()> {
        self.send_eof_marker()
    }
}

impl Downstream for Endpoint {
    fn mark_eof(&mut self) -> io::Result<()> {
        self.send_eof_marker()
    }
}

impl AsRawFd for Endpoint {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl AsFd for Endpoint {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl From<Endpoint> for OwnedFd {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.fd
    }
}

/// Create a connected pair of endpoints, both close-on-exec
pub fn channel_pair(kind: ChannelKind) -> Result<(Endpoint, Endpoint)> {
    let (a, b) = socketpair(kind)?;
    Ok((Endpoint { fd: a, kind }, Endpoint { fd: b, kind }))
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn socketpair(kind: ChannelKind) -> Result<(OwnedFd, OwnedFd)> {
    Ok(socket::socketpair(
        AddressFamily::Unix,
        kind.sock_type(),
        None,
        SockFlag::SOCK_CLOEXEC,
    )?)
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn socketpair(kind: ChannelKind) -> Result<(OwnedFd, OwnedFd)> {
    use nix::fcntl::{fcntl, FcntlArg, FdFlag};

    let (a, b) = socket::socketpair(
        AddressFamily::Unix,
        kind.sock_type(),
        None,
        SockFlag::empty(),
    )?;
    for fd in [&a, &b] {
        fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;
    }
    Ok((a, b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_pair_is_bidirectional() {
        let (mut a, mut b) = channel_pair(ChannelKind::Stream).unwrap();
        let mut buf = [0u8; 16];

        a.write_all(b"ping").unwrap();
        let n = b.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ping");

        b.write_all(b"pong").unwrap();
        let n = a.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"pong");
    }

    #[test]
    fn test_pair_is_close_on_exec() {
        use nix::fcntl::{fcntl, FcntlArg, FdFlag};

        let (a, b) = channel_pair(ChannelKind::Stream).unwrap();
        for end in [&a, &b] {
            let flags = fcntl(end.as_raw_fd(), FcntlArg::F_GETFD).unwrap();
            assert!(FdFlag::from_bits_truncate(flags).contains(FdFlag::FD_CLOEXEC));
        }
    }

    #[test]
    fn test_drop_reads_as_end_of_stream() {
        let (mut a, b) = channel_pair(ChannelKind::Stream).unwrap();
        drop(b);
        let mut buf = [0u8; 4];
        assert_eq!(a.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_write_to_closed_peer_is_an_error() {
        let (mut a, b) = channel_pair(ChannelKind::Stream).unwrap();
        drop(b);
        let err = a.write(b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_shutdown_write_half_closes() {
        let (mut a, mut b) = channel_pair(ChannelKind::Stream).unwrap();
        a.shutdown_write().unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(b.read(&mut buf).unwrap(), 0);

        b.write_all(b"ok").unwrap();
        let n = a.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ok");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_packet_eof_marker_keeps_channel_open() {
        let (mut a, mut b) = channel_pair(ChannelKind::Packet).unwrap();
        let mut buf = [0u8; 16];

        a.write_all(b"one").unwrap();
        a.send_eof_marker().unwrap();
        a.write_all(b"two").unwrap();

        let n = b.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"one");
        assert_eq!(b.read(&mut buf).unwrap(), 0);
        let n = b.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"two");
    }

    #[test]
    fn test_stream_eof_marker_is_dropped() {
        let (mut a, mut b) = channel_pair(ChannelKind::Stream).unwrap();
        a.send_eof_marker().unwrap();
        a.write_all(b"after").unwrap();
        let mut buf = [0u8; 16];
        let n = b.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"after");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_packet_writes_are_split_into_records() {
        let (mut a, mut b) = channel_pair(ChannelKind::Packet).unwrap();
        let data = vec![b'r'; MAX_RECORD * 2 + 100];
        a.write_all(&data).unwrap();

        let mut buf = [0u8; MAX_RECORD];
        assert_eq!(b.read(&mut buf).unwrap(), MAX_RECORD);
        assert_eq!(b.read(&mut buf).unwrap(), MAX_RECORD);
        assert_eq!(b.read(&mut buf).unwrap(), 100);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_short_packet_read_is_an_error() {
        let (mut a, mut b) = channel_pair(ChannelKind::Packet).unwrap();
        a.write_all(b"ls\n").unwrap();
        a.write_all(b"pwd\n").unwrap();

        let mut byte = [0u8; 1];
        let err = b.read(&mut byte).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        // Records that fit are delivered whole
        let mut buf = [0u8; 16];
        let n = b.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"pwd\n");
    }

    #[test]
    fn test_channel_kind_from_str() {
        assert_eq!("Stream".parse::<ChannelKind>(), Ok(ChannelKind::Stream));
        assert_eq!("seqpacket".parse::<ChannelKind>(), Ok(ChannelKind::Packet));
        assert!("pipe".parse::<ChannelKind>().is_err());
    }
}
