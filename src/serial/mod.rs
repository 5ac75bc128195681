//! The serial link.
//!
//! This module provides the byte channel between the server and the client, which is either a
//! physical serial port or an emulated line (a local socket an emulator attaches to).
//!
//! The client may go away at any point (an emulator restarting, for example). This shows up as
//! `Transfer::PeerClosed` from reads and writes, and is not an error: the channel raises its
//! `reset_connection` flag, and whoever drives the channel is expected to disconnect and connect
//! again. The channel never does so on its own.

pub mod baud;
#[cfg(unix)]
mod pipe;
pub mod port;

use std::fmt;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::str::FromStr;

use serialport::SerialPort;

use self::baud::BaudRate;
use crate::report::Reporter;
use crate::Error;

/// The prefix marking a pipe address.
pub const PIPE_PREFIX: &str = "pipe:";
/// The pipe address used when none is given.
pub const DEFAULT_PIPE: &str = "pipe:/tmp/serdrive";

/// What to connect to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Target {
    /// The first physical port found.
    Auto,
    /// A named physical port.
    Port(String),
    /// An emulated line at some socket path.
    Pipe(PathBuf),
}

impl FromStr for Target {
    type Err = crate::config::ParseError;

    /// Parse a target.
    ///
    /// Addresses starting with `pipe:` are pipes, anything else names a port.
    fn from_str(s: &str) -> Result<Target, Self::Err> {
        if s.starts_with(PIPE_PREFIX) {
            let path = &s[PIPE_PREFIX.len()..];
            if path.is_empty() {
                return Err(crate::config::ParseError::Target(s.to_owned()));
            }

            Ok(Target::Pipe(PathBuf::from(path)))
        } else if s.is_empty() {
            Err(crate::config::ParseError::Target(s.to_owned()))
        } else {
            Ok(Target::Port(s.to_owned()))
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Target::Auto => f.write_str("(first port found)"),
            Target::Port(ref name) => f.write_str(name),
            Target::Pipe(ref path) => write!(f, "{}{}", PIPE_PREFIX, path.display()),
        }
    }
}

/// The outcome of a read or a write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transfer {
    /// This many bytes were transferred.
    ///
    /// A read of zero bytes means that nothing was available right now.
    Data(usize),
    /// The peer has closed the link.
    PeerClosed,
}

/// The underlying byte stream.
enum Link {
    /// A physical port.
    Port(Box<dyn SerialPort>),
    /// An emulated line.
    #[cfg(unix)]
    Pipe(std::os::unix::net::UnixStream),
}

impl Link {
    /// Is this an emulated line?
    fn is_pipe(&self) -> bool {
        match *self {
            Link::Port(_) => false,
            #[cfg(unix)]
            Link::Pipe(_) => true,
        }
    }
}

impl Read for Link {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match *self {
            Link::Port(ref mut port) => port.read(buf),
            #[cfg(unix)]
            Link::Pipe(ref mut stream) => stream.read(buf),
        }
    }
}

impl Write for Link {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match *self {
            Link::Port(ref mut port) => port.write(buf),
            #[cfg(unix)]
            Link::Pipe(ref mut stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match *self {
            Link::Port(ref mut port) => port.flush(),
            #[cfg(unix)]
            Link::Pipe(ref mut stream) => stream.flush(),
        }
    }
}

/// Does this error mean that the peer went away?
fn is_peer_closed(kind: io::ErrorKind) -> bool {
    match kind {
        io::ErrorKind::BrokenPipe
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::UnexpectedEof => true,
        _ => false,
    }
}

/// Does this error mean that nothing could be moved right now?
fn is_idle(kind: io::ErrorKind) -> bool {
    match kind {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => true,
        _ => false,
    }
}

/// A serial channel.
///
/// At most one link is open at a time.
pub struct Channel {
    /// The open link, if any.
    link: Option<Link>,
    /// The rate of the current (or last) link.
    baud: Option<BaudRate>,
    /// Is the link an emulated line?
    speed_emulation: bool,
    /// Should the link be reopened after the current session?
    reset_connection: bool,
    /// The reporter.
    reporter: Reporter,
}

impl Channel {
    /// Create an unconnected channel.
    pub fn new(reporter: Reporter) -> Channel {
        Channel {
            link: None,
            baud: None,
            speed_emulation: false,
            reset_connection: false,
            reporter: reporter,
        }
    }

    /// Connect to `target` at `baud`.
    ///
    /// Any previous link is closed first. Connecting to a pipe blocks until a peer attaches.
    pub fn connect(&mut self, target: &Target, baud: BaudRate) -> Result<(), Error> {
        self.disconnect();

        self.baud = Some(baud);
        self.speed_emulation = false;
        self.reset_connection = false;

        match *target {
            Target::Auto => match port::discover() {
                Some(name) => self.connect_port(&name, baud),
                None => Err(self.reporter.fatal(err!(Transport, "No physical serial ports found"))),
            },
            Target::Port(ref name) => self.connect_port(name, baud),
            Target::Pipe(ref path) => self.connect_pipe(path, baud),
        }
    }

    /// Open and configure a physical port.
    fn connect_port(&mut self, name: &str, baud: BaudRate) -> Result<(), Error> {
        if !port::exists(name) {
            return Err(self.reporter.fatal(err!(Transport, "Serial port '{}' not found, detected serial ports: {}", name, port::enumerate())));
        }

        self.reporter.report(0, &format!("Opening {} ({} baud)", name, baud));

        match port::open(name, baud) {
            Ok(port) => {
                self.link = Some(Link::Port(port));
                Ok(())
            },
            Err(ref e) if e.kind() == serialport::ErrorKind::InvalidInput => {
                let hint = if baud.rate > port::COMMON_CEILING {
                    "\n    On this serial port, baud rate may be limited to 115.2K"
                } else {
                    ""
                };

                Err(self.reporter.fatal(err!(Transport, "Could not configure '{}': baud rate selected may not be available ({}){}", name, e, hint)))
            },
            Err(e) => Err(self.reporter.fatal(err!(Transport, "Could not open '{}' ({})", name, e))),
        }
    }

    /// Wait for a peer on an emulated line.
    #[cfg(unix)]
    fn connect_pipe(&mut self, path: &std::path::Path, baud: BaudRate) -> Result<(), Error> {
        if !baud.is_emulatable() {
            return Err(self.reporter.fatal(err!(Transport, "Cannot simulate baud rate {} which needs a hardware multiplier", baud)));
        }

        self.reporter.report(0, &format!("Opening named pipe {}{} (simulating {} baud)", PIPE_PREFIX, path.display(), baud));

        match pipe::accept(path) {
            Ok(stream) => {
                self.link = Some(Link::Pipe(stream));
                self.speed_emulation = true;
                self.reset_connection = true;

                Ok(())
            },
            Err(e) => Err(self.reporter.fatal(err!(Transport, "Could not open named pipe {}{} ({})", PIPE_PREFIX, path.display(), e))),
        }
    }

    /// Wait for a peer on an emulated line.
    #[cfg(not(unix))]
    fn connect_pipe(&mut self, path: &std::path::Path, _: BaudRate) -> Result<(), Error> {
        Err(self.reporter.fatal(err!(Transport, "Named pipe {}{} is not supported on this host", PIPE_PREFIX, path.display())))
    }

    /// Close the link, if any.
    pub fn disconnect(&mut self) {
        if self.link.take().is_some() {
            self.reporter.report(2, "Link closed");
        }
    }

    /// Read up to `buf.len()` bytes.
    ///
    /// On a physical port, this returns right away with whatever is available, which may be
    /// nothing at all.
    pub fn read_characters(&mut self, buf: &mut [u8]) -> Result<Transfer, Error> {
        let (res, pipe) = match self.link {
            Some(ref mut link) => (link.read(buf), link.is_pipe()),
            None => return Err(self.reporter.fatal(err!(Transport, "read serial failed (not connected)"))),
        };

        match res {
            // End of stream. A port may legitimately have nothing for us.
            Ok(0) if pipe && !buf.is_empty() => Ok(self.peer_closed()),
            Ok(n) => Ok(Transfer::Data(n)),
            Err(ref e) if is_idle(e.kind()) => Ok(Transfer::Data(0)),
            Err(ref e) if is_peer_closed(e.kind()) => Ok(self.peer_closed()),
            Err(e) => Err(self.reporter.fatal(err!(Transport, "read serial failed ({})", e))),
        }
    }

    /// Write all of `buf`.
    pub fn write_characters(&mut self, buf: &[u8]) -> Result<Transfer, Error> {
        let mut written = 0;

        while written < buf.len() {
            let res = match self.link {
                Some(ref mut link) => link.write(&buf[written..]),
                None => return Err(self.reporter.fatal(err!(Transport, "write serial failed (not connected)"))),
            };

            match res {
                Ok(0) => return Ok(self.peer_closed()),
                Ok(n) => written += n,
                // The port buffer is full; wait for it to drain.
                Err(ref e) if is_idle(e.kind()) => std::thread::yield_now(),
                Err(ref e) if is_peer_closed(e.kind()) => return Ok(self.peer_closed()),
                Err(e) => return Err(self.reporter.fatal(err!(Transport, "write serial failed after {} of {} bytes ({})", written, buf.len(), e))),
            }
        }

        Ok(Transfer::Data(written))
    }

    /// Note that the peer went away.
    fn peer_closed(&mut self) -> Transfer {
        self.reporter.report(1, "Peer closed the link");
        self.reset_connection = true;

        Transfer::PeerClosed
    }

    /// Is a link open?
    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    /// Is the link an emulated line?
    pub fn speed_emulation(&self) -> bool {
        self.speed_emulation
    }

    /// Should the link be reopened after the current session?
    pub fn reset_connection(&self) -> bool {
        self.reset_connection
    }

    /// The rate of the current (or last) link.
    pub fn baud(&self) -> Option<BaudRate> {
        self.baud
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_target() {
        assert_eq!("pipe:/tmp/x".parse::<Target>().unwrap(), Target::Pipe(PathBuf::from("/tmp/x")));
        assert_eq!("/dev/ttyUSB0".parse::<Target>().unwrap(), Target::Port(String::from("/dev/ttyUSB0")));
        assert!("pipe:".parse::<Target>().is_err());
        assert!("".parse::<Target>().is_err());
    }

    #[test]
    fn target_display() {
        assert_eq!(DEFAULT_PIPE.parse::<Target>().unwrap().to_string(), DEFAULT_PIPE);
    }

    #[test]
    fn unconnected_channel() {
        let mut channel = Channel::new(Reporter::discard());
        let mut buf = [0; 4];

        assert!(!channel.is_connected());
        assert!(channel.read_characters(&mut buf).is_err());
        assert!(channel.write_characters(b"x").is_err());
        // Idempotent.
        channel.disconnect();
        channel.disconnect();
    }

    #[test]
    fn missing_port() {
        let mut channel = Channel::new(Reporter::discard());
        let target = Target::Port(String::from("/nonexistent/ttyS99"));

        let err = channel.connect(&target, BaudRate::default_port()).unwrap_err();
        assert!(err.desc().contains("not found"));
        assert!(!channel.is_connected());
    }

    #[test]
    fn idle_and_closed_errors() {
        assert!(is_idle(io::ErrorKind::TimedOut));
        assert!(is_peer_closed(io::ErrorKind::BrokenPipe));
        assert!(!is_peer_closed(io::ErrorKind::PermissionDenied));
    }
}
