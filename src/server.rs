//! The server loop.
//!
//! The server opens the images once, and then keeps (re)connecting the channel and handing both
//! to the dispatcher for as long as sessions end with the peer closing the link.

use std::ffi::OsString;
use std::io;

use structopt::clap;

use crate::config::{self, Config};
use crate::error::Kind;
use crate::image::FlatImage;
use crate::report::Reporter;
use crate::serial::Channel;
use crate::Error;

/// The banner printed on startup.
const BANNER: &str = "serdrive - Serial Drive Server";

/// Everything a dispatcher gets to work with during a session.
pub struct Session<'a> {
    /// The connected channel.
    pub channel: &'a mut Channel,
    /// The images, master first.
    pub images: &'a mut [FlatImage],
    /// Should silent clients time out?
    pub timeout: bool,
    /// The reporter.
    pub reporter: &'a Reporter,
}

/// A sector request dispatcher.
///
/// This decodes the client's requests from the channel and serves them from the images. It
/// returns when the session is over, which is normally when a read or write on the channel gives
/// `Transfer::PeerClosed`.
pub trait Dispatch {
    /// Serve one session.
    fn serve(&mut self, session: Session) -> Result<(), Error>;
}

impl<F> Dispatch for F
where F: FnMut(Session) -> Result<(), Error> {
    fn serve(&mut self, session: Session) -> Result<(), Error> {
        self(session)
    }
}

/// The server.
pub struct Server {
    /// The configuration.
    config: Config,
    /// The open images.
    ///
    /// These live as long as the server, across any number of sessions.
    images: Vec<FlatImage>,
    /// The channel to the client.
    channel: Channel,
    /// The reporter.
    reporter: Reporter,
}

impl Server {
    /// Open the images of some configuration.
    pub fn new(config: Config, reporter: Reporter) -> Result<Server, Error> {
        let images = config.images.iter()
            .map(|spec| FlatImage::open(config.backend.store(&reporter), spec, &reporter))
            .collect::<Result<Vec<_>, _>>()?;
        let channel = Channel::new(reporter.child(o!("target" => config.target.to_string())));

        Ok(Server {
            config: config,
            images: images,
            channel: channel,
            reporter: reporter,
        })
    }

    /// Serve sessions until one ends without a reset, or something fails.
    pub fn run<D: Dispatch>(&mut self, dispatch: &mut D) -> Result<(), Error> {
        loop {
            self.channel.connect(&self.config.target, self.config.baud)?;

            let res = dispatch.serve(Session {
                channel: &mut self.channel,
                images: &mut self.images,
                timeout: self.config.timeout,
                reporter: &self.reporter,
            });

            // Never leave the link open behind us, not even on failure.
            self.channel.disconnect();
            res?;

            if !self.channel.reset_connection() {
                return Ok(());
            }

            self.reporter.report(0, "Serial connection closed, reset...");
        }
    }

    /// The open images, master first.
    pub fn images(&mut self) -> &mut [FlatImage] {
        &mut self.images
    }

    /// The configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }
}

/// Turn a fatal error into an exit status.
///
/// The error itself has already been reported, and the log flushed; usage errors get the usage
/// guidance on top.
fn exit_status(err: &Error) -> i32 {
    if err.kind == Kind::Usage {
        eprintln!();
        let _ = config::write_usage(io::stderr());
    }

    1
}

/// Run the server from a command line, program name included.
///
/// This is the whole program, short of the dispatcher. It returns the exit status.
pub fn run_from_args<I, T, D>(args: I, dispatch: &mut D) -> i32
where I: IntoIterator<Item = T>, T: Into<OsString> + Clone, D: Dispatch {
    let config = match Config::from_args(args) {
        Ok(config) => config,
        Err(ref e) if e.kind == clap::ErrorKind::HelpDisplayed || e.kind == clap::ErrorKind::VersionDisplayed => {
            println!("{}", e.message);
            return 0;
        },
        Err(e) => {
            eprintln!("{}", e.message);
            eprintln!();
            let _ = config::write_usage(io::stderr());
            return 1;
        },
    };

    let reporter = Reporter::terminal(config.verbosity);
    reporter.report(0, BANNER);

    let res = Server::new(config, reporter.clone()).and_then(|mut server| server.run(dispatch));

    // The last handle on the async drain goes here, which flushes it ahead of the usage text.
    drop(reporter);

    match res {
        Ok(()) => 0,
        Err(err) => exit_status(&err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_image_is_fatal() {
        let mut dispatch = |_: Session| -> Result<(), Error> { panic!("no session expected") };

        let status = run_from_args(vec!["serdrive", "/nonexistent/disk.img"], &mut dispatch);
        assert_eq!(status, 1);
    }

    #[test]
    fn bad_command_line() {
        let mut dispatch = |_: Session| -> Result<(), Error> { panic!("no session expected") };

        assert_eq!(run_from_args(vec!["serdrive", "-b", "300", "disk.img"], &mut dispatch), 1);
        assert_eq!(run_from_args(vec!["serdrive", "--help"], &mut dispatch), 0);
    }
}
