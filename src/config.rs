//! Server configuration.
//!
//! The command line is parsed through `structopt` into `Options`, which is then checked and
//! resolved into a `Config`.
//!
//! Images are given as positional arguments, the first being the master and the second (if any)
//! the slave. Options applying to a single image follow its path, separated by commas:
//!
//! ```text
//! disk.img                 an existing image
//! disk.img,ro              ... which may not be written
//! disk.img,chs             ... addressed through CHS rather than LBA28
//! disk.img,chs=615:4:17    ... with this geometry
//! new.img,new              a new 32 MB image (65:16:63), unless it exists already
//! new.img,new=100          a new 100 MB image
//! floppy.img,new=1440K     a new 1.44M floppy image
//! ```

use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use std::str::FromStr;

use structopt::StructOpt;

use crate::error::{Error, Kind};
use crate::image::Geometry;
use crate::serial::baud::BaudRate;
use crate::serial::{port, Target, DEFAULT_PIPE, PIPE_PREFIX};
use crate::store::Backend;

quick_error! {
    /// A configuration parsing error.
    #[derive(Debug, PartialEq)]
    pub enum ParseError {
        /// A malformed `C:H:S` geometry.
        Geometry(s: String) {
            display("invalid geometry '{}', expected cylinders:heads:sectors", s)
        }
        /// A malformed image size.
        Size(s: String) {
            display("invalid image size '{}', expected megabytes or kilobytes with a K suffix", s)
        }
        /// An unknown per-image option.
        ImageOption(s: String) {
            display("unknown image option '{}', expected ro, chs[=C:H:S] or new[=SIZE]", s)
        }
        /// An image without a path.
        EmptyPath {
            display("an image path is required")
        }
        /// An unknown baud rate.
        Baud(s: String) {
            display("Unknown Baud Rate \"{}\"", s)
        }
        /// A malformed port or pipe address.
        Target(s: String) {
            display("invalid port or pipe address '{}'", s)
        }
    }
}

impl From<ParseError> for Error {
    fn from(err: ParseError) -> Error {
        Error::new(Kind::Usage, err.to_string())
    }
}

/// The description of one image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageSpec {
    /// The path of the image file.
    pub path: PathBuf,
    /// Are writes rejected?
    pub read_only: bool,
    /// Is the image addressed through CHS?
    pub chs: bool,
    /// Should the image be created if it doesn't exist?
    pub create: bool,
    /// The geometry to use, if given.
    ///
    /// For new images, this is the geometry they are created with.
    pub geometry: Option<Geometry>,
}

impl ImageSpec {
    /// Describe a plain existing image.
    pub fn new<P: Into<PathBuf>>(path: P) -> ImageSpec {
        ImageSpec {
            path: path.into(),
            read_only: false,
            chs: false,
            create: false,
            geometry: None,
        }
    }
}

impl FromStr for ImageSpec {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<ImageSpec, ParseError> {
        let mut parts = s.split(',');

        let path = parts.next().unwrap_or("");
        if path.is_empty() {
            return Err(ParseError::EmptyPath);
        }
        let mut spec = ImageSpec::new(path);

        for option in parts {
            let (key, value) = match option.find('=') {
                Some(n) => (&option[..n], Some(&option[n + 1..])),
                None => (option, None),
            };

            match (&*key.trim().to_ascii_lowercase(), value) {
                ("ro", None) => spec.read_only = true,
                ("chs", None) => spec.chs = true,
                ("chs", Some(geometry)) => {
                    spec.chs = true;
                    spec.geometry = Some(geometry.parse()?);
                },
                ("new", None) => spec.create = true,
                ("new", Some(size)) => {
                    spec.create = true;
                    // An explicit geometry wins over a size.
                    if spec.geometry.is_none() {
                        spec.geometry = Some(Geometry::from_size(size)?);
                    }
                },
                _ => return Err(ParseError::ImageOption(option.to_owned())),
            }
        }

        Ok(spec)
    }
}

/// The command line.
#[derive(Debug, StructOpt)]
#[structopt(name = "serdrive", about = "Serial drive server: serves disk images to a client over a serial line.")]
pub struct Options {
    /// Serial port number to use (default is the first found).
    #[structopt(name = "com-port", short = "c", long = "com-port", conflicts_with = "pipe")]
    pub com_port: Option<u32>,
    /// Serial port to use, by name.
    #[structopt(name = "device", short = "d", long = "device", conflicts_with_all = &["pipe", "com-port"])]
    pub device: Option<String>,
    /// Named pipe mode for emulators (address must begin with "pipe:", default is "pipe:/tmp/serdrive").
    #[structopt(name = "pipe", short = "p", long = "pipe", require_equals = true)]
    pub pipe: Option<Option<String>>,
    /// Baud rate, with the client's rate multiplier in effect (default is 9600, or 115.2K in pipe
    /// mode).
    #[structopt(short = "b", long = "baud")]
    pub baud: Option<BaudRate>,
    /// Disable timeout, useful for long delays when debugging.
    #[structopt(short = "t", long = "no-timeout")]
    pub no_timeout: bool,
    /// Reporting level, repeat for more information (up to 6), or give it as `-v LEVEL`.
    #[structopt(short = "v", long = "verbose", parse(from_occurrences))]
    pub verbose: u8,
    /// Reporting level (0 to 6).
    #[structopt(long = "level")]
    pub level: Option<u8>,
    /// Image file backend: "extended" (LBA28, default) or "portable" (2 GB).
    #[structopt(short = "m", long = "backend", default_value = "extended")]
    pub backend: Backend,
    /// Master image, and optionally slave image: path[,ro][,chs[=C:H:S]][,new[=SIZE]].
    #[structopt(name = "IMAGE", required = true, max_values = 2)]
    pub images: Vec<ImageSpec>,
}

/// The resolved server configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// What to connect to.
    pub target: Target,
    /// The baud rate to use or emulate.
    pub baud: BaudRate,
    /// Does the dispatcher time out on a silent client?
    pub timeout: bool,
    /// The reporting level.
    pub verbosity: u8,
    /// The image file backend.
    pub backend: Backend,
    /// The images, master first.
    pub images: Vec<ImageSpec>,
}

impl Config {
    /// Parse a command line, program name included.
    pub fn from_args<I, T>(args: I) -> Result<Config, structopt::clap::Error>
    where I: IntoIterator<Item = T>, T: Into<OsString> + Clone {
        let args = fold_level(args.into_iter().map(Into::<OsString>::into).collect());
        let options = Options::from_iter_safe(args)?;

        Config::from_options(options).map_err(|err| structopt::clap::Error::with_description(err.desc(), structopt::clap::ErrorKind::InvalidValue))
    }

    /// Check and resolve parsed options.
    pub fn from_options(options: Options) -> Result<Config, Error> {
        let target = match (options.com_port, options.device, options.pipe) {
            (Some(0), _, _) => return Err(err!(Usage, "serial port numbers start at 1")),
            (Some(n), _, _) => Target::Port(port::port_name(n)),
            (None, Some(name), _) => name.parse()?,
            (None, None, Some(Some(address))) => {
                if !address.starts_with(PIPE_PREFIX) {
                    return Err(ParseError::Target(address).into());
                }
                address.parse()?
            },
            (None, None, Some(None)) => DEFAULT_PIPE.parse()?,
            (None, None, None) => Target::Auto,
        };

        let pipe = match target {
            Target::Pipe(_) => true,
            _ => false,
        };
        let baud = options.baud.unwrap_or_else(|| if pipe { BaudRate::default_pipe() } else { BaudRate::default_port() });

        if options.images.is_empty() || options.images.len() > 2 {
            return Err(err!(Usage, "one or two images are required"));
        }

        Ok(Config {
            target: target,
            baud: baud,
            timeout: !options.no_timeout,
            verbosity: options.level.unwrap_or(0).max(options.verbose),
            backend: options.backend,
            images: options.images,
        })
    }
}

/// Is `s` a numeric reporting level?
fn is_level(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Rewrite `-v LEVEL` and `-vLEVEL` into `--level=LEVEL`.
///
/// A bare `-v` (or `-vvv`) is left to count occurrences.
fn fold_level(args: Vec<OsString>) -> Vec<OsString> {
    let mut folded = Vec::with_capacity(args.len());
    let mut args = args.into_iter().peekable();

    while let Some(arg) = args.next() {
        match arg.to_str() {
            Some("-v") | Some("--verbose") => {
                let level = args.peek().and_then(|next| next.to_str()).filter(|next| is_level(next)).map(str::to_owned);
                if let Some(level) = level {
                    args.next();
                    folded.push(OsString::from(format!("--level={}", level)));
                    continue;
                }
            },
            Some(short) if short.starts_with("-v") && is_level(&short[2..]) => {
                folded.push(OsString::from(format!("--level={}", &short[2..])));
                continue;
            },
            _ => (),
        }

        folded.push(arg);
    }

    folded
}

/// Write the usage guidance, including the serial ports present on this host.
pub fn write_usage<W: io::Write>(mut out: W) -> io::Result<()> {
    let mut help = Vec::new();
    // The help is generated into a buffer, which can't fail.
    let _ = Options::clap().write_long_help(&mut help);

    out.write_all(&help)?;
    writeln!(out)?;
    writeln!(out)?;
    writeln!(out, "Serial ports available on this system: {}", port::enumerate())?;
    writeln!(out, "Maximum image size: {} with the extended backend, {} with the portable backend",
             Backend::Extended.limit(), Backend::Portable.limit())?;
    writeln!(out, "Floppy images must be exactly 2.88M, 1.44M, 1.2M, 720K, 360K, 320K, 180K or 160K.")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Config, structopt::clap::Error> {
        Config::from_args(std::iter::once("serdrive").chain(args.iter().cloned()))
    }

    #[test]
    fn defaults() {
        let config = parse(&["disk.img"]).unwrap();

        assert_eq!(config.target, Target::Auto);
        assert_eq!(config.baud.rate, 9600);
        assert!(config.timeout);
        assert_eq!(config.verbosity, 0);
        assert_eq!(config.backend, Backend::Extended);
        assert_eq!(config.images, vec![ImageSpec::new("disk.img")]);
    }

    #[test]
    fn pipe_mode() {
        let config = parse(&["disk.img", "-p"]).unwrap();
        assert_eq!(config.target, DEFAULT_PIPE.parse().unwrap());
        // Pipes default to the fastest plain rate.
        assert_eq!(config.baud.rate, 115200);
        assert_eq!(config.images.len(), 1);

        let config = parse(&["--pipe=pipe:/tmp/emu", "-b", "57.6K", "disk.img"]).unwrap();
        assert_eq!(config.target, Target::Pipe(PathBuf::from("/tmp/emu")));
        assert_eq!(config.baud.rate, 57600);

        assert!(parse(&["--pipe=/tmp/emu", "disk.img"]).is_err());
    }

    #[test]
    fn ports() {
        let config = parse(&["-c", "2", "-b", "115200", "disk.img"]).unwrap();
        assert_eq!(config.target, Target::Port(port::port_name(2)));

        let config = parse(&["-d", "/dev/ttyUSB0", "disk.img"]).unwrap();
        assert_eq!(config.target, Target::Port(String::from("/dev/ttyUSB0")));

        assert!(parse(&["-c", "0", "disk.img"]).is_err());
        assert!(parse(&["-c", "1", "-p", "disk.img"]).is_err());
    }

    #[test]
    fn flags() {
        let config = parse(&["-t", "-vvv", "-m", "portable", "a.img", "b.img"]).unwrap();

        assert!(!config.timeout);
        assert_eq!(config.verbosity, 3);
        assert_eq!(config.backend, Backend::Portable);
        assert_eq!(config.images.len(), 2);
    }

    #[test]
    fn numeric_level() {
        let config = parse(&["-v", "3", "disk.img"]).unwrap();
        assert_eq!(config.verbosity, 3);
        assert_eq!(config.images, vec![ImageSpec::new("disk.img")]);

        assert_eq!(parse(&["-v5", "disk.img"]).unwrap().verbosity, 5);
        assert_eq!(parse(&["--verbose", "2", "disk.img"]).unwrap().verbosity, 2);
        assert_eq!(parse(&["--level=4", "disk.img"]).unwrap().verbosity, 4);

        // Counted when no level follows.
        let config = parse(&["-v", "disk.img", "slave.img"]).unwrap();
        assert_eq!(config.verbosity, 1);
        assert_eq!(config.images.len(), 2);
        assert_eq!(parse(&["-vv", "disk.img"]).unwrap().verbosity, 2);
    }

    #[test]
    fn image_count() {
        assert!(parse(&[]).is_err());
        assert!(parse(&["a.img", "b.img", "c.img"]).is_err());
    }

    #[test]
    fn unknown_baud() {
        assert!(parse(&["-b", "300", "disk.img"]).is_err());
    }

    #[test]
    fn image_specs() {
        let spec: ImageSpec = "disk.img,ro,chs=615:4:17".parse().unwrap();
        assert!(spec.read_only);
        assert!(spec.chs);
        assert!(!spec.create);
        assert_eq!(spec.geometry, Some(Geometry { cylinders: 615, heads: 4, sectors: 17 }));

        let spec: ImageSpec = "floppy.img,new=1440K".parse().unwrap();
        assert!(spec.create);
        assert!(!spec.chs);
        assert_eq!(spec.geometry.unwrap().total_sectors(), 2880);

        let spec: ImageSpec = "new.img,NEW".parse().unwrap();
        assert!(spec.create);
        assert_eq!(spec.geometry, None);
    }

    #[test]
    fn bad_image_specs() {
        assert_eq!(",ro".parse::<ImageSpec>(), Err(ParseError::EmptyPath));
        assert_eq!("disk.img,rw".parse::<ImageSpec>(), Err(ParseError::ImageOption(String::from("rw"))));
        assert!("disk.img,chs=1:2".parse::<ImageSpec>().is_err());
        assert!("disk.img,new=huge".parse::<ImageSpec>().is_err());
    }

    #[test]
    fn usage_lists_ports() {
        let mut out = Vec::new();
        write_usage(&mut out).unwrap();
        let usage = String::from_utf8(out).unwrap();

        assert!(usage.contains("Serial ports available on this system"));
        assert!(usage.contains("--pipe"));
    }
}
