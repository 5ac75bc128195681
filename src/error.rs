//! Fatal conditions.
//!
//! Everything that goes wrong in the server is fatal, except the peer closing the link (which is
//! not an error at all, see `serial::Transfer`). Fatal conditions are carried as values up to the
//! top level, which reports them and terminates.

use std::{error, fmt};

/// The category of an error.
///
/// This enum contains variants representing general categories of server errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kind {
    /// A disk image could not be created, opened, sized, or transferred.
    Storage,
    /// The serial port or pipe could not be set up or used.
    Transport,
    /// The configuration was malformed.
    ///
    /// These are near-fatal: besides the message, the user is shown the usage guidance.
    Usage,
}

/// A server error.
#[derive(PartialEq)]
pub struct Error {
    /// The type ("kind") of the error.
    pub kind: Kind,
    /// Description of the error.
    desc: Box<str>,
}

impl Error {
    /// Create an error of some kind from its description.
    ///
    /// Usually you want the `err!()` macro instead.
    pub fn new<S: Into<String>>(kind: Kind, desc: S) -> Error {
        Error {
            kind: kind,
            desc: desc.into().into_boxed_str(),
        }
    }

    /// The human-readable description.
    pub fn desc(&self) -> &str {
        &self.desc
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.desc)
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.desc)
    }
}

impl error::Error for Error {}

/// Create a server error.
///
/// This constructs a value of type `Error` defined by the given parameter.
///
/// The first argument defines the kind (`Kind`) of the error. There is no need for importing the
/// type, as it is already prefixed with the enum.
///
/// The rest arguments are the usual formatting syntax (like `println!()`) representing the
/// `Display` implementation of the error.
#[macro_export]
macro_rules! err {
    ($kind:ident, $($rest:tt)*) => {
        $crate::error::Error::new($crate::error::Kind::$kind, format!($($rest)*))
    };
}

#[cfg(test)]
mod tests {
    use super::Kind;

    #[test]
    fn macro_formats() {
        let x = 42;
        let error = err!(Storage, "'{}', sector {} unreadable", "disk.img", x);

        assert_eq!(error.kind, Kind::Storage);
        assert_eq!(error.to_string(), "'disk.img', sector 42 unreadable");
        assert_eq!(format!("{:?}", error), "Storage: 'disk.img', sector 42 unreadable");
    }
}
