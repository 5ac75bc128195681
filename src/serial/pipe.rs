//! Emulated serial lines.
//!
//! Emulators attach to the server through a local stream socket rather than a real serial port.
//! The server listens on the socket path, takes exactly one peer, and gives up the path again, so
//! that the next session starts from scratch.

use std::fs;
use std::io;
use std::os::unix::fs::FileTypeExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};

/// Removes a socket path when dropped.
struct Unlink(PathBuf);

impl Drop for Unlink {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.0);
    }
}

/// Remove a socket left behind at `path` by an earlier run.
///
/// Anything at `path` which isn't a socket is left alone, and reported as an error.
fn clear_stale(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(ref metadata) if metadata.file_type().is_socket() => fs::remove_file(path),
        Ok(_) => Err(io::Error::new(io::ErrorKind::AlreadyExists, "path is in use by something other than a socket")),
        Err(ref e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Listen at `path` and block until a peer connects.
///
/// The listener and its path are released before returning, whether a peer was accepted or not.
pub fn accept(path: &Path) -> io::Result<UnixStream> {
    clear_stale(path)?;

    let listener = UnixListener::bind(path)?;
    let _unlink = Unlink(path.to_owned());
    let (stream, _) = listener.accept()?;

    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::thread;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn accept_one_peer() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pipe");

        let client = {
            let path = path.clone();
            thread::spawn(move || {
                let mut stream = loop {
                    match UnixStream::connect(&path) {
                        Ok(stream) => break stream,
                        Err(_) => thread::sleep(Duration::from_millis(5)),
                    }
                };
                stream.write_all(b"hi").unwrap();
            })
        };

        let mut stream = accept(&path).unwrap();
        // The path is given up as soon as the peer is in.
        assert!(!path.exists());

        let mut buf = [0; 2];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hi");

        client.join().unwrap();
    }

    #[test]
    fn stale_socket_is_replaced() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pipe");
        // A listener which died without cleaning up.
        drop(UnixListener::bind(&path).unwrap());
        assert!(path.exists());

        clear_stale(&path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn regular_file_is_kept() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("disk.img");
        fs::write(&path, b"data").unwrap();

        assert!(accept(&path).is_err());
        assert_eq!(fs::read(&path).unwrap(), b"data");
    }
}
