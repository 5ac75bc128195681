//! Exclusive access to image files.
//!
//! Two stores writing the same image would silently corrupt it, so every store claims the
//! canonical path of its file for as long as it holds it open.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

lazy_static! {
    /// The canonical paths of all image files currently held by some store.
    static ref CLAIMED: Mutex<HashSet<PathBuf>> = Mutex::new(HashSet::new());
}

/// A claim on an image file.
///
/// The claim is released when this is dropped.
#[derive(Debug)]
pub struct Claim {
    /// The canonical path of the claimed file.
    path: PathBuf,
}

impl Claim {
    /// Claim the (existing) file at `path`.
    ///
    /// This returns `Ok(None)` if some other store already holds it.
    pub fn acquire(path: &Path) -> io::Result<Option<Claim>> {
        let path = path.canonicalize()?;

        if CLAIMED.lock().insert(path.clone()) {
            Ok(Some(Claim { path: path }))
        } else {
            Ok(None)
        }
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        CLAIMED.lock().remove(&self.path);
    }
}
