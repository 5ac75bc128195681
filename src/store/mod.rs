//! Sector stores.
//!
//! This module provides sector-granular access to flat disk image files.
//!
//! The sector size is fixed to 512, since this is what the client BIOS speaks. Two backends are
//! provided, which differ in how large a file they can address:
//!
//! - `Portable` restricts itself to signed 32-bit byte offsets (about 2 GB).
//! - `Extended` handles the full LBA28 range (about 137 GB).

mod claim;
mod extended;
mod portable;

use std::path::Path;
use std::str::FromStr;

use crate::report::Reporter;

pub use self::extended::{pack_length, unpack_sector, Extended};
pub use self::portable::Portable;

/// The logical sector size.
pub const SECTOR_SIZE: usize = 512;

/// A disk sector number.
pub type Sector = u32;
/// A buffer of sector size.
pub type SectorBuf = [u8; SECTOR_SIZE];

/// A disk image file addressed in sectors.
///
/// This trait acts similarly to `std::io::{Read, Write, Seek}`, but is designed specifically for
/// disk images: every position is a sector number and every transfer is exactly one sector.
///
/// A store starts out without any file. It gets one through `create()` or `open()`, and gives it
/// up again through `close()`.
pub trait SectorStore {
    /// Create a new, empty image file.
    ///
    /// If the file already exists, it is left untouched and `false` is returned, in which case
    /// the caller ought to `open()` it instead.
    fn create(&mut self, path: &Path) -> Result<bool, crate::Error>;
    /// Open an existing image file for reading and writing.
    fn open(&mut self, path: &Path) -> Result<(), crate::Error>;
    /// Release the file, if any.
    ///
    /// This is safe to call multiple times, as well as on a store that was never opened.
    fn close(&mut self);

    /// The number of sectors in the image file.
    fn size_sectors(&mut self) -> Result<Sector, crate::Error>;
    /// Move to sector `sector`.
    fn seek_sectors(&mut self, sector: Sector) -> Result<(), crate::Error>;
    /// Read the current sector into `buf`, and move to the next one.
    fn read(&mut self, buf: &mut SectorBuf) -> Result<(), crate::Error>;
    /// Write `buf` into the current sector, and move to the next one.
    fn write(&mut self, buf: &SectorBuf) -> Result<(), crate::Error>;

    /// The largest image this backend can address, in sectors.
    fn max_sectors(&self) -> Sector;
    /// The name of the image, for diagnostics.
    fn name(&self) -> &str;
}

/// A store backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backend {
    /// Signed 32-bit byte offsets.
    Portable,
    /// LBA28 sector numbers over 64-bit byte offsets.
    Extended,
}

impl Backend {
    /// Build an unopened store of this backend.
    pub fn store(self, reporter: &Reporter) -> Box<dyn SectorStore> {
        match self {
            Backend::Portable => Box::new(Portable::new(reporter.clone())),
            Backend::Extended => Box::new(Extended::new(reporter.clone())),
        }
    }

    /// The largest image this backend can address, in sectors.
    pub fn max_sectors(self) -> Sector {
        match self {
            Backend::Portable => portable::MAX_SECTORS,
            Backend::Extended => extended::MAX_SECTORS,
        }
    }

    /// The size limit, in human terms.
    pub fn limit(self) -> &'static str {
        match self {
            Backend::Portable => "2048 MB (signed 32-bit file size limit)",
            Backend::Extended => "137438 MB (LBA28 limit)",
        }
    }
}

impl Default for Backend {
    fn default() -> Backend {
        Backend::Extended
    }
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Backend, String> {
        match &*s.to_ascii_lowercase() {
            "portable" | "a" => Ok(Backend::Portable),
            "extended" | "b" => Ok(Backend::Extended),
            _ => Err(format!("unknown store backend '{}', expected 'portable' or 'extended'", s)),
        }
    }
}

/// Turn a path into a display name.
fn display_name(path: &Path) -> String {
    path.display().to_string()
}
