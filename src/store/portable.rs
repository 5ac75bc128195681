//! The portable store backend.
//!
//! This backend sticks to what every host can do: byte offsets are signed 32-bit quantities. As
//! a consequence, it cannot serve images larger than 2 GB, and it cannot tell an empty file from
//! a failed size query (both come out as a length of zero), so it rejects both.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use super::claim::Claim;
use super::{display_name, Sector, SectorBuf, SectorStore, SECTOR_SIZE};
use crate::report::Reporter;
use crate::Error;

/// The largest number of sectors addressable through signed 32-bit byte offsets.
pub const MAX_SECTORS: Sector = 4_194_303;

/// A store limited to signed 32-bit file offsets.
pub struct Portable {
    /// The open image file and our claim on it, if any.
    file: Option<(File, Claim)>,
    /// The name of the image.
    name: String,
    /// The reporter.
    reporter: Reporter,
}

impl Portable {
    /// Create an unopened store.
    pub fn new(reporter: Reporter) -> Portable {
        Portable {
            file: None,
            name: String::from("unknown"),
            reporter: reporter,
        }
    }

    /// Take ownership of some freshly opened image file.
    fn adopt(&mut self, file: File, path: &Path) -> Result<(), Error> {
        // Drop whatever we held before.
        self.close();

        match Claim::acquire(path) {
            Ok(Some(claim)) => {
                self.file = Some((file, claim));
                Ok(())
            },
            Ok(None) => Err(self.reporter.fatal(err!(Storage, "'{}', file is already in use by another image", self.name))),
            Err(e) => Err(self.reporter.fatal(err!(Storage, "'{}', could not open file ({})", self.name, e))),
        }
    }

    /// Get the open file.
    fn file(&mut self) -> Result<&mut File, Error> {
        match self.file {
            Some((ref mut file, _)) => Ok(file),
            None => Err(self.reporter.fatal(err!(Storage, "'{}', image file is not open", self.name))),
        }
    }
}

impl SectorStore for Portable {
    fn create(&mut self, path: &Path) -> Result<bool, Error> {
        self.name = display_name(path);

        // There is no exclusive creation in the portable subset, so look for an existing file first.
        if path.exists() {
            self.reporter.report(0, &format!("'{}' file already exists", self.name));
            return Ok(false);
        }

        match OpenOptions::new().read(true).write(true).create(true).truncate(true).open(path) {
            Ok(file) => {
                self.adopt(file, path)?;
                Ok(true)
            },
            Err(e) => Err(self.reporter.fatal(err!(Storage, "Could not create file '{}' ({})", self.name, e))),
        }
    }

    fn open(&mut self, path: &Path) -> Result<(), Error> {
        self.name = display_name(path);

        match OpenOptions::new().read(true).write(true).open(path) {
            Ok(file) => self.adopt(file, path),
            Err(e) => Err(self.reporter.fatal(err!(Storage, "Could not open '{}' ({})", self.name, e))),
        }
    }

    fn close(&mut self) {
        self.file = None;
    }

    fn size_sectors(&mut self) -> Result<Sector, Error> {
        let len = self.file()?.seek(SeekFrom::End(0));

        // Anything that does not fit a positive signed 32-bit length is indistinguishable from a
        // failed query.
        let len = match len {
            Ok(len) if len > 0 && len <= i32::max_value() as u64 => len as u32,
            _ => return Err(self.reporter.fatal(err!(Storage, "Could not get file size for '{}', file possibly larger than 2 GB", self.name))),
        };

        if len & 0x1ff != 0 {
            return Err(self.reporter.fatal(err!(Storage, "'{}' not made up of 512 byte sectors", self.name)));
        }

        Ok(len >> 9)
    }

    fn seek_sectors(&mut self, sector: Sector) -> Result<(), Error> {
        let offset = sector as u64 * SECTOR_SIZE as u64;

        let res = if offset <= i32::max_value() as u64 {
            self.file()?.seek(SeekFrom::Start(offset)).map(|_| ())
        } else {
            Err(std::io::ErrorKind::InvalidInput.into())
        };

        res.map_err(|e| self.reporter.fatal(err!(Storage, "'{}', Failed to seek to lba={} ({})", self.name, sector, e)))
    }

    fn read(&mut self, buf: &mut SectorBuf) -> Result<(), Error> {
        let res = self.file()?.read_exact(buf);
        res.map_err(|e| self.reporter.fatal(err!(Storage, "'{}', Failed to read sector ({})", self.name, e)))
    }

    fn write(&mut self, buf: &SectorBuf) -> Result<(), Error> {
        let res = self.file()?.write_all(buf);
        res.map_err(|e| self.reporter.fatal(err!(Storage, "'{}', Failed to write sector ({})", self.name, e)))
    }

    fn max_sectors(&self) -> Sector {
        MAX_SECTORS
    }

    fn name(&self) -> &str {
        &self.name
    }
}
