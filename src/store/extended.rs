//! The extended store backend.
//!
//! This backend works with the true 64-bit length of the image file, but the client only speaks
//! LBA28, so the length is repacked into a 28-bit sector number. The length is treated as two
//! 32-bit halves, `high` and `low`:
//!
//! ```text
//! sector = (high << 23) | (low >> 9)
//! ```
//!
//! The low 23 bits of the sector number come from `low` and the high 5 bits from `high`, so any
//! file with `high > 0x1f` is out of range. Seeking does the inverse.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use super::claim::Claim;
use super::{display_name, Sector, SectorBuf, SectorStore, SECTOR_SIZE};
use crate::report::Reporter;
use crate::Error;

/// The LBA28 limit.
///
/// (One more sector would fit, but it is not worth pushing it.)
pub const MAX_SECTORS: Sector = 0x0FFF_FFFF;
/// The largest high half of a file length that still fits LBA28.
const MAX_HIGH: u32 = 0x1f;

/// Pack a byte length, given as two 32-bit halves, into a sector count.
///
/// This assumes `high <= 0x1f`; larger values are cut off.
pub fn pack_length(high: u32, low: u32) -> Sector {
    ((high << 23) & 0xff80_0000) | ((low >> 9) & 0x007f_ffff)
}

/// Unpack a sector number into the byte offset of the sector, given as two 32-bit halves.
///
/// The return value is `(high, low)`.
pub fn unpack_sector(sector: Sector) -> (u32, u32) {
    (sector >> 23, sector.wrapping_shl(9))
}

/// A store covering the LBA28 range.
pub struct Extended {
    /// The open image file and our claim on it, if any.
    file: Option<(File, Claim)>,
    /// The name of the image.
    name: String,
    /// The reporter.
    reporter: Reporter,
}

impl Extended {
    /// Create an unopened store.
    pub fn new(reporter: Reporter) -> Extended {
        Extended {
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

impl SectorStore for Extended {
    fn create(&mut self, path: &Path) -> Result<bool, Error> {
        self.name = display_name(path);

        match OpenOptions::new().read(true).write(true).create_new(true).open(path) {
            Ok(file) => {
                self.adopt(file, path)?;
                Ok(true)
            },
            Err(ref e) if e.kind() == io::ErrorKind::AlreadyExists => {
                self.reporter.report(0, &format!("'{}', file already exists", self.name));
                Ok(false)
            },
            Err(e) => Err(self.reporter.fatal(err!(Storage, "'{}', could not create file ({})", self.name, e))),
        }
    }

    fn open(&mut self, path: &Path) -> Result<(), Error> {
        self.name = display_name(path);

        match OpenOptions::new().read(true).write(true).open(path) {
            Ok(file) => self.adopt(file, path),
            Err(e) => Err(self.reporter.fatal(err!(Storage, "'{}', could not open file ({})", self.name, e))),
        }
    }

    fn close(&mut self) {
        if let Some((file, _claim)) = self.file.take() {
            // Closing can't fail in a way we could act upon, but it is worth a word.
            if let Err(e) = file.sync_all() {
                self.reporter.warn(&format!("'{}', could not flush file on close ({})", self.name, e));
            }
        }
    }

    fn size_sectors(&mut self) -> Result<Sector, Error> {
        let len = match self.file()?.metadata() {
            Ok(metadata) => metadata.len(),
            Err(e) => return Err(self.reporter.fatal(err!(Storage, "'{}', could not retrieve file size ({})", self.name, e))),
        };

        let high = (len >> 32) as u32;
        let low = len as u32;

        if low & 0x1ff != 0 {
            return Err(self.reporter.fatal(err!(Storage, "'{}', file size is not a multiple of 512 byte sectors", self.name)));
        }
        if high > MAX_HIGH {
            return Err(self.reporter.fatal(err!(Storage, "'{}', file size greater than LBA28 limit of 137,438,952,960 bytes", self.name)));
        }

        Ok(pack_length(high, low))
    }

    fn seek_sectors(&mut self, sector: Sector) -> Result<(), Error> {
        if sector > MAX_SECTORS {
            return Err(self.reporter.fatal(err!(Storage, "'{}', Failed to seek to lba={} (beyond LBA28)", self.name, sector)));
        }

        let (high, low) = unpack_sector(sector);
        let offset = (high as u64) << 32 | low as u64;

        let res = self.file()?.seek(SeekFrom::Start(offset));
        res.map(|_| ())
            .map_err(|e| self.reporter.fatal(err!(Storage, "'{}', Failed to seek to lba={} ({})", self.name, sector, e)))
    }

    fn read(&mut self, buf: &mut SectorBuf) -> Result<(), Error> {
        match self.file()?.read(buf) {
            Ok(SECTOR_SIZE) => Ok(()),
            Ok(n) => Err(self.reporter.fatal(err!(Storage, "'{}', read failed (got {} of {} bytes)", self.name, n, SECTOR_SIZE))),
            Err(e) => Err(self.reporter.fatal(err!(Storage, "'{}', read failed ({})", self.name, e))),
        }
    }

    fn write(&mut self, buf: &SectorBuf) -> Result<(), Error> {
        match self.file()?.write(buf) {
            Ok(SECTOR_SIZE) => Ok(()),
            Ok(n) => Err(self.reporter.fatal(err!(Storage, "'{}', write failed (put {} of {} bytes)", self.name, n, SECTOR_SIZE))),
            Err(e) => Err(self.reporter.fatal(err!(Storage, "'{}', write failed ({})", self.name, e))),
        }
    }

    fn max_sectors(&self) -> Sector {
        MAX_SECTORS
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    /// Check that packing inverts unpacking for `sector`.
    fn check(sector: Sector) {
        let (high, low) = unpack_sector(sector);

        assert!(high <= MAX_HIGH);
        assert_eq!(low & 0x1ff, 0);
        // The halves really are the byte offset.
        assert_eq!((high as u64) << 32 | low as u64, sector as u64 * 512);
        assert_eq!(pack_length(high, low), sector);
    }

    #[test]
    fn packing_bijection() {
        // Every boundary of the 23/5 bit split.
        for bit in 0..28 {
            check(1 << bit);
            check((1 << bit) - 1);
        }
        check(0);
        check(MAX_SECTORS);
        check(0x007f_ffff);
        check(0x0080_0000);

        // And a walk over the whole range.
        let mut sector: Sector = 0;
        while sector <= MAX_SECTORS {
            check(sector);
            sector += 65_521;
        }
    }

    #[test]
    fn packing_known_values() {
        // 65:16:63 geometry.
        assert_eq!(pack_length(0, 65_520 * 512), 65_520);
        // 4 GB.
        assert_eq!(pack_length(1, 0), 0x0080_0000);
        // The LBA28 limit itself.
        assert_eq!(pack_length(0x1f, 0xffff_fe00), MAX_SECTORS);
    }

    #[test]
    fn oversized_file_is_fatal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("huge.img");

        {
            // Sparse, so this is cheap.
            let file = File::create(&path).unwrap();
            file.set_len((MAX_HIGH as u64 + 1) << 32).unwrap();
        }

        let mut store = Extended::new(Reporter::discard());
        store.open(&path).unwrap();
        let err = store.size_sectors().unwrap_err();
        assert!(err.desc().contains("LBA28"));
    }

    #[test]
    fn empty_file_is_fine() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("new.img");

        let mut store = Extended::new(Reporter::discard());
        assert!(store.create(&path).unwrap());
        assert_eq!(store.size_sectors().unwrap(), 0);
    }

    #[test]
    fn seek_beyond_lba28() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("disk.img");

        let mut store = Extended::new(Reporter::discard());
        store.create(&path).unwrap();
        store.seek_sectors(MAX_SECTORS).unwrap();
        assert!(store.seek_sectors(MAX_SECTORS + 1).is_err());
    }

    #[test]
    fn round_trip_past_4gb() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("big.img");

        let mut store = Extended::new(Reporter::discard());
        store.create(&path).unwrap();

        // The first sector with a non-zero high half, and the last one of LBA28.
        for &(sector, fill) in &[(0x0080_0000, 0x3c), (MAX_SECTORS, 0xc3)] {
            let data = [fill; SECTOR_SIZE];
            store.seek_sectors(sector).unwrap();
            store.write(&data).unwrap();
        }

        for &(sector, fill) in &[(0x0080_0000, 0x3c), (MAX_SECTORS, 0xc3)] {
            let mut buf = [0; SECTOR_SIZE];
            store.seek_sectors(sector).unwrap();
            store.read(&mut buf).unwrap();
            assert!(buf.iter().all(|&byte| byte == fill), "sector {:#x}", sector);
        }

        // The sector just below the boundary is still a hole.
        let mut buf = [0xff; SECTOR_SIZE];
        store.seek_sectors(0x007f_ffff).unwrap();
        store.read(&mut buf).unwrap();
        assert!(buf.iter().all(|&byte| byte == 0));

        // Written through to the byte offset it belongs at.
        store.close();
        let mut file = File::open(&path).unwrap();
        file.seek(SeekFrom::Start(1 << 32)).unwrap();
        file.read_exact(&mut buf).unwrap();
        assert!(buf.iter().all(|&byte| byte == 0x3c));
        assert_eq!(file.metadata().unwrap().len(), (MAX_SECTORS as u64 + 1) * 512);
    }

    #[test]
    fn size_past_4gb() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("big.img");

        {
            let file = File::create(&path).unwrap();
            file.set_len((0x0080_0000 + 3) * 512).unwrap();
        }

        let mut store = Extended::new(Reporter::discard());
        store.open(&path).unwrap();
        assert_eq!(store.size_sectors().unwrap(), 0x0080_0003);
    }

    #[test]
    fn held_file_cannot_be_opened_twice() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("disk.img");

        let mut first = Extended::new(Reporter::discard());
        first.create(&path).unwrap();

        let mut second = Extended::new(Reporter::discard());
        assert!(second.open(&path).is_err());

        first.close();
        second.open(&path).unwrap();
    }
}
