//! Flat disk images.
//!
//! A flat image is nothing but the raw sectors of a disk, back to back, with no header. This
//! module adds the bookkeeping around a sector store that the dispatcher needs: the geometry of
//! the disk, range checks, write protection, and creation of blank images.

use std::convert::TryFrom;
use std::fmt;
use std::str::FromStr;

use crate::config::{ImageSpec, ParseError};
use crate::report::Reporter;
use crate::store::{Backend, Sector, SectorBuf, SectorStore, SECTOR_SIZE};
use crate::Error;

/// Heads of a derived hard disk geometry.
const DERIVED_HEADS: u32 = 16;
/// Sectors per track of a derived hard disk geometry.
const DERIVED_SECTORS: u32 = 63;

/// The geometry of a newly created image, unless told otherwise.
///
/// This makes a 32 MB disk.
pub const DEFAULT_NEW_GEOMETRY: Geometry = Geometry {
    cylinders: 65,
    heads: 16,
    sectors: 63,
};

/// A cylinder/head/sector geometry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Geometry {
    /// The number of cylinders.
    pub cylinders: u32,
    /// The number of heads.
    pub heads: u32,
    /// The number of sectors per track.
    pub sectors: u32,
}

impl Geometry {
    /// The number of sectors addressable through this geometry.
    pub fn total_sectors(&self) -> u64 {
        self.cylinders as u64 * self.heads as u64 * self.sectors as u64
    }

    /// Derive a geometry for a disk of `total` sectors.
    ///
    /// Floppy sizes get their standard geometry. Anything else becomes a hard disk with 16 heads
    /// and 63 sectors per track, rounding the cylinder count down.
    pub fn derive(total: u64) -> Geometry {
        if let Some(floppy) = Floppy::find(total) {
            return floppy.geometry;
        }

        Geometry {
            // Saturated, so that sizes past any backend limit stay past it.
            cylinders: u32::try_from(total / (DERIVED_HEADS * DERIVED_SECTORS) as u64).unwrap_or(u32::max_value()),
            heads: DERIVED_HEADS,
            sectors: DERIVED_SECTORS,
        }
    }

    /// Parse the size of a new image.
    ///
    /// The size is given in megabytes, or in kilobytes with a `K` suffix (e.g. `360K`). Note that
    /// like with disk vendors, a megabyte is 1000 kilobytes here. Sizes beyond LBA28 are rejected.
    pub fn from_size(s: &str) -> Result<Geometry, ParseError> {
        let (number, kilo) = match s.find(|c| c == 'k' || c == 'K') {
            Some(n) => (&s[..n], true),
            None => (s, false),
        };

        let size = match number.trim().parse::<f64>() {
            Ok(size) if size > 0.0 && size.is_finite() => size,
            _ => return Err(ParseError::Size(s.to_owned())),
        };

        // Two sectors to a kilobyte.
        let mut sectors = size * 2.0;
        if !kilo {
            sectors *= 1000.0;
        }

        if sectors > Backend::Extended.max_sectors() as f64 {
            return Err(ParseError::Size(s.to_owned()));
        }

        let geometry = Geometry::derive(sectors as u64);
        if geometry.total_sectors() == 0 {
            return Err(ParseError::Size(s.to_owned()));
        }

        Ok(geometry)
    }
}

impl FromStr for Geometry {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Geometry, ParseError> {
        let mut parts = s.split(':').map(|part| part.trim().parse::<u32>());

        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(Ok(cylinders)), Some(Ok(heads)), Some(Ok(sectors)), None)
                if cylinders > 0 && heads > 0 && sectors > 0 => Ok(Geometry {
                    cylinders: cylinders,
                    heads: heads,
                    sectors: sectors,
                }),
            _ => Err(ParseError::Geometry(s.to_owned())),
        }
    }
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}:{}", self.cylinders, self.heads, self.sectors)
    }
}

/// A standard floppy format.
#[derive(Debug, PartialEq, Eq)]
pub struct Floppy {
    /// The label of the format.
    pub label: &'static str,
    /// The geometry of the format.
    pub geometry: Geometry,
}

/// Shorthand for the floppy table.
const fn floppy(label: &'static str, cylinders: u32, heads: u32, sectors: u32) -> Floppy {
    Floppy {
        label: label,
        geometry: Geometry {
            cylinders: cylinders,
            heads: heads,
            sectors: sectors,
        },
    }
}

/// The floppy formats understood by the client BIOS.
pub static FLOPPIES: [Floppy; 8] = [
    floppy("2.88M", 80, 2, 36),
    floppy("1.44M", 80, 2, 18),
    floppy("1.2M", 80, 2, 15),
    floppy("720K", 80, 2, 9),
    floppy("360K", 40, 2, 9),
    floppy("320K", 40, 2, 8),
    floppy("180K", 40, 1, 9),
    floppy("160K", 40, 1, 8),
];

impl Floppy {
    /// Find the floppy format of exactly `total` sectors.
    pub fn find(total: u64) -> Option<&'static Floppy> {
        FLOPPIES.iter().find(|floppy| floppy.geometry.total_sectors() == total)
    }
}

/// How the client addresses the image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Addressing {
    /// 28-bit logical block addresses.
    Lba28,
    /// Cylinder/head/sector addresses.
    Chs,
}

/// A flat disk image.
pub struct FlatImage {
    /// The backing store.
    store: Box<dyn SectorStore>,
    /// The geometry reported to the client.
    geometry: Geometry,
    /// The number of sectors the client may address.
    total: Sector,
    /// How the client addresses the image.
    addressing: Addressing,
    /// Is the image a floppy?
    floppy: bool,
    /// Are writes rejected?
    read_only: bool,
    /// The reporter.
    reporter: Reporter,
}

impl FlatImage {
    /// Set up an image as described by `spec` on top of some unopened store.
    ///
    /// If `spec` asks for a new image and the file doesn't exist yet, it is created and filled
    /// with zeros. An existing file is opened as is.
    pub fn open(mut store: Box<dyn SectorStore>, spec: &ImageSpec, reporter: &Reporter) -> Result<FlatImage, Error> {
        let reporter = reporter.child(o!("image" => spec.path.display().to_string()));
        let name = spec.path.display().to_string();

        if spec.create {
            let geometry = spec.geometry.unwrap_or(DEFAULT_NEW_GEOMETRY);
            let total = geometry.total_sectors();

            if total > store.max_sectors() as u64 {
                return Err(reporter.fatal(err!(Usage, "'{}', image size greater than the maximum of {} sectors", name, store.max_sectors())));
            }

            if store.create(&spec.path)? {
                reporter.report(0, &format!("Creating new disk image '{}', geometry {}, {} sectors ({} MB)", name, geometry, total, total / 2048));
                FlatImage::blank(&mut *store, total as Sector)?;
            } else {
                store.open(&spec.path)?;
            }
        } else {
            store.open(&spec.path)?;
        }

        let size = store.size_sectors()?;
        if size == 0 {
            return Err(reporter.fatal(err!(Storage, "'{}', image is empty", name)));
        }

        let floppy = Floppy::find(size as u64);
        let (geometry, total) = match spec.geometry {
            // A geometry was given explicitly, so it had better fit.
            Some(geometry) if spec.chs => {
                if geometry.total_sectors() > size as u64 {
                    return Err(reporter.fatal(err!(Usage, "'{}', geometry {} needs {} sectors, but the image only has {}",
                                                   name, geometry, geometry.total_sectors(), size)));
                }

                (geometry, geometry.total_sectors() as Sector)
            },
            _ => {
                let geometry = Geometry::derive(size as u64);
                let total = if spec.chs { geometry.total_sectors() as Sector } else { size };

                (geometry, total)
            },
        };

        let addressing = if spec.chs { Addressing::Chs } else { Addressing::Lba28 };

        reporter.report(0, &format!(
            "Opening image '{}', {} sectors ({} MB), {}{:?} addressing, geometry {}{}",
            name,
            total,
            total / 2048,
            if spec.read_only { "read-only, " } else { "" },
            addressing,
            geometry,
            floppy.map(|floppy| format!(", {} floppy", floppy.label)).unwrap_or_default(),
        ));

        Ok(FlatImage {
            store: store,
            geometry: geometry,
            total: total,
            addressing: addressing,
            floppy: floppy.is_some(),
            read_only: spec.read_only,
            reporter: reporter,
        })
    }

    /// Fill a newly created store with `total` zeroed sectors.
    fn blank(store: &mut dyn SectorStore, total: Sector) -> Result<(), Error> {
        let zeros = [0; SECTOR_SIZE];

        store.seek_sectors(0)?;
        for _ in 0..total {
            store.write(&zeros)?;
        }

        Ok(())
    }

    /// Check that `sector` is addressable.
    fn check_range(&self, sector: Sector) -> Result<(), Error> {
        if sector >= self.total {
            Err(self.reporter.fatal(err!(Storage, "'{}', sector {} out of range, image has {} sectors", self.store.name(), sector, self.total)))
        } else {
            Ok(())
        }
    }

    /// Read sector `sector` into `buf`.
    pub fn read_sector(&mut self, sector: Sector, buf: &mut SectorBuf) -> Result<(), Error> {
        self.check_range(sector)?;
        self.reporter.report(4, &format!("read sector {}", sector));

        self.store.seek_sectors(sector)?;
        self.store.read(buf)
    }

    /// Write `buf` into sector `sector`.
    pub fn write_sector(&mut self, sector: Sector, buf: &SectorBuf) -> Result<(), Error> {
        if self.read_only {
            return Err(self.reporter.fatal(err!(Storage, "'{}', write to sector {} of a read-only image", self.store.name(), sector)));
        }
        self.check_range(sector)?;
        self.reporter.report(4, &format!("write sector {}", sector));

        self.store.seek_sectors(sector)?;
        self.store.write(buf)
    }

    /// The geometry reported to the client.
    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    /// The number of sectors the client may address.
    pub fn total_sectors(&self) -> Sector {
        self.total
    }

    /// How the client addresses the image.
    pub fn addressing(&self) -> Addressing {
        self.addressing
    }

    /// Is the image a floppy?
    pub fn is_floppy(&self) -> bool {
        self.floppy
    }

    /// Are writes rejected?
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// The name of the image.
    pub fn name(&self) -> &str {
        self.store.name()
    }

    /// Release the backing file.
    pub fn close(&mut self) {
        self.store.close();
    }
}

impl Drop for FlatImage {
    fn drop(&mut self) {
        self.close();
    }
}
