//! The serial drive server library.
//!
//! This serves one or two flat disk images to a legacy client, which sees them as local hard
//! disks, over a serial port or an emulated serial line. It provides the image storage, the
//! serial channel, and the loop that keeps the channel alive across client resets. The
//! decoding of sector requests is plugged in through the `Dispatch` trait.

#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate quick_error;
#[macro_use]
extern crate slog;

#[macro_use]
pub mod error;

pub mod config;
pub mod image;
pub mod report;
pub mod serial;
pub mod server;
pub mod store;

pub use crate::config::Config;
pub use crate::error::{Error, Kind};
pub use crate::image::FlatImage;
pub use crate::report::Reporter;
pub use crate::serial::{Channel, Target, Transfer};
pub use crate::server::{run_from_args, Dispatch, Server, Session};
pub use crate::store::{Backend, SectorStore};
