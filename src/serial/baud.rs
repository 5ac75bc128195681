//! Baud rates.
//!
//! The client BIOS only scans six speeds (2400, 4800, 9600, 28.8K, 57.6K and 115.2K). Everything
//! else is reached through a hardware rate multiplier on the client's serial card, which is
//! invisible to the client, but which the server must know about. Such rates are marked with a
//! divisor above `EMULATION_DIVISOR_LIMIT`.

use std::fmt;
use std::str::FromStr;

use crate::config::ParseError;

/// The largest divisor a pipe can emulate.
///
/// A pipe has no notion of a hardware multiplier, so rates that need one can't be emulated.
pub const EMULATION_DIVISOR_LIMIT: u8 = 0x80;

/// A supported baud rate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BaudRate {
    /// The rate in bits per second.
    pub rate: u32,
    /// The divisor programmed into the client's UART.
    ///
    /// `0xff` marks rates which need a hardware multiplier.
    pub divisor: u8,
    /// The human-readable label.
    pub label: &'static str,
    /// A short alternative spelling of the label.
    alias: &'static str,
}

/// Shorthand for the rate table.
const fn baud(rate: u32, divisor: u8, label: &'static str, alias: &'static str) -> BaudRate {
    BaudRate {
        rate: rate,
        divisor: divisor,
        label: label,
        alias: alias,
    }
}

/// All supported baud rates, in ascending order.
pub static BAUD_RATES: [BaudRate; 13] = [
    baud(2400, 0x30, "2400", "2400"),
    baud(4800, 0x18, "4800", "4800"),
    baud(9600, 0x0c, "9600", "9600"),
    baud(19200, 0xff, "19.2K", "19K"),
    baud(28800, 0x04, "28.8K", "28K"),
    baud(38400, 0xff, "38.4K", "38K"),
    baud(57600, 0x02, "57.6K", "57K"),
    baud(76800, 0xff, "76.8K", "76K"),
    baud(115200, 0x01, "115.2K", "115K"),
    baud(153600, 0xff, "153.6K", "153K"),
    baud(230400, 0xff, "230.4K", "230K"),
    baud(460800, 0xff, "460.8K", "460K"),
    baud(921600, 0xff, "921.6K", "921K"),
];

impl BaudRate {
    /// The rate used on physical ports unless told otherwise.
    pub fn default_port() -> BaudRate {
        BAUD_RATES[2]
    }

    /// The rate emulated on pipes unless told otherwise.
    pub fn default_pipe() -> BaudRate {
        BAUD_RATES[8]
    }

    /// Look up a rate by its bits per second.
    pub fn from_rate(rate: u32) -> Option<BaudRate> {
        BAUD_RATES.iter().find(|baud| baud.rate == rate).cloned()
    }

    /// Can a pipe emulate this rate?
    pub fn is_emulatable(&self) -> bool {
        self.divisor <= EMULATION_DIVISOR_LIMIT
    }
}

impl FromStr for BaudRate {
    type Err = ParseError;

    /// Look up a rate by bits per second (`115200`), label (`115.2K`) or alias (`115K`).
    fn from_str(s: &str) -> Result<BaudRate, ParseError> {
        let s = s.trim();

        if let Ok(rate) = s.parse::<u32>() {
            if let Some(baud) = BaudRate::from_rate(rate) {
                return Ok(baud);
            }
        }

        BAUD_RATES.iter()
            .find(|baud| baud.label.eq_ignore_ascii_case(s) || baud.alias.eq_ignore_ascii_case(s))
            .cloned()
            .ok_or_else(|| ParseError::Baud(s.to_owned()))
    }
}

impl fmt::Display for BaudRate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.label)
    }
}
