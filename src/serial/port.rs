//! Physical serial ports.

use std::path::Path;
use std::time::Duration;

use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};

use super::baud::BaudRate;

/// The number of port identifiers probed when looking for a port to use.
pub const DISCOVERY_RANGE: u32 = 30;
/// The number of port identifiers probed when listing ports.
pub const ENUMERATION_RANGE: u32 = 40;
/// The fastest rate plain UARTs go.
pub const COMMON_CEILING: u32 = 115_200;

/// The name of port number `n`, counting from 1.
#[cfg(windows)]
pub fn port_name(n: u32) -> String {
    format!("COM{}", n)
}

/// The name of port number `n`, counting from 1.
#[cfg(not(windows))]
pub fn port_name(n: u32) -> String {
    format!("/dev/ttyS{}", n.saturating_sub(1))
}

/// The ports the OS knows about.
fn known_ports() -> Vec<String> {
    serialport::available_ports()
        .map(|ports| ports.into_iter().map(|port| port.port_name).collect())
        .unwrap_or_default()
}

/// Is `name` a port the OS reports as present?
///
/// Device nodes alone don't count, as the kernel creates the numbered ones whether or not the
/// UART behind them exists.
fn is_present(name: &str, known: &[String]) -> bool {
    known.iter().any(|port| port == name)
}

/// Is `name` one of the numbered ports?
fn is_numbered(name: &str) -> bool {
    (1..=ENUMERATION_RANGE).any(|n| port_name(n) == name)
}

/// Is port `name` present?
///
/// Explicitly named devices outside the numbered range (USB adapters and the like) only need to
/// exist.
pub fn exists(name: &str) -> bool {
    is_present(name, &known_ports()) || (cfg!(unix) && !is_numbered(name) && Path::new(name).exists())
}

/// Find the first present port in ascending order.
pub fn discover() -> Option<String> {
    let known = known_ports();

    (1..=DISCOVERY_RANGE).map(port_name).find(|name| is_present(name, &known))
}

/// List the present ports, for diagnostics.
///
/// This gives a comma-separated list, or `(none)`.
pub fn enumerate() -> String {
    let known = known_ports();
    let found: Vec<String> = (1..=ENUMERATION_RANGE)
        .map(port_name)
        .filter(|name| is_present(name, &known))
        .collect();

    if found.is_empty() {
        String::from("(none)")
    } else {
        found.join(", ")
    }
}

/// Open port `name` at `baud`, 8N1, without flow control and with reads and writes returning
/// right away.
pub fn open(name: &str, baud: BaudRate) -> serialport::Result<Box<dyn SerialPort>> {
    serialport::new(name, baud.rate)
        .data_bits(DataBits::Eight)
        .stop_bits(StopBits::One)
        .parity(Parity::None)
        .flow_control(FlowControl::None)
        .timeout(Duration::from_millis(0))
        .open()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_count_from_one() {
        let first = port_name(1);
        assert!(first.ends_with('0') || first.ends_with('1'));
        assert_ne!(port_name(1), port_name(2));
    }

    #[test]
    fn presence() {
        let known = vec![String::from("COM3")];

        assert!(is_present("COM3", &known));
        assert!(!is_present("COM4", &known));
    }

    #[test]
    fn numbered_nodes_need_the_os() {
        // A node the OS doesn't list is a ghost.
        assert!(!is_present(&port_name(1), &[]));
        assert!(is_numbered(&port_name(1)));
        assert!(is_numbered(&port_name(ENUMERATION_RANGE)));
        assert!(!is_numbered("/dev/ttyUSB0"));
    }

    #[cfg(unix)]
    #[test]
    fn named_device_only_needs_to_exist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ttyFAKE");
        std::fs::write(&path, b"").unwrap();

        assert!(exists(path.to_str().unwrap()));
        assert!(!exists(dir.path().join("ttyGONE").to_str().unwrap()));
    }

    #[test]
    fn enumeration_never_fails() {
        let list = enumerate();

        assert!(list == "(none)" || !list.is_empty());
    }
}
