//! Collaborator seams: the probe transport that finds hosts and the
//! transmitter that sends wake signals

use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;
use thiserror::Error;

use crate::device::{HardwareAddress, Observation};

/// Default destination for wake signals (limited broadcast)
pub const DEFAULT_WAKE_BROADCAST: Ipv4Addr = Ipv4Addr::BROADCAST;

/// Default wake port (discard)
pub const DEFAULT_WAKE_PORT: u16 = 9;

/// An IPv4 subnet to probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRange {
    /// Subnet base address (e.g., "192.168.4.0")
    pub subnet: Ipv4Addr,
    /// Subnet prefix length (e.g., 24 for /24)
    pub prefix_len: u8,
}

impl ScanRange {
    pub fn new(subnet: Ipv4Addr, prefix_len: u8) -> Self {
        Self {
            subnet,
            prefix_len: prefix_len.min(32),
        }
    }

    fn mask(&self) -> u32 {
        if self.prefix_len >= 32 {
            0xFFFFFFFF
        } else if self.prefix_len == 0 {
            0
        } else {
            !((1u32 << (32 - self.prefix_len)) - 1)
        }
    }

    /// Check if `ip` falls inside this range
    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        let mask = self.mask();
        (u32::from(ip) & mask) == (u32::from(self.subnet) & mask)
    }

    /// Host addresses in the range, skipping network and broadcast addresses
    /// for prefixes shorter than /31
    pub fn hosts(&self) -> impl Iterator<Item = Ipv4Addr> {
        let mask = self.mask();
        let network = u32::from(self.subnet) & mask;
        let broadcast = network | !mask;
        let (first, last) = if self.prefix_len >= 31 {
            (network, broadcast)
        } else {
            (network + 1, broadcast - 1)
        };
        (first..=last).map(Ipv4Addr::from)
    }
}

impl std::fmt::Display for ScanRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.subnet, self.prefix_len)
    }
}

/// The probe capability could not be used at all
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("no usable network interface: {0}")]
    NoInterface(String),
    #[error("failed to open capture channel on {interface}: {source}")]
    Channel {
        interface: String,
        #[source]
        source: std::io::Error,
    },
    #[error("probe failed: {0}")]
    Failed(String),
}

/// Broadcasts a discovery request and collects replies for a bounded time.
///
/// Replies are returned in arrival order and may repeat a hardware address.
/// Delivery is best-effort: silence from a host is not an error.
pub trait ProbeTransport: Send + Sync {
    fn probe(&self, range: &ScanRange, timeout: Duration) -> Result<Vec<Observation>, ProbeError>;
}

/// Where a wake signal is sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WakeTarget {
    pub hardware_address: HardwareAddress,
    pub destination: Ipv4Addr,
    pub port: u16,
}

impl WakeTarget {
    pub fn new(hardware_address: HardwareAddress) -> Self {
        Self {
            hardware_address,
            destination: DEFAULT_WAKE_BROADCAST,
            port: DEFAULT_WAKE_PORT,
        }
    }

    pub fn socket_addr(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.destination, self.port)
    }
}

/// Local transmission failure. Delivery is never confirmed, so an
/// unreachable host is not a `WakeError`.
#[derive(Error, Debug)]
pub enum WakeError {
    #[error("failed to open wake socket: {0}")]
    Socket(#[source] std::io::Error),
    #[error("failed to send wake signal to {target}: {source}")]
    Send {
        target: SocketAddrV4,
        #[source]
        source: std::io::Error,
    },
}

/// Emits a single best-effort wake signal
pub trait WakeTransmitter: Send + Sync {
    fn transmit(&self, target: &WakeTarget) -> Result<(), WakeError>;
}
