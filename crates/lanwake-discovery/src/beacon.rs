//! Agent beacons
//!
//! A beacon is a host announcing itself on a multicast group. Unlike ARP
//! replies, it carries the hostname. Wire format, one datagram per beacon:
//!
//! ```text
//! u32 BE len | network address (UTF-8)
//! u32 BE len | hardware address (UTF-8)
//! u32 BE len | hostname (UTF-8)
//! ```

use lanwake_core::{HardwareAddress, Observation, ValidationError};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use thiserror::Error;
use tokio::net::UdpSocket;
use tracing::{debug, info};

/// Largest beacon accepted
pub const MAX_BEACON_LEN: usize = 1024;

#[derive(Error, Debug)]
pub enum BeaconError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("beacon truncated at byte {0}")]
    Truncated(usize),
    #[error("beacon field {0} is not valid UTF-8")]
    InvalidUtf8(&'static str),
    #[error(transparent)]
    InvalidAddress(#[from] ValidationError),
}

/// Self-reported identity of a host running the agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Beacon {
    pub network_address: String,
    pub hardware_address: HardwareAddress,
    pub hostname: String,
}

impl Beacon {
    pub fn encode(&self) -> Vec<u8> {
        let fields = [
            self.network_address.as_bytes(),
            self.hardware_address.as_str().as_bytes(),
            self.hostname.as_bytes(),
        ];
        let mut out = Vec::with_capacity(fields.iter().map(|f| 4 + f.len()).sum());
        for field in fields {
            out.extend_from_slice(&(field.len() as u32).to_be_bytes());
            out.extend_from_slice(field);
        }
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self, BeaconError> {
        let mut cursor = 0usize;
        let network_address = read_field(data, &mut cursor, "network_address")?;
        let hardware_address = read_field(data, &mut cursor, "hardware_address")?;
        let hostname = read_field(data, &mut cursor, "hostname")?;

        if network_address.parse::<Ipv4Addr>().is_err() {
            return Err(ValidationError::NetworkAddress(network_address).into());
        }

        Ok(Self {
            network_address,
            hardware_address: hardware_address.parse()?,
            hostname,
        })
    }
}

impl From<Beacon> for Observation {
    fn from(beacon: Beacon) -> Self {
        let observation = Observation::new(beacon.network_address, beacon.hardware_address);
        if beacon.hostname.is_empty() {
            observation
        } else {
            observation.with_hostname(beacon.hostname)
        }
    }
}

fn read_field(data: &[u8], cursor: &mut usize, name: &'static str) -> Result<String, BeaconError> {
    let len_end = *cursor + 4;
    let len_bytes: [u8; 4] = data
        .get(*cursor..len_end)
        .and_then(|b| b.try_into().ok())
        .ok_or(BeaconError::Truncated(*cursor))?;
    let len = u32::from_be_bytes(len_bytes) as usize;

    let end = len_end
        .checked_add(len)
        .filter(|end| *end <= data.len())
        .ok_or(BeaconError::Truncated(len_end))?;

    let value = std::str::from_utf8(&data[len_end..end])
        .map_err(|_| BeaconError::InvalidUtf8(name))?
        .to_string();
    *cursor = end;
    Ok(value)
}

/// Receives beacons on a UDP socket
pub struct BeaconListener {
    socket: UdpSocket,
}

impl BeaconListener {
    /// Bind to `addr` without joining any group
    pub async fn bind(addr: SocketAddr) -> Result<Self, BeaconError> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self { socket })
    }

    /// Bind to `port` on all addresses and join `group` on `interface`
    pub async fn join(group: Ipv4Addr, interface: Ipv4Addr, port: u16) -> Result<Self, BeaconError> {
        let listener = Self::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))).await?;
        listener.socket.join_multicast_v4(group, interface)?;
        info!(group = %group, interface = %interface, port, "Listening for agent beacons");
        Ok(listener)
    }

    pub fn local_addr(&self) -> Result<SocketAddr, BeaconError> {
        Ok(self.socket.local_addr()?)
    }

    /// Wait for the next datagram and decode it
    pub async fn recv(&self) -> Result<(Beacon, SocketAddr), BeaconError> {
        let mut buf = [0u8; MAX_BEACON_LEN];
        let (len, from) = self.socket.recv_from(&mut buf).await?;
        let beacon = Beacon::decode(&buf[..len])?;
        debug!(from = %from, hardware_address = %beacon.hardware_address, "Beacon received");
        Ok((beacon, from))
    }
}

/// Sends beacons to a group (or any unicast address)
pub struct BeaconSender {
    socket: UdpSocket,
    target: SocketAddrV4,
}

impl BeaconSender {
    /// Bind on `bind` with multicast TTL 1 so beacons stay on the local link
    pub async fn new(bind: Ipv4Addr, target: SocketAddrV4) -> Result<Self, BeaconError> {
        let socket = UdpSocket::bind(SocketAddrV4::new(bind, 0)).await?;
        socket.set_multicast_ttl_v4(1)?;
        Ok(Self { socket, target })
    }

    pub async fn send(&self, beacon: &Beacon) -> Result<(), BeaconError> {
        self.socket.send_to(&beacon.encode(), self.target).await?;
        Ok(())
    }
}
