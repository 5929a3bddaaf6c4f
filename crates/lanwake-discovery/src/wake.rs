//! Magic packet transmission

use lanwake_core::{HardwareAddress, WakeError, WakeTarget, WakeTransmitter};
use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use tracing::trace;

/// 6 bytes of 0xFF followed by the target MAC repeated 16 times
pub const MAGIC_PACKET_LEN: usize = 6 + 16 * 6;

/// Build the magic packet payload for `addr`
pub fn magic_packet(addr: &HardwareAddress) -> [u8; MAGIC_PACKET_LEN] {
    let mut packet = [0xFFu8; MAGIC_PACKET_LEN];
    let mac = addr.octets();
    for chunk in packet[6..].chunks_exact_mut(6) {
        chunk.copy_from_slice(&mac);
    }
    packet
}

/// Sends magic packets as UDP datagrams with broadcast enabled
#[derive(Debug, Clone)]
pub struct UdpWakeTransmitter {
    bind: SocketAddrV4,
}

impl UdpWakeTransmitter {
    pub fn new(bind: SocketAddrV4) -> Self {
        Self { bind }
    }
}

impl Default for UdpWakeTransmitter {
    fn default() -> Self {
        Self::new(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0))
    }
}

impl WakeTransmitter for UdpWakeTransmitter {
    fn transmit(&self, target: &WakeTarget) -> Result<(), WakeError> {
        let socket = UdpSocket::bind(self.bind).map_err(WakeError::Socket)?;
        socket.set_broadcast(true).map_err(WakeError::Socket)?;

        let destination = target.socket_addr();
        let packet = magic_packet(&target.hardware_address);
        socket
            .send_to(&packet, destination)
            .map_err(|source| WakeError::Send {
                target: destination,
                source,
            })?;

        trace!(destination = %destination, bytes = packet.len(), "Magic packet sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_magic_packet_layout() {
        let addr: HardwareAddress = "01:23:45:67:89:ab".parse().unwrap();
        let packet = magic_packet(&addr);

        assert_eq!(packet.len(), 102);
        assert_eq!(&packet[..6], &[0xFF; 6]);
        for rep in 0..16 {
            let start = 6 + rep * 6;
            assert_eq!(&packet[start..start + 6], &[0x01, 0x23, 0x45, 0x67, 0x89, 0xab]);
        }
    }

    #[test]
    fn test_transmit_to_local_listener() {
        let listener = UdpSocket::bind("127.0.0.1:0").unwrap();
        listener
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let port = listener.local_addr().unwrap().port();

        let addr: HardwareAddress = "aa:bb:cc:dd:ee:ff".parse().unwrap();
        let target = WakeTarget {
            hardware_address: addr.clone(),
            destination: Ipv4Addr::LOCALHOST,
            port,
        };

        let transmitter = UdpWakeTransmitter::new(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0));
        transmitter.transmit(&target).unwrap();

        let mut buf = [0u8; 256];
        let (len, _) = listener.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..len], &magic_packet(&addr)[..]);
    }

    #[test]
    fn test_bind_failure_is_socket_error() {
        // Not a local address, so bind fails before anything is sent
        let transmitter =
            UdpWakeTransmitter::new(SocketAddrV4::new(Ipv4Addr::new(192, 0, 2, 1), 0));
        let target = WakeTarget::new("aa:bb:cc:dd:ee:ff".parse().unwrap());
        assert!(matches!(
            transmitter.transmit(&target),
            Err(WakeError::Socket(_))
        ));
    }
}
