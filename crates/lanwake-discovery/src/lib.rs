//! lanwake Discovery - Concrete network collaborators
//!
//! This crate provides the pieces that touch the wire:
//! - ARP probing of a subnet over a raw datalink channel
//! - Magic packet transmission over UDP broadcast
//! - Agent beacons that report a host's address and hostname

pub mod arp;
pub mod beacon;
pub mod wake;

pub use arp::ArpProbe;
pub use beacon::{Beacon, BeaconError, BeaconListener, BeaconSender};
pub use wake::{magic_packet, UdpWakeTransmitter};
