//! ARP-based probe transport
//!
//! Sends one ARP request per host in the scan range over a raw ethernet
//! channel, then collects replies for the probe timeout, counted from the
//! last request sent. Opening the
//! channel usually needs CAP_NET_RAW or root; failing to open it is reported
//! as a [`ProbeError`].

use lanwake_core::{HardwareAddress, Observation, ProbeError, ProbeTransport, ScanRange};
use pnet::datalink::{self, Channel, Config, DataLinkReceiver, DataLinkSender, NetworkInterface};
use pnet::ipnetwork::{IpNetwork, Ipv4Network};
use pnet::packet::arp::{ArpHardwareTypes, ArpOperations, ArpPacket, MutableArpPacket};
use pnet::packet::ethernet::{EtherTypes, EthernetPacket, MutableEthernetPacket};
use pnet::packet::Packet;
use pnet::util::MacAddr;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

const ETH_HDR_LEN: usize = 14;
const ARP_LEN: usize = 28;
const ARP_FRAME_LEN: usize = ETH_HDR_LEN + ARP_LEN;

/// Receive poll interval while waiting for replies
const READ_TIMEOUT_MS: u64 = 50;

/// Probe transport that discovers hosts with ARP requests
#[derive(Debug, Clone, Default)]
pub struct ArpProbe {
    /// Interface to send on; chosen automatically when `None`
    interface: Option<String>,
}

impl ArpProbe {
    pub fn new(interface: Option<String>) -> Self {
        Self { interface }
    }
}

impl ProbeTransport for ArpProbe {
    fn probe(&self, range: &ScanRange, timeout: Duration) -> Result<Vec<Observation>, ProbeError> {
        let candidates: Vec<NetworkInterface> = datalink::interfaces()
            .into_iter()
            .filter(|iface| iface.is_up() && !iface.is_loopback())
            .collect();
        let (interface, source) = select_interface(candidates, self.interface.as_deref(), range)?;

        let src_mac = interface.mac.ok_or_else(|| {
            ProbeError::NoInterface(format!("{} has no MAC address", interface.name))
        })?;

        debug!(
            interface = %interface.name,
            source = %source.ip(),
            range = %range,
            "Sending ARP probes"
        );

        let (mut tx, mut rx) = open_channel(&interface, &channel_config(), datalink::channel)?;
        Ok(exchange(tx.as_mut(), rx.as_mut(), src_mac, source.ip(), range, timeout))
    }
}

/// Send a request to every host in `range` except `source_ip`, then read
/// replies for `timeout`
fn exchange(
    tx: &mut dyn DataLinkSender,
    rx: &mut dyn DataLinkReceiver,
    src_mac: MacAddr,
    source_ip: Ipv4Addr,
    range: &ScanRange,
    timeout: Duration,
) -> Vec<Observation> {
    let mut sent = 0usize;
    for target in range.hosts().filter(|ip| *ip != source_ip) {
        let frame = build_request(src_mac, source_ip, target);
        match tx.send_to(&frame, None) {
            Some(Err(e)) => warn!(target = %target, error = %e, "Failed to send ARP request"),
            _ => sent += 1,
        }
    }

    let replies = collect_replies(rx, Instant::now() + timeout, range, src_mac);

    debug!(sent, replies = replies.len(), "ARP probe finished");
    replies
}

/// Pick the interface to probe from.
///
/// With an explicit name, that interface must exist and carry IPv4 and a MAC.
/// Otherwise prefer an interface whose network contains the scan range, then
/// fall back to the first usable one.
fn select_interface(
    interfaces: Vec<NetworkInterface>,
    wanted: Option<&str>,
    range: &ScanRange,
) -> Result<(NetworkInterface, Ipv4Network), ProbeError> {
    let mut usable: Vec<(NetworkInterface, Ipv4Network)> = interfaces
        .into_iter()
        .filter(|iface| iface.mac.is_some())
        .filter_map(|iface| ipv4_net(&iface).map(|net| (iface, net)))
        .collect();

    if let Some(name) = wanted {
        return usable
            .into_iter()
            .find(|(iface, _)| iface.name == name)
            .ok_or_else(|| {
                ProbeError::NoInterface(format!("{} is not up or has no IPv4 address", name))
            });
    }

    if let Some(pos) = usable.iter().position(|(_, net)| net.contains(range.subnet)) {
        return Ok(usable.swap_remove(pos));
    }

    usable
        .into_iter()
        .next()
        .ok_or_else(|| ProbeError::NoInterface("no interface with IPv4 and MAC".to_string()))
}

fn ipv4_net(iface: &NetworkInterface) -> Option<Ipv4Network> {
    iface.ips.iter().find_map(|ip| match ip {
        IpNetwork::V4(net) => Some(*net),
        _ => None,
    })
}

fn channel_config() -> Config {
    Config {
        read_timeout: Some(Duration::from_millis(READ_TIMEOUT_MS)),
        ..Default::default()
    }
}

fn open_channel<F>(
    iface: &NetworkInterface,
    cfg: &Config,
    opener: F,
) -> Result<(Box<dyn DataLinkSender>, Box<dyn DataLinkReceiver>), ProbeError>
where
    F: FnOnce(&NetworkInterface, Config) -> std::io::Result<Channel>,
{
    match opener(iface, *cfg) {
        Ok(Channel::Ethernet(tx, rx)) => Ok((tx, rx)),
        Ok(_) => Err(ProbeError::Failed(format!(
            "non-ethernet channel for {}",
            iface.name
        ))),
        Err(source) => Err(ProbeError::Channel {
            interface: iface.name.clone(),
            source,
        }),
    }
}

/// Read frames until `deadline`, keeping ARP replies from inside `range`
fn collect_replies(
    rx: &mut dyn DataLinkReceiver,
    deadline: Instant,
    range: &ScanRange,
    own_mac: MacAddr,
) -> Vec<Observation> {
    let mut replies = Vec::new();
    while Instant::now() < deadline {
        // Read timeouts are expected while waiting
        let Ok(frame) = rx.next() else { continue };
        if let Some(reply) = parse_reply(frame, range, own_mac) {
            trace!(
                network_address = %reply.network_address,
                hardware_address = %reply.hardware_address,
                "ARP reply"
            );
            replies.push(reply);
        }
    }
    replies
}

/// Build a broadcast ARP who-has frame for `target`
pub fn build_request(src_mac: MacAddr, src_ip: Ipv4Addr, target: Ipv4Addr) -> Vec<u8> {
    let mut buffer = vec![0u8; ARP_FRAME_LEN];

    if let Some(mut eth) = MutableEthernetPacket::new(&mut buffer) {
        eth.set_destination(MacAddr::broadcast());
        eth.set_source(src_mac);
        eth.set_ethertype(EtherTypes::Arp);
    }

    if let Some(mut arp) = MutableArpPacket::new(&mut buffer[ETH_HDR_LEN..]) {
        arp.set_hardware_type(ArpHardwareTypes::Ethernet);
        arp.set_protocol_type(EtherTypes::Ipv4);
        arp.set_hw_addr_len(6);
        arp.set_proto_addr_len(4);
        arp.set_operation(ArpOperations::Request);
        arp.set_sender_hw_addr(src_mac);
        arp.set_sender_proto_addr(src_ip);
        arp.set_target_hw_addr(MacAddr::zero());
        arp.set_target_proto_addr(target);
    }

    buffer
}

/// Extract the respondent from an ARP reply frame.
///
/// Returns `None` for anything that is not a reply from a host inside
/// `range`, including our own frames echoed back.
pub fn parse_reply(frame: &[u8], range: &ScanRange, own_mac: MacAddr) -> Option<Observation> {
    let eth = EthernetPacket::new(frame)?;
    if eth.get_ethertype() != EtherTypes::Arp {
        return None;
    }

    let arp = ArpPacket::new(eth.payload())?;
    if arp.get_operation() != ArpOperations::Reply {
        return None;
    }

    let sender_ip = arp.get_sender_proto_addr();
    let sender_mac = arp.get_sender_hw_addr();
    if !range.contains(sender_ip)
        || sender_mac == own_mac
        || sender_mac == MacAddr::zero()
        || sender_mac == MacAddr::broadcast()
    {
        return None;
    }

    Some(Observation::new(
        sender_ip.to_string(),
        HardwareAddress::from_octets(mac_octets(sender_mac)),
    ))
}

fn mac_octets(mac: MacAddr) -> [u8; 6] {
    [mac.0, mac.1, mac.2, mac.3, mac.4, mac.5]
}
