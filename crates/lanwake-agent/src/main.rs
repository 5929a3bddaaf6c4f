//! lanwake-agent - Announce this host to the lanwake daemon
//!
//! Periodically multicasts a beacon carrying this host's IPv4 address,
//! hardware address and hostname. The daemon's collector reconciles the
//! beacon like a scan reply, which is how hostnames reach the registry.

use anyhow::{anyhow, Result};
use clap::Parser;
use lanwake_core::HardwareAddress;
use lanwake_discovery::{Beacon, BeaconSender};
use pnet::datalink::{self, NetworkInterface};
use pnet::ipnetwork::IpNetwork;
use pnet::util::MacAddr;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "lanwake-agent")]
#[command(about = "Announce this host's address and hostname to lanwake")]
#[command(version)]
struct Args {
    /// Multicast group the daemon listens on
    #[arg(short, long, default_value = "224.1.1.1")]
    group: Ipv4Addr,

    /// Beacon port
    #[arg(short, long, default_value_t = 5007)]
    port: u16,

    /// Interface to announce; picked automatically when unset
    #[arg(short, long)]
    interface: Option<String>,

    /// Seconds between beacons
    #[arg(long, default_value_t = 60)]
    interval: u64,

    /// Send a single beacon and exit
    #[arg(long)]
    once: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

/// Address pair announced for this host
#[derive(Debug, Clone, PartialEq, Eq)]
struct Identity {
    interface: String,
    ip: Ipv4Addr,
    mac: MacAddr,
}

/// Preference for an address: common private ranges first
fn rank(ip: &Ipv4Addr) -> u8 {
    let octets = ip.octets();
    match octets {
        [192, 168, ..] => 0,
        [10, ..] => 1,
        [172, b, ..] if (16..=31).contains(&b) => 2,
        _ if !ip.is_link_local() => 3,
        _ => 4,
    }
}

/// Pick the interface address to announce from `candidates`
fn pick_identity(candidates: &[NetworkInterface], name: Option<&str>) -> Option<Identity> {
    candidates
        .iter()
        .filter(|iface| name.map_or(true, |n| iface.name == n))
        .filter_map(|iface| {
            let mac = iface.mac.filter(|m| *m != MacAddr::zero())?;
            iface.ips.iter().find_map(|net| match net {
                IpNetwork::V4(v4) if !v4.ip().is_loopback() => Some(Identity {
                    interface: iface.name.clone(),
                    ip: v4.ip(),
                    mac,
                }),
                _ => None,
            })
        })
        .min_by_key(|identity| rank(&identity.ip))
}

fn local_identity(name: Option<&str>) -> Result<Identity> {
    let candidates: Vec<NetworkInterface> = datalink::interfaces()
        .into_iter()
        .filter(|iface| iface.is_up() && !iface.is_loopback())
        .collect();

    pick_identity(&candidates, name).ok_or_else(|| match name {
        Some(n) => anyhow!("interface {} has no usable IPv4 and MAC address", n),
        None => anyhow!("no usable network interface found"),
    })
}

fn build_beacon(identity: &Identity, hostname: String) -> Beacon {
    let MacAddr(a, b, c, d, e, f) = identity.mac;
    Beacon {
        network_address: identity.ip.to_string(),
        hardware_address: HardwareAddress::from_octets([a, b, c, d, e, f]),
        hostname,
    }
}

async fn announce(args: &Args) -> Result<()> {
    let identity = local_identity(args.interface.as_deref())?;
    let hostname = sys_info::hostname().map_err(|e| anyhow!("reading hostname: {}", e))?;
    let beacon = build_beacon(&identity, hostname);

    let target = SocketAddrV4::new(args.group, args.port);
    let sender = BeaconSender::new(identity.ip, target).await?;
    sender.send(&beacon).await?;

    debug!(
        interface = %identity.interface,
        network_address = %beacon.network_address,
        hardware_address = %beacon.hardware_address,
        hostname = %beacon.hostname,
        target = %target,
        "Beacon sent"
    );
    Ok(())
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(parse_level(&args.log_level))
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if args.once {
        return announce(&args).await;
    }

    info!(
        group = %args.group,
        port = args.port,
        interval_secs = args.interval,
        "lanwake-agent v{} announcing",
        env!("CARGO_PKG_VERSION")
    );

    let mut ticker = tokio::time::interval(Duration::from_secs(args.interval.max(1)));
    loop {
        ticker.tick().await;
        // Addresses can change between beacons, so look them up each time
        if let Err(e) = announce(&args).await {
            warn!(error = %e, "Failed to send beacon");
        }
    }
}
