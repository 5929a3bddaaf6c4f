//! Query/command service used by the REST layer
//!
//! Thin façade over the registry, the probe transport and the wake
//! transmitter. Every call runs to completion on the calling thread; the
//! only blocking step is the probe, bounded by `probe_timeout`.

use chrono::Utc;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::device::{Device, HardwareAddress, Observation};
use crate::error::{ServiceError, ValidationError};
use crate::reconcile::{reconcile, ReconciliationSummary};
use crate::registry::DeviceRepository;
use crate::transport::{
    ProbeTransport, ScanRange, WakeTarget, WakeTransmitter, DEFAULT_WAKE_BROADCAST,
    DEFAULT_WAKE_PORT,
};

/// Default probe window
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Service settings, normally derived from the daemon configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Subnet probed by `scan_and_reconcile`
    pub range: ScanRange,
    /// How long the probe collects replies
    pub probe_timeout: Duration,
    /// Destination used when a wake request names none
    pub wake_broadcast: Ipv4Addr,
    /// Port used when a wake request names none
    pub wake_port: u16,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            range: ScanRange::new(Ipv4Addr::new(192, 168, 4, 0), 24),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            wake_broadcast: DEFAULT_WAKE_BROADCAST,
            wake_port: DEFAULT_WAKE_PORT,
        }
    }
}

/// Device query/command service
pub struct DeviceService {
    registry: Arc<dyn DeviceRepository>,
    probe: Arc<dyn ProbeTransport>,
    transmitter: Arc<dyn WakeTransmitter>,
    config: ServiceConfig,
}

impl DeviceService {
    pub fn new(
        registry: Arc<dyn DeviceRepository>,
        probe: Arc<dyn ProbeTransport>,
        transmitter: Arc<dyn WakeTransmitter>,
        config: ServiceConfig,
    ) -> Self {
        Self {
            registry,
            probe,
            transmitter,
            config,
        }
    }

    /// Persisted devices; never triggers a scan
    pub fn list_devices(&self) -> Result<Vec<Device>, ServiceError> {
        Ok(self.registry.list_all()?)
    }

    /// Look up one device by hardware address
    pub fn find_device(&self, hardware_address: &str) -> Result<Option<Device>, ServiceError> {
        let addr: HardwareAddress = hardware_address.parse()?;
        Ok(self.registry.find_by_hardware_address(&addr)?)
    }

    /// Probe the configured subnet and reconcile the replies.
    ///
    /// A probe failure returns `ScanUnavailable` and nothing is reconciled.
    pub fn scan_and_reconcile(&self) -> Result<ReconciliationSummary, ServiceError> {
        info!(
            range = %self.config.range,
            timeout_ms = self.config.probe_timeout.as_millis() as u64,
            "Starting discovery scan"
        );

        let replies = self
            .probe
            .probe(&self.config.range, self.config.probe_timeout)?;

        debug!(replies = replies.len(), "Probe finished");

        Ok(reconcile(self.registry.as_ref(), &replies, Utc::now())?)
    }

    /// Reconcile observations that arrived outside a scan (agent beacons)
    pub fn record_observations(
        &self,
        observations: &[Observation],
    ) -> Result<ReconciliationSummary, ServiceError> {
        Ok(reconcile(self.registry.as_ref(), observations, Utc::now())?)
    }

    /// Send a wake signal.
    ///
    /// Inputs are validated before anything is sent. Success means the
    /// signal left this host, not that the target woke up.
    pub fn wake(
        &self,
        hardware_address: &str,
        network_address: Option<&str>,
        port: Option<u16>,
    ) -> Result<WakeTarget, ServiceError> {
        let hardware_address: HardwareAddress = hardware_address.parse()?;

        let destination = match network_address.map(str::trim).filter(|s| !s.is_empty()) {
            Some(addr) => addr
                .parse::<Ipv4Addr>()
                .map_err(|_| ValidationError::NetworkAddress(addr.to_string()))?,
            None => self.config.wake_broadcast,
        };

        let target = WakeTarget {
            hardware_address,
            destination,
            port: port.unwrap_or(self.config.wake_port),
        };

        self.transmitter.transmit(&target)?;

        info!(
            hardware_address = %target.hardware_address,
            destination = %target.socket_addr(),
            "Sent wake signal"
        );
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{DeviceRegistry, MemoryStorage};
    use crate::transport::{ProbeError, WakeError};
    use std::sync::Mutex;

    struct FixedProbe {
        replies: Result<Vec<Observation>, String>,
        calls: Mutex<Vec<(ScanRange, Duration)>>,
    }

    impl FixedProbe {
        fn replying(replies: Vec<Observation>) -> Self {
            Self {
                replies: Ok(replies),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn failing(reason: &str) -> Self {
            Self {
                replies: Err(reason.to_string()),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl ProbeTransport for FixedProbe {
        fn probe(
            &self,
            range: &ScanRange,
            timeout: Duration,
        ) -> Result<Vec<Observation>, ProbeError> {
            self.calls.lock().unwrap().push((*range, timeout));
            self.replies
                .clone()
                .map_err(ProbeError::NoInterface)
        }
    }

    #[derive(Default)]
    struct RecordingTransmitter {
        sent: Mutex<Vec<WakeTarget>>,
    }

    impl WakeTransmitter for RecordingTransmitter {
        fn transmit(&self, target: &WakeTarget) -> Result<(), WakeError> {
            self.sent.lock().unwrap().push(target.clone());
            Ok(())
        }
    }

    struct Fixture {
        service: DeviceService,
        registry: Arc<DeviceRegistry<MemoryStorage>>,
        probe: Arc<FixedProbe>,
        transmitter: Arc<RecordingTransmitter>,
    }

    fn fixture(probe: FixedProbe) -> Fixture {
        let registry = Arc::new(DeviceRegistry::in_memory());
        let probe = Arc::new(probe);
        let transmitter = Arc::new(RecordingTransmitter::default());
        let service = DeviceService::new(
            registry.clone(),
            probe.clone(),
            transmitter.clone(),
            ServiceConfig::default(),
        );
        Fixture {
            service,
            registry,
            probe,
            transmitter,
        }
    }

    fn obs(ip: &str, mac: &str) -> Observation {
        Observation::new(ip, mac.parse().unwrap())
    }

    #[test]
    fn test_scan_then_list_from_database() {
        let f = fixture(FixedProbe::replying(vec![obs(
            "192.168.4.10",
            "aa:bb:cc:dd:ee:ff",
        )]));

        let summary = f.service.scan_and_reconcile().unwrap();
        assert_eq!(summary.created, 1);

        let calls = f.probe.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0.to_string(), "192.168.4.0/24");
        assert_eq!(calls[0].1, DEFAULT_PROBE_TIMEOUT);

        let devices = f.service.list_devices().unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].hardware_address.as_str(), "aa:bb:cc:dd:ee:ff");
        assert_eq!(devices[0].network_address, "192.168.4.10");
        // Listing does not probe
        assert_eq!(f.probe.calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_probe_failure_is_scan_unavailable() {
        let f = fixture(FixedProbe::failing("eth0 is down"));

        let err = f.service.scan_and_reconcile().unwrap_err();
        assert!(matches!(err, ServiceError::ScanUnavailable(_)));
        assert_eq!(err.kind(), "scan_unavailable");
        assert!(f.registry.is_empty());
    }

    #[test]
    fn test_wake_rejects_bad_mac_without_sending() {
        let f = fixture(FixedProbe::replying(Vec::new()));

        let err = f.service.wake("not-a-mac", None, None).unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Validation(ValidationError::HardwareAddress(_))
        ));
        assert!(err.is_client_error());
        assert!(f.transmitter.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_wake_rejects_bad_destination_without_sending() {
        let f = fixture(FixedProbe::replying(Vec::new()));

        let err = f
            .service
            .wake("aa:bb:cc:dd:ee:ff", Some("not-an-ip"), None)
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Validation(ValidationError::NetworkAddress(_))
        ));
        assert!(f.transmitter.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_wake_defaults_and_overrides() {
        let f = fixture(FixedProbe::replying(Vec::new()));

        let target = f.service.wake("AA-BB-CC-DD-EE-FF", None, None).unwrap();
        assert_eq!(target.socket_addr().to_string(), "255.255.255.255:9");
        assert_eq!(target.hardware_address.as_str(), "aa:bb:cc:dd:ee:ff");

        let target = f
            .service
            .wake("aa:bb:cc:dd:ee:ff", Some("192.168.4.255"), Some(7))
            .unwrap();
        assert_eq!(target.socket_addr().to_string(), "192.168.4.255:7");
        assert_eq!(f.transmitter.sent.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_find_device() {
        let f = fixture(FixedProbe::replying(Vec::new()));
        f.service
            .record_observations(&[obs("10.0.0.4", "00:11:22:33:44:55").with_hostname("printer")])
            .unwrap();

        let device = f.service.find_device("00-11-22-33-44-55").unwrap().unwrap();
        assert_eq!(device.hostname.as_deref(), Some("printer"));
        assert!(f.service.find_device("00:11:22:33:44:66").unwrap().is_none());
        assert!(f.service.find_device("garbage").is_err());
    }
}
