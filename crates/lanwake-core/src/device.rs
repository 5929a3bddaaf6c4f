//! Device types for tracking hosts seen on the local network

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;

/// Link-layer (MAC) address in canonical lowercase, colon-separated form.
///
/// This is the durable identity key of a [`Device`]. Construction always goes
/// through [`FromStr`] or [`HardwareAddress::from_octets`], so a value of this
/// type is known to be well formed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HardwareAddress(String);

impl HardwareAddress {
    /// Build from raw octets (e.g. from a captured ARP reply)
    pub fn from_octets(octets: [u8; 6]) -> Self {
        let parts: Vec<String> = octets.iter().map(|b| format!("{:02x}", b)).collect();
        Self(parts.join(":"))
    }

    /// Raw octets, used when building magic packets
    pub fn octets(&self) -> [u8; 6] {
        let mut octets = [0u8; 6];
        for (slot, pair) in octets.iter_mut().zip(self.0.split(':')) {
            // Canonical form is validated on construction
            *slot = u8::from_str_radix(pair, 16).unwrap_or_default();
        }
        octets
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for HardwareAddress {
    type Err = ValidationError;

    /// Accepts six hex pairs separated by `:` or `-` (one separator style per address).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || ValidationError::HardwareAddress(s.to_string());

        if s.len() != 17 {
            return Err(invalid());
        }

        let separator = match s.as_bytes()[2] {
            b':' => ':',
            b'-' => '-',
            _ => return Err(invalid()),
        };

        let pairs: Vec<&str> = s.split(separator).collect();
        if pairs.len() != 6
            || !pairs
                .iter()
                .all(|p| p.len() == 2 && p.chars().all(|c| c.is_ascii_hexdigit()))
        {
            return Err(invalid());
        }

        Ok(Self(pairs.join(":").to_ascii_lowercase()))
    }
}

impl TryFrom<String> for HardwareAddress {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<HardwareAddress> for String {
    fn from(value: HardwareAddress) -> Self {
        value.0
    }
}

impl fmt::Display for HardwareAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One respondent from a probe or beacon: who answered, and from where.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub network_address: String,
    pub hardware_address: HardwareAddress,
    /// Only agent beacons carry a hostname; ARP replies never do
    pub hostname: Option<String>,
}

impl Observation {
    pub fn new(network_address: impl Into<String>, hardware_address: HardwareAddress) -> Self {
        Self {
            network_address: network_address.into(),
            hardware_address,
            hostname: None,
        }
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }
}

/// A network host that has been observed at least once
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Identity key, unique across the registry
    pub hardware_address: HardwareAddress,
    /// Most recently observed address (e.g. an IPv4 literal)
    pub network_address: String,
    /// Best-effort label, unset until an agent beacon reports one
    pub hostname: Option<String>,
    /// When the device was last seen responding
    pub last_seen: DateTime<Utc>,
}

impl Device {
    /// Create a device from its first observation
    pub fn new(observation: &Observation, observed_at: DateTime<Utc>) -> Self {
        Self {
            hardware_address: observation.hardware_address.clone(),
            network_address: observation.network_address.clone(),
            hostname: observation.hostname.clone(),
            last_seen: observed_at,
        }
    }

    /// Apply a newer observation to this record.
    ///
    /// Returns `false` and leaves the record untouched when `observed_at` is
    /// earlier than `last_seen`. A tie is accepted. A missing hostname never
    /// clears a known one.
    pub fn apply(&mut self, observation: &Observation, observed_at: DateTime<Utc>) -> bool {
        if observed_at < self.last_seen {
            return false;
        }
        self.network_address = observation.network_address.clone();
        if let Some(hostname) = &observation.hostname {
            self.hostname = Some(hostname.clone());
        }
        self.last_seen = observed_at;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn hw(s: &str) -> HardwareAddress {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_canonicalizes() {
        assert_eq!(hw("AA:BB:CC:DD:EE:FF").as_str(), "aa:bb:cc:dd:ee:ff");
        assert_eq!(hw("aa-bb-cc-dd-ee-0f").as_str(), "aa:bb:cc:dd:ee:0f");
        assert_eq!(hw("  aa:bb:cc:dd:ee:ff ").as_str(), "aa:bb:cc:dd:ee:ff");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in [
            "not-a-mac",
            "",
            "aa:bb:cc:dd:ee",
            "aa:bb:cc:dd:ee:ff:00",
            "aa:bb-cc:dd:ee:ff",
            "gg:bb:cc:dd:ee:ff",
            "aabb.ccdd.eeff.",
            "aa:bb:cc:dd:e:fff",
        ] {
            let err = bad.parse::<HardwareAddress>().unwrap_err();
            assert!(matches!(err, ValidationError::HardwareAddress(_)), "{bad}");
        }
    }

    #[test]
    fn test_octets() {
        let addr = HardwareAddress::from_octets([0xaa, 0xbb, 0xcc, 0x01, 0x02, 0x03]);
        assert_eq!(addr.as_str(), "aa:bb:cc:01:02:03");
        assert_eq!(addr.octets(), [0xaa, 0xbb, 0xcc, 0x01, 0x02, 0x03]);
    }

    #[test]
    fn test_serde_validates() {
        let json = serde_json::to_string(&hw("AA:BB:CC:DD:EE:FF")).unwrap();
        assert_eq!(json, "\"aa:bb:cc:dd:ee:ff\"");
        assert!(serde_json::from_str::<HardwareAddress>("\"bogus\"").is_err());
    }

    #[test]
    fn test_apply_keeps_hostname_and_rejects_stale() {
        let t1 = Utc.with_ymd_and_hms(2026, 1, 10, 12, 0, 0).unwrap();
        let first = Observation::new("192.168.4.10", hw("aa:bb:cc:dd:ee:ff")).with_hostname("nas");
        let mut device = Device::new(&first, t1);

        let later = Observation::new("192.168.4.11", hw("aa:bb:cc:dd:ee:ff"));
        assert!(device.apply(&later, t1 + Duration::seconds(5)));
        assert_eq!(device.network_address, "192.168.4.11");
        assert_eq!(device.hostname.as_deref(), Some("nas"));

        let earlier = Observation::new("192.168.4.99", hw("aa:bb:cc:dd:ee:ff"));
        assert!(!device.apply(&earlier, t1));
        assert_eq!(device.network_address, "192.168.4.11");
        assert_eq!(device.last_seen, t1 + Duration::seconds(5));
    }
}
