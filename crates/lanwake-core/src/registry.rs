//! Device registry with durable storage
//!
//! The registry owns every [`Device`] record and guarantees that at most one
//! record exists per hardware address. Records are kept in memory behind a
//! `RwLock` and written through to a [`Storage`] backend on every change:
//! - upserts are serialized by a writer mutex held across read-modify-persist,
//!   so concurrent reconciliations never lose an update
//! - the in-memory map is only swapped after the backend accepted the new
//!   snapshot, so a failed write leaves the registry unchanged
//! - readers only wait for the swap, never for the backend write, and always
//!   see either the old or the new snapshot
//!
//! Every changed record is persisted before `upsert` returns. A reconciliation
//! cycle that fails part way keeps the entries it already wrote, and an
//! unchanged record costs no write at all.
//!
//! Devices are never removed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Mutex, RwLock};
use thiserror::Error;
use tracing::{debug, warn};

use crate::device::{Device, HardwareAddress, Observation};

/// Failure inside a storage backend
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// A storage fault attributed to the registry operation that hit it
#[derive(Error, Debug)]
#[error("registry {operation} failed: {source}")]
pub struct RegistryError {
    pub operation: &'static str,
    #[source]
    pub source: StorageError,
}

impl RegistryError {
    pub fn new(operation: &'static str, source: impl Into<StorageError>) -> Self {
        Self {
            operation,
            source: source.into(),
        }
    }

    fn poisoned(operation: &'static str) -> Self {
        Self::new(
            operation,
            StorageError::Unavailable("registry lock poisoned".to_string()),
        )
    }
}

/// Backend that persists the full device set
pub trait Storage: Send + Sync {
    /// Load every persisted device
    fn load(&self) -> Result<Vec<Device>, StorageError>;

    /// Atomically replace the persisted set with `devices`
    fn save(&self, devices: &[Device]) -> Result<(), StorageError>;
}

/// Result of a single upsert
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No record existed; one was created
    Created(Device),
    /// An existing record was refreshed
    Updated(Device),
    /// The observation was older than the stored `last_seen` and was ignored
    Stale(Device),
}

impl UpsertOutcome {
    pub fn device(&self) -> &Device {
        match self {
            Self::Created(d) | Self::Updated(d) | Self::Stale(d) => d,
        }
    }
}

/// Repository interface over the device set
pub trait DeviceRepository: Send + Sync {
    /// Look up a device; `Ok(None)` when unknown
    fn find_by_hardware_address(
        &self,
        addr: &HardwareAddress,
    ) -> Result<Option<Device>, RegistryError>;

    /// Create or refresh the record for `observation.hardware_address`.
    ///
    /// Repeating a call with identical arguments leaves the registry unchanged.
    fn upsert(
        &self,
        observation: &Observation,
        observed_at: DateTime<Utc>,
    ) -> Result<UpsertOutcome, RegistryError>;

    /// Every known device, ordered by hardware address
    fn list_all(&self) -> Result<Vec<Device>, RegistryError>;
}

/// Device registry backed by a [`Storage`] implementation
pub struct DeviceRegistry<S: Storage> {
    storage: S,
    devices: RwLock<BTreeMap<HardwareAddress, Device>>,
    writer: Mutex<()>,
}

impl<S: Storage> DeviceRegistry<S> {
    /// Open the registry, loading existing records from `storage`
    pub fn open(storage: S) -> Result<Self, RegistryError> {
        let loaded = storage.load().map_err(|e| RegistryError::new("open", e))?;

        let mut devices: BTreeMap<HardwareAddress, Device> = BTreeMap::new();
        for device in loaded {
            match devices.get(&device.hardware_address) {
                Some(existing) if existing.last_seen >= device.last_seen => {
                    warn!(
                        hardware_address = %device.hardware_address,
                        "Duplicate record in storage, keeping most recent"
                    );
                }
                _ => {
                    devices.insert(device.hardware_address.clone(), device);
                }
            }
        }

        debug!(devices = devices.len(), "Loaded stored devices");

        Ok(Self {
            storage,
            devices: RwLock::new(devices),
            writer: Mutex::new(()),
        })
    }

    /// Number of known devices
    pub fn len(&self) -> usize {
        match self.devices.read() {
            Ok(devices) => devices.len(),
            Err(poisoned) => {
                warn!("Registry lock poisoned, reporting last known device count");
                poisoned.into_inner().len()
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DeviceRegistry<MemoryStorage> {
    /// Volatile registry for tests and one-shot scans
    pub fn in_memory() -> Self {
        Self {
            storage: MemoryStorage,
            devices: RwLock::new(BTreeMap::new()),
            writer: Mutex::new(()),
        }
    }
}

impl<S: Storage> DeviceRepository for DeviceRegistry<S> {
    fn find_by_hardware_address(
        &self,
        addr: &HardwareAddress,
    ) -> Result<Option<Device>, RegistryError> {
        let devices = self
            .devices
            .read()
            .map_err(|_| RegistryError::poisoned("find_by_hardware_address"))?;
        Ok(devices.get(addr).cloned())
    }

    fn upsert(
        &self,
        observation: &Observation,
        observed_at: DateTime<Utc>,
    ) -> Result<UpsertOutcome, RegistryError> {
        let _writer = self
            .writer
            .lock()
            .map_err(|_| RegistryError::poisoned("upsert"))?;

        let key = &observation.hardware_address;
        let (next, device, outcome) = {
            let devices = self
                .devices
                .read()
                .map_err(|_| RegistryError::poisoned("upsert"))?;

            let found = devices.get(key);
            let (device, outcome): (Device, fn(Device) -> UpsertOutcome) = match found {
                Some(existing) => {
                    let mut updated = existing.clone();
                    if !updated.apply(observation, observed_at) {
                        debug!(
                            hardware_address = %key,
                            last_seen = %existing.last_seen,
                            observed_at = %observed_at,
                            "Ignoring stale observation"
                        );
                        return Ok(UpsertOutcome::Stale(updated));
                    }
                    if &updated == existing {
                        return Ok(UpsertOutcome::Updated(updated));
                    }
                    (updated, UpsertOutcome::Updated)
                }
                None => (Device::new(observation, observed_at), UpsertOutcome::Created),
            };

            let mut next = devices.clone();
            next.insert(key.clone(), device.clone());
            (next, device, outcome)
        };

        let snapshot: Vec<Device> = next.values().cloned().collect();
        self.storage
            .save(&snapshot)
            .map_err(|e| RegistryError::new("upsert", e))?;

        *self
            .devices
            .write()
            .map_err(|_| RegistryError::poisoned("upsert"))? = next;
        Ok(outcome(device))
    }

    fn list_all(&self) -> Result<Vec<Device>, RegistryError> {
        let devices = self
            .devices
            .read()
            .map_err(|_| RegistryError::poisoned("list_all"))?;
        Ok(devices.values().cloned().collect())
    }
}

/// Non-persistent backend
#[derive(Debug, Default, Clone, Copy)]
pub struct MemoryStorage;

impl Storage for MemoryStorage {
    fn load(&self) -> Result<Vec<Device>, StorageError> {
        Ok(Vec::new())
    }

    fn save(&self, _devices: &[Device]) -> Result<(), StorageError> {
        Ok(())
    }
}

/// On-disk registry document
#[derive(Debug, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default = "default_version")]
    version: u32,
    #[serde(default)]
    devices: Vec<Device>,
}

fn default_version() -> u32 {
    1
}

/// JSON file backend.
///
/// Writes go to a sibling temporary file which is synced and then renamed
/// over the target, so a crash mid-write leaves the previous file intact.
#[derive(Debug, Clone)]
pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "devices.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl Storage for JsonFileStorage {
    fn load(&self) -> Result<Vec<Device>, StorageError> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "No registry file found, starting empty");
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.path)?;
        let file: RegistryFile = serde_json::from_str(&content)?;
        Ok(file.devices)
    }

    fn save(&self, devices: &[Device]) -> Result<(), StorageError> {
        let file = RegistryFile {
            version: default_version(),
            devices: devices.to_vec(),
        };
        let content = serde_json::to_string_pretty(&file)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let temp = self.temp_path();
        {
            let mut out = File::create(&temp)?;
            out.write_all(content.as_bytes())?;
            out.sync_all()?;
        }
        fs::rename(&temp, &self.path)?;

        debug!(path = %self.path.display(), devices = devices.len(), "Saved registry");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc, Arc};
    use std::thread;
    use tempfile::TempDir;

    fn hw(s: &str) -> HardwareAddress {
        s.parse().unwrap()
    }

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 10, 12, 0, 0).unwrap() + Duration::seconds(secs)
    }

    /// Backend that refuses to persist any snapshot containing `poison`
    struct RefusingStorage {
        poison: HardwareAddress,
    }

    impl Storage for RefusingStorage {
        fn load(&self) -> Result<Vec<Device>, StorageError> {
            Ok(Vec::new())
        }

        fn save(&self, devices: &[Device]) -> Result<(), StorageError> {
            if devices.iter().any(|d| d.hardware_address == self.poison) {
                return Err(StorageError::Unavailable("disk full".to_string()));
            }
            Ok(())
        }
    }

    /// Backend that counts every accepted snapshot
    #[derive(Default)]
    struct CountingStorage {
        saves: AtomicUsize,
    }

    impl Storage for CountingStorage {
        fn load(&self) -> Result<Vec<Device>, StorageError> {
            Ok(Vec::new())
        }

        fn save(&self, _devices: &[Device]) -> Result<(), StorageError> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Backend whose `save` blocks until the test releases it
    struct GatedStorage {
        entered: mpsc::Sender<()>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl Storage for GatedStorage {
        fn load(&self) -> Result<Vec<Device>, StorageError> {
            Ok(Vec::new())
        }

        fn save(&self, _devices: &[Device]) -> Result<(), StorageError> {
            let _ = self.entered.send(());
            let release = self.release.lock().unwrap();
            let _ = release.recv();
            Ok(())
        }
    }

    #[test]
    fn test_upsert_creates_then_updates() {
        let registry = DeviceRegistry::in_memory();
        let obs = Observation::new("192.168.4.10", hw("aa:bb:cc:dd:ee:ff"));

        let first = registry.upsert(&obs, t(0)).unwrap();
        assert!(matches!(first, UpsertOutcome::Created(_)));

        let moved = Observation::new("192.168.4.11", hw("aa:bb:cc:dd:ee:ff"));
        let second = registry.upsert(&moved, t(10)).unwrap();
        assert!(matches!(second, UpsertOutcome::Updated(_)));
        assert_eq!(second.device().network_address, "192.168.4.11");
        assert_eq!(second.device().last_seen, t(10));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let registry = DeviceRegistry::in_memory();
        let obs = Observation::new("192.168.4.10", hw("aa:bb:cc:dd:ee:ff"));

        registry.upsert(&obs, t(0)).unwrap();
        let once = registry.list_all().unwrap();
        registry.upsert(&obs, t(0)).unwrap();
        assert_eq!(registry.list_all().unwrap(), once);
    }

    #[test]
    fn test_stale_upsert_leaves_record() {
        let registry = DeviceRegistry::in_memory();
        registry
            .upsert(&Observation::new("10.0.0.5", hw("aa:bb:cc:dd:ee:ff")), t(100))
            .unwrap();

        let outcome = registry
            .upsert(&Observation::new("10.0.0.6", hw("aa:bb:cc:dd:ee:ff")), t(50))
            .unwrap();
        assert!(matches!(outcome, UpsertOutcome::Stale(_)));

        let device = registry
            .find_by_hardware_address(&hw("aa:bb:cc:dd:ee:ff"))
            .unwrap()
            .unwrap();
        assert_eq!(device.network_address, "10.0.0.5");
        assert_eq!(device.last_seen, t(100));
    }

    #[test]
    fn test_uniqueness_across_many_upserts() {
        let registry = DeviceRegistry::in_memory();
        let macs = ["aa:bb:cc:dd:ee:01", "AA:BB:CC:DD:EE:01", "aa-bb-cc-dd-ee-02"];
        for (i, mac) in macs.iter().cycle().take(12).enumerate() {
            let obs = Observation::new(format!("10.0.0.{}", i), hw(mac));
            registry.upsert(&obs, t(i as i64)).unwrap();
        }

        let all = registry.list_all().unwrap();
        assert_eq!(all.len(), 2);
        assert!(all[0].hardware_address < all[1].hardware_address);
    }

    #[test]
    fn test_find_unknown_is_none() {
        let registry = DeviceRegistry::in_memory();
        assert!(registry
            .find_by_hardware_address(&hw("00:11:22:33:44:55"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_failed_save_leaves_registry_unchanged() {
        let registry = DeviceRegistry::open(RefusingStorage {
            poison: hw("00:00:00:00:00:02"),
        })
        .unwrap();

        registry
            .upsert(&Observation::new("10.0.0.1", hw("00:00:00:00:00:01")), t(0))
            .unwrap();
        let err = registry
            .upsert(&Observation::new("10.0.0.2", hw("00:00:00:00:00:02")), t(0))
            .unwrap_err();

        assert_eq!(err.operation, "upsert");
        assert!(matches!(err.source, StorageError::Unavailable(_)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_json_storage_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("state").join("devices.json");

        {
            let registry = DeviceRegistry::open(JsonFileStorage::new(&path)).unwrap();
            registry
                .upsert(
                    &Observation::new("192.168.4.10", hw("aa:bb:cc:dd:ee:ff")).with_hostname("nas"),
                    t(0),
                )
                .unwrap();
        }

        let reopened = DeviceRegistry::open(JsonFileStorage::new(&path)).unwrap();
        let devices = reopened.list_all().unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].hostname.as_deref(), Some("nas"));
        assert_eq!(devices[0].last_seen, t(0));
        assert!(!path.with_file_name("devices.json.tmp").exists());
    }

    #[test]
    fn test_json_storage_rejects_corrupt_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("devices.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = DeviceRegistry::open(JsonFileStorage::new(&path))
            .err()
            .unwrap();
        assert_eq!(err.operation, "open");
        assert!(matches!(err.source, StorageError::Json(_)));
    }

    #[test]
    fn test_open_dedups_stored_records() {
        let temp_dir = TempDir::new().unwrap();
        let storage = JsonFileStorage::new(temp_dir.path().join("devices.json"));
        let older = Device::new(&Observation::new("10.0.0.1", hw("aa:bb:cc:dd:ee:ff")), t(0));
        let newer = Device::new(&Observation::new("10.0.0.2", hw("aa:bb:cc:dd:ee:ff")), t(5));
        storage.save(&[newer.clone(), older]).unwrap();

        let registry = DeviceRegistry::open(storage).unwrap();
        assert_eq!(registry.list_all().unwrap(), vec![newer]);
    }

    #[test]
    fn test_concurrent_upserts_keep_every_address() {
        const THREADS: u8 = 8;
        const PER_THREAD: u8 = 20;
        const SHARED: u8 = 5;

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("devices.json");
        let registry = Arc::new(DeviceRegistry::open(JsonFileStorage::new(&path)).unwrap());

        let workers: Vec<_> = (0..THREADS)
            .map(|thread_id| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    for i in 0..PER_THREAD {
                        let own = HardwareAddress::from_octets([0, 0, 0, 0, thread_id, i]);
                        let shared = HardwareAddress::from_octets([0xaa, 0, 0, 0, 0, i % SHARED]);
                        let at = t(i64::from(i));

                        let ip = format!("10.0.{}.{}", thread_id, i);
                        let obs = Observation::new(ip, own.clone());
                        registry.upsert(&obs, at).unwrap();
                        registry
                            .upsert(&Observation::new("10.0.255.1", shared), at)
                            .unwrap();

                        let seen = registry.list_all().unwrap();
                        assert!(seen.iter().any(|d| d.hardware_address == own));
                        assert!(seen
                            .windows(2)
                            .all(|w| w[0].hardware_address < w[1].hardware_address));
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }

        let expected = usize::from(THREADS) * usize::from(PER_THREAD) + usize::from(SHARED);
        assert_eq!(registry.len(), expected);

        let reopened = DeviceRegistry::open(JsonFileStorage::new(&path)).unwrap();
        assert_eq!(reopened.list_all().unwrap().len(), expected);
        assert_eq!(reopened.list_all().unwrap(), registry.list_all().unwrap());
    }

    #[test]
    fn test_unchanged_and_stale_upserts_skip_storage() {
        let registry = DeviceRegistry::open(CountingStorage::default()).unwrap();
        let obs = Observation::new("192.168.4.10", hw("aa:bb:cc:dd:ee:ff"));

        registry.upsert(&obs, t(10)).unwrap();
        registry.upsert(&obs, t(10)).unwrap();
        registry.upsert(&obs, t(5)).unwrap();
        assert_eq!(registry.storage.saves.load(Ordering::SeqCst), 1);

        registry.upsert(&obs, t(20)).unwrap();
        assert_eq!(registry.storage.saves.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_readers_see_previous_snapshot_during_save() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let registry = Arc::new(
            DeviceRegistry::open(GatedStorage {
                entered: entered_tx,
                release: Mutex::new(release_rx),
            })
            .unwrap(),
        );

        let writer = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                registry
                    .upsert(&Observation::new("10.0.0.1", hw("00:00:00:00:00:01")), t(0))
                    .unwrap()
            })
        };

        entered_rx.recv().unwrap();
        assert!(registry.list_all().unwrap().is_empty());
        assert!(registry
            .find_by_hardware_address(&hw("00:00:00:00:00:01"))
            .unwrap()
            .is_none());

        release_tx.send(()).unwrap();
        assert!(matches!(writer.join().unwrap(), UpsertOutcome::Created(_)));
        assert_eq!(registry.list_all().unwrap().len(), 1);
    }

    #[test]
    fn test_poisoned_lock_is_reported() {
        let registry = DeviceRegistry::in_memory();
        registry
            .upsert(&Observation::new("10.0.0.1", hw("00:00:00:00:00:01")), t(0))
            .unwrap();

        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = registry.devices.write().unwrap();
            panic!("writer died holding the lock");
        }));

        assert_eq!(registry.len(), 1);
        let err = registry.list_all().unwrap_err();
        assert_eq!(err.operation, "list_all");
        assert!(matches!(err.source, StorageError::Unavailable(_)));
    }
}
