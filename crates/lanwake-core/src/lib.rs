//! lanwake Core - Device identity, registry, and scan reconciliation
//!
//! This crate provides the foundational pieces of the lanwake system:
//! - Hardware address parsing and the persisted `Device` record
//! - Device registry with durable JSON storage keyed by hardware address
//! - Reconciliation of scan results into the registry
//! - The query/command service used by the daemon's REST layer

pub mod device;
pub mod error;
pub mod reconcile;
pub mod registry;
pub mod service;
pub mod transport;

pub use device::{Device, HardwareAddress, Observation};
pub use error::{ServiceError, ValidationError};
pub use reconcile::{
    dedup_last_wins, reconcile, EntryFailure, PartialReconciliationError, ReconciliationSummary,
};
pub use registry::{
    DeviceRegistry, DeviceRepository, JsonFileStorage, MemoryStorage, RegistryError, Storage,
    StorageError, UpsertOutcome,
};
pub use service::{DeviceService, ServiceConfig, DEFAULT_PROBE_TIMEOUT};
pub use transport::{
    ProbeError, ProbeTransport, ScanRange, WakeError, WakeTarget, WakeTransmitter,
    DEFAULT_WAKE_BROADCAST, DEFAULT_WAKE_PORT,
};
