//! Application state management

use anyhow::{Context, Result};
use lanwake_core::{
    Device, DeviceRegistry, DeviceService, HardwareAddress, JsonFileStorage,
    ReconciliationSummary, ServiceError, WakeTarget,
};
use lanwake_discovery::{ArpProbe, Beacon, UdpWakeTransmitter};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinError;
use tracing::info;

use crate::config::Config;

/// Events pushed to WebSocket clients
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum DaemonEvent {
    ScanCompleted(ReconciliationSummary),
    DeviceWoken {
        hardware_address: HardwareAddress,
        destination: String,
    },
    BeaconReceived(Device),
}

/// Failure of a request routed through the state
#[derive(Error, Debug)]
pub enum RequestError {
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error("background task failed: {0}")]
    Task(#[from] JoinError),
}

/// Shared application state
pub struct AppState {
    /// Device query/command service
    pub service: Arc<DeviceService>,
    /// Configuration
    pub config: Config,
    /// Event broadcast for WebSocket clients
    pub events: broadcast::Sender<DaemonEvent>,
}

impl AppState {
    /// Create application state backed by the configured registry file,
    /// the ARP probe and the UDP wake transmitter
    pub fn new(config: Config) -> Result<Arc<Self>> {
        let storage = JsonFileStorage::new(&config.registry.path);
        let registry = DeviceRegistry::open(storage).with_context(|| {
            format!("opening registry {}", config.registry.path.display())
        })?;
        info!(
            path = %config.registry.path.display(),
            devices = registry.len(),
            "Device registry opened"
        );

        let service = DeviceService::new(
            Arc::new(registry),
            Arc::new(ArpProbe::new(config.discovery.interface.clone())),
            Arc::new(UdpWakeTransmitter::default()),
            config.to_service_config(),
        );

        Ok(Self::with_service(Arc::new(service), config))
    }

    /// Create application state around an existing service
    pub fn with_service(service: Arc<DeviceService>, config: Config) -> Arc<Self> {
        let (events, _) = broadcast::channel(100);
        Arc::new(Self {
            service,
            config,
            events,
        })
    }

    /// Subscribe to daemon events
    pub fn subscribe(&self) -> broadcast::Receiver<DaemonEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: DaemonEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Run a service call on the blocking pool
    async fn blocking<T, F>(&self, f: F) -> Result<T, RequestError>
    where
        T: Send + 'static,
        F: FnOnce(&DeviceService) -> Result<T, ServiceError> + Send + 'static,
    {
        let service = self.service.clone();
        Ok(tokio::task::spawn_blocking(move || f(&service)).await??)
    }

    /// List devices, scanning first unless `from_database` is set
    pub async fn list_devices(&self, from_database: bool) -> Result<Vec<Device>, RequestError> {
        if !from_database {
            self.scan().await?;
        }
        self.blocking(|service| service.list_devices()).await
    }

    pub async fn find_device(&self, hardware_address: String) -> Result<Option<Device>, RequestError> {
        self.blocking(move |service| service.find_device(&hardware_address))
            .await
    }

    /// Probe the subnet and reconcile the replies
    pub async fn scan(&self) -> Result<ReconciliationSummary, RequestError> {
        let summary = self
            .blocking(|service| service.scan_and_reconcile())
            .await?;
        self.publish(DaemonEvent::ScanCompleted(summary.clone()));
        Ok(summary)
    }

    pub async fn wake(
        &self,
        hardware_address: String,
        network_address: Option<String>,
        port: Option<u16>,
    ) -> Result<WakeTarget, RequestError> {
        let target = self
            .blocking(move |service| {
                service.wake(&hardware_address, network_address.as_deref(), port)
            })
            .await?;
        self.publish(DaemonEvent::DeviceWoken {
            hardware_address: target.hardware_address.clone(),
            destination: target.socket_addr().to_string(),
        });
        Ok(target)
    }

    /// Reconcile one agent beacon and return the resulting record
    pub async fn record_beacon(&self, beacon: Beacon) -> Result<Option<Device>, RequestError> {
        let hardware_address = beacon.hardware_address.clone();
        let device = self
            .blocking(move |service| {
                service.record_observations(&[beacon.into()])?;
                service.find_device(hardware_address.as_str())
            })
            .await?;
        if let Some(device) = &device {
            self.publish(DaemonEvent::BeaconReceived(device.clone()));
        }
        Ok(device)
    }
}
