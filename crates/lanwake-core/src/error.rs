//! Error taxonomy surfaced by the device service

use thiserror::Error;

use crate::reconcile::PartialReconciliationError;
use crate::registry::RegistryError;
use crate::transport::{ProbeError, WakeError};

/// Malformed caller input, rejected before any side effect
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid hardware address: {0:?}")]
    HardwareAddress(String),
    #[error("invalid network address: {0:?}")]
    NetworkAddress(String),
}

/// Errors returned by [`crate::DeviceService`]
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("scan unavailable: {0}")]
    ScanUnavailable(#[from] ProbeError),
    #[error(transparent)]
    PartialReconciliation(#[from] PartialReconciliationError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Wake(#[from] WakeError),
}

impl ServiceError {
    /// Stable category name, used in API error bodies
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::ScanUnavailable(_) => "scan_unavailable",
            Self::PartialReconciliation(_) => "partial_reconciliation",
            Self::Registry(_) => "registry",
            Self::Wake(_) => "wake",
        }
    }

    /// Whether the caller is at fault (bad input) rather than the server
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}
