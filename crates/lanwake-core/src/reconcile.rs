//! Merge one scan result into the device registry
//!
//! A scan result is a sequence, not a set: the same hardware address can
//! appear more than once (multiple interfaces, retransmitted replies, a lease
//! that flapped mid-scan). Entries are collapsed per hardware address with a
//! last-occurrence-wins policy before anything is written.
//!
//! Reconciliation only creates and updates. A known device missing from the
//! scan is left as it is.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::device::{HardwareAddress, Observation};
use crate::registry::{DeviceRepository, RegistryError, UpsertOutcome};

/// Per-cycle counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationSummary {
    /// Distinct hardware addresses in the scan result
    pub observed: usize,
    pub created: usize,
    pub updated: usize,
    /// Observations older than the stored record, ignored
    pub stale: usize,
    pub failed: usize,
}

impl ReconciliationSummary {
    /// Entries that reached the registry without error
    pub fn succeeded(&self) -> usize {
        self.created + self.updated + self.stale
    }
}

/// One entry the registry refused
#[derive(Debug)]
pub struct EntryFailure {
    pub hardware_address: HardwareAddress,
    pub error: RegistryError,
}

/// Some upserts failed. Successful entries stay written; there is no rollback.
#[derive(Error, Debug)]
#[error(
    "{} of {} entries failed to reconcile: {}",
    .failed.len(),
    .summary.observed,
    failed_list(.failed)
)]
pub struct PartialReconciliationError {
    pub summary: ReconciliationSummary,
    pub succeeded: Vec<HardwareAddress>,
    pub failed: Vec<EntryFailure>,
}

fn failed_list(failed: &[EntryFailure]) -> String {
    failed
        .iter()
        .map(|f| f.hardware_address.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Collapse observations to one per hardware address.
///
/// Output order follows each address's first appearance; the value kept is
/// its last appearance.
pub fn dedup_last_wins(observations: &[Observation]) -> Vec<&Observation> {
    let mut order: Vec<&HardwareAddress> = Vec::new();
    let mut latest: HashMap<&HardwareAddress, &Observation> = HashMap::new();

    for observation in observations {
        let key = &observation.hardware_address;
        if latest.insert(key, observation).is_none() {
            order.push(key);
        }
    }

    order.into_iter().filter_map(|key| latest.get(key).copied()).collect()
}

/// Reconcile a scan result observed at `observed_at` into `registry`.
///
/// Every distinct hardware address gets exactly one `upsert`. A failing entry
/// does not stop the loop; if any entry failed the whole call returns
/// [`PartialReconciliationError`] carrying the summary and per-entry detail.
pub fn reconcile<R>(
    registry: &R,
    observations: &[Observation],
    observed_at: DateTime<Utc>,
) -> Result<ReconciliationSummary, PartialReconciliationError>
where
    R: DeviceRepository + ?Sized,
{
    let distinct = dedup_last_wins(observations);

    let mut summary = ReconciliationSummary {
        observed: distinct.len(),
        ..Default::default()
    };
    let mut succeeded = Vec::new();
    let mut failed = Vec::new();

    for observation in distinct {
        let hw = &observation.hardware_address;
        match registry.upsert(observation, observed_at) {
            Ok(UpsertOutcome::Created(device)) => {
                debug!(
                    hardware_address = %hw,
                    network_address = %device.network_address,
                    "New device"
                );
                summary.created += 1;
                succeeded.push(hw.clone());
            }
            Ok(UpsertOutcome::Updated(device)) => {
                debug!(
                    hardware_address = %hw,
                    network_address = %device.network_address,
                    "Device refreshed"
                );
                summary.updated += 1;
                succeeded.push(hw.clone());
            }
            Ok(UpsertOutcome::Stale(_)) => {
                summary.stale += 1;
                succeeded.push(hw.clone());
            }
            Err(error) => {
                warn!(hardware_address = %hw, error = %error, "Failed to reconcile device");
                summary.failed += 1;
                failed.push(EntryFailure {
                    hardware_address: hw.clone(),
                    error,
                });
            }
        }
    }

    info!(
        observed = summary.observed,
        created = summary.created,
        updated = summary.updated,
        stale = summary.stale,
        failed = summary.failed,
        "Reconciliation complete"
    );

    if failed.is_empty() {
        Ok(summary)
    } else {
        Err(PartialReconciliationError {
            summary,
            succeeded,
            failed,
        })
    }
}
