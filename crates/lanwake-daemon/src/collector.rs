//! Agent beacon collector

use lanwake_discovery::{BeaconError, BeaconListener};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::state::AppState;

/// Reconcile every beacon received on `listener`.
///
/// Malformed datagrams and registry failures are logged and skipped; only a
/// socket error ends the loop.
pub async fn run(state: Arc<AppState>, listener: BeaconListener) -> Result<(), BeaconError> {
    loop {
        let (beacon, from) = match listener.recv().await {
            Ok(received) => received,
            Err(BeaconError::Io(e)) => return Err(BeaconError::Io(e)),
            Err(e) => {
                warn!(error = %e, "Discarding malformed beacon");
                continue;
            }
        };

        let hardware_address = beacon.hardware_address.clone();
        match state.record_beacon(beacon).await {
            Ok(_) => debug!(from = %from, hardware_address = %hardware_address, "Beacon recorded"),
            Err(e) => warn!(
                from = %from,
                hardware_address = %hardware_address,
                error = %e,
                "Failed to record beacon"
            ),
        }
    }
}
