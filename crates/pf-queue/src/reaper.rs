use std::sync::Arc;

use pf_core::clock::SharedClock;
use pf_core::error::StoreError;
use pf_core::store::Store;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Result of a single reaper sweep.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SweepReport {
    /// Expired leases restored to `queued` (no attempt burned).
    pub leases_reaped: u64,
    /// `retry` items whose backoff elapsed, promoted to `queued`.
    pub retries_promoted: u64,
}

/// Periodic sweep restoring expired leases and promoting elapsed retries.
///
/// A crashed worker's leases expire on their own; the reaper is what turns
/// that expiry back into dispatchable work.
pub struct Reaper {
    store: Arc<Store>,
    clock: SharedClock,
}

impl Reaper {
    pub fn new(store: Arc<Store>, clock: SharedClock) -> Self {
        Self { store, clock }
    }

    pub async fn run_sweep(&self) -> Result<SweepReport, StoreError> {
        let now = self.clock.now();
        let leases_reaped = self.store.reap_expired_leases(now).await?;
        let retries_promoted = self.store.promote_due_retries(now).await?;

        if leases_reaped > 0 || retries_promoted > 0 {
            info!(leases_reaped, retries_promoted, "reaper sweep restored work");
        } else {
            debug!("reaper sweep found nothing to restore");
        }

        Ok(SweepReport {
            leases_reaped,
            retries_promoted,
        })
    }
}
