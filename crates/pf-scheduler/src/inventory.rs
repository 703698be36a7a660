use pf_core::store::Store;
use pf_core::types::{Artifact, ArtifactForm};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::scheduler::ScheduleError;

/// Ready artifacts split by form, FIFO by `ready_at` within each form.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Inventory {
    pub short: Vec<Artifact>,
    pub long: Vec<Artifact>,
}

impl Inventory {
    pub fn short_count(&self) -> u32 {
        self.short.len() as u32
    }

    pub fn long_count(&self) -> u32 {
        self.long.len() as u32
    }

    pub fn total(&self) -> u32 {
        self.short_count() + self.long_count()
    }
}

/// Enumerates publishable artifacts from the store.
pub struct InventoryScanner;

impl InventoryScanner {
    /// Scan unconsumed artifacts and classify by form. Store failures
    /// surface as `InventoryUnavailable`; the planner treats them as a
    /// reason not to plan, never as an empty inventory.
    pub async fn scan(store: &Store, workspace: &str) -> Result<Inventory, ScheduleError> {
        let artifacts = store
            .list_ready_artifacts(workspace)
            .await
            .map_err(|e| ScheduleError::InventoryUnavailable(e.to_string()))?;

        let mut inventory = Inventory::default();
        for artifact in artifacts {
            match artifact.form {
                ArtifactForm::Short => inventory.short.push(artifact),
                ArtifactForm::Long => inventory.long.push(artifact),
            }
        }

        debug!(
            workspace,
            short = inventory.short.len(),
            long = inventory.long.len(),
            "inventory scanned"
        );
        Ok(inventory)
    }
}
