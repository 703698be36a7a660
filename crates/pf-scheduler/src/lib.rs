//! Inventory-aware scheduling: classify ready artifacts, derive a
//! cadence-bounded plan over the horizon, and materialize queue items.

pub mod inventory;
pub mod plan;
pub mod scheduler;
pub mod windows;

pub use inventory::{Inventory, InventoryScanner};
pub use plan::{DaySlots, SchedulePlan};
pub use scheduler::{ScheduleError, ScheduleOutcome, ScheduleRequest, SchedulerService};
