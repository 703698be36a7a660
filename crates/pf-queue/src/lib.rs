//! Durable publishing queue: public queue operations, the dispatcher worker
//! that leases due items and drives platform adapters, backoff policy, and
//! the lease reaper.

pub mod backoff;
pub mod dispatcher;
pub mod queue;
pub mod rate_limit;
pub mod reaper;

pub use backoff::BackoffPolicy;
pub use dispatcher::{BatchReport, Dispatcher, PublishListener};
pub use queue::{BulkOutcome, EnqueueRequest, QueueError, QueueService};
pub use reaper::{Reaper, SweepReport};
