//! Checkback metrics pipeline: durable fixed-offset metric pulls after each
//! publish, plus the aggregator that rolls per-variant snapshots up to their
//! content item.

pub mod checkback;
pub mod rollup;
pub mod worker;

pub use checkback::CheckbackScheduler;
pub use rollup::{MetricsError, MetricsService, PollRecentReport};
pub use worker::{CheckbackReport, CheckbackWorker, CommentSink, PlatformSyncStats};
