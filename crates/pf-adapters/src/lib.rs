//! Platform adapter contract, error classification, registry, and the
//! scripted mock adapter used by tests and local runs.

pub mod adapter;
pub mod error;
pub mod mock;
pub mod registry;

pub use adapter::{
    Adapter, AdapterMetrics, CommentRecord, CommentsPage, PublishRequest, PublishResult, RateQuota,
};
pub use error::AdapterError;
pub use mock::MockAdapter;
pub use registry::{AdapterRegistry, RegistryError};
