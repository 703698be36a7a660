//! Application container: wires the store, adapter registry, services, and
//! worker loops together, with graceful shutdown and an observability event
//! bus.

pub mod daemon;
pub mod event_bus;
pub mod shutdown;

pub use daemon::{CommentBridge, Daemon};
pub use event_bus::{EventBus, PostEvent};
pub use shutdown::ShutdownSignal;
