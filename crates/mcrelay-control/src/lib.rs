//! Control plane for agent connections
pub mod registry;
pub mod task_tracker;

pub use registry::{ConnectionRegistry, RegistryError};
pub use task_tracker::TaskTracker;
