//! Lifecycle management subsystem.
//!
//! # Design Decisions
//! - Ordered startup: config first, then vault/store, then background
//!   tasks, then the listener
//! - Shutdown fans out over a broadcast channel all long-running tasks
//!   subscribe to

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
