//! HTTP surface.
//!
//! # Data Flow
//! ```text
//! request
//!     → server.rs (Axum setup, middleware, state)
//!     → handlers.rs (token administration, upstream processing)
//!     → token manager / rotating executors
//! ```

pub mod handlers;
pub mod server;

pub use server::{AppState, HttpServer};
