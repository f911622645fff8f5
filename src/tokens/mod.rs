//! Token domain model and lifecycle orchestration.
//!
//! # Data Flow
//! ```text
//! register:  plaintext → vault (encrypt + digest) → store.insert
//! select:    store.fetch_* → vault.decrypt → ApiToken (in memory only)
//! lock/unlock: conditional store transitions, logged either way
//! ```

mod manager;
mod model;

pub use manager::{RegisterOutcome, TokenError, TokenManager};
pub use model::{ApiToken, Provider};
