//! Shared active-credential slot.
//!
//! Executors for one provider share a single slot instead of each caching
//! a credential privately. Locking a rate-limited token and clearing the
//! slot happen under a generation check, so of two concurrent observers of
//! the same 429 only one actually rotates, and nobody re-acquires a token
//! that was just locked.

use std::sync::Mutex;

use crate::tokens::ApiToken;

#[derive(Default)]
struct SlotState {
    generation: u64,
    active: Option<ApiToken>,
}

/// Generation-counted holder of the credential currently in use for one
/// provider.
#[derive(Default)]
pub struct CredentialSlot {
    state: Mutex<SlotState>,
}

impl CredentialSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// The credential currently installed, with its generation.
    pub fn current(&self) -> Option<(u64, ApiToken)> {
        let state = self.state.lock().expect("credential slot poisoned");
        state
            .active
            .as_ref()
            .map(|token| (state.generation, token.clone()))
    }

    /// Install a freshly selected credential, bumping the generation.
    pub fn install(&self, token: ApiToken) -> (u64, ApiToken) {
        let mut state = self.state.lock().expect("credential slot poisoned");
        state.generation += 1;
        state.active = Some(token.clone());
        (state.generation, token)
    }

    /// Clear the slot, but only if `generation` still names the installed
    /// credential. Returns whether this call did the clearing.
    pub fn invalidate(&self, generation: u64) -> bool {
        let mut state = self.state.lock().expect("credential slot poisoned");
        if state.generation == generation && state.active.is_some() {
            state.active = None;
            true
        } else {
            false
        }
    }
}
