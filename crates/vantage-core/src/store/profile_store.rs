// ── Optimistic profile store ──
//
// Holds the last confirmed profile index plus an optimistic pointer set
// by a successful switch. Readers see the optimistic pointer until fresh
// data is committed.

use tokio::sync::watch;
use tracing::debug;

use crate::model::{ProfilesConfig, SwitchResult};

/// Everything the store knows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileStoreState {
    /// Last profile index fetched from the backend.
    pub confirmed: Option<ProfilesConfig>,
    /// Profile a successful switch moved to, not yet confirmed.
    pub optimistic_current: Option<String>,
    /// A confirmation fetch is due.
    pub hydrating: bool,
    /// Incremented on every mutation.
    pub last_event_seq: u64,
    pub last_result: Option<SwitchResult>,
}

impl ProfileStoreState {
    /// The profile index readers should see: `confirmed`, with `current`
    /// overridden by a differing optimistic pointer.
    pub fn effective_profiles(&self) -> Option<ProfilesConfig> {
        let confirmed = self.confirmed.as_ref()?;
        match &self.optimistic_current {
            Some(optimistic) if confirmed.current.as_ref() != Some(optimistic) => {
                Some(confirmed.with_current(optimistic.clone()))
            }
            _ => Some(confirmed.clone()),
        }
    }

    /// Uid of the effective current profile.
    pub fn effective_current(&self) -> Option<&str> {
        self.optimistic_current
            .as_deref()
            .or_else(|| self.confirmed.as_ref()?.current.as_deref())
    }
}

/// Observable holder of [`ProfileStoreState`].
///
/// Mutated only through [`apply_switch_result`](Self::apply_switch_result)
/// and [`commit_hydrated`](Self::commit_hydrated).
#[derive(Debug)]
pub struct ProfileStore {
    state: watch::Sender<ProfileStoreState>,
}

impl Default for ProfileStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ProfileStore {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ProfileStoreState::default());
        Self { state }
    }

    /// Record a switch outcome. Success moves the optimistic pointer and
    /// marks the store as needing hydration; failure only records the result.
    pub fn apply_switch_result(&self, result: SwitchResult) {
        self.state.send_modify(|state| {
            state.last_event_seq += 1;
            if result.success {
                state.optimistic_current = Some(result.profile_id.clone());
                state.hydrating = true;
            }
            debug!(
                profile = %result.profile_id,
                success = result.success,
                seq = state.last_event_seq,
                "switch result applied"
            );
            state.last_result = Some(result);
        });
    }

    /// Replace confirmed data with a fresh fetch and drop any optimistic
    /// pointer. Safe to call at any time.
    pub fn commit_hydrated(&self, data: ProfilesConfig) {
        self.state.send_modify(|state| {
            state.confirmed = Some(data);
            state.optimistic_current = None;
            state.hydrating = false;
            state.last_event_seq += 1;
        });
    }

    pub fn snapshot(&self) -> ProfileStoreState {
        self.state.borrow().clone()
    }

    pub fn effective_profiles(&self) -> Option<ProfilesConfig> {
        self.state.borrow().effective_profiles()
    }

    pub fn effective_current(&self) -> Option<String> {
        self.state.borrow().effective_current().map(str::to_owned)
    }

    pub fn is_hydrating(&self) -> bool {
        self.state.borrow().hydrating
    }

    pub fn last_result(&self) -> Option<SwitchResult> {
        self.state.borrow().last_result.clone()
    }

    /// Receiver notified on every mutation.
    pub fn subscribe(&self) -> watch::Receiver<ProfileStoreState> {
        self.state.subscribe()
    }
}
