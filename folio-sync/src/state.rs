//! Subscription state machine.
//!
//! Pure and synchronous: the driver task feeds it events and carries out
//! what it returns (arm a timer, serve fallback data, resubscribe).
//!
//! ```text
//!                  backend enabled ∧ online
//! [DISCONNECTED] ──────────────────────────► [CONNECTING] ──push──► [LIVE]
//!       ▲                                       ▲    │                 │
//!       │ offline / disabled                    │    │ transient error │
//!       │ (from any state)          timer fired │    ▼                 │
//!       │                                  [RETRYING n] ◄──────────────┘
//!       │                                       │
//!       │                 n = max ∧ transient,  │   non-transient error
//!       │                 or non-transient      ▼   (from any state)
//!       └──────────────────────────────────  [DEGRADED]
//! ```
//!
//! A subscription that cannot be set up at all parks in `Failed` instead,
//! keeping whatever snapshot was already shown.
//!
//! A successful push resets the retry counter, so a transient error from
//! `Live` always starts again at `Retrying { attempt: 1 }`.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum SyncState {
    /// Backend disabled or caller offline; serving fallback data.
    #[default]
    Disconnected,
    /// Subscription requested, nothing received yet.
    Connecting,
    /// At least one snapshot received on the current subscription.
    Live,
    /// Waiting to resubscribe after transient failure number `attempt`.
    Retrying { attempt: u32 },
    /// Gave up on the backend; serving fallback data with an error.
    Degraded,
    /// The subscription could not be set up (bad query, rejected request).
    /// The previous snapshot stays in place, which may be empty: no fallback
    /// data is swapped in.
    Failed,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Live => write!(f, "live"),
            Self::Retrying { attempt } => write!(f, "retrying({attempt})"),
            Self::Degraded => write!(f, "degraded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// What to do after a listener failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStep {
    /// Resubscribe after `delay`.
    Retry { attempt: u32, delay: Duration },
    /// Stop and serve fallback data. `retries` is how many retries were
    /// spent before giving up.
    Degrade { retries: u32 },
}

#[derive(Debug, Clone)]
pub struct SyncMachine {
    state: SyncState,
    policy: RetryPolicy,
    attempt: u32,
}

impl SyncMachine {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            state: SyncState::Disconnected,
            policy,
            attempt: 0,
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Retries spent since the last successful push.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// (Re)start: counters reset, then connect or stay disconnected.
    pub fn start(&mut self, backend_enabled: bool, online: bool) -> SyncState {
        self.attempt = 0;
        self.state = if backend_enabled && online {
            SyncState::Connecting
        } else {
            SyncState::Disconnected
        };
        self.state
    }

    pub fn on_snapshot(&mut self) -> SyncState {
        self.attempt = 0;
        self.state = SyncState::Live;
        self.state
    }

    pub fn on_failure(&mut self, transient: bool) -> FailureStep {
        if transient && self.attempt < self.policy.max_retries {
            self.attempt += 1;
            self.state = SyncState::Retrying {
                attempt: self.attempt,
            };
            FailureStep::Retry {
                attempt: self.attempt,
                delay: self.policy.delay_for(self.attempt),
            }
        } else {
            self.state = SyncState::Degraded;
            FailureStep::Degrade {
                retries: self.attempt,
            }
        }
    }

    /// The retry timer fired. Ignored outside `Retrying`.
    pub fn on_retry_elapsed(&mut self) -> SyncState {
        if matches!(self.state, SyncState::Retrying { .. }) {
            self.state = SyncState::Connecting;
        }
        self.state
    }

    /// The subscription request itself was rejected.
    pub fn on_setup_failure(&mut self) -> SyncState {
        self.attempt = 0;
        self.state = SyncState::Failed;
        self.state
    }

    pub fn on_offline(&mut self) -> SyncState {
        self.attempt = 0;
        self.state = SyncState::Disconnected;
        self.state
    }

    /// Connectivity returned. Only leaves `Disconnected`.
    pub fn on_online(&mut self, backend_enabled: bool) -> SyncState {
        if self.state == SyncState::Disconnected && backend_enabled {
            self.attempt = 0;
            self.state = SyncState::Connecting;
        }
        self.state
    }
}
