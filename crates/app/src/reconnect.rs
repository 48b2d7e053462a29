//! Connectivity state machine for one remote MQTT client.
//!
//! The client library owns the actual backoff. The monitor only observes
//! connect and disconnect transitions and decides when to warn the user and
//! when to give up on the broker.

/// Consecutive failures after which the user is told the client is reconnecting.
pub const RECONNECTING_THRESHOLD: u32 = 3;

/// Consecutive failures after which a never-connected client gives up.
pub const GIVE_UP_THRESHOLD: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

/// What the owner of the client must do after a disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectOutcome {
    /// Keep waiting for the library to reconnect.
    Retry,
    /// Raise the one-off "reconnecting" notice, then keep waiting.
    Reconnecting,
    /// Stop, evict the client and raise the "failed connection" notice.
    GiveUp,
}

#[derive(Debug)]
pub struct ReconnectMonitor {
    state: LinkState,
    failures: u32,
    notified: bool,
    connected_since_attempt: bool,
}

impl Default for ReconnectMonitor {
    fn default() -> Self {
        Self {
            state: LinkState::Idle,
            failures: 0,
            notified: false,
            connected_since_attempt: false,
        }
    }
}

impl ReconnectMonitor {
    #[must_use]
    pub fn state(&self) -> LinkState {
        self.state
    }

    #[must_use]
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// An explicit connect attempt starts a fresh history.
    pub fn connecting(&mut self) {
        *self = Self {
            state: LinkState::Connecting,
            ..Self::default()
        };
    }

    pub fn connected(&mut self) {
        self.state = LinkState::Connected;
        self.failures = 0;
        self.notified = false;
        self.connected_since_attempt = true;
    }

    pub fn disconnected(&mut self) -> ReconnectOutcome {
        if matches!(self.state, LinkState::Failed | LinkState::Idle) {
            return ReconnectOutcome::Retry;
        }
        self.failures += 1;

        if self.failures >= GIVE_UP_THRESHOLD && !self.connected_since_attempt {
            self.state = LinkState::Failed;
            return ReconnectOutcome::GiveUp;
        }

        self.state = LinkState::Reconnecting;
        if self.failures >= RECONNECTING_THRESHOLD && !self.notified {
            self.notified = true;
            return ReconnectOutcome::Reconnecting;
        }
        ReconnectOutcome::Retry
    }

    /// The owner disconnected on purpose.
    pub fn stopped(&mut self) {
        self.state = LinkState::Idle;
    }
}
