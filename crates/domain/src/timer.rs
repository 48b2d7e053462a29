//! Timer: a time-based automation trigger.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, ValidationError};
use crate::id::TimerId;
use crate::time::Timestamp;

/// Delay before the first firing of a repeating timer.
pub const REPEAT_FIRST_DELAY: Duration = Duration::from_secs(1);

/// When a timer fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TimerSchedule {
    /// Once, at an absolute instant.
    At { instant: Timestamp },
    /// Every `interval_minutes`, starting shortly after arming.
    Every { interval_minutes: u32 },
}

/// A configured timer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timer {
    pub id: TimerId,
    pub name: String,
    pub schedule: TimerSchedule,
    /// Armed automatically when the scheduler starts.
    pub boot_init: bool,
}

impl Timer {
    /// Create a one-shot timer.
    #[must_use]
    pub fn at(name: impl Into<String>, instant: Timestamp) -> Self {
        Self {
            id: TimerId::new(),
            name: name.into(),
            schedule: TimerSchedule::At { instant },
            boot_init: false,
        }
    }

    /// Create a repeating timer.
    #[must_use]
    pub fn every(name: impl Into<String>, interval_minutes: u32) -> Self {
        Self {
            id: TimerId::new(),
            name: name.into(),
            schedule: TimerSchedule::Every { interval_minutes },
            boot_init: false,
        }
    }

    #[must_use]
    pub fn with_boot_init(mut self, boot_init: bool) -> Self {
        self.boot_init = boot_init;
        self
    }

    /// Check domain invariants.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Validation`] when:
    /// - `name` is empty ([`ValidationError::EmptyName`])
    /// - a repeating timer has a zero interval ([`ValidationError::ZeroInterval`])
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.name.is_empty() {
            return Err(ValidationError::EmptyName.into());
        }
        if matches!(self.schedule, TimerSchedule::Every { interval_minutes: 0 }) {
            return Err(ValidationError::ZeroInterval.into());
        }
        Ok(())
    }
}

impl TimerSchedule {
    /// Period between firings of a repeating schedule.
    #[must_use]
    pub fn period(&self) -> Option<Duration> {
        match self {
            Self::At { .. } => None,
            Self::Every { interval_minutes } => {
                Some(Duration::from_secs(u64::from(*interval_minutes) * 60))
            }
        }
    }

    /// Delay until the first firing, or `None` when a one-shot is already past.
    #[must_use]
    pub fn first_delay(&self, now: Timestamp) -> Option<Duration> {
        match self {
            Self::At { instant } => (*instant - now).to_std().ok(),
            Self::Every { .. } => Some(REPEAT_FIRST_DELAY),
        }
    }
}
