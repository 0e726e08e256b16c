//! Timeout scheduling for the round state machine.
//!
//! At most one timeout is pending at a time: the one for the step the
//! machine currently sits in. Expiry is reported as a [`TimeoutToken`] which
//! the machine compares against its own position, so a fire that races a
//! step change is a no-op.

use {
    crate::types::{ConsensusStep, Height, Round},
    serde::{Deserialize, Serialize},
    std::time::{Duration, Instant},
};

/// Identity of a scheduled timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeoutToken {
    pub height: Height,
    pub round: Round,
    pub step: ConsensusStep,
}

impl std::fmt::Display for TimeoutToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}/{}", self.step, self.height, self.round)
    }
}

/// A timeout the state machine asks its driver to arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledTimeout {
    pub token: TimeoutToken,
    pub duration: Duration,
}

/// Holds the single pending timeout and its deadline.
#[derive(Debug, Default)]
pub struct TimeoutScheduler {
    pending: Option<(TimeoutToken, Instant)>,
}

impl TimeoutScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `token` to fire after `duration`, replacing any pending one.
    pub fn schedule(&mut self, token: TimeoutToken, duration: Duration) {
        let now = Instant::now();
        self.schedule_at(token, now.checked_add(duration).unwrap_or(now));
    }

    pub fn schedule_at(&mut self, token: TimeoutToken, deadline: Instant) {
        self.pending = Some((token, deadline));
    }

    pub fn cancel(&mut self) {
        self.pending = None;
    }

    /// The pending token, if any.
    pub fn pending(&self) -> Option<TimeoutToken> {
        self.pending.map(|(token, _)| token)
    }

    /// Remove and return the pending token if its deadline has passed.
    pub fn take_expired(&mut self) -> Option<TimeoutToken> {
        self.take_expired_at(Instant::now())
    }

    pub fn take_expired_at(&mut self, now: Instant) -> Option<TimeoutToken> {
        match self.pending {
            Some((token, deadline)) if now >= deadline => {
                self.pending = None;
                Some(token)
            }
            _ => None,
        }
    }

    /// Time left before the pending timeout fires. `None` if nothing is
    /// pending, `Duration::ZERO` if already expired.
    pub fn remaining(&self) -> Option<Duration> {
        self.pending
            .map(|(_, deadline)| deadline.saturating_duration_since(Instant::now()))
    }
}
