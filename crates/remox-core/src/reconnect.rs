//! Connection-loss recovery state.
//!
//! At most one task drives a reconnection at a time; everyone else who
//! observes the same failure waits for that attempt to settle. Observers are
//! correlated with attempts through an epoch counter: an observer carrying a
//! stale epoch saw a failure that has already been repaired and must not
//! tear down the fresh link.

use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Reconnecting,
    /// Reconnection gave up; the session is unusable.
    Failed,
    /// Closed deliberately; no recovery.
    Closed,
}

#[derive(Clone, Debug)]
pub struct ReconnectConfig {
    pub enabled: bool,
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 5,
            delay: Duration::from_millis(500),
        }
    }
}

#[derive(Debug)]
pub(crate) struct ReconnectionManager {
    state: parking_lot::Mutex<StateCell>,
    settled: tokio::sync::Notify,
}

#[derive(Debug)]
struct StateCell {
    state: ConnectionState,
    /// Bumped every time a reconnection attempt settles as connected.
    epoch: u64,
}

impl ReconnectionManager {
    pub(crate) fn new() -> Self {
        Self {
            state: parking_lot::Mutex::new(StateCell {
                state: ConnectionState::Connected,
                epoch: 0,
            }),
            settled: tokio::sync::Notify::new(),
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.state.lock().state
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.state.lock().epoch
    }

    /// Claim the right to drive a reconnection for a failure observed at
    /// `observed_epoch`. Exactly one claimant per epoch succeeds.
    pub(crate) fn begin(&self, observed_epoch: u64) -> Claim {
        let mut cell = self.state.lock();
        match cell.state {
            ConnectionState::Connected if cell.epoch == observed_epoch => {
                cell.state = ConnectionState::Reconnecting;
                Claim::Driver
            }
            // A newer link already exists; the observed failure is history.
            ConnectionState::Connected => Claim::AlreadyRecovered,
            ConnectionState::Reconnecting => Claim::Wait,
            ConnectionState::Failed | ConnectionState::Closed => Claim::Dead,
        }
    }

    /// Settle the reconnection this task was driving.
    pub(crate) fn finish(&self, success: bool) {
        let mut cell = self.state.lock();
        if cell.state != ConnectionState::Reconnecting {
            return;
        }
        if success {
            cell.state = ConnectionState::Connected;
            cell.epoch += 1;
        } else {
            cell.state = ConnectionState::Failed;
        }
        drop(cell);
        self.settled.notify_waiters();
    }

    pub(crate) fn close(&self) {
        self.state.lock().state = ConnectionState::Closed;
        self.settled.notify_waiters();
    }

    /// Wait until no reconnection is in flight, returning the settled state.
    pub(crate) async fn wait_settled(&self) -> ConnectionState {
        loop {
            let notified = self.settled.notified();
            let state = self.state();
            if state != ConnectionState::Reconnecting {
                return state;
            }
            notified.await;
        }
    }
}

/// Outcome of [`ReconnectionManager::begin`].
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Claim {
    /// This task drives the reconnection and must call `finish`.
    Driver,
    /// Another task is already reconnecting; wait for it.
    Wait,
    /// The failure was already repaired; carry on.
    AlreadyRecovered,
    /// The session is failed or closed for good.
    Dead,
}
