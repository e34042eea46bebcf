//! Keepalive pings and liveness detection.
//!
//! Owned by the transport task and polled inside its `select!` loop, so a
//! tick can never fire after the loop has exited. [`KeepAlive::stop`] drops
//! the timer outright.

// ============================================================================
// Imports
// ============================================================================

use std::future;
use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};

// ============================================================================
// Constants
// ============================================================================

/// Outstanding pings at which the connection is considered dead.
pub const MAX_MISSED_PONGS: u32 = 3;

// ============================================================================
// Beat
// ============================================================================

/// What the transport should do on a keepalive tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Beat {
    /// Send a ping frame.
    Ping,
    /// Too many pings went unanswered; force a reconnect.
    Expired,
}

// ============================================================================
// KeepAlive
// ============================================================================

/// Periodic ping timer with an outstanding-ping counter.
#[derive(Debug)]
pub struct KeepAlive {
    period: Option<Duration>,
    timer: Option<Interval>,
    outstanding: u32,
}

impl KeepAlive {
    /// Creates a stopped keepalive. `None` disables it entirely.
    #[must_use]
    pub fn new(period: Option<Duration>) -> Self {
        Self {
            period,
            timer: None,
            outstanding: 0,
        }
    }

    /// Starts (or restarts) the timer. The first tick is one period from now.
    pub fn start(&mut self) {
        self.outstanding = 0;
        self.timer = self.period.map(|period| {
            let mut timer = interval_at(Instant::now() + period, period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            timer
        });
    }

    /// Stops the timer and clears the counter.
    pub fn stop(&mut self) {
        self.timer = None;
        self.outstanding = 0;
    }

    /// Waits for the next tick.
    ///
    /// Never resolves while stopped or disabled.
    pub async fn tick(&mut self) -> Beat {
        let Some(timer) = self.timer.as_mut() else {
            return future::pending().await;
        };

        timer.tick().await;

        self.outstanding += 1;
        if self.outstanding >= MAX_MISSED_PONGS {
            Beat::Expired
        } else {
            Beat::Ping
        }
    }

    /// Records a pong from the peer.
    #[inline]
    pub fn on_pong(&mut self) {
        self.outstanding = self.outstanding.saturating_sub(1);
    }

    /// Number of pings sent without a pong.
    #[inline]
    #[must_use]
    pub const fn outstanding(&self) -> u32 {
        self.outstanding
    }
}

// ============================================================================
// Tests
// ============================================================================
