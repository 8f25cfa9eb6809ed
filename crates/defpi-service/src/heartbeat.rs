// Copyright (C) 2025 Flexible Power Alliance Network
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Heartbeat monitor for established data channels.
//!
//! On every tick the monitor either asks for a PING to be sent, or, if the
//! previous PING was never answered, reports the channel as expired. Answering
//! inbound PINGs is left to the connection's receive loop.

use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};

/// Configuration for the heartbeat monitor
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Delay before the first tick
    pub initial_delay: Duration,
    /// Time between ticks; also how long a PING may stay unanswered
    pub period: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            period: Duration::from_secs(10),
        }
    }
}

/// What the owning connection should do on a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    SendPing,
    Expired,
}

/// Liveness tracking for one channel.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    interval: Interval,
    awaiting_pong: bool,
}

impl HeartbeatMonitor {
    /// Start a fresh schedule; the first tick fires after the initial delay.
    pub fn start(config: &HeartbeatConfig) -> Self {
        let period = config.period.max(Duration::from_millis(1));
        let mut interval = tokio::time::interval_at(Instant::now() + config.initial_delay, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            interval,
            awaiting_pong: false,
        }
    }

    /// Wait for the next tick. Cancel safe.
    pub async fn tick(&mut self) -> HeartbeatAction {
        self.interval.tick().await;
        self.on_tick()
    }

    pub fn on_tick(&mut self) -> HeartbeatAction {
        if self.awaiting_pong {
            HeartbeatAction::Expired
        } else {
            self.awaiting_pong = true;
            HeartbeatAction::SendPing
        }
    }

    pub fn pong_received(&mut self) {
        self.awaiting_pong = false;
    }

    pub fn awaiting_pong(&self) -> bool {
        self.awaiting_pong
    }
}
