//! Capability traits at the boundary between the consumer state machine and
//! whatever drives it.
//!
//! | Trait | Direction | Purpose |
//! |-------|-----------|---------|
//! | [`Face`] | consumer → driver | Emit interests, arm and cancel timers, read the clock |
//! | [`DelayTracer`] | consumer → observer | Receive per-request delay telemetry |
//!
//! Inbound events (data, nacks, timer expiry) are plain method calls on
//! [`Consumer`](crate::consumer::Consumer). The state machine itself never
//! blocks, spawns, or sleeps, so the same code runs under the tokio driver in
//! [`client`](crate::client) and under hand-stepped test faces.

use std::time::{Duration, Instant};

use crate::messages::Interest;
use crate::tracker::DelaySample;

/// Timers a consumer arms on its face.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Timer {
    /// Self-scheduled "send next" step.
    SendNext,
    /// Periodic retransmission-timeout check.
    RetxCheck,
}

/// Handle for cancelling an armed timer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TimerId(pub u64);

/// Outbound capabilities the consumer needs from its environment.
pub trait Face {
    /// Fire-and-forget. The driver reports the outcome through
    /// `on_data`, `on_nack` or a timeout.
    fn send_interest(&mut self, interest: Interest);

    /// Arrange for `Consumer::on_timer(timer)` to run after `delay`.
    fn schedule_after(&mut self, delay: Duration, timer: Timer) -> TimerId;

    /// Cancel a timer that has not fired yet. Cancelling a fired or unknown
    /// timer is a no-op.
    fn cancel(&mut self, id: TimerId);

    fn now(&self) -> Instant;
}

/// Sink for delay telemetry, called once per retired request.
pub trait DelayTracer: Send {
    fn record(&mut self, at: Instant, sample: &DelaySample);
}

/// Tracer that discards samples.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracer;

impl DelayTracer for NoopTracer {
    fn record(&mut self, _at: Instant, _sample: &DelaySample) {}
}
