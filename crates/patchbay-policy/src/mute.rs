//! Mute sequencing around device switches.
//!
//! [`MuteScheduler::plan_switch`] is pure with respect to time: it returns the
//! mute and unmute commands to issue and how long the caller must wait
//! before completing the switch. Waiting is delegated to a [`Pacer`], so
//! tests run without real time passing.
//!
//! Two independent mechanisms contribute:
//!
//! - **Strategy mute**: when an active stream moves to several devices at
//!   once, strategies that were playing on the old devices but do not
//!   resolve to the new set are muted on every stream carrying them until
//!   buffered audio drains (`max(recommended, 2 x latency)`).
//! - **Temporary mute**: whenever an active stream's device set changes, its
//!   active strategies are muted for the recommended duration, or
//!   `4 x latency`, masking the volume step between devices.

use std::collections::BTreeSet;
use std::time::Duration;

use patchbay_core::{DeviceId, StrategyId, StreamId};

/// Blocks the caller for a computed mute wait.
pub trait Pacer {
    /// Waits `ms` milliseconds.
    fn wait(&mut self, ms: u32);
}

/// Sleeps the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadPacer;

impl Pacer for ThreadPacer {
    fn wait(&mut self, ms: u32) {
        if ms > 0 {
            std::thread::sleep(Duration::from_millis(u64::from(ms)));
        }
    }
}

/// What the scheduler needs to know about one playback stream.
#[derive(Debug, Clone, Copy)]
pub struct StreamMuteView<'a> {
    /// The stream.
    pub id: StreamId,
    /// Reported latency.
    pub latency_ms: u32,
    /// Recommended mute duration of its profile.
    pub recommended_mute_ms: Option<u32>,
    /// Strategies playing on it.
    pub active_strategies: &'a [StrategyId],
    /// Whether it mirrors two other streams.
    pub duplicated: bool,
}

impl StreamMuteView<'_> {
    fn is_active(&self) -> bool {
        !self.active_strategies.is_empty()
    }

    /// How long a muted strategy must stay muted for buffers to drain.
    fn drain_ms(&self) -> u32 {
        self.recommended_mute_ms
            .unwrap_or(0)
            .max(self.latency_ms.saturating_mul(2))
    }

    /// How long a device change is masked.
    fn switch_mute_ms(&self) -> u32 {
        match self.recommended_mute_ms {
            Some(ms) if ms > 0 => ms,
            _ => self.latency_ms.saturating_mul(4),
        }
    }
}

/// A device change about to be applied to a stream.
#[derive(Debug, Clone, Copy)]
pub struct DeviceSwitch<'a> {
    /// The switched stream.
    pub stream: StreamMuteView<'a>,
    /// Devices before the switch.
    pub previous_devices: &'a [DeviceId],
    /// Devices after the switch.
    pub new_devices: &'a [DeviceId],
    /// Freshly resolved devices of every strategy.
    pub strategy_devices: &'a [(StrategyId, Vec<DeviceId>)],
    /// Streams that may carry a muted strategy, the switched one included.
    pub sharing: &'a [StreamMuteView<'a>],
    /// Delay before the new routing takes effect.
    pub delay_ms: u32,
}

/// One mute command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MuteAction {
    /// Target stream.
    pub stream: StreamId,
    /// Target strategy.
    pub strategy: StrategyId,
    /// Mute or unmute.
    pub muted: bool,
    /// Delay before the command applies.
    pub delay_ms: u32,
}

/// Commands for one switch and the wait the caller must honor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutePlan {
    /// Commands in issue order.
    pub actions: Vec<MuteAction>,
    /// Time to block before completing the switch.
    pub wait_ms: u32,
}

impl MutePlan {
    /// Whether the switch needs no muting at all.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty() && self.wait_ms == 0
    }
}

fn same_set(a: &[DeviceId], b: &[DeviceId]) -> bool {
    a.len() == b.len() && a.iter().all(|d| b.contains(d))
}

/// Tracks which strategies are muted because of a multi-device switch.
#[derive(Debug, Clone, Default)]
pub struct MuteScheduler {
    muted: BTreeSet<(StreamId, StrategyId)>,
}

impl MuteScheduler {
    /// A scheduler with nothing muted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `strategy` is held muted by a switch of `stream`.
    pub fn is_muted(&self, stream: StreamId, strategy: StrategyId) -> bool {
        self.muted.contains(&(stream, strategy))
    }

    /// Drops state kept for a closed stream.
    pub fn forget_stream(&mut self, stream: StreamId) {
        self.muted.retain(|(s, _)| *s != stream);
    }

    /// Computes the commands for a device switch.
    pub fn plan_switch(&mut self, switch: &DeviceSwitch<'_>) -> MutePlan {
        let stream = &switch.stream;
        if stream.duplicated {
            return MutePlan::default();
        }
        let changed = !same_set(switch.previous_devices, switch.new_devices);
        let should_mute = stream.is_active() && switch.new_devices.len() >= 2;

        let mut actions = Vec::new();
        let mut wait_ms = 0;
        for (strategy, resolved) in switch.strategy_devices {
            let mute = should_mute
                && resolved.iter().any(|d| switch.previous_devices.contains(d))
                && !same_set(resolved, switch.new_devices);
            let key = (stream.id, *strategy);
            if !mute {
                self.muted.remove(&key);
                continue;
            }
            if !self.muted.insert(key) {
                continue;
            }
            for other in switch
                .sharing
                .iter()
                .filter(|s| !s.duplicated && s.active_strategies.contains(strategy))
            {
                let hold = other.drain_ms();
                actions.push(MuteAction {
                    stream: other.id,
                    strategy: *strategy,
                    muted: true,
                    delay_ms: 0,
                });
                actions.push(MuteAction {
                    stream: other.id,
                    strategy: *strategy,
                    muted: false,
                    delay_ms: hold,
                });
                wait_ms = wait_ms.max(hold);
            }
        }

        if stream.is_active() && changed {
            let duration = stream.switch_mute_ms();
            for strategy in stream.active_strategies {
                actions.push(MuteAction {
                    stream: stream.id,
                    strategy: *strategy,
                    muted: true,
                    delay_ms: switch.delay_ms,
                });
                actions.push(MuteAction {
                    stream: stream.id,
                    strategy: *strategy,
                    muted: false,
                    delay_ms: switch.delay_ms.saturating_add(duration),
                });
            }
            wait_ms = wait_ms.max(duration);
        }

        let plan = MutePlan {
            actions,
            wait_ms: wait_ms.saturating_sub(switch.delay_ms),
        };
        tracing::trace!(stream = %stream.id, actions = plan.actions.len(), wait_ms = plan.wait_ms, "mute_planned");
        plan
    }
}
