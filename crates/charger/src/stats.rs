//! Per-session telemetry.
//!
//! Time spent in each state, how often each state was entered, battery
//! over-current events and adapter message counts. Reset at every start
//! request.

use embassy_time::Instant;

use crate::state::{ChargingState, STATE_COUNT};

/// Counters for one charging session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargerStats {
    time_in_state_ms: [u64; STATE_COUNT],
    entries: [u32; STATE_COUNT],
    state_since: Option<Instant>,
    ovc_count: u32,
    ovc_max_ibat: u32,
    ovc_max_delta: u32,
    adapter_msgs: u32,
    adapter_msg_failures: u32,
}

impl ChargerStats {
    /// All counters zero.
    pub const fn new() -> Self {
        Self {
            time_in_state_ms: [0; STATE_COUNT],
            entries: [0; STATE_COUNT],
            state_since: None,
            ovc_count: 0,
            ovc_max_ibat: 0,
            ovc_max_delta: 0,
            adapter_msgs: 0,
            adapter_msg_failures: 0,
        }
    }

    /// Clear every counter and start timing from `now`.
    pub fn reset(&mut self, now: Instant) {
        *self = Self::new();
        self.state_since = Some(now);
    }

    /// Account the time spent in `from` and count an entry into `to`.
    pub fn on_transition(&mut self, from: ChargingState, to: ChargingState, now: Instant) {
        if let Some(since) = self.state_since.replace(now) {
            let elapsed = now.checked_duration_since(since).map_or(0, |d| d.as_millis());
            if let Some(slot) = self.time_in_state_ms.get_mut(from.index()) {
                *slot = slot.saturating_add(elapsed);
            }
        }
        if let Some(count) = self.entries.get_mut(to.index()) {
            *count = count.saturating_add(1);
        }
    }

    /// Record a battery-current sample; returns `true` when it exceeds `cc_max`.
    pub fn record_ibat(&mut self, ibat: u32, cc_max: u32) -> bool {
        if ibat <= cc_max {
            return false;
        }
        let delta = ibat.saturating_sub(cc_max);
        self.ovc_count = self.ovc_count.saturating_add(1);
        if delta > self.ovc_max_delta {
            self.ovc_max_delta = delta;
            self.ovc_max_ibat = ibat;
        }
        true
    }

    /// Count one adapter message.
    pub fn record_adapter_msg(&mut self, ok: bool) {
        if ok {
            self.adapter_msgs = self.adapter_msgs.saturating_add(1);
        } else {
            self.adapter_msg_failures = self.adapter_msg_failures.saturating_add(1);
        }
    }

    /// Milliseconds spent in `state` (closed intervals only).
    pub fn time_in_state_ms(&self, state: ChargingState) -> u64 {
        self.time_in_state_ms.get(state.index()).copied().unwrap_or(0)
    }

    /// Times `state` was entered.
    pub fn entries(&self, state: ChargingState) -> u32 {
        self.entries.get(state.index()).copied().unwrap_or(0)
    }

    /// Number of samples with battery current above `cc_max`.
    pub fn ovc_count(&self) -> u32 {
        self.ovc_count
    }

    /// Battery current of the worst over-current sample, µA.
    pub fn ovc_max_ibat(&self) -> u32 {
        self.ovc_max_ibat
    }

    /// Worst `ibat - cc_max`, µA.
    pub fn ovc_max_delta(&self) -> u32 {
        self.ovc_max_delta
    }

    /// Successful adapter messages.
    pub fn adapter_msgs(&self) -> u32 {
        self.adapter_msgs
    }

    /// Failed adapter messages.
    pub fn adapter_msg_failures(&self) -> u32 {
        self.adapter_msg_failures
    }
}

impl Default for ChargerStats {
    fn default() -> Self {
        Self::new()
    }
}
