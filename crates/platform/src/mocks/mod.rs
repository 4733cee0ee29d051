//! Mock implementations for testing
//!
//! This module provides mock implementations of the charger collaborator
//! traits for use in unit and integration tests. Every mock records what was
//! asked of it so tests can assert on order and values.

#![cfg(any(test, feature = "std"))]

use std::collections::VecDeque;
use std::vec::Vec;

use embassy_time::Duration;

use crate::adapter::{AdapterCapability, AdapterError, AdapterProvider};
use crate::charger_ic::{AdcChannel, BusError, ChargerIc, RegisterDump, StatusFlags};
use crate::scheduler::Scheduler;

const ADC_CHANNELS: usize = 6;

fn channel_slot(channel: AdcChannel) -> usize {
    match channel {
        AdcChannel::InputCurrent => 0,
        AdcChannel::InputVoltage => 1,
        AdcChannel::OutputVoltage => 2,
        AdcChannel::BatteryVoltage => 3,
        AdcChannel::BatteryCurrent => 4,
        AdcChannel::DieTemperature => 5,
    }
}

/// Operation recorded by [`MockChargerIc`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IcOp {
    /// `set_input_current_limit(ua)`
    SetInputCurrentLimit(u32),
    /// `set_float_voltage(uv)`
    SetFloatVoltage(u32),
    /// `enable_charging(enable)`
    EnableCharging(bool),
    /// `dump_registers()`
    DumpRegisters,
    /// `reinit()`
    Reinit,
}

/// Mock charge-pump IC with settable ADC readings and status bits.
pub struct MockChargerIc {
    adc: [u32; ADC_CHANNELS],
    scripted: [VecDeque<u32>; ADC_CHANNELS],
    status: StatusFlags,
    enabled: bool,
    fail_adc: bool,
    ops: Vec<IcOp>,
}

impl MockChargerIc {
    /// Create a mock reading a 3.8 V battery with everything else at zero.
    pub fn new() -> Self {
        let mut ic = Self {
            adc: [0; ADC_CHANNELS],
            scripted: Default::default(),
            status: StatusFlags::empty(),
            enabled: false,
            fail_adc: false,
            ops: Vec::new(),
        };
        ic.set_adc(AdcChannel::BatteryVoltage, 3_800_000);
        ic.set_adc(AdcChannel::DieTemperature, 35_000);
        ic
    }

    /// Set the steady value returned for `channel`.
    pub fn set_adc(&mut self, channel: AdcChannel, value: u32) {
        if let Some(slot) = self.adc.get_mut(channel_slot(channel)) {
            *slot = value;
        }
    }

    /// Queue a one-shot value for `channel`, returned before the steady value.
    pub fn push_adc(&mut self, channel: AdcChannel, value: u32) {
        if let Some(queue) = self.scripted.get_mut(channel_slot(channel)) {
            queue.push_back(value);
        }
    }

    /// Set the status bits returned by `read_status`.
    pub fn set_status(&mut self, status: StatusFlags) {
        self.status = status;
    }

    /// Make every ADC read fail with [`BusError::Timeout`].
    pub fn set_adc_failure(&mut self, fail: bool) {
        self.fail_adc = fail;
    }

    /// Whether the charge pump is currently enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Recorded operations, oldest first.
    pub fn ops(&self) -> &[IcOp] {
        &self.ops
    }

    /// Forget recorded operations.
    pub fn clear_ops(&mut self) {
        self.ops.clear();
    }
}

impl Default for MockChargerIc {
    fn default() -> Self {
        Self::new()
    }
}

impl ChargerIc for MockChargerIc {
    fn read_adc(&mut self, channel: AdcChannel) -> Result<u32, BusError> {
        if self.fail_adc {
            return Err(BusError::Timeout);
        }
        let slot = channel_slot(channel);
        if let Some(value) = self.scripted.get_mut(slot).and_then(VecDeque::pop_front) {
            return Ok(value);
        }
        self.adc.get(slot).copied().ok_or(BusError::Other)
    }

    fn set_input_current_limit(&mut self, ua: u32) -> Result<(), BusError> {
        self.ops.push(IcOp::SetInputCurrentLimit(ua));
        Ok(())
    }

    fn set_float_voltage(&mut self, uv: u32) -> Result<(), BusError> {
        self.ops.push(IcOp::SetFloatVoltage(uv));
        Ok(())
    }

    fn enable_charging(&mut self, enable: bool) -> Result<(), BusError> {
        self.enabled = enable;
        self.ops.push(IcOp::EnableCharging(enable));
        Ok(())
    }

    fn read_status(&mut self) -> Result<StatusFlags, BusError> {
        Ok(self.status)
    }

    fn dump_registers(&mut self) -> Result<RegisterDump, BusError> {
        self.ops.push(IcOp::DumpRegisters);
        let mut dump = RegisterDump::new();
        let bits = self.status.bits().to_le_bytes();
        let _ = dump.push((0x01, bits[0]));
        let _ = dump.push((0x02, bits[1]));
        Ok(dump)
    }

    fn reinit(&mut self) -> Result<(), BusError> {
        self.enabled = false;
        self.ops.push(IcOp::Reinit);
        Ok(())
    }
}

/// Request recorded by [`MockAdapter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdapterRequest {
    /// Requested voltage, µV.
    pub uv: u32,
    /// Requested current, µA.
    pub ua: u32,
    /// Requested object position.
    pub objpos: u8,
}

/// Mock adapter: a list of programmable power objects plus an online flag.
pub struct MockAdapter {
    objects: Vec<(u32, u32)>,
    wireless: bool,
    online: bool,
    fail_requests: u32,
    output_current: Option<u32>,
    power_limit: Option<u32>,
    requests: Vec<AdapterRequest>,
    queries: Vec<(u32, u32)>,
    reverts: u32,
}

impl MockAdapter {
    /// Wired PPS source advertising `apdos` as `(max_uv, max_ua)` pairs.
    pub fn pps(apdos: &[(u32, u32)]) -> Self {
        Self {
            objects: apdos.to_vec(),
            wireless: false,
            online: true,
            fail_requests: 0,
            output_current: None,
            power_limit: None,
            requests: Vec::new(),
            queries: Vec::new(),
            reverts: 0,
        }
    }

    /// Wireless receiver with a single output capability.
    pub fn wireless(max_uv: u32, max_ua: u32) -> Self {
        Self {
            wireless: true,
            ..Self::pps(&[(max_uv, max_ua)])
        }
    }

    /// Cap the advertised power below `max_uv * max_ua` of every object.
    pub fn power_limited(mut self, max_mw: u32) -> Self {
        self.power_limit = Some(max_mw);
        self
    }

    /// Attach or detach the source.
    pub fn set_online(&mut self, online: bool) {
        self.online = online;
    }

    /// Fail the next `count` requests with [`AdapterError::Rejected`].
    pub fn fail_next_requests(&mut self, count: u32) {
        self.fail_requests = count;
    }

    /// Set the receiver output current reported to the charger.
    pub fn set_output_current(&mut self, ua: Option<u32>) {
        self.output_current = ua;
    }

    /// Successful requests, oldest first.
    pub fn requests(&self) -> &[AdapterRequest] {
        &self.requests
    }

    /// Capability queries as `(ceiling_uv, ceiling_ua)`, oldest first.
    pub fn queries(&self) -> &[(u32, u32)] {
        &self.queries
    }

    /// Number of `revert_to_default` calls.
    pub fn reverts(&self) -> u32 {
        self.reverts
    }

    /// Forget recorded requests and queries.
    pub fn clear_log(&mut self) {
        self.requests.clear();
        self.queries.clear();
    }
}

impl AdapterProvider for MockAdapter {
    fn max_power(
        &mut self,
        ceiling_uv: u32,
        ceiling_ua: u32,
    ) -> Result<AdapterCapability, AdapterError> {
        self.queries.push((ceiling_uv, ceiling_ua));
        if !self.online {
            return Err(AdapterError::Offline);
        }
        self.objects
            .iter()
            .zip(1u8..)
            .find(|((uv, ua), _)| *uv >= ceiling_uv && *ua >= ceiling_ua)
            .map(|(&(uv, ua), objpos)| AdapterCapability {
                max_uv: uv.min(ceiling_uv),
                max_ua: ua.min(ceiling_ua),
                max_mw: AdapterCapability::vi_power_mw(uv, ua)
                    .min(self.power_limit.unwrap_or(u32::MAX)),
                objpos: if self.wireless { 0 } else { objpos },
            })
            .ok_or(AdapterError::NotSupported)
    }

    fn request(&mut self, uv: u32, ua: u32, objpos: u8) -> Result<(), AdapterError> {
        if !self.online {
            return Err(AdapterError::Offline);
        }
        if self.fail_requests > 0 {
            self.fail_requests = self.fail_requests.saturating_sub(1);
            return Err(AdapterError::Rejected);
        }
        self.requests.push(AdapterRequest { uv, ua, objpos });
        Ok(())
    }

    fn is_online(&mut self) -> bool {
        self.online
    }

    fn revert_to_default(&mut self) -> Result<(), AdapterError> {
        self.reverts = self.reverts.saturating_add(1);
        if self.online {
            Ok(())
        } else {
            Err(AdapterError::Offline)
        }
    }

    fn output_current(&mut self) -> Option<u32> {
        if self.wireless {
            self.output_current
        } else {
            None
        }
    }
}

/// Delay that only records how long it was asked to wait.
#[derive(Debug, Default)]
pub struct MockDelay {
    waits_ns: Vec<u32>,
}

impl MockDelay {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every requested wait, in nanoseconds.
    pub fn waits_ns(&self) -> &[u32] {
        &self.waits_ns
    }
}

impl embedded_hal::delay::DelayNs for MockDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.waits_ns.push(ns);
    }
}

/// Scheduler that records every arm/cancel call.
#[derive(Debug, Default)]
pub struct MockScheduler {
    scheduled: Vec<Duration>,
    pending: Option<Duration>,
    cancels: u32,
}

impl MockScheduler {
    /// Create an idle scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pending delay, if armed.
    pub fn pending(&self) -> Option<Duration> {
        self.pending
    }

    /// Every delay ever scheduled, oldest first.
    pub fn scheduled(&self) -> &[Duration] {
        &self.scheduled
    }

    /// Number of cancel calls.
    pub fn cancels(&self) -> u32 {
        self.cancels
    }
}

impl Scheduler for MockScheduler {
    fn schedule_after(&mut self, delay: Duration) {
        self.scheduled.push(delay);
        self.pending = Some(delay);
    }

    fn cancel_scheduled(&mut self) {
        self.cancels = self.cancels.saturating_add(1);
        self.pending = None;
    }
}
