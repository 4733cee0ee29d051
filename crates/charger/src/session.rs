//! Charging session: state, control surface and tick dispatch.
//!
//! A [`ChargerSession`] owns the charge-pump IC, both adapter slots, a
//! blocking delay (wireless ramp-down only) and a single-slot scheduler.
//! Handlers never wait for the adapter: each one writes the next
//! `(timer_id, timer_period)` and returns; [`ChargerSession::handle_timer`]
//! hands the period to the scheduler and whoever owns the scheduler calls
//! `handle_timer` again when it fires.
//!
//! The state handlers live in `states.rs`, adapter messaging in
//! `negotiation.rs`.

use embassy_time::{Duration, Instant};
use embedded_hal::delay::DelayNs;
use platform::{AdapterProvider, AdcChannel, ChargerIc, Scheduler};

use crate::compensation::ControlLoop;
use crate::config::ChargerConfig;
use crate::error::ChargerError;
use crate::limits::MAX_RETRY_CNT;
use crate::log::{dc_debug, dc_error, dc_info, dc_warn};
use crate::state::{
    ChargeMode, ChargeStatus, ChargeType, ChargingState, PowerSource, PrevIncrement, TaControl,
    TaType, TimerId,
};
use crate::stats::ChargerStats;

fn revert_if_online<P: AdapterProvider>(
    provider: Option<&mut P>,
) -> Option<Result<(), platform::AdapterError>> {
    let provider = provider?;
    provider.is_online().then(|| provider.revert_to_default())
}

/// Direction of an `AdjustTaVol` walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    Up,
    Down,
}

/// One direct-charger instance.
pub struct ChargerSession<IC, TA, RX, D, S> {
    pub(crate) config: ChargerConfig,
    pub(crate) ic: IC,
    pub(crate) wired: Option<TA>,
    pub(crate) wireless: Option<RX>,
    pub(crate) delay: D,
    pub(crate) scheduler: S,

    pub(crate) charging_state: ChargingState,
    pub(crate) ret_state: Option<ChargingState>,
    pub(crate) ta_type: TaType,
    pub(crate) ta_ctrl: TaControl,
    pub(crate) chg_mode: ChargeMode,
    pub(crate) lp: ControlLoop,

    pub(crate) cc_max: Option<u32>,
    pub(crate) fv_uv: Option<u32>,
    pub(crate) new_iin: Option<u32>,
    pub(crate) new_vfloat: Option<u32>,

    pub(crate) retry_cnt: u8,
    pub(crate) bus_retry_cnt: u8,
    pub(crate) pdmsg_fail_cnt: u8,
    pub(crate) adjust_steps: u16,
    pub(crate) adjust_dir: Option<Direction>,

    pub(crate) timer_id: TimerId,
    pub(crate) timer_period: Duration,
    /// Tick after the pending adapter message, when not the state's default.
    pub(crate) msg_next: Option<TimerId>,
    pub(crate) keepalive_armed: bool,

    pub(crate) source: Option<PowerSource>,
    pub(crate) dc_start_time: Option<Instant>,
    pub(crate) stats: ChargerStats,
}

impl<IC, TA, RX, D, S> ChargerSession<IC, TA, RX, D, S>
where
    IC: ChargerIc,
    TA: AdapterProvider,
    RX: AdapterProvider,
    D: DelayNs,
    S: Scheduler,
{
    /// Create an idle session. Either adapter slot may be empty.
    pub fn new(
        config: ChargerConfig,
        ic: IC,
        wired: Option<TA>,
        wireless: Option<RX>,
        delay: D,
        scheduler: S,
    ) -> Self {
        Self {
            config,
            ic,
            wired,
            wireless,
            delay,
            scheduler,
            charging_state: ChargingState::NoCharging,
            ret_state: None,
            ta_type: TaType::Unknown,
            ta_ctrl: TaControl::ConstantCurrent,
            chg_mode: ChargeMode::None,
            lp: ControlLoop::new(),
            cc_max: None,
            fv_uv: None,
            new_iin: None,
            new_vfloat: None,
            retry_cnt: 0,
            bus_retry_cnt: 0,
            pdmsg_fail_cnt: 0,
            adjust_steps: 0,
            adjust_dir: None,
            timer_id: TimerId::None,
            timer_period: Duration::from_ticks(0),
            msg_next: None,
            keepalive_armed: false,
            source: None,
            dc_start_time: None,
            stats: ChargerStats::new(),
        }
    }

    // ── Control surface ────────────────────────────────────────────────────

    /// Start (`1` = wired PPS, `2` = wireless) or stop (`0`) charging.
    ///
    /// Starting the source that is already charging is a no-op; starting a
    /// different one while charging is [`ChargerError::Busy`].
    pub fn set_charging_enabled(&mut self, source_index: u8) -> Result<(), ChargerError> {
        let Some(source) = PowerSource::from_index(source_index) else {
            if source_index != PowerSource::INDEX_DISABLED {
                dc_warn!("dc: unknown power source index {}", source_index);
                return Err(ChargerError::InvalidInput);
            }
            if self.charging_state != ChargingState::NoCharging {
                dc_info!("dc: charging disabled by request");
                self.stop_charging();
            }
            return Ok(());
        };

        if self.charging_state != ChargingState::NoCharging {
            return if self.source == Some(source) {
                Ok(())
            } else {
                Err(ChargerError::Busy)
            };
        }

        self.select_ta_type(source)?;

        let now = Instant::now();
        self.source = Some(source);
        self.dc_start_time = Some(now);
        self.stats.reset(now);
        self.retry_cnt = 0;
        self.bus_retry_cnt = 0;
        self.pdmsg_fail_cnt = 0;
        self.set_state(ChargingState::CheckVbat)?;
        self.schedule(TimerId::VbatMinCheck, Duration::from_ticks(0));
        self.queue_work();
        dc_info!("dc: start charging on {}", self.ta_type);
        Ok(())
    }

    /// Update the battery current and float voltage targets.
    ///
    /// Non-positive values are ignored. Until the preset has chosen a ratio
    /// the values are taken directly and the preset uses them; afterwards
    /// they are queued and consumed at the next CC/CV tick, which is pulled
    /// in immediately.
    pub fn set_target(&mut self, cc_max: i32, fv_uv: i32) -> Result<(), ChargerError> {
        let cc_max = u32::try_from(cc_max).ok().filter(|&v| v > 0);
        let fv_uv = u32::try_from(fv_uv).ok().filter(|&v| v > 0);

        if let Some(fv) = fv_uv {
            if fv > self.config.fv_max {
                dc_warn!("dc: float voltage {} above limit {}", fv, self.config.fv_max);
                return Err(ChargerError::InvalidInput);
            }
        }

        if self.operating_point_set() {
            let mut queued = false;
            if let Some(cc) = cc_max.filter(|&cc| self.cc_max != Some(cc)) {
                self.cc_max = Some(cc);
                let iin = self.input_current_target(cc);
                if iin == self.lp.iin_cc {
                    self.new_iin = None;
                } else {
                    self.new_iin = Some(iin);
                    queued = true;
                    dc_debug!("dc: queued new iin {} (cc_max {})", iin, cc);
                }
            }
            if let Some(fv) = fv_uv {
                if self.fv_uv == Some(fv) {
                    self.new_vfloat = None;
                } else if self.new_vfloat != Some(fv) {
                    self.new_vfloat = Some(fv);
                    queued = true;
                    dc_debug!("dc: queued new vfloat {}", fv);
                }
            }
            if queued && self.timer_id == self.charging_state.check_timer() {
                self.schedule(self.timer_id, Duration::from_ticks(0));
                self.queue_work();
            }
        } else {
            if let Some(cc) = cc_max {
                self.cc_max = Some(cc);
                self.new_iin = None;
            }
            if let Some(fv) = fv_uv {
                self.fv_uv = Some(fv);
                self.new_vfloat = None;
            }
        }
        Ok(())
    }

    /// Power-supply status.
    pub fn status(&mut self) -> ChargeStatus {
        if self.charging_state != ChargingState::NoCharging {
            return ChargeStatus::Charging;
        }
        let wired = self.wired.as_mut().is_some_and(AdapterProvider::is_online);
        let wireless = self.wireless.as_mut().is_some_and(AdapterProvider::is_online);
        if wired || wireless {
            ChargeStatus::NotCharging
        } else {
            ChargeStatus::Discharging
        }
    }

    /// Power-supply charge type.
    pub fn charge_type(&self) -> ChargeType {
        use ChargingState as S;

        let state = match self.charging_state {
            S::AdjustTaVol | S::AdjustTaCur => self.ret_state.unwrap_or(S::CcMode),
            s => s,
        };
        match state {
            S::AdjustCc | S::CcMode => ChargeType::Fast,
            S::StartCv | S::CvMode | S::ChargingDone => ChargeType::TaperExternal,
            _ => ChargeType::None,
        }
    }

    /// Run the handler of the pending timer and re-arm the scheduler.
    ///
    /// Bus errors re-arm the same tick a bounded number of times; any other
    /// error stops the session before it is returned.
    pub fn handle_timer(&mut self) -> Result<(), ChargerError> {
        let prev_timer = self.timer_id;
        let prev_state = self.charging_state;

        let result = match prev_timer {
            TimerId::None => Ok(()),
            TimerId::VbatMinCheck => self.check_vbat(),
            TimerId::PresetDc => self.preset_dc(),
            TimerId::PresetConfig => self.preset_config(),
            TimerId::CheckActive => self.check_active_state(),
            TimerId::AdjustCcMode => self.charge_adjust_ccmode(),
            TimerId::EnterCcMode => self.charge_start_ccmode(),
            TimerId::CheckCcMode => self.charge_ccmode(),
            TimerId::EnterCvMode => self.charge_start_cvmode(),
            TimerId::CheckCvMode => self.charge_cvmode(),
            TimerId::PdMsgSend => self.send_message(),
            TimerId::AdjustTaVol => self.adjust_ta_voltage(),
            TimerId::AdjustTaCur => self.adjust_ta_current(),
        };

        match result {
            Ok(()) => {
                self.bus_retry_cnt = 0;
                self.queue_work();
                Ok(())
            }
            Err(err) if err.is_transient() && self.bus_retry_cnt < MAX_RETRY_CNT => {
                self.bus_retry_cnt = self.bus_retry_cnt.saturating_add(1);
                dc_warn!(
                    "dc: {} in {} ({}), retry {}",
                    err,
                    prev_timer,
                    self.charging_state,
                    self.bus_retry_cnt
                );
                self.schedule(prev_timer, self.config.timings.pdmsg_retry);
                self.queue_work();
                Ok(())
            }
            Err(err) => {
                dc_error!(
                    "dc: {} (timer {} -> {}, state {} -> {}, period {} ms)",
                    err,
                    prev_timer,
                    self.timer_id,
                    prev_state,
                    self.charging_state,
                    self.timer_period.as_millis()
                );
                self.stop_charging();
                Err(err)
            }
        }
    }

    /// Unwind to `NoCharging`.
    ///
    /// Safe to call in any state; collaborator failures on this path are
    /// logged and do not stop the unwind.
    pub fn stop_charging(&mut self) {
        let was = self.charging_state;
        let ta_type = self.ta_type;

        self.scheduler.cancel_scheduled();
        self.keepalive_armed = false;

        if was != ChargingState::NoCharging
            && ta_type == TaType::Wireless
            && self.wireless.as_mut().is_some_and(AdapterProvider::is_online)
        {
            self.wlc_ramp_down();
        }

        if let Err(err) = self.ic.enable_charging(false) {
            dc_warn!("dc: disable failed: {}", err);
        }

        if was != ChargingState::NoCharging {
            self.stats
                .on_transition(was, ChargingState::NoCharging, Instant::now());
        }
        self.reset_session();

        if let Err(err) = self.ic.set_input_current_limit(self.config.iin_cfg) {
            dc_warn!("dc: restore input limit failed: {}", err);
        }
        if let Err(err) = self.ic.set_float_voltage(self.config.fv_max) {
            dc_warn!("dc: restore float voltage failed: {}", err);
        }
        if let Err(err) = self.ic.reinit() {
            dc_warn!("dc: reinit failed: {}", err);
        }

        let reverted = match ta_type {
            TaType::WiredPd => revert_if_online(self.wired.as_mut()),
            TaType::Wireless => revert_if_online(self.wireless.as_mut()),
            TaType::Unknown => None,
        };
        if let Some(Err(err)) = reverted {
            dc_warn!("dc: adapter revert failed: {}", err);
        }

        if was != ChargingState::NoCharging {
            dc_info!("dc: stopped (was {})", was);
        }
    }

    fn reset_session(&mut self) {
        self.charging_state = ChargingState::NoCharging;
        self.ret_state = None;
        self.ta_type = TaType::Unknown;
        self.ta_ctrl = TaControl::ConstantCurrent;
        self.chg_mode = ChargeMode::None;
        self.lp.reset();
        self.cc_max = None;
        self.fv_uv = None;
        self.new_iin = None;
        self.new_vfloat = None;
        self.retry_cnt = 0;
        self.bus_retry_cnt = 0;
        self.pdmsg_fail_cnt = 0;
        self.adjust_steps = 0;
        self.adjust_dir = None;
        self.timer_id = TimerId::None;
        self.timer_period = Duration::from_ticks(0);
        self.msg_next = None;
        self.source = None;
        self.dc_start_time = None;
    }

    // ── Internal helpers shared by the handlers ────────────────────────────

    /// Move to `next` if the transition table allows it.
    pub(crate) fn set_state(&mut self, next: ChargingState) -> Result<(), ChargerError> {
        let from = self.charging_state;
        if !from.can_transition_to(next) {
            return Err(ChargerError::InvalidTransition { from, to: next });
        }
        if from != next {
            self.stats.on_transition(from, next, Instant::now());
            dc_debug!("dc: {} -> {}", from, next);
            self.charging_state = next;
        }
        Ok(())
    }

    pub(crate) fn schedule(&mut self, id: TimerId, period: Duration) {
        self.timer_id = id;
        self.timer_period = period;
    }

    pub(crate) fn queue_work(&mut self) {
        if self.timer_id == TimerId::None {
            self.scheduler.cancel_scheduled();
        } else {
            self.scheduler.schedule_after(self.timer_period);
        }
    }

    /// True once the preset has picked a ratio and an input target that
    /// later limit changes are measured against. A preset that is still
    /// pending reads the targets itself.
    pub(crate) fn operating_point_set(&self) -> bool {
        !matches!(
            self.charging_state,
            ChargingState::NoCharging | ChargingState::CheckVbat
        ) && self.chg_mode != ChargeMode::None
            && self.timer_id != TimerId::PresetDc
    }

    /// Input-side current for a battery current target at the active ratio.
    pub(crate) fn input_current_target(&self, cc_max: u32) -> u32 {
        let iin = self.chg_mode.to_input_side(cc_max).min(self.config.iin_cfg);
        if self.lp.ta_max_cur > 0 {
            iin.min(self.lp.ta_max_cur)
        } else {
            iin
        }
    }

    pub(crate) fn read_adc(&mut self, channel: AdcChannel) -> Result<u32, ChargerError> {
        Ok(self.ic.read_adc(channel)?)
    }

    /// `Ok(true)` when switching, `Ok(false)` in reverse-current protection.
    pub(crate) fn check_active(&mut self) -> Result<bool, ChargerError> {
        let status = self.ic.read_status()?;
        if status.contains(platform::StatusFlags::ACTIVE) {
            return Ok(true);
        }
        if status.contains(platform::StatusFlags::RCP) {
            dc_info!("dc: charge pump in RCP, status {:#x}", status.bits());
            return Ok(false);
        }
        dc_error!("dc: charge pump not active, status {:#x}", status.bits());
        self.dump_registers();
        Err(ChargerError::NotActive)
    }

    pub(crate) fn dump_registers(&mut self) {
        match self.ic.dump_registers() {
            Ok(dump) => {
                for (reg, val) in dump.iter() {
                    dc_error!("dc: reg {:#x} = {:#x}", reg, val);
                }
            }
            Err(err) => dc_warn!("dc: register dump failed: {}", err),
        }
    }

    /// Read battery current and record over-current against `cc_max`.
    pub(crate) fn check_overcurrent(&mut self) -> Result<(), ChargerError> {
        let ibat = self.read_adc(AdcChannel::BatteryCurrent)?;
        let cc_max = self.cc_max.unwrap_or(u32::MAX);
        if self.stats.record_ibat(ibat, cc_max) {
            dc_warn!("dc: ibat {} above cc_max {}", ibat, cc_max);
        }
        Ok(())
    }

    pub(crate) fn clear_loop_memory(&mut self) {
        self.lp.prev_iin = 0;
        self.lp.prev_inc = PrevIncrement::None;
    }

    // ── Read-only accessors ────────────────────────────────────────────────

    /// Current state.
    pub fn charging_state(&self) -> ChargingState {
        self.charging_state
    }

    /// State to return to after a sub-adjustment.
    pub fn ret_state(&self) -> Option<ChargingState> {
        self.ret_state
    }

    /// Bound adapter kind.
    pub fn ta_type(&self) -> TaType {
        self.ta_type
    }

    /// Whether the adapter current or power ceiling binds.
    pub fn ta_ctrl(&self) -> TaControl {
        self.ta_ctrl
    }

    /// Selected conversion ratio.
    pub fn chg_mode(&self) -> ChargeMode {
        self.chg_mode
    }

    /// Adapter setpoint, ceilings and loop memory.
    pub fn control_loop(&self) -> &ControlLoop {
        &self.lp
    }

    /// Target input current, µA.
    pub fn iin_cc(&self) -> u32 {
        self.lp.iin_cc
    }

    /// Requested adapter voltage, µV.
    pub fn ta_vol(&self) -> u32 {
        self.lp.ta_vol
    }

    /// Requested adapter current, µA.
    pub fn ta_cur(&self) -> u32 {
        self.lp.ta_cur
    }

    /// Battery current target, µA.
    pub fn cc_max(&self) -> Option<u32> {
        self.cc_max
    }

    /// Float voltage target, µV.
    pub fn fv_uv(&self) -> Option<u32> {
        self.fv_uv
    }

    /// Pending input current change.
    pub fn new_iin(&self) -> Option<u32> {
        self.new_iin
    }

    /// Pending float voltage change.
    pub fn new_vfloat(&self) -> Option<u32> {
        self.new_vfloat
    }

    /// `CheckVbat` / `CheckActive` retry counter.
    pub fn retry_cnt(&self) -> u8 {
        self.retry_cnt
    }

    /// Pending timer tag.
    pub fn timer_id(&self) -> TimerId {
        self.timer_id
    }

    /// Delay of the pending timer.
    pub fn timer_period(&self) -> Duration {
        self.timer_period
    }

    /// Source of the active session.
    pub fn source(&self) -> Option<PowerSource> {
        self.source
    }

    /// When the active session was started.
    pub fn dc_start_time(&self) -> Option<Instant> {
        self.dc_start_time
    }

    /// Whether the PPS keep-alive is armed.
    pub fn keepalive_armed(&self) -> bool {
        self.keepalive_armed
    }

    /// Session telemetry.
    pub fn stats(&self) -> &ChargerStats {
        &self.stats
    }

    /// Board configuration.
    pub fn config(&self) -> &ChargerConfig {
        &self.config
    }

    /// Charge-pump IC.
    pub fn ic(&self) -> &IC {
        &self.ic
    }

    /// Charge-pump IC, mutable.
    pub fn ic_mut(&mut self) -> &mut IC {
        &mut self.ic
    }

    /// Wired adapter slot.
    pub fn wired_mut(&mut self) -> Option<&mut TA> {
        self.wired.as_mut()
    }

    /// Wireless receiver slot.
    pub fn wireless_mut(&mut self) -> Option<&mut RX> {
        self.wireless.as_mut()
    }

    /// Ramp-down delay.
    pub fn delay(&self) -> &D {
        &self.delay
    }

    /// Scheduler.
    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    /// Scheduler, mutable.
    pub fn scheduler_mut(&mut self) -> &mut S {
        &mut self.scheduler
    }
}
