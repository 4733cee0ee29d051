//! Per-state tick handlers.
//!
//! Each handler runs with the session lock held, reads what it needs from
//! the IC, updates the setpoint and leaves the next `(timer_id,
//! timer_period)` behind. Adapter messages are never sent from here; a
//! handler that changes the setpoint schedules `PdMsgSend` instead.

use embassy_time::Duration;
use embedded_hal::delay::DelayNs;
use platform::{AdapterCapability, AdapterProvider, AdcChannel, ChargerIc, Scheduler};

use crate::compensation::{
    Compensation, Knob, CURRENT_COMP, CURRENT_COMP_CP, RX_VOLTAGE_COMP, VOLTAGE_COMP,
};
use crate::error::ChargerError;
use crate::limits::{
    round_down, AdapterLimits, IIN_CC_COMP_OFFSET, MAX_ADJUST_STEPS, MAX_RETRY_CNT,
    PD_MSG_TA_CUR_STEP, PD_MSG_TA_VOL_STEP, TA_VOL_PRE_OFFSET, TA_VOL_STEP_ADJ_CC,
    TA_VOL_STEP_PRE_CV, WCRX_VOL_PRE_OFFSET, WCRX_VOL_STEP,
};
use crate::log::{dc_debug, dc_error, dc_info, dc_warn};
use crate::session::{ChargerSession, Direction};
use crate::state::{ChargingState, LoopStatus, PrevIncrement, TaControl, TaType, TimerId};

const NOW: Duration = Duration::from_ticks(0);

impl<IC, TA, RX, D, S> ChargerSession<IC, TA, RX, D, S>
where
    IC: ChargerIc,
    TA: AdapterProvider,
    RX: AdapterProvider,
    D: DelayNs,
    S: Scheduler,
{
    fn is_wireless(&self) -> bool {
        self.ta_type == TaType::Wireless
    }

    /// Voltage step used when backing off from a limiting loop.
    fn backoff_vol_step(&self) -> u32 {
        if self.is_wireless() {
            WCRX_VOL_STEP
        } else {
            PD_MSG_TA_VOL_STEP
        }
    }

    fn ccmode_status(&mut self) -> Result<LoopStatus, ChargerError> {
        Ok(LoopStatus::from_flags(self.ic.read_status()?))
    }

    fn cvmode_status(&mut self) -> Result<LoopStatus, ChargerError> {
        let iin = self.read_adc(AdcChannel::InputCurrent)?;
        let vbat = self.read_adc(AdcChannel::BatteryVoltage)?;
        let fv = self.fv_uv.unwrap_or(self.config.fv_max);
        if iin < self.config.iin_topoff && vbat >= fv.saturating_sub(self.config.eoc_vbat_tolerance)
        {
            return Ok(LoopStatus::Done);
        }
        Ok(LoopStatus::from_flags(self.ic.read_status()?))
    }

    // ── Start-up ───────────────────────────────────────────────────────────

    /// `VbatMinCheck`: wait for a usable battery and both targets.
    pub(crate) fn check_vbat(&mut self) -> Result<(), ChargerError> {
        let vbat = self.read_adc(AdcChannel::BatteryVoltage)?;
        let targets = self.fv_uv.is_some() && self.cc_max.is_some();

        if vbat >= self.config.dc_vbat_min && targets {
            self.retry_cnt = 0;
            self.set_state(ChargingState::PresetDc)?;
            self.schedule(TimerId::PresetDc, NOW);
            return Ok(());
        }

        if self.retry_cnt >= MAX_RETRY_CNT {
            dc_error!("dc: vbat {} / targets {} never ready", vbat, targets);
            return Err(ChargerError::Timeout);
        }
        self.retry_cnt = self.retry_cnt.saturating_add(1);
        dc_info!(
            "dc: waiting, vbat {} min {} targets {} (retry {})",
            vbat,
            self.config.dc_vbat_min,
            targets,
            self.retry_cnt
        );
        self.schedule(TimerId::VbatMinCheck, self.config.timings.vbatmin_check);
        Ok(())
    }

    /// `PresetDc`: choose the ratio and the first adapter setpoint.
    pub(crate) fn preset_dc(&mut self) -> Result<(), ChargerError> {
        let vbat = self.read_adc(AdcChannel::BatteryVoltage)?;
        let fv = self.fv_uv.ok_or(ChargerError::InvalidInput)?;
        let cc_max = self.cc_max.ok_or(ChargerError::InvalidInput)?;
        if vbat > fv {
            dc_error!("dc: vbat {} above float voltage {}", vbat, fv);
            return Err(ChargerError::InvalidInput);
        }

        let tdie = self.read_adc(AdcChannel::DieTemperature)?;
        let vin = self.read_adc(AdcChannel::InputVoltage)?;
        let status = self.ic.read_status()?;
        let faults = status.faults();
        if !faults.is_empty() {
            dc_error!("dc: fault before start, status {:#x}", status.bits());
            self.dump_registers();
            return Err(ChargerError::Fault {
                status: faults.bits(),
            });
        }

        match self.ta_type {
            TaType::WiredPd => self.get_apdo_max_power()?,
            TaType::Wireless => self.get_rx_max_power(fv)?,
            TaType::Unknown => return Err(ChargerError::NotFound),
        }
        self.lp.limits = AdapterLimits::for_ta(self.ta_type);

        let iin_cc = self.input_current_target(cc_max);
        let offset = if self.is_wireless() {
            WCRX_VOL_PRE_OFFSET
        } else {
            TA_VOL_PRE_OFFSET
        };
        self.lp.iin_cc = iin_cc;
        self.lp.ta_vol = self.chg_mode.to_adapter_side(vbat).saturating_add(offset);
        self.lp.ta_cur = iin_cc;
        self.lp.quantize();

        let pwr = AdapterCapability::vi_power_mw(self.lp.ta_vol, self.lp.ta_cur);
        if !self.is_wireless() && self.lp.ta_max_pwr > 0 && pwr > self.lp.ta_max_pwr {
            let cp_cur = u64::from(self.lp.ta_max_pwr)
                .saturating_mul(1_000_000_000)
                .checked_div(u64::from(self.lp.ta_vol))
                .map_or(0, |ua| u32::try_from(ua).unwrap_or(u32::MAX));
            let cp_cur = round_down(cp_cur, PD_MSG_TA_CUR_STEP);
            self.ta_ctrl = TaControl::ConstantPower;
            self.lp.ta_max_cur = cp_cur.min(self.lp.ta_max_cur);
            self.lp.ta_cur = cp_cur;
            self.lp.iin_cc = cp_cur.min(iin_cc);
            self.lp.quantize();
        } else {
            self.ta_ctrl = TaControl::ConstantCurrent;
        }

        self.clear_loop_memory();
        dc_info!(
            "dc: preset {} vbat {} vin {} tdie {} -> ta {} uV {} uA, iin_cc {}, {} mW max",
            self.chg_mode,
            vbat,
            vin,
            tdie,
            self.lp.ta_vol,
            self.lp.ta_cur,
            self.lp.iin_cc,
            self.lp.ta_max_pwr
        );
        self.schedule(TimerId::PdMsgSend, NOW);
        Ok(())
    }

    /// `PresetConfig`: program the IC and enable the charge pump.
    pub(crate) fn preset_config(&mut self) -> Result<(), ChargerError> {
        let fv = self.fv_uv.ok_or(ChargerError::InvalidInput)?;
        let limit = self.lp.iin_cc.saturating_add(self.config.iin_cfg_margin);
        self.ic.set_input_current_limit(limit)?;
        self.ic.set_float_voltage(fv)?;
        self.ic.enable_charging(true)?;
        self.retry_cnt = 0;
        self.set_state(ChargingState::CheckActive)?;
        self.schedule(TimerId::CheckActive, self.config.timings.enable_delay);
        Ok(())
    }

    /// `CheckActive`: wait for the charge pump to start switching.
    pub(crate) fn check_active_state(&mut self) -> Result<(), ChargerError> {
        if self.check_active()? {
            self.retry_cnt = 0;
            self.ret_state = None;
            self.set_state(ChargingState::AdjustCc)?;
            self.clear_loop_memory();
            self.schedule(TimerId::AdjustCcMode, NOW);
            return Ok(());
        }
        if self.retry_cnt >= MAX_RETRY_CNT {
            dc_error!("dc: charge pump stuck in RCP");
            return Err(ChargerError::NotActive);
        }
        self.retry_cnt = self.retry_cnt.saturating_add(1);
        self.schedule(TimerId::CheckActive, self.config.timings.enable_delay);
        Ok(())
    }

    // ── Constant current ───────────────────────────────────────────────────

    /// `AdjustCcMode`: converge toward `iin_cc` before steady-state CC.
    pub(crate) fn charge_adjust_ccmode(&mut self) -> Result<(), ChargerError> {
        self.check_active()?;
        self.check_overcurrent()?;
        let iin = self.read_adc(AdcChannel::InputCurrent)?;

        match self.ccmode_status()? {
            LoopStatus::IinLoop | LoopStatus::IbatLoop => {
                self.lp.prev_inc = PrevIncrement::None;
                self.schedule(TimerId::EnterCcMode, NOW);
            }
            LoopStatus::VfloatLoop => {
                self.lp.prev_inc = PrevIncrement::None;
                self.set_state(ChargingState::StartCv)?;
                self.schedule(TimerId::EnterCvMode, NOW);
            }
            LoopStatus::VinUvlo => {
                dc_warn!("dc: vin uvlo while adjusting, iin {}", iin);
                self.schedule(TimerId::AdjustCcMode, self.config.timings.pdmsg_wait);
            }
            LoopStatus::Inactive | LoopStatus::Done => self.adjust_cc_step(iin)?,
        }

        self.lp.prev_iin = iin;
        Ok(())
    }

    fn adjust_cc_step(&mut self, iin: u32) -> Result<(), ChargerError> {
        if iin > self.lp.iin_cc.saturating_add(IIN_CC_COMP_OFFSET) {
            self.lp.lower(Knob::Voltage, self.backoff_vol_step());
            self.lp.prev_inc = PrevIncrement::None;
            dc_info!("dc: adjust overshoot, iin {} target {}", iin, self.lp.iin_cc);
            self.msg_next = Some(TimerId::EnterCcMode);
            self.schedule(TimerId::PdMsgSend, NOW);
            return Ok(());
        }

        let next = if self.is_wireless() {
            (!self.lp.at_max(Knob::Voltage)).then_some(Knob::Voltage)
        } else {
            self.adjust_cc_knob(iin)
        };
        match next {
            Some(knob) => {
                let step = match (knob, self.is_wireless()) {
                    (Knob::Voltage, true) => WCRX_VOL_STEP,
                    (Knob::Voltage, false) => TA_VOL_STEP_ADJ_CC,
                    (Knob::Current, _) => PD_MSG_TA_CUR_STEP,
                };
                self.lp.raise(knob, step);
                self.lp.prev_inc = knob.into();
                dc_debug!(
                    "dc: adjust {} up, iin {} ta {} uV {} uA",
                    knob,
                    iin,
                    self.lp.ta_vol,
                    self.lp.ta_cur
                );
                self.schedule(TimerId::PdMsgSend, NOW);
            }
            None => self.schedule(TimerId::EnterCcMode, NOW),
        }
        Ok(())
    }

    /// Knob to raise while converging on a wired adapter.
    fn adjust_cc_knob(&self, iin: u32) -> Option<Knob> {
        let lp = &self.lp;
        let order = if self.ta_ctrl == TaControl::ConstantPower {
            [Some(Knob::Voltage), None]
        } else {
            let moved = lp.iin_moved(iin);
            match lp.prev_inc {
                PrevIncrement::Voltage if !moved => [Some(Knob::Current), Some(Knob::Voltage)],
                PrevIncrement::Current if moved => [Some(Knob::Current), Some(Knob::Voltage)],
                _ => [Some(Knob::Voltage), Some(Knob::Current)],
            }
        };
        order.into_iter().flatten().find(|knob| !lp.at_max(*knob))
    }

    /// `EnterCcMode`: settle into steady-state CC.
    pub(crate) fn charge_start_ccmode(&mut self) -> Result<(), ChargerError> {
        self.set_state(ChargingState::CcMode)?;
        dc_info!(
            "dc: CC mode, iin_cc {} ta {} uV {} uA",
            self.lp.iin_cc,
            self.lp.ta_vol,
            self.lp.ta_cur
        );
        self.schedule(TimerId::CheckCcMode, self.config.timings.ccmode_check);
        Ok(())
    }

    fn select_compensation(&self) -> &'static Compensation {
        if self.is_wireless() {
            &RX_VOLTAGE_COMP
        } else if self.ta_ctrl == TaControl::ConstantPower {
            &CURRENT_COMP_CP
        } else if self.lp.ta_cur <= self.lp.limits.min_cur.saturating_add(PD_MSG_TA_CUR_STEP) {
            &VOLTAGE_COMP
        } else {
            &CURRENT_COMP
        }
    }

    /// Back off one step after the input or battery current loop engaged.
    fn back_off_current_loop(&mut self, cv: bool) {
        if self.is_wireless() {
            self.lp.lower(Knob::Voltage, WCRX_VOL_STEP);
        } else if self.ta_ctrl == TaControl::ConstantPower
            || (!cv && self.lp.ta_cur > self.lp.limits.min_cur)
        {
            self.lp.lower(Knob::Current, PD_MSG_TA_CUR_STEP);
        } else {
            let step = if cv {
                TA_VOL_STEP_PRE_CV
            } else {
                PD_MSG_TA_VOL_STEP
            };
            self.lp.lower(Knob::Voltage, step);
        }
        self.lp.prev_inc = PrevIncrement::None;
    }

    /// `CheckCcMode`: periodic CC regulation.
    pub(crate) fn charge_ccmode(&mut self) -> Result<(), ChargerError> {
        if self.apply_new_limits()? {
            return Ok(());
        }
        self.check_active()?;
        self.check_overcurrent()?;

        match self.ccmode_status()? {
            LoopStatus::Inactive | LoopStatus::Done => {
                let iin = self.read_adc(AdcChannel::InputCurrent)?;
                let comp = self.select_compensation();
                let outcome = comp.compensate(&mut self.lp, iin);
                dc_debug!(
                    "dc: CC iin {} target {} -> ta {} uV {} uA",
                    iin,
                    self.lp.iin_cc,
                    self.lp.ta_vol,
                    self.lp.ta_cur
                );
                if outcome.needs_message() {
                    self.schedule(TimerId::PdMsgSend, NOW);
                } else {
                    self.schedule(TimerId::CheckCcMode, self.config.timings.ccmode_check);
                }
            }
            LoopStatus::VfloatLoop => {
                dc_info!("dc: float voltage loop reached, start CV");
                self.set_state(ChargingState::StartCv)?;
                self.schedule(TimerId::EnterCvMode, NOW);
            }
            LoopStatus::IinLoop | LoopStatus::IbatLoop => {
                self.back_off_current_loop(false);
                self.schedule(TimerId::PdMsgSend, NOW);
            }
            LoopStatus::VinUvlo => {
                dc_warn!("dc: vin uvlo in CC mode");
                self.schedule(TimerId::CheckCcMode, self.config.timings.ccmode_check);
            }
        }
        Ok(())
    }

    // ── Constant voltage ───────────────────────────────────────────────────

    /// `EnterCvMode`: ramp down until no loop other than float is left.
    pub(crate) fn charge_start_cvmode(&mut self) -> Result<(), ChargerError> {
        self.check_active()?;
        self.check_overcurrent()?;

        match self.cvmode_status()? {
            LoopStatus::IinLoop | LoopStatus::IbatLoop => {
                self.back_off_current_loop(true);
                self.schedule(TimerId::PdMsgSend, NOW);
            }
            LoopStatus::VfloatLoop => {
                let step = if self.is_wireless() {
                    WCRX_VOL_STEP
                } else {
                    TA_VOL_STEP_PRE_CV
                };
                self.lp.lower(Knob::Voltage, step);
                self.schedule(TimerId::PdMsgSend, NOW);
            }
            LoopStatus::Inactive | LoopStatus::Done => {
                self.set_state(ChargingState::CvMode)?;
                dc_info!("dc: CV mode, ta {} uV {} uA", self.lp.ta_vol, self.lp.ta_cur);
                self.schedule(TimerId::CheckCvMode, NOW);
            }
            LoopStatus::VinUvlo => {
                dc_warn!("dc: vin uvlo entering CV");
                self.schedule(TimerId::EnterCvMode, self.config.timings.cvmode_check);
            }
        }
        Ok(())
    }

    /// `CheckCvMode`: periodic CV regulation and end-of-charge detection.
    pub(crate) fn charge_cvmode(&mut self) -> Result<(), ChargerError> {
        if self.apply_new_limits()? {
            return Ok(());
        }
        self.check_active()?;
        self.check_overcurrent()?;

        let done = self.charging_state == ChargingState::ChargingDone;
        let idle_period = if done {
            self.config.timings.chgdone_check
        } else {
            self.config.timings.cvmode_check
        };

        match self.cvmode_status()? {
            LoopStatus::Done => {
                if !done {
                    self.set_state(ChargingState::ChargingDone)?;
                    dc_info!("dc: charging done");
                }
                self.schedule(TimerId::CheckCvMode, self.config.timings.chgdone_check);
            }
            LoopStatus::IinLoop | LoopStatus::IbatLoop => {
                if !self.is_wireless() && self.ta_ctrl == TaControl::ConstantPower {
                    self.lp.lower(Knob::Current, PD_MSG_TA_CUR_STEP);
                } else {
                    self.lp.lower(Knob::Voltage, self.backoff_vol_step());
                }
                self.schedule(TimerId::PdMsgSend, NOW);
            }
            LoopStatus::VfloatLoop => {
                self.lp.lower(Knob::Voltage, self.backoff_vol_step());
                self.schedule(TimerId::PdMsgSend, NOW);
            }
            LoopStatus::Inactive | LoopStatus::VinUvlo => {
                self.schedule(TimerId::CheckCvMode, idle_period);
            }
        }
        Ok(())
    }

    // ── Limit changes ──────────────────────────────────────────────────────

    /// Consume one pending limit change. Returns `true` when one was applied.
    ///
    /// Input current decreases go before float voltage changes, increases
    /// after them.
    pub(crate) fn apply_new_limits(&mut self) -> Result<bool, ChargerError> {
        if let Some(iin) = self.new_iin.filter(|&iin| iin < self.lp.iin_cc) {
            self.new_iin = None;
            self.set_new_iin(iin)?;
            return Ok(true);
        }
        if let Some(fv) = self.new_vfloat.take() {
            self.set_new_vfloat(fv)?;
            return Ok(true);
        }
        if let Some(iin) = self.new_iin.take() {
            if iin != self.lp.iin_cc {
                self.set_new_iin(iin)?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Program a new input current target and walk the adapter to it.
    pub(crate) fn set_new_iin(&mut self, iin: u32) -> Result<(), ChargerError> {
        let iin = iin.min(self.config.iin_cfg);
        if iin == self.lp.iin_cc {
            return Ok(());
        }
        dc_info!("dc: new iin {} (was {})", iin, self.lp.iin_cc);
        self.ic
            .set_input_current_limit(iin.saturating_add(self.config.iin_cfg_margin))?;
        self.lp.iin_cc = iin;
        self.ret_state = Some(self.charging_state);
        self.adjust_steps = 0;
        self.adjust_dir = None;

        if self.is_wireless() || self.ta_ctrl == TaControl::ConstantPower {
            self.set_state(ChargingState::AdjustTaVol)?;
            self.schedule(TimerId::AdjustTaVol, NOW);
        } else {
            self.set_state(ChargingState::AdjustTaCur)?;
            self.schedule(TimerId::AdjustTaCur, NOW);
        }
        Ok(())
    }

    /// Program a new float voltage and recompute the operating point.
    pub(crate) fn set_new_vfloat(&mut self, fv: u32) -> Result<(), ChargerError> {
        dc_info!("dc: new float voltage {} (was {})", fv, self.fv_uv.unwrap_or(0));
        self.ic.set_float_voltage(fv)?;
        self.fv_uv = Some(fv);
        self.ret_state = None;
        self.set_state(ChargingState::PresetDc)?;
        self.schedule(TimerId::PresetDc, NOW);
        Ok(())
    }

    fn finish_ta_adjust(&mut self) -> Result<(), ChargerError> {
        let back = self.ret_state.take().unwrap_or(ChargingState::CcMode);
        dc_debug!(
            "dc: adjust done after {} steps, back to {}",
            self.adjust_steps,
            back
        );
        self.adjust_steps = 0;
        self.adjust_dir = None;
        self.set_state(back)?;
        self.schedule(back.check_timer(), NOW);
        Ok(())
    }

    /// `AdjustTaVol`: monotonic voltage walk until `iin` lands in band.
    pub(crate) fn adjust_ta_voltage(&mut self) -> Result<(), ChargerError> {
        self.check_active()?;
        self.check_overcurrent()?;
        let iin = self.read_adc(AdcChannel::InputCurrent)?;

        let high = self.lp.iin_cc.saturating_add(PD_MSG_TA_CUR_STEP);
        let low = self.lp.iin_cc.saturating_sub(PD_MSG_TA_CUR_STEP);
        let want = if iin > high {
            Some(Direction::Down)
        } else if iin < low && !self.lp.at_max(Knob::Voltage) {
            Some(Direction::Up)
        } else {
            None
        };
        let reversed = matches!((want, self.adjust_dir), (Some(a), Some(b)) if a != b);

        let Some(dir) = want.filter(|_| !reversed && self.adjust_steps < MAX_ADJUST_STEPS) else {
            return self.finish_ta_adjust();
        };

        let step = self.backoff_vol_step();
        match dir {
            Direction::Up => self.lp.raise(Knob::Voltage, step),
            Direction::Down => self.lp.lower(Knob::Voltage, step),
        }
        self.adjust_dir = Some(dir);
        self.adjust_steps = self.adjust_steps.saturating_add(1);
        self.schedule(TimerId::PdMsgSend, NOW);
        Ok(())
    }

    /// `AdjustTaCur`: step the adapter current to the new target.
    pub(crate) fn adjust_ta_current(&mut self) -> Result<(), ChargerError> {
        self.check_active()?;
        self.check_overcurrent()?;

        let min_cur = self.lp.limits.min_cur;
        let target = round_down(
            self.lp.iin_cc.clamp(min_cur, self.lp.ta_max_cur.max(min_cur)),
            PD_MSG_TA_CUR_STEP,
        )
        .max(min_cur);

        if self.lp.ta_cur == target || self.adjust_steps >= MAX_ADJUST_STEPS {
            return self.finish_ta_adjust();
        }
        self.lp.ta_cur = if self.lp.ta_cur > target {
            self.lp.ta_cur.saturating_sub(PD_MSG_TA_CUR_STEP).max(target)
        } else {
            self.lp.ta_cur.saturating_add(PD_MSG_TA_CUR_STEP).min(target)
        };
        self.adjust_steps = self.adjust_steps.saturating_add(1);
        self.schedule(TimerId::PdMsgSend, NOW);
        Ok(())
    }
}
