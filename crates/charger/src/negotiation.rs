//! Adapter negotiation: source binding, capability queries, setpoint
//! messages, PPS keep-alive and the wireless ramp-down on stop.

use embedded_hal::delay::DelayNs;
use platform::{AdapterError, AdapterProvider, AdcChannel, ChargerIc, Scheduler};

use crate::error::ChargerError;
use crate::limits::{Ceiling, APDO_CEILINGS, MAX_RAMP_STEPS, PD_MSG_MAX_RETRY, RX_CEILINGS};
use crate::log::{dc_debug, dc_info, dc_warn};
use crate::session::ChargerSession;
use crate::state::{ChargeMode, ChargingState, PowerSource, TaType, TimerId};

impl<IC, TA, RX, D, S> ChargerSession<IC, TA, RX, D, S>
where
    IC: ChargerIc,
    TA: AdapterProvider,
    RX: AdapterProvider,
    D: DelayNs,
    S: Scheduler,
{
    /// Bind the session to the provider behind `source`.
    pub(crate) fn select_ta_type(&mut self, source: PowerSource) -> Result<(), ChargerError> {
        let online = match source {
            PowerSource::WiredPps => self.wired.as_mut().map(AdapterProvider::is_online),
            PowerSource::Wireless => self.wireless.as_mut().map(AdapterProvider::is_online),
        };
        match online {
            None => {
                dc_warn!("dc: no provider for {}", source.ta_type());
                Err(ChargerError::NotFound)
            }
            Some(false) => Err(ChargerError::Adapter(AdapterError::Offline)),
            Some(true) => {
                self.ta_type = source.ta_type();
                Ok(())
            }
        }
    }

    fn accept_capability(&mut self, ceiling: &Ceiling, cap: platform::AdapterCapability) {
        self.lp.ta_max_vol = cap.max_uv;
        self.lp.ta_max_cur = cap.max_ua;
        self.lp.ta_max_pwr = cap.max_mw;
        self.lp.ta_objpos = cap.objpos;
        dc_info!(
            "dc: {} ceiling {} uV {} uA accepted: {} uV {} uA {} mW obj {}",
            self.chg_mode,
            ceiling.max_uv,
            ceiling.max_ua,
            cap.max_uv,
            cap.max_ua,
            cap.max_mw,
            cap.objpos
        );
    }

    /// Pick the highest-priority APDO ceiling the wired source satisfies.
    pub(crate) fn get_apdo_max_power(&mut self) -> Result<(), ChargerError> {
        let ta = self.wired.as_mut().ok_or(ChargerError::NotFound)?;
        for ceiling in &APDO_CEILINGS {
            match ta.max_power(ceiling.max_uv, ceiling.max_ua) {
                Ok(cap) => {
                    self.chg_mode = ceiling.mode;
                    self.accept_capability(ceiling, cap);
                    return Ok(());
                }
                Err(AdapterError::NotSupported) => {
                    dc_debug!(
                        "dc: no APDO for {} uV {} uA",
                        ceiling.max_uv,
                        ceiling.max_ua
                    );
                }
                Err(err) => return Err(err.into()),
            }
        }
        dc_warn!("dc: adapter has no usable APDO");
        Err(ChargerError::NotSupported)
    }

    /// Query the wireless receiver and pick the ratio its voltage allows.
    pub(crate) fn get_rx_max_power(&mut self, fv_uv: u32) -> Result<(), ChargerError> {
        let rx = self.wireless.as_mut().ok_or(ChargerError::NotFound)?;
        for ceiling in &RX_CEILINGS {
            match rx.max_power(ceiling.max_uv, ceiling.max_ua) {
                Ok(cap) => {
                    self.chg_mode = if cap.max_uv >= ChargeMode::Ratio4to1.to_adapter_side(fv_uv) {
                        ChargeMode::Ratio4to1
                    } else {
                        ChargeMode::Ratio2to1
                    };
                    self.accept_capability(ceiling, cap);
                    return Ok(());
                }
                Err(AdapterError::NotSupported) => {}
                Err(err) => return Err(err.into()),
            }
        }
        dc_warn!("dc: receiver cannot reach a supported ratio");
        Err(ChargerError::NotSupported)
    }

    /// `PdMsgSend`: push the setpoint to the adapter.
    pub(crate) fn send_message(&mut self) -> Result<(), ChargerError> {
        let next = self
            .msg_next
            .take()
            .or_else(|| self.charging_state.after_message())
            .ok_or(ChargerError::InvalidState {
                state: self.charging_state,
                timer: TimerId::PdMsgSend,
            })?;

        self.lp.quantize();
        let (uv, ua, objpos) = (self.lp.ta_vol, self.lp.ta_cur, self.lp.ta_objpos);
        let (sent, wait) = match self.ta_type {
            TaType::WiredPd => (
                self.wired
                    .as_mut()
                    .ok_or(ChargerError::NotFound)?
                    .request(uv, ua, objpos),
                self.config.timings.pdmsg_wait,
            ),
            TaType::Wireless => (
                self.wireless
                    .as_mut()
                    .ok_or(ChargerError::NotFound)?
                    .request(uv, ua, objpos),
                self.config.timings.pdmsg_wlc_wait,
            ),
            TaType::Unknown => return Err(ChargerError::NotFound),
        };

        match sent {
            Ok(()) => {
                self.stats.record_adapter_msg(true);
                self.pdmsg_fail_cnt = 0;
                self.keepalive_armed = self.ta_type == TaType::WiredPd;
                dc_debug!(
                    "dc: sent {} uV {} uA obj {} in {}",
                    uv,
                    ua,
                    objpos,
                    self.charging_state
                );
                self.schedule(next, wait);
                Ok(())
            }
            Err(err) => {
                self.stats.record_adapter_msg(false);
                self.pdmsg_fail_cnt = self.pdmsg_fail_cnt.saturating_add(1);
                dc_warn!(
                    "dc: request {} uV {} uA failed: {} ({} in a row)",
                    uv,
                    ua,
                    err,
                    self.pdmsg_fail_cnt
                );
                if self.pdmsg_fail_cnt > PD_MSG_MAX_RETRY {
                    return Err(err.into());
                }
                self.set_state(ChargingState::CheckActive)?;
                self.schedule(TimerId::CheckActive, self.config.timings.pdmsg_retry);
                Ok(())
            }
        }
    }

    /// Re-send the last PPS request so the source stays in PPS mode.
    ///
    /// No-op unless a wired session has sent at least one request.
    pub fn keepalive(&mut self) -> Result<(), ChargerError> {
        if !self.keepalive_armed || self.ta_type != TaType::WiredPd {
            return Ok(());
        }
        let (uv, ua, objpos) = (self.lp.ta_vol, self.lp.ta_cur, self.lp.ta_objpos);
        let ta = self.wired.as_mut().ok_or(ChargerError::NotFound)?;
        ta.request(uv, ua, objpos).map_err(|err| {
            dc_warn!("dc: keep-alive failed: {}", err);
            ChargerError::from(err)
        })
    }

    /// Step the wireless input down before the charge pump is disabled.
    pub(crate) fn wlc_ramp_down(&mut self) {
        match self.wlc_ramp_down_iin() {
            Ok(steps) => dc_debug!("dc: wlc iin ramp-down, {} steps", steps),
            Err(err) => dc_warn!("dc: wlc iin ramp-down failed: {}", err),
        }
        match self.wlc_ramp_down_vout() {
            Ok(steps) => dc_debug!("dc: wlc vout ramp-down, {} steps", steps),
            Err(err) => dc_warn!("dc: wlc vout ramp-down failed: {}", err),
        }
    }

    fn wlc_ramp_down_iin(&mut self) -> Result<u16, ChargerError> {
        let floor = self.config.wlc_ramp_iin_floor;
        let step = self.config.wlc_ramp_iin_step;
        let pause = self.config.wlc_ramp_down_delay_ms;

        let mut iin = self.lp.iin_cc.saturating_add(self.config.iin_cfg_margin);
        let mut steps = 0;
        while iin > floor && steps < MAX_RAMP_STEPS {
            let iout = self
                .wireless
                .as_mut()
                .and_then(AdapterProvider::output_current)
                .unwrap_or(iin);
            iin = iin.min(iout).saturating_sub(step).max(floor);
            self.ic.set_input_current_limit(iin)?;
            self.delay.delay_ms(pause);
            steps = steps.saturating_add(1);
        }
        Ok(steps)
    }

    fn wlc_ramp_down_vout(&mut self) -> Result<u16, ChargerError> {
        let vbat = self.read_adc(AdcChannel::BatteryVoltage)?;
        // Floor is 4 * vbat for either ratio.
        let target = ChargeMode::Ratio4to1.to_adapter_side(vbat);
        let step = self.config.wlc_ramp_vol_step;
        let pause = self.config.wlc_ramp_down_delay_ms;

        let rx = self.wireless.as_mut().ok_or(ChargerError::NotFound)?;
        let mut steps = 0;
        while self.lp.ta_vol > target && steps < MAX_RAMP_STEPS {
            self.lp.ta_vol = self.lp.ta_vol.saturating_sub(step).max(target);
            rx.request(self.lp.ta_vol, self.lp.ta_cur, self.lp.ta_objpos)?;
            self.delay.delay_ms(pause);
            steps = steps.saturating_add(1);
        }
        Ok(steps)
    }
}
