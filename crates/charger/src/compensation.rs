//! Input-current convergence loop.
//!
//! Every tick in constant-current mode compares the measured input current
//! with `iin_cc` and turns one adapter knob by one step. The four variants
//! differ only in band width, step sizes and knob order, so they share
//! [`Compensation::compensate`] and are described by the constants
//! [`CURRENT_COMP`], [`CURRENT_COMP_CP`], [`VOLTAGE_COMP`] and
//! [`RX_VOLTAGE_COMP`].

use crate::limits::{
    round_down, AdapterLimits, IIN_ADC_OFFSET, IIN_CC_COMP_OFFSET, IIN_CC_COMP_OFFSET_CP,
    PD_MSG_TA_CUR_STEP, PD_MSG_TA_VOL_STEP, WCRX_VOL_STEP,
};
use crate::state::PrevIncrement;

/// One adapter setpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Knob {
    /// Adapter output voltage.
    Voltage,
    /// Adapter output current.
    Current,
}

impl From<Knob> for PrevIncrement {
    fn from(knob: Knob) -> Self {
        match knob {
            Knob::Voltage => Self::Voltage,
            Knob::Current => Self::Current,
        }
    }
}

impl Knob {
    /// Short name used in log lines.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Voltage => "voltage",
            Self::Current => "current",
        }
    }
}

impl core::fmt::Display for Knob {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Adapter setpoint, ceilings and loop memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ControlLoop {
    /// Target input current, µA (battery-side target divided by the ratio).
    pub iin_cc: u32,
    /// Requested adapter voltage, µV.
    pub ta_vol: u32,
    /// Requested adapter current, µA.
    pub ta_cur: u32,
    /// Adapter voltage ceiling, µV.
    pub ta_max_vol: u32,
    /// Adapter current ceiling, µA.
    pub ta_max_cur: u32,
    /// Adapter power ceiling, mW.
    pub ta_max_pwr: u32,
    /// Selected power object position.
    pub ta_objpos: u8,
    /// Input current seen on the previous tick, µA.
    pub prev_iin: u32,
    /// Last knob turned up.
    pub prev_inc: PrevIncrement,
    /// Floors and resolution of the bound adapter.
    pub limits: AdapterLimits,
}

impl ControlLoop {
    /// Everything cleared; wired limits.
    pub const fn new() -> Self {
        Self {
            iin_cc: 0,
            ta_vol: 0,
            ta_cur: 0,
            ta_max_vol: 0,
            ta_max_cur: 0,
            ta_max_pwr: 0,
            ta_objpos: 0,
            prev_iin: 0,
            prev_inc: PrevIncrement::None,
            limits: AdapterLimits::WIRED,
        }
    }

    /// Clear negotiation state and loop memory.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Force the setpoint into `[min, max]` on both knobs.
    ///
    /// A ceiling below the floor collapses the range onto the floor.
    pub fn clamp(&mut self) {
        let l = self.limits;
        self.ta_vol = self.ta_vol.min(self.ta_max_vol).max(l.min_vol);
        self.ta_cur = self.ta_cur.min(self.ta_max_cur).max(l.min_cur);
    }

    /// Round the setpoint down to the adapter resolution, then clamp.
    pub fn quantize(&mut self) {
        let l = self.limits;
        self.ta_vol = round_down(self.ta_vol, l.vol_step);
        self.ta_cur = round_down(self.ta_cur, l.cur_step);
        self.clamp();
    }

    /// Whether `knob` sits at its ceiling.
    pub fn at_max(&self, knob: Knob) -> bool {
        match knob {
            Knob::Voltage => self.ta_vol >= self.ta_max_vol,
            Knob::Current => self.ta_cur >= self.ta_max_cur,
        }
    }

    /// Raise `knob` by `step`, stopping at its ceiling.
    pub fn raise(&mut self, knob: Knob, step: u32) {
        match knob {
            Knob::Voltage => self.ta_vol = self.ta_vol.saturating_add(step).min(self.ta_max_vol),
            Knob::Current => self.ta_cur = self.ta_cur.saturating_add(step).min(self.ta_max_cur),
        }
    }

    /// Lower `knob` by `step`, stopping at its floor.
    pub fn lower(&mut self, knob: Knob, step: u32) {
        let l = self.limits;
        match knob {
            Knob::Voltage => self.ta_vol = self.ta_vol.saturating_sub(step).max(l.min_vol),
            Knob::Current => self.ta_cur = self.ta_cur.saturating_sub(step).max(l.min_cur),
        }
    }

    /// Whether the input current rose by more than ADC noise since last tick.
    pub fn iin_moved(&self, iin: u32) -> bool {
        iin > self.prev_iin.saturating_add(IIN_ADC_OFFSET)
    }
}

impl Default for ControlLoop {
    fn default() -> Self {
        Self::new()
    }
}

/// Which compensation table is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CompensationKind {
    /// Wired, adapter current ceiling binding.
    Current,
    /// Wired, adapter power ceiling binding.
    CurrentCp,
    /// Wired, current pinned at its floor: voltage only.
    Voltage,
    /// Wireless receiver: voltage only.
    RxVoltage,
}

/// Knob picked when the input current is above the band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decrease {
    /// Current while `ta_cur > iin_cc`, voltage otherwise.
    CurrentAboveTarget,
    /// Current while above its floor, voltage otherwise.
    CurrentAboveFloor,
    /// Voltage only.
    VoltageOnly,
}

/// Knob order when the input current is below the band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Increase {
    /// Infer the adapter mode: a rising `iin` means the adapter is in CV,
    /// so voltage goes first; a current raise that did not move `iin` hands
    /// over to voltage.
    Inferred,
    /// Current first unless the last current raise did not move `iin`.
    CurrentFirst,
    /// Voltage only.
    VoltageOnly,
}

/// Parameter table of one compensation variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Compensation {
    /// Variant.
    pub kind: CompensationKind,
    /// Band below `iin_cc` tolerated without action, µA.
    pub band_low: u32,
    /// Band above `iin_cc` tolerated without action, µA.
    pub band_high: u32,
    /// Voltage step, µV.
    pub vol_step: u32,
    /// Current step, µA.
    pub cur_step: u32,
    /// Decrease policy.
    pub decrease: Decrease,
    /// Increase policy.
    pub increase: Increase,
}

/// Wired, current ceiling binding.
pub const CURRENT_COMP: Compensation = Compensation {
    kind: CompensationKind::Current,
    band_low: IIN_CC_COMP_OFFSET,
    band_high: IIN_CC_COMP_OFFSET,
    vol_step: PD_MSG_TA_VOL_STEP,
    cur_step: PD_MSG_TA_CUR_STEP,
    decrease: Decrease::CurrentAboveTarget,
    increase: Increase::Inferred,
};

/// Wired, power ceiling binding.
pub const CURRENT_COMP_CP: Compensation = Compensation {
    kind: CompensationKind::CurrentCp,
    band_low: IIN_CC_COMP_OFFSET_CP,
    band_high: IIN_CC_COMP_OFFSET,
    vol_step: PD_MSG_TA_VOL_STEP,
    cur_step: PD_MSG_TA_CUR_STEP,
    decrease: Decrease::CurrentAboveFloor,
    increase: Increase::CurrentFirst,
};

/// Wired, voltage only.
pub const VOLTAGE_COMP: Compensation = Compensation {
    kind: CompensationKind::Voltage,
    band_low: IIN_CC_COMP_OFFSET,
    band_high: IIN_CC_COMP_OFFSET,
    vol_step: PD_MSG_TA_VOL_STEP,
    cur_step: 0,
    decrease: Decrease::VoltageOnly,
    increase: Increase::VoltageOnly,
};

/// Wireless receiver, voltage only.
pub const RX_VOLTAGE_COMP: Compensation = Compensation {
    kind: CompensationKind::RxVoltage,
    band_low: IIN_CC_COMP_OFFSET,
    band_high: IIN_CC_COMP_OFFSET,
    vol_step: WCRX_VOL_STEP,
    cur_step: 0,
    decrease: Decrease::VoltageOnly,
    increase: Increase::VoltageOnly,
};

/// Result of one compensation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Outcome {
    /// Above the band; `knob` was lowered.
    Decreased(Knob),
    /// Below the band; `knob` was raised.
    Increased(Knob),
    /// Below the band but every allowed knob is at its ceiling.
    Exhausted,
    /// Within the band.
    InBand,
}

impl Outcome {
    /// Whether the adapter must be sent the new setpoint.
    pub const fn needs_message(self) -> bool {
        matches!(self, Self::Decreased(_) | Self::Increased(_))
    }
}

impl Compensation {
    /// Step size for `knob`.
    pub const fn step(&self, knob: Knob) -> u32 {
        match knob {
            Knob::Voltage => self.vol_step,
            Knob::Current => self.cur_step,
        }
    }

    fn decrease_knob(&self, lp: &ControlLoop) -> Knob {
        let floor = match self.decrease {
            Decrease::VoltageOnly => return Knob::Voltage,
            Decrease::CurrentAboveTarget => lp.iin_cc.max(lp.limits.min_cur),
            Decrease::CurrentAboveFloor => lp.limits.min_cur,
        };
        if lp.ta_cur > floor {
            Knob::Current
        } else {
            Knob::Voltage
        }
    }

    fn increase_order(&self, lp: &ControlLoop, iin: u32) -> [Option<Knob>; 2] {
        let current_first = [Some(Knob::Current), Some(Knob::Voltage)];
        let voltage_first = [Some(Knob::Voltage), Some(Knob::Current)];
        let stalled_current = lp.prev_inc == PrevIncrement::Current && !lp.iin_moved(iin);
        match self.increase {
            Increase::VoltageOnly => [Some(Knob::Voltage), None],
            Increase::CurrentFirst if stalled_current => voltage_first,
            Increase::CurrentFirst => current_first,
            Increase::Inferred if lp.iin_moved(iin) || stalled_current => voltage_first,
            Increase::Inferred => current_first,
        }
    }

    /// Run one step against the measured input current `iin`.
    ///
    /// Leaves the setpoint clamped and `prev_iin == iin`.
    pub fn compensate(&self, lp: &mut ControlLoop, iin: u32) -> Outcome {
        let high = lp.iin_cc.saturating_add(self.band_high);
        let low = lp.iin_cc.saturating_sub(self.band_low);

        let outcome = if iin > high {
            let knob = self.decrease_knob(lp);
            lp.lower(knob, self.step(knob));
            lp.prev_inc = PrevIncrement::None;
            Outcome::Decreased(knob)
        } else if iin < low {
            let next = self
                .increase_order(lp, iin)
                .into_iter()
                .flatten()
                .find(|knob| !lp.at_max(*knob));
            match next {
                Some(knob) => {
                    lp.raise(knob, self.step(knob));
                    lp.prev_inc = knob.into();
                    Outcome::Increased(knob)
                }
                None => Outcome::Exhausted,
            }
        } else {
            lp.prev_inc = PrevIncrement::None;
            Outcome::InBand
        };

        lp.clamp();
        lp.prev_iin = iin;
        outcome
    }
}

#[cfg(test)]
#[allow(clippy::arithmetic_side_effects)] // expected values in tests
mod tests {
    use super::*;

    fn wired_loop() -> ControlLoop {
        ControlLoop {
            iin_cc: 2_600_000,
            ta_vol: 8_400_000,
            ta_cur: 2_600_000,
            ta_max_vol: 9_000_000,
            ta_max_cur: 3_000_000,
            ta_max_pwr: 27_000,
            ta_objpos: 1,
            prev_iin: 2_550_000,
            prev_inc: PrevIncrement::None,
            limits: AdapterLimits::WIRED,
        }
    }

    #[test]
    fn in_band_touches_only_loop_memory() {
        let mut lp = wired_loop();
        let before = lp;
        assert_eq!(CURRENT_COMP.compensate(&mut lp, 2_630_000), Outcome::InBand);
        assert_eq!(lp.ta_vol, before.ta_vol);
        assert_eq!(lp.ta_cur, before.ta_cur);
        assert_eq!(lp.prev_iin, 2_630_000);
        assert_eq!(lp.prev_inc, PrevIncrement::None);
    }

    #[test]
    fn above_band_lowers_voltage_when_current_at_target() {
        let mut lp = wired_loop();
        let out = CURRENT_COMP.compensate(&mut lp, 2_700_000);
        assert_eq!(out, Outcome::Decreased(Knob::Voltage));
        assert_eq!(lp.ta_vol, 8_380_000);
        assert_eq!(lp.ta_cur, 2_600_000);
        assert!(out.needs_message());
    }

    #[test]
    fn above_band_lowers_current_when_above_target() {
        let mut lp = wired_loop();
        lp.ta_cur = 2_800_000;
        let out = CURRENT_COMP.compensate(&mut lp, 2_700_000);
        assert_eq!(out, Outcome::Decreased(Knob::Current));
        assert_eq!(lp.ta_cur, 2_750_000);
    }

    #[test]
    fn below_band_in_current_limit_raises_current() {
        let mut lp = wired_loop();
        let out = CURRENT_COMP.compensate(&mut lp, 2_500_000);
        assert_eq!(out, Outcome::Increased(Knob::Current));
        assert_eq!(lp.ta_cur, 2_650_000);
        assert_eq!(lp.prev_inc, PrevIncrement::Current);
    }

    #[test]
    fn rising_iin_means_adapter_in_cv_so_voltage_first() {
        let mut lp = wired_loop();
        lp.prev_iin = 2_400_000;
        let out = CURRENT_COMP.compensate(&mut lp, 2_500_000);
        assert_eq!(out, Outcome::Increased(Knob::Voltage));
        assert_eq!(lp.ta_vol, 8_420_000);
    }

    #[test]
    fn stalled_current_raise_hands_over_to_voltage() {
        let mut lp = wired_loop();
        lp.prev_inc = PrevIncrement::Current;
        lp.prev_iin = 2_500_000;
        let out = CURRENT_COMP.compensate(&mut lp, 2_505_000);
        assert_eq!(out, Outcome::Increased(Knob::Voltage));
    }

    #[test]
    fn voltage_at_max_falls_back_to_current() {
        let mut lp = wired_loop();
        lp.ta_vol = lp.ta_max_vol;
        lp.prev_iin = 2_400_000;
        let out = CURRENT_COMP.compensate(&mut lp, 2_500_000);
        assert_eq!(out, Outcome::Increased(Knob::Current));
    }

    #[test]
    fn both_knobs_at_max_is_exhausted() {
        let mut lp = wired_loop();
        lp.ta_vol = lp.ta_max_vol;
        lp.ta_cur = lp.ta_max_cur;
        let out = CURRENT_COMP.compensate(&mut lp, 2_000_000);
        assert_eq!(out, Outcome::Exhausted);
        assert!(!out.needs_message());
        assert_eq!(lp.prev_iin, 2_000_000);
    }

    #[test]
    fn cp_band_is_asymmetric() {
        let mut lp = wired_loop();
        // 30 mA below target: outside the CP band, inside the CC band.
        assert!(matches!(
            CURRENT_COMP_CP.compensate(&mut lp, 2_570_000),
            Outcome::Increased(_)
        ));
        let mut lp = wired_loop();
        assert_eq!(CURRENT_COMP.compensate(&mut lp, 2_570_000), Outcome::InBand);
    }

    #[test]
    fn cp_lowers_current_until_floor() {
        let mut lp = wired_loop();
        lp.ta_cur = 1_000_000;
        let out = CURRENT_COMP_CP.compensate(&mut lp, 2_700_000);
        assert_eq!(out, Outcome::Decreased(Knob::Voltage));
    }

    #[test]
    fn voltage_only_variants_never_touch_current() {
        for comp in [VOLTAGE_COMP, RX_VOLTAGE_COMP] {
            let mut lp = wired_loop();
            lp.limits = AdapterLimits::WIRELESS;
            let before = lp.ta_cur;
            let out = comp.compensate(&mut lp, 2_000_000);
            assert_eq!(out, Outcome::Increased(Knob::Voltage));
            assert_eq!(lp.ta_vol, 8_400_000 + comp.vol_step);
            let out = comp.compensate(&mut lp, 3_000_000);
            assert_eq!(out, Outcome::Decreased(Knob::Voltage));
            assert_eq!(lp.ta_cur, before);
        }
    }

    #[test]
    fn clamp_collapses_inverted_range_onto_floor() {
        let mut lp = wired_loop();
        lp.ta_max_cur = 500_000;
        lp.clamp();
        assert_eq!(lp.ta_cur, lp.limits.min_cur);
    }

    #[test]
    fn quantize_rounds_down_then_clamps() {
        let mut lp = wired_loop();
        lp.ta_vol = 7_919_999;
        lp.ta_cur = 2_649_000;
        lp.quantize();
        assert_eq!(lp.ta_vol, 7_900_000);
        assert_eq!(lp.ta_cur, 2_600_000);
    }
}
