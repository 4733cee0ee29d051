//! Session enums: charging states, timer tags and adapter selection.
//!
//! `ChargingState` carries the transition table. Every state change in the
//! session goes through [`ChargingState::can_transition_to`].

/// Number of [`ChargingState`] variants (size of per-state statistic arrays).
pub const STATE_COUNT: usize = 11;

/// Authoritative charging state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ChargingState {
    /// Idle.
    NoCharging = 0,
    /// Waiting for a battery above minimum voltage and valid targets.
    CheckVbat,
    /// Choosing conversion ratio and initial adapter setpoint.
    PresetDc,
    /// Charge pump enabled, waiting for it to report switching.
    CheckActive,
    /// Converging adapter voltage/current toward the target input current.
    AdjustCc,
    /// Steady-state constant-current regulation.
    CcMode,
    /// Ramp-down preparing constant-voltage regulation.
    StartCv,
    /// Steady-state constant-voltage regulation.
    CvMode,
    /// End of charge reached; still monitored at a slow cadence.
    ChargingDone,
    /// Voltage walk toward a new input-current target.
    AdjustTaVol,
    /// Current walk toward a new input-current target.
    AdjustTaCur,
}

impl ChargingState {
    /// All states in index order.
    pub const ALL: [Self; STATE_COUNT] = [
        Self::NoCharging,
        Self::CheckVbat,
        Self::PresetDc,
        Self::CheckActive,
        Self::AdjustCc,
        Self::CcMode,
        Self::StartCv,
        Self::CvMode,
        Self::ChargingDone,
        Self::AdjustTaVol,
        Self::AdjustTaCur,
    ];

    /// Dense index, `0..STATE_COUNT`.
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Short name used in log lines and telemetry.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NoCharging => "NO_CHARGING",
            Self::CheckVbat => "CHECK_VBAT",
            Self::PresetDc => "PRESET_DC",
            Self::CheckActive => "CHECK_ACTIVE",
            Self::AdjustCc => "ADJUST_CC",
            Self::CcMode => "CC_MODE",
            Self::StartCv => "START_CV",
            Self::CvMode => "CV_MODE",
            Self::ChargingDone => "CHARGING_DONE",
            Self::AdjustTaVol => "ADJUST_TAVOL",
            Self::AdjustTaCur => "ADJUST_TACUR",
        }
    }

    /// Whether the transition table allows moving from `self` to `next`.
    ///
    /// Staying put and dropping to `NoCharging` are always allowed.
    pub fn can_transition_to(self, next: Self) -> bool {
        use ChargingState as S;

        if next == self || next == S::NoCharging {
            return true;
        }
        match self {
            S::NoCharging => next == S::CheckVbat,
            S::CheckVbat => next == S::PresetDc,
            S::PresetDc => next == S::CheckActive,
            S::CheckActive => next == S::AdjustCc,
            S::AdjustCc => matches!(next, S::CcMode | S::StartCv | S::CheckActive),
            S::CcMode => matches!(
                next,
                S::StartCv | S::AdjustTaVol | S::AdjustTaCur | S::PresetDc | S::CheckActive
            ),
            S::StartCv => matches!(next, S::CvMode | S::CheckActive),
            S::CvMode => matches!(
                next,
                S::ChargingDone | S::AdjustTaVol | S::AdjustTaCur | S::PresetDc | S::CheckActive
            ),
            S::ChargingDone => matches!(
                next,
                S::AdjustTaVol | S::AdjustTaCur | S::PresetDc | S::CheckActive
            ),
            S::AdjustTaVol | S::AdjustTaCur => matches!(
                next,
                S::CcMode | S::CvMode | S::ChargingDone | S::CheckActive
            ),
        }
    }

    /// Tick that follows a successful adapter message sent in this state.
    pub const fn after_message(self) -> Option<TimerId> {
        match self {
            Self::PresetDc => Some(TimerId::PresetConfig),
            Self::AdjustCc => Some(TimerId::AdjustCcMode),
            Self::CcMode => Some(TimerId::CheckCcMode),
            Self::StartCv => Some(TimerId::EnterCvMode),
            Self::CvMode | Self::ChargingDone => Some(TimerId::CheckCvMode),
            Self::AdjustTaVol => Some(TimerId::AdjustTaVol),
            Self::AdjustTaCur => Some(TimerId::AdjustTaCur),
            Self::NoCharging | Self::CheckVbat | Self::CheckActive => None,
        }
    }

    /// Periodic check tag of a steady state (return target of sub-adjustments).
    pub const fn check_timer(self) -> TimerId {
        match self {
            Self::CvMode | Self::ChargingDone => TimerId::CheckCvMode,
            _ => TimerId::CheckCcMode,
        }
    }
}

impl core::fmt::Display for ChargingState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to run when the scheduled work fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerId {
    /// Nothing scheduled.
    None,
    /// Battery voltage / target check.
    VbatMinCheck,
    /// Compute the initial operating point.
    PresetDc,
    /// Program the IC and enable the charge pump.
    PresetConfig,
    /// Confirm the charge pump is switching.
    CheckActive,
    /// One step of the CC convergence loop.
    AdjustCcMode,
    /// Enter steady-state CC.
    EnterCcMode,
    /// Periodic CC check.
    CheckCcMode,
    /// Pre-CV ramp step.
    EnterCvMode,
    /// Periodic CV check.
    CheckCvMode,
    /// Send the pending adapter request.
    PdMsgSend,
    /// One step of the voltage walk.
    AdjustTaVol,
    /// One step of the current walk.
    AdjustTaCur,
}

impl TimerId {
    /// Short name used in log lines.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::VbatMinCheck => "VBATMIN_CHECK",
            Self::PresetDc => "PRESET_DC",
            Self::PresetConfig => "PRESET_CONFIG",
            Self::CheckActive => "CHECK_ACTIVE",
            Self::AdjustCcMode => "ADJUST_CCMODE",
            Self::EnterCcMode => "ENTER_CCMODE",
            Self::CheckCcMode => "CHECK_CCMODE",
            Self::EnterCvMode => "ENTER_CVMODE",
            Self::CheckCvMode => "CHECK_CVMODE",
            Self::PdMsgSend => "PDMSG_SEND",
            Self::AdjustTaVol => "ADJUST_TAVOL",
            Self::AdjustTaCur => "ADJUST_TACUR",
        }
    }
}

impl core::fmt::Display for TimerId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Adapter kind bound for the current charging attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TaType {
    /// Not bound.
    Unknown,
    /// Wired USB-PD PPS source.
    WiredPd,
    /// Wireless power receiver.
    Wireless,
}

impl TaType {
    /// Short name used in log lines.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::WiredPd => "pps",
            Self::Wireless => "wlc",
        }
    }
}

impl core::fmt::Display for TaType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which adapter ceiling is binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TaControl {
    /// Adapter current ceiling binds; the charger regulates current.
    ConstantCurrent,
    /// Adapter power ceiling binds; current follows `max_power / voltage`.
    ConstantPower,
}

/// Charge-pump conversion ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChargeMode {
    /// Not selected.
    None,
    /// Adapter voltage is twice the battery voltage.
    Ratio2to1,
    /// Adapter voltage is four times the battery voltage.
    Ratio4to1,
    /// Reverse (OTG) ratio: output is twice the input. Never chosen while charging.
    Ratio1to2,
}

impl ChargeMode {
    /// Battery-side voltage scaled to the adapter side.
    pub const fn to_adapter_side(self, uv: u32) -> u32 {
        match self {
            Self::None => uv,
            Self::Ratio2to1 => uv.saturating_mul(2),
            Self::Ratio4to1 => uv.saturating_mul(4),
            Self::Ratio1to2 => uv / 2,
        }
    }

    /// Battery-side current scaled to the input side.
    pub const fn to_input_side(self, ua: u32) -> u32 {
        match self {
            Self::None => ua,
            Self::Ratio2to1 => ua / 2,
            Self::Ratio4to1 => ua / 4,
            Self::Ratio1to2 => ua.saturating_mul(2),
        }
    }

    /// Short name used in log lines.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Ratio2to1 => "2:1",
            Self::Ratio4to1 => "4:1",
            Self::Ratio1to2 => "1:2",
        }
    }
}

impl core::fmt::Display for ChargeMode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which adapter knob was last turned up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PrevIncrement {
    /// Nothing increased since the last decrease or in-band tick.
    None,
    /// Adapter voltage was raised.
    Voltage,
    /// Adapter current was raised.
    Current,
}

/// Requested power source (`pps_index` of the start request).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerSource {
    /// Wired USB-PD PPS.
    WiredPps,
    /// Wireless receiver.
    Wireless,
}

impl PowerSource {
    /// Index that stops charging.
    pub const INDEX_DISABLED: u8 = 0;
    /// Index selecting the wired PPS source.
    pub const INDEX_PPS: u8 = 1;
    /// Index selecting the wireless receiver.
    pub const INDEX_WLC: u8 = 2;

    /// Map a request index to a source; `None` for "disabled" or unknown.
    pub const fn from_index(index: u8) -> Option<Self> {
        match index {
            Self::INDEX_PPS => Some(Self::WiredPps),
            Self::INDEX_WLC => Some(Self::Wireless),
            _ => None,
        }
    }

    /// Adapter kind this source binds to.
    pub const fn ta_type(self) -> TaType {
        match self {
            Self::WiredPps => TaType::WiredPd,
            Self::Wireless => TaType::Wireless,
        }
    }
}

/// Power-supply style status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChargeStatus {
    /// Source present, not charging.
    NotCharging,
    /// Charge pump delivering energy.
    Charging,
    /// No source present.
    Discharging,
}

/// Power-supply style charge type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChargeType {
    /// Not charging.
    None,
    /// Constant-current phase.
    Fast,
    /// Constant-voltage taper run by this (external to the main charger) IC.
    TaperExternal,
}

/// Which hardware regulation loop is limiting, plus end-of-charge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LoopStatus {
    /// No loop limiting: the adapter setpoint decides the current.
    Inactive,
    /// Input current loop active.
    IinLoop,
    /// Battery current loop active.
    IbatLoop,
    /// Float voltage loop active.
    VfloatLoop,
    /// Input under-voltage lockout.
    VinUvlo,
    /// End of charge (CV checks only).
    Done,
}

impl LoopStatus {
    /// Decode loop status bits; UVLO wins, then float voltage, input, battery.
    pub fn from_flags(flags: platform::StatusFlags) -> Self {
        use platform::StatusFlags as F;

        if flags.contains(F::VIN_UVLO) {
            Self::VinUvlo
        } else if flags.contains(F::VFLOAT_LOOP) {
            Self::VfloatLoop
        } else if flags.contains(F::IIN_LOOP) {
            Self::IinLoop
        } else if flags.contains(F::IBAT_LOOP) {
            Self::IbatLoop
        } else {
            Self::Inactive
        }
    }

    /// Short name used in log lines.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Inactive => "inactive",
            Self::IinLoop => "iin_loop",
            Self::IbatLoop => "ibat_loop",
            Self::VfloatLoop => "vfloat_loop",
            Self::VinUvlo => "vin_uvlo",
            Self::Done => "done",
        }
    }
}

impl core::fmt::Display for LoopStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
