//! Protocol steps, offsets and adapter query ceilings.
//!
//! Voltages in µV, currents in µA.

use crate::state::{ChargeMode, TaType};

/// PPS programmable voltage resolution.
pub const PD_MSG_TA_VOL_STEP: u32 = 20_000;
/// PPS programmable current resolution.
pub const PD_MSG_TA_CUR_STEP: u32 = 50_000;
/// Wireless receiver output voltage resolution.
pub const WCRX_VOL_STEP: u32 = 40_000;

/// Lowest voltage a PPS object can be asked for.
pub const TA_MIN_VOL: u32 = 3_300_000;
/// Lowest adapter current the loops will request.
pub const TA_MIN_CUR: u32 = 1_000_000;
/// Lowest wireless receiver output voltage.
pub const WCRX_MIN_VOL: u32 = 4_000_000;

/// Half-width of the input-current band in CC compensation.
pub const IIN_CC_COMP_OFFSET: u32 = 50_000;
/// Half-width of the band when the adapter power ceiling binds.
pub const IIN_CC_COMP_OFFSET_CP: u32 = 20_000;
/// ADC noise floor when comparing two input-current samples.
pub const IIN_ADC_OFFSET: u32 = 20_000;

/// Voltage step while converging in `AdjustCc`.
pub const TA_VOL_STEP_ADJ_CC: u32 = 40_000;
/// Voltage step while ramping down in `StartCv`.
pub const TA_VOL_STEP_PRE_CV: u32 = 20_000;
/// Head-room added above `ratio * vbat` for the initial PPS request.
pub const TA_VOL_PRE_OFFSET: u32 = 300_000;
/// Head-room added above `ratio * vbat` for the initial receiver request.
pub const WCRX_VOL_PRE_OFFSET: u32 = 200_000;

/// `CheckVbat` / `CheckActive` retries before giving up.
pub const MAX_RETRY_CNT: u8 = 3;
/// Consecutive adapter message failures tolerated.
pub const PD_MSG_MAX_RETRY: u8 = 3;
/// Steps a single `AdjustTaVol`/`AdjustTaCur` walk may take.
pub const MAX_ADJUST_STEPS: u16 = 64;
/// Steps each wireless ramp-down phase may take.
pub const MAX_RAMP_STEPS: u16 = 64;

/// One capability query made while choosing the conversion ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ceiling {
    /// Ratio selected when the provider satisfies this ceiling.
    pub mode: ChargeMode,
    /// Ceiling voltage, µV.
    pub max_uv: u32,
    /// Ceiling current, µA.
    pub max_ua: u32,
}

/// PPS ceilings in priority order: 4:1 first, then the two 2:1 fallbacks.
pub const APDO_CEILINGS: [Ceiling; 3] = [
    Ceiling {
        mode: ChargeMode::Ratio4to1,
        max_uv: 20_000_000,
        max_ua: 2_000_000,
    },
    Ceiling {
        mode: ChargeMode::Ratio2to1,
        max_uv: 9_000_000,
        max_ua: 3_000_000,
    },
    Ceiling {
        mode: ChargeMode::Ratio2to1,
        max_uv: 9_000_000,
        max_ua: 2_000_000,
    },
];

/// Receiver ceilings in priority order. The ratio is decided from the
/// returned maximum against the float voltage, not from `mode`.
pub const RX_CEILINGS: [Ceiling; 2] = [
    Ceiling {
        mode: ChargeMode::Ratio4to1,
        max_uv: 20_000_000,
        max_ua: 1_000_000,
    },
    Ceiling {
        mode: ChargeMode::Ratio2to1,
        max_uv: 12_000_000,
        max_ua: 1_000_000,
    },
];

/// Quantization and floors of one adapter kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AdapterLimits {
    /// Lowest voltage that may be requested.
    pub min_vol: u32,
    /// Voltage resolution.
    pub vol_step: u32,
    /// Lowest current that may be requested.
    pub min_cur: u32,
    /// Current resolution.
    pub cur_step: u32,
}

impl AdapterLimits {
    /// Wired PPS source.
    pub const WIRED: Self = Self {
        min_vol: TA_MIN_VOL,
        vol_step: PD_MSG_TA_VOL_STEP,
        min_cur: TA_MIN_CUR,
        cur_step: PD_MSG_TA_CUR_STEP,
    };

    /// Wireless receiver (current is not commanded, only bounded).
    pub const WIRELESS: Self = Self {
        min_vol: WCRX_MIN_VOL,
        vol_step: WCRX_VOL_STEP,
        min_cur: TA_MIN_CUR,
        cur_step: PD_MSG_TA_CUR_STEP,
    };

    /// Limits for an adapter kind.
    pub const fn for_ta(ta_type: TaType) -> Self {
        match ta_type {
            TaType::Wireless => Self::WIRELESS,
            TaType::WiredPd | TaType::Unknown => Self::WIRED,
        }
    }
}

/// Round `value` down to a multiple of `step` (no-op for a zero step).
pub const fn round_down(value: u32, step: u32) -> u32 {
    match value.checked_rem(step) {
        Some(rem) => value.saturating_sub(rem),
        None => value,
    }
}
