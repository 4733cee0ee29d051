//! Board-level charger configuration.
//!
//! # Units
//!
//! | field suffix | unit |
//! |--------------|------|
//! | `iin_*`, `*_floor`, `*_step` (current) | µA |
//! | `fv_*`, `*_vbat_*`, `*_vol_step` | µV |
//! | `*_ms` | milliseconds |
//!
//! Protocol constants that do not vary per board live in [`crate::limits`].

use embassy_time::Duration;

/// Tick periods of the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    /// Re-check period while waiting for battery voltage / targets.
    pub vbatmin_check: Duration,
    /// Wait after enabling the charge pump before checking it is active.
    pub enable_delay: Duration,
    /// Settle time after a wired PPS request.
    pub pdmsg_wait: Duration,
    /// Settle time after a wireless receiver request.
    pub pdmsg_wlc_wait: Duration,
    /// Back-off after a failed adapter request (and after a bus glitch).
    pub pdmsg_retry: Duration,
    /// Periodic check in constant-current mode.
    pub ccmode_check: Duration,
    /// Periodic check in constant-voltage mode.
    pub cvmode_check: Duration,
    /// Periodic check once charging is done.
    pub chgdone_check: Duration,
    /// PPS keep-alive re-request period.
    pub pps_keepalive: Duration,
}

impl Timings {
    /// LN8411 reference cadence.
    pub const fn reference() -> Self {
        Self {
            vbatmin_check: Duration::from_millis(1_000),
            enable_delay: Duration::from_millis(150),
            pdmsg_wait: Duration::from_millis(200),
            pdmsg_wlc_wait: Duration::from_millis(500),
            pdmsg_retry: Duration::from_millis(1_000),
            ccmode_check: Duration::from_millis(10_000),
            cvmode_check: Duration::from_millis(10_000),
            chgdone_check: Duration::from_millis(30_000),
            pps_keepalive: Duration::from_millis(10_000),
        }
    }
}

impl Default for Timings {
    fn default() -> Self {
        Self::reference()
    }
}

/// Charger configuration for one board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChargerConfig {
    /// Highest input current the charge pump may be programmed with.
    pub iin_cfg: u32,
    /// Highest float voltage; also the value restored on stop.
    pub fv_max: u32,
    /// Input current below which CV charging counts as done.
    pub iin_topoff: u32,
    /// Margin added on top of `iin_cc` when programming the input limit.
    pub iin_cfg_margin: u32,
    /// Battery voltage required before direct charging may start.
    pub dc_vbat_min: u32,
    /// How far below the float voltage the battery may sit and still be "done".
    pub eoc_vbat_tolerance: u32,
    /// Pause after each wireless ramp-down step.
    pub wlc_ramp_down_delay_ms: u32,
    /// Input-current decrement per wireless ramp-down step.
    pub wlc_ramp_iin_step: u32,
    /// Input-current floor of the wireless ramp-down.
    pub wlc_ramp_iin_floor: u32,
    /// Receiver voltage decrement per wireless ramp-down step.
    pub wlc_ramp_vol_step: u32,
    /// Tick periods.
    pub timings: Timings,
}

impl ChargerConfig {
    /// LN8411 reference board configuration.
    pub const fn ln8411_reference() -> Self {
        Self {
            iin_cfg: 3_000_000,
            fv_max: 4_450_000,
            iin_topoff: 500_000,
            iin_cfg_margin: 100_000,
            dc_vbat_min: 3_400_000,
            eoc_vbat_tolerance: 20_000,
            wlc_ramp_down_delay_ms: 100,
            wlc_ramp_iin_step: 100_000,
            wlc_ramp_iin_floor: 500_000,
            wlc_ramp_vol_step: 100_000,
            timings: Timings::reference(),
        }
    }

    /// Reject configurations the state machine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.iin_cfg == 0 {
            return Err(ConfigError::ZeroInputCurrent);
        }
        if self.dc_vbat_min >= self.fv_max {
            return Err(ConfigError::VbatMinAboveFloat);
        }
        if self.wlc_ramp_iin_step == 0 || self.wlc_ramp_vol_step == 0 {
            return Err(ConfigError::ZeroRampStep);
        }
        if self.wlc_ramp_iin_floor >= self.iin_cfg {
            return Err(ConfigError::RampFloorAboveLimit);
        }
        let t = &self.timings;
        if [
            t.ccmode_check,
            t.cvmode_check,
            t.chgdone_check,
            t.pps_keepalive,
        ]
        .iter()
        .any(|d| d.as_ticks() == 0)
        {
            return Err(ConfigError::ZeroPeriod);
        }
        Ok(())
    }
}

impl Default for ChargerConfig {
    fn default() -> Self {
        Self::ln8411_reference()
    }
}

/// Configuration rejected by [`ChargerConfig::validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// `iin_cfg` is zero.
    ZeroInputCurrent,
    /// `dc_vbat_min` is not below `fv_max`.
    VbatMinAboveFloat,
    /// A wireless ramp-down step is zero.
    ZeroRampStep,
    /// The ramp-down floor is not below `iin_cfg`.
    RampFloorAboveLimit,
    /// A periodic check would spin.
    ZeroPeriod,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::ZeroInputCurrent => write!(f, "input current limit must be non-zero"),
            Self::VbatMinAboveFloat => write!(f, "minimum battery voltage must be below float voltage"),
            Self::ZeroRampStep => write!(f, "wireless ramp-down steps must be non-zero"),
            Self::RampFloorAboveLimit => write!(f, "ramp-down floor must be below the input current limit"),
            Self::ZeroPeriod => write!(f, "periodic check intervals must be non-zero"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ConfigError {}
