//! Session error type.

use platform::{AdapterError, BusError};
use thiserror_no_std::Error;

use crate::state::ChargingState;

/// Why a charger operation failed.
///
/// Errors returned from a timer tick have already stopped the session;
/// errors returned from control-surface calls leave it untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChargerError {
    /// Battery never reached the minimum voltage, or targets never arrived.
    #[error("timed out waiting for battery voltage or charge targets")]
    Timeout,
    /// Bad request index or a target outside what the session can use.
    #[error("invalid input")]
    InvalidInput,
    /// The requested adapter slot is empty.
    #[error("adapter not present")]
    NotFound,
    /// No adapter object satisfies any supported conversion ratio.
    #[error("adapter cannot supply a supported conversion ratio")]
    NotSupported,
    /// The charge pump stopped switching and is not in reverse-current protection.
    #[error("charge pump not active")]
    NotActive,
    /// A start request arrived while another source is charging.
    #[error("charging already active on another source")]
    Busy,
    /// A timer fired in a state with no handler for it.
    #[error("timer {timer} not valid in state {state}")]
    InvalidState {
        /// Active state when the timer fired.
        state: ChargingState,
        /// Tag of the timer that fired.
        timer: crate::state::TimerId,
    },
    /// The transition table rejected a state change.
    #[error("invalid transition {from} -> {to}")]
    InvalidTransition {
        /// State before the change.
        from: ChargingState,
        /// Requested state.
        to: ChargingState,
    },
    /// A fault bit was latched in the IC status.
    #[error("charger fault, status {status:#x}")]
    Fault {
        /// Raw fault bits.
        status: u16,
    },
    /// Register or ADC access failed.
    #[error("bus error: {0}")]
    Bus(BusError),
    /// The adapter rejected a request or went away.
    #[error("adapter error: {0}")]
    Adapter(AdapterError),
}

impl From<BusError> for ChargerError {
    fn from(err: BusError) -> Self {
        Self::Bus(err)
    }
}

impl From<AdapterError> for ChargerError {
    fn from(err: AdapterError) -> Self {
        Self::Adapter(err)
    }
}

impl ChargerError {
    /// Whether the session retries the same tick instead of stopping.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Bus(_))
    }
}
