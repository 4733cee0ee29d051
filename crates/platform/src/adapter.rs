//! Programmable adapter capability providers.
//!
//! Two providers feed a direct charger: a wired USB-PD source advertising
//! programmable power supply (PPS) APDOs, and a wireless power receiver whose
//! output voltage can be commanded. Both are reached through
//! [`AdapterProvider`]; the charger core never speaks the protocol itself.

/// Capability ceiling reported by a provider for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AdapterCapability {
    /// Maximum output voltage, µV (already clipped to the requested ceiling).
    pub max_uv: u32,
    /// Maximum output current, µA (already clipped to the requested ceiling).
    pub max_ua: u32,
    /// Maximum output power, mW.
    pub max_mw: u32,
    /// Selected power object position (1-based for PD, 0 for wireless).
    pub objpos: u8,
}

impl AdapterCapability {
    /// Power of the voltage/current pair in mW, saturating.
    pub fn vi_power_mw(uv: u32, ua: u32) -> u32 {
        let mw = u64::from(uv).saturating_mul(u64::from(ua)) / 1_000_000_000;
        u32::try_from(mw).unwrap_or(u32::MAX)
    }
}

/// Adapter-side failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AdapterError {
    /// No power object can satisfy the requested ceiling.
    NotSupported,
    /// Adapter is not attached or not negotiated.
    Offline,
    /// Request was rejected or the message was not acknowledged.
    Rejected,
    /// Transport failure talking to the PD controller / receiver.
    Transport,
}

#[cfg(feature = "std")]
impl std::error::Error for AdapterError {}

impl core::fmt::Display for AdapterError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotSupported => write!(f, "adapter cannot satisfy the requested ceiling"),
            Self::Offline => write!(f, "adapter offline"),
            Self::Rejected => write!(f, "adapter rejected the request"),
            Self::Transport => write!(f, "adapter transport error"),
        }
    }
}

/// A programmable power source the charger negotiates with.
pub trait AdapterProvider {
    /// Query the capability for a request bounded by `ceiling_uv`/`ceiling_ua`.
    ///
    /// A provider satisfies the request when one of its power objects reaches
    /// both the ceiling voltage and the ceiling current; the returned maxima
    /// are clipped to the ceiling. Otherwise it returns
    /// [`AdapterError::NotSupported`].
    fn max_power(&mut self, ceiling_uv: u32, ceiling_ua: u32)
        -> Result<AdapterCapability, AdapterError>;

    /// Request an output voltage/current from power object `objpos`.
    ///
    /// Wireless receivers ignore `ua` and `objpos`.
    fn request(&mut self, uv: u32, ua: u32, objpos: u8) -> Result<(), AdapterError>;

    /// Whether the source is attached and usable.
    fn is_online(&mut self) -> bool;

    /// Hand the source back to its default fixed-voltage mode.
    fn revert_to_default(&mut self) -> Result<(), AdapterError>;

    /// Present output current, µA (wireless receivers only).
    fn output_current(&mut self) -> Option<u32> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vi_power_in_milliwatts() {
        assert_eq!(AdapterCapability::vi_power_mw(9_000_000, 3_000_000), 27_000);
        assert_eq!(AdapterCapability::vi_power_mw(5_000_000, 500_000), 2_500);
    }

    #[test]
    fn vi_power_saturates() {
        assert_eq!(AdapterCapability::vi_power_mw(u32::MAX, u32::MAX), u32::MAX);
        assert_eq!(AdapterCapability::vi_power_mw(0, u32::MAX), 0);
    }

    #[test]
    fn adapter_error_display_is_not_empty() {
        for e in [
            AdapterError::NotSupported,
            AdapterError::Offline,
            AdapterError::Rejected,
            AdapterError::Transport,
        ] {
            assert!(!format!("{e}").is_empty());
        }
    }
}
