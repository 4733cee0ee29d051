//! Charge-pump IC abstraction (register and ADC access).
//!
//! The direct-charger core never touches registers. Everything it needs from
//! the switched-capacitor IC is expressed here: scaled ADC channels, a handful
//! of discrete operations and the status bits that report which hardware
//! regulation loop is currently limiting the output.
//!
//! # Interrupt discipline
//!
//! Implementations that service a hardware interrupt line must follow the
//! "mask, do the minimum, unmask on completion" rule: the IRQ side only masks
//! further notifications and posts an event to the charger runner's request
//! channel; the status read that clears the source happens from
//! [`ChargerIc::read_status`] on the runner, after which the implementation
//! unmasks again. No trait method is ever called from interrupt context.

/// Maximum number of `(register, value)` pairs captured by a diagnostic dump.
pub const REGISTER_DUMP_CAPACITY: usize = 48;

/// Diagnostic register snapshot captured at the point of a fatal failure.
pub type RegisterDump = heapless::Vec<(u8, u8), REGISTER_DUMP_CAPACITY>;

/// ADC channels exposed by the charge-pump IC.
///
/// All readings are already scaled: voltages in µV, currents in µA,
/// temperature in milli-degrees Celsius.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AdcChannel {
    /// Input (adapter side) current, µA.
    InputCurrent,
    /// Input (adapter side) voltage, µV.
    InputVoltage,
    /// Charge-pump output voltage, µV.
    OutputVoltage,
    /// Battery voltage, µV.
    BatteryVoltage,
    /// Battery current, µA.
    BatteryCurrent,
    /// Die temperature, m°C.
    DieTemperature,
}

impl AdcChannel {
    /// Short channel name used in log lines.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InputCurrent => "IIN",
            Self::InputVoltage => "VIN",
            Self::OutputVoltage => "VOUT",
            Self::BatteryVoltage => "VBAT",
            Self::BatteryCurrent => "IBAT",
            Self::DieTemperature => "TDIE",
        }
    }
}

impl core::fmt::Display for AdcChannel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

bitflags::bitflags! {
    /// Decoded status bits of the charge-pump IC.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct StatusFlags: u16 {
        /// Charge pump is switching (active).
        const ACTIVE = 1 << 0;
        /// Input current regulation loop is limiting.
        const IIN_LOOP = 1 << 1;
        /// Battery current regulation loop is limiting.
        const IBAT_LOOP = 1 << 2;
        /// Float voltage regulation loop is limiting.
        const VFLOAT_LOOP = 1 << 3;
        /// Input under-voltage lockout.
        const VIN_UVLO = 1 << 4;
        /// Reverse/receiver current protection tripped (benign while negotiating).
        const RCP = 1 << 5;
        /// Input over-voltage protection.
        const VIN_OVP = 1 << 6;
        /// Output over-voltage protection.
        const VOUT_OVP = 1 << 7;
        /// Thermal shutdown.
        const TSD = 1 << 8;
        /// Battery over-current protection.
        const IBAT_OCP = 1 << 9;
    }
}

impl StatusFlags {
    /// Protection bits that make starting a session unsafe.
    pub const FAULTS: Self = Self::VIN_OVP
        .union(Self::VOUT_OVP)
        .union(Self::TSD)
        .union(Self::IBAT_OCP);

    /// Returns any fault bits that are set.
    pub fn faults(self) -> Self {
        self.intersection(Self::FAULTS)
    }
}

/// Bus-level failure talking to the charge-pump IC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusError {
    /// Device did not acknowledge.
    Nack,
    /// Transfer did not complete in time.
    Timeout,
    /// A polled ready bit never asserted.
    NotReady,
    /// Any other transport failure.
    Other,
}

#[cfg(feature = "std")]
impl std::error::Error for BusError {}

impl core::fmt::Display for BusError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Nack => write!(f, "charger IC did not acknowledge"),
            Self::Timeout => write!(f, "charger IC transfer timeout"),
            Self::NotReady => write!(f, "charger IC not ready"),
            Self::Other => write!(f, "charger IC bus error"),
        }
    }
}

/// Register and ADC access to the charge-pump IC.
///
/// Implementations may block briefly while polling a hardware-ready bit; the
/// charger core assumes every call returns in bounded time.
pub trait ChargerIc {
    /// Read a scaled ADC channel.
    fn read_adc(&mut self, channel: AdcChannel) -> Result<u32, BusError>;

    /// Program the input current limit, µA.
    fn set_input_current_limit(&mut self, ua: u32) -> Result<(), BusError>;

    /// Program the float (regulation) voltage, µV.
    fn set_float_voltage(&mut self, uv: u32) -> Result<(), BusError>;

    /// Enable or disable the charge pump.
    fn enable_charging(&mut self, enable: bool) -> Result<(), BusError>;

    /// Read and decode the status registers.
    fn read_status(&mut self) -> Result<StatusFlags, BusError>;

    /// Snapshot registers for post-mortem logging.
    fn dump_registers(&mut self) -> Result<RegisterDump, BusError> {
        Ok(RegisterDump::new())
    }

    /// Return the IC to its power-on configuration.
    fn reinit(&mut self) -> Result<(), BusError>;
}
