//! Logging macros.
//!
//! Hardware builds log through `defmt` (feature `defmt`), host builds through
//! `tracing` (feature `tracing`). With neither enabled the arguments are still
//! type-checked but nothing is emitted. Format strings must stick to `{}` and
//! `{:#x}` so both backends accept them.

macro_rules! dc_log {
    ($level:ident, $($arg:tt)+) => {{
        #[cfg(feature = "defmt")]
        defmt::$level!($($arg)+);
        #[cfg(feature = "tracing")]
        tracing::$level!($($arg)+);
        #[cfg(not(any(feature = "defmt", feature = "tracing")))]
        {
            let _ = core::format_args!($($arg)+);
        }
    }};
}

macro_rules! dc_debug {
    ($($arg:tt)+) => { $crate::log::dc_log!(debug, $($arg)+) };
}

macro_rules! dc_info {
    ($($arg:tt)+) => { $crate::log::dc_log!(info, $($arg)+) };
}

macro_rules! dc_warn {
    ($($arg:tt)+) => { $crate::log::dc_log!(warn, $($arg)+) };
}

macro_rules! dc_error {
    ($($arg:tt)+) => { $crate::log::dc_log!(error, $($arg)+) };
}

pub(crate) use {dc_debug, dc_error, dc_info, dc_log, dc_warn};
