//! Charging session for a switched-capacitor direct charger (LN8411 class).
//!
//! The charge pump divides the adapter voltage by a fixed ratio (2:1 or
//! 4:1), so the battery current is regulated by negotiating the adapter's
//! programmable voltage and current rather than by an inductor loop. This
//! crate owns that negotiation: a tick-driven state machine that starts the
//! charge pump, converges on the input-current target, regulates constant
//! current and constant voltage, and unwinds cleanly on any failure.
//!
//! # Layout
//!
//! ```text
//! ChargerRunner (async: deadline / requests / keep-alive)
//!         ↓
//! ChargerSession (state machine, one tick per handle_timer)
//!         ↓
//! platform traits (ChargerIc, AdapterProvider, Scheduler)
//! ```
//!
//! # Features
//!
//! - `std`: host builds, enables the platform mocks
//! - `defmt`: log through defmt and derive `defmt::Format` on public types
//! - `tracing`: log through tracing (host builds)
//!
//! # Example
//!
//! ```ignore
//! use direct_charger::{ChargerConfig, ChargerSession};
//!
//! let mut session = ChargerSession::new(
//!     ChargerConfig::ln8411_reference(),
//!     ic, Some(pps), None::<Rx>, delay, scheduler,
//! );
//! session.set_target(5_200_000, 4_400_000)?;
//! session.set_charging_enabled(1)?;
//! // ...each time the scheduler fires:
//! session.handle_timer()?;
//! ```

// ── Lint policy ─────────────────────────────────────────────────────────────
#![deny(clippy::unwrap_used)] // no .unwrap() in production code
#![deny(clippy::expect_used)] // no .expect() in production code
#![deny(clippy::panic)] // no panic!() in production code
#![deny(clippy::unreachable)]
#![deny(unused_must_use)]
// ────────────────────────────────────────────────────────────────────────────
#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::print_stdout)]
#![allow(clippy::doc_markdown)] // register and state names in doc comments
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

mod log;

pub mod compensation;
pub mod config;
pub mod error;
pub mod limits;
mod negotiation;
pub mod runner;
pub mod session;
pub mod state;
mod states;
pub mod stats;

pub use compensation::{Compensation, ControlLoop, Knob, Outcome};
pub use config::{ChargerConfig, ConfigError, Timings};
pub use error::ChargerError;
pub use runner::{ChargerRequest, ChargerRunner, RequestChannel, SharedSession};
pub use session::ChargerSession;
pub use state::{
    ChargeMode, ChargeStatus, ChargeType, ChargingState, LoopStatus, PowerSource, TaControl,
    TaType, TimerId,
};
pub use stats::ChargerStats;
