//! Hardware Abstraction Layer (HAL) for the direct-charger core
//!
//! This crate provides trait-based abstractions for every collaborator the
//! charging session talks to, enabling development and testing without
//! physical hardware.
//!
//! # Architecture Layers
//!
//! ```text
//! Charging session (direct-charger crate)
//!         ↓
//! Platform HAL (this crate - trait abstractions)
//!         ↓
//! Hardware Layer (charge-pump IC over I2C, PD controller, wireless RX)
//! ```
//!
//! # Abstractions
//!
//! - [`ChargerIc`] - Charge-pump register and ADC access
//! - [`AdapterProvider`] - Wired PPS / wireless receiver capability provider
//! - [`Scheduler`] - Single-slot deferred work
//!
//! # Features
//!
//! - `std`: Enable standard library support and the [`mocks`] module
//! - `defmt`: Enable defmt logging derives
//!
//! # Example
//!
//! ```no_run
//! use platform::{AdcChannel, ChargerIc};
//!
//! fn battery_uv<C: ChargerIc>(ic: &mut C) -> Option<u32> {
//!     ic.read_adc(AdcChannel::BatteryVoltage).ok()
//! }
//! ```

// ── Lint policy ─────────────────────────────────────────────────────────────
#![deny(clippy::unwrap_used)] // no .unwrap() in production code
#![deny(clippy::expect_used)] // no .expect() in production code
#![deny(clippy::panic)] // no panic!() in production code
#![deny(clippy::unreachable)] // no unreachable!() that isn't documented
#![deny(unused_must_use)]
// all Results must be handled
// ────────────────────────────────────────────────────────────────────────────
#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(unsafe_op_in_unsafe_fn)] // unsafe fn body is not implicitly unsafe block
#![warn(clippy::print_stdout)] // prefer tracing/defmt over println! in lib code
// Pedantic lints suppressed for this hardware HAL crate:
#![allow(clippy::doc_markdown)] // register names in doc comments
#![allow(clippy::must_use_candidate)] // hardware accessors, callers decide
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod adapter;
pub mod charger_ic;
pub mod mocks;
pub mod scheduler;

pub use adapter::{AdapterCapability, AdapterError, AdapterProvider};
pub use charger_ic::{AdcChannel, BusError, ChargerIc, RegisterDump, StatusFlags};
pub use scheduler::{DeadlineSlot, Scheduler};
