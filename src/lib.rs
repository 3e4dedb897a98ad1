#![cfg_attr(not(any(test, feature = "std")), no_std)]

//! Dual-clock timer synchronization and scheduling for low-power radio
//! drivers.
//!
//! Radio SoCs typically offer two clock domains:
//!
//! - an always-on, low-power RTC that ticks at 32768 Hz and is the only
//!   source of absolute time, and
//! - a high-precision TIMER that ticks at 1 MHz or faster but only while the
//!   radio engine is active and is reset on every activation.
//!
//! This crate fuses both into a single [`TimerDomain`]:
//!
//! - [`LpTimer`] extends the narrow RTC counter into a 64-bit microsecond
//!   clock and schedules one-shot alarms.
//! - [`HpTimer`] wraps the high-precision counter and its capture channels.
//! - [`TimerCoord`] periodically latches both counters at the same physical
//!   instant, estimates the drift between them and converts high-precision
//!   event captures into absolute timestamps.
//!
//! Hardware access goes through the [`LowPowerCounter`],
//! [`HighPrecisionCounter`], [`EventFabric`] and [`Oscillator`] traits. An
//! nRF52840 backend is available with the `nrf52840` feature, a simulated
//! clock tree with the `sim` feature.
//!
//! [`TimerDomain`]: driver::timer::domain::TimerDomain
//! [`LpTimer`]: driver::timer::lp_timer::LpTimer
//! [`HpTimer`]: driver::timer::hp_timer::HpTimer
//! [`TimerCoord`]: driver::timer::coord::TimerCoord
//! [`LowPowerCounter`]: driver::timer::LowPowerCounter
//! [`HighPrecisionCounter`]: driver::timer::HighPrecisionCounter
//! [`EventFabric`]: driver::timer::EventFabric
//! [`Oscillator`]: driver::timer::Oscillator

// This mod MUST go first, so that the others see its macros.
#[macro_use]
pub(crate) mod fmt;

pub mod driver;
pub mod util;

pub use driver::timer::{
    CoordConfig, EventFabric, EventHandle, FabricConfig, HighPrecisionCounter, HpTimerConfig,
    LowPowerCounter, LpTimerConfig, Oscillator, TaskHandle, TimerConfig, TimerHooks, UsDuration,
    UsInstant,
    coord::{SyncPoint, TimerCoord},
    domain::TimerDomain,
    hp_timer::HpTimer,
    lp_timer::LpTimer,
};
