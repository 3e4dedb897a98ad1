//! This module exposes a generic hybrid timer that fuses an always-on,
//! low-power timer with a high-precision timer that only runs while the radio
//! is active. The module also contains the hardware abstraction the hybrid
//! timer is built on and supporting time structures.
//!
//! Hybrid timer:
//!
//! - [`LpTimer`](lp_timer::LpTimer) extends the narrow low-power counter into
//!   an overflow-protected 64-bit microsecond clock and owns two one-shot
//!   alarms: the user alarm (CSMA backoff, ACK timeouts, delayed TX/RX) and
//!   the sync alarm that latches both clock domains at the same instant.
//!
//! - [`HpTimer`](hp_timer::HpTimer) wraps the high-precision counter. It has
//!   no notion of absolute time but captures the counter on hardware triggers.
//!
//! - [`TimerCoord`](coord::TimerCoord) correlates both timers at regular sync
//!   points, estimates their relative drift and turns high-precision captures
//!   into absolute timestamps.
//!
//! - [`TimerDomain`](domain::TimerDomain) owns all of the above plus the
//!   hardware and dispatches interrupts.
//!
//! Hardware abstraction:
//!
//! - [`LowPowerCounter`] represents an RTC-class counter with compare channels.
//! - [`HighPrecisionCounter`] represents a TIMER-class counter with capture
//!   channels.
//! - [`EventFabric`] represents an event bus that routes peripheral events to
//!   peripheral tasks without CPU intervention (PPI, DPPI, ...).
//! - [`Oscillator`] represents the clock source a counter depends on.
//!
//! Time structures:
//!
//! - [`UsInstant`] is a microsecond-precision point in time relative to the
//!   start of the low-power timer.
//! - [`UsDuration`] is a microsecond-precision duration.

use fugit::MicrosDurationU64;

pub mod coord;
pub mod domain;
pub mod hp_timer;
pub mod lp_timer;
pub mod overflow;

pub mod export {
    pub use fugit::{Duration, ExtU64, Instant};
}

use export::*;

pub type UsInstant = Instant<u64, 1, 1_000_000>;
pub type UsDuration = MicrosDurationU64;

/// Identifies an event endpoint of a peripheral that can be routed across the
/// [`EventFabric`].
///
/// On nRF SoCs this is the address of the peripheral's event register.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EventHandle(pub u32);

/// Identifies a task endpoint of a peripheral that can be triggered across the
/// [`EventFabric`].
///
/// On nRF SoCs this is the address of the peripheral's task register.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TaskHandle(pub u32);

/// A clock source that must be running before a counter depending on it can
/// count.
pub trait Oscillator {
    /// Requests the oscillator to start. May return before the oscillator is
    /// stable, see [`Oscillator::is_running()`].
    fn start(&self);

    /// Stops the oscillator.
    fn stop(&self);

    /// Returns `true` once the oscillator is stable.
    fn is_running(&self) -> bool;
}

/// An always-on, free-running, narrow counter with compare channels.
///
/// The counter wraps at `2^WIDTH` and raises an overflow event when it does.
/// A single interrupt line is shared by all compare and overflow events.
///
/// All methods may be called from scheduling and interrupt context.
pub trait LowPowerCounter {
    /// Counter width in bits. Must be less than 32.
    const WIDTH: u32;

    /// Counter frequency.
    const FREQUENCY_HZ: u32;

    /// Number of compare channels available.
    const NUM_COMPARE_CHANNELS: usize;

    /// Starts counting from the current counter value.
    fn start(&self);

    /// Stops counting. The counter keeps its value.
    fn stop(&self);

    /// Resets the counter to zero.
    fn clear(&self);

    /// Returns the current counter value.
    fn counter(&self) -> u32;

    /// Programs the given compare channel. Only the low [`Self::WIDTH`] bits
    /// of `tick` are relevant.
    fn set_compare(&self, channel: usize, tick: u32);

    /// Lets the given compare event raise the counter's interrupt.
    fn enable_compare_interrupt(&self, channel: usize);

    /// Stops the given compare event from raising the counter's interrupt.
    /// The event itself is still recorded.
    fn disable_compare_interrupt(&self, channel: usize);

    /// Routes the compare event to the event fabric.
    fn enable_compare_event(&self, channel: usize);

    /// Stops routing the compare event to the event fabric.
    fn disable_compare_event(&self, channel: usize);

    /// Whether the given compare event has been recorded since it was last
    /// cleared.
    fn is_compare_pending(&self, channel: usize) -> bool;

    /// Clears the given compare event.
    fn clear_compare(&self, channel: usize);

    /// The fabric endpoint of the given compare channel's event.
    fn compare_event(&self, channel: usize) -> EventHandle;

    /// Whether the counter wrapped since the overflow event was last cleared.
    fn is_overflow_pending(&self) -> bool;

    /// Clears the overflow event.
    fn clear_overflow(&self);

    /// Lets the overflow event raise the counter's interrupt.
    fn enable_overflow_interrupt(&self);

    /// Stops the overflow event from raising the counter's interrupt.
    fn disable_overflow_interrupt(&self);

    /// Masks the counter's interrupt line in the interrupt controller.
    fn mask_interrupt(&self);

    /// Clears a stale pending request and unmasks the counter's interrupt
    /// line at the priority the hybrid timer requires.
    fn unmask_interrupt(&self);

    /// Pends the counter's interrupt line in software.
    fn pend_interrupt(&self);
}

/// A wide high-precision counter that only counts while started and captures
/// its value into capture registers on hardware or software triggers.
pub trait HighPrecisionCounter {
    /// Counter frequency. The hybrid timer requires microsecond ticks.
    const FREQUENCY_HZ: u32;

    /// Number of capture channels available.
    const NUM_CAPTURE_CHANNELS: usize;

    /// Resets the counter to zero and starts counting.
    fn start(&self);

    /// Stops the counter and resets it to zero.
    fn stop(&self);

    /// Captures the current counter value into the given channel's capture
    /// register (software trigger) and returns it.
    fn capture(&self, channel: usize) -> u32;

    /// Reads the given channel's capture register.
    fn read_capture(&self, channel: usize) -> u32;

    /// The fabric endpoint of the given channel's capture task.
    fn capture_task(&self, channel: usize) -> TaskHandle;
}

/// An inter-peripheral event bus.
///
/// Channels connect one event to one task plus an optional fork task. Channels
/// may be collected in groups that can be disabled by a task of their own.
pub trait EventFabric {
    /// Number of channels that can be connected.
    const NUM_CHANNELS: usize;

    /// Number of channel groups.
    const NUM_GROUPS: usize;

    /// Connects the given channel's event endpoint to a task and an optional
    /// fork task. Does not enable the channel.
    fn connect(
        &self,
        channel: usize,
        event: EventHandle,
        task: TaskHandle,
        fork: Option<TaskHandle>,
    );

    /// Disables the channel and removes its endpoints.
    fn disconnect(&self, channel: usize);

    /// Enables the channel: its event now triggers its tasks.
    fn enable(&self, channel: usize);

    /// Disables the channel. Its endpoints are kept.
    fn disable(&self, channel: usize);

    /// Removes all channels from the given group.
    fn clear_group(&self, group: usize);

    /// Adds the channel to the given group.
    fn include_in_group(&self, channel: usize, group: usize);

    /// The task that disables all channels of the given group.
    fn group_disable_task(&self, group: usize) -> TaskHandle;
}

/// Driver callbacks. Both default to no-ops.
///
/// The callbacks are called from the low-power timer's interrupt context.
#[derive(Clone, Copy, Debug)]
pub struct TimerHooks {
    /// Called when the user alarm fires.
    pub fired: Option<fn()>,

    /// Called when the timer coordinator published a new sync point.
    pub synchronized: Option<fn()>,
}

impl TimerHooks {
    pub const NONE: Self = Self {
        fired: None,
        synchronized: None,
    };

    pub(crate) fn fired(&self) {
        if let Some(fired) = self.fired {
            fired();
        }
    }

    pub(crate) fn synchronized(&self) {
        if let Some(synchronized) = self.synchronized {
            synchronized();
        }
    }
}

impl Default for TimerHooks {
    fn default() -> Self {
        Self::NONE
    }
}

/// Low-power timer resource assignment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LpTimerConfig {
    /// Compare channel of the user alarm.
    pub user_channel: usize,

    /// Compare channel of the sync alarm.
    pub sync_channel: usize,

    /// A compare value less than or equal to `counter + guard_ticks` may not
    /// produce a compare event.
    pub guard_ticks: u32,
}

/// High-precision timer resource assignment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HpTimerConfig {
    /// Capture channel latched by the sync pulse.
    pub sync_channel: usize,

    /// Capture channel latched by timestamped events.
    pub timestamp_channel: usize,

    /// Capture channel used to read the running counter.
    pub current_time_channel: usize,
}

/// Event fabric resource assignment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FabricConfig {
    /// Routes the low-power sync compare event to the high-precision sync
    /// capture task.
    pub sync_channel: usize,

    /// Routes a timestamped event to the high-precision timestamp capture
    /// task.
    pub timestamp_channel: usize,

    /// Group of the timestamp channel, disabled by the first event.
    pub timestamp_group: usize,
}

/// Timer coordinator tuning.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CoordConfig {
    /// Unit of the drift estimate in microseconds (drift is measured in
    /// "parts per time base", PPTB). A power of two keeps divisions cheap.
    pub time_base: u32,

    /// Weight of the exponentially weighted moving average over drift
    /// samples: `new = (old * (ewma_weight - 1) + sample) / ewma_weight`.
    pub ewma_weight: u32,

    /// Delay of the first resync after start in microseconds. The first
    /// resync yields the first drift sample.
    pub first_resync_delay: u32,

    /// Delay between subsequent resyncs in microseconds.
    pub resync_interval: u32,
}

impl CoordConfig {
    pub const DEFAULT_TIME_BASE: u32 = 1 << 22;

    pub const DEFAULT: Self = Self {
        time_base: Self::DEFAULT_TIME_BASE,
        ewma_weight: 8,
        first_resync_delay: Self::DEFAULT_TIME_BASE,
        resync_interval: 64 * Self::DEFAULT_TIME_BASE,
    };
}

/// Complete resource assignment and tuning of a [`TimerDomain`].
///
/// [`TimerDomain`]: domain::TimerDomain
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimerConfig {
    pub lp: LpTimerConfig,
    pub hp: HpTimerConfig,
    pub fabric: FabricConfig,
    pub coord: CoordConfig,
}

impl TimerConfig {
    pub const DEFAULT: Self = Self {
        lp: LpTimerConfig {
            user_channel: 0,
            sync_channel: 1,
            guard_ticks: 2,
        },
        hp: HpTimerConfig {
            sync_channel: 0,
            timestamp_channel: 1,
            current_time_channel: 2,
        },
        fabric: FabricConfig {
            sync_channel: 0,
            timestamp_channel: 1,
            timestamp_group: 0,
        },
        coord: CoordConfig::DEFAULT,
    };

    /// Asserts that the configured resources exist and are not shared
    /// between roles.
    ///
    /// # Panics
    ///
    /// Panics on misconfiguration. Evaluated at compile time when the domain
    /// is constructed in a const context.
    pub const fn validate<L: LowPowerCounter, H: HighPrecisionCounter, F: EventFabric>(&self) {
        assert!(L::WIDTH > 0 && L::WIDTH < 32);
        assert!(L::FREQUENCY_HZ > 0 && L::FREQUENCY_HZ <= 1_000_000);
        assert!(self.lp.user_channel < L::NUM_COMPARE_CHANNELS);
        assert!(self.lp.sync_channel < L::NUM_COMPARE_CHANNELS);
        assert!(self.lp.user_channel != self.lp.sync_channel);
        assert!(self.lp.guard_ticks < 1 << (L::WIDTH - 2));

        assert!(H::FREQUENCY_HZ == 1_000_000);
        assert!(self.hp.sync_channel < H::NUM_CAPTURE_CHANNELS);
        assert!(self.hp.timestamp_channel < H::NUM_CAPTURE_CHANNELS);
        assert!(self.hp.current_time_channel < H::NUM_CAPTURE_CHANNELS);
        assert!(self.hp.sync_channel != self.hp.timestamp_channel);
        assert!(self.hp.sync_channel != self.hp.current_time_channel);
        assert!(self.hp.timestamp_channel != self.hp.current_time_channel);

        assert!(self.fabric.sync_channel < F::NUM_CHANNELS);
        assert!(self.fabric.timestamp_channel < F::NUM_CHANNELS);
        assert!(self.fabric.sync_channel != self.fabric.timestamp_channel);
        assert!(self.fabric.timestamp_group < F::NUM_GROUPS);

        assert!(self.coord.time_base > 0 && self.coord.time_base <= i32::MAX as u32);
        assert!(self.coord.ewma_weight > 0);
        // Resyncs are scheduled relative to the previous sync point, which
        // must remain within half the 32 bit microsecond range.
        assert!(self.coord.first_resync_delay > 0 && self.coord.first_resync_delay < 1 << 31);
        assert!(self.coord.resync_interval > 0 && self.coord.resync_interval < 1 << 31);
    }
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}
