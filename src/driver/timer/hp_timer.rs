//! High-precision timer: a relative microsecond counter that only runs while
//! the radio is active, plus hardware capture channels.

use core::{
    hint::spin_loop,
    sync::atomic::{AtomicBool, AtomicU32, Ordering},
};

use super::{HighPrecisionCounter, HpTimerConfig, Oscillator, TaskHandle};

/// Wraps a [`HighPrecisionCounter`] and its sync, timestamp and current time
/// capture channels.
///
/// Capture registers are armed with a sentinel: the counter value latched in
/// software when preparing the channel. Any later hardware capture of the
/// running counter differs from the sentinel, so a register still holding the
/// sentinel has not been triggered.
///
/// Capture registers keep their value while the counter is stopped, so
/// stopping the counter also disarms the timestamp channel. A capture from a
/// previous run is never reported.
pub struct HpTimer<H, O> {
    timer: H,
    hf_clock: O,
    config: HpTimerConfig,
    running: AtomicBool,
    sync_sentinel: AtomicU32,
    timestamp_sentinel: AtomicU32,
    /// Set by [`HpTimer::timestamp_prepare()`], cleared by [`HpTimer::stop()`].
    timestamp_armed: AtomicBool,
}

impl<H: HighPrecisionCounter, O: Oscillator> HpTimer<H, O> {
    pub const fn new(timer: H, hf_clock: O, config: HpTimerConfig) -> Self {
        assert!(H::FREQUENCY_HZ == 1_000_000);
        assert!(config.sync_channel < H::NUM_CAPTURE_CHANNELS);
        assert!(config.timestamp_channel < H::NUM_CAPTURE_CHANNELS);
        assert!(config.current_time_channel < H::NUM_CAPTURE_CHANNELS);

        Self {
            timer,
            hf_clock,
            config,
            running: AtomicBool::new(false),
            sync_sentinel: AtomicU32::new(0),
            timestamp_sentinel: AtomicU32::new(0),
            timestamp_armed: AtomicBool::new(false),
        }
    }

    /// Starts the high-frequency oscillator the counter depends on.
    ///
    /// Blocks until the oscillator is stable.
    pub fn init(&self) {
        self.hf_clock.start();
        while !self.hf_clock.is_running() {
            spin_loop();
        }
        self.timer.stop();
    }

    pub fn deinit(&self) {
        self.stop();
        self.hf_clock.stop();
    }

    /// Starts counting from zero.
    pub fn start(&self) {
        self.timer.start();
        self.running.store(true, Ordering::Release);
    }

    /// Stops and resets the counter. No state is retained.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        self.timestamp_armed.store(false, Ordering::Release);
        self.timer.stop();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// The task that latches the counter into the sync capture register.
    pub fn sync_task_get(&self) -> TaskHandle {
        self.timer.capture_task(self.config.sync_channel)
    }

    /// Arms the sync capture register.
    pub fn sync_prepare(&self) {
        let sentinel = self.timer.capture(self.config.sync_channel);
        self.sync_sentinel.store(sentinel, Ordering::Relaxed);
    }

    /// The counter value latched by the sync task, if it was triggered since
    /// [`HpTimer::sync_prepare()`].
    pub fn sync_time_get(&self) -> Option<u32> {
        let captured = self.timer.read_capture(self.config.sync_channel);
        (captured != self.sync_sentinel.load(Ordering::Relaxed)).then_some(captured)
    }

    /// The task that latches the counter into the timestamp capture
    /// register. Independent of the sync channel.
    pub fn timestamp_task_get(&self) -> TaskHandle {
        self.timer.capture_task(self.config.timestamp_channel)
    }

    /// Arms the timestamp capture register.
    ///
    /// The sentinel has counter resolution: an event captured within the
    /// same microsecond as this call latches the sentinel itself and is
    /// reported as not available.
    pub fn timestamp_prepare(&self) {
        let sentinel = self.timer.capture(self.config.timestamp_channel);
        self.timestamp_sentinel.store(sentinel, Ordering::Relaxed);
        self.timestamp_armed.store(true, Ordering::Release);
    }

    /// The counter value latched by the timestamp task, if it was triggered
    /// since [`HpTimer::timestamp_prepare()`] in the current run of the
    /// counter.
    pub fn timestamp_get(&self) -> Option<u32> {
        if !self.timestamp_armed.load(Ordering::Acquire) {
            return None;
        }

        let captured = self.timer.read_capture(self.config.timestamp_channel);
        (captured != self.timestamp_sentinel.load(Ordering::Relaxed)).then_some(captured)
    }

    /// The current counter value.
    pub fn current_time_get(&self) -> u32 {
        self.timer.capture(self.config.current_time_channel)
    }
}
