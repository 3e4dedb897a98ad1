//! Simulated clock tree for host-side testing.
//!
//! All simulated peripherals derive their state from a single physical
//! timeline in nanoseconds that only advances on request:
//!
//! - a 24 bit, 32768 Hz low-power counter with four compare channels, modeled
//!   after the nRF RTC,
//! - a 32 bit, 1 MHz high-precision counter with four capture channels and
//!   injectable drift, modeled after the nRF TIMER,
//! - an eight channel event fabric with channel groups, modeled after the nRF
//!   PPI,
//! - the low- and high-frequency oscillators.
//!
//! Event and task handles mimic nRF52840 register addresses.
//!
//! The simulation is `Sync`. One thread may advance time and service
//! interrupts while others read the timers.

use core::{
    array,
    sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, AtomicUsize, Ordering},
};

use crate::driver::timer::{
    EventFabric, EventHandle, HighPrecisionCounter, LowPowerCounter, Oscillator, TaskHandle,
    TimerConfig, TimerHooks, domain::TimerDomain,
};

const RTC_WIDTH: u32 = 24;
const RTC_FREQUENCY_HZ: u32 = 32_768;
const RTC_NUM_CC: usize = 4;
const RTC_MASK: u64 = (1 << RTC_WIDTH) - 1;

// One RTC tick lasts 10^9 / 32768 ns = 1953125 / 64 ns.
const RTC_TICK_NS_NUM: u64 = 1_953_125;
const RTC_TICK_NS_DEN: u64 = 64;

const TIMER_NUM_CC: usize = 4;

const PPI_NUM_CHANNELS: usize = 8;
const PPI_NUM_GROUPS: usize = 4;

const RTC_EVENTS_COMPARE: u32 = 0x4000_B140;
const TIMER_TASKS_CAPTURE: u32 = 0x4000_8040;
const PPI_TASKS_CHG_DIS: u32 = 0x4001_F004;

/// Radio frame start event.
pub const RADIO_EVENT_FRAMESTART: EventHandle = EventHandle(0x4000_1138);

/// Radio CRC ok event.
pub const RADIO_EVENT_CRCOK: EventHandle = EventHandle(0x4000_1130);

// Bit of the overflow interrupt in the RTC interrupt enable mask.
const RTC_INTEN_OVRFLW: u32 = 1 << 31;

// Upper bound of interrupt handler invocations per service call. Reached
// only if the handler fails to acknowledge an interrupt, e.g. while another
// thread holds the overflow counter lock.
const MAX_INTERRUPTS_PER_SERVICE: usize = 16;

/// The simulated hardware.
pub struct SimHardware {
    now_ns: AtomicU64,

    lf_clock_running: AtomicBool,
    hf_clock_running: AtomicBool,

    rtc_running: AtomicBool,
    /// Physical time the counter started counting from `rtc_base_ticks`.
    rtc_origin_ns: AtomicU64,
    rtc_base_ticks: AtomicU64,
    /// Unwrapped tick up to which compare matches have been processed.
    rtc_processed_ticks: AtomicU64,
    rtc_acked_overflows: AtomicU64,
    rtc_cc: [AtomicU32; RTC_NUM_CC],
    rtc_events: AtomicU32,
    rtc_inten: AtomicU32,
    rtc_evten: AtomicU32,
    rtc_routed_events: AtomicUsize,
    rtc_irq_pending: AtomicBool,
    rtc_irq_masked: AtomicBool,

    timer_running: AtomicBool,
    /// Physical time the counter started counting from `timer_base_ns`.
    timer_origin_ns: AtomicU64,
    timer_base_ns: AtomicU64,
    timer_drift_ppb: AtomicI64,
    timer_cc: [AtomicU32; TIMER_NUM_CC],

    ppi_eep: [AtomicU32; PPI_NUM_CHANNELS],
    ppi_tep: [AtomicU32; PPI_NUM_CHANNELS],
    ppi_fork: [AtomicU32; PPI_NUM_CHANNELS],
    ppi_enabled: AtomicU32,
    ppi_groups: [AtomicU32; PPI_NUM_GROUPS],
}

impl SimHardware {
    pub fn new() -> Self {
        Self {
            now_ns: AtomicU64::new(0),
            lf_clock_running: AtomicBool::new(false),
            hf_clock_running: AtomicBool::new(false),
            rtc_running: AtomicBool::new(false),
            rtc_origin_ns: AtomicU64::new(0),
            rtc_base_ticks: AtomicU64::new(0),
            rtc_processed_ticks: AtomicU64::new(0),
            rtc_acked_overflows: AtomicU64::new(0),
            rtc_cc: array::from_fn(|_| AtomicU32::new(0)),
            rtc_events: AtomicU32::new(0),
            rtc_inten: AtomicU32::new(0),
            rtc_evten: AtomicU32::new(0),
            rtc_routed_events: AtomicUsize::new(0),
            rtc_irq_pending: AtomicBool::new(false),
            rtc_irq_masked: AtomicBool::new(true),
            timer_running: AtomicBool::new(false),
            timer_origin_ns: AtomicU64::new(0),
            timer_base_ns: AtomicU64::new(0),
            timer_drift_ppb: AtomicI64::new(0),
            timer_cc: array::from_fn(|_| AtomicU32::new(0)),
            ppi_eep: array::from_fn(|_| AtomicU32::new(0)),
            ppi_tep: array::from_fn(|_| AtomicU32::new(0)),
            ppi_fork: array::from_fn(|_| AtomicU32::new(0)),
            ppi_enabled: AtomicU32::new(0),
            ppi_groups: array::from_fn(|_| AtomicU32::new(0)),
        }
    }

    pub fn rtc(&self) -> SimRtc<'_> {
        SimRtc(self)
    }

    pub fn timer(&self) -> SimTimer<'_> {
        SimTimer(self)
    }

    pub fn fabric(&self) -> SimFabric<'_> {
        SimFabric(self)
    }

    pub fn lf_clock(&self) -> SimOscillator<'_> {
        SimOscillator(&self.lf_clock_running)
    }

    pub fn hf_clock(&self) -> SimOscillator<'_> {
        SimOscillator(&self.hf_clock_running)
    }

    /// A timer domain running on this hardware with the default
    /// configuration.
    pub fn domain(&self, hooks: TimerHooks) -> SimTimerDomain<'_> {
        TimerDomain::new(
            self.rtc(),
            self.lf_clock(),
            self.timer(),
            self.hf_clock(),
            self.fabric(),
            TimerConfig::DEFAULT,
            hooks,
        )
    }

    pub fn now_ns(&self) -> u64 {
        self.now_ns.load(Ordering::Acquire)
    }

    /// Advances physical time.
    ///
    /// Compare matches of the low-power counter raise their events. Events
    /// routed to the fabric trigger their tasks at the physical instant of
    /// the matching tick.
    pub fn advance_ns(&self, ns: u64) {
        let target_ns = self.now_ns() + ns;
        let target_ticks = self.rtc_ticks_at(target_ns);
        let processed = self.rtc_processed_ticks.load(Ordering::Relaxed);

        if self.rtc_running.load(Ordering::Acquire) && target_ticks > processed {
            let mut matches: [Option<(u64, usize)>; RTC_NUM_CC] = [None; RTC_NUM_CC];
            for (channel, m) in matches.iter_mut().enumerate() {
                let cc = (self.rtc_cc[channel].load(Ordering::Relaxed) as u64) & RTC_MASK;
                let mut tick = (processed & !RTC_MASK) | cc;
                if tick <= processed {
                    tick += RTC_MASK + 1;
                }
                if tick <= target_ticks {
                    *m = Some((tick, channel));
                }
            }
            matches.sort_unstable_by_key(|m| m.map(|(tick, _)| tick).unwrap_or(u64::MAX));

            for (tick, channel) in matches.into_iter().flatten() {
                let tick_ns = self.rtc_tick_ns(tick);
                self.now_ns.fetch_max(tick_ns, Ordering::AcqRel);
                self.rtc_events.fetch_or(1 << channel, Ordering::AcqRel);
                if self.rtc_evten.load(Ordering::Acquire) & 1 << channel != 0 {
                    self.rtc_routed_events.fetch_add(1, Ordering::Relaxed);
                    self.trigger(SimRtc(self).compare_event(channel));
                }
            }

            self.rtc_processed_ticks.store(target_ticks, Ordering::Relaxed);
        }

        self.now_ns.store(target_ns, Ordering::Release);
    }

    /// Publishes a peripheral event to the fabric.
    pub fn trigger(&self, event: EventHandle) {
        let enabled = self.ppi_enabled.load(Ordering::Acquire);
        let mut tasks = [None; 2 * PPI_NUM_CHANNELS];
        for channel in 0..PPI_NUM_CHANNELS {
            if enabled & 1 << channel == 0
                || self.ppi_eep[channel].load(Ordering::Relaxed) != event.0
            {
                continue;
            }
            for (slot, endpoint) in [&self.ppi_tep[channel], &self.ppi_fork[channel]]
                .into_iter()
                .enumerate()
            {
                let task = endpoint.load(Ordering::Relaxed);
                if task != 0 {
                    tasks[2 * channel + slot] = Some(TaskHandle(task));
                }
            }
        }

        for task in tasks.into_iter().flatten() {
            self.run_task(task);
        }
    }

    /// Triggers a peripheral task directly.
    pub fn run_task(&self, task: TaskHandle) {
        let address = task.0;
        if (TIMER_TASKS_CAPTURE..TIMER_TASKS_CAPTURE + 4 * TIMER_NUM_CC as u32).contains(&address)
        {
            let channel = ((address - TIMER_TASKS_CAPTURE) / 4) as usize;
            let _ = SimTimer(self).capture(channel);
        } else if (PPI_TASKS_CHG_DIS..PPI_TASKS_CHG_DIS + 8 * PPI_NUM_GROUPS as u32)
            .contains(&address)
        {
            let group = ((address - PPI_TASKS_CHG_DIS) / 8) as usize;
            let channels = self.ppi_groups[group].load(Ordering::Relaxed);
            self.ppi_enabled.fetch_and(!channels, Ordering::AcqRel);
        }
    }

    /// Sets the rate offset of the high-precision counter in parts per
    /// billion. Positive values make it run fast.
    pub fn set_hp_drift_ppb(&self, drift_ppb: i64) {
        let now_ns = self.now_ns();
        if self.timer_running.load(Ordering::Acquire) {
            let elapsed = self.timer_elapsed_ns(now_ns);
            self.timer_base_ns.fetch_add(elapsed, Ordering::Relaxed);
            self.timer_origin_ns.store(now_ns, Ordering::Relaxed);
        }
        self.timer_drift_ppb.store(drift_ppb, Ordering::Release);
    }

    /// Whether the low-power counter currently requests an interrupt.
    pub fn is_lp_interrupt_pending(&self) -> bool {
        !self.rtc_irq_masked.load(Ordering::Acquire)
            && (self.rtc_irq_pending.load(Ordering::Acquire) || self.rtc_irq_line())
    }

    /// Calls the domain's interrupt handler while the low-power counter
    /// requests an interrupt.
    pub fn service(&self, domain: &SimTimerDomain<'_>) {
        for _ in 0..MAX_INTERRUPTS_PER_SERVICE {
            if self.rtc_irq_masked.load(Ordering::Acquire) {
                return;
            }
            let pended = self.rtc_irq_pending.swap(false, Ordering::AcqRel);
            if !pended && !self.rtc_irq_line() {
                return;
            }
            domain.on_lp_timer_interrupt();
        }
    }

    /// Advances time by `duration_ns` in steps of at most `step_ns`,
    /// servicing interrupts after each step.
    pub fn run_for(&self, domain: &SimTimerDomain<'_>, duration_ns: u64, step_ns: u64) {
        let mut remaining = duration_ns;
        while remaining > 0 {
            let step = remaining.min(step_ns);
            self.advance_ns(step);
            self.service(domain);
            remaining -= step;
        }
    }

    /// Number of low-power compare events published to the fabric.
    pub fn rtc_compare_events_routed(&self) -> usize {
        self.rtc_routed_events.load(Ordering::Relaxed)
    }

    pub fn is_overflow_interrupt_enabled(&self) -> bool {
        self.rtc_inten.load(Ordering::Acquire) & RTC_INTEN_OVRFLW != 0
    }

    pub fn is_lf_clock_running(&self) -> bool {
        self.lf_clock_running.load(Ordering::Acquire)
    }

    fn rtc_irq_line(&self) -> bool {
        let inten = self.rtc_inten.load(Ordering::Acquire);
        let events = self.rtc_events.load(Ordering::Acquire);
        events & inten != 0
            || (inten & RTC_INTEN_OVRFLW != 0 && SimRtc(self).is_overflow_pending())
    }

    fn rtc_ticks_at(&self, now_ns: u64) -> u64 {
        let base = self.rtc_base_ticks.load(Ordering::Acquire);
        if !self.rtc_running.load(Ordering::Acquire) {
            return base;
        }
        let origin = self.rtc_origin_ns.load(Ordering::Acquire);
        let elapsed = now_ns.saturating_sub(origin) as u128;
        base + (elapsed * RTC_TICK_NS_DEN as u128 / RTC_TICK_NS_NUM as u128) as u64
    }

    // First physical instant at which the counter shows `tick`.
    fn rtc_tick_ns(&self, tick: u64) -> u64 {
        let base = self.rtc_base_ticks.load(Ordering::Acquire);
        let origin = self.rtc_origin_ns.load(Ordering::Acquire);
        let elapsed = tick.saturating_sub(base) as u128;
        origin + (elapsed * RTC_TICK_NS_NUM as u128).div_ceil(RTC_TICK_NS_DEN as u128) as u64
    }

    fn rtc_ticks(&self) -> u64 {
        self.rtc_ticks_at(self.now_ns())
    }

    fn timer_elapsed_ns(&self, now_ns: u64) -> u64 {
        let origin = self.timer_origin_ns.load(Ordering::Acquire);
        let drift_ppb = self.timer_drift_ppb.load(Ordering::Acquire) as i128;
        let elapsed = now_ns.saturating_sub(origin) as i128;
        (elapsed * (1_000_000_000 + drift_ppb) / 1_000_000_000) as u64
    }

    fn timer_counter(&self) -> u32 {
        if !self.timer_running.load(Ordering::Acquire) {
            return 0;
        }
        let base = self.timer_base_ns.load(Ordering::Acquire);
        ((base + self.timer_elapsed_ns(self.now_ns())) / 1_000) as u32
    }
}

impl Default for SimHardware {
    fn default() -> Self {
        Self::new()
    }
}

/// Simulated low-power counter.
#[derive(Clone, Copy)]
pub struct SimRtc<'a>(&'a SimHardware);

impl LowPowerCounter for SimRtc<'_> {
    const WIDTH: u32 = RTC_WIDTH;
    const FREQUENCY_HZ: u32 = RTC_FREQUENCY_HZ;
    const NUM_COMPARE_CHANNELS: usize = RTC_NUM_CC;

    fn start(&self) {
        let hw = self.0;
        if hw.rtc_running.load(Ordering::Acquire) {
            return;
        }
        hw.rtc_origin_ns.store(hw.now_ns(), Ordering::Release);
        hw.rtc_running.store(true, Ordering::Release);
    }

    fn stop(&self) {
        let hw = self.0;
        let ticks = hw.rtc_ticks();
        hw.rtc_base_ticks.store(ticks, Ordering::Release);
        hw.rtc_running.store(false, Ordering::Release);
    }

    fn clear(&self) {
        let hw = self.0;
        hw.rtc_origin_ns.store(hw.now_ns(), Ordering::Release);
        hw.rtc_base_ticks.store(0, Ordering::Release);
        hw.rtc_processed_ticks.store(0, Ordering::Relaxed);
        hw.rtc_acked_overflows.store(0, Ordering::Release);
    }

    fn counter(&self) -> u32 {
        (self.0.rtc_ticks() & RTC_MASK) as u32
    }

    fn set_compare(&self, channel: usize, tick: u32) {
        self.0.rtc_cc[channel].store(tick & RTC_MASK as u32, Ordering::Release);
    }

    fn enable_compare_interrupt(&self, channel: usize) {
        self.0.rtc_inten.fetch_or(1 << channel, Ordering::AcqRel);
    }

    fn disable_compare_interrupt(&self, channel: usize) {
        self.0.rtc_inten.fetch_and(!(1 << channel), Ordering::AcqRel);
    }

    fn enable_compare_event(&self, channel: usize) {
        self.0.rtc_evten.fetch_or(1 << channel, Ordering::AcqRel);
    }

    fn disable_compare_event(&self, channel: usize) {
        self.0.rtc_evten.fetch_and(!(1 << channel), Ordering::AcqRel);
    }

    fn is_compare_pending(&self, channel: usize) -> bool {
        self.0.rtc_events.load(Ordering::Acquire) & 1 << channel != 0
    }

    fn clear_compare(&self, channel: usize) {
        self.0.rtc_events.fetch_and(!(1 << channel), Ordering::AcqRel);
    }

    fn compare_event(&self, channel: usize) -> EventHandle {
        EventHandle(RTC_EVENTS_COMPARE + 4 * channel as u32)
    }

    fn is_overflow_pending(&self) -> bool {
        let hw = self.0;
        hw.rtc_ticks() >> RTC_WIDTH > hw.rtc_acked_overflows.load(Ordering::Acquire)
    }

    fn clear_overflow(&self) {
        let hw = self.0;
        hw.rtc_acked_overflows
            .store(hw.rtc_ticks() >> RTC_WIDTH, Ordering::Release);
    }

    fn enable_overflow_interrupt(&self) {
        self.0.rtc_inten.fetch_or(RTC_INTEN_OVRFLW, Ordering::AcqRel);
    }

    fn disable_overflow_interrupt(&self) {
        self.0.rtc_inten.fetch_and(!RTC_INTEN_OVRFLW, Ordering::AcqRel);
    }

    fn mask_interrupt(&self) {
        self.0.rtc_irq_masked.store(true, Ordering::Release);
    }

    fn unmask_interrupt(&self) {
        self.0.rtc_irq_masked.store(false, Ordering::Release);
    }

    fn pend_interrupt(&self) {
        self.0.rtc_irq_pending.store(true, Ordering::Release);
    }
}

/// Simulated high-precision counter.
#[derive(Clone, Copy)]
pub struct SimTimer<'a>(&'a SimHardware);

impl HighPrecisionCounter for SimTimer<'_> {
    const FREQUENCY_HZ: u32 = 1_000_000;
    const NUM_CAPTURE_CHANNELS: usize = TIMER_NUM_CC;

    fn start(&self) {
        let hw = self.0;
        if hw.timer_running.load(Ordering::Acquire) {
            return;
        }
        hw.timer_base_ns.store(0, Ordering::Release);
        hw.timer_origin_ns.store(hw.now_ns(), Ordering::Release);
        hw.timer_running.store(true, Ordering::Release);
    }

    fn stop(&self) {
        let hw = self.0;
        hw.timer_running.store(false, Ordering::Release);
        hw.timer_base_ns.store(0, Ordering::Release);
    }

    fn capture(&self, channel: usize) -> u32 {
        let counter = self.0.timer_counter();
        self.0.timer_cc[channel].store(counter, Ordering::Release);
        counter
    }

    fn read_capture(&self, channel: usize) -> u32 {
        self.0.timer_cc[channel].load(Ordering::Acquire)
    }

    fn capture_task(&self, channel: usize) -> TaskHandle {
        TaskHandle(TIMER_TASKS_CAPTURE + 4 * channel as u32)
    }
}

/// Simulated event fabric.
#[derive(Clone, Copy)]
pub struct SimFabric<'a>(&'a SimHardware);

impl EventFabric for SimFabric<'_> {
    const NUM_CHANNELS: usize = PPI_NUM_CHANNELS;
    const NUM_GROUPS: usize = PPI_NUM_GROUPS;

    fn connect(
        &self,
        channel: usize,
        event: EventHandle,
        task: TaskHandle,
        fork: Option<TaskHandle>,
    ) {
        let hw = self.0;
        hw.ppi_eep[channel].store(event.0, Ordering::Relaxed);
        hw.ppi_tep[channel].store(task.0, Ordering::Relaxed);
        hw.ppi_fork[channel].store(fork.map_or(0, |fork| fork.0), Ordering::Release);
    }

    fn disconnect(&self, channel: usize) {
        let hw = self.0;
        self.disable(channel);
        hw.ppi_eep[channel].store(0, Ordering::Relaxed);
        hw.ppi_tep[channel].store(0, Ordering::Relaxed);
        hw.ppi_fork[channel].store(0, Ordering::Release);
        for group in &hw.ppi_groups {
            group.fetch_and(!(1 << channel), Ordering::AcqRel);
        }
    }

    fn enable(&self, channel: usize) {
        self.0.ppi_enabled.fetch_or(1 << channel, Ordering::AcqRel);
    }

    fn disable(&self, channel: usize) {
        self.0.ppi_enabled.fetch_and(!(1 << channel), Ordering::AcqRel);
    }

    fn clear_group(&self, group: usize) {
        self.0.ppi_groups[group].store(0, Ordering::Release);
    }

    fn include_in_group(&self, channel: usize, group: usize) {
        self.0.ppi_groups[group].fetch_or(1 << channel, Ordering::AcqRel);
    }

    fn group_disable_task(&self, group: usize) -> TaskHandle {
        TaskHandle(PPI_TASKS_CHG_DIS + 8 * group as u32)
    }
}

/// Simulated oscillator. Stabilizes immediately.
#[derive(Clone, Copy)]
pub struct SimOscillator<'a>(&'a AtomicBool);

impl Oscillator for SimOscillator<'_> {
    fn start(&self) {
        self.0.store(true, Ordering::Release);
    }

    fn stop(&self) {
        self.0.store(false, Ordering::Release);
    }

    fn is_running(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

pub type SimTimerDomain<'a> =
    TimerDomain<SimRtc<'a>, SimOscillator<'a>, SimTimer<'a>, SimOscillator<'a>, SimFabric<'a>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rtc_counts_ticks_and_overflows() {
        let sim = SimHardware::new();
        let rtc = sim.rtc();
        assert_eq!(rtc.counter(), 0);

        // Stopped counters don't count.
        sim.advance_ns(1_000_000_000);
        assert_eq!(rtc.counter(), 0);

        rtc.start();
        sim.advance_ns(3_906_250);
        assert_eq!(rtc.counter(), 128);

        sim.advance_ns(512_000_000_000);
        assert_eq!(rtc.counter(), 128);
        assert!(rtc.is_overflow_pending());
        rtc.clear_overflow();
        assert!(!rtc.is_overflow_pending());

        rtc.stop();
        sim.advance_ns(1_000_000_000);
        assert_eq!(rtc.counter(), 128);
        rtc.clear();
        assert_eq!(rtc.counter(), 0);
    }

    #[test]
    fn rtc_compare_raises_event_once_per_period() {
        let sim = SimHardware::new();
        let rtc = sim.rtc();
        rtc.start();
        rtc.set_compare(1, 100);

        sim.advance_ns(99 * 1_953_125 / 64);
        assert!(!rtc.is_compare_pending(1));

        sim.advance_ns(2 * 1_953_125 / 64);
        assert!(rtc.is_compare_pending(1));
        rtc.clear_compare(1);

        sim.advance_ns(1_000_000_000);
        assert!(!rtc.is_compare_pending(1));
    }

    #[test]
    fn routed_compare_event_captures_at_tick() {
        let sim = SimHardware::new();
        let rtc = sim.rtc();
        let timer = sim.timer();
        let fabric = sim.fabric();

        fabric.connect(0, rtc.compare_event(2), timer.capture_task(3), None);
        fabric.enable(0);
        rtc.enable_compare_event(2);
        rtc.set_compare(2, 32_768);

        rtc.start();
        timer.start();
        sim.advance_ns(1_500_000_000);

        assert_eq!(timer.read_capture(3), 1_000_000);
        assert_eq!(sim.rtc_compare_events_routed(), 1);
    }

    #[test]
    fn group_disable_task_stops_channel() {
        let sim = SimHardware::new();
        let timer = sim.timer();
        let fabric = sim.fabric();

        fabric.connect(
            5,
            RADIO_EVENT_FRAMESTART,
            timer.capture_task(1),
            Some(fabric.group_disable_task(2)),
        );
        fabric.include_in_group(5, 2);
        fabric.enable(5);

        timer.start();
        sim.advance_ns(10_000);
        sim.trigger(RADIO_EVENT_FRAMESTART);
        assert_eq!(timer.read_capture(1), 10);

        sim.advance_ns(10_000);
        sim.trigger(RADIO_EVENT_FRAMESTART);
        assert_eq!(timer.read_capture(1), 10);
    }

    #[test]
    fn timer_drifts() {
        let sim = SimHardware::new();
        let timer = sim.timer();
        timer.start();
        sim.advance_ns(1_000_000_000);
        assert_eq!(timer.capture(0), 1_000_000);

        sim.set_hp_drift_ppb(50_000);
        sim.advance_ns(1_000_000_000);
        assert_eq!(timer.capture(0), 2_000_050);

        sim.set_hp_drift_ppb(-50_000);
        sim.advance_ns(1_000_000_000);
        assert_eq!(timer.capture(0), 3_000_000);
    }
}
