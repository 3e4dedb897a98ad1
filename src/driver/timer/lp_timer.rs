//! Low-power timer: the sole source of absolute time and the owner of the
//! user and sync alarms.

use core::{
    hint::spin_loop,
    marker::PhantomData,
    sync::atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering, compiler_fence},
};

use super::{
    EventHandle, LowPowerCounter, LpTimerConfig, Oscillator, UsInstant, overflow::OverflowCounter,
};

const MICROS_PER_SECOND: u64 = 1_000_000;

/// Converts between low-power counter ticks and microseconds.
///
/// Conversions from ticks to microseconds round down so that time never
/// appears to advance faster than the counter. Conversions from microseconds
/// to ticks round up so that alarms never fire early.
pub struct TickConversion<L: LowPowerCounter> {
    _counter: PhantomData<L>,
}

impl<L: LowPowerCounter> TickConversion<L> {
    const FREQUENCY_HZ: u64 = L::FREQUENCY_HZ as u64;

    pub const fn ticks_to_us(ticks: u64) -> u64 {
        (ticks / Self::FREQUENCY_HZ) * MICROS_PER_SECOND
            + (ticks % Self::FREQUENCY_HZ) * MICROS_PER_SECOND / Self::FREQUENCY_HZ
    }

    pub const fn us_to_ticks(us: u64) -> u64 {
        (us / MICROS_PER_SECOND) * Self::FREQUENCY_HZ
            + ((us % MICROS_PER_SECOND) * Self::FREQUENCY_HZ).div_ceil(MICROS_PER_SECOND)
    }

    /// Duration of a single tick in microseconds, rounded up.
    pub const fn granularity_us() -> u32 {
        MICROS_PER_SECOND.div_ceil(Self::FREQUENCY_HZ) as u32
    }
}

/// Reconstructs a 64-bit microsecond instant from the wrapping 32-bit sum of
/// `t0` and `dt`.
///
/// The result is the unique instant whose low 32 bits equal `t0 + dt`
/// (modulo 2^32) and that lies within `[-2^31, 2^31)` microseconds of `now`.
/// Instants before the epoch saturate at zero.
pub const fn convert_to_64bit(t0: u32, dt: u32, now: u64) -> u64 {
    let offset = t0.wrapping_add(dt).wrapping_sub(now as u32) as i32;
    match now.checked_add_signed(offset as i64) {
        Some(target) => target,
        None => 0,
    }
}

/// Alarms fired by a single low-power timer interrupt.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Fired {
    pub user: bool,
    pub sync: bool,
}

/// Flag representing the current state of an alarm.
///
/// # Safety
///
/// The flag transfers ownership of the alarm's target between scheduling
/// context and interrupt context:
///
/// - While the alarm is idle or arming, its target is owned by the scheduling
///   context that arms it. The interrupt handler skips the alarm.
///
/// - While the alarm is armed, the interrupt handler may read the target at
///   any time and fire the alarm. Firing and disarming race for the
///   `Armed -> Idle` transition; only the winner acts upon the alarm, which
///   suppresses late callbacks after [`LpTimer::stop()`].
#[repr(u8)]
enum AlarmState {
    Idle,
    Arming,
    Armed,
}

// Resources shared between scheduling context and the low-power timer
// interrupt.
struct Alarm {
    /// See [`AlarmState`].
    state: AtomicU8,

    /// Overflow-protected tick at which the alarm fires.
    ///
    /// A 64 bit value cannot be accessed atomically on 32 bit platforms. The
    /// halves are guarded by the alarm state.
    target_lo: AtomicU32,
    target_hi: AtomicU32,

    /// The target could not be scheduled safely in hardware. The interrupt
    /// was pended in software and the alarm fires without a time check.
    forced: AtomicBool,
}

impl Alarm {
    const fn new() -> Self {
        Self {
            state: AtomicU8::new(AlarmState::Idle as u8),
            target_lo: AtomicU32::new(0),
            target_hi: AtomicU32::new(0),
            forced: AtomicBool::new(false),
        }
    }

    fn is_armed(&self) -> bool {
        let state = self.state.load(Ordering::Relaxed);
        compiler_fence(Ordering::Acquire);
        state == AlarmState::Armed as u8
    }

    fn target(&self) -> u64 {
        let lo = self.target_lo.load(Ordering::Relaxed) as u64;
        let hi = self.target_hi.load(Ordering::Relaxed) as u64;
        hi << 32 | lo
    }

    fn set_target(&self, tick: u64) {
        self.target_lo.store(tick as u32, Ordering::Relaxed);
        self.target_hi.store((tick >> 32) as u32, Ordering::Relaxed);
    }

    fn is_forced(&self) -> bool {
        self.forced.load(Ordering::Relaxed)
    }

    /// Transfers ownership back from interrupt to scheduling context.
    ///
    /// Returns `true` if the calling context won the race against other
    /// contexts disarming or firing the alarm.
    fn try_disarm(&self) -> bool {
        let result = self.state.compare_exchange(
            AlarmState::Armed as u8,
            AlarmState::Idle as u8,
            Ordering::AcqRel,
            Ordering::Relaxed,
        );
        result.is_ok()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum AlarmRole {
    User,
    Sync,
}

const NUM_ALARMS: usize = 2;

/// Extends a [`LowPowerCounter`] into a 64-bit microsecond clock and
/// schedules the user and sync alarms on two of its compare channels.
///
/// All methods except [`LpTimer::on_interrupt()`] are called from scheduling
/// context. The interrupt handler must run at a higher priority than the
/// scheduling context.
pub struct LpTimer<L, O> {
    rtc: L,
    lf_clock: O,
    config: LpTimerConfig,
    overflow: OverflowCounter,
    alarms: [Alarm; NUM_ALARMS],
    critical_section: AtomicBool,
}

impl<L: LowPowerCounter, O: Oscillator> LpTimer<L, O> {
    const COUNTER_MASK: u32 = (1 << L::WIDTH) - 1;

    pub const fn new(rtc: L, lf_clock: O, config: LpTimerConfig) -> Self {
        assert!(L::WIDTH > 0 && L::WIDTH < 32);
        assert!(config.user_channel < L::NUM_COMPARE_CHANNELS);
        assert!(config.sync_channel < L::NUM_COMPARE_CHANNELS);
        assert!(config.user_channel != config.sync_channel);

        Self {
            rtc,
            lf_clock,
            config,
            overflow: OverflowCounter::new(),
            alarms: [Alarm::new(), Alarm::new()],
            critical_section: AtomicBool::new(false),
        }
    }

    /// Starts the low-frequency clock and the counter.
    ///
    /// Blocks until the clock is stable.
    pub fn init(&self) {
        self.lf_clock.start();
        while !self.lf_clock.is_running() {
            spin_loop();
        }

        self.rtc.stop();
        self.rtc.clear();
        self.rtc.clear_overflow();
        self.overflow.reset();
        for channel in [self.config.user_channel, self.config.sync_channel] {
            self.rtc.disable_compare_interrupt(channel);
            self.rtc.disable_compare_event(channel);
            self.rtc.clear_compare(channel);
        }

        self.overflow.enable_interrupt(&self.rtc);
        self.rtc.unmask_interrupt();
        self.rtc.start();

        debug!("low-power timer started");
    }

    /// Disarms both alarms, stops the counter and the low-frequency clock.
    pub fn deinit(&self) {
        self.stop();
        self.sync_stop();

        self.rtc.mask_interrupt();
        self.overflow.disable_interrupt(&self.rtc);
        self.rtc.stop();
        self.rtc.clear_overflow();
        self.overflow.reset();
        self.lf_clock.stop();

        debug!("low-power timer stopped");
    }

    /// The overflow-protected tick of the counter.
    ///
    /// May be called from any context.
    pub fn now_tick(&self) -> u64 {
        // An overflow between reading the overflow count and the counter
        // shows up as a changed overflow count on the second read. The
        // second counter read is then consistent with the second count.
        let overflows1 = self.overflow.get(&self.rtc);
        compiler_fence(Ordering::SeqCst);
        let counter1 = self.rtc.counter();
        compiler_fence(Ordering::SeqCst);
        let overflows2 = self.overflow.get(&self.rtc);
        compiler_fence(Ordering::SeqCst);
        let counter2 = self.rtc.counter();

        let (overflows, counter) = if overflows1 == overflows2 {
            (overflows1, counter1)
        } else {
            (overflows2, counter2)
        };

        (overflows as u64) << L::WIDTH | (counter & Self::COUNTER_MASK) as u64
    }

    /// The current absolute time.
    ///
    /// Never regresses for any single observer. May be called from any
    /// context.
    pub fn time_get(&self) -> UsInstant {
        UsInstant::from_ticks(TickConversion::<L>::ticks_to_us(self.now_tick()))
    }

    /// Timer granularity in microseconds.
    pub fn granularity_get(&self) -> u32 {
        TickConversion::<L>::granularity_us()
    }

    /// Arms the user alarm at `t0 + dt`, both in microseconds.
    ///
    /// Replaces any alarm set before. `t0 + dt` may wrap around 32 bits and
    /// must lie within 2^31 microseconds of now. A target in the past or too
    /// close to now to be scheduled safely fires immediately.
    pub fn start(&self, t0: u32, dt: u32) {
        self.arm(AlarmRole::User, t0, dt);
    }

    /// Disarms the user alarm. Idempotent.
    ///
    /// An alarm firing concurrently may still call back once.
    pub fn stop(&self) {
        self.disarm(AlarmRole::User);
    }

    /// Whether the user alarm is armed.
    pub fn is_running(&self) -> bool {
        self.alarm(AlarmRole::User).is_armed()
    }

    /// Arms the sync alarm at the earliest tick that can be scheduled safely
    /// in hardware.
    pub fn sync_start_now(&self) {
        let now = self.time_get().ticks() as u32;
        self.arm(AlarmRole::Sync, now, 0);
    }

    /// Arms the sync alarm at `t0 + dt`.
    ///
    /// The sync alarm must fire from a hardware compare event. A target in the
    /// past or too close to now is postponed to the earliest safe tick.
    pub fn sync_start_at(&self, t0: u32, dt: u32) {
        self.arm(AlarmRole::Sync, t0, dt);
    }

    /// Disarms the sync alarm. Idempotent.
    pub fn sync_stop(&self) {
        self.disarm(AlarmRole::Sync);
    }

    /// The absolute time of the compare tick the sync alarm last fired on.
    pub fn sync_time_get(&self) -> UsInstant {
        let tick = self.alarm(AlarmRole::Sync).target();
        UsInstant::from_ticks(TickConversion::<L>::ticks_to_us(tick))
    }

    /// The hardware event published when the sync alarm fires.
    pub fn sync_event_get(&self) -> EventHandle {
        self.rtc.compare_event(self.config.sync_channel)
    }

    /// Suppresses user alarm callbacks without disarming the alarm.
    ///
    /// Not reentrant.
    pub fn critical_section_enter(&self) {
        let was_entered = self.critical_section.swap(true, Ordering::Acquire);
        debug_assert!(!was_entered);
        self.rtc.disable_compare_interrupt(self.config.user_channel);
    }

    /// Re-enables user alarm callbacks. An alarm that came due while inside
    /// the critical section fires right away.
    pub fn critical_section_exit(&self) {
        let was_entered = self.critical_section.swap(false, Ordering::Release);
        debug_assert!(was_entered);

        let alarm = self.alarm(AlarmRole::User);
        if !alarm.is_armed() {
            return;
        }

        self.rtc.enable_compare_interrupt(self.config.user_channel);
        if alarm.is_forced() || alarm.target() <= self.now_tick() {
            self.rtc.pend_interrupt();
        }
    }

    /// Services the counter's interrupt.
    ///
    /// Called exclusively from interrupt context.
    pub fn on_interrupt(&self) -> Fired {
        if self.rtc.is_overflow_pending() {
            let _ = self.overflow.try_resolve(&self.rtc);
        }

        let mut fired = Fired::default();
        for role in [AlarmRole::User, AlarmRole::Sync] {
            let channel = self.channel(role);
            if self.rtc.is_compare_pending(channel) {
                self.rtc.clear_compare(channel);
            }

            let alarm = self.alarm(role);
            if !alarm.is_armed() {
                continue;
            }

            if role == AlarmRole::User && self.critical_section.load(Ordering::Relaxed) {
                continue;
            }

            // The compare channel matches once per counter period. Only the
            // match in the target period counts.
            if !alarm.is_forced() && alarm.target() > self.now_tick() {
                continue;
            }

            if !alarm.try_disarm() {
                continue;
            }

            self.rtc.disable_compare_interrupt(channel);
            if role == AlarmRole::Sync {
                self.rtc.disable_compare_event(channel);
            }

            match role {
                AlarmRole::User => fired.user = true,
                AlarmRole::Sync => fired.sync = true,
            }
        }

        fired
    }

    fn alarm(&self, role: AlarmRole) -> &Alarm {
        &self.alarms[role as usize]
    }

    fn channel(&self, role: AlarmRole) -> usize {
        match role {
            AlarmRole::User => self.config.user_channel,
            AlarmRole::Sync => self.config.sync_channel,
        }
    }

    fn arm(&self, role: AlarmRole, t0: u32, dt: u32) {
        let channel = self.channel(role);
        let alarm = self.alarm(role);

        // Take ownership of the alarm away from interrupt context.
        alarm.state.store(AlarmState::Arming as u8, Ordering::Relaxed);
        compiler_fence(Ordering::SeqCst);
        self.rtc.disable_compare_interrupt(channel);
        self.rtc.disable_compare_event(channel);

        let now_us = self.time_get().ticks();
        let target_us = convert_to_64bit(t0, dt, now_us);
        let mut target = TickConversion::<L>::us_to_ticks(target_us);

        let mut forced = false;
        loop {
            let earliest = self.now_tick() + self.config.guard_ticks as u64 + 1;
            if target < earliest {
                match role {
                    AlarmRole::User => {
                        trace!("user alarm forced");
                        forced = true;
                    }
                    AlarmRole::Sync => target = earliest,
                }
            }

            alarm.set_target(target);
            self.rtc.clear_compare(channel);
            self.rtc.set_compare(channel, target as u32 & Self::COUNTER_MASK);

            // The counter may have advanced into the guard interval while the
            // compare value was being written.
            if forced || target > self.now_tick() + self.config.guard_ticks as u64 {
                break;
            }
            if role == AlarmRole::User {
                forced = true;
                break;
            }
        }
        alarm.forced.store(forced, Ordering::Relaxed);

        // Transfer ownership to interrupt context.
        compiler_fence(Ordering::Release);
        alarm.state.store(AlarmState::Armed as u8, Ordering::Release);

        if role == AlarmRole::Sync {
            self.rtc.enable_compare_event(channel);
        }
        if role == AlarmRole::User && self.critical_section.load(Ordering::Relaxed) {
            // Delivered when leaving the critical section.
            return;
        }
        self.rtc.enable_compare_interrupt(channel);
        if forced {
            self.rtc.pend_interrupt();
        }
    }

    fn disarm(&self, role: AlarmRole) {
        let channel = self.channel(role);
        let alarm = self.alarm(role);

        alarm.state.store(AlarmState::Idle as u8, Ordering::Release);
        self.rtc.disable_compare_interrupt(channel);
        if role == AlarmRole::Sync {
            self.rtc.disable_compare_event(channel);
        }
    }
}

// Compile-time conversion tests for a 32768 Hz counter.
#[cfg(test)]
const _: () = {
    use crate::driver::socs::sim::SimRtc;

    type Conversion = TickConversion<SimRtc<'static>>;

    assert!(Conversion::ticks_to_us(0) == 0);
    assert!(Conversion::ticks_to_us(1) == 30);
    assert!(Conversion::ticks_to_us(32_768) == 1_000_000);
    assert!(Conversion::ticks_to_us(1 << 24) == 512_000_000);
    assert!(Conversion::us_to_ticks(0) == 0);
    assert!(Conversion::us_to_ticks(1) == 1);
    assert!(Conversion::us_to_ticks(30) == 1);
    assert!(Conversion::us_to_ticks(31) == 2);
    assert!(Conversion::us_to_ticks(1_000_000) == 32_768);
    assert!(Conversion::granularity_us() == 31);
};

#[cfg(test)]
mod tests {
    use core::sync::atomic::AtomicUsize;
    use std::thread;

    use super::*;
    use crate::driver::{
        socs::sim::{SimHardware, SimRtc, SimTimerDomain},
        timer::{TimerConfig, TimerHooks},
    };

    const TICK_NS: u64 = 3_906_250 / 128;
    const WRAP_US: u64 = 512_000_000;

    fn now_u32(domain: &SimTimerDomain<'_>) -> u32 {
        domain.time_get().ticks() as u32
    }

    #[test]
    fn converts_to_64bit() {
        let now = 5 << 32 | 0x1000;

        assert_eq!(convert_to_64bit(0x1000, 0, now), now);
        assert_eq!(convert_to_64bit(0x1000, 500, now), now + 500);
        assert_eq!(convert_to_64bit(0x0800, 0, now), now - 0x800);

        // The 32 bit sum wraps into the next epoch.
        let now = 5 << 32 | 0xffff_ff00;
        assert_eq!(convert_to_64bit(0xffff_ff00, 0x200, now), 6 << 32 | 0x100);

        // The target lies in the previous epoch.
        let now = 5 << 32 | 0x100;
        assert_eq!(convert_to_64bit(0xffff_ff00, 0, now), 4 << 32 | 0xffff_ff00);

        // Largest distances in both directions.
        let now = 5 << 32;
        assert_eq!(convert_to_64bit(0, i32::MAX as u32, now), now + i32::MAX as u64);
        assert_eq!(convert_to_64bit(0, 1 << 31, now), now - (1 << 31));

        // Before the epoch.
        assert_eq!(convert_to_64bit(0xffff_0000, 0, 0x100), 0);

        for (t0, dt, now) in [
            (0u32, 0u32, 0u64),
            (u32::MAX, 1, 3 << 32),
            (12_345, 1_000_000, 7 << 32 | 12_000),
            (0x8000_0000, 0x7fff_ffff, 1 << 40),
        ] {
            let target = convert_to_64bit(t0, dt, now);
            assert_eq!(target as u32, t0.wrapping_add(dt));
            assert!(target.abs_diff(now) <= 1 << 31);
        }
    }

    #[test_log::test]
    fn time_is_exact_across_wraps() {
        let sim = SimHardware::new();
        let domain = sim.domain(TimerHooks::NONE);
        domain.init();

        assert_eq!(domain.time_get().ticks(), 0);

        sim.advance_ns(WRAP_US * 1_000 - TICK_NS * 2);
        let before = domain.time_get().ticks();
        assert!(before < WRAP_US);

        sim.advance_ns(TICK_NS * 4);
        sim.service(&domain);
        let after = domain.time_get().ticks();
        assert!(after > WRAP_US);
        assert!(after - before <= 4 * 31);

        // Full wraps, the last one without servicing the interrupt.
        for _ in 0..3 {
            sim.advance_ns(WRAP_US * 1_000);
            sim.service(&domain);
        }
        sim.advance_ns(WRAP_US * 1_000);
        assert_eq!(domain.time_get().ticks(), after + 4 * WRAP_US);
    }

    #[test_log::test]
    fn time_is_monotonic() {
        let sim = SimHardware::new();
        let domain = sim.domain(TimerHooks::NONE);
        domain.init();

        let mut last = domain.time_get();
        for _ in 0..3_000 {
            sim.advance_ns(400_000_000);
            let now = domain.time_get();
            assert!(now >= last);
            last = now;
            sim.service(&domain);
        }
        assert!(last.ticks() > 2 * WRAP_US);
    }

    #[test_log::test]
    fn time_is_monotonic_with_concurrent_interrupt() {
        let sim = SimHardware::new();
        let domain = sim.domain(TimerHooks::NONE);
        domain.init();
        let done = AtomicBool::new(false);

        thread::scope(|s| {
            s.spawn(|| {
                for _ in 0..20_000 {
                    sim.advance_ns(100_000_000);
                    sim.service(&domain);
                }
                done.store(true, Ordering::Release);
            });

            let mut last = domain.time_get();
            while !done.load(Ordering::Acquire) {
                let now = domain.time_get();
                assert!(now >= last, "{} < {}", now.ticks(), last.ticks());
                last = now;
            }
        });

        assert_eq!(domain.time_get().ticks(), 2_000_000_000);
    }

    #[test_log::test]
    fn reports_granularity() {
        let sim = SimHardware::new();
        let domain = sim.domain(TimerHooks::NONE);
        assert_eq!(domain.lp_timer().granularity_get(), 31);
    }

    #[test_log::test]
    fn fires_alarm_due_now() {
        static FIRED: AtomicUsize = AtomicUsize::new(0);
        fn fired() {
            FIRED.fetch_add(1, Ordering::Relaxed);
        }

        let sim = SimHardware::new();
        let domain = sim.domain(TimerHooks {
            fired: Some(fired),
            synchronized: None,
        });
        domain.init();
        sim.advance_ns(1_000_000_000);

        let lp = domain.lp_timer();
        lp.start(now_u32(&domain), 0);
        assert!(lp.is_running());

        sim.advance_ns(TICK_NS);
        sim.service(&domain);
        assert_eq!(FIRED.load(Ordering::Relaxed), 1);
        assert!(!lp.is_running());

        // Fires only once.
        sim.advance_ns(WRAP_US * 1_000);
        sim.service(&domain);
        assert_eq!(FIRED.load(Ordering::Relaxed), 1);
    }

    #[test_log::test]
    fn fires_alarm_in_past() {
        static FIRED: AtomicUsize = AtomicUsize::new(0);
        fn fired() {
            FIRED.fetch_add(1, Ordering::Relaxed);
        }

        let sim = SimHardware::new();
        let domain = sim.domain(TimerHooks {
            fired: Some(fired),
            synchronized: None,
        });
        domain.init();
        sim.advance_ns(1_000_000_000);

        let now = now_u32(&domain);
        domain.lp_timer().start(now - 10_000, 5_000);
        sim.service(&domain);
        assert_eq!(FIRED.load(Ordering::Relaxed), 1);
    }

    #[test_log::test]
    fn fires_alarm_on_time() {
        static FIRED: AtomicUsize = AtomicUsize::new(0);
        fn fired() {
            FIRED.fetch_add(1, Ordering::Relaxed);
        }

        let sim = SimHardware::new();
        let domain = sim.domain(TimerHooks {
            fired: Some(fired),
            synchronized: None,
        });
        domain.init();
        sim.advance_ns(1_000_000);

        let lp = domain.lp_timer();
        let t0 = now_u32(&domain);
        lp.start(t0, 10_000);

        let mut fired_at = None;
        for _ in 0..1_000 {
            sim.advance_ns(TICK_NS);
            sim.service(&domain);
            if FIRED.load(Ordering::Relaxed) > 0 {
                fired_at = Some(now_u32(&domain));
                break;
            }
        }

        let fired_at = fired_at.expect("alarm did not fire");
        assert!(fired_at >= t0 + 10_000);
        assert!(fired_at <= t0 + 10_000 + lp.granularity_get());
    }

    #[test_log::test]
    fn replaces_alarm() {
        static FIRED: AtomicUsize = AtomicUsize::new(0);
        fn fired() {
            FIRED.fetch_add(1, Ordering::Relaxed);
        }

        let sim = SimHardware::new();
        let domain = sim.domain(TimerHooks {
            fired: Some(fired),
            synchronized: None,
        });
        domain.init();

        let lp = domain.lp_timer();
        let t0 = now_u32(&domain);
        lp.start(t0, 1_000);
        lp.start(t0, 50_000);

        sim.run_for(&domain, 40_000_000, TICK_NS * 8);
        assert_eq!(FIRED.load(Ordering::Relaxed), 0);
        sim.run_for(&domain, 20_000_000, TICK_NS * 8);
        assert_eq!(FIRED.load(Ordering::Relaxed), 1);
    }

    #[test_log::test]
    fn fires_alarm_more_than_one_wrap_ahead() {
        static FIRED: AtomicUsize = AtomicUsize::new(0);
        fn fired() {
            FIRED.fetch_add(1, Ordering::Relaxed);
        }

        let sim = SimHardware::new();
        let domain = sim.domain(TimerHooks {
            fired: Some(fired),
            synchronized: None,
        });
        domain.init();

        let lp = domain.lp_timer();
        let t0 = now_u32(&domain);
        let dt = (WRAP_US + 2_000_000) as u32;
        lp.start(t0, dt);

        // The compare channel matches in the first period already.
        sim.run_for(&domain, 3_000_000_000, 100_000_000);
        assert_eq!(FIRED.load(Ordering::Relaxed), 0);
        assert!(lp.is_running());

        sim.run_for(&domain, (WRAP_US - 2_000_000) * 1_000, 100_000_000);
        assert_eq!(FIRED.load(Ordering::Relaxed), 0);

        sim.run_for(&domain, 2_000_000_000, 1_000_000);
        assert_eq!(FIRED.load(Ordering::Relaxed), 1);
        assert!(domain.time_get().ticks() >= t0 as u64 + dt as u64);
    }

    #[test_log::test]
    fn stop_suppresses_pending_alarm() {
        static FIRED: AtomicUsize = AtomicUsize::new(0);
        fn fired() {
            FIRED.fetch_add(1, Ordering::Relaxed);
        }

        let sim = SimHardware::new();
        let domain = sim.domain(TimerHooks {
            fired: Some(fired),
            synchronized: None,
        });
        domain.init();

        let lp = domain.lp_timer();

        // Stopped before the interrupt becomes pending.
        lp.start(now_u32(&domain), 1_000);
        lp.stop();
        lp.stop();
        sim.run_for(&domain, 5_000_000, TICK_NS);
        assert_eq!(FIRED.load(Ordering::Relaxed), 0);

        // Stopped while the interrupt is already pending.
        lp.start(now_u32(&domain), 1_000);
        sim.advance_ns(2_000_000);
        assert!(sim.is_lp_interrupt_pending());
        lp.stop();
        sim.service(&domain);
        assert_eq!(FIRED.load(Ordering::Relaxed), 0);
        assert!(!lp.is_running());
    }

    #[test_log::test]
    fn critical_section_defers_alarm() {
        static FIRED: AtomicUsize = AtomicUsize::new(0);
        fn fired() {
            FIRED.fetch_add(1, Ordering::Relaxed);
        }

        let sim = SimHardware::new();
        let domain = sim.domain(TimerHooks {
            fired: Some(fired),
            synchronized: None,
        });
        domain.init();

        let lp = domain.lp_timer();
        lp.start(now_u32(&domain), 1_000);

        lp.critical_section_enter();
        sim.run_for(&domain, 5_000_000, TICK_NS);
        assert_eq!(FIRED.load(Ordering::Relaxed), 0);
        assert!(lp.is_running());

        lp.critical_section_exit();
        sim.service(&domain);
        assert_eq!(FIRED.load(Ordering::Relaxed), 1);

        // Arming while inside is deferred as well.
        lp.critical_section_enter();
        lp.start(now_u32(&domain), 0);
        sim.service(&domain);
        assert_eq!(FIRED.load(Ordering::Relaxed), 1);
        lp.critical_section_exit();
        sim.service(&domain);
        assert_eq!(FIRED.load(Ordering::Relaxed), 2);
    }

    #[test_log::test]
    fn critical_section_masks_user_alarm_only() {
        let sim = SimHardware::new();
        let domain = sim.domain(TimerHooks::NONE);
        domain.init();

        let lp = domain.lp_timer();
        lp.critical_section_enter();
        lp.sync_start_at(now_u32(&domain), 2_000);
        sim.run_for(&domain, 3_000_000, TICK_NS);
        lp.critical_section_exit();

        let sync_time = lp.sync_time_get().ticks();
        assert!(sync_time >= 2_000);
        assert!(sync_time < 2_000 + 31);
    }

    #[test_log::test]
    fn clamps_sync_alarm_to_earliest_safe_tick() {
        let sim = SimHardware::new();
        let domain = sim.domain(TimerHooks::NONE);
        domain.init();
        sim.advance_ns(1_000_000);

        let lp = domain.lp_timer();
        let now_tick = lp.now_tick();
        lp.sync_start_at(now_u32(&domain) - 100, 0);
        sim.run_for(&domain, 1_000_000, TICK_NS);

        let expected = now_tick + TimerConfig::DEFAULT.lp.guard_ticks as u64 + 1;
        assert_eq!(
            lp.sync_time_get().ticks(),
            TickConversion::<SimRtc<'static>>::ticks_to_us(expected)
        );
        assert_eq!(sim.rtc_compare_events_routed(), 1);
    }

    #[test_log::test]
    fn deinit_disarms_alarms() {
        static FIRED: AtomicUsize = AtomicUsize::new(0);
        fn fired() {
            FIRED.fetch_add(1, Ordering::Relaxed);
        }

        let sim = SimHardware::new();
        let domain = sim.domain(TimerHooks {
            fired: Some(fired),
            synchronized: None,
        });
        domain.init();

        let lp = domain.lp_timer();
        lp.start(now_u32(&domain), 10_000);
        domain.deinit();
        assert!(!lp.is_running());
        sim.run_for(&domain, 20_000_000, TICK_NS);
        assert_eq!(FIRED.load(Ordering::Relaxed), 0);
    }

    #[test_log::test]
    fn time_get_after_deinit_keeps_overflow_interrupt_off() {
        let sim = SimHardware::new();
        let domain = sim.domain(TimerHooks::NONE);
        domain.init();

        let lp = domain.lp_timer();
        let _ = lp.time_get();
        assert!(sim.is_overflow_interrupt_enabled());

        domain.deinit();
        assert!(!sim.is_overflow_interrupt_enabled());
        let _ = lp.time_get();
        assert!(!sim.is_overflow_interrupt_enabled());

        domain.init();
        assert!(sim.is_overflow_interrupt_enabled());
    }
}
