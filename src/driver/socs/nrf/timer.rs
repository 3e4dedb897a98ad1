//! Timer peripherals of nRF SoCs: RTC0 as the low-power counter, TIMER0 as
//! the high-precision counter and the PPI as event fabric.
//!
//! Resource assignment:
//!
//! - RTC0 CC0: user alarm, RTC0 CC1: sync alarm,
//! - TIMER0 CC0: sync capture, CC1: timestamp capture, CC2: current time,
//! - PPI channels 0 and 1, PPI channel group 0.

use core::sync::atomic::{Ordering, compiler_fence};

use cortex_m::peripheral::{NVIC, Peripherals as CorePeripherals};
use nrf_pac::{
    PPI, RADIO, RTC0, TIMER0,
    clock::vals::Lfclksrc,
    interrupt,
    timer::vals::{Bitmode, Mode},
};

use super::clock::{NrfHfClock, NrfLfClock};
use crate::driver::timer::{
    EventFabric, EventHandle, HighPrecisionCounter, LowPowerCounter, TaskHandle, TimerConfig,
    TimerHooks, domain::TimerDomain,
};

/// RTC0 interrupt priority, in the upper three bits as expected by the NVIC.
/// High enough to preempt scheduling context.
const RTC_INT_PRIO: u8 = 1 << 5;

pub struct NrfRtc;

impl LowPowerCounter for NrfRtc {
    const WIDTH: u32 = 24;
    const FREQUENCY_HZ: u32 = 32_768;
    const NUM_COMPARE_CHANNELS: usize = 3;

    fn start(&self) {
        // The prescaler can only be written while the RTC is stopped.
        RTC0.prescaler().write(|w| w.set_prescaler(0));
        RTC0.tasks_start().write_value(0x1);
        while RTC0.counter().read().counter() == 0 {}
    }

    fn stop(&self) {
        RTC0.tasks_stop().write_value(0x1);
    }

    fn clear(&self) {
        RTC0.tasks_clear().write_value(0x1);
        while RTC0.counter().read().counter() != 0 {}
    }

    fn counter(&self) -> u32 {
        RTC0.counter().read().counter()
    }

    fn set_compare(&self, channel: usize, tick: u32) {
        RTC0.cc(channel).write(|w| w.set_compare(tick & 0xFFFFFF));
    }

    fn enable_compare_interrupt(&self, channel: usize) {
        compiler_fence(Ordering::Release);
        RTC0.intenset().write(|w| w.set_compare(channel, true));
    }

    fn disable_compare_interrupt(&self, channel: usize) {
        RTC0.intenclr().write(|w| w.set_compare(channel, true));
        compiler_fence(Ordering::Acquire);
    }

    fn enable_compare_event(&self, channel: usize) {
        RTC0.evtenset().write(|w| w.set_compare(channel, true));
    }

    fn disable_compare_event(&self, channel: usize) {
        RTC0.evtenclr().write(|w| w.set_compare(channel, true));
    }

    fn is_compare_pending(&self, channel: usize) -> bool {
        RTC0.events_compare(channel).read() == 0x1
    }

    fn clear_compare(&self, channel: usize) {
        RTC0.events_compare(channel).write_value(0);
    }

    fn compare_event(&self, channel: usize) -> EventHandle {
        EventHandle(RTC0.events_compare(channel).as_ptr() as u32)
    }

    fn is_overflow_pending(&self) -> bool {
        RTC0.events_ovrflw().read() == 0x1
    }

    fn clear_overflow(&self) {
        RTC0.events_ovrflw().write_value(0);
    }

    fn enable_overflow_interrupt(&self) {
        RTC0.intenset().write(|w| w.set_ovrflw(true));
    }

    fn disable_overflow_interrupt(&self) {
        RTC0.intenclr().write(|w| w.set_ovrflw(true));
    }

    fn mask_interrupt(&self) {
        NVIC::mask(interrupt::RTC0);
    }

    fn unmask_interrupt(&self) {
        // Safety: We don't rely on priority masking for synchronization.
        let mut nvic = unsafe { CorePeripherals::steal() }.NVIC;
        unsafe { nvic.set_priority(interrupt::RTC0, RTC_INT_PRIO) };
        NVIC::unpend(interrupt::RTC0);

        // Safety: We don't rely on interrupt masking for synchronization.
        unsafe { NVIC::unmask(interrupt::RTC0) };
    }

    fn pend_interrupt(&self) {
        NVIC::pend(interrupt::RTC0);
    }
}

pub struct NrfTimer;

impl HighPrecisionCounter for NrfTimer {
    const FREQUENCY_HZ: u32 = 1_000_000;
    const NUM_CAPTURE_CHANNELS: usize = 4;

    fn start(&self) {
        TIMER0.tasks_stop().write_value(0x1);
        TIMER0.mode().write(|w| w.set_mode(Mode::TIMER));
        TIMER0.bitmode().write(|w| w.set_bitmode(Bitmode::_32BIT));
        // 16 MHz / 2^4 = 1 MHz
        TIMER0.prescaler().write(|w| w.set_prescaler(4));
        TIMER0.tasks_clear().write_value(0x1);
        TIMER0.tasks_start().write_value(0x1);
    }

    fn stop(&self) {
        TIMER0.tasks_stop().write_value(0x1);
        TIMER0.tasks_clear().write_value(0x1);
    }

    fn capture(&self, channel: usize) -> u32 {
        TIMER0.tasks_capture(channel).write_value(0x1);
        TIMER0.cc(channel).read()
    }

    fn read_capture(&self, channel: usize) -> u32 {
        TIMER0.cc(channel).read()
    }

    fn capture_task(&self, channel: usize) -> TaskHandle {
        TaskHandle(TIMER0.tasks_capture(channel).as_ptr() as u32)
    }
}

pub struct NrfPpi;

impl EventFabric for NrfPpi {
    // Channels 20-31 are pre-programmed.
    const NUM_CHANNELS: usize = 20;
    const NUM_GROUPS: usize = 6;

    fn connect(
        &self,
        channel: usize,
        event: EventHandle,
        task: TaskHandle,
        fork: Option<TaskHandle>,
    ) {
        let ch = PPI.ch(channel);
        ch.eep().write_value(event.0);
        ch.tep().write_value(task.0);
        PPI.fork(channel)
            .tep()
            .write_value(fork.map_or(0, |fork| fork.0));
    }

    fn disconnect(&self, channel: usize) {
        self.disable(channel);
        let ch = PPI.ch(channel);
        ch.eep().write_value(0);
        ch.tep().write_value(0);
        PPI.fork(channel).tep().write_value(0);
    }

    fn enable(&self, channel: usize) {
        PPI.chenset().write(|w| w.set_ch(channel, true));
    }

    fn disable(&self, channel: usize) {
        PPI.chenclr().write(|w| w.set_ch(channel, true));
    }

    fn clear_group(&self, group: usize) {
        PPI.chg(group).write(|w| w.0 = 0);
    }

    fn include_in_group(&self, channel: usize, group: usize) {
        PPI.chg(group).modify(|w| w.set_ch(channel, true));
    }

    fn group_disable_task(&self, group: usize) -> TaskHandle {
        TaskHandle(PPI.tasks_chg(group).dis().as_ptr() as u32)
    }
}

pub type NrfTimerDomain = TimerDomain<NrfRtc, NrfLfClock, NrfTimer, NrfHfClock, NrfPpi>;

impl NrfTimerDomain {
    /// Creates the timer domain of an nRF52840 clocked by the LF crystal.
    ///
    /// The domain must live in a `static` and the RTC0 interrupt must be bound
    /// to it:
    ///
    /// ```ignore
    /// static TIMER: NrfTimerDomain = NrfTimerDomain::nrf52840(HOOKS);
    ///
    /// #[interrupt]
    /// fn RTC0() {
    ///     TIMER.on_lp_timer_interrupt();
    /// }
    /// ```
    pub const fn nrf52840(hooks: TimerHooks) -> Self {
        Self::new(
            NrfRtc,
            NrfLfClock {
                source: Lfclksrc::XTAL,
            },
            NrfTimer,
            NrfHfClock,
            NrfPpi,
            TimerConfig::DEFAULT,
            hooks,
        )
    }
}

/// The radio frame start event, for timestamping received frames.
pub fn radio_framestart_event() -> EventHandle {
    EventHandle(RADIO.events_framestart().as_ptr() as u32)
}
