//! Clock sources of nRF SoCs.

use nrf_pac::{
    CLOCK,
    clock::vals::{HfclkstatSrc, Lfclksrc},
};

use crate::driver::timer::Oscillator;

/// The external high-frequency crystal oscillator, required by the radio
/// and the TIMER peripherals' accuracy.
pub struct NrfHfClock;

impl Oscillator for NrfHfClock {
    fn start(&self) {
        CLOCK.events_hfclkstarted().write_value(0);
        CLOCK.tasks_hfclkstart().write_value(0x1);
    }

    fn stop(&self) {
        CLOCK.tasks_hfclkstop().write_value(0x1);
    }

    fn is_running(&self) -> bool {
        CLOCK.events_hfclkstarted().read() == 0x1
            || CLOCK.hfclkstat().read().src() == HfclkstatSrc::XTAL
    }
}

/// The low-frequency clock the RTC runs on. Must run continuously while the
/// timer domain is initialized.
pub struct NrfLfClock {
    pub source: Lfclksrc,
}

impl Oscillator for NrfLfClock {
    fn start(&self) {
        // When debugging, the LF clock may continue to run across restarts.
        self.stop();
        CLOCK.lfclksrc().write(|w| {
            w.set_src(self.source);
            w.set_external(false);
            w.set_bypass(false);
        });
        CLOCK.events_lfclkstarted().write_value(0);
        CLOCK.tasks_lfclkstart().write_value(0x1);
    }

    fn stop(&self) {
        CLOCK.tasks_lfclkstop().write_value(0x1);
    }

    // When connected to an external clock source, this will not become true
    // until the external clock has been started.
    fn is_running(&self) -> bool {
        CLOCK.events_lfclkstarted().read() == 0x1
    }
}
