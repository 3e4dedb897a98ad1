//! Lock-free overflow counter extending a narrow hardware counter.

use core::{
    hint::spin_loop,
    sync::atomic::{AtomicBool, AtomicU32, Ordering},
};

use super::LowPowerCounter;

/// Counts hardware counter overflows.
///
/// Any context may try to resolve a pending overflow, but only a single
/// writer is active at a time: the writer acquires `lock` with a
/// compare-and-swap. Contexts that fail to acquire the lock never block, they
/// infer the value the writer is about to publish.
///
/// `generation` counts resolution steps. It is even while stable. It is odd
/// while the writer resolves exactly one pending overflow: it is incremented
/// once before the hardware overflow event is cleared and once after. The
/// number of overflows is therefore always `generation / 2`, rounded up while
/// a writer is in flight.
pub struct OverflowCounter {
    lock: AtomicBool,
    generation: AtomicU32,
    /// Whether the writer re-enables the overflow interrupt.
    interrupt_enabled: AtomicBool,
}

impl OverflowCounter {
    pub const fn new() -> Self {
        Self {
            lock: AtomicBool::new(false),
            generation: AtomicU32::new(0),
            interrupt_enabled: AtomicBool::new(false),
        }
    }

    pub fn enable_interrupt<L: LowPowerCounter>(&self, counter: &L) {
        self.interrupt_enabled.store(true, Ordering::SeqCst);
        counter.enable_overflow_interrupt();
    }

    /// Disables the overflow interrupt. Later resolutions keep it disabled.
    pub fn disable_interrupt<L: LowPowerCounter>(&self, counter: &L) {
        self.interrupt_enabled.store(false, Ordering::SeqCst);
        counter.disable_overflow_interrupt();
    }

    /// Forgets all overflows.
    ///
    /// Must only be called while the counter is stopped and its overflow
    /// interrupt is disabled.
    pub fn reset(&self) {
        self.generation.store(0, Ordering::Release);
    }

    /// Returns the number of overflows, including an overflow the hardware
    /// signals but that has not been resolved yet.
    ///
    /// May be called from any context.
    pub fn get<L: LowPowerCounter>(&self, counter: &L) -> u32 {
        match self.try_resolve(counter) {
            Some(generation) => generation / 2,
            None => self.infer(counter),
        }
    }

    /// Resolves a pending hardware overflow if no other context currently
    /// does so.
    ///
    /// Returns the stable generation on success and `None` if another writer
    /// holds the lock.
    ///
    /// Called from the counter's interrupt and from readers.
    pub fn try_resolve<L: LowPowerCounter>(&self, counter: &L) -> Option<u32> {
        if self
            .lock
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return None;
        }

        // Keeps an overflow interrupt of the same priority from re-entering
        // while we hold the lock.
        counter.disable_overflow_interrupt();

        if counter.is_overflow_pending() {
            self.generation.fetch_add(1, Ordering::AcqRel);
            counter.clear_overflow();
            self.generation.fetch_add(1, Ordering::Release);
            trace!("overflow resolved");
        }

        let generation = self.generation.load(Ordering::Relaxed);
        self.lock.store(false, Ordering::Release);

        // Re-enabling the interrupt re-triggers it if another overflow has
        // become pending in between. A concurrent disable_interrupt() wins.
        if self.interrupt_enabled.load(Ordering::SeqCst) {
            counter.enable_overflow_interrupt();
            if !self.interrupt_enabled.load(Ordering::SeqCst) {
                counter.disable_overflow_interrupt();
            }
        }

        Some(generation)
    }

    // Infers the counter value from the writer's progress while it holds the
    // lock.
    fn infer<L: LowPowerCounter>(&self, counter: &L) -> u32 {
        loop {
            let before = self.generation.load(Ordering::Acquire);
            let pending = counter.is_overflow_pending();
            let after = self.generation.load(Ordering::Acquire);

            if before == after {
                return if before % 2 == 1 {
                    // The writer has committed to the pending overflow but
                    // may or may not have cleared the hardware event yet.
                    before.div_ceil(2)
                } else {
                    before / 2 + pending as u32
                };
            }

            // The writer made progress while we were sampling. It cannot
            // make more than two steps per overflow, so this terminates.
            spin_loop();
        }
    }
}

impl Default for OverflowCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::socs::sim::SimHardware;

    const WRAP_NS: u64 = 512_000_000_000;

    #[test_log::test]
    fn counts_resolved_overflows() {
        let sim = SimHardware::new();
        let rtc = sim.rtc();
        let overflow = OverflowCounter::new();
        rtc.start();

        assert_eq!(overflow.get(&rtc), 0);

        sim.advance_ns(WRAP_NS);
        assert!(rtc.is_overflow_pending());
        assert_eq!(overflow.get(&rtc), 1);
        assert!(!rtc.is_overflow_pending());
        assert_eq!(overflow.get(&rtc), 1);

        sim.advance_ns(WRAP_NS);
        assert_eq!(overflow.try_resolve(&rtc), Some(4));
        assert_eq!(overflow.get(&rtc), 2);

        overflow.reset();
        assert_eq!(overflow.get(&rtc), 0);
    }

    #[test_log::test]
    fn infers_pending_overflow_while_locked() {
        let sim = SimHardware::new();
        let rtc = sim.rtc();
        let overflow = OverflowCounter::new();
        rtc.start();
        sim.advance_ns(WRAP_NS);

        // Simulate a writer that acquired the lock but did not yet get to
        // resolve the pending overflow.
        overflow.lock.store(true, Ordering::Relaxed);
        assert_eq!(overflow.try_resolve(&rtc), None);
        assert_eq!(overflow.get(&rtc), 1);
        assert!(rtc.is_overflow_pending());

        // The writer committed but did not clear the event yet.
        overflow.generation.store(1, Ordering::Relaxed);
        assert_eq!(overflow.get(&rtc), 1);

        // The writer cleared the event but did not publish yet.
        rtc.clear_overflow();
        assert_eq!(overflow.get(&rtc), 1);

        // The writer published but did not release the lock yet.
        overflow.generation.store(2, Ordering::Relaxed);
        assert_eq!(overflow.get(&rtc), 1);

        overflow.lock.store(false, Ordering::Relaxed);
        assert_eq!(overflow.get(&rtc), 1);
    }

    #[test_log::test]
    fn writer_keeps_overflow_interrupt_enabled() {
        let sim = SimHardware::new();
        let rtc = sim.rtc();
        let overflow = OverflowCounter::new();
        overflow.enable_interrupt(&rtc);
        rtc.start();
        sim.advance_ns(WRAP_NS);

        assert_eq!(overflow.get(&rtc), 1);
        assert!(sim.is_overflow_interrupt_enabled());
    }

    #[test_log::test]
    fn writer_keeps_overflow_interrupt_disabled() {
        let sim = SimHardware::new();
        let rtc = sim.rtc();
        let overflow = OverflowCounter::new();
        overflow.enable_interrupt(&rtc);
        overflow.disable_interrupt(&rtc);
        rtc.start();
        sim.advance_ns(WRAP_NS);

        assert_eq!(overflow.get(&rtc), 1);
        assert!(!sim.is_overflow_interrupt_enabled());
    }
}
