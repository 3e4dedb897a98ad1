use super::{
    EventFabric, EventHandle, HighPrecisionCounter, LowPowerCounter, Oscillator, TimerConfig,
    TimerHooks, UsInstant, coord::TimerCoord, hp_timer::HpTimer, lp_timer::LpTimer,
};

/// Owns the hybrid timer and the hardware it runs on.
///
/// A domain is `Sync` if its hardware is, so it can be placed in a `static`
/// and shared between scheduling and interrupt context. Its interrupt
/// handler, [`TimerDomain::on_lp_timer_interrupt()`], must be called from
/// the low-power counter's interrupt.
pub struct TimerDomain<L, LO, H, HO, F> {
    lp: LpTimer<L, LO>,
    hp: HpTimer<H, HO>,
    coord: TimerCoord,
    fabric: F,
    hooks: TimerHooks,
}

impl<L, LO, H, HO, F> TimerDomain<L, LO, H, HO, F>
where
    L: LowPowerCounter,
    LO: Oscillator,
    H: HighPrecisionCounter,
    HO: Oscillator,
    F: EventFabric,
{
    /// Creates a timer domain.
    ///
    /// # Panics
    ///
    /// Panics if the configuration is invalid for the given hardware. In a
    /// `static` initializer, this fails compilation instead.
    pub const fn new(
        rtc: L,
        lf_clock: LO,
        timer: H,
        hf_clock: HO,
        fabric: F,
        config: TimerConfig,
        hooks: TimerHooks,
    ) -> Self {
        config.validate::<L, H, F>();

        Self {
            lp: LpTimer::new(rtc, lf_clock, config.lp),
            hp: HpTimer::new(timer, hf_clock, config.hp),
            coord: TimerCoord::new(config.coord, config.fabric),
            fabric,
            hooks,
        }
    }

    /// Starts both oscillators and the low-power timer and wires the sync
    /// event. Blocks until the oscillators are stable.
    pub fn init(&self) {
        self.lp.init();
        self.hp.init();
        self.coord
            .init(&self.fabric, self.lp.sync_event_get(), self.hp.sync_task_get());
        info!("timer domain initialized");
    }

    /// Stops all timers and oscillators and releases the event fabric.
    pub fn deinit(&self) {
        self.stop();
        self.coord.deinit(&self.fabric);
        self.hp.deinit();
        self.lp.deinit();
        info!("timer domain deinitialized");
    }

    /// Starts the high-precision timer and synchronization.
    pub fn start(&self) {
        self.coord.start(&self.lp, &self.hp);
    }

    /// Stops the high-precision timer and synchronization.
    pub fn stop(&self) {
        self.coord.stop(&self.lp, &self.hp);
    }

    /// The current absolute time.
    pub fn time_get(&self) -> UsInstant {
        self.lp.time_get()
    }

    /// Timestamps the next occurrence of `event`.
    pub fn timestamp_prepare(&self, event: EventHandle) {
        self.coord.timestamp_prepare(&self.fabric, &self.hp, event);
    }

    /// The absolute time of the event prepared with
    /// [`TimerDomain::timestamp_prepare()`], if available.
    pub fn timestamp_get(&self) -> Option<UsInstant> {
        self.coord.timestamp_get(&self.hp)
    }

    pub fn lp_timer(&self) -> &LpTimer<L, LO> {
        &self.lp
    }

    pub fn hp_timer(&self) -> &HpTimer<H, HO> {
        &self.hp
    }

    pub fn coord(&self) -> &TimerCoord {
        &self.coord
    }

    /// Services the low-power counter's interrupt and calls back into the
    /// driver.
    ///
    /// Called exclusively from interrupt context.
    pub fn on_lp_timer_interrupt(&self) {
        let fired = self.lp.on_interrupt();

        if fired.sync && self.coord.on_sync_alarm(&self.lp, &self.hp) {
            self.hooks.synchronized();
        }

        if fired.user {
            self.hooks.fired();
        }
    }
}
