//! Timer coordinator: correlates the low-power and high-precision timers and
//! converts high-precision captures into absolute timestamps.
//!
//! The coordinator periodically fires the low-power sync alarm. The alarm's
//! compare event is routed across the event fabric to the high-precision
//! sync capture task, so both clocks are latched at the same physical
//! instant. The resulting pair of readings is a [`SyncPoint`].
//!
//! Between two sync points the coordinator compares the elapsed time as seen
//! by both clocks. The difference is the drift of the high-precision clock,
//! measured in parts per time base (PPTB, see [`CoordConfig::time_base`]) and
//! smoothed by an exponentially weighted moving average.
//!
//! An event timestamp is the time elapsed on the high-precision clock since
//! the last sync point, corrected for drift, added to the sync point's
//! absolute time.

use core::sync::atomic::{AtomicBool, Ordering};

use super::{
    CoordConfig, EventFabric, EventHandle, FabricConfig, HighPrecisionCounter, LowPowerCounter,
    Oscillator, TaskHandle, UsInstant, hp_timer::HpTimer, lp_timer::LpTimer,
};
use crate::util::sync::seq_lock::SeqLock;

/// Both clocks latched at the same physical instant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SyncPoint {
    /// Absolute time of the low-power timer.
    pub lp_time: UsInstant,

    /// Raw high-precision counter value.
    pub hp_time: u32,
}

// Snapshot layout.
const FLAGS: usize = 0;
const LP_TIME_LO: usize = 1;
const LP_TIME_HI: usize = 2;
const HP_TIME: usize = 3;
const DRIFT: usize = 4;
const NUM_WORDS: usize = 5;

const FLAG_SYNCHRONIZED: u32 = 1 << 0;
const FLAG_DRIFT_KNOWN: u32 = 1 << 1;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct Snapshot {
    sync_point: Option<SyncPoint>,
    drift: Option<i32>,
}

impl Snapshot {
    fn decode(words: [u32; NUM_WORDS]) -> Self {
        let flags = words[FLAGS];
        let sync_point = (flags & FLAG_SYNCHRONIZED != 0).then(|| SyncPoint {
            lp_time: UsInstant::from_ticks(
                (words[LP_TIME_HI] as u64) << 32 | words[LP_TIME_LO] as u64,
            ),
            hp_time: words[HP_TIME],
        });
        let drift = (flags & FLAG_DRIFT_KNOWN != 0).then_some(words[DRIFT] as i32);
        Self { sync_point, drift }
    }

    fn encode(&self) -> [u32; NUM_WORDS] {
        let mut words = [0; NUM_WORDS];
        if let Some(sync_point) = self.sync_point {
            let lp_time = sync_point.lp_time.ticks();
            words[FLAGS] |= FLAG_SYNCHRONIZED;
            words[LP_TIME_LO] = lp_time as u32;
            words[LP_TIME_HI] = (lp_time >> 32) as u32;
            words[HP_TIME] = sync_point.hp_time;
        }
        if let Some(drift) = self.drift {
            words[FLAGS] |= FLAG_DRIFT_KNOWN;
            words[DRIFT] = drift as u32;
        }
        words
    }
}

/// Divides, rounding half away from zero. `divisor` must be positive.
const fn div_round(dividend: i64, divisor: i64) -> i64 {
    if dividend >= 0 {
        (dividend + divisor / 2) / divisor
    } else {
        (dividend - divisor / 2) / divisor
    }
}

/// Instantaneous drift in PPTB between two sync points.
///
/// Returns `None` if the sync points are less than half a time base apart.
fn drift_sample(previous: SyncPoint, current: SyncPoint, time_base: u32) -> Option<i32> {
    let lp_delta = current.lp_time.ticks().wrapping_sub(previous.lp_time.ticks());
    let hp_delta = current.hp_time.wrapping_sub(previous.hp_time) as u64;

    let periods = (lp_delta + time_base as u64 / 2) / time_base as u64;
    if periods == 0 {
        return None;
    }

    // The drift must stay above -time_base to keep the correction divisor
    // positive. Averages of such samples do too.
    let sample = (hp_delta as i64 - lp_delta as i64) / periods as i64;
    Some(sample.clamp(1 - time_base as i64, i32::MAX as i64) as i32)
}

/// Exponentially weighted moving average of drift samples.
fn smooth(previous: Option<i32>, sample: i32, weight: u32) -> i32 {
    match previous {
        None => sample,
        Some(previous) => {
            let weight = weight as i64;
            ((previous as i64 * (weight - 1) + sample as i64) / weight) as i32
        }
    }
}

/// Converts a high-precision capture into an absolute timestamp relative to a
/// sync point.
fn correct(sync_point: SyncPoint, drift: i32, hp_timestamp: u32, time_base: u32) -> UsInstant {
    // Events may be captured shortly before the sync point they are
    // converted with.
    let hp_delta = hp_timestamp.wrapping_sub(sync_point.hp_time) as i32 as i64;
    let correction = div_round(drift as i64 * hp_delta, time_base as i64 + drift as i64);

    let lp_time = sync_point.lp_time.ticks();
    UsInstant::from_ticks(lp_time.saturating_add_signed(hp_delta - correction))
}

/// Correlates the low-power and high-precision timers.
///
/// Sync points and the drift estimate are only written from the low-power
/// timer interrupt (or from scheduling context while that interrupt cannot
/// fire a sync alarm). They are read through a sequence lock from any
/// context.
pub struct TimerCoord {
    config: CoordConfig,
    fabric_config: FabricConfig,

    /// Set between [`TimerCoord::start()`] and [`TimerCoord::stop()`].
    running: AtomicBool,

    /// The next resync is the first one after start.
    first_resync: AtomicBool,

    snapshot: SeqLock<NUM_WORDS>,
}

impl TimerCoord {
    pub const fn new(config: CoordConfig, fabric_config: FabricConfig) -> Self {
        assert!(config.time_base > 0 && config.time_base <= i32::MAX as u32);
        assert!(config.ewma_weight > 0);
        assert!(fabric_config.sync_channel != fabric_config.timestamp_channel);

        Self {
            config,
            fabric_config,
            running: AtomicBool::new(false),
            first_resync: AtomicBool::new(false),
            snapshot: SeqLock::new(),
        }
    }

    /// Routes the low-power sync event to the high-precision sync capture
    /// task.
    pub fn init<F: EventFabric>(&self, fabric: &F, sync_event: EventHandle, sync_task: TaskHandle) {
        fabric.connect(self.fabric_config.sync_channel, sync_event, sync_task, None);
        fabric.enable(self.fabric_config.sync_channel);
    }

    /// Disconnects the fabric and forgets sync point and drift estimate.
    pub fn deinit<F: EventFabric>(&self, fabric: &F) {
        fabric.disconnect(self.fabric_config.sync_channel);
        fabric.disconnect(self.fabric_config.timestamp_channel);
        self.snapshot.write(Snapshot::default().encode());
    }

    /// Starts the high-precision timer and synchronizes it as soon as
    /// possible.
    pub fn start<L, LO, H, HO>(&self, lp: &LpTimer<L, LO>, hp: &HpTimer<H, HO>)
    where
        L: LowPowerCounter,
        LO: Oscillator,
        H: HighPrecisionCounter,
        HO: Oscillator,
    {
        // Keep the drift estimate, the clocks did not change.
        let drift = self.snapshot().drift;
        self.snapshot.write(
            Snapshot {
                sync_point: None,
                drift,
            }
            .encode(),
        );

        self.first_resync.store(true, Ordering::Relaxed);
        self.running.store(true, Ordering::Release);

        hp.start();
        hp.sync_prepare();
        lp.sync_start_now();
    }

    /// Stops the high-precision timer. Timestamps are unavailable until the
    /// next [`TimerCoord::start()`] synchronized again.
    pub fn stop<L, LO, H, HO>(&self, lp: &LpTimer<L, LO>, hp: &HpTimer<H, HO>)
    where
        L: LowPowerCounter,
        LO: Oscillator,
        H: HighPrecisionCounter,
        HO: Oscillator,
    {
        self.running.store(false, Ordering::Release);
        lp.sync_stop();
        hp.stop();

        let drift = self.snapshot().drift;
        self.snapshot.write(
            Snapshot {
                sync_point: None,
                drift,
            }
            .encode(),
        );
    }

    /// Processes a fired sync alarm and schedules the next one.
    ///
    /// Returns `true` if a new sync point was published.
    ///
    /// Called exclusively from the low-power timer interrupt.
    pub fn on_sync_alarm<L, LO, H, HO>(&self, lp: &LpTimer<L, LO>, hp: &HpTimer<H, HO>) -> bool
    where
        L: LowPowerCounter,
        LO: Oscillator,
        H: HighPrecisionCounter,
        HO: Oscillator,
    {
        if !self.running.load(Ordering::Acquire) {
            return false;
        }

        let Some(hp_time) = hp.sync_time_get() else {
            warn!("sync capture missing, retrying");
            hp.sync_prepare();
            lp.sync_start_now();
            return false;
        };

        let current = SyncPoint {
            lp_time: lp.sync_time_get(),
            hp_time,
        };

        let previous = self.snapshot();
        let mut drift = previous.drift;
        if let Some(previous_sync_point) = previous.sync_point {
            if let Some(sample) = drift_sample(previous_sync_point, current, self.config.time_base)
            {
                drift = Some(smooth(drift, sample, self.config.ewma_weight));
            }
        }

        self.snapshot.write(
            Snapshot {
                sync_point: Some(current),
                drift,
            }
            .encode(),
        );

        debug!(
            "synchronized at {} us (hp: {}), drift: {}",
            current.lp_time.ticks(),
            current.hp_time,
            drift.unwrap_or(0)
        );

        hp.sync_prepare();
        let delay = if self.first_resync.swap(false, Ordering::Relaxed) {
            self.config.first_resync_delay
        } else {
            self.config.resync_interval
        };
        lp.sync_start_at(current.lp_time.ticks() as u32, delay);

        true
    }

    /// Routes the first occurrence of `event` to the high-precision timestamp
    /// capture task. Later occurrences are ignored.
    pub fn timestamp_prepare<F, H, HO>(&self, fabric: &F, hp: &HpTimer<H, HO>, event: EventHandle)
    where
        F: EventFabric,
        H: HighPrecisionCounter,
        HO: Oscillator,
    {
        let FabricConfig {
            timestamp_channel,
            timestamp_group,
            ..
        } = self.fabric_config;

        fabric.disable(timestamp_channel);
        hp.timestamp_prepare();

        fabric.connect(
            timestamp_channel,
            event,
            hp.timestamp_task_get(),
            Some(fabric.group_disable_task(timestamp_group)),
        );
        fabric.clear_group(timestamp_group);
        fabric.include_in_group(timestamp_channel, timestamp_group);
        fabric.enable(timestamp_channel);
    }

    /// The absolute time of the event captured since
    /// [`TimerCoord::timestamp_prepare()`].
    ///
    /// Returns `None` while unsynchronized or if the event did not occur.
    pub fn timestamp_get<H, HO>(&self, hp: &HpTimer<H, HO>) -> Option<UsInstant>
    where
        H: HighPrecisionCounter,
        HO: Oscillator,
    {
        let snapshot = self.snapshot();
        let sync_point = snapshot.sync_point?;
        let hp_timestamp = hp.timestamp_get()?;
        Some(correct(
            sync_point,
            snapshot.drift.unwrap_or(0),
            hp_timestamp,
            self.config.time_base,
        ))
    }

    pub fn is_synchronized(&self) -> bool {
        self.snapshot().sync_point.is_some()
    }

    /// The drift estimate in PPTB, once known.
    pub fn drift_get(&self) -> Option<i32> {
        self.snapshot().drift
    }

    /// The current sync point, if synchronized.
    pub fn sync_point_get(&self) -> Option<SyncPoint> {
        self.snapshot().sync_point
    }

    // A snapshot that cannot be read consistently is reported as
    // unsynchronized.
    fn snapshot(&self) -> Snapshot {
        self.snapshot
            .try_read()
            .map(Snapshot::decode)
            .unwrap_or_default()
    }
}
