use core::sync::atomic::{AtomicU32, Ordering, fence};

/// Number of attempts a reader makes before giving up on a snapshot that is
/// being written concurrently.
const MAX_READ_ATTEMPTS: usize = 2;

/// Single-writer, multi-reader sequence lock over a fixed number of words.
///
/// Readers never block: they either observe a consistent snapshot of all
/// words or give up. The writer never waits for readers.
///
/// Only a single context may write at a time. Writes must therefore be
/// serialized externally (e.g. by only writing from a single interrupt
/// handler).
pub struct SeqLock<const N: usize> {
    /// Odd while a write is in progress.
    sequence: AtomicU32,
    words: [AtomicU32; N],
}

impl<const N: usize> SeqLock<N> {
    #[allow(clippy::declare_interior_mutable_const)]
    const ZERO: AtomicU32 = AtomicU32::new(0);

    pub const fn new() -> Self {
        Self {
            sequence: AtomicU32::new(0),
            words: [Self::ZERO; N],
        }
    }

    /// Publishes a new snapshot.
    pub fn write(&self, words: [u32; N]) {
        let sequence = self.sequence.load(Ordering::Relaxed);
        debug_assert!(sequence % 2 == 0);

        self.sequence.store(sequence.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);

        for (word, value) in self.words.iter().zip(words) {
            word.store(value, Ordering::Relaxed);
        }

        self.sequence
            .store(sequence.wrapping_add(2), Ordering::Release);
    }

    /// Reads a consistent snapshot.
    ///
    /// Returns `None` if a writer interfered with every attempt.
    pub fn try_read(&self) -> Option<[u32; N]> {
        for _ in 0..MAX_READ_ATTEMPTS {
            let before = self.sequence.load(Ordering::Acquire);
            if before % 2 == 1 {
                continue;
            }

            let words = core::array::from_fn(|i| self.words[i].load(Ordering::Relaxed));

            fence(Ordering::Acquire);
            let after = self.sequence.load(Ordering::Relaxed);
            if before == after {
                return Some(words);
            }
        }

        None
    }
}

impl<const N: usize> Default for SeqLock<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::atomic::AtomicBool, thread};

    use super::*;

    #[test]
    fn reads_last_write() {
        let lock = SeqLock::<3>::new();
        assert_eq!(lock.try_read(), Some([0, 0, 0]));

        lock.write([1, 2, 3]);
        assert_eq!(lock.try_read(), Some([1, 2, 3]));

        lock.write([4, 5, 6]);
        assert_eq!(lock.try_read(), Some([4, 5, 6]));
    }

    #[test]
    fn gives_up_during_write() {
        let lock = SeqLock::<2>::new();
        lock.write([7, 7]);

        // A writer preempted mid-update.
        lock.sequence.fetch_add(1, Ordering::Relaxed);
        assert_eq!(lock.try_read(), None);

        lock.sequence.fetch_add(1, Ordering::Relaxed);
        assert_eq!(lock.try_read(), Some([7, 7]));
    }

    #[test]
    fn never_observes_torn_snapshot() {
        let lock = SeqLock::<4>::new();
        let done = AtomicBool::new(false);

        thread::scope(|s| {
            s.spawn(|| {
                for i in 0..100_000u32 {
                    lock.write([i; 4]);
                }
                done.store(true, Ordering::Release);
            });

            let mut snapshots = 0;
            while !done.load(Ordering::Acquire) {
                if let Some(words) = lock.try_read() {
                    assert!(words.iter().all(|&w| w == words[0]), "{words:?}");
                    snapshots += 1;
                }
            }
            assert!(snapshots > 0 || lock.try_read().is_some());
        });

        assert_eq!(lock.try_read(), Some([99_999; 4]));
    }
}
