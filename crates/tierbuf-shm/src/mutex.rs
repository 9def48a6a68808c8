//! FIFO ticket mutex.
//!
//! Two atomic counters in shared memory: acquire takes the next ticket and
//! spins until `serving` reaches it; release advances `serving`. Waiters are
//! served strictly in ticket order across every process attached to the
//! region. The mutex is not reentrant.

use crate::region::ShmValue;
use std::sync::atomic::{AtomicU32, Ordering};

/// A FIFO spinlock whose state lives in a shared region.
#[repr(C)]
pub struct TicketMutex {
    ticket: AtomicU32,
    serving: AtomicU32,
}

// SAFETY: repr(C), two atomics, zero-initialized means unlocked.
unsafe impl ShmValue for TicketMutex {}

impl TicketMutex {
    /// Acquire the mutex, spinning until it is this caller's turn.
    pub fn lock(&self) -> TicketGuard<'_> {
        let ticket = self.ticket.fetch_add(1, Ordering::Relaxed);
        while self.serving.load(Ordering::Acquire) != ticket {
            std::hint::spin_loop();
        }
        TicketGuard { mutex: self }
    }

    /// Whether anyone is currently waiting or holding the mutex. Approximate;
    /// only used for diagnostics.
    #[must_use]
    pub fn is_contended(&self) -> bool {
        self.ticket.load(Ordering::Relaxed) != self.serving.load(Ordering::Relaxed)
    }
}

/// Guard returned by [`TicketMutex::lock`]; releases on drop.
pub struct TicketGuard<'a> {
    mutex: &'a TicketMutex,
}

impl Drop for TicketGuard<'_> {
    fn drop(&mut self) {
        self.mutex.serving.fetch_add(1, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::{ArenaWriter, Region};
    use std::sync::atomic::AtomicU64;
    use std::sync::Arc;

    // The layout test below needs a TicketMutex reachable through a Region;
    // a bare one on the stack works for the exclusion test.
    #[repr(C)]
    struct Shared {
        mutex: TicketMutex,
        counter: AtomicU64,
    }

    unsafe impl ShmValue for Shared {}

    #[test]
    fn test_mutual_exclusion_across_threads() {
        let region = Arc::new(Region::anonymous(4096).unwrap());
        let offset = {
            let mut writer = ArenaWriter::new(&region, 0);
            writer.push_struct::<Shared>().unwrap()
        };

        const THREADS: usize = 8;
        const ITERS: usize = 10_000;

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let region = Arc::clone(&region);
                std::thread::spawn(move || {
                    let shared = region.at::<Shared>(offset);
                    for _ in 0..ITERS {
                        let _guard = shared.mutex.lock();
                        // Non-atomic-looking increment under the lock: load,
                        // then store, so lost updates would show up.
                        let v = shared.counter.load(Ordering::Relaxed);
                        shared.counter.store(v + 1, Ordering::Relaxed);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let shared = region.at::<Shared>(offset);
        assert_eq!(
            shared.counter.load(Ordering::Relaxed),
            (THREADS * ITERS) as u64
        );
        assert!(!shared.mutex.is_contended());
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let region = Region::anonymous(64).unwrap();
        let mut writer = ArenaWriter::new(&region, 0);
        let offset = writer.push_struct::<TicketMutex>().unwrap();
        let mutex = region.at::<TicketMutex>(offset);

        drop(mutex.lock());
        drop(mutex.lock());
        assert!(!mutex.is_contended());
    }
}
