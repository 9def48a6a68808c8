//! Size-class heap for id lists.
//!
//! Fixed slots in the metadata region (bucket and vbucket entries) carry
//! variable-length lists of 64-bit ids. Those lists live in a dedicated heap
//! area at the end of the region: chunks of 8·2^k ids, one free list per
//! class threaded through the first word of each free chunk, new chunks cut
//! from a bump cursor when a class's free list is empty. A list that
//! outgrows its chunk is moved to the next class by the caller (allocate,
//! copy, free).
//!
//! Chunk offsets are region-relative, so they can be stored in slot fields
//! and rebased by any attached process. Offset 0 is never a chunk (the
//! region header lives there) and doubles as the free-list terminator.

use crate::error::{Result, ShmError};
use crate::mutex::TicketMutex;
use crate::region::{ArenaWriter, Region, ShmValue};
use std::sync::atomic::{AtomicU64, Ordering};

/// Smallest chunk capacity, in ids.
pub const MIN_CHUNK_IDS: u32 = 8;

/// Number of size classes; the largest chunk holds `8 << 15` ids.
pub const NUM_SIZE_CLASSES: usize = 16;

/// Heap bookkeeping, resident in the region.
#[repr(C)]
pub struct IdHeapHeader {
    mutex: TicketMutex,
    area_offset: AtomicU64,
    area_size: AtomicU64,
    bump: AtomicU64,
    free_heads: [AtomicU64; NUM_SIZE_CLASSES],
}

// SAFETY: repr(C); atomics throughout; all-zero is a valid (empty) heap.
unsafe impl ShmValue for IdHeapHeader {}

/// Accessor for the id heap of one region.
pub struct IdHeap<'a> {
    region: &'a Region,
    header_offset: u64,
}

impl<'a> IdHeap<'a> {
    /// Lay out the heap header and a chunk area of `area_bytes` bytes.
    /// Returns the header offset to store in the region header.
    pub fn init(region: &'a Region, writer: &mut ArenaWriter<'_>, area_bytes: usize) -> Result<u64> {
        let header_offset = writer.push_struct::<IdHeapHeader>()?;
        let area_offset = writer.push_array::<u64>(area_bytes / 8)?;

        let header = region.at::<IdHeapHeader>(header_offset);
        header.area_offset.store(area_offset, Ordering::Relaxed);
        header
            .area_size
            .store((area_bytes / 8 * 8) as u64, Ordering::Relaxed);
        Ok(header_offset)
    }

    /// Attach to a heap previously laid out by [`IdHeap::init`].
    #[must_use]
    pub fn attach(region: &'a Region, header_offset: u64) -> Self {
        Self {
            region,
            header_offset,
        }
    }

    fn header(&self) -> &IdHeapHeader {
        self.region.at::<IdHeapHeader>(self.header_offset)
    }

    /// Smallest class whose chunks hold at least `min_ids` ids.
    #[must_use]
    pub fn class_for(min_ids: u32) -> Option<usize> {
        (0..NUM_SIZE_CLASSES).find(|&class| Self::class_capacity(class) >= min_ids)
    }

    /// Chunk capacity of `class`, in ids.
    #[must_use]
    pub const fn class_capacity(class: usize) -> u32 {
        MIN_CHUNK_IDS << class
    }

    /// Allocate a zeroed chunk holding at least `min_ids` ids. Returns the
    /// chunk's region-relative offset and its capacity.
    pub fn allocate(&self, min_ids: u32) -> Result<(u64, u32)> {
        let class = Self::class_for(min_ids).ok_or(ShmError::ArenaExhausted {
            needed: min_ids as usize * 8,
            available: Self::class_capacity(NUM_SIZE_CLASSES - 1) as usize * 8,
        })?;
        let capacity = Self::class_capacity(class);
        let bytes = capacity as u64 * 8;
        let header = self.header();

        let offset = {
            let _guard = header.mutex.lock();
            let head = header.free_heads[class].load(Ordering::Relaxed);
            if head != 0 {
                let next = self.region.at::<AtomicU64>(head).load(Ordering::Relaxed);
                header.free_heads[class].store(next, Ordering::Relaxed);
                head
            } else {
                let bump = header.bump.load(Ordering::Relaxed);
                if bump + bytes > header.area_size.load(Ordering::Relaxed) {
                    return Err(ShmError::ArenaExhausted {
                        needed: bytes as usize,
                        available: (header.area_size.load(Ordering::Relaxed) - bump) as usize,
                    });
                }
                header.bump.store(bump + bytes, Ordering::Relaxed);
                header.area_offset.load(Ordering::Relaxed) + bump
            }
        };

        // The chunk is exclusively ours now; clear any stale contents
        // (recycled chunks carry the old list and the free-list link).
        for word in self.region.slice::<AtomicU64>(offset, capacity as usize) {
            word.store(0, Ordering::Relaxed);
        }
        Ok((offset, capacity))
    }

    /// Return a chunk of `capacity` ids (a value previously returned by
    /// [`IdHeap::allocate`]) to its class free list.
    pub fn free(&self, chunk_offset: u64, capacity: u32) {
        debug_assert!(capacity >= MIN_CHUNK_IDS && capacity.is_power_of_two());
        let class = (capacity / MIN_CHUNK_IDS).trailing_zeros() as usize;
        debug_assert!(class < NUM_SIZE_CLASSES);

        let header = self.header();
        let _guard = header.mutex.lock();
        let head = header.free_heads[class].load(Ordering::Relaxed);
        self.region
            .at::<AtomicU64>(chunk_offset)
            .store(head, Ordering::Relaxed);
        header.free_heads[class].store(chunk_offset, Ordering::Relaxed);
    }

    /// The id words of a chunk.
    #[must_use]
    pub fn ids(&self, chunk_offset: u64, len: u32) -> &[AtomicU64] {
        self.region.slice::<AtomicU64>(chunk_offset, len as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heap_region() -> (Region, u64) {
        let region = Region::anonymous(64 * 1024).unwrap();
        let offset = {
            let mut writer = ArenaWriter::new(&region, 0);
            IdHeap::init(&region, &mut writer, 32 * 1024).unwrap()
        };
        (region, offset)
    }

    #[test]
    fn test_class_sizing() {
        assert_eq!(IdHeap::class_for(1), Some(0));
        assert_eq!(IdHeap::class_for(8), Some(0));
        assert_eq!(IdHeap::class_for(9), Some(1));
        assert_eq!(IdHeap::class_for(16), Some(1));
        assert_eq!(IdHeap::class_capacity(2), 32);
        assert_eq!(IdHeap::class_for(u32::MAX), None);
    }

    #[test]
    fn test_allocate_is_zeroed_and_reused() {
        let (region, offset) = heap_region();
        let heap = IdHeap::attach(&region, offset);

        let (chunk, cap) = heap.allocate(4).unwrap();
        assert_eq!(cap, MIN_CHUNK_IDS);
        heap.ids(chunk, cap)[0].store(0xfeed, Ordering::Relaxed);
        heap.free(chunk, cap);

        // Same class comes back off the free list, zeroed again.
        let (chunk2, cap2) = heap.allocate(4).unwrap();
        assert_eq!(chunk2, chunk);
        assert_eq!(cap2, cap);
        assert!(heap
            .ids(chunk2, cap2)
            .iter()
            .all(|w| w.load(Ordering::Relaxed) == 0));
    }

    #[test]
    fn test_distinct_chunks_do_not_overlap() {
        let (region, offset) = heap_region();
        let heap = IdHeap::attach(&region, offset);

        let (a, cap) = heap.allocate(8).unwrap();
        let (b, _) = heap.allocate(8).unwrap();
        assert!(b >= a + u64::from(cap) * 8 || a >= b + u64::from(cap) * 8);
    }

    #[test]
    fn test_grow_pattern() {
        let (region, offset) = heap_region();
        let heap = IdHeap::attach(&region, offset);

        let (small, small_cap) = heap.allocate(8).unwrap();
        for (i, word) in heap.ids(small, small_cap).iter().enumerate() {
            word.store(i as u64 + 1, Ordering::Relaxed);
        }

        let (big, big_cap) = heap.allocate(small_cap + 1).unwrap();
        assert_eq!(big_cap, small_cap * 2);
        for i in 0..small_cap {
            let v = heap.ids(small, small_cap)[i as usize].load(Ordering::Relaxed);
            heap.ids(big, big_cap)[i as usize].store(v, Ordering::Relaxed);
        }
        heap.free(small, small_cap);

        let words = heap.ids(big, big_cap);
        assert_eq!(words[0].load(Ordering::Relaxed), 1);
        assert_eq!(
            words[small_cap as usize - 1].load(Ordering::Relaxed),
            u64::from(small_cap)
        );
    }

    #[test]
    fn test_exhaustion_reports_error() {
        let region = Region::anonymous(4096).unwrap();
        let offset = {
            let mut writer = ArenaWriter::new(&region, 0);
            IdHeap::init(&region, &mut writer, 128).unwrap()
        };
        let heap = IdHeap::attach(&region, offset);

        // 128 bytes hold two 8-id chunks.
        heap.allocate(8).unwrap();
        heap.allocate(8).unwrap();
        assert!(matches!(
            heap.allocate(8),
            Err(ShmError::ArenaExhausted { .. })
        ));
    }
}
