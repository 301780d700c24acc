use std::{
    ops::Range,
    ptr::NonNull,
    sync::atomic::{AtomicUsize, Ordering},
};

use parking_lot::{Mutex, MutexGuard};

use crate::{
    ErrorKind,
    system::{OS_PAGE_SIZE, open_read_write, reserve_memory, round_to_page, unmap_memory},
};

pub const CLAIM_ALIGN: usize = 8;
/// bytes after every slice that must never change
pub const CANARY_LEN: usize = 64;
pub const CANARY_BYTE: u8 = 0xFD;

/// Write cursor of one slice. It only moves forward until the slice is
/// handed to the next call.
#[derive(Debug)]
pub struct SliceCursor {
    offset: usize,
    capacity: usize,
}

impl SliceCursor {
    fn new(capacity: usize) -> Self {
        Self {
            offset: 0,
            capacity,
        }
    }

    pub fn remaining(&self) -> usize {
        self.capacity - self.offset
    }

    /// Rounds `size` up to [`CLAIM_ALIGN`]; empty claims still take one unit.
    pub fn advance(&mut self, size: usize) -> Result<Range<usize>, ErrorKind> {
        let rounded = size.max(1).next_multiple_of(CLAIM_ALIGN);
        if rounded > self.remaining() {
            return Err(ErrorKind::IsolationExhausted {
                requested: rounded,
                remaining: self.remaining(),
            });
        }
        let start = self.offset;
        self.offset += rounded;
        debug_assert!(self.offset <= self.capacity);
        Ok(start..self.offset)
    }

    fn reset(&mut self) {
        self.offset = 0;
    }
}

/// Pool of equally sized scratch slices inside one no-access mapping.
///
/// Layout: a guard page, then per slice the read-write slice bytes, a canary
/// band and a guard page. Each call owns at most one slice at a time.
///
/// Callers running concurrently need one slice each. When the round-robin
/// index lands on a slice that is still owned the arena probes forward and
/// logs the wrap-around; when every slice is owned the claim fails.
#[derive(Debug)]
pub struct IsolationArena {
    base: NonNull<u8>,
    mapped_len: usize,
    stride: usize,
    slice_size: usize,
    slices: Box<[Mutex<SliceCursor>]>,
    next: AtomicUsize,
}

// SAFETY: slice memory is only touched through an ArenaSlice, which holds the
// slice's lock
unsafe impl Send for IsolationArena {}
// SAFETY: see above
unsafe impl Sync for IsolationArena {}

impl IsolationArena {
    pub fn new(slice_count: usize, slice_size: usize) -> Self {
        assert!(slice_count > 0, "isolation arena needs at least one slice");
        let open_len = round_to_page(slice_size + CANARY_LEN);
        let stride = open_len + OS_PAGE_SIZE;
        let mapped_len = OS_PAGE_SIZE + stride * slice_count;

        let base = reserve_memory(mapped_len).expect("Reserve memory for isolation arena");

        for index in 0..slice_count {
            // SAFETY: inside the reservation
            let start = unsafe { base.add(OS_PAGE_SIZE + index * stride) };
            assert!(
                open_read_write(start, open_len),
                "mprotect of isolation slice {index} failed"
            );
            // SAFETY: the canary band was just opened
            unsafe {
                start
                    .as_ptr()
                    .add(slice_size)
                    .write_bytes(CANARY_BYTE, CANARY_LEN);
            }
        }

        let slices = (0..slice_count)
            .map(|_| Mutex::new(SliceCursor::new(slice_size)))
            .collect();

        log::debug!(
            "isolation arena: {slice_count} slices of {slice_size} bytes ({mapped_len} bytes mapped)"
        );

        Self {
            base,
            mapped_len,
            stride,
            slice_size,
            slices,
            next: AtomicUsize::new(0),
        }
    }

    pub fn slice_count(&self) -> usize {
        self.slices.len()
    }

    pub fn slice_size(&self) -> usize {
        self.slice_size
    }

    fn slice_base(&self, index: usize) -> NonNull<u8> {
        debug_assert!(index < self.slices.len());
        // SAFETY: inside the reservation
        unsafe { self.base.add(OS_PAGE_SIZE + index * self.stride) }
    }

    /// Claims the next slice round-robin for exclusive use by one call.
    pub fn acquire(&self) -> Result<ArenaSlice<'_>, ErrorKind> {
        let count = self.slices.len();
        let start = self.next.fetch_add(1, Ordering::Relaxed) % count;

        for probe in 0..count {
            let index = (start + probe) % count;
            let Some(mut cursor) = self.slices[index].try_lock() else {
                continue;
            };
            if probe > 0 {
                log::warn!(
                    "isolation slice {start} is still in use, wrapped to slice {index}; \
                     slice count {count} is below the call concurrency"
                );
            }
            cursor.reset();
            return Ok(ArenaSlice {
                base: self.slice_base(index),
                slice_size: self.slice_size,
                index,
                cursor,
            });
        }

        log::warn!("all {count} isolation slices are in use");
        Err(ErrorKind::ArenaSaturated { slices: count })
    }
}

impl Drop for IsolationArena {
    fn drop(&mut self) {
        unmap_memory(self.base, self.mapped_len);
    }
}

/// Exclusive handle on one slice for the duration of a call.
#[derive(Debug)]
pub struct ArenaSlice<'a> {
    base: NonNull<u8>,
    slice_size: usize,
    index: usize,
    cursor: MutexGuard<'a, SliceCursor>,
}

impl ArenaSlice<'_> {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn remaining(&self) -> usize {
        self.cursor.remaining()
    }

    /// Returns zeroed space for `size` bytes, or fails without touching the
    /// slice when it does not fit.
    pub fn claim(&mut self, size: usize) -> Result<NonNull<u8>, ErrorKind> {
        let range = self.cursor.advance(size)?;
        // SAFETY: range lies within the opened slice bytes
        unsafe {
            let ptr = self.base.add(range.start);
            ptr.as_ptr().write_bytes(0, range.len());
            Ok(ptr)
        }
    }

    /// Checks the canary band directly after the slice.
    pub fn guard_intact(&self) -> bool {
        // SAFETY: the canary band is read-write and owned with the slice
        let canary = unsafe {
            std::slice::from_raw_parts(
                self.base.as_ptr().add(self.slice_size),
                CANARY_LEN,
            )
        };
        canary.iter().all(|&byte| byte == CANARY_BYTE)
    }

    /// Refills the canary after a native overwrote it.
    pub fn restore_guard(&mut self) {
        // SAFETY: the canary band is read-write and owned with the slice
        unsafe {
            self.base
                .as_ptr()
                .add(self.slice_size)
                .write_bytes(CANARY_BYTE, CANARY_LEN);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mk_arena(slices: usize, size: usize) -> IsolationArena {
        IsolationArena::new(slices, size)
    }

    #[test]
    fn claims_are_rounded_and_zeroed() {
        let arena = mk_arena(2, 256);
        let mut slice = arena.acquire().unwrap();

        let a = slice.claim(3).unwrap();
        let b = slice.claim(9).unwrap();
        assert_eq!(b.as_ptr() as usize - a.as_ptr() as usize, 8);
        assert_eq!(slice.remaining(), 256 - 8 - 16);

        // SAFETY: 3 bytes were claimed
        let bytes = unsafe { std::slice::from_raw_parts(a.as_ptr(), 3) };
        assert_eq!(bytes, &[0, 0, 0]);
    }

    #[test]
    fn exhausting_a_slice_fails_and_keeps_the_guard() {
        let arena = mk_arena(1, 128);
        let mut slice = arena.acquire().unwrap();

        let all = slice.claim(128).expect("exact fit");
        // SAFETY: the whole slice was claimed
        unsafe { all.as_ptr().write_bytes(0xAA, 128) };
        assert!(slice.guard_intact(), "writing the full slice must stop at the canary");

        let err = slice.claim(1).expect_err("slice is full");
        assert_eq!(
            err,
            ErrorKind::IsolationExhausted {
                requested: 8,
                remaining: 0
            }
        );
        assert!(slice.guard_intact());

        // SAFETY: the canary band is read-write
        unsafe { all.as_ptr().add(128).write(0) };
        assert!(!slice.guard_intact());
        slice.restore_guard();
        assert!(slice.guard_intact());
    }

    #[test]
    fn oversized_claim_does_not_move_the_cursor() {
        let arena = mk_arena(1, 64);
        let mut slice = arena.acquire().unwrap();
        slice.claim(40).unwrap();
        assert!(matches!(
            slice.claim(32),
            Err(ErrorKind::IsolationExhausted { requested: 32, remaining: 24 })
        ));
        assert_eq!(slice.remaining(), 24);
        slice.claim(24).expect("remaining space is still usable");
    }

    #[test]
    fn acquire_round_robins_and_resets_the_cursor() {
        let arena = mk_arena(3, 64);
        let first = {
            let mut slice = arena.acquire().unwrap();
            slice.claim(64).unwrap();
            slice.index()
        };
        let second = arena.acquire().unwrap().index();
        let third = arena.acquire().unwrap().index();
        assert_eq!([first, second, third], [0, 1, 2]);

        let again = arena.acquire().unwrap();
        assert_eq!(again.index(), 0);
        assert_eq!(again.remaining(), 64, "cursor resets once a slice comes around");
    }

    #[test]
    fn busy_slices_are_skipped_never_shared() {
        let arena = mk_arena(2, 64);
        let a = arena.acquire().unwrap();
        let b = arena.acquire().unwrap();
        assert_ne!(a.index(), b.index());

        assert_eq!(
            arena.acquire().unwrap_err(),
            ErrorKind::ArenaSaturated { slices: 2 }
        );

        drop(a);
        let c = arena.acquire().unwrap();
        assert_ne!(c.index(), b.index());
    }
}
