//! Out-of-band requests a caller makes about the results of a call.
//!
//! A caller asks either for a particular reading of the primary result
//! register ([`ResultCoercion`]) or for an extra output slot
//! ([`OutputKind`]) that is handed to the native as a pointer into the
//! isolation arena. Pointer fields are persistent records with a stable
//! address that seed such an output slot with a value.
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, AtomicUsize, Ordering};

use crate::{ErrorKind, Word};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ResultCoercion {
    Integer,
    Long,
    Float,
    Vector3,
    String,
    Object,
}

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OutputKind {
    Integer = 0,
    Float = 1,
    Vector3 = 2,
}

impl OutputKind {
    pub fn words(self) -> usize {
        match self {
            Self::Vector3 => 3,
            Self::Integer | Self::Float => 1,
        }
    }

    fn from_tag(tag: u8) -> Self {
        match tag {
            0 => Self::Integer,
            1 => Self::Float,
            _ => Self::Vector3,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MetaField {
    Output(OutputKind),
    /// expose the primary result even when output slots were requested
    ReturnResultAnyway,
    ResultAs(ResultCoercion),
}

/// words of extra outputs one call may request
pub const PENDING_RETURN_WORDS: usize = 16;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PendingOutput {
    pub kind: OutputKind,
    /// argument position of the scratch pointer
    pub slot: usize,
    /// initial value before the call, the native's value after it
    pub words: [Word; 3],
}

#[derive(Debug, Clone, Default)]
pub struct PendingReturns {
    entries: Vec<PendingOutput>,
    used_words: usize,
}

impl PendingReturns {
    pub fn push(
        &mut self,
        kind: OutputKind,
        slot: usize,
        initial: Word,
    ) -> Result<(), ErrorKind> {
        if self.used_words + kind.words() > PENDING_RETURN_WORDS {
            return Err(ErrorKind::TooManyResults {
                capacity: PENDING_RETURN_WORDS,
            });
        }
        self.used_words += kind.words();
        self.entries.push(PendingOutput {
            kind,
            slot,
            words: [initial, 0, 0],
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&PendingOutput> {
        self.entries.get(index)
    }

    pub fn find_slot_mut(&mut self, slot: usize) -> Option<&mut PendingOutput> {
        self.entries.iter_mut().find(|entry| entry.slot == slot)
    }
}

pub const POINTER_FIELD_CAPACITY: usize = 128;

#[derive(Debug, Default)]
struct PointerFieldEntry {
    occupied: AtomicBool,
    kind: AtomicU8,
    value: AtomicU64,
}

/// Names one pointer field record.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PointerFieldHandle {
    index: usize,
}

/// Ring of records that keep a value behind a stable address between calls.
///
/// Records are handed out round-robin and are not owned exclusively: a
/// caller that keeps a record across more than `capacity` claims may see it
/// reused. Such reuse is counted in [`PointerFields::reuse_races`].
#[derive(Debug)]
pub struct PointerFields {
    entries: Box<[PointerFieldEntry]>,
    next: AtomicUsize,
    reuse_races: AtomicUsize,
}

impl PointerFields {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "pointer field ring needs at least one record");
        Self {
            entries: (0..capacity).map(|_| PointerFieldEntry::default()).collect(),
            next: AtomicUsize::new(0),
            reuse_races: AtomicUsize::new(0),
        }
    }

    pub fn claim_int(&self, value: i64) -> PointerFieldHandle {
        self.claim(OutputKind::Integer, value as u64)
    }

    pub fn claim_float(&self, value: f32) -> PointerFieldHandle {
        self.claim(OutputKind::Float, value.to_bits() as u64)
    }

    fn claim(&self, kind: OutputKind, bits: Word) -> PointerFieldHandle {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.entries.len();
        let entry = &self.entries[index];
        if entry.occupied.swap(true, Ordering::AcqRel) {
            self.reuse_races.fetch_add(1, Ordering::Relaxed);
            log::warn!("pointer field {index} reused while still holding a value");
        }
        entry.kind.store(kind as u8, Ordering::Relaxed);
        entry.value.store(bits, Ordering::Release);
        PointerFieldHandle { index }
    }

    /// Stable address of a record's value.
    pub fn address(&self, handle: PointerFieldHandle) -> usize {
        self.entries[handle.index].value.as_ptr() as usize
    }

    /// Maps an address previously returned by [`Self::address`] back to its
    /// record.
    pub fn handle_at(&self, address: usize) -> Option<PointerFieldHandle> {
        let first = self.entries.first()?.value.as_ptr() as usize;
        let stride = std::mem::size_of::<PointerFieldEntry>();
        let offset = address.checked_sub(first)?;
        if offset % stride != 0 || offset / stride >= self.entries.len() {
            return None;
        }
        Some(PointerFieldHandle {
            index: offset / stride,
        })
    }

    /// Releases the record and returns its kind and stored value.
    pub fn take(&self, handle: PointerFieldHandle) -> (OutputKind, Word) {
        let entry = &self.entries[handle.index];
        let value = entry.value.load(Ordering::Acquire);
        let kind = OutputKind::from_tag(entry.kind.load(Ordering::Relaxed));
        entry.occupied.store(false, Ordering::Release);
        (kind, value)
    }

    pub fn occupied(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.occupied.load(Ordering::Relaxed))
            .count()
    }

    pub fn reuse_races(&self) -> usize {
        self.reuse_races.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_returns_count_vector_words() {
        let mut pending = PendingReturns::default();
        for slot in 0..5 {
            pending.push(OutputKind::Vector3, slot, 0).unwrap();
        }
        // 15 words used, one left
        pending.push(OutputKind::Integer, 5, 0).unwrap();
        assert_eq!(
            pending.push(OutputKind::Float, 6, 0),
            Err(ErrorKind::TooManyResults {
                capacity: PENDING_RETURN_WORDS
            })
        );
        assert_eq!(pending.len(), 6);
        assert_eq!(pending.get(5).unwrap().kind, OutputKind::Integer);
        assert_eq!(pending.find_slot_mut(5).unwrap().slot, 5);
    }

    #[test]
    fn pointer_field_round_trips_through_its_address() {
        let fields = PointerFields::new(4);
        let handle = fields.claim_float(2.5);
        let address = fields.address(handle);
        assert_eq!(fields.handle_at(address), Some(handle));
        assert_eq!(fields.handle_at(address + 1), None);
        assert_eq!(fields.handle_at(0x10), None);

        let (kind, bits) = fields.take(handle);
        assert_eq!(kind, OutputKind::Float);
        assert_eq!(f32::from_bits(bits as u32), 2.5);
        assert_eq!(fields.occupied(), 0);
    }

    #[test]
    fn ring_reuse_is_counted() {
        let fields = PointerFields::new(4);
        let handles = (0..4).map(|i| fields.claim_int(i)).collect::<Vec<_>>();
        assert_eq!(fields.reuse_races(), 0);

        // wraps onto the still occupied first record
        let late = fields.claim_int(99);
        assert_eq!(late, handles[0]);
        assert_eq!(fields.reuse_races(), 1);
        assert_eq!(fields.take(handles[0]), (OutputKind::Integer, 99));
    }

    #[test]
    fn released_records_do_not_count_as_races() {
        let fields = PointerFields::new(2);
        for i in 0..10 {
            let handle = fields.claim_int(i);
            fields.take(handle);
        }
        assert_eq!(fields.reuse_races(), 0);
    }
}
