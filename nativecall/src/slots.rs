use bitflags::bitflags;

use crate::ErrorKind;

/// One machine word of a native call, argument or result.
pub type Word = u64;

pub const ARGUMENT_CAPACITY: usize = 32;
/// natives may read a few words past their last argument, those are zero
pub const TRAILING_ZERO_WORDS: usize = 3;
/// a vector3 result takes three words
pub const RESULT_CAPACITY: usize = 4;

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
    pub struct SlotTags: u8 {
        const POINTER = 1 << 0;
        const STRING = 1 << 1;
        /// raw points into the isolation arena
        const ISOLATED = 1 << 2;
        /// scratch slot for an extra result
        const OUTPUT = 1 << 3;
        /// the caller only lent the bytes for reading
        const READ_ONLY = 1 << 4;
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct ArgumentSlot {
    pub raw: Word,
    /// declared byte size, 0 when unknown
    pub size: u32,
    pub tags: SlotTags,
}

impl ArgumentSlot {
    pub fn scalar(raw: Word, size: u32) -> Self {
        Self {
            raw,
            size,
            tags: SlotTags::empty(),
        }
    }

    pub fn pointer(raw: Word, size: u32, is_string: bool) -> Self {
        let mut tags = SlotTags::POINTER;
        tags.set(SlotTags::STRING, is_string);
        Self { raw, size, tags }
    }

    pub fn is_pointer(&self) -> bool {
        self.tags.contains(SlotTags::POINTER)
    }

    pub fn is_string(&self) -> bool {
        self.tags.contains(SlotTags::STRING)
    }

    pub fn is_isolated(&self) -> bool {
        self.tags.contains(SlotTags::ISOLATED)
    }

    pub fn is_output(&self) -> bool {
        self.tags.contains(SlotTags::OUTPUT)
    }

    pub fn is_read_only(&self) -> bool {
        self.tags.contains(SlotTags::READ_ONLY)
    }
}

#[derive(Debug, Copy, Clone, Default)]
struct SlotMeta {
    size: u32,
    tags: SlotTags,
}

/// Raw argument words plus parallel type metadata.
///
/// Words past `len` are always zero, so the word slice handed to a native
/// carries [`TRAILING_ZERO_WORDS`] zeroes after the last argument.
#[derive(Debug, Clone)]
pub struct SlotStore {
    words: [Word; ARGUMENT_CAPACITY + TRAILING_ZERO_WORDS],
    meta: [SlotMeta; ARGUMENT_CAPACITY],
    len: usize,
}

impl Default for SlotStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SlotStore {
    pub fn new() -> Self {
        Self {
            words: [0; ARGUMENT_CAPACITY + TRAILING_ZERO_WORDS],
            meta: [SlotMeta::default(); ARGUMENT_CAPACITY],
            len: 0,
        }
    }

    fn push_slot(&mut self, slot: ArgumentSlot) -> Result<(), ErrorKind> {
        if self.len >= ARGUMENT_CAPACITY {
            return Err(ErrorKind::TooManyArguments {
                capacity: ARGUMENT_CAPACITY,
            });
        }
        self.words[self.len] = slot.raw;
        self.meta[self.len] = SlotMeta {
            size: slot.size,
            tags: slot.tags,
        };
        self.len += 1;
        Ok(())
    }

    pub fn push_value(
        &mut self,
        value: Word,
        declared_size: u32,
    ) -> Result<(), ErrorKind> {
        self.push_slot(ArgumentSlot::scalar(value, declared_size))
    }

    pub fn push_pointer(
        &mut self,
        ptr: Word,
        declared_size: u32,
        is_string: bool,
    ) -> Result<(), ErrorKind> {
        self.push_slot(ArgumentSlot::pointer(ptr, declared_size, is_string))
    }

    pub fn push_read_only(&mut self, ptr: Word, size: u32) -> Result<(), ErrorKind> {
        let mut slot = ArgumentSlot::pointer(ptr, size, false);
        slot.tags |= SlotTags::READ_ONLY;
        self.push_slot(slot)
    }

    /// Reserves a pointer slot whose address is only known once the arena
    /// copy exists.
    pub fn push_output(&mut self, size: u32) -> Result<usize, ErrorKind> {
        let mut slot = ArgumentSlot::pointer(0, size, false);
        slot.tags |= SlotTags::OUTPUT;
        self.push_slot(slot)?;
        Ok(self.len - 1)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, index: usize) -> ArgumentSlot {
        debug_assert!(index < self.len, "slot {index} out of {}", self.len);
        let meta = self.meta[index];
        ArgumentSlot {
            raw: self.words[index],
            size: meta.size,
            tags: meta.tags,
        }
    }

    pub fn set(&mut self, index: usize, slot: ArgumentSlot) {
        debug_assert!(index < self.len, "slot {index} out of {}", self.len);
        debug_assert!(
            !slot.is_isolated() || slot.is_pointer(),
            "isolated slot must be a pointer"
        );
        self.words[index] = slot.raw;
        self.meta[index] = SlotMeta {
            size: slot.size,
            tags: slot.tags,
        };
    }

    pub fn iter(&self) -> impl Iterator<Item = ArgumentSlot> + '_ {
        (0..self.len).map(|index| self.get(index))
    }

    pub fn has_pointers(&self) -> bool {
        self.meta[..self.len].iter().any(|meta| meta.tags.contains(SlotTags::POINTER))
    }

    /// Argument words followed by the trailing zeroes.
    pub fn words(&self) -> &[Word] {
        &self.words[..self.len + TRAILING_ZERO_WORDS]
    }
}
