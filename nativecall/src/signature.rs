use std::fmt;

use bitflags::bitflags;

use crate::{SignatureError, slots::ARGUMENT_CAPACITY};

/// Hash naming a native. Only used for lookup and diagnostics.
#[repr(transparent)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeIdentifier(pub u64);

impl fmt::Display for NativeIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

impl From<u64> for NativeIdentifier {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
    pub struct NativeFlags: u8 {
        /// must not run while types are enforced
        const BLOCKED = 1 << 0;
        /// no argument is a pointer
        const TRIVIAL_NO_POINTERS = 1 << 1;
        /// declared arguments are not trusted either
        const TREAT_ALL_ARGS_UNSAFE = 1 << 2;
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ArgExpectation {
    Scalar,
    BoundedInteger { max: u64 },
    /// `min_size` of 0 means the size is unknown
    Pointer { min_size: u32 },
    String,
    /// the argument after this one carries the length in bytes
    ReadOnlyBuffer { min_size: u32 },
}

impl ArgExpectation {
    pub fn expects_pointer(&self) -> bool {
        matches!(
            self,
            Self::Pointer { .. } | Self::String | Self::ReadOnlyBuffer { .. }
        )
    }
}

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ReturnKind {
    Void = 0,
    Int32 = 1,
    Float = 2,
    Int64 = 3,
    Vector3 = 4,
    String = 5,
    Object = 7,
}

impl ReturnKind {
    fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(Self::Void),
            1 => Some(Self::Int32),
            2 => Some(Self::Float),
            3 => Some(Self::Int64),
            4 => Some(Self::Vector3),
            // script strings decode the same way as plain strings
            5 | 6 => Some(Self::String),
            7 => Some(Self::Object),
            _ => None,
        }
    }
}

pub const PACKED_ARG_POINTER: u32 = 0x8000_0000;
pub const PACKED_ARG_STRING: u32 = 0x4000_0000;
pub const PACKED_ARG_BUFFER: u32 = 0x2000_0000;
pub const PACKED_ARG_SIZE: u32 = 0x1FFF_FFFF;
pub const PACKED_ARG_BOUNDED: u32 = 0x1000_0000;
pub const PACKED_ARG_BOUND: u32 = 0x0FFF_FFFF;
pub const PACKED_HEADER_LEN: usize = 3;

/// Statically known description of a native's arguments and result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeSignature {
    pub flags: NativeFlags,
    pub args: Vec<ArgExpectation>,
    pub ret: ReturnKind,
}

impl NativeSignature {
    /// `TRIVIAL_NO_POINTERS` is derived from `args`.
    pub fn new(args: Vec<ArgExpectation>, ret: ReturnKind) -> Self {
        let mut flags = NativeFlags::empty();
        if only_plain_values(&args) {
            flags |= NativeFlags::TRIVIAL_NO_POINTERS;
        }
        Self { flags, args, ret }
    }

    pub fn blocked() -> Self {
        Self {
            flags: NativeFlags::BLOCKED,
            args: Vec::new(),
            ret: ReturnKind::Void,
        }
    }

    #[must_use]
    pub fn with_flags(mut self, flags: NativeFlags) -> Self {
        self.flags |= flags;
        self
    }

    pub fn arg_count(&self) -> usize {
        self.args.len()
    }

    pub fn is_blocked(&self) -> bool {
        self.flags.contains(NativeFlags::BLOCKED)
    }

    /// Decodes the compact table layout:
    /// `[nargs (-1 = blocked), pointer mask, ret | flags << 16, args...]`
    pub fn from_packed(words: &[u32]) -> Result<Self, SignatureError> {
        let [nargs, pmask, ret_word, rest @ ..] = words else {
            return Err(SignatureError::Truncated {
                expected: PACKED_HEADER_LEN,
                found: words.len(),
            });
        };

        if *nargs as i32 == -1 {
            return Ok(Self::blocked());
        }

        let nargs = *nargs as usize;
        if nargs > ARGUMENT_CAPACITY {
            return Err(SignatureError::TooManyArguments(nargs));
        }
        if rest.len() < nargs {
            return Err(SignatureError::Truncated {
                expected: PACKED_HEADER_LEN + nargs,
                found: words.len(),
            });
        }

        let ret = ReturnKind::from_tag(ret_word & 0xFFFF)
            .ok_or(SignatureError::UnknownReturnKind(ret_word & 0xFFFF))?;
        let extra = u8::try_from(ret_word >> 16)
            .ok()
            .and_then(NativeFlags::from_bits)
            .ok_or(SignatureError::UnknownFlags(ret_word >> 16))?;

        let args = rest[..nargs]
            .iter()
            .map(|&word| decode_packed_arg(word))
            .collect::<Vec<_>>();

        let mut signature = Self {
            flags: extra,
            args,
            ret,
        };
        if *pmask == 0 && only_plain_values(&signature.args) {
            signature.flags |= NativeFlags::TRIVIAL_NO_POINTERS;
        }
        Ok(signature)
    }
}

/// Nothing to check per argument, bounds included.
fn only_plain_values(args: &[ArgExpectation]) -> bool {
    args.iter().all(|arg| *arg == ArgExpectation::Scalar)
}

fn decode_packed_arg(word: u32) -> ArgExpectation {
    if word & PACKED_ARG_POINTER == 0 {
        if word & PACKED_ARG_BOUNDED != 0 {
            return ArgExpectation::BoundedInteger {
                max: (word & PACKED_ARG_BOUND) as u64,
            };
        }
        return ArgExpectation::Scalar;
    }
    let min_size = word & PACKED_ARG_SIZE;
    if word & PACKED_ARG_STRING != 0 {
        ArgExpectation::String
    } else if word & PACKED_ARG_BUFFER != 0 {
        ArgExpectation::ReadOnlyBuffer { min_size }
    } else {
        ArgExpectation::Pointer { min_size }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_derives_trivial_flag() {
        let plain = NativeSignature::new(
            vec![ArgExpectation::Scalar, ArgExpectation::Scalar],
            ReturnKind::Int32,
        );
        assert!(plain.flags.contains(NativeFlags::TRIVIAL_NO_POINTERS));

        let bounded = NativeSignature::new(
            vec![ArgExpectation::Scalar, ArgExpectation::BoundedInteger { max: 3 }],
            ReturnKind::Int32,
        );
        assert!(!bounded.flags.contains(NativeFlags::TRIVIAL_NO_POINTERS));

        let with_ptr = NativeSignature::new(
            vec![ArgExpectation::Scalar, ArgExpectation::Pointer { min_size: 8 }],
            ReturnKind::Void,
        );
        assert!(!with_ptr.flags.contains(NativeFlags::TRIVIAL_NO_POINTERS));
    }

    #[test]
    fn packed_layout_decodes_every_argument_kind() {
        let words = [
            5,
            0b11110,
            3 | (NativeFlags::TREAT_ALL_ARGS_UNSAFE.bits() as u32) << 16,
            PACKED_ARG_BOUNDED | 10,
            PACKED_ARG_POINTER | 12,
            PACKED_ARG_POINTER | PACKED_ARG_STRING,
            PACKED_ARG_POINTER | PACKED_ARG_BUFFER | 64,
            PACKED_ARG_POINTER,
        ];
        let sig = NativeSignature::from_packed(&words).expect("valid table");
        assert_eq!(sig.ret, ReturnKind::Int64);
        assert!(sig.flags.contains(NativeFlags::TREAT_ALL_ARGS_UNSAFE));
        assert!(!sig.flags.contains(NativeFlags::TRIVIAL_NO_POINTERS));
        assert_eq!(
            sig.args,
            vec![
                ArgExpectation::BoundedInteger { max: 10 },
                ArgExpectation::Pointer { min_size: 12 },
                ArgExpectation::String,
                ArgExpectation::ReadOnlyBuffer { min_size: 64 },
                ArgExpectation::Pointer { min_size: 0 },
            ]
        );
    }

    #[test]
    fn packed_flags_wider_than_a_byte_are_unknown() {
        assert_eq!(
            NativeSignature::from_packed(&[0, 0, 0x100 << 16]),
            Err(SignatureError::UnknownFlags(0x100))
        );
    }

    #[test]
    fn packed_minus_one_is_blocked() {
        let sig = NativeSignature::from_packed(&[u32::MAX, 0, 0]).unwrap();
        assert!(sig.is_blocked());
        assert_eq!(sig.arg_count(), 0);
    }

    #[test]
    fn packed_rejects_malformed_tables() {
        assert!(matches!(
            NativeSignature::from_packed(&[1, 0]),
            Err(SignatureError::Truncated { .. })
        ));
        assert!(matches!(
            NativeSignature::from_packed(&[2, 0, 1, 0]),
            Err(SignatureError::Truncated { .. })
        ));
        assert!(matches!(
            NativeSignature::from_packed(&[0, 0, 9]),
            Err(SignatureError::UnknownReturnKind(9))
        ));
        assert!(matches!(
            NativeSignature::from_packed(&[40, 0, 0]),
            Err(SignatureError::TooManyArguments(40))
        ));
    }

    #[test]
    fn identifier_displays_as_padded_hex() {
        let id = NativeIdentifier(0xD24D37CC275948CC);
        assert_eq!(id.to_string(), "0xD24D37CC275948CC");
        assert_eq!(NativeIdentifier(1).to_string(), "0x0000000000000001");
    }
}
