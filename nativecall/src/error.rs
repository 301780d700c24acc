use thiserror::Error;

use crate::{FaultClass, NativeIdentifier, ResultCoercion, ReturnKind};

/// Every failure of a call, tagged with the native it concerns.
#[derive(Debug, Error)]
#[error("native {native}: {kind}")]
pub struct CallError {
    pub native: NativeIdentifier,
    pub kind: ErrorKind,
}

impl CallError {
    pub fn new(native: NativeIdentifier, kind: ErrorKind) -> Self {
        Self { native, kind }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ErrorKind {
    #[error("too many arguments (capacity {capacity})")]
    TooManyArguments { capacity: usize },

    #[error("too many return value arguments (capacity {capacity})")]
    TooManyResults { capacity: usize },

    #[error("not enough arguments ({supplied} < {declared})")]
    MissingArguments { supplied: usize, declared: usize },

    #[error("arg[{index}]: expected {expected}, got {found}")]
    TypeMismatch {
        index: usize,
        expected: &'static str,
        found: &'static str,
    },

    #[error("arg[{index}]: {value} exceeds the limit of {limit}")]
    ArgumentOutOfBounds { index: usize, value: u64, limit: u64 },

    #[error("too much isolated data ({requested} bytes requested, {remaining} left)")]
    IsolationExhausted { requested: usize, remaining: usize },

    #[error("all {slices} isolation slices are in use")]
    ArenaSaturated { slices: usize },

    #[error("native is disabled")]
    NativeBlocked,

    #[error("result type mismatch: requested {requested:?}, native returns {declared:?}")]
    ResultTypeMismatch {
        requested: ResultCoercion,
        declared: Option<ReturnKind>,
    },

    #[error("pointer result matches an argument")]
    PointerLeak,

    #[error("no handler registered")]
    UnresolvedNative,

    #[error("{class:?} while executing native{}: {message}", fmt_address(.address))]
    NativeFault {
        class: FaultClass,
        address: Option<usize>,
        message: String,
    },
}

fn fmt_address(address: &Option<usize>) -> String {
    match address {
        Some(address) => format!(" at address {address:#x}"),
        None => String::new(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("packed signature truncated: expected {expected} words, found {found}")]
    Truncated { expected: usize, found: usize },

    #[error("signature declares {0} arguments")]
    TooManyArguments(usize),

    #[error("unknown return kind {0}")]
    UnknownReturnKind(u32),

    #[error("unknown native flags {0:#x}")]
    UnknownFlags(u32),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_identifier_and_reason() {
        let err = CallError::new(
            NativeIdentifier(0xABCD),
            ErrorKind::TypeMismatch {
                index: 2,
                expected: "string",
                found: "pointer",
            },
        );
        assert_eq!(
            err.to_string(),
            "native 0x000000000000ABCD: arg[2]: expected string, got pointer"
        );
    }

    #[test]
    fn fault_display_mentions_address_when_known() {
        let kind = ErrorKind::NativeFault {
            class: FaultClass::AccessViolation,
            address: Some(0x1000),
            message: "read of unmapped memory".to_string(),
        };
        assert_eq!(
            kind.to_string(),
            "AccessViolation while executing native at address 0x1000: read of unmapped memory"
        );

        let kind = ErrorKind::NativeFault {
            class: FaultClass::Panic,
            address: None,
            message: "boom".to_string(),
        };
        assert_eq!(kind.to_string(), "Panic while executing native: boom");
    }
}
