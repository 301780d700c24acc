use std::ffi::{CStr, c_char};

use crate::{OutputKind, PendingOutput, ResultCoercion, Word};

/// A result as the caller sees it.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultValue {
    Nil,
    Int(i32),
    Long(i64),
    Float(f32),
    Vector3([f32; 3]),
    String(String),
    Object(Vec<u8>),
}

fn word_f32(word: Word) -> f32 {
    f32::from_bits(word as u32)
}

fn vector3(words: &[Word]) -> [f32; 3] {
    [word_f32(words[0]), word_f32(words[1]), word_f32(words[2])]
}

/// Reads the primary result words the way the caller asked for.
///
/// # Safety
/// For string results `words[0]` must be null or point to a NUL terminated
/// string; for object results it must be null or point to `words[1]`
/// readable bytes. Both are guaranteed by the native, not by the script.
pub unsafe fn decode_primary(
    coercion: Option<ResultCoercion>,
    words: &[Word],
) -> ResultValue {
    match coercion {
        None | Some(ResultCoercion::Integer) => ResultValue::Int(words[0] as i32),
        Some(ResultCoercion::Long) => ResultValue::Long(words[0] as i64),
        Some(ResultCoercion::Float) => ResultValue::Float(word_f32(words[0])),
        Some(ResultCoercion::Vector3) => ResultValue::Vector3(vector3(words)),
        Some(ResultCoercion::String) => {
            let ptr = words[0] as usize as *const c_char;
            if ptr.is_null() {
                return ResultValue::Nil;
            }
            // SAFETY: by contract
            let text = unsafe { CStr::from_ptr(ptr) };
            ResultValue::String(text.to_string_lossy().into_owned())
        }
        Some(ResultCoercion::Object) => {
            let ptr = words[0] as usize as *const u8;
            if ptr.is_null() {
                return ResultValue::Nil;
            }
            // SAFETY: by contract
            let data = unsafe { std::slice::from_raw_parts(ptr, words[1] as usize) };
            ResultValue::Object(data.to_vec())
        }
    }
}

pub fn decode_output(output: &PendingOutput) -> ResultValue {
    match output.kind {
        OutputKind::Integer => ResultValue::Int(output.words[0] as i32),
        OutputKind::Float => ResultValue::Float(word_f32(output.words[0])),
        OutputKind::Vector3 => ResultValue::Vector3(vector3(&output.words)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_readings_use_the_low_bits() {
        let words = [0xFFFF_FFFF_FFFF_FFFE, 0, 0, 0];
        // SAFETY: no pointers are read
        unsafe {
            assert_eq!(decode_primary(None, &words), ResultValue::Int(-2));
            assert_eq!(
                decode_primary(Some(ResultCoercion::Long), &words),
                ResultValue::Long(-2)
            );
        }
        let words = [1.5f32.to_bits() as Word, 2.0f32.to_bits() as Word, 0, 0];
        // SAFETY: no pointers are read
        unsafe {
            assert_eq!(
                decode_primary(Some(ResultCoercion::Float), &words),
                ResultValue::Float(1.5)
            );
            assert_eq!(
                decode_primary(Some(ResultCoercion::Vector3), &words),
                ResultValue::Vector3([1.5, 2.0, 0.0])
            );
        }
    }

    #[test]
    fn string_and_object_follow_the_pointer() {
        let text = c"hello";
        let words = [text.as_ptr() as usize as Word, 0, 0, 0];
        // SAFETY: points at a C string literal
        let value = unsafe { decode_primary(Some(ResultCoercion::String), &words) };
        assert_eq!(value, ResultValue::String("hello".to_string()));

        let blob = [1u8, 2, 3];
        let words = [blob.as_ptr() as usize as Word, 3, 0, 0];
        // SAFETY: three readable bytes
        let value = unsafe { decode_primary(Some(ResultCoercion::Object), &words) };
        assert_eq!(value, ResultValue::Object(vec![1, 2, 3]));

        // SAFETY: null is allowed
        let value = unsafe { decode_primary(Some(ResultCoercion::String), &[0; 4]) };
        assert_eq!(value, ResultValue::Nil);
    }

    #[test]
    fn outputs_decode_by_kind() {
        let output = PendingOutput {
            kind: OutputKind::Vector3,
            slot: 0,
            words: [
                1.0f32.to_bits() as Word,
                2.0f32.to_bits() as Word,
                3.0f32.to_bits() as Word,
            ],
        };
        assert_eq!(decode_output(&output), ResultValue::Vector3([1.0, 2.0, 3.0]));
    }
}
