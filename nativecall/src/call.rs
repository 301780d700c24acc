//! One native call, from the first push to reading the results.
//!
//! ```text
//! Created -> PreInvokeValidating -> Invoking -> PostInvokeValidating -> Completed
//!                    |                  |                 |
//!                    +------------------+-----------------+--> Rejected
//! ```
//!
//! Every invoke restarts from the arguments as pushed, so a context can be
//! invoked again and sees the same finalized words each time.
use std::{
    ffi::CStr,
    marker::PhantomData,
    ptr::{self, NonNull},
    sync::atomic::Ordering,
};

use crate::{
    ArenaSlice, ArgExpectation, ArgumentSlot, CallError, ErrorKind, FaultClass, InvokerShared, MetaField,
    NativeFlags, NativeIdentifier, NativeSignature, OutputKind, PendingReturns, PointerFieldHandle, RawCall,
    ResultCoercion, ResultValue, ReturnKind, SlotStore, SlotTags, UntypedPolicy, Word,
    backend::guarded_invoke,
    result::{decode_output, decode_primary},
    slots::{ARGUMENT_CAPACITY, RESULT_CAPACITY},
};

/// Replaces a pointer handed where a plain value is declared.
pub const POINTER_POISON: Word = 0xDEAD_BEEF_DEAD_BEEF;
/// High half of a non-zero value the native never declared.
pub const UNDECLARED_POISON: Word = 0xDEAD_BEEF_0000_0000;
/// Replaces a result read with a kind the native does not return. The low
/// half is a NaN.
pub const RESULT_POISON: Word = 0xDEAD_BEEF_7FED_CAFE;

const LOW_32: Word = 0xFFFF_FFFF;

/// A typed value pushed by the caller.
#[derive(Debug)]
pub enum Argument<'a> {
    Scalar { value: Word, size: u32 },
    /// bytes the native may read and write
    Buffer(&'a mut [u8]),
    /// bytes the native may only read
    Bytes(&'a [u8]),
    Str(&'a CStr),
    Request(MetaField),
    Field(PointerFieldHandle),
}

impl From<i32> for Argument<'_> {
    fn from(value: i32) -> Self {
        Self::Scalar {
            value: value as u32 as Word,
            size: 4,
        }
    }
}

impl From<u32> for Argument<'_> {
    fn from(value: u32) -> Self {
        Self::Scalar {
            value: value as Word,
            size: 4,
        }
    }
}

impl From<i64> for Argument<'_> {
    fn from(value: i64) -> Self {
        Self::Scalar {
            value: value as Word,
            size: 8,
        }
    }
}

impl From<u64> for Argument<'_> {
    fn from(value: u64) -> Self {
        Self::Scalar { value, size: 8 }
    }
}

impl From<f32> for Argument<'_> {
    fn from(value: f32) -> Self {
        Self::Scalar {
            value: value.to_bits() as Word,
            size: 4,
        }
    }
}

/// Script numbers are doubles, natives take single precision.
impl From<f64> for Argument<'_> {
    fn from(value: f64) -> Self {
        Self::from(value as f32)
    }
}

impl From<bool> for Argument<'_> {
    fn from(value: bool) -> Self {
        Self::Scalar {
            value: value as Word,
            size: 4,
        }
    }
}

impl<'a> From<&'a mut [u8]> for Argument<'a> {
    fn from(value: &'a mut [u8]) -> Self {
        Self::Buffer(value)
    }
}

impl<'a> From<&'a [u8]> for Argument<'a> {
    fn from(value: &'a [u8]) -> Self {
        Self::Bytes(value)
    }
}

impl<'a> From<&'a CStr> for Argument<'a> {
    fn from(value: &'a CStr) -> Self {
        Self::Str(value)
    }
}

impl From<MetaField> for Argument<'_> {
    fn from(value: MetaField) -> Self {
        Self::Request(value)
    }
}

impl From<PointerFieldHandle> for Argument<'_> {
    fn from(value: PointerFieldHandle) -> Self {
        Self::Field(value)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CallState {
    Created,
    PreInvokeValidating,
    Invoking,
    Rejected,
    PostInvokeValidating,
    Completed,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    Executed,
    /// a tolerated argument violation, the native did not run
    Skipped,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Verdict {
    Proceed,
    Skip,
}

#[derive(Debug)]
struct IsolatedCopy {
    host: usize,
    safe: NonNull<u8>,
    len: usize,
    write_back: bool,
}

fn slot_kind(slot: &ArgumentSlot) -> &'static str {
    if slot.is_string() {
        "string"
    } else if slot.is_pointer() {
        "pointer"
    } else {
        "integer"
    }
}

fn expectation_kind(expectation: ArgExpectation) -> &'static str {
    match expectation {
        ArgExpectation::Scalar | ArgExpectation::BoundedInteger { .. } => "non-pointer",
        ArgExpectation::Pointer { .. } => "pointer",
        ArgExpectation::String => "string",
        ArgExpectation::ReadOnlyBuffer { .. } => "buffer",
    }
}

fn buffer_len(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}

pub struct CallContext<'a> {
    shared: &'a InvokerShared,
    native: NativeIdentifier,
    signature: Option<&'a NativeSignature>,
    // as pushed by the caller
    pushed: SlotStore,
    pending: PendingReturns,
    coercion: Option<ResultCoercion>,
    return_anyway: bool,
    // as handed to the native by the last invoke
    slots: SlotStore,
    outputs: PendingReturns,
    output_ptrs: Vec<(usize, NonNull<u8>)>,
    results: [Word; RESULT_CAPACITY],
    isolated: Vec<IsolatedCopy>,
    slice: Option<ArenaSlice<'a>>,
    state: CallState,
    _borrows: PhantomData<&'a mut [u8]>,
}

impl std::fmt::Debug for CallContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallContext")
            .field("native", &self.native)
            .field("state", &self.state)
            .field("args", &self.pushed.len())
            .field("outputs", &self.pending.len())
            .field("coercion", &self.coercion)
            .finish_non_exhaustive()
    }
}

impl<'a> CallContext<'a> {
    pub(crate) fn new(shared: &'a InvokerShared, native: NativeIdentifier) -> Self {
        Self {
            shared,
            native,
            signature: shared.directory.lookup(native),
            pushed: SlotStore::new(),
            pending: PendingReturns::default(),
            coercion: None,
            return_anyway: false,
            slots: SlotStore::new(),
            outputs: PendingReturns::default(),
            output_ptrs: Vec::new(),
            results: [0; RESULT_CAPACITY],
            isolated: Vec::new(),
            slice: None,
            state: CallState::Created,
            _borrows: PhantomData,
        }
    }

    pub fn native(&self) -> NativeIdentifier {
        self.native
    }

    pub fn signature(&self) -> Option<&'a NativeSignature> {
        self.signature
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    fn error(&self, kind: ErrorKind) -> CallError {
        CallError::new(self.native, kind)
    }

    fn transition(&mut self, next: CallState) {
        log::trace!("native {}: {:?} -> {:?}", self.native, self.state, next);
        self.state = next;
    }

    pub fn push(&mut self, argument: impl Into<Argument<'a>>) -> Result<(), CallError> {
        let pushed = match argument.into() {
            Argument::Scalar { value, size } => self.pushed.push_value(value, size),
            Argument::Buffer(buffer) => self.pushed.push_pointer(
                buffer.as_mut_ptr() as usize as Word,
                buffer_len(buffer.len()),
                false,
            ),
            Argument::Bytes(bytes) => self
                .pushed
                .push_read_only(bytes.as_ptr() as usize as Word, buffer_len(bytes.len())),
            Argument::Str(text) => self.pushed.push_pointer(
                text.as_ptr() as usize as Word,
                buffer_len(text.to_bytes().len()),
                true,
            ),
            Argument::Request(field) => return self.push_request(field),
            Argument::Field(handle) => return self.push_field(handle),
        };
        pushed.map_err(|kind| self.error(kind))
    }

    pub fn push_value(&mut self, value: Word, declared_size: u32) -> Result<(), CallError> {
        self.pushed
            .push_value(value, declared_size)
            .map_err(|kind| self.error(kind))
    }

    /// # Safety
    /// `ptr` must be null or valid for reads and writes of `declared_size`
    /// bytes (a NUL terminated string when `is_string`) until the context is
    /// dropped or invoked for the last time.
    pub unsafe fn push_pointer(
        &mut self,
        ptr: *mut u8,
        declared_size: u32,
        is_string: bool,
    ) -> Result<(), CallError> {
        self.pushed
            .push_pointer(ptr as usize as Word, declared_size, is_string)
            .map_err(|kind| self.error(kind))
    }

    /// Interprets a metafield. Only output requests take an argument slot.
    pub fn push_request(&mut self, field: MetaField) -> Result<(), CallError> {
        match field {
            MetaField::Output(kind) => self.push_output(kind, 0),
            MetaField::ReturnResultAnyway => {
                if self.coercion.is_none() {
                    self.return_anyway = true;
                }
                Ok(())
            }
            MetaField::ResultAs(coercion) => {
                self.coercion = Some(coercion);
                Ok(())
            }
        }
    }

    /// Pushes a pointer field as an output slot seeded with its value. The
    /// record is released.
    pub fn push_field(&mut self, handle: PointerFieldHandle) -> Result<(), CallError> {
        let (kind, value) = self.shared.pointer_fields.take(handle);
        self.push_output(kind, value)
    }

    /// Same as [`Self::push_field`] for the address a script was given.
    pub fn push_field_address(&mut self, address: usize) -> Result<(), CallError> {
        match self.shared.pointer_fields.handle_at(address) {
            Some(handle) => self.push_field(handle),
            None => Err(self.error(ErrorKind::TypeMismatch {
                index: self.pushed.len(),
                expected: "pointer field",
                found: "userdata",
            })),
        }
    }

    fn push_output(&mut self, kind: OutputKind, initial: Word) -> Result<(), CallError> {
        if self.pushed.len() >= ARGUMENT_CAPACITY {
            return Err(self.error(ErrorKind::TooManyArguments {
                capacity: ARGUMENT_CAPACITY,
            }));
        }
        let slot = self.pushed.len();
        self.pending
            .push(kind, slot, initial)
            .map_err(|err| self.error(err))?;
        let size = (kind.words() * size_of::<Word>()) as u32;
        self.pushed
            .push_output(size)
            .map_err(|err| self.error(err))?;
        Ok(())
    }

    /// Validates, runs the native and validates its results.
    pub fn invoke(&mut self) -> Result<CallOutcome, CallError> {
        let strict = self.shared.strict.load(Ordering::Acquire);
        let outcome = self.run(strict);
        // outputs and copies are already out of the slice
        self.slice = None;
        match outcome {
            Ok(outcome) => Ok(outcome),
            Err(kind) => {
                self.transition(CallState::Rejected);
                log::debug!("native {} rejected: {kind}", self.native);
                Err(self.error(kind))
            }
        }
    }

    fn restart(&mut self) {
        self.slots = self.pushed.clone();
        self.outputs = self.pending.clone();
        self.output_ptrs.clear();
        self.isolated.clear();
        self.results = [0; RESULT_CAPACITY];
        self.slice = None;
        self.transition(CallState::Created);
    }

    fn run(&mut self, strict: bool) -> Result<CallOutcome, ErrorKind> {
        self.restart();
        let handler = self
            .shared
            .backend
            .resolve(self.native)
            .ok_or(ErrorKind::UnresolvedNative)?;

        self.transition(CallState::PreInvokeValidating);
        self.materialize_outputs()?;
        if self.pre_invoke(strict)? == Verdict::Skip {
            self.transition(CallState::Completed);
            return Ok(CallOutcome::Skipped);
        }

        self.transition(CallState::Invoking);
        let mut call = RawCall {
            native: self.native,
            args: self.slots.words(),
            results: &mut self.results,
            arg_count: self.slots.len(),
        };
        guarded_invoke(
            self.shared.backend.as_ref(),
            &self.shared.settings.fault_policy,
            handler,
            &mut call,
        )?;

        self.transition(CallState::PostInvokeValidating);
        self.check_guard()?;
        self.check_results(strict)?;
        self.copy_back();
        self.read_outputs();
        self.check_pointer_leak()?;
        self.transition(CallState::Completed);
        Ok(CallOutcome::Executed)
    }

    fn slice(&mut self) -> Result<&mut ArenaSlice<'a>, ErrorKind> {
        let slice = match self.slice.take() {
            Some(slice) => slice,
            None => self.shared.arena.acquire()?,
        };
        Ok(self.slice.insert(slice))
    }

    fn materialize_outputs(&mut self) -> Result<(), ErrorKind> {
        for index in 0..self.outputs.len() {
            let Some(output) = self.outputs.get(index).copied() else {
                break;
            };
            let words = output.kind.words();
            let safe = self.slice()?.claim(words * size_of::<Word>())?;
            // SAFETY: the claim is word aligned and holds `words` words
            unsafe {
                ptr::copy_nonoverlapping(output.words.as_ptr(), safe.cast::<Word>().as_ptr(), words);
            }

            let mut slot = self.slots.get(output.slot);
            slot.raw = safe.as_ptr() as usize as Word;
            slot.tags |= SlotTags::ISOLATED;
            self.slots.set(output.slot, slot);
            self.output_ptrs.push((output.slot, safe));
        }
        Ok(())
    }

    fn pre_invoke(&mut self, strict: bool) -> Result<Verdict, ErrorKind> {
        let Some(signature) = self.signature else {
            if self.shared.settings.untyped_policy == UntypedPolicy::Isolate {
                self.sanitize_undeclared(0)?;
            }
            return Ok(Verdict::Proceed);
        };

        if signature.is_blocked() {
            if strict {
                return Err(ErrorKind::NativeBlocked);
            }
            log::debug!("native {} is blocked, calling it unchecked", self.native);
            return Ok(Verdict::Proceed);
        }

        let declared = signature.arg_count();
        let trivial = signature.flags.contains(NativeFlags::TRIVIAL_NO_POINTERS)
            && !self.slots.has_pointers();
        if trivial && self.slots.len() == declared {
            return Ok(Verdict::Proceed);
        }

        if self.slots.len() < declared {
            if strict {
                return Err(ErrorKind::MissingArguments {
                    supplied: self.slots.len(),
                    declared,
                });
            }
            log::debug!(
                "native {}: zero-filling {} missing arguments",
                self.native,
                declared - self.slots.len()
            );
            while self.slots.len() < declared {
                self.slots.push_value(0, 0)?;
            }
        }

        if signature.flags.contains(NativeFlags::TREAT_ALL_ARGS_UNSAFE) {
            self.sanitize_undeclared(0)?;
            return Ok(Verdict::Proceed);
        }

        // trivial natives only need their extra arguments looked at
        let first = if trivial { declared } else { 0 };
        for (index, &expectation) in signature.args.iter().enumerate().skip(first) {
            if self.check_declared(index, expectation, strict)? == Verdict::Skip {
                return Ok(Verdict::Skip);
            }
        }

        self.sanitize_undeclared(declared)?;
        Ok(Verdict::Proceed)
    }

    fn check_declared(
        &mut self,
        index: usize,
        expectation: ArgExpectation,
        strict: bool,
    ) -> Result<Verdict, ErrorKind> {
        let slot = self.slots.get(index);

        if !expectation.expects_pointer() {
            if slot.is_pointer() {
                if strict {
                    return Err(ErrorKind::TypeMismatch {
                        index,
                        expected: expectation_kind(expectation),
                        found: slot_kind(&slot),
                    });
                }
                log::debug!("native {}: arg[{index}] is a pointer, poisoned", self.native);
                self.slots.set(index, ArgumentSlot::scalar(POINTER_POISON, 8));
                return Ok(Verdict::Proceed);
            }
            if let ArgExpectation::BoundedInteger { max } = expectation {
                if slot.raw > max {
                    if strict {
                        return Err(ErrorKind::ArgumentOutOfBounds {
                            index,
                            value: slot.raw,
                            limit: max,
                        });
                    }
                    log::debug!(
                        "native {}: arg[{index}] {} is above {max}, not executing",
                        self.native,
                        slot.raw
                    );
                    return Ok(Verdict::Skip);
                }
            }
            return Ok(Verdict::Proceed);
        }

        if !slot.is_pointer() {
            // null is always allowed
            if slot.raw != 0 {
                return Err(ErrorKind::TypeMismatch {
                    index,
                    expected: expectation_kind(expectation),
                    found: slot_kind(&slot),
                });
            }
            return Ok(Verdict::Proceed);
        }

        match expectation {
            ArgExpectation::String => {
                if !slot.is_string() {
                    return Err(ErrorKind::TypeMismatch {
                        index,
                        expected: "string",
                        found: slot_kind(&slot),
                    });
                }
            }
            ArgExpectation::Pointer { min_size } => {
                // the size must cover the minimum, the native still only sees a copy
                check_min_size(index, &slot, min_size)?;
                if !slot.is_isolated() {
                    self.isolate(index, true)?;
                }
            }
            ArgExpectation::ReadOnlyBuffer { min_size } => {
                check_min_size(index, &slot, min_size)?;
                let length = if index + 1 < self.slots.len() {
                    self.slots.get(index + 1).raw
                } else {
                    0
                };
                if length > slot.size as u64 {
                    return Err(ErrorKind::ArgumentOutOfBounds {
                        index,
                        value: length,
                        limit: slot.size as u64,
                    });
                }
                if min_size == 0 && !slot.is_isolated() {
                    self.isolate(index, false)?;
                }
            }
            ArgExpectation::Scalar | ArgExpectation::BoundedInteger { .. } => {
                unreachable!("scalar expectations are handled above")
            }
        }
        Ok(Verdict::Proceed)
    }

    /// Arguments the native never declared: pointers are isolated, values
    /// get a high half that is never a valid address.
    fn sanitize_undeclared(&mut self, from: usize) -> Result<(), ErrorKind> {
        for index in from..self.slots.len() {
            let slot = self.slots.get(index);
            if slot.is_pointer() {
                if !slot.is_isolated() {
                    self.isolate(index, true)?;
                }
            } else if slot.raw != 0 {
                let raw = UNDECLARED_POISON | (slot.raw & LOW_32);
                self.slots.set(index, ArgumentSlot { raw, ..slot });
            }
        }
        Ok(())
    }

    /// Copies a pointer argument into the arena and hands the native the
    /// copy instead.
    fn isolate(&mut self, index: usize, writable: bool) -> Result<(), ErrorKind> {
        let slot = self.slots.get(index);
        if slot.raw == 0 {
            return Ok(());
        }

        let len = slot.size as usize;
        // strings keep their terminator, the claim is zeroed
        let claim = len + usize::from(slot.is_string());
        let safe = self.slice()?.claim(claim)?;
        // SAFETY: the pusher vouched for `size` readable bytes and the claim
        // holds at least as many
        unsafe {
            ptr::copy_nonoverlapping(slot.raw as usize as *const u8, safe.as_ptr(), len);
        }

        self.isolated.push(IsolatedCopy {
            host: slot.raw as usize,
            safe,
            len,
            write_back: writable && !slot.is_string() && !slot.is_read_only(),
        });
        self.slots.set(
            index,
            ArgumentSlot {
                raw: safe.as_ptr() as usize as Word,
                size: slot.size,
                tags: slot.tags | SlotTags::ISOLATED,
            },
        );
        log::debug!("native {}: isolated arg[{index}] ({len} bytes)", self.native);
        Ok(())
    }

    fn check_guard(&mut self) -> Result<(), ErrorKind> {
        match &mut self.slice {
            Some(slice) if !slice.guard_intact() => {
                log::error!(
                    "native {} wrote past isolation slice {}",
                    self.native,
                    slice.index()
                );
                slice.restore_guard();
                Err(ErrorKind::NativeFault {
                    class: FaultClass::AccessViolation,
                    address: None,
                    message: "isolation guard overwritten".to_string(),
                })
            }
            _ => Ok(()),
        }
    }

    fn check_results(&mut self, strict: bool) -> Result<(), ErrorKind> {
        let coercion = self.coercion;
        match self.signature {
            Some(signature) if strict => {
                let ret = signature.ret;
                let mismatch = |requested| ErrorKind::ResultTypeMismatch {
                    requested,
                    declared: Some(ret),
                };
                match coercion {
                    Some(ResultCoercion::Long) => match ret {
                        ReturnKind::Int32 => self.results[0] &= LOW_32,
                        ReturnKind::Int64 => {}
                        _ => return Err(mismatch(ResultCoercion::Long)),
                    },
                    Some(requested @ ResultCoercion::String) if ret != ReturnKind::String => {
                        return Err(mismatch(requested));
                    }
                    Some(requested @ ResultCoercion::Vector3) if ret != ReturnKind::Vector3 => {
                        return Err(mismatch(requested));
                    }
                    Some(requested @ ResultCoercion::Object) if ret != ReturnKind::Object => {
                        return Err(mismatch(requested));
                    }
                    Some(
                        ResultCoercion::String | ResultCoercion::Vector3 | ResultCoercion::Object,
                    ) => {}
                    None | Some(ResultCoercion::Integer | ResultCoercion::Float) => {
                        let numeric = matches!(ret, ReturnKind::Int32 | ReturnKind::Float);
                        if !numeric && self.results[0] != 0 {
                            log::debug!(
                                "native {}: {ret:?} result read as a number, poisoned",
                                self.native
                            );
                            self.results[0] = RESULT_POISON;
                        }
                    }
                }
            }
            Some(_) => {}
            None => {
                if coercion == Some(ResultCoercion::Long) && self.shared.settings.clamp_untyped_long
                {
                    self.results[0] &= LOW_32;
                }
                if strict && coercion == Some(ResultCoercion::Object) {
                    return Err(ErrorKind::ResultTypeMismatch {
                        requested: ResultCoercion::Object,
                        declared: None,
                    });
                }
            }
        }
        Ok(())
    }

    fn copy_back(&mut self) {
        for copy in self.isolated.iter().filter(|copy| copy.write_back) {
            // SAFETY: host was valid for `len` bytes when pushed and the
            // context still borrows it
            unsafe {
                ptr::copy_nonoverlapping(copy.safe.as_ptr(), copy.host as *mut u8, copy.len);
            }
        }
    }

    fn read_outputs(&mut self) {
        for &(slot, safe) in &self.output_ptrs {
            let Some(output) = self.outputs.find_slot_mut(slot) else {
                continue;
            };
            let words = output.kind.words();
            // SAFETY: claimed for `words` words in materialize_outputs, the
            // slice is still held
            unsafe {
                ptr::copy_nonoverlapping(
                    safe.cast::<Word>().as_ptr(),
                    output.words.as_mut_ptr(),
                    words,
                );
            }
        }
    }

    fn argument_matches(&self, result: Word, considered: impl Fn(&ArgumentSlot) -> bool) -> bool {
        self.pushed.iter().enumerate().any(|(index, pushed)| {
            considered(&pushed)
                && (pushed.raw == result
                    || (index < self.slots.len() && self.slots.get(index).raw == result))
        })
    }

    /// A native must never hand back one of the pointers it was given.
    fn check_pointer_leak(&mut self) -> Result<(), ErrorKind> {
        let result = self.results[0];
        if result == 0 {
            return Ok(());
        }

        let leaked = match self.coercion {
            Some(ResultCoercion::Long) => self.argument_matches(result, ArgumentSlot::is_pointer),
            Some(ResultCoercion::String) => {
                // echoing a string argument back is fine, point at the caller's
                // string rather than the isolated copy
                if let Some(copy) = self
                    .isolated
                    .iter()
                    .find(|copy| copy.safe.as_ptr() as usize as Word == result)
                {
                    self.results[0] = copy.host as Word;
                }
                self.argument_matches(result, |slot| !slot.is_string())
            }
            Some(ResultCoercion::Object) => self.argument_matches(result, |_| true),
            _ => false,
        };

        if leaked {
            log::debug!("native {} returned one of its pointer arguments", self.native);
            return Err(ErrorKind::PointerLeak);
        }
        Ok(())
    }

    /// Finalized argument as handed to the native by the last invoke.
    pub fn slot(&self, index: usize) -> Option<ArgumentSlot> {
        (index < self.slots.len()).then(|| self.slots.get(index))
    }

    pub fn arg_count(&self) -> usize {
        self.pushed.len()
    }

    /// Raw result words of the last invoke.
    pub fn results(&self) -> &[Word; RESULT_CAPACITY] {
        &self.results
    }

    /// Reads the primary result in the requested representation. When output
    /// slots were requested it is only exposed with a coercion or
    /// [`MetaField::ReturnResultAnyway`].
    ///
    /// # Safety
    /// For string and object coercions the native must have returned a valid
    /// pointer, see [`decode_primary`]. With strict mode and a signature the
    /// declared return kind has been checked against the coercion.
    pub unsafe fn read_primary_result(&self) -> ResultValue {
        if self.state != CallState::Completed {
            return ResultValue::Nil;
        }
        if !self.outputs.is_empty() && self.coercion.is_none() && !self.return_anyway {
            return ResultValue::Nil;
        }
        // SAFETY: forwarded to the caller
        unsafe { decode_primary(self.coercion, &self.results) }
    }

    /// Extra results in argument order.
    pub fn read_extra_result(&self, index: usize) -> Option<ResultValue> {
        if self.state != CallState::Completed {
            return None;
        }
        self.outputs.get(index).map(decode_output)
    }

    pub fn extra_result_count(&self) -> usize {
        self.pending.len()
    }
}

fn check_min_size(index: usize, slot: &ArgumentSlot, min_size: u32) -> Result<(), ErrorKind> {
    if slot.size < min_size {
        return Err(ErrorKind::ArgumentOutOfBounds {
            index,
            value: slot.size as u64,
            limit: min_size as u64,
        });
    }
    Ok(())
}
