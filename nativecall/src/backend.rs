//! The seam to the host: resolving a native to a handler and running it.
use std::{
    any::Any,
    collections::HashMap,
    fmt,
    panic::{self, AssertUnwindSafe},
};

use crate::{ErrorKind, NativeIdentifier, Word};

/// Opaque callable handed out by [`NativeBackend::resolve`].
#[repr(transparent)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Handler(pub usize);

/// The word-level view a native gets of one call.
#[derive(Debug)]
pub struct RawCall<'a> {
    pub native: NativeIdentifier,
    /// arguments followed by zeroed trailing words
    pub args: &'a [Word],
    pub results: &'a mut [Word],
    pub arg_count: usize,
}

impl RawCall<'_> {
    pub fn arg(&self, index: usize) -> Word {
        self.args.get(index).copied().unwrap_or(0)
    }

    pub fn arg_i32(&self, index: usize) -> i32 {
        self.arg(index) as i32
    }

    pub fn arg_f32(&self, index: usize) -> f32 {
        f32::from_bits(self.arg(index) as u32)
    }

    pub fn arg_ptr<T>(&self, index: usize) -> *mut T {
        self.arg(index) as usize as *mut T
    }

    pub fn set_result(&mut self, word: Word) {
        self.results[0] = word;
    }

    pub fn set_result_i32(&mut self, value: i32) {
        self.results[0] = value as u32 as Word;
    }

    pub fn set_result_i64(&mut self, value: i64) {
        self.results[0] = value as Word;
    }

    pub fn set_result_f32(&mut self, value: f32) {
        self.results[0] = value.to_bits() as Word;
    }

    /// one component per word, like a padded script vector
    pub fn set_result_vector3(&mut self, value: [f32; 3]) {
        for (word, component) in self.results.iter_mut().zip(value) {
            *word = component.to_bits() as Word;
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FaultClass {
    AccessViolation,
    IllegalInstruction,
    StackOverflow,
    /// an unwinding panic out of the handler
    Panic,
    Other(u32),
}

/// What the host reports when a native faulted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeFault {
    pub class: FaultClass,
    pub address: Option<usize>,
    pub message: String,
}

impl NativeFault {
    pub fn new(class: FaultClass, message: impl Into<String>) -> Self {
        Self {
            class,
            address: None,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn at(mut self, address: usize) -> Self {
        self.address = Some(address);
        self
    }
}

pub trait NativeBackend: Send + Sync {
    fn resolve(&self, id: NativeIdentifier) -> Option<Handler>;

    /// Runs the native. Faults the host can observe are returned, panics
    /// unwinding out of here are caught by the caller.
    fn invoke(
        &self,
        handler: Handler,
        call: &mut RawCall<'_>,
    ) -> Result<(), NativeFault>;
}

/// Faults that must not be swallowed because the host state is no longer
/// trustworthy. Matching faults are re-raised as panics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultPolicy {
    fatal_classes: Vec<FaultClass>,
    fatal_natives: Vec<NativeIdentifier>,
}

impl Default for FaultPolicy {
    fn default() -> Self {
        Self {
            fatal_classes: vec![FaultClass::StackOverflow],
            fatal_natives: Vec::new(),
        }
    }
}

impl FaultPolicy {
    /// Nothing is fatal.
    pub fn lenient() -> Self {
        Self {
            fatal_classes: Vec::new(),
            fatal_natives: Vec::new(),
        }
    }

    #[must_use]
    pub fn fatal_class(mut self, class: FaultClass) -> Self {
        self.fatal_classes.push(class);
        self
    }

    /// Any fault of this native is fatal.
    #[must_use]
    pub fn fatal_native(mut self, id: NativeIdentifier) -> Self {
        self.fatal_natives.push(id);
        self
    }

    pub fn is_fatal(&self, id: NativeIdentifier, class: FaultClass) -> bool {
        self.fatal_classes.contains(&class) || self.fatal_natives.contains(&id)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Runs a native behind the fault boundary.
pub(crate) fn guarded_invoke(
    backend: &dyn NativeBackend,
    policy: &FaultPolicy,
    handler: Handler,
    call: &mut RawCall<'_>,
) -> Result<(), ErrorKind> {
    let native = call.native;
    let outcome =
        panic::catch_unwind(AssertUnwindSafe(|| backend.invoke(handler, call)));

    let fault = match outcome {
        Ok(Ok(())) => return Ok(()),
        Ok(Err(fault)) => {
            if policy.is_fatal(native, fault.class) {
                log::error!(
                    "fatal {:?} in native {native}: {}",
                    fault.class,
                    fault.message
                );
                panic!("fatal {:?} in native {native}: {}", fault.class, fault.message);
            }
            fault
        }
        Err(payload) => {
            if policy.is_fatal(native, FaultClass::Panic) {
                log::error!("native {native} panicked, propagating");
                panic::resume_unwind(payload);
            }
            NativeFault::new(FaultClass::Panic, panic_message(payload.as_ref()))
        }
    };

    log::debug!("native {native} faulted: {fault:?}");
    Err(ErrorKind::NativeFault {
        class: fault.class,
        address: fault.address,
        message: fault.message,
    })
}

pub type NativeFn =
    Box<dyn Fn(&mut RawCall<'_>) -> Result<(), NativeFault> + Send + Sync>;

/// A backend made of Rust closures, keyed by identifier.
#[derive(Default)]
pub struct NativeTable {
    handlers: Vec<NativeFn>,
    index: HashMap<NativeIdentifier, Handler, ahash::RandomState>,
}

impl fmt::Debug for NativeTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeTable")
            .field("natives", &self.index.len())
            .finish()
    }
}

impl NativeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registering the same identifier twice replaces the handler.
    pub fn register<F>(&mut self, id: NativeIdentifier, native: F) -> Handler
    where
        F: Fn(&mut RawCall<'_>) -> Result<(), NativeFault> + Send + Sync + 'static,
    {
        let handler = Handler(self.handlers.len());
        self.handlers.push(Box::new(native));
        self.index.insert(id, handler);
        handler
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

impl NativeBackend for NativeTable {
    fn resolve(&self, id: NativeIdentifier) -> Option<Handler> {
        self.index.get(&id).copied()
    }

    fn invoke(
        &self,
        handler: Handler,
        call: &mut RawCall<'_>,
    ) -> Result<(), NativeFault> {
        let native = self.handlers.get(handler.0).ok_or_else(|| {
            NativeFault::new(FaultClass::AccessViolation, "dangling handler").at(handler.0)
        })?;
        native(call)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(
        table: &NativeTable,
        policy: &FaultPolicy,
        id: u64,
    ) -> Result<(), ErrorKind> {
        let id = NativeIdentifier(id);
        let handler = table.resolve(id).expect("registered");
        let args = [0; 4];
        let mut results = [0; 4];
        let mut call = RawCall {
            native: id,
            args: &args,
            results: &mut results,
            arg_count: 1,
        };
        guarded_invoke(table, policy, handler, &mut call)
    }

    fn mk_table() -> NativeTable {
        let mut table = NativeTable::new();
        table.register(NativeIdentifier(1), |call| {
            call.set_result_i32(-1);
            Ok(())
        });
        table.register(NativeIdentifier(2), |_| {
            Err(NativeFault::new(FaultClass::AccessViolation, "bad read").at(0xdead))
        });
        table.register(NativeIdentifier(3), |_| panic!("native blew up"));
        table.register(NativeIdentifier(4), |_| Err(NativeFault::new(FaultClass::StackOverflow, "deep")));
        table
    }

    #[test]
    fn reported_faults_become_errors() {
        let table = mk_table();
        assert_eq!(run(&table, &FaultPolicy::default(), 1), Ok(()));
        assert_eq!(
            run(&table, &FaultPolicy::default(), 2),
            Err(ErrorKind::NativeFault {
                class: FaultClass::AccessViolation,
                address: Some(0xdead),
                message: "bad read".to_string(),
            })
        );
    }

    #[test]
    fn panics_are_caught_unless_allow_listed() {
        let table = mk_table();
        let err = run(&table, &FaultPolicy::default(), 3).unwrap_err();
        assert!(matches!(
            err,
            ErrorKind::NativeFault { class: FaultClass::Panic, ref message, .. }
                if message == "native blew up"
        ));

        let strict = FaultPolicy::default().fatal_class(FaultClass::Panic);
        let escaped = panic::catch_unwind(AssertUnwindSafe(|| run(&table, &strict, 3)));
        assert!(escaped.is_err(), "allow-listed panic must propagate");
    }

    #[test]
    fn fatal_classes_and_natives_propagate() {
        let table = mk_table();
        let escaped = panic::catch_unwind(AssertUnwindSafe(|| {
            run(&table, &FaultPolicy::default(), 4)
        }));
        assert!(escaped.is_err(), "stack overflow is fatal by default");

        let lenient = FaultPolicy::lenient();
        assert!(run(&table, &lenient, 4).is_err());

        let by_native = FaultPolicy::lenient().fatal_native(NativeIdentifier(2));
        let escaped = panic::catch_unwind(AssertUnwindSafe(|| run(&table, &by_native, 2)));
        assert!(escaped.is_err());
    }

    #[test]
    fn later_registration_replaces_handler() {
        let mut table = NativeTable::new();
        let first = table.register(NativeIdentifier(9), |_| Ok(()));
        let second = table.register(NativeIdentifier(9), |_| Ok(()));
        assert_ne!(first, second);
        assert_eq!(table.resolve(NativeIdentifier(9)), Some(second));
        assert_eq!(table.len(), 1);
    }
}
