use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use crate::{
    CallContext, FaultPolicy, IsolationArena, NativeBackend, NativeDirectory, NativeIdentifier,
    PointerFields, metafield::POINTER_FIELD_CAPACITY, system::OS_PAGE_SIZE,
};

/// What to do with natives the directory knows nothing about.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum UntypedPolicy {
    /// call them with the words as pushed
    #[default]
    PassThrough,
    /// treat them as declaring no arguments, so every pointer is isolated
    Isolate,
}

#[derive(Debug, Default)]
pub struct InvokerCreateInfo {
    pub slice_count: Option<usize>,
    // bytes per slice, excluding the canary
    pub slice_size: Option<usize>,
    pub strict: Option<bool>,
    pub untyped_policy: Option<UntypedPolicy>,
    // mask long results of undocumented natives to 32 bits
    pub clamp_untyped_long: Option<bool>,
    pub pointer_field_capacity: Option<usize>,
    pub fault_policy: Option<FaultPolicy>,
}

#[derive(Debug, Clone)]
pub struct InvokerSettings {
    pub slice_count: usize,
    pub slice_size: usize,
    pub strict: bool,
    pub untyped_policy: UntypedPolicy,
    pub clamp_untyped_long: bool,
    pub pointer_field_capacity: usize,
    pub fault_policy: FaultPolicy,
}

impl Default for InvokerSettings {
    fn default() -> Self {
        Self {
            slice_count: 32,
            slice_size: 3 * OS_PAGE_SIZE,
            strict: false,
            untyped_policy: UntypedPolicy::PassThrough,
            clamp_untyped_long: true,
            pointer_field_capacity: POINTER_FIELD_CAPACITY,
            fault_policy: FaultPolicy::default(),
        }
    }
}

impl InvokerSettings {
    fn from_info(info: InvokerCreateInfo) -> Self {
        let mut settings = Self::default();
        info.slice_count.inspect(|&val| settings.slice_count = val);
        info.slice_size.inspect(|&val| settings.slice_size = val);
        info.strict.inspect(|&val| settings.strict = val);
        info.untyped_policy
            .inspect(|&val| settings.untyped_policy = val);
        info.clamp_untyped_long
            .inspect(|&val| settings.clamp_untyped_long = val);
        info.pointer_field_capacity
            .inspect(|&val| settings.pointer_field_capacity = val);
        if let Some(policy) = info.fault_policy {
            settings.fault_policy = policy;
        }
        settings
    }
}

pub struct InvokerShared {
    pub(crate) directory: NativeDirectory,
    pub(crate) arena: IsolationArena,
    pub(crate) pointer_fields: PointerFields,
    pub(crate) backend: Box<dyn NativeBackend>,
    pub(crate) settings: InvokerSettings,
    pub(crate) strict: AtomicBool,
}

impl std::fmt::Debug for InvokerShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvokerShared")
            .field("directory", &self.directory.len())
            .field("arena", &self.arena)
            .field("settings", &self.settings)
            .field("strict", &self.strict)
            .finish_non_exhaustive()
    }
}

/// Entry point shared by every thread that calls natives.
///
/// Cloning is cheap and all clones see the same arena, pointer fields and
/// strict flag.
#[derive(Debug, Clone)]
pub struct Invoker {
    inner: Arc<InvokerShared>,
}

impl Invoker {
    pub fn new(
        info: InvokerCreateInfo,
        directory: NativeDirectory,
        backend: impl NativeBackend + 'static,
    ) -> Self {
        let settings = InvokerSettings::from_info(info);
        let arena = IsolationArena::new(settings.slice_count, settings.slice_size);
        let pointer_fields = PointerFields::new(settings.pointer_field_capacity);

        log::debug!(
            "invoker: {} typed natives, strict {}, untyped {:?}",
            directory.len(),
            settings.strict,
            settings.untyped_policy
        );

        let inner = InvokerShared {
            directory,
            arena,
            pointer_fields,
            backend: Box::new(backend),
            strict: AtomicBool::new(settings.strict),
            settings,
        };

        Self {
            inner: Arc::new(inner),
        }
    }

    /// Takes effect for calls whose `invoke` starts afterwards.
    pub fn set_strict_type_enforcement(&self, strict: bool) {
        let old = self.inner.strict.swap(strict, Ordering::AcqRel);
        if old != strict {
            log::info!("strict type enforcement {}", if strict { "on" } else { "off" });
        }
    }

    pub fn is_strict(&self) -> bool {
        self.inner.strict.load(Ordering::Acquire)
    }

    pub fn settings(&self) -> &InvokerSettings {
        &self.inner.settings
    }

    pub fn directory(&self) -> &NativeDirectory {
        &self.inner.directory
    }

    pub fn pointer_fields(&self) -> &PointerFields {
        &self.inner.pointer_fields
    }

    pub fn arena(&self) -> &IsolationArena {
        &self.inner.arena
    }

    /// Starts a call of `native`. The context borrows the invoker, so it
    /// cannot outlive the arena it isolates into.
    pub fn begin(&self, native: NativeIdentifier) -> CallContext<'_> {
        CallContext::new(&self.inner, native)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NativeTable;

    #[test]
    fn create_info_overrides_defaults() {
        let invoker = Invoker::new(
            InvokerCreateInfo {
                slice_count: Some(4),
                strict: Some(true),
                untyped_policy: Some(UntypedPolicy::Isolate),
                ..Default::default()
            },
            NativeDirectory::new(),
            NativeTable::new(),
        );
        let settings = invoker.settings();
        assert_eq!(settings.slice_count, 4);
        assert_eq!(settings.slice_size, 3 * 4096);
        assert!(settings.clamp_untyped_long);
        assert_eq!(settings.untyped_policy, UntypedPolicy::Isolate);
        assert_eq!(invoker.arena().slice_count(), 4);
        assert!(invoker.is_strict());
    }

    #[test]
    fn strict_flag_is_shared_between_clones() {
        let invoker = Invoker::new(
            InvokerCreateInfo {
                slice_count: Some(1),
                ..Default::default()
            },
            NativeDirectory::new(),
            NativeTable::new(),
        );
        let other = invoker.clone();
        assert!(!other.is_strict());
        invoker.set_strict_type_enforcement(true);
        assert!(other.is_strict());
    }
}
