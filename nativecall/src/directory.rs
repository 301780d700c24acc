use std::collections::HashMap;

use crate::{NativeIdentifier, NativeSignature, SignatureError};

/// Signatures known at startup. Read-only once built.
#[derive(Debug, Default)]
pub struct NativeDirectory {
    table: HashMap<NativeIdentifier, NativeSignature, ahash::RandomState>,
}

impl NativeDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Later entries replace earlier ones with the same identifier.
    pub fn from_table<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (NativeIdentifier, NativeSignature)>,
    {
        let mut directory = Self::new();
        for (id, signature) in entries {
            directory.insert(id, signature);
        }
        log::debug!("native directory loaded {} signatures", directory.len());
        directory
    }

    /// Loads a table in the compact `u32` layout, see
    /// [`NativeSignature::from_packed`]. Stops at the first malformed entry.
    pub fn from_packed(
        entries: &[(u64, &[u32])],
    ) -> Result<Self, (NativeIdentifier, SignatureError)> {
        let mut decoded = Vec::with_capacity(entries.len());
        for &(hash, words) in entries {
            let id = NativeIdentifier(hash);
            let signature =
                NativeSignature::from_packed(words).map_err(|err| (id, err))?;
            decoded.push((id, signature));
        }
        Ok(Self::from_table(decoded))
    }

    fn insert(&mut self, id: NativeIdentifier, signature: NativeSignature) {
        if self.table.insert(id, signature).is_some() {
            log::warn!("duplicate signature for native {id}, keeping the later one");
        }
    }

    pub fn lookup(&self, id: NativeIdentifier) -> Option<&NativeSignature> {
        self.table.get(&id)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}
