//! Key-value storage boundary.

use avm_types::Address;
use std::collections::BTreeMap;

/// Fixed keys inside one contract namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StorageKey {
    /// Serialized static state of all user classes; the graph root.
    ClassStatics,
    /// Instance id counter, id bias and consensus delta.
    InternalData,
    /// Runtime-owned metadata such as the next identity hash code.
    ContractEnvironment,
    Instance(u64),
}

impl StorageKey {
    pub fn to_bytes(self) -> Vec<u8> {
        match self {
            Self::ClassStatics => vec![0x00],
            Self::InternalData => vec![0x01],
            Self::ContractEnvironment => vec![0x02],
            Self::Instance(id) => {
                let mut key = Vec::with_capacity(9);
                key.push(0x03);
                key.extend_from_slice(&id.to_be_bytes());
                key
            }
        }
    }
}

/// Host storage addressed by (namespace, key).
pub trait KernelStore {
    fn get_storage(&self, address: &Address, key: &[u8]) -> Option<Vec<u8>>;

    fn put_storage(&mut self, address: &Address, key: &[u8], value: Vec<u8>);

    fn get_code(&self, address: &Address) -> Option<Vec<u8>>;

    fn put_code(&mut self, address: &Address, code: Vec<u8>);
}

/// Plain in-memory store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InMemoryKernel {
    storage: BTreeMap<(Address, Vec<u8>), Vec<u8>>,
    code: BTreeMap<Address, Vec<u8>>,
}

impl InMemoryKernel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of storage entries across all namespaces.
    pub fn storage_len(&self) -> usize {
        self.storage.len()
    }

    pub fn has_contract(&self, address: &Address) -> bool {
        self.code.contains_key(address)
    }
}

impl KernelStore for InMemoryKernel {
    fn get_storage(&self, address: &Address, key: &[u8]) -> Option<Vec<u8>> {
        self.storage.get(&(*address, key.to_vec())).cloned()
    }

    fn put_storage(&mut self, address: &Address, key: &[u8], value: Vec<u8>) {
        self.storage.insert((*address, key.to_vec()), value);
    }

    fn get_code(&self, address: &Address) -> Option<Vec<u8>> {
        self.code.get(address).cloned()
    }

    fn put_code(&mut self, address: &Address, code: Vec<u8>) {
        self.code.insert(*address, code);
    }
}

/// Writes buffered on top of a read-only base.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateChanges {
    storage: BTreeMap<(Address, Vec<u8>), Vec<u8>>,
    code: BTreeMap<Address, Vec<u8>>,
}

impl StateChanges {
    pub fn len(&self) -> usize {
        self.storage.len() + self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty() && self.code.is_empty()
    }

    /// Write every buffered entry into `store`.
    pub fn apply_to(self, store: &mut dyn KernelStore) {
        tracing::trace!(entries = self.len(), "applying state changes");
        for ((address, key), value) in self.storage {
            store.put_storage(&address, &key, value);
        }
        for (address, code) in self.code {
            store.put_code(&address, code);
        }
    }
}

/// Buffers writes so a failed execution can be discarded by dropping the
/// overlay. Reads see buffered writes first.
pub struct StorageOverlay<'a> {
    base: &'a dyn KernelStore,
    changes: StateChanges,
}

impl<'a> StorageOverlay<'a> {
    pub fn new(base: &'a dyn KernelStore) -> Self {
        Self {
            base,
            changes: StateChanges::default(),
        }
    }

    pub fn into_changes(self) -> StateChanges {
        self.changes
    }
}

impl KernelStore for StorageOverlay<'_> {
    fn get_storage(&self, address: &Address, key: &[u8]) -> Option<Vec<u8>> {
        match self.changes.storage.get(&(*address, key.to_vec())) {
            Some(v) => Some(v.clone()),
            None => self.base.get_storage(address, key),
        }
    }

    fn put_storage(&mut self, address: &Address, key: &[u8], value: Vec<u8>) {
        self.changes.storage.insert((*address, key.to_vec()), value);
    }

    fn get_code(&self, address: &Address) -> Option<Vec<u8>> {
        match self.changes.code.get(address) {
            Some(c) => Some(c.clone()),
            None => self.base.get_code(address),
        }
    }

    fn put_code(&mut self, address: &Address, code: Vec<u8>) {
        self.changes.code.insert(*address, code);
    }
}
