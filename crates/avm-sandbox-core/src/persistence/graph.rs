//! The per-invocation view of one contract's persistent objects.

use super::codec::{NodeRef, SerializedRepresentation};
use super::store::{KernelStore, StorageKey};
use crate::errors::PersistenceError;
use avm_types::Address;
use std::collections::HashMap;

/// Size of each of the two instance id ranges.
pub const HIGH_RANGE_BIAS: u64 = 1_000_000_000;

/// Constant node hashes live in `1..=MAX_CONSTANT_HASH`.
pub const MAX_CONSTANT_HASH: i32 = 99;

/// Byte length of the internal record: next id, id bias, delta.
pub const INTERNAL_RECORD_LEN: usize = 8 + 8 + 32;

/// One instance the current invocation has touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistentNode {
    pub instance_id: u64,
    pub identity_hash: i32,
    pub type_name: String,
    /// The instance exists in storage (as opposed to allocated this session).
    pub stored: bool,
    representation: Option<SerializedRepresentation>,
}

impl PersistentNode {
    pub fn is_loaded(&self) -> bool {
        self.representation.is_some()
    }

    pub fn representation(&self) -> Option<&SerializedRepresentation> {
        self.representation.as_ref()
    }

    pub fn node_ref(&self) -> NodeRef {
        NodeRef::Instance {
            type_name: self.type_name.clone(),
            identity_hash: self.identity_hash,
            instance_id: self.instance_id,
        }
    }
}

/// Persistent object graph of one contract namespace.
///
/// Owns the instance id counter and the consensus delta for the lifetime of
/// one invocation. Nothing reaches the store's internal record until
/// [`ObjectGraph::flush`].
pub struct ObjectGraph<'s> {
    store: &'s mut dyn KernelStore,
    address: Address,
    nodes: HashMap<u64, PersistentNode>,
    next_instance_id: u64,
    /// 0 or [`HIGH_RANGE_BIAS`]; which half of the id space is active.
    instance_id_bias: u64,
    delta: [u8; 32],
    initial_root: Option<SerializedRepresentation>,
    bytes_read: u64,
    bytes_written: u64,
}

impl std::fmt::Debug for ObjectGraph<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectGraph")
            .field("address", &self.address)
            .field("nodes", &self.nodes.len())
            .field("next_instance_id", &self.next_instance_id)
            .field("instance_id_bias", &self.instance_id_bias)
            .field("delta", &hex::encode(self.delta))
            .finish()
    }
}

impl<'s> ObjectGraph<'s> {
    /// Open the namespace of `address`, reading the internal record if the
    /// namespace has one.
    pub fn open(store: &'s mut dyn KernelStore, address: Address) -> Result<Self, PersistenceError> {
        let (next_instance_id, instance_id_bias, delta) =
            match store.get_storage(&address, &StorageKey::InternalData.to_bytes()) {
                Some(raw) => decode_internal_record(&raw)?,
                None => (1, 0, [0u8; 32]),
            };
        tracing::trace!(%address, next_instance_id, instance_id_bias, "object graph opened");
        Ok(Self {
            store,
            address,
            nodes: HashMap::new(),
            next_instance_id,
            instance_id_bias,
            delta,
            initial_root: None,
            bytes_read: 0,
            bytes_written: 0,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn code(&self) -> Option<Vec<u8>> {
        self.store.get_code(&self.address)
    }

    pub fn put_code(&mut self, code: Vec<u8>) {
        self.store.put_code(&self.address, code);
    }

    pub fn metadata(&self) -> Option<Vec<u8>> {
        self.store
            .get_storage(&self.address, &StorageKey::ContractEnvironment.to_bytes())
    }

    pub fn set_metadata(&mut self, data: Vec<u8>) {
        self.store
            .put_storage(&self.address, &StorageKey::ContractEnvironment.to_bytes(), data);
    }

    // =========================================================================
    // Root
    // =========================================================================

    /// Read the root state. Starts a fresh view: cached nodes are dropped.
    pub fn get_root(&mut self) -> Result<SerializedRepresentation, PersistenceError> {
        self.nodes.clear();
        let raw = self
            .store
            .get_storage(&self.address, &StorageKey::ClassStatics.to_bytes())
            .ok_or_else(|| PersistenceError::MissingRoot(self.address.to_hex()))?;
        self.bytes_read += raw.len() as u64;
        let root = SerializedRepresentation::decode(&raw)?;
        self.initial_root = Some(root.clone());
        Ok(root)
    }

    /// Write the root state, replacing the root read this session (if any)
    /// in the consensus delta.
    pub fn set_root(&mut self, root: &SerializedRepresentation) -> Result<(), PersistenceError> {
        let raw = root.encode()?;
        self.bytes_written += raw.len() as u64;
        self.store
            .put_storage(&self.address, &StorageKey::ClassStatics.to_bytes(), raw);
        if let Some(initial) = self.initial_root.take() {
            xor_into(&mut self.delta, &initial.consensus_hash());
        }
        xor_into(&mut self.delta, &root.consensus_hash());
        self.initial_root = Some(root.clone());
        Ok(())
    }

    // =========================================================================
    // Nodes
    // =========================================================================

    /// Allocate a fresh instance id for a newly created object.
    pub fn new_node(&mut self, identity_hash: i32, type_name: &str) -> Result<u64, PersistenceError> {
        let instance_id = self.next_instance_id;
        let limit = self.instance_id_bias + HIGH_RANGE_BIAS;
        if instance_id + 1 >= limit {
            return Err(PersistenceError::InstanceIdOverflow {
                next: instance_id + 1,
                limit,
            });
        }
        self.next_instance_id += 1;
        self.nodes.insert(
            instance_id,
            PersistentNode {
                instance_id,
                identity_hash,
                type_name: type_name.to_string(),
                stored: false,
                representation: None,
            },
        );
        Ok(instance_id)
    }

    /// The node for a stored instance; a lazy stub if not touched yet.
    pub fn existing_node(&mut self, identity_hash: i32, type_name: &str, instance_id: u64) -> &PersistentNode {
        self.nodes.entry(instance_id).or_insert_with(|| PersistentNode {
            instance_id,
            identity_hash,
            type_name: type_name.to_string(),
            stored: true,
            representation: None,
        })
    }

    pub fn constant_node(&self, hash: i32) -> Result<NodeRef, PersistenceError> {
        if (1..=MAX_CONSTANT_HASH).contains(&hash) {
            Ok(NodeRef::Constant { hash })
        } else {
            Err(PersistenceError::InvalidConstantNode(hash))
        }
    }

    pub fn class_node(&self, class_name: &str) -> NodeRef {
        NodeRef::Class {
            name: class_name.to_string(),
        }
    }

    pub fn node(&self, instance_id: u64) -> Option<&PersistentNode> {
        self.nodes.get(&instance_id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    // =========================================================================
    // Instances
    // =========================================================================

    /// Raw read of one instance's stored representation.
    pub fn load_instance(&mut self, instance_id: u64) -> Result<Option<SerializedRepresentation>, PersistenceError> {
        let key = StorageKey::Instance(instance_id + self.instance_id_bias).to_bytes();
        let Some(raw) = self.store.get_storage(&self.address, &key) else {
            return Ok(None);
        };
        self.bytes_read += raw.len() as u64;
        tracing::trace!(instance_id, bytes = raw.len(), "instance loaded");
        SerializedRepresentation::decode(&raw).map(Some)
    }

    /// The node's representation, loading it on first use.
    pub fn load_node(&mut self, instance_id: u64) -> Result<SerializedRepresentation, PersistenceError> {
        if let Some(rep) = self.nodes.get(&instance_id).and_then(|n| n.representation.clone()) {
            return Ok(rep);
        }
        let rep = self
            .load_instance(instance_id)?
            .ok_or(PersistenceError::MissingInstance(instance_id))?;
        if let Some(node) = self.nodes.get_mut(&instance_id) {
            node.representation = Some(rep.clone());
        }
        Ok(rep)
    }

    /// Write one instance. `previous` is the representation being replaced,
    /// or `None` for a first write.
    pub fn store_instance(
        &mut self,
        instance_id: u64,
        previous: Option<&SerializedRepresentation>,
        updated: &SerializedRepresentation,
    ) -> Result<(), PersistenceError> {
        let raw = updated.encode()?;
        self.bytes_written += raw.len() as u64;
        let key = StorageKey::Instance(instance_id + self.instance_id_bias).to_bytes();
        tracing::trace!(instance_id, bytes = raw.len(), overwrite = previous.is_some(), "instance stored");
        self.store.put_storage(&self.address, &key, raw);

        if let Some(previous) = previous {
            xor_into(&mut self.delta, &previous.consensus_hash());
        }
        xor_into(&mut self.delta, &updated.consensus_hash());
        if let Some(node) = self.nodes.get_mut(&instance_id) {
            node.stored = true;
            node.representation = Some(updated.clone());
        }
        Ok(())
    }

    // =========================================================================
    // Commit
    // =========================================================================

    /// Persist the id counter, bias and delta as one write.
    pub fn flush(&mut self) {
        let record = encode_internal_record(self.next_instance_id, self.instance_id_bias, &self.delta);
        self.store
            .put_storage(&self.address, &StorageKey::InternalData.to_bytes(), record);
        tracing::debug!(
            address = %self.address,
            next_instance_id = self.next_instance_id,
            digest = %hex::encode(self.delta),
            "object graph flushed"
        );
    }

    pub fn consensus_digest(&self) -> [u8; 32] {
        self.delta
    }

    /// Move to the other id range and restart the counter there, so a
    /// reset namespace never reuses ids of its previous generation.
    pub fn switch_semispace(&mut self) {
        self.instance_id_bias = if self.instance_id_bias == 0 { HIGH_RANGE_BIAS } else { 0 };
        self.next_instance_id = 1;
        self.nodes.clear();
    }

    pub fn instance_id_bias(&self) -> u64 {
        self.instance_id_bias
    }

    pub fn next_instance_id(&self) -> u64 {
        self.next_instance_id
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

fn xor_into(delta: &mut [u8; 32], hash: &[u8; 32]) {
    for (d, h) in delta.iter_mut().zip(hash) {
        *d ^= h;
    }
}

fn encode_internal_record(next: u64, bias: u64, delta: &[u8; 32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(INTERNAL_RECORD_LEN);
    out.extend_from_slice(&next.to_be_bytes());
    out.extend_from_slice(&bias.to_be_bytes());
    out.extend_from_slice(delta);
    out
}

fn decode_internal_record(raw: &[u8]) -> Result<(u64, u64, [u8; 32]), PersistenceError> {
    if raw.len() != INTERNAL_RECORD_LEN {
        return Err(PersistenceError::Corrupt(format!(
            "internal record is {} bytes, expected {}",
            raw.len(),
            INTERNAL_RECORD_LEN
        )));
    }
    let mut next = [0u8; 8];
    let mut bias = [0u8; 8];
    let mut delta = [0u8; 32];
    next.copy_from_slice(&raw[0..8]);
    bias.copy_from_slice(&raw[8..16]);
    delta.copy_from_slice(&raw[16..48]);
    Ok((u64::from_be_bytes(next), u64::from_be_bytes(bias), delta))
}
