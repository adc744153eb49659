//! Stored form of one node and its consensus hash.

use crate::errors::PersistenceError;
use crate::naming::java_string_hash;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

/// A reference slot inside a serialized node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeRef {
    /// One of the runtime's fixed constant objects.
    Constant { hash: i32 },
    /// A class object, named by its sandbox class name.
    Class { name: String },
    Instance {
        type_name: String,
        identity_hash: i32,
        instance_id: u64,
    },
}

impl NodeRef {
    pub fn identity_hash(&self) -> i32 {
        match self {
            Self::Constant { hash } => *hash,
            Self::Class { name } => java_string_hash(name),
            Self::Instance { identity_hash, .. } => *identity_hash,
        }
    }
}

/// Opaque payload plus ordered references, some of which may be null.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedRepresentation {
    pub data: Vec<u8>,
    pub references: Vec<Option<NodeRef>>,
}

impl SerializedRepresentation {
    pub fn new(data: Vec<u8>, references: Vec<Option<NodeRef>>) -> Self {
        Self { data, references }
    }

    /// Keccak-256 over the 4-byte big-endian identity hash of every reference
    /// (0 for null) followed by the payload.
    pub fn consensus_hash(&self) -> [u8; 32] {
        let mut buffer = Vec::with_capacity(self.references.len() * 4 + self.data.len());
        for reference in &self.references {
            let hash = reference.as_ref().map(NodeRef::identity_hash).unwrap_or(0);
            buffer.extend_from_slice(&hash.to_be_bytes());
        }
        buffer.extend_from_slice(&self.data);
        let mut out = [0u8; 32];
        out.copy_from_slice(&Keccak256::digest(&buffer));
        out
    }

    pub fn encode(&self) -> Result<Vec<u8>, PersistenceError> {
        bcs::to_bytes(self).map_err(|e| PersistenceError::Corrupt(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, PersistenceError> {
        bcs::from_bytes(bytes).map_err(|e| PersistenceError::Corrupt(e.to_string()))
    }

    /// Size charged for storage traffic.
    pub fn stored_size(&self) -> usize {
        self.data.len() + self.references.len() * 4
    }
}
