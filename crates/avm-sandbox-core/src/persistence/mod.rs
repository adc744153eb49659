//! Persistent object graph.
//!
//! Maps live contract objects onto a key-value namespace. Every stored
//! object gets a stable instance id; the namespace's statics form the graph
//! root. Each write folds the old and new representation hashes into a
//! 32-byte XOR accumulator, so the digest is independent of write order and
//! an overwrite cancels the value it replaces.
//!
//! ```text
//! ClassStatics          root representation
//! InternalData          next id (8) | id bias (8) | delta (32)
//! ContractEnvironment   runtime metadata
//! Instance(id + bias)   one representation per object
//! ```

mod codec;
mod graph;
mod store;

pub use codec::{NodeRef, SerializedRepresentation};
pub use graph::{
    ObjectGraph, PersistentNode, HIGH_RANGE_BIAS, INTERNAL_RECORD_LEN, MAX_CONSTANT_HASH,
};
pub use store::{InMemoryKernel, KernelStore, StateChanges, StorageKey, StorageOverlay};
