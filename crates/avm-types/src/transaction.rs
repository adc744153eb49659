//! Transaction inputs and contract packaging.

use crate::class_file::{ClassFile, ClassFormatError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// 32-byte contract or account address; also the storage namespace key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Address(pub [u8; 32]);

impl Address {
    pub const ZERO: Address = Address([0u8; 32]);

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        <[u8; 32]>::try_from(bytes).ok().map(Self)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Deployable unit: an entry class plus the raw bytes of every class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractPackage {
    pub entry_class: String,
    pub classes: BTreeMap<String, Vec<u8>>,
}

impl ContractPackage {
    pub fn new(entry_class: impl Into<String>) -> Self {
        Self {
            entry_class: entry_class.into(),
            classes: BTreeMap::new(),
        }
    }

    /// Add a class, encoding it under its own name.
    pub fn with_class(mut self, class: &ClassFile) -> Result<Self, ClassFormatError> {
        self.classes.insert(class.name.clone(), class.encode()?);
        Ok(self)
    }

    pub fn encode(&self) -> Result<Vec<u8>, ClassFormatError> {
        bcs::to_bytes(self).map_err(|e| ClassFormatError::Encode(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ClassFormatError> {
        bcs::from_bytes(bytes).map_err(|e| ClassFormatError::Decode(e.to_string()))
    }

    /// Total size of all raw class bytes.
    pub fn code_size(&self) -> usize {
        self.classes.values().map(Vec::len).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionKind {
    /// Deploy an encoded [`ContractPackage`].
    Create { code: Vec<u8> },
    Call { target: Address },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionContext {
    pub kind: TransactionKind,
    pub sender: Address,
    /// Input made available to the contract through `Blockchain.getData`.
    pub data: Vec<u8>,
    pub energy_limit: u64,
    /// Sender nonce; feeds the address of newly created contracts.
    pub nonce: u64,
}

impl TransactionContext {
    pub fn create(sender: Address, code: Vec<u8>, energy_limit: u64) -> Self {
        Self {
            kind: TransactionKind::Create { code },
            sender,
            data: Vec::new(),
            energy_limit,
            nonce: 0,
        }
    }

    pub fn call(sender: Address, target: Address, data: Vec<u8>, energy_limit: u64) -> Self {
        Self {
            kind: TransactionKind::Call { target },
            sender,
            data,
            energy_limit,
            nonce: 0,
        }
    }

    pub fn with_nonce(mut self, nonce: u64) -> Self {
        self.nonce = nonce;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResultCode {
    Success,
    /// The code was refused before execution.
    Rejected,
    /// The contract called `Blockchain.revert`.
    Reverted,
    OutOfEnergy,
    OutOfStack,
    /// Uncaught exception, malformed execution or internal invariant failure.
    Failed,
}

impl ResultCode {
    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "SUCCESS",
            Self::Rejected => "REJECTED",
            Self::Reverted => "REVERTED",
            Self::OutOfEnergy => "OUT_OF_ENERGY",
            Self::OutOfStack => "OUT_OF_STACK",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_from_bytes() {
        assert!(Address::from_bytes(&[1u8; 31]).is_none());
        let addr = Address::from_bytes(&[0xab; 32]).unwrap();
        assert!(addr.to_hex().starts_with("0xabab"));
    }

    #[test]
    fn test_package_roundtrip() {
        let class = ClassFile::new("com/Main", Some("java/lang/Object"));
        let package = ContractPackage::new("com/Main").with_class(&class).unwrap();
        let bytes = package.encode().unwrap();
        let decoded = ContractPackage::decode(&bytes).unwrap();
        assert_eq!(decoded, package);
        assert_eq!(
            ClassFile::decode(&decoded.classes["com/Main"]).unwrap(),
            class
        );
        assert!(package.code_size() > 4);
    }

    #[test]
    fn test_result_code_display() {
        assert_eq!(ResultCode::OutOfEnergy.to_string(), "OUT_OF_ENERGY");
        assert!(ResultCode::Success.is_success());
        assert!(!ResultCode::Rejected.is_success());
    }
}
