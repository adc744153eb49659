//! Structured class files and their deterministic binary encoding.

use crate::instruction::{Instruction, Label};
use serde::{Deserialize, Serialize};

/// Leading bytes of every encoded class file.
pub const CLASS_MAGIC: [u8; 4] = *b"AVMC";

/// Current class-file format version.
pub const CLASS_FORMAT_VERSION: u16 = 1;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClassFormatError {
    #[error("class bytes too short or missing magic header")]
    BadMagic,
    #[error("unsupported class format version {0}")]
    UnsupportedVersion(u16),
    #[error("class decoding failed: {0}")]
    Decode(String),
    #[error("class encoding failed: {0}")]
    Encode(String),
    #[error("label {0} used but never bound")]
    UnboundLabel(usize),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClassFlags {
    pub is_interface: bool,
    pub is_abstract: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodFlags {
    pub is_static: bool,
    pub is_abstract: bool,
    /// Implemented by the runtime; only the shadow library may declare these.
    pub is_native: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDecl {
    pub name: String,
    pub descriptor: String,
    pub is_static: bool,
}

/// Protected range `[start, end)` with handler entry `handler`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionHandler {
    pub start: Label,
    pub end: Label,
    pub handler: Label,
    /// `None` catches everything.
    pub catch_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodDecl {
    pub name: String,
    pub descriptor: String,
    pub flags: MethodFlags,
    pub max_locals: u16,
    pub code: Vec<Instruction>,
    pub handlers: Vec<ExceptionHandler>,
}

impl MethodDecl {
    pub fn new(name: impl Into<String>, descriptor: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            descriptor: descriptor.into(),
            flags: MethodFlags::default(),
            max_locals: 0,
            code: Vec::new(),
            handlers: Vec::new(),
        }
    }

    pub fn with_static(mut self) -> Self {
        self.flags.is_static = true;
        self
    }

    pub fn with_abstract(mut self) -> Self {
        self.flags.is_abstract = true;
        self
    }

    pub fn with_native(mut self) -> Self {
        self.flags.is_native = true;
        self
    }

    pub fn with_max_locals(mut self, max_locals: u16) -> Self {
        self.max_locals = max_locals;
        self
    }

    pub fn with_code(mut self, code: Vec<Instruction>, handlers: Vec<ExceptionHandler>) -> Self {
        self.code = code;
        self.handlers = handlers;
        self
    }

    pub fn signature(&self) -> String {
        format!("{}{}", self.name, self.descriptor)
    }

    pub fn has_body(&self) -> bool {
        !self.flags.is_abstract && !self.flags.is_native
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassFile {
    pub version: u16,
    pub name: String,
    /// `None` only for the root of the class hierarchy.
    pub super_name: Option<String>,
    pub interfaces: Vec<String>,
    pub flags: ClassFlags,
    pub fields: Vec<FieldDecl>,
    pub methods: Vec<MethodDecl>,
}

impl ClassFile {
    pub fn new(name: impl Into<String>, super_name: Option<&str>) -> Self {
        Self {
            version: CLASS_FORMAT_VERSION,
            name: name.into(),
            super_name: super_name.map(str::to_string),
            interfaces: Vec::new(),
            flags: ClassFlags::default(),
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }

    pub fn with_interface_flag(mut self) -> Self {
        self.flags.is_interface = true;
        self.flags.is_abstract = true;
        self
    }

    pub fn with_abstract(mut self) -> Self {
        self.flags.is_abstract = true;
        self
    }

    pub fn with_interfaces<I, S>(mut self, interfaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.interfaces = interfaces.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_field(mut self, name: &str, descriptor: &str, is_static: bool) -> Self {
        self.fields.push(FieldDecl {
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            is_static,
        });
        self
    }

    pub fn with_method(mut self, method: MethodDecl) -> Self {
        self.methods.push(method);
        self
    }

    pub fn method(&self, name: &str, descriptor: &str) -> Option<&MethodDecl> {
        self.methods
            .iter()
            .find(|m| m.name == name && m.descriptor == descriptor)
    }

    pub fn method_index(&self, name: &str, descriptor: &str) -> Option<usize> {
        self.methods
            .iter()
            .position(|m| m.name == name && m.descriptor == descriptor)
    }

    pub fn instance_fields(&self) -> impl Iterator<Item = &FieldDecl> {
        self.fields.iter().filter(|f| !f.is_static)
    }

    pub fn static_fields(&self) -> impl Iterator<Item = &FieldDecl> {
        self.fields.iter().filter(|f| f.is_static)
    }

    pub fn is_interface(&self) -> bool {
        self.flags.is_interface
    }

    /// Encode as magic header followed by the bcs body.
    pub fn encode(&self) -> Result<Vec<u8>, ClassFormatError> {
        let body = bcs::to_bytes(self).map_err(|e| ClassFormatError::Encode(e.to_string()))?;
        let mut out = Vec::with_capacity(CLASS_MAGIC.len() + body.len());
        out.extend_from_slice(&CLASS_MAGIC);
        out.extend_from_slice(&body);
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ClassFormatError> {
        let body = bytes
            .strip_prefix(CLASS_MAGIC.as_slice())
            .ok_or(ClassFormatError::BadMagic)?;
        let class: ClassFile =
            bcs::from_bytes(body).map_err(|e| ClassFormatError::Decode(e.to_string()))?;
        if class.version != CLASS_FORMAT_VERSION {
            return Err(ClassFormatError::UnsupportedVersion(class.version));
        }
        Ok(class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::Instruction;

    fn sample() -> ClassFile {
        ClassFile::new("com/example/Counter", Some("java/lang/Object"))
            .with_field("count", "I", true)
            .with_field("owner", "Ljava/lang/Object;", false)
            .with_method(
                MethodDecl::new("main", "()I")
                    .with_static()
                    .with_code(vec![Instruction::IConst(7), Instruction::IReturn], vec![]),
            )
    }

    #[test]
    fn test_encode_decode() {
        let class = sample();
        let bytes = class.encode().unwrap();
        assert_eq!(&bytes[..4], b"AVMC");
        assert_eq!(ClassFile::decode(&bytes).unwrap(), class);
    }

    #[test]
    fn test_encoding_is_deterministic() {
        assert_eq!(sample().encode().unwrap(), sample().encode().unwrap());
    }

    #[test]
    fn test_bad_magic() {
        assert_eq!(
            ClassFile::decode(b"JAVA1234"),
            Err(ClassFormatError::BadMagic)
        );
        assert_eq!(ClassFile::decode(b"AV"), Err(ClassFormatError::BadMagic));
    }

    #[test]
    fn test_unsupported_version() {
        let mut class = sample();
        class.version = 9;
        let bytes = class.encode().unwrap();
        assert_eq!(
            ClassFile::decode(&bytes),
            Err(ClassFormatError::UnsupportedVersion(9))
        );
    }

    #[test]
    fn test_field_partition() {
        let class = sample();
        assert_eq!(class.static_fields().count(), 1);
        assert_eq!(class.instance_fields().next().unwrap().name, "owner");
        assert_eq!(class.method_index("main", "()I"), Some(0));
        assert!(class.method("main", "()V").is_none());
    }
}
