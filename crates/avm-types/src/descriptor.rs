//! Type descriptors.
//!
//! Descriptors follow the JVM grammar restricted to the integral primitive
//! types: `I`, `J`, `B`, `Z`, `C`, `S`, object types `L<name>;` and array
//! types `[<component>`. Method descriptors are `(<params>)<return>` where the
//! return may be `V`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Width of a reference slot, in bytes, for heap accounting.
pub const REFERENCE_WIDTH: u32 = 8;

/// Maximum array dimensions a descriptor may carry.
pub const MAX_ARRAY_DIMENSIONS: u8 = 255;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DescriptorError {
    #[error("empty descriptor")]
    Empty,
    #[error("unsupported descriptor character '{found}' in {descriptor}")]
    Unsupported { descriptor: String, found: char },
    #[error("unterminated object type in {0}")]
    Unterminated(String),
    #[error("trailing characters in {0}")]
    Trailing(String),
    #[error("malformed method descriptor {0}")]
    MalformedMethod(String),
    #[error("array type {0} has too many dimensions")]
    TooManyDimensions(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PrimitiveType {
    Int,
    Long,
    Byte,
    Boolean,
    Char,
    Short,
}

impl PrimitiveType {
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'I' => Some(Self::Int),
            'J' => Some(Self::Long),
            'B' => Some(Self::Byte),
            'Z' => Some(Self::Boolean),
            'C' => Some(Self::Char),
            'S' => Some(Self::Short),
            _ => None,
        }
    }

    pub fn descriptor_char(self) -> char {
        match self {
            Self::Int => 'I',
            Self::Long => 'J',
            Self::Byte => 'B',
            Self::Boolean => 'Z',
            Self::Char => 'C',
            Self::Short => 'S',
        }
    }

    /// Storage width in bytes.
    pub fn width(self) -> u32 {
        match self {
            Self::Byte | Self::Boolean => 1,
            Self::Char | Self::Short => 2,
            Self::Int => 4,
            Self::Long => 8,
        }
    }
}

/// Element of an array type: never itself an array.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ElementType {
    Primitive(PrimitiveType),
    Object(String),
}

impl ElementType {
    pub fn descriptor(&self) -> String {
        match self {
            Self::Primitive(p) => p.descriptor_char().to_string(),
            Self::Object(name) => format!("L{};", name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FieldType {
    Primitive(PrimitiveType),
    Object(String),
    Array { dimensions: u8, element: ElementType },
}

impl FieldType {
    /// Parse a complete field descriptor.
    pub fn parse(descriptor: &str) -> Result<Self, DescriptorError> {
        if descriptor.is_empty() {
            return Err(DescriptorError::Empty);
        }
        let mut pos = 0;
        let ty = parse_field_at(descriptor, &mut pos)?;
        if pos != descriptor.len() {
            return Err(DescriptorError::Trailing(descriptor.to_string()));
        }
        Ok(ty)
    }

    pub fn to_descriptor(&self) -> String {
        match self {
            Self::Primitive(p) => p.descriptor_char().to_string(),
            Self::Object(name) => format!("L{};", name),
            Self::Array {
                dimensions,
                element,
            } => format!("{}{}", "[".repeat(*dimensions as usize), element.descriptor()),
        }
    }

    /// Storage width in bytes; references and arrays occupy a reference slot.
    pub fn width(&self) -> u32 {
        match self {
            Self::Primitive(p) => p.width(),
            Self::Object(_) | Self::Array { .. } => REFERENCE_WIDTH,
        }
    }

    pub fn is_reference(&self) -> bool {
        !matches!(self, Self::Primitive(_))
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_descriptor())
    }
}

fn parse_field_at(descriptor: &str, pos: &mut usize) -> Result<FieldType, DescriptorError> {
    let bytes = descriptor.as_bytes();
    let mut dimensions: usize = 0;
    while *pos < bytes.len() && bytes[*pos] == b'[' {
        dimensions += 1;
        *pos += 1;
    }
    if dimensions > MAX_ARRAY_DIMENSIONS as usize {
        return Err(DescriptorError::TooManyDimensions(descriptor.to_string()));
    }
    let Some(&c) = bytes.get(*pos) else {
        return Err(DescriptorError::Unterminated(descriptor.to_string()));
    };
    let element = if c == b'L' {
        let start = *pos + 1;
        let end = descriptor[start..]
            .find(';')
            .map(|i| start + i)
            .ok_or_else(|| DescriptorError::Unterminated(descriptor.to_string()))?;
        if end == start {
            return Err(DescriptorError::Unterminated(descriptor.to_string()));
        }
        *pos = end + 1;
        ElementType::Object(descriptor[start..end].to_string())
    } else {
        let prim = PrimitiveType::from_char(c as char).ok_or_else(|| {
            DescriptorError::Unsupported {
                descriptor: descriptor.to_string(),
                found: c as char,
            }
        })?;
        *pos += 1;
        ElementType::Primitive(prim)
    };

    Ok(if dimensions == 0 {
        match element {
            ElementType::Primitive(p) => FieldType::Primitive(p),
            ElementType::Object(name) => FieldType::Object(name),
        }
    } else {
        FieldType::Array {
            dimensions: dimensions as u8,
            element,
        }
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodDescriptor {
    pub params: Vec<FieldType>,
    /// `None` for `V`.
    pub ret: Option<FieldType>,
}

impl MethodDescriptor {
    pub fn parse(descriptor: &str) -> Result<Self, DescriptorError> {
        let malformed = || DescriptorError::MalformedMethod(descriptor.to_string());
        let rest = descriptor.strip_prefix('(').ok_or_else(malformed)?;
        let close = rest.find(')').ok_or_else(malformed)?;
        let params_str = &rest[..close];
        let ret_str = &rest[close + 1..];

        let mut params = Vec::new();
        let mut pos = 0;
        while pos < params_str.len() {
            params.push(parse_field_at(params_str, &mut pos)?);
        }
        let ret = match ret_str {
            "V" => None,
            "" => return Err(malformed()),
            other => Some(FieldType::parse(other)?),
        };
        Ok(Self { params, ret })
    }

    pub fn to_descriptor(&self) -> String {
        let params: String = self.params.iter().map(FieldType::to_descriptor).collect();
        let ret = self
            .ret
            .as_ref()
            .map(FieldType::to_descriptor)
            .unwrap_or_else(|| "V".to_string());
        format!("({}){}", params, ret)
    }
}

/// Rewrite every class name embedded in a field or method descriptor.
///
/// Array markers and primitive characters are preserved; only the text
/// between `L` and `;` is passed through `map`.
pub fn map_class_names(descriptor: &str, map: impl Fn(&str) -> String) -> String {
    let mut out = String::with_capacity(descriptor.len());
    let mut rest = descriptor;
    while let Some(c) = rest.chars().next() {
        if c == 'L' {
            if let Some(end) = rest.find(';') {
                out.push('L');
                out.push_str(&map(&rest[1..end]));
                out.push(';');
                rest = &rest[end + 1..];
                continue;
            }
        }
        out.push(c);
        rest = &rest[c.len_utf8()..];
    }
    out
}

/// Internal name or array descriptor used as a type operand
/// (`checkcast`, `instanceof`, `anewarray`, member owners).
pub fn type_operand(name: &str) -> Result<FieldType, DescriptorError> {
    if name.starts_with('[') {
        FieldType::parse(name)
    } else if name.is_empty() {
        Err(DescriptorError::Empty)
    } else {
        Ok(FieldType::Object(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_primitive_and_object() {
        assert_eq!(
            FieldType::parse("I").unwrap(),
            FieldType::Primitive(PrimitiveType::Int)
        );
        assert_eq!(
            FieldType::parse("Ljava/lang/Object;").unwrap(),
            FieldType::Object("java/lang/Object".into())
        );
    }

    #[test]
    fn test_parse_array() {
        let ty = FieldType::parse("[[Lcom/example/Foo;").unwrap();
        assert_eq!(
            ty,
            FieldType::Array {
                dimensions: 2,
                element: ElementType::Object("com/example/Foo".into())
            }
        );
        assert_eq!(ty.to_descriptor(), "[[Lcom/example/Foo;");
        assert_eq!(ty.width(), REFERENCE_WIDTH);
    }

    #[test]
    fn test_floating_point_rejected() {
        assert!(matches!(
            FieldType::parse("D"),
            Err(DescriptorError::Unsupported { found: 'D', .. })
        ));
        assert!(MethodDescriptor::parse("(F)V").is_err());
    }

    #[test]
    fn test_trailing_and_unterminated() {
        assert!(matches!(
            FieldType::parse("II"),
            Err(DescriptorError::Trailing(_))
        ));
        assert!(matches!(
            FieldType::parse("Ljava/lang/Object"),
            Err(DescriptorError::Unterminated(_))
        ));
        assert!(FieldType::parse("L;").is_err());
    }

    #[test]
    fn test_method_descriptor() {
        let md = MethodDescriptor::parse("(I[JLfoo/Bar;)[B").unwrap();
        assert_eq!(md.params.len(), 3);
        assert_eq!(md.ret.as_ref().map(FieldType::to_descriptor).unwrap(), "[B");
        assert_eq!(md.to_descriptor(), "(I[JLfoo/Bar;)[B");

        let void = MethodDescriptor::parse("()V").unwrap();
        assert!(void.params.is_empty());
        assert!(void.ret.is_none());
        assert!(MethodDescriptor::parse("()").is_err());
        assert!(MethodDescriptor::parse("I)V").is_err());
    }

    #[test]
    fn test_map_class_names() {
        let mapped = map_class_names("(Ljava/lang/Object;[Ljava/lang/String;I)Lcom/Foo;", |n| {
            if n.starts_with("java/") {
                format!("s/{}", n)
            } else {
                n.to_string()
            }
        });
        assert_eq!(
            mapped,
            "(Ls/java/lang/Object;[Ls/java/lang/String;I)Lcom/Foo;"
        );
    }

    #[test]
    fn test_type_operand() {
        assert_eq!(
            type_operand("com/Foo").unwrap(),
            FieldType::Object("com/Foo".into())
        );
        assert!(matches!(
            type_operand("[I").unwrap(),
            FieldType::Array { dimensions: 1, .. }
        ));
    }
}
