use super::OBJECT_ARRAY;
use avm_types::{
    ArrayKind, DescriptorError, ElementType, FieldType, PrimitiveType,
    ARRAY_INTERFACE_WRAPPER_PREFIX, ARRAY_WRAPPER_PREFIX,
};
use std::fmt;

/// An array type reduced to (element, dimensions).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WrapperDescriptor {
    pub element: ElementType,
    pub dimensions: u8,
}

impl WrapperDescriptor {
    pub fn new(element: ElementType, dimensions: u8) -> Self {
        Self {
            element,
            dimensions,
        }
    }

    /// Parse an array descriptor such as `[[I` or `[Lcom/Foo;`.
    pub fn from_array_descriptor(descriptor: &str) -> Result<Self, DescriptorError> {
        match FieldType::parse(descriptor)? {
            FieldType::Array {
                dimensions,
                element,
            } => Ok(Self::new(element, dimensions)),
            _ => Err(DescriptorError::Unsupported {
                descriptor: descriptor.to_string(),
                found: descriptor.chars().next().unwrap_or(' '),
            }),
        }
    }

    pub fn array_descriptor(&self) -> String {
        format!(
            "{}{}",
            "[".repeat(self.dimensions as usize),
            self.element.descriptor()
        )
    }

    /// Generated class name: `avm/arraywrapper/` + `$` per dimension + element.
    pub fn class_name(&self) -> String {
        format!(
            "{}{}{}",
            ARRAY_WRAPPER_PREFIX,
            "$".repeat(self.dimensions as usize),
            element_suffix(&self.element)
        )
    }

    /// Generated interface name for reference elements:
    /// `avm/arraywrapper/interface/` + `_` per dimension + element.
    pub fn interface_name(&self) -> String {
        format!(
            "{}{}{}",
            ARRAY_INTERFACE_WRAPPER_PREFIX,
            "_".repeat(self.dimensions as usize),
            element_suffix(&self.element)
        )
    }

    pub fn from_class_name(name: &str) -> Option<Self> {
        let rest = name.strip_prefix(ARRAY_WRAPPER_PREFIX)?;
        if rest.starts_with("interface/") {
            return None;
        }
        parse_suffix(rest, '$')
    }

    pub fn from_interface_name(name: &str) -> Option<Self> {
        parse_suffix(name.strip_prefix(ARRAY_INTERFACE_WRAPPER_PREFIX)?, '_')
    }

    /// Same element, one dimension fewer; `None` at one dimension.
    pub fn child(&self) -> Option<Self> {
        (self.dimensions > 1).then(|| Self::new(self.element.clone(), self.dimensions - 1))
    }

    /// Same dimensions over a different element class.
    pub fn with_element_class(&self, class_name: &str) -> Self {
        Self::new(ElementType::Object(class_name.to_string()), self.dimensions)
    }

    pub fn primitive(&self) -> Option<PrimitiveType> {
        match self.element {
            ElementType::Primitive(p) => Some(p),
            ElementType::Object(_) => None,
        }
    }

    /// Primitive element type stored directly by this level, if any.
    pub fn leaf_primitive(&self) -> Option<PrimitiveType> {
        if self.dimensions == 1 {
            self.primitive()
        } else {
            None
        }
    }

    /// Storage kind of this level.
    pub fn storage_kind(&self) -> ArrayKind {
        self.leaf_primitive()
            .map_or(ArrayKind::Reference, ArrayKind::for_primitive)
    }

    /// Runtime class this wrapper ultimately stores through.
    pub fn storage_base(&self) -> &'static str {
        match self.leaf_primitive() {
            Some(p) => super::base_class_for(ArrayKind::for_primitive(p)),
            None => OBJECT_ARRAY,
        }
    }
}

impl fmt::Display for WrapperDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.array_descriptor())
    }
}

fn element_suffix(element: &ElementType) -> String {
    match element {
        ElementType::Primitive(p) => p.descriptor_char().to_string(),
        ElementType::Object(name) => format!("L{}", name),
    }
}

fn parse_suffix(rest: &str, marker: char) -> Option<WrapperDescriptor> {
    let body = rest.trim_start_matches(marker);
    let dimensions = u8::try_from(rest.len() - body.len()).ok()?;
    if dimensions == 0 {
        return None;
    }
    let element = match body.strip_prefix('L') {
        Some(name) if !name.is_empty() => ElementType::Object(name.to_string()),
        Some(_) => return None,
        None => {
            let mut chars = body.chars();
            let c = chars.next()?;
            if chars.next().is_some() {
                return None;
            }
            ElementType::Primitive(PrimitiveType::from_char(c)?)
        }
    };
    Some(WrapperDescriptor::new(element, dimensions))
}
