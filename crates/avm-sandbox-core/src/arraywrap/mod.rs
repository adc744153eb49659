//! Array wrapper generation.
//!
//! Every array type the sandbox sees is replaced by a generated wrapper
//! class. One-dimensional primitive arrays extend a runtime storage class
//! (`IntArray`, ...); everything else extends `ObjectArray` and mirrors the
//! element type's own hierarchy so array covariance keeps working.
//!
//! Generation is a pure function of the wrapper descriptor and the shape of
//! the element type. [`WrapperCache`] memoizes it and is safe to share.

mod cache;
mod descriptor;
mod generator;

pub use cache::{GeneratedClass, WrapperCache};
pub use descriptor::WrapperDescriptor;
pub use generator::{
    factory_descriptor, generate_class, generate_interface, ElementShape, TypeResolver,
    CLONE_METHOD, FACTORY_METHOD,
};

use avm_types::{ArrayKind, PrimitiveType, REFERENCE_WIDTH};

/// Abstract base of every array wrapper.
pub const ARRAY_BASE: &str = "avm/arraywrapper/Array";
pub const OBJECT_ARRAY: &str = "avm/arraywrapper/ObjectArray";
pub const INT_ARRAY: &str = "avm/arraywrapper/IntArray";
pub const LONG_ARRAY: &str = "avm/arraywrapper/LongArray";
pub const BYTE_ARRAY: &str = "avm/arraywrapper/ByteArray";
pub const CHAR_ARRAY: &str = "avm/arraywrapper/CharArray";
pub const SHORT_ARRAY: &str = "avm/arraywrapper/ShortArray";

/// Opaque handle to raw array storage, used by clone.
pub const BACKING_CLASS: &str = "avm/arraywrapper/Backing";

/// Token type of the deserialization constructor.
pub const DESERIALIZER_INTERFACE: &str = "avm/internal/IDeserializer";

/// Static energy hook the generated factories call.
pub const CHARGE_METHOD: &str = "chargeEnergy";

/// Storage base class for a one-dimensional array of `kind`.
pub fn base_class_for(kind: ArrayKind) -> &'static str {
    match kind {
        ArrayKind::Int => INT_ARRAY,
        ArrayKind::Long => LONG_ARRAY,
        ArrayKind::Byte => BYTE_ARRAY,
        ArrayKind::Char => CHAR_ARRAY,
        ArrayKind::Short => SHORT_ARRAY,
        ArrayKind::Reference => OBJECT_ARRAY,
    }
}

/// Energy charged per allocated element.
pub fn element_energy(element: Option<PrimitiveType>) -> i64 {
    element.map_or(REFERENCE_WIDTH, PrimitiveType::width) as i64
}

/// Descriptor of the element accessor on the storage base class for `kind`.
pub fn accessor_descriptors(kind: ArrayKind) -> (&'static str, &'static str) {
    match kind {
        ArrayKind::Int => ("(I)I", "(II)V"),
        ArrayKind::Long => ("(I)J", "(IJ)V"),
        ArrayKind::Byte => ("(I)B", "(IB)V"),
        ArrayKind::Char => ("(I)C", "(IC)V"),
        ArrayKind::Short => ("(I)S", "(IS)V"),
        ArrayKind::Reference => ("(I)Ls/java/lang/Object;", "(ILs/java/lang/Object;)V"),
    }
}
