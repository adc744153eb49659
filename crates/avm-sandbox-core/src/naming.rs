//! Class-name mapping between the host namespace and the sandbox.

use avm_types::descriptor::map_class_names;
use avm_types::{JDK_PREFIX, SHADOW_PREFIX};

/// Map a host standard-library class name into the shadow namespace.
///
/// Array descriptors used as type operands are mapped element-wise; every
/// other name is returned unchanged.
pub fn shadow_class_name(name: &str) -> String {
    if name.starts_with('[') {
        shadow_descriptor(name)
    } else if name.starts_with(JDK_PREFIX) {
        format!("{}{}", SHADOW_PREFIX, name)
    } else {
        name.to_string()
    }
}

/// Map every class name inside a field or method descriptor.
pub fn shadow_descriptor(descriptor: &str) -> String {
    map_class_names(descriptor, shadow_class_name)
}

/// Java's `String.hashCode` over the UTF-16 code units of `s`.
///
/// Used wherever a stable, platform-independent hash of a name is needed.
pub fn java_string_hash(s: &str) -> i32 {
    s.encode_utf16()
        .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(unit as i32))
}
