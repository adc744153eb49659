//! Stack-machine instruction set.
//!
//! Branch targets are instruction indices within the owning method's code
//! vector, not byte offsets. Passes that insert instructions must remap them.

use crate::descriptor::PrimitiveType;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Instruction index inside a method body.
pub type Label = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum InvokeKind {
    /// Constructors, private methods and `super` calls: no dispatch.
    Special,
    Virtual,
    Interface,
    Static,
    Dynamic,
}

impl InvokeKind {
    pub fn has_receiver(self) -> bool {
        !matches!(self, Self::Static)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Condition {
    Eq,
    Ne,
    Lt,
    Ge,
    Gt,
    Le,
}

impl Condition {
    pub fn test(self, ordering: Ordering) -> bool {
        match self {
            Self::Eq => ordering == Ordering::Equal,
            Self::Ne => ordering != Ordering::Equal,
            Self::Lt => ordering == Ordering::Less,
            Self::Ge => ordering != Ordering::Less,
            Self::Gt => ordering == Ordering::Greater,
            Self::Le => ordering != Ordering::Greater,
        }
    }
}

/// Element kind addressed by array load/store instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArrayKind {
    Int,
    Long,
    /// Byte and boolean arrays share one encoding.
    Byte,
    Char,
    Short,
    Reference,
}

impl ArrayKind {
    pub fn for_primitive(p: PrimitiveType) -> Self {
        match p {
            PrimitiveType::Int => Self::Int,
            PrimitiveType::Long => Self::Long,
            PrimitiveType::Byte | PrimitiveType::Boolean => Self::Byte,
            PrimitiveType::Char => Self::Char,
            PrimitiveType::Short => Self::Short,
        }
    }
}

/// Symbolic reference to a field or method.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MemberRef {
    pub owner: String,
    pub name: String,
    pub descriptor: String,
}

impl MemberRef {
    pub fn new(
        owner: impl Into<String>,
        name: impl Into<String>,
        descriptor: impl Into<String>,
    ) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            descriptor: descriptor.into(),
        }
    }

    /// `name` + `descriptor`, the key methods are declared under.
    pub fn signature(&self) -> String {
        format!("{}{}", self.name, self.descriptor)
    }

    pub fn is(&self, owner: &str, name: &str, descriptor: &str) -> bool {
        self.owner == owner && self.name == name && self.descriptor == descriptor
    }
}

impl fmt::Display for MemberRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}{}", self.owner, self.name, self.descriptor)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instruction {
    Nop,
    IConst(i32),
    LConst(i64),
    AConstNull,
    ILoad(u16),
    LLoad(u16),
    ALoad(u16),
    IStore(u16),
    LStore(u16),
    AStore(u16),
    IInc(u16, i32),
    Pop,
    Dup,
    Swap,
    IAdd,
    ISub,
    IMul,
    IDiv,
    IRem,
    INeg,
    LAdd,
    LSub,
    LMul,
    LDiv,
    LRem,
    I2L,
    L2I,
    LCmp,
    /// Compare the int on top of the stack against zero.
    IfZero(Condition, Label),
    IfICmp(Condition, Label),
    IfNull(Label),
    IfNonNull(Label),
    Goto(Label),
    New(String),
    NewArray(PrimitiveType),
    /// Component type as an internal name or array descriptor.
    ANewArray(String),
    /// Full array descriptor and the number of dimensions to allocate.
    MultiANewArray(String, u8),
    ArrayLength,
    ArrayLoad(ArrayKind),
    ArrayStore(ArrayKind),
    GetField(MemberRef),
    PutField(MemberRef),
    GetStatic(MemberRef),
    PutStatic(MemberRef),
    Invoke(InvokeKind, MemberRef),
    CheckCast(String),
    InstanceOf(String),
    AThrow,
    Return,
    IReturn,
    LReturn,
    AReturn,
}

impl Instruction {
    pub fn branch_target(&self) -> Option<Label> {
        match self {
            Self::IfZero(_, t)
            | Self::IfICmp(_, t)
            | Self::IfNull(t)
            | Self::IfNonNull(t)
            | Self::Goto(t) => Some(*t),
            _ => None,
        }
    }

    pub fn branch_target_mut(&mut self) -> Option<&mut Label> {
        match self {
            Self::IfZero(_, t)
            | Self::IfICmp(_, t)
            | Self::IfNull(t)
            | Self::IfNonNull(t)
            | Self::Goto(t) => Some(t),
            _ => None,
        }
    }

    pub fn is_return(&self) -> bool {
        matches!(
            self,
            Self::Return | Self::IReturn | Self::LReturn | Self::AReturn
        )
    }

    /// Control never falls through to the next instruction.
    pub fn is_unconditional_exit(&self) -> bool {
        self.is_return() || matches!(self, Self::Goto(_) | Self::AThrow)
    }

    /// Last instruction of a basic block.
    pub fn ends_block(&self) -> bool {
        self.is_unconditional_exit() || self.branch_target().is_some()
    }

    pub fn invoke(kind: InvokeKind, owner: &str, name: &str, descriptor: &str) -> Self {
        Self::Invoke(kind, MemberRef::new(owner, name, descriptor))
    }

    pub fn invoke_static(owner: &str, name: &str, descriptor: &str) -> Self {
        Self::invoke(InvokeKind::Static, owner, name, descriptor)
    }

    /// True for a static call to `owner.name` regardless of descriptor.
    pub fn is_static_call_to(&self, owner: &str, name: &str) -> bool {
        matches!(self, Self::Invoke(InvokeKind::Static, m) if m.owner == owner && m.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_condition_semantics() {
        assert!(Condition::Lt.test(1.cmp(&2)));
        assert!(!Condition::Lt.test(2.cmp(&2)));
        assert!(Condition::Ge.test(2.cmp(&2)));
        assert!(Condition::Le.test(1.cmp(&2)));
        assert!(Condition::Ne.test(3.cmp(&2)));
    }

    #[test]
    fn test_block_boundaries() {
        assert!(Instruction::Goto(3).ends_block());
        assert!(Instruction::IfNull(0).ends_block());
        assert!(Instruction::AThrow.is_unconditional_exit());
        assert!(!Instruction::IfNull(0).is_unconditional_exit());
        assert!(!Instruction::IAdd.ends_block());
    }

    #[test]
    fn test_branch_target_mut() {
        let mut ins = Instruction::IfICmp(Condition::Ge, 4);
        *ins.branch_target_mut().unwrap() = 9;
        assert_eq!(ins.branch_target(), Some(9));
        assert!(Instruction::Pop.branch_target().is_none());
    }

    #[test]
    fn test_member_ref_signature() {
        let m = MemberRef::new("com/Foo", "bar", "(I)V");
        assert_eq!(m.signature(), "bar(I)V");
        assert_eq!(m.to_string(), "com/Foo.bar(I)V");
        assert!(m.is("com/Foo", "bar", "(I)V"));
    }
}
