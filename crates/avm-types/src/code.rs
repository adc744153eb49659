//! Label-based method body assembly.

use crate::class_file::{ClassFormatError, ExceptionHandler};
use crate::instruction::{Instruction, Label};

/// Forward-declarable jump target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelId(usize);

/// Assembles a method body, resolving labels to instruction indices.
///
/// ```
/// use avm_types::code::CodeBuilder;
/// use avm_types::instruction::{Condition, Instruction};
///
/// let mut b = CodeBuilder::new();
/// let done = b.new_label();
/// b.emit(Instruction::ILoad(0));
/// b.branch(|t| Instruction::IfZero(Condition::Eq, t), done);
/// b.emit(Instruction::IConst(1)).emit(Instruction::IReturn);
/// b.bind(done);
/// b.emit(Instruction::IConst(0)).emit(Instruction::IReturn);
/// let (code, _) = b.finish().unwrap();
/// assert_eq!(code[1], Instruction::IfZero(Condition::Eq, 4));
/// ```
#[derive(Debug, Default)]
pub struct CodeBuilder {
    code: Vec<Instruction>,
    labels: Vec<Option<Label>>,
    fixups: Vec<(usize, LabelId)>,
    handlers: Vec<(LabelId, LabelId, LabelId, Option<String>)>,
}

impl CodeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_label(&mut self) -> LabelId {
        self.labels.push(None);
        LabelId(self.labels.len() - 1)
    }

    /// Bind `label` to the next emitted instruction.
    pub fn bind(&mut self, label: LabelId) -> &mut Self {
        self.labels[label.0] = Some(self.code.len() as Label);
        self
    }

    pub fn emit(&mut self, instruction: Instruction) -> &mut Self {
        self.code.push(instruction);
        self
    }

    pub fn emit_all(&mut self, instructions: impl IntoIterator<Item = Instruction>) -> &mut Self {
        self.code.extend(instructions);
        self
    }

    /// Emit a branch whose target is resolved at `finish`.
    pub fn branch(&mut self, make: impl FnOnce(Label) -> Instruction, label: LabelId) -> &mut Self {
        self.fixups.push((self.code.len(), label));
        self.code.push(make(0));
        self
    }

    pub fn goto(&mut self, label: LabelId) -> &mut Self {
        self.branch(Instruction::Goto, label)
    }

    pub fn try_catch(
        &mut self,
        start: LabelId,
        end: LabelId,
        handler: LabelId,
        catch_type: Option<&str>,
    ) -> &mut Self {
        self.handlers
            .push((start, end, handler, catch_type.map(str::to_string)));
        self
    }

    pub fn position(&self) -> usize {
        self.code.len()
    }

    pub fn finish(mut self) -> Result<(Vec<Instruction>, Vec<ExceptionHandler>), ClassFormatError> {
        let resolve = |labels: &[Option<Label>], id: LabelId| {
            labels[id.0].ok_or(ClassFormatError::UnboundLabel(id.0))
        };
        for (index, label) in std::mem::take(&mut self.fixups) {
            let target = resolve(&self.labels, label)?;
            if let Some(slot) = self.code[index].branch_target_mut() {
                *slot = target;
            }
        }
        let handlers = self
            .handlers
            .iter()
            .map(|(start, end, handler, catch_type)| {
                Ok(ExceptionHandler {
                    start: resolve(&self.labels, *start)?,
                    end: resolve(&self.labels, *end)?,
                    handler: resolve(&self.labels, *handler)?,
                    catch_type: catch_type.clone(),
                })
            })
            .collect::<Result<Vec<_>, ClassFormatError>>()?;
        Ok((self.code, handlers))
    }
}
