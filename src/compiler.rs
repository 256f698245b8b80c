//! Compiles an allow-list into a seccomp filter program
//!
//! The generated program checks the architecture token, then walks a
//! binary-search tree over the syscall number, then any scheduled
//! per-argument value checks, and finally lands every match on one shared
//! allow instruction. All scratch state lives inside a single `compile`
//! call; on any failure it is dropped and no program is produced.

use thiserror::Error;

use crate::policy::FilterMode;
use crate::program::{
    FilterProgram, Instruction, JumpKind, PendingJump, AUDIT_ARCH_NATIVE, DATA_OFFSET_ARCH,
    DATA_OFFSET_NR, INSTRUCTION_CEILING, RET_ALLOW, RET_KILL_PROCESS,
};
use crate::values::{ArgFilter, ValueSet, ValueSpec};

/// Ranges at or below this size become a flat chain of equality tests.
const FLAT_CHAIN_MAX: usize = 3;

#[derive(Debug, Error)]
pub enum CompileError {
    /// Growing the instruction buffer failed.
    #[error("instruction buffer allocation failed: {0}")]
    Allocation(#[from] std::collections::TryReserveError),

    /// The program would exceed the hard instruction ceiling.
    #[error("filter program would exceed {limit} instructions")]
    CeilingExceeded { limit: usize },

    /// A conditional branch distance does not fit its 8-bit field.
    #[error("jump from instruction {from} cannot reach instruction {to}")]
    JumpOutOfRange { from: usize, to: usize },

    /// The allow-list contains no values.
    #[error("allow-list is empty")]
    EmptyPolicy,
}

/// Compiles allow-lists into filter programs.
pub struct Compiler {
    mode: FilterMode,
    ceiling: usize,
}

impl Compiler {
    pub fn new(mode: FilterMode) -> Self {
        Self {
            mode,
            ceiling: INSTRUCTION_CEILING,
        }
    }

    /// Override the instruction ceiling, mainly for tests.
    pub fn ceiling(mut self, ceiling: usize) -> Self {
        self.ceiling = ceiling;
        self
    }

    /// Compile `policy` under the configured mode.
    ///
    /// Returns `Ok(None)` when filtering is disabled: zero instructions are
    /// generated and nothing should be installed.
    pub fn compile(&self, mut policy: ValueSet) -> Result<Option<FilterProgram>, CompileError> {
        let Some(deny) = self.mode.deny_action() else {
            tracing::debug!("syscall filtering disabled, no program compiled");
            return Ok(None);
        };
        if policy.is_empty() {
            return Err(CompileError::EmptyPolicy);
        }

        policy.prepare();
        let mut gen = Codegen {
            prog: FilterProgram::with_ceiling(self.ceiling),
            allow: Vec::new(),
            scheduled: Vec::new(),
            deny,
        };
        gen.assemble(&policy)?;
        Ok(Some(gen.finish()))
    }
}

/// Scratch state for one compilation.
struct Codegen<'p> {
    prog: FilterProgram,
    /// Jumps waiting for the shared trailing allow instruction.
    allow: Vec<PendingJump>,
    /// LIFO worklist of argument filters still to be emitted. Processing one
    /// entry may schedule further entries, so this is drained, not iterated.
    scheduled: Vec<(PendingJump, &'p ArgFilter)>,
    deny: u32,
}

impl<'p> Codegen<'p> {
    fn assemble(&mut self, policy: &'p ValueSet) -> Result<(), CompileError> {
        // A foreign architecture's syscall numbers are meaningless, so this
        // check kills unconditionally whatever the configured mode is.
        self.emit(Instruction::Load {
            offset: DATA_OFFSET_ARCH,
        })?;
        let arch_ok = self.emit_branch_if_equal(AUDIT_ARCH_NATIVE)?;
        self.emit(Instruction::Return {
            action: RET_KILL_PROCESS,
        })?;
        self.prog.patch_to_here(arch_ok)?;

        self.emit(Instruction::Load {
            offset: DATA_OFFSET_NR,
        })?;
        self.build_tree(policy.values())?;
        self.drain_scheduled()?;

        // Every deferred match lands on this one allow instruction.
        for jump in std::mem::take(&mut self.allow) {
            self.prog.patch_to_here(jump)?;
        }
        self.emit(Instruction::Return { action: RET_ALLOW })?;

        tracing::debug!(
            instructions = self.prog.len(),
            "filter program assembled"
        );
        Ok(())
    }

    fn finish(self) -> FilterProgram {
        debug_assert!(self.allow.is_empty(), "unresolved allow jumps");
        debug_assert!(self.scheduled.is_empty(), "unemitted argument filters");
        self.prog
    }

    /// Compile a sorted, duplicate-free range of values.
    ///
    /// Ranges above `FLAT_CHAIN_MAX` split at the midpoint: a greater-than
    /// test whose true branch reaches the upper half, while the false branch
    /// falls through (no jump spent) into the midpoint's own equality test
    /// and then the lower half. Small ranges become an equality chain ending
    /// in the mode's deny action. Callers never pass an empty range.
    fn build_tree(&mut self, values: &'p [ValueSpec]) -> Result<(), CompileError> {
        if values.len() > FLAT_CHAIN_MAX {
            let mid = values.len() / 2;
            let index = self.emit(Instruction::JumpIfGreater {
                value: values[mid].value,
                skip_true: 0,
                skip_false: 0,
            })?;
            let upper_half = PendingJump::new(index, JumpKind::TrueBranch);

            self.emit_value_test(&values[mid])?;
            self.build_tree(&values[..mid])?;

            self.prog.patch_to_here(upper_half)?;
            self.build_tree(&values[mid + 1..])
        } else {
            for spec in values {
                self.emit_value_test(spec)?;
            }
            self.emit(Instruction::Return { action: self.deny })?;
            Ok(())
        }
    }

    /// Emit the equality test for one value.
    ///
    /// The true branch is never taken immediately: it is deferred onto the
    /// shared allow worklist, or scheduled against the value's argument
    /// filter, and patched once the target position is known. The false
    /// branch falls through.
    fn emit_value_test(&mut self, spec: &'p ValueSpec) -> Result<(), CompileError> {
        let jump = self.emit_branch_if_equal(spec.value)?;
        match &spec.arg {
            Some(filter) => self.scheduled.push((jump, filter)),
            None => self.allow.push(jump),
        }
        Ok(())
    }

    /// Pop and emit scheduled argument filters until none remain, including
    /// filters scheduled while emitting earlier ones.
    fn drain_scheduled(&mut self) -> Result<(), CompileError> {
        while let Some((jump, filter)) = self.scheduled.pop() {
            self.prog.patch_to_here(jump)?;
            self.emit(Instruction::Load {
                offset: crate::program::data_offset_arg(filter.index),
            })?;
            self.build_tree(filter.values.values())?;
        }
        Ok(())
    }

    fn emit_branch_if_equal(&mut self, value: u32) -> Result<PendingJump, CompileError> {
        let index = self.emit(Instruction::JumpIfEqual {
            value,
            skip_true: 0,
            skip_false: 0,
        })?;
        Ok(PendingJump::new(index, JumpKind::TrueBranch))
    }

    fn emit(&mut self, insn: Instruction) -> Result<usize, CompileError> {
        self.prog.push(insn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::RET_ERRNO;

    fn fail_action() -> u32 {
        FilterMode::Fail.deny_action().unwrap()
    }

    #[test]
    fn test_single_value_program_shape() {
        let mut policy = ValueSet::new("syscall");
        policy.permit(42);
        let prog = Compiler::new(FilterMode::Fail)
            .compile(policy)
            .unwrap()
            .unwrap();

        assert_eq!(
            prog.instructions(),
            &[
                Instruction::Load {
                    offset: DATA_OFFSET_ARCH
                },
                Instruction::JumpIfEqual {
                    value: AUDIT_ARCH_NATIVE,
                    skip_true: 1,
                    skip_false: 0,
                },
                Instruction::Return {
                    action: RET_KILL_PROCESS
                },
                Instruction::Load {
                    offset: DATA_OFFSET_NR
                },
                Instruction::JumpIfEqual {
                    value: 42,
                    skip_true: 1,
                    skip_false: 0,
                },
                Instruction::Return {
                    action: fail_action()
                },
                Instruction::Return { action: RET_ALLOW },
            ]
        );
        assert_eq!(fail_action() & !crate::program::RET_DATA_MASK, RET_ERRNO);
    }

    #[test]
    fn test_disabled_mode_compiles_nothing() {
        let mut policy = ValueSet::new("syscall");
        policy.permit(0);
        let result = Compiler::new(FilterMode::No).compile(policy).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_empty_policy_is_rejected() {
        let err = Compiler::new(FilterMode::Fail)
            .compile(ValueSet::new("syscall"))
            .unwrap_err();
        assert!(matches!(err, CompileError::EmptyPolicy));
    }

    #[test]
    fn test_midpoint_split_spends_no_jump_on_fall_through() {
        // Five values force one split; the instruction after the
        // greater-than test must be the midpoint's equality test.
        let mut policy = ValueSet::new("syscall");
        for v in [0, 1, 2, 3, 60] {
            policy.permit(v);
        }
        let prog = Compiler::new(FilterMode::Fail)
            .compile(policy)
            .unwrap()
            .unwrap();
        let insns = prog.instructions();

        let split = insns
            .iter()
            .position(|i| matches!(i, Instruction::JumpIfGreater { value: 2, .. }))
            .expect("split on midpoint 2");
        assert!(matches!(
            insns[split + 1],
            Instruction::JumpIfEqual { value: 2, .. }
        ));
    }

    #[test]
    fn test_ceiling_violation_aborts_with_no_program() {
        let mut policy = ValueSet::new("syscall");
        for v in 0..100 {
            policy.permit(v * 2);
        }
        let err = Compiler::new(FilterMode::Fail)
            .ceiling(16)
            .compile(policy)
            .unwrap_err();
        assert!(matches!(err, CompileError::CeilingExceeded { limit: 16 }));
    }
}
