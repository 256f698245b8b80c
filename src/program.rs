//! Filter program buffer, instruction model, and jump backpatching
//!
//! Instructions are modelled as a tagged variant so the compiler stays
//! type-safe internally; the fixed 16/8/8/32-bit `sock_filter` wire layout
//! the kernel expects is produced only at final emission. The buffer is
//! append-only and enforces the kernel's hard instruction ceiling.

use crate::compiler::CompileError;

/// Hard kernel limit on filter program length (BPF_MAXINSNS).
pub const INSTRUCTION_CEILING: usize = 4096;

// Return actions, from linux/seccomp.h.
pub const RET_KILL_PROCESS: u32 = 0x8000_0000;
pub const RET_LOG: u32 = 0x7ffc_0000;
pub const RET_ERRNO: u32 = 0x0005_0000;
pub const RET_ALLOW: u32 = 0x7fff_0000;
pub const RET_DATA_MASK: u32 = 0x0000_ffff;

// Audit architecture tokens, from linux/audit.h.
pub const AUDIT_ARCH_I386: u32 = 0x4000_0003;
pub const AUDIT_ARCH_X86_64: u32 = 0xc000_003e;
pub const AUDIT_ARCH_ARM: u32 = 0x4000_0028;
pub const AUDIT_ARCH_AARCH64: u32 = 0xc000_00b7;
pub const AUDIT_ARCH_RISCV64: u32 = 0xc000_00f3;

/// The token the kernel reports for syscalls made on this build's target.
#[cfg(target_arch = "x86")]
pub const AUDIT_ARCH_NATIVE: u32 = AUDIT_ARCH_I386;
#[cfg(target_arch = "x86_64")]
pub const AUDIT_ARCH_NATIVE: u32 = AUDIT_ARCH_X86_64;
#[cfg(target_arch = "arm")]
pub const AUDIT_ARCH_NATIVE: u32 = AUDIT_ARCH_ARM;
#[cfg(target_arch = "aarch64")]
pub const AUDIT_ARCH_NATIVE: u32 = AUDIT_ARCH_AARCH64;
#[cfg(target_arch = "riscv64")]
pub const AUDIT_ARCH_NATIVE: u32 = AUDIT_ARCH_RISCV64;

/// Byte offset of the syscall number within `struct seccomp_data`.
pub const DATA_OFFSET_NR: u32 = 0;
/// Byte offset of the architecture token within `struct seccomp_data`.
pub const DATA_OFFSET_ARCH: u32 = 4;

/// Byte offset of the low 32 bits of argument `index`.
///
/// Arguments are 64-bit slots starting at byte 16; classic BPF loads 32-bit
/// words, so big-endian targets need the high-half correction.
pub fn data_offset_arg(index: u8) -> u32 {
    let low_word = if cfg!(target_endian = "big") { 4 } else { 0 };
    16 + u32::from(index) * 8 + low_word
}

// Classic BPF opcodes, from linux/bpf_common.h.
const BPF_LD_W_ABS: u16 = 0x20; // BPF_LD | BPF_W | BPF_ABS
const BPF_JMP_JA: u16 = 0x05; // BPF_JMP | BPF_JA
const BPF_JMP_JEQ_K: u16 = 0x15; // BPF_JMP | BPF_JEQ | BPF_K
const BPF_JMP_JGT_K: u16 = 0x25; // BPF_JMP | BPF_JGT | BPF_K
const BPF_RET_K: u16 = 0x06; // BPF_RET | BPF_K

/// One filter instruction. An instruction's index in the program is its
/// program-counter position; branch distances count instructions to skip
/// relative to the following slot and are never negative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// Load a 32-bit word of the syscall event into the accumulator.
    Load { offset: u32 },
    /// Branch on accumulator == value.
    JumpIfEqual {
        value: u32,
        skip_true: u8,
        skip_false: u8,
    },
    /// Branch on accumulator > value (unsigned).
    JumpIfGreater {
        value: u32,
        skip_true: u8,
        skip_false: u8,
    },
    /// Unconditional forward jump. Part of the engine's fixed instruction
    /// set, but the assembler never emits one: every deferred target is
    /// reached through a conditional's true branch instead.
    Jump { skip: u32 },
    /// Terminate with a seccomp action.
    Return { action: u32 },
}

/// Which branch distance of an instruction a pending jump resolves.
///
/// The compiler only ever defers true branches (the engine has no
/// jump-if-not-equal, so "mismatch denies" is always encoded as a false
/// branch falling through to the next instruction); the other kinds exist
/// for the engine's full instruction set and are covered by this module's
/// tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpKind {
    TrueBranch,
    FalseBranch,
    Always,
}

/// A forward jump whose target is not yet known.
///
/// Deliberately neither `Copy` nor `Clone`: patching consumes the record, so
/// every pending jump is resolved at most once.
#[derive(Debug)]
pub struct PendingJump {
    index: usize,
    kind: JumpKind,
}

impl PendingJump {
    pub fn new(index: usize, kind: JumpKind) -> Self {
        Self { index, kind }
    }

    /// Index of the instruction whose branch distance is unresolved.
    pub fn index(&self) -> usize {
        self.index
    }
}

/// The fixed wire layout of one instruction (`struct sock_filter`).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawInstruction {
    pub code: u16,
    pub jt: u8,
    pub jf: u8,
    pub k: u32,
}

/// Append-only instruction buffer with a hard length ceiling.
#[derive(Debug)]
pub struct FilterProgram {
    insns: Vec<Instruction>,
    ceiling: usize,
}

impl FilterProgram {
    /// A buffer limited to the kernel's instruction ceiling.
    pub fn new() -> Self {
        Self::with_ceiling(INSTRUCTION_CEILING)
    }

    /// A buffer with an explicit ceiling, mainly for tests.
    pub fn with_ceiling(ceiling: usize) -> Self {
        Self {
            insns: Vec::new(),
            ceiling,
        }
    }

    pub fn len(&self) -> usize {
        self.insns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insns.is_empty()
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.insns
    }

    /// Append an instruction, returning its index.
    ///
    /// The buffer grows by doubling; growth failure and ceiling violation
    /// both abort the compilation that owns this buffer.
    pub fn push(&mut self, insn: Instruction) -> Result<usize, CompileError> {
        if self.insns.len() == self.ceiling {
            return Err(CompileError::CeilingExceeded {
                limit: self.ceiling,
            });
        }
        if self.insns.len() == self.insns.capacity() {
            self.insns.try_reserve(self.insns.capacity().max(16))?;
        }
        let index = self.insns.len();
        self.insns.push(insn);
        Ok(index)
    }

    /// Resolve `jump` to the instruction that will be appended next.
    ///
    /// The branch distance is "instructions to skip": current length minus
    /// the jumping instruction's index minus one.
    pub fn patch_to_here(&mut self, jump: PendingJump) -> Result<(), CompileError> {
        let from = jump.index;
        let to = self.insns.len();
        let skip = to - from - 1;

        if jump.kind == JumpKind::Always {
            match &mut self.insns[from] {
                Instruction::Jump { skip: slot } => *slot = skip as u32,
                other => unreachable!("always-jump patch on {other:?}"),
            }
            return Ok(());
        }

        let skip = u8::try_from(skip).map_err(|_| CompileError::JumpOutOfRange { from, to })?;
        let slot = match (&mut self.insns[from], jump.kind) {
            (Instruction::JumpIfEqual { skip_true, .. }, JumpKind::TrueBranch) => skip_true,
            (Instruction::JumpIfEqual { skip_false, .. }, JumpKind::FalseBranch) => skip_false,
            (Instruction::JumpIfGreater { skip_true, .. }, JumpKind::TrueBranch) => skip_true,
            (Instruction::JumpIfGreater { skip_false, .. }, JumpKind::FalseBranch) => skip_false,
            (other, kind) => unreachable!("{kind:?} patch on {other:?}"),
        };
        *slot = skip;
        Ok(())
    }

    /// Flatten to the kernel's fixed-width wire layout.
    pub fn to_raw(&self) -> Vec<RawInstruction> {
        self.insns.iter().map(encode).collect()
    }
}

impl Default for FilterProgram {
    fn default() -> Self {
        Self::new()
    }
}

fn encode(insn: &Instruction) -> RawInstruction {
    let (code, jt, jf, k) = match *insn {
        Instruction::Load { offset } => (BPF_LD_W_ABS, 0, 0, offset),
        Instruction::JumpIfEqual {
            value,
            skip_true,
            skip_false,
        } => (BPF_JMP_JEQ_K, skip_true, skip_false, value),
        Instruction::JumpIfGreater {
            value,
            skip_true,
            skip_false,
        } => (BPF_JMP_JGT_K, skip_true, skip_false, value),
        Instruction::Jump { skip } => (BPF_JMP_JA, 0, 0, skip),
        Instruction::Return { action } => (BPF_RET_K, 0, 0, action),
    };
    RawInstruction { code, jt, jf, k }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_returns_sequential_indices() {
        let mut prog = FilterProgram::new();
        assert_eq!(prog.push(Instruction::Load { offset: 0 }).unwrap(), 0);
        assert_eq!(
            prog.push(Instruction::Return { action: RET_ALLOW }).unwrap(),
            1
        );
        assert_eq!(prog.len(), 2);
    }

    #[test]
    fn test_push_past_ceiling_fails() {
        let mut prog = FilterProgram::with_ceiling(2);
        prog.push(Instruction::Load { offset: 0 }).unwrap();
        prog.push(Instruction::Load { offset: 4 }).unwrap();
        let err = prog.push(Instruction::Return { action: 0 }).unwrap_err();
        assert!(matches!(err, CompileError::CeilingExceeded { limit: 2 }));
    }

    #[test]
    fn test_patch_true_branch_counts_skipped_instructions() {
        let mut prog = FilterProgram::new();
        let index = prog
            .push(Instruction::JumpIfEqual {
                value: 7,
                skip_true: 0,
                skip_false: 0,
            })
            .unwrap();
        let jump = PendingJump::new(index, JumpKind::TrueBranch);
        prog.push(Instruction::Return { action: 0 }).unwrap();
        prog.push(Instruction::Return { action: 0 }).unwrap();
        prog.patch_to_here(jump).unwrap();

        match prog.instructions()[0] {
            Instruction::JumpIfEqual { skip_true, .. } => assert_eq!(skip_true, 2),
            ref other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_patch_false_branch() {
        let mut prog = FilterProgram::new();
        let index = prog
            .push(Instruction::JumpIfGreater {
                value: 9,
                skip_true: 0,
                skip_false: 0,
            })
            .unwrap();
        let jump = PendingJump::new(index, JumpKind::FalseBranch);
        prog.push(Instruction::Return { action: 0 }).unwrap();
        prog.patch_to_here(jump).unwrap();

        match prog.instructions()[0] {
            Instruction::JumpIfGreater { skip_false, .. } => assert_eq!(skip_false, 1),
            ref other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_patch_always_uses_wide_operand() {
        let mut prog = FilterProgram::new();
        let index = prog.push(Instruction::Jump { skip: 0 }).unwrap();
        let jump = PendingJump::new(index, JumpKind::Always);
        for _ in 0..300 {
            prog.push(Instruction::Return { action: 0 }).unwrap();
        }
        prog.patch_to_here(jump).unwrap();
        assert_eq!(prog.instructions()[0], Instruction::Jump { skip: 300 });
    }

    #[test]
    fn test_patch_conditional_beyond_byte_range_fails() {
        let mut prog = FilterProgram::new();
        let index = prog
            .push(Instruction::JumpIfGreater {
                value: 1,
                skip_true: 0,
                skip_false: 0,
            })
            .unwrap();
        let jump = PendingJump::new(index, JumpKind::TrueBranch);
        for _ in 0..300 {
            prog.push(Instruction::Return { action: 0 }).unwrap();
        }
        let err = prog.patch_to_here(jump).unwrap_err();
        assert!(matches!(err, CompileError::JumpOutOfRange { from: 0, .. }));
    }

    #[test]
    fn test_wire_layout_is_eight_bytes() {
        assert_eq!(std::mem::size_of::<RawInstruction>(), 8);
    }

    #[test]
    fn test_encoding_matches_sock_filter_opcodes() {
        let mut prog = FilterProgram::new();
        prog.push(Instruction::Load { offset: 4 }).unwrap();
        prog.push(Instruction::JumpIfEqual {
            value: 60,
            skip_true: 3,
            skip_false: 1,
        })
        .unwrap();
        prog.push(Instruction::JumpIfGreater {
            value: 2,
            skip_true: 0,
            skip_false: 2,
        })
        .unwrap();
        prog.push(Instruction::Jump { skip: 5 }).unwrap();
        prog.push(Instruction::Return { action: RET_ALLOW }).unwrap();

        let raw = prog.to_raw();
        assert_eq!(
            raw[0],
            RawInstruction {
                code: 0x20,
                jt: 0,
                jf: 0,
                k: 4
            }
        );
        assert_eq!(
            raw[1],
            RawInstruction {
                code: 0x15,
                jt: 3,
                jf: 1,
                k: 60
            }
        );
        assert_eq!(
            raw[2],
            RawInstruction {
                code: 0x25,
                jt: 0,
                jf: 2,
                k: 2
            }
        );
        assert_eq!(
            raw[3],
            RawInstruction {
                code: 0x05,
                jt: 0,
                jf: 0,
                k: 5
            }
        );
        assert_eq!(
            raw[4],
            RawInstruction {
                code: 0x06,
                jt: 0,
                jf: 0,
                k: RET_ALLOW
            }
        );
    }

    #[test]
    fn test_arg_offsets_step_by_slot_width() {
        assert_eq!(data_offset_arg(1) - data_offset_arg(0), 8);
        assert_eq!(data_offset_arg(5) - data_offset_arg(0), 40);
    }
}
