//! Userspace evaluation of compiled filter programs
//!
//! Runs a program against a synthetic syscall event exactly the way the
//! kernel's interpreter would, for tests and debugging. Jump offsets are
//! forward-only, so execution always terminates.

use crate::program::{FilterProgram, Instruction, AUDIT_ARCH_NATIVE};

/// The event record a filter program inspects, mirroring the kernel's
/// `struct seccomp_data`.
#[derive(Debug, Clone)]
pub struct SyscallEvent {
    pub nr: i32,
    pub arch: u32,
    pub instruction_pointer: u64,
    pub args: [u64; 6],
}

impl SyscallEvent {
    /// An event for syscall `nr` on the native architecture, all arguments
    /// zero.
    pub fn new(nr: i32) -> Self {
        Self {
            nr,
            arch: AUDIT_ARCH_NATIVE,
            instruction_pointer: 0,
            args: [0; 6],
        }
    }

    pub fn with_arch(mut self, arch: u32) -> Self {
        self.arch = arch;
        self
    }

    pub fn with_arg(mut self, index: usize, value: u64) -> Self {
        self.args[index] = value;
        self
    }

    /// The 32-bit word at byte `offset` of the event, laid out exactly as
    /// the kernel hands it to the filter.
    fn word(&self, offset: u32) -> Option<u32> {
        let mut bytes = [0u8; 64];
        bytes[0..4].copy_from_slice(&self.nr.to_ne_bytes());
        bytes[4..8].copy_from_slice(&self.arch.to_ne_bytes());
        bytes[8..16].copy_from_slice(&self.instruction_pointer.to_ne_bytes());
        for (slot, arg) in self.args.iter().enumerate() {
            let at = 16 + slot * 8;
            bytes[at..at + 8].copy_from_slice(&arg.to_ne_bytes());
        }

        let offset = offset as usize;
        let word = bytes.get(offset..offset + 4)?;
        Some(u32::from_ne_bytes(word.try_into().ok()?))
    }
}

/// What a program did with one event.
#[derive(Debug, Clone)]
pub struct Outcome {
    /// The seccomp return action.
    pub action: u32,
    /// Conditional comparisons executed before returning.
    pub compares: usize,
    /// Byte offsets the program loaded, in order.
    pub loaded: Vec<u32>,
}

/// Run `prog` against `event` to completion.
///
/// # Panics
///
/// Panics on malformed programs (out-of-range loads, or falling off the
/// end), which the kernel would have refused to install.
pub fn execute(prog: &FilterProgram, event: &SyscallEvent) -> Outcome {
    let insns = prog.instructions();
    let mut accumulator: u32 = 0;
    let mut compares = 0;
    let mut loaded = Vec::new();
    let mut pc = 0;

    loop {
        let insn = insns
            .get(pc)
            .unwrap_or_else(|| panic!("program fell off the end at {pc}"));
        pc += 1;

        match *insn {
            Instruction::Load { offset } => {
                accumulator = event
                    .word(offset)
                    .unwrap_or_else(|| panic!("load outside event data: offset {offset}"));
                loaded.push(offset);
            }
            Instruction::JumpIfEqual {
                value,
                skip_true,
                skip_false,
            } => {
                compares += 1;
                pc += usize::from(if accumulator == value {
                    skip_true
                } else {
                    skip_false
                });
            }
            Instruction::JumpIfGreater {
                value,
                skip_true,
                skip_false,
            } => {
                compares += 1;
                pc += usize::from(if accumulator > value {
                    skip_true
                } else {
                    skip_false
                });
            }
            Instruction::Jump { skip } => pc += skip as usize,
            Instruction::Return { action } => {
                return Outcome {
                    action,
                    compares,
                    loaded,
                }
            }
        }
    }
}
