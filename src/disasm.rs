//! Human-readable and JSON disassembly of filter programs
//!
//! Debugging aid only; nothing here feeds back into compilation or
//! installation. Jump targets are shown resolved to absolute instruction
//! indices.

use serde::Serialize;

use crate::program::{
    FilterProgram, Instruction, RET_ALLOW, RET_DATA_MASK, RET_ERRNO, RET_KILL_PROCESS, RET_LOG,
};

/// One disassembled instruction.
#[derive(Debug, Clone, Serialize)]
pub struct DisasmEntry {
    pub index: usize,
    pub mnemonic: &'static str,
    /// Field offset, comparison immediate, or return action.
    pub operand: String,
    /// Absolute target when the comparison succeeds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jump_true: Option<usize>,
    /// Absolute target when the comparison fails.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jump_false: Option<usize>,
}

fn action_name(action: u32) -> String {
    match action {
        RET_ALLOW => "allow".into(),
        RET_LOG => "log".into(),
        RET_KILL_PROCESS => "kill-process".into(),
        a if a & !RET_DATA_MASK == RET_ERRNO => format!("errno({})", a & RET_DATA_MASK),
        a => format!("{a:#010x}"),
    }
}

/// Disassemble into structured entries.
pub fn entries(prog: &FilterProgram) -> Vec<DisasmEntry> {
    prog.instructions()
        .iter()
        .enumerate()
        .map(|(index, insn)| {
            let next = index + 1;
            match *insn {
                Instruction::Load { offset } => DisasmEntry {
                    index,
                    mnemonic: "ld",
                    operand: format!("[{offset}]"),
                    jump_true: None,
                    jump_false: None,
                },
                Instruction::JumpIfEqual {
                    value,
                    skip_true,
                    skip_false,
                } => DisasmEntry {
                    index,
                    mnemonic: "jeq",
                    operand: format!("{value:#x}"),
                    jump_true: Some(next + usize::from(skip_true)),
                    jump_false: Some(next + usize::from(skip_false)),
                },
                Instruction::JumpIfGreater {
                    value,
                    skip_true,
                    skip_false,
                } => DisasmEntry {
                    index,
                    mnemonic: "jgt",
                    operand: format!("{value:#x}"),
                    jump_true: Some(next + usize::from(skip_true)),
                    jump_false: Some(next + usize::from(skip_false)),
                },
                Instruction::Jump { skip } => DisasmEntry {
                    index,
                    mnemonic: "ja",
                    operand: String::new(),
                    jump_true: Some(next + skip as usize),
                    jump_false: None,
                },
                Instruction::Return { action } => DisasmEntry {
                    index,
                    mnemonic: "ret",
                    operand: action_name(action),
                    jump_true: None,
                    jump_false: None,
                },
            }
        })
        .collect()
}

/// Disassemble to one text line per instruction.
pub fn disassemble(prog: &FilterProgram) -> String {
    let mut out = String::new();
    for entry in entries(prog) {
        out.push_str(&format!("{:4}: {:<3} {}", entry.index, entry.mnemonic, entry.operand));
        if let Some(target) = entry.jump_true {
            out.push_str(&format!(" jt {target}"));
        }
        if let Some(target) = entry.jump_false {
            out.push_str(&format!(" jf {target}"));
        }
        out.push('\n');
    }
    out
}
