//! Sysfence - seccomp BPF allow-list compiler
//!
//! This library compiles a declarative table of permitted system calls,
//! optionally qualified by specific argument values, into a classic-BPF
//! seccomp filter program and installs it via the kernel's seccomp facility.
//! The compiler builds a binary-search decision tree over syscall numbers,
//! emits fixed-width instructions, and resolves forward jumps by backpatching.

pub mod cli;
pub mod compiler;
pub mod disasm;
pub mod emulator;
pub mod install;
pub mod policy;
pub mod program;
pub mod values;
