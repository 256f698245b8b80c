//! CLI argument parsing for Sysfence

use clap::{Parser, ValueEnum};

/// Output format for --dump
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable disassembly (default)
    Text,
    /// JSON for machine parsing
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "sysfence")]
#[command(version)]
#[command(about = "Compile and install a seccomp syscall allow-list", long_about = None)]
pub struct Cli {
    /// Disposition for syscalls outside the allow-list: no, log, fail, kill.
    /// Unrecognized values disable filtering with a warning instead of
    /// failing, so this is a plain string rather than an enum.
    #[arg(long = "seccomp", value_name = "MODE", default_value = "fail")]
    pub seccomp: String,

    /// Print the compiled filter program instead of installing it
    #[arg(long = "dump")]
    pub dump: bool,

    /// Output format for --dump
    #[arg(long = "format", value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Enable debug tracing to stderr
    #[arg(long = "debug")]
    pub debug: bool,

    /// Command to run under the installed filter (everything after --)
    #[arg(last = true)]
    pub command: Option<Vec<String>>,
}
