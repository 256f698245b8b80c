use anyhow::{Context, Result};
use clap::Parser;
use sysfence::cli::{Cli, OutputFormat};
use sysfence::compiler::Compiler;
use sysfence::program::FilterProgram;
use sysfence::{disasm, install, policy};
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

/// Print the compiled program without installing anything
fn dump_program(program: Option<&FilterProgram>, format: OutputFormat) -> Result<()> {
    let Some(program) = program else {
        println!("filter disabled: no program compiled");
        return Ok(());
    };
    match format {
        OutputFormat::Text => print!("{}", disasm::disassemble(program)),
        OutputFormat::Json => {
            let entries = disasm::entries(program);
            println!(
                "{}",
                serde_json::to_string_pretty(&entries).context("Failed to serialize disassembly")?
            );
        }
    }
    Ok(())
}

/// Replace this process with the requested command
fn run_command(command: &[String]) -> Result<()> {
    use std::os::unix::process::CommandExt;

    let err = std::process::Command::new(&command[0])
        .args(&command[1..])
        .exec();
    // exec only returns on failure
    Err(err).context(format!("Failed to exec {}", command[0]))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let mode = policy::FilterMode::parse(&cli.seccomp);
    // Compilation failure is deliberately non-fatal: the filter is a
    // hardening layer, and running unprotected beats not running at all.
    let program = match Compiler::new(mode).compile(policy::default_policy()) {
        Ok(program) => program,
        Err(e) => {
            tracing::warn!("syscall filter not compiled: {e}");
            None
        }
    };

    if cli.dump {
        return dump_program(program.as_ref(), cli.format);
    }

    let command = cli.command.unwrap_or_default();
    if command.is_empty() {
        anyhow::bail!("Must specify a command to run, or --dump. Usage: sysfence [OPTIONS] -- COMMAND [ARGS...]");
    }

    if let Some(program) = &program {
        match install::install(program) {
            Ok(()) => {
                eprintln!("[sysfence: {} instruction filter installed]", program.len());
            }
            Err(e) => tracing::warn!("syscall filter not installed: {e}"),
        }
    }

    run_command(&command)
}
