//! Blocking subprocess execution with logged output.
//!
//! Output is logged verbatim and handed back to the caller; exit status is
//! recorded but never turned into an error here.
use crate::util::truncate_string;
use anyhow::{anyhow, Context, Result};
use std::path::Path;
use std::process::Command;
use std::time::Instant;

const MAX_LOGGED_OUTPUT_BYTES: usize = 64 * 1024;

/// Captured result of one subprocess invocation.
#[derive(Debug, Clone, Default)]
pub struct CommandRun {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub dry_run: bool,
}

impl CommandRun {
    pub fn success(&self) -> bool {
        self.dry_run || self.exit_code == Some(0)
    }
}

pub fn format_command_line(argv: &[String]) -> String {
    shell_words::join(argv)
}

/// Run `argv` to completion, optionally inside `cwd`.
///
/// With `dry_run` the command is only logged.
pub fn run_command(argv: &[String], cwd: Option<&Path>, dry_run: bool) -> Result<CommandRun> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| anyhow!("command is empty"))?;
    let command_line = format_command_line(argv);
    tracing::info!("\n {command_line}");
    if dry_run {
        return Ok(CommandRun {
            dry_run: true,
            ..CommandRun::default()
        });
    }

    let start = Instant::now();
    let mut command = Command::new(program);
    command.args(args);
    if let Some(cwd) = cwd {
        command.current_dir(cwd);
    }
    let output = command
        .output()
        .with_context(|| format!("spawn {program}"))?;
    let elapsed_ms = start.elapsed().as_millis();

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    tracing::info!(
        elapsed_ms,
        stdout_bytes = output.stdout.len(),
        stderr_bytes = output.stderr.len(),
        "{program} complete"
    );
    if !stdout.trim().is_empty() {
        tracing::info!("\n {}", truncate_string(&stdout, MAX_LOGGED_OUTPUT_BYTES));
    }
    if !stderr.trim().is_empty() {
        tracing::info!("\n {}", truncate_string(&stderr, MAX_LOGGED_OUTPUT_BYTES));
    }
    if !output.status.success() {
        tracing::warn!(status = %output.status, "{program} exited unsuccessfully");
    }

    Ok(CommandRun {
        stdout,
        stderr,
        exit_code: output.status.code(),
        dry_run: false,
    })
}
