use anyhow::{anyhow, Result};
use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

mod cli;
mod command;
mod config;
mod confounds;
mod design;
mod diagnostics;
mod events;
mod exec;
mod locate;
mod patch;
mod report;
mod signal;
mod staging;
mod templates;
mod util;
mod workflow;

use cli::{Command, FlattenArgs, RootArgs, RunArgs};

fn main() -> ExitCode {
    let args = RootArgs::parse();
    let debug = match &args.command {
        Command::Run(run) => config::peek_debug(&run.config),
        Command::Flatten(_) => false,
    };
    init_tracing(debug);

    let result = match args.command {
        Command::Run(run) => cmd_run(run),
        Command::Flatten(flatten) => cmd_flatten(flatten).map(|()| 0),
    };
    match result {
        Ok(0) => ExitCode::SUCCESS,
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(err) => {
            tracing::error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

/// `RUST_LOG` wins; otherwise `debug` or `info` from the gear config.
fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .try_init()
        .ok();
}

fn cmd_run(args: RunArgs) -> Result<i32> {
    let overrides = config::RunOverrides {
        work_dir: args.work_dir,
        output_dir: args.output_dir,
        dry_run: args.dry_run,
        standard_dir: args.standard_dir,
        fsl_dir: None,
    }
    .with_environment();
    let config = config::load_config(&args.config, overrides)?;
    let tools = signal::FslTools::new(config.gear.fsl_dir.as_deref());
    workflow::run_gear(&config, &tools)
}

fn cmd_flatten(args: FlattenArgs) -> Result<()> {
    if !args.report.is_file() {
        return Err(anyhow!("report not found: {}", args.report.display()));
    }
    let output = match args.out {
        Some(out) => out,
        None => args
            .report
            .parent()
            .map(|dir| dir.join(report::FLATTENED_REPORT_NAME))
            .unwrap_or_else(|| report::FLATTENED_REPORT_NAME.into()),
    };
    let summary = report::flatten_report(&args.report, &output, report::FlattenOptions::default())?;
    println!("{}", output.display());
    if !summary.skipped.is_empty() {
        tracing::info!(skipped = ?summary.skipped, "pages not merged");
    }
    Ok(())
}
