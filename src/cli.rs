//! CLI argument parsing for the gear entry point.
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Root CLI entrypoint.
#[derive(Parser, Debug)]
#[command(
    name = "hcp-feat",
    version,
    about = "First-level FSL FEAT analysis of HCP-preprocessed functional data",
    after_help = "Commands:\n  run --config <json> --work-dir <dir> --output-dir <dir>  Prepare inputs, run FEAT, collect outputs\n  flatten <REPORT.HTML>                                   Merge a FEAT report into one HTML file\n\nExamples:\n  hcp-feat run --config /flywheel/v0/config.json --work-dir /flywheel/v0/work --output-dir /flywheel/v0/output\n  hcp-feat flatten wm_level1.feat/report.html",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Run(RunArgs),
    Flatten(FlattenArgs),
}

#[derive(Parser, Debug)]
#[command(about = "Prepare inputs, run FEAT and collect its outputs")]
pub struct RunArgs {
    /// Gear config.json with config, inputs and destination
    #[arg(long, value_name = "PATH")]
    pub config: PathBuf,

    /// Scratch directory the input archives are extracted into
    #[arg(long, value_name = "DIR")]
    pub work_dir: PathBuf,

    /// Directory that receives the published results
    #[arg(long, value_name = "DIR")]
    pub output_dir: PathBuf,

    /// Prepare everything but do not run FEAT (same as gear-dry-run)
    #[arg(long)]
    pub dry_run: bool,

    /// Standard-space template directory (defaults to $FSLDIR/data/standard)
    #[arg(long, value_name = "DIR")]
    pub standard_dir: Option<PathBuf>,
}

#[derive(Parser, Debug)]
#[command(about = "Flatten a FEAT report tree into a single HTML file")]
pub struct FlattenArgs {
    /// FEAT report.html
    #[arg(value_name = "REPORT.HTML")]
    pub report: PathBuf,

    /// Output path (defaults to index.html beside the report)
    #[arg(long, value_name = "PATH")]
    pub out: Option<PathBuf>,
}
