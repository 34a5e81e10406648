//! Gear configuration.
//!
//! The platform hands the gear a `config.json` with loosely typed `config`,
//! `inputs` and `destination` objects. They are deserialized as-is and then
//! validated once into [`GearOptions`] and [`AppOptions`].
use crate::events::DEFAULT_LABEL_COLUMN;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const FSLDIR_ENV: &str = "FSLDIR";
pub const STANDARD_SUBDIR: &str = "data/standard";

pub const FUNCTIONAL_ZIP_INPUT: &str = "functional_zip";
pub const STRUCTURAL_ZIP_INPUT: &str = "structural_zip";
pub const ICAFIX_ZIP_INPUT: &str = "icafix_functional_zip";
pub const EVENT_FILES_INPUT: &str = "event_files";
pub const FSF_TEMPLATE_INPUT: &str = "FSF_TEMPLATE";

#[derive(Deserialize, Debug, Default)]
struct RawConfig {
    #[serde(default)]
    config: RawGearConfig,
    #[serde(default)]
    inputs: BTreeMap<String, RawInput>,
    #[serde(default)]
    destination: RawDestination,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
struct RawGearConfig {
    debug: bool,
    #[serde(rename = "gear-dry-run")]
    gear_dry_run: bool,
    task_name: Option<String>,
    output_name: Option<String>,
    motion_confound: bool,
    #[serde(rename = "dummy-scans")]
    dummy_scans: Option<i64>,
    #[serde(rename = "dummy-scan-noise")]
    dummy_scan_noise: Option<bool>,
    #[serde(rename = "event-label-column")]
    event_label_column: Option<String>,
}

#[derive(Deserialize, Debug)]
struct RawInput {
    location: RawLocation,
}

#[derive(Deserialize, Debug)]
struct RawLocation {
    path: PathBuf,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
struct RawDestination {
    id: Option<String>,
    parent_type: Option<String>,
    subject_label: Option<String>,
    session_label: Option<String>,
}

/// Hierarchy level of the container the analysis is attached to.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunLevel {
    Project,
    Subject,
    Session,
    Acquisition,
    Unknown,
}

impl RunLevel {
    fn parse(value: Option<&str>) -> Self {
        match value.map(|value| value.trim().to_ascii_lowercase()).as_deref() {
            Some("project") => RunLevel::Project,
            Some("subject") => RunLevel::Subject,
            Some("session") => RunLevel::Session,
            Some("acquisition") => RunLevel::Acquisition,
            _ => RunLevel::Unknown,
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Destination {
    pub id: String,
    pub run_level: RunLevel,
    pub subject_label: Option<String>,
    pub session_label: Option<String>,
}

/// Where the gear reads and writes, and how it runs.
#[derive(Debug, Clone)]
pub struct GearOptions {
    pub debug: bool,
    pub dry_run: bool,
    pub work_dir: PathBuf,
    pub output_dir: PathBuf,
    pub functional_zip: PathBuf,
    pub structural_zip: PathBuf,
    pub icafix_zip: Option<PathBuf>,
    pub event_files: Option<PathBuf>,
    pub fsf_template: PathBuf,
    pub fsl_dir: Option<PathBuf>,
    pub standard_dir: PathBuf,
    pub destination: Destination,
}

/// Analysis choices.
#[derive(Debug, Clone, PartialEq)]
pub struct AppOptions {
    pub task_name: String,
    pub output_name: Option<String>,
    pub motion_confound: bool,
    pub dummy_scans: usize,
    pub dummy_scan_noise: bool,
    pub icafix: bool,
    pub event_label_column: String,
}

#[derive(Debug, Clone)]
pub struct GearConfig {
    pub gear: GearOptions,
    pub app: AppOptions,
}

/// Values supplied on the command line and from the environment.
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    pub work_dir: PathBuf,
    pub output_dir: PathBuf,
    pub dry_run: bool,
    pub standard_dir: Option<PathBuf>,
    pub fsl_dir: Option<PathBuf>,
}

impl RunOverrides {
    /// Fill `fsl_dir` from `$FSLDIR` when it is not already set.
    pub fn with_environment(mut self) -> Self {
        if self.fsl_dir.is_none() {
            self.fsl_dir = std::env::var_os(FSLDIR_ENV)
                .filter(|value| !value.is_empty())
                .map(PathBuf::from);
        }
        self
    }
}

pub fn load_config(path: &Path, overrides: RunOverrides) -> Result<GearConfig> {
    let bytes = fs::read(path).with_context(|| format!("read config {}", path.display()))?;
    parse_config(&bytes, overrides).with_context(|| format!("load config {}", path.display()))
}

pub fn parse_config(bytes: &[u8], overrides: RunOverrides) -> Result<GearConfig> {
    let raw: RawConfig = serde_json::from_slice(bytes).context("parse gear config JSON")?;
    let RawConfig {
        config,
        mut inputs,
        destination,
    } = raw;

    let mut input_path = |name: &str| inputs.remove(name).map(|input| input.location.path);
    let functional_zip = input_path(FUNCTIONAL_ZIP_INPUT)
        .ok_or_else(|| anyhow!("missing required input {FUNCTIONAL_ZIP_INPUT}"))?;
    let structural_zip = input_path(STRUCTURAL_ZIP_INPUT)
        .ok_or_else(|| anyhow!("missing required input {STRUCTURAL_ZIP_INPUT}"))?;
    let fsf_template = input_path(FSF_TEMPLATE_INPUT)
        .ok_or_else(|| anyhow!("missing required input {FSF_TEMPLATE_INPUT}"))?;
    let icafix_zip = input_path(ICAFIX_ZIP_INPUT);
    let event_files = input_path(EVENT_FILES_INPUT);

    let task_name = config
        .task_name
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| anyhow!("task_name must be non-empty"))?
        .to_string();
    let dummy_scans = match config.dummy_scans {
        None => 0,
        Some(value) => usize::try_from(value)
            .map_err(|_| anyhow!("dummy-scans must be zero or more (got {value})"))?,
    };
    let output_name = config
        .output_name
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());
    let event_label_column = config
        .event_label_column
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_LABEL_COLUMN.to_string());

    let standard_dir = match (&overrides.standard_dir, &overrides.fsl_dir) {
        (Some(dir), _) => dir.clone(),
        (None, Some(fsl_dir)) => fsl_dir.join(STANDARD_SUBDIR),
        (None, None) => {
            return Err(anyhow!(
                "{FSLDIR_ENV} is not set; set it or pass --standard-dir"
            ))
        }
    };

    let label = |value: Option<String>| {
        value
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    };
    let destination = Destination {
        id: destination.id.unwrap_or_default(),
        run_level: RunLevel::parse(destination.parent_type.as_deref()),
        subject_label: label(destination.subject_label),
        session_label: label(destination.session_label),
    };

    let app = AppOptions {
        task_name,
        output_name,
        motion_confound: config.motion_confound,
        dummy_scans,
        dummy_scan_noise: config.dummy_scan_noise.unwrap_or(true),
        icafix: icafix_zip.is_some(),
        event_label_column,
    };
    let gear = GearOptions {
        debug: config.debug,
        dry_run: config.gear_dry_run || overrides.dry_run,
        work_dir: absolute_dir(&overrides.work_dir)?,
        output_dir: absolute_dir(&overrides.output_dir)?,
        functional_zip,
        structural_zip,
        icafix_zip,
        event_files,
        fsf_template,
        fsl_dir: overrides.fsl_dir,
        standard_dir,
        destination,
    };
    Ok(GearConfig { gear, app })
}

/// FEAT and `zip` run from other directories, so run paths are anchored once.
fn absolute_dir(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).with_context(|| format!("resolve {}", path.display()))
}

/// Read only the `debug` flag, for choosing a log level before full validation.
pub fn peek_debug(path: &Path) -> bool {
    fs::read(path)
        .ok()
        .and_then(|bytes| serde_json::from_slice::<RawConfig>(&bytes).ok())
        .map(|raw| raw.config.debug)
        .unwrap_or(false)
}
