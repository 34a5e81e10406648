//! End-to-end gear run: extract, prepare, invoke FEAT, collect.
use crate::command::{build_feat_command, FEAT_COMMAND};
use crate::config::{AppOptions, Destination, GearConfig, GearOptions, RunLevel};
use crate::confounds::{synthesize_confounds, ConfoundRequest};
use crate::design::{synthesize_design, BoundEvent, DesignOutcome, DesignRequest, DESIGN_FILE_NAME};
use crate::diagnostics::Diagnostics;
use crate::events::stage_event_input;
use crate::exec::{format_command_line, run_command};
use crate::locate::{literal, locate_one, pattern_under};
use crate::report::{flatten_report, FlattenOptions, FlattenSummary, FLATTENED_REPORT_NAME};
use crate::signal::SignalTools;
use crate::staging;
use crate::util::display_path;
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::{Component, Path, PathBuf};

pub const RUN_SUMMARY_FILE_NAME: &str = "run_summary.json";
const EVENTS_DIR_NAME: &str = "events";
const FEAT_REPORT_NAME: &str = "report.html";
const ICAFIX_SUFFIX: &str = "_hp2000_clean";
const STRUCTURAL_FILE_NAME: &str = "T1w_restore_brain.nii.gz";

/// Everything the run produced, written to `run_summary.json`.
#[derive(Serialize, Debug, Default)]
pub struct RunSummary {
    pub exit_code: i32,
    pub dry_run: bool,
    pub destination: Option<Destination>,
    pub functional: Option<PathBuf>,
    pub structural: Option<PathBuf>,
    pub confound_file: Option<PathBuf>,
    pub design_file: Option<PathBuf>,
    pub bound_events: Vec<BoundEvent>,
    pub command: Option<String>,
    pub result_dir: Option<PathBuf>,
    pub report: Option<FlattenSummary>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Inputs located and synthesized before FEAT runs.
#[derive(Debug)]
pub struct PreparedAnalysis {
    pub functional: PathBuf,
    pub structural: Option<PathBuf>,
    pub subject_label: Option<String>,
    pub confound_file: Option<PathBuf>,
    pub design: DesignOutcome,
}

/// Run the gear and return the process exit code.
pub fn run_gear(config: &GearConfig, tools: &dyn SignalTools) -> Result<i32> {
    let gear = &config.gear;
    let mut diagnostics = Diagnostics::new();
    tracing::info!(
        work_dir = %gear.work_dir.display(),
        output_dir = %gear.output_dir.display(),
        dry_run = gear.dry_run,
        debug = gear.debug,
        destination = %gear.destination.id,
        "starting run"
    );

    if gear.destination.run_level == RunLevel::Project {
        diagnostics.error(
            "this gear does not run at the project level; run it for each individual subject",
        );
        return finish(gear, RunSummary::default(), &diagnostics);
    }

    fs::create_dir_all(&gear.work_dir)
        .with_context(|| format!("create {}", gear.work_dir.display()))?;
    extract_inputs(gear)?;
    run_extracted(config, tools, diagnostics)
}

/// Unzip the upstream archives into the work directory.
pub fn extract_inputs(gear: &GearOptions) -> Result<()> {
    staging::extract_zip(&gear.structural_zip, &gear.work_dir, false)?;
    staging::extract_zip(&gear.functional_zip, &gear.work_dir, false)?;
    if let Some(icafix) = &gear.icafix_zip {
        staging::extract_zip(icafix, &gear.work_dir, false)?;
    }
    Ok(())
}

/// Everything after extraction: prepare, invoke, collect, summarize.
pub fn run_extracted(
    config: &GearConfig,
    tools: &dyn SignalTools,
    mut diagnostics: Diagnostics,
) -> Result<i32> {
    let gear = &config.gear;
    let mut summary = RunSummary {
        dry_run: gear.dry_run,
        ..RunSummary::default()
    };

    let Some(prepared) = prepare_analysis(config, tools, &mut diagnostics)? else {
        tracing::error!("FEAT was not run because inputs could not be prepared");
        return finish(gear, summary, &diagnostics);
    };
    summary.functional = Some(prepared.functional.clone());
    summary.structural = prepared.structural.clone();
    summary.confound_file = prepared.confound_file.clone();
    summary.design_file = Some(prepared.design.design.path().to_path_buf());
    summary.bound_events = prepared.design.bound_events.clone();

    if diagnostics.has_errors() {
        tracing::error!("FEAT was not run because of previous errors");
        return finish(gear, summary, &diagnostics);
    }

    let mut argv = build_feat_command(prepared.design.design.path());
    match resolve_feat(gear.fsl_dir.as_deref()) {
        Some(program) => argv[0] = program.display().to_string(),
        None if gear.dry_run => diagnostics.warn(format!("{FEAT_COMMAND} not found on PATH")),
        None => {
            diagnostics.error(format!("{FEAT_COMMAND} not found on PATH or in FSLDIR"));
            return finish(gear, summary, &diagnostics);
        }
    }
    summary.command = Some(format_command_line(&argv));

    let run = run_command(&argv, Some(&gear.work_dir), gear.dry_run)?;
    if !run.success() {
        diagnostics.error(format!("{FEAT_COMMAND} exited with code {:?}", run.exit_code));
    }
    if gear.dry_run {
        diagnostics.warn("gear-dry-run is set: FEAT was NOT run");
        return finish(gear, summary, &diagnostics);
    }

    // Partial results are still collected after a failed run.
    if let Some(result_dir) = collect_outputs(gear, &prepared, &mut diagnostics, &mut summary)? {
        summary.result_dir = Some(result_dir);
    }
    finish(gear, summary, &diagnostics)
}

/// Locate inputs, build confounds and event files, and write the design.
///
/// Returns `None` when the functional series cannot be located; the reason
/// is already recorded in `diagnostics`.
pub fn prepare_analysis(
    config: &GearConfig,
    tools: &dyn SignalTools,
    diagnostics: &mut Diagnostics,
) -> Result<Option<PreparedAnalysis>> {
    let gear = &config.gear;
    let app = &config.app;

    let structural = locate_one(
        &structural_pattern(&gear.work_dir),
        "structural image",
        false,
        diagnostics,
    )?;
    let Some(functional) = locate_one(
        &functional_pattern(&gear.work_dir, app),
        "functional series",
        false,
        diagnostics,
    )?
    else {
        return Ok(None);
    };

    let subject_label = gear
        .destination
        .subject_label
        .clone()
        .or_else(|| subject_from_path(&gear.work_dir, &functional));

    let confounds = synthesize_confounds(
        &ConfoundRequest {
            functional: &functional,
            search_root: &gear.work_dir,
            task_name: &app.task_name,
            dummy_scans: app.dummy_scans,
            motion: app.motion_confound,
            replace_with_noise: app.dummy_scan_noise,
            out_dir: &gear.work_dir,
        },
        tools,
        diagnostics,
    )?;

    let events_dir = match &gear.event_files {
        Some(input) => {
            let events_dir = gear.work_dir.join(EVENTS_DIR_NAME);
            let staged = stage_event_input(input, &events_dir, &app.event_label_column)?;
            tracing::info!(count = staged.len(), "staged event files");
            Some(events_dir)
        }
        None => None,
    };

    let design_path = gear.work_dir.join(DESIGN_FILE_NAME);
    let design = synthesize_design(
        &DesignRequest {
            template: &gear.fsf_template,
            dest: &design_path,
            output_name: app.output_name.as_deref(),
            functional: &confounds.functional,
            standard_dir: &gear.standard_dir,
            confound_file: confounds.confound_file.as_deref(),
            events_dir: events_dir.as_deref(),
        },
        tools,
        diagnostics,
    )?;

    Ok(Some(PreparedAnalysis {
        functional: confounds.functional,
        structural,
        subject_label,
        confound_file: confounds.confound_file,
        design,
    }))
}

/// Flatten the report and publish the result directory under the output dir.
///
/// Returns the located result directory.
pub fn collect_outputs(
    gear: &GearOptions,
    prepared: &PreparedAnalysis,
    diagnostics: &mut Diagnostics,
    summary: &mut RunSummary,
) -> Result<Option<PathBuf>> {
    let prefix = prepared
        .design
        .output_name
        .as_deref()
        .map(literal)
        .unwrap_or_default();
    let pattern = pattern_under(&gear.work_dir, &[&format!("{prefix}*.feat")]);
    let Some(result_dir) = locate_one(&pattern, "FEAT result directory", false, diagnostics)? else {
        return Ok(None);
    };
    let result_name = result_dir
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "result.feat".to_string());
    let result_stem = result_name
        .strip_suffix(".feat")
        .unwrap_or(&result_name)
        .to_string();

    let report = result_dir.join(FEAT_REPORT_NAME);
    let flattened = result_dir.join(FLATTENED_REPORT_NAME);
    if report.is_file() {
        summary.report = Some(flatten_report(&report, &flattened, FlattenOptions::default())?);
    } else {
        diagnostics.warn(format!("no {FEAT_REPORT_NAME} in {}", result_dir.display()));
    }

    fs::create_dir_all(&gear.output_dir)
        .with_context(|| format!("create {}", gear.output_dir.display()))?;
    let dest = publish_dir(
        &gear.output_dir,
        prepared.subject_label.as_deref(),
        gear.destination.session_label.as_deref(),
    )
    .join(&result_name);
    tracing::info!(dest = %display_path(&dest, Some(&gear.output_dir)), "copying results");
    staging::copy_dir_recursive(&result_dir, &dest)?;

    if flattened.is_file() {
        let target = gear.output_dir.join(format!("{result_stem}_report.html"));
        fs::copy(&flattened, &target)
            .with_context(|| format!("copy {} to {}", flattened.display(), target.display()))?;
    }
    let design = prepared.design.design.path();
    let design_target = gear.output_dir.join(DESIGN_FILE_NAME);
    fs::copy(design, &design_target)
        .with_context(|| format!("copy {} to {}", design.display(), design_target.display()))?;

    staging::create_zip(
        &result_dir,
        &gear.output_dir.join(format!("{result_name}.zip")),
        false,
    )?;
    staging::widen_permissions(&gear.output_dir)?;
    Ok(Some(result_dir))
}

/// `<output>/sub-<subject>/ses-<session>`, dropping levels that are unknown.
pub fn publish_dir(output_dir: &Path, subject: Option<&str>, session: Option<&str>) -> PathBuf {
    let mut dir = output_dir.to_path_buf();
    if let Some(subject) = subject {
        dir.push(format!("sub-{subject}"));
        if let Some(session) = session {
            dir.push(format!("ses-{session}"));
        }
    }
    dir
}

pub fn functional_pattern(work_dir: &Path, app: &AppOptions) -> String {
    let task = literal(&app.task_name);
    let suffix = if app.icafix { ICAFIX_SUFFIX } else { "" };
    pattern_under(
        work_dir,
        &[
            "*",
            "MNINonLinear",
            "Results",
            &format!("*{task}*"),
            &format!("*{task}{suffix}.nii.gz"),
        ],
    )
}

pub fn structural_pattern(work_dir: &Path) -> String {
    pattern_under(work_dir, &["*", "MNINonLinear", STRUCTURAL_FILE_NAME])
}

/// The HCP subject directory is the first component below the work dir.
fn subject_from_path(work_dir: &Path, functional: &Path) -> Option<String> {
    let relative = functional.strip_prefix(work_dir).ok()?;
    match relative.components().next()? {
        Component::Normal(name) => Some(name.to_string_lossy().to_string()),
        _ => None,
    }
}

fn resolve_feat(fsl_dir: Option<&Path>) -> Option<PathBuf> {
    if let Some(candidate) = fsl_dir.map(|dir| dir.join("bin").join(FEAT_COMMAND)) {
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    which::which(FEAT_COMMAND).ok()
}

fn finish(gear: &GearOptions, mut summary: RunSummary, diagnostics: &Diagnostics) -> Result<i32> {
    let exit_code = i32::from(diagnostics.has_errors());
    summary.exit_code = exit_code;
    summary.dry_run = gear.dry_run;
    summary.destination = Some(gear.destination.clone());
    summary.errors = diagnostics.errors().map(|entry| entry.message.clone()).collect();
    summary.warnings = diagnostics.warnings().map(|entry| entry.message.clone()).collect();
    let path = staging::write_staged_json(&gear.output_dir, RUN_SUMMARY_FILE_NAME, &summary)?;
    tracing::debug!(path = %path.display(), "wrote run summary");
    diagnostics.log_summary();
    tracing::info!(exit_code, "run complete");
    Ok(exit_code)
}

#[cfg(test)]
#[path = "workflow_tests.rs"]
mod tests;
