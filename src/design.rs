//! FEAT design (`.fsf`) synthesis.
//!
//! Statements are addressed through [`DesignKey`] so callers never build
//! per-call-site regexes; the line rewriting itself lives in `patch`.
use crate::diagnostics::Diagnostics;
use crate::locate::{literal, locate_one, pattern_under};
use crate::patch;
use crate::signal::SignalTools;
use anyhow::{Context, Result};
use regex::Regex;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

pub const DESIGN_FILE_NAME: &str = "design.fsf";

/// One addressable `set ...` statement in the FEAT design dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesignKey {
    OutputDir,
    FeatFile(usize),
    VolumeCount,
    StandardImage,
    ConfoundsEnabled,
    ConfoundFile(usize),
    EvTitle(usize),
    CustomEvFile(usize),
}

impl DesignKey {
    /// Left-hand side, e.g. `set fmri(outputdir)`.
    pub fn lhs(&self) -> String {
        match self {
            DesignKey::OutputDir => "set fmri(outputdir)".to_string(),
            DesignKey::FeatFile(index) => format!("set feat_files({index})"),
            DesignKey::VolumeCount => "set fmri(npts)".to_string(),
            DesignKey::StandardImage => "set fmri(regstandard)".to_string(),
            DesignKey::ConfoundsEnabled => "set fmri(confoundevs)".to_string(),
            DesignKey::ConfoundFile(index) => format!("set confoundev_files({index})"),
            DesignKey::EvTitle(index) => format!("set fmri(evtitle{index})"),
            DesignKey::CustomEvFile(index) => format!("set fmri(custom{index})"),
        }
    }

    /// Numeric statements are written bare, everything else quoted.
    fn quoted(&self) -> bool {
        !matches!(self, DesignKey::VolumeCount | DesignKey::ConfoundsEnabled)
    }

    /// Render the whole statement line for `value`.
    pub fn statement(&self, value: &str) -> String {
        if self.quoted() {
            format!("{} \"{value}\"", self.lhs())
        } else {
            format!("{} {value}", self.lhs())
        }
    }

    fn lhs_pattern(&self) -> String {
        self.lhs()
            .split_whitespace()
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(r"\s+")
    }

    fn line_pattern(&self) -> Result<Regex> {
        let pattern = format!(r"^\s*{}(\s|$)", self.lhs_pattern());
        Regex::new(&pattern).with_context(|| format!("compile pattern for {self}"))
    }

    fn value_pattern(&self) -> Result<Regex> {
        let pattern = format!(r#"^\s*{}\s+"?([^"]*?)"?\s*$"#, self.lhs_pattern());
        Regex::new(&pattern).with_context(|| format!("compile pattern for {self}"))
    }
}

impl fmt::Display for DesignKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.lhs())
    }
}

/// A working copy of a design file.
#[derive(Debug, Clone)]
pub struct DesignFile {
    path: PathBuf,
}

impl DesignFile {
    /// Copy `template` to `dest`; the template itself is never modified.
    pub fn from_template(template: &Path, dest: &Path) -> Result<Self> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        fs::copy(template, dest)
            .with_context(|| format!("copy {} to {}", template.display(), dest.display()))?;
        Ok(Self::open(dest))
    }

    pub fn open(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Set `key` to `value`, appending the statement if the design lacks it.
    pub fn set(&self, key: DesignKey, value: &str) -> Result<()> {
        let statement = key.statement(value);
        let replaced = patch::replace_line(&self.path, &key.line_pattern()?, &statement)?;
        if replaced == 0 {
            tracing::debug!(%key, "statement missing from design, appending");
            patch::append_line(&self.path, &statement)?;
        }
        tracing::info!("{statement}");
        Ok(())
    }

    /// Current value of `key` (first occurrence, quotes stripped).
    pub fn get(&self, key: DesignKey) -> Result<Option<String>> {
        let values = patch::locate(&self.path, &key.value_pattern()?)?;
        Ok(values.into_iter().next())
    }

    /// Indices of every declared `evtitle<N>` statement, in file order.
    pub fn ev_indices(&self) -> Result<Vec<usize>> {
        let pattern = Regex::new(r"^\s*set\s+fmri\(evtitle(\d+)\)").context("compile evtitle pattern")?;
        let indices = patch::locate(&self.path, &pattern)?
            .into_iter()
            .filter_map(|index| index.parse::<usize>().ok())
            .collect();
        Ok(indices)
    }

    /// Move the path value of `key` into `dir`, keeping its file name.
    ///
    /// Returns the number of statements rewritten.
    pub fn relocate(&self, key: DesignKey, dir: &Path) -> Result<usize> {
        let pattern = format!(r#"^(\s*{}\s+"?)(?:[^"]*/)?([^"/]+"?\s*)$"#, key.lhs_pattern());
        let pattern = Regex::new(&pattern).with_context(|| format!("compile pattern for {key}"))?;
        let dir = dir.display().to_string();
        let dir = dir.trim_end_matches('/').replace('$', "$$");
        patch::substitute(&self.path, &pattern, &format!("${{1}}{dir}/${{2}}"))
    }

    pub fn confounds_enabled(&self) -> Result<bool> {
        Ok(self
            .get(DesignKey::ConfoundsEnabled)?
            .map(|value| value.trim() == "1")
            .unwrap_or(false))
    }
}

/// A condition title bound to its event file.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct BoundEvent {
    pub index: usize,
    pub title: String,
    pub path: PathBuf,
}

/// Inputs to design synthesis.
#[derive(Debug, Clone)]
pub struct DesignRequest<'a> {
    pub template: &'a Path,
    pub dest: &'a Path,
    pub output_name: Option<&'a str>,
    pub functional: &'a Path,
    pub standard_dir: &'a Path,
    pub confound_file: Option<&'a Path>,
    pub events_dir: Option<&'a Path>,
}

#[derive(Debug, Clone)]
pub struct DesignOutcome {
    pub design: DesignFile,
    pub output_name: Option<String>,
    pub bound_events: Vec<BoundEvent>,
}

/// Write a run-specific design from the template.
pub fn synthesize_design(
    request: &DesignRequest<'_>,
    tools: &dyn SignalTools,
    diagnostics: &mut Diagnostics,
) -> Result<DesignOutcome> {
    let design = DesignFile::from_template(request.template, request.dest)?;
    tracing::info!(path = %design.path().display(), "writing design file");

    if let Some(name) = request.output_name {
        design.set(DesignKey::OutputDir, name)?;
    }
    let output_name = design.get(DesignKey::OutputDir)?.and_then(|value| {
        Path::new(&value)
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
    });

    design.set(DesignKey::FeatFile(1), &request.functional.display().to_string())?;

    let volumes = tools
        .volume_count(request.functional)
        .with_context(|| format!("count volumes in {}", request.functional.display()))?;
    design.set(DesignKey::VolumeCount, &volumes.to_string())?;

    // Inputs are already in standard space; only the reference image moves.
    match design.get(DesignKey::StandardImage)? {
        Some(current) => {
            if design.relocate(DesignKey::StandardImage, request.standard_dir)? > 0 {
                tracing::info!(dir = %request.standard_dir.display(), "relocated standard image");
            } else if Path::new(&current).file_name().is_none() {
                diagnostics.warn(format!("standard image {current:?} has no file name"));
            }
        }
        None => diagnostics.warn("design template has no standard image statement"),
    }

    let enabled = design.confounds_enabled()?;
    match (enabled, request.confound_file) {
        (false, Some(path)) => diagnostics.critical(format!(
            "confound file {} was generated but the design template does not enable confound EVs",
            path.display()
        )),
        (true, None) => diagnostics.critical(
            "design template enables confound EVs but no confound file was generated",
        ),
        _ => {}
    }
    if let Some(path) = request.confound_file {
        design.set(DesignKey::ConfoundFile(1), &path.display().to_string())?;
    }

    let bound_events = bind_event_files(&design, request.events_dir, diagnostics)?;

    Ok(DesignOutcome {
        design,
        output_name,
        bound_events,
    })
}

fn bind_event_files(
    design: &DesignFile,
    events_dir: Option<&Path>,
    diagnostics: &mut Diagnostics,
) -> Result<Vec<BoundEvent>> {
    let indices = design.ev_indices()?;
    let Some(events_dir) = events_dir else {
        if !indices.is_empty() {
            diagnostics.warn("no event files supplied; keeping custom EV paths from the template");
        }
        return Ok(Vec::new());
    };

    let mut bound = Vec::new();
    for index in indices {
        let Some(title) = design.get(DesignKey::EvTitle(index))? else {
            continue;
        };
        let pattern = pattern_under(events_dir, &[&format!("*{}*", literal(&title))]);
        let label = format!("event file for EV {index} ({title})");
        let Some(path) = locate_one(&pattern, &label, false, diagnostics)? else {
            continue;
        };
        design.set(DesignKey::CustomEvFile(index), &path.display().to_string())?;
        bound.push(BoundEvent { index, title, path });
    }
    Ok(bound)
}

#[cfg(test)]
#[path = "design_tests.rs"]
mod tests;
