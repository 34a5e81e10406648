//! Nuisance regressors for the first-level model.
//!
//! Builds the dummy-scan indicator columns, optionally joins the HCP motion
//! regressors, and can replace the leading non-steady-state volumes of the
//! functional series with noise around the series' temporal mean.
use crate::diagnostics::Diagnostics;
use crate::locate::{literal, locate_one, pattern_under};
use crate::signal::SignalTools;
use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFOUNDS_FILE_NAME: &str = "confounds.txt";
pub const MOTION_REGRESSORS_FILE_NAME: &str = "Movement_Regressors.txt";

/// Numeric table, rows = timepoints, columns = regressors.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConfoundMatrix {
    rows: Vec<Vec<f64>>,
}

impl ConfoundMatrix {
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self> {
        if let Some(first) = rows.first() {
            let width = first.len();
            if let Some(index) = rows.iter().position(|row| row.len() != width) {
                return Err(anyhow!(
                    "row {index} has {} columns, expected {width}",
                    rows[index].len()
                ));
            }
        }
        Ok(Self { rows })
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.rows.first().map_or(0, Vec::len)
    }

    /// Columns of `self` followed by columns of `other`, row by row.
    pub fn hconcat(&self, other: &ConfoundMatrix) -> Result<ConfoundMatrix> {
        if self.row_count() != other.row_count() {
            return Err(anyhow!(
                "cannot join confounds with {} and {} rows",
                self.row_count(),
                other.row_count()
            ));
        }
        let rows = self
            .rows
            .iter()
            .zip(&other.rows)
            .map(|(left, right)| left.iter().chain(right).copied().collect())
            .collect();
        Ok(ConfoundMatrix { rows })
    }

    /// Parse whitespace-delimited numeric text (no header).
    pub fn read(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let mut rows = Vec::new();
        for (number, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let row = line
                .split_whitespace()
                .map(|token| {
                    token.parse::<f64>().with_context(|| {
                        format!("parse {token:?} on line {} of {}", number + 1, path.display())
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            rows.push(row);
        }
        Self::from_rows(rows).with_context(|| format!("read {}", path.display()))
    }

    /// Write whitespace-delimited text, one row per line, no header or index.
    pub fn write(&self, path: &Path) -> Result<()> {
        let mut text = String::new();
        for row in self.rows() {
            let line = row
                .iter()
                .map(|value| value.to_string())
                .collect::<Vec<_>>()
                .join(" ");
            text.push_str(&line);
            text.push('\n');
        }
        fs::write(path, text).with_context(|| format!("write {}", path.display()))
    }
}

/// `volumes` × `dummy_scans` indicator matrix: column `j` is 1 at row `j`, else 0.
pub fn dummy_scan_matrix(volumes: usize, dummy_scans: usize) -> ConfoundMatrix {
    let rows = (0..volumes)
        .map(|row| {
            (0..dummy_scans)
                .map(|column| if row == column { 1.0 } else { 0.0 })
                .collect()
        })
        .collect();
    ConfoundMatrix { rows }
}

/// Replace the leading `dummy_scans` volumes of `input` with noise around the
/// temporal mean of the remaining volumes, writing the result to `output`.
///
/// trim → temporal mean → de-mean → prepend noise → add the mean back.
pub fn replace_leading_volumes(
    tools: &dyn SignalTools,
    input: &Path,
    dummy_scans: usize,
    scratch: &Path,
    output: &Path,
) -> Result<()> {
    let trimmed = scratch.join("trimmed.nii.gz");
    let mean = scratch.join("tmean.nii.gz");
    let demeaned = scratch.join("demeaned.nii.gz");
    let noise_template = scratch.join("noise_template.nii.gz");
    let noise = scratch.join("noise.nii.gz");
    let merged = scratch.join("merged.nii.gz");

    tools.select_volumes(input, &trimmed, dummy_scans, None)?;
    tools.temporal_mean(&trimmed, &mean)?;
    tools.subtract(&trimmed, &mean, &demeaned)?;
    tools.select_volumes(&demeaned, &noise_template, 0, Some(dummy_scans))?;
    tools.gaussian_noise(&noise_template, &noise)?;
    tools.concat_time(&[noise, demeaned], &merged)?;
    tools.add(&merged, &mean, output)?;
    Ok(())
}

/// What the confound stage needs from the run.
#[derive(Debug, Clone)]
pub struct ConfoundRequest<'a> {
    pub functional: &'a Path,
    pub search_root: &'a Path,
    pub task_name: &'a str,
    pub dummy_scans: usize,
    pub motion: bool,
    pub replace_with_noise: bool,
    pub out_dir: &'a Path,
}

/// Result of the confound stage; downstream stages must use `functional`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfoundOutcome {
    pub functional: PathBuf,
    pub confound_file: Option<PathBuf>,
}

pub fn motion_regressors_pattern(search_root: &Path, task_name: &str) -> String {
    pattern_under(
        search_root,
        &[
            "*",
            "MNINonLinear",
            "Results",
            &format!("*{}*", literal(task_name)),
            MOTION_REGRESSORS_FILE_NAME,
        ],
    )
}

/// Build the confound file and, if requested, the noise-replaced series.
pub fn synthesize_confounds(
    request: &ConfoundRequest<'_>,
    tools: &dyn SignalTools,
    diagnostics: &mut Diagnostics,
) -> Result<ConfoundOutcome> {
    let mut outcome = ConfoundOutcome {
        functional: request.functional.to_path_buf(),
        confound_file: None,
    };
    if !request.motion && request.dummy_scans == 0 {
        tracing::info!("no motion or dummy-scan confounds requested");
        return Ok(outcome);
    }

    let motion = if request.motion {
        let pattern = motion_regressors_pattern(request.search_root, request.task_name);
        match locate_one(&pattern, "motion regressors file", false, diagnostics)? {
            Some(path) => Some(ConfoundMatrix::read(&path)?),
            None => None,
        }
    } else {
        None
    };

    let volumes = tools
        .volume_count(request.functional)
        .with_context(|| format!("count volumes in {}", request.functional.display()))?;
    tracing::info!(volumes, dummy_scans = request.dummy_scans, "building confounds");

    let mut dummy = None;
    if request.dummy_scans > 0 {
        if request.dummy_scans >= volumes {
            diagnostics.error(format!(
                "dummy-scans ({}) must be smaller than the number of volumes ({volumes})",
                request.dummy_scans
            ));
        } else {
            if request.replace_with_noise {
                let scratch = tempfile::Builder::new()
                    .prefix("dummy-noise-")
                    .tempdir_in(request.out_dir)
                    .with_context(|| format!("create scratch dir in {}", request.out_dir.display()))?;
                let replaced = request.out_dir.join(noise_replaced_name(request.functional));
                replace_leading_volumes(
                    tools,
                    request.functional,
                    request.dummy_scans,
                    scratch.path(),
                    &replaced,
                )?;
                tracing::info!(path = %replaced.display(), "replaced leading volumes with noise");
                outcome.functional = replaced;
            }
            dummy = Some(dummy_scan_matrix(volumes, request.dummy_scans));
        }
    }

    let motion = motion.filter(|matrix| {
        let matches = matrix.row_count() == volumes;
        if !matches {
            diagnostics.error(format!(
                "motion regressors have {} rows but the functional series has {volumes} volumes",
                matrix.row_count()
            ));
        }
        matches
    });

    let combined = match (dummy, motion) {
        (Some(dummy), Some(motion)) => Some(dummy.hconcat(&motion)?),
        (Some(only), None) | (None, Some(only)) => Some(only),
        (None, None) => None,
    };

    if let Some(matrix) = combined {
        let path = request.out_dir.join(CONFOUNDS_FILE_NAME);
        matrix.write(&path)?;
        tracing::info!(
            path = %path.display(),
            columns = matrix.column_count(),
            "wrote confounds file"
        );
        outcome.confound_file = Some(path);
    }
    Ok(outcome)
}

fn noise_replaced_name(functional: &Path) -> String {
    let name = functional
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "functional.nii.gz".to_string());
    let stem = name
        .strip_suffix(".nii.gz")
        .or_else(|| name.strip_suffix(".nii"))
        .unwrap_or(&name);
    format!("{stem}_dummy-noise.nii.gz")
}

#[cfg(test)]
#[path = "confounds_tests.rs"]
mod tests;
