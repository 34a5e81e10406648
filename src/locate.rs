//! Glob-based file discovery over the extracted upstream outputs.
use crate::diagnostics::Diagnostics;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Escape a literal path fragment so it can be embedded in a pattern.
pub fn literal(fragment: &str) -> String {
    glob::Pattern::escape(fragment)
}

/// Build a pattern rooted at `root` from already-escaped segments.
pub fn pattern_under(root: &Path, segments: &[&str]) -> String {
    let mut pattern = literal(&root.display().to_string());
    for segment in segments {
        if !pattern.ends_with('/') {
            pattern.push('/');
        }
        pattern.push_str(segment);
    }
    pattern
}

/// Return every path matching `pattern`, sorted and absolute.
///
/// A dry run logs the pattern and returns nothing.
pub fn locate_files(pattern: &str, dry_run: bool) -> Result<Vec<PathBuf>> {
    if dry_run {
        tracing::info!(pattern, "dry run: skipped file search");
        return Ok(Vec::new());
    }
    let cwd = std::env::current_dir().context("resolve current directory")?;
    let mut matches = Vec::new();
    for entry in glob::glob(pattern).with_context(|| format!("parse pattern {pattern}"))? {
        match entry {
            Ok(path) if path.is_absolute() => matches.push(path),
            Ok(path) => matches.push(cwd.join(path)),
            Err(err) => tracing::warn!(pattern, "skipping unreadable path: {err}"),
        }
    }
    matches.sort();
    tracing::debug!(pattern, count = matches.len(), "located files");
    Ok(matches)
}

/// Locate exactly one file for `label`.
///
/// Zero or several matches are recorded as errors and yield `None`; an
/// ambiguous match is never resolved by picking the first path.
pub fn locate_one(
    pattern: &str,
    label: &str,
    dry_run: bool,
    diagnostics: &mut Diagnostics,
) -> Result<Option<PathBuf>> {
    let matches = locate_files(pattern, dry_run)?;
    if dry_run {
        return Ok(None);
    }
    match matches.as_slice() {
        [only] => {
            tracing::info!(path = %only.display(), "found {label}");
            Ok(Some(only.clone()))
        }
        [] => {
            diagnostics.error(format!("no {label} found matching {pattern}"));
            Ok(None)
        }
        many => {
            let listed = many
                .iter()
                .map(|path| path.display().to_string())
                .collect::<Vec<_>>()
                .join(", ");
            diagnostics.error(format!(
                "expected one {label} matching {pattern}, found {}: {listed}",
                many.len()
            ));
            Ok(None)
        }
    }
}
