//! Line-oriented in-place text rewriting.
//!
//! Each rewrite goes through a temporary file in the same directory that
//! replaces the original atomically, carrying over permissions and
//! timestamps. Lines that do not match pass through unchanged; line endings
//! are normalized to `\n`.
use anyhow::{anyhow, Context, Result};
use regex::Regex;
use std::borrow::Cow;
use std::fs::{self, FileTimes};
use std::io::Write;
use std::path::Path;

/// Apply `pattern` → `replacement` to every line (regex `$n` expansion applies).
///
/// Returns the number of lines that changed.
pub fn substitute(path: &Path, pattern: &Regex, replacement: &str) -> Result<usize> {
    rewrite_lines(path, |line| match pattern.replace_all(line, replacement) {
        Cow::Owned(next) => Some(next),
        Cow::Borrowed(_) => None,
    })
}

/// Collect the first capture group of every matching line, in file order.
pub fn locate(path: &Path, pattern: &Regex) -> Result<Vec<String>> {
    if pattern.captures_len() < 2 {
        return Err(anyhow!("pattern {pattern} has no capture group"));
    }
    let text = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let values = text
        .lines()
        .filter_map(|line| pattern.captures(line))
        .filter_map(|captures| captures.get(1).map(|value| value.as_str().to_string()))
        .collect();
    Ok(values)
}

/// Replace each whole line matching `pattern` with the literal `replacement`.
///
/// Returns the number of lines that matched.
pub fn replace_line(path: &Path, pattern: &Regex, replacement: &str) -> Result<usize> {
    let mut matched = 0;
    rewrite_lines(path, |line| {
        if pattern.is_match(line) {
            matched += 1;
            Some(replacement.to_string())
        } else {
            None
        }
    })?;
    Ok(matched)
}

/// Append `line` to the end of the file through the same atomic path.
pub fn append_line(path: &Path, line: &str) -> Result<()> {
    let mut text = read_normalized(path)?;
    text.push_str(line);
    text.push('\n');
    replace_contents(path, &text)
}

fn rewrite_lines<F>(path: &Path, mut rewrite: F) -> Result<usize>
where
    F: FnMut(&str) -> Option<String>,
{
    let original = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let mut changed = 0;
    let mut rewritten = String::with_capacity(original.len());
    for line in original.lines() {
        match rewrite(line).filter(|next| next != line) {
            Some(next) => {
                changed += 1;
                rewritten.push_str(&next);
            }
            None => rewritten.push_str(line),
        }
        rewritten.push('\n');
    }
    replace_contents(path, &rewritten)?;
    Ok(changed)
}

fn read_normalized(path: &Path) -> Result<String> {
    let text = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let mut normalized = String::with_capacity(text.len() + 1);
    for line in text.lines() {
        normalized.push_str(line);
        normalized.push('\n');
    }
    Ok(normalized)
}

fn replace_contents(path: &Path, contents: &str) -> Result<()> {
    let metadata = fs::metadata(path).with_context(|| format!("stat {}", path.display()))?;
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut staged = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("create temp file in {}", parent.display()))?;
    staged
        .write_all(contents.as_bytes())
        .with_context(|| format!("write staged copy of {}", path.display()))?;
    staged
        .as_file()
        .set_permissions(metadata.permissions())
        .with_context(|| format!("copy permissions onto {}", path.display()))?;
    let mut times = FileTimes::new();
    if let Ok(accessed) = metadata.accessed() {
        times = times.set_accessed(accessed);
    }
    if let Ok(modified) = metadata.modified() {
        times = times.set_modified(modified);
    }
    staged
        .as_file()
        .set_times(times)
        .with_context(|| format!("copy timestamps onto {}", path.display()))?;
    staged
        .persist(path)
        .map_err(|err| err.error)
        .with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}
