//! Event timing inputs for the custom explanatory variables.
//!
//! A BIDS `events.tsv` is split into one three-column file per condition
//! (onset, duration, weight 1). Zipped or single ready-made three-column
//! files are staged as-is.
use crate::staging;
use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_LABEL_COLUMN: &str = "trial_type";
const ONSET_COLUMN: &str = "onset";
const DURATION_COLUMN: &str = "duration";
const EVENT_WEIGHT: &str = "1";

/// Rows of one condition, in input order.
#[derive(Debug, Clone, PartialEq)]
struct Condition {
    label: String,
    rows: Vec<(String, String)>,
}

/// Split `table` into `<out_dir>/<stem>_<label>.txt`, one file per unique label.
///
/// Returns the written files sorted by path.
pub fn convert_bids_events(table: &Path, out_dir: &Path, label_column: &str) -> Result<Vec<PathBuf>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .flexible(true)
        .from_path(table)
        .with_context(|| format!("open {}", table.display()))?;
    let headers = reader
        .headers()
        .with_context(|| format!("read headers from {}", table.display()))?
        .clone();
    let column = |name: &str| {
        headers
            .iter()
            .position(|header| header.trim() == name)
            .ok_or_else(|| anyhow!("{} has no {name:?} column", table.display()))
    };
    let onset = column(ONSET_COLUMN)?;
    let duration = column(DURATION_COLUMN)?;
    let label = column(label_column)?;

    let mut conditions: Vec<Condition> = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("read row {} of {}", index + 1, table.display()))?;
        let field = |position: usize| {
            record
                .get(position)
                .map(|value| value.trim().to_string())
                .ok_or_else(|| anyhow!("row {} of {} is short", index + 1, table.display()))
        };
        let row_label = field(label)?;
        let row = (field(onset)?, field(duration)?);
        match conditions.iter_mut().find(|condition| condition.label == row_label) {
            Some(condition) => condition.rows.push(row),
            None => conditions.push(Condition {
                label: row_label,
                rows: vec![row],
            }),
        }
    }

    fs::create_dir_all(out_dir).with_context(|| format!("create {}", out_dir.display()))?;
    let stem = table
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| "events".to_string());

    let mut written = Vec::with_capacity(conditions.len());
    for condition in &conditions {
        let path = out_dir.join(format!("{stem}_{}.txt", file_safe(&condition.label)));
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b' ')
            .has_headers(false)
            .from_path(&path)
            .with_context(|| format!("create {}", path.display()))?;
        for (onset, duration) in &condition.rows {
            writer
                .write_record([onset.as_str(), duration.as_str(), EVENT_WEIGHT])
                .with_context(|| format!("write {}", path.display()))?;
        }
        writer
            .flush()
            .with_context(|| format!("write {}", path.display()))?;
        tracing::info!(
            condition = %condition.label,
            rows = condition.rows.len(),
            path = %path.display(),
            "wrote event file"
        );
        written.push(path);
    }
    written.sort();
    Ok(written)
}

/// Stage the `event_files` input into `events_dir` according to its format.
pub fn stage_event_input(input: &Path, events_dir: &Path, label_column: &str) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(events_dir).with_context(|| format!("create {}", events_dir.display()))?;
    let extension = input
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "zip" => {
            staging::extract_zip(input, events_dir, false)?;
            staging::collect_files_recursive(events_dir)
        }
        "tsv" => convert_bids_events(input, events_dir, label_column),
        _ => {
            let name = input
                .file_name()
                .ok_or_else(|| anyhow!("event input has no file name: {}", input.display()))?;
            let dest = events_dir.join(name);
            fs::copy(input, &dest)
                .with_context(|| format!("copy {} to {}", input.display(), dest.display()))?;
            Ok(vec![dest])
        }
    }
}

fn file_safe(label: &str) -> String {
    label
        .chars()
        .map(|ch| if ch == '/' || ch == '\\' || ch.is_whitespace() { '_' } else { ch })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const EVENTS: &str = "onset\tduration\ttrial_type\tresponse_time\n\
0.0\t2.5\tA\t0.61\n\
4.0\t2.5\tB\t0.72\n\
8.0\t2.5\tA\tn/a\n\
12.0\t3.0\tB\t0.55\n\
16.0\t2.5\tA\t0.49\n";

    fn write_events(dir: &Path) -> PathBuf {
        let path = dir.join("sub-01_task-wm_events.tsv");
        fs::write(&path, EVENTS).expect("write events");
        path
    }

    #[test]
    fn one_file_per_condition_with_constant_weight() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let table = write_events(temp.path());
        let out_dir = temp.path().join("events");

        let written = convert_bids_events(&table, &out_dir, DEFAULT_LABEL_COLUMN).expect("convert");

        assert_eq!(
            written,
            vec![
                out_dir.join("sub-01_task-wm_events_A.txt"),
                out_dir.join("sub-01_task-wm_events_B.txt"),
            ]
        );
        assert_eq!(fs::read_dir(&out_dir).expect("list").count(), 2);

        let a = fs::read_to_string(&written[0]).expect("read A");
        assert_eq!(a, "0.0 2.5 1\n8.0 2.5 1\n16.0 2.5 1\n");
        let b = fs::read_to_string(&written[1]).expect("read B");
        let rows: Vec<&str> = b.lines().collect();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|row| row.split(' ').count() == 3 && row.ends_with(" 1")));
    }

    #[test]
    fn missing_label_column_is_an_error() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let table = write_events(temp.path());
        let err = convert_bids_events(&table, &temp.path().join("events"), "condition")
            .expect_err("missing column");
        assert!(err.to_string().contains("condition"));
    }

    #[test]
    fn labels_are_made_file_safe() {
        assert_eq!(file_safe("0-back faces"), "0-back_faces");
        assert_eq!(file_safe("a/b"), "a_b");
    }

    #[test]
    fn plain_text_input_is_copied() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let input = temp.path().join("faces.txt");
        fs::write(&input, "0 2 1\n").expect("write");
        let events_dir = temp.path().join("events");
        let staged = stage_event_input(&input, &events_dir, DEFAULT_LABEL_COLUMN).expect("stage");
        assert_eq!(staged, vec![events_dir.join("faces.txt")]);
    }

    #[test]
    fn tsv_input_is_converted() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let table = write_events(temp.path());
        let events_dir = temp.path().join("events");
        let staged = stage_event_input(&table, &events_dir, DEFAULT_LABEL_COLUMN).expect("stage");
        assert_eq!(staged.len(), 2);
    }
}
