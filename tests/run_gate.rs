//! Integration tests for `hcp-feat run` paths that never reach FEAT.

mod common;

use common::{stderr, TestFixture};
use std::fs;

#[test]
fn project_level_destination_exits_one() {
    let fixture = TestFixture::new();
    let config = fixture.write_gear_config(
        serde_json::json!({ "task_name": "tfMRI_WM_LR" }),
        serde_json::json!({ "id": "abc", "parent_type": "project" }),
    );

    let output = fixture.run(&[
        "run",
        "--config",
        config.to_str().expect("utf-8 path"),
        "--work-dir",
        "work",
        "--output-dir",
        "output",
        "--standard-dir",
        "/opt/fsl/data/standard",
    ]);

    assert_eq!(output.status.code(), Some(1), "{}", stderr(&output));
    assert!(stderr(&output).contains("project level"));
    assert!(!fixture.path("work").exists());
    let summary: serde_json::Value = serde_json::from_slice(
        &fs::read(fixture.path("output/run_summary.json")).expect("read run summary"),
    )
    .expect("parse run summary");
    assert_eq!(summary["exit_code"], 1);
}

#[test]
fn invalid_config_is_reported() {
    let fixture = TestFixture::new();
    let config = fixture.write_gear_config(
        serde_json::json!({ "task_name": "" }),
        serde_json::json!({ "id": "abc", "parent_type": "session" }),
    );

    let output = fixture.run(&[
        "run",
        "--config",
        config.to_str().expect("utf-8 path"),
        "--work-dir",
        "work",
        "--output-dir",
        "output",
        "--standard-dir",
        "/opt/fsl/data/standard",
    ]);

    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("task_name"));
}
