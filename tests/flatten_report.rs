//! Integration tests for `hcp-feat flatten`.

mod common;

use common::{stderr, TestFixture};
use std::fs;

const PNG: &[u8] = b"\x89PNG\r\n\x1a\nfixture";

fn write_feat_report(fixture: &TestFixture) {
    fixture.write(
        "run.feat/report.html",
        br#"<HTML><BODY>
<table><tr><td>
<a href="report_reg.html" target="_top">Registration</a> -
<a href="report_stats.html" target="_top">Stats</a>
</td></tr></table>
</BODY></HTML>"#,
    );
    fixture.write(
        "run.feat/report_reg.html",
        br#"<html><body><a href="reg/index.html">details</a></body></html>"#,
    );
    fixture.write("run.feat/reg/index.html", b"<html><body>REG-INDEX</body></html>");
    fixture.write(
        "run.feat/report_stats.html",
        br#"<html><body><object data="design.html"></object>
<a href="cluster_zstat1_std.html">Cluster list</a>
<a href="rendered_thresh_zstat1.png"><IMG BORDER=0 SRC="rendered_thresh_zstat1.png"></a>
</body></html>"#,
    );
    fixture.write("run.feat/rendered_thresh_zstat1.png", PNG);
    fixture.write(
        "run.feat/cluster_zstat1_std.html",
        b"<html><body><table><tr><td>CLUSTERS</td></tr></table></body></html>",
    );
}

#[test]
fn flatten_writes_index_beside_report() {
    let fixture = TestFixture::new();
    write_feat_report(&fixture);

    let output = fixture.run(&["flatten", "run.feat/report.html"]);

    assert!(output.status.success(), "{}", stderr(&output));
    let html = fs::read_to_string(fixture.path("run.feat/index.html")).expect("read index.html");
    assert!(html.contains(r#"<div id="summary">"#));
    assert!(html.contains(r##"href="#report_stats.html""##));
    assert!(html.contains("data:image/png;base64,"));
    assert!(html.contains("<h2>Cluster list</h2>"));
    assert!(html.contains("CLUSTERS"));
    assert!(!html.contains("REG-INDEX"));
    assert!(!html.to_ascii_lowercase().contains("<object"));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.trim().ends_with("index.html"));
}

#[test]
fn flatten_honors_out_path() {
    let fixture = TestFixture::new();
    write_feat_report(&fixture);

    let output = fixture.run(&["flatten", "run.feat/report.html", "--out", "out/report.html"]);

    assert!(output.status.success(), "{}", stderr(&output));
    assert!(fixture.path("out/report.html").is_file());
    assert!(!fixture.path("run.feat/index.html").exists());
}

#[test]
fn flatten_missing_report_fails() {
    let fixture = TestFixture::new();
    let output = fixture.run(&["flatten", "missing/report.html"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("report not found"));
}
