use super::*;
use regex::Regex;

const PNG: &[u8] = b"\x89PNG\r\n\x1a\nnot really pixels";

fn write(dir: &Path, rel: &str, contents: &[u8]) {
    let path = dir.join(rel);
    fs::create_dir_all(path.parent().expect("parent")).expect("create parent");
    fs::write(path, contents).expect("write fixture");
}

/// report.html -> {reg/summary.html, stats1.html}; stats1.html -> {stats1_detail.html,
/// plots/ts.html, empty.html}; stats1_detail.html -> deeper.html.
fn report_tree(dir: &Path) -> PathBuf {
    write(
        dir,
        "report.html",
        br#"<HTML><HEAD><TITLE>FSL</TITLE></HEAD><BODY>
<table><tr><td>
<a href="reg/summary.html" target="_top">Registration</a> -
<a href="stats1.html" target="_top">Stats</a> -
<a href="http://fsl.fmrib.ox.ac.uk/fsl">FSL</a>
</td></tr></table>
<object data="report_log.html"></object>
</BODY></HTML>"#,
    );
    write(
        dir,
        "reg/summary.html",
        br#"<html><body><p>Registration</p>
<a href="detail.html"><img src="example_func2standard.png"></a>
</body></html>"#,
    );
    write(dir, "reg/example_func2standard.png", PNG);
    write(dir, "reg/detail.html", b"<html><body>REG-DETAIL</body></html>");
    write(
        dir,
        "stats1.html",
        br#"<html><body><object data="x.html"><p>embedded</p></object>
<p>Stats</p>
<a href="stats1_detail.html">Cluster list</a>
<a href="plots/ts.html"></a>
<a href="empty.html">Empty</a>
<a href="stats1.html#top">Self</a>
<IMG SRC="rendered_thresh_zstat1.png">
</body></html>"#,
    );
    write(dir, "rendered_thresh_zstat1.png", PNG);
    write(
        dir,
        "stats1_detail.html",
        br#"<html><body><p>Clusters</p>
<a href="deeper.html">Deeper</a> <a href="report.html">Back</a>
<IMG SRC="file:tsplot_zstat1.png">
</body></html>"#,
    );
    write(dir, "tsplot/tsplot_zstat1.png", PNG);
    write(dir, "deeper.html", b"<html><body>DEEPER</body></html>");
    write(dir, "plots/ts.html", b"<html><body><img src=\"ts.png\"></body></html>");
    write(dir, "plots/ts.png", PNG);
    write(dir, "empty.html", b"<html><head></head></html>");
    dir.join("report.html")
}

fn flatten(dir: &Path, options: FlattenOptions) -> (String, FlattenSummary) {
    let report = report_tree(dir);
    let output = dir.join(FLATTENED_REPORT_NAME);
    let summary = flatten_report(&report, &output, options).expect("flatten");
    (fs::read_to_string(output).expect("read output"), summary)
}

#[test]
fn report_tree_becomes_one_document() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let (html, summary) = flatten(temp.path(), FlattenOptions::default());

    let page_link = Regex::new(r#"href="[^#"][^"]*\.html""#).expect("regex");
    assert!(!page_link.is_match(&html), "page links remain:\n{html}");
    assert!(!html.to_ascii_lowercase().contains("<object"));
    assert!(!html.contains("target="));

    assert_eq!(
        summary.sections,
        vec![
            "summary",
            "reg/summary.html",
            "stats1.html",
            "stats1_detail.html",
            "plots/ts.html",
        ]
    );
    assert_eq!(summary.skipped, vec!["empty.html"]);
    assert!(summary.images_missing.is_empty());
    assert_eq!(summary.images_inlined, 4);

    let png_uri = format!("data:image/png;base64,{}", STANDARD.encode(PNG));
    let stats = html.find(r#"<div id="stats1.html">"#).expect("stats section");
    assert!(html[stats..].contains(&png_uri));
    assert!(html.contains(r##"<a href="#stats1.html">Stats</a>"##));
    assert!(html.contains("<h2>Cluster list</h2>"));
    assert!(html.contains("<h2>plots/ts.html</h2>"));
    assert_eq!(html.matches("Return to Top").count(), 4);
}

#[test]
fn excluded_pages_and_depth_cap_stop_expansion() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let (html, _) = flatten(temp.path(), FlattenOptions::default());

    // reg/summary.html is merged, but its own links are not followed.
    assert!(html.contains(r#"<div id="reg/summary.html">"#));
    assert!(html.contains(r##"href="#reg/detail.html""##));
    assert!(!html.contains("REG-DETAIL"));
    // Pages linked from depth two are not merged.
    assert!(html.contains(r##"href="#deeper.html""##));
    assert!(!html.contains("DEEPER"));
}

#[test]
fn links_back_to_root_point_at_summary() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let (html, _) = flatten(temp.path(), FlattenOptions::default());
    assert!(html.contains(r##"<a href="#summary">Back</a>"##));
    assert!(html.starts_with("<!DOCTYPE html>"));
    let summary = html.find(r#"<div id="summary">"#).expect("summary section");
    let first_section = html.find(r#"<div id="reg/summary.html">"#).expect("reg section");
    assert!(summary < first_section);
}

#[test]
fn depth_one_limits_to_root_links() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let options = FlattenOptions {
        max_depth: 1,
        ..FlattenOptions::default()
    };
    let (_, summary) = flatten(temp.path(), options);
    assert_eq!(summary.sections, vec!["summary", "reg/summary.html", "stats1.html"]);
}

#[test]
fn unresolvable_images_are_reported_not_fatal() {
    let temp = tempfile::tempdir().expect("create temp dir");
    write(
        temp.path(),
        "report.html",
        br#"<body><table><tr><td><a href="a.html">A</a></td></tr></table></body>"#,
    );
    write(temp.path(), "a.html", br#"<body><img src="gone.png"></body>"#);
    let summary = flatten_report(
        &temp.path().join("report.html"),
        &temp.path().join("out/index.html"),
        FlattenOptions::default(),
    )
    .expect("flatten");
    assert_eq!(summary.images_missing, vec!["gone.png"]);
    assert!(temp.path().join("out/index.html").is_file());
}

#[test]
fn unclosed_name_anchor_keeps_the_following_link() {
    let temp = tempfile::tempdir().expect("create temp dir");
    write(
        temp.path(),
        "report.html",
        br#"<body><a name="top">Top<br><a href="stats.html">Stats</a></body>"#,
    );
    write(temp.path(), "stats.html", b"<body>STATS-BODY</body>");
    let output = temp.path().join(FLATTENED_REPORT_NAME);
    let summary = flatten_report(&temp.path().join("report.html"), &output, FlattenOptions::default())
        .expect("flatten");
    let html = fs::read_to_string(output).expect("read output");

    assert_eq!(summary.sections, vec!["summary", "stats.html"]);
    assert!(html.contains("STATS-BODY"));
    assert!(html.contains(r##"<a href="#stats.html">Stats</a>"##));
    assert!(!html.contains(r#"href="stats.html""#));
}

#[test]
fn section_ids_are_attribute_escaped() {
    let temp = tempfile::tempdir().expect("create temp dir");
    write(
        temp.path(),
        "report.html",
        br#"<body><table><tr><td><a href="a&b.html">AB</a></td></tr></table></body>"#,
    );
    write(temp.path(), "a&b.html", b"<body>AMP-PAGE</body>");
    let output = temp.path().join(FLATTENED_REPORT_NAME);
    flatten_report(&temp.path().join("report.html"), &output, FlattenOptions::default())
        .expect("flatten");
    let html = fs::read_to_string(output).expect("read output");

    assert!(html.contains(r#"<div id="a&amp;b.html">"#), "{html}");
    assert!(html.contains("AMP-PAGE"));
}

#[test]
fn stages_must_run_in_order() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let report = report_tree(temp.path());
    let mut flattener = Flattener::load(&report, FlattenOptions::default()).expect("load");
    assert_eq!(flattener.state(), ReportState::RootLoaded);
    assert!(flattener.merge_fragments().is_err());
    flattener.rewrite_links().expect("rewrite");
    assert_eq!(flattener.state(), ReportState::LinksRewritten);
    assert!(flattener.write(&temp.path().join("x.html")).is_err());
}

#[test]
fn page_targets_resolve_against_the_linking_page() {
    assert_eq!(
        page_target("../stats1.html#top", Path::new("reg")),
        Some(PathBuf::from("stats1.html"))
    );
    assert_eq!(page_target("#local", Path::new("")), None);
    assert_eq!(page_target("https://example.org/a.html", Path::new("")), None);
    assert_eq!(page_target("zstat1.png", Path::new("")), None);
}
