//! Flatten a FEAT report tree into one self-contained HTML page.
//!
//! The root `report.html` links to per-stage pages which in turn link to a
//! further level of detail pages. Every reachable page up to
//! [`MAX_LINK_DEPTH`] becomes a section of a single document: cross-page
//! links become in-page anchors and images become `data:` URIs.
pub mod markup;

use crate::templates;
use crate::util::normalize_path;
use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Serialize;
use std::collections::{BTreeSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

use markup::{
    escape_attribute, escape_text, find_element, plain_text, remove_elements, rewrite_anchors,
    rewrite_tags,
};

/// Pages linked from a page at this depth are not expanded further.
pub const MAX_LINK_DEPTH: usize = 2;
/// Pages whose relative path contains one of these are merged but their own links are not followed.
pub const EXCLUDED_FRAGMENTS: [&str; 2] = ["firstlevel", "reg"];
pub const SUMMARY_ANCHOR: &str = "summary";
pub const FLATTENED_REPORT_NAME: &str = "index.html";
const RETURN_TO_TOP: &str = "Return to Top";
const LOCAL_FILE_MARKER: &str = "file:";
const PLOT_DIR: &str = "tsplot";

#[derive(Debug, Clone)]
pub struct FlattenOptions {
    pub max_depth: usize,
    pub excluded: Vec<String>,
}

impl Default for FlattenOptions {
    fn default() -> Self {
        Self {
            max_depth: MAX_LINK_DEPTH,
            excluded: EXCLUDED_FRAGMENTS.iter().map(|name| name.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportState {
    RootLoaded,
    LinksRewritten,
    FragmentsMerged,
    ImagesInlined,
    Written,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FlattenSummary {
    /// Anchor of every merged section, in document order.
    pub sections: Vec<String>,
    /// Linked pages that were missing or had no body.
    pub skipped: Vec<String>,
    pub images_inlined: usize,
    pub images_missing: Vec<String>,
    pub output: Option<PathBuf>,
}

/// A linked page waiting to be merged.
#[derive(Debug, Clone)]
struct PendingPage {
    /// Path relative to the report directory, normalized.
    path: PathBuf,
    depth: usize,
    label: String,
}

pub struct Flattener {
    report_dir: PathBuf,
    root_page: PathBuf,
    options: FlattenOptions,
    state: ReportState,
    base: String,
    root: String,
    summary_html: String,
    queue: VecDeque<PendingPage>,
    visited: BTreeSet<PathBuf>,
    sections: Vec<String>,
    document: String,
    summary: FlattenSummary,
}

impl Flattener {
    /// Read the base document and the root report.
    pub fn load(report: &Path, options: FlattenOptions) -> Result<Self> {
        let root = read_page(report)?;
        let report_dir = report
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        let root_page = report
            .file_name()
            .map(PathBuf::from)
            .ok_or_else(|| anyhow!("{} is not a file path", report.display()))?;
        let mut visited = BTreeSet::new();
        visited.insert(root_page.clone());
        tracing::info!(report = %report.display(), "flattening report");
        Ok(Self {
            report_dir,
            root_page,
            options,
            state: ReportState::RootLoaded,
            base: templates::REPORT_BASE_HTML.to_string(),
            root,
            summary_html: String::new(),
            queue: VecDeque::new(),
            visited,
            sections: Vec::new(),
            document: String::new(),
            summary: FlattenSummary::default(),
        })
    }

    pub fn state(&self) -> ReportState {
        self.state
    }

    fn advance(&mut self, from: ReportState, to: ReportState) -> Result<()> {
        if self.state != from {
            return Err(anyhow!(
                "report flattener is {:?}, expected {:?} before {:?}",
                self.state,
                from,
                to
            ));
        }
        tracing::debug!(?from, ?to, "report state");
        self.state = to;
        Ok(())
    }

    /// Convert the root's page links to anchors and queue the linked pages.
    pub fn rewrite_links(&mut self) -> Result<()> {
        self.advance(ReportState::RootLoaded, ReportState::LinksRewritten)?;
        let root = std::mem::take(&mut self.root);
        let (rewritten, links) = rewrite_page_links(&root, Path::new(""), &self.root_page)?;
        for (path, label) in links {
            self.enqueue(path, 1, label);
        }

        // The summary table is the root's first table; fall back to its body.
        let summary = find_element(&rewritten, "table")
            .map(|span| span.outer(&rewritten).to_string())
            .or_else(|| find_element(&rewritten, "body").map(|span| span.inner(&rewritten).to_string()))
            .unwrap_or(rewritten);
        self.summary_html = format!("<div id=\"{SUMMARY_ANCHOR}\">\n{summary}\n</div>\n");
        self.summary.sections.push(SUMMARY_ANCHOR.to_string());
        Ok(())
    }

    /// Merge queued pages breadth-first until the queue is empty.
    pub fn merge_fragments(&mut self) -> Result<()> {
        self.advance(ReportState::LinksRewritten, ReportState::FragmentsMerged)?;
        while let Some(page) = self.queue.pop_front() {
            self.merge_page(page)?;
        }
        Ok(())
    }

    /// Assemble the document and inline any image still referenced by path.
    pub fn inline_images(&mut self) -> Result<()> {
        self.advance(ReportState::FragmentsMerged, ReportState::ImagesInlined)?;
        let mut body = std::mem::take(&mut self.summary_html);
        for section in self.sections.drain(..) {
            body.push_str(&section);
        }
        let body = self.sweep_images(&body)?;

        self.document = match find_element(&self.base, "body") {
            Some(span) => format!(
                "{}{}{}",
                &self.base[..span.content_end],
                body,
                &self.base[span.content_end..]
            ),
            None => format!("{}{}", self.base, body),
        };
        Ok(())
    }

    pub fn write(&mut self, output: &Path) -> Result<FlattenSummary> {
        self.advance(ReportState::ImagesInlined, ReportState::Written)?;
        if let Some(parent) = output.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        fs::write(output, &self.document).with_context(|| format!("write {}", output.display()))?;
        tracing::info!(
            output = %output.display(),
            sections = self.summary.sections.len(),
            images = self.summary.images_inlined,
            "wrote flattened report"
        );
        self.summary.output = Some(output.to_path_buf());
        Ok(self.summary.clone())
    }

    fn enqueue(&mut self, path: PathBuf, depth: usize, label: String) {
        if self.visited.insert(path.clone()) {
            self.queue.push_back(PendingPage { path, depth, label });
        }
    }

    fn is_excluded(&self, path: &Path) -> bool {
        let path = path.to_string_lossy();
        self.options
            .excluded
            .iter()
            .any(|name| path.contains(name.as_str()))
    }

    fn merge_page(&mut self, page: PendingPage) -> Result<()> {
        let anchor = anchor_for(&page.path);
        let source = self.report_dir.join(&page.path);
        if !source.is_file() {
            tracing::warn!(page = %anchor, "linked page not found, skipping");
            self.summary.skipped.push(anchor);
            return Ok(());
        }
        let html = read_page(&source)?;
        let Some(body) = find_element(&html, "body") else {
            tracing::debug!(page = %anchor, "page has no body, skipping");
            self.summary.skipped.push(anchor);
            return Ok(());
        };
        let (body, objects) = remove_elements(body.inner(&html), "object");
        if objects > 0 {
            tracing::debug!(page = %anchor, objects, "dropped embedded objects");
        }

        let page_dir = page.path.parent().map(Path::to_path_buf).unwrap_or_default();
        let (body, links) = rewrite_page_links(&body, &page_dir, &self.root_page)?;
        if page.depth < self.options.max_depth && !self.is_excluded(&page.path) {
            for (path, label) in links {
                self.enqueue(path, page.depth + 1, label);
            }
        }

        let image_dir = self.report_dir.join(&page_dir);
        let body = self.inline_page_images(&body, &image_dir)?;

        let mut section = format!(
            "<div id=\"{}\">\n<a href=\"#{SUMMARY_ANCHOR}\">{RETURN_TO_TOP}</a>\n",
            escape_attribute(&anchor)
        );
        if page.depth >= 2 {
            let heading = if page.label.is_empty() {
                escape_text(&anchor)
            } else {
                page.label.clone()
            };
            section.push_str(&format!("<h2>{heading}</h2>\n"));
        }
        section.push_str(&body);
        section.push_str("\n</div>\n");
        tracing::info!(page = %anchor, depth = page.depth, "merged page");
        self.sections.push(section);
        self.summary.sections.push(anchor);
        Ok(())
    }

    /// Inline images referenced relative to the page's own directory.
    fn inline_page_images(&mut self, html: &str, page_dir: &Path) -> Result<String> {
        let mut inlined = 0;
        let rewritten = rewrite_tags(html, "img", |tag| {
            let Some(src) = tag.get("src").filter(|src| !is_data_uri(src)) else {
                return;
            };
            if image_mime(src).is_none() {
                return;
            }
            let path = resolve_image(page_dir, src);
            if let Some(uri) = data_uri(&path) {
                tag.set("src", uri);
                inlined += 1;
            }
        })?;
        self.summary.images_inlined += inlined;
        Ok(rewritten)
    }

    /// Last pass: anything still pointing at a file resolves against the report directory.
    fn sweep_images(&mut self, html: &str) -> Result<String> {
        let report_dir = self.report_dir.clone();
        let mut inlined = 0;
        let mut missing = Vec::new();
        let rewritten = rewrite_tags(html, "img", |tag| {
            let Some(src) = tag.get("src").filter(|src| !is_data_uri(src)).map(str::to_string) else {
                return;
            };
            let mut path = resolve_image(&report_dir, &src);
            if !path.is_file() && src.contains(PLOT_DIR) {
                path = resolve_image(&report_dir.join(PLOT_DIR), &src);
            }
            match data_uri(&path) {
                Some(uri) => {
                    tag.set("src", uri);
                    inlined += 1;
                }
                None => missing.push(src),
            }
        })?;
        for src in &missing {
            tracing::warn!(src = %src, "image could not be inlined");
        }
        self.summary.images_inlined += inlined;
        self.summary.images_missing.extend(missing);
        Ok(rewritten)
    }
}

/// Run every stage and write the flattened document to `output`.
pub fn flatten_report(report: &Path, output: &Path, options: FlattenOptions) -> Result<FlattenSummary> {
    let mut flattener = Flattener::load(report, options)?;
    flattener.rewrite_links()?;
    flattener.merge_fragments()?;
    flattener.inline_images()?;
    tracing::debug!(state = ?flattener.state(), "report assembled");
    flattener.write(output)
}

fn read_page(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Rewrite links to other pages as `#anchor` and return the linked pages
/// (report-relative, first occurrence wins) with their link text.
///
/// Links back to the root page point at the summary section.
fn rewrite_page_links(
    html: &str,
    page_dir: &Path,
    root_page: &Path,
) -> Result<(String, Vec<(PathBuf, String)>)> {
    let mut links: Vec<(PathBuf, String)> = Vec::new();
    let mut text_error = None;
    let rewritten = rewrite_anchors(html, |tag, text| {
        let Some(target) = tag.get("href").and_then(|href| page_target(href, page_dir)) else {
            return;
        };
        tag.remove("target");
        if target == root_page {
            tag.set("href", format!("#{SUMMARY_ANCHOR}"));
            return;
        }
        tag.set("href", format!("#{}", anchor_for(&target)));
        if !links.iter().any(|(path, _)| *path == target) {
            let label = plain_text(text).unwrap_or_else(|err| {
                text_error.get_or_insert(err);
                String::new()
            });
            links.push((target, label));
        }
    })?;
    if let Some(err) = text_error {
        return Err(err);
    }
    Ok((rewritten, links))
}

/// Report-relative path of a link to another page, if `href` is one.
fn page_target(href: &str, page_dir: &Path) -> Option<PathBuf> {
    let href = href.trim();
    if href.starts_with('#') || href.contains("://") || href.starts_with("mailto:") {
        return None;
    }
    let path = href
        .split(['#', '?'])
        .next()
        .unwrap_or_default()
        .trim_start_matches(LOCAL_FILE_MARKER);
    if !path.to_ascii_lowercase().ends_with(".html") {
        return None;
    }
    let path = Path::new(path);
    if path.is_absolute() {
        return Some(normalize_path(path));
    }
    Some(normalize_path(&page_dir.join(path)))
}

fn anchor_for(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn is_data_uri(src: &str) -> bool {
    src.trim_start().to_ascii_lowercase().starts_with("data:")
}

fn image_mime(src: &str) -> Option<&'static str> {
    let lower = src.to_ascii_lowercase();
    let lower = lower.split(['?', '#']).next().unwrap_or_default();
    if lower.ends_with(".png") {
        Some("image/png")
    } else if lower.ends_with(".svg") {
        Some("image/svg+xml")
    } else if lower.ends_with(".jpeg") || lower.ends_with(".jpg") {
        Some("image/jpeg")
    } else if lower.ends_with(".gif") {
        Some("image/gif")
    } else {
        None
    }
}

fn resolve_image(base: &Path, src: &str) -> PathBuf {
    let src = src.trim().trim_start_matches(LOCAL_FILE_MARKER);
    let path = Path::new(src);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn data_uri(path: &Path) -> Option<String> {
    let mime = image_mime(&path.to_string_lossy()).unwrap_or("image/png");
    match fs::read(path) {
        Ok(bytes) => Some(format!("data:{mime};base64,{}", STANDARD.encode(bytes))),
        Err(err) => {
            tracing::debug!(path = %path.display(), "image not readable: {err}");
            None
        }
    }
}

#[cfg(test)]
#[path = "report_tests.rs"]
mod tests;
