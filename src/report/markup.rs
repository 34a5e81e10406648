//! Tag scanning for FEAT report pages.
//!
//! FEAT writes a small, regular subset of HTML, so elements are found by
//! balanced tag counting and start tags are rewritten through [`Tag`].
//! Nothing here attempts general HTML parsing.
use anyhow::{Context, Result};
use regex::{Captures, Regex};

/// Byte offsets of one element inside a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementSpan {
    pub start: usize,
    pub content_start: usize,
    pub content_end: usize,
    pub end: usize,
}

impl ElementSpan {
    pub fn inner<'a>(&self, html: &'a str) -> &'a str {
        &html[self.content_start..self.content_end]
    }

    pub fn outer<'a>(&self, html: &'a str) -> &'a str {
        &html[self.start..self.end]
    }
}

/// First `<tag>` element in `html`, matched case-insensitively.
///
/// A missing close tag extends the element to the end of the document.
pub fn find_element(html: &str, tag: &str) -> Option<ElementSpan> {
    find_element_from(html, tag, 0)
}

fn find_element_from(html: &str, tag: &str, from: usize) -> Option<ElementSpan> {
    // ASCII lowering keeps byte offsets aligned with `html`.
    let lower = html.to_ascii_lowercase();
    let tag = tag.to_ascii_lowercase();
    let open = format!("<{tag}");
    let close = format!("</{tag}");

    let start = find_tag(&lower, &open, from)?;
    let content_start = lower[start..].find('>').map(|gt| start + gt + 1)?;
    if lower[..content_start].ends_with("/>") {
        return Some(ElementSpan {
            start,
            content_start,
            content_end: content_start,
            end: content_start,
        });
    }

    let mut depth = 1usize;
    let mut cursor = content_start;
    loop {
        let next_open = find_tag(&lower, &open, cursor);
        let Some(next_close) = find_tag(&lower, &close, cursor) else {
            return Some(ElementSpan {
                start,
                content_start,
                content_end: html.len(),
                end: html.len(),
            });
        };
        match next_open {
            Some(position) if position < next_close => {
                depth += 1;
                cursor = position + open.len();
            }
            _ => {
                depth -= 1;
                let end = lower[next_close..]
                    .find('>')
                    .map_or(html.len(), |gt| next_close + gt + 1);
                if depth == 0 {
                    return Some(ElementSpan {
                        start,
                        content_start,
                        content_end: next_close,
                        end,
                    });
                }
                cursor = end;
            }
        }
    }
}

/// Position of `needle` (`<name` or `</name`) followed by a tag boundary.
fn find_tag(lower: &str, needle: &str, from: usize) -> Option<usize> {
    let mut cursor = from;
    while let Some(offset) = lower.get(cursor..)?.find(needle) {
        let position = cursor + offset;
        let boundary = lower[position + needle.len()..].chars().next();
        if matches!(boundary, Some(ch) if ch.is_ascii_whitespace() || ch == '>' || ch == '/') {
            return Some(position);
        }
        cursor = position + needle.len();
    }
    None
}

/// Remove every `<tag>` element (with its content). Returns the count removed.
pub fn remove_elements(html: &str, tag: &str) -> (String, usize) {
    let mut kept = String::with_capacity(html.len());
    let mut cursor = 0;
    let mut removed = 0;
    while let Some(span) = find_element_from(html, tag, cursor) {
        kept.push_str(&html[cursor..span.start]);
        cursor = span.end;
        removed += 1;
    }
    kept.push_str(&html[cursor..]);
    (kept, removed)
}

/// A parsed start tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub name: String,
    attributes: Vec<(String, Option<String>)>,
    self_closing: bool,
}

impl Tag {
    pub fn parse(source: &str) -> Result<Option<Tag>> {
        let shape = Regex::new(r"(?s)^<([A-Za-z][A-Za-z0-9]*)(.*?)(/?)>$")
            .context("compile start tag pattern")?;
        let attribute = Regex::new(
            r#"([^\s=/>]+)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+)))?"#,
        )
        .context("compile attribute pattern")?;
        let Some(captures) = shape.captures(source) else {
            return Ok(None);
        };
        let attributes = attribute
            .captures_iter(&captures[2])
            .map(|attr| {
                let value = attr
                    .get(2)
                    .or_else(|| attr.get(3))
                    .or_else(|| attr.get(4))
                    .map(|value| value.as_str().to_string());
                (attr[1].to_string(), value)
            })
            .collect();
        Ok(Some(Tag {
            name: captures[1].to_string(),
            attributes,
            self_closing: !captures[3].is_empty(),
        }))
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .and_then(|(_, value)| value.as_deref())
    }

    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = Some(value.into());
        match self
            .attributes
            .iter_mut()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
        {
            Some(entry) => entry.1 = value,
            None => self.attributes.push((name.to_string(), value)),
        }
    }

    pub fn remove(&mut self, name: &str) {
        self.attributes.retain(|(key, _)| !key.eq_ignore_ascii_case(name));
    }

    pub fn render(&self) -> String {
        let mut out = format!("<{}", self.name);
        for (key, value) in &self.attributes {
            out.push(' ');
            out.push_str(key);
            if let Some(value) = value {
                out.push_str("=\"");
                out.push_str(&value.replace('"', "&quot;"));
                out.push('"');
            }
        }
        if self.self_closing {
            out.push_str(" /");
        }
        out.push('>');
        out
    }
}

/// Rewrite every `<a ...>` start tag; the callback sees the tag and its link text.
///
/// Link text runs from the end of the start tag to the nearest `</a` or `<a`,
/// so an unclosed anchor never swallows the next link.
pub fn rewrite_anchors<F>(html: &str, mut rewrite: F) -> Result<String>
where
    F: FnMut(&mut Tag, &str),
{
    let start_tag = Regex::new(r"(?is)<a\b[^>]*>").context("compile anchor pattern")?;
    let boundary = Regex::new(r"(?i)</?a\b").context("compile anchor boundary pattern")?;
    let mut out = String::with_capacity(html.len());
    let mut cursor = 0;
    for found in start_tag.find_iter(html) {
        out.push_str(&html[cursor..found.start()]);
        cursor = found.end();
        let rest = &html[found.end()..];
        let text = boundary.find(rest).map_or(rest, |next| &rest[..next.start()]);
        match Tag::parse(found.as_str())? {
            Some(mut tag) => {
                rewrite(&mut tag, text);
                out.push_str(&tag.render());
            }
            None => out.push_str(found.as_str()),
        }
    }
    out.push_str(&html[cursor..]);
    Ok(out)
}

/// Rewrite every start tag named `name` (e.g. `img`).
pub fn rewrite_tags<F>(html: &str, name: &str, mut rewrite: F) -> Result<String>
where
    F: FnMut(&mut Tag),
{
    let pattern = Regex::new(&format!(r"(?is)<{}\b[^>]*>", regex::escape(name)))
        .with_context(|| format!("compile <{name}> pattern"))?;
    let mut failed = None;
    let rewritten = pattern.replace_all(html, |captures: &Captures<'_>| {
        match Tag::parse(&captures[0]) {
            Ok(Some(mut tag)) => {
                rewrite(&mut tag);
                tag.render()
            }
            Ok(None) => captures[0].to_string(),
            Err(err) => {
                failed.get_or_insert(err);
                captures[0].to_string()
            }
        }
    });
    match failed {
        Some(err) => Err(err),
        None => Ok(rewritten.into_owned()),
    }
}

/// Visible text of an inline fragment: tags dropped, whitespace collapsed.
pub fn plain_text(fragment: &str) -> Result<String> {
    let tags = Regex::new(r"(?s)<[^>]*>").context("compile tag pattern")?;
    let text = tags.replace_all(fragment, "");
    Ok(text.split_whitespace().collect::<Vec<_>>().join(" "))
}

pub fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Escape text for use inside a double-quoted attribute value.
pub fn escape_attribute(text: &str) -> String {
    escape_text(text).replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_elements_are_balanced() {
        let html = "<p>a<div id=x>b<div>c</div>d</div>e<div>f</div></p>";
        let span = find_element(html, "div").expect("div");
        assert_eq!(span.outer(html), "<div id=x>b<div>c</div>d</div>");
        assert_eq!(span.inner(html), "b<div>c</div>d");
    }

    #[test]
    fn element_search_ignores_case_and_prefix_names() {
        let html = "<HTML><Bodyx>no</Bodyx><BODY bgcolor=white>yes</BODY></HTML>";
        let span = find_element(html, "body").expect("body");
        assert_eq!(span.inner(html), "yes");
    }

    #[test]
    fn unclosed_element_runs_to_end() {
        let html = "<body><p>tail";
        let span = find_element(html, "body").expect("body");
        assert_eq!(span.inner(html), "<p>tail");
    }

    #[test]
    fn objects_are_removed_with_content() {
        let html = "a<object data=x.html><param></object>b<OBJECT/>c";
        let (kept, removed) = remove_elements(html, "object");
        assert_eq!(kept, "abc");
        assert_eq!(removed, 2);
    }

    #[test]
    fn tags_round_trip_through_render() {
        let mut tag = Tag::parse(r#"<a href='stats.html' TARGET=_blank nowrap>"#)
            .expect("parse")
            .expect("tag");
        assert_eq!(tag.get("target"), Some("_blank"));
        tag.remove("target");
        tag.set("href", "#stats.html");
        assert_eq!(tag.render(), r##"<a href="#stats.html" nowrap>"##);
    }

    #[test]
    fn anchors_expose_link_text() {
        let mut seen = Vec::new();
        let out = rewrite_anchors(r#"x <a href="a.html"><b>Pre</b>stats</a> y"#, |tag, text| {
            seen.push(plain_text(text).expect("text"));
            tag.set("href", "#a.html");
        })
        .expect("rewrite");
        assert_eq!(seen, vec!["Prestats"]);
        assert_eq!(out, r##"x <a href="#a.html"><b>Pre</b>stats</a> y"##);
    }

    #[test]
    fn unclosed_anchor_does_not_swallow_the_next_link() {
        let mut seen = Vec::new();
        let out = rewrite_anchors(
            r#"<a name="top">Top<br><a href="stats.html">Stats</a>"#,
            |tag, text| {
                seen.push(text.to_string());
                if tag.get("href").is_some() {
                    tag.set("href", "#stats.html");
                }
            },
        )
        .expect("rewrite");
        assert_eq!(seen, vec!["Top<br>", "Stats"]);
        assert_eq!(out, r##"<a name="top">Top<br><a href="#stats.html">Stats</a>"##);
    }

    #[test]
    fn attribute_escaping_covers_quotes_and_ampersands() {
        assert_eq!(escape_attribute(r#"a&b "c".html"#), "a&amp;b &quot;c&quot;.html");
    }

    #[test]
    fn self_closing_img_keeps_its_shape() {
        let out = rewrite_tags(r#"<IMG SRC="a.png"/>"#, "img", |tag| tag.set("src", "data:x"))
            .expect("rewrite");
        assert_eq!(out, r#"<IMG SRC="data:x" />"#);
    }
}
