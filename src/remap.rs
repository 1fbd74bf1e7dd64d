//! Rewriting relative links after resources move.
//!
//! After one or more renames, [`remap_links`] walks every text resource of
//! a manifest whose media type carries links and rewrites the relative
//! references that pointed at a moved path:
//!
//! | Media type | References scanned |
//! |------------|--------------------|
//! | `text/css` | `url(...)` |
//! | `text/html`, `application/xhtml+xml` | `href`/`src` attributes, plus `url(...)` inside `style` attributes and `<style>` elements |
//! | NCX, SVG, SMIL | `href`/`src` attributes |
//!
//! References with a scheme or a network authority are left alone. Each
//! reference is resolved against the directory the referencing resource
//! lived in before the renames; if the target moved, or the referencing
//! resource itself moved, the reference is re-expressed relative to the
//! resource's current directory, with query and fragment kept as written.
//!
//! All replacements for one resource are collected as `(span, text)` pairs,
//! sorted, and spliced in a single left-to-right pass. A resource is only
//! written back if its text changed.
//!
//! The pass is best-effort: a resource that cannot be read, decoded or
//! written is skipped and reported, and the others are still processed.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;

use crate::href::{self, Reference};
use crate::manifest::Manifest;
use crate::media_type::LinkSyntax;
use crate::warning::{Warning, WarningKind};

const QUOTED: &str = r#""((?:[^"\\]|\\.)*)"|'((?:[^'\\]|\\.)*)'"#;

// Quoted attribute values may contain `>`.
static TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<[A-Za-z](?:[^<>"']|"[^"]*"|'[^']*')*>"#).expect("tag pattern is valid")
});

static LINK_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)[\s:](?:href|src)\s*=\s*(?:{})", QUOTED))
        .expect("link attribute pattern is valid")
});

static STYLE_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)\sstyle\s*=\s*(?:{})", QUOTED))
        .expect("style attribute pattern is valid")
});

static STYLE_ELEMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<style(?:\s[^>]*)?>(.*?)</style\s*>").expect("style element pattern is valid")
});

static CSS_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r#"(?i)\burl\(\s*(?:{}|([^\s"')][^)]*?))\s*\)"#, QUOTED))
        .expect("url pattern is valid")
});

/// A mapping from old to new resource paths.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathMap {
    map: BTreeMap<String, String>,
}

impl PathMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a map with one entry.
    pub fn single(old: impl Into<String>, new: impl Into<String>) -> Self {
        let mut map = Self::new();
        map.insert(old, new);
        map
    }

    /// Adds an entry.
    pub fn insert(&mut self, old: impl Into<String>, new: impl Into<String>) {
        self.map.insert(old.into(), new.into());
    }

    /// Returns the new path for `old`.
    pub fn get(&self, old: &str) -> Option<&str> {
        self.map.get(old).map(String::as_str)
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns `true` if the map is empty.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Iterates over `(old, new)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.map.iter().map(|(o, n)| (o.as_str(), n.as_str()))
    }
}

impl FromIterator<(String, String)> for PathMap {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self {
            map: iter.into_iter().collect(),
        }
    }
}

/// Outcome of a remap pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[must_use]
pub struct RemapResult {
    /// Paths of the resources that were rewritten.
    pub changed: BTreeSet<String>,
    /// Resources that had to be skipped.
    pub skipped: Vec<Warning>,
}

/// Rewrites links affected by `map` across `manifest`.
///
/// `map` describes renames that have already been applied to the manifest.
pub fn remap_links(manifest: &mut Manifest, map: &PathMap) -> RemapResult {
    let mut result = RemapResult::default();
    if map.is_empty() {
        return result;
    }
    let previous: HashMap<&str, &str> = map.iter().map(|(old, new)| (new, old)).collect();
    let targets: Vec<(String, LinkSyntax)> = manifest
        .iter()
        .filter_map(|r| {
            LinkSyntax::for_media_type(r.media_type()).map(|s| (r.path().to_string(), s))
        })
        .collect();

    for (path, syntax) in targets {
        let old_path = previous.get(path.as_str()).copied().unwrap_or(path.as_str());
        let base = Base {
            old_dir: href::dirname(old_path),
            new_dir: href::dirname(&path),
        };
        let text = match manifest.read_text(&path) {
            Ok(text) => text,
            Err(e) => {
                result.skipped.push(Warning::new(
                    WarningKind::RemapSkipped,
                    &path,
                    format!("could not read: {}", e),
                ));
                continue;
            }
        };
        let edits = collect_edits(&text, syntax, &base, map);
        if edits.is_empty() {
            continue;
        }
        let rewritten = splice(&text, edits);
        if rewritten == text {
            continue;
        }
        match manifest.write_text(&path, &rewritten) {
            Ok(()) => {
                log::debug!("rewrote links in {}", path);
                result.changed.insert(path);
            }
            Err(e) => result.skipped.push(Warning::new(
                WarningKind::RemapSkipped,
                &path,
                format!("could not write: {}", e),
            )),
        }
    }
    result
}

/// Directories a resource's references are resolved against.
struct Base<'a> {
    old_dir: &'a str,
    new_dir: &'a str,
}

/// Rewrites the links in one resource's text.
///
/// `old_path` is where the resource lived when its links were written and
/// `new_path` where it lives now; they are equal for resources that did not
/// move.
///
/// ```
/// use epubfs::media_type::LinkSyntax;
/// use epubfs::remap::{PathMap, remap_text};
///
/// let map = PathMap::single("Text/b.xhtml", "Text/sub/b.xhtml");
/// let html = r#"<a href="b.xhtml">next</a>"#;
/// assert_eq!(
///     remap_text(html, LinkSyntax::Html, "Text/a.xhtml", "Text/a.xhtml", &map),
///     r#"<a href="sub/b.xhtml">next</a>"#
/// );
/// ```
pub fn remap_text(
    text: &str,
    syntax: LinkSyntax,
    old_path: &str,
    new_path: &str,
    map: &PathMap,
) -> String {
    let base = Base {
        old_dir: href::dirname(old_path),
        new_dir: href::dirname(new_path),
    };
    splice(text, collect_edits(text, syntax, &base, map))
}

/// Finds every reference span in `text` and its replacement.
fn collect_edits(
    text: &str,
    syntax: LinkSyntax,
    base: &Base<'_>,
    map: &PathMap,
) -> Vec<(Range<usize>, String)> {
    let mut spans: Vec<Range<usize>> = Vec::new();
    match syntax {
        LinkSyntax::Css => css_urls(text, 0..text.len(), &mut spans),
        LinkSyntax::Xml => link_attrs(text, &mut spans),
        LinkSyntax::Html => {
            link_attrs(text, &mut spans);
            for tag in TAG.find_iter(text) {
                for caps in STYLE_ATTR.captures_iter(tag.as_str()) {
                    if let Some(value) = quoted_value(&caps) {
                        let start = tag.start() + value.start();
                        css_urls(text, start..tag.start() + value.end(), &mut spans);
                    }
                }
            }
            for caps in STYLE_ELEMENT.captures_iter(text) {
                if let Some(body) = caps.get(1) {
                    css_urls(text, body.range(), &mut spans);
                }
            }
        }
    }

    spans
        .into_iter()
        .filter_map(|span| {
            let replacement = rewrite(&text[span.clone()], base, map)?;
            Some((span, replacement))
        })
        .collect()
}

fn link_attrs(text: &str, spans: &mut Vec<Range<usize>>) {
    for tag in TAG.find_iter(text) {
        for caps in LINK_ATTR.captures_iter(tag.as_str()) {
            if let Some(value) = quoted_value(&caps) {
                spans.push(tag.start() + value.start()..tag.start() + value.end());
            }
        }
    }
}

fn css_urls(text: &str, within: Range<usize>, spans: &mut Vec<Range<usize>>) {
    let offset = within.start;
    for caps in CSS_URL.captures_iter(&text[within]) {
        let value = quoted_value(&caps).or_else(|| caps.get(3));
        if let Some(value) = value {
            spans.push(offset + value.start()..offset + value.end());
        }
    }
}

fn quoted_value<'t>(caps: &regex::Captures<'t>) -> Option<regex::Match<'t>> {
    caps.get(1).or_else(|| caps.get(2))
}

/// Computes the replacement for one reference, or `None` to keep it.
fn rewrite(raw: &str, base: &Base<'_>, map: &PathMap) -> Option<String> {
    let reference = Reference::parse(raw.trim());
    if reference.is_external() || reference.path.is_empty() || reference.path.starts_with('/') {
        return None;
    }
    let target = href::normpath(&href::join(base.old_dir, &href::unescape(reference.path)));
    let moved_target = map.get(&target);
    if moved_target.is_none() && base.old_dir == base.new_dir {
        return None;
    }
    let new_target = moved_target.unwrap_or(&target);
    let relative = href::relpath(new_target, base.new_dir);
    let replacement = format!("{}{}", href::escape(&relative), reference.suffix);
    if replacement == raw {
        None
    } else {
        Some(replacement)
    }
}

/// Applies sorted, non-overlapping edits in one pass.
fn splice(text: &str, mut edits: Vec<(Range<usize>, String)>) -> String {
    edits.sort_by_key(|(span, _)| (span.start, span.end));
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for (span, replacement) in edits {
        if span.start < cursor {
            continue;
        }
        out.push_str(&text[cursor..span.start]);
        out.push_str(&replacement);
        cursor = span.end;
    }
    out.push_str(&text[cursor..]);
    out
}
