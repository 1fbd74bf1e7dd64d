//! Package-relative resource paths.
//!
//! Resources are addressed by a flat, posix-style path relative to the
//! directory that holds the package document. [`Href`] is the validated
//! form of such a path; the free functions in this module implement the
//! posix path arithmetic (`dirname`, `normpath`, `relpath`) and the
//! percent-escaping used when paths are written into package documents or
//! rewritten inside hyperlinks.

use std::fmt;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};

use crate::{Error, Result};

/// Characters escaped when a path is written as an `href`.
///
/// Everything outside the unreserved set (`A-Z a-z 0-9 - . _ ~`) except the
/// sub-delimiters `:`, `/`, `&` and `=` is escaped. Quotes and parentheses
/// are escaped so a rewritten reference cannot close the attribute or the
/// unquoted `url(...)` it sits in; `#` and `?` are escaped because resource
/// paths are stored unescaped and would otherwise split the reference.
const HREF_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b':')
    .remove(b'/')
    .remove(b'&')
    .remove(b'=');

/// A validated resource path.
///
/// `Href` trims leading and trailing slashes and rejects paths that are
/// empty afterwards or that contain NUL bytes. Unlike archive entry names,
/// `..` segments are allowed: package documents in the wild reference
/// resources outside their own directory.
///
/// # Examples
///
/// ```
/// use epubfs::Href;
///
/// let href = Href::new("/Text/chapter1.xhtml").unwrap();
/// assert_eq!(href.as_str(), "Text/chapter1.xhtml");
/// assert_eq!(href.parent(), "Text");
/// assert_eq!(href.extension(), Some("xhtml"));
///
/// assert!(Href::new("//").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Href(String);

impl Href {
    /// Creates a new `Href`, trimming slashes and validating the result.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPath`] if the trimmed path is empty or
    /// contains a NUL byte.
    pub fn new(s: &str) -> Result<Self> {
        let trimmed = s.trim_matches('/');
        if trimmed.is_empty() {
            return Err(Error::InvalidPath(format!("empty path: {:?}", s)));
        }
        if trimmed.contains('\0') {
            return Err(Error::InvalidPath("contains NUL byte".into()));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Creates an `Href` from the escaped form used in package documents.
    pub fn from_escaped(s: &str) -> Result<Self> {
        Self::new(&unescape(s))
    }

    /// Returns the path as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the `Href` and returns the inner string.
    pub fn into_string(self) -> String {
        self.0
    }

    /// Returns the escaped form suitable for an `href` attribute.
    pub fn escaped(&self) -> String {
        escape(&self.0)
    }

    /// Returns the directory part (empty for top-level resources).
    pub fn parent(&self) -> &str {
        dirname(&self.0)
    }

    /// Returns the last segment.
    pub fn file_name(&self) -> &str {
        basename(&self.0)
    }

    /// Returns the file extension, if any.
    ///
    /// A leading dot (e.g. `.hidden`) does not start an extension.
    pub fn extension(&self) -> Option<&str> {
        let name = self.file_name();
        let dot = name.rfind('.')?;
        if dot == 0 { None } else { Some(&name[dot + 1..]) }
    }

    /// Resolves `reference` against this path's directory.
    pub fn join(&self, reference: &str) -> Result<Self> {
        Self::new(&normpath(&join(self.parent(), reference)))
    }

    /// Expresses `target` relative to this path's directory.
    pub fn relative(&self, target: &str) -> String {
        relpath(target, self.parent())
    }
}

impl fmt::Display for Href {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Href {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for Href {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

/// Returns the directory part of a posix path.
pub fn dirname(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}

/// Returns the last segment of a posix path.
pub fn basename(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Joins a directory and a relative reference.
pub fn join(base: &str, reference: &str) -> String {
    if base.is_empty() || reference.starts_with('/') {
        reference.to_string()
    } else if reference.is_empty() {
        format!("{}/", base)
    } else {
        format!("{}/{}", base.trim_end_matches('/'), reference)
    }
}

/// Normalizes a posix path lexically.
///
/// Collapses `.` segments, repeated slashes and `dir/..` pairs. Leading
/// `..` segments of a relative path are kept, so the result may still
/// point above the package directory.
pub fn normpath(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => match parts.last() {
                Some(&last) if last != ".." => {
                    parts.pop();
                }
                _ if absolute => {}
                _ => parts.push(".."),
            },
            other => parts.push(other),
        }
    }
    let joined = parts.join("/");
    if absolute {
        format!("/{}", joined)
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}

/// Expresses `target` relative to the directory `base`.
///
/// Both arguments are package-relative; an empty `base` is the package
/// directory itself.
pub fn relpath(target: &str, base: &str) -> String {
    let target = normpath(target);
    let base = normpath(base);
    let target_parts: Vec<&str> = target.split('/').filter(|s| *s != ".").collect();
    let base_parts: Vec<&str> = base.split('/').filter(|s| *s != ".").collect();

    let common = target_parts
        .iter()
        .zip(base_parts.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut out: Vec<&str> = Vec::new();
    for _ in common..base_parts.len() {
        out.push("..");
    }
    out.extend(&target_parts[common..]);
    if out.is_empty() {
        ".".to_string()
    } else {
        out.join("/")
    }
}

/// Percent-escapes a path for use in an `href`.
pub fn escape(path: &str) -> String {
    utf8_percent_encode(path, HREF_ESCAPE).to_string()
}

/// Decodes percent-escapes; invalid UTF-8 sequences are replaced.
pub fn unescape(href: &str) -> String {
    percent_decode_str(href).decode_utf8_lossy().into_owned()
}

/// A reference split into its URL components.
///
/// Only the parts needed to decide whether a reference is internal are
/// recognized: a scheme (`name:`), a network authority (`//host`), the
/// path, and the raw query-and-fragment suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference<'a> {
    /// URL scheme without the trailing colon, if any.
    pub scheme: Option<&'a str>,
    /// Network authority after `//`, if any.
    pub authority: Option<&'a str>,
    /// The path component.
    pub path: &'a str,
    /// Everything from the first `?` or `#` on, verbatim.
    pub suffix: &'a str,
}

impl<'a> Reference<'a> {
    /// Splits a reference string.
    pub fn parse(reference: &'a str) -> Self {
        let (before, suffix) = match reference.find(['?', '#']) {
            Some(idx) => reference.split_at(idx),
            None => (reference, ""),
        };

        let mut rest = before;
        let mut scheme = None;
        if let Some(colon) = rest.find(':') {
            let candidate = &rest[..colon];
            let mut chars = candidate.chars();
            let valid = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
                && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
            if valid {
                scheme = Some(candidate);
                rest = &rest[colon + 1..];
            }
        }

        let mut authority = None;
        if let Some(after) = rest.strip_prefix("//") {
            let end = after.find('/').unwrap_or(after.len());
            authority = Some(&after[..end]);
            rest = &after[end..];
        }

        Self {
            scheme,
            authority,
            path: rest,
            suffix,
        }
    }

    /// Returns `true` if the reference leaves the package.
    pub fn is_external(&self) -> bool {
        self.scheme.is_some() || self.authority.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_href_trims_slashes() {
        assert_eq!(Href::new("/a/b/").unwrap().as_str(), "a/b");
        assert!(Href::new("").is_err());
        assert!(Href::new("///").is_err());
        assert!(Href::new("a\0b").is_err());
    }

    #[test]
    fn test_href_components() {
        let href = Href::new("Text/sub/ch.1.xhtml").unwrap();
        assert_eq!(href.parent(), "Text/sub");
        assert_eq!(href.file_name(), "ch.1.xhtml");
        assert_eq!(href.extension(), Some("xhtml"));
        assert_eq!(Href::new(".hidden").unwrap().extension(), None);
        assert_eq!(Href::new("noext").unwrap().extension(), None);
    }

    #[test]
    fn test_href_join_and_relative() {
        let href = Href::new("Text/a.xhtml").unwrap();
        assert_eq!(href.join("../Images/x.png").unwrap().as_str(), "Images/x.png");
        assert_eq!(href.relative("Text/sub/b.xhtml"), "sub/b.xhtml");
        assert_eq!(href.relative("Styles/s.css"), "../Styles/s.css");
    }

    #[test]
    fn test_normpath() {
        assert_eq!(normpath("a/./b//c"), "a/b/c");
        assert_eq!(normpath("a/b/../c"), "a/c");
        assert_eq!(normpath("../a"), "../a");
        assert_eq!(normpath("a/../../b"), "../b");
        assert_eq!(normpath("/a/../../b"), "/b");
        assert_eq!(normpath(""), ".");
    }

    #[test]
    fn test_relpath() {
        assert_eq!(relpath("Text/b.xhtml", "Text"), "b.xhtml");
        assert_eq!(relpath("Text/sub/b.xhtml", "Text"), "sub/b.xhtml");
        assert_eq!(relpath("b.xhtml", ""), "b.xhtml");
        assert_eq!(relpath("a/b", "c/d"), "../../a/b");
        assert_eq!(relpath("Text", "Text"), ".");
    }

    #[test]
    fn test_escape_round_trip() {
        let path = "Text/my chapter#1.xhtml";
        let escaped = escape(path);
        assert_eq!(escaped, "Text/my%20chapter%231.xhtml");
        assert_eq!(unescape(&escaped), path);

        assert_eq!(escape("it's (1).xhtml"), "it%27s%20%281%29.xhtml");
        assert_eq!(escape("a:b/c&d=e~f-g_h.png"), "a:b/c&d=e~f-g_h.png");
        assert_eq!(escape("caf\u{e9}+!.css"), "caf%C3%A9%2B%21.css");
    }

    #[test]
    fn test_reference_parse() {
        let r = Reference::parse("http://x/y");
        assert_eq!(r.scheme, Some("http"));
        assert_eq!(r.authority, Some("x"));
        assert!(r.is_external());

        let r = Reference::parse("../a.xhtml#frag");
        assert_eq!(r.scheme, None);
        assert_eq!(r.path, "../a.xhtml");
        assert_eq!(r.suffix, "#frag");
        assert!(!r.is_external());

        let r = Reference::parse("//cdn/x.css");
        assert!(r.is_external());

        let r = Reference::parse("data:image/png;base64,AAAA");
        assert!(r.is_external());

        let r = Reference::parse("#top");
        assert_eq!(r.path, "");
        assert_eq!(r.suffix, "#top");
    }
}
