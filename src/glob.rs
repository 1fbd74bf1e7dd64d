//! Glob patterns over resource paths.
//!
//! Patterns are translated to anchored regular expressions:
//!
//! | Glob | Matches |
//! |------|---------|
//! | `*` | any run of characters within one path segment |
//! | `?` | one character other than `/` |
//! | `[abc]`, `[a-z]`, `[!abc]` | one character from (or not from) the set |
//! | `**` (a whole segment) | any number of segments, including none |
//!
//! A pattern may be scoped to a directory, in which case it only matches
//! paths below that directory.

use regex::Regex;

use crate::{Error, Result};

/// A compiled glob pattern.
///
/// # Example
///
/// ```
/// use epubfs::Glob;
///
/// let glob = Glob::new("*.xhtml").unwrap();
/// assert!(glob.matches("ch1.xhtml"));
/// assert!(!glob.matches("Text/ch1.xhtml"));
///
/// let glob = Glob::builder("*.XHTML").dir("Text").ignore_case(true).build().unwrap();
/// assert!(glob.matches("Text/ch1.xhtml"));
/// assert!(!glob.matches("Text/sub/ch1.xhtml"));
///
/// let glob = Glob::new("**/*.css").unwrap();
/// assert!(glob.matches("style.css"));
/// assert!(glob.matches("a/b/style.css"));
/// ```
#[derive(Debug, Clone)]
pub struct Glob {
    pattern: String,
    regex: Regex,
}

/// Builder for a [`Glob`] with a directory scope or case folding.
#[derive(Debug, Clone)]
pub struct GlobBuilder {
    pattern: String,
    dir: String,
    ignore_case: bool,
}

impl GlobBuilder {
    /// Restricts matches to paths below `dir`.
    pub fn dir(mut self, dir: &str) -> Self {
        self.dir = dir.trim_matches('/').to_string();
        self
    }

    /// Enables case-insensitive matching.
    pub fn ignore_case(mut self, yes: bool) -> Self {
        self.ignore_case = yes;
        self
    }

    /// Compiles the pattern.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the translated expression does
    /// not compile.
    pub fn build(self) -> Result<Glob> {
        let mut re = String::from(if self.ignore_case { "(?i)^" } else { "^" });
        if !self.dir.is_empty() {
            re.push_str(&regex::escape(&self.dir));
            re.push('/');
        }
        re.push_str(&translate(&self.pattern));
        re.push('$');

        let regex = Regex::new(&re)
            .map_err(|e| Error::InvalidArgument(format!("bad glob {:?}: {}", self.pattern, e)))?;
        Ok(Glob {
            pattern: self.pattern,
            regex,
        })
    }
}

impl Glob {
    /// Compiles a pattern matched against whole paths.
    pub fn new(pattern: &str) -> Result<Self> {
        Self::builder(pattern).build()
    }

    /// Starts building a pattern.
    pub fn builder(pattern: &str) -> GlobBuilder {
        GlobBuilder {
            pattern: pattern.trim_start_matches('/').to_string(),
            dir: String::new(),
            ignore_case: false,
        }
    }

    /// Returns the pattern as given.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Returns `true` if `path` matches.
    pub fn matches(&self, path: &str) -> bool {
        self.regex.is_match(path.trim_start_matches('/'))
    }
}

/// Returns `true` if `path` matches `pattern`. Invalid patterns match
/// nothing.
pub fn glob_match(pattern: &str, path: &str) -> bool {
    Glob::new(pattern).is_ok_and(|g| g.matches(path))
}

/// Translates a glob into the body of an anchored expression.
fn translate(pattern: &str) -> String {
    let segments: Vec<&str> = pattern.split('/').collect();
    let mut out = String::new();
    for (i, segment) in segments.iter().enumerate() {
        let last = i + 1 == segments.len();
        if *segment == "**" {
            out.push_str(if last { ".*" } else { "(?:.*/)?" });
            continue;
        }
        translate_segment(segment, &mut out);
        if !last {
            out.push('/');
        }
    }
    out
}

fn translate_segment(segment: &str, out: &mut String) {
    let chars: Vec<char> = segment.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' => {
                while i + 1 < chars.len() && chars[i + 1] == '*' {
                    i += 1;
                }
                out.push_str("[^/]*");
            }
            '?' => out.push_str("[^/]"),
            '[' => match class_end(&chars, i) {
                Some(end) => {
                    out.push('[');
                    let mut j = i + 1;
                    if chars[j] == '!' {
                        out.push('^');
                        j += 1;
                    }
                    for &c in &chars[j..end] {
                        match c {
                            '\\' | '[' | ']' | '&' | '~' | '^' => {
                                out.push('\\');
                                out.push(c);
                            }
                            _ => out.push(c),
                        }
                    }
                    out.push(']');
                    i = end;
                }
                None => out.push_str("\\["),
            },
            c => {
                let mut buf = [0u8; 4];
                out.push_str(&regex::escape(c.encode_utf8(&mut buf)));
            }
        }
        i += 1;
    }
}

/// Finds the `]` closing a class opened at `start`.
///
/// A `]` right after `[` or `[!` is a literal member.
fn class_end(chars: &[char], start: usize) -> Option<usize> {
    let mut j = start + 1;
    if j < chars.len() && chars[j] == '!' {
        j += 1;
    }
    if j < chars.len() && chars[j] == ']' {
        j += 1;
    }
    while j < chars.len() {
        if chars[j] == ']' {
            return Some(j);
        }
        j += 1;
    }
    None
}
