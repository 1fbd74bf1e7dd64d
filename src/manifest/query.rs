//! Path and media-type queries.

use super::{Manifest, Resource};
use crate::glob::Glob;
use crate::href;
use crate::Result;

impl Manifest {
    /// Returns resources whose path matches `pattern`, sorted by path.
    ///
    /// `dir` scopes the pattern to paths below a directory. An empty
    /// pattern matches nothing.
    ///
    /// # Example
    ///
    /// ```rust
    /// use epubfs::{Manifest, Source};
    ///
    /// # fn main() -> epubfs::Result<()> {
    /// let mut m = Manifest::new()?;
    /// m.add("Text/a.xhtml", Source::Empty, None, None)?;
    /// m.add("Text/sub/b.xhtml", Source::Empty, None, None)?;
    /// m.add("Styles/main.css", Source::Empty, None, None)?;
    ///
    /// let found: Vec<&str> = m.glob("*.xhtml", Some("Text"), false)?.iter().map(|r| r.path()).collect();
    /// assert_eq!(found, ["Text/a.xhtml"]);
    /// assert_eq!(m.rglob("*.XHTML", None, true)?.len(), 2);
    /// # Ok(())
    /// # }
    /// ```
    pub fn glob(
        &self,
        pattern: &str,
        dir: Option<&str>,
        ignore_case: bool,
    ) -> Result<Vec<Resource<'_>>> {
        if pattern.is_empty() {
            return Ok(Vec::new());
        }
        let mut builder = Glob::builder(pattern).ignore_case(ignore_case);
        if let Some(dir) = dir {
            builder = builder.dir(dir);
        }
        Ok(self.find(&builder.build()?))
    }

    /// Like [`glob`](Self::glob), matching at any depth.
    pub fn rglob(
        &self,
        pattern: &str,
        dir: Option<&str>,
        ignore_case: bool,
    ) -> Result<Vec<Resource<'_>>> {
        if pattern.is_empty() {
            return Ok(Vec::new());
        }
        self.glob(&format!("**/{}", pattern.trim_start_matches('/')), dir, ignore_case)
    }

    /// Returns resources matched by a compiled glob, sorted by path.
    pub fn find(&self, glob: &Glob) -> Vec<Resource<'_>> {
        self.paths()
            .filter(|path| glob.matches(path))
            .filter_map(|path| self.get_by_path(path))
            .collect()
    }

    /// Returns the resources directly inside `dir`, sorted by path.
    pub fn iterdir(&self, dir: &str) -> Vec<Resource<'_>> {
        let dir = dir.trim_matches('/');
        self.paths()
            .filter(|path| href::dirname(path) == dir)
            .filter_map(|path| self.get_by_path(path))
            .collect()
    }

    /// Returns resources by media type, in document order.
    ///
    /// `pattern` is an exact type (`image/png`), a family (`image/*`) or
    /// `*`. Comparison ignores case.
    pub fn filter_by_media_type(&self, pattern: &str) -> Vec<Resource<'_>> {
        let pattern = pattern.trim().to_ascii_lowercase();
        self.iter()
            .filter(|r| media_type_matches(&pattern, &r.media_type().to_ascii_lowercase()))
            .collect()
    }
}

fn media_type_matches(pattern: &str, media_type: &str) -> bool {
    if pattern == "*" || pattern == "*/*" {
        return true;
    }
    match pattern.strip_suffix("/*") {
        Some(family) => media_type
            .split_once('/')
            .is_some_and(|(top, _)| top == family),
        None => pattern == media_type,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::Source;

    fn sample() -> Manifest {
        let mut m = Manifest::new().unwrap();
        for (path, id) in [
            ("Text/ch1.xhtml", "ch1"),
            ("Text/ch2.XHTML", "ch2"),
            ("Text/notes/n1.xhtml", "n1"),
            ("Images/cover.png", "cover"),
            ("Images/logo.svg", "logo"),
            ("toc.ncx", "ncx"),
        ] {
            m.add(path, Source::Empty, Some(id), None).unwrap();
        }
        m
    }

    fn paths(found: Vec<Resource<'_>>) -> Vec<&str> {
        found.into_iter().map(|r| r.path()).collect()
    }

    #[test]
    fn test_glob_scoping() {
        let m = sample();
        assert_eq!(paths(m.glob("Text/*.xhtml", None, false).unwrap()), ["Text/ch1.xhtml"]);
        assert_eq!(
            paths(m.glob("*.xhtml", Some("Text"), true).unwrap()),
            ["Text/ch1.xhtml", "Text/ch2.XHTML"]
        );
        assert_eq!(
            paths(m.rglob("*.xhtml", None, false).unwrap()),
            ["Text/ch1.xhtml", "Text/notes/n1.xhtml"]
        );
        assert!(m.glob("", None, false).unwrap().is_empty());
        assert!(m.rglob("", None, false).unwrap().is_empty());
    }

    #[test]
    fn test_iterdir() {
        let m = sample();
        assert_eq!(paths(m.iterdir("Images/")), ["Images/cover.png", "Images/logo.svg"]);
        assert_eq!(paths(m.iterdir("")), ["toc.ncx"]);
        assert!(m.iterdir("Missing").is_empty());
    }

    #[test]
    fn test_filter_by_media_type() {
        let m = sample();
        assert_eq!(
            paths(m.filter_by_media_type("image/*")),
            ["Images/cover.png", "Images/logo.svg"]
        );
        assert_eq!(paths(m.filter_by_media_type("IMAGE/PNG")), ["Images/cover.png"]);
        assert_eq!(m.filter_by_media_type("*").len(), 6);
        assert!(m.filter_by_media_type("audio/*").is_empty());
    }
}
