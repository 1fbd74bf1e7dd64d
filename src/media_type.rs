//! Extension to media-type lookup.
//!
//! [`MediaTypes`] is an explicit, per-manifest table: caller overrides take
//! precedence, then a built-in table of the EPUB core media types, then
//! `mime_guess`. Unknown extensions map to `application/octet-stream`.

use std::collections::HashMap;

use crate::href;

/// Media type used when nothing else matches.
pub const DEFAULT_MEDIA_TYPE: &str = "application/octet-stream";

/// Media type of package documents.
pub const OPF_MEDIA_TYPE: &str = "application/oebps-package+xml";

/// Media type of the NCX navigation document.
pub const NCX_MEDIA_TYPE: &str = "application/x-dtbncx+xml";

const BUILTIN: &[(&str, &str)] = &[
    ("xhtml", "application/xhtml+xml"),
    ("xht", "application/xhtml+xml"),
    ("html", "text/html"),
    ("htm", "text/html"),
    ("css", "text/css"),
    ("js", "text/javascript"),
    ("mjs", "text/javascript"),
    ("ncx", NCX_MEDIA_TYPE),
    ("opf", OPF_MEDIA_TYPE),
    ("smil", "application/smil+xml"),
    ("smi", "application/smil+xml"),
    ("sml", "application/smil+xml"),
    ("xml", "application/xml"),
    ("pls", "application/pls+xml"),
    ("svg", "image/svg+xml"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
    ("avif", "image/avif"),
    ("bmp", "image/bmp"),
    ("ttf", "font/ttf"),
    ("otf", "font/otf"),
    ("woff", "font/woff"),
    ("woff2", "font/woff2"),
    ("mp3", "audio/mpeg"),
    ("m4a", "audio/mp4"),
    ("aac", "audio/aac"),
    ("ogg", "application/ogg"),
    ("opus", "audio/opus"),
    ("mp4", "video/mp4"),
    ("m4v", "video/mp4"),
    ("webm", "video/webm"),
    ("txt", "text/plain"),
    ("json", "application/json"),
    ("epub", "application/epub+zip"),
];

/// An extension to media-type table.
///
/// # Example
///
/// ```
/// use epubfs::MediaTypes;
///
/// let mut types = MediaTypes::new();
/// assert_eq!(types.guess("Text/ch1.xhtml"), "application/xhtml+xml");
/// assert_eq!(types.guess("README"), "application/octet-stream");
///
/// types.insert("xhtml", "text/html");
/// assert_eq!(types.guess("Text/ch1.XHTML"), "text/html");
/// ```
#[derive(Debug, Clone, Default)]
pub struct MediaTypes {
    overrides: HashMap<String, String>,
    no_fallback: bool,
}

impl MediaTypes {
    /// Creates the default table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps `extension` (without the dot, case-insensitive) to `media_type`.
    pub fn insert(&mut self, extension: &str, media_type: impl Into<String>) -> &mut Self {
        self.overrides.insert(
            extension.trim_start_matches('.').to_ascii_lowercase(),
            media_type.into(),
        );
        self
    }

    /// Disables the `mime_guess` fallback, restricting lookups to the
    /// built-in table and overrides.
    pub fn without_fallback(mut self) -> Self {
        self.no_fallback = true;
        self
    }

    /// Looks up an extension.
    pub fn lookup(&self, extension: &str) -> Option<&str> {
        let ext = extension.trim_start_matches('.').to_ascii_lowercase();
        if let Some(media_type) = self.overrides.get(&ext) {
            return Some(media_type.as_str());
        }
        if let Some((_, media_type)) = BUILTIN.iter().find(|(e, _)| *e == ext) {
            return Some(*media_type);
        }
        if self.no_fallback {
            return None;
        }
        mime_guess::from_ext(&ext).first_raw()
    }

    /// Guesses the media type of a path from its extension.
    pub fn guess(&self, path: &str) -> &str {
        let name = href::basename(path);
        match name.rfind('.') {
            Some(dot) if dot > 0 => self.lookup(&name[dot + 1..]).unwrap_or(DEFAULT_MEDIA_TYPE),
            _ => DEFAULT_MEDIA_TYPE,
        }
    }
}

/// Returns `true` for media types whose resources are scanned for links.
pub fn is_linkable(media_type: &str) -> bool {
    LinkSyntax::for_media_type(media_type).is_some()
}

/// The reference grammar used to scan a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkSyntax {
    /// `url(...)` references.
    Css,
    /// `href`/`src` attributes plus nested CSS in `style` attributes and
    /// `<style>` elements.
    Html,
    /// `href`/`src` attributes only.
    Xml,
}

impl LinkSyntax {
    /// Selects the grammar for a media type.
    pub fn for_media_type(media_type: &str) -> Option<Self> {
        let essence = media_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "text/css" => Some(Self::Css),
            "text/html" | "application/xhtml+xml" => Some(Self::Html),
            NCX_MEDIA_TYPE | "image/svg+xml" | "application/smil+xml" => Some(Self::Xml),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin() {
        let types = MediaTypes::new();
        assert_eq!(types.guess("a.css"), "text/css");
        assert_eq!(types.guess("toc.ncx"), NCX_MEDIA_TYPE);
        assert_eq!(types.guess("Fonts/x.WOFF2"), "font/woff2");
    }

    #[test]
    fn test_no_extension() {
        let types = MediaTypes::new();
        assert_eq!(types.guess("Text/README"), DEFAULT_MEDIA_TYPE);
        assert_eq!(types.guess(".hidden"), DEFAULT_MEDIA_TYPE);
        assert_eq!(types.guess("dir.d/file"), DEFAULT_MEDIA_TYPE);
    }

    #[test]
    fn test_fallback() {
        let types = MediaTypes::new();
        assert_eq!(types.guess("doc.pdf"), "application/pdf");
        let strict = MediaTypes::new().without_fallback();
        assert_eq!(strict.guess("doc.pdf"), DEFAULT_MEDIA_TYPE);
    }

    #[test]
    fn test_link_syntax() {
        assert_eq!(LinkSyntax::for_media_type("text/css"), Some(LinkSyntax::Css));
        assert_eq!(
            LinkSyntax::for_media_type("application/xhtml+xml; charset=utf-8"),
            Some(LinkSyntax::Html)
        );
        assert_eq!(LinkSyntax::for_media_type(NCX_MEDIA_TYPE), Some(LinkSyntax::Xml));
        assert!(!is_linkable("image/png"));
    }
}
