//! Manifest configuration.

use std::fmt;
use std::path::PathBuf;

use encoding_rs::{Encoding, UTF_8};

use crate::media_type::MediaTypes;
use crate::{Error, Result, href};

/// Default chunk size for streamed reads and writes (64 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Custom id generator signature.
///
/// Receives the resource path and a predicate telling whether an id is
/// already taken.
pub type IdFn = Box<dyn Fn(&str, &dyn Fn(&str) -> bool) -> String>;

/// Strategy for ids of resources added without one.
///
/// Whatever the strategy produces, a taken id is disambiguated as
/// `{i}_{id}` with the smallest free `i`.
#[derive(Default)]
pub enum IdGenerator {
    /// Random ids (`id-` followed by a UUID v4).
    #[default]
    Uuid,
    /// The file name, reduced to characters valid in an XML id.
    FileName,
    /// A caller-supplied function.
    Custom(IdFn),
}

impl IdGenerator {
    /// Produces a free id for `path`.
    pub fn generate(&self, path: &str, taken: &dyn Fn(&str) -> bool) -> String {
        let base = match self {
            IdGenerator::Uuid => format!("id-{}", uuid::Uuid::new_v4()),
            IdGenerator::FileName => xml_id(href::basename(path)),
            IdGenerator::Custom(f) => f(path, taken),
        };
        let base = if base.is_empty() { "item".to_string() } else { base };
        if !taken(&base) {
            return base;
        }
        (1..)
            .map(|i| format!("{}_{}", i, base))
            .find(|candidate| !taken(candidate))
            .unwrap_or(base)
    }
}

impl fmt::Debug for IdGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdGenerator::Uuid => f.write_str("Uuid"),
            IdGenerator::FileName => f.write_str("FileName"),
            IdGenerator::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Reduces `name` to an XML NCName.
fn xml_id(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if out.chars().next().is_some_and(|c| !(c.is_alphabetic() || c == '_')) {
        out.insert(0, '_');
    }
    out
}

/// Options for a [`Manifest`](crate::Manifest).
///
/// # Example
///
/// ```rust
/// use epubfs::{IdGenerator, ManifestOptions, MediaTypes};
///
/// let mut types = MediaTypes::new();
/// types.insert("md", "text/markdown");
/// let options = ManifestOptions::new()
///     .id_generator(IdGenerator::FileName)
///     .media_types(types)
///     .chunk_size(16 * 1024);
/// ```
#[derive(Debug)]
pub struct ManifestOptions {
    pub(crate) id_generator: IdGenerator,
    pub(crate) media_types: MediaTypes,
    pub(crate) encoding: &'static Encoding,
    pub(crate) chunk_size: usize,
    pub(crate) temp_dir: Option<PathBuf>,
}

impl Default for ManifestOptions {
    fn default() -> Self {
        Self {
            id_generator: IdGenerator::Uuid,
            media_types: MediaTypes::new(),
            encoding: UTF_8,
            chunk_size: DEFAULT_CHUNK_SIZE,
            temp_dir: None,
        }
    }
}

impl ManifestOptions {
    /// Creates default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the id generator.
    pub fn id_generator(mut self, generator: IdGenerator) -> Self {
        self.id_generator = generator;
        self
    }

    /// Sets the media-type table.
    pub fn media_types(mut self, media_types: MediaTypes) -> Self {
        self.media_types = media_types;
        self
    }

    /// Sets the default text encoding by label.
    pub fn encoding(mut self, label: &str) -> Result<Self> {
        self.encoding = Encoding::for_label(label.as_bytes())
            .ok_or_else(|| Error::InvalidArgument(format!("unknown encoding: {}", label)))?;
        Ok(self)
    }

    /// Sets the chunk size for streamed reads and writes.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    /// Creates the scratch directory inside `dir` instead of the system
    /// temp directory.
    pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    /// Returns the media-type table.
    pub fn media_type_table(&self) -> &MediaTypes {
        &self.media_types
    }

    /// Returns the default text encoding.
    pub fn default_encoding(&self) -> &'static Encoding {
        self.encoding
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_uuid_ids_are_distinct() {
        let generator = IdGenerator::Uuid;
        let a = generator.generate("a.xhtml", &|_| false);
        let b = generator.generate("a.xhtml", &|_| false);
        assert_ne!(a, b);
        assert!(a.starts_with("id-"));
    }

    #[test]
    fn test_file_name_ids() {
        let generator = IdGenerator::FileName;
        assert_eq!(generator.generate("Text/ch 1.xhtml", &|_| false), "ch_1.xhtml");
        assert_eq!(generator.generate("Images/1.png", &|_| false), "_1.png");

        let taken: HashSet<&str> = ["ch.xhtml", "1_ch.xhtml"].into_iter().collect();
        assert_eq!(
            generator.generate("Text/ch.xhtml", &|id| taken.contains(id)),
            "2_ch.xhtml"
        );
    }

    #[test]
    fn test_custom_ids() {
        let generator = IdGenerator::Custom(Box::new(|path, _| path.replace('/', "-")));
        assert_eq!(generator.generate("Text/a", &|_| false), "Text-a");
    }
}
