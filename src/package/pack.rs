//! Serializing a package back into a zip container.
//!
//! The output is the union of:
//!
//! 1. the `mimetype` entry, stored uncompressed and first
//! 2. the container file (the original bytes unless overridden)
//! 3. every live resource, at its path below the package directory
//! 4. every entry of the source archive not superseded by the above and
//!    not named by the manifest the package was opened with
//! 5. the package document, serialized from a private copy of the tree
//!
//! A resource that cannot be read is left out and reported as a
//! [`WarningKind::OmittedFromPack`] warning; its item and itemref are
//! pruned from the private copy, so the output never references a missing
//! entry. The live tree is not touched.

use std::collections::HashSet;
use std::fs;
use std::io::{Cursor, Seek, Write};
use std::path::Path;

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::{CONTAINER_PATH, MIMETYPE, MIMETYPE_PATH, Package, container};
use crate::backend::{ArchiveEntry, Storage};
use crate::manifest::{Resource, copy_chunked};
use crate::mode::OpenMode;
use crate::timestamp::Timestamp;
use crate::warning::{Warning, WarningKind};
use crate::{Error, Result};

/// Compression applied to entries written by the packer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Compression {
    /// No compression.
    Stored,
    /// Deflate (requires the `deflate` feature).
    Deflated,
}

impl Default for Compression {
    fn default() -> Self {
        if cfg!(feature = "deflate") {
            Self::Deflated
        } else {
            Self::Stored
        }
    }
}

impl Compression {
    fn method(self) -> Result<CompressionMethod> {
        match self {
            Self::Stored => Ok(CompressionMethod::Stored),
            #[cfg(feature = "deflate")]
            Self::Deflated => Ok(CompressionMethod::Deflated),
            #[cfg(not(feature = "deflate"))]
            Self::Deflated => Err(Error::InvalidArgument(
                "deflate compression requires the `deflate` feature".into(),
            )),
        }
    }
}

/// Options for [`Package::pack`].
///
/// # Example
///
/// ```rust
/// use epubfs::{Compression, PackOptions, Timestamp};
///
/// let options = PackOptions::new()
///     .compression(Compression::Stored)
///     .modified(Timestamp::DOS_EPOCH)
///     .preserve_timestamps(false);
/// assert!(PackOptions::new().level(12).is_err());
/// # let _ = options;
/// ```
#[derive(Debug, Clone)]
pub struct PackOptions {
    /// Compression for written entries (the `mimetype` entry is always
    /// stored).
    pub compression: Compression,
    /// Compression level 0-9, or the codec default.
    pub level: Option<u32>,
    /// Replacement bytes for `META-INF/container.xml`.
    pub container: Option<Vec<u8>>,
    /// Copy untouched archive entries verbatim, keeping their timestamps
    /// and compression. When `false` they are recompressed and stamped with
    /// [`modified`](Self::modified).
    pub preserve_timestamps: bool,
    /// Modification time of written entries (now when `None`).
    pub modified: Option<Timestamp>,
}

impl Default for PackOptions {
    fn default() -> Self {
        Self {
            compression: Compression::default(),
            level: None,
            container: None,
            preserve_timestamps: true,
            modified: None,
        }
    }
}

impl PackOptions {
    /// Creates default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the compression.
    pub fn compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    /// Sets the compression level.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for levels above 9.
    pub fn level(mut self, level: u32) -> Result<Self> {
        if level > 9 {
            return Err(Error::InvalidArgument(format!(
                "compression level {} out of range 0-9",
                level
            )));
        }
        self.level = Some(level);
        Ok(self)
    }

    /// Overrides the container file.
    pub fn container(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.container = Some(bytes.into());
        self
    }

    /// Sets whether untouched entries are copied verbatim.
    pub fn preserve_timestamps(mut self, yes: bool) -> Self {
        self.preserve_timestamps = yes;
        self
    }

    /// Sets the modification time of written entries.
    pub fn modified(mut self, time: Timestamp) -> Self {
        self.modified = Some(time);
        self
    }

    fn stamp(&self) -> zip::DateTime {
        self.modified
            .unwrap_or_else(Timestamp::now)
            .to_zip()
            .unwrap_or_default()
    }

    fn file_options(&self) -> Result<SimpleFileOptions> {
        let method = self.compression.method()?;
        let mut options = SimpleFileOptions::default()
            .compression_method(method)
            .last_modified_time(self.stamp());
        if method != CompressionMethod::Stored {
            options = options.compression_level(self.level.map(i64::from));
        }
        Ok(options)
    }
}

/// Summary of a [`Package::pack`] call.
#[must_use = "pack results carry warnings about omitted resources"]
#[derive(Debug, Clone, Default)]
pub struct PackResult {
    /// Number of zip entries written, including `mimetype`, the container
    /// file and the package document.
    pub entries_written: usize,
    /// Number of manifest resources written.
    pub resources_written: usize,
    /// Number of untouched source archive entries copied.
    pub original_entries_copied: usize,
    /// Paths of resources left out.
    pub omitted: Vec<String>,
    /// Omissions and other degradations.
    pub warnings: Vec<Warning>,
}

impl PackResult {
    /// Returns `true` if every resource was written.
    pub fn is_complete(&self) -> bool {
        self.omitted.is_empty()
    }
}

impl Package {
    /// Writes the package to a file.
    ///
    /// The archive is written to a temporary file next to `path` and moved
    /// into place once complete.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `path` is the source archive
    /// and it is still open, and [`Error::Io`] or [`Error::Zip`] if writing
    /// fails.
    pub fn pack(&self, path: impl AsRef<Path>, options: &PackOptions) -> Result<PackResult> {
        let path = path.as_ref();
        if self.is_open_source(path) {
            return Err(Error::InvalidArgument(format!(
                "refusing to overwrite the open source archive {}",
                path.display()
            )));
        }
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let mut file = tempfile::NamedTempFile::new_in(dir)?;
        let result = self.pack_to(std::io::BufWriter::new(file.as_file_mut()), options)?;
        file.persist(path).map_err(|e| Error::Io(e.error))?;
        log::debug!(
            "packed {} entries into {}",
            result.entries_written,
            path.display()
        );
        Ok(result)
    }

    /// Writes the package to an in-memory buffer.
    pub fn pack_to_vec(&self, options: &PackOptions) -> Result<(Vec<u8>, PackResult)> {
        let mut cursor = Cursor::new(Vec::new());
        let result = self.pack_to(&mut cursor, options)?;
        Ok((cursor.into_inner(), result))
    }

    /// Writes the package to a seekable writer.
    pub fn pack_to<W: Write + Seek>(&self, writer: W, options: &PackOptions) -> Result<PackResult> {
        let file_options = options.file_options()?;
        let stored = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Stored)
            .last_modified_time(options.stamp());
        let chunk_size = self.manifest.options().chunk_size;
        let mut zip = ZipWriter::new(writer);
        let mut result = PackResult::default();

        zip.start_file(MIMETYPE_PATH, stored)?;
        zip.write_all(MIMETYPE)?;
        result.entries_written += 1;

        let container = match (&options.container, self.original_container()) {
            (Some(bytes), _) => bytes.clone(),
            (None, Some(bytes)) => bytes.to_vec(),
            (None, None) => container::generate(&self.opf_path),
        };
        zip.start_file(CONTAINER_PATH, file_options)?;
        zip.write_all(&container)?;
        result.entries_written += 1;

        let reserved = [MIMETYPE_PATH, CONTAINER_PATH, self.opf_path.as_str()];
        let mut written: HashSet<&str> = HashSet::new();
        let mut claimed: HashSet<String> = HashSet::new();
        for resource in self.manifest.iter() {
            let name = resource.archive_name();
            let outcome = if reserved.contains(&name.as_str()) {
                Err(format!("its entry {} is reserved", name))
            } else if name.starts_with("../") {
                Err(format!("its entry {} is outside the container", name))
            } else {
                write_resource(&mut zip, &resource, &name, chunk_size, options, file_options)?
            };
            claimed.insert(name);
            match outcome {
                Ok(()) => {
                    written.insert(resource.id());
                    result.resources_written += 1;
                    result.entries_written += 1;
                }
                Err(reason) => {
                    result.warnings.push(Warning::new(
                        WarningKind::OmittedFromPack,
                        resource.path(),
                        format!("left out of the archive: {}", reason),
                    ));
                    result.omitted.push(resource.path().to_string());
                }
            }
        }

        if let Some(archive) = self.source_archive() {
            for name in archive.names() {
                if name.ends_with('/')
                    || reserved.contains(&name.as_str())
                    || claimed.contains(&name)
                    || self.is_original_item(&name)
                {
                    continue;
                }
                let entry = ArchiveEntry::new(std::rc::Rc::clone(archive), name.as_str());
                match copy_entry(&mut zip, &entry, &name, options, file_options)? {
                    Ok(()) => {
                        result.original_entries_copied += 1;
                        result.entries_written += 1;
                    }
                    Err(reason) => result.warnings.push(Warning::new(
                        WarningKind::OmittedFromPack,
                        &name,
                        format!("original entry left out: {}", reason),
                    )),
                }
            }
        }

        let document = self.serialize_document(|id| written.contains(id));
        zip.start_file(self.opf_path.as_str(), file_options)?;
        zip.write_all(&document)?;
        result.entries_written += 1;

        let mut writer = zip.finish()?;
        writer.flush()?;
        Ok(result)
    }

    fn is_open_source(&self, dest: &Path) -> bool {
        let Some(archive) = self.source_archive() else {
            return false;
        };
        let Some(source) = archive.path() else {
            return false;
        };
        if archive.is_closed() {
            return false;
        }
        match (fs::canonicalize(source), fs::canonicalize(dest)) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}

/// Outcome of writing one entry: the outer error aborts the whole pack,
/// the inner one only skips the entry.
type EntryOutcome = Result<std::result::Result<(), String>>;

fn write_resource<W: Write + Seek>(
    zip: &mut ZipWriter<W>,
    resource: &Resource<'_>,
    name: &str,
    chunk_size: usize,
    options: &PackOptions,
    file_options: SimpleFileOptions,
) -> EntryOutcome {
    let Some(handle) = resource.handle() else {
        return Ok(Err("it was never created".into()));
    };
    if let Storage::ArchiveEntry(entry) = handle.storage() {
        return copy_entry(zip, entry, name, options, file_options);
    }
    let mut raw = match handle.open_raw(OpenMode::READ_BINARY) {
        Ok(raw) => raw,
        Err(e) => return Ok(Err(e.to_string())),
    };
    zip.start_file(name, file_options)?;
    if let Err(e) = copy_chunked(&mut raw, zip, chunk_size) {
        zip.abort_file()?;
        return Ok(Err(e.to_string()));
    }
    Ok(Ok(()))
}

/// Copies an archive entry to `name`, verbatim when timestamps are kept.
fn copy_entry<W: Write + Seek>(
    zip: &mut ZipWriter<W>,
    entry: &ArchiveEntry,
    name: &str,
    options: &PackOptions,
    file_options: SimpleFileOptions,
) -> EntryOutcome {
    if entry.archive().is_closed() {
        return Ok(Err("the source archive is closed".into()));
    }
    if options.preserve_timestamps {
        return entry.archive().with_archive(|archive| {
            let Some(index) = archive.index_for_name(entry.name()) else {
                return Ok(Err(format!("{} is missing from the source archive", entry.name())));
            };
            let file = match archive.by_index_raw(index) {
                Ok(file) => file,
                Err(e) => return Ok(Err(e.to_string())),
            };
            zip.raw_copy_file_rename(file, name)?;
            Ok(Ok(()))
        });
    }
    let bytes = match entry.archive().read(entry.name()) {
        Ok(bytes) => bytes,
        Err(e) => return Ok(Err(e.to_string())),
    };
    zip.start_file(name, file_options)?;
    zip.write_all(&bytes)?;
    Ok(Ok(()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::Element;
    use crate::manifest::Source;
    use std::io::Read;

    fn entry_names(bytes: Vec<u8>) -> Vec<String> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect()
    }

    #[test]
    fn test_unbound_item_is_omitted() {
        let mut package = Package::new().unwrap();
        package
            .manifest_mut()
            .add("Text/a.xhtml", Source::from(b"<html/>".to_vec()), Some("a"), None)
            .unwrap();
        package.manifest_mut().element_mut().push(
            Element::new("item")
                .with_attr("href", "Text/ghost.xhtml")
                .with_attr("media-type", "application/xhtml+xml"),
        );
        let _ = package.reconcile();
        assert!(package.manifest().exists("Text/ghost.xhtml"));
        assert!(package.manifest().handle("Text/ghost.xhtml").is_none());

        let (bytes, result) = package.pack_to_vec(&PackOptions::default()).unwrap();
        assert_eq!(result.omitted, ["Text/ghost.xhtml"]);
        assert_eq!(result.warnings[0].kind, WarningKind::OmittedFromPack);
        assert_eq!(result.resources_written, 1);

        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut opf = String::new();
        archive
            .by_name("OEBPS/content.opf")
            .unwrap()
            .read_to_string(&mut opf)
            .unwrap();
        assert!(!opf.contains("ghost"));
        assert!(package.manifest().exists("Text/ghost.xhtml"));
    }

    #[test]
    fn test_entry_order() {
        let mut package = Package::new().unwrap();
        let manifest = package.manifest_mut();
        manifest.add("b.css", Source::Empty, None, None).unwrap();
        manifest.add("a.css", Source::Empty, None, None).unwrap();
        let (bytes, result) = package.pack_to_vec(&PackOptions::default()).unwrap();
        assert!(result.is_complete());
        assert_eq!(
            entry_names(bytes),
            [
                "mimetype",
                "META-INF/container.xml",
                "OEBPS/b.css",
                "OEBPS/a.css",
                "OEBPS/content.opf"
            ]
        );
    }
}
