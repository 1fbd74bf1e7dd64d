//! Borrowed views of manifest resources.

use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};

use super::{Manifest, RenameResult};
use crate::backend::{BackendKind, ExternalOpener, Handle};
use crate::descriptor::Element;
use crate::media_type::DEFAULT_MEDIA_TYPE;
use crate::stream::Stream;
use crate::vfs::Stat;
use crate::Result;

/// Initial storage for [`Manifest::add`].
#[derive(Default)]
pub enum Source {
    /// An empty scratch file.
    #[default]
    Empty,
    /// A file on disk, read in place and never modified.
    Path(PathBuf),
    /// An entry of the manifest's source archive, by full entry name.
    ArchiveEntry(String),
    /// A reader copied eagerly into a scratch file.
    Reader(Box<dyn Read>),
    /// Bytes copied into a scratch file.
    Bytes(Vec<u8>),
    /// A caller-supplied opener.
    Opener(ExternalOpener),
}

impl Source {
    /// Wraps a reader.
    pub fn reader(reader: impl Read + 'static) -> Self {
        Source::Reader(Box::new(reader))
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Empty => f.write_str("Empty"),
            Source::Path(p) => f.debug_tuple("Path").field(p).finish(),
            Source::ArchiveEntry(n) => f.debug_tuple("ArchiveEntry").field(n).finish(),
            Source::Reader(_) => f.write_str("Reader(..)"),
            Source::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            Source::Opener(o) => f.debug_tuple("Opener").field(o).finish(),
        }
    }
}

impl From<Vec<u8>> for Source {
    fn from(bytes: Vec<u8>) -> Self {
        Source::Bytes(bytes)
    }
}

impl From<&[u8]> for Source {
    fn from(bytes: &[u8]) -> Self {
        Source::Bytes(bytes.to_vec())
    }
}

impl From<PathBuf> for Source {
    fn from(path: PathBuf) -> Self {
        Source::Path(path)
    }
}

impl From<&Path> for Source {
    fn from(path: &Path) -> Self {
        Source::Path(path.to_path_buf())
    }
}

impl From<ExternalOpener> for Source {
    fn from(opener: ExternalOpener) -> Self {
        Source::Opener(opener)
    }
}

/// A read-only view of one resource.
#[derive(Clone, Copy)]
pub struct Resource<'a> {
    manifest: &'a Manifest,
    element: &'a Element,
    id: &'a str,
    path: &'a str,
}

impl<'a> Resource<'a> {
    pub(super) fn new(
        manifest: &'a Manifest,
        element: &'a Element,
        id: &'a str,
        path: &'a str,
    ) -> Self {
        Self {
            manifest,
            element,
            id,
            path,
        }
    }

    /// Returns the stable id.
    pub fn id(&self) -> &'a str {
        self.id
    }

    /// Returns the unescaped path.
    pub fn path(&self) -> &'a str {
        self.path
    }

    /// Returns the `href` attribute as written in the package document.
    pub fn href(&self) -> &'a str {
        self.element.attr("href").unwrap_or_default()
    }

    /// Returns the media type.
    pub fn media_type(&self) -> &'a str {
        self.element.attr("media-type").unwrap_or(DEFAULT_MEDIA_TYPE)
    }

    /// Returns an attribute of the item element.
    pub fn attr(&self, key: &str) -> Option<&'a str> {
        self.element.attr(key)
    }

    /// Returns the item element.
    pub fn element(&self) -> &'a Element {
        self.element
    }

    /// Returns the bound handle, or `None` while unbound.
    pub fn handle(&self) -> Option<&'a Handle> {
        self.manifest.handles.get(self.path)
    }

    /// Returns the storage kind, or `None` while unbound.
    pub fn kind(&self) -> Option<BackendKind> {
        self.handle().map(Handle::kind)
    }

    /// Returns size and modification time when the storage can tell.
    pub fn stat(&self) -> Option<Stat> {
        self.handle().and_then(Handle::stat)
    }

    /// Returns the container entry name.
    pub fn archive_name(&self) -> String {
        self.manifest.archive_name(self.path)
    }
}

impl fmt::Debug for Resource<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("media_type", &self.media_type())
            .field("kind", &self.kind())
            .finish()
    }
}

/// Forwards path-scoped calls for one resource back to its manifest.
///
/// The resource is tracked by id, so the view stays valid across renames.
pub struct ResourceMut<'a> {
    manifest: &'a mut Manifest,
    id: String,
}

impl<'a> ResourceMut<'a> {
    pub(super) fn new(manifest: &'a mut Manifest, id: String) -> Self {
        Self { manifest, id }
    }

    /// Returns the stable id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the current path.
    pub fn path(&self) -> &str {
        self.manifest
            .ids
            .get(&self.id)
            .map(String::as_str)
            .unwrap_or_default()
    }

    /// Returns a read-only view.
    pub fn as_resource(&self) -> Option<Resource<'_>> {
        self.manifest.get(&self.id)
    }

    /// See [`Manifest::open`].
    pub fn open(&mut self, mode: &str) -> Result<Stream> {
        let path = self.path().to_string();
        self.manifest.open(&path, mode)
    }

    /// See [`Manifest::read`].
    pub fn read(&mut self) -> Result<Vec<u8>> {
        let path = self.path().to_string();
        self.manifest.read(&path)
    }

    /// See [`Manifest::read_text`].
    pub fn read_text(&mut self) -> Result<String> {
        let path = self.path().to_string();
        self.manifest.read_text(&path)
    }

    /// See [`Manifest::write`].
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        let path = self.path().to_string();
        self.manifest.write(&path, data)
    }

    /// See [`Manifest::write_text`].
    pub fn write_text(&mut self, text: &str) -> Result<()> {
        let path = self.path().to_string();
        self.manifest.write_text(&path, text)
    }

    /// See [`Manifest::stat`].
    pub fn stat(&self) -> Result<Option<Stat>> {
        self.manifest.stat(self.path())
    }

    /// See [`Manifest::set_attribute`].
    pub fn set_attribute(&mut self, key: &str, value: &str) -> Result<()> {
        self.manifest.set_attribute(&self.id, key, value)
    }

    /// See [`Manifest::rename`].
    pub fn rename(&mut self, new_path: &str, repair: bool) -> Result<RenameResult> {
        let path = self.path().to_string();
        self.manifest.rename(&path, new_path, repair)
    }

    /// Removes the resource.
    pub fn remove(self) -> Result<()> {
        self.manifest.pop(&self.id).map(drop)
    }
}

impl fmt::Debug for ResourceMut<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceMut")
            .field("id", &self.id)
            .field("path", &self.path())
            .finish()
    }
}
