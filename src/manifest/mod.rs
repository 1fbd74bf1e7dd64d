//! The manifest: a package's registry of resources.
//!
//! A [`Manifest`] owns the `<manifest>` element of a package document and
//! keeps three indices in step with it:
//!
//! - id → path (ids are stable across renames)
//! - path → id (paths are unique)
//! - path → [`Handle`] (each path has at most one storage binding, created
//!   lazily on first access)
//!
//! Every structural operation validates all of its inputs before touching
//! any index, so a failed call leaves the manifest exactly as it was.
//!
//! Resource paths are unescaped, package-relative and slash-trimmed
//! (`Text/chapter 1.xhtml`). The `href` attributes written into the tree
//! carry the percent-escaped form (`Text/chapter%201.xhtml`).
//!
//! # Storage
//!
//! Resources start out bound to original archive entries, scratch files, or
//! caller-supplied openers (see [`backend`](crate::backend)). Opening an
//! archive entry or an external resource with write intent first copies its
//! bytes into a fresh scratch file and swaps the binding, so neither the
//! source archive nor caller-owned data is ever modified in place.
//!
//! # Example
//!
//! ```rust
//! use epubfs::{Manifest, Source};
//!
//! # fn main() -> epubfs::Result<()> {
//! let mut manifest = Manifest::new()?;
//! manifest.add("Text/ch1.xhtml", Source::from(b"<html/>".to_vec()), Some("ch1"), None)?;
//! assert_eq!(manifest.read("Text/ch1.xhtml")?, b"<html/>");
//!
//! let moved = manifest.rename("Text/ch1.xhtml", "Text/chapter1.xhtml", false)?;
//! assert_eq!(moved.new, "Text/chapter1.xhtml");
//! assert_eq!(manifest.get("ch1").unwrap().path(), "Text/chapter1.xhtml");
//! # Ok(())
//! # }
//! ```

mod io;
mod options;
mod query;
mod reconcile;
mod rename;
mod resource;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io::{Read, Write};
use std::rc::Rc;

pub use options::{DEFAULT_CHUNK_SIZE, IdFn, IdGenerator, ManifestOptions};
pub use rename::{BatchRenameResult, OverwritePolicy, RenameResult};
pub use resource::{Resource, ResourceMut, Source};

use crate::backend::{ArchiveEntry, ExternalOpener, Handle, SourceArchive, Storage, TempFile};
use crate::descriptor::{Element, Node};
use crate::href::{self, Href};
use crate::mode::OpenMode;
use crate::vfs::TemporaryFilesystem;
use crate::{Error, Result};

/// The registry of a package's resources.
pub struct Manifest {
    element: Element,
    opf_dir: String,
    ids: HashMap<String, String>,
    paths: BTreeMap<String, String>,
    handles: HashMap<String, Handle>,
    scratch: Rc<TemporaryFilesystem>,
    source: Option<Rc<SourceArchive>>,
    options: ManifestOptions,
}

impl Manifest {
    /// Creates an empty manifest with default options.
    ///
    /// # Errors
    ///
    /// Fails if the scratch directory cannot be created.
    pub fn new() -> Result<Self> {
        Self::with_options(ManifestOptions::default())
    }

    /// Creates an empty manifest.
    pub fn with_options(options: ManifestOptions) -> Result<Self> {
        let (manifest, _) = Self::from_element(Element::new("manifest"), "", None, options)?;
        Ok(manifest)
    }

    /// Builds a manifest over an existing `<manifest>` element.
    ///
    /// Items are resolved against `opf_dir` inside `source`. Items whose
    /// entry exists are bound to it; everything else stays unbound until
    /// first access. Malformed items are repaired as by
    /// [`reconcile`](Self::reconcile) and reported in the returned warnings.
    pub fn from_element(
        element: Element,
        opf_dir: &str,
        source: Option<Rc<SourceArchive>>,
        options: ManifestOptions,
    ) -> Result<(Self, Vec<crate::Warning>)> {
        let scratch = match &options.temp_dir {
            Some(dir) => TemporaryFilesystem::new_in(dir)?,
            None => TemporaryFilesystem::new()?,
        };
        let mut manifest = Self {
            element,
            opf_dir: opf_dir.trim_matches('/').to_string(),
            ids: HashMap::new(),
            paths: BTreeMap::new(),
            handles: HashMap::new(),
            scratch: Rc::new(scratch),
            source,
            options,
        };
        let warnings = manifest.reconcile_items(true);
        Ok((manifest, warnings))
    }

    /// Returns the `<manifest>` element.
    pub fn element(&self) -> &Element {
        &self.element
    }

    /// Returns the `<manifest>` element for direct editing.
    ///
    /// Edits bypass the indices; call [`reconcile`](Self::reconcile)
    /// afterwards.
    pub fn element_mut(&mut self) -> &mut Element {
        &mut self.element
    }

    /// Returns the directory of the package document inside the container.
    pub fn opf_dir(&self) -> &str {
        &self.opf_dir
    }

    /// Returns the container entry name for a resource path.
    pub fn archive_name(&self, path: &str) -> String {
        href::normpath(&href::join(&self.opf_dir, path))
    }

    /// Returns the source archive, if the manifest was loaded from one.
    pub fn source_archive(&self) -> Option<&Rc<SourceArchive>> {
        self.source.as_ref()
    }

    /// Returns the scratch store backing materialized resources.
    pub fn scratch(&self) -> &Rc<TemporaryFilesystem> {
        &self.scratch
    }

    /// Returns the options.
    pub fn options(&self) -> &ManifestOptions {
        &self.options
    }

    /// Returns the number of resources.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns `true` if there are no resources.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Returns `true` if `path` names a resource.
    pub fn exists(&self, path: &str) -> bool {
        self.paths.contains_key(path.trim_matches('/'))
    }

    /// Returns the id of the resource at `path`.
    pub fn id_of(&self, path: &str) -> Option<&str> {
        self.paths.get(path.trim_matches('/')).map(String::as_str)
    }

    /// Looks up a resource by id.
    pub fn get(&self, id: &str) -> Option<Resource<'_>> {
        let (id, path) = self.ids.get_key_value(id)?;
        let element = self.item(id)?;
        Some(Resource::new(self, element, id, path))
    }

    /// Looks up a resource by path.
    pub fn get_by_path(&self, path: &str) -> Option<Resource<'_>> {
        let id = self.id_of(path)?.to_string();
        self.get(&id)
    }

    /// Returns a forwarding view for path-scoped calls on one resource.
    pub fn get_mut(&mut self, id: &str) -> Option<ResourceMut<'_>> {
        if self.ids.contains_key(id) {
            Some(ResourceMut::new(self, id.to_string()))
        } else {
            None
        }
    }

    /// Iterates over resources in document order.
    pub fn iter(&self) -> impl Iterator<Item = Resource<'_>> {
        self.element
            .elements()
            .filter(|e| e.local_name() == "item")
            .filter_map(move |e| {
                let (id, path) = self.ids.get_key_value(e.attr("id")?)?;
                Some(Resource::new(self, e, id, path))
            })
    }

    /// Returns resource ids in document order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.iter().map(|r| r.id())
    }

    /// Returns resource paths in sorted order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.paths.keys().map(String::as_str)
    }

    /// Returns the storage handle bound to `path`, if any.
    pub fn handle(&self, path: &str) -> Option<&Handle> {
        self.handles.get(path.trim_matches('/'))
    }

    /// Adds a resource.
    ///
    /// `path` is trimmed of slashes. Without `id` one is generated by the
    /// configured [`IdGenerator`]; without `media_type` it is guessed from
    /// the extension.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidPath`] for an empty path
    /// - [`Error::AlreadyExists`] if the path is taken
    /// - [`Error::IdAlreadyExists`] if the id is taken
    /// - [`Error::InvalidArgument`] if a [`Source::Path`] is not a file
    /// - [`Error::NotFound`] if a [`Source::ArchiveEntry`] does not exist
    /// - [`Error::Io`] if copying a reader fails
    pub fn add(
        &mut self,
        path: &str,
        source: Source,
        id: Option<&str>,
        media_type: Option<&str>,
    ) -> Result<ResourceMut<'_>> {
        let path = normalize(path)?;
        if self.paths.contains_key(&path) {
            return Err(Error::already_exists(path));
        }
        let id = match id {
            Some("") => return Err(Error::InvalidArgument("empty id".into())),
            Some(id) if self.is_id_taken(id) => {
                return Err(Error::IdAlreadyExists { id: id.to_string() });
            }
            Some(id) => id.to_string(),
            None => self.generate_id(&path),
        };
        let media_type = match media_type.map(str::trim) {
            Some(mt) if !mt.is_empty() => mt.to_string(),
            _ => self.options.media_types.guess(&path).to_string(),
        };
        let handle = self.bind_source(source)?;

        let item = Element::new(self.qualified("item"))
            .with_attr("id", &id)
            .with_attr("href", &href::escape(&path))
            .with_attr("media-type", &media_type);
        self.element.push(item);
        self.ids.insert(id.clone(), path.clone());
        self.paths.insert(path.clone(), id.clone());
        self.handles.insert(path, handle);
        Ok(ResourceMut::new(self, id))
    }

    /// Removes the resource at `path`, releasing scratch storage.
    ///
    /// Archive entries are left untouched inside the source archive.
    pub fn remove(&mut self, path: &str) -> Result<()> {
        let path = normalize(path)?;
        let id = self
            .paths
            .get(&path)
            .cloned()
            .ok_or_else(|| Error::not_found(&path))?;
        self.detach(&id, &path);
        Ok(())
    }

    /// Removes a resource by id, returning its path.
    pub fn pop(&mut self, id: &str) -> Result<String> {
        let path = self
            .ids
            .get(id)
            .cloned()
            .ok_or_else(|| Error::IdNotFound { id: id.to_string() })?;
        self.detach(id, &path);
        Ok(path)
    }

    /// Sets an attribute on a resource's item.
    ///
    /// `id` cannot be changed. Setting `href` renames the resource (without
    /// link repair). An empty `media-type` is replaced by the guessed type.
    pub fn set_attribute(&mut self, id: &str, key: &str, value: &str) -> Result<()> {
        let path = self
            .ids
            .get(id)
            .cloned()
            .ok_or_else(|| Error::IdNotFound { id: id.to_string() })?;
        match key {
            "id" => Err(Error::InvalidArgument("the id attribute is immutable".into())),
            "href" => {
                let target = Href::from_escaped(value)?;
                self.rename(&path, target.as_str(), false).map(drop)
            }
            _ => {
                let value = if key == "media-type" && value.trim().is_empty() {
                    self.options.media_types.guess(&path).to_string()
                } else {
                    value.to_string()
                };
                self.item_mut(id)?.set_attr(key, &value);
                Ok(())
            }
        }
    }

    /// Removes an attribute from a resource's item, returning its value.
    ///
    /// `id` and `href` cannot be removed.
    pub fn remove_attribute(&mut self, id: &str, key: &str) -> Result<Option<String>> {
        if !self.ids.contains_key(id) {
            return Err(Error::IdNotFound { id: id.to_string() });
        }
        if matches!(key, "id" | "href") {
            return Err(Error::InvalidArgument(format!(
                "the {} attribute cannot be removed",
                key
            )));
        }
        Ok(self.item_mut(id)?.remove_attr(key))
    }

    fn detach(&mut self, id: &str, path: &str) {
        self.paths.remove(path);
        self.ids.remove(id);
        self.element
            .children_mut()
            .retain(|node| !is_item_with_id(node, id));
        if let Some(handle) = self.handles.remove(path) {
            if let Err(e) = handle.remove() {
                log::warn!("failed to release storage of {}: {}", path, e);
            }
        }
    }

    pub(crate) fn item(&self, id: &str) -> Option<&Element> {
        self.element
            .elements()
            .find(|e| e.local_name() == "item" && e.attr("id") == Some(id))
    }

    pub(crate) fn item_mut(&mut self, id: &str) -> Result<&mut Element> {
        self.element
            .elements_mut()
            .find(|e| e.local_name() == "item" && e.attr("id") == Some(id))
            .ok_or_else(|| {
                Error::StructuralCorruption(format!(
                    "item {} is indexed but missing from the manifest element",
                    id
                ))
            })
    }

    fn set_item_href(&mut self, id: &str, path: &str) {
        let escaped = href::escape(path);
        for item in self
            .element
            .elements_mut()
            .filter(|e| e.local_name() == "item" && e.attr("id") == Some(id))
        {
            item.set_attr("href", &escaped);
        }
    }

    /// Qualifies a local name with the manifest element's prefix.
    fn qualified(&self, local: &str) -> String {
        match self.element.name().split_once(':') {
            Some((prefix, _)) => format!("{}:{}", prefix, local),
            None => local.to_string(),
        }
    }

    fn is_id_taken(&self, id: &str) -> bool {
        self.ids.contains_key(id) || self.item(id).is_some()
    }

    fn generate_id(&self, path: &str) -> String {
        self.options
            .id_generator
            .generate(path, &|candidate| self.is_id_taken(candidate))
    }

    fn temp_handle(&self) -> Handle {
        let name = uuid::Uuid::new_v4().simple().to_string();
        Handle::new(Storage::TempFile(TempFile::new(Rc::clone(&self.scratch), name)))
    }

    fn bind_source(&self, source: Source) -> Result<Handle> {
        let storage = match source {
            Source::Empty => return Ok(self.temp_handle()),
            Source::Path(file) => {
                if !file.is_file() {
                    return Err(Error::InvalidArgument(format!(
                        "not a file: {}",
                        file.display()
                    )));
                }
                Storage::External(ExternalOpener::from_path(file))
            }
            Source::ArchiveEntry(name) => {
                let archive = self
                    .source
                    .as_ref()
                    .ok_or_else(|| Error::InvalidArgument("no source archive".into()))?;
                if !archive.contains(&name) {
                    return Err(Error::not_found(name));
                }
                Storage::ArchiveEntry(ArchiveEntry::new(Rc::clone(archive), name))
            }
            Source::Reader(mut reader) => return self.copy_into_temp(&mut reader),
            Source::Bytes(bytes) => return self.copy_into_temp(&mut bytes.as_slice()),
            Source::Opener(opener) => Storage::External(opener),
        };
        Ok(Handle::new(storage))
    }

    fn copy_into_temp(&self, reader: &mut dyn Read) -> Result<Handle> {
        let handle = self.temp_handle();
        if let Err(e) = fill(&handle, reader, self.options.chunk_size) {
            let _ = handle.remove();
            return Err(e);
        }
        Ok(handle)
    }
}

impl fmt::Debug for Manifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manifest")
            .field("opf_dir", &self.opf_dir)
            .field("resources", &self.paths)
            .field("bound", &self.handles.len())
            .finish()
    }
}

/// Validates and trims a resource path.
pub(crate) fn normalize(path: &str) -> Result<String> {
    Href::new(path).map(Href::into_string)
}

fn is_item_with_id(node: &Node, id: &str) -> bool {
    node.as_element()
        .is_some_and(|e| e.local_name() == "item" && e.attr("id") == Some(id))
}

/// Truncates `handle` and fills it from `reader`.
fn fill(handle: &Handle, reader: &mut dyn Read, chunk_size: usize) -> Result<u64> {
    let mut raw = handle.open_raw(OpenMode::WRITE_BINARY)?;
    let written = copy_chunked(reader, &mut raw, chunk_size)?;
    raw.flush()?;
    Ok(written)
}

/// Copies through a buffer of `chunk_size` bytes.
pub(crate) fn copy_chunked(
    reader: &mut dyn Read,
    writer: &mut dyn Write,
    chunk_size: usize,
) -> std::io::Result<u64> {
    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => return Ok(total),
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        writer.write_all(&buf[..n])?;
        total += n as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendKind;
    use crate::media_type::DEFAULT_MEDIA_TYPE;

    fn manifest() -> Manifest {
        Manifest::new().unwrap()
    }

    #[test]
    fn test_add_defaults() {
        let mut m = manifest();
        m.add("/Text/a.xhtml/", Source::Empty, None, None).unwrap();
        let r = m.get_by_path("Text/a.xhtml").unwrap();
        assert!(r.id().starts_with("id-"));
        assert_eq!(r.media_type(), "application/xhtml+xml");
        assert_eq!(r.kind(), Some(BackendKind::TempFile));

        m.add("blob", Source::Empty, Some("b"), None).unwrap();
        assert_eq!(m.get("b").unwrap().media_type(), DEFAULT_MEDIA_TYPE);
        assert_eq!(m.len(), 2);
    }

    #[test]
    fn test_add_collisions_leave_state_unchanged() {
        let mut m = manifest();
        m.add("a.css", Source::Empty, Some("a"), None).unwrap();

        let err = m.add("a.css", Source::Empty, None, None).err().unwrap();
        assert!(err.is_already_exists());
        let err = m.add("b.css", Source::Empty, Some("a"), None).err().unwrap();
        assert!(matches!(err, Error::IdAlreadyExists { .. }));
        let err = m.add("//", Source::Empty, None, None).err().unwrap();
        assert!(matches!(err, Error::InvalidPath(_)));

        assert_eq!(m.len(), 1);
        assert_eq!(m.element().elements().count(), 1);
        assert!(!m.exists("b.css"));
    }

    #[test]
    fn test_add_escapes_href() {
        let mut m = manifest();
        m.add("Text/chapter 1#x.xhtml", Source::Empty, Some("c"), None)
            .unwrap();
        let r = m.get("c").unwrap();
        assert_eq!(r.path(), "Text/chapter 1#x.xhtml");
        assert_eq!(r.href(), "Text/chapter%201%23x.xhtml");
    }

    #[test]
    fn test_remove_and_pop() {
        let mut m = manifest();
        m.add("a.txt", Source::from(b"x".to_vec()), Some("a"), None)
            .unwrap();
        m.add("b.txt", Source::Empty, Some("b"), None).unwrap();
        let name = m.handle("a.txt").unwrap().temp_name().unwrap().to_string();
        assert!(m.scratch().exists(&name));

        m.remove("a.txt").unwrap();
        assert!(!m.scratch().exists(&name));
        assert!(m.remove("a.txt").unwrap_err().is_not_found());

        assert_eq!(m.pop("b").unwrap(), "b.txt");
        assert!(matches!(m.pop("b"), Err(Error::IdNotFound { .. })));
        assert!(m.is_empty());
        assert_eq!(m.element().elements().count(), 0);
    }

    #[test]
    fn test_set_attribute_rules() {
        let mut m = manifest();
        m.add("a.xhtml", Source::Empty, Some("a"), None).unwrap();

        assert!(m.set_attribute("a", "id", "z").is_err());
        m.set_attribute("a", "properties", "nav").unwrap();
        assert_eq!(m.get("a").unwrap().attr("properties"), Some("nav"));

        m.set_attribute("a", "media-type", "").unwrap();
        assert_eq!(m.get("a").unwrap().media_type(), "application/xhtml+xml");

        m.set_attribute("a", "href", "Text/b%20c.xhtml").unwrap();
        assert_eq!(m.get("a").unwrap().path(), "Text/b c.xhtml");
        assert!(!m.exists("a.xhtml"));

        assert!(m.remove_attribute("a", "href").is_err());
        assert_eq!(
            m.remove_attribute("a", "properties").unwrap(),
            Some("nav".to_string())
        );
        assert!(matches!(
            m.set_attribute("missing", "x", "y"),
            Err(Error::IdNotFound { .. })
        ));
    }

    #[test]
    fn test_prefixed_manifest_element() {
        let element = Element::new("opf:manifest");
        let (mut m, warnings) =
            Manifest::from_element(element, "OEBPS", None, ManifestOptions::default()).unwrap();
        assert!(warnings.is_empty());
        m.add("a.css", Source::Empty, Some("a"), None).unwrap();
        assert_eq!(m.element().elements().next().unwrap().name(), "opf:item");
        assert_eq!(m.archive_name("a.css"), "OEBPS/a.css");
        assert_eq!(m.archive_name("../a.css"), "a.css");
    }
}
