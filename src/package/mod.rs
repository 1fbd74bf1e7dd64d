//! Package sessions: an EPUB opened for editing.
//!
//! A [`Package`] ties together the source archive (opened once, read-only),
//! the package document, its [`Manifest`] and its [`Spine`]. The
//! `<manifest>` and `<spine>` elements are owned by those two types while
//! the session is open and put back into the tree when the package is
//! serialized by [`pack`](Package::pack).
//!
//! # Example
//!
//! ```rust
//! use epubfs::{Package, PackOptions, Source};
//!
//! # fn main() -> epubfs::Result<()> {
//! let mut package = Package::new()?;
//! package
//!     .manifest_mut()
//!     .add("Text/ch1.xhtml", Source::from(b"<html/>".to_vec()), Some("ch1"), None)?;
//! package.spine_mut().push("ch1", true)?;
//!
//! let (bytes, result) = package.pack_to_vec(&PackOptions::default())?;
//! assert_eq!(result.resources_written, 1);
//!
//! let reopened = Package::open_reader(std::io::Cursor::new(bytes))?;
//! assert_eq!(reopened.opf_path(), "OEBPS/content.opf");
//! assert!(reopened.spine().contains("ch1"));
//! # Ok(())
//! # }
//! ```

mod container;
mod pack;

use std::collections::HashSet;
use std::fmt;
use std::io::{Read, Seek};
use std::path::Path;
use std::rc::Rc;

pub use pack::{Compression, PackOptions, PackResult};

use crate::backend::SourceArchive;
use crate::descriptor::{Document, Element};
use crate::href::{self, Href};
use crate::manifest::{Manifest, ManifestOptions};
use crate::spine::Spine;
use crate::timestamp::Timestamp;
use crate::warning::Warning;
use crate::{Error, Result};

/// Path of the container pointer file.
pub const CONTAINER_PATH: &str = "META-INF/container.xml";

/// Path of the mimetype entry.
pub const MIMETYPE_PATH: &str = "mimetype";

/// Contents of the mimetype entry.
pub const MIMETYPE: &[u8] = b"application/epub+zip";

/// Package document path of a new package.
pub const DEFAULT_OPF_PATH: &str = "OEBPS/content.opf";

const OPF_NAMESPACE: &str = "http://www.idpf.org/2007/opf";
const DC_NAMESPACE: &str = "http://purl.org/dc/elements/1.1/";

/// An EPUB package opened for editing.
pub struct Package {
    document: Document,
    manifest: Manifest,
    spine: Spine,
    opf_path: String,
    container: Option<Vec<u8>>,
    original_items: HashSet<String>,
    warnings: Vec<Warning>,
}

impl Package {
    /// Creates an empty EPUB 3 package at [`DEFAULT_OPF_PATH`].
    ///
    /// The metadata block carries a `urn:uuid:` identifier, language `en`,
    /// an empty title and a `dcterms:modified` timestamp.
    pub fn new() -> Result<Self> {
        Self::with_options(ManifestOptions::default())
    }

    /// Creates an empty package with manifest options.
    pub fn with_options(options: ManifestOptions) -> Result<Self> {
        let mut metadata = Element::new("metadata")
            .with_attr("xmlns:dc", DC_NAMESPACE)
            .with_attr("xmlns:opf", OPF_NAMESPACE);
        metadata.push(
            Element::new("dc:identifier")
                .with_attr("id", "BookId")
                .with_text(&format!("urn:uuid:{}", uuid::Uuid::new_v4())),
        );
        metadata.push(Element::new("dc:language").with_text("en"));
        metadata.push(Element::new("dc:title"));
        metadata.push(
            Element::new("meta")
                .with_attr("property", "dcterms:modified")
                .with_text(&Timestamp::now().to_iso8601()),
        );

        let mut root = Element::new("package")
            .with_attr("xmlns", OPF_NAMESPACE)
            .with_attr("version", "3.0")
            .with_attr("unique-identifier", "BookId");
        root.push(metadata);
        root.push(Element::new("manifest"));
        root.push(Element::new("spine"));

        let opf_dir = href::dirname(DEFAULT_OPF_PATH);
        let (manifest, warnings) =
            Manifest::from_element(Element::new("manifest"), opf_dir, None, options)?;
        Ok(Self {
            document: Document::new(root),
            manifest,
            spine: Spine::new(),
            opf_path: DEFAULT_OPF_PATH.to_string(),
            container: None,
            original_items: HashSet::new(),
            warnings,
        })
    }

    /// Opens an EPUB file.
    ///
    /// # Errors
    ///
    /// - [`Error::Io`] or [`Error::Zip`] if the file is not a readable zip
    /// - [`Error::InvalidPackage`] if the container file or the package
    ///   document it names is missing, or the root is not `<package>`
    /// - [`Error::Xml`] if either document is malformed
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, ManifestOptions::default())
    }

    /// Opens an EPUB file with manifest options.
    pub fn open_with(path: impl AsRef<Path>, options: ManifestOptions) -> Result<Self> {
        Self::load(SourceArchive::open(path)?, options)
    }

    /// Opens an EPUB from a seekable reader.
    pub fn open_reader(reader: impl Read + Seek + 'static) -> Result<Self> {
        Self::open_reader_with(reader, ManifestOptions::default())
    }

    /// Opens an EPUB from a seekable reader with manifest options.
    pub fn open_reader_with(
        reader: impl Read + Seek + 'static,
        options: ManifestOptions,
    ) -> Result<Self> {
        Self::load(SourceArchive::from_reader(reader)?, options)
    }

    fn load(archive: Rc<SourceArchive>, options: ManifestOptions) -> Result<Self> {
        let container = read_required(&archive, CONTAINER_PATH)?;
        let opf_path = container::rootfile(&container)?;
        let mut document = Document::parse(&read_required(&archive, &opf_path)?)?;
        if document.root.local_name() != "package" {
            return Err(Error::InvalidPackage(format!(
                "{} has root <{}>, expected <package>",
                opf_path,
                document.root.name()
            )));
        }

        let manifest_element = take_section(&mut document.root, "manifest");
        let spine_element = take_section(&mut document.root, "spine");
        let opf_dir = href::dirname(&opf_path).to_string();
        let original_items = manifest_element
            .elements()
            .filter(|e| e.local_name() == "item")
            .filter_map(|e| Href::from_escaped(e.attr("href")?).ok())
            .map(|path| href::normpath(&href::join(&opf_dir, path.as_str())))
            .collect();

        let (manifest, mut warnings) =
            Manifest::from_element(manifest_element, &opf_dir, Some(archive), options)?;
        let mut spine = Spine::from_element(spine_element);
        warnings.extend(spine.reconcile(&manifest));
        log::debug!(
            "opened package {} with {} resources and {} warnings",
            opf_path,
            manifest.len(),
            warnings.len()
        );

        Ok(Self {
            document,
            manifest,
            spine,
            opf_path,
            container: Some(container),
            original_items,
            warnings,
        })
    }

    /// Returns the manifest.
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Returns the manifest for editing.
    pub fn manifest_mut(&mut self) -> &mut Manifest {
        &mut self.manifest
    }

    /// Returns the spine.
    pub fn spine(&self) -> &Spine {
        &self.spine
    }

    /// Returns the spine for editing.
    pub fn spine_mut(&mut self) -> &mut Spine {
        &mut self.spine
    }

    /// Returns the `<package>` element.
    ///
    /// Its `<manifest>` and `<spine>` children are empty placeholders; the
    /// live elements belong to [`manifest`](Self::manifest) and
    /// [`spine`](Self::spine).
    pub fn document(&self) -> &Element {
        &self.document.root
    }

    /// Returns the `<package>` element for editing metadata.
    pub fn document_mut(&mut self) -> &mut Element {
        &mut self.document.root
    }

    /// Returns the container path of the package document.
    pub fn opf_path(&self) -> &str {
        &self.opf_path
    }

    /// Returns the directory resource paths are relative to.
    pub fn opf_dir(&self) -> &str {
        self.manifest.opf_dir()
    }

    /// Returns the repairs made while opening.
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    /// Returns the source archive, if the package was opened from one.
    pub fn source_archive(&self) -> Option<&Rc<SourceArchive>> {
        self.manifest.source_archive()
    }

    /// Removes a resource and its spine entry.
    pub fn remove(&mut self, path: &str) -> Result<()> {
        let id = self
            .manifest
            .id_of(path)
            .map(str::to_string)
            .ok_or_else(|| Error::not_found(path))?;
        self.manifest.remove(path)?;
        self.spine.remove(&id);
        Ok(())
    }

    /// Reconciles the manifest with its element, then the spine with the
    /// manifest.
    pub fn reconcile(&mut self) -> Vec<Warning> {
        let mut warnings = self.manifest.reconcile();
        warnings.extend(self.spine.reconcile(&self.manifest));
        warnings
    }

    /// Closes the source archive and deletes scratch storage.
    ///
    /// Dropping the package does the same.
    pub fn close(self) {
        drop(self);
    }

    /// Returns the package document as it would be written, keeping only
    /// items and itemrefs whose id satisfies `keep`.
    pub(crate) fn serialize_document(&self, keep: impl Fn(&str) -> bool) -> Vec<u8> {
        let mut manifest = self.manifest.element().clone();
        manifest.children_mut().retain(|node| {
            node.as_element().is_none_or(|e| {
                e.local_name() != "item" || e.attr("id").is_some_and(&keep)
            })
        });
        let mut spine = self.spine.clone();
        spine.retain(&keep);

        let mut document = self.document.clone();
        put_section(&mut document.root, "manifest", manifest);
        put_section(&mut document.root, "spine", spine.element().clone());
        document.to_bytes()
    }

    pub(crate) fn original_container(&self) -> Option<&[u8]> {
        self.container.as_deref()
    }

    pub(crate) fn is_original_item(&self, name: &str) -> bool {
        self.original_items.contains(name)
    }
}

impl Drop for Package {
    fn drop(&mut self) {
        if let Some(archive) = self.manifest.source_archive() {
            archive.close();
        }
        self.manifest.scratch().cleanup();
    }
}

impl fmt::Debug for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Package")
            .field("opf_path", &self.opf_path)
            .field("manifest", &self.manifest)
            .field("spine", &self.spine.len())
            .finish()
    }
}

fn read_required(archive: &SourceArchive, name: &str) -> Result<Vec<u8>> {
    archive.read(name).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::InvalidPackage(format!("missing {}", name))
        } else {
            Error::Io(e)
        }
    })
}

fn qualified(parent: &str, local: &str) -> String {
    match parent.split_once(':') {
        Some((prefix, _)) => format!("{}:{}", prefix, local),
        None => local.to_string(),
    }
}

/// Swaps a section of the package element for an empty placeholder,
/// appending one if the section is absent.
fn take_section(root: &mut Element, local: &str) -> Element {
    let name = qualified(root.name(), local);
    if let Some(index) = root.position(local) {
        if let Some(section) = root.children_mut()[index].as_element_mut() {
            return std::mem::replace(section, Element::new(name));
        }
    }
    root.push(Element::new(name.clone()));
    Element::new(name)
}

fn put_section(root: &mut Element, local: &str, section: Element) {
    if let Some(index) = root.position(local) {
        if let Some(slot) = root.children_mut()[index].as_element_mut() {
            *slot = section;
            return;
        }
    }
    root.push(section);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::Source;

    #[test]
    fn test_new_package_template() {
        let package = Package::new().unwrap();
        assert_eq!(package.opf_path(), DEFAULT_OPF_PATH);
        assert_eq!(package.opf_dir(), "OEBPS");
        assert!(package.manifest().is_empty());
        assert!(package.warnings().is_empty());

        let root = package.document();
        assert_eq!(root.attr("version"), Some("3.0"));
        let identifier = root.find("metadata/identifier").unwrap();
        assert!(identifier.text().starts_with("urn:uuid:"));
        assert_eq!(root.find("metadata/language").unwrap().text(), "en");
        let modified = root
            .find("metadata")
            .unwrap()
            .elements()
            .find(|e| e.attr("property") == Some("dcterms:modified"))
            .unwrap();
        assert!(Timestamp::parse_iso8601(&modified.text()).is_some());
    }

    #[test]
    fn test_serialize_keeps_section_order() {
        let mut package = Package::new().unwrap();
        package
            .manifest_mut()
            .add("a.xhtml", Source::Empty, Some("a"), None)
            .unwrap();
        package
            .manifest_mut()
            .add("b.xhtml", Source::Empty, Some("b"), None)
            .unwrap();
        package.spine_mut().push("a", true).unwrap();
        package.spine_mut().push("b", true).unwrap();

        let bytes = package.serialize_document(|id| id != "b");
        let doc = Document::parse(&bytes).unwrap();
        let names: Vec<&str> = doc.root.elements().map(|e| e.local_name()).collect();
        assert_eq!(names, ["metadata", "manifest", "spine"]);
        assert_eq!(doc.root.find("manifest").unwrap().elements().count(), 1);
        assert_eq!(doc.root.find("spine").unwrap().elements().count(), 1);
        assert_eq!(package.manifest().len(), 2);
        assert_eq!(package.spine().len(), 2);
    }

    #[test]
    fn test_take_section_prefixed() {
        let mut root = Element::new("opf:package");
        root.push(Element::new("opf:spine").with_attr("toc", "ncx"));
        let manifest = take_section(&mut root, "manifest");
        let spine = take_section(&mut root, "spine");
        assert_eq!(manifest.name(), "opf:manifest");
        assert_eq!(spine.attr("toc"), Some("ncx"));
        assert_eq!(root.to_xml_string(), "<opf:package><opf:spine/><opf:manifest/></opf:package>");
    }

    #[test]
    fn test_remove_drops_itemref() {
        let mut package = Package::new().unwrap();
        package
            .manifest_mut()
            .add("a.xhtml", Source::Empty, Some("a"), None)
            .unwrap();
        package.spine_mut().push("a", true).unwrap();
        package.remove("a.xhtml").unwrap();
        assert!(package.spine().is_empty());
        assert!(package.remove("a.xhtml").unwrap_err().is_not_found());
    }
}
