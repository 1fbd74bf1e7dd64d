//! # epubfs
//!
//! A virtual filesystem over EPUB packages.
//!
//! This crate opens an EPUB (a zip container plus an XML package document)
//! and exposes its resources as a mutable, path-addressed filesystem layered
//! on top of the read-only source archive. Resources can be added, read,
//! written, renamed and removed; renames can repair every hyperlink that
//! points at the moved resources; and the live state is written back into a
//! new archive that never references a missing entry.
//!
//! ## Quick Start
//!
//! ### Editing a Package
//!
//! ```rust,no_run
//! use epubfs::{Package, PackOptions, Result};
//!
//! fn main() -> Result<()> {
//!     let mut package = Package::open("book.epub")?;
//!     for warning in package.warnings() {
//!         eprintln!("repaired: {}", warning);
//!     }
//!
//!     // List resources
//!     for resource in package.manifest().iter() {
//!         println!("{} {} ({})", resource.id(), resource.path(), resource.media_type());
//!     }
//!
//!     // Rename a chapter and fix every link to it
//!     let renamed = package
//!         .manifest_mut()
//!         .rename("Text/ch1.xhtml", "Text/chapter-01.xhtml", true)?;
//!     println!("rewrote links in {} resources", renamed.changed.len());
//!
//!     let result = package.pack("book-edited.epub", &PackOptions::default())?;
//!     println!("wrote {} entries", result.entries_written);
//!     Ok(())
//! }
//! ```
//!
//! ### Creating a Package
//!
//! ```rust
//! use epubfs::{Package, PackOptions, Result, Source};
//!
//! fn main() -> Result<()> {
//!     let mut package = Package::new()?;
//!     let manifest = package.manifest_mut();
//!     manifest.add("Styles/main.css", Source::from(b"p { margin: 0 }".to_vec()), Some("css"), None)?;
//!     manifest.add("Text/ch1.xhtml", Source::Empty, Some("ch1"), None)?;
//!     manifest.write_text(
//!         "Text/ch1.xhtml",
//!         r#"<html><head><link href="../Styles/main.css"/></head></html>"#,
//!     )?;
//!     package.spine_mut().push("ch1", true)?;
//!
//!     let (bytes, result) = package.pack_to_vec(&PackOptions::default())?;
//!     assert_eq!(result.resources_written, 2);
//!     assert!(!bytes.is_empty());
//!     Ok(())
//! }
//! ```
//!
//! ## Storage Backends
//!
//! Every resource is bound to one [`Handle`] over one of three backends:
//!
//! | Backend | Capabilities | Created by |
//! |---------|--------------|------------|
//! | [`ArchiveEntry`] | read only | opening a package |
//! | [`TempFile`] | read/write | adding bytes, or materializing |
//! | External ([`ExternalOpener`]) | declared by the caller | [`Source::Opener`], [`Source::Path`] |
//!
//! Opening a read-only resource with write intent copies it into the
//! session's [`TemporaryFilesystem`] first, so the source archive is never
//! modified.
//!
//! ## Error Handling
//!
//! All operations return [`Result<T>`]. Collisions and unknown paths are
//! hard errors; malformed package documents are repaired and reported as
//! [`Warning`]s:
//!
//! ```rust
//! use epubfs::{Error, Manifest, Source};
//!
//! let mut manifest = Manifest::new().unwrap();
//! manifest.add("a.css", Source::Empty, Some("a"), None).unwrap();
//! match manifest.add("a.css", Source::Empty, None, None) {
//!     Err(Error::AlreadyExists { path }) => assert_eq!(path, "a.css"),
//!     other => panic!("unexpected: {:?}", other.map(|r| r.id().to_string())),
//! }
//! ```
//!
//! ## Logging
//!
//! The crate logs through the [`log`] facade and installs no logger.
//! Repairs and omissions are logged at `warn` level, storage swaps and
//! pack summaries at `debug`.
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `deflate` | Yes | Deflate compression when packing |
//!
//! ## Minimum Supported Rust Version (MSRV)
//!
//! This crate requires **Rust 1.85** or later.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod backend;
pub mod descriptor;
pub mod error;
pub mod glob;
pub mod href;
pub mod manifest;
pub mod media_type;
pub mod mode;
pub mod package;
pub mod remap;
pub mod spine;
pub mod stream;
pub mod timestamp;
pub mod vfs;
pub mod warning;

pub use backend::{
    ArchiveEntry, BackendKind, ExternalOpener, Handle, SourceArchive, Storage, TempFile,
};
pub use error::{Error, Result};
pub use glob::Glob;
pub use href::Href;
pub use manifest::{
    BatchRenameResult, IdGenerator, Manifest, ManifestOptions, OverwritePolicy, RenameResult,
    Resource, ResourceMut, Source,
};
pub use media_type::MediaTypes;
pub use mode::{Access, Buffering, Capabilities, Newline, OpenMode, OpenOptions, TextErrors};
pub use package::{Compression, PackOptions, PackResult, Package};
pub use remap::{PathMap, RemapResult};
pub use spine::{ItemRef, Spine};
pub use stream::{ByteStream, RawStream, ReadOnly, Stream, TextStream};
pub use timestamp::Timestamp;
pub use vfs::{DiskProvider, MemoryProvider, Provider, RootFilesystem, Stat, TemporaryFilesystem};
pub use warning::{Warning, WarningKind};
