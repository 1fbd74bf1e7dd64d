//! Error types for package and manifest operations.
//!
//! This module provides the [`Error`] enum which represents all possible
//! failure modes when working with EPUB packages, along with a convenient
//! [`Result<T>`] type alias.
//!
//! # Error Handling
//!
//! All fallible operations in this crate return `Result<T, Error>`. Index
//! collisions (an existing path or id) are always surfaced as hard errors,
//! while structural problems found in a package document are repaired and
//! reported as [`Warning`](crate::Warning)s instead.
//!
//! ```rust,no_run
//! use epubfs::{Error, Package};
//!
//! fn add_chapter(package: &mut Package) -> epubfs::Result<()> {
//!     match package.manifest_mut().add("Text/ch1.xhtml", Default::default(), None, None) {
//!         Ok(_) => Ok(()),
//!         Err(Error::AlreadyExists { path }) => {
//!             eprintln!("{} is already in the manifest", path);
//!             Ok(())
//!         }
//!         Err(e) => Err(e),
//!     }
//! }
//! ```

use std::io;

/// The main error type for package operations.
///
/// # Error Categories
///
/// | Category | Variants | Typical Cause |
/// |----------|----------|---------------|
/// | Lookup | [`NotFound`][Self::NotFound], [`IdNotFound`][Self::IdNotFound] | Unknown path or id |
/// | Collision | [`AlreadyExists`][Self::AlreadyExists], [`IdAlreadyExists`][Self::IdAlreadyExists] | Path or id in use |
/// | Arguments | [`InvalidArgument`][Self::InvalidArgument], [`InvalidPath`][Self::InvalidPath], [`InvalidMode`][Self::InvalidMode] | Malformed input |
/// | Capability | [`Unsupported`][Self::Unsupported] | Mode exceeds backend capability |
/// | Structure | [`StructuralCorruption`][Self::StructuralCorruption] | Inconsistent package document |
/// | I/O | [`Io`][Self::Io], [`Zip`][Self::Zip] | Backend read/write failures |
/// | Format | [`Xml`][Self::Xml], [`InvalidPackage`][Self::InvalidPackage] | Unreadable container |
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// An I/O error occurred in a storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The zip container could not be read or written.
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// A package document or container file is not well-formed XML.
    #[error("XML error: {0}")]
    Xml(String),

    /// The container does not describe a usable package.
    ///
    /// Returned when `META-INF/container.xml` is missing, names no package
    /// document, or the package document itself cannot be found.
    #[error("Invalid package: {0}")]
    InvalidPackage(String),

    /// No resource is registered at the given path.
    #[error("No such resource: {path}")]
    NotFound {
        /// The path that was looked up.
        path: String,
    },

    /// No resource is registered under the given id.
    #[error("No such resource id: {id}")]
    IdNotFound {
        /// The id that was looked up.
        id: String,
    },

    /// A resource already occupies the given path.
    ///
    /// # Recovery
    ///
    /// Choose a different path, remove the existing resource first, or use
    /// [`Manifest::replace`](crate::Manifest::replace) with
    /// [`OverwritePolicy::Overwrite`](crate::OverwritePolicy::Overwrite).
    #[error("Resource already exists: {path}")]
    AlreadyExists {
        /// The path that is already in use.
        path: String,
    },

    /// A resource already uses the given id.
    #[error("Resource id already exists: {id}")]
    IdAlreadyExists {
        /// The id that is already in use.
        id: String,
    },

    /// An argument was rejected.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A resource path is malformed (empty, or contains a NUL byte).
    #[error("Invalid resource path: {0}")]
    InvalidPath(String),

    /// An open mode string is not one of the legal permutations.
    #[error("Invalid open mode: {0:?}")]
    InvalidMode(String),

    /// The requested open mode needs capabilities the backend does not have.
    #[error("Open mode {mode:?} unsupported by {backend} backend")]
    Unsupported {
        /// The rejected mode.
        mode: String,
        /// The backend kind that rejected it.
        backend: &'static str,
    },

    /// The package document is internally inconsistent.
    ///
    /// Reconciliation repairs these in place and reports them as warnings;
    /// this variant only surfaces from strict validation helpers.
    #[error("Structural corruption: {0}")]
    StructuralCorruption(String),
}

impl Error {
    /// Returns `true` for unknown paths and ids.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. } | Error::IdNotFound { .. })
            || matches!(self, Error::Io(e) if e.kind() == io::ErrorKind::NotFound)
    }

    /// Returns `true` for path and id collisions.
    pub fn is_already_exists(&self) -> bool {
        matches!(
            self,
            Error::AlreadyExists { .. } | Error::IdAlreadyExists { .. }
        )
    }

    /// Returns `true` if a backend rejected the requested open mode.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Error::Unsupported { .. })
    }

    /// Returns `true` if the failure happened in a storage backend.
    pub fn is_io(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Zip(_))
    }

    /// Returns the resource path associated with this error, if any.
    pub fn path(&self) -> Option<&str> {
        match self {
            Error::NotFound { path } | Error::AlreadyExists { path } => Some(path.as_str()),
            _ => None,
        }
    }

    /// Creates a NotFound error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Error::NotFound { path: path.into() }
    }

    /// Creates an AlreadyExists error.
    pub fn already_exists(path: impl Into<String>) -> Self {
        Error::AlreadyExists { path: path.into() }
    }

    /// Creates an Unsupported error.
    pub fn unsupported(mode: impl Into<String>, backend: &'static str) -> Self {
        Error::Unsupported {
            mode: mode.into(),
            backend,
        }
    }

    pub(crate) fn xml(err: impl std::fmt::Display) -> Self {
        Error::Xml(err.to_string())
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(e) => e,
            Error::NotFound { .. } | Error::IdNotFound { .. } => {
                io::Error::new(io::ErrorKind::NotFound, err)
            }
            Error::AlreadyExists { .. } | Error::IdAlreadyExists { .. } => {
                io::Error::new(io::ErrorKind::AlreadyExists, err)
            }
            Error::Unsupported { .. } => io::Error::new(io::ErrorKind::Unsupported, err),
            Error::InvalidArgument(_) | Error::InvalidPath(_) | Error::InvalidMode(_) => {
                io::Error::new(io::ErrorKind::InvalidInput, err)
            }
            other => io::Error::other(other),
        }
    }
}

/// A specialized Result type for package operations.
pub type Result<T> = std::result::Result<T, Error>;
