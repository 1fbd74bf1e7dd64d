//! Storage bindings for manifest resources.
//!
//! Every resource path in a [`Manifest`](crate::Manifest) is bound to one
//! [`Handle`]. A handle wraps one of three storage kinds:
//!
//! | Kind | Bytes live in | Capabilities |
//! |------|---------------|--------------|
//! | [`ArchiveEntry`] | the original, read-only source archive | read only |
//! | [`TempFile`] | the session's [`TemporaryFilesystem`] | all |
//! | [`ExternalOpener`] | wherever a caller-supplied callback points | declared by the caller |
//!
//! A handle checks every open request against its capability mask before
//! touching storage. Pure reads are always legal; a write-intent open on a
//! read-only handle fails with [`Error::Unsupported`]. The manifest avoids
//! that failure by materializing such resources into a fresh `TempFile`
//! first.

use std::cell::RefCell;
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use zip::ZipArchive;
use zip::result::ZipError;

use crate::mode::{Access, Capabilities, OpenMode, OpenOptions};
use crate::stream::{self, RawStream, ReadOnly, Stream};
use crate::timestamp::Timestamp;
use crate::vfs::{Stat, TemporaryFilesystem};
use crate::{Error, Result};

/// Object-safe combination of `Read + Seek`.
pub trait ReadSeek: Read + Seek {}

impl<T: Read + Seek> ReadSeek for T {}

type Archive = ZipArchive<Box<dyn ReadSeek>>;

fn zip_to_io(err: ZipError) -> io::Error {
    match err {
        ZipError::Io(e) => e,
        ZipError::FileNotFound => io::Error::new(io::ErrorKind::NotFound, err),
        other => io::Error::other(other),
    }
}

/// The source archive of a package session.
///
/// Opened once and shared by every [`ArchiveEntry`] through an `Rc`. After
/// [`close`](Self::close) every read fails.
pub struct SourceArchive {
    archive: RefCell<Option<Archive>>,
    path: Option<PathBuf>,
}

impl SourceArchive {
    /// Opens a zip file on disk.
    pub fn open(path: impl AsRef<Path>) -> Result<Rc<Self>> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let reader: Box<dyn ReadSeek> = Box::new(BufReader::new(file));
        let archive = ZipArchive::new(reader)?;
        Ok(Rc::new(Self {
            archive: RefCell::new(Some(archive)),
            path: Some(path.to_path_buf()),
        }))
    }

    /// Opens a zip archive from any seekable reader.
    pub fn from_reader(reader: impl Read + Seek + 'static) -> Result<Rc<Self>> {
        let reader: Box<dyn ReadSeek> = Box::new(reader);
        let archive = ZipArchive::new(reader)?;
        Ok(Rc::new(Self {
            archive: RefCell::new(Some(archive)),
            path: None,
        }))
    }

    /// Returns the path the archive was opened from, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Releases the underlying reader.
    pub fn close(&self) {
        self.archive.borrow_mut().take();
    }

    /// Returns `true` after [`close`](Self::close).
    pub fn is_closed(&self) -> bool {
        self.archive.borrow().is_none()
    }

    /// Returns `true` if the archive has a file entry named `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.archive
            .borrow()
            .as_ref()
            .is_some_and(|a| a.index_for_name(name).is_some())
    }

    /// Returns every entry name in archive order.
    pub fn names(&self) -> Vec<String> {
        self.archive
            .borrow()
            .as_ref()
            .map(|a| a.file_names().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Reads a whole entry.
    pub fn read(&self, name: &str) -> io::Result<Vec<u8>> {
        self.with_archive_io(|archive| {
            let mut file = archive.by_name(name).map_err(zip_to_io)?;
            let mut buf = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut buf)?;
            Ok(buf)
        })
    }

    /// Returns an entry's size and modification time.
    pub fn stat(&self, name: &str) -> io::Result<Stat> {
        self.with_archive_io(|archive| {
            let file = archive.by_name(name).map_err(zip_to_io)?;
            Ok(Stat {
                size: file.size(),
                modified: file
                    .last_modified()
                    .map(|dt| Timestamp::from_zip(dt).as_system_time()),
            })
        })
    }

    pub(crate) fn with_archive<T>(&self, f: impl FnOnce(&mut Archive) -> Result<T>) -> Result<T> {
        let mut guard = self.archive.borrow_mut();
        let archive = guard
            .as_mut()
            .ok_or_else(|| io::Error::other("source archive is closed"))?;
        f(archive)
    }

    fn with_archive_io<T>(&self, f: impl FnOnce(&mut Archive) -> io::Result<T>) -> io::Result<T> {
        let mut guard = self.archive.borrow_mut();
        let archive = guard
            .as_mut()
            .ok_or_else(|| io::Error::other("source archive is closed"))?;
        f(archive)
    }
}

impl fmt::Debug for SourceArchive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceArchive")
            .field("path", &self.path)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// An entry inside the source archive.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    archive: Rc<SourceArchive>,
    name: String,
}

impl ArchiveEntry {
    /// Binds `name` inside `archive`.
    pub fn new(archive: Rc<SourceArchive>, name: impl Into<String>) -> Self {
        Self {
            archive,
            name: name.into(),
        }
    }

    /// Returns the entry name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the shared archive.
    pub fn archive(&self) -> &Rc<SourceArchive> {
        &self.archive
    }

    /// Reads the whole entry into memory and serves it read-only.
    fn open(&self) -> io::Result<RawStream> {
        let bytes = self.archive.read(&self.name)?;
        Ok(Box::new(ReadOnly::from_bytes(bytes)))
    }
}

/// A file in the session's temporary filesystem.
#[derive(Debug, Clone)]
pub struct TempFile {
    fs: Rc<TemporaryFilesystem>,
    name: String,
}

impl TempFile {
    /// Binds `name` inside `fs`. The file is created on first open.
    pub fn new(fs: Rc<TemporaryFilesystem>, name: impl Into<String>) -> Self {
        Self {
            fs,
            name: name.into(),
        }
    }

    /// Returns the scratch file name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns `true` once the backing file exists.
    pub fn exists(&self) -> bool {
        self.fs.exists(&self.name)
    }

    fn open(&self, mode: OpenMode) -> io::Result<RawStream> {
        if mode.access() == Access::Read {
            self.fs.touch(&self.name)?;
        }
        self.fs.open(&self.name, mode)
    }

    fn stat(&self) -> Stat {
        self.fs.stat(&self.name).unwrap_or(Stat {
            size: 0,
            modified: None,
        })
    }

    fn remove(&self) -> io::Result<()> {
        match self.fs.remove(&self.name) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

/// Callback opening an external resource.
pub type OpenFn = Box<dyn Fn(OpenMode) -> io::Result<RawStream>>;

/// Callback describing an external resource.
pub type StatFn = Box<dyn Fn() -> Option<Stat>>;

/// A caller-supplied opener.
///
/// The opener receives the already validated [`OpenMode`] and returns a raw
/// stream; the handle applies buffering and text decoding on top. Its
/// capability mask is declared up front and enforced before the callback
/// runs.
///
/// # Example
///
/// ```rust
/// use epubfs::{ExternalOpener, ReadOnly};
///
/// let opener = ExternalOpener::read_only(|| {
///     Ok(Box::new(ReadOnly::from_bytes(b"<svg/>".to_vec())))
/// })
/// .with_label("generated cover");
/// assert!(!opener.capabilities().is_writable());
/// ```
pub struct ExternalOpener {
    open: OpenFn,
    stat: Option<StatFn>,
    capabilities: Capabilities,
    label: String,
}

impl ExternalOpener {
    /// Creates an opener with an explicit capability mask.
    pub fn new(
        capabilities: Capabilities,
        open: impl Fn(OpenMode) -> io::Result<RawStream> + 'static,
    ) -> Self {
        Self {
            open: Box::new(open),
            stat: None,
            capabilities,
            label: "external".to_string(),
        }
    }

    /// Creates a read-only opener.
    pub fn read_only(open: impl Fn() -> io::Result<RawStream> + 'static) -> Self {
        Self::new(Capabilities::READ_ONLY, move |_| open())
    }

    /// Creates a read-only opener over a file on disk.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let label = path.display().to_string();
        let stat_path = path.clone();
        Self::read_only(move || {
            let file = File::open(&path)?;
            Ok(Box::new(ReadOnly::new(BufReader::new(file))) as RawStream)
        })
        .with_stat(move || {
            let meta = std::fs::metadata(&stat_path).ok()?;
            Some(Stat {
                size: meta.len(),
                modified: meta.modified().ok(),
            })
        })
        .with_label(label)
    }

    /// Attaches a stat callback.
    pub fn with_stat(mut self, stat: impl Fn() -> Option<Stat> + 'static) -> Self {
        self.stat = Some(Box::new(stat));
        self
    }

    /// Sets the label shown in debug output.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Returns the declared capability mask.
    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Returns the label.
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl fmt::Debug for ExternalOpener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalOpener")
            .field("label", &self.label)
            .field("capabilities", &self.capabilities)
            .field("has_stat", &self.stat.is_some())
            .finish()
    }
}

/// The storage behind a [`Handle`].
#[derive(Debug)]
pub enum Storage {
    /// An entry of the source archive.
    ArchiveEntry(ArchiveEntry),
    /// A scratch file.
    TempFile(TempFile),
    /// A caller-supplied opener.
    External(ExternalOpener),
}

/// The kind of storage behind a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// See [`Storage::ArchiveEntry`].
    ArchiveEntry,
    /// See [`Storage::TempFile`].
    TempFile,
    /// See [`Storage::External`].
    External,
}

impl BackendKind {
    /// Returns a short name used in error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ArchiveEntry => "archive",
            Self::TempFile => "temporary file",
            Self::External => "external",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// A resource's storage binding.
///
/// Each handle has a process-unique [`id`](Self::id), which identifies it
/// across renames: a rename moves the handle, a materialization replaces it.
#[derive(Debug)]
pub struct Handle {
    id: u64,
    storage: Storage,
}

impl Handle {
    /// Wraps a storage binding in a new handle.
    pub fn new(storage: Storage) -> Self {
        Self {
            id: NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed),
            storage,
        }
    }

    /// Returns the handle's identity.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns the storage binding.
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Returns the storage kind.
    pub fn kind(&self) -> BackendKind {
        match self.storage {
            Storage::ArchiveEntry(_) => BackendKind::ArchiveEntry,
            Storage::TempFile(_) => BackendKind::TempFile,
            Storage::External(_) => BackendKind::External,
        }
    }

    /// Returns the capability mask.
    pub fn capabilities(&self) -> Capabilities {
        match &self.storage {
            Storage::ArchiveEntry(_) => Capabilities::READ_ONLY,
            Storage::TempFile(_) => Capabilities::ALL,
            Storage::External(opener) => opener.capabilities,
        }
    }

    /// Returns `true` if `mode` is a legal mode this handle accepts.
    pub fn check_open_mode(&self, mode: &str) -> bool {
        OpenMode::parse(mode).is_ok_and(|m| self.capabilities().allows(&m))
    }

    /// Opens the raw, unlayered stream.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unsupported`] if `mode` needs capabilities the
    /// handle lacks, or [`Error::Io`] if the storage fails.
    pub fn open_raw(&self, mode: OpenMode) -> Result<RawStream> {
        if !self.capabilities().allows(&mode) {
            return Err(Error::unsupported(mode.to_string(), self.kind().name()));
        }
        let raw = match &self.storage {
            Storage::ArchiveEntry(entry) => entry.open()?,
            Storage::TempFile(file) => file.open(mode)?,
            Storage::External(opener) => (opener.open)(mode)?,
        };
        Ok(raw)
    }

    /// Opens a layered stream.
    pub fn open(&self, options: &OpenOptions) -> Result<Stream> {
        let raw = self.open_raw(options.mode())?;
        Ok(stream::open(raw, options))
    }

    /// Returns size and modification time, when the storage can tell.
    pub fn stat(&self) -> Option<Stat> {
        match &self.storage {
            Storage::ArchiveEntry(entry) => entry.archive.stat(&entry.name).ok(),
            Storage::TempFile(file) => Some(file.stat()),
            Storage::External(opener) => opener.stat.as_ref().and_then(|f| f()),
        }
    }

    /// Releases storage owned by the handle.
    ///
    /// Only scratch files are deleted; archive entries and external
    /// resources are left alone.
    pub fn remove(&self) -> io::Result<()> {
        match &self.storage {
            Storage::TempFile(file) => file.remove(),
            _ => Ok(()),
        }
    }

    /// Returns the scratch file name for `TempFile` handles.
    pub fn temp_name(&self) -> Option<&str> {
        match &self.storage {
            Storage::TempFile(file) => Some(file.name()),
            _ => None,
        }
    }
}
