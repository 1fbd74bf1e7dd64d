//! Storage providers and scoped filesystems.
//!
//! A [`Provider`] is anything that can open, remove and stat named files:
//! the native disk ([`DiskProvider`]) or an in-memory store
//! ([`MemoryProvider`]). [`RootFilesystem`] binds a provider to a logical
//! root directory; [`TemporaryFilesystem`] adds a private scratch namespace
//! whose contents are tracked and removed at teardown.
//!
//! # Example
//!
//! ```rust
//! use std::io::Write;
//! use epubfs::{OpenMode, TemporaryFilesystem};
//!
//! let tmp = TemporaryFilesystem::new().unwrap();
//! let mut file = tmp.open("scratch.bin", OpenMode::WRITE_BINARY).unwrap();
//! file.write_all(b"data").unwrap();
//! drop(file);
//! assert!(tmp.exists("scratch.bin"));
//!
//! tmp.cleanup();
//! assert!(!tmp.exists("scratch.bin"));
//! ```

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::SystemTime;

use crate::href;
use crate::mode::{Access, OpenMode, OpenOptions};
use crate::stream::{self, RawStream, ReadOnly, Stream};
use crate::{Error, Result};

/// Size and modification time of stored bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    /// Size in bytes.
    pub size: u64,
    /// Last modification time, when the store records one.
    pub modified: Option<SystemTime>,
}

fn unsupported(op: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::Unsupported,
        format!("{} not supported by provider", op),
    )
}

/// A store of named files addressed by posix-style paths.
///
/// Only `open`, `remove`, `exists` and `stat` are required. Providers that
/// can create and remove directories override the tree operations, which
/// otherwise fail with `ErrorKind::Unsupported`.
pub trait Provider {
    /// Opens `path` in `mode`, creating it when the mode requires.
    fn open(&self, path: &str, mode: OpenMode) -> io::Result<RawStream>;

    /// Deletes the file at `path`.
    fn remove(&self, path: &str) -> io::Result<()>;

    /// Returns `true` if a file exists at `path`.
    fn exists(&self, path: &str) -> bool;

    /// Returns the size and modification time of `path`.
    fn stat(&self, path: &str) -> io::Result<Stat>;

    /// Joins a directory and a name.
    fn join(&self, base: &str, name: &str) -> String {
        if base.is_empty() {
            name.to_string()
        } else {
            href::join(base, name)
        }
    }

    /// Creates a directory.
    fn mkdir(&self, _path: &str) -> io::Result<()> {
        Err(unsupported("mkdir"))
    }

    /// Removes an empty directory.
    fn rmdir(&self, _path: &str) -> io::Result<()> {
        Err(unsupported("rmdir"))
    }

    /// Removes a directory and everything below it.
    fn rmtree(&self, _path: &str) -> io::Result<()> {
        Err(unsupported("rmtree"))
    }
}

/// The native filesystem below a root directory.
#[derive(Debug, Clone)]
pub struct DiskProvider {
    root: PathBuf,
}

impl DiskProvider {
    /// Creates a provider rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the native path for `path`.
    pub fn resolve(&self, path: &str) -> PathBuf {
        let mut resolved = self.root.clone();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            resolved.push(segment);
        }
        resolved
    }
}

impl Provider for DiskProvider {
    fn open(&self, path: &str, mode: OpenMode) -> io::Result<RawStream> {
        let mut options = fs::OpenOptions::new();
        match mode.access() {
            Access::Read => options.read(true).write(mode.is_update()),
            Access::Write => options
                .write(true)
                .create(true)
                .truncate(true)
                .read(mode.is_update()),
            Access::Exclusive => options.write(true).create_new(true).read(mode.is_update()),
            Access::Append => options.append(true).create(true).read(mode.is_update()),
        };
        let file = options.open(self.resolve(path))?;
        if mode.writes() {
            Ok(Box::new(file))
        } else {
            Ok(Box::new(ReadOnly::new(file)))
        }
    }

    fn remove(&self, path: &str) -> io::Result<()> {
        fs::remove_file(self.resolve(path))
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).is_file()
    }

    fn stat(&self, path: &str) -> io::Result<Stat> {
        let meta = fs::metadata(self.resolve(path))?;
        Ok(Stat {
            size: meta.len(),
            modified: meta.modified().ok(),
        })
    }

    fn mkdir(&self, path: &str) -> io::Result<()> {
        fs::create_dir_all(self.resolve(path))
    }

    fn rmdir(&self, path: &str) -> io::Result<()> {
        fs::remove_dir(self.resolve(path))
    }

    fn rmtree(&self, path: &str) -> io::Result<()> {
        fs::remove_dir_all(self.resolve(path))
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    files: BTreeMap<String, (Rc<RefCell<Vec<u8>>>, SystemTime)>,
    dirs: BTreeSet<String>,
}

/// An in-memory provider.
///
/// Clones share the same store, so a test can keep one clone to inspect
/// what another component wrote.
#[derive(Debug, Clone, Default)]
pub struct MemoryProvider {
    state: Rc<RefCell<MemoryState>>,
}

impl MemoryProvider {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the bytes stored at `path`.
    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        let state = self.state.borrow();
        state
            .files
            .get(path)
            .map(|(data, _)| data.borrow().clone())
    }

    /// Returns every stored file path.
    pub fn paths(&self) -> Vec<String> {
        self.state.borrow().files.keys().cloned().collect()
    }

    /// Returns every directory.
    pub fn dirs(&self) -> Vec<String> {
        self.state.borrow().dirs.iter().cloned().collect()
    }
}

/// An open file in a [`MemoryProvider`].
struct MemoryFile {
    data: Rc<RefCell<Vec<u8>>>,
    pos: u64,
    append: bool,
}

impl Read for MemoryFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let data = self.data.borrow();
        let start = (self.pos as usize).min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl Write for MemoryFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut data = self.data.borrow_mut();
        if self.append {
            self.pos = data.len() as u64;
        }
        let start = self.pos as usize;
        if start > data.len() {
            data.resize(start, 0);
        }
        let overlap = buf.len().min(data.len() - start);
        data[start..start + overlap].copy_from_slice(&buf[..overlap]);
        data.extend_from_slice(&buf[overlap..]);
        self.pos += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for MemoryFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let len = self.data.borrow().len() as i64;
        let target = match pos {
            SeekFrom::Start(n) => n as i64,
            SeekFrom::End(n) => len + n,
            SeekFrom::Current(n) => self.pos as i64 + n,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of file",
            ));
        }
        self.pos = target as u64;
        Ok(self.pos)
    }
}

impl Provider for MemoryProvider {
    fn open(&self, path: &str, mode: OpenMode) -> io::Result<RawStream> {
        let mut state = self.state.borrow_mut();
        let existing = state.files.get(path).map(|(data, _)| Rc::clone(data));
        let data = match (mode.access(), existing) {
            (Access::Exclusive, Some(_)) => {
                return Err(io::Error::new(io::ErrorKind::AlreadyExists, path.to_string()));
            }
            (Access::Read, None) => {
                return Err(io::Error::new(io::ErrorKind::NotFound, path.to_string()));
            }
            (Access::Write, Some(data)) => {
                data.borrow_mut().clear();
                data
            }
            (_, Some(data)) => data,
            (_, None) => {
                let data = Rc::new(RefCell::new(Vec::new()));
                state
                    .files
                    .insert(path.to_string(), (Rc::clone(&data), SystemTime::now()));
                data
            }
        };
        if mode.writes() {
            if let Some(entry) = state.files.get_mut(path) {
                entry.1 = SystemTime::now();
            }
        }

        let file = MemoryFile {
            data,
            pos: 0,
            append: mode.access() == Access::Append,
        };
        if mode.writes() {
            Ok(Box::new(file))
        } else {
            Ok(Box::new(ReadOnly::new(file)))
        }
    }

    fn remove(&self, path: &str) -> io::Result<()> {
        self.state
            .borrow_mut()
            .files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.to_string()))
    }

    fn exists(&self, path: &str) -> bool {
        self.state.borrow().files.contains_key(path)
    }

    fn stat(&self, path: &str) -> io::Result<Stat> {
        let state = self.state.borrow();
        let (data, modified) = state
            .files
            .get(path)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.to_string()))?;
        Ok(Stat {
            size: data.borrow().len() as u64,
            modified: Some(*modified),
        })
    }

    fn mkdir(&self, path: &str) -> io::Result<()> {
        self.state.borrow_mut().dirs.insert(path.to_string());
        Ok(())
    }

    fn rmdir(&self, path: &str) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        let prefix = format!("{}/", path);
        if state.files.keys().any(|k| k.starts_with(&prefix)) {
            return Err(io::Error::other(format!("directory not empty: {}", path)));
        }
        if !state.dirs.remove(path) {
            return Err(io::Error::new(io::ErrorKind::NotFound, path.to_string()));
        }
        Ok(())
    }

    fn rmtree(&self, path: &str) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        let prefix = format!("{}/", path);
        state.files.retain(|k, _| !k.starts_with(&prefix));
        state
            .dirs
            .retain(|d| d.as_str() != path && !d.starts_with(&prefix));
        Ok(())
    }
}

/// A provider bound to a logical root.
///
/// Names passed to [`open`](Self::open) and [`remove`](Self::remove) are
/// joined against the root before reaching the provider.
pub struct RootFilesystem {
    root: String,
    provider: Box<dyn Provider>,
}

impl RootFilesystem {
    /// Binds a real directory, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `dir` exists but is not a
    /// directory.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        if dir.exists() && !dir.is_dir() {
            return Err(Error::InvalidArgument(format!(
                "not a directory: {}",
                dir.display()
            )));
        }
        fs::create_dir_all(dir)?;
        Ok(Self::with_provider(Box::new(DiskProvider::new(dir)), ""))
    }

    /// Binds `root` inside an arbitrary provider.
    pub fn with_provider(provider: Box<dyn Provider>, root: &str) -> Self {
        Self {
            root: root.trim_matches('/').to_string(),
            provider,
        }
    }

    /// Returns the logical root.
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Returns the provider-side path of `name`.
    pub fn path(&self, name: &str) -> String {
        self.provider.join(&self.root, name.trim_start_matches('/'))
    }

    /// Opens `name` as a raw stream.
    pub fn open(&self, name: &str, mode: OpenMode) -> io::Result<RawStream> {
        self.provider.open(&self.path(name), mode)
    }

    /// Opens `name` layered according to `options`.
    pub fn open_with(&self, name: &str, options: &OpenOptions) -> io::Result<Stream> {
        let raw = self.open(name, options.mode())?;
        Ok(stream::open(raw, options))
    }

    /// Deletes `name`.
    pub fn remove(&self, name: &str) -> io::Result<()> {
        self.provider.remove(&self.path(name))
    }

    /// Returns `true` if `name` exists.
    pub fn exists(&self, name: &str) -> bool {
        self.provider.exists(&self.path(name))
    }

    /// Returns the size and modification time of `name`.
    pub fn stat(&self, name: &str) -> io::Result<Stat> {
        self.provider.stat(&self.path(name))
    }

    /// Returns the provider for native operations.
    pub fn provider(&self) -> &dyn Provider {
        self.provider.as_ref()
    }
}

impl std::fmt::Debug for RootFilesystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootFilesystem")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Namespace {
    /// A native temporary directory owned by `TempDir`.
    Directory,
    /// A subtree created with the provider's `mkdir`.
    Subtree,
    /// No directory support; paths are tracked one by one.
    Flat,
}

/// A private scratch store whose files are removed at teardown.
///
/// Every name opened for writing is tracked. [`cleanup`](Self::cleanup)
/// removes all tracked files and the namespace itself; it is idempotent,
/// swallows its own errors and also runs on drop.
pub struct TemporaryFilesystem {
    fs: RootFilesystem,
    namespace: Namespace,
    dir: RefCell<Option<tempfile::TempDir>>,
    tracked: RefCell<BTreeSet<String>>,
    cleaned: Cell<bool>,
}

impl TemporaryFilesystem {
    /// Creates a scratch directory under the system temp directory.
    pub fn new() -> Result<Self> {
        let dir = tempfile::Builder::new().prefix("epubfs-").tempdir()?;
        Ok(Self::from_temp_dir(dir))
    }

    /// Creates a scratch directory inside `parent`.
    pub fn new_in(parent: impl AsRef<Path>) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("epubfs-")
            .tempdir_in(parent)?;
        Ok(Self::from_temp_dir(dir))
    }

    fn from_temp_dir(dir: tempfile::TempDir) -> Self {
        let provider = DiskProvider::new(dir.path());
        Self {
            fs: RootFilesystem::with_provider(Box::new(provider), ""),
            namespace: Namespace::Directory,
            dir: RefCell::new(Some(dir)),
            tracked: RefCell::new(BTreeSet::new()),
            cleaned: Cell::new(false),
        }
    }

    /// Creates a scratch namespace inside an arbitrary provider.
    ///
    /// A fresh subtree is used when the provider supports `mkdir`;
    /// otherwise files live directly in the provider's namespace.
    pub fn with_provider(provider: Box<dyn Provider>) -> Self {
        let name = format!("epubfs-{}", uuid::Uuid::new_v4().simple());
        let (root, namespace) = match provider.mkdir(&name) {
            Ok(()) => (name, Namespace::Subtree),
            Err(e) => {
                log::debug!("provider has no directories ({}), using flat namespace", e);
                (String::new(), Namespace::Flat)
            }
        };
        Self {
            fs: RootFilesystem::with_provider(provider, &root),
            namespace,
            dir: RefCell::new(None),
            tracked: RefCell::new(BTreeSet::new()),
            cleaned: Cell::new(false),
        }
    }

    /// Returns the native scratch directory, if disk-backed.
    pub fn dir(&self) -> Option<PathBuf> {
        self.dir.borrow().as_ref().map(|d| d.path().to_path_buf())
    }

    /// Opens `name`; write modes create and track it.
    pub fn open(&self, name: &str, mode: OpenMode) -> io::Result<RawStream> {
        let raw = self.fs.open(name, mode)?;
        if mode.writes() {
            self.tracked.borrow_mut().insert(name.to_string());
        }
        Ok(raw)
    }

    /// Creates `name` empty unless it already exists.
    pub fn touch(&self, name: &str) -> io::Result<()> {
        if !self.exists(name) {
            self.open(name, OpenMode::WRITE_BINARY)?;
        }
        Ok(())
    }

    /// Deletes and untracks `name`.
    pub fn remove(&self, name: &str) -> io::Result<()> {
        let result = self.fs.remove(name);
        match &result {
            Ok(()) => {
                self.tracked.borrow_mut().remove(name);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.tracked.borrow_mut().remove(name);
            }
            Err(_) => {}
        }
        result
    }

    /// Returns `true` if `name` exists.
    pub fn exists(&self, name: &str) -> bool {
        self.fs.exists(name)
    }

    /// Returns the size and modification time of `name`.
    pub fn stat(&self, name: &str) -> io::Result<Stat> {
        self.fs.stat(name)
    }

    /// Returns `true` if `name` is tracked for cleanup.
    pub fn is_tracked(&self, name: &str) -> bool {
        self.tracked.borrow().contains(name)
    }

    /// Returns the tracked names.
    pub fn tracked(&self) -> Vec<String> {
        self.tracked.borrow().iter().cloned().collect()
    }

    /// Returns `true` once [`cleanup`](Self::cleanup) has run.
    pub fn is_cleaned(&self) -> bool {
        self.cleaned.get()
    }

    /// Removes every tracked file and the namespace.
    pub fn cleanup(&self) {
        if self.cleaned.replace(true) {
            return;
        }
        let tracked = std::mem::take(&mut *self.tracked.borrow_mut());
        match self.namespace {
            Namespace::Directory => {
                if let Some(dir) = self.dir.borrow_mut().take() {
                    let path = dir.path().to_path_buf();
                    if let Err(e) = dir.close() {
                        log::warn!("failed to remove scratch directory {}: {}", path.display(), e);
                    }
                }
            }
            Namespace::Subtree => {
                let provider = self.fs.provider();
                if provider.rmtree(self.fs.root()).is_err() {
                    for name in &tracked {
                        let _ = self.fs.remove(name);
                    }
                    let _ = provider.rmdir(self.fs.root());
                }
            }
            Namespace::Flat => {
                for name in &tracked {
                    if let Err(e) = self.fs.remove(name) {
                        log::debug!("failed to remove scratch file {}: {}", name, e);
                    }
                }
            }
        }
    }
}

impl Drop for TemporaryFilesystem {
    fn drop(&mut self) {
        self.cleanup();
    }
}

impl std::fmt::Debug for TemporaryFilesystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemporaryFilesystem")
            .field("fs", &self.fs)
            .field("namespace", &self.namespace)
            .field("tracked", &self.tracked.borrow().len())
            .field("cleaned", &self.cleaned.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(provider: &dyn Provider, path: &str, data: &[u8]) {
        let mut stream = provider.open(path, OpenMode::WRITE_BINARY).unwrap();
        stream.write_all(data).unwrap();
        stream.flush().unwrap();
    }

    fn read(provider: &dyn Provider, path: &str) -> Vec<u8> {
        let mut stream = provider.open(path, OpenMode::READ_BINARY).unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn test_memory_provider_modes() {
        let provider = MemoryProvider::new();
        assert!(provider.open("a", OpenMode::READ_BINARY).is_err());

        write(&provider, "a", b"hello");
        assert_eq!(read(&provider, "a"), b"hello");

        let err = provider
            .open("a", OpenMode::parse("xb").unwrap())
            .err()
            .unwrap();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);

        let mut stream = provider.open("a", OpenMode::parse("ab").unwrap()).unwrap();
        stream.write_all(b" world").unwrap();
        drop(stream);
        assert_eq!(provider.contents("a").unwrap(), b"hello world");

        write(&provider, "a", b"x");
        assert_eq!(provider.stat("a").unwrap().size, 1);
    }

    #[test]
    fn test_memory_provider_read_only_stream() {
        let provider = MemoryProvider::new();
        write(&provider, "a", b"abc");
        let mut stream = provider.open("a", OpenMode::READ_BINARY).unwrap();
        assert!(stream.write(b"z").is_err());
        assert_eq!(provider.contents("a").unwrap(), b"abc");
    }

    #[test]
    fn test_memory_provider_rmtree() {
        let provider = MemoryProvider::new();
        provider.mkdir("t").unwrap();
        write(&provider, "t/a", b"1");
        write(&provider, "other", b"2");
        assert!(provider.rmdir("t").is_err());
        provider.rmtree("t").unwrap();
        assert_eq!(provider.paths(), vec!["other".to_string()]);
        assert!(provider.dirs().is_empty());
    }

    #[test]
    fn test_root_filesystem_rejects_file_root() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("file");
        fs::write(&file, b"x").unwrap();
        assert!(matches!(
            RootFilesystem::new(&file),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_root_filesystem_joins_names() {
        let provider = MemoryProvider::new();
        let root = RootFilesystem::with_provider(Box::new(provider.clone()), "/base/");
        assert_eq!(root.path("x.bin"), "base/x.bin");
        let mut stream = root.open("x.bin", OpenMode::WRITE_BINARY).unwrap();
        stream.write_all(b"1").unwrap();
        drop(stream);
        assert!(provider.exists("base/x.bin"));
        root.remove("x.bin").unwrap();
        assert!(!root.exists("x.bin"));
    }

    #[test]
    fn test_temporary_filesystem_disk_cleanup() {
        let parent = tempfile::tempdir().unwrap();
        let tmp = TemporaryFilesystem::new_in(parent.path()).unwrap();
        let dir = tmp.dir().unwrap();
        tmp.touch("a.bin").unwrap();
        assert!(tmp.is_tracked("a.bin"));
        assert!(dir.join("a.bin").is_file());

        tmp.cleanup();
        tmp.cleanup();
        assert!(tmp.is_cleaned());
        assert!(!dir.exists());
    }

    #[test]
    fn test_temporary_filesystem_remove_untracks() {
        let tmp = TemporaryFilesystem::new().unwrap();
        tmp.touch("a.bin").unwrap();
        tmp.remove("a.bin").unwrap();
        assert!(!tmp.is_tracked("a.bin"));
        assert!(!tmp.exists("a.bin"));
    }

    #[test]
    fn test_temporary_filesystem_subtree() {
        let provider = MemoryProvider::new();
        let tmp = TemporaryFilesystem::with_provider(Box::new(provider.clone()));
        tmp.touch("a.bin").unwrap();
        assert_eq!(provider.dirs().len(), 1);
        assert_eq!(provider.paths().len(), 1);
        drop(tmp);
        assert!(provider.paths().is_empty());
        assert!(provider.dirs().is_empty());
    }

    struct FlatProvider(MemoryProvider);

    impl Provider for FlatProvider {
        fn open(&self, path: &str, mode: OpenMode) -> io::Result<RawStream> {
            self.0.open(path, mode)
        }
        fn remove(&self, path: &str) -> io::Result<()> {
            self.0.remove(path)
        }
        fn exists(&self, path: &str) -> bool {
            self.0.exists(path)
        }
        fn stat(&self, path: &str) -> io::Result<Stat> {
            self.0.stat(path)
        }
    }

    #[test]
    fn test_temporary_filesystem_flat_namespace() {
        let store = MemoryProvider::new();
        write(&store, "keep", b"k");
        let tmp = TemporaryFilesystem::with_provider(Box::new(FlatProvider(store.clone())));
        tmp.touch("scratch").unwrap();
        assert!(store.exists("scratch"));
        tmp.cleanup();
        assert_eq!(store.paths(), vec!["keep".to_string()]);
    }
}
