//! Byte and text I/O on manifest resources.

use std::io::{Read, Write};

use super::{Manifest, Source, copy_chunked, normalize};
use crate::backend::{BackendKind, Handle};
use crate::mode::{Access, OpenMode, OpenOptions};
use crate::stream::Stream;
use crate::vfs::Stat;
use crate::{Error, Result};

impl Manifest {
    /// Opens a resource.
    ///
    /// `mode` follows the usual `{r,w,x,a}[+][b|t]` grammar. Text modes
    /// default to the manifest's encoding.
    ///
    /// - Opening an unknown path for reading fails with
    ///   [`Error::NotFound`]; any other mode adds the path first.
    /// - `x` on an existing path fails with [`Error::AlreadyExists`].
    /// - Write intent on an archive entry or an external resource first
    ///   copies its bytes into a fresh scratch file (unless `w` discards
    ///   them anyway) and rebinds the path to it.
    ///
    /// # Example
    ///
    /// ```rust
    /// use std::io::Write;
    /// use epubfs::Manifest;
    ///
    /// # fn main() -> epubfs::Result<()> {
    /// let mut manifest = Manifest::new()?;
    /// let mut stream = manifest.open("notes.txt", "wb")?.into_binary();
    /// stream.write_all(b"hello")?;
    /// stream.close()?;
    /// assert_eq!(manifest.read_text("notes.txt")?, "hello");
    /// # Ok(())
    /// # }
    /// ```
    pub fn open(&mut self, path: &str, mode: &str) -> Result<Stream> {
        let options = OpenOptions::new(mode)?;
        self.open_with(path, &options)
    }

    /// Opens a resource with full stream options.
    pub fn open_with(&mut self, path: &str, options: &OpenOptions) -> Result<Stream> {
        let mode = options.mode();
        let path = normalize(path)?;
        if self.paths.contains_key(&path) {
            if mode.access() == Access::Exclusive {
                return Err(Error::already_exists(path));
            }
        } else if mode.access() == Access::Read {
            return Err(Error::not_found(path));
        } else {
            self.add(&path, Source::Empty, None, None)?;
        }

        let options = match options.configured_encoding() {
            None if mode.is_text() => options.with_encoding(self.options.encoding),
            _ => *options,
        };
        let handle = self.prepare(&path, mode)?;
        handle.open(&options)
    }

    /// Reads a whole resource.
    pub fn read(&mut self, path: &str) -> Result<Vec<u8>> {
        let chunk_size = self.options.chunk_size;
        let mut stream = self
            .open_with(path, &OpenOptions::from_mode(OpenMode::READ_BINARY))?
            .into_binary();
        let mut out = Vec::new();
        copy_chunked(&mut stream, &mut out, chunk_size)?;
        Ok(out)
    }

    /// Reads a whole resource as text in the manifest's encoding.
    pub fn read_text(&mut self, path: &str) -> Result<String> {
        self.read_text_with(path, &OpenOptions::from_mode(OpenMode::READ_TEXT))
    }

    /// Reads a whole resource as text with explicit options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMode`] if `options` is not a text read mode.
    pub fn read_text_with(&mut self, path: &str, options: &OpenOptions) -> Result<String> {
        let mode = options.mode();
        if !mode.is_text() || !mode.reads() {
            return Err(Error::InvalidMode(format!("{} is not a text read mode", mode)));
        }
        let mut stream = self
            .open_with(path, options)?
            .into_text()
            .ok_or_else(|| Error::InvalidMode(mode.to_string()))?;
        Ok(stream.read_to_string()?)
    }

    /// Replaces a resource's bytes, adding it if unknown.
    pub fn write(&mut self, path: &str, data: &[u8]) -> Result<()> {
        let chunk_size = self.options.chunk_size;
        let mut stream = self
            .open_with(path, &OpenOptions::from_mode(OpenMode::WRITE_BINARY))?
            .into_binary();
        for chunk in data.chunks(chunk_size) {
            stream.write_all(chunk)?;
        }
        stream.close()?;
        Ok(())
    }

    /// Replaces a resource's bytes with everything `reader` yields.
    ///
    /// Returns the number of bytes written.
    pub fn write_from(&mut self, path: &str, mut reader: impl Read) -> Result<u64> {
        let chunk_size = self.options.chunk_size;
        let mut stream = self
            .open_with(path, &OpenOptions::from_mode(OpenMode::WRITE_BINARY))?
            .into_binary();
        let written = copy_chunked(&mut reader, &mut stream, chunk_size)?;
        stream.close()?;
        Ok(written)
    }

    /// Replaces a resource's contents with `text` in the manifest's encoding.
    pub fn write_text(&mut self, path: &str, text: &str) -> Result<()> {
        self.write_text_with(path, text, &OpenOptions::from_mode(OpenMode::WRITE_TEXT))
    }

    /// Writes text with explicit options (encoding, newline policy).
    pub fn write_text_with(&mut self, path: &str, text: &str, options: &OpenOptions) -> Result<()> {
        let mode = options.mode();
        if !mode.is_text() || !mode.writes() {
            return Err(Error::InvalidMode(format!("{} is not a text write mode", mode)));
        }
        let chunk_size = self.options.chunk_size;
        let mut stream = self
            .open_with(path, options)?
            .into_text()
            .ok_or_else(|| Error::InvalidMode(mode.to_string()))?;
        let mut rest = text;
        while !rest.is_empty() {
            let mut end = rest.len().min(chunk_size);
            while !rest.is_char_boundary(end) {
                end += 1;
            }
            stream.write_str(&rest[..end])?;
            rest = &rest[end..];
        }
        stream.close()?;
        Ok(())
    }

    /// Creates an empty resource at `path` if unknown, and makes sure a
    /// known one has storage.
    pub fn touch(&mut self, path: &str) -> Result<()> {
        let path = normalize(path)?;
        if !self.paths.contains_key(&path) {
            self.add(&path, Source::Empty, None, None)?;
        }
        let handle = self.prepare(&path, OpenMode::READ_BINARY)?;
        if handle.kind() == BackendKind::TempFile {
            handle.open_raw(OpenMode::READ_BINARY)?;
        }
        Ok(())
    }

    /// Returns size and modification time of a resource.
    ///
    /// `None` means the storage cannot tell or the path is still unbound.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for unknown paths.
    pub fn stat(&self, path: &str) -> Result<Option<Stat>> {
        let path = normalize(path)?;
        if !self.paths.contains_key(&path) {
            return Err(Error::not_found(path));
        }
        Ok(self.handles.get(&path).and_then(Handle::stat))
    }

    /// Binds `path` if needed and materializes it if `mode` writes to
    /// storage that must not be modified in place.
    fn prepare(&mut self, path: &str, mode: OpenMode) -> Result<&Handle> {
        if !self.handles.contains_key(path) {
            let handle = self.temp_handle();
            self.handles.insert(path.to_string(), handle);
        }
        let needs_copy = self
            .handles
            .get(path)
            .is_some_and(|h| mode.writes() && h.kind() != BackendKind::TempFile);
        if needs_copy {
            self.materialize(path, !mode.truncates())?;
        }
        self.handles.get(path).ok_or_else(|| Error::not_found(path))
    }

    /// Rebinds `path` to a fresh scratch file, copying the current bytes
    /// when `copy` is set. The binding only changes once the copy succeeded.
    fn materialize(&mut self, path: &str, copy: bool) -> Result<()> {
        let current = self.handles.get(path).ok_or_else(|| Error::not_found(path))?;
        let from = current.kind();
        let fresh = self.temp_handle();
        if copy {
            let copied = current
                .open_raw(OpenMode::READ_BINARY)
                .and_then(|mut raw| super::fill(&fresh, &mut raw, self.options.chunk_size));
            if let Err(e) = copied {
                let _ = fresh.remove();
                return Err(e);
            }
        }
        log::debug!("materialized {} from {} storage", path, from);
        self.handles.insert(path.to_string(), fresh);
        Ok(())
    }
}
