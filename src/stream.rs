//! Opened resource streams.
//!
//! Every backend produces a [`RawStream`]: a boxed `Read + Write + Seek`
//! object. [`open`] layers it according to the requested [`OpenOptions`]:
//!
//! ```text
//! RawStream -> ByteStream (optional BufReader/BufWriter) -> TextStream (decode/encode)
//! ```
//!
//! Read-only raw streams that still implement `Write` (such as a
//! `Cursor<Vec<u8>>` filled from an archive entry) are wrapped in
//! [`ReadOnly`] so that a stray write fails instead of silently modifying a
//! private copy.

use std::io::{self, BufReader, BufWriter, Cursor, Read, Seek, SeekFrom, Write};

use encoding_rs::{
    CoderResult, Decoder, DecoderResult, Encoder, EncoderResult, Encoding, UTF_16BE, UTF_16LE,
};

use crate::mode::{Buffering, Newline, OpenMode, OpenOptions, TextErrors};

/// Number of raw bytes decoded per refill of a text stream.
const TEXT_CHUNK: usize = 8192;

/// Object-safe combination of `Read + Write + Seek`.
pub trait RawIo: Read + Write + Seek {}

impl<T: Read + Write + Seek> RawIo for T {}

/// An unbuffered stream produced by a backend.
pub type RawStream = Box<dyn RawIo>;

/// Adapts a `Read + Seek` source into a [`RawStream`] that rejects writes.
#[derive(Debug)]
pub struct ReadOnly<R> {
    inner: R,
}

impl<R: Read + Seek> ReadOnly<R> {
    /// Wraps a reader.
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Returns the wrapped reader.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl ReadOnly<Cursor<Vec<u8>>> {
    /// Creates a read-only stream over owned bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self::new(Cursor::new(bytes))
    }
}

impl<R: Read> Read for ReadOnly<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl<R> Write for ReadOnly<R> {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "stream is read-only",
        ))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<R: Seek> Seek for ReadOnly<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }
}

enum Layer {
    Raw(RawStream),
    Reader(BufReader<RawStream>),
    Writer(BufWriter<RawStream>),
}

/// A binary stream over a resource.
///
/// Read-only modes are wrapped in a `BufReader`, write-only modes in a
/// `BufWriter`; update modes (`+`) and [`Buffering::Unbuffered`] use the raw
/// stream directly. Buffered writes are flushed on drop, but errors are only
/// observable through [`flush`](Write::flush) or [`close`](Self::close).
pub struct ByteStream {
    layer: Layer,
    mode: OpenMode,
}

impl ByteStream {
    /// Layers a raw stream for the given mode and buffering policy.
    pub fn new(raw: RawStream, mode: OpenMode, buffering: Buffering) -> Self {
        let layer = match buffering.block_size() {
            Some(_) if mode.is_update() => Layer::Raw(raw),
            Some(size) if mode.writes() => Layer::Writer(BufWriter::with_capacity(size, raw)),
            Some(size) => Layer::Reader(BufReader::with_capacity(size, raw)),
            None => Layer::Raw(raw),
        };
        Self { layer, mode }
    }

    /// Returns the mode the stream was opened with.
    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// Flushes buffered writes and releases the stream.
    pub fn close(mut self) -> io::Result<()> {
        self.flush()
    }

    fn not_readable() -> io::Error {
        io::Error::new(io::ErrorKind::PermissionDenied, "stream not open for reading")
    }

    fn not_writable() -> io::Error {
        io::Error::new(io::ErrorKind::PermissionDenied, "stream not open for writing")
    }
}

impl Read for ByteStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.mode.reads() {
            return Err(Self::not_readable());
        }
        match &mut self.layer {
            Layer::Raw(raw) => raw.read(buf),
            Layer::Reader(reader) => reader.read(buf),
            Layer::Writer(_) => Err(Self::not_readable()),
        }
    }
}

impl Write for ByteStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.mode.writes() {
            return Err(Self::not_writable());
        }
        match &mut self.layer {
            Layer::Raw(raw) => raw.write(buf),
            Layer::Writer(writer) => writer.write(buf),
            Layer::Reader(_) => Err(Self::not_writable()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.layer {
            Layer::Raw(raw) => raw.flush(),
            Layer::Writer(writer) => writer.flush(),
            Layer::Reader(_) => Ok(()),
        }
    }
}

impl Seek for ByteStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match &mut self.layer {
            Layer::Raw(raw) => raw.seek(pos),
            Layer::Reader(reader) => reader.seek(pos),
            Layer::Writer(writer) => writer.seek(pos),
        }
    }
}

impl std::fmt::Debug for ByteStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let layer = match self.layer {
            Layer::Raw(_) => "raw",
            Layer::Reader(_) => "buffered-reader",
            Layer::Writer(_) => "buffered-writer",
        };
        f.debug_struct("ByteStream")
            .field("mode", &self.mode)
            .field("layer", &layer)
            .finish()
    }
}

/// A text stream that decodes on read and encodes on write.
///
/// Decoding and encoding go through `encoding_rs`. With
/// [`TextErrors::Strict`] malformed input or unmappable characters fail
/// with `ErrorKind::InvalidData`; with [`TextErrors::Replace`] they become
/// U+FFFD on read and `?` on write.
pub struct TextStream {
    inner: ByteStream,
    encoding: &'static Encoding,
    errors: TextErrors,
    newline: Newline,
    line_buffered: bool,
    decoder: Option<Decoder>,
    encoder: Option<Encoder>,
    decoded: String,
    pending_cr: bool,
    eof: bool,
}

impl TextStream {
    /// Wraps a byte stream.
    pub fn new(inner: ByteStream, options: &OpenOptions) -> Self {
        Self {
            inner,
            encoding: options.encoding_or_default(),
            errors: options.error_policy(),
            newline: options.newline_policy(),
            line_buffered: options.buffering_policy() == Buffering::Line,
            decoder: None,
            encoder: None,
            decoded: String::new(),
            pending_cr: false,
            eof: false,
        }
    }

    /// Returns the text encoding.
    pub fn encoding(&self) -> &'static Encoding {
        self.encoding
    }

    /// Reads and decodes everything up to the end of the stream.
    pub fn read_to_string(&mut self) -> io::Result<String> {
        while self.fill()? {}
        Ok(std::mem::take(&mut self.decoded))
    }

    /// Reads one line including its terminator; `None` at end of stream.
    pub fn read_line(&mut self) -> io::Result<Option<String>> {
        loop {
            if let Some(idx) = self.decoded.find('\n') {
                let rest = self.decoded.split_off(idx + 1);
                return Ok(Some(std::mem::replace(&mut self.decoded, rest)));
            }
            if !self.fill()? {
                if self.decoded.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(std::mem::take(&mut self.decoded)));
            }
        }
    }

    /// Encodes and writes a string, translating `\n` per the newline policy.
    pub fn write_str(&mut self, text: &str) -> io::Result<()> {
        let translated = match self.newline {
            Newline::CrLf => text.replace('\n', "\r\n"),
            Newline::Cr => text.replace('\n', "\r"),
            _ => text.to_string(),
        };
        let bytes = self.encode(&translated, false)?;
        self.inner.write_all(&bytes)?;
        if self.line_buffered && text.contains('\n') {
            self.inner.flush()?;
        }
        Ok(())
    }

    /// Seeks to the start and resets decoder state.
    pub fn rewind(&mut self) -> io::Result<()> {
        self.inner.seek(SeekFrom::Start(0))?;
        self.decoder = None;
        self.decoded.clear();
        self.pending_cr = false;
        self.eof = false;
        Ok(())
    }

    /// Flushes pending encoder state and buffered bytes.
    ///
    /// Stateful encodings (such as ISO-2022-JP) only emit their final
    /// shift sequence here or in [`close`](Self::close).
    pub fn flush(&mut self) -> io::Result<()> {
        if self.encoder.is_some() {
            let tail = self.encode("", true)?;
            self.inner.write_all(&tail)?;
            self.encoder = None;
        }
        self.inner.flush()
    }

    /// Flushes and releases the stream.
    pub fn close(mut self) -> io::Result<()> {
        self.flush()
    }

    /// Returns the underlying byte stream, discarding decoded text.
    pub fn into_inner(self) -> ByteStream {
        self.inner
    }

    fn fill(&mut self) -> io::Result<bool> {
        if self.eof {
            return Ok(false);
        }
        let mut raw = vec![0u8; TEXT_CHUNK];
        let n = self.inner.read(&mut raw)?;
        raw.truncate(n);
        let last = n == 0;
        let text = self.decode(&raw, last)?;
        self.push_decoded(&text, last);
        if last {
            self.eof = true;
        }
        Ok(!last)
    }

    fn decode(&mut self, src: &[u8], last: bool) -> io::Result<String> {
        let encoding = self.encoding;
        let decoder = self
            .decoder
            .get_or_insert_with(|| encoding.new_decoder_with_bom_removal());
        let mut out = String::new();
        let mut src = src;
        loop {
            match self.errors {
                TextErrors::Strict => {
                    let needed = decoder
                        .max_utf8_buffer_length_without_replacement(src.len())
                        .unwrap_or(src.len() * 3 + 16);
                    out.reserve(needed);
                    let (result, read) =
                        decoder.decode_to_string_without_replacement(src, &mut out, last);
                    src = &src[read..];
                    match result {
                        DecoderResult::InputEmpty => return Ok(out),
                        DecoderResult::OutputFull => continue,
                        DecoderResult::Malformed(_, _) => {
                            return Err(io::Error::new(
                                io::ErrorKind::InvalidData,
                                format!("malformed {} input", encoding.name()),
                            ));
                        }
                    }
                }
                TextErrors::Replace => {
                    let needed = decoder
                        .max_utf8_buffer_length(src.len())
                        .unwrap_or(src.len() * 3 + 16);
                    out.reserve(needed);
                    let (result, read, _) = decoder.decode_to_string(src, &mut out, last);
                    src = &src[read..];
                    match result {
                        CoderResult::InputEmpty => return Ok(out),
                        CoderResult::OutputFull => continue,
                    }
                }
            }
        }
    }

    fn push_decoded(&mut self, text: &str, last: bool) {
        if self.newline != Newline::Universal {
            self.decoded.push_str(text);
            return;
        }
        for c in text.chars() {
            if self.pending_cr {
                self.pending_cr = false;
                self.decoded.push('\n');
                if c == '\n' {
                    continue;
                }
            }
            if c == '\r' {
                self.pending_cr = true;
            } else {
                self.decoded.push(c);
            }
        }
        if last && self.pending_cr {
            self.pending_cr = false;
            self.decoded.push('\n');
        }
    }

    fn encode(&mut self, text: &str, last: bool) -> io::Result<Vec<u8>> {
        // encoding_rs has no UTF-16 encoders.
        if self.encoding == UTF_16LE || self.encoding == UTF_16BE {
            let le = self.encoding == UTF_16LE;
            let mut out = Vec::with_capacity(text.len() * 2);
            for unit in text.encode_utf16() {
                let bytes = if le {
                    unit.to_le_bytes()
                } else {
                    unit.to_be_bytes()
                };
                out.extend_from_slice(&bytes);
            }
            return Ok(out);
        }

        let encoding = self.encoding;
        let encoder = self.encoder.get_or_insert_with(|| encoding.new_encoder());
        let mut out = Vec::new();
        let mut src = text;
        loop {
            let needed = encoder
                .max_buffer_length_from_utf8_without_replacement(src.len())
                .unwrap_or(src.len() * 4 + 16);
            out.reserve(needed);
            let (result, read) =
                encoder.encode_from_utf8_to_vec_without_replacement(src, &mut out, last);
            src = &src[read..];
            match result {
                EncoderResult::InputEmpty => return Ok(out),
                EncoderResult::OutputFull => continue,
                EncoderResult::Unmappable(c) => match self.errors {
                    TextErrors::Strict => {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            format!("{:?} cannot be encoded as {}", c, encoding.name()),
                        ));
                    }
                    TextErrors::Replace => out.push(b'?'),
                },
            }
        }
    }
}

impl std::fmt::Debug for TextStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextStream")
            .field("inner", &self.inner)
            .field("encoding", &self.encoding.name())
            .field("errors", &self.errors)
            .field("newline", &self.newline)
            .finish()
    }
}

/// An opened resource.
#[derive(Debug)]
pub enum Stream {
    /// Opened with a `b` mode.
    Binary(ByteStream),
    /// Opened with a `t` mode (or no type character).
    Text(TextStream),
}

impl Stream {
    /// Returns `true` for text streams.
    pub fn is_text(&self) -> bool {
        matches!(self, Stream::Text(_))
    }

    /// Returns the byte stream, unwrapping the text layer if present.
    pub fn into_binary(self) -> ByteStream {
        match self {
            Stream::Binary(stream) => stream,
            Stream::Text(stream) => stream.into_inner(),
        }
    }

    /// Returns the text stream, or `None` for binary streams.
    pub fn into_text(self) -> Option<TextStream> {
        match self {
            Stream::Text(stream) => Some(stream),
            Stream::Binary(_) => None,
        }
    }

    /// Flushes and releases the stream.
    pub fn close(self) -> io::Result<()> {
        match self {
            Stream::Binary(stream) => stream.close(),
            Stream::Text(stream) => stream.close(),
        }
    }
}

/// Layers a raw stream according to `options`.
pub fn open(raw: RawStream, options: &OpenOptions) -> Stream {
    let mode = options.mode();
    let bytes = ByteStream::new(raw, mode, options.buffering_policy());
    if mode.is_binary() {
        Stream::Binary(bytes)
    } else {
        Stream::Text(TextStream::new(bytes, options))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cursor(bytes: &[u8]) -> RawStream {
        Box::new(Cursor::new(bytes.to_vec()))
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let mut stream = ReadOnly::from_bytes(b"abc".to_vec());
        let err = stream.write(b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
        let mut out = String::new();
        stream.read_to_string(&mut out).unwrap();
        assert_eq!(out, "abc");
    }

    #[test]
    fn test_byte_stream_direction() {
        let mode = OpenMode::parse("rb").unwrap();
        let mut stream = ByteStream::new(cursor(b"data"), mode, Buffering::Default);
        assert!(stream.write(b"x").is_err());
        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"data");

        let mode = OpenMode::parse("wb").unwrap();
        let mut stream = ByteStream::new(cursor(b""), mode, Buffering::Block(16));
        let mut buf = [0u8; 4];
        assert!(stream.read(&mut buf).is_err());
        stream.write_all(b"hello").unwrap();
        stream.close().unwrap();
    }

    #[test]
    fn test_universal_newlines() {
        let options = OpenOptions::new("r").unwrap();
        let mut stream = open(cursor(b"a\r\nb\rc\n"), &options).into_text().unwrap();
        assert_eq!(stream.read_to_string().unwrap(), "a\nb\nc\n");
    }

    #[test]
    fn test_read_line() {
        let options = OpenOptions::new("r").unwrap();
        let mut stream = open(cursor(b"one\ntwo"), &options).into_text().unwrap();
        assert_eq!(stream.read_line().unwrap().as_deref(), Some("one\n"));
        assert_eq!(stream.read_line().unwrap().as_deref(), Some("two"));
        assert_eq!(stream.read_line().unwrap(), None);
    }

    #[test]
    fn test_strict_decode_error() {
        let options = OpenOptions::new("r").unwrap();
        let mut stream = open(cursor(&[0x66, 0xff, 0x66]), &options)
            .into_text()
            .unwrap();
        let err = stream.read_to_string().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_replace_decode_error() {
        let options = OpenOptions::new("r").unwrap().errors(TextErrors::Replace);
        let mut stream = open(cursor(&[0x66, 0xff, 0x66]), &options)
            .into_text()
            .unwrap();
        assert_eq!(stream.read_to_string().unwrap(), "f\u{fffd}f");
    }

    #[test]
    fn test_latin1_round_trip() {
        let options = OpenOptions::new("r").unwrap().encoding("latin1").unwrap();
        let mut stream = open(cursor(&[0x63, 0x61, 0x66, 0xe9]), &options)
            .into_text()
            .unwrap();
        assert_eq!(stream.read_to_string().unwrap(), "café");
    }

    #[test]
    fn test_write_text_encodings() {
        let options = OpenOptions::new("w").unwrap().encoding("utf-16le").unwrap();
        let mut stream = open(cursor(b""), &options).into_text().unwrap();
        stream.write_str("hi").unwrap();
        stream.flush().unwrap();

        let options = OpenOptions::new("w").unwrap().encoding("ascii").unwrap();
        let mut stream = open(cursor(b""), &options).into_text().unwrap();
        // "ascii" is windows-1252 under WHATWG labels; U+4E2D is unmappable.
        let err = stream.write_str("\u{4e2d}").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_crlf_translation_on_write() {
        let options = OpenOptions::new("w+")
            .unwrap()
            .newline(Newline::CrLf)
            .buffering(Buffering::Unbuffered);
        let mut text = open(cursor(b""), &options).into_text().unwrap();
        text.write_str("a\nb").unwrap();
        text.rewind().unwrap();
        let mut raw = Vec::new();
        text.into_inner().read_to_end(&mut raw).unwrap();
        assert_eq!(raw, b"a\r\nb");
    }
}
