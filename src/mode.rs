//! Open modes, capability masks and stream options.
//!
//! An open mode is a string drawn from the permutations of one access
//! character (`r`, `w`, `x`, `a`), an optional type character (`b` or
//! `t`) and an optional `+`, e.g. `"rb"`, `"w+"`, `"+at"`. Each mode
//! requires a set of [`Capabilities`]; a backend accepts the mode only if
//! its declared mask contains them. Pure reads require nothing and are
//! always legal.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::str::FromStr;

use encoding_rs::{Encoding, UTF_8};

use crate::{Error, Result};

/// Default block size for buffered streams (8 KiB).
pub const DEFAULT_BUFFER_SIZE: usize = 8192;

/// The primary access requested by an open mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    /// `r`: open existing data for reading.
    Read,
    /// `w`: truncate (or create) and write.
    Write,
    /// `x`: create, failing if the data already exists.
    Exclusive,
    /// `a`: create if needed and append.
    Append,
}

/// A parsed, validated open mode.
///
/// # Example
///
/// ```
/// use epubfs::{Access, OpenMode};
///
/// let mode: OpenMode = "r+b".parse().unwrap();
/// assert_eq!(mode.access(), Access::Read);
/// assert!(mode.is_update());
/// assert!(mode.is_binary());
///
/// assert!(!OpenMode::is_valid("rw"));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpenMode {
    access: Access,
    binary: bool,
    update: bool,
}

impl OpenMode {
    /// Read-only binary mode (`"rb"`).
    pub const READ_BINARY: OpenMode = OpenMode {
        access: Access::Read,
        binary: true,
        update: false,
    };

    /// Truncating binary write mode (`"wb"`).
    pub const WRITE_BINARY: OpenMode = OpenMode {
        access: Access::Write,
        binary: true,
        update: false,
    };

    /// Read-only text mode (`"rt"`).
    pub const READ_TEXT: OpenMode = OpenMode {
        access: Access::Read,
        binary: false,
        update: false,
    };

    /// Truncating text write mode (`"wt"`).
    pub const WRITE_TEXT: OpenMode = OpenMode {
        access: Access::Write,
        binary: false,
        update: false,
    };

    /// Parses a mode string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMode`] unless the string is a permutation of
    /// exactly one of `rwxa`, at most one of `bt` and at most one `+`.
    pub fn parse(mode: &str) -> Result<Self> {
        let invalid = || Error::InvalidMode(mode.to_string());
        if mode.is_empty() || mode.len() > 3 {
            return Err(invalid());
        }

        let mut access = None;
        let mut kind = None;
        let mut update = false;
        for c in mode.chars() {
            match c {
                'r' | 'w' | 'x' | 'a' => {
                    if access.is_some() {
                        return Err(invalid());
                    }
                    access = Some(match c {
                        'r' => Access::Read,
                        'w' => Access::Write,
                        'x' => Access::Exclusive,
                        _ => Access::Append,
                    });
                }
                'b' | 't' => {
                    if kind.is_some() {
                        return Err(invalid());
                    }
                    kind = Some(c == 'b');
                }
                '+' => {
                    if update {
                        return Err(invalid());
                    }
                    update = true;
                }
                _ => return Err(invalid()),
            }
        }

        Ok(Self {
            access: access.ok_or_else(invalid)?,
            binary: kind.unwrap_or(false),
            update,
        })
    }

    /// Returns `true` if `mode` is a legal mode string. Has no side effects.
    pub fn is_valid(mode: &str) -> bool {
        Self::parse(mode).is_ok()
    }

    /// Returns the primary access.
    pub fn access(&self) -> Access {
        self.access
    }

    /// Returns `true` for binary (`b`) modes.
    pub fn is_binary(&self) -> bool {
        self.binary
    }

    /// Returns `true` for text modes (`t` or no type character).
    pub fn is_text(&self) -> bool {
        !self.binary
    }

    /// Returns `true` if `+` was given.
    pub fn is_update(&self) -> bool {
        self.update
    }

    /// Returns `true` if the mode allows reading.
    pub fn reads(&self) -> bool {
        self.access == Access::Read || self.update
    }

    /// Returns `true` if the mode may modify data.
    pub fn writes(&self) -> bool {
        self.access != Access::Read || self.update
    }

    /// Returns `true` if opening discards existing contents.
    pub fn truncates(&self) -> bool {
        self.access == Access::Write
    }

    /// Returns the same mode switched to binary.
    pub fn binary(self) -> Self {
        Self {
            binary: true,
            ..self
        }
    }

    /// Returns the capabilities a backend needs to honor this mode.
    pub fn required(&self) -> Capabilities {
        let mut caps = match self.access {
            Access::Read => Capabilities::READ_ONLY,
            Access::Write => Capabilities::WRITE,
            Access::Exclusive => Capabilities::EXCLUSIVE,
            Access::Append => Capabilities::APPEND,
        };
        if self.update {
            caps |= Capabilities::UPDATE;
        }
        caps
    }
}

impl FromStr for OpenMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for OpenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = match self.access {
            Access::Read => 'r',
            Access::Write => 'w',
            Access::Exclusive => 'x',
            Access::Append => 'a',
        };
        write!(f, "{}", c)?;
        if self.update {
            write!(f, "+")?;
        }
        write!(f, "{}", if self.binary { 'b' } else { 't' })
    }
}

/// Returns `true` if `mode` is a legal open mode string.
pub fn check_open_mode(mode: &str) -> bool {
    OpenMode::is_valid(mode)
}

/// A backend's capability mask.
///
/// Reading is implied and has no bit of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Capabilities(u8);

impl Capabilities {
    /// No capabilities beyond reading.
    pub const READ_ONLY: Capabilities = Capabilities(0);
    /// Truncating writes (`w`).
    pub const WRITE: Capabilities = Capabilities(1);
    /// Appending writes (`a`).
    pub const APPEND: Capabilities = Capabilities(1 << 1);
    /// Exclusive creation (`x`).
    pub const EXCLUSIVE: Capabilities = Capabilities(1 << 2);
    /// Read-write access (`+`).
    pub const UPDATE: Capabilities = Capabilities(1 << 3);
    /// Every capability.
    pub const ALL: Capabilities = Capabilities(0b1111);

    /// Returns `true` if every bit of `other` is set in `self`.
    pub fn contains(&self, other: Capabilities) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns `true` if this mask grants anything beyond reading.
    pub fn is_writable(&self) -> bool {
        self.0 != 0
    }

    /// Returns `true` if `mode` is allowed under this mask.
    pub fn allows(&self, mode: &OpenMode) -> bool {
        self.contains(mode.required())
    }
}

impl BitOr for Capabilities {
    type Output = Capabilities;

    fn bitor(self, rhs: Self) -> Self::Output {
        Capabilities(self.0 | rhs.0)
    }
}

impl BitOrAssign for Capabilities {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Buffering policy for an opened stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Buffering {
    /// Use the default block size.
    #[default]
    Default,
    /// Raw, unbuffered I/O.
    Unbuffered,
    /// Line-buffered writes (text streams only; binary streams use the
    /// default block size).
    Line,
    /// An explicit block size.
    Block(usize),
}

impl Buffering {
    /// Builds a policy from the integer convention: `0` unbuffered, `1`
    /// line-buffered, `>1` block size, negative default.
    pub fn from_raw(value: i64) -> Self {
        match value {
            0 => Self::Unbuffered,
            1 => Self::Line,
            n if n > 1 => Self::Block(n as usize),
            _ => Self::Default,
        }
    }

    /// Returns the block size to allocate, if any.
    pub fn block_size(&self) -> Option<usize> {
        match self {
            Self::Unbuffered => None,
            Self::Block(n) => Some(*n),
            Self::Default | Self::Line => Some(DEFAULT_BUFFER_SIZE),
        }
    }
}

/// What to do with bytes that cannot be decoded or characters that cannot
/// be encoded in text mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextErrors {
    /// Fail with `ErrorKind::InvalidData`.
    #[default]
    Strict,
    /// Substitute replacement characters.
    Replace,
}

/// Newline translation for text streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Newline {
    /// Reading maps `\r\n` and `\r` to `\n`; writing leaves `\n` alone.
    #[default]
    Universal,
    /// No translation in either direction.
    Untranslated,
    /// Writing maps `\n` to `\n`; reading is untranslated.
    Lf,
    /// Writing maps `\n` to `\r\n`; reading is untranslated.
    CrLf,
    /// Writing maps `\n` to `\r`; reading is untranslated.
    Cr,
}

/// Options for opening a resource.
///
/// # Example
///
/// ```
/// use epubfs::{Buffering, OpenOptions};
///
/// let options = OpenOptions::new("w")
///     .unwrap()
///     .encoding("utf-16le")
///     .unwrap()
///     .buffering(Buffering::Line);
/// assert!(options.mode().is_text());
/// ```
#[derive(Debug, Clone, Copy)]
pub struct OpenOptions {
    mode: OpenMode,
    buffering: Buffering,
    encoding: Option<&'static Encoding>,
    errors: TextErrors,
    newline: Newline,
}

impl OpenOptions {
    /// Creates options for a mode string.
    pub fn new(mode: &str) -> Result<Self> {
        Ok(Self::from_mode(OpenMode::parse(mode)?))
    }

    /// Creates options for an already parsed mode.
    pub fn from_mode(mode: OpenMode) -> Self {
        Self {
            mode,
            buffering: Buffering::Default,
            encoding: None,
            errors: TextErrors::Strict,
            newline: Newline::Universal,
        }
    }

    /// Sets the buffering policy.
    pub fn buffering(mut self, buffering: Buffering) -> Self {
        self.buffering = buffering;
        self
    }

    /// Sets the text encoding by WHATWG label.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for unknown labels.
    pub fn encoding(mut self, label: &str) -> Result<Self> {
        let encoding = Encoding::for_label(label.as_bytes())
            .ok_or_else(|| Error::InvalidArgument(format!("unknown encoding: {}", label)))?;
        self.encoding = Some(encoding);
        Ok(self)
    }

    /// Sets the text encoding directly.
    pub fn with_encoding(mut self, encoding: &'static Encoding) -> Self {
        self.encoding = Some(encoding);
        self
    }

    /// Sets the decode/encode error policy.
    pub fn errors(mut self, errors: TextErrors) -> Self {
        self.errors = errors;
        self
    }

    /// Sets newline translation.
    pub fn newline(mut self, newline: Newline) -> Self {
        self.newline = newline;
        self
    }

    /// Returns the open mode.
    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// Returns the buffering policy.
    pub fn buffering_policy(&self) -> Buffering {
        self.buffering
    }

    /// Returns the configured encoding, or UTF-8.
    pub fn encoding_or_default(&self) -> &'static Encoding {
        self.encoding.unwrap_or(UTF_8)
    }

    /// Returns the explicitly configured encoding, if any.
    pub fn configured_encoding(&self) -> Option<&'static Encoding> {
        self.encoding
    }

    /// Returns the error policy.
    pub fn error_policy(&self) -> TextErrors {
        self.errors
    }

    /// Returns the newline policy.
    pub fn newline_policy(&self) -> Newline {
        self.newline
    }
}

impl From<OpenMode> for OpenOptions {
    fn from(mode: OpenMode) -> Self {
        Self::from_mode(mode)
    }
}
