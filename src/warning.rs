//! Non-fatal repair and degradation reports.
//!
//! Malformed packages are common, so structural problems found while
//! loading, reconciling, remapping or packing are repaired in place and
//! reported as [`Warning`]s rather than errors. Every warning is also sent
//! to the `log` facade at `warn` level when it is created.

use std::fmt;

/// The kind of repair or degradation a [`Warning`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum WarningKind {
    /// A manifest item without an `href` was dropped.
    MissingHref,
    /// A second manifest item with an already used id was dropped.
    DuplicateId,
    /// A second manifest item with an already used path was dropped.
    DuplicatePath,
    /// A manifest item without an `id` was given one.
    AssignedId,
    /// A manifest item whose id the index does not know was dropped.
    UnknownItem,
    /// An indexed resource no longer present in the tree was dropped.
    DanglingItem,
    /// A manifest item without a `media-type` was given the default.
    DefaultedMediaType,
    /// A manifest item names an entry the source archive does not contain.
    MissingArchiveEntry,
    /// A spine `itemref` was dropped (unknown, missing or duplicate idref).
    DanglingItemref,
    /// A resource could not be read while packing and was left out.
    OmittedFromPack,
    /// A resource could not be scanned for links and was left unchanged.
    RemapSkipped,
}

impl WarningKind {
    /// Returns a short stable name for the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingHref => "missing-href",
            Self::DuplicateId => "duplicate-id",
            Self::DuplicatePath => "duplicate-path",
            Self::AssignedId => "assigned-id",
            Self::UnknownItem => "unknown-item",
            Self::DanglingItem => "dangling-item",
            Self::DefaultedMediaType => "defaulted-media-type",
            Self::MissingArchiveEntry => "missing-archive-entry",
            Self::DanglingItemref => "dangling-itemref",
            Self::OmittedFromPack => "omitted-from-pack",
            Self::RemapSkipped => "remap-skipped",
        }
    }
}

impl fmt::Display for WarningKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A non-fatal problem that was repaired or worked around.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    /// What happened.
    pub kind: WarningKind,
    /// The id or path concerned.
    pub subject: String,
    /// Human-readable detail.
    pub message: String,
}

impl Warning {
    /// Creates a warning and logs it.
    pub fn new(kind: WarningKind, subject: impl Into<String>, message: impl Into<String>) -> Self {
        let warning = Self {
            kind,
            subject: subject.into(),
            message: message.into(),
        };
        log::warn!("{}", warning);
        warning
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.kind, self.subject, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let w = Warning::new(WarningKind::DuplicateId, "ch1", "second item dropped");
        assert_eq!(w.to_string(), "[duplicate-id] ch1: second item dropped");
    }
}
