//! Renaming resources, singly and in batches.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use super::{Manifest, Resource, normalize};
use crate::remap::{self, PathMap};
use crate::warning::Warning;
use crate::{Error, Result};

/// What [`Manifest::replace`] does when the destination exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverwritePolicy {
    /// Fail with [`Error::AlreadyExists`].
    #[default]
    Error,
    /// Remove the destination first, discarding its contents.
    Overwrite,
}

/// Outcome of a single rename.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct RenameResult {
    /// The previous path.
    pub old: String,
    /// The new path.
    pub new: String,
    /// Resources whose links were rewritten (empty without repair).
    pub changed: BTreeSet<String>,
    /// Resources the link repair had to skip.
    pub warnings: Vec<Warning>,
}

/// Outcome of a batch rename.
///
/// Renames that could not be applied are listed in `failures`, keyed by
/// source path; the rest were applied.
#[derive(Debug, Default)]
#[must_use]
pub struct BatchRenameResult {
    /// Applied renames, as `(old, new)` pairs in input order.
    pub renamed: Vec<(String, String)>,
    /// Renames that were not applied.
    pub failures: BTreeMap<String, Error>,
    /// Resources whose links were rewritten (empty without repair).
    pub changed: BTreeSet<String>,
    /// Resources the link repair had to skip.
    pub warnings: Vec<Warning>,
}

impl BatchRenameResult {
    /// Returns `true` if every requested rename was applied.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Returns the applied renames as a path map.
    pub fn path_map(&self) -> PathMap {
        self.renamed.iter().cloned().collect()
    }
}

impl Manifest {
    /// Moves a resource to `new_path`.
    ///
    /// The id and the storage binding follow the resource. With `repair`,
    /// relative links to the old path are rewritten across the package's
    /// text resources, and the moved resource's own relative links are
    /// rebased onto its new directory.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if `path` is unknown
    /// - [`Error::AlreadyExists`] if `new_path` is taken
    pub fn rename(&mut self, path: &str, new_path: &str, repair: bool) -> Result<RenameResult> {
        let old = normalize(path)?;
        let new = normalize(new_path)?;
        let id = self
            .paths
            .get(&old)
            .cloned()
            .ok_or_else(|| Error::not_found(&old))?;
        let mut result = RenameResult {
            old,
            new,
            changed: BTreeSet::new(),
            warnings: Vec::new(),
        };
        if result.old == result.new {
            return Ok(result);
        }
        if self.paths.contains_key(&result.new) {
            return Err(Error::already_exists(result.new));
        }

        self.paths.remove(&result.old);
        if let Some(handle) = self.handles.remove(&result.old) {
            self.handles.insert(result.new.clone(), handle);
        }
        self.paths.insert(result.new.clone(), id.clone());
        self.ids.insert(id.clone(), result.new.clone());
        self.set_item_href(&id, &result.new);

        if repair {
            let map = PathMap::single(&result.old, &result.new);
            let remapped = remap::remap_links(self, &map);
            result.changed = remapped.changed;
            result.warnings = remapped.skipped;
        }
        Ok(result)
    }

    /// Moves `path` onto `dest`, which may already exist.
    ///
    /// An existing destination is handled by `policy`; with
    /// [`OverwritePolicy::Overwrite`] it is removed first and its contents
    /// are lost. Links are not repaired.
    pub fn replace(
        &mut self,
        path: &str,
        dest: &str,
        policy: OverwritePolicy,
    ) -> Result<RenameResult> {
        let old = normalize(path)?;
        let new = normalize(dest)?;
        if !self.paths.contains_key(&old) {
            return Err(Error::not_found(old));
        }
        if old != new && self.paths.contains_key(&new) {
            match policy {
                OverwritePolicy::Error => return Err(Error::already_exists(new)),
                OverwritePolicy::Overwrite => self.remove(&new)?,
            }
        }
        self.rename(&old, &new, false)
    }

    /// Applies many renames at once.
    ///
    /// Renames are validated against the state after the whole batch, so
    /// swaps and rotations (`a → b`, `b → a`) work. A rename fails, without
    /// affecting the others, if its source is unknown or listed twice, its
    /// target is requested twice, or its target stays occupied. With
    /// `repair`, links are rewritten in a single pass over the combined
    /// path map.
    ///
    /// # Example
    ///
    /// ```rust
    /// use epubfs::{Manifest, Source};
    ///
    /// # fn main() -> epubfs::Result<()> {
    /// let mut manifest = Manifest::new()?;
    /// manifest.add("a.txt", Source::from(b"A".to_vec()), None, None)?;
    /// manifest.add("b.txt", Source::from(b"B".to_vec()), None, None)?;
    ///
    /// let result = manifest.batch_rename([("a.txt", "b.txt"), ("b.txt", "a.txt")], false);
    /// assert!(result.is_complete());
    /// assert_eq!(manifest.read("a.txt")?, b"B");
    /// # Ok(())
    /// # }
    /// ```
    pub fn batch_rename<I, A, B>(&mut self, pairs: I, repair: bool) -> BatchRenameResult
    where
        I: IntoIterator<Item = (A, B)>,
        A: AsRef<str>,
        B: AsRef<str>,
    {
        let mut result = BatchRenameResult::default();
        let mut moves: Vec<(String, String, String)> = Vec::new();
        let mut sources: HashSet<String> = HashSet::new();
        let mut targets: HashSet<String> = HashSet::new();

        for (from, to) in pairs {
            let old = match normalize(from.as_ref()) {
                Ok(p) => p,
                Err(e) => {
                    result.failures.insert(from.as_ref().to_string(), e);
                    continue;
                }
            };
            let new = match normalize(to.as_ref()) {
                Ok(p) => p,
                Err(e) => {
                    result.failures.insert(old, e);
                    continue;
                }
            };
            let Some(id) = self.paths.get(&old).cloned() else {
                result.failures.insert(old.clone(), Error::not_found(old));
                continue;
            };
            if !sources.insert(old.clone()) {
                log::debug!("ignoring repeated rename of {} to {}", old, new);
                continue;
            }
            if old == new {
                continue;
            }
            if !targets.insert(new.clone()) {
                result.failures.insert(old, Error::already_exists(new));
                continue;
            }
            moves.push((old, new, id));
        }

        // A target held by a resource that does not move away is a
        // collision; dropping one move can block another, so iterate.
        loop {
            let blocked: Vec<usize> = {
                let moving: HashSet<&str> = moves.iter().map(|(old, _, _)| old.as_str()).collect();
                moves
                    .iter()
                    .enumerate()
                    .filter(|(_, (_, new, _))| {
                        self.paths.contains_key(new) && !moving.contains(new.as_str())
                    })
                    .map(|(i, _)| i)
                    .collect()
            };
            if blocked.is_empty() {
                break;
            }
            for i in blocked.into_iter().rev() {
                let (old, new, _) = moves.remove(i);
                result.failures.insert(old, Error::already_exists(new));
            }
        }

        let detached: Vec<_> = moves
            .into_iter()
            .map(|(old, new, id)| {
                self.paths.remove(&old);
                let handle = self.handles.remove(&old);
                (old, new, id, handle)
            })
            .collect();
        for (old, new, id, handle) in detached {
            self.paths.insert(new.clone(), id.clone());
            self.ids.insert(id.clone(), new.clone());
            if let Some(handle) = handle {
                self.handles.insert(new.clone(), handle);
            }
            self.set_item_href(&id, &new);
            result.renamed.push((old, new));
        }

        if repair && !result.renamed.is_empty() {
            let remapped = remap::remap_links(self, &result.path_map());
            result.changed = remapped.changed;
            result.warnings = remapped.skipped;
        }
        result
    }

    /// Renames every resource accepted by `predicate` to `map(path)`.
    ///
    /// See [`batch_rename`](Self::batch_rename).
    pub fn batch_rename_with<F, P>(
        &mut self,
        mut map: F,
        mut predicate: P,
        repair: bool,
    ) -> BatchRenameResult
    where
        F: FnMut(&str) -> String,
        P: FnMut(&Resource<'_>) -> bool,
    {
        let pairs: Vec<(String, String)> = self
            .iter()
            .filter(|r| predicate(r))
            .map(|r| (r.path().to_string(), map(r.path())))
            .collect();
        self.batch_rename(pairs, repair)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::Source;

    fn manifest_with(paths: &[&str]) -> Manifest {
        let mut m = Manifest::new().unwrap();
        for path in paths {
            m.add(path, Source::from(path.as_bytes().to_vec()), None, None)
                .unwrap();
        }
        m
    }

    #[test]
    fn test_rename_moves_everything() {
        let mut m = manifest_with(&["a.txt"]);
        let id = m.id_of("a.txt").unwrap().to_string();
        let handle = m.handle("a.txt").unwrap().id();

        let result = m.rename("a.txt", "/dir/b.txt", false).unwrap();
        assert_eq!((result.old.as_str(), result.new.as_str()), ("a.txt", "dir/b.txt"));
        assert!(result.changed.is_empty());
        assert_eq!(m.id_of("dir/b.txt"), Some(id.as_str()));
        assert_eq!(m.handle("dir/b.txt").unwrap().id(), handle);
        assert_eq!(m.get(&id).unwrap().href(), "dir/b.txt");
        assert_eq!(m.read("dir/b.txt").unwrap(), b"a.txt");
        assert!(m.handle("a.txt").is_none());
    }

    #[test]
    fn test_rename_errors() {
        let mut m = manifest_with(&["a.txt", "b.txt"]);
        assert!(m.rename("a.txt", "b.txt", false).unwrap_err().is_already_exists());
        assert!(m.rename("zzz", "c.txt", false).unwrap_err().is_not_found());
        let same = m.rename("a.txt", "a.txt", false).unwrap();
        assert_eq!(same.new, "a.txt");
        assert_eq!(m.read("a.txt").unwrap(), b"a.txt");
    }

    #[test]
    fn test_replace_policies() {
        let mut m = manifest_with(&["a.txt", "b.txt"]);
        assert!(
            m.replace("a.txt", "b.txt", OverwritePolicy::Error)
                .unwrap_err()
                .is_already_exists()
        );
        assert_eq!(m.len(), 2);

        let storage = m.handle("b.txt").unwrap().temp_name().unwrap().to_string();
        let _ = m.replace("a.txt", "b.txt", OverwritePolicy::Overwrite).unwrap();
        assert_eq!(m.len(), 1);
        assert_eq!(m.read("b.txt").unwrap(), b"a.txt");
        assert!(!m.scratch().exists(&storage));
        assert!(m.replace("nope", "b.txt", OverwritePolicy::Overwrite).unwrap_err().is_not_found());
    }

    #[test]
    fn test_batch_swap_and_rotation() {
        let mut m = manifest_with(&["a", "b", "c"]);
        let result = m.batch_rename([("a", "b"), ("b", "c"), ("c", "a")], false);
        assert!(result.is_complete());
        assert_eq!(result.renamed.len(), 3);
        assert_eq!(m.read("b").unwrap(), b"a");
        assert_eq!(m.read("c").unwrap(), b"b");
        assert_eq!(m.read("a").unwrap(), b"c");
        assert_eq!(m.len(), 3);
    }

    #[test]
    fn test_batch_partial_failure() {
        let mut m = manifest_with(&["a", "b", "c"]);
        let result = m.batch_rename(
            [("a", "x"), ("b", "c"), ("missing", "y"), ("//", "z"), ("a", "q")],
            false,
        );
        assert_eq!(result.renamed, vec![("a".to_string(), "x".to_string())]);
        assert!(result.failures["b"].is_already_exists());
        assert!(result.failures["missing"].is_not_found());
        assert!(matches!(result.failures["//"], Error::InvalidPath(_)));
        assert!(!result.failures.contains_key("a"));
        assert!(m.exists("x") && m.exists("b") && m.exists("c"));
    }

    #[test]
    fn test_batch_cascading_block() {
        // "a" can only move once "b" moves, and "b" is blocked by "c".
        let mut m = manifest_with(&["a", "b", "c"]);
        let result = m.batch_rename([("a", "b"), ("b", "c")], false);
        assert!(result.renamed.is_empty());
        assert_eq!(result.failures.len(), 2);
        assert_eq!(m.read("a").unwrap(), b"a");
        assert_eq!(m.read("b").unwrap(), b"b");
    }

    #[test]
    fn test_batch_duplicate_target() {
        let mut m = manifest_with(&["a", "b"]);
        let result = m.batch_rename([("a", "z"), ("b", "z")], false);
        assert_eq!(result.renamed.len(), 1);
        assert!(result.failures["b"].is_already_exists());
        assert_eq!(m.read("z").unwrap(), b"a");
    }

    #[test]
    fn test_batch_rename_with() {
        let mut m = manifest_with(&["Text/a.xhtml", "Text/b.xhtml", "style.css"]);
        let result = m.batch_rename_with(
            |path| path.replacen("Text/", "xhtml/", 1),
            |r| r.media_type() == "application/xhtml+xml",
            false,
        );
        assert_eq!(result.renamed.len(), 2);
        let mut paths: Vec<&str> = m.paths().collect();
        paths.sort();
        assert_eq!(paths, vec!["style.css", "xhtml/a.xhtml", "xhtml/b.xhtml"]);
    }
}
