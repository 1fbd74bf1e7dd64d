//! Reconciling the indices with the `<manifest>` element.
//!
//! The element can be edited behind the manifest's back (through
//! [`Manifest::element_mut`] or by loading a malformed package), so the
//! indices are rebuilt from it in two phases: a snapshot of every `<item>`
//! is classified first, then the repairs are applied to the tree and the
//! indices are rebuilt. Nothing is mutated while the tree is walked.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use super::Manifest;
use crate::backend::{ArchiveEntry, Handle, Storage};
use crate::href::Href;
use crate::warning::{Warning, WarningKind};

struct Snapshot {
    index: usize,
    id: Option<String>,
    path: Option<String>,
    has_media_type: bool,
}

struct Kept {
    index: usize,
    id: String,
    path: String,
    assigned: bool,
    default_media_type: bool,
}

impl Manifest {
    /// Repairs the `<manifest>` element and rebuilds the indices from it.
    ///
    /// Items whose id the index knows are visited first, then the rest, each
    /// group in document order:
    ///
    /// - items without a usable `href` are dropped
    /// - items with an id the index does not know are dropped
    /// - a second item with an already seen id or path is dropped, so an
    ///   indexed resource always keeps its path against a stray item
    /// - items without an id get a generated one and are registered (bound
    ///   to the source archive entry when it exists)
    /// - items without a media type get the guessed one
    /// - indexed resources whose item is gone are dropped and their scratch
    ///   storage released
    ///
    /// An item whose `href` was changed in the tree keeps its storage under
    /// the new path. Every repair is returned as a [`Warning`].
    pub fn reconcile(&mut self) -> Vec<Warning> {
        self.reconcile_items(false)
    }

    pub(super) fn reconcile_items(&mut self, loading: bool) -> Vec<Warning> {
        let mut warnings = Vec::new();

        let mut snapshot: Vec<Snapshot> = self
            .element
            .children()
            .iter()
            .enumerate()
            .filter_map(|(index, node)| {
                let item = node.as_element().filter(|e| e.local_name() == "item")?;
                Some(Snapshot {
                    index,
                    id: item.attr("id").filter(|id| !id.is_empty()).map(str::to_string),
                    path: item
                        .attr("href")
                        .and_then(|h| Href::from_escaped(h).ok())
                        .map(Href::into_string),
                    has_media_type: item.attr("media-type").is_some_and(|m| !m.trim().is_empty()),
                })
            })
            .collect();

        // Indexed items claim their id and path before anything else.
        snapshot.sort_by_key(|s| {
            let tracked = s.id.as_ref().is_some_and(|id| self.ids.contains_key(id));
            (!tracked, s.index)
        });

        let mut reserved: HashSet<String> = snapshot.iter().filter_map(|s| s.id.clone()).collect();
        reserved.extend(self.ids.keys().cloned());
        let mut seen_ids: HashSet<String> = HashSet::new();
        let mut seen_paths: HashSet<String> = HashSet::new();
        let mut dropped: Vec<usize> = Vec::new();
        let mut kept: Vec<Kept> = Vec::new();

        for entry in snapshot {
            let subject = entry
                .id
                .clone()
                .or_else(|| entry.path.clone())
                .unwrap_or_else(|| format!("item #{}", entry.index));
            let Some(path) = entry.path else {
                warnings.push(Warning::new(
                    WarningKind::MissingHref,
                    subject,
                    "item without a usable href dropped",
                ));
                dropped.push(entry.index);
                continue;
            };
            if !loading
                && entry
                    .id
                    .as_ref()
                    .is_some_and(|id| !self.ids.contains_key(id))
            {
                warnings.push(Warning::new(
                    WarningKind::UnknownItem,
                    subject,
                    format!("item with an id unknown to the manifest dropped ({})", path),
                ));
                dropped.push(entry.index);
                continue;
            }
            if entry.id.as_ref().is_some_and(|id| seen_ids.contains(id)) {
                warnings.push(Warning::new(
                    WarningKind::DuplicateId,
                    subject,
                    format!("second item for the id dropped ({})", path),
                ));
                dropped.push(entry.index);
                continue;
            }
            if seen_paths.contains(&path) {
                warnings.push(Warning::new(
                    WarningKind::DuplicatePath,
                    path,
                    format!("second item for the path dropped ({})", subject),
                ));
                dropped.push(entry.index);
                continue;
            }
            let (id, assigned) = match entry.id {
                Some(id) => (id, false),
                None => {
                    let id = self
                        .options
                        .id_generator
                        .generate(&path, &|candidate| reserved.contains(candidate));
                    warnings.push(Warning::new(
                        WarningKind::AssignedId,
                        &path,
                        format!("item without an id assigned {}", id),
                    ));
                    reserved.insert(id.clone());
                    (id, true)
                }
            };
            if !entry.has_media_type {
                warnings.push(Warning::new(
                    WarningKind::DefaultedMediaType,
                    &path,
                    format!("media type set to {}", self.options.media_types.guess(&path)),
                ));
            }
            seen_ids.insert(id.clone());
            seen_paths.insert(path.clone());
            kept.push(Kept {
                index: entry.index,
                id,
                path,
                assigned,
                default_media_type: !entry.has_media_type,
            });
        }

        // Apply: attribute fixes first, while indices are still valid.
        for k in &kept {
            let media_type = self.options.media_types.guess(&k.path).to_string();
            if let Some(item) = self.element.children_mut()[k.index].as_element_mut() {
                if k.assigned {
                    item.set_attr("id", &k.id);
                }
                if k.default_media_type {
                    item.set_attr("media-type", &media_type);
                }
            }
        }
        dropped.sort_unstable();
        for index in dropped.into_iter().rev() {
            self.element.children_mut().remove(index);
        }

        let old_ids = std::mem::take(&mut self.ids);
        let mut old_handles = std::mem::take(&mut self.handles);
        self.paths.clear();
        let mut by_id: HashMap<&str, Handle> = old_ids
            .iter()
            .filter_map(|(id, path)| old_handles.remove(path).map(|h| (id.as_str(), h)))
            .collect();

        for k in kept {
            match old_ids.get(&k.id).filter(|_| !k.assigned) {
                Some(old_path) => {
                    if let Some(handle) = by_id.remove(k.id.as_str()) {
                        self.handles.insert(k.path.clone(), handle);
                    }
                    if *old_path != k.path {
                        log::debug!(
                            "item {} moved from {} to {} in the tree",
                            k.id,
                            old_path,
                            k.path
                        );
                    }
                }
                None => {
                    if let Some(handle) = self.bind_original(&k.path, &mut warnings) {
                        self.handles.insert(k.path.clone(), handle);
                    }
                }
            }
            self.ids.insert(k.id.clone(), k.path.clone());
            self.paths.insert(k.path, k.id);
        }

        for (id, path) in &old_ids {
            if self.ids.contains_key(id) {
                continue;
            }
            warnings.push(Warning::new(
                WarningKind::DanglingItem,
                id,
                format!("resource {} has no item any more", path),
            ));
            if let Some(handle) = by_id.remove(id.as_str()) {
                if let Err(e) = handle.remove() {
                    log::warn!("failed to release storage of {}: {}", path, e);
                }
            }
        }
        // Handles re-registered above or released; anything left had no id.
        for (path, handle) in old_handles.into_iter().chain(
            by_id
                .into_iter()
                .map(|(id, h)| (id.to_string(), h)),
        ) {
            if let Err(e) = handle.remove() {
                log::warn!("failed to release storage of {}: {}", path, e);
            }
        }

        warnings
    }

    /// Binds a newly registered path to its entry in the source archive.
    fn bind_original(&self, path: &str, warnings: &mut Vec<Warning>) -> Option<Handle> {
        let archive = self.source.as_ref()?;
        let name = self.archive_name(path);
        if archive.contains(&name) {
            return Some(Handle::new(Storage::ArchiveEntry(ArchiveEntry::new(
                Rc::clone(archive),
                name,
            ))));
        }
        warnings.push(Warning::new(
            WarningKind::MissingArchiveEntry,
            path,
            format!("missing file in original archive: {}", name),
        ));
        None
    }
}
