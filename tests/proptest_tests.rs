//! Property-based tests using proptest.
//!
//! These tests verify invariants of the manifest and link rewriting
//! using randomly generated inputs.

use std::collections::BTreeSet;

use epubfs::href;
use epubfs::media_type::LinkSyntax;
use epubfs::remap::{PathMap, remap_text};
use epubfs::{Href, Manifest, Source};
use proptest::prelude::*;

/// Strategy for generating resource paths.
///
/// - 1-3 segments separated by '/'
/// - Each segment is 1-8 characters, possibly with spaces and dots
/// - Never `.` or `..`
fn path_strategy() -> impl Strategy<Value = String> {
    proptest::collection::vec("[a-zA-Z0-9][a-zA-Z0-9 _.-]{0,7}", 1..4)
        .prop_map(|parts| parts.join("/"))
        .prop_filter("must not contain dot segments", |s| {
            !s.split('/').any(|seg| seg == "." || seg == "..")
        })
}

fn distinct_paths(max: usize) -> impl Strategy<Value = Vec<String>> {
    proptest::collection::btree_set(path_strategy(), 1..max)
        .prop_map(|set| set.into_iter().collect())
}

fn manifest_with(paths: &[String]) -> Manifest {
    let mut manifest = Manifest::new().unwrap();
    for (i, path) in paths.iter().enumerate() {
        manifest
            .add(path, Source::from(format!("resource {}", i).into_bytes()), None, None)
            .unwrap();
    }
    manifest
}

proptest! {
    /// Bytes written through the manifest read back unchanged.
    #[test]
    fn add_then_read_returns_bytes(
        path in path_strategy(),
        data in proptest::collection::vec(any::<u8>(), 0..2048),
    ) {
        let mut manifest = Manifest::new().unwrap();
        manifest.add(&path, Source::from(data.clone()), None, None).unwrap();
        prop_assert_eq!(manifest.read(&path).unwrap(), data);
    }

    /// Paths and ids stay unique and in bijection after any batch rename.
    #[test]
    fn batch_rename_keeps_paths_unique(
        paths in distinct_paths(8),
        shift in 1usize..8,
    ) {
        let mut manifest = manifest_with(&paths);
        let pairs: Vec<(String, String)> = paths
            .iter()
            .enumerate()
            .map(|(i, p)| (p.clone(), paths[(i + shift) % paths.len()].clone()))
            .collect();
        let result = manifest.batch_rename(pairs, false);
        prop_assert!(result.is_complete(), "{:?}", result.failures);

        let listed: BTreeSet<&str> = manifest.paths().collect();
        prop_assert_eq!(listed.len(), paths.len());
        for path in &paths {
            prop_assert!(manifest.exists(path));
            let id = manifest.id_of(path).unwrap();
            prop_assert_eq!(manifest.get(id).unwrap().path(), path.as_str());
        }
        // Rotated contents: each path now holds its predecessor's bytes.
        for (i, path) in paths.iter().enumerate() {
            let from = (i + paths.len() - shift % paths.len()) % paths.len();
            prop_assert_eq!(
                manifest.read(path).unwrap(),
                format!("resource {}", from).into_bytes()
            );
        }
    }

    /// Renaming away and back restores the id and storage binding.
    #[test]
    fn rename_round_trip_keeps_identity(
        paths in distinct_paths(5),
        detour in path_strategy(),
    ) {
        prop_assume!(!paths.contains(&detour));
        let mut manifest = manifest_with(&paths);
        let path = &paths[0];
        let id = manifest.id_of(path).unwrap().to_string();
        let handle = manifest.handle(path).unwrap().id();

        manifest.rename(path, &detour, false).unwrap();
        prop_assert!(!manifest.exists(path));
        manifest.rename(&detour, path, false).unwrap();

        prop_assert_eq!(manifest.id_of(path), Some(id.as_str()));
        prop_assert_eq!(manifest.handle(path).unwrap().id(), handle);
    }

    /// `relpath` inverts `join` for normalized paths.
    #[test]
    fn relpath_inverts_join(target in path_strategy(), base in path_strategy()) {
        let target = Href::new(&target).unwrap().into_string();
        let base_dir = href::dirname(&base);
        let relative = href::relpath(&target, base_dir);
        prop_assert_eq!(href::normpath(&href::join(base_dir, &relative)), target);
    }

    /// Escaping is undone by unescaping.
    #[test]
    fn escape_round_trips(path in path_strategy()) {
        prop_assert_eq!(href::unescape(&href::escape(&path)), path);
    }

    /// Text without references to moved paths is never modified.
    #[test]
    fn remap_leaves_unrelated_text(text in "[a-z <>=\"/.]{0,64}") {
        let map = PathMap::single("Text/moved.xhtml", "Text/sub/moved.xhtml");
        prop_assert_eq!(
            remap_text(&text, LinkSyntax::Html, "Text/a.xhtml", "Text/a.xhtml", &map),
            text
        );
    }
}
