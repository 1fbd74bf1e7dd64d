//! Integration tests for manifest operations on opened packages.
//!
//! These tests verify that:
//! - Opening binds items to their archive entries and repairs bad items
//! - Writing to an archive-backed resource materializes it without touching
//!   the source archive
//! - Removal releases scratch storage only
//! - Renames keep ids and handles stable
//! - Queries see the live state

mod common;

use std::io::{Cursor, Read, Write};

use epubfs::descriptor::Element;
use epubfs::{
    BackendKind, Error, ExternalOpener, OverwritePolicy, Package, ReadOnly, Source, WarningKind,
};

use common::{build_epub, opf, sample_epub, write_file};

fn open_sample() -> Package {
    Package::open_reader(Cursor::new(sample_epub())).unwrap()
}

// ============================================================================
// Opening
// ============================================================================

#[test]
fn test_open_binds_archive_entries() {
    let package = open_sample();
    assert!(package.warnings().is_empty(), "{:?}", package.warnings());
    assert_eq!(package.opf_path(), "OEBPS/content.opf");
    assert_eq!(package.opf_dir(), "OEBPS");

    let manifest = package.manifest();
    assert_eq!(manifest.len(), 4);
    let ids: Vec<&str> = manifest.ids().collect();
    assert_eq!(ids, ["ch1", "ch2", "css", "img"]);
    for resource in manifest.iter() {
        assert_eq!(resource.kind(), Some(BackendKind::ArchiveEntry));
    }
    assert_eq!(manifest.get("css").unwrap().archive_name(), "OEBPS/Styles/main.css");

    let order: Vec<&str> = package.spine().iter().map(|r| r.idref()).collect();
    assert_eq!(order, ["ch1", "ch2"]);
}

#[test]
fn test_open_repairs_malformed_items() {
    let items = [
        ("a", "a.xhtml", "application/xhtml+xml"),
        ("a", "dup.xhtml", "application/xhtml+xml"),
        ("gone", "missing.css", "text/css"),
    ];
    let bytes = build_epub(
        &opf(&items, &["a", "nowhere", "a"]),
        &[("OEBPS/a.xhtml", b"<html/>"), ("OEBPS/dup.xhtml", b"<html/>")],
    );
    let package = Package::open_reader(Cursor::new(bytes)).unwrap();

    let kinds: Vec<WarningKind> = package.warnings().iter().map(|w| w.kind).collect();
    assert_eq!(
        kinds,
        vec![
            WarningKind::DuplicateId,
            WarningKind::MissingArchiveEntry,
            WarningKind::DanglingItemref,
            WarningKind::DanglingItemref,
        ]
    );
    assert_eq!(package.manifest().len(), 2);
    assert!(package.manifest().handle("missing.css").is_none());
    assert_eq!(package.spine().len(), 1);
}

#[test]
fn test_open_rejects_non_packages() {
    let err = Package::open_reader(Cursor::new(b"not a zip".to_vec())).unwrap_err();
    assert!(err.is_io(), "got: {:?}", err);

    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    writer
        .start_file(
            "mimetype",
            zip::write::SimpleFileOptions::default()
                .compression_method(zip::CompressionMethod::Stored),
        )
        .unwrap();
    writer.write_all(b"application/epub+zip").unwrap();
    let bytes = writer.finish().unwrap().into_inner();
    match Package::open_reader(Cursor::new(bytes)) {
        Err(Error::InvalidPackage(msg)) => assert!(msg.contains("container.xml")),
        Err(e) => panic!("Expected InvalidPackage, got: {:?}", e),
        Ok(_) => panic!("Expected InvalidPackage, got a package"),
    }
}

#[test]
fn test_reconcile_keeps_indexed_resources() {
    let mut package = open_sample();
    let manifest = package.manifest_mut();
    manifest.write_text("Styles/main.css", "p { color: red }").unwrap();
    let storage = manifest
        .handle("Styles/main.css")
        .unwrap()
        .temp_name()
        .unwrap()
        .to_string();

    let element = manifest.element_mut();
    element.children_mut().insert(
        0,
        Element::new("item")
            .with_attr("id", "stray")
            .with_attr("href", "Styles/main.css")
            .with_attr("media-type", "text/css")
            .into(),
    );
    element.push(
        Element::new("item")
            .with_attr("id", "ghost")
            .with_attr("href", "Text/ghost.xhtml"),
    );
    element.push(Element::new("item").with_attr("href", "Styles/main.css"));

    let warnings = package.reconcile();
    let kinds: Vec<WarningKind> = warnings.iter().map(|w| w.kind).collect();
    assert_eq!(
        kinds,
        vec![
            WarningKind::UnknownItem,
            WarningKind::UnknownItem,
            WarningKind::DuplicatePath,
        ]
    );

    let manifest = package.manifest_mut();
    assert_eq!(manifest.len(), 4);
    assert_eq!(manifest.id_of("Styles/main.css"), Some("css"));
    assert!(manifest.scratch().exists(&storage));
    assert_eq!(manifest.read_text("Styles/main.css").unwrap(), "p { color: red }");
    assert!(!manifest.exists("Text/ghost.xhtml"));
    assert_eq!(manifest.element().elements().count(), 4);
}

// ============================================================================
// Copy-on-write
// ============================================================================

#[test]
fn test_write_materializes_archive_entry() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_file(dir.path(), "book.epub", &sample_epub());
    let before = std::fs::read(&source).unwrap();

    let mut package = Package::open(&source).unwrap();
    let manifest = package.manifest_mut();
    let handle_before = manifest.handle("Styles/main.css").unwrap().id();
    manifest.write_text("Styles/main.css", "p { color: red }").unwrap();

    let css = manifest.get("css").unwrap();
    assert_eq!(css.kind(), Some(BackendKind::TempFile));
    assert_ne!(css.handle().unwrap().id(), handle_before);
    assert_eq!(manifest.read_text("Styles/main.css").unwrap(), "p { color: red }");

    let archive = package.source_archive().unwrap();
    assert_eq!(
        archive.read("OEBPS/Styles/main.css").unwrap(),
        b"body { background: url(../Images/cover.png) }"
    );
    drop(package);
    assert_eq!(std::fs::read(&source).unwrap(), before);
}

#[test]
fn test_read_does_not_materialize() {
    let mut package = open_sample();
    let manifest = package.manifest_mut();
    let id = manifest.handle("Images/cover.png").unwrap().id();
    assert_eq!(manifest.read("Images/cover.png").unwrap(), b"\x89PNG fake");
    let mut stream = manifest.open("Images/cover.png", "rb").unwrap().into_binary();
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).unwrap();
    drop(stream);
    assert_eq!(manifest.handle("Images/cover.png").unwrap().id(), id);
}

#[test]
fn test_append_keeps_original_bytes() {
    let mut package = open_sample();
    let manifest = package.manifest_mut();
    let mut stream = manifest.open("Styles/main.css", "ab").unwrap().into_binary();
    stream.write_all(b"\np { margin: 0 }").unwrap();
    stream.close().unwrap();
    assert_eq!(
        manifest.read_text("Styles/main.css").unwrap(),
        "body { background: url(../Images/cover.png) }\np { margin: 0 }"
    );
}

#[test]
fn test_read_only_external_is_materialized_on_write() {
    let mut package = Package::new().unwrap();
    let manifest = package.manifest_mut();
    let opener =
        ExternalOpener::read_only(|| Ok(Box::new(ReadOnly::from_bytes(b"<svg/>".to_vec()))));
    manifest
        .add("Images/logo.svg", Source::from(opener), Some("logo"), None)
        .unwrap();
    assert_eq!(manifest.get("logo").unwrap().kind(), Some(BackendKind::External));
    assert_eq!(manifest.read("Images/logo.svg").unwrap(), b"<svg/>");

    manifest.write("Images/logo.svg", b"<svg width=\"1\"/>").unwrap();
    assert_eq!(manifest.get("logo").unwrap().kind(), Some(BackendKind::TempFile));
    assert_eq!(manifest.read("Images/logo.svg").unwrap(), b"<svg width=\"1\"/>");
}

// ============================================================================
// Removal
// ============================================================================

#[test]
fn test_remove_archive_backed_leaves_archive_untouched() {
    let mut package = open_sample();
    package.remove("Text/ch2.xhtml").unwrap();
    assert!(!package.manifest().exists("Text/ch2.xhtml"));
    assert!(!package.spine().contains("ch2"));
    assert!(package
        .source_archive()
        .unwrap()
        .contains("OEBPS/Text/ch2.xhtml"));
}

#[test]
fn test_remove_temp_backed_deletes_storage() {
    let mut package = open_sample();
    let manifest = package.manifest_mut();
    manifest.write("Text/ch1.xhtml", b"<html/>").unwrap();
    let name = manifest
        .handle("Text/ch1.xhtml")
        .unwrap()
        .temp_name()
        .unwrap()
        .to_string();
    assert!(manifest.scratch().exists(&name));
    manifest.remove("Text/ch1.xhtml").unwrap();
    assert!(!manifest.scratch().exists(&name));
}

#[test]
fn test_close_cleans_scratch_storage() {
    let mut package = open_sample();
    package.manifest_mut().write("Text/ch1.xhtml", b"x").unwrap();
    let scratch = std::rc::Rc::clone(package.manifest().scratch());
    let archive = std::rc::Rc::clone(package.source_archive().unwrap());
    package.close();
    assert!(scratch.is_cleaned());
    assert!(archive.is_closed());
}

// ============================================================================
// Renames and queries
// ============================================================================

#[test]
fn test_rename_round_trip_keeps_handle() {
    let mut package = open_sample();
    let manifest = package.manifest_mut();
    let handle = manifest.handle("Images/cover.png").unwrap().id();

    manifest.rename("Images/cover.png", "Images/front.png", false).unwrap();
    assert_eq!(manifest.get("img").unwrap().path(), "Images/front.png");
    assert_eq!(manifest.get("img").unwrap().href(), "Images/front.png");
    manifest.rename("Images/front.png", "Images/cover.png", false).unwrap();

    assert_eq!(manifest.handle("Images/cover.png").unwrap().id(), handle);
    assert_eq!(manifest.read("Images/cover.png").unwrap(), b"\x89PNG fake");
}

#[test]
fn test_replace_policy() {
    let mut package = open_sample();
    let manifest = package.manifest_mut();
    let err = manifest
        .replace("Text/ch2.xhtml", "Text/ch1.xhtml", OverwritePolicy::Error)
        .unwrap_err();
    assert!(err.is_already_exists());
    assert_eq!(manifest.len(), 4);

    manifest
        .replace("Text/ch2.xhtml", "Text/ch1.xhtml", OverwritePolicy::Overwrite)
        .unwrap();
    assert_eq!(manifest.len(), 3);
    assert_eq!(manifest.id_of("Text/ch1.xhtml"), Some("ch2"));
    assert!(manifest.get("ch1").is_none());
}

#[test]
fn test_queries_see_live_state() {
    let mut package = open_sample();
    let manifest = package.manifest_mut();
    manifest
        .add("Text/notes/n1.xhtml", Source::Empty, Some("n1"), None)
        .unwrap();

    let direct: Vec<&str> = manifest
        .glob("*.xhtml", Some("Text"), false)
        .unwrap()
        .iter()
        .map(|r| r.path())
        .collect();
    assert_eq!(direct, ["Text/ch1.xhtml", "Text/ch2.xhtml"]);
    assert_eq!(manifest.glob("**/*.xhtml", None, false).unwrap().len(), 3);
    assert_eq!(manifest.rglob("*.css", None, false).unwrap().len(), 1);
    assert_eq!(manifest.filter_by_media_type("image/*").len(), 1);
    assert_eq!(manifest.iterdir("Text/notes").len(), 1);
}

#[test]
fn test_add_from_disk_path() {
    let dir = tempfile::tempdir().unwrap();
    let file = write_file(dir.path(), "extra.css", b"h1 {}");
    let mut package = Package::new().unwrap();
    let manifest = package.manifest_mut();
    manifest.add("Styles/extra.css", Source::from(file.as_path()), None, None).unwrap();
    assert_eq!(manifest.read("Styles/extra.css").unwrap(), b"h1 {}");

    let missing = dir.path().join("nope.css");
    let err = manifest.add("Styles/nope.css", Source::from(missing), None, None).unwrap_err();
    match err {
        Error::InvalidArgument(_) => {}
        e => panic!("Expected InvalidArgument, got: {:?}", e),
    }
    assert!(!manifest.exists("Styles/nope.css"));
}
