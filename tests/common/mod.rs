//! Shared test utilities for integration tests.
//!
//! Fixture EPUBs are built in memory with the `zip` writer so each test
//! controls exactly which entries, items and itemrefs exist.
//!
//! Note: `#![allow(dead_code)]` is required because each integration test file
//! compiles as a separate crate and may only use a subset of these helpers.

#![allow(dead_code)]

use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

pub const CONTAINER: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>
"#;

/// A manifest item: `(id, href, media type)`.
pub type Item<'a> = (&'a str, &'a str, &'a str);

/// Renders a package document with the given items and spine.
pub fn opf(items: &[Item<'_>], spine: &[&str]) -> String {
    let mut out = String::from(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="uid">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:identifier id="uid">urn:uuid:00000000-0000-0000-0000-000000000000</dc:identifier>
    <dc:title>Fixture</dc:title>
    <dc:language>en</dc:language>
  </metadata>
  <manifest>
"#,
    );
    for (id, href, media_type) in items {
        out.push_str(&format!(
            "    <item id=\"{}\" href=\"{}\" media-type=\"{}\"/>\n",
            id, href, media_type
        ));
    }
    out.push_str("  </manifest>\n  <spine>\n");
    for idref in spine {
        out.push_str(&format!("    <itemref idref=\"{}\"/>\n", idref));
    }
    out.push_str("  </spine>\n</package>\n");
    out
}

/// Builds an EPUB with `OEBPS/content.opf` and extra entries.
///
/// `entries` paths are container paths (`OEBPS/Text/a.xhtml`).
pub fn build_epub(opf: &str, entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

    writer.start_file("mimetype", stored).unwrap();
    writer.write_all(b"application/epub+zip").unwrap();
    writer.start_file("META-INF/container.xml", stored).unwrap();
    writer.write_all(CONTAINER.as_bytes()).unwrap();
    writer.start_file("OEBPS/content.opf", stored).unwrap();
    writer.write_all(opf.as_bytes()).unwrap();
    for (name, data) in entries {
        writer.start_file(*name, stored).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// A small book: two chapters linking to each other, a stylesheet and an
/// image, plus an entry the manifest does not mention.
pub fn sample_epub() -> Vec<u8> {
    let items = [
        ("ch1", "Text/ch1.xhtml", "application/xhtml+xml"),
        ("ch2", "Text/ch2.xhtml", "application/xhtml+xml"),
        ("css", "Styles/main.css", "text/css"),
        ("img", "Images/cover.png", "image/png"),
    ];
    build_epub(
        &opf(&items, &["ch1", "ch2"]),
        &[
            (
                "OEBPS/Text/ch1.xhtml",
                br#"<html><head><link rel="stylesheet" href="../Styles/main.css"/></head><body><a href="ch2.xhtml#top">next</a><img src="../Images/cover.png"/></body></html>"#,
            ),
            (
                "OEBPS/Text/ch2.xhtml",
                br#"<html><body><a href="ch1.xhtml">back</a><a href="http://example.com/x">web</a></body></html>"#,
            ),
            (
                "OEBPS/Styles/main.css",
                b"body { background: url(../Images/cover.png) }",
            ),
            ("OEBPS/Images/cover.png", b"\x89PNG fake"),
            ("META-INF/com.apple.ibooks.display-options.xml", b"<display_options/>"),
        ],
    )
}

/// Writes bytes to `dir/name` and returns the path.
pub fn write_file(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

/// Returns every entry of a zip as `(name, bytes)` in archive order.
pub fn read_zip(bytes: &[u8]) -> Vec<(String, Vec<u8>)> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
    let mut entries = Vec::new();
    for i in 0..archive.len() {
        let mut file = archive.by_index(i).unwrap();
        let mut data = Vec::new();
        file.read_to_end(&mut data).unwrap();
        entries.push((file.name().to_string(), data));
    }
    entries
}

/// Returns one entry of a zip.
pub fn zip_entry(bytes: &[u8], name: &str) -> Option<Vec<u8>> {
    read_zip(bytes)
        .into_iter()
        .find(|(n, _)| n == name)
        .map(|(_, data)| data)
}

/// Returns the compression method of the first entry.
pub fn first_entry_method(bytes: &[u8]) -> (String, CompressionMethod) {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
    let file = archive.by_index(0).unwrap();
    (file.name().to_string(), file.compression())
}
