//! Fuzz target for link rewriting with arbitrary text.
//!
//! The input is split into a document and a path; the document is scanned
//! with every link syntax while the path is moved into a subdirectory.
//!
//! Run with: cargo +nightly fuzz run remap_links

#![no_main]

use libfuzzer_sys::fuzz_target;

use epubfs::media_type::LinkSyntax;
use epubfs::remap::{PathMap, remap_text};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let (path, body) = text.split_once('\n').unwrap_or(("Text/b.xhtml", text));
    let Ok(path) = epubfs::Href::new(path) else {
        return;
    };
    let moved = format!("moved/{}", path);
    let map = PathMap::single(path.as_str(), moved.as_str());

    for syntax in [LinkSyntax::Css, LinkSyntax::Html, LinkSyntax::Xml] {
        let _ = remap_text(body, syntax, "Text/a.xhtml", "Text/a.xhtml", &map);
        let _ = remap_text(body, syntax, "Text/a.xhtml", "Other/a.xhtml", &map);
    }
});
