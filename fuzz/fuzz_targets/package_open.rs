//! Fuzz target for Package::open_reader with arbitrary byte input.
//!
//! This target exercises container parsing, package document parsing and
//! manifest reconciliation with malformed or adversarial input. Opening may
//! fail, but it must never panic.
//!
//! Run with: cargo +nightly fuzz run package_open

#![no_main]

use libfuzzer_sys::fuzz_target;
use std::io::Cursor;

use epubfs::{PackOptions, Package};

fuzz_target!(|data: &[u8]| {
    let Ok(package) = Package::open_reader(Cursor::new(data.to_vec())) else {
        return;
    };

    // Read every bound resource and the spine
    for resource in package.manifest().iter() {
        let _ = resource.stat();
    }
    for itemref in package.spine().iter() {
        let _ = itemref.idref();
    }

    // Whatever was opened must pack again
    let _ = package.pack_to_vec(&PackOptions::default().compression(epubfs::Compression::Stored));
});
