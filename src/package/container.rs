//! `META-INF/container.xml`: the pointer to the package document.

use crate::descriptor::{Document, Element};
use crate::media_type::OPF_MEDIA_TYPE;
use crate::{Error, Result};

const CONTAINER_NAMESPACE: &str = "urn:oasis:names:tc:opendocument:xmlns:container";

/// Returns the package document path named by a container file.
///
/// Prefers the first `rootfile` typed as a package document, falling back
/// to the first one with a `full-path`.
pub(crate) fn rootfile(container: &[u8]) -> Result<String> {
    let document = Document::parse(container)?;
    let rootfiles = document
        .root
        .find("rootfiles")
        .map(|r| r.find_all("rootfile").collect::<Vec<_>>())
        .unwrap_or_default();

    rootfiles
        .iter()
        .filter(|e| has_full_path(e))
        .find(|e| e.attr("media-type") == Some(OPF_MEDIA_TYPE))
        .or_else(|| rootfiles.iter().find(|e| has_full_path(e)))
        .and_then(|e| e.attr("full-path"))
        .map(|p| p.trim_matches('/').to_string())
        .ok_or_else(|| Error::InvalidPackage("container names no package document".into()))
}

fn has_full_path(rootfile: &Element) -> bool {
    rootfile
        .attr("full-path")
        .is_some_and(|p| !p.trim_matches('/').is_empty())
}

/// Builds a container file pointing at `opf_path`.
pub(crate) fn generate(opf_path: &str) -> Vec<u8> {
    let mut rootfiles = Element::new("rootfiles");
    rootfiles.push(
        Element::new("rootfile")
            .with_attr("full-path", opf_path)
            .with_attr("media-type", OPF_MEDIA_TYPE),
    );
    let mut root = Element::new("container")
        .with_attr("version", "1.0")
        .with_attr("xmlns", CONTAINER_NAMESPACE);
    root.push(rootfiles);
    Document::new(root).to_bytes()
}
