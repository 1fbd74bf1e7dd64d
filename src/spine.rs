//! The reading order of a package.

use std::collections::HashSet;

use crate::descriptor::{Element, Node};
use crate::manifest::Manifest;
use crate::warning::{Warning, WarningKind};
use crate::{Error, Result};

/// One `<itemref>` of the spine.
#[derive(Debug, Clone, Copy)]
pub struct ItemRef<'a> {
    element: &'a Element,
}

impl<'a> ItemRef<'a> {
    /// Returns the referenced manifest id.
    pub fn idref(&self) -> &'a str {
        self.element.attr("idref").unwrap_or_default()
    }

    /// Returns `false` only for `linear="no"`.
    pub fn is_linear(&self) -> bool {
        self.element.attr("linear") != Some("no")
    }

    /// Returns an attribute.
    pub fn attr(&self, key: &str) -> Option<&'a str> {
        self.element.attr(key)
    }
}

/// The `<spine>` element: an ordered list of manifest ids.
///
/// # Example
///
/// ```rust
/// use epubfs::Spine;
///
/// let mut spine = Spine::new();
/// spine.push("cover", false).unwrap();
/// spine.push("ch2", true).unwrap();
/// spine.insert(1, "ch1", true).unwrap();
///
/// let order: Vec<&str> = spine.iter().map(|r| r.idref()).collect();
/// assert_eq!(order, ["cover", "ch1", "ch2"]);
/// assert!(!spine.iter().next().unwrap().is_linear());
/// ```
#[derive(Debug, Clone, Default)]
pub struct Spine {
    element: Element,
}

impl Spine {
    /// Creates an empty spine.
    pub fn new() -> Self {
        Self::from_element(Element::new("spine"))
    }

    /// Wraps an existing `<spine>` element.
    pub fn from_element(element: Element) -> Self {
        Self { element }
    }

    /// Returns the element.
    pub fn element(&self) -> &Element {
        &self.element
    }

    /// Returns the element for direct editing.
    pub fn element_mut(&mut self) -> &mut Element {
        &mut self.element
    }

    /// Iterates over itemrefs in reading order.
    pub fn iter(&self) -> impl Iterator<Item = ItemRef<'_>> {
        self.element
            .elements()
            .filter(|e| e.local_name() == "itemref")
            .map(|element| ItemRef { element })
    }

    /// Returns the number of itemrefs.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Returns `true` if there are no itemrefs.
    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    /// Returns `true` if `idref` is in the reading order.
    pub fn contains(&self, idref: &str) -> bool {
        self.position(idref).is_some()
    }

    /// Returns the reading-order position of `idref`.
    pub fn position(&self, idref: &str) -> Option<usize> {
        self.iter().position(|r| r.idref() == idref)
    }

    /// Returns the id of the NCX table of contents (`toc` attribute).
    pub fn toc(&self) -> Option<&str> {
        self.element.attr("toc")
    }

    /// Appends an itemref.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IdAlreadyExists`] if `idref` is already present.
    pub fn push(&mut self, idref: &str, linear: bool) -> Result<()> {
        let itemref = self.new_itemref(idref, linear)?;
        self.element.push(itemref);
        Ok(())
    }

    /// Inserts an itemref at reading-order position `index`.
    pub fn insert(&mut self, index: usize, idref: &str, linear: bool) -> Result<()> {
        let len = self.len();
        if index > len {
            return Err(Error::InvalidArgument(format!(
                "spine index {} out of range (len {})",
                index, len
            )));
        }
        let itemref = self.new_itemref(idref, linear)?;
        let child = self
            .element
            .children()
            .iter()
            .enumerate()
            .filter(|(_, n)| is_itemref(n))
            .nth(index)
            .map(|(i, _)| i);
        match child {
            Some(i) => self.element.children_mut().insert(i, itemref.into()),
            None => self.element.push(itemref),
        }
        Ok(())
    }

    /// Removes every itemref for `idref`. Returns `true` if one was found.
    pub fn remove(&mut self, idref: &str) -> bool {
        let before = self.element.children().len();
        self.element
            .children_mut()
            .retain(|n| !(is_itemref(n) && itemref_id(n) == Some(idref)));
        before != self.element.children().len()
    }

    /// Drops itemrefs that do not resolve against `manifest`.
    ///
    /// Removes, in one pass over a snapshot: child elements other than
    /// `itemref`, itemrefs with a missing or unknown `idref`, and repeated
    /// itemrefs for one id. A `toc` attribute naming an unknown id is
    /// removed too.
    pub fn reconcile(&mut self, manifest: &Manifest) -> Vec<Warning> {
        let mut warnings = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        let mut dropped: Vec<usize> = Vec::new();

        for (index, node) in self.element.children().iter().enumerate() {
            let Some(element) = node.as_element() else {
                continue;
            };
            if element.local_name() != "itemref" {
                warnings.push(Warning::new(
                    WarningKind::DanglingItemref,
                    element.name(),
                    "unexpected element in the spine dropped",
                ));
                dropped.push(index);
                continue;
            }
            let reason = match element.attr("idref") {
                None | Some("") => Some("itemref without an idref dropped"),
                Some(id) if manifest.get(id).is_none() => Some("itemref to an unknown id dropped"),
                Some(id) if !seen.insert(id) => Some("repeated itemref dropped"),
                Some(_) => None,
            };
            if let Some(reason) = reason {
                warnings.push(Warning::new(
                    WarningKind::DanglingItemref,
                    element.attr("idref").unwrap_or("itemref"),
                    reason,
                ));
                dropped.push(index);
            }
        }

        for index in dropped.into_iter().rev() {
            self.element.children_mut().remove(index);
        }
        if let Some(toc) = self.toc().map(str::to_string) {
            if manifest.get(&toc).is_none() {
                warnings.push(Warning::new(
                    WarningKind::DanglingItemref,
                    &toc,
                    "toc attribute names an unknown id and was removed",
                ));
                self.element.remove_attr("toc");
            }
        }
        warnings
    }

    /// Keeps only itemrefs whose id satisfies `keep`.
    pub(crate) fn retain(&mut self, keep: impl Fn(&str) -> bool) {
        self.element
            .children_mut()
            .retain(|n| !is_itemref(n) || itemref_id(n).is_some_and(&keep));
        if self.toc().is_some_and(|toc| !keep(toc)) {
            self.element.remove_attr("toc");
        }
    }

    fn new_itemref(&self, idref: &str, linear: bool) -> Result<Element> {
        if idref.is_empty() {
            return Err(Error::InvalidArgument("empty idref".into()));
        }
        if self.contains(idref) {
            return Err(Error::IdAlreadyExists {
                id: idref.to_string(),
            });
        }
        let name = match self.element.name().split_once(':') {
            Some((prefix, _)) => format!("{}:itemref", prefix),
            None => "itemref".to_string(),
        };
        let mut itemref = Element::new(name).with_attr("idref", idref);
        if !linear {
            itemref.set_attr("linear", "no");
        }
        Ok(itemref)
    }
}

fn is_itemref(node: &Node) -> bool {
    node.as_element().is_some_and(|e| e.local_name() == "itemref")
}

fn itemref_id(node: &Node) -> Option<&str> {
    node.as_element().and_then(|e| e.attr("idref"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::Source;

    #[test]
    fn test_push_insert_remove() {
        let mut spine = Spine::new();
        spine.push("a", true).unwrap();
        spine.push("c", true).unwrap();
        spine.insert(1, "b", true).unwrap();
        spine.insert(3, "d", false).unwrap();
        assert!(spine.insert(9, "e", true).is_err());
        assert!(matches!(spine.push("a", true), Err(Error::IdAlreadyExists { .. })));

        let order: Vec<&str> = spine.iter().map(|r| r.idref()).collect();
        assert_eq!(order, ["a", "b", "c", "d"]);
        assert_eq!(spine.position("c"), Some(2));
        assert!(spine.remove("b"));
        assert!(!spine.remove("b"));
        assert_eq!(spine.len(), 3);
        assert_eq!(
            spine.element().to_xml_string(),
            r#"<spine><itemref idref="a"/><itemref idref="c"/><itemref idref="d" linear="no"/></spine>"#
        );
    }

    #[test]
    fn test_reconcile() {
        let mut manifest = Manifest::new().unwrap();
        manifest.add("a.xhtml", Source::Empty, Some("a"), None).unwrap();
        manifest.add("b.xhtml", Source::Empty, Some("b"), None).unwrap();

        let element = crate::descriptor::Document::parse_str(
            r#"<spine toc="ncx"><itemref idref="a"/><itemref/><itemref idref="zz"/><bogus/><itemref idref="a"/><itemref idref="b"/></spine>"#,
        )
        .unwrap()
        .root;
        let mut spine = Spine::from_element(element);
        let warnings = spine.reconcile(&manifest);
        assert_eq!(warnings.len(), 5);
        assert!(warnings.iter().all(|w| w.kind == WarningKind::DanglingItemref));
        assert_eq!(
            spine.element().to_xml_string(),
            r#"<spine><itemref idref="a"/><itemref idref="b"/></spine>"#
        );
        assert!(spine.reconcile(&manifest).is_empty());
    }

    #[test]
    fn test_retain() {
        let mut spine = Spine::new();
        spine.element_mut().set_attr("toc", "ncx");
        spine.push("a", true).unwrap();
        spine.push("b", true).unwrap();
        spine.retain(|id| id == "b");
        assert_eq!(spine.element().to_xml_string(), r#"<spine><itemref idref="b"/></spine>"#);
    }
}
