//! A minimal owned XML tree for package documents.
//!
//! Package documents are small, so they are parsed into an owned tree of
//! [`Element`]s and [`Node`]s with `quick-xml` and serialized back as a
//! whole. Element and attribute names are kept qualified exactly as written
//! (`dc:title`, `opf:role`); lookups by path use local names.
//!
//! Text nodes keep their escaped source form, so entity references the
//! parser does not know survive a round trip untouched. Attribute values
//! are unescaped when possible and re-escaped on output.
//!
//! # Example
//!
//! ```rust
//! use epubfs::descriptor::{Document, Element};
//!
//! let doc = Document::parse(br#"<package><manifest><item id="a" href="a.xhtml"/></manifest></package>"#).unwrap();
//! let item = doc.root.find("manifest/item").unwrap();
//! assert_eq!(item.attr("href"), Some("a.xhtml"));
//!
//! let mut root = Element::new("spine");
//! root.push(Element::new("itemref").with_attr("idref", "a"));
//! assert_eq!(root.to_xml_string(), r#"<spine><itemref idref="a"/></spine>"#);
//! ```

use quick_xml::escape::{escape, partial_escape, unescape};
use quick_xml::events::Event;
use quick_xml::Reader;

use crate::{Error, Result};

/// A node inside an element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// A child element.
    Element(Element),
    /// Character data in escaped form.
    Text(String),
    /// A CDATA section's contents.
    CData(String),
    /// A comment's contents.
    Comment(String),
    /// A processing instruction's contents (between `<?` and `?>`).
    ProcessingInstruction(String),
    /// A document type declaration's contents.
    DocType(String),
}

impl Node {
    /// Creates a text node, escaping `text`.
    pub fn text(text: &str) -> Self {
        Node::Text(partial_escape(text).into_owned())
    }

    /// Returns the element, if this node is one.
    pub fn as_element(&self) -> Option<&Element> {
        match self {
            Node::Element(e) => Some(e),
            _ => None,
        }
    }

    /// Returns the element mutably, if this node is one.
    pub fn as_element_mut(&mut self) -> Option<&mut Element> {
        match self {
            Node::Element(e) => Some(e),
            _ => None,
        }
    }

    fn write(&self, out: &mut String) {
        match self {
            Node::Element(e) => e.write(out),
            Node::Text(t) => out.push_str(t),
            Node::CData(t) => {
                out.push_str("<![CDATA[");
                out.push_str(t);
                out.push_str("]]>");
            }
            Node::Comment(t) => {
                out.push_str("<!--");
                out.push_str(t);
                out.push_str("-->");
            }
            Node::ProcessingInstruction(t) => {
                out.push_str("<?");
                out.push_str(t);
                out.push_str("?>");
            }
            Node::DocType(t) => {
                out.push_str("<!DOCTYPE ");
                out.push_str(t.trim_start());
                out.push('>');
            }
        }
    }
}

impl From<Element> for Node {
    fn from(element: Element) -> Self {
        Node::Element(element)
    }
}

/// An XML element with ordered attributes and children.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<Node>,
}

impl Element {
    /// Creates an empty element.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Builder form of [`set_attr`](Self::set_attr).
    pub fn with_attr(mut self, key: &str, value: &str) -> Self {
        self.set_attr(key, value);
        self
    }

    /// Builder form of [`set_text`](Self::set_text).
    pub fn with_text(mut self, text: &str) -> Self {
        self.set_text(text);
        self
    }

    /// Returns the qualified name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the name without its namespace prefix.
    pub fn local_name(&self) -> &str {
        local(&self.name)
    }

    /// Returns an attribute's value.
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Sets an attribute, keeping its position if it already exists.
    pub fn set_attr(&mut self, key: &str, value: &str) {
        match self.attributes.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value.to_string(),
            None => self
                .attributes
                .push((key.to_string(), value.to_string())),
        }
    }

    /// Removes an attribute, returning its value.
    pub fn remove_attr(&mut self, key: &str) -> Option<String> {
        let idx = self.attributes.iter().position(|(k, _)| k == key)?;
        Some(self.attributes.remove(idx).1)
    }

    /// Returns all attributes in document order.
    pub fn attributes(&self) -> &[(String, String)] {
        &self.attributes
    }

    /// Returns the child nodes.
    pub fn children(&self) -> &[Node] {
        &self.children
    }

    /// Returns the child nodes mutably.
    pub fn children_mut(&mut self) -> &mut Vec<Node> {
        &mut self.children
    }

    /// Iterates over child elements.
    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(Node::as_element)
    }

    /// Iterates mutably over child elements.
    pub fn elements_mut(&mut self) -> impl Iterator<Item = &mut Element> {
        self.children.iter_mut().filter_map(Node::as_element_mut)
    }

    /// Appends a child node.
    pub fn push(&mut self, node: impl Into<Node>) {
        self.children.push(node.into());
    }

    /// Returns the child index of the first child element named `local`.
    pub fn position(&self, local_name: &str) -> Option<usize> {
        self.children
            .iter()
            .position(|n| n.as_element().is_some_and(|e| e.local_name() == local_name))
    }

    /// Finds a descendant by a `/`-separated path of local names.
    pub fn find(&self, path: &str) -> Option<&Element> {
        let mut current = self;
        for step in path.split('/').filter(|s| !s.is_empty()) {
            current = current.elements().find(|e| e.local_name() == step)?;
        }
        Some(current)
    }

    /// Mutable form of [`find`](Self::find).
    pub fn find_mut(&mut self, path: &str) -> Option<&mut Element> {
        let mut current = self;
        for step in path.split('/').filter(|s| !s.is_empty()) {
            current = current.elements_mut().find(|e| e.local_name() == step)?;
        }
        Some(current)
    }

    /// Returns every child element with the given local name.
    pub fn find_all<'a>(&'a self, local_name: &'a str) -> impl Iterator<Item = &'a Element> {
        self.elements().filter(move |e| e.local_name() == local_name)
    }

    /// Returns the concatenated, unescaped text of direct text children.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for node in &self.children {
            match node {
                Node::Text(t) => match unescape(t) {
                    Ok(s) => out.push_str(&s),
                    Err(_) => out.push_str(t),
                },
                Node::CData(t) => out.push_str(t),
                _ => {}
            }
        }
        out
    }

    /// Replaces all children with one text node.
    pub fn set_text(&mut self, text: &str) {
        self.children.clear();
        if !text.is_empty() {
            self.children.push(Node::text(text));
        }
    }

    /// Serializes the element and its subtree.
    pub fn to_xml_string(&self) -> String {
        let mut out = String::new();
        self.write(&mut out);
        out
    }

    fn write(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.name);
        for (key, value) in &self.attributes {
            out.push(' ');
            out.push_str(key);
            out.push_str("=\"");
            out.push_str(&escape(value.as_str()));
            out.push('"');
        }
        if self.children.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        for child in &self.children {
            child.write(out);
        }
        out.push_str("</");
        out.push_str(&self.name);
        out.push('>');
    }
}

fn local(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name)
}

/// A parsed XML document: the root element plus surrounding nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Comments, processing instructions and the doctype before the root.
    pub prolog: Vec<Node>,
    /// The root element.
    pub root: Element,
    /// Comments and processing instructions after the root.
    pub epilog: Vec<Node>,
}

impl Document {
    /// Wraps a root element.
    pub fn new(root: Element) -> Self {
        Self {
            prolog: Vec::new(),
            root,
            epilog: Vec::new(),
        }
    }

    /// Parses UTF-8 bytes, with or without a byte order mark.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Xml`] for malformed or non-UTF-8 input, or input
    /// without a root element.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
        let text = std::str::from_utf8(bytes).map_err(Error::xml)?;
        Self::parse_str(text)
    }

    /// Parses a string.
    pub fn parse_str(text: &str) -> Result<Self> {
        let mut reader = Reader::from_str(text);
        reader.config_mut().trim_text(false);

        let mut prolog = Vec::new();
        let mut epilog = Vec::new();
        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;

        loop {
            let event = reader.read_event().map_err(|e| {
                Error::Xml(format!("at byte {}: {}", reader.buffer_position(), e))
            })?;
            let node = match event {
                Event::Start(e) => {
                    stack.push(start_element(&e)?);
                    continue;
                }
                Event::End(_) => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| Error::xml("unbalanced end tag"))?;
                    Node::Element(element)
                }
                Event::Empty(e) => Node::Element(start_element(&e)?),
                Event::Text(e) => Node::Text(decode(&e)?),
                Event::CData(e) => Node::CData(decode(&e)?),
                Event::Comment(e) => Node::Comment(decode(&e)?),
                Event::PI(e) => Node::ProcessingInstruction(decode(&e)?),
                Event::DocType(e) => Node::DocType(decode(&e)?),
                Event::Eof => break,
                _ => continue,
            };

            if let Some(parent) = stack.last_mut() {
                parent.children.push(node);
                continue;
            }
            match node {
                Node::Element(element) => {
                    if root.is_some() {
                        return Err(Error::xml("multiple root elements"));
                    }
                    root = Some(element);
                }
                Node::Text(t) if t.trim().is_empty() => {}
                Node::Text(_) | Node::CData(_) => {
                    return Err(Error::xml("character data outside the root element"));
                }
                other if root.is_none() => prolog.push(other),
                other => epilog.push(other),
            }
        }

        if let Some(open) = stack.last() {
            return Err(Error::Xml(format!("unclosed element <{}>", open.name)));
        }
        let root = root.ok_or_else(|| Error::xml("no root element"))?;
        Ok(Self {
            prolog,
            root,
            epilog,
        })
    }

    /// Serializes with an XML declaration.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
        for node in &self.prolog {
            node.write(&mut out);
            out.push('\n');
        }
        self.root.write(&mut out);
        for node in &self.epilog {
            out.push('\n');
            node.write(&mut out);
        }
        out.push('\n');
        out.into_bytes()
    }
}

fn decode(bytes: &[u8]) -> Result<String> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(Error::xml)
}

fn start_element(e: &quick_xml::events::BytesStart<'_>) -> Result<Element> {
    let mut element = Element::new(decode(e.name().as_ref())?);
    for attr in e.attributes() {
        let attr = attr.map_err(Error::xml)?;
        let key = decode(attr.key.as_ref())?;
        let raw = decode(&attr.value)?;
        let value = match unescape(&raw) {
            Ok(v) => v.into_owned(),
            Err(_) => raw,
        };
        element.attributes.push((key, value));
    }
    Ok(element)
}
