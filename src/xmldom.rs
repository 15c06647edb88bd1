//! Minimal namespace-aware XML element tree on top of xml-rs.
//!
//! Request bodies and stored dead property values both live in this
//! tree. Attributes keep their namespace, `xsi:type` values are resolved
//! against the namespaces in scope where they were written, and
//! `xml:lang` is kept apart so it can be inherited and re-emitted.
//! Namespace prefixes are not preserved verbatim; they are reassigned
//! when an element is written out (see [`Prefixes`]).
use std::fmt;
use std::io::Write;

use bytes::Bytes;
use xml::common::XmlVersion;
use xml::namespace::Namespace;
use xml::reader::{ParserConfig, XmlEvent};
use xml::writer::{EventWriter, XmlEvent as XmlWEvent};
use xml::EmitterConfig;

use crate::errors::DavError;
use crate::util::MemBuffer;
use crate::DavResult;

pub const NS_DAV_URI: &str = "DAV:";
pub const NS_XML_URI: &str = "http://www.w3.org/XML/1998/namespace";
pub const NS_XSI_URI: &str = "http://www.w3.org/2001/XMLSchema-instance";
pub const NS_XS_URI: &str = "http://www.w3.org/2001/XMLSchema";
pub const NS_MS_TYPES_URI: &str = "http://microsoft.com/wsdl/types/";

/// A namespace-qualified name. An empty namespace means "no namespace".
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QName {
    pub ns: String,
    pub name: String,
}

impl QName {
    pub fn new(ns: impl Into<String>, name: impl Into<String>) -> QName {
        QName {
            ns: ns.into(),
            name: name.into(),
        }
    }

    /// A name in the `DAV:` namespace.
    pub fn dav(name: impl Into<String>) -> QName {
        QName::new(NS_DAV_URI, name)
    }

    pub fn is_dav(&self) -> bool {
        self.ns == NS_DAV_URI
    }

    pub fn is(&self, ns: &str, name: &str) -> bool {
        self.ns == ns && self.name == name
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ns.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{{{}}}{}", self.ns, self.name)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub name: QName,
    /// Prefix the element had in the document it was parsed from. Only a hint.
    pub prefix: Option<String>,
    /// Attributes other than `xsi:type`, `xml:lang` and namespace declarations.
    pub attributes: Vec<(QName, String)>,
    pub xsi_type: Option<QName>,
    /// `xml:lang` as declared on this element (not inherited).
    pub lang: Option<String>,
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(name: QName) -> Element {
        Element {
            name,
            prefix: None,
            attributes: Vec::new(),
            xsi_type: None,
            lang: None,
            children: Vec::new(),
        }
    }

    pub fn dav(name: &str) -> Element {
        Element::new(QName::dav(name))
    }

    pub fn with_child(mut self, child: Element) -> Element {
        self.children.push(Node::Element(child));
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Element {
        self.push_text(text.into());
        self
    }

    pub fn push(&mut self, child: Element) {
        self.children.push(Node::Element(child));
    }

    pub fn push_text(&mut self, text: String) {
        if text.is_empty() {
            return;
        }
        // keep adjacent text in one node.
        if let Some(Node::Text(t)) = self.children.last_mut() {
            t.push_str(&text);
        } else {
            self.children.push(Node::Text(text));
        }
    }

    pub fn is(&self, ns: &str, name: &str) -> bool {
        self.name.is(ns, name)
    }

    pub fn child_elems(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    pub fn find(&self, ns: &str, name: &str) -> Option<&Element> {
        self.child_elems().find(|e| e.is(ns, name))
    }

    pub fn has_child_elems(&self) -> bool {
        self.child_elems().next().is_some()
    }

    /// Concatenated text of the direct children.
    pub fn text(&self) -> String {
        let mut s = String::new();
        for n in &self.children {
            if let Node::Text(t) = n {
                s.push_str(t);
            }
        }
        s
    }

    /// Element with the same name and attributes, but no content.
    pub fn empty_copy(&self) -> Element {
        Element {
            children: Vec::new(),
            ..self.clone()
        }
    }

    /// Parse a complete document and return its root element.
    pub(crate) fn parse(data: &[u8]) -> DavResult<Element> {
        let reader = ParserConfig::new()
            .trim_whitespace(false)
            .whitespace_to_characters(true)
            .cdata_to_characters(true)
            .ignore_comments(true)
            .coalesce_characters(true)
            .create_reader(data);

        let mut stack: Vec<Element> = Vec::new();
        let mut root = None;
        for event in reader {
            match event? {
                XmlEvent::StartElement {
                    name,
                    attributes,
                    namespace,
                } => {
                    if root.is_some() {
                        return Err(DavError::XmlParseError);
                    }
                    let mut elem = Element::new(QName::new(
                        name.namespace.unwrap_or_default(),
                        name.local_name,
                    ));
                    elem.prefix = name.prefix;
                    for attr in attributes {
                        let ns = attr.name.namespace.unwrap_or_default();
                        let is_xml = ns == NS_XML_URI || attr.name.prefix.as_deref() == Some("xml");
                        match attr.name.local_name.as_str() {
                            "lang" if is_xml => elem.lang = Some(attr.value),
                            "type" if ns == NS_XSI_URI => {
                                elem.xsi_type = Some(resolve_qname(&attr.value, &namespace))
                            }
                            _ => elem
                                .attributes
                                .push((QName::new(ns, attr.name.local_name), attr.value)),
                        }
                    }
                    stack.push(elem);
                }
                XmlEvent::EndElement { .. } => {
                    let elem = stack.pop().ok_or(DavError::XmlParseError)?;
                    match stack.last_mut() {
                        Some(parent) => parent.push(elem),
                        None => root = Some(elem),
                    }
                }
                XmlEvent::Characters(text) | XmlEvent::Whitespace(text) => {
                    if let Some(cur) = stack.last_mut() {
                        cur.push_text(text);
                    }
                }
                _ => {}
            }
        }
        root.ok_or(DavError::XmlParseError)
    }

    /// Write this element as a complete document, `DAV:` bound to `D`.
    pub(crate) fn to_document(&self) -> DavResult<Bytes> {
        let mut xw = emitter();
        xw.write(XmlWEvent::StartDocument {
            version: XmlVersion::Version10,
            encoding: Some("utf-8"),
            standalone: None,
        })?;
        let mut prefixes = Prefixes::new();
        prefixes.collect(self);
        self.write_inner(&mut xw, &prefixes, true, true)?;
        Ok(xw.into_inner().take())
    }

    /// Write this element inside a document that already binds `D` to `DAV:`.
    /// Every other namespace the element needs is declared on it.
    pub fn write_ev<W: Write>(&self, xw: &mut EventWriter<W>) -> xml::writer::Result<()> {
        let mut prefixes = Prefixes::new();
        prefixes.collect(self);
        self.write_inner(xw, &prefixes, true, false)
    }

    fn write_inner<W: Write>(
        &self,
        xw: &mut EventWriter<W>,
        prefixes: &Prefixes,
        root: bool,
        declare_dav: bool,
    ) -> xml::writer::Result<()> {
        let qname = prefixes.qualify(&self.name);
        let attr_names: Vec<String> = self
            .attributes
            .iter()
            .map(|(n, _)| prefixes.qualify(n))
            .collect();
        let xsi_type = self.xsi_type.as_ref().map(|t| {
            (
                prefixes.qualify(&QName::new(NS_XSI_URI, "type")),
                prefixes.qualify(t),
            )
        });

        let mut ev = XmlWEvent::start_element(qname.as_str());
        if root {
            if declare_dav {
                ev = ev.ns("D", NS_DAV_URI);
            }
            for (uri, prefix) in prefixes.declared() {
                ev = ev.ns(prefix, uri);
            }
        }
        if let Some(lang) = self.lang.as_deref() {
            ev = ev.attr("xml:lang", lang);
        }
        for (name, (_, value)) in attr_names.iter().zip(self.attributes.iter()) {
            ev = ev.attr(name.as_str(), value.as_str());
        }
        if let Some((name, value)) = xsi_type.as_ref() {
            ev = ev.attr(name.as_str(), value.as_str());
        }
        xw.write(ev)?;

        for child in &self.children {
            match child {
                Node::Element(e) => e.write_inner(xw, prefixes, false, false)?,
                Node::Text(t) => xw.write(XmlWEvent::characters(t))?,
            }
        }
        xw.write(XmlWEvent::end_element())
    }
}

// resolve a QName-valued attribute (like xsi:type) in its namespace context.
fn resolve_qname(value: &str, namespace: &Namespace) -> QName {
    let value = value.trim();
    match value.split_once(':') {
        Some((prefix, local)) => QName::new(namespace.get(prefix).unwrap_or(""), local),
        None => QName::new(namespace.get("").unwrap_or(""), value),
    }
}

/// Prefix assignment for writing a fragment.
///
/// `DAV:` is always `D` and the xml namespace always `xml`. Other
/// namespaces keep the prefix they had in the source document when that
/// prefix is still free, and otherwise get a generated `nsN` prefix.
pub(crate) struct Prefixes {
    map: Vec<(String, String)>,
}

impl Prefixes {
    pub(crate) fn new() -> Prefixes {
        Prefixes { map: Vec::new() }
    }

    fn collect(&mut self, elem: &Element) {
        self.declare(&elem.name.ns, elem.prefix.as_deref());
        for (name, _) in &elem.attributes {
            self.declare(&name.ns, None);
        }
        if let Some(t) = &elem.xsi_type {
            self.declare(NS_XSI_URI, Some("xsi"));
            let hint = match t.ns.as_str() {
                NS_XS_URI => Some("xs"),
                NS_MS_TYPES_URI => Some("ms"),
                _ => None,
            };
            self.declare(&t.ns, hint);
        }
        for child in elem.child_elems() {
            self.collect(child);
        }
    }

    fn declare(&mut self, uri: &str, hint: Option<&str>) {
        if uri.is_empty()
            || uri == NS_DAV_URI
            || uri == NS_XML_URI
            || self.map.iter().any(|(u, _)| u == uri)
        {
            return;
        }
        let usable = |p: &str| {
            !p.is_empty()
                && p != "D"
                && !p.to_ascii_lowercase().starts_with("xml")
                && !self.map.iter().any(|(_, q)| q == p)
        };
        let prefix = match hint {
            Some(h) if usable(h) => h.to_string(),
            _ => (0..)
                .map(|n| format!("ns{}", n))
                .find(|p| usable(p))
                .unwrap_or_default(),
        };
        self.map.push((uri.to_string(), prefix));
    }

    fn declared(&self) -> impl Iterator<Item = (&str, &str)> {
        self.map.iter().map(|(u, p)| (u.as_str(), p.as_str()))
    }

    fn qualify(&self, name: &QName) -> String {
        match name.ns.as_str() {
            "" => name.name.clone(),
            NS_DAV_URI => format!("D:{}", name.name),
            NS_XML_URI => format!("xml:{}", name.name),
            ns => match self.map.iter().find(|(u, _)| u == ns) {
                Some((_, p)) => format!("{}:{}", p, name.name),
                None => name.name.clone(),
            },
        }
    }
}

/// An event writer into memory, configured the way all responses are written.
pub(crate) fn emitter() -> EventWriter<MemBuffer> {
    EventWriter::new_with_config(
        MemBuffer::new(),
        EmitterConfig::new()
            .perform_indent(false)
            .normalize_empty_elements(true)
            .pad_self_closing(false),
    )
}
