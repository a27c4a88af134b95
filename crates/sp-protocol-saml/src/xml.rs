//! Minimal XML tree used for reading SAML messages.
//!
//! Messages are small, so they are parsed into an owned tree with quick-xml and
//! then navigated by local name. Text is kept exactly as received and namespace
//! declarations stay on the elements that made them, so a signed subtree can be
//! brought into exclusive canonical form for digest computation.

use std::collections::{BTreeMap, BTreeSet};

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use xml_canonicalization::Canonicalizer;

use crate::error::{SamlError, SamlResult};

/// A node in the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// Child element.
    Element(Element),
    /// Text content, whitespace included.
    Text(String),
}

/// Namespace declarations in scope: prefix to URI, `""` for the default namespace.
pub type Namespaces = BTreeMap<String, String>;

/// An XML element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    /// Qualified name as written, e.g. `saml:Issuer`.
    pub qname: String,
    /// Attributes in document order, with qualified names.
    pub attributes: Vec<(String, String)>,
    /// Child nodes.
    pub children: Vec<Node>,
}

impl Element {
    /// Parses a document and returns its root element.
    ///
    /// Documents with a DOCTYPE are refused.
    pub fn parse(xml: &str) -> SamlResult<Self> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(false);

        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;

        loop {
            match reader.read_event()? {
                Event::Start(e) => stack.push(start_element(&e)?),
                Event::Empty(e) => {
                    let element = start_element(&e)?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::End(_) => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| SamlError::MalformedMessage("unbalanced end tag".into()))?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::Text(t) => {
                    let text = t.unescape()?.into_owned();
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(Node::Text(text));
                    }
                }
                Event::CData(c) => {
                    let text = String::from_utf8(c.into_inner().into_owned())
                        .map_err(|e| SamlError::MalformedMessage(e.to_string()))?;
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(Node::Text(text));
                    }
                }
                Event::DocType(_) => {
                    return Err(SamlError::MalformedMessage(
                        "DOCTYPE is not allowed".to_string(),
                    ));
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(SamlError::MalformedMessage("unclosed element".to_string()));
        }
        root.ok_or_else(|| SamlError::MalformedMessage("empty document".to_string()))
    }

    /// Local part of the element name.
    #[must_use]
    pub fn local_name(&self) -> &str {
        local(&self.qname)
    }

    /// Value of the attribute with the given local name.
    #[must_use]
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| local(k) == name && !k.starts_with("xmlns"))
            .map(|(_, v)| v.as_str())
    }

    /// Child elements.
    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    /// First child element with the given local name.
    #[must_use]
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.elements().find(|e| e.local_name() == name)
    }

    /// Child elements with the given local name.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.elements().filter(move |e| e.local_name() == name)
    }

    /// Concatenated direct text content.
    #[must_use]
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|n| match n {
                Node::Text(t) => Some(t.as_str()),
                Node::Element(_) => None,
            })
            .collect()
    }

    /// Trimmed text of the first child with the given local name.
    #[must_use]
    pub fn child_text(&self, name: &str) -> Option<String> {
        self.child(name).map(|e| e.text().trim().to_string())
    }

    /// This element and all descendants, depth first.
    #[must_use]
    pub fn descendants(&self) -> Vec<&Element> {
        let mut out = vec![self];
        for child in self.elements() {
            out.extend(child.descendants());
        }
        out
    }

    /// All elements (this one included) whose `ID` attribute equals `id`.
    #[must_use]
    pub fn find_by_id(&self, id: &str) -> Vec<&Element> {
        self.descendants()
            .into_iter()
            .filter(|e| e.attr("ID") == Some(id))
            .collect()
    }

    /// Copy of the element without its first direct `Signature` child.
    #[must_use]
    pub fn without_signature(&self) -> Self {
        let mut copy = self.clone();
        if let Some(pos) = copy
            .children
            .iter()
            .position(|n| matches!(n, Node::Element(e) if e.local_name() == "Signature"))
        {
            copy.children.remove(pos);
        }
        copy
    }

    /// Namespace declarations made on this element.
    pub fn declarations(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes.iter().filter_map(|(k, v)| {
            if k == "xmlns" {
                Some(("", v.as_str()))
            } else {
                k.strip_prefix("xmlns:").map(|prefix| (prefix, v.as_str()))
            }
        })
    }

    /// Namespaces in scope at `target`, which must be this element or one of
    /// its descendants (compared by identity, not content).
    #[must_use]
    pub fn namespaces_at(&self, target: &Element) -> Option<Namespaces> {
        self.scope_of(target, Namespaces::new())
    }

    fn scope_of(&self, target: &Element, mut scope: Namespaces) -> Option<Namespaces> {
        scope.extend(
            self.declarations()
                .map(|(prefix, uri)| (prefix.to_string(), uri.to_string())),
        );
        if std::ptr::eq(self, target) {
            return Some(scope);
        }
        self.elements()
            .find_map(|child| child.scope_of(target, scope.clone()))
    }

    /// Serializes the element as a standalone document.
    ///
    /// Every namespace in `scope` that the element does not declare itself is
    /// declared on its start tag, so the output parses on its own.
    #[must_use]
    pub fn to_xml(&self, scope: &Namespaces) -> String {
        let mut out = String::new();
        out.push('<');
        out.push_str(&self.qname);
        let own: BTreeSet<&str> = self.declarations().map(|(prefix, _)| prefix).collect();
        for (prefix, uri) in scope {
            if !own.contains(prefix.as_str()) {
                write_declaration(&mut out, prefix, uri);
            }
        }
        self.write_rest(&mut out);
        out
    }

    fn write_to(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.qname);
        self.write_rest(out);
    }

    fn write_rest(&self, out: &mut String) {
        for (k, v) in &self.attributes {
            write_attribute(out, k, v);
        }
        out.push('>');
        for child in &self.children {
            match child {
                Node::Element(e) => e.write_to(out),
                Node::Text(t) => out.push_str(&escape_text(t)),
            }
        }
        out.push_str("</");
        out.push_str(&self.qname);
        out.push('>');
    }

    /// Exclusive XML canonicalization (without comments) of this element.
    ///
    /// `scope` holds the namespaces in scope at the element, see
    /// [`Element::namespaces_at`]. `inclusive_prefixes` is the
    /// `InclusiveNamespaces` prefix list of the transform, with `#default`
    /// standing for the default namespace.
    pub fn exclusive_canonical(
        &self,
        scope: &Namespaces,
        inclusive_prefixes: &[String],
    ) -> SamlResult<String> {
        let mut projected = String::new();
        self.write_projected(scope, &Namespaces::new(), inclusive_prefixes, &mut projected);

        let mut output = Vec::new();
        Canonicalizer::read_from_str(&projected)
            .write_to_writer(&mut output)
            .canonicalize(false)
            .map_err(|e| SamlError::Crypto(format!("canonicalization failed: {e}")))?;

        String::from_utf8(output)
            .map_err(|e| SamlError::Crypto(format!("canonical form is not UTF-8: {e}")))
    }

    /// Writes the subtree declaring each namespace where exclusive
    /// canonicalization renders it: on the outermost element that visibly
    /// uses the prefix, and again only where its binding changes. Unused
    /// declarations are left out.
    fn write_projected(
        &self,
        scope: &Namespaces,
        rendered: &Namespaces,
        inclusive_prefixes: &[String],
        out: &mut String,
    ) {
        let mut scope = scope.clone();
        scope.extend(
            self.declarations()
                .map(|(prefix, uri)| (prefix.to_string(), uri.to_string())),
        );

        let mut used = BTreeSet::new();
        used.insert(prefix_of(&self.qname).unwrap_or(""));
        for (k, _) in &self.attributes {
            if is_declaration(k) {
                continue;
            }
            if let Some(prefix) = prefix_of(k).filter(|p| *p != "xml") {
                used.insert(prefix);
            }
        }
        for prefix in inclusive_prefixes {
            let prefix = if prefix == "#default" { "" } else { prefix.as_str() };
            if scope.contains_key(prefix) {
                used.insert(prefix);
            }
        }

        let mut rendered = rendered.clone();
        out.push('<');
        out.push_str(&self.qname);
        for prefix in used {
            let uri = match scope.get(prefix) {
                Some(uri) => uri.as_str(),
                None if prefix.is_empty() => "",
                None => continue,
            };
            let current = rendered.get(prefix).map(String::as_str);
            let unchanged = if prefix.is_empty() {
                current.unwrap_or("") == uri
            } else {
                current == Some(uri)
            };
            if !unchanged {
                write_declaration(out, prefix, uri);
                rendered.insert(prefix.to_string(), uri.to_string());
            }
        }
        for (k, v) in &self.attributes {
            if !is_declaration(k) {
                write_attribute(out, k, v);
            }
        }
        out.push('>');
        for child in &self.children {
            match child {
                Node::Element(e) => e.write_projected(&scope, &rendered, inclusive_prefixes, out),
                Node::Text(t) => out.push_str(&escape_text(t)),
            }
        }
        out.push_str("</");
        out.push_str(&self.qname);
        out.push('>');
    }
}

fn start_element(e: &BytesStart<'_>) -> SamlResult<Element> {
    let qname = std::str::from_utf8(e.name().as_ref())
        .map_err(|err| SamlError::MalformedMessage(err.to_string()))?
        .to_string();
    let mut attributes = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| SamlError::MalformedMessage(err.to_string()))?;
        let key = std::str::from_utf8(attr.key.as_ref())
            .map_err(|err| SamlError::MalformedMessage(err.to_string()))?
            .to_string();
        let value = attr.unescape_value()?.into_owned();
        attributes.push((key, value));
    }
    Ok(Element {
        qname,
        attributes,
        children: Vec::new(),
    })
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) -> SamlResult<()> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(Node::Element(element)),
        None if root.is_none() => *root = Some(element),
        None => {
            return Err(SamlError::MalformedMessage(
                "multiple root elements".to_string(),
            ));
        }
    }
    Ok(())
}

fn local(qname: &str) -> &str {
    qname.rsplit(':').next().unwrap_or(qname)
}

fn prefix_of(qname: &str) -> Option<&str> {
    qname.split_once(':').map(|(prefix, _)| prefix)
}

fn is_declaration(name: &str) -> bool {
    name == "xmlns" || name.starts_with("xmlns:")
}

fn write_declaration(out: &mut String, prefix: &str, uri: &str) {
    if prefix.is_empty() {
        write_attribute(out, "xmlns", uri);
    } else {
        write_attribute(out, &format!("xmlns:{prefix}"), uri);
    }
}

fn write_attribute(out: &mut String, name: &str, value: &str) {
    out.push(' ');
    out.push_str(name);
    out.push_str("=\"");
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#x9;"),
            '\n' => out.push_str("&#xA;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(c),
        }
    }
    out.push('"');
}

fn escape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(c),
        }
    }
    out
}

/// Escapes text for use in XML content or attribute values.
#[must_use]
pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}
