//! Owned XML tree with inclusive Canonical XML 1.0 output.
//!
//! Documents are built bottom-up as plain values and serialized only through
//! [`Element::canonicalize`], so the bytes that are hashed are exactly the bytes
//! that are sent.
pub mod constants;
pub mod parse;

use std::collections::BTreeMap;

/// Namespace bindings in scope, keyed by prefix (`""` is the default namespace).
pub(crate) type NamespaceScope = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
}

/// An element with its namespace declarations, attributes and children.
///
/// # Examples
/// ```rust
/// use nfse_core::xml::Element;
///
/// let header = Element::new("Cabecalho")
///     .with_attribute("Versao", "1")
///     .with_child(Element::new("CPFCNPJRemetente").with_text_child("CNPJ", "12345678000195"));
/// assert_eq!(
///     header.canonicalize(),
///     r#"<Cabecalho Versao="1"><CPFCNPJRemetente><CNPJ>12345678000195</CNPJ></CPFCNPJRemetente></Cabecalho>"#
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    name: String,
    namespaces: Vec<(String, String)>,
    attributes: Vec<(String, String)>,
    children: Vec<Node>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespaces: Vec::new(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Declares a namespace; an empty prefix sets the default namespace.
    pub fn with_namespace(mut self, prefix: impl Into<String>, uri: impl Into<String>) -> Self {
        self.declare_namespace(prefix.into(), uri.into());
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((name.into(), value.into()));
        self
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.push(child);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.children.push(Node::Text(text.into()));
        self
    }

    /// Appends `<name>text</name>`.
    pub fn with_text_child(self, name: impl Into<String>, text: impl Into<String>) -> Self {
        self.with_child(Element::new(name).with_text(text))
    }

    pub fn push(&mut self, child: Element) {
        self.children.push(Node::Element(child));
    }

    fn declare_namespace(&mut self, prefix: String, uri: String) {
        match self.namespaces.iter_mut().find(|(p, _)| *p == prefix) {
            Some(existing) => existing.1 = uri,
            None => self.namespaces.push((prefix, uri)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn namespace(&self, prefix: &str) -> Option<&str> {
        self.namespaces
            .iter()
            .find(|(p, _)| p == prefix)
            .map(|(_, uri)| uri.as_str())
    }

    pub fn children(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(element) => Some(element),
            Node::Text(_) => None,
        })
    }

    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children().find(|c| c.name == name)
    }

    pub fn last_child(&self) -> Option<&Element> {
        self.children().last()
    }

    /// Follows a path of child names, e.g. `["Cabecalho", "CPFCNPJRemetente", "CNPJ"]`.
    pub fn descendant(&self, path: &[&str]) -> Option<&Element> {
        path.iter().try_fold(self, |current, name| current.child(name))
    }

    /// Concatenated text of the direct text children.
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|node| match node {
                Node::Text(text) => Some(text.as_str()),
                Node::Element(_) => None,
            })
            .collect()
    }

    /// Removes and returns the last child element named `name`.
    pub(crate) fn remove_last_child(&mut self, name: &str) -> Option<Element> {
        let index = self
            .children
            .iter()
            .rposition(|node| matches!(node, Node::Element(e) if e.name == name))?;
        match self.children.remove(index) {
            Node::Element(element) => Some(element),
            Node::Text(_) => None,
        }
    }

    /// Bindings this element sees, given the bindings its parent sees.
    pub(crate) fn scope_within(&self, parent: &NamespaceScope) -> NamespaceScope {
        let mut scope = parent.clone();
        for (prefix, uri) in &self.namespaces {
            scope.insert(prefix.clone(), uri.clone());
        }
        scope
    }

    /// Canonical form of this element as a whole document (no inherited namespaces).
    pub fn canonicalize(&self) -> String {
        self.canonicalize_within(&NamespaceScope::new())
    }

    /// Canonical form of this element as a document subset whose ancestors bind
    /// `inherited`. Every in-scope namespace is rendered on the apex element.
    pub(crate) fn canonicalize_within(&self, inherited: &NamespaceScope) -> String {
        let mut out = String::new();
        write_canonical(self, inherited, &NamespaceScope::new(), &mut out);
        out
    }

    /// Serialized document with an XML declaration.
    pub fn to_document_string(&self) -> String {
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{}",
            self.canonicalize()
        )
    }
}

fn write_canonical(
    element: &Element,
    parent_scope: &NamespaceScope,
    rendered: &NamespaceScope,
    out: &mut String,
) {
    let scope = element.scope_within(parent_scope);
    let mut now_rendered = rendered.clone();

    out.push('<');
    out.push_str(&element.name);

    // BTreeMap order puts the default namespace first, then prefixes sorted.
    for (prefix, uri) in &scope {
        let previous = rendered.get(prefix).map(String::as_str);
        let emit = if prefix.is_empty() {
            previous.unwrap_or("") != uri
        } else {
            previous != Some(uri.as_str())
        };
        if !emit {
            continue;
        }
        if prefix.is_empty() {
            out.push_str(" xmlns=\"");
        } else {
            out.push_str(" xmlns:");
            out.push_str(prefix);
            out.push_str("=\"");
        }
        escape_attribute(uri, out);
        out.push('"');
        now_rendered.insert(prefix.clone(), uri.clone());
    }

    let mut attributes: Vec<&(String, String)> = element.attributes.iter().collect();
    attributes.sort_by(|a, b| a.0.cmp(&b.0));
    for (name, value) in attributes {
        out.push(' ');
        out.push_str(name);
        out.push_str("=\"");
        escape_attribute(value, out);
        out.push('"');
    }
    out.push('>');

    for child in &element.children {
        match child {
            Node::Element(e) => write_canonical(e, &scope, &now_rendered, out),
            Node::Text(text) => escape_text(text, out),
        }
    }

    out.push_str("</");
    out.push_str(&element.name);
    out.push('>');
}

fn escape_text(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(c),
        }
    }
}

fn escape_attribute(value: &str, out: &mut String) {
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
}
