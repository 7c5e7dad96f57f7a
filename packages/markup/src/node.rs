use serde::{Deserialize, Serialize};
use std::fmt;

/// Arena index of one node version.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identity shared by every copy-on-write version of the same node.
///
/// Reparsing text allocates fresh logical ids, so two nodes from different
/// parses never share one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LogicalId(pub u32);

pub const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";
pub const XMLNS_NAMESPACE: &str = "http://www.w3.org/2000/xmlns/";

/// Expanded name: namespace URI plus local part.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QName {
    pub namespace: Option<String>,
    pub local: String,
}

impl QName {
    pub fn new(namespace: impl Into<String>, local: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            local: local.into(),
        }
    }

    /// Name without a namespace
    pub fn local(local: impl Into<String>) -> Self {
        Self {
            namespace: None,
            local: local.into(),
        }
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{{{}}}{}", ns, self.local),
            None => write!(f, "{}", self.local),
        }
    }
}

/// Split `prefix:local` into its parts.
pub fn split_qualified(name: &str) -> (Option<&str>, &str) {
    match name.split_once(':') {
        Some((prefix, local)) => (Some(prefix), local),
        None => (None, name),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    /// Qualified name as written (`xmlns:ns`, `name`, ...)
    pub name: String,
    pub value: String,
}

impl Attribute {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Namespace declaration carried by this attribute, if any.
    ///
    /// Returns `(None, uri)` for a default namespace declaration.
    pub fn namespace_declaration(&self) -> Option<(Option<&str>, &str)> {
        if self.name == "xmlns" {
            Some((None, self.value.as_str()))
        } else {
            self.name
                .strip_prefix("xmlns:")
                .map(|prefix| (Some(prefix), self.value.as_str()))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementData {
    pub prefix: Option<String>,
    pub local_name: String,
    pub attributes: Vec<Attribute>,
    pub children: Vec<NodeId>,
    /// Namespace requested when the element was created programmatically.
    /// Parsed elements rely on in-scope declarations instead.
    pub namespace_hint: Option<String>,
    /// Serialize as `<a/>` when there are no children
    pub self_closing: bool,
}

impl ElementData {
    pub fn new(qualified_name: &str) -> Self {
        let (prefix, local) = split_qualified(qualified_name);
        Self {
            prefix: prefix.map(str::to_string),
            local_name: local.to_string(),
            attributes: Vec::new(),
            children: Vec::new(),
            namespace_hint: None,
            self_closing: true,
        }
    }

    /// Tag name as written in the markup
    pub fn tag_name(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}:{}", prefix, self.local_name),
            None => self.local_name.clone(),
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_str())
    }

    /// Set an attribute, keeping its position when it already exists
    pub fn set_attribute(&mut self, name: &str, value: &str) {
        match self.attributes.iter_mut().find(|a| a.name == name) {
            Some(attr) => attr.value = value.to_string(),
            None => self.attributes.push(Attribute::new(name, value)),
        }
    }

    pub fn remove_attribute(&mut self, name: &str) -> Option<String> {
        let index = self.attributes.iter().position(|a| a.name == name)?;
        Some(self.attributes.remove(index).value)
    }

    /// Namespace declarations made on this element
    pub fn namespace_declarations(&self) -> impl Iterator<Item = (Option<&str>, &str)> {
        self.attributes.iter().filter_map(Attribute::namespace_declaration)
    }

    /// Namespace bound to `prefix` by a declaration on this element
    pub fn declared_namespace(&self, prefix: Option<&str>) -> Option<&str> {
        self.namespace_declarations()
            .find(|(p, _)| *p == prefix)
            .map(|(_, uri)| uri)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    Document { children: Vec<NodeId> },
    Element(ElementData),
    Text(String),
    CData(String),
    Comment(String),
    ProcessingInstruction { target: String, data: String },
    Declaration(String),
    DocType(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub logical: LogicalId,
    pub kind: NodeKind,
}

impl Node {
    pub fn as_element(&self) -> Option<&ElementData> {
        match &self.kind {
            NodeKind::Element(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_element_mut(&mut self) -> Option<&mut ElementData> {
        match &mut self.kind {
            NodeKind::Element(data) => Some(data),
            _ => None,
        }
    }

    pub fn is_element(&self) -> bool {
        matches!(self.kind, NodeKind::Element(_))
    }

    pub fn is_document(&self) -> bool {
        matches!(self.kind, NodeKind::Document { .. })
    }

    /// Character data of text and CDATA nodes
    pub fn text(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Text(text) | NodeKind::CData(text) => Some(text),
            _ => None,
        }
    }

    /// Text node made only of spaces, tabs and line breaks
    pub fn is_whitespace_text(&self) -> bool {
        match &self.kind {
            NodeKind::Text(text) => text
                .chars()
                .all(|c| matches!(c, ' ' | '\t' | '\n' | '\r')),
            _ => false,
        }
    }

    pub fn children(&self) -> &[NodeId] {
        match &self.kind {
            NodeKind::Document { children } => children,
            NodeKind::Element(data) => &data.children,
            _ => &[],
        }
    }

    pub(crate) fn children_mut(&mut self) -> Option<&mut Vec<NodeId>> {
        match &mut self.kind {
            NodeKind::Document { children } => Some(children),
            NodeKind::Element(data) => Some(&mut data.children),
            _ => None,
        }
    }

    /// Same kind and same leaf content. Elements compare by tag name only.
    pub fn same_leaf(&self, other: &Node) -> bool {
        match (&self.kind, &other.kind) {
            (NodeKind::Element(a), NodeKind::Element(b)) => a.tag_name() == b.tag_name(),
            (NodeKind::Document { .. }, NodeKind::Document { .. }) => true,
            (a, b) => a == b,
        }
    }
}
