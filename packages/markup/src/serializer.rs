use crate::document::MarkupDocument;
use crate::node::{NodeId, NodeKind};
use quick_xml::escape::{escape, partial_escape};
use std::collections::HashMap;

/// Byte range of a node in the serialized text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeSpan {
    pub start: usize,
    pub end: usize,
}

impl NodeSpan {
    pub fn contains(&self, offset: usize) -> bool {
        self.start <= offset && offset < self.end
    }
}

/// Serializer converts a markup tree back to text
///
/// The output is the canonical form of the tree: attributes are written with
/// double quotes separated by one space, and whitespace text nodes are kept
/// as they are. Text produced by this serializer parses back to the same tree.
pub struct Serializer {
    output: String,
    spans: Option<HashMap<NodeId, NodeSpan>>,
}

impl Serializer {
    pub fn new() -> Self {
        Self {
            output: String::new(),
            spans: None,
        }
    }

    /// Also record the span of every node written
    pub fn with_spans() -> Self {
        Self {
            output: String::new(),
            spans: Some(HashMap::new()),
        }
    }

    pub fn write_node(&mut self, doc: &MarkupDocument, id: NodeId) {
        enum Step<'a> {
            Open(NodeId),
            Close { id: NodeId, tag: Option<String>, start: usize },
            Children(&'a [NodeId]),
        }

        let mut steps = vec![Step::Open(id)];
        while let Some(step) = steps.pop() {
            match step {
                Step::Open(id) => {
                    let Some(node) = doc.get(id) else { continue };
                    let start = self.output.len();
                    let tag = self.open(&node.kind);
                    steps.push(Step::Close { id, tag, start });
                    match &node.kind {
                        NodeKind::Document { children } => steps.push(Step::Children(children)),
                        NodeKind::Element(el) if !el.children.is_empty() || !el.self_closing => {
                            steps.push(Step::Children(&el.children));
                        }
                        _ => {}
                    }
                }
                Step::Children(children) => {
                    steps.extend(children.iter().rev().map(|child| Step::Open(*child)));
                }
                Step::Close { id, tag, start } => {
                    if let Some(tag) = tag {
                        self.output.push_str("</");
                        self.output.push_str(&tag);
                        self.output.push('>');
                    }
                    if let Some(spans) = &mut self.spans {
                        spans.insert(
                            id,
                            NodeSpan {
                                start,
                                end: self.output.len(),
                            },
                        );
                    }
                }
            }
        }
    }

    /// Write everything before the children of a node. Returns the tag to
    /// close once the children are written.
    fn open(&mut self, kind: &NodeKind) -> Option<String> {
        match kind {
            NodeKind::Document { .. } => None,
            NodeKind::Element(el) => {
                let tag = el.tag_name();
                self.output.push('<');
                self.output.push_str(&tag);
                for attr in &el.attributes {
                    self.output.push(' ');
                    self.output.push_str(&attr.name);
                    self.output.push_str("=\"");
                    self.output.push_str(&escape(attr.value.as_str()));
                    self.output.push('"');
                }
                if el.children.is_empty() && el.self_closing {
                    self.output.push_str("/>");
                    None
                } else {
                    self.output.push('>');
                    Some(tag)
                }
            }
            NodeKind::Text(text) => {
                self.output.push_str(&partial_escape(text.as_str()));
                None
            }
            NodeKind::CData(text) => {
                self.output.push_str("<![CDATA[");
                self.output.push_str(text);
                self.output.push_str("]]>");
                None
            }
            NodeKind::Comment(text) => {
                self.output.push_str("<!--");
                self.output.push_str(text);
                self.output.push_str("-->");
                None
            }
            NodeKind::ProcessingInstruction { target, data } => {
                self.output.push_str("<?");
                self.output.push_str(target);
                if !data.is_empty() {
                    self.output.push(' ');
                    self.output.push_str(data);
                }
                self.output.push_str("?>");
                None
            }
            NodeKind::Declaration(content) => {
                self.output.push_str("<?");
                self.output.push_str(content);
                self.output.push_str("?>");
                None
            }
            NodeKind::DocType(content) => {
                self.output.push_str("<!DOCTYPE ");
                self.output.push_str(content);
                self.output.push('>');
                None
            }
        }
    }

    pub fn finish(self) -> String {
        self.output
    }

    pub fn finish_with_spans(self) -> (String, HashMap<NodeId, NodeSpan>) {
        (self.output, self.spans.unwrap_or_default())
    }
}

impl Default for Serializer {
    fn default() -> Self {
        Self::new()
    }
}

/// Serialize the current tree of `doc`
pub fn serialize(doc: &MarkupDocument) -> String {
    serialize_node(doc, doc.root())
}

pub fn serialize_node(doc: &MarkupDocument, id: NodeId) -> String {
    let mut serializer = Serializer::new();
    serializer.write_node(doc, id);
    serializer.finish()
}

/// Serialized children of `id`
pub fn serialize_children(doc: &MarkupDocument, id: NodeId) -> String {
    let mut serializer = Serializer::new();
    for child in doc.children(id) {
        serializer.write_node(doc, *child);
    }
    serializer.finish()
}

/// Spans of every node of the current tree
pub fn node_spans(doc: &MarkupDocument) -> HashMap<NodeId, NodeSpan> {
    let mut serializer = Serializer::with_spans();
    serializer.write_node(doc, doc.root());
    serializer.finish_with_spans().1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::EditMode;

    #[test]
    fn test_round_trip_canonical_text() {
        let source = "<?xml version=\"1.0\"?>\n<root a=\"x &amp; y\">\n  <child/>\n  <!--c--><other>t &lt; u</other>\n</root>";
        let doc = MarkupDocument::parse(source, EditMode::CopyOnWrite).unwrap();
        assert_eq!(serialize(&doc), source);
    }

    #[test]
    fn test_spans_cover_elements() {
        let source = "<root><a/><b>x</b></root>";
        let doc = MarkupDocument::parse(source, EditMode::CopyOnWrite).unwrap();
        let spans = node_spans(&doc);

        let root = doc.document_element().unwrap();
        let b = doc.child_elements(root).nth(1).unwrap();
        let span = spans[&b];
        assert_eq!(&source[span.start..span.end], "<b>x</b>");
        assert!(span.contains(span.start));
        assert!(!span.contains(span.end));
    }

    #[test]
    fn test_serialize_children() {
        let doc = MarkupDocument::parse("<r><a/>t</r>", EditMode::CopyOnWrite).unwrap();
        let root = doc.document_element().unwrap();
        assert_eq!(serialize_children(&doc, root), "<a/>t");
    }
}
