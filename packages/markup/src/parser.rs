//! Markup parser built on `quick-xml`.
//!
//! Parsed nodes are allocated into an existing [`MarkupDocument`] arena with
//! fresh logical ids and are not attached to its live tree.

use crate::document::MarkupDocument;
use crate::error::{MarkupError, MarkupResult};
use crate::node::{Attribute, ElementData, NodeId, NodeKind};
use quick_xml::escape::unescape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

/// Parse a complete document. Returns the new (detached) document node.
pub fn parse_into(doc: &mut MarkupDocument, text: &str) -> MarkupResult<NodeId> {
    let document = doc.alloc_fresh(NodeKind::Document {
        children: Vec::new(),
    });
    read_nodes(doc, text, document)?;

    let mut elements = 0;
    for child in doc.children(document) {
        let node = doc.node(*child)?;
        if node.is_element() {
            elements += 1;
        } else if node.text().is_some() && !node.is_whitespace_text() {
            return Err(MarkupError::parse(0, "text outside the root element"));
        }
    }
    match elements {
        0 => Err(MarkupError::parse(text.len(), "document has no root element")),
        1 => Ok(document),
        _ => Err(MarkupError::parse(0, "more than one root element")),
    }
}

/// Parse a sequence of sibling nodes. Returns the detached top-level nodes.
pub fn parse_fragment_into(doc: &mut MarkupDocument, text: &str) -> MarkupResult<Vec<NodeId>> {
    let holder = doc.alloc_fresh(NodeKind::Document {
        children: Vec::new(),
    });
    read_nodes(doc, text, holder)?;
    Ok(doc.children(holder).to_vec())
}

fn read_nodes(doc: &mut MarkupDocument, text: &str, container: NodeId) -> MarkupResult<()> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(false);

    let mut stack = vec![container];
    loop {
        let pos = reader.buffer_position() as usize;
        let event = reader
            .read_event()
            .map_err(|e| MarkupError::parse(pos, e.to_string()))?;

        match event {
            Event::Start(start) => {
                let element = start_element(&start, pos)?;
                let id = doc.alloc_fresh(NodeKind::Element(element));
                append(doc, &stack, id)?;
                stack.push(id);
            }
            Event::Empty(start) => {
                let element = start_element(&start, pos)?;
                let id = doc.alloc_fresh(NodeKind::Element(element));
                append(doc, &stack, id)?;
            }
            Event::End(_) => {
                if stack.len() <= 1 {
                    return Err(MarkupError::parse(pos, "unexpected closing tag"));
                }
                if let Some(closed) = stack.pop() {
                    if let Some(el) = doc.node_mut(closed)?.as_element_mut() {
                        el.self_closing = false;
                    }
                }
            }
            Event::Text(raw) => {
                let text = decode_escaped(&raw, pos)?;
                let id = doc.alloc_fresh(NodeKind::Text(text));
                append(doc, &stack, id)?;
            }
            Event::CData(raw) => {
                let text = decode(&raw, pos)?.to_string();
                let id = doc.alloc_fresh(NodeKind::CData(text));
                append(doc, &stack, id)?;
            }
            Event::Comment(raw) => {
                let text = decode(&raw, pos)?.to_string();
                let id = doc.alloc_fresh(NodeKind::Comment(text));
                append(doc, &stack, id)?;
            }
            Event::PI(raw) => {
                let content = decode(&raw, pos)?;
                let (target, data) = match content.split_once(char::is_whitespace) {
                    Some((target, data)) => (target.to_string(), data.trim_start().to_string()),
                    None => (content.to_string(), String::new()),
                };
                let id = doc.alloc_fresh(NodeKind::ProcessingInstruction { target, data });
                append(doc, &stack, id)?;
            }
            Event::Decl(raw) => {
                let content = decode(&raw, pos)?.to_string();
                let id = doc.alloc_fresh(NodeKind::Declaration(content));
                append(doc, &stack, id)?;
            }
            Event::DocType(raw) => {
                let content = decode(&raw, pos)?.trim().to_string();
                let id = doc.alloc_fresh(NodeKind::DocType(content));
                append(doc, &stack, id)?;
            }
            Event::Eof => break,
            #[allow(unreachable_patterns)]
            _ => {}
        }
    }

    if stack.len() > 1 {
        return Err(MarkupError::parse(text.len(), "unclosed element at end of input"));
    }
    Ok(())
}

fn append(doc: &mut MarkupDocument, stack: &[NodeId], child: NodeId) -> MarkupResult<()> {
    let parent = *stack
        .last()
        .ok_or_else(|| MarkupError::parse(0, "no open container"))?;
    if let Some(children) = doc.node_mut(parent)?.children_mut() {
        children.push(child);
    }
    Ok(())
}

fn start_element(start: &BytesStart<'_>, pos: usize) -> MarkupResult<ElementData> {
    let qname = start.name();
    let mut element = ElementData::new(decode(qname.as_ref(), pos)?);
    for attr in start.attributes() {
        let attr = attr.map_err(|e| MarkupError::parse(pos, e.to_string()))?;
        let key = decode(attr.key.as_ref(), pos)?;
        let value = decode_escaped(&attr.value, pos)?;
        element.attributes.push(Attribute::new(key, value));
    }
    Ok(element)
}

fn decode(bytes: &[u8], pos: usize) -> MarkupResult<&str> {
    std::str::from_utf8(bytes).map_err(|e| MarkupError::parse(pos, e.to_string()))
}

fn decode_escaped(bytes: &[u8], pos: usize) -> MarkupResult<String> {
    let raw = decode(bytes, pos)?;
    unescape(raw)
        .map(|text| text.into_owned())
        .map_err(|e| MarkupError::parse(pos, e.to_string()))
}
