//! Element identity across tree snapshots.
//!
//! Two elements taken from different parses of the same text never share a
//! node id or a logical id, so matching them relies on names, identifying
//! attributes and, as a last resort, their position among siblings.

use crate::document::MarkupDocument;
use crate::node::{ElementData, NodeId};
use serde::{Deserialize, Serialize};

/// An element seen through its namespace context
#[derive(Clone, Copy)]
pub struct ElementRef<'a> {
    pub doc: &'a MarkupDocument,
    /// Root-first element path ending with the element itself
    pub context: &'a [NodeId],
}

impl<'a> ElementRef<'a> {
    pub fn new(doc: &'a MarkupDocument, context: &'a [NodeId]) -> Self {
        Self { doc, context }
    }

    pub fn node(&self) -> Option<NodeId> {
        self.context.last().copied()
    }

    fn data(&self) -> Option<&'a ElementData> {
        self.doc.get(self.node()?)?.as_element()
    }

    fn namespace(&self) -> Option<String> {
        self.doc.namespace_of(self.context)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementIdentity {
    identifying_attributes: Vec<String>,
}

impl ElementIdentity {
    pub fn new() -> Self {
        Self {
            identifying_attributes: Vec::new(),
        }
    }

    pub fn with_attributes<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut identity = Self::new();
        for name in names {
            identity.register(name);
        }
        identity
    }

    /// Append an identifying attribute; earlier registrations take precedence
    pub fn register(&mut self, name: impl Into<String>) {
        let name = name.into();
        if !self.identifying_attributes.contains(&name) {
            self.identifying_attributes.push(name);
        }
    }

    pub fn identifying_attributes(&self) -> &[String] {
        &self.identifying_attributes
    }

    /// Whether `a` and `b` are the same logical element.
    ///
    /// Any identifying attribute present on both elements with an equal
    /// value makes them the same; otherwise `same_position`, the caller's
    /// structural answer, decides.
    pub fn compare_element(&self, a: &ElementRef<'_>, b: &ElementRef<'_>, same_position: bool) -> bool {
        self.same_name(a, b) && (self.shares_key(a, b) || same_position)
    }

    /// Whether `a` and `b` agree on the value of some identifying attribute
    pub fn matches_by_key(&self, a: &ElementRef<'_>, b: &ElementRef<'_>) -> bool {
        self.same_name(a, b) && self.shares_key(a, b)
    }

    fn same_name(&self, a: &ElementRef<'_>, b: &ElementRef<'_>) -> bool {
        let (Some(left), Some(right)) = (a.data(), b.data()) else {
            return false;
        };
        left.local_name == right.local_name && a.namespace() == b.namespace()
    }

    fn shares_key(&self, a: &ElementRef<'_>, b: &ElementRef<'_>) -> bool {
        let (Some(left), Some(right)) = (a.data(), b.data()) else {
            return false;
        };
        self.identifying_attributes.iter().any(|name| {
            matches!(
                (left.attribute(name), right.attribute(name)),
                (Some(x), Some(y)) if x == y
            )
        })
    }
}

impl Default for ElementIdentity {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{EditMode, MarkupDocument};

    fn children(doc: &MarkupDocument) -> Vec<Vec<NodeId>> {
        let root = doc.document_element().unwrap();
        doc.child_elements(root)
            .map(|c| doc.path_to(c).unwrap())
            .collect()
    }

    #[test]
    fn test_identifying_attribute_decides() {
        let doc = MarkupDocument::parse(
            r#"<r><s name="a" id="1"/><s name="a" id="2"/><s name="b"/><s/><s name="b" id="1"/></r>"#,
            EditMode::CopyOnWrite,
        )
        .unwrap();
        let paths = children(&doc);
        let identity = ElementIdentity::with_attributes(["name", "id"]);
        let el = |i: usize| ElementRef::new(&doc, &paths[i]);

        // equal "name" is enough even though "id" differs
        assert!(identity.compare_element(&el(0), &el(1), false));
        // nothing equal on both sides: falls back to position
        assert!(identity.compare_element(&el(0), &el(2), true));
        assert!(!identity.compare_element(&el(0), &el(2), false));
        assert!(identity.compare_element(&el(0), &el(3), true));
        assert!(!identity.compare_element(&el(0), &el(3), false));
    }

    #[test]
    fn test_any_equal_attribute_matches() {
        let doc = MarkupDocument::parse(
            r#"<r><s name="a" id="1"/><s name="b" id="1"/><s name="b" id="2"/></r>"#,
            EditMode::CopyOnWrite,
        )
        .unwrap();
        let paths = children(&doc);
        let identity = ElementIdentity::with_attributes(["name", "id"]);
        let el = |i: usize| ElementRef::new(&doc, &paths[i]);

        assert!(identity.compare_element(&el(0), &el(1), false));
        assert!(identity.matches_by_key(&el(0), &el(1)));
        assert!(identity.matches_by_key(&el(1), &el(2)));
        assert!(!identity.matches_by_key(&el(0), &el(2)));
        assert!(!identity.compare_element(&el(0), &el(2), false));
    }

    #[test]
    fn test_names_and_namespaces_must_match() {
        let doc = MarkupDocument::parse(
            r#"<r xmlns:a="http://a" xmlns:b="http://b"><a:s/><b:s/><a:t/><s/></r>"#,
            EditMode::CopyOnWrite,
        )
        .unwrap();
        let paths = children(&doc);
        let identity = ElementIdentity::new();
        let el = |i: usize| ElementRef::new(&doc, &paths[i]);

        assert!(identity.compare_element(&el(0), &el(0), true));
        assert!(!identity.compare_element(&el(0), &el(1), true));
        assert!(!identity.compare_element(&el(0), &el(2), true));
        assert!(!identity.compare_element(&el(0), &el(3), true));
    }

    #[test]
    fn test_register_keeps_order_without_duplicates() {
        let mut identity = ElementIdentity::with_attributes(["name"]);
        identity.register("id");
        identity.register("name");
        assert_eq!(identity.identifying_attributes(), ["name", "id"]);
    }
}
