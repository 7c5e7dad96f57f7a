//! Component factory: decides which markup elements become components.

use crate::attributes::AttrType;
use docsync_markup::QName;
use std::collections::HashSet;
use std::fmt::Debug;

pub trait ComponentFactory {
    /// Component type tag stored in the tree
    type Kind: Clone + PartialEq + Debug;

    /// Component kind for an element named `qname` below a `parent` component.
    /// `None` when the element is not part of the domain model there.
    fn create(&self, parent: Option<&Self::Kind>, qname: &QName) -> Option<Self::Kind>;

    /// Expanded names of every domain element. An empty set treats every
    /// element as a domain element during change classification.
    fn domain_qnames(&self) -> HashSet<QName>;

    fn attribute_type(&self, _kind: &Self::Kind, _attribute: &str) -> AttrType {
        AttrType::Text
    }

    /// Attribute holding the name used by named references
    fn name_attribute(&self, _kind: &Self::Kind) -> &str {
        "name"
    }
}

/// Factory whose component kind is the element name itself
#[derive(Debug, Clone, Default)]
pub struct QNameFactory {
    qnames: HashSet<QName>,
}

impl QNameFactory {
    /// Accept only the given names
    pub fn new(qnames: impl IntoIterator<Item = QName>) -> Self {
        Self {
            qnames: qnames.into_iter().collect(),
        }
    }

    /// Accept every element
    pub fn any() -> Self {
        Self::default()
    }
}

impl ComponentFactory for QNameFactory {
    type Kind = QName;

    fn create(&self, _parent: Option<&QName>, qname: &QName) -> Option<QName> {
        (self.qnames.is_empty() || self.qnames.contains(qname)).then(|| qname.clone())
    }

    fn domain_qnames(&self) -> HashSet<QName> {
        self.qnames.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qname_factory() {
        let item = QName::new("http://x", "item");
        let factory = QNameFactory::new([item.clone()]);
        assert_eq!(factory.create(None, &item), Some(item.clone()));
        assert_eq!(factory.create(None, &QName::local("item")), None);

        let any = QNameFactory::any();
        assert!(any.domain_qnames().is_empty());
        assert_eq!(any.create(Some(&item), &QName::local("x")), Some(QName::local("x")));
    }
}
