//! Web-app element names and the factory that types them.

use docsync_markup::QName;
use docsync_model::{AttrType, ComponentFactory};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub const NAMESPACE: &str = "http://xmlns.example.org/webapp";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WebAppKind {
    WebApp,
    Servlet,
    ServletMapping,
    ResourceRef,
    InitParam,
}

impl WebAppKind {
    pub const ALL: [WebAppKind; 5] = [
        Self::WebApp,
        Self::Servlet,
        Self::ServletMapping,
        Self::ResourceRef,
        Self::InitParam,
    ];

    /// Element local name
    pub fn tag(self) -> &'static str {
        match self {
            Self::WebApp => "web-app",
            Self::Servlet => "servlet",
            Self::ServletMapping => "servlet-mapping",
            Self::ResourceRef => "resource-ref",
            Self::InitParam => "init-param",
        }
    }

    pub fn qname(self) -> QName {
        QName::new(NAMESPACE, self.tag())
    }

    /// Kind of a child element named `local` below a component of this kind
    pub fn child(self, local: &str) -> Option<WebAppKind> {
        match (self, local) {
            (Self::WebApp, "servlet") => Some(Self::Servlet),
            (Self::WebApp, "servlet-mapping") => Some(Self::ServletMapping),
            (Self::WebApp, "resource-ref") => Some(Self::ResourceRef),
            (Self::Servlet, "init-param") => Some(Self::InitParam),
            _ => None,
        }
    }
}

/// Types `web-app` documents. Elements outside the namespace, and
/// `description` elements, stay plain markup.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebAppFactory;

impl ComponentFactory for WebAppFactory {
    type Kind = WebAppKind;

    fn create(&self, parent: Option<&WebAppKind>, qname: &QName) -> Option<WebAppKind> {
        if qname.namespace() != Some(NAMESPACE) {
            return None;
        }
        match parent {
            None => (qname.local == WebAppKind::WebApp.tag()).then_some(WebAppKind::WebApp),
            Some(parent) => parent.child(&qname.local),
        }
    }

    fn domain_qnames(&self) -> HashSet<QName> {
        WebAppKind::ALL.iter().map(|kind| kind.qname()).collect()
    }

    fn attribute_type(&self, kind: &WebAppKind, attribute: &str) -> AttrType {
        match (kind, attribute) {
            (WebAppKind::Servlet, "load-on-startup") => AttrType::Integer,
            (WebAppKind::WebApp, "distributable") => AttrType::Boolean,
            _ => AttrType::Text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_follows_nesting() {
        let factory = WebAppFactory;
        let servlet = QName::new(NAMESPACE, "servlet");

        assert_eq!(factory.create(None, &WebAppKind::WebApp.qname()), Some(WebAppKind::WebApp));
        assert_eq!(factory.create(None, &servlet), None);
        assert_eq!(
            factory.create(Some(&WebAppKind::WebApp), &servlet),
            Some(WebAppKind::Servlet)
        );
        assert_eq!(
            factory.create(Some(&WebAppKind::Servlet), &WebAppKind::InitParam.qname()),
            Some(WebAppKind::InitParam)
        );
        assert_eq!(factory.create(Some(&WebAppKind::WebApp), &QName::local("servlet")), None);
        assert_eq!(
            factory.create(Some(&WebAppKind::WebApp), &QName::new(NAMESPACE, "description")),
            None
        );
    }

    #[test]
    fn test_attribute_types() {
        let factory = WebAppFactory;
        assert_eq!(
            factory.attribute_type(&WebAppKind::Servlet, "load-on-startup"),
            AttrType::Integer
        );
        assert_eq!(factory.attribute_type(&WebAppKind::Servlet, "name"), AttrType::Text);
        assert_eq!(factory.domain_qnames().len(), 5);
    }
}
