//! # Typed components
//!
//! Thin handles over [`ComponentId`]s of a web-app model. Handles hold no
//! borrow; every accessor takes the model.
//!
//! ```text
//! <web-app xmlns="http://xmlns.example.org/webapp">
//!   <description>…</description>            plain markup
//!   <servlet name="Dispatcher" class="…">    Servlet
//!     <init-param name="…" value="…"/>       InitParam
//!   </servlet>
//!   <servlet-mapping servlet="Dispatcher"/>  ServletMapping → Servlet
//!   <resource-ref name="jdbc/main"/>         ResourceRef
//! </web-app>
//! ```

use crate::schema::{WebAppFactory, WebAppKind, NAMESPACE};
use docsync_markup::QName;
use docsync_model::{ComponentId, DocumentModel, ModelError, ModelResult, NamedReference, PropertyValue};
use tracing::debug;

pub type WebAppModel = DocumentModel<WebAppFactory>;

macro_rules! component_handle {
    ($name:ident, $kind:expr) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(ComponentId);

        impl $name {
            /// Wrap `id` if it is a component of this kind
            pub fn from_component(model: &WebAppModel, id: ComponentId) -> ModelResult<Option<Self>> {
                Ok((*model.kind(id)? == $kind).then_some(Self(id)))
            }

            pub fn id(self) -> ComponentId {
                self.0
            }

            pub fn xpath(self, model: &WebAppModel) -> ModelResult<String> {
                model.xpath_expression(self.0)
            }
        }
    };
}

component_handle!(WebApp, WebAppKind::WebApp);
component_handle!(Servlet, WebAppKind::Servlet);
component_handle!(ServletMapping, WebAppKind::ServletMapping);
component_handle!(ResourceRef, WebAppKind::ResourceRef);
component_handle!(InitParam, WebAppKind::InitParam);

fn attribute(model: &WebAppModel, id: ComponentId, name: &str) -> ModelResult<Option<String>> {
    model.attribute(id, name)
}

fn children_of<T>(
    model: &mut WebAppModel,
    parent: ComponentId,
    kind: WebAppKind,
    wrap: fn(ComponentId) -> T,
) -> ModelResult<Vec<T>> {
    Ok(model
        .children_where(parent, |k| *k == kind)?
        .into_iter()
        .map(wrap)
        .collect())
}

impl WebApp {
    /// Root component of `model`
    pub fn of(model: &mut WebAppModel) -> ModelResult<Self> {
        let root = model.root()?;
        Self::from_component(model, root)?.ok_or(ModelError::UnknownElement(model.qname(root)?))
    }

    pub fn version(self, model: &WebAppModel) -> ModelResult<Option<String>> {
        attribute(model, self.0, "version")
    }

    pub fn set_version(self, model: &mut WebAppModel, version: Option<&str>) -> ModelResult<()> {
        model.set_attribute(self.0, "version", "version", version)
    }

    pub fn is_distributable(self, model: &WebAppModel) -> ModelResult<bool> {
        Ok(matches!(
            model.typed_attribute(self.0, "distributable")?,
            Some(PropertyValue::Boolean(true))
        ))
    }

    /// Text of the first `description` child element
    pub fn description(self, model: &WebAppModel) -> ModelResult<Option<String>> {
        let doc = model.document()?;
        let peer = model.peer(self.0)?;
        let found = doc
            .child_elements(peer)
            .find(|el| doc.element(*el).is_ok_and(|data| data.local_name == "description"));
        Ok(found.map(|el| doc.text_content(el)))
    }

    pub fn servlets(self, model: &mut WebAppModel) -> ModelResult<Vec<Servlet>> {
        children_of(model, self.0, WebAppKind::Servlet, Servlet)
    }

    pub fn servlet_mappings(self, model: &mut WebAppModel) -> ModelResult<Vec<ServletMapping>> {
        children_of(model, self.0, WebAppKind::ServletMapping, ServletMapping)
    }

    pub fn resource_refs(self, model: &mut WebAppModel) -> ModelResult<Vec<ResourceRef>> {
        children_of(model, self.0, WebAppKind::ResourceRef, ResourceRef)
    }

    pub fn find_servlet(self, model: &mut WebAppModel, name: &str) -> ModelResult<Option<Servlet>> {
        let found = model.find_named(&WebAppKind::Servlet, &QName::new(NAMESPACE, name))?;
        Ok(found.map(Servlet))
    }

    /// Add a servlet after the existing ones
    pub fn add_servlet(self, model: &mut WebAppModel, name: &str, class: &str) -> ModelResult<Servlet> {
        let index = self.servlets(model)?.len();
        let id = model.new_component(Some(self.0), Some(NAMESPACE), WebAppKind::Servlet.tag())?;
        model.set_attribute(id, "name", "name", Some(name))?;
        model.set_attribute(id, "servletClass", "class", Some(class))?;
        model.add_child(self.0, id, Some(index))?;
        debug!(name, %id, "added servlet");
        Ok(Servlet(id))
    }

    /// Map `servlet` to `url_pattern`
    pub fn add_servlet_mapping(
        self,
        model: &mut WebAppModel,
        servlet: Servlet,
        url_pattern: &str,
    ) -> ModelResult<ServletMapping> {
        let id = model.new_component(Some(self.0), Some(NAMESPACE), WebAppKind::ServletMapping.tag())?;
        model.add_child(self.0, id, None)?;
        let mapping = ServletMapping(id);
        mapping.set_servlet(model, servlet)?;
        mapping.set_url_pattern(model, url_pattern)?;
        Ok(mapping)
    }

    pub fn add_resource_ref(self, model: &mut WebAppModel, name: &str, res_type: &str) -> ModelResult<ResourceRef> {
        let id = model.new_component(Some(self.0), Some(NAMESPACE), WebAppKind::ResourceRef.tag())?;
        model.set_attribute(id, "name", "name", Some(name))?;
        model.set_attribute(id, "resType", "type", Some(res_type))?;
        model.add_child(self.0, id, None)?;
        Ok(ResourceRef(id))
    }

    pub fn remove(self, model: &mut WebAppModel, child: ComponentId) -> ModelResult<()> {
        model.remove_child(self.0, child)
    }
}

impl Servlet {
    pub fn name(self, model: &WebAppModel) -> ModelResult<Option<String>> {
        attribute(model, self.0, "name")
    }

    pub fn set_name(self, model: &mut WebAppModel, name: &str) -> ModelResult<()> {
        model.set_attribute(self.0, "name", "name", Some(name))
    }

    pub fn servlet_class(self, model: &WebAppModel) -> ModelResult<Option<String>> {
        attribute(model, self.0, "class")
    }

    pub fn set_servlet_class(self, model: &mut WebAppModel, class: &str) -> ModelResult<()> {
        model.set_attribute(self.0, "servletClass", "class", Some(class))
    }

    /// `None` when absent or not a number
    pub fn load_on_startup(self, model: &WebAppModel) -> ModelResult<Option<i64>> {
        match model.typed_attribute(self.0, "load-on-startup")? {
            Some(PropertyValue::Integer(order)) => Ok(Some(order)),
            _ => Ok(None),
        }
    }

    pub fn set_load_on_startup(self, model: &mut WebAppModel, order: Option<i64>) -> ModelResult<()> {
        let value = order.map(|order| order.to_string());
        model.set_attribute(self.0, "loadOnStartup", "load-on-startup", value.as_deref())
    }

    pub fn init_params(self, model: &mut WebAppModel) -> ModelResult<Vec<InitParam>> {
        children_of(model, self.0, WebAppKind::InitParam, InitParam)
    }

    pub fn add_init_param(self, model: &mut WebAppModel, name: &str, value: &str) -> ModelResult<InitParam> {
        let id = model.new_component(Some(self.0), Some(NAMESPACE), WebAppKind::InitParam.tag())?;
        model.set_attribute(id, "name", "name", Some(name))?;
        model.set_attribute(id, "value", "value", Some(value))?;
        model.add_child(self.0, id, None)?;
        Ok(InitParam(id))
    }
}

impl InitParam {
    pub fn name(self, model: &WebAppModel) -> ModelResult<Option<String>> {
        attribute(model, self.0, "name")
    }

    pub fn value(self, model: &WebAppModel) -> ModelResult<Option<String>> {
        attribute(model, self.0, "value")
    }

    pub fn set_value(self, model: &mut WebAppModel, value: &str) -> ModelResult<()> {
        model.set_attribute(self.0, "value", "value", Some(value))
    }
}

impl ServletMapping {
    pub fn url_pattern(self, model: &WebAppModel) -> ModelResult<Option<String>> {
        attribute(model, self.0, "url-pattern")
    }

    pub fn set_url_pattern(self, model: &mut WebAppModel, pattern: &str) -> ModelResult<()> {
        model.set_attribute(self.0, "urlPattern", "url-pattern", Some(pattern))
    }

    /// Reference held in the `servlet` attribute
    pub fn servlet_reference(self, model: &WebAppModel) -> ModelResult<Option<NamedReference<WebAppKind>>> {
        Ok(attribute(model, self.0, "servlet")?
            .map(|text| NamedReference::from_text(self.0, WebAppKind::Servlet, text)))
    }

    /// Referenced servlet, or `None` when the attribute is missing or broken
    pub fn servlet(self, model: &mut WebAppModel) -> ModelResult<Option<Servlet>> {
        let Some(mut reference) = self.servlet_reference(model)? else {
            return Ok(None);
        };
        Ok(reference.get(model)?.map(Servlet))
    }

    pub fn set_servlet(self, model: &mut WebAppModel, servlet: Servlet) -> ModelResult<()> {
        let mut reference = NamedReference::for_component(self.0, WebAppKind::Servlet, servlet.0);
        let text = reference.serialize(model)?;
        model.set_attribute(self.0, "servlet", "servlet", Some(&text))
    }
}

impl ResourceRef {
    pub fn name(self, model: &WebAppModel) -> ModelResult<Option<String>> {
        attribute(model, self.0, "name")
    }

    pub fn res_type(self, model: &WebAppModel) -> ModelResult<Option<String>> {
        attribute(model, self.0, "type")
    }

    pub fn auth(self, model: &WebAppModel) -> ModelResult<Option<String>> {
        attribute(model, self.0, "auth")
    }

    pub fn set_auth(self, model: &mut WebAppModel, auth: Option<&str>) -> ModelResult<()> {
        model.set_attribute(self.0, "auth", "auth", auth)
    }
}
