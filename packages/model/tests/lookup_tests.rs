//! Locating components: positions, expressions, references and embedding

use docsync_model::docsync_markup::QName;
use docsync_model::{
    Catalog, DocumentModel, ForeignAnchor, ModelError, NamedReference, QNameFactory, ResolvedReference,
};
use std::rc::Rc;

fn model(text: &str) -> DocumentModel<QNameFactory> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    DocumentModel::from_text(text, QNameFactory::any())
}

const WEB: &str = r#"<web-app><servlet name="a"/><servlet name="b"><init-param/></servlet></web-app>"#;

#[test]
fn test_xpath_round_trip() {
    let mut model = model(WEB);
    let root = model.root().unwrap();
    let servlets = model.children(root).unwrap();
    let param = model.children(servlets[1]).unwrap()[0];

    assert_eq!(model.xpath_expression(root).unwrap(), "/web-app");
    assert_eq!(model.xpath_expression(servlets[0]).unwrap(), "/web-app/servlet[1]");
    let expr = model.xpath_expression(param).unwrap();
    assert_eq!(expr, "/web-app/servlet[2]/init-param");

    assert_eq!(model.find_by_xpath(&expr).unwrap(), Some(param));
    assert_eq!(model.find_by_xpath("/web-app/servlet").unwrap(), Some(servlets[0]));
    assert_eq!(model.find_by_xpath("/web-app/servlet[3]").unwrap(), None);
    assert_eq!(model.find_by_xpath("/other").unwrap(), None);
    assert!(matches!(
        model.find_by_xpath("web-app"),
        Err(ModelError::InvalidXPath { .. })
    ));
}

#[test]
fn test_positions() -> anyhow::Result<()> {
    let mut model = model("<r><a><b/></a></r>");
    let root = model.root()?;
    let a = model.children(root)?[0];
    let b = model.children(a)?[0];

    assert_eq!(model.find_position(a)?, Some(3));
    assert_eq!(model.find_component_at(7)?, b);
    assert_eq!(model.find_component_at(1)?, root);
    // outside the document element
    assert_eq!(model.find_component_at(100)?, root);
    Ok(())
}

#[test]
fn test_find_component_populates_on_the_way() {
    let mut model = model("<r><a><b/></a></r>");
    let root = model.root().unwrap();
    let doc = model.document().unwrap();
    let r = doc.document_element().unwrap();
    let a = doc.child_elements(r).next().unwrap();
    let b = doc.child_elements(a).next().unwrap();

    let found = model.find_component(b).unwrap().unwrap();
    assert_eq!(model.peer(found).unwrap(), b);
    assert_eq!(model.tree().depth(found), 3);
    assert_eq!(model.parent(model.parent(found).unwrap().unwrap()).unwrap(), Some(root));
}

#[test]
fn test_children_where() {
    let mut model = model("<r><a/><b/><a/></r>");
    let root = model.root().unwrap();
    let only_a = model
        .children_where(root, |kind| kind.local == "a")
        .unwrap();
    assert_eq!(only_a.len(), 2);
}

const REFS: &str = concat!(
    r#"<r xmlns:j="urn:j">"#,
    r#"<j:servlet name="Dispatcher"/>"#,
    r#"<mapping servlet="j:Dispatcher"/>"#,
    r#"<mapping servlet="j:Missing"/>"#,
    "</r>"
);

#[test]
fn test_named_reference_resolves_locally() {
    let mut model = model(REFS);
    let root = model.root().unwrap();
    let children = model.children(root).unwrap();
    let (servlet, mapping, broken) = (children[0], children[1], children[2]);
    let kind = QName::new("urn:j", "servlet");

    let text = model.attribute(mapping, "servlet").unwrap().unwrap();
    let mut reference = NamedReference::from_text(mapping, kind.clone(), text);
    assert_eq!(
        reference.qname(&model).unwrap(),
        QName::new("urn:j", "Dispatcher")
    );
    assert_eq!(reference.get(&mut model).unwrap(), Some(servlet));
    assert!(!reference.is_broken(&mut model));
    assert!(reference.is_cached());
    reference.refresh();
    assert!(!reference.is_cached());

    let text = model.attribute(broken, "servlet").unwrap().unwrap();
    let mut missing = NamedReference::from_text(broken, kind.clone(), text);
    assert!(missing.is_broken(&mut model));

    let mut to_servlet = NamedReference::for_component(mapping, kind, servlet);
    assert_eq!(to_servlet.serialize(&model).unwrap(), "j:Dispatcher");
    assert_eq!(to_servlet.get(&mut model).unwrap(), Some(servlet));
}

#[test]
fn test_named_reference_resolves_through_catalog() {
    let mut local = model(r#"<r xmlns:j="urn:j"><mapping servlet="j:Remote"/></r>"#);
    let root = local.root().unwrap();
    let mapping = local.children(root).unwrap()[0];

    let other = model(r#"<r xmlns:j="urn:j"><j:servlet name="Remote"/></r>"#).into_shared();
    let mut catalog = Catalog::new();
    catalog.register("other.xml", other.clone());

    let mut reference = NamedReference::from_text(mapping, QName::new("urn:j", "servlet"), "j:Remote");
    assert_eq!(reference.get(&mut local).unwrap(), None);

    match reference.resolve_with(&mut local, &catalog, "other.xml") {
        ResolvedReference::External { model, component } => {
            assert!(Rc::ptr_eq(&model, &other));
            let name = model.borrow().attribute(component, "name").unwrap();
            assert_eq!(name.as_deref(), Some("Remote"));
        }
        _ => panic!("expected an external resolution"),
    }
    assert!(reference
        .resolve_with(&mut local, &catalog, "missing.xml")
        .is_broken());
}

#[test]
fn test_embedded_root_uses_host_scope() {
    let host = model(r#"<host xmlns:w="urn:w"><slot/></host>"#).into_shared();
    let slot = {
        let mut host = host.borrow_mut();
        let root = host.root().unwrap();
        host.children(root).unwrap()[0]
    };

    let mut embedded = model("<w:item><w:part/></w:item>");
    embedded.embed_in(Rc::new(ForeignAnchor::new(&host, slot)));
    let root = embedded.root().unwrap();
    let part = embedded.children(root).unwrap()[0];

    assert_eq!(embedded.qname(root).unwrap(), QName::new("urn:w", "item"));
    assert_eq!(embedded.qname(part).unwrap(), QName::new("urn:w", "part"));
    assert_eq!(embedded.lookup_prefix(part, "urn:w").unwrap().as_deref(), Some("w"));
    assert!(embedded.is_in_document_model(part));

    drop(host);
    assert!(!embedded.is_in_document_model(root));
}
