//! Reconciling the component tree with edits of the text buffer

use docsync_model::docsync_markup::QName;
use docsync_model::{
    ComponentEvent, DocumentModel, ModelConfig, ModelError, ModelState, PropertyValue, QNameFactory,
    StringBuffer, TextBuffer,
};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

type Events = Rc<RefCell<Vec<ComponentEvent>>>;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn model_with(text: &str, factory: QNameFactory) -> (DocumentModel<QNameFactory>, StringBuffer, Events) {
    init_tracing();
    let buffer = StringBuffer::new(text);
    let mut model = DocumentModel::new(Arc::new(buffer.clone()), factory, ModelConfig::default());
    let events: Events = Rc::default();
    let sink = events.clone();
    model.add_listener(move |event: &ComponentEvent| sink.borrow_mut().push(event.clone()));
    (model, buffer, events)
}

fn model(text: &str) -> (DocumentModel<QNameFactory>, StringBuffer, Events) {
    model_with(text, QNameFactory::any())
}

#[test]
fn test_attribute_edit_fires_property_change() {
    let (mut model, buffer, events) = model(r#"<r><item name="a"/></r>"#);
    let root = model.root().unwrap();
    let item = model.children(root).unwrap()[0];

    buffer.set_text(r#"<r><item name="a" v="1"/></r>"#);
    assert!(model.is_dirty());
    model.sync().unwrap();
    assert!(!model.is_dirty());

    assert_eq!(
        *events.borrow(),
        vec![
            ComponentEvent::ValueChanged { component: item },
            ComponentEvent::PropertyChanged {
                component: item,
                property: "v".to_string(),
                old: None,
                new: Some(PropertyValue::Text("1".to_string())),
            },
        ]
    );
    assert_eq!(model.attribute(item, "v").unwrap().as_deref(), Some("1"));
}

#[test]
fn test_components_survive_reparse() {
    let (mut model, buffer, _) = model(r#"<r><item name="a"/><item name="b"/></r>"#);
    let root = model.root().unwrap();
    let before = model.children(root).unwrap();

    buffer.set_text(r#"<r version="2"><item name="a"/><item name="b"/></r>"#);
    model.sync().unwrap();

    assert_eq!(model.root().unwrap(), root);
    assert_eq!(model.children(root).unwrap(), before);
    assert!(before.iter().all(|c| model.is_in_document_model(*c)));
    assert_eq!(model.attribute(root, "version").unwrap().as_deref(), Some("2"));
}

#[test]
fn test_population_is_idempotent() {
    let (mut model, _, _) = model("<r><a/><b/><c/></r>");
    let root = model.root().unwrap();

    let first = model.children(root).unwrap();
    let created = model.tree().len();
    let second = model.children(root).unwrap();

    assert_eq!(first.len(), 3);
    assert_eq!(first, second);
    assert_eq!(model.tree().len(), created);
}

#[test]
fn test_added_element_index_skips_comments() {
    let (mut model, buffer, events) = model("<r><item/><item/><!--c--></r>");
    let root = model.root().unwrap();
    model.children(root).unwrap();

    buffer.set_text("<r><item/><item/><!--c--><item/></r>");
    model.sync().unwrap();

    let children = model.children(root).unwrap();
    assert_eq!(children.len(), 3);
    assert_eq!(
        *events.borrow(),
        vec![ComponentEvent::ChildAdded {
            parent: root,
            child: children[2],
            index: 2,
        }]
    );
}

#[test]
fn test_element_inserted_before_comment() {
    let (mut model, buffer, events) = model("<r><item/><item/><!--c--><item/></r>");
    let root = model.root().unwrap();
    let before = model.children(root).unwrap();

    buffer.set_text("<r><item/><item/><item/><!--c--><item/></r>");
    model.sync().unwrap();

    let children = model.children(root).unwrap();
    assert_eq!(children.len(), 4);
    assert_eq!(&children[..2], &before[..2]);
    assert_eq!(children[3], before[2]);
    assert_eq!(
        *events.borrow(),
        vec![ComponentEvent::ChildAdded {
            parent: root,
            child: children[2],
            index: 2,
        }]
    );
}

#[test]
fn test_swapped_siblings_keep_their_components() {
    let (mut model, buffer, events) = model(r#"<r><s name="one"/><s name="two"/></r>"#);
    let root = model.root().unwrap();
    let before = model.children(root).unwrap();

    buffer.set_text(r#"<r><s name="two"/><s name="one"/></r>"#);
    model.sync().unwrap();

    let children = model.children(root).unwrap();
    assert_eq!(children, vec![before[1], before[0]]);
    assert!(children.iter().all(|c| model.is_in_document_model(*c)));
    assert_eq!(model.attribute(children[0], "name").unwrap().as_deref(), Some("two"));
    assert_eq!(
        *events.borrow(),
        vec![ComponentEvent::ChildMoved {
            parent: root,
            child: before[1],
            from: 1,
            to: 0,
        }]
    );
}

#[test]
fn test_removed_element_detaches_component() {
    let (mut model, buffer, events) = model(r#"<r><item name="a"/><item name="b"/></r>"#);
    let root = model.root().unwrap();
    let children = model.children(root).unwrap();
    let (a, b) = (children[0], children[1]);

    buffer.set_text(r#"<r><item name="b"/></r>"#);
    model.sync().unwrap();

    assert_eq!(
        *events.borrow(),
        vec![ComponentEvent::ChildRemoved {
            parent: root,
            child: a,
            index: 0,
        }]
    );
    assert!(!model.is_in_document_model(a));
    assert_eq!(model.children(root).unwrap(), vec![b]);
}

#[test]
fn test_whitespace_only_change_is_silent() {
    let (mut model, buffer, events) = model("<r><item/></r>");
    let root = model.root().unwrap();
    let item = model.children(root).unwrap()[0];

    buffer.set_text("<r>\n  <item/>\n</r>");
    model.sync().unwrap();

    assert!(events.borrow().is_empty());
    assert_eq!(model.children(root).unwrap(), vec![item]);
    assert_eq!(model.state(), ModelState::Valid);
}

#[test]
fn test_text_content_change() {
    let (mut model, buffer, events) = model("<r><item>old</item></r>");
    let root = model.root().unwrap();
    let item = model.children(root).unwrap()[0];

    buffer.set_text("<r><item>new</item></r>");
    model.sync().unwrap();

    assert_eq!(
        *events.borrow(),
        vec![
            ComponentEvent::ValueChanged { component: item },
            ComponentEvent::PropertyChanged {
                component: item,
                property: "textContent".to_string(),
                old: Some(PropertyValue::Text("old".to_string())),
                new: Some(PropertyValue::Text("new".to_string())),
            },
        ]
    );
    assert_eq!(model.text(item).unwrap(), "new");
}

#[test]
fn test_non_domain_child_reports_fragments() {
    let factory = QNameFactory::new([QName::local("r"), QName::local("item")]);
    let (mut model, buffer, events) =
        model_with("<r><item><description>a</description></item></r>", factory);
    let root = model.root().unwrap();
    let item = model.children(root).unwrap()[0];

    buffer.set_text("<r><item><description>b</description></item></r>");
    model.sync().unwrap();

    let events = events.borrow();
    assert_eq!(events[0], ComponentEvent::ValueChanged { component: item });
    assert!(events.contains(&ComponentEvent::PropertyChanged {
        component: item,
        property: "description".to_string(),
        old: Some(PropertyValue::Fragments(vec!["<description>a</description>".to_string()])),
        new: Some(PropertyValue::Fragments(vec!["<description>b</description>".to_string()])),
    }));
    assert!(model.children(item).unwrap().is_empty());
}

#[test]
fn test_malformed_text_keeps_tree_until_fixed() {
    let (mut model, buffer, events) = model("<r><item/></r>");
    let root = model.root().unwrap();
    let item = model.children(root).unwrap()[0];

    buffer.set_text("<r><item></r>");
    model.sync().unwrap();
    assert_eq!(model.state(), ModelState::NotWellFormed);
    assert_eq!(model.children(root).unwrap(), vec![item]);
    assert!(matches!(
        model.begin_transaction(),
        Err(ModelError::NotWellFormed(_))
    ));

    buffer.set_text("<r><item/><item/></r>");
    model.sync().unwrap();
    assert_eq!(model.state(), ModelState::Valid);
    assert_eq!(model.children(root).unwrap().len(), 2);
    assert!(matches!(
        events.borrow().as_slice(),
        [ComponentEvent::ChildAdded { index: 1, .. }]
    ));
}

#[test]
fn test_second_top_level_element_is_not_well_formed() {
    let (mut model, buffer, events) = model("<r><item/></r>");
    let root = model.root().unwrap();
    let item = model.children(root).unwrap()[0];

    for text in ["<r><item/></r><x/>", "<r><item/></r>tail"] {
        buffer.set_text(text);
        model.sync().unwrap();
        assert_eq!(model.state(), ModelState::NotWellFormed);
        assert_eq!(model.children(root).unwrap(), vec![item]);
    }
    assert!(events.borrow().is_empty());
}

#[test]
fn test_unparsable_initial_text() {
    let (mut model, buffer, _) = model("not markup");
    assert!(matches!(model.root(), Err(ModelError::NotWellFormed(_))));
    assert_eq!(model.state(), ModelState::NotWellFormed);

    buffer.set_text("<r/>");
    model.rebuild().unwrap();
    assert_eq!(model.state(), ModelState::Valid);
    assert!(model.root().is_ok());
}

#[test]
fn test_replaced_document_element() {
    let (mut model, buffer, events) = model("<r><item/></r>");
    let old = model.root().unwrap();

    buffer.set_text("<other/>");
    model.sync().unwrap();

    let new = model.root().unwrap();
    assert_ne!(old, new);
    assert!(!model.is_in_document_model(old));
    assert_eq!(model.qname(new).unwrap(), QName::local("other"));
    assert_eq!(
        *events.borrow(),
        vec![ComponentEvent::RootReplaced { old: Some(old), new }]
    );
}

#[test]
fn test_rebuild_emits_root_replaced() {
    let (mut model, _, events) = model("<r><item/></r>");
    let old = model.root().unwrap();
    let item = model.children(old).unwrap()[0];

    model.rebuild().unwrap();

    let new = model.root().unwrap();
    assert!(!model.is_in_document_model(item));
    assert_eq!(
        *events.borrow(),
        vec![ComponentEvent::RootReplaced { old: Some(old), new }]
    );
}

#[test]
fn test_unchanged_text_is_not_reparsed() {
    let (mut model, buffer, events) = model("<r/>");
    let root = model.root().unwrap();

    buffer.set_text("<r/>");
    assert!(model.is_dirty());
    model.sync().unwrap();

    assert!(!model.is_dirty());
    assert_eq!(model.root().unwrap(), root);
    assert!(events.borrow().is_empty());
}

#[test]
fn test_notifications_before_first_use_are_replayed() {
    init_tracing();
    let buffer = StringBuffer::new("<r/>");
    let mut model = DocumentModel::new(
        Arc::new(buffer.clone()),
        QNameFactory::any(),
        ModelConfig::default(),
    );

    let writer = buffer.clone();
    std::thread::spawn(move || writer.set_text("<r><item/></r>"))
        .join()
        .unwrap();
    assert!(!model.is_dirty());

    let root = model.root().unwrap();
    assert!(model.is_dirty());
    assert!(model.dirty_since().is_some());
    assert_eq!(model.children(root).unwrap().len(), 1);

    model.sync().unwrap();
    assert!(!model.is_dirty());
}

#[test]
fn test_sync_during_transaction_fails() {
    let (mut model, _, _) = model("<r/>");
    model.begin_transaction().unwrap();
    assert!(matches!(model.sync(), Err(ModelError::TransactionInProgress)));
    assert!(matches!(
        model.begin_transaction(),
        Err(ModelError::TransactionInProgress)
    ));
    model.end_transaction().unwrap();
    assert!(matches!(model.end_transaction(), Err(ModelError::NotInTransaction)));
}

#[test]
fn test_repeated_syncs_keep_the_arena_bounded() {
    let (mut model, buffer, _) = model(r#"<r><s name="a" v="0"/><s name="b"/></r>"#);
    let root = model.root().unwrap();
    let children = model.children(root).unwrap();
    let slack = model.config().compaction_slack;

    let mut largest = 0;
    for round in 1..=300 {
        let extra = if round % 2 == 0 { "<t/>" } else { "" };
        buffer.set_text(&format!(r#"<r><s name="a" v="{round}"/><s name="b"/>{extra}</r>"#));
        model.sync().unwrap();
        largest = largest.max(model.document().unwrap().node_count());
    }

    assert!(largest < 2 * slack, "arena grew to {largest} nodes");
    assert_eq!(model.children(root).unwrap().len(), 3);
    assert_eq!(&model.children(root).unwrap()[..2], &children[..]);
    assert_eq!(model.attribute(children[0], "v").unwrap().as_deref(), Some("300"));
    assert_eq!(model.xpath_expression(children[1]).unwrap(), "/r/s[2]");
}

#[test]
fn test_dropped_model_unsubscribes() {
    init_tracing();
    let buffer = StringBuffer::new("<r/>");
    let model = DocumentModel::new(
        Arc::new(buffer.clone()),
        QNameFactory::any(),
        ModelConfig::default(),
    );
    let other = DocumentModel::new(
        Arc::new(buffer.clone()),
        QNameFactory::any(),
        ModelConfig::default(),
    );
    assert_eq!(buffer.listener_count(), 2);

    drop(model);
    assert_eq!(buffer.listener_count(), 1);
    buffer.set_text("<r><item/></r>");
    drop(other);
    assert_eq!(buffer.listener_count(), 0);
}
