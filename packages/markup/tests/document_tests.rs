use docsync_markup::{
    ChangeKind, EditMode, ElementIdentity, MarkupAccess, MarkupDocument, NoopUpdater,
};

#[test]
fn test_text_round_trips() -> anyhow::Result<()> {
    let source = "<r>\n  <a name=\"x\"/>\n  <!-- c -->\n  <b>text</b>\n</r>";
    let doc = MarkupDocument::parse(source, EditMode::CopyOnWrite)?;
    assert_eq!(MarkupAccess::serialize(&doc), source);
    Ok(())
}

#[test]
fn test_malformed_text_is_a_parse_error() {
    let err = MarkupDocument::parse("<r><a></r>", EditMode::CopyOnWrite).unwrap_err();
    assert!(err.is_parse_error());
    assert!(MarkupDocument::parse("<r>", EditMode::CopyOnWrite)
        .unwrap_err()
        .is_parse_error());
}

#[test]
fn test_restore_earlier_version() -> anyhow::Result<()> {
    let source = r#"<r><a name="x"/></r>"#;
    let mut doc = MarkupDocument::parse(source, EditMode::CopyOnWrite)?;
    let r = doc.document_element().unwrap();
    let a = doc.child_elements(r).next().unwrap();

    doc.set_attribute(a, "name", "y", &mut NoopUpdater)?;
    let edits = doc.take_edits();
    assert_eq!(edits.len(), 1);
    assert_eq!(edits[0].after, doc.root());
    assert_eq!(MarkupAccess::serialize(&doc), r#"<r><a name="y"/></r>"#);

    let outcome = doc.restore(edits[0].before, &ElementIdentity::new())?;
    assert_eq!(outcome.changes.len(), 1);
    assert_eq!(outcome.changes[0].kind, ChangeKind::Modified);
    assert_eq!(outcome.changes[0].attribute.as_deref(), Some("name"));
    assert_eq!(MarkupAccess::serialize(&doc), source);
    Ok(())
}

#[test]
fn test_reload_keeps_unchanged_siblings() -> anyhow::Result<()> {
    let mut doc = MarkupDocument::parse("<r><a/><b/></r>", EditMode::CopyOnWrite)?;
    let r = doc.document_element().unwrap();
    let a = doc.child_elements(r).next().unwrap();

    let outcome = doc.reload("<r><a/><b/><c/></r>", &ElementIdentity::new())?;
    assert_eq!(outcome.changes.len(), 1);
    assert_eq!(outcome.changes[0].kind, ChangeKind::Added);

    let r = doc.document_element().unwrap();
    assert_eq!(doc.child_elements(r).next(), Some(a));
    Ok(())
}
