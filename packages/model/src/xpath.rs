//! Location expressions for components.
//!
//! ```text
//! /web-app/servlet[2]/init-param
//! ```
//!
//! Each step is an element tag as written in the markup. The `[n]` index
//! (1-based) appears only when the parent has more than one child element
//! with that tag.

use crate::component::ComponentId;
use crate::errors::{ModelError, ModelResult};
use crate::factory::ComponentFactory;
use crate::model::DocumentModel;
use docsync_markup::MarkupDocument;
use logos::Logos;

#[derive(Logos, Debug, Clone, PartialEq, Eq)]
#[logos(skip r"[ \t\r\n]+")]
enum Token<'src> {
    #[token("/")]
    Slash,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[regex(r"[0-9]+", |lex| lex.slice())]
    Number(&'src str),
    #[regex(r"[A-Za-z_][A-Za-z0-9_.\-]*(:[A-Za-z_][A-Za-z0-9_.\-]*)?", |lex| lex.slice())]
    Name(&'src str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub tag: String,
    /// 1-based position among same-tag siblings
    pub index: Option<usize>,
}

fn invalid(expr: &str, message: impl Into<String>) -> ModelError {
    ModelError::InvalidXPath {
        expr: expr.to_string(),
        message: message.into(),
    }
}

/// Split an absolute expression into steps
pub fn parse_steps(expr: &str) -> ModelResult<Vec<Step>> {
    let mut tokens = Vec::new();
    for (result, span) in Token::lexer(expr).spanned() {
        match result {
            Ok(token) => tokens.push(token),
            Err(_) => return Err(invalid(expr, format!("unexpected input at {}", span.start))),
        }
    }

    let mut steps = Vec::new();
    let mut iter = tokens.into_iter().peekable();
    while let Some(token) = iter.next() {
        if token != Token::Slash {
            return Err(invalid(expr, "expected '/'"));
        }
        let tag = match iter.next() {
            Some(Token::Name(name)) => name.to_string(),
            _ => return Err(invalid(expr, "expected an element name after '/'")),
        };
        let mut index = None;
        if iter.peek() == Some(&Token::LBracket) {
            iter.next();
            let n = match iter.next() {
                Some(Token::Number(n)) => n
                    .parse::<usize>()
                    .map_err(|_| invalid(expr, format!("index {n} is too large")))?,
                _ => return Err(invalid(expr, "expected an index")),
            };
            if n == 0 {
                return Err(invalid(expr, "indexes start at 1"));
            }
            if iter.next() != Some(Token::RBracket) {
                return Err(invalid(expr, "expected ']'"));
            }
            index = Some(n);
        }
        steps.push(Step { tag, index });
    }
    if steps.is_empty() {
        return Err(invalid(expr, "empty expression"));
    }
    Ok(steps)
}

fn tag_of(doc: &MarkupDocument, id: docsync_markup::NodeId) -> Option<String> {
    doc.element(id).ok().map(|el| el.tag_name())
}

impl<F: ComponentFactory> DocumentModel<F> {
    /// Expression locating the component's element from the document root
    pub fn xpath_expression(&self, id: ComponentId) -> ModelResult<String> {
        if !self.tree.is_in_document_model(id) {
            return Err(ModelError::StaleComponent(id));
        }
        let doc = self.document()?;
        let mut expr = String::new();
        let mut parent_peer = doc.root();
        for component in self.tree.ancestors(id)? {
            let peer = self.tree.peer(component)?;
            let tag = tag_of(doc, peer).ok_or(ModelError::NoComponentFor(peer))?;
            let same_tag: Vec<_> = doc
                .child_elements(parent_peer)
                .filter(|el| tag_of(doc, *el).as_deref() == Some(tag.as_str()))
                .collect();
            expr.push('/');
            expr.push_str(&tag);
            if same_tag.len() > 1 {
                let position = same_tag
                    .iter()
                    .position(|el| doc.is_equivalent(*el, peer))
                    .ok_or(ModelError::NoComponentFor(peer))?;
                expr.push_str(&format!("[{}]", position + 1));
            }
            parent_peer = peer;
        }
        Ok(expr)
    }

    /// Component at `expr`, or `None` when no element or component matches
    pub fn find_by_xpath(&mut self, expr: &str) -> ModelResult<Option<ComponentId>> {
        let steps = parse_steps(expr)?;
        self.root()?;
        let doc = self.document()?;
        let mut path = vec![doc.root()];
        let mut current = doc.root();
        for step in &steps {
            let found = doc
                .child_elements(current)
                .filter(|el| tag_of(doc, *el).as_deref() == Some(step.tag.as_str()))
                .nth(step.index.unwrap_or(1) - 1);
            match found {
                Some(el) => {
                    path.push(el);
                    current = el;
                }
                None => return Ok(None),
            }
        }
        self.find_component_by_path(&path)
    }
}
