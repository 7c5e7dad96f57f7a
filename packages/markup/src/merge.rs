//! # Subtree merge
//!
//! Merges a replacement tree into the live tree, reusing every live node whose
//! subtree did not change and producing one [`MarkupChange`] per added,
//! removed, moved or modified node or attribute.
//!
//! ```text
//! live:        <r> <a/> <b x="1"/> </r>
//! replacement: <r> <b x="2"/> <c/> </r>
//!
//! changes:     Removed  /r/a
//!              Modified /r/b @x
//!              Added    /r/c
//! ```
//!
//! Siblings are aligned in three passes:
//!
//! 1. keyed: an element pairs with the live element of the same logical id,
//!    or one agreeing on an identifying attribute, wherever it sits. Keyed
//!    pairs outside the longest order-preserving run are reported as moves.
//! 2. content: between keyed anchors, the longest common subsequence of
//!    equal subtrees and equal leaves.
//! 3. position: inside the remaining gaps, elements that [`ElementIdentity`]
//!    considers the same at the same ordinal among same-named siblings.
//!
//! The walk keeps its own stack, so nesting depth is bounded by memory only.

use crate::document::MarkupDocument;
use crate::error::{MarkupError, MarkupResult};
use crate::identity::{ElementIdentity, ElementRef};
use crate::node::{ElementData, Node, NodeId, NodeKind};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use tracing::debug;

/// Content alignment beyond this many table cells falls back to positions
const MAX_ALIGNMENT_CELLS: usize = 1 << 22;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    Added,
    Removed,
    Modified,
    /// Same element, new position among its siblings
    Moved,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkupChange {
    pub kind: ChangeKind,
    /// Document node to the changed node. For removals the last entry is the
    /// removed node and the rest is its former parent chain in the new tree.
    pub path: Vec<NodeId>,
    /// Path used to resolve namespaces. Equal to `path` except for removals,
    /// where it is the path in the old tree.
    pub ns_context: Vec<NodeId>,
    /// Set for attribute changes; `path` then ends at the owning element
    pub attribute: Option<String>,
}

impl MarkupChange {
    pub fn node(&self) -> Option<NodeId> {
        self.path.last().copied()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MergeOutcome {
    pub changes: Vec<MarkupChange>,
    /// Live node versions replaced by the merge, old id to new id
    pub replaced: HashMap<NodeId, NodeId>,
    /// The document element could not be matched and the whole tree was swapped
    pub root_replaced: bool,
}

impl MergeOutcome {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && !self.root_replaced
    }
}

struct PendingChange {
    kind: ChangeKind,
    attribute: Option<String>,
    /// Changed node first, ancestors appended as the merge unwinds
    path_rev: Vec<NodeId>,
    old_rev: Option<Vec<NodeId>>,
}

impl PendingChange {
    fn new(kind: ChangeKind, start: Option<NodeId>, attribute: Option<String>) -> Self {
        let path_rev: Vec<NodeId> = start.into_iter().collect();
        let old_rev = (kind == ChangeKind::Removed).then(|| path_rev.clone());
        Self {
            kind,
            attribute,
            path_rev,
            old_rev,
        }
    }
}

/// What happens to one child slot of a merged node
#[derive(Debug, Clone, Copy)]
enum Step {
    Remove(NodeId),
    Add(NodeId),
    Keep(NodeId),
    Merge { old: NodeId, new: NodeId, moved: bool },
}

/// A node pair whose children are being merged
struct Frame {
    old: NodeId,
    old_node: Node,
    merged: Node,
    modified: bool,
    /// First pending change recorded inside this node
    mark: usize,
    plan: Vec<Step>,
    next: usize,
    children: Vec<NodeId>,
}

struct Merger<'a> {
    doc: &'a mut MarkupDocument,
    identity: &'a ElementIdentity,
    pending: Vec<PendingChange>,
    replaced: HashMap<NodeId, NodeId>,
    hashes: HashMap<NodeId, u64>,
    old_ctx: Vec<NodeId>,
    new_ctx: Vec<NodeId>,
}

/// Merge `replacement` into the live node `target`.
///
/// `replacement` must be a detached node of the same kind as `target`, or an
/// older version of it. When `target` is a document node whose element cannot
/// be matched, the replacement becomes the new root as a whole.
pub fn merge_subtree(
    doc: &mut MarkupDocument,
    target: NodeId,
    replacement: NodeId,
    identity: &ElementIdentity,
) -> MarkupResult<MergeOutcome> {
    let path = doc
        .path_to(target)
        .ok_or(MarkupError::NodeNotFound(target))?;
    let target_node = doc.node(target)?;
    let replacement_node = doc.node(replacement)?;

    if target_node.is_document() != replacement_node.is_document()
        || target_node.is_element() != replacement_node.is_element()
    {
        return Err(MarkupError::NotAnElement(replacement));
    }

    if target_node.is_document() && !root_elements_match(doc, target, replacement, identity) {
        debug!(%target, %replacement, "document element replaced");
        let before = doc.root();
        doc.commit_root(before, replacement);
        return Ok(MergeOutcome {
            root_replaced: true,
            ..MergeOutcome::default()
        });
    }

    let ancestors = &path[..path.len() - 1];
    let mut merger = Merger {
        doc,
        identity,
        pending: Vec::new(),
        replaced: HashMap::new(),
        hashes: HashMap::new(),
        old_ctx: ancestors.to_vec(),
        new_ctx: ancestors.to_vec(),
    };
    let result = merger.run(target, replacement)?;
    let Merger {
        doc,
        pending,
        mut replaced,
        ..
    } = merger;

    if result == target {
        return Ok(MergeOutcome::default());
    }

    let before = doc.root();
    let new_path = doc.splice(&path, result)?;
    doc.commit_root(before, new_path[0]);

    for (old, new) in path.iter().zip(&new_path) {
        if old != new {
            replaced.insert(*old, *new);
        }
    }

    let new_ancestors = &new_path[..new_path.len() - 1];
    let changes = pending
        .into_iter()
        .map(|change| {
            let mut full = new_ancestors.to_vec();
            full.extend(change.path_rev.iter().rev());
            let ns_context = match change.old_rev {
                Some(old_rev) => {
                    let mut old = ancestors.to_vec();
                    old.extend(old_rev.iter().rev());
                    old
                }
                None => full.clone(),
            };
            MarkupChange {
                kind: change.kind,
                path: full,
                ns_context,
                attribute: change.attribute,
            }
        })
        .collect::<Vec<_>>();

    debug!(changes = changes.len(), replaced = replaced.len(), "subtree merged");
    Ok(MergeOutcome {
        changes,
        replaced,
        root_replaced: false,
    })
}

fn root_elements_match(
    doc: &MarkupDocument,
    target: NodeId,
    replacement: NodeId,
    identity: &ElementIdentity,
) -> bool {
    match (doc.document_element_of(target), doc.document_element_of(replacement)) {
        (Some(old), Some(new)) => {
            doc.is_equivalent(old, new)
                || identity.compare_element(
                    &ElementRef::new(doc, &[target, old]),
                    &ElementRef::new(doc, &[replacement, new]),
                    true,
                )
        }
        _ => false,
    }
}

impl Merger<'_> {
    /// Merge `new` into `old`. Returns the merged node, `old` itself when
    /// nothing changed.
    fn run(&mut self, old: NodeId, new: NodeId) -> MarkupResult<NodeId> {
        if old == new {
            return Ok(old);
        }
        let mark = self.pending.len();
        let mut stack = vec![self.open(old, new, mark)?];

        while let Some(frame) = stack.last_mut() {
            let Some(step) = frame.plan.get(frame.next).copied() else {
                let Some(done) = stack.pop() else { break };
                let merged = self.close(done);
                match stack.last_mut() {
                    Some(parent) => parent.children.push(merged),
                    None => return Ok(merged),
                }
                continue;
            };
            frame.next += 1;

            match step {
                Step::Remove(node) => {
                    self.pending
                        .push(PendingChange::new(ChangeKind::Removed, Some(node), None));
                }
                Step::Add(node) => {
                    self.pending
                        .push(PendingChange::new(ChangeKind::Added, Some(node), None));
                    frame.children.push(node);
                }
                Step::Keep(node) => frame.children.push(node),
                Step::Merge { old, new, moved } if old == new => {
                    if moved {
                        self.pending
                            .push(PendingChange::new(ChangeKind::Moved, Some(old), None));
                    }
                    frame.children.push(old);
                }
                Step::Merge { old, new, moved } => {
                    let mark = self.pending.len();
                    if moved {
                        self.pending
                            .push(PendingChange::new(ChangeKind::Moved, None, None));
                    }
                    let child = self.open(old, new, mark)?;
                    stack.push(child);
                }
            }
        }
        Err(MarkupError::NodeNotFound(old))
    }

    fn open(&mut self, old: NodeId, new: NodeId, mark: usize) -> MarkupResult<Frame> {
        let old_node = self.doc.node(old)?.clone();
        let merged = self.doc.node(new)?.clone();
        self.old_ctx.push(old);
        self.new_ctx.push(new);

        let mut modified = false;
        if let (Some(a), Some(b)) = (old_node.as_element(), merged.as_element()) {
            modified |= self.diff_attributes(a, b);
            if a.prefix != b.prefix {
                self.pending
                    .push(PendingChange::new(ChangeKind::Modified, None, None));
                modified = true;
            }
            modified |= a.self_closing != b.self_closing;
        }

        let plan = self.plan_children(old_node.children(), merged.children())?;
        Ok(Frame {
            old,
            old_node,
            merged,
            modified,
            mark,
            plan,
            next: 0,
            children: Vec::new(),
        })
    }

    fn close(&mut self, frame: Frame) -> NodeId {
        self.old_ctx.pop();
        self.new_ctx.pop();
        let Frame {
            old,
            old_node,
            mut merged,
            modified,
            mark,
            children,
            ..
        } = frame;

        let result = if !modified && children == old_node.children() {
            old
        } else {
            merged.logical = old_node.logical;
            if let Some(slot) = merged.children_mut() {
                *slot = children;
            }
            self.doc.alloc(merged)
        };

        for change in &mut self.pending[mark..] {
            change.path_rev.push(result);
            if let Some(old_rev) = &mut change.old_rev {
                old_rev.push(old);
            }
        }
        if result != old {
            self.replaced.insert(old, result);
        }
        result
    }

    /// Record attribute differences. Returns whether the attribute lists differ.
    fn diff_attributes(&mut self, old: &ElementData, new: &ElementData) -> bool {
        for attr in &old.attributes {
            match new.attribute(&attr.name) {
                None => self.pending.push(PendingChange::new(
                    ChangeKind::Removed,
                    None,
                    Some(attr.name.clone()),
                )),
                Some(value) if value != attr.value => self.pending.push(PendingChange::new(
                    ChangeKind::Modified,
                    None,
                    Some(attr.name.clone()),
                )),
                Some(_) => {}
            }
        }
        for attr in &new.attributes {
            if old.attribute(&attr.name).is_none() {
                self.pending.push(PendingChange::new(
                    ChangeKind::Added,
                    None,
                    Some(attr.name.clone()),
                ));
            }
        }
        old.attributes != new.attributes
    }

    /// Align the children of the node pair on top of the context stacks
    fn plan_children(&mut self, old_children: &[NodeId], new_children: &[NodeId]) -> MarkupResult<Vec<Step>> {
        let mut old_match: Vec<Option<usize>> = vec![None; old_children.len()];
        let mut new_match: Vec<Option<usize>> = vec![None; new_children.len()];

        for (i, j) in self.keyed_pairs(old_children, new_children) {
            old_match[i] = Some(j);
            new_match[j] = Some(i);
        }

        let keyed: Vec<(usize, usize)> = new_match
            .iter()
            .enumerate()
            .filter_map(|(j, i)| i.map(|i| (j, i)))
            .collect();
        let anchors = longest_increasing(&keyed);
        let mut moved = vec![false; new_children.len()];
        for (j, _) in &keyed {
            moved[*j] = true;
        }
        for (j, _) in &anchors {
            moved[*j] = false;
        }

        let mut bounds: Vec<(usize, usize)> = anchors.iter().map(|(j, i)| (*i, *j)).collect();
        bounds.push((old_children.len(), new_children.len()));
        let (mut old_from, mut new_from) = (0, 0);
        for (old_to, new_to) in bounds {
            let old_free: Vec<usize> = (old_from..old_to).filter(|i| old_match[*i].is_none()).collect();
            let new_free: Vec<usize> = (new_from..new_to).filter(|j| new_match[*j].is_none()).collect();
            for (i, j) in self.align(old_children, &old_free, new_children, &new_free)? {
                old_match[i] = Some(j);
                new_match[j] = Some(i);
            }
            old_from = old_to + 1;
            new_from = new_to + 1;
        }

        let mut steps = Vec::with_capacity(old_children.len().max(new_children.len()));
        let mut next_old = 0;
        for (j, &child) in new_children.iter().enumerate() {
            match new_match[j] {
                Some(i) if moved[j] => steps.push(Step::Merge {
                    old: old_children[i],
                    new: child,
                    moved: true,
                }),
                Some(i) => {
                    for skipped in next_old..i {
                        if old_match[skipped].is_none() {
                            steps.push(Step::Remove(old_children[skipped]));
                        }
                    }
                    next_old = next_old.max(i + 1);
                    if self.doc.is_element(child) {
                        steps.push(Step::Merge {
                            old: old_children[i],
                            new: child,
                            moved: false,
                        });
                    } else {
                        steps.push(Step::Keep(old_children[i]));
                    }
                }
                None => steps.push(Step::Add(child)),
            }
        }
        for skipped in next_old..old_children.len() {
            if old_match[skipped].is_none() {
                steps.push(Step::Remove(old_children[skipped]));
            }
        }
        Ok(steps)
    }

    /// Element pairs sharing a logical id or an identifying attribute value,
    /// as (old index, new index)
    fn keyed_pairs(&mut self, old_children: &[NodeId], new_children: &[NodeId]) -> Vec<(usize, usize)> {
        let mut pairs = Vec::new();
        let mut old_taken = vec![false; old_children.len()];
        let mut new_taken = vec![false; new_children.len()];

        let mut by_logical = HashMap::new();
        for (i, &id) in old_children.iter().enumerate() {
            if let Some(node) = self.doc.get(id).filter(|n| n.is_element()) {
                by_logical.entry(node.logical).or_insert(i);
            }
        }
        for (j, &child) in new_children.iter().enumerate() {
            let Some(node) = self.doc.get(child).filter(|n| n.is_element()) else {
                continue;
            };
            if let Some(&i) = by_logical.get(&node.logical) {
                if !old_taken[i] {
                    old_taken[i] = true;
                    new_taken[j] = true;
                    pairs.push((i, j));
                }
            }
        }

        let identity = self.identity;
        if identity.identifying_attributes().is_empty() {
            return pairs;
        }
        let mut by_key: HashMap<(String, String, String), Vec<usize>> = HashMap::new();
        for (i, &id) in old_children.iter().enumerate().filter(|(i, _)| !old_taken[*i]) {
            for key in element_keys(self.doc, id, identity) {
                by_key.entry(key).or_default().push(i);
            }
        }
        for (j, &child) in new_children.iter().enumerate().filter(|(j, _)| !new_taken[*j]) {
            let candidates: Vec<usize> = element_keys(self.doc, child, identity)
                .iter()
                .filter_map(|key| by_key.get(key))
                .flatten()
                .copied()
                .collect();
            for i in candidates {
                if !old_taken[i] && self.with_refs(old_children[i], child, |id, a, b| id.matches_by_key(a, b)) {
                    old_taken[i] = true;
                    pairs.push((i, j));
                    break;
                }
            }
        }
        pairs
    }

    /// Order-preserving pairs between the free children of one gap between
    /// keyed anchors, as (old index, new index)
    fn align(
        &mut self,
        old_children: &[NodeId],
        old_free: &[usize],
        new_children: &[NodeId],
        new_free: &[usize],
    ) -> MarkupResult<Vec<(usize, usize)>> {
        if old_free.is_empty() || new_free.is_empty() {
            return Ok(Vec::new());
        }
        let old_ids: Vec<NodeId> = old_free.iter().map(|i| old_children[*i]).collect();
        let new_ids: Vec<NodeId> = new_free.iter().map(|j| new_children[*j]).collect();
        let mut old_hashes = Vec::with_capacity(old_ids.len());
        for id in &old_ids {
            old_hashes.push(self.subtree_hash(*id)?);
        }
        let mut new_hashes = Vec::with_capacity(new_ids.len());
        for id in &new_ids {
            new_hashes.push(self.subtree_hash(*id)?);
        }

        let doc: &MarkupDocument = self.doc;
        let same = |a: usize, b: usize| {
            old_hashes[a] == new_hashes[b]
                && matches!((doc.get(old_ids[a]), doc.get(new_ids[b])), (Some(x), Some(y)) if x.same_leaf(y))
        };

        let (mut start, mut old_end, mut new_end) = (0, old_ids.len(), new_ids.len());
        let mut matched = Vec::new();
        while start < old_end && start < new_end && same(start, start) {
            matched.push((start, start));
            start += 1;
        }
        let mut tail = Vec::new();
        while old_end > start && new_end > start && same(old_end - 1, new_end - 1) {
            old_end -= 1;
            new_end -= 1;
            tail.push((old_end, new_end));
        }

        let (rows, cols) = (old_end - start, new_end - start);
        let middle = if rows.saturating_mul(cols) <= MAX_ALIGNMENT_CELLS {
            common_subsequence(rows, cols, |a, b| same(start + a, start + b))
        } else {
            debug!(rows, cols, "sibling lists too long to align by content");
            Vec::new()
        };

        let mut gaps = Vec::new();
        let (mut old_gap, mut new_gap) = (start, start);
        for (a, b) in middle.into_iter().map(|(a, b)| (start + a, start + b)) {
            gaps.push((old_gap..a, new_gap..b));
            matched.push((a, b));
            (old_gap, new_gap) = (a + 1, b + 1);
        }
        gaps.push((old_gap..old_end, new_gap..new_end));
        tail.reverse();
        matched.extend(tail);

        for (old_range, new_range) in gaps {
            matched.extend(self.pair_by_position(&old_ids, old_range, &new_ids, new_range));
        }
        matched.sort_unstable();
        Ok(matched
            .into_iter()
            .map(|(a, b)| (old_free[a], new_free[b]))
            .collect())
    }

    /// Pair elements of a gap that are the same at the same ordinal among
    /// same-named siblings of the gap
    fn pair_by_position(
        &mut self,
        old_ids: &[NodeId],
        old_range: std::ops::Range<usize>,
        new_ids: &[NodeId],
        new_range: std::ops::Range<usize>,
    ) -> Vec<(usize, usize)> {
        let mut by_ordinal: HashMap<(String, usize), usize> = HashMap::new();
        let mut seen: HashMap<String, usize> = HashMap::new();
        for a in old_range {
            if let Some(el) = self.doc.get(old_ids[a]).and_then(Node::as_element) {
                let count = seen.entry(el.local_name.clone()).or_default();
                by_ordinal.insert((el.local_name.clone(), *count), a);
                *count += 1;
            }
        }

        let mut pairs = Vec::new();
        let mut seen: HashMap<String, usize> = HashMap::new();
        let mut old_from = 0;
        for b in new_range {
            let Some(el) = self.doc.get(new_ids[b]).and_then(Node::as_element) else {
                continue;
            };
            let name = el.local_name.clone();
            let count = seen.entry(name.clone()).or_default();
            let ordinal = *count;
            *count += 1;
            let Some(&a) = by_ordinal.get(&(name, ordinal)) else {
                continue;
            };
            if a >= old_from && self.with_refs(old_ids[a], new_ids[b], |id, x, y| id.compare_element(x, y, true)) {
                pairs.push((a, b));
                old_from = a + 1;
            }
        }
        pairs
    }

    /// Run `test` on `old` and `new` seen through the current contexts
    fn with_refs<R>(
        &mut self,
        old: NodeId,
        new: NodeId,
        test: impl FnOnce(&ElementIdentity, &ElementRef<'_>, &ElementRef<'_>) -> R,
    ) -> R {
        self.old_ctx.push(old);
        self.new_ctx.push(new);
        let doc: &MarkupDocument = self.doc;
        let result = test(
            self.identity,
            &ElementRef::new(doc, &self.old_ctx),
            &ElementRef::new(doc, &self.new_ctx),
        );
        self.old_ctx.pop();
        self.new_ctx.pop();
        result
    }

    /// Structural hash of the subtree at `id`, ignoring node ids
    fn subtree_hash(&mut self, id: NodeId) -> MarkupResult<u64> {
        let mut stack = vec![(id, false)];
        while let Some((current, expanded)) = stack.pop() {
            if self.hashes.contains_key(&current) {
                continue;
            }
            let node = self.doc.node(current)?;
            if !expanded {
                stack.push((current, true));
                stack.extend(node.children().iter().map(|child| (*child, false)));
                continue;
            }
            let mut hasher = DefaultHasher::new();
            hash_shallow(&node.kind, &mut hasher);
            node.children().len().hash(&mut hasher);
            for child in node.children() {
                hasher.write_u64(self.hashes.get(child).copied().unwrap_or_default());
            }
            self.hashes.insert(current, hasher.finish());
        }
        Ok(self.hashes.get(&id).copied().unwrap_or_default())
    }
}

fn hash_shallow(kind: &NodeKind, state: &mut impl Hasher) {
    std::mem::discriminant(kind).hash(state);
    match kind {
        NodeKind::Document { .. } => {}
        NodeKind::Element(el) => {
            el.prefix.hash(state);
            el.local_name.hash(state);
            for attr in &el.attributes {
                attr.name.hash(state);
                attr.value.hash(state);
            }
            el.self_closing.hash(state);
        }
        NodeKind::Text(text)
        | NodeKind::CData(text)
        | NodeKind::Comment(text)
        | NodeKind::Declaration(text)
        | NodeKind::DocType(text) => text.hash(state),
        NodeKind::ProcessingInstruction { target, data } => {
            target.hash(state);
            data.hash(state);
        }
    }
}

/// (local name, attribute, value) for each identifying attribute on `id`
fn element_keys(doc: &MarkupDocument, id: NodeId, identity: &ElementIdentity) -> Vec<(String, String, String)> {
    let Some(el) = doc.get(id).and_then(Node::as_element) else {
        return Vec::new();
    };
    identity
        .identifying_attributes()
        .iter()
        .filter_map(|name| {
            el.attribute(name)
                .map(|value| (el.local_name.clone(), name.clone(), value.to_string()))
        })
        .collect()
}

/// Longest subsequence of `pairs` (sorted by new index) whose old indices
/// increase too
fn longest_increasing(pairs: &[(usize, usize)]) -> Vec<(usize, usize)> {
    let mut tails: Vec<usize> = Vec::new();
    let mut previous: Vec<Option<usize>> = vec![None; pairs.len()];
    for (k, &(_, old)) in pairs.iter().enumerate() {
        let at = tails.partition_point(|t| pairs[*t].1 < old);
        previous[k] = at.checked_sub(1).map(|p| tails[p]);
        if at == tails.len() {
            tails.push(k);
        } else {
            tails[at] = k;
        }
    }

    let mut out = Vec::with_capacity(tails.len());
    let mut cursor = tails.last().copied();
    while let Some(k) = cursor {
        out.push(pairs[k]);
        cursor = previous[k];
    }
    out.reverse();
    out
}

/// Longest common subsequence of two sequences given by length and an
/// equality test, as index pairs in increasing order. Earlier matches win ties.
fn common_subsequence(rows: usize, cols: usize, same: impl Fn(usize, usize) -> bool) -> Vec<(usize, usize)> {
    let width = cols + 1;
    // table[i * width + j]: length for rows[i..] and cols[j..]
    let mut table = vec![0u32; (rows + 1) * width];
    for i in (0..rows).rev() {
        for j in (0..cols).rev() {
            table[i * width + j] = if same(i, j) {
                table[(i + 1) * width + j + 1] + 1
            } else {
                table[(i + 1) * width + j].max(table[i * width + j + 1])
            };
        }
    }

    let mut pairs = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < rows && j < cols {
        if same(i, j) {
            pairs.push((i, j));
            i += 1;
            j += 1;
        } else if table[(i + 1) * width + j] >= table[i * width + j + 1] {
            i += 1;
        } else {
            j += 1;
        }
    }
    pairs
}

/// Structural equality ignoring node ids
pub fn subtree_equal(doc: &MarkupDocument, a: NodeId, b: NodeId) -> bool {
    let mut stack = vec![(a, b)];
    while let Some((a, b)) = stack.pop() {
        if a == b {
            continue;
        }
        let (Some(x), Some(y)) = (doc.get(a), doc.get(b)) else {
            return false;
        };
        let shallow = match (x.as_element(), y.as_element()) {
            (Some(e), Some(f)) => {
                e.prefix == f.prefix
                    && e.local_name == f.local_name
                    && e.attributes == f.attributes
                    && e.self_closing == f.self_closing
            }
            (None, None) => x.same_leaf(y),
            _ => false,
        };
        if !shallow || x.children().len() != y.children().len() {
            return false;
        }
        stack.extend(x.children().iter().copied().zip(y.children().iter().copied()));
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::EditMode;
    use crate::parser::parse_into;
    use crate::serializer::serialize;

    fn reload(doc: &mut MarkupDocument, text: &str) -> MergeOutcome {
        let replacement = parse_into(doc, text).unwrap();
        let root = doc.root();
        merge_subtree(doc, root, replacement, &ElementIdentity::with_attributes(["name"])).unwrap()
    }

    fn summary(doc: &MarkupDocument, outcome: &MergeOutcome) -> Vec<(ChangeKind, String, Option<String>)> {
        outcome
            .changes
            .iter()
            .map(|c| {
                let names: Vec<String> = c.path[1..]
                    .iter()
                    .map(|id| match doc.get(*id).and_then(|n| n.as_element()) {
                        Some(e) => e.tag_name(),
                        None => "#leaf".to_string(),
                    })
                    .collect();
                (c.kind, names.join("/"), c.attribute.clone())
            })
            .collect()
    }

    #[test]
    fn test_identical_text_changes_nothing() {
        let source = "<r>\n  <a name=\"x\"/>\n  <!-- c -->\n</r>";
        let mut doc = MarkupDocument::parse(source, EditMode::CopyOnWrite).unwrap();
        let before = doc.root();
        let outcome = reload(&mut doc, source);

        assert!(outcome.is_empty());
        assert_eq!(doc.root(), before);
    }

    #[test]
    fn test_attribute_and_structure_changes() {
        let mut doc = MarkupDocument::parse(r#"<r><a/><b x="1"/></r>"#, EditMode::CopyOnWrite).unwrap();
        let old_root = doc.document_element().unwrap();
        let outcome = reload(&mut doc, r#"<r><b x="2"/><c/></r>"#);

        assert_eq!(
            summary(&doc, &outcome),
            vec![
                (ChangeKind::Removed, "r/a".to_string(), None),
                (ChangeKind::Modified, "r/b".to_string(), Some("x".to_string())),
                (ChangeKind::Added, "r/c".to_string(), None),
            ]
        );
        assert_eq!(serialize(&doc), r#"<r><b x="2"/><c/></r>"#);

        let new_root = doc.document_element().unwrap();
        assert_ne!(old_root, new_root);
        assert!(doc.is_equivalent(old_root, new_root));
        assert_eq!(outcome.replaced.get(&old_root), Some(&new_root));
    }

    #[test]
    fn test_removal_context_is_old_tree() {
        let mut doc = MarkupDocument::parse("<r><a><b/></a></r>", EditMode::CopyOnWrite).unwrap();
        let old_a = doc.child_elements(doc.document_element().unwrap()).next().unwrap();
        let outcome = reload(&mut doc, "<r><a/></r>");

        let removal = &outcome.changes[0];
        assert_eq!(removal.kind, ChangeKind::Removed);
        assert_eq!(removal.ns_context[2], old_a);
        assert_ne!(removal.path[2], old_a);
        assert_eq!(removal.path.len(), removal.ns_context.len());
    }

    #[test]
    fn test_identifying_attribute_tracks_moved_sibling() {
        let mut doc = MarkupDocument::parse(
            r#"<r><s name="one" v="1"/><s name="two"/></r>"#,
            EditMode::CopyOnWrite,
        )
        .unwrap();
        let r = doc.document_element().unwrap();
        let (one, two) = {
            let mut children = doc.child_elements(r);
            (children.next().unwrap(), children.next().unwrap())
        };
        let outcome = reload(&mut doc, r#"<r><s name="two"/><s name="one" v="2"/></r>"#);

        let kinds: Vec<_> = outcome.changes.iter().map(|c| c.kind).collect();
        assert!(kinds.contains(&ChangeKind::Moved));
        assert!(!kinds.contains(&ChangeKind::Removed));
        assert!(!kinds.contains(&ChangeKind::Added));
        assert_eq!(
            summary(&doc, &outcome)
                .into_iter()
                .filter(|(kind, _, _)| *kind == ChangeKind::Modified)
                .collect::<Vec<_>>(),
            vec![(ChangeKind::Modified, "r/s".to_string(), Some("v".to_string()))]
        );

        let r = doc.document_element().unwrap();
        let children: Vec<_> = doc.child_elements(r).collect();
        assert_eq!(children[0], two);
        assert!(doc.is_equivalent(children[1], one));
        assert_eq!(serialize(&doc), r#"<r><s name="two"/><s name="one" v="2"/></r>"#);
    }

    #[test]
    fn test_inserted_element_before_comment_keeps_comment() {
        let mut doc = MarkupDocument::parse(
            "<r><item/><item/><!--c--><item/></r>",
            EditMode::CopyOnWrite,
        )
        .unwrap();
        let r = doc.document_element().unwrap();
        let comment = doc.children(r)[2];
        let outcome = reload(&mut doc, "<r><item/><item/><item/><!--c--><item/></r>");

        assert_eq!(
            summary(&doc, &outcome),
            vec![(ChangeKind::Added, "r/item".to_string(), None)]
        );
        let r = doc.document_element().unwrap();
        assert_eq!(doc.children(r)[3], comment);
        let added = outcome.changes[0].node().unwrap();
        assert_eq!(doc.children(r)[2], added);
    }

    #[test]
    fn test_same_named_siblings_pair_by_position() {
        let mut doc = MarkupDocument::parse(r#"<r><a x="1"/><a x="2"/></r>"#, EditMode::CopyOnWrite).unwrap();
        let first = doc.child_elements(doc.document_element().unwrap()).next().unwrap();
        let outcome = reload(&mut doc, r#"<r><a x="3"/><a x="2"/></r>"#);

        assert_eq!(
            summary(&doc, &outcome),
            vec![(ChangeKind::Modified, "r/a".to_string(), Some("x".to_string()))]
        );
        let merged = doc.child_elements(doc.document_element().unwrap()).next().unwrap();
        assert!(doc.is_equivalent(first, merged));
    }

    #[test]
    fn test_deep_nesting_merges_without_recursion() {
        let depth = 20_000;
        let open = "<a>".repeat(depth);
        let close = "</a>".repeat(depth);
        let mut doc = MarkupDocument::parse(&format!("{open}{close}"), EditMode::CopyOnWrite).unwrap();
        let outcome = reload(&mut doc, &format!("{open}<b/>{close}"));

        assert_eq!(outcome.changes.len(), 1);
        assert_eq!(outcome.changes[0].kind, ChangeKind::Added);
        assert_eq!(outcome.changes[0].path.len(), depth + 2);
        assert!(serialize(&doc).contains("<a><b/></a>"));
        let root = doc.document_element().unwrap();
        assert!(subtree_equal(&doc, root, root));
    }

    #[test]
    fn test_text_change_is_remove_and_add() {
        let mut doc = MarkupDocument::parse("<r><a>old</a></r>", EditMode::CopyOnWrite).unwrap();
        let outcome = reload(&mut doc, "<r><a>new</a></r>");

        let kinds: Vec<_> = outcome.changes.iter().map(|c| c.kind).collect();
        assert_eq!(kinds, vec![ChangeKind::Added, ChangeKind::Removed]);
        assert_eq!(serialize(&doc), "<r><a>new</a></r>");
    }

    #[test]
    fn test_unmatched_root_replaces_tree() {
        let mut doc = MarkupDocument::parse("<r/>", EditMode::CopyOnWrite).unwrap();
        let outcome = reload(&mut doc, "<other/>");

        assert!(outcome.root_replaced);
        assert_eq!(serialize(&doc), "<other/>");
    }

    #[test]
    fn test_in_place_mode_splices_parent() {
        let mut doc = MarkupDocument::parse("<r><a/></r>", EditMode::InPlace).unwrap();
        let a = doc.child_elements(doc.document_element().unwrap()).next().unwrap();
        reload(&mut doc, "<r><a/><b/></r>");
        assert_eq!(serialize(&doc), "<r><a/><b/></r>");
        assert_eq!(doc.child_elements(doc.document_element().unwrap()).next(), Some(a));
    }
}
