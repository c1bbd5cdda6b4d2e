use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use crate::dom::{Document, NodeId, NodeType};
use crate::models::RateSnapshot;
use crate::services::scan_service::{annotate_text, find_amounts};
use crate::utils::config::DisplayConfig;
use crate::utils::errors::DomError;

/// Attribute set on elements whose subtree has been handled
pub const PROCESSED_MARKER: &str = "data-satlens-processed";

/// Containers whose text is never page content
const SKIPPED_TAGS: &[&str] = &[
    "script", "style", "noscript", "template", "textarea", "iframe", "object", "svg", "head", "title",
];

/// Ids of nodes already handled on this page.
///
/// Cheap to clone; every clone shares the same set. Entries for nodes that
/// left the document are dropped by [`ProcessedNodeSet::sweep`].
#[derive(Clone, Default)]
pub struct ProcessedNodeSet {
    inner: Arc<Mutex<HashSet<NodeId>>>,
}

impl ProcessedNodeSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<NodeId>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.lock().contains(&id)
    }

    pub fn insert(&self, id: NodeId) {
        self.lock().insert(id);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Forget nodes that are no longer attached; returns how many went
    pub fn sweep(&self, document: &Document) -> usize {
        let mut set = self.lock();
        let before = set.len();
        set.retain(|&id| document.is_connected(id));
        before - set.len()
    }
}

/// Counters for one annotation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnnotationStats {
    pub nodes_visited: usize,
    pub text_nodes_matched: usize,
    pub annotations: usize,
    pub boundary_errors: usize,
}

impl AnnotationStats {
    pub fn merge(&mut self, other: AnnotationStats) {
        self.nodes_visited += other.nodes_visited;
        self.text_nodes_matched += other.text_nodes_matched;
        self.annotations += other.annotations;
        self.boundary_errors += other.boundary_errors;
    }
}

enum Visit {
    Enter(NodeId),
    Leave(NodeId),
}

/// Walks a subtree and appends crypto equivalents after currency amounts
#[derive(Clone)]
pub struct Annotator {
    processed: ProcessedNodeSet,
    display: DisplayConfig,
}

impl Annotator {
    pub fn new(processed: ProcessedNodeSet, display: DisplayConfig) -> Self {
        Self { processed, display }
    }

    pub fn processed(&self) -> &ProcessedNodeSet {
        &self.processed
    }

    /// Annotate every unprocessed text node under `root`.
    ///
    /// DOM failures on a node are counted and logged, and the walk carries on
    /// with the node's siblings. An element with a failure anywhere below it
    /// is left unmarked so a later pass walks it again.
    pub fn annotate_subtree(&self, document: &mut Document, root: NodeId, snapshot: &RateSnapshot) -> AnnotationStats {
        let mut stats = AnnotationStats::default();

        match self.inside_skipped_container(document, root) {
            Ok(false) => {}
            Ok(true) => return stats,
            Err(e) => {
                debug!("Boundary at node {} while checking ancestors: {}", root, e);
                stats.boundary_errors += 1;
                return stats;
            }
        }

        let mut stack = vec![Visit::Enter(root)];
        // Elements being walked, innermost last, with whether a failure happened below
        let mut open: Vec<(NodeId, bool)> = Vec::new();

        while let Some(visit) = stack.pop() {
            match visit {
                Visit::Enter(id) => match self.enter(document, id, snapshot, &mut stack, &mut stats) {
                    Ok(true) => open.push((id, false)),
                    Ok(false) => {}
                    Err(e) => {
                        debug!("Boundary at node {}: {}", id, e);
                        stats.boundary_errors += 1;
                        taint_innermost(&mut open);
                    }
                },
                Visit::Leave(id) => {
                    let tainted = open.pop().map(|(_, tainted)| tainted).unwrap_or(false);
                    if tainted {
                        debug!("Leaving node {} unmarked after a failure in its subtree", id);
                        taint_innermost(&mut open);
                        continue;
                    }
                    if let Err(e) = self.mark_element(document, id) {
                        debug!("Could not mark node {} as processed: {}", id, e);
                        stats.boundary_errors += 1;
                        taint_innermost(&mut open);
                    }
                }
            }
        }
        stats
    }

    /// Handle one node on the way down; true when an element was descended into
    fn enter(
        &self,
        document: &mut Document,
        id: NodeId,
        snapshot: &RateSnapshot,
        stack: &mut Vec<Visit>,
        stats: &mut AnnotationStats,
    ) -> Result<bool, DomError> {
        if self.processed.contains(id) {
            return Ok(false);
        }
        stats.nodes_visited += 1;

        match document.node_type(id)? {
            NodeType::Text => {
                self.annotate_text_node(document, id, snapshot, stats)?;
                Ok(false)
            }
            NodeType::Element => {
                if self.is_skipped_element(document, id)? {
                    return Ok(false);
                }
                if document.attribute(id, PROCESSED_MARKER)?.is_some() {
                    self.processed.insert(id);
                    return Ok(false);
                }
                push_children(document, id, stack, true)?;
                Ok(true)
            }
            NodeType::Document | NodeType::Fragment => {
                push_children(document, id, stack, false)?;
                Ok(false)
            }
        }
    }

    fn annotate_text_node(
        &self,
        document: &mut Document,
        id: NodeId,
        snapshot: &RateSnapshot,
        stats: &mut AnnotationStats,
    ) -> Result<(), DomError> {
        let text = document.text(id)?;
        if text.trim().is_empty() {
            return Ok(());
        }

        if let Some(annotated) = annotate_text(text, snapshot, &self.display) {
            let count = find_amounts(text).len();
            document.set_text(id, &annotated)?;
            stats.text_nodes_matched += 1;
            stats.annotations += count;
        }
        self.processed.insert(id);
        Ok(())
    }

    fn is_skipped_element(&self, document: &Document, id: NodeId) -> Result<bool, DomError> {
        let tag = document.tag_name(id)?.unwrap_or_default();
        if SKIPPED_TAGS.contains(&tag) {
            return Ok(true);
        }
        Ok(match document.attribute(id, "contenteditable")? {
            Some(value) => !value.eq_ignore_ascii_case("false"),
            None => false,
        })
    }

    /// A pass started on a newly added node must not reach into a script or
    /// editable region that happens to contain it
    fn inside_skipped_container(&self, document: &Document, id: NodeId) -> Result<bool, DomError> {
        let mut current = document.parent(id);
        while let Some(ancestor) = current {
            if document.node_type(ancestor)? == NodeType::Element && self.is_skipped_element(document, ancestor)? {
                return Ok(true);
            }
            current = document.parent(ancestor);
        }
        Ok(false)
    }

    fn mark_element(&self, document: &mut Document, id: NodeId) -> Result<(), DomError> {
        document.set_attribute(id, PROCESSED_MARKER, "true")?;
        self.processed.insert(id);
        Ok(())
    }
}

/// Queue the children of `id`, preceded by its `Leave` when it is an element
fn push_children(document: &Document, id: NodeId, stack: &mut Vec<Visit>, leave: bool) -> Result<(), DomError> {
    let children = document.children(id)?;
    if leave {
        stack.push(Visit::Leave(id));
    }
    stack.extend(children.iter().rev().map(|&child| Visit::Enter(child)));
    Ok(())
}

fn taint_innermost(open: &mut [(NodeId, bool)]) {
    if let Some((_, tainted)) = open.last_mut() {
        *tainted = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn snapshot() -> RateSnapshot {
        RateSnapshot::new(50_000.0, Utc::now(), "test").unwrap()
    }

    fn annotator() -> Annotator {
        Annotator::new(ProcessedNodeSet::new(), DisplayConfig::default())
    }

    fn page(texts: &[&str]) -> (Document, NodeId, Vec<NodeId>) {
        let mut document = Document::new();
        let body = document.create_element("body");
        let root = document.root();
        document.append_child(root, body).unwrap();
        let mut ids = Vec::new();
        for text in texts {
            let p = document.create_element("p");
            let t = document.create_text(text);
            document.append_child(p, t).unwrap();
            document.append_child(body, p).unwrap();
            ids.push(t);
        }
        (document, body, ids)
    }

    #[test]
    fn test_annotates_text_nodes() {
        let (mut document, _, ids) = page(&["Price: $25", "Deluxe: $60000", "no money here"]);
        let root = document.root();
        let stats = annotator().annotate_subtree(&mut document, root, &snapshot());

        assert_eq!(document.text(ids[0]).unwrap(), "Price: $25 (50,000 sats)");
        assert_eq!(document.text(ids[1]).unwrap(), "Deluxe: $60000 (1.2 BTC)");
        assert_eq!(document.text(ids[2]).unwrap(), "no money here");
        assert_eq!(stats.text_nodes_matched, 2);
        assert_eq!(stats.annotations, 2);
        assert_eq!(stats.boundary_errors, 0);
    }

    #[test]
    fn test_second_pass_changes_nothing() {
        let (mut document, body, _) = page(&["Was $50, now $25", "2027"]);
        let root = document.root();
        let annotator = annotator();
        annotator.annotate_subtree(&mut document, root, &snapshot());
        let first = document.render(body);

        let stats = annotator.annotate_subtree(&mut document, root, &snapshot());
        assert_eq!(document.render(body), first);
        assert_eq!(stats.annotations, 0);
    }

    #[test]
    fn test_marker_attribute_survives_a_fresh_set() {
        let (mut document, body, _) = page(&["$25"]);
        let root = document.root();
        annotator().annotate_subtree(&mut document, root, &snapshot());
        assert_eq!(document.attribute(body, PROCESSED_MARKER).unwrap(), Some("true"));

        let first = document.render(body);
        annotator().annotate_subtree(&mut document, root, &snapshot());
        assert_eq!(document.render(body), first);
    }

    #[test]
    fn test_skips_non_content_and_editable() {
        let mut document = Document::new();
        let root = document.root();
        let body = document.create_element("body");
        document.append_child(root, body).unwrap();

        let script = document.create_element("script");
        let script_text = document.create_text("var price = '$25';");
        document.append_child(script, script_text).unwrap();
        document.append_child(body, script).unwrap();

        let editor = document.create_element("div");
        document.set_attribute(editor, "contenteditable", "true").unwrap();
        let draft = document.create_text("Draft $25");
        document.append_child(editor, draft).unwrap();
        document.append_child(body, editor).unwrap();

        annotator().annotate_subtree(&mut document, root, &snapshot());
        assert_eq!(document.text(script_text).unwrap(), "var price = '$25';");
        assert_eq!(document.text(draft).unwrap(), "Draft $25");

        // a pass started below a skipped container stays out too
        annotator().annotate_subtree(&mut document, draft, &snapshot());
        assert_eq!(document.text(draft).unwrap(), "Draft $25");
    }

    #[test]
    fn test_restricted_subtree_is_a_boundary() {
        let (mut document, body, ids) = page(&["$25", "$50"]);
        let root = document.root();
        let frame = document.create_element("div");
        let inner = document.create_text("$100");
        document.append_child(frame, inner).unwrap();
        document.restrict(frame).unwrap();
        let first_p = document.children(body).unwrap()[0];
        document.remove_child(body, first_p).unwrap();
        document.append_child(body, frame).unwrap();
        document.append_child(body, first_p).unwrap();

        let annotator = annotator();
        let stats = annotator.annotate_subtree(&mut document, root, &snapshot());
        assert_eq!(stats.boundary_errors, 1);
        assert_eq!(document.text(ids[0]).unwrap(), "$25 (50,000 sats)");
        assert_eq!(document.text(ids[1]).unwrap(), "$50 (100,000 sats)");
        assert!(!annotator.processed().contains(body));
        assert_eq!(document.attribute(body, PROCESSED_MARKER).unwrap(), None);
    }

    #[test]
    fn test_subtree_with_boundary_is_walked_again() {
        let (mut document, body, ids) = page(&["$25"]);
        let root = document.root();
        let section = document.create_element("section");
        let frame = document.create_element("div");
        let inner = document.create_text("$100");
        document.append_child(frame, inner).unwrap();
        document.append_child(section, frame).unwrap();
        document.append_child(body, section).unwrap();
        document.restrict(frame).unwrap();

        let annotator = annotator();
        annotator.annotate_subtree(&mut document, root, &snapshot());
        assert!(!annotator.processed().contains(section));
        assert!(!annotator.processed().contains(body));
        assert!(annotator.processed().contains(document.parent(ids[0]).unwrap()));

        // the next full pass reaches the frame again instead of skipping the section
        let stats = annotator.annotate_subtree(&mut document, root, &snapshot());
        assert_eq!(stats.boundary_errors, 1);
        assert_eq!(stats.annotations, 0);
    }

    #[test]
    fn test_failed_marking_is_retried() {
        let (mut document, body, ids) = page(&["$25"]);
        let root = document.root();
        document.set_read_only(body, true).unwrap();

        let annotator = annotator();
        let stats = annotator.annotate_subtree(&mut document, root, &snapshot());
        assert_eq!(stats.boundary_errors, 1);
        assert!(!annotator.processed().contains(body));
        assert!(annotator.processed().contains(ids[0]));

        document.set_read_only(body, false).unwrap();
        let stats = annotator.annotate_subtree(&mut document, root, &snapshot());
        assert_eq!(stats.boundary_errors, 0);
        assert_eq!(stats.annotations, 0);
        assert!(annotator.processed().contains(body));
        assert_eq!(document.text(ids[0]).unwrap(), "$25 (50,000 sats)");
    }

    #[test]
    fn test_sweep_drops_detached_nodes() {
        let (mut document, body, ids) = page(&["$25", "$50"]);
        let root = document.root();
        let annotator = annotator();
        annotator.annotate_subtree(&mut document, root, &snapshot());
        let before = annotator.processed().len();

        let second_p = document.parent(ids[1]).unwrap();
        document.remove_child(body, second_p).unwrap();
        assert_eq!(annotator.processed().sweep(&document), 2);
        assert_eq!(annotator.processed().len(), before - 2);
    }

    #[test]
    fn test_blank_text_is_ignored() {
        let (mut document, _, ids) = page(&["   "]);
        let root = document.root();
        let annotator = annotator();
        let stats = annotator.annotate_subtree(&mut document, root, &snapshot());
        assert_eq!(stats.text_nodes_matched, 0);
        assert!(!annotator.processed().contains(ids[0]));
    }
}
