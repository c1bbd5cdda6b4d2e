//! Page document model the annotator reads and mutates.
//!
//! Nodes live in an arena keyed by [`NodeId`]. Every read or write made on
//! behalf of the annotator is fallible: nodes inside sandboxed subframes are
//! marked restricted and refuse access, and read-only nodes refuse attribute
//! writes. Structural changes on connected nodes are reported to mutation
//! observers.

pub mod fixture;
pub mod observer;

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::utils::errors::DomError;
pub use fixture::{NodeSpec, PageFixture, ScriptedMutation};
pub use observer::{MutationRecord, ObserverId};

use observer::ObserverRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Document,
    Fragment,
    Element,
    Text,
}

#[derive(Debug, Clone)]
enum NodeData {
    Document,
    Fragment,
    Element {
        tag: String,
        attributes: BTreeMap<String, String>,
    },
    Text(String),
}

#[derive(Debug, Clone)]
struct Node {
    data: NodeData,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    restricted: bool,
    read_only: bool,
}

pub struct Document {
    nodes: HashMap<NodeId, Node>,
    root: NodeId,
    next_id: u64,
    observers: ObserverRegistry,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        let mut document = Self {
            nodes: HashMap::new(),
            root: NodeId(0),
            next_id: 0,
            observers: ObserverRegistry::default(),
        };
        document.root = document.insert_node(NodeData::Document);
        document
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    fn insert_node(&mut self, data: NodeData) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(
            id,
            Node {
                data,
                parent: None,
                children: Vec::new(),
                restricted: false,
                read_only: false,
            },
        );
        id
    }

    /// New detached element; tag names are stored lowercase
    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.insert_node(NodeData::Element {
            tag: tag.to_ascii_lowercase(),
            attributes: BTreeMap::new(),
        })
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.insert_node(NodeData::Text(text.to_string()))
    }

    pub fn create_fragment(&mut self) -> NodeId {
        self.insert_node(NodeData::Fragment)
    }

    fn node(&self, id: NodeId) -> Result<&Node, DomError> {
        self.nodes.get(&id).ok_or(DomError::NotFound(id.0))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, DomError> {
        self.nodes.get_mut(&id).ok_or(DomError::NotFound(id.0))
    }

    /// Node access as seen from page scripts
    fn accessible(&self, id: NodeId) -> Result<&Node, DomError> {
        let node = self.node(id)?;
        if node.restricted {
            return Err(DomError::Restricted(id.0));
        }
        Ok(node)
    }

    /// Append `child` to `parent`, detaching it from any previous parent.
    ///
    /// Appending a fragment moves the fragment's children instead. Observers
    /// are notified when `parent` is connected to the document.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), DomError> {
        self.node(parent)?;
        if parent == child || self.is_ancestor(child, parent) {
            return Err(DomError::WriteRejected(parent.0));
        }

        let added = if self.node(child)?.data.is_fragment() {
            let moved = std::mem::take(&mut self.node_mut(child)?.children);
            for &id in &moved {
                self.node_mut(id)?.parent = Some(parent);
            }
            self.node_mut(parent)?.children.extend(moved.iter().copied());
            moved
        } else {
            self.detach(child)?;
            self.node_mut(child)?.parent = Some(parent);
            self.node_mut(parent)?.children.push(child);
            vec![child]
        };

        if !added.is_empty() && self.is_connected(parent) {
            self.observers.notify(MutationRecord { target: parent, added });
        }
        Ok(())
    }

    /// Detach `child` from `parent`; the subtree stays in the arena
    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), DomError> {
        if self.node(child)?.parent != Some(parent) {
            return Err(DomError::NotFound(child.0));
        }
        self.detach(child)
    }

    fn detach(&mut self, child: NodeId) -> Result<(), DomError> {
        if let Some(old_parent) = self.node_mut(child)?.parent.take() {
            self.node_mut(old_parent)?.children.retain(|&id| id != child);
        }
        Ok(())
    }

    fn is_ancestor(&self, ancestor: NodeId, mut node: NodeId) -> bool {
        while let Some(parent) = self.nodes.get(&node).and_then(|n| n.parent) {
            if parent == ancestor {
                return true;
            }
            node = parent;
        }
        false
    }

    /// Whether the node exists and is attached under the document root
    pub fn is_connected(&self, id: NodeId) -> bool {
        id == self.root || (self.nodes.contains_key(&id) && self.is_ancestor(self.root, id))
    }


    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(&id).and_then(|n| n.parent)
    }

    /// Mark a node as belonging to a sandboxed context
    pub fn restrict(&mut self, id: NodeId) -> Result<(), DomError> {
        self.node_mut(id)?.restricted = true;
        Ok(())
    }

    /// Make attribute writes on a node fail
    pub fn set_read_only(&mut self, id: NodeId, read_only: bool) -> Result<(), DomError> {
        self.node_mut(id)?.read_only = read_only;
        Ok(())
    }

    pub fn node_type(&self, id: NodeId) -> Result<NodeType, DomError> {
        Ok(match self.accessible(id)?.data {
            NodeData::Document => NodeType::Document,
            NodeData::Fragment => NodeType::Fragment,
            NodeData::Element { .. } => NodeType::Element,
            NodeData::Text(_) => NodeType::Text,
        })
    }

    /// Lowercase tag name; None for non-elements
    pub fn tag_name(&self, id: NodeId) -> Result<Option<&str>, DomError> {
        Ok(match &self.accessible(id)?.data {
            NodeData::Element { tag, .. } => Some(tag.as_str()),
            _ => None,
        })
    }

    pub fn attribute(&self, id: NodeId, name: &str) -> Result<Option<&str>, DomError> {
        Ok(match &self.accessible(id)?.data {
            NodeData::Element { attributes, .. } => attributes.get(name).map(String::as_str),
            _ => None,
        })
    }

    pub fn set_attribute(&mut self, id: NodeId, name: &str, value: &str) -> Result<(), DomError> {
        self.accessible(id)?;
        let node = self.node_mut(id)?;
        if node.read_only {
            return Err(DomError::WriteRejected(id.0));
        }
        match &mut node.data {
            NodeData::Element { attributes, .. } => {
                attributes.insert(name.to_string(), value.to_string());
                Ok(())
            }
            _ => Err(DomError::WriteRejected(id.0)),
        }
    }

    pub fn children(&self, id: NodeId) -> Result<&[NodeId], DomError> {
        Ok(&self.accessible(id)?.children)
    }

    pub fn text(&self, id: NodeId) -> Result<&str, DomError> {
        match &self.accessible(id)?.data {
            NodeData::Text(text) => Ok(text),
            _ => Err(DomError::NotFound(id.0)),
        }
    }

    pub fn set_text(&mut self, id: NodeId, value: &str) -> Result<(), DomError> {
        self.accessible(id)?;
        let node = self.node_mut(id)?;
        if node.read_only {
            return Err(DomError::WriteRejected(id.0));
        }
        match &mut node.data {
            NodeData::Text(text) => {
                *text = value.to_string();
                Ok(())
            }
            _ => Err(DomError::WriteRejected(id.0)),
        }
    }

    /// Concatenated accessible text under `id`, in document order
    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let node = match self.accessible(current) {
                Ok(node) => node,
                Err(_) => continue,
            };
            if let NodeData::Text(text) = &node.data {
                out.push_str(text);
            }
            stack.extend(node.children.iter().rev().copied());
        }
        out
    }

    /// Start observing structural changes
    pub fn observe(&mut self) -> (ObserverId, tokio::sync::mpsc::UnboundedReceiver<MutationRecord>) {
        self.observers.register()
    }

    pub fn disconnect(&mut self, observer: ObserverId) {
        self.observers.unregister(observer);
    }

    /// Markup-like rendering of the subtree at `id`
    pub fn render(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.render_into(id, &mut out);
        out
    }

    fn render_into(&self, id: NodeId, out: &mut String) {
        let node = match self.node(id) {
            Ok(node) => node,
            Err(_) => return,
        };
        if node.restricted {
            out.push_str("<!-- restricted -->");
            return;
        }
        match &node.data {
            NodeData::Text(text) => out.push_str(text),
            NodeData::Document | NodeData::Fragment => {
                for &child in &node.children {
                    self.render_into(child, out);
                }
            }
            NodeData::Element { tag, attributes } => {
                out.push('<');
                out.push_str(tag);
                for (name, value) in attributes {
                    out.push_str(&format!(" {}=\"{}\"", name, value));
                }
                out.push('>');
                for &child in &node.children {
                    self.render_into(child, out);
                }
                out.push_str(&format!("</{}>", tag));
            }
        }
    }
}

impl NodeData {
    fn is_fragment(&self) -> bool {
        matches!(self, NodeData::Fragment)
    }
}
