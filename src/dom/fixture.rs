//! JSON page fixtures used by the CLI and tests

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

use super::{Document, NodeId};
use crate::utils::errors::DomError;

/// A node description: either a bare string (text) or an element
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum NodeSpec {
    Text(String),
    Element {
        tag: String,
        #[serde(default)]
        attrs: BTreeMap<String, String>,
        #[serde(default)]
        children: Vec<NodeSpec>,
        /// Content of a sandboxed subframe
        #[serde(default)]
        restricted: bool,
        #[serde(default, rename = "readOnly")]
        read_only: bool,
    },
}

/// Content appended to the page body after a delay
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptedMutation {
    pub after_ms: u64,
    pub append: NodeSpec,
}

/// A page: the initial body plus content that shows up later
#[derive(Debug, Clone, Deserialize)]
pub struct PageFixture {
    pub body: NodeSpec,
    #[serde(default)]
    pub mutations: Vec<ScriptedMutation>,
}

impl PageFixture {
    pub fn load(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
        serde_json::from_str(&content).map_err(|e| format!("Invalid page fixture {}: {}", path.display(), e))
    }

    /// Build the initial page, returning the document and its body node
    pub fn build(&self) -> Result<(Document, NodeId), DomError> {
        let mut document = Document::new();
        let root = document.root();
        let body = build_node(&mut document, &self.body)?;
        document.append_child(root, body)?;
        Ok((document, body))
    }
}

/// Create the detached subtree described by `node`
pub fn build_node(document: &mut Document, node: &NodeSpec) -> Result<NodeId, DomError> {
    match node {
        NodeSpec::Text(text) => Ok(document.create_text(text)),
        NodeSpec::Element {
            tag,
            attrs,
            children,
            restricted,
            read_only,
        } => {
            let element = document.create_element(tag);
            for (name, value) in attrs {
                document.set_attribute(element, name, value)?;
            }
            for child in children {
                let child_id = build_node(document, child)?;
                document.append_child(element, child_id)?;
            }
            if *restricted {
                document.restrict(element)?;
            }
            if *read_only {
                document.set_read_only(element, true)?;
            }
            Ok(element)
        }
    }
}
