//! Minimal page model — an arena of elements with text, plus the
//! readable-element traversal the reader walks through.
//!
//! A leaf element owns its text; `text_content` of an inner element is the
//! concatenation of its descendants, like the DOM property of the same name.

use serde::{Deserialize, Serialize};

use crate::highlight::strip_highlights;

/// Tags whose content is never read aloud.
pub const SKIP_TAGS: &[&str] = &[
    "SCRIPT", "STYLE", "META", "LINK", "NOSCRIPT", "TEMPLATE", "SVG", "CANVAS",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub usize);

#[derive(Debug, Clone)]
struct Node {
    tag: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    text: String,
    /// Rendered inner markup when it differs from the plain text.
    markup: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// An empty document with a `body` root.
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                tag: "body".into(),
                parent: None,
                children: Vec::new(),
                text: String::new(),
                markup: None,
            }],
        }
    }

    /// Build a document of `<p>` elements from blank-line separated text.
    /// Lines inside a paragraph are joined with single spaces.
    pub fn from_paragraphs(text: &str) -> Self {
        let mut doc = Self::new();
        let root = doc.root();
        let mut current: Vec<&str> = Vec::new();

        for line in text.lines().chain(std::iter::once("")) {
            let line = line.trim();
            if line.is_empty() {
                if !current.is_empty() {
                    doc.append_text_element(root, "p", &current.join(" "));
                    current.clear();
                }
            } else {
                current.push(line);
            }
        }
        doc
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn append_element(&mut self, parent: NodeId, tag: &str) -> NodeId {
        self.append(parent, tag, String::new())
    }

    pub fn append_text_element(&mut self, parent: NodeId, tag: &str, text: &str) -> NodeId {
        self.append(parent, tag, text.to_string())
    }

    fn append(&mut self, parent: NodeId, tag: &str, text: String) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            tag: tag.to_string(),
            parent: Some(parent),
            children: Vec::new(),
            text,
            markup: None,
        });
        self.nodes[parent.0].children.push(id);
        id
    }

    pub fn contains(&self, id: NodeId) -> bool {
        id.0 < self.nodes.len()
    }

    pub fn tag(&self, id: NodeId) -> &str {
        &self.nodes[id.0].tag
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    /// Concatenated text of the element and all its descendants.
    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(id, &mut out);
        out
    }

    fn collect_text(&self, id: NodeId, out: &mut String) {
        let node = &self.nodes[id.0];
        out.push_str(&node.text);
        for &child in &node.children {
            self.collect_text(child, out);
        }
    }

    /// Rendered inner markup: highlight spans if any were applied, else the text.
    pub fn markup(&self, id: NodeId) -> String {
        let node = &self.nodes[id.0];
        node.markup.clone().unwrap_or_else(|| node.text.clone())
    }

    pub fn set_markup(&mut self, id: NodeId, markup: String) {
        let node = &mut self.nodes[id.0];
        node.markup = if markup == node.text { None } else { Some(markup) };
    }

    /// Drop any applied markup, restoring the plain text.
    pub fn restore(&mut self, id: NodeId) {
        self.nodes[id.0].markup = None;
    }

    /// Unwrap every highlight span in the document.
    pub fn clear_highlights(&mut self) {
        for node in &mut self.nodes {
            if let Some(markup) = node.markup.take() {
                let stripped = strip_highlights(&markup);
                if stripped != node.text {
                    node.markup = Some(stripped);
                }
            }
        }
    }

    pub fn has_highlights(&self) -> bool {
        self.nodes
            .iter()
            .filter_map(|n| n.markup.as_deref())
            .any(|m| strip_highlights(m) != m)
    }

    fn is_skipped(&self, id: NodeId) -> bool {
        let tag = self.tag(id);
        SKIP_TAGS.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }

    fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.parent(id)?;
        let siblings = self.children(parent);
        let pos = siblings.iter().position(|&c| c == id)?;
        siblings.get(pos + 1).copied()
    }

    /// Depth-first search for the first leaf element with non-whitespace text.
    pub fn find_first_text_node(&self, id: NodeId) -> Option<NodeId> {
        if !self.contains(id) || self.is_skipped(id) {
            return None;
        }

        let node = &self.nodes[id.0];
        if node.children.is_empty() && !node.text.trim().is_empty() {
            return Some(id);
        }

        node.children
            .iter()
            .find_map(|&child| self.find_first_text_node(child))
    }

    /// Next readable leaf in document order: later siblings first, then the
    /// siblings following each ancestor in turn.
    pub fn find_next_text_node(&self, id: NodeId) -> Option<NodeId> {
        if !self.contains(id) {
            return None;
        }

        let mut sibling = self.next_sibling(id);
        while let Some(s) = sibling {
            if let Some(found) = self.find_first_text_node(s) {
                return Some(found);
            }
            sibling = self.next_sibling(s);
        }

        let mut parent = self.parent(id);
        while let Some(p) = parent {
            let mut sibling = self.next_sibling(p);
            while let Some(s) = sibling {
                if let Some(found) = self.find_first_text_node(s) {
                    return Some(found);
                }
                sibling = self.next_sibling(s);
            }
            parent = self.parent(p);
        }

        None
    }

    /// All readable leaves in reading order.
    pub fn readable_elements(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut next = self.find_first_text_node(self.root());
        while let Some(id) = next {
            out.push(id);
            next = self.find_next_text_node(id);
        }
        out
    }
}
