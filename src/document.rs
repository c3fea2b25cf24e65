//! Mutable element tree for a loaded catalog page.
//!
//! Markup is parsed once with `scraper` and copied into an arena so that the
//! search workflow can hide, clear, clone and append nodes the way a browser
//! script would. Detached nodes (fresh clones) stay in the arena but are
//! invisible to every document-level query. Cleared children are released
//! and their slots reused by later insertions.

use scraper::{Html, Node as HtmlNode};
use std::collections::{HashMap, HashSet};

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source",
    "track", "wbr",
];
const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug, Clone, PartialEq)]
pub enum NodeData {
    Document,
    Element {
        tag: String,
        attrs: Vec<(String, String)>,
    },
    Text(String),
    Comment(String),
}

#[derive(Debug, Clone)]
struct Node {
    data: NodeData,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Inline `display` state of an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// No `display` declaration in the inline style.
    Shown,
    /// `display: none`.
    Hidden,
}

#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
    free: Vec<usize>,
    doctype: Option<String>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                data: NodeData::Document,
                parent: None,
                children: Vec::new(),
            }],
            free: Vec::new(),
            doctype: None,
        }
    }

    pub fn parse(markup: &str) -> Self {
        let html = Html::parse_document(markup);
        let mut document = Self::new();
        let tree_root = html.tree.root();
        let mut imported = HashMap::new();
        imported.insert(tree_root.id(), document.root());
        for source in tree_root.descendants().skip(1) {
            let Some(parent) = source
                .parent()
                .and_then(|parent| imported.get(&parent.id()).copied())
            else {
                continue;
            };
            let id = match source.value() {
                HtmlNode::Doctype(doctype) => {
                    document.doctype = Some(doctype_declaration(
                        doctype.name(),
                        doctype.public_id(),
                        doctype.system_id(),
                    ));
                    continue;
                }
                HtmlNode::Comment(comment) => document.create_comment(&**comment),
                HtmlNode::Element(element) => {
                    document.create_element(element.name(), element.attrs())
                }
                HtmlNode::Text(text) => document.create_text(&**text),
                _ => continue,
            };
            document.append_child(parent, id);
            imported.insert(source.id(), id);
        }
        document
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn create_element<'a, I>(&mut self, tag: &str, attrs: I) -> NodeId
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        self.push(NodeData::Element {
            tag: tag.to_ascii_lowercase(),
            attrs: attrs
                .into_iter()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
        })
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.push(NodeData::Text(text.to_string()))
    }

    pub fn create_comment(&mut self, text: &str) -> NodeId {
        self.push(NodeData::Comment(text.to_string()))
    }

    fn push(&mut self, data: NodeData) -> NodeId {
        let node = Node {
            data,
            parent: None,
            children: Vec::new(),
        };
        match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = node;
                NodeId(slot)
            }
            None => {
                self.nodes.push(node);
                NodeId(self.nodes.len() - 1)
            }
        }
    }

    /// Arena slots in use, attached or not.
    pub fn live_nodes(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    /// Total arena slots, including released ones awaiting reuse.
    pub fn capacity(&self) -> usize {
        self.nodes.len()
    }

    pub fn data(&self, id: NodeId) -> &NodeData {
        &self.nodes[id.0].data
    }

    pub fn tag(&self, id: NodeId) -> Option<&str> {
        match &self.nodes[id.0].data {
            NodeData::Element { tag, .. } => Some(tag),
            _ => None,
        }
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        match &self.nodes[id.0].data {
            NodeData::Element { attrs, .. } => attrs
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.as_str()),
            _ => None,
        }
    }

    pub fn set_attr(&mut self, id: NodeId, name: &str, value: &str) {
        if let NodeData::Element { attrs, .. } = &mut self.nodes[id.0].data {
            match attrs.iter_mut().find(|(key, _)| key == name) {
                Some((_, existing)) => *existing = value.to_string(),
                None => attrs.push((name.to_string(), value.to_string())),
            }
        }
    }

    pub fn remove_attr(&mut self, id: NodeId, name: &str) -> Option<String> {
        if let NodeData::Element { attrs, .. } = &mut self.nodes[id.0].data {
            let position = attrs.iter().position(|(key, _)| key == name)?;
            return Some(attrs.remove(position).1);
        }
        None
    }

    /// `id` and everything below it, in document order.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.nodes[next.0].children.iter().rev().copied());
        }
        out
    }

    /// Elements reachable from the root, in document order.
    pub fn elements(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.descendants(self.root())
            .into_iter()
            .filter(|id| matches!(self.nodes[id.0].data, NodeData::Element { .. }))
    }

    pub fn element_by_id(&self, value: &str) -> Option<NodeId> {
        self.elements().find(|id| self.attr(*id, "id") == Some(value))
    }

    pub fn elements_with_attrs(&self, names: &[&str]) -> Vec<NodeId> {
        self.elements()
            .filter(|id| names.iter().all(|name| self.attr(*id, name).is_some()))
            .collect()
    }

    pub fn is_attached(&self, id: NodeId) -> bool {
        let mut current = id;
        loop {
            if current == self.root() {
                return true;
            }
            match self.nodes[current.0].parent {
                Some(parent) => current = parent,
                None => return false,
            }
        }
    }

    /// Copies the subtree rooted at `id`; the copy is detached.
    pub fn deep_clone(&mut self, id: NodeId) -> NodeId {
        let data = self.nodes[id.0].data.clone();
        let copy = self.push(data);
        let children = self.nodes[id.0].children.clone();
        for child in children {
            let child_copy = self.deep_clone(child);
            self.append_child(copy, child_copy);
        }
        copy
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        self.detach(child);
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.push(child);
    }

    pub fn detach(&mut self, id: NodeId) {
        if let Some(parent) = self.nodes[id.0].parent.take() {
            self.nodes[parent.0].children.retain(|child| *child != id);
        }
    }

    /// Removes every child of `parent` and releases their subtrees. Ids of
    /// the removed nodes must not be used afterwards.
    pub fn clear_children(&mut self, parent: NodeId) {
        let children = std::mem::take(&mut self.nodes[parent.0].children);
        for child in children {
            self.nodes[child.0].parent = None;
            self.release(child);
        }
    }

    fn release(&mut self, id: NodeId) {
        for node in self.descendants(id) {
            let slot = &mut self.nodes[node.0];
            slot.data = NodeData::Text(String::new());
            slot.parent = None;
            slot.children = Vec::new();
            self.free.push(node.0);
        }
    }

    pub fn visibility(&self, id: NodeId) -> Visibility {
        let hidden = self
            .attr(id, "style")
            .map(parse_style)
            .unwrap_or_default()
            .iter()
            .any(|(name, value)| name == "display" && value == "none");
        if hidden {
            Visibility::Hidden
        } else {
            Visibility::Shown
        }
    }

    /// Rewrites the inline `display` declaration, keeping every other one.
    pub fn set_visibility(&mut self, id: NodeId, visibility: Visibility) {
        let mut declarations: Vec<(String, String)> = self
            .attr(id, "style")
            .map(parse_style)
            .unwrap_or_default()
            .into_iter()
            .filter(|(name, _)| name != "display")
            .collect();
        if visibility == Visibility::Hidden {
            declarations.push(("display".to_string(), "none".to_string()));
        }
        if declarations.is_empty() {
            self.remove_attr(id, "style");
        } else {
            let style = declarations
                .iter()
                .map(|(name, value)| format!("{name}: {value};"))
                .collect::<Vec<_>>()
                .join(" ");
            self.set_attr(id, "style", &style);
        }
    }

    /// `id` values used by more than one attached element.
    pub fn duplicate_ids(&self) -> Vec<String> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for id in self.elements() {
            if let Some(value) = self.attr(id, "id") {
                *counts.entry(value).or_insert(0) += 1;
            }
        }
        let mut seen = HashSet::new();
        self.elements()
            .filter_map(|id| self.attr(id, "id"))
            .filter(|value| counts[value] > 1 && seen.insert(*value))
            .map(str::to_string)
            .collect()
    }

    pub fn text_content(&self, id: NodeId) -> String {
        self.descendants(id)
            .into_iter()
            .filter_map(|node| match &self.nodes[node.0].data {
                NodeData::Text(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn to_html(&self) -> String {
        let mut out = String::new();
        if let Some(doctype) = &self.doctype {
            out.push_str("<!DOCTYPE ");
            out.push_str(doctype);
            out.push('>');
        }
        out.push_str(&self.inner_html(self.root()));
        out
    }

    pub fn outer_html(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.write_node(id, false, &mut out);
        out
    }

    pub fn inner_html(&self, id: NodeId) -> String {
        let raw = self
            .tag(id)
            .is_some_and(|tag| RAW_TEXT_ELEMENTS.contains(&tag));
        let mut out = String::new();
        for child in &self.nodes[id.0].children {
            self.write_node(*child, raw, &mut out);
        }
        out
    }

    fn write_node(&self, id: NodeId, raw_text: bool, out: &mut String) {
        match &self.nodes[id.0].data {
            NodeData::Document => out.push_str(&self.inner_html(id)),
            NodeData::Text(text) => {
                if raw_text {
                    out.push_str(text);
                } else {
                    escape_into(text, false, out);
                }
            }
            NodeData::Comment(text) => {
                out.push_str("<!--");
                out.push_str(text);
                out.push_str("-->");
            }
            NodeData::Element { tag, attrs } => {
                out.push('<');
                out.push_str(tag);
                for (name, value) in attrs {
                    out.push(' ');
                    out.push_str(name);
                    out.push_str("=\"");
                    escape_into(value, true, out);
                    out.push('"');
                }
                out.push('>');
                if VOID_ELEMENTS.contains(&tag.as_str()) {
                    return;
                }
                out.push_str(&self.inner_html(id));
                out.push_str("</");
                out.push_str(tag);
                out.push('>');
            }
        }
    }
}

fn doctype_declaration(name: &str, public_id: &str, system_id: &str) -> String {
    let mut declaration = name.to_string();
    if !public_id.is_empty() {
        declaration.push_str(&format!(" PUBLIC \"{public_id}\""));
        if !system_id.is_empty() {
            declaration.push_str(&format!(" \"{system_id}\""));
        }
    } else if !system_id.is_empty() {
        declaration.push_str(&format!(" SYSTEM \"{system_id}\""));
    }
    declaration
}

fn parse_style(style: &str) -> Vec<(String, String)> {
    style
        .split(';')
        .filter_map(|declaration| {
            let (name, value) = declaration.split_once(':')?;
            let name = name.trim().to_ascii_lowercase();
            if name.is_empty() {
                return None;
            }
            Some((name, value.trim().to_string()))
        })
        .collect()
}

fn escape_into(text: &str, attribute: bool, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' if !attribute => out.push_str("&lt;"),
            '>' if !attribute => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            _ => out.push(c),
        }
    }
}
