use crate::document::{Document, NodeId};
use std::collections::{HashMap, HashSet};
use tracing::trace;

pub const LOADING_ATTR: &str = "loading";
pub const LOADING_DEFERRED: &str = "lazy";
pub const DEFERRED_SRC_ATTR: &str = "data-src";
pub const SRC_ATTR: &str = "src";

/// Extra distance around the viewport that already counts as visible.
pub const DEFAULT_ROOT_MARGIN: f64 = 200.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub top: f64,
    pub height: f64,
}

impl Viewport {
    pub fn new(top: f64, height: f64) -> Self {
        Self { top, height }
    }
}

/// Vertical extent of a laid-out element.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub top: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(top: f64, height: f64) -> Self {
        Self { top, height }
    }

    fn intersects(&self, viewport: &Viewport, margin: f64) -> bool {
        let start = viewport.top - margin;
        let end = viewport.top + viewport.height + margin;
        self.top < end && self.top + self.height > start
    }
}

/// Supplies element geometry; the document itself carries none.
pub trait Layout {
    fn rect(&self, document: &Document, node: NodeId) -> Option<Rect>;
}

impl Layout for HashMap<NodeId, Rect> {
    fn rect(&self, _document: &Document, node: NodeId) -> Option<Rect> {
        self.get(&node).copied()
    }
}

/// Places the given nodes one below another with a uniform row height.
#[derive(Debug, Clone)]
pub struct StackedLayout {
    rows: HashMap<NodeId, usize>,
    row_height: f64,
}

impl StackedLayout {
    pub fn new(nodes: &[NodeId], row_height: f64) -> Self {
        Self {
            rows: nodes.iter().enumerate().map(|(row, id)| (*id, row)).collect(),
            row_height,
        }
    }
}

impl Layout for StackedLayout {
    fn rect(&self, _document: &Document, node: NodeId) -> Option<Rect> {
        self.rows
            .get(&node)
            .map(|row| Rect::new(*row as f64 * self.row_height, self.row_height))
    }
}

pub fn is_deferred_image(document: &Document, node: NodeId) -> bool {
    document.tag(node) == Some("img")
        && document.attr(node, LOADING_ATTR) == Some(LOADING_DEFERRED)
        && document.attr(node, DEFERRED_SRC_ATTR).is_some()
}

/// Copies `data-src` into `src`. Returns false when there is nothing to copy.
pub fn resolve_deferred_source(document: &mut Document, node: NodeId) -> bool {
    let Some(source) = document.attr(node, DEFERRED_SRC_ATTR).map(str::to_string) else {
        return false;
    };
    document.set_attr(node, SRC_ATTR, &source);
    true
}

/// Viewport-proximity observer for deferred images.
///
/// Each observed image is resolved at most once: it is dropped from the
/// observed set before its source is copied. Images that already carry a
/// `src` are never observed.
#[derive(Debug, Clone)]
pub struct LazyImageLoader {
    root_margin: f64,
    observed: Vec<NodeId>,
    members: HashSet<NodeId>,
}

impl Default for LazyImageLoader {
    fn default() -> Self {
        Self::new(DEFAULT_ROOT_MARGIN)
    }
}

impl LazyImageLoader {
    pub fn new(root_margin: f64) -> Self {
        Self {
            root_margin,
            observed: Vec::new(),
            members: HashSet::new(),
        }
    }

    /// Observes every unresolved deferred image attached to the document.
    pub fn observe_all(&mut self, document: &Document) -> usize {
        let before = self.observed.len();
        for node in document.elements() {
            if is_deferred_image(document, node)
                && document.attr(node, SRC_ATTR).is_none()
                && self.members.insert(node)
            {
                self.observed.push(node);
            }
        }
        self.observed.len() - before
    }

    pub fn observed(&self) -> &[NodeId] {
        &self.observed
    }

    pub fn is_observing(&self, node: NodeId) -> bool {
        self.members.contains(&node)
    }

    /// Resolves and unobserves every image inside the extended viewport.
    pub fn on_intersection<L: Layout + ?Sized>(
        &mut self,
        document: &mut Document,
        layout: &L,
        viewport: &Viewport,
    ) -> Vec<NodeId> {
        let margin = self.root_margin;
        let (visible, pending): (Vec<NodeId>, Vec<NodeId>) =
            self.observed.iter().copied().partition(|node| {
                layout
                    .rect(document, *node)
                    .is_some_and(|rect| rect.intersects(viewport, margin))
            });
        self.observed = pending;
        for node in &visible {
            self.members.remove(node);
            resolve_deferred_source(document, *node);
            trace!(?node, "resolved deferred image");
        }
        visible
    }
}
