use crate::document::{Document, NodeId, Visibility};
use crate::lazy::{is_deferred_image, resolve_deferred_source};
use crate::page::PageError;
use crate::session::{Answer, DisplayMode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

/// Element ids the search workflow expects on the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DomContract {
    pub input_id: String,
    pub browse_id: String,
    pub answers_id: String,
}

impl Default for DomContract {
    fn default() -> Self {
        Self {
            input_id: "search".to_string(),
            browse_id: "catalog".to_string(),
            answers_id: "answers".to_string(),
        }
    }
}

/// Switches the page between the full catalog and the answers list.
#[derive(Debug, Clone)]
pub struct PresentationToggler {
    browse: NodeId,
    answers: NodeId,
    containers: HashMap<String, NodeId>,
}

impl PresentationToggler {
    pub fn attach(document: &Document, contract: &DomContract) -> Result<Self, PageError> {
        let browse = document
            .element_by_id(&contract.browse_id)
            .ok_or_else(|| PageError::MissingElement(contract.browse_id.clone()))?;
        let answers = document
            .element_by_id(&contract.answers_id)
            .ok_or_else(|| PageError::MissingElement(contract.answers_id.clone()))?;
        let mut containers = HashMap::new();
        for node in document.elements() {
            if let Some(id) = document.attr(node, "id") {
                containers.entry(id.to_string()).or_insert(node);
            }
        }
        Ok(Self {
            browse,
            answers,
            containers,
        })
    }

    pub fn browse(&self) -> NodeId {
        self.browse
    }

    pub fn answers(&self) -> NodeId {
        self.answers
    }

    pub fn set_mode(&self, document: &mut Document, mode: DisplayMode) {
        document.clear_children(self.answers);
        match mode {
            DisplayMode::Browse => {
                document.set_visibility(self.browse, Visibility::Shown);
                document.set_visibility(self.answers, Visibility::Hidden);
            }
            DisplayMode::SearchResults => {
                document.set_visibility(self.browse, Visibility::Hidden);
                document.set_visibility(self.answers, Visibility::Shown);
            }
        }
    }

    /// Replaces the answers container's children with clones of the
    /// matching catalog entries. Returns how many entries were appended.
    pub fn render_answers(&self, document: &mut Document, answers: &[Answer]) -> usize {
        document.clear_children(self.answers);
        let mut rendered = 0;
        for answer in answers {
            let Some(&container) = self.containers.get(&answer.id) else {
                warn!(id = %answer.id, title = %answer.title, "no container for answer");
                continue;
            };
            let copy = document.deep_clone(container);
            for node in document.descendants(copy) {
                document.remove_attr(node, "id");
                if is_deferred_image(document, node) {
                    resolve_deferred_source(document, node);
                }
            }
            document.append_child(self.answers, copy);
            rendered += 1;
        }
        rendered
    }
}
