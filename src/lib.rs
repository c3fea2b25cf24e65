pub mod catalog;
pub mod document;
pub mod events;
pub mod fuzzy;
pub mod lazy;
pub mod links;
pub mod normalize;
pub mod page;
pub mod presentation;
pub mod session;
#[cfg(feature = "web")]
pub mod web;

pub use catalog::{Catalog, CatalogEntry, CatalogError, MediaKind, TitleLookup};
pub use document::{Document, NodeId, Visibility};
pub use events::{EventLoop, EventSource, PageEvent};
pub use fuzzy::{FuzzyIndex, FuzzyMatch, FuzzyOptions, Scorer};
pub use lazy::{LazyImageLoader, Layout, Rect, Viewport};
pub use links::PageLinker;
pub use normalize::normalize_title;
pub use page::{CatalogPage, PageError};
pub use presentation::{DomContract, PresentationToggler};
pub use session::{Answer, DisplayMode, QueryOutcome, SearchSession};

use serde::{Deserialize, Serialize};

/// Tunables for indexing and querying.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub gram_size_lower: usize,
    pub gram_size_upper: usize,
    /// Absolute floor a match must reach.
    pub min_score: f64,
    /// Share of the spread between `min_score` and the best score a match
    /// must exceed to be shown.
    pub relative_cutoff: f64,
    /// Normalized queries shorter than this keep the page in browse mode.
    pub min_query_chars: usize,
    pub rescore_window: usize,
    pub scorer: Scorer,
    pub substring_limit: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            gram_size_lower: 2,
            gram_size_upper: 3,
            min_score: 0.1,
            relative_cutoff: 0.5,
            min_query_chars: 3,
            rescore_window: 50,
            scorer: Scorer::default(),
            substring_limit: 11,
        }
    }
}

impl SearchConfig {
    pub fn fuzzy_options(&self) -> FuzzyOptions {
        FuzzyOptions {
            gram_size_lower: self.gram_size_lower,
            gram_size_upper: self.gram_size_upper,
            scorer: self.scorer,
            rescore_window: self.rescore_window,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_json_fills_defaults() {
        let config: SearchConfig =
            serde_json::from_str(r#"{"min_score": 0.2, "scorer": "levenshtein"}"#).unwrap();
        assert_eq!(config.min_score, 0.2);
        assert_eq!(config.scorer, Scorer::Levenshtein);
        assert_eq!(config.gram_size_upper, 3);
        assert_eq!(config.substring_limit, 11);
    }
}
