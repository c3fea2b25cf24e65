use crate::SearchConfig;
use crate::catalog::{Catalog, CatalogEntry, CatalogError, TitleLookup};
use crate::fuzzy::{FuzzyIndex, FuzzyMatch};
use crate::normalize::{char_len, normalize_title};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DisplayMode {
    #[default]
    Browse,
    SearchResults,
}

impl fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisplayMode::Browse => write!(f, "browse"),
            DisplayMode::SearchResults => write!(f, "search-results"),
        }
    }
}

/// A catalog entry selected by a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub id: String,
    pub title: String,
    pub normalized_title: String,
    /// Similarity score; absent for substring hits.
    pub score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryOutcome {
    /// The query after normalization.
    pub query: String,
    pub mode: DisplayMode,
    pub answers: Vec<Answer>,
}

/// Everything a page needs to answer queries, built in one pass at load.
///
/// The fuzzy index and the title lookup are constructed from the same
/// sequence of normalized titles, so every title the index returns resolves
/// to an entry.
#[derive(Debug, Clone)]
pub struct SearchSession {
    catalog: Catalog,
    index: FuzzyIndex,
    lookup: TitleLookup,
    config: SearchConfig,
}

impl SearchSession {
    pub fn build(catalog: Catalog, config: SearchConfig) -> Result<Self, CatalogError> {
        let titles: Vec<&str> = catalog.normalized_titles().collect();
        let index = FuzzyIndex::build(&titles, config.fuzzy_options());
        let lookup = TitleLookup::build(titles.iter().copied())?;
        debug!(
            entries = catalog.len(),
            indexed = index.len(),
            keys = lookup.len(),
            "search session ready"
        );
        Ok(Self {
            catalog,
            index,
            lookup,
            config,
        })
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn lookup(&self) -> &TitleLookup {
        &self.lookup
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Handles the raw text of the search field.
    ///
    /// Queries shorter than `min_query_chars` after normalization switch back
    /// to browsing without touching the index.
    pub fn query(&self, raw: &str) -> QueryOutcome {
        let query = normalize_title(raw);
        if char_len(&query) < self.config.min_query_chars {
            return QueryOutcome {
                query,
                mode: DisplayMode::Browse,
                answers: Vec::new(),
            };
        }
        let answers = self.search_fuzzy(&query);
        debug!(%query, answers = answers.len(), "fuzzy query");
        QueryOutcome {
            query,
            mode: DisplayMode::SearchResults,
            answers,
        }
    }

    /// Fuzzy matches for an already normalized query, after the relative
    /// score filter.
    pub fn search_fuzzy(&self, normalized_query: &str) -> Vec<Answer> {
        let matches = self.index.get(normalized_query, self.config.min_score);
        relative_filter(matches, self.config.min_score, self.config.relative_cutoff)
            .into_iter()
            .filter_map(|found| {
                let entry = self.entry_for_title(&found.title)?;
                Some(Answer {
                    id: entry.id.clone(),
                    title: entry.title.clone(),
                    normalized_title: found.title,
                    score: Some(found.score),
                })
            })
            .collect()
    }

    /// Case-insensitive containment search in catalog order.
    pub fn search_contains(&self, raw: &str, limit: usize) -> Vec<Answer> {
        let needle = normalize_title(raw).to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        self.catalog
            .entries()
            .iter()
            .filter(|entry| entry.normalized_title.to_lowercase().contains(&needle))
            .take(limit)
            .map(|entry| Answer {
                id: entry.id.clone(),
                title: entry.title.clone(),
                normalized_title: entry.normalized_title.clone(),
                score: None,
            })
            .collect()
    }

    pub fn entry_for_title(&self, normalized_title: &str) -> Option<&CatalogEntry> {
        self.lookup
            .get(normalized_title)
            .and_then(|position| self.catalog.get(position))
    }

    pub fn entry_by_id(&self, id: &str) -> Option<&CatalogEntry> {
        self.catalog.entries().iter().find(|entry| entry.id == id)
    }
}

/// Keeps matches whose score lies in the upper part of the spread between
/// `min_score` and the best score: `(score - min) / (best - min) > cutoff`.
///
/// When the best score does not exceed `min_score` the spread is zero and
/// nothing is kept.
pub fn relative_filter(matches: Vec<FuzzyMatch>, min_score: f64, cutoff: f64) -> Vec<FuzzyMatch> {
    let Some(best) = matches.first().map(|found| found.score) else {
        return Vec::new();
    };
    let spread = best - min_score;
    if spread <= 0.0 {
        return Vec::new();
    }
    matches
        .into_iter()
        .filter(|found| (found.score - min_score) / spread > cutoff)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn session(titles: &[(&str, &str)]) -> SearchSession {
        let entries = titles
            .iter()
            .map(|(id, title)| CatalogEntry::new(*id, *title))
            .collect();
        SearchSession::build(Catalog::new(entries), SearchConfig::default()).unwrap()
    }

    fn amelie() -> SearchSession {
        session(&[("1", "Amélie"), ("2", "Amelie Poulain"), ("3", "The Matrix")])
    }

    fn titles(outcome: &QueryOutcome) -> Vec<&str> {
        outcome.answers.iter().map(|a| a.title.as_str()).collect()
    }

    #[test]
    fn accent_free_query_finds_both_amelies() {
        let outcome = amelie().query("amelie");
        assert_eq!(outcome.mode, DisplayMode::SearchResults);
        assert_eq!(titles(&outcome), vec!["Amélie", "Amelie Poulain"]);
        assert_eq!(outcome.answers[0].id, "1");
        assert_eq!(outcome.answers[1].id, "2");
    }

    #[test]
    fn unmatched_query_is_empty_search() {
        let outcome = amelie().query("zzqx");
        assert_eq!(outcome.mode, DisplayMode::SearchResults);
        assert!(outcome.answers.is_empty());
    }

    #[test]
    fn two_characters_browse_three_search() {
        let s = amelie();
        assert_eq!(s.query("am").mode, DisplayMode::Browse);
        assert_eq!(s.query("  am ").mode, DisplayMode::Browse);
        assert_eq!(s.query("amé").mode, DisplayMode::SearchResults);
        assert_eq!(s.query("a\u{301}m").mode, DisplayMode::Browse);
    }

    #[test]
    fn repeated_queries_are_identical() {
        let s = amelie();
        assert_eq!(s.query("matrx"), s.query("matrx"));
    }

    #[test]
    fn duplicate_titles_resolve_to_last_entry() {
        let s = session(&[("1", "Alien"), ("2", "Alien"), ("3", "Heat")]);
        let outcome = s.query("alien");
        assert_eq!(outcome.answers.len(), 1);
        assert_eq!(outcome.answers[0].id, "2");
    }

    #[test]
    fn empty_catalog_answers_nothing() {
        let s = session(&[]);
        let outcome = s.query("anything");
        assert_eq!(outcome.mode, DisplayMode::SearchResults);
        assert!(outcome.answers.is_empty());
    }

    #[test]
    fn degenerate_spread_keeps_nothing() {
        let matches = vec![
            FuzzyMatch {
                score: 0.1,
                title: "a".to_string(),
            },
            FuzzyMatch {
                score: 0.1,
                title: "b".to_string(),
            },
        ];
        assert!(relative_filter(matches, 0.1, 0.5).is_empty());
    }

    #[test]
    fn relative_filter_drops_weak_tail() {
        let matches = [0.9, 0.6, 0.5, 0.2]
            .iter()
            .enumerate()
            .map(|(i, score)| FuzzyMatch {
                score: *score,
                title: i.to_string(),
            })
            .collect();
        let kept: Vec<_> = relative_filter(matches, 0.1, 0.5)
            .into_iter()
            .map(|m| m.title)
            .collect();
        assert_eq!(kept, vec!["0", "1"]);
    }

    #[test]
    fn substring_search_is_capped_and_ordered() {
        let s = session(&[
            ("1", "Star Wars"),
            ("2", "Lone Star"),
            ("3", "Heat"),
            ("4", "Stargate"),
        ]);
        let hits = s.search_contains("STAR", 2);
        let ids: Vec<_> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
        assert!(hits.iter().all(|h| h.score.is_none()));
        assert!(s.search_contains("  ", 5).is_empty());
    }

    proptest! {
        #[test]
        fn returned_scores_clear_the_relative_cutoff(query in "[a-z ]{3,12}") {
            let s = session(&[
                ("1", "Alien"),
                ("2", "Aliens"),
                ("3", "Alien Resurrection"),
                ("4", "The Matrix"),
                ("5", "The Matrix Reloaded"),
                ("6", "Heat"),
                ("7", "Amélie"),
            ]);
            let outcome = s.query(&query);
            if let Some(best) = outcome.answers.first().and_then(|a| a.score) {
                for answer in &outcome.answers {
                    let score = answer.score.unwrap();
                    prop_assert!((score - 0.1) / (best - 0.1) > 0.5);
                }
            }
        }

        #[test]
        fn indexing_and_querying_share_normalization(title in "\\PC{1,16}") {
            let s = session(&[("1", title.as_str())]);
            let entry = &s.catalog().entries()[0];
            prop_assert_eq!(&entry.normalized_title, &normalize_title(&title));
            prop_assert_eq!(s.entry_for_title(&normalize_title(&title)).map(|e| e.id.as_str()), Some("1"));
        }
    }
}
