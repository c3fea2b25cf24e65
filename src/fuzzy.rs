//! N-gram fuzzy matching over a fixed list of strings.
//!
//! Every indexed string is split into padded character n-grams for each gram
//! size in the configured range. Lookups first collect candidates that share
//! grams with the query (cosine similarity of the gram count vectors), trying
//! the largest gram size first and falling back to smaller ones. The best
//! candidates are then re-scored with a string similarity from `rapidfuzz`.

use rapidfuzz::distance::{jaro_winkler, levenshtein};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

const PAD: char = '-';

/// Similarity used to re-score the cosine candidates.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[serde(rename_all = "kebab-case")]
pub enum Scorer {
    #[default]
    JaroWinkler,
    Levenshtein,
    /// Keep the raw n-gram cosine score.
    Cosine,
}

impl fmt::Display for Scorer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scorer::JaroWinkler => write!(f, "jaro-winkler"),
            Scorer::Levenshtein => write!(f, "levenshtein"),
            Scorer::Cosine => write!(f, "cosine"),
        }
    }
}

/// Parameters fixed at build time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FuzzyOptions {
    pub gram_size_lower: usize,
    pub gram_size_upper: usize,
    pub scorer: Scorer,
    /// How many cosine candidates get re-scored.
    pub rescore_window: usize,
}

impl Default for FuzzyOptions {
    fn default() -> Self {
        Self {
            gram_size_lower: 2,
            gram_size_upper: 3,
            scorer: Scorer::default(),
            rescore_window: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FuzzyMatch {
    pub score: f64,
    /// The string exactly as it was added to the index.
    pub title: String,
}

#[derive(Debug, Clone)]
struct IndexedItem {
    norm: f64,
    lowered: String,
}

#[derive(Debug, Clone, Default)]
struct GramTable {
    items: Vec<IndexedItem>,
    postings: HashMap<String, Vec<(usize, u32)>>,
}

#[derive(Debug, Clone)]
pub struct FuzzyIndex {
    options: FuzzyOptions,
    /// lowercase form -> string as added (first one wins)
    exact: HashMap<String, String>,
    tables: Vec<GramTable>,
}

impl FuzzyIndex {
    pub fn build<I, S>(values: I, options: FuzzyOptions) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let lower = options.gram_size_lower.max(1);
        let upper = options.gram_size_upper.max(lower);
        let options = FuzzyOptions {
            gram_size_lower: lower,
            gram_size_upper: upper,
            ..options
        };

        let mut exact = HashMap::new();
        let mut unique = Vec::new();
        for value in values {
            let value = value.as_ref();
            let lowered = value.to_lowercase();
            if exact.contains_key(&lowered) {
                continue;
            }
            exact.insert(lowered.clone(), value.to_string());
            unique.push(lowered);
        }

        let tables = (lower..=upper)
            .map(|gram_size| build_table(&unique, gram_size))
            .collect();
        debug!(
            items = unique.len(),
            gram_size_lower = lower,
            gram_size_upper = upper,
            "built fuzzy index"
        );
        Self {
            options,
            exact,
            tables,
        }
    }

    pub fn len(&self) -> usize {
        self.exact.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty()
    }

    pub fn options(&self) -> &FuzzyOptions {
        &self.options
    }

    /// Returns matches scoring at least `min_score`, best first.
    ///
    /// An empty vector means nothing matched at any gram size.
    pub fn get(&self, query: &str, min_score: f64) -> Vec<FuzzyMatch> {
        let lowered = query.to_lowercase();
        for gram_size in (self.options.gram_size_lower..=self.options.gram_size_upper).rev() {
            let matches = self.lookup(&lowered, gram_size, min_score);
            if !matches.is_empty() {
                return matches;
            }
        }
        Vec::new()
    }

    fn lookup(&self, lowered: &str, gram_size: usize, min_score: f64) -> Vec<FuzzyMatch> {
        let table = &self.tables[gram_size - self.options.gram_size_lower];
        let counts = gram_counts(lowered, gram_size);

        let mut dots: HashMap<usize, u64> = HashMap::new();
        let mut sum_of_squares = 0u64;
        for (gram, count) in &counts {
            sum_of_squares += u64::from(*count) * u64::from(*count);
            if let Some(postings) = table.postings.get(gram) {
                for &(item, other) in postings {
                    *dots.entry(item).or_insert(0) += u64::from(*count) * u64::from(other);
                }
            }
        }
        if dots.is_empty() {
            return Vec::new();
        }

        let query_norm = (sum_of_squares as f64).sqrt();
        let mut candidates: Vec<(usize, u64)> = dots.into_iter().collect();
        candidates.sort_unstable_by_key(|(item, _)| *item);
        let mut scored: Vec<(f64, usize)> = candidates
            .into_iter()
            .map(|(item, dot)| (dot as f64 / (query_norm * table.items[item].norm), item))
            .collect();
        sort_best_first(&mut scored);

        if self.options.scorer != Scorer::Cosine {
            scored.truncate(self.options.rescore_window.max(1));
            for (score, item) in scored.iter_mut() {
                *score = self.rescore(*score, &table.items[*item].lowered, lowered);
            }
            sort_best_first(&mut scored);
        }

        scored
            .into_iter()
            .filter(|(score, _)| *score >= min_score)
            .filter_map(|(score, item)| {
                self.exact
                    .get(&table.items[item].lowered)
                    .map(|title| FuzzyMatch {
                        score,
                        title: title.clone(),
                    })
            })
            .collect()
    }

    fn rescore(&self, cosine: f64, candidate: &str, query: &str) -> f64 {
        match self.options.scorer {
            Scorer::JaroWinkler => {
                jaro_winkler::normalized_similarity(candidate.chars(), query.chars())
            }
            Scorer::Levenshtein => {
                levenshtein::normalized_similarity(candidate.chars(), query.chars())
            }
            Scorer::Cosine => cosine,
        }
    }
}

fn build_table(values: &[String], gram_size: usize) -> GramTable {
    let counted: Vec<HashMap<String, u32>> = values
        .par_iter()
        .map(|value| gram_counts(value, gram_size))
        .collect();

    let mut table = GramTable::default();
    for (index, (value, counts)) in values.iter().zip(counted).enumerate() {
        let mut sum_of_squares = 0u64;
        for (gram, count) in counts {
            sum_of_squares += u64::from(count) * u64::from(count);
            table.postings.entry(gram).or_default().push((index, count));
        }
        table.items.push(IndexedItem {
            norm: (sum_of_squares as f64).sqrt(),
            lowered: value.clone(),
        });
    }
    table
}

/// Stable, so equal scores keep catalog order.
fn sort_best_first(scored: &mut [(f64, usize)]) {
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));
}

fn simplify(value: &str) -> String {
    value
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == ',' || *c == ' ')
        .collect()
}

fn grams(value: &str, gram_size: usize) -> Vec<String> {
    let mut padded: Vec<char> = Vec::with_capacity(value.len() + 2);
    padded.push(PAD);
    padded.extend(simplify(value).chars());
    padded.push(PAD);
    while padded.len() < gram_size {
        padded.push(PAD);
    }
    padded
        .windows(gram_size)
        .map(|window| window.iter().collect())
        .collect()
}

fn gram_counts(value: &str, gram_size: usize) -> HashMap<String, u32> {
    let mut counts = HashMap::new();
    for gram in grams(value, gram_size) {
        *counts.entry(gram).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(values: &[&str]) -> FuzzyIndex {
        FuzzyIndex::build(values.iter().copied(), FuzzyOptions::default())
    }

    #[test]
    fn grams_are_padded() {
        assert_eq!(grams("abc", 2), vec!["-a", "ab", "bc", "c-"]);
        assert_eq!(grams("", 3), vec!["---"]);
        assert_eq!(grams("a", 3), vec!["-a-"]);
    }

    #[test]
    fn simplify_drops_punctuation() {
        assert_eq!(simplify("Léon: The Pro!"), "léon the pro");
        assert_eq!(simplify("Alien, Part 2"), "alien, part 2");
    }

    #[test]
    fn exact_match_scores_one() {
        let idx = index(&["Amelie", "Amelie Poulain", "The Matrix"]);
        let matches = idx.get("amelie", 0.1);
        assert_eq!(matches[0].title, "Amelie");
        assert!((matches[0].score - 1.0).abs() < 1e-9);
        assert!(matches.iter().all(|m| m.title != "The Matrix"));
    }

    #[test]
    fn unrelated_query_returns_nothing() {
        let idx = index(&["Amelie", "Amelie Poulain", "The Matrix"]);
        assert!(idx.get("zzqx", 0.1).is_empty());
    }

    #[test]
    fn results_are_best_first() {
        let idx = index(&["Alien", "Aliens", "Alien Resurrection", "Predator"]);
        let matches = idx.get("alien", 0.1);
        assert!(!matches.is_empty());
        assert!(matches.windows(2).all(|w| w[0].score >= w[1].score));
        assert_eq!(matches[0].title, "Alien");
    }

    #[test]
    fn case_insensitive_duplicates_index_once() {
        let idx = index(&["Heat", "HEAT", "Heat"]);
        assert_eq!(idx.len(), 1);
        let matches = idx.get("heat", 0.1);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].title, "Heat");
    }

    #[test]
    fn empty_index_is_valid() {
        let idx = index(&[]);
        assert!(idx.is_empty());
        assert!(idx.get("anything", 0.1).is_empty());
    }

    #[test]
    fn cosine_scorer_keeps_gram_similarity() {
        let idx = FuzzyIndex::build(
            ["Amelie", "Amelie Poulain"],
            FuzzyOptions {
                scorer: Scorer::Cosine,
                ..FuzzyOptions::default()
            },
        );
        let matches = idx.get("amelie", 0.1);
        assert_eq!(matches.len(), 2);
        assert!(matches[1].score < 0.6);
    }

    #[test]
    fn min_score_filters_weak_matches() {
        let idx = index(&["Amelie", "Amelie Poulain"]);
        let matches = idx.get("amelie", 0.99);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].title, "Amelie");
    }
}
