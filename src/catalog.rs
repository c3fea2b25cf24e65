use crate::normalize::normalize_title;
use fst::automaton::Str;
use fst::{Automaton, IntoStreamer, Map, Streamer};
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::Cursor;
use std::path::Path;
use tracing::{debug, warn};
use zstd::stream::decode_all;

pub const TITLE_ATTR: &str = "data-title";
pub const ID_ATTR: &str = "data-id";
pub const KIND_ATTR: &str = "data-kind";
pub const PAGE_ATTR: &str = "data-page";

static ENTRY_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("[data-title][data-id]").expect("valid entry selector"));

#[derive(Debug, Clone, Copy, Eq, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    #[default]
    Movie,
    #[serde(alias = "tv", alias = "tv_show")]
    TvShow,
}

impl MediaKind {
    /// Prefix used for the entry anchor on a catalog page.
    pub fn anchor_prefix(&self) -> &'static str {
        match self {
            MediaKind::Movie => "movie",
            MediaKind::TvShow => "tvshow",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "movie" | "m" => Some(MediaKind::Movie),
            "tvshow" | "tv" | "tv_show" | "t" => Some(MediaKind::TvShow),
            _ => None,
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.anchor_prefix())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogEntry {
    pub id: String,
    pub title: String,
    pub normalized_title: String,
    pub kind: MediaKind,
    /// Catalog page the entry lives on; `0` is the first page.
    pub page: u32,
}

impl CatalogEntry {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        let title = title.into();
        Self {
            id: id.into(),
            normalized_title: normalize_title(&title),
            title,
            kind: MediaKind::default(),
            page: 0,
        }
    }

    pub fn with_kind(mut self, kind: MediaKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.page = page;
        self
    }

    /// Builds an entry from element attributes; `None` when title or id is missing.
    pub fn from_attrs<'a>(mut attr: impl FnMut(&str) -> Option<&'a str>) -> Option<Self> {
        let title = attr(TITLE_ATTR)?;
        let id = attr(ID_ATTR)?;
        let mut entry = CatalogEntry::new(id, title);
        if let Some(raw) = attr(KIND_ATTR) {
            match MediaKind::parse(raw) {
                Some(kind) => entry.kind = kind,
                None => warn!(id = %entry.id, kind = raw, "ignoring unknown media kind"),
            }
        }
        if let Some(raw) = attr(PAGE_ATTR) {
            match raw.trim().parse() {
                Ok(page) => entry.page = page,
                Err(_) => warn!(id = %entry.id, page = raw, "ignoring malformed page number"),
            }
        }
        Some(entry)
    }
}

#[derive(Debug)]
pub enum CatalogError {
    Io(std::io::Error),
    Json(serde_json::Error),
    Index(fst::Error),
    UnsupportedFormat(String),
}

impl fmt::Display for CatalogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogError::Io(err) => write!(f, "io error: {err}"),
            CatalogError::Json(err) => write!(f, "invalid catalog json: {err}"),
            CatalogError::Index(err) => write!(f, "failed to build title lookup: {err}"),
            CatalogError::UnsupportedFormat(path) => {
                write!(f, "unsupported catalog format: {path}")
            }
        }
    }
}

impl std::error::Error for CatalogError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CatalogError::Io(err) => Some(err),
            CatalogError::Json(err) => Some(err),
            CatalogError::Index(err) => Some(err),
            CatalogError::UnsupportedFormat(_) => None,
        }
    }
}

impl From<std::io::Error> for CatalogError {
    fn from(value: std::io::Error) -> Self {
        CatalogError::Io(value)
    }
}

impl From<serde_json::Error> for CatalogError {
    fn from(value: serde_json::Error) -> Self {
        CatalogError::Json(value)
    }
}

impl From<fst::Error> for CatalogError {
    fn from(value: fst::Error) -> Self {
        CatalogError::Index(value)
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(u64),
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    id: RawId,
    title: String,
    #[serde(default)]
    kind: MediaKind,
    #[serde(default)]
    page: u32,
}

impl From<RawEntry> for CatalogEntry {
    fn from(raw: RawEntry) -> Self {
        let id = match raw.id {
            RawId::Text(text) => text,
            RawId::Number(number) => number.to_string(),
        };
        CatalogEntry::new(id, raw.title)
            .with_kind(raw.kind)
            .with_page(raw.page)
    }
}

/// Ordered catalog entries, in document order.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
}

impl Catalog {
    pub fn new(entries: Vec<CatalogEntry>) -> Self {
        Self { entries }
    }

    /// Loads a catalog by file extension: `.html`/`.htm`, `.json`, or
    /// zstd-compressed JSON (`.zst`).
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .unwrap_or_default();
        let catalog = match extension.as_str() {
            "html" | "htm" => Self::from_html(&fs::read_to_string(path)?),
            "json" => Self::from_json_slice(&fs::read(path)?)?,
            "zst" => {
                let bytes = fs::read(path)?;
                Self::from_json_slice(&decode_all(Cursor::new(bytes))?)?
            }
            _ => return Err(CatalogError::UnsupportedFormat(path.display().to_string())),
        };
        debug!(path = %path.display(), entries = catalog.len(), "loaded catalog");
        Ok(catalog)
    }

    /// Scans markup for elements carrying both `data-title` and `data-id`.
    pub fn from_html(markup: &str) -> Self {
        let document = Html::parse_document(markup);
        let entries = document
            .select(&ENTRY_SELECTOR)
            .filter_map(|element| CatalogEntry::from_attrs(|name| element.value().attr(name)))
            .collect();
        Self { entries }
    }

    pub fn from_json_slice(bytes: &[u8]) -> Result<Self, CatalogError> {
        let raw: Vec<RawEntry> = serde_json::from_slice(bytes)?;
        Ok(Self {
            entries: raw.into_iter().map(CatalogEntry::from).collect(),
        })
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn get(&self, position: usize) -> Option<&CatalogEntry> {
        self.entries.get(position)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn normalized_titles(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.iter().map(|entry| entry.normalized_title.as_str())
    }
}

/// Normalized title -> catalog position. Duplicate titles resolve to the
/// last entry carrying them.
#[derive(Debug, Clone)]
pub struct TitleLookup {
    map: Map<Vec<u8>>,
}

impl TitleLookup {
    pub fn build<'a, I>(normalized_titles: I) -> Result<Self, CatalogError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut sorted: BTreeMap<&str, u64> = BTreeMap::new();
        for (position, title) in normalized_titles.into_iter().enumerate() {
            sorted.insert(title, position as u64);
        }
        let map = Map::from_iter(sorted)?;
        Ok(Self { map })
    }

    pub fn get(&self, normalized_title: &str) -> Option<usize> {
        self.map.get(normalized_title).map(|value| value as usize)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Returns up to `limit` titles that start with `prefix`, in byte order.
    pub fn prefix(&self, prefix: &str, limit: usize) -> Vec<(String, usize)> {
        let automaton = Str::new(prefix).starts_with();
        let mut stream = self.map.search(automaton).into_stream();
        let mut results = Vec::new();
        while let Some((key, value)) = stream.next() {
            if results.len() >= limit {
                break;
            }
            results.push((String::from_utf8_lossy(key).into_owned(), value as usize));
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><body>
        <div id="catalog">
          <div id="m1" data-id="m1" data-title="Amélie" data-page="2"><h2>Amélie</h2></div>
          <div id="m2" data-id="m2" data-title="The Matrix" data-kind="tvshow"></div>
          <div data-title="No id"></div>
        </div></body></html>"#;

    #[test]
    fn html_entries_follow_document_order() {
        let catalog = Catalog::from_html(PAGE);
        assert_eq!(catalog.len(), 2);
        let first = &catalog.entries()[0];
        assert_eq!(first.id, "m1");
        assert_eq!(first.normalized_title, "Amelie");
        assert_eq!(first.page, 2);
        assert_eq!(catalog.entries()[1].kind, MediaKind::TvShow);
    }

    #[test]
    fn json_accepts_numeric_ids() {
        let json = r#"[{"id": 7, "title": "Léon", "kind": "tvshow", "page": 1}, {"id": "x", "title": "Heat"}]"#;
        let catalog = Catalog::from_json_slice(json.as_bytes()).unwrap();
        assert_eq!(catalog.entries()[0].id, "7");
        assert_eq!(catalog.entries()[0].normalized_title, "Leon");
        assert_eq!(catalog.entries()[0].kind, MediaKind::TvShow);
        assert_eq!(catalog.entries()[1].page, 0);
    }

    #[test]
    fn compressed_json_round_trips_through_disk() {
        let dir = std::env::temp_dir().join(format!("fuzzy-catalog-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("catalog.json.zst");
        let json = br#"[{"id": "1", "title": "Heat"}]"#;
        let compressed = zstd::stream::encode_all(Cursor::new(&json[..]), 3).unwrap();
        std::fs::write(&path, compressed).unwrap();
        let catalog = Catalog::from_path(&path).unwrap();
        assert_eq!(catalog.entries()[0].title, "Heat");
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let err = Catalog::from_path("catalog.xml").unwrap_err();
        assert!(matches!(err, CatalogError::UnsupportedFormat(_)));
    }

    #[test]
    fn lookup_last_write_wins() {
        let lookup = TitleLookup::build(["Alien", "Heat", "Alien"]).unwrap();
        assert_eq!(lookup.len(), 2);
        assert_eq!(lookup.get("Alien"), Some(2));
        assert_eq!(lookup.get("Heat"), Some(1));
        assert_eq!(lookup.get("alien"), None);
    }

    #[test]
    fn lookup_prefix_is_sorted_and_limited() {
        let lookup = TitleLookup::build(["Alien", "Aliens", "Heat", "Alien 3"]).unwrap();
        let rows = lookup.prefix("Alien", 2);
        assert_eq!(
            rows,
            vec![("Alien".to_string(), 0), ("Alien 3".to_string(), 3)]
        );
    }

    #[test]
    fn empty_catalog_builds_empty_lookup() {
        let lookup = TitleLookup::build(std::iter::empty()).unwrap();
        assert!(lookup.is_empty());
    }
}
