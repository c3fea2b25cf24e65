use crate::catalog::CatalogEntry;
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};

const LINK_UNSAFE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Builds deep links into a paginated catalog export.
///
/// Page `0` is `./<stem><ext>`, later pages are `./<stem>_<page><ext>`, and
/// the fragment targets the entry anchor (`#movie_<id>` / `#tvshow_<id>`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageLinker {
    stem: String,
    extension: String,
}

impl Default for PageLinker {
    fn default() -> Self {
        Self::new("index", ".html")
    }
}

impl PageLinker {
    pub fn new(stem: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            stem: stem.into(),
            extension: extension.into(),
        }
    }

    pub fn href(&self, entry: &CatalogEntry) -> String {
        let page = if entry.page == 0 {
            String::new()
        } else {
            format!("_{}", entry.page)
        };
        format!(
            "./{stem}{page}{ext}#{kind}_{id}",
            stem = utf8_percent_encode(&self.stem, LINK_UNSAFE),
            ext = utf8_percent_encode(&self.extension, LINK_UNSAFE),
            kind = entry.kind.anchor_prefix(),
            id = utf8_percent_encode(&entry.id, LINK_UNSAFE),
        )
    }
}
