use crate::SearchConfig;
use crate::catalog::{Catalog, CatalogEntry, CatalogError, ID_ATTR, TITLE_ATTR};
use crate::document::{Document, NodeId};
use crate::events::PageEvent;
use crate::lazy::{LazyImageLoader, Layout, StackedLayout, Viewport};
use crate::presentation::{DomContract, PresentationToggler};
use crate::session::{DisplayMode, QueryOutcome, SearchSession};
use std::fmt;
use tracing::{debug, info, warn};

/// Row height used when no layout has been supplied.
pub const DEFAULT_ROW_HEIGHT: f64 = 300.0;

#[derive(Debug)]
pub enum PageError {
    MissingElement(String),
    Catalog(CatalogError),
}

impl fmt::Display for PageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageError::MissingElement(id) => write!(f, "no element with id {id:?}"),
            PageError::Catalog(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for PageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PageError::MissingElement(_) => None,
            PageError::Catalog(err) => Some(err),
        }
    }
}

impl From<CatalogError> for PageError {
    fn from(value: CatalogError) -> Self {
        PageError::Catalog(value)
    }
}

struct Loaded {
    session: SearchSession,
    toggler: PresentationToggler,
}

/// A catalog page with its search workflow wired in.
///
/// Nothing is indexed until the load event; keystrokes that arrive earlier
/// are ignored.
pub struct CatalogPage {
    document: Document,
    contract: DomContract,
    config: SearchConfig,
    loader: LazyImageLoader,
    layout: Option<Box<dyn Layout + Send + Sync>>,
    loaded: Option<Loaded>,
    mode: DisplayMode,
    last_outcome: Option<QueryOutcome>,
}

impl CatalogPage {
    pub fn new(document: Document, contract: DomContract, config: SearchConfig) -> Self {
        Self {
            document,
            contract,
            config,
            loader: LazyImageLoader::default(),
            layout: None,
            loaded: None,
            mode: DisplayMode::Browse,
            last_outcome: None,
        }
    }

    pub fn parse(markup: &str, contract: DomContract, config: SearchConfig) -> Self {
        Self::new(Document::parse(markup), contract, config)
    }

    pub fn with_layout(mut self, layout: impl Layout + Send + Sync + 'static) -> Self {
        self.layout = Some(Box::new(layout));
        self
    }

    pub fn with_loader(mut self, loader: LazyImageLoader) -> Self {
        self.loader = loader;
        self
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn mode(&self) -> DisplayMode {
        self.mode
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.is_some()
    }

    pub fn session(&self) -> Option<&SearchSession> {
        self.loaded.as_ref().map(|loaded| &loaded.session)
    }

    pub fn loader(&self) -> &LazyImageLoader {
        &self.loader
    }

    pub fn last_outcome(&self) -> Option<&QueryOutcome> {
        self.last_outcome.as_ref()
    }

    pub fn answers_container(&self) -> Option<NodeId> {
        self.loaded.as_ref().map(|loaded| loaded.toggler.answers())
    }

    pub fn answers_html(&self) -> String {
        self.answers_container()
            .map(|node| self.document.inner_html(node))
            .unwrap_or_default()
    }

    pub fn dispatch(&mut self, event: PageEvent) -> Result<(), PageError> {
        match event {
            PageEvent::Load => self.on_load(),
            PageEvent::KeyUp(value) => {
                self.on_keyup(&value);
                Ok(())
            }
            PageEvent::Viewport(viewport) => {
                self.on_viewport(&viewport);
                Ok(())
            }
        }
    }

    /// Scans catalog entries under the browse container, builds the search
    /// session, and starts observing deferred images.
    pub fn on_load(&mut self) -> Result<(), PageError> {
        let toggler = PresentationToggler::attach(&self.document, &self.contract)?;
        toggler.set_mode(&mut self.document, DisplayMode::Browse);
        let entries: Vec<CatalogEntry> = self
            .document
            .descendants(toggler.browse())
            .into_iter()
            .filter(|node| {
                self.document.attr(*node, TITLE_ATTR).is_some()
                    && self.document.attr(*node, ID_ATTR).is_some()
            })
            .filter_map(|node| CatalogEntry::from_attrs(|name| self.document.attr(node, name)))
            .collect();
        let session = SearchSession::build(Catalog::new(entries), self.config.clone())?;
        let observed = self.loader.observe_all(&self.document);
        info!(
            entries = session.catalog().len(),
            deferred_images = observed,
            "catalog page loaded"
        );
        self.mode = DisplayMode::Browse;
        self.last_outcome = None;
        self.loaded = Some(Loaded { session, toggler });
        Ok(())
    }

    /// Observes deferred images added since load. Returns how many are new.
    pub fn observe_images(&mut self) -> usize {
        self.loader.observe_all(&self.document)
    }

    /// Runs one full normalize, query, filter and render cycle for the
    /// current text of the search field.
    pub fn on_keyup(&mut self, value: &str) -> Option<&QueryOutcome> {
        let Some(loaded) = self.loaded.as_ref() else {
            warn!("keyup before load ignored");
            return None;
        };
        if let Some(input) = self.document.element_by_id(&self.contract.input_id) {
            self.document.set_attr(input, "value", value);
        }
        let outcome = loaded.session.query(value);
        loaded.toggler.set_mode(&mut self.document, outcome.mode);
        if outcome.mode == DisplayMode::SearchResults {
            let rendered = loaded
                .toggler
                .render_answers(&mut self.document, &outcome.answers);
            debug!(query = %outcome.query, rendered, "answers rendered");
        }
        self.mode = outcome.mode;
        self.last_outcome = Some(outcome);
        self.last_outcome.as_ref()
    }

    /// Resolves deferred images that came within range of `viewport`.
    pub fn on_viewport(&mut self, viewport: &Viewport) -> Vec<NodeId> {
        if !self.is_loaded() {
            warn!("viewport change before load ignored");
            return Vec::new();
        }
        if self.layout.is_none() {
            self.layout = Some(Box::new(StackedLayout::new(
                self.loader.observed(),
                DEFAULT_ROW_HEIGHT,
            )));
        }
        match self.layout.as_deref() {
            Some(layout) => self
                .loader
                .on_intersection(&mut self.document, layout, viewport),
            None => Vec::new(),
        }
    }
}
