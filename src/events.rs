//! Event delivery for a catalog page.
//!
//! Events are handled one at a time, each to completion, before the next one
//! is pulled from the source. A keystroke therefore never observes a half
//! rendered answers list from the previous one, and nothing is cancelled.

use crate::lazy::Viewport;
use crate::page::{CatalogPage, PageError};
use std::collections::VecDeque;
use tracing::trace;

#[derive(Debug, Clone, PartialEq)]
pub enum PageEvent {
    /// Document finished loading.
    Load,
    /// Key released in the search field; carries the field's full text.
    KeyUp(String),
    /// The visible region moved or resized.
    Viewport(Viewport),
}

pub trait EventSource {
    fn next_event(&mut self) -> Option<PageEvent>;
}

impl EventSource for VecDeque<PageEvent> {
    fn next_event(&mut self) -> Option<PageEvent> {
        self.pop_front()
    }
}

/// Adapts any iterator of events.
#[derive(Debug, Clone)]
pub struct IterSource<I>(pub I);

impl<I> EventSource for IterSource<I>
where
    I: Iterator<Item = PageEvent>,
{
    fn next_event(&mut self) -> Option<PageEvent> {
        self.0.next()
    }
}

/// Load followed by one keyup per typed character, as a user typing `text`
/// into an empty search field would produce.
pub fn typing(text: &str) -> VecDeque<PageEvent> {
    let mut events = VecDeque::with_capacity(text.chars().count() + 1);
    events.push_back(PageEvent::Load);
    let mut typed = String::new();
    for c in text.chars() {
        typed.push(c);
        events.push_back(PageEvent::KeyUp(typed.clone()));
    }
    events
}

pub struct EventLoop<S> {
    source: S,
    dispatched: usize,
}

impl<S: EventSource> EventLoop<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            dispatched: 0,
        }
    }

    pub fn dispatched(&self) -> usize {
        self.dispatched
    }

    /// Drains the source into `page`. Stops at the first handler error.
    pub fn run(&mut self, page: &mut CatalogPage) -> Result<usize, PageError> {
        let start = self.dispatched;
        while let Some(event) = self.source.next_event() {
            trace!(?event, "dispatching");
            page.dispatch(event)?;
            self.dispatched += 1;
        }
        Ok(self.dispatched - start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typing_builds_progressive_keyups() {
        let events: Vec<_> = typing("héat").into_iter().collect();
        assert_eq!(
            events,
            vec![
                PageEvent::Load,
                PageEvent::KeyUp("h".to_string()),
                PageEvent::KeyUp("hé".to_string()),
                PageEvent::KeyUp("héa".to_string()),
                PageEvent::KeyUp("héat".to_string()),
            ]
        );
    }

    #[test]
    fn iter_source_yields_in_order() {
        let mut source = IterSource(vec![PageEvent::Load].into_iter());
        assert_eq!(source.next_event(), Some(PageEvent::Load));
        assert_eq!(source.next_event(), None);
    }
}
