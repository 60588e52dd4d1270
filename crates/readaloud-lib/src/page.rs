//! The page a session reads from.

use std::sync::Arc;

use parking_lot::Mutex;

use readaloud_core::dom::{Document, NodeId};

/// Operations the reader and highlighter need from the rendered page.
pub trait Page: Send + Sync {
    fn text_content(&self, element: NodeId) -> String;

    /// Next readable element after `element` in document order.
    fn next_readable(&self, element: NodeId) -> Option<NodeId>;

    /// First readable element at or below `element`.
    fn first_readable(&self, element: NodeId) -> Option<NodeId>;

    fn readable_elements(&self) -> Vec<NodeId>;

    fn set_markup(&self, element: NodeId, markup: String);

    /// [`set_markup`](Self::set_markup), but only if `live()` still holds
    /// once the page is locked. Returns whether the markup was written.
    fn set_markup_if(&self, element: NodeId, markup: String, live: &dyn Fn() -> bool) -> bool;

    /// Put the element's original content back.
    fn restore(&self, element: NodeId);

    fn scroll_into_view(&self, element: NodeId);

    /// Unwrap every highlight span on the page.
    fn clear_highlights(&self);
}

/// [`Page`] over an in-memory [`Document`].
#[derive(Clone, Default)]
pub struct SharedDocument {
    doc: Arc<Mutex<Document>>,
    scrolled: Arc<Mutex<Vec<NodeId>>>,
}

impl SharedDocument {
    pub fn new(doc: Document) -> Self {
        Self {
            doc: Arc::new(Mutex::new(doc)),
            scrolled: Arc::default(),
        }
    }

    pub fn from_paragraphs(text: &str) -> Self {
        Self::new(Document::from_paragraphs(text))
    }

    /// Run `f` with the document locked.
    pub fn with<R>(&self, f: impl FnOnce(&Document) -> R) -> R {
        f(&self.doc.lock())
    }

    pub fn markup(&self, element: NodeId) -> String {
        self.doc.lock().markup(element)
    }

    pub fn has_highlights(&self) -> bool {
        self.doc.lock().has_highlights()
    }

    /// Elements scrolled into view so far, oldest first.
    pub fn scroll_history(&self) -> Vec<NodeId> {
        self.scrolled.lock().clone()
    }

    pub fn last_scrolled(&self) -> Option<NodeId> {
        self.scrolled.lock().last().copied()
    }
}

impl Page for SharedDocument {
    fn text_content(&self, element: NodeId) -> String {
        let doc = self.doc.lock();
        if doc.contains(element) {
            doc.text_content(element)
        } else {
            String::new()
        }
    }

    fn next_readable(&self, element: NodeId) -> Option<NodeId> {
        self.doc.lock().find_next_text_node(element)
    }

    fn first_readable(&self, element: NodeId) -> Option<NodeId> {
        self.doc.lock().find_first_text_node(element)
    }

    fn readable_elements(&self) -> Vec<NodeId> {
        self.doc.lock().readable_elements()
    }

    fn set_markup(&self, element: NodeId, markup: String) {
        let mut doc = self.doc.lock();
        if doc.contains(element) {
            doc.set_markup(element, markup);
        }
    }

    fn set_markup_if(&self, element: NodeId, markup: String, live: &dyn Fn() -> bool) -> bool {
        let mut doc = self.doc.lock();
        if !doc.contains(element) || !live() {
            return false;
        }
        doc.set_markup(element, markup);
        true
    }

    fn restore(&self, element: NodeId) {
        let mut doc = self.doc.lock();
        if doc.contains(element) {
            doc.restore(element);
        }
    }

    fn scroll_into_view(&self, element: NodeId) {
        let mut scrolled = self.scrolled.lock();
        if scrolled.last() != Some(&element) {
            scrolled.push(element);
        }
    }

    fn clear_highlights(&self) {
        self.doc.lock().clear_highlights();
    }
}
