//! Word-by-word highlighting paced to the audio duration.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use readaloud_core::dom::NodeId;
use readaloud_core::highlight::{preload_markup, word_markup, words};

use crate::page::Page;
use crate::reader::SessionToken;
use crate::state::StateStore;

pub struct WordHighlighter {
    page: Arc<dyn Page>,
    state: StateStore,
}

impl WordHighlighter {
    pub fn new(page: Arc<dyn Page>, state: StateStore) -> Self {
        Self { page, state }
    }

    /// Mark the first word of `sentence` while its audio loads.
    pub fn highlight_first_word_before_load(
        &self,
        sentence: &str,
        element: NodeId,
        before: &str,
        to_read: &str,
        token: &SessionToken,
    ) {
        if words(sentence).is_empty() {
            return;
        }
        let markup = preload_markup(sentence, before, to_read);
        if self.page.set_markup_if(element, markup, &|| token.is_live()) {
            self.page.scroll_into_view(element);
        }
    }

    /// Advance the highlight one word every `duration / words`.
    ///
    /// Returns at once when reading is off or the sentence has no words, and
    /// when the reading flag turns false (after restoring the element). A
    /// word is only written while `token` is live, checked under the page
    /// lock; the first failed check ends the run. Once
    /// the last word is highlighted it never returns; the caller races it
    /// against playback.
    pub async fn run(
        &self,
        duration: Duration,
        sentence: &str,
        element: NodeId,
        before: &str,
        to_read: &str,
        token: &SessionToken,
    ) {
        if !self.state.reading() {
            return;
        }
        let words = words(sentence);
        if words.is_empty() {
            return;
        }

        self.page.clear_highlights();
        self.page.scroll_into_view(element);

        let step = (duration / words.len() as u32).max(Duration::from_millis(1));
        let mut interval = tokio::time::interval(step);
        let mut reading = self.state.watch_reading();
        reading.borrow_and_update();
        let mut index = 0;

        loop {
            tokio::select! {
                biased;

                changed = reading.changed() => {
                    if changed.is_err() || !*reading.borrow_and_update() {
                        debug!("reading stopped, clearing highlights");
                        if token.is_current() {
                            self.page.clear_highlights();
                        }
                        self.page.restore(element);
                        return;
                    }
                }
                _ = interval.tick(), if index < words.len() => {
                    // Liveness is checked under the page lock.
                    let markup = word_markup(sentence, index, before, to_read);
                    if !self.page.set_markup_if(element, markup, &|| token.is_live()) {
                        return;
                    }
                    index += 1;
                }
            }
        }
    }
}
