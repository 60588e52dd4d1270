//! Reading session controller.
//!
//! A session reads one element segment by segment, then chains to the next
//! readable element until the document ends or the session is preempted.
//!
//! Generation-based cancellation: every `process_element` bumps an
//! [`AtomicU64`]; work holding a [`SessionToken`] for an older generation
//! stops at its next check. `pause` and `cancel_all_reading_operations`
//! raise the cancel flag instead, which the next `process_element` lowers.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Notify, OnceCell};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use readaloud_core::dom::NodeId;
use readaloud_core::text_prep::{head_until, preview, split_long_sentence, tail_from};
use readaloud_core::types::PipelineConfig;

use crate::audio::AudioManager;
use crate::highlighter::WordHighlighter;
use crate::page::Page;
use crate::player::Player;
use crate::state::{StateStore, Subscription};

/// Elements preloaded past the current one when its last segment starts.
const LOOKAHEAD_ELEMENTS: usize = 2;

struct Signals {
    generation: AtomicU64,
    should_cancel: AtomicBool,
    /// Woken on every preemption, pause, or cancel.
    wake: Notify,
}

/// Handed to everything a session spawns or awaits.
#[derive(Clone)]
pub struct SessionToken {
    signals: Arc<Signals>,
    state: StateStore,
    id: u64,
}

impl SessionToken {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// No newer session has started.
    pub fn is_current(&self) -> bool {
        self.signals.generation.load(Ordering::SeqCst) == self.id
    }

    /// Current, not cancelled, and the reading flag is on.
    pub fn is_live(&self) -> bool {
        self.is_current()
            && !self.signals.should_cancel.load(Ordering::SeqCst)
            && self.state.reading()
    }

    /// Resolves once the session is no longer live.
    pub async fn cancelled(&self) {
        let mut reading = self.state.watch_reading();
        loop {
            let notified = self.signals.wake.notified();
            if !self.is_live() {
                return;
            }
            tokio::select! {
                _ = notified => {}
                changed = reading.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

/// A started (or refused) session.
pub struct SessionHandle {
    id: u64,
    task: Option<JoinHandle<()>>,
}

impl SessionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// `false` when reading was off and nothing was started.
    pub fn is_started(&self) -> bool {
        self.task.is_some()
    }

    /// Wait for the session to end, including every chained element.
    pub async fn wait(self) {
        if let Some(task) = self.task {
            if let Err(e) = task.await {
                warn!("session {} task failed: {e}", self.id);
            }
        }
    }
}

struct Shared {
    audio: AudioManager,
    page: Arc<dyn Page>,
    player: Arc<dyn Player>,
    state: StateStore,
    highlighter: WordHighlighter,
    config: PipelineConfig,
    signals: Arc<Signals>,
    current_element: Mutex<Option<NodeId>>,
    current_session: Mutex<Option<u64>>,
    subscription: Mutex<Option<Subscription>>,
    initialized: OnceCell<()>,
}

/// Cloneable handle to the session controller.
#[derive(Clone)]
pub struct Reader {
    shared: Arc<Shared>,
}

impl Reader {
    pub fn new(
        audio: AudioManager,
        page: Arc<dyn Page>,
        player: Arc<dyn Player>,
        state: StateStore,
        config: PipelineConfig,
    ) -> Self {
        let highlighter = WordHighlighter::new(page.clone(), state.clone());
        Self {
            shared: Arc::new(Shared {
                audio,
                page,
                player,
                state,
                highlighter,
                config,
                signals: Arc::new(Signals {
                    generation: AtomicU64::new(0),
                    should_cancel: AtomicBool::new(false),
                    wake: Notify::new(),
                }),
                current_element: Mutex::new(None),
                current_session: Mutex::new(None),
                subscription: Mutex::new(None),
                initialized: OnceCell::new(),
            }),
        }
    }

    async fn ensure_initialized(&self) {
        self.shared
            .initialized
            .get_or_init(|| async {
                self.shared.audio.ensure_initialized().await;
                self.init_reading_subscription();
            })
            .await;
    }

    /// Pause the session whenever the reading flag turns false. Idempotent.
    pub fn init_reading_subscription(&self) {
        let mut slot = self.shared.subscription.lock();
        if slot.is_some() {
            return;
        }
        let weak = Arc::downgrade(&self.shared);
        *slot = Some(self.shared.state.on_reading(move |reading| {
            if reading {
                return;
            }
            if let Some(shared) = weak.upgrade() {
                Reader { shared }.pause();
            }
        }));
    }

    fn token(&self, id: u64) -> SessionToken {
        SessionToken {
            signals: self.shared.signals.clone(),
            state: self.shared.state.clone(),
            id,
        }
    }

    pub fn current_element(&self) -> Option<NodeId> {
        *self.shared.current_element.lock()
    }

    pub fn is_session_active(&self) -> bool {
        self.shared.current_session.lock().is_some()
    }

    /// Start reading `element` from character `offset`, preempting whatever
    /// session is running. Does nothing (beyond the preemption) when reading
    /// is off.
    pub async fn process_element(&self, element: NodeId, offset: usize) -> SessionHandle {
        self.ensure_initialized().await;

        let id = self.preempt(element);
        if !self.shared.state.reading() {
            debug!("not reading, session {id} not started");
            return SessionHandle { id, task: None };
        }

        *self.shared.current_session.lock() = Some(id);
        info!("session {id}: reading element {} from offset {offset}", element.0);

        let this = self.clone();
        let token = self.token(id);
        let task = tokio::spawn(async move { this.run_session(element, offset, token).await });
        SessionHandle {
            id,
            task: Some(task),
        }
    }

    /// Invalidate the running session and arm a new generation.
    fn preempt(&self, element: NodeId) -> u64 {
        let signals = &self.shared.signals;
        signals.should_cancel.store(true, Ordering::SeqCst);
        let id = signals.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.shared.current_element.lock() = Some(element);
        self.shared.player.stop();
        signals.wake.notify_waiters();
        signals.should_cancel.store(false, Ordering::SeqCst);
        id
    }

    async fn run_session(&self, first: NodeId, offset: usize, token: SessionToken) {
        let mut element = first;
        let mut offset = offset;

        loop {
            let next = self.shared.page.next_readable(element);
            self.play_element(element, offset, next, &token).await;
            if !token.is_live() {
                break;
            }

            self.shared.player.stop();
            let Some(next) = next else {
                info!("session {}: end of document", token.id());
                break;
            };
            *self.shared.current_element.lock() = Some(next);
            element = next;
            offset = 0;
        }

        let mut current = self.shared.current_session.lock();
        if *current == Some(token.id()) {
            *current = None;
        }
    }

    fn segments(&self, text: &str) -> Vec<String> {
        split_long_sentence(text, self.shared.config.min_chars, self.shared.config.max_chars)
    }

    async fn play_element(
        &self,
        element: NodeId,
        offset: usize,
        next: Option<NodeId>,
        token: &SessionToken,
    ) {
        if !token.is_live() {
            return;
        }

        let text = self.shared.page.text_content(element);
        let before = head_until(&text, offset);
        let to_read = tail_from(&text, offset);
        let segments = self.segments(to_read);
        debug!("element {}: {} segments", element.0, segments.len());

        for segment in &segments {
            self.shared.audio.preload(segment);
        }
        self.shared.page.clear_highlights();

        for (i, segment) in segments.iter().enumerate() {
            if !token.is_live() {
                break;
            }

            self.shared
                .highlighter
                .highlight_first_word_before_load(segment, element, before, to_read, token);
            if i + 1 == segments.len() {
                self.preload_lookahead(next);
            }

            self.play_segment(segment, element, before, to_read, token).await;

            tokio::select! {
                _ = tokio::time::sleep(self.shared.config.segment_gap) => {}
                _ = token.cancelled() => break,
            }
        }

        if token.is_current() {
            self.shared.player.detach();
        }
    }

    /// Preload the segments of `next` and the element after it.
    fn preload_lookahead(&self, mut next: Option<NodeId>) {
        let page = &self.shared.page;
        for _ in 0..LOOKAHEAD_ELEMENTS {
            let Some(el) = next else { break };
            for segment in self.segments(&page.text_content(el)) {
                self.shared.audio.preload(&segment);
            }
            next = page.next_readable(el);
        }
    }

    async fn play_segment(
        &self,
        segment: &str,
        element: NodeId,
        before: &str,
        to_read: &str,
        token: &SessionToken,
    ) {
        let player = &self.shared.player;
        player.attach();

        let audio = tokio::select! {
            audio = self.shared.audio.get_audio(segment, false) => audio,
            _ = token.cancelled() => return,
        };
        let Some(audio) = audio else {
            debug!("no audio, skipping: {}", preview(segment));
            return;
        };
        if !token.is_live() {
            return;
        }

        let duration = tokio::select! {
            loaded = player.load(audio) => match loaded {
                Ok(duration) => duration,
                Err(e) => {
                    warn!("media error, skipping {}: {e}", preview(segment));
                    return;
                }
            },
            _ = token.cancelled() => return,
        };
        if !token.is_live() {
            return;
        }

        let highlight = self
            .shared
            .highlighter
            .run(duration, segment, element, before, to_read, token);

        // The highlighter goes first so a stop restores the element.
        tokio::select! {
            biased;

            _ = highlight => {}
            played = player.play() => {
                if let Err(e) = played {
                    debug!("playback ended early: {e}");
                }
            }
            _ = token.cancelled() => {}
        }
    }

    /// Stop the running session. The reading flag is left alone.
    pub fn pause(&self) {
        let signals = &self.shared.signals;
        signals.should_cancel.store(true, Ordering::SeqCst);
        self.shared.player.stop();
        *self.shared.current_session.lock() = None;
        signals.wake.notify_waiters();
    }

    /// Turn reading off and tear down playback.
    pub fn cancel_all_reading_operations(&self) {
        self.shared.signals.should_cancel.store(true, Ordering::SeqCst);
        self.shared.state.set_reading(false);
        self.shared.player.stop();
        self.shared.player.detach();
        *self.shared.current_session.lock() = None;
        self.shared.signals.wake.notify_waiters();
    }

    /// Everything `cancel_all_reading_operations` does, plus highlights and
    /// outstanding fetches.
    pub fn clear_previous_session(&self) {
        self.cancel_all_reading_operations();
        self.shared.page.clear_highlights();
        self.shared.audio.abort_all();
        self.shared.player.detach();
    }

    /// Drop the previous session, turn reading on, and read `element` from
    /// character `offset`.
    pub async fn start_reading(&self, element: NodeId, offset: usize) -> SessionHandle {
        self.clear_previous_session();
        self.shared.state.set_reading(true);
        self.process_element(element, offset).await
    }
}
