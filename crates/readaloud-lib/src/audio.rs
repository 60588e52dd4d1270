//! Audio cache and serialized fetch queue.
//!
//! ```text
//! get_audio(text) → cache hit? ─────────────────────────────► Some(bytes)
//!                 → placeholder? → wait (notify | reading | tick)
//!                 → enqueue → process_queue (one fetch at a time)
//!                       → fetch_audio: select!(token.cancelled(), timeout(synthesize))
//!                       → Ok: save + notify   Err: retry at front | give up
//! ```
//!
//! Lock order is always `queue` before `cache`. No lock is held across an
//! `.await`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{Notify, OnceCell, oneshot};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use readaloud_core::text_prep::preview;
use readaloud_core::types::{PipelineConfig, QueueStats, TtsSettings};

use crate::client::{FetchError, SpeechApi};
use crate::settings::SettingsStore;
use crate::state::StateStore;

// ─── Cache ─────────────────────────────────────────────────────────────────

/// Bounded LRU of synthesized audio keyed by segment text, plus the set of
/// texts with a fetch underway.
///
/// Pending placeholders are tracked apart from the entries: they are never
/// evicted and do not count toward the limit.
#[derive(Debug)]
pub struct AudioCache {
    entries: HashMap<String, Bytes>,
    /// Least recently used first.
    order: VecDeque<String>,
    pending: HashSet<String>,
    limit: usize,
    evict_batch: usize,
}

impl AudioCache {
    pub fn new(limit: usize, evict_batch: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            pending: HashSet::new(),
            limit,
            evict_batch: evict_batch.max(1),
        }
    }

    /// Look up `key`, marking it most recently used.
    pub fn get(&mut self, key: &str) -> Option<Bytes> {
        let audio = self.entries.get(key)?.clone();
        self.touch(key);
        Some(audio)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn save(&mut self, key: String, audio: Bytes) {
        if self.entries.contains_key(&key) {
            self.entries.insert(key.clone(), audio);
            self.touch(&key);
            return;
        }

        if self.entries.len() >= self.limit {
            let n = self.evict_batch.min(self.order.len());
            for evicted in self.order.drain(..n) {
                self.entries.remove(&evicted);
            }
            debug!("cache full, evicted {n} entries");
        }

        self.entries.insert(key.clone(), audio);
        self.order.push_back(key);
    }

    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            if let Some(k) = self.order.remove(pos) {
                self.order.push_back(k);
            }
        }
    }

    pub fn mark_pending(&mut self, key: &str) {
        self.pending.insert(key.to_string());
    }

    /// Remove the placeholder for `key`. Returns whether one existed.
    pub fn clear_pending(&mut self, key: &str) -> bool {
        self.pending.remove(key)
    }

    pub fn is_pending(&self, key: &str) -> bool {
        self.pending.contains(key)
    }

    /// Drop both the entry and the placeholder for `key`.
    pub fn remove(&mut self, key: &str) {
        if self.entries.remove(key).is_some() {
            self.order.retain(|k| k != key);
        }
        self.pending.remove(key);
    }

    /// Number of ready entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
        self.pending.clear();
    }
}

// ─── Fetch queue ───────────────────────────────────────────────────────────

struct QueueItem {
    text: String,
    /// Resolved exactly once; a preload drops its receiver up front.
    reply: oneshot::Sender<Option<Bytes>>,
    retry_count: u32,
}

#[derive(Default)]
struct FetchQueue {
    items: VecDeque<QueueItem>,
    /// A fetch is underway; the next item waits for it.
    busy: bool,
}

impl FetchQueue {
    fn contains(&self, text: &str) -> bool {
        self.items.iter().any(|item| item.text == text)
    }
}

enum Lookup {
    Hit(Bytes),
    Pending,
    Miss,
}

enum Outstanding {
    Ready(Bytes),
    Waiting,
    Gone,
}

struct Inner {
    api: Arc<dyn SpeechApi>,
    settings_store: Arc<dyn SettingsStore>,
    state: StateStore,
    config: PipelineConfig,
    settings: RwLock<TtsSettings>,
    initialized: OnceCell<()>,
    cache: Mutex<AudioCache>,
    queue: Mutex<FetchQueue>,
    in_flight: Mutex<HashMap<String, CancellationToken>>,
    /// Fired whenever an entry or placeholder changes.
    cache_changed: Notify,
}

/// Cloneable handle to the audio pipeline.
#[derive(Clone)]
pub struct AudioManager {
    inner: Arc<Inner>,
}

impl AudioManager {
    pub fn new(
        api: Arc<dyn SpeechApi>,
        settings_store: Arc<dyn SettingsStore>,
        state: StateStore,
        config: PipelineConfig,
    ) -> Self {
        let cache = AudioCache::new(config.cache_limit, config.evict_batch);
        Self {
            inner: Arc::new(Inner {
                api,
                settings_store,
                settings: RwLock::new(state.settings()),
                state,
                config,
                initialized: OnceCell::new(),
                cache: Mutex::new(cache),
                queue: Mutex::new(FetchQueue::default()),
                in_flight: Mutex::new(HashMap::new()),
                cache_changed: Notify::new(),
            }),
        }
    }

    /// Load settings from the store once and follow its updates afterwards.
    pub async fn ensure_initialized(&self) {
        self.inner
            .initialized
            .get_or_init(|| async {
                let mut rx = self.inner.settings_store.subscribe();
                let loaded = self.inner.settings_store.get_settings().await;
                let merged = {
                    let mut settings = self.inner.settings.write();
                    settings.merge_from(&loaded);
                    settings.clone()
                };
                info!(
                    "audio pipeline ready (voice {}, {})",
                    merged.voice, merged.api_base
                );
                self.inner.state.set_settings(merged);

                let weak = Arc::downgrade(&self.inner);
                tokio::spawn(async move {
                    while rx.changed().await.is_ok() {
                        let Some(inner) = weak.upgrade() else { break };
                        let update = rx.borrow_and_update().clone();
                        let merged = {
                            let mut settings = inner.settings.write();
                            settings.merge_from(&update);
                            settings.clone()
                        };
                        debug!("settings updated (voice {})", merged.voice);
                        inner.state.set_settings(merged);
                    }
                });
            })
            .await;
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.initialized()
    }

    pub fn settings_snapshot(&self) -> TtsSettings {
        self.inner.settings.read().clone()
    }

    /// Audio for `text`, fetching it if needed.
    ///
    /// A preload that finds the text already queued or being fetched returns
    /// `None` at once instead of waiting on it. Every failure also resolves to `None`.
    pub async fn get_audio(&self, text: &str, preload: bool) -> Option<Bytes> {
        self.ensure_initialized().await;

        let lookup = {
            let queue = self.inner.queue.lock();
            let mut cache = self.inner.cache.lock();
            if let Some(audio) = cache.get(text) {
                Lookup::Hit(audio)
            } else if cache.is_pending(text) || queue.contains(text) {
                Lookup::Pending
            } else {
                Lookup::Miss
            }
        };

        match lookup {
            Lookup::Hit(audio) => {
                debug!("cache hit: {}", preview(text));
                Some(audio)
            }
            Lookup::Pending if preload => None,
            Lookup::Pending => self.wait_for_pending(text).await,
            Lookup::Miss => self.enqueue(text).await.ok().flatten(),
        }
    }

    /// Queue `text` for fetching without waiting on the result.
    pub fn preload(&self, text: &str) {
        if !self.is_initialized() {
            let this = self.clone();
            let text = text.to_string();
            tokio::spawn(async move {
                this.get_audio(&text, true).await;
            });
            return;
        }

        let known = {
            let queue = self.inner.queue.lock();
            let cache = self.inner.cache.lock();
            cache.contains(text) || cache.is_pending(text) || queue.contains(text)
        };
        if !known {
            drop(self.enqueue(text));
        }
    }

    fn enqueue(&self, text: &str) -> oneshot::Receiver<Option<Bytes>> {
        let (reply, rx) = oneshot::channel();
        self.inner.queue.lock().items.push_back(QueueItem {
            text: text.to_string(),
            reply,
            retry_count: 0,
        });
        self.process_queue();
        rx
    }

    /// Dispatch the next queued item unless a fetch is already running.
    fn process_queue(&self) {
        loop {
            let mut queue = self.inner.queue.lock();
            if queue.busy || queue.items.is_empty() {
                return;
            }

            if !self.inner.state.reading() {
                let dropped: Vec<QueueItem> = queue.items.drain(..).collect();
                drop(queue);
                debug!("not reading, dropping {} queued fetches", dropped.len());
                for item in dropped {
                    let _ = item.reply.send(None);
                }
                return;
            }

            let Some(item) = queue.items.pop_front() else {
                return;
            };

            let mut cache = self.inner.cache.lock();
            if let Some(audio) = cache.get(&item.text) {
                drop(cache);
                drop(queue);
                debug!("already cached, skipping fetch: {}", preview(&item.text));
                let _ = item.reply.send(Some(audio));
                continue;
            }

            cache.mark_pending(&item.text);
            queue.busy = true;
            drop(cache);
            drop(queue);

            let this = self.clone();
            tokio::spawn(async move { this.run_item(item).await });
            return;
        }
    }

    async fn run_item(self, item: QueueItem) {
        match self.fetch_audio(&item.text).await {
            Ok(audio) => {
                {
                    let mut cache = self.inner.cache.lock();
                    cache.clear_pending(&item.text);
                    cache.save(item.text.clone(), audio.clone());
                }
                debug!("cached {} bytes: {}", audio.len(), preview(&item.text));
                let _ = item.reply.send(Some(audio));
            }
            Err(e) => self.handle_failure(item, e),
        }

        self.inner.cache_changed.notify_waiters();
        self.inner.queue.lock().busy = false;
        self.process_queue();
    }

    async fn fetch_audio(&self, text: &str) -> Result<Bytes, FetchError> {
        if !self.inner.state.reading() {
            return Err(FetchError::Aborted);
        }

        let token = self
            .inner
            .in_flight
            .lock()
            .entry(text.to_string())
            .or_insert_with(CancellationToken::new)
            .clone();
        let settings = self.settings_snapshot();
        let timeout = self.inner.config.fetch_timeout;

        let result = tokio::select! {
            _ = token.cancelled() => Err(FetchError::Aborted),
            r = tokio::time::timeout(timeout, self.inner.api.synthesize(text, &settings)) => {
                r.unwrap_or_else(|_| {
                    warn!("fetch timed out after {timeout:?}: {}", preview(text));
                    Err(FetchError::Aborted)
                })
            }
        };

        self.inner.in_flight.lock().remove(text);
        result
    }

    fn handle_failure(&self, mut item: QueueItem, err: FetchError) {
        let max = self.inner.config.max_retry_attempts;
        let attempts = item.retry_count + 1;

        if err.is_retryable() && attempts < max {
            info!(
                "retrying {} (attempt {}/{max}): {err}",
                preview(&item.text),
                attempts + 1
            );
            item.retry_count = attempts;
            let mut queue = self.inner.queue.lock();
            self.inner.cache.lock().clear_pending(&item.text);
            queue.items.push_front(item);
            return;
        }

        if err.is_retryable() {
            let exhausted = FetchError::ExhaustedRetries { attempts };
            error!("{exhausted} for {}: {err}", preview(&item.text));
            self.purge(&item.text);
        } else {
            debug!("fetch ended for {}: {err}", preview(&item.text));
            self.inner.cache.lock().clear_pending(&item.text);
        }
        let _ = item.reply.send(None);
    }

    /// Forget everything about `text`: entry, placeholder, in-flight token.
    fn purge(&self, text: &str) {
        self.inner.cache.lock().remove(text);
        if let Some(token) = self.inner.in_flight.lock().remove(text) {
            token.cancel();
        }
    }

    async fn wait_for_pending(&self, text: &str) -> Option<Bytes> {
        let mut reading = self.inner.state.watch_reading();
        let mut tick = tokio::time::interval(self.inner.config.pending_poll);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            // Created before the check so a change in between still wakes us.
            let notified = self.inner.cache_changed.notified();

            if !self.inner.state.reading() {
                self.inner.cache.lock().clear_pending(text);
                return None;
            }

            match self.outstanding(text) {
                Outstanding::Ready(audio) => return Some(audio),
                Outstanding::Gone => return None,
                Outstanding::Waiting => {}
            }

            tokio::select! {
                _ = notified => {}
                _ = reading.changed() => {}
                _ = tick.tick() => {}
            }
        }
    }

    fn outstanding(&self, text: &str) -> Outstanding {
        let queue = self.inner.queue.lock();
        let mut cache = self.inner.cache.lock();
        if let Some(audio) = cache.get(text) {
            Outstanding::Ready(audio)
        } else if cache.is_pending(text) || queue.contains(text) {
            Outstanding::Waiting
        } else {
            Outstanding::Gone
        }
    }

    /// Cancel every in-flight fetch and drop everything still queued.
    pub fn abort_all(&self) {
        let tokens: Vec<CancellationToken> =
            self.inner.in_flight.lock().drain().map(|(_, t)| t).collect();
        let dropped: Vec<QueueItem> = self.inner.queue.lock().items.drain(..).collect();

        if !tokens.is_empty() || !dropped.is_empty() {
            info!(
                "aborting {} in-flight and {} queued fetches",
                tokens.len(),
                dropped.len()
            );
        }
        for token in tokens {
            token.cancel();
        }
        for item in dropped {
            let _ = item.reply.send(None);
        }
        self.inner.cache_changed.notify_waiters();
    }

    pub fn clear_cache(&self) {
        self.inner.cache.lock().clear();
        self.inner.cache_changed.notify_waiters();
    }

    pub fn is_cached(&self, text: &str) -> bool {
        self.inner.cache.lock().contains(text)
    }

    pub fn stats(&self) -> QueueStats {
        let queued = self.inner.queue.lock().items.len();
        let (cached, pending) = {
            let cache = self.inner.cache.lock();
            (cache.len(), cache.pending_len())
        };
        QueueStats {
            cached,
            pending,
            queued,
            in_flight: self.inner.in_flight.lock().len(),
        }
    }
}
