//! Observable reader state — the `reading` session flag, theme, and settings.
//!
//! Setters notify listeners only when the value actually changes. Listeners
//! run synchronously on the caller's thread after the state lock is released,
//! so a listener may read (or write) the store again. Async code that needs
//! to wait on the session flag uses [`StateStore::watch_reading`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

use readaloud_core::types::{ReaderState, StateKey, Theme, TtsSettings};

/// A changed state value, passed to listeners as `(new, old)`.
#[derive(Debug, Clone, PartialEq)]
pub enum StateValue {
    Reading(bool),
    Theme(Theme),
    Settings(TtsSettings),
}

impl StateValue {
    pub fn key(&self) -> StateKey {
        match self {
            StateValue::Reading(_) => StateKey::Reading,
            StateValue::Theme(_) => StateKey::Theme,
            StateValue::Settings(_) => StateKey::Settings,
        }
    }
}

type Listener = Arc<dyn Fn(&StateValue, &StateValue) + Send + Sync>;

struct ListenerEntry {
    id: u64,
    /// `None` listens to every key.
    key: Option<StateKey>,
    callback: Listener,
}

struct Inner {
    state: Mutex<ReaderState>,
    listeners: Mutex<Vec<ListenerEntry>>,
    next_id: AtomicU64,
    reading_tx: watch::Sender<bool>,
}

/// Cloneable handle to the process-wide reader state.
#[derive(Clone)]
pub struct StateStore {
    inner: Arc<Inner>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new(ReaderState::default())
    }
}

impl StateStore {
    pub fn new(initial: ReaderState) -> Self {
        let (reading_tx, _) = watch::channel(initial.reading);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(initial),
                listeners: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                reading_tx,
            }),
        }
    }

    pub fn snapshot(&self) -> ReaderState {
        self.inner.state.lock().clone()
    }

    pub fn reading(&self) -> bool {
        self.inner.state.lock().reading
    }

    pub fn theme(&self) -> Theme {
        self.inner.state.lock().theme
    }

    pub fn settings(&self) -> TtsSettings {
        self.inner.state.lock().settings.clone()
    }

    pub fn set_reading(&self, reading: bool) {
        self.set(StateValue::Reading(reading));
    }

    pub fn set_theme(&self, theme: Theme) {
        self.set(StateValue::Theme(theme));
    }

    pub fn set_settings(&self, settings: TtsSettings) {
        self.set(StateValue::Settings(settings));
    }

    /// Store `value`, notifying listeners if it differs from the current one.
    pub fn set(&self, value: StateValue) {
        let old = {
            let mut state = self.inner.state.lock();
            match &value {
                StateValue::Reading(v) if state.reading != *v => {
                    let old = StateValue::Reading(state.reading);
                    state.reading = *v;
                    old
                }
                StateValue::Theme(v) if state.theme != *v => {
                    let old = StateValue::Theme(state.theme);
                    state.theme = *v;
                    old
                }
                StateValue::Settings(v) if state.settings != *v => {
                    StateValue::Settings(std::mem::replace(&mut state.settings, v.clone()))
                }
                _ => return,
            }
        };

        debug!("state: {:?} -> {:?}", old, value);
        if let StateValue::Reading(v) = value {
            self.inner.reading_tx.send_replace(v);
        }
        self.emit(&value, &old);
    }

    fn emit(&self, new: &StateValue, old: &StateValue) {
        let key = new.key();
        let callbacks: Vec<Listener> = self
            .inner
            .listeners
            .lock()
            .iter()
            .filter(|l| l.key.is_none_or(|k| k == key))
            .map(|l| l.callback.clone())
            .collect();

        for callback in callbacks {
            callback(new, old);
        }
    }

    /// Listen for changes of one key. The listener stays registered until the
    /// returned [`Subscription`] is dropped or unsubscribed.
    pub fn subscribe(
        &self,
        key: StateKey,
        callback: impl Fn(&StateValue, &StateValue) + Send + Sync + 'static,
    ) -> Subscription {
        self.register(Some(key), Arc::new(callback))
    }

    /// Listen for changes of any key.
    pub fn subscribe_all(
        &self,
        callback: impl Fn(&StateValue, &StateValue) + Send + Sync + 'static,
    ) -> Subscription {
        self.register(None, Arc::new(callback))
    }

    /// Convenience wrapper over [`subscribe`](Self::subscribe) for the session flag.
    pub fn on_reading(&self, callback: impl Fn(bool) + Send + Sync + 'static) -> Subscription {
        self.subscribe(StateKey::Reading, move |new, _| {
            if let StateValue::Reading(reading) = new {
                callback(*reading);
            }
        })
    }

    fn register(&self, key: Option<StateKey>, callback: Listener) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.lock().push(ListenerEntry { id, key, callback });
        Subscription {
            id,
            store: Arc::downgrade(&self.inner),
        }
    }

    /// Receiver that observes every change of the session flag.
    pub fn watch_reading(&self) -> watch::Receiver<bool> {
        self.inner.reading_tx.subscribe()
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }
}

/// Registration handle returned by the subscribe methods.
#[must_use = "dropping a Subscription unsubscribes the listener"]
pub struct Subscription {
    id: u64,
    store: Weak<Inner>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.store.upgrade() {
            inner.listeners.lock().retain(|l| l.id != self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn emits_only_on_change() {
        let store = StateStore::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let _sub = store.on_reading(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        store.set_reading(false);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        store.set_reading(true);
        store.set_reading(true);
        store.set_reading(false);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn key_listener_ignores_other_keys() {
        let store = StateStore::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let _sub = store.subscribe(StateKey::Theme, move |new, old| {
            s.lock().push((new.clone(), old.clone()));
        });

        store.set_reading(true);
        store.set_theme(Theme::Dark);

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(
            seen[0],
            (StateValue::Theme(Theme::Dark), StateValue::Theme(Theme::Light))
        );
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let store = StateStore::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let sub = store.subscribe_all(move |_, _| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(store.listener_count(), 1);

        store.set_theme(Theme::Dark);
        sub.unsubscribe();
        store.set_theme(Theme::Light);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.listener_count(), 0);
    }

    #[test]
    fn listener_may_reenter_store() {
        let store = StateStore::default();
        let inner = store.clone();
        let _sub = store.on_reading(move |reading| {
            if !reading {
                inner.set_theme(Theme::Dark);
            }
        });

        store.set_reading(true);
        store.set_reading(false);
        assert_eq!(store.theme(), Theme::Dark);
    }

    #[test]
    fn watch_tracks_reading_flag() {
        let store = StateStore::default();
        let mut rx = store.watch_reading();
        assert!(!*rx.borrow());
        store.set_reading(true);
        assert!(rx.has_changed().unwrap());
        assert!(*rx.borrow_and_update());
    }

    #[test]
    fn settings_change_is_observed() {
        let store = StateStore::default();
        let mut settings = store.settings();
        settings.voice = "am_adam".into();
        store.set_settings(settings.clone());
        assert_eq!(store.snapshot().settings, settings);
    }
}
