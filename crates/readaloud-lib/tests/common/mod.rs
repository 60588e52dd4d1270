//! Fakes shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::watch;

use readaloud_lib::client::{FetchError, SpeechApi};
use readaloud_lib::player::{PlaybackError, Player};
use readaloud_lib::readaloud_core::types::{PipelineConfig, TtsSettings};

/// Audio the fake service returns for `text`.
pub fn audio_for(text: &str) -> Bytes {
    Bytes::from(format!("audio:{text}"))
}

/// Pipeline timings short enough for tests.
pub fn fast_config() -> PipelineConfig {
    PipelineConfig {
        fetch_timeout: Duration::from_secs(5),
        segment_gap: Duration::from_millis(10),
        pending_poll: Duration::from_millis(10),
        ..PipelineConfig::default()
    }
}

/// In-process speech service that records every call.
#[derive(Default)]
pub struct FakeApi {
    calls: Mutex<Vec<(String, String)>>,
    /// Remaining failures per text.
    failures: Mutex<HashMap<String, u32>>,
    delay: Duration,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl FakeApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Self::default()
        })
    }

    /// Fail the next `times` requests for `text` with a network error.
    pub fn fail(&self, text: &str, times: u32) {
        self.failures.lock().insert(text.to_string(), times);
    }

    pub fn fail_always(&self, text: &str) {
        self.fail(text, u32::MAX);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn calls_for(&self, text: &str) -> usize {
        self.calls.lock().iter().filter(|(t, _)| t == text).count()
    }

    pub fn texts(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(t, _)| t.clone()).collect()
    }

    pub fn voices_used(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(_, v)| v.clone()).collect()
    }

    /// Most requests that were ever running at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechApi for FakeApi {
    async fn synthesize(&self, text: &str, settings: &TtsSettings) -> Result<Bytes, FetchError> {
        self.calls
            .lock()
            .push((text.to_string(), settings.voice.clone()));
        let running = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        let fail = {
            let mut failures = self.failures.lock();
            match failures.get_mut(text) {
                Some(remaining) if *remaining > 0 => {
                    *remaining = remaining.saturating_sub(1);
                    true
                }
                _ => false,
            }
        };
        if fail {
            return Err(FetchError::Network("connection refused".into()));
        }
        Ok(audio_for(text))
    }
}

/// Player that "plays" for a fixed time and records what it played.
pub struct FakePlayer {
    attached: AtomicBool,
    loaded: Mutex<Option<Bytes>>,
    played: Mutex<Vec<Bytes>>,
    stops: watch::Sender<u64>,
    play_time: Duration,
    /// Loads left to reject as undecodable.
    failing_loads: AtomicUsize,
}

impl FakePlayer {
    pub fn new(play_time: Duration) -> Arc<Self> {
        let (stops, _) = watch::channel(0);
        Arc::new(Self {
            attached: AtomicBool::new(false),
            loaded: Mutex::new(None),
            played: Mutex::new(Vec::new()),
            stops,
            play_time,
            failing_loads: AtomicUsize::new(0),
        })
    }

    pub fn played(&self) -> Vec<Bytes> {
        self.played.lock().clone()
    }

    /// Reject the next `n` loads with a decode error.
    pub fn fail_loads(&self, n: usize) {
        self.failing_loads.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl Player for FakePlayer {
    fn attach(&self) {
        self.attached.store(true, Ordering::SeqCst);
    }

    fn detach(&self) {
        self.attached.store(false, Ordering::SeqCst);
    }

    fn is_attached(&self) -> bool {
        self.attached.load(Ordering::SeqCst)
    }

    async fn load(&self, audio: Bytes) -> Result<Duration, PlaybackError> {
        if !self.is_attached() {
            return Err(PlaybackError::Detached);
        }
        let failing = self
            .failing_loads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(PlaybackError::Decode("corrupt audio".into()));
        }
        *self.loaded.lock() = Some(audio);
        Ok(self.play_time)
    }

    async fn play(&self) -> Result<(), PlaybackError> {
        let mut stops = self.stops.subscribe();
        let audio = self
            .loaded
            .lock()
            .take()
            .ok_or_else(|| PlaybackError::Decode("nothing loaded".into()))?;
        self.played.lock().push(audio);

        tokio::select! {
            _ = tokio::time::sleep(self.play_time) => Ok(()),
            _ = stops.changed() => Err(PlaybackError::Stopped),
        }
    }

    fn stop(&self) {
        self.loaded.lock().take();
        self.stops.send_modify(|n| *n += 1);
    }
}
