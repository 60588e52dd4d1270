//! Playback element — one reusable player per page, attached while an
//! element is being read and detached afterwards.
//!
//! [`RodioPlayer`] owns a dedicated OS thread for as long as it is attached
//! (rodio's `OutputStream` is `!Send`). The async side talks to it over a
//! command channel and gets results back on oneshots.

use std::io::Cursor;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use rodio::{Decoder, OutputStream, Sink, Source};
use tokio::sync::oneshot;
use tracing::{debug, error};

/// How often the playback thread checks whether the sink drained.
const DRAIN_POLL: Duration = Duration::from_millis(20);

/// Bitrate assumed when the decoder cannot report a duration.
const ESTIMATE_BITRATE: u64 = 128_000;

#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error("audio output unavailable: {0}")]
    Output(String),

    #[error("could not decode audio: {0}")]
    Decode(String),

    #[error("player is not attached")]
    Detached,

    #[error("playback stopped")]
    Stopped,
}

#[async_trait]
pub trait Player: Send + Sync {
    /// Create the playback element if it does not exist yet.
    fn attach(&self);

    /// Remove the playback element.
    fn detach(&self);

    fn is_attached(&self) -> bool;

    /// Set the source. Resolves once the duration is known.
    async fn load(&self, audio: Bytes) -> Result<Duration, PlaybackError>;

    /// Play the loaded source. Resolves when playback ends.
    async fn play(&self) -> Result<(), PlaybackError>;

    /// Pause, clear the source, and reset. A pending `play` resolves with
    /// [`PlaybackError::Stopped`].
    fn stop(&self);
}

/// Duration of `len` bytes of audio at [`ESTIMATE_BITRATE`].
pub fn estimate_duration(len: usize) -> Duration {
    Duration::from_millis(len as u64 * 8 * 1000 / ESTIMATE_BITRATE)
}

// ─── Rodio ─────────────────────────────────────────────────────────────────

enum PlayCmd {
    Load {
        audio: Bytes,
        reply: oneshot::Sender<Result<Duration, PlaybackError>>,
    },
    Play {
        done: oneshot::Sender<Result<(), PlaybackError>>,
    },
    Stop,
}

/// [`Player`] on the default audio output.
#[derive(Default)]
pub struct RodioPlayer {
    cmd_tx: Mutex<Option<mpsc::Sender<PlayCmd>>>,
}

impl RodioPlayer {
    pub fn new() -> Self {
        Self::default()
    }

    fn send(&self, cmd: PlayCmd) -> Result<(), PlaybackError> {
        let guard = self.cmd_tx.lock();
        let tx = guard.as_ref().ok_or(PlaybackError::Detached)?;
        tx.send(cmd)
            .map_err(|_| PlaybackError::Output("playback thread exited".into()))
    }
}

#[async_trait]
impl Player for RodioPlayer {
    fn attach(&self) {
        let mut guard = self.cmd_tx.lock();
        if guard.is_some() {
            return;
        }

        let (tx, rx) = mpsc::channel();
        match std::thread::Builder::new()
            .name("readaloud-playback".into())
            .spawn(move || playback_thread(rx))
        {
            Ok(_) => {
                debug!("player attached");
                *guard = Some(tx);
            }
            Err(e) => error!("failed to spawn playback thread: {e}"),
        }
    }

    fn detach(&self) {
        // Dropping the sender ends the thread.
        if self.cmd_tx.lock().take().is_some() {
            debug!("player detached");
        }
    }

    fn is_attached(&self) -> bool {
        self.cmd_tx.lock().is_some()
    }

    async fn load(&self, audio: Bytes) -> Result<Duration, PlaybackError> {
        let (reply, rx) = oneshot::channel();
        self.send(PlayCmd::Load { audio, reply })?;
        rx.await
            .map_err(|_| PlaybackError::Output("playback thread exited".into()))?
    }

    async fn play(&self) -> Result<(), PlaybackError> {
        let (done, rx) = oneshot::channel();
        self.send(PlayCmd::Play { done })?;
        rx.await.map_err(|_| PlaybackError::Stopped)?
    }

    fn stop(&self) {
        let _ = self.send(PlayCmd::Stop);
    }
}

fn playback_thread(cmd_rx: mpsc::Receiver<PlayCmd>) {
    let (_stream, stream_handle) = match OutputStream::try_default() {
        Ok(pair) => pair,
        Err(e) => {
            error!("playback: failed to open audio output: {e}");
            return;
        }
    };
    let new_sink = || {
        Sink::try_new(&stream_handle).map_err(|e| error!("playback: failed to create sink: {e}"))
    };
    let Ok(mut sink) = new_sink() else { return };

    let mut loaded: Option<Decoder<Cursor<Bytes>>> = None;
    let mut playing: Option<oneshot::Sender<Result<(), PlaybackError>>> = None;

    loop {
        match cmd_rx.recv_timeout(DRAIN_POLL) {
            Ok(PlayCmd::Load { audio, reply }) => {
                sink.stop();
                let Ok(fresh) = new_sink() else { break };
                sink = fresh;
                playing = None;

                let len = audio.len();
                let result = Decoder::new(Cursor::new(audio))
                    .map(|decoder| {
                        let duration = decoder
                            .total_duration()
                            .unwrap_or_else(|| estimate_duration(len));
                        loaded = Some(decoder);
                        duration
                    })
                    .map_err(|e| PlaybackError::Decode(e.to_string()));
                let _ = reply.send(result);
            }
            Ok(PlayCmd::Play { done }) => match loaded.take() {
                Some(source) => {
                    sink.append(source);
                    sink.play();
                    playing = Some(done);
                }
                None => {
                    let _ = done.send(Err(PlaybackError::Decode("no source loaded".into())));
                }
            },
            Ok(PlayCmd::Stop) => {
                sink.stop();
                let Ok(fresh) = new_sink() else { break };
                sink = fresh;
                loaded = None;
                // Dropping the sender resolves `play` as stopped.
                playing = None;
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                sink.stop();
                break;
            }
        }

        if playing.is_some() && sink.empty() {
            if let Some(done) = playing.take() {
                let _ = done.send(Ok(()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_uses_128_kbps() {
        assert_eq!(estimate_duration(16_000), Duration::from_secs(1));
        assert_eq!(estimate_duration(0), Duration::ZERO);
    }

    #[tokio::test]
    async fn detached_player_refuses_commands() {
        let player = RodioPlayer::new();
        assert!(!player.is_attached());
        assert!(matches!(
            player.load(Bytes::from_static(b"x")).await,
            Err(PlaybackError::Detached)
        ));
        assert!(matches!(player.play().await, Err(PlaybackError::Detached)));
        player.stop();
        player.detach();
    }
}
