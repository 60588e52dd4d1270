//! Process-wide wiring: one state store, one audio pipeline, one reader.

use std::sync::Arc;

use readaloud_core::types::{PipelineConfig, ReaderStatus};

use crate::audio::AudioManager;
use crate::client::SpeechApi;
use crate::page::Page;
use crate::player::Player;
use crate::reader::Reader;
use crate::settings::SettingsStore;
use crate::state::StateStore;

/// Everything a [`ReaderContext`] is built from.
pub struct ContextParts {
    pub api: Arc<dyn SpeechApi>,
    pub settings: Arc<dyn SettingsStore>,
    pub page: Arc<dyn Page>,
    pub player: Arc<dyn Player>,
    pub config: PipelineConfig,
}

#[derive(Clone)]
pub struct ReaderContext {
    pub state: StateStore,
    pub audio: AudioManager,
    pub reader: Reader,
    pub settings: Arc<dyn SettingsStore>,
    pub api: Arc<dyn SpeechApi>,
    pub page: Arc<dyn Page>,
}

impl ReaderContext {
    pub fn new(parts: ContextParts) -> Self {
        let state = StateStore::default();
        let audio = AudioManager::new(
            parts.api.clone(),
            parts.settings.clone(),
            state.clone(),
            parts.config.clone(),
        );
        let reader = Reader::new(
            audio.clone(),
            parts.page.clone(),
            parts.player,
            state.clone(),
            parts.config,
        );
        Self {
            state,
            audio,
            reader,
            settings: parts.settings,
            api: parts.api,
            page: parts.page,
        }
    }

    pub fn status(&self) -> ReaderStatus {
        let settings = self.state.settings();
        ReaderStatus {
            reading: self.state.reading(),
            session_active: self.reader.is_session_active(),
            current_element: self.reader.current_element().map(|id| id.0),
            theme: self.state.theme(),
            voice: settings.voice,
            speed: settings.speed,
            queue: self.audio.stats(),
        }
    }
}
