//! TTS HTTP client — speech synthesis and voice listing for OpenAI-compatible
//! servers (`/audio/speech`, `/audio/voices`).

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, error, warn};

use readaloud_core::types::{OPENAI_VOICES, TtsSettings, VoicesResponse};

/// Voice listing endpoints, tried in order.
const VOICE_ENDPOINTS: &[&str] = &["audio/voices", "voices"];

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Explicit cancellation or timeout.
    #[error("request aborted")]
    Aborted,

    /// Transport failure (offline, connection reset, ...).
    #[error("network error: {0}")]
    Network(String),

    /// Non-2xx response.
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("gave up after {attempts} attempts")]
    ExhaustedRetries { attempts: u32 },

    #[error("unexpected response body: {0}")]
    Decode(String),
}

impl FetchError {
    /// Whether the fetch queue should try the request again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Network(_) | FetchError::Api { .. })
    }
}

/// Remote speech service.
#[async_trait]
pub trait SpeechApi: Send + Sync {
    /// Synthesize `text`, returning the raw audio payload (mp3).
    async fn synthesize(&self, text: &str, settings: &TtsSettings) -> Result<Bytes, FetchError>;

    /// Voices the service offers. Never fails; an empty list means unknown.
    async fn list_voices(&self, _settings: &TtsSettings) -> Vec<String> {
        Vec::new()
    }
}

/// [`SpeechApi`] over reqwest.
#[derive(Clone, Default)]
pub struct HttpSpeechApi {
    client: reqwest::Client,
}

impl HttpSpeechApi {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn fetch_voices(
        &self,
        settings: &TtsSettings,
        endpoint: &str,
    ) -> Result<VoicesResponse, FetchError> {
        let url = format!("{}/{endpoint}", settings.base_url());
        let mut req = self.client.get(&url);
        if let Some(key) = settings.bearer() {
            req = req.bearer_auth(key);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(FetchError::Api {
                status: resp.status().as_u16(),
                message: format!("failed to fetch voices from {url}"),
            });
        }
        resp.json::<VoicesResponse>()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))
    }
}

#[async_trait]
impl SpeechApi for HttpSpeechApi {
    async fn synthesize(&self, text: &str, settings: &TtsSettings) -> Result<Bytes, FetchError> {
        let url = format!("{}/audio/speech", settings.base_url());
        let body = serde_json::json!({
            "model": settings.model_or_default(),
            "input": text,
            "voice": settings.voice,
            "response_format": "mp3",
            "speed": settings.speed,
        });

        let mut req = self.client.post(&url).json(&body);
        if let Some(key) = settings.bearer() {
            req = req.bearer_auth(key);
        }

        debug!("POST {url} ({} chars)", text.len());
        let resp = req.send().await.map_err(|e| {
            error!("network error (possibly offline): {e}");
            FetchError::Network(e.to_string())
        })?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            error!("API error {status}: {message}");
            return Err(FetchError::Api {
                status: status.as_u16(),
                message,
            });
        }

        resp.bytes()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))
    }

    async fn list_voices(&self, settings: &TtsSettings) -> Vec<String> {
        let mut last: Option<VoicesResponse> = None;

        for endpoint in VOICE_ENDPOINTS {
            match self.fetch_voices(settings, endpoint).await {
                Ok(data) => {
                    let found = !data.voices.is_empty();
                    last = Some(data);
                    if found {
                        break;
                    }
                }
                Err(e) => warn!("error fetching voices from /{endpoint}: {e}"),
            }
        }

        match last {
            Some(data) => data.voices,
            None if settings.api_base.contains("api.openai.com") => {
                OPENAI_VOICES.iter().map(|v| v.to_string()).collect()
            }
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings_for(server: &MockServer) -> TtsSettings {
        TtsSettings {
            api_base: format!("{}/v1", server.uri()),
            voice: "af_heart".into(),
            speed: 1.25,
            api_key: Some("secret".into()),
            model: None,
        }
    }

    #[tokio::test]
    async fn synthesize_posts_openai_body_with_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/audio/speech"))
            .and(header("authorization", "Bearer secret"))
            .and(body_partial_json(serde_json::json!({
                "model": "kokoro",
                "input": "Hello there.",
                "voice": "af_heart",
                "response_format": "mp3",
                "speed": 1.25,
            })))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ID3audio".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let api = HttpSpeechApi::default();
        let audio = api
            .synthesize("Hello there.", &settings_for(&server))
            .await
            .unwrap();
        assert_eq!(&audio[..], b"ID3audio");
    }

    #[tokio::test]
    async fn synthesize_maps_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/audio/speech"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .mount(&server)
            .await;

        let err = HttpSpeechApi::default()
            .synthesize("x", &settings_for(&server))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Api { status: 503, .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn synthesize_reports_unreachable_host_as_network() {
        let settings = TtsSettings {
            api_base: "http://127.0.0.1:9".into(),
            ..Default::default()
        };
        let err = HttpSpeechApi::default()
            .synthesize("x", &settings)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Network(_)));
    }

    #[tokio::test]
    async fn voices_fall_back_to_second_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/audio/voices"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/voices"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "voices": ["af_heart", "am_adam"] })),
            )
            .mount(&server)
            .await;

        let voices = HttpSpeechApi::default()
            .list_voices(&settings_for(&server))
            .await;
        assert_eq!(voices, vec!["af_heart", "am_adam"]);
    }

    #[tokio::test]
    async fn voices_stop_at_first_non_empty_list() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/audio/voices"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "voices": ["a"] })),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/voices"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let voices = HttpSpeechApi::default()
            .list_voices(&settings_for(&server))
            .await;
        assert_eq!(voices, vec!["a"]);
    }

    #[tokio::test]
    async fn voices_empty_when_unknown_provider_fails() {
        let server = MockServer::start().await;
        let voices = HttpSpeechApi::default()
            .list_voices(&settings_for(&server))
            .await;
        assert!(voices.is_empty());
    }

    #[test]
    fn abort_is_terminal() {
        assert!(!FetchError::Aborted.is_retryable());
        assert!(!FetchError::ExhaustedRetries { attempts: 3 }.is_retryable());
        assert!(FetchError::Network("offline".into()).is_retryable());
    }
}
