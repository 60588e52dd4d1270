//! readaloud CLI — read text documents aloud, locally or through a server.
//!
//! ```text
//! readaloud read article.txt [--paragraph 2] [--caret 14] [--voice af_heart]
//! readaloud serve article.txt [--port 2004] [--host 127.0.0.1]
//! readaloud voices [--api-base http://localhost:8880/v1]
//! readaloud split "some long text" [--min 50] [--max 100]
//! readaloud stop / pause / status [--server http://localhost:2004]
//! readaloud settings [--server ...] [--voice am_adam] [--speed 1.2]
//! ```

use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tracing::info;

use readaloud_core::text_prep::{split_long_sentence, word_start_offset};
use readaloud_core::types::{DEFAULT_MAX_CHARS, DEFAULT_MIN_CHARS, PipelineConfig, TtsSettings};
use readaloud_lib::client::{HttpSpeechApi, SpeechApi};
use readaloud_lib::context::{ContextParts, ReaderContext};
use readaloud_lib::page::{Page, SharedDocument};
use readaloud_lib::player::RodioPlayer;
use readaloud_lib::server;
use readaloud_lib::settings::{FileSettingsStore, MemorySettingsStore, SettingsStore};

type CliResult<T = ()> = Result<T, Box<dyn Error>>;

/// readaloud — text-to-speech reader with word highlighting
#[derive(Parser)]
#[command(name = "readaloud", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Read a text file aloud, starting at a paragraph
    Read {
        /// Text file; paragraphs are separated by blank lines
        file: PathBuf,
        /// Paragraph to start from (0-based)
        #[arg(long, default_value = "0")]
        paragraph: usize,
        /// Character position inside the paragraph; reading starts at its word
        #[arg(long, default_value = "0")]
        caret: usize,
        #[command(flatten)]
        tts: TtsArgs,
    },
    /// Serve a text file and the HTTP control API
    Serve {
        file: PathBuf,
        /// Listen port
        #[arg(long, default_value_t = server::DEFAULT_PORT)]
        port: u16,
        /// Listen host
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[command(flatten)]
        tts: TtsArgs,
    },
    /// List the voices the TTS server offers
    Voices {
        #[command(flatten)]
        tts: TtsArgs,
    },
    /// Show how text is split into segments
    Split {
        text: String,
        #[arg(long, default_value_t = DEFAULT_MIN_CHARS)]
        min: usize,
        #[arg(long, default_value_t = DEFAULT_MAX_CHARS)]
        max: usize,
    },
    /// Stop reading on a running server
    Stop {
        #[arg(long, default_value = "http://localhost:2004")]
        server: String,
    },
    /// Pause reading on a running server
    Pause {
        #[arg(long, default_value = "http://localhost:2004")]
        server: String,
    },
    /// Get server status
    Status {
        #[arg(long, default_value = "http://localhost:2004")]
        server: String,
    },
    /// Show or change the settings of a running server
    Settings {
        #[arg(long, default_value = "http://localhost:2004")]
        server: String,
        #[arg(long)]
        api_base: Option<String>,
        #[arg(long)]
        voice: Option<String>,
        #[arg(long)]
        speed: Option<f32>,
        #[arg(long)]
        model: Option<String>,
    },
}

/// TTS connection flags. They override the settings file, if any.
#[derive(Args)]
struct TtsArgs {
    /// OpenAI-compatible API base, e.g. http://localhost:8880/v1
    #[arg(long)]
    api_base: Option<String>,
    #[arg(long)]
    voice: Option<String>,
    #[arg(long)]
    speed: Option<f32>,
    #[arg(long, env = "READALOUD_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
    #[arg(long)]
    model: Option<String>,
    /// JSON settings file; flags given here are saved back to it
    #[arg(long)]
    settings: Option<PathBuf>,
}

impl TtsArgs {
    fn overrides(&self) -> TtsSettings {
        TtsSettings {
            api_base: self.api_base.clone().unwrap_or_default(),
            voice: self.voice.clone().unwrap_or_default(),
            speed: self.speed.unwrap_or(0.0),
            api_key: self.api_key.clone(),
            model: self.model.clone(),
        }
    }

    async fn store(&self) -> CliResult<Arc<dyn SettingsStore>> {
        let store: Arc<dyn SettingsStore> = match &self.settings {
            Some(path) => Arc::new(FileSettingsStore::open(path).await?),
            None => Arc::new(MemorySettingsStore::default()),
        };

        let current = store.get_settings().await;
        let mut merged = current.clone();
        merged.merge_from(&self.overrides());
        if merged != current {
            store.update_settings(merged).await?;
        }
        Ok(store)
    }
}

async fn build_context(tts: &TtsArgs, page: SharedDocument) -> CliResult<ReaderContext> {
    Ok(ReaderContext::new(ContextParts {
        api: Arc::new(HttpSpeechApi::default()),
        settings: tts.store().await?,
        page: Arc::new(page),
        player: Arc::new(RodioPlayer::new()),
        config: PipelineConfig::default(),
    }))
}

async fn load_page(file: &Path) -> CliResult<SharedDocument> {
    let text = tokio::fs::read_to_string(file).await?;
    let page = SharedDocument::from_paragraphs(&text);
    if page.readable_elements().is_empty() {
        return Err(format!("{} has no readable text", file.display()).into());
    }
    Ok(page)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "readaloud_lib=debug,readaloud=info".into()),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli.command).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run(command: Command) -> CliResult {
    match command {
        Command::Read {
            file,
            paragraph,
            caret,
            tts,
        } => {
            let page = load_page(&file).await?;
            let ctx = build_context(&tts, page.clone()).await?;

            let element = page
                .readable_elements()
                .get(paragraph)
                .copied()
                .ok_or_else(|| format!("no paragraph {paragraph} in {}", file.display()))?;
            let offset = word_start_offset(&page.text_content(element), caret);

            let handle = ctx.reader.start_reading(element, offset).await;
            tokio::select! {
                _ = handle.wait() => info!("finished reading {}", file.display()),
                _ = tokio::signal::ctrl_c() => {
                    info!("interrupted");
                    ctx.reader.clear_previous_session();
                }
            }
        }

        Command::Serve {
            file,
            port,
            host,
            tts,
        } => {
            let page = load_page(&file).await?;
            let ctx = build_context(&tts, page).await?;
            let app = server::router(ctx.clone());

            let addr = format!("{host}:{port}");
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            info!("readaloud listening on {addr}");

            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = tokio::signal::ctrl_c().await;
                    ctx.reader.clear_previous_session();
                })
                .await?;
        }

        Command::Voices { tts } => {
            let settings = tts.store().await?.get_settings().await;
            let voices = HttpSpeechApi::default().list_voices(&settings).await;
            if voices.is_empty() {
                eprintln!("no voices reported by {}", settings.api_base);
            }
            for voice in voices {
                println!("{voice}");
            }
        }

        Command::Split { text, min, max } => {
            for (i, segment) in split_long_sentence(&text, min, max).iter().enumerate() {
                println!("{i:>3} [{:>3}] {segment}", segment.chars().count());
            }
        }

        Command::Stop { server } => post_simple(&server, "stop").await?,
        Command::Pause { server } => post_simple(&server, "pause").await?,

        Command::Status { server } => {
            let resp = reqwest::Client::new()
                .get(format!("{server}/status"))
                .send()
                .await?;
            println!("{}", resp.text().await?);
        }

        Command::Settings {
            server,
            api_base,
            voice,
            speed,
            model,
        } => {
            let mut patch = serde_json::Map::new();
            if let Some(v) = api_base {
                patch.insert("apiBase".into(), v.into());
            }
            if let Some(v) = voice {
                patch.insert("voice".into(), v.into());
            }
            if let Some(v) = speed {
                patch.insert("speed".into(), v.into());
            }
            if let Some(v) = model {
                patch.insert("model".into(), v.into());
            }

            let client = reqwest::Client::new();
            let url = format!("{server}/settings");
            let resp = if patch.is_empty() {
                client.get(&url).send().await?
            } else {
                client.post(&url).json(&patch).send().await?
            };
            println!("{}", resp.text().await?);
        }
    }
    Ok(())
}

async fn post_simple(server: &str, endpoint: &str) -> CliResult {
    let resp = reqwest::Client::new()
        .post(format!("{server}/{endpoint}"))
        .send()
        .await?;
    println!("{}", resp.text().await?);
    Ok(())
}
