//! readaloud-lib — Read-aloud engine.
//!
//! Audio cache and fetch queue, playback, word highlighting, reading
//! sessions, settings, and the HTTP control API. Depends on readaloud-core
//! for pure types, text segmentation, and the page model.

pub mod audio;
pub mod client;
pub mod context;
pub mod highlighter;
pub mod page;
pub mod player;
pub mod reader;
pub mod server;
pub mod settings;
pub mod state;

// Re-export readaloud-core for convenience
pub use readaloud_core;
