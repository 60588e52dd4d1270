//! readaloud-core — Pure types, text segmentation, and the page model.
//!
//! No async runtime, no I/O, no platform dependencies.

pub mod dom;
pub mod highlight;
pub mod text_prep;
pub mod types;
