//! HTTP surface: the audio stream plus a small JSON control API

pub mod handlers;
pub mod server;

pub use server::{AppState, WebServer};
