//! Track catalog module

pub mod library;
pub mod track;

pub use library::TrackCatalog;
pub use track::{Catalog, Track};
