//! Windowed incremental search over the case API.

pub mod fetcher;
pub mod window;

pub use fetcher::{FetchState, IncrementalFetcher, Page};
