//! Structural indexer clients.

pub mod http;

pub use http::HttpIndexer;
