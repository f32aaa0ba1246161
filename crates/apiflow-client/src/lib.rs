//! apiflow HTTP transport
//!
//! Implements the core `Transport` trait over reqwest, mapping HTTP
//! responses into extraction-ready envelopes.

pub mod http;

pub use http::HttpClient;
