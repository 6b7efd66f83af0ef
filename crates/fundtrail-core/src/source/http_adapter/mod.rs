//! HTTP client for blockchain.info-compatible explorer APIs.
//!
//! Implements [`AddressSource`](super::AddressSource) over plain HTTP GET
//! using `reqwest`, with optional request rate limiting, strict decoding of
//! the `rawaddr` and `multiaddr` payloads, and URL validation.

mod client;
mod connection;
mod parsing;

pub use client::HttpAddressSource;
