//! dnsgate - a caching, blacklist-filtering DNS forwarder.
//!
//! The library exposes every layer so the benchmarks and integration tests
//! can drive them directly.

pub mod cache;
pub mod config;
pub mod dns;
pub mod error;
pub mod filter;
pub mod proxy;
pub mod resolver;
pub mod stats;
pub mod transport;
pub mod upstream;
