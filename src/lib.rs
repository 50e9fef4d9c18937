//! # cacheproxy
//!
//! An in-memory caching reverse proxy on a from-scratch async HTTP/1.1 stack.
//!
//! GET requests are keyed by a SHA-256 digest of method, target and body;
//! a hit is replayed from memory, a miss is forwarded to the origin and its
//! reply stored before it is returned. Everything else is forwarded as is.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cacheproxy::{CachingProxy, OriginClient, Server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let proxy = CachingProxy::new(OriginClient::new("127.0.0.1:9090"));
//!     let server = Server::bind("127.0.0.1:8080").await?;
//!     println!("Proxying http://127.0.0.1:8080 -> 127.0.0.1:9090");
//!     server.run(move |req| {
//!         let proxy = proxy.clone();
//!         async move { proxy.handle(req).await }
//!     }).await?;
//!     Ok(())
//! }
//! ```

// ── Protocol and transport ────────────────────────────────────────────────────
pub mod client;
pub mod http;
pub mod server;

// ── Caching proxy core ────────────────────────────────────────────────────────
pub mod cache;
pub mod proxy;

// ── Process glue ──────────────────────────────────────────────────────────────
pub mod cli;
pub mod config;
pub mod logging;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use cache::{CacheKey, CacheStore, CachedResponse};
pub use client::{ClientError, OriginClient};
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use proxy::{CacheStatus, CachingProxy};
pub use server::{Server, ServerError};
