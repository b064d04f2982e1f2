//! # virtusim-gateway
//!
//! A small async HTTP gateway in front of the Virtusim balance API. It
//! validates the caller's `apikey`, optionally serves a balance fetched in
//! the last few seconds, and otherwise forwards the lookup and decorates the
//! upstream JSON with gateway metadata.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use virtusim_gateway::cache::MemoryCache;
//! use virtusim_gateway::gateway::{self, BalanceHandler, GatewaySettings};
//! use virtusim_gateway::server::Server;
//! use virtusim_gateway::upstream::{UpstreamConfig, VirtusimClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = VirtusimClient::new(UpstreamConfig::default())?;
//!     let handler = BalanceHandler::new(Arc::new(client), GatewaySettings::default())
//!         .with_cache(Arc::new(MemoryCache::default()));
//!     let router = Arc::new(gateway::router(Arc::new(handler)));
//!
//!     let server = Server::bind("127.0.0.1:3000").await?;
//!     server
//!         .run(move |req| {
//!             let router = Arc::clone(&router);
//!             async move { router.route(req).await }
//!         })
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod gateway;
pub mod http;
pub mod router;
pub mod security;
pub mod server;
pub mod upstream;

pub use gateway::{BalanceHandler, GatewayError};
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use router::Router;
pub use server::{Server, ServerError};
