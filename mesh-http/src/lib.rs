//! HTTP transport for the mesh API framework.
//!
//! The server side is an axum adapter over the shared dispatch core: the
//! routing table is keyed by prefixed wire paths with `id` placeholder
//! tokens, and every request flows through the same pipeline as the other
//! transports. The client side drives a bundle specification over
//! reqwest.

mod client;
mod server;

pub use client::HttpClient;
pub use server::{router, serve, HttpOptions, HttpResult, HttpServer};
