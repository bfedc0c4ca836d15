//! Length-framed message transport for the mesh API framework.
//!
//! Speaks the `mesh/1` protocol: a header frame, an optional context
//! frame, and an optional payload frame, each length-delimited on a TCP
//! stream. Dispatch is the same pipeline every other transport uses.

pub mod codec;

mod client;
mod server;

pub use client::MsgClient;
pub use codec::{WireReply, WireRequest, VERSION};
pub use server::MsgServer;
