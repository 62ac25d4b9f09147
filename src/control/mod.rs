//! Control-channel client and everything a `CONNECT` spawns.
//!
//! Grounded in `router-core::service::registry`'s shape (one long-running
//! background task that blocks on an external stream and reacts to
//! messages) generalized from Redis-stream polling to the line-oriented
//! TCP control protocol `spec.md` §4.D describes, and in
//! `router-core::system::signal`/`terminator` for the shutdown wiring.

pub mod client;
pub mod data_channel;
pub mod dispatch;

pub use client::ControlClient;
