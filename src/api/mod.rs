//! MES backend REST client
//!
//! Supplies the submission functions the queue processor drains with, the
//! health check behind the reachability probe, and the REST refresh used as
//! the channel's polling fallback.

pub mod client;
pub mod failure;

pub use client::BackendClient;
pub use failure::RequestFailure;
