//! Local HTTP interception endpoint
//!
//! Lets hosts that cannot call [`crate::api::Interceptor`] in-process point
//! their HTTP proxy setting at the orchestrator instead.

pub mod server;

pub use server::{bind_and_run, run_server};
