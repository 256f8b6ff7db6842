//! Host-facing API
//!
//! The host process drives the orchestrator through two surfaces: the
//! [`Interceptor`] for every outgoing request and the
//! [`crate::lifecycle::LifecycleManager`] at start/stop boundaries.

mod interceptor;

pub use interceptor::{Interceptor, InterceptorStatus};
