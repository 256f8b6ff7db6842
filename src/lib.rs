//! # Offline Cache
//!
//! Request-interception caching orchestrator that keeps a client
//! application usable while the network is slow or gone.
//!
//! ## Features
//!
//! - Per-request classification into bypass, structured-API, navigation
//!   and opportunistic handling
//! - Generational response store with atomic activation and sweep
//! - Structured store for decoded API payloads
//! - Install/activate lifecycle driven by a manifest of must-cache URLs
//! - Layered offline fallbacks that never surface a hard failure
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │              Host application / proxy client             │
//! ├─────────────────────────────────────────────────────────┤
//! │         Interceptor::handle      LifecycleManager        │
//! │  ┌─────────┐  ┌────────────┐  ┌──────────────────────┐  │
//! │  │ Router  │──│ Strategies │──│ ResponseStore (SQLite)│  │
//! │  │         │  │            │──│ StructuredStore       │  │
//! │  └─────────┘  └────────────┘  └──────────────────────┘  │
//! │                      │                                   │
//! │                  Fetcher (reqwest)                       │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod models;
pub mod network;
pub mod proxy;
pub mod routing;
pub mod storage;
pub mod strategy;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
