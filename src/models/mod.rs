//! Data models shared by the router, strategies and stores

pub mod generation;
pub mod request;
pub mod response;

pub use generation::*;
pub use request::*;
pub use response::*;
