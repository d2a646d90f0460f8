//! # Octopus Core
//!
//! Core types, traits, and error handling for the Octopus API Gateway.
//!
//! This crate provides the collaborator surface used by gateway filters:
//! - Filter, filter spec and filter context traits
//! - Filter registry and per-route filter chain
//! - A default in-memory filter context
//! - Error types

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod context;
pub mod error;
pub mod filter;

pub use context::{request_host, Body, HttpFilterContext, RemoteAddr, StateBag};
pub use error::{Error, Result};
pub use filter::{Filter, FilterChain, FilterContext, FilterRegistry, FilterSpec};

// Re-export commonly used HTTP types
pub use bytes::Bytes;
pub use http::{Method, Request, Response, StatusCode};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::context::{Body, HttpFilterContext, RemoteAddr, StateBag};
    pub use crate::error::{Error, Result};
    pub use crate::filter::{Filter, FilterChain, FilterContext, FilterRegistry, FilterSpec};
}
