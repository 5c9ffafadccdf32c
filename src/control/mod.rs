//! In-band control protocol for worker channels.
//!
//! This module provides:
//! - Protocol types and classification of inbound messages
//! - The interceptor that answers control requests on the owner side
//! - The client that issues them from the worker side
//!
//! Control messages are JSON objects distinguished by their `type` field and
//! share the channel with ordinary application traffic.

pub mod client;
pub mod interceptor;
pub mod protocol;

pub use client::{SecretClient, SecretClientError, DEFAULT_REQUEST_TIMEOUT};
pub use interceptor::ControlInterceptor;
pub use protocol::*;
