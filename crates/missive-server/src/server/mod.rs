//! Message service internals.
//!
//! ## Structure
//!
//! - [`connection`] - Supervised allocator channel and the allocation client.
//! - [`pagination`] - Keyset pagination over the message store.
//! - [`store`] - The message store gateway and its implementations.
//! - [`api`] - HTTP routes, request validation and error mapping.
//! - [`config`] - CLI/environment configuration.
//! - [`telemetry`] - Logging, optional OpenTelemetry export and metrics.

pub mod api;
pub mod config;
pub mod connection;
pub mod pagination;
pub mod store;
pub mod telemetry;
