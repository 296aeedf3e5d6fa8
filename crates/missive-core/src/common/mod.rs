//! Shared types and error definitions used across the `missive` server.
//!
//! ## Submodules
//!
//! - [`error`] - Error taxonomy for configuration, connectivity, allocation,
//!   store access and caller input.
//! - [`types`] - Identifier newtypes, the message model and pagination types.
//! - [`proto`] - Generated allocator service bindings.

pub mod error;
pub mod types;

pub use error::{
    AllocationError, ConfigError, ConnectError, Error, QueryInputError, Result, StoreError,
};

/// gRPC service and message definitions generated from
/// `proto/allocator.proto`.
///
/// ## Service
///
/// - `IdGenerator::GenerateId` - Returns one globally unique 63-bit identifier
///   per call. The request carries no payload.
///
/// Both the client (`id_generator_client`) and server (`id_generator_server`)
/// halves are generated; the server half is used by test allocators.
pub mod proto {
    tonic::include_proto!("allocator");
}
