//! Allocator connectivity.
//!
//! - [`supervisor`] - [`ConnectionSupervisor`](supervisor::ConnectionSupervisor),
//!   the lifecycle owner of one gRPC channel.
//! - [`allocator`] - [`IdAllocationClient`](allocator::IdAllocationClient),
//!   which turns a ready channel into identifiers.

pub mod allocator;
pub mod supervisor;

pub use allocator::IdAllocationClient;
pub use supervisor::{ConnectionSupervisor, SupervisorConfig, TlsPaths};
