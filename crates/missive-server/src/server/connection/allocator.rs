//! Identifier allocation over a supervised channel.
//!
//! [`IdAllocationClient::allocate`] is the only write-path dependency on the
//! external allocator. Its contract:
//!
//! - No RPC is attempted unless the supervisor is `Initialized`; otherwise it
//!   fails fast with [`AllocationError::NotReady`].
//! - Exactly one unary `GenerateId` call per invocation, with no implicit
//!   retry and no local caching of identifiers.
//! - Calls are independent and may run concurrently; they multiplex over the
//!   shared HTTP/2 connection. Completion order is unspecified.

use crate::connection::supervisor::ConnectionSupervisor;
use crate::telemetry::{increment_allocation_failures, increment_allocations};
use missive_core::{
    AllocationError,
    proto::{GenerateIdRequest, id_generator_client::IdGeneratorClient},
    types::{ConnectionState, MessageId},
};
use std::sync::Arc;

/// Allocates globally unique message identifiers from one allocator.
#[derive(Clone)]
pub struct IdAllocationClient {
    supervisor: Arc<ConnectionSupervisor>,
    debug: bool,
}

impl IdAllocationClient {
    pub fn new(supervisor: Arc<ConnectionSupervisor>) -> Self {
        Self {
            supervisor,
            debug: false,
        }
    }

    /// Logs every request and failure at debug level.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn supervisor(&self) -> &Arc<ConnectionSupervisor> {
        &self.supervisor
    }

    pub fn state(&self) -> ConnectionState {
        self.supervisor.state()
    }

    /// Requests one identifier.
    ///
    /// # Errors
    ///
    /// - [`AllocationError::NotReady`] if the channel is not ready. No RPC is
    ///   issued.
    /// - [`AllocationError::AllocationFailed`] if the RPC fails or returns an
    ///   identifier outside the 63-bit non-negative range.
    pub async fn allocate(&self) -> Result<MessageId, AllocationError> {
        if self.debug {
            tracing::debug!(upstream = %self.supervisor.label(), "Requesting ID");
        }

        let channel = self.supervisor.ready_channel().inspect_err(|e| {
            if self.debug {
                tracing::debug!(upstream = %self.supervisor.label(), "Allocator not ready: {e}");
            }
        })?;

        let result = IdGeneratorClient::new(channel)
            .generate_id(GenerateIdRequest {})
            .await
            .map_err(|status| AllocationError::AllocationFailed {
                reason: format!("{:?}: {}", status.code(), status.message()),
            })
            .and_then(|response| {
                let raw = response.into_inner().id;
                MessageId::try_from(raw).map_err(|e| AllocationError::AllocationFailed {
                    reason: e.to_string(),
                })
            });

        match &result {
            Ok(_) => increment_allocations(),
            Err(e) => {
                increment_allocation_failures();
                if self.debug {
                    tracing::debug!(upstream = %self.supervisor.label(), "Allocation error: {e}");
                }
            }
        }

        result
    }
}
