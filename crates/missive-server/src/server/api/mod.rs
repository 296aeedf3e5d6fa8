//! HTTP facade.
//!
//! ## Routes
//!
//! - `GET /api/v1/conversations/{conversationId}/messages` - One page of a
//!   conversation. Query: `after`, `limit`, `orderBy`.
//! - `POST /api/v1/conversations/{conversationId}/messages` - Create a message
//!   with an allocator-issued id. Routed only when an allocator is configured.
//! - `GET /healthcheck` - `UP` / `DOWN` from the allocator connection states.

pub mod error;
pub mod handler;
pub mod health;

use crate::connection::{ConnectionSupervisor, IdAllocationClient};
use crate::pagination::PaginationEngine;
use axum::Router;
use axum::routing::get;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use error::ApiError;

pub const MESSAGES_PATH: &str = "/api/v1/conversations/{conversation_id}/messages";
pub const HEALTH_PATH: &str = "/healthcheck";

#[derive(Clone)]
pub struct AppState {
    pub engine: PaginationEngine,
    pub allocator: Option<IdAllocationClient>,
    /// Every supervised upstream; all must be ready for `UP`.
    pub supervisors: Arc<Vec<Arc<ConnectionSupervisor>>>,
}

impl AppState {
    /// Read-only state: listing and health only.
    pub fn new(engine: PaginationEngine) -> Self {
        Self {
            engine,
            allocator: None,
            supervisors: Arc::new(Vec::new()),
        }
    }

    /// Enables message creation and tracks the allocator's supervisor in the
    /// health check.
    pub fn with_allocator(mut self, allocator: IdAllocationClient) -> Self {
        let mut supervisors = self.supervisors.as_ref().clone();
        supervisors.push(allocator.supervisor().clone());
        self.supervisors = Arc::new(supervisors);
        self.allocator = Some(allocator);
        self
    }
}

pub fn router(state: AppState) -> Router {
    let messages = if state.allocator.is_some() {
        get(handler::list_messages).post(handler::create_message)
    } else {
        get(handler::list_messages)
    };

    Router::new()
        .route(MESSAGES_PATH, messages)
        .route(HEALTH_PATH, get(health::healthcheck))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
