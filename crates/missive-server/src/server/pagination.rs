//! Keyset pagination over a [`MessageStore`].
//!
//! A page is one range read: the cursor becomes an exclusive id bound, the
//! store sorts, and one row beyond `limit` is fetched to learn whether more
//! rows exist. No offsets, no count queries.

use crate::store::{MessageStore, RangeQuery};
use crate::telemetry::{increment_page_queries, increment_store_errors};
use missive_core::{
    StoreError,
    types::{PageRequest, PageResult},
};
use std::sync::Arc;

#[derive(Clone)]
pub struct PaginationEngine {
    store: Arc<dyn MessageStore>,
}

impl PaginationEngine {
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    /// Returns one page of `request.conversation_id`.
    ///
    /// `has_more` is true iff rows beyond the returned page match the same
    /// cursor and direction. Without a limit the whole remainder is returned
    /// and `has_more` is always false.
    #[tracing::instrument(
        level = "debug",
        skip(self, request),
        fields(
            conversation = %request.conversation_id,
            after = ?request.after.map(|a| a.get()),
            limit = ?request.limit,
            order_by = %request.order_by,
        )
    )]
    pub async fn list(&self, request: &PageRequest) -> Result<PageResult, StoreError> {
        let query = RangeQuery::for_page(request);

        let mut data = self.store.find_range(&query).await.map_err(|e| {
            increment_store_errors();
            tracing::error!(error = %e, "Message range read failed");
            e
        })?;
        increment_page_queries();

        let has_more = match request.limit {
            Some(limit) => {
                let limit = usize::try_from(limit).unwrap_or(usize::MAX);
                let more = data.len() > limit;
                data.truncate(limit);
                more
            }
            None => false,
        };

        tracing::debug!(rows = data.len(), has_more, "Served page");
        Ok(PageResult { data, has_more })
    }
}
