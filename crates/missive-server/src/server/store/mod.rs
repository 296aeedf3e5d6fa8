//! Message store gateway.
//!
//! [`MessageStore`] is the boundary the pagination engine reads through. Its
//! contract:
//!
//! - [`MessageStore::find_range`] returns rows matching a [`RangePredicate`],
//!   already sorted by id in the requested direction and capped at
//!   `row_limit`. Callers never re-sort.
//! - The full 63-bit identifier domain is supported for both message and
//!   conversation ids.
//! - Failures surface as [`StoreError`]; nothing is swallowed.
//!
//! Implementations:
//!
//! - [`memory::InMemoryMessageStore`] - `BTreeMap`-backed, used when no
//!   database is configured and in tests.
//! - [`postgres::PgMessageStore`] - PostgreSQL via `sqlx`.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use missive_core::{
    StoreError,
    types::{ConversationId, Message, MessageId, OrderBy, PageRequest},
};

pub use memory::InMemoryMessageStore;
pub use postgres::PgMessageStore;

/// Exclusive bound on the message id, derived from a pagination cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdBound {
    /// `id > bound`
    GreaterThan(MessageId),
    /// `id < bound`
    LessThan(MessageId),
}

impl IdBound {
    #[inline]
    pub fn admits(self, id: MessageId) -> bool {
        match self {
            Self::GreaterThan(bound) => id > bound,
            Self::LessThan(bound) => id < bound,
        }
    }
}

/// `receiver_id = conversation_id [AND id >/< bound]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangePredicate {
    pub conversation_id: ConversationId,
    pub id_bound: Option<IdBound>,
}

impl RangePredicate {
    pub fn matches(&self, message: &Message) -> bool {
        message.receiver_id == self.conversation_id
            && self.id_bound.is_none_or(|bound| bound.admits(message.id))
    }
}

/// A bounded, ordered range read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeQuery {
    pub predicate: RangePredicate,
    pub order_by: OrderBy,
    /// Maximum number of rows to return; `None` means unbounded.
    pub row_limit: Option<u64>,
}

impl RangeQuery {
    /// Translates a page request into the range read that serves it.
    ///
    /// The cursor is exclusive and points in the direction of travel: `id >
    /// after` ascending, `id < after` descending. One extra row is requested
    /// when a limit is given so that the has-more signal can be derived
    /// without a count query.
    pub fn for_page(request: &PageRequest) -> Self {
        let id_bound = request.after.map(|after| match request.order_by {
            OrderBy::IdAsc => IdBound::GreaterThan(after),
            OrderBy::IdDesc => IdBound::LessThan(after),
        });

        Self {
            predicate: RangePredicate {
                conversation_id: request.conversation_id,
                id_bound,
            },
            order_by: request.order_by,
            row_limit: request.limit.map(|limit| limit.saturating_add(1)),
        }
    }
}

/// Read/write access to persisted messages.
#[async_trait]
pub trait MessageStore: Send + Sync + 'static {
    /// Returns the rows matching `query.predicate`, sorted by id per
    /// `query.order_by`, at most `query.row_limit` of them.
    async fn find_range(&self, query: &RangeQuery) -> Result<Vec<Message>, StoreError>;

    /// Inserts one message. Fails with [`StoreError::Duplicate`] if the id is
    /// taken.
    async fn insert_message(&self, message: &Message) -> Result<(), StoreError>;

    /// Inserts a batch atomically: either every message is stored or none is.
    async fn insert_messages(&self, messages: &[Message]) -> Result<(), StoreError>;

    async fn get_message_by_id(&self, id: MessageId) -> Result<Option<Message>, StoreError>;

    /// Deletes every message.
    async fn wipe(&self) -> Result<(), StoreError>;
}
