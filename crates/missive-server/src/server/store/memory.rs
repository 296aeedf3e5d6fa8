use super::{IdBound, MessageStore, RangeQuery};
use async_trait::async_trait;
use missive_core::{
    StoreError,
    types::{ConversationId, Message, MessageId},
};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;

#[derive(Default)]
struct Tables {
    /// Primary index. Key order is `(conversation, id)`, so a conversation's
    /// messages form one contiguous, id-sorted run.
    by_conversation: BTreeMap<(ConversationId, MessageId), Message>,
    /// Secondary index for lookups by id alone.
    conversation_of: HashMap<MessageId, ConversationId>,
}

impl Tables {
    fn insert(&mut self, message: Message) {
        self.conversation_of.insert(message.id, message.receiver_id);
        self.by_conversation
            .insert((message.receiver_id, message.id), message);
    }
}

/// Message store held in process memory.
///
/// Used when no database is configured, and by tests. Range reads walk the
/// primary `BTreeMap` directly; there is no sort step.
#[derive(Default)]
pub struct InMemoryMessageStore {
    tables: RwLock<Tables>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tables.read().conversation_of.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn find_range(&self, query: &RangeQuery) -> Result<Vec<Message>, StoreError> {
        let conversation = query.predicate.conversation_id;
        let (lower, upper) = match query.predicate.id_bound {
            None => (
                Bound::Included((conversation, MessageId::MIN)),
                Bound::Included((conversation, MessageId::MAX)),
            ),
            Some(IdBound::GreaterThan(after)) => (
                Bound::Excluded((conversation, after)),
                Bound::Included((conversation, MessageId::MAX)),
            ),
            Some(IdBound::LessThan(before)) => (
                Bound::Included((conversation, MessageId::MIN)),
                Bound::Excluded((conversation, before)),
            ),
        };

        let take = query
            .row_limit
            .map_or(usize::MAX, |limit| usize::try_from(limit).unwrap_or(usize::MAX));

        let tables = self.tables.read();
        let range = tables.by_conversation.range((lower, upper)).map(|(_, m)| m);

        let rows = if query.order_by.is_ascending() {
            range.take(take).cloned().collect()
        } else {
            range.rev().take(take).cloned().collect()
        };
        Ok(rows)
    }

    async fn insert_message(&self, message: &Message) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        if tables.conversation_of.contains_key(&message.id) {
            return Err(StoreError::Duplicate {
                id: message.id.get(),
            });
        }
        tables.insert(message.clone());
        Ok(())
    }

    async fn insert_messages(&self, messages: &[Message]) -> Result<(), StoreError> {
        let mut tables = self.tables.write();

        // Validate the whole batch before touching the tables.
        let mut batch = HashSet::with_capacity(messages.len());
        for message in messages {
            if tables.conversation_of.contains_key(&message.id)
                || !batch.insert(message.id)
            {
                return Err(StoreError::Duplicate {
                    id: message.id.get(),
                });
            }
        }

        for message in messages {
            tables.insert(message.clone());
        }
        Ok(())
    }

    async fn get_message_by_id(&self, id: MessageId) -> Result<Option<Message>, StoreError> {
        let tables = self.tables.read();
        Ok(tables
            .conversation_of
            .get(&id)
            .and_then(|conversation| tables.by_conversation.get(&(*conversation, id)))
            .cloned())
    }

    async fn wipe(&self) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        tables.by_conversation.clear();
        tables.conversation_of.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::RangePredicate;
    use chrono::Utc;
    use missive_core::types::{MessageType, OrderBy, UserId};

    fn message(id: u64, conversation: u64) -> Message {
        Message {
            id: MessageId::new(id).unwrap(),
            sender_id: UserId::new(1).unwrap(),
            receiver_id: ConversationId::new(conversation).unwrap(),
            content: format!("message {id}"),
            kind: MessageType::Text,
            created_at: Utc::now(),
            updated_at: None,
            deleted_at: None,
        }
    }

    fn query(
        conversation: u64,
        id_bound: Option<IdBound>,
        order_by: OrderBy,
        row_limit: Option<u64>,
    ) -> RangeQuery {
        RangeQuery {
            predicate: RangePredicate {
                conversation_id: ConversationId::new(conversation).unwrap(),
                id_bound,
            },
            order_by,
            row_limit,
        }
    }

    fn ids(rows: &[Message]) -> Vec<u64> {
        rows.iter().map(|m| m.id.get()).collect()
    }

    #[tokio::test]
    async fn range_is_partitioned_and_sorted() {
        let store = InMemoryMessageStore::new();
        // Interleave conversations and insert out of order.
        for id in [5, 1, 4, 2, 3] {
            store.insert_message(&message(id, 2)).await.unwrap();
            store.insert_message(&message(id + 100, 3)).await.unwrap();
        }

        let asc = store
            .find_range(&query(2, None, OrderBy::IdAsc, None))
            .await
            .unwrap();
        assert_eq!(ids(&asc), [1, 2, 3, 4, 5]);

        let desc = store
            .find_range(&query(3, None, OrderBy::IdDesc, Some(2)))
            .await
            .unwrap();
        assert_eq!(ids(&desc), [105, 104]);
    }

    #[tokio::test]
    async fn bounds_are_exclusive() {
        let store = InMemoryMessageStore::new();
        let batch: Vec<_> = (1..=10).map(|id| message(id, 2)).collect();
        store.insert_messages(&batch).await.unwrap();

        let after = MessageId::new(7).unwrap();
        let rows = store
            .find_range(&query(2, Some(IdBound::GreaterThan(after)), OrderBy::IdAsc, None))
            .await
            .unwrap();
        assert_eq!(ids(&rows), [8, 9, 10]);

        let rows = store
            .find_range(&query(2, Some(IdBound::LessThan(after)), OrderBy::IdDesc, Some(3)))
            .await
            .unwrap();
        assert_eq!(ids(&rows), [6, 5, 4]);
    }

    #[tokio::test]
    async fn extreme_identifiers_are_reachable() {
        let store = InMemoryMessageStore::new();
        store
            .insert_message(&message(MessageId::MAX.get(), ConversationId::MAX.get()))
            .await
            .unwrap();
        store.insert_message(&message(0, ConversationId::MAX.get())).await.unwrap();

        let rows = store
            .find_range(&query(ConversationId::MAX.get(), None, OrderBy::IdDesc, None))
            .await
            .unwrap();
        assert_eq!(ids(&rows), [MessageId::MAX.get(), 0]);

        let rows = store
            .find_range(&query(
                ConversationId::MAX.get(),
                Some(IdBound::GreaterThan(MessageId::MIN)),
                OrderBy::IdAsc,
                None,
            ))
            .await
            .unwrap();
        assert_eq!(ids(&rows), [MessageId::MAX.get()]);
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected() {
        let store = InMemoryMessageStore::new();
        store.insert_message(&message(1, 2)).await.unwrap();

        // Same id in a different conversation is still a duplicate.
        let err = store.insert_message(&message(1, 3)).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { id: 1 }));
    }

    #[tokio::test]
    async fn failed_batch_leaves_store_untouched() {
        let store = InMemoryMessageStore::new();
        store.insert_message(&message(3, 2)).await.unwrap();

        let batch = [message(1, 2), message(2, 2), message(3, 2)];
        assert!(store.insert_messages(&batch).await.is_err());
        assert_eq!(store.len(), 1);

        let batch = [message(4, 2), message(4, 2)];
        assert!(store.insert_messages(&batch).await.is_err());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn lookup_and_wipe() {
        let store = InMemoryMessageStore::new();
        store.insert_message(&message(9, 4)).await.unwrap();

        let found = store
            .get_message_by_id(MessageId::new(9).unwrap())
            .await
            .unwrap();
        assert_eq!(found.map(|m| m.receiver_id.get()), Some(4));
        assert!(
            store
                .get_message_by_id(MessageId::new(10).unwrap())
                .await
                .unwrap()
                .is_none()
        );

        store.wipe().await.unwrap();
        assert!(store.is_empty());
    }
}
