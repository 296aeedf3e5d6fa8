use super::{AppState, error::ApiError};
use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use chrono::Utc;
use missive_core::{
    QueryInputError,
    types::{
        ConversationId, Message, MessageId, MessageType, OrderBy, PageRequest, PageResult, UserId,
        parse_digits,
    },
};
use serde::Deserialize;

/// Raw listing parameters, exactly as they arrived.
#[derive(Debug, Default, Deserialize)]
pub struct ListMessagesQuery {
    pub after: Option<String>,
    pub limit: Option<String>,
    #[serde(rename = "orderBy")]
    pub order_by: Option<String>,
}

impl ListMessagesQuery {
    /// Validates every field, failing on the first malformed one.
    pub fn into_page_request(self, conversation: &str) -> Result<PageRequest, QueryInputError> {
        let conversation_id: ConversationId = conversation
            .parse()
            .map_err(|e| QueryInputError::new("conversationId", &e))?;

        let mut request = PageRequest::new(conversation_id);

        if let Some(after) = self.after {
            let after: MessageId = after
                .parse()
                .map_err(|e| QueryInputError::new("after", &e))?;
            request = request.after(after);
        }

        if let Some(limit) = self.limit {
            let limit = parse_digits(&limit).map_err(|e| QueryInputError::new("limit", &e))?;
            request = request.limit(limit);
        }

        if let Some(order_by) = self.order_by {
            let order_by: OrderBy = order_by
                .parse()
                .map_err(|e| QueryInputError::new("orderBy", &e))?;
            request = request.order_by(order_by);
        }

        Ok(request)
    }
}

/// `GET /api/v1/conversations/{conversationId}/messages`
pub async fn list_messages(
    State(state): State<AppState>,
    Path(conversation): Path<String>,
    query: Result<Query<ListMessagesQuery>, QueryRejection>,
) -> Result<Json<PageResult>, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::InvalidQueryString(e.body_text()))?;
    let request = query.into_page_request(&conversation)?;
    let page = state.engine.list(&request).await?;
    Ok(Json(page))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMessageBody {
    pub sender_id: UserId,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageType,
}

/// `POST /api/v1/conversations/{conversationId}/messages`
///
/// Only routed when an allocator is configured.
pub async fn create_message(
    State(state): State<AppState>,
    Path(conversation): Path<String>,
    body: Result<Json<CreateMessageBody>, JsonRejection>,
) -> Result<(StatusCode, Json<Message>), ApiError> {
    let receiver_id: ConversationId = conversation
        .parse()
        .map_err(|e| QueryInputError::new("conversationId", &e))?;
    let Json(body) = body.map_err(|e| ApiError::InvalidBody(e.body_text()))?;

    let Some(allocator) = state.allocator.as_ref() else {
        return Err(ApiError::NoAllocator);
    };

    let id = allocator.allocate().await?;
    let message = Message {
        id,
        sender_id: body.sender_id,
        receiver_id,
        content: body.content,
        kind: body.kind,
        created_at: Utc::now(),
        updated_at: None,
        deleted_at: None,
    };

    state.engine.store().insert_message(&message).await?;
    tracing::debug!(id = %message.id, conversation = %receiver_id, "Message created");

    Ok((StatusCode::CREATED, Json(message)))
}
