//! # Message Model and Identifier Types
//!
//! Shared definitions for the values that cross the HTTP, store and allocator
//! boundaries.
//!
//! ## Identifiers
//!
//! Every identifier in the system is a non-negative integer that fits in 63
//! bits, i.e. `0..=i64::MAX`. The bound comes from the relational store
//! (`BIGINT`) and from the allocator contract, which never sets the sign bit.
//! The newtypes below enforce the bound on construction so that nothing past
//! the edge of the system has to re-check it:
//!
//! - [`MessageId`] - Allocator-issued, unique and time-ordered.
//! - [`ConversationId`] - The partition key (`receiverId`) used for listing.
//! - [`UserId`] - The sender of a message.
//!
//! In JSON, identifiers are written as decimal strings and read back from
//! either strings or integers.
//!
//! ## Pagination
//!
//! - [`OrderBy`] - `id:asc` or `id:desc`.
//! - [`PageRequest`] - A validated `(conversationId, after?, limit?, orderBy)`
//!   tuple.
//! - [`PageResult`] - One ordered page plus the has-more signal.

use crate::common::error::Error;
use chrono::{DateTime, Utc};
use core::fmt;
use core::str::FromStr;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Largest value representable by any identifier (`2^63 - 1`).
pub const MAX_ID: u64 = i64::MAX as u64;

/// Parses a string made only of ASCII digits into a `u64`.
///
/// Signs, whitespace, separators and exponents are all rejected; the digit
/// string may not be empty. Values above [`MAX_ID`] are reported as out of
/// range rather than as malformed.
pub fn parse_digits(input: &str) -> Result<u64, Error> {
    if input.is_empty() || !input.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::NotADigitString {
            input: input.to_string(),
        });
    }

    let value = input.parse::<u64>().map_err(|_| Error::IdOutOfRange {
        value: input.to_string(),
    })?;

    if value > MAX_ID {
        return Err(Error::IdOutOfRange {
            value: input.to_string(),
        });
    }

    Ok(value)
}

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $expecting:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(u64);

        impl $name {
            pub const MIN: Self = Self(0);
            pub const MAX: Self = Self(MAX_ID);

            /// Wraps `value`, failing if it does not fit in 63 bits.
            pub fn new(value: u64) -> Result<Self, Error> {
                if value > MAX_ID {
                    return Err(Error::IdOutOfRange {
                        value: value.to_string(),
                    });
                }
                Ok(Self(value))
            }

            #[inline]
            pub const fn get(self) -> u64 {
                self.0
            }

            /// The value as stored in a signed 64-bit column. Never negative.
            #[inline]
            pub const fn to_i64(self) -> i64 {
                self.0 as i64
            }
        }

        impl TryFrom<u64> for $name {
            type Error = Error;

            fn try_from(value: u64) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl TryFrom<i64> for $name {
            type Error = Error;

            fn try_from(value: i64) -> Result<Self, Self::Error> {
                u64::try_from(value)
                    .map(Self)
                    .map_err(|_| Error::IdOutOfRange {
                        value: value.to_string(),
                    })
            }
        }

        impl From<$name> for u64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                parse_digits(s).map(Self)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                struct IdVisitor;

                impl Visitor<'_> for IdVisitor {
                    type Value = $name;

                    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                        f.write_str($expecting)
                    }

                    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                        v.parse().map_err(E::custom)
                    }

                    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                        $name::try_from(v).map_err(E::custom)
                    }

                    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
                        $name::try_from(v).map_err(E::custom)
                    }
                }

                deserializer.deserialize_any(IdVisitor)
            }
        }
    };
}

define_id!(
    /// Globally unique, time-ordered message identifier issued by the
    /// allocator. Ordering by `MessageId` is ordering by creation time.
    MessageId,
    "a non-negative 63-bit message id"
);

define_id!(
    /// Conversation identifier; stored as the message's `receiverId` and used
    /// as the partition key when listing.
    ConversationId,
    "a non-negative 63-bit conversation id"
);

define_id!(
    /// Identifier of the user who sent a message.
    UserId,
    "a non-negative 63-bit user id"
);

/// The kind of payload a message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    Text,
    Image,
    Video,
    Audio,
    File,
    Gif,
    Sticker,
    Location,
    Poll,
}

impl MessageType {
    pub const ALL: [Self; 9] = [
        Self::Text,
        Self::Image,
        Self::Video,
        Self::Audio,
        Self::File,
        Self::Gif,
        Self::Sticker,
        Self::Location,
        Self::Poll,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::Image => "IMAGE",
            Self::Video => "VIDEO",
            Self::Audio => "AUDIO",
            Self::File => "FILE",
            Self::Gif => "GIF",
            Self::Sticker => "STICKER",
            Self::Location => "LOCATION",
            Self::Poll => "POLL",
        }
    }
}

impl FromStr for MessageType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| Error::UnknownMessageType {
                input: s.to_string(),
            })
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A chat message as persisted by the store.
///
/// `id` is immutable once created and `receiver_id` partitions the keyspace
/// that pagination scans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: ConversationId,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Sort direction for listing. Ordering is always by message id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum OrderBy {
    #[default]
    IdAsc,
    IdDesc,
}

impl OrderBy {
    #[inline]
    pub const fn is_ascending(self) -> bool {
        matches!(self, Self::IdAsc)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::IdAsc => "id:asc",
            Self::IdDesc => "id:desc",
        }
    }
}

impl FromStr for OrderBy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "id:asc" => Ok(Self::IdAsc),
            "id:desc" => Ok(Self::IdDesc),
            other => Err(Error::UnknownOrderBy {
                input: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for OrderBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for OrderBy {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for OrderBy {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

/// A validated listing query.
///
/// `after` is an exclusive cursor: the id of the last message the caller has
/// already seen. `limit = None` means "everything matching".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub conversation_id: ConversationId,
    pub after: Option<MessageId>,
    pub limit: Option<u64>,
    pub order_by: OrderBy,
}

impl PageRequest {
    /// An unbounded ascending listing of the whole conversation.
    pub const fn new(conversation_id: ConversationId) -> Self {
        Self {
            conversation_id,
            after: None,
            limit: None,
            order_by: OrderBy::IdAsc,
        }
    }

    pub const fn after(mut self, after: MessageId) -> Self {
        self.after = Some(after);
        self
    }

    pub const fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub const fn order_by(mut self, order_by: OrderBy) -> Self {
        self.order_by = order_by;
        self
    }
}

/// One page of messages, ordered per the request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResult {
    pub data: Vec<Message>,
    pub has_more: bool,
}

/// Lifecycle of a connection to one allocator endpoint.
///
/// Transitions only move forward, apart from the retry self-loop inside
/// `Initializing`:
///
/// ```text
/// Validating -> Initializing -> Initialized -> Disconnected
///      |             |
///      +-------------+-----> InitializeFailed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    /// Configuration is being checked; no connection attempted yet.
    Validating,
    /// A connect attempt is in flight (or about to be retried).
    Initializing,
    /// The channel is ready; allocations may proceed.
    Initialized,
    /// Configuration was invalid, retries ran out, or the attempt was
    /// cancelled.
    InitializeFailed,
    /// The ready channel was closed on request.
    Disconnected,
}

impl ConnectionState {
    #[inline]
    pub const fn is_ready(self) -> bool {
        matches!(self, Self::Initialized)
    }

    /// Whether the supervisor has stopped trying to connect.
    #[inline]
    pub const fn is_settled(self) -> bool {
        !matches!(self, Self::Validating | Self::Initializing)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validating => "VALIDATING",
            Self::Initializing => "INITIALIZING",
            Self::Initialized => "INITIALIZED",
            Self::InitializeFailed => "INITIALIZE_FAILED",
            Self::Disconnected => "DISCONNECTED",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
