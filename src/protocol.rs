//! Push-channel protocol between the backend and live feed clients.

use crate::model::{Comment, CommentId, Post, PostId, UserId};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Server → client envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushMessage {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub data: Value,
    /// The user whose action produced the event
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_filter: Option<String>,
}

/// Client → server control frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    Ping,
    LocationChange { location_filter: Option<String> },
}

impl ControlMessage {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Event names for server push
pub mod events {
    pub const POST_CREATED: &str = "post_created";
    pub const POST_DELETED: &str = "post_deleted";
    pub const POST_LIKE_TOGGLED: &str = "post_like_toggled";
    pub const COMMENT_CREATED: &str = "comment_created";
    pub const COMMENT_DELETED: &str = "comment_deleted";
    pub const COMMENT_LIKE_TOGGLED: &str = "comment_like_toggled";
    pub const PONG: &str = "pong";
    pub const CONNECTION_ESTABLISHED: &str = "connection_established";
    pub const LOCATION_CHANGED: &str = "location_changed";
}

/// A decoded push event
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    PostCreated(Box<Post>),
    PostDeleted {
        post_id: PostId,
    },
    PostLikeToggled {
        post_id: PostId,
        liked: bool,
        likes_count: u32,
        actor: Option<UserId>,
    },
    CommentCreated(Box<Comment>),
    CommentDeleted {
        post_id: PostId,
        comment_id: CommentId,
    },
    CommentLikeToggled {
        post_id: PostId,
        comment_id: CommentId,
        liked: bool,
        likes_count: u32,
        actor: Option<UserId>,
    },
    Pong,
    ConnectionEstablished,
    LocationChanged {
        location_filter: Option<String>,
    },
    /// Anything this client does not understand
    Unknown(String),
}

#[derive(Deserialize)]
struct PostRef {
    post_id: PostId,
}

#[derive(Deserialize)]
struct CommentRef {
    post_id: PostId,
    comment_id: CommentId,
}

#[derive(Deserialize)]
struct LikeToggle {
    post_id: PostId,
    #[serde(default)]
    comment_id: Option<CommentId>,
    liked: bool,
    likes_count: u32,
}

#[derive(Deserialize)]
struct LocationRef {
    #[serde(default)]
    location_filter: Option<String>,
}

impl PushMessage {
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("Malformed push message")
    }

    /// Decode `data` according to `type`.
    pub fn into_event(self) -> Result<FeedEvent> {
        let PushMessage {
            event_type,
            data,
            user_id,
            ..
        } = self;

        let event = match event_type.as_str() {
            events::POST_CREATED => FeedEvent::PostCreated(Box::new(decode(&event_type, data)?)),
            events::POST_DELETED => {
                let r: PostRef = decode(&event_type, data)?;
                FeedEvent::PostDeleted { post_id: r.post_id }
            }
            events::POST_LIKE_TOGGLED => {
                let t: LikeToggle = decode(&event_type, data)?;
                FeedEvent::PostLikeToggled {
                    post_id: t.post_id,
                    liked: t.liked,
                    likes_count: t.likes_count,
                    actor: user_id,
                }
            }
            events::COMMENT_CREATED => {
                FeedEvent::CommentCreated(Box::new(decode(&event_type, data)?))
            }
            events::COMMENT_DELETED => {
                let r: CommentRef = decode(&event_type, data)?;
                FeedEvent::CommentDeleted {
                    post_id: r.post_id,
                    comment_id: r.comment_id,
                }
            }
            events::COMMENT_LIKE_TOGGLED => {
                let t: LikeToggle = decode(&event_type, data)?;
                let comment_id = t
                    .comment_id
                    .context("comment_like_toggled without comment_id")?;
                FeedEvent::CommentLikeToggled {
                    post_id: t.post_id,
                    comment_id,
                    liked: t.liked,
                    likes_count: t.likes_count,
                    actor: user_id,
                }
            }
            events::PONG => FeedEvent::Pong,
            events::CONNECTION_ESTABLISHED => FeedEvent::ConnectionEstablished,
            events::LOCATION_CHANGED => {
                let r: LocationRef = decode(&event_type, data)?;
                FeedEvent::LocationChanged {
                    location_filter: r.location_filter,
                }
            }
            _ => FeedEvent::Unknown(event_type),
        };
        Ok(event)
    }
}

impl FeedEvent {
    /// Parse a raw text frame straight into an event.
    pub fn decode(text: &str) -> Result<Self> {
        PushMessage::parse(text)?.into_event()
    }
}

fn decode<T: serde::de::DeserializeOwned>(event_type: &str, data: Value) -> Result<T> {
    serde_json::from_value(data).with_context(|| format!("Invalid payload for {}", event_type))
}
