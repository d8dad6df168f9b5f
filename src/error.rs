//! Domain-level rejections surfaced to callers.
//!
//! Transport and decoding failures travel as `anyhow::Error`; these variants
//! cover the cases a caller is expected to match on.

use crate::model::PostId;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FeedError {
    #[error("Content is empty")]
    EmptyContent,

    #[error("Content is {len} characters, limit is {max}")]
    ContentTooLong { len: usize, max: usize },

    #[error("Login required")]
    NotAuthenticated,

    #[error("Posting to {feed} requires a pickup location of {feed} (yours: {viewer})")]
    LocationMismatch { feed: String, viewer: String },

    #[error("Only the author or an admin can delete post {post_id}")]
    CannotDelete { post_id: PostId },

    #[error("A newer feed build has already been applied")]
    Superseded,

    #[error("Feed view has been closed")]
    Closed,
}
