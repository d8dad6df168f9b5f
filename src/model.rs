//! Wire types shared with the Street Meat backend.

use crate::timestamp::serde_utc;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Content prefix marking a backend-created per-(user, location) anchor post.
pub const PROFILE_POST_SENTINEL: &str = "USER_PROFILE:";

/// Pseudo-location meaning "every location".
pub const ALL_LOCATIONS: &str = "all";

pub type UserId = i64;
pub type PostId = i64;
pub type CommentId = i64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default)]
    pub pickup_location: Option<String>,
    #[serde(default)]
    pub time_slot: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(with = "serde_utc")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub orders: Vec<Order>,
}

impl User {
    /// Initials for avatar fallbacks ("Jane Doe" -> "JD").
    pub fn initials(&self) -> String {
        self.name
            .split_whitespace()
            .filter_map(|part| part.chars().next())
            .flat_map(char::to_uppercase)
            .collect()
    }

    /// The user's order for a given pickup location, if any.
    pub fn order_at(&self, location: &str) -> Option<&Order> {
        self.orders.iter().find(|o| o.pickup_location == location)
    }
}

/// Minimal user reference as it appears in `liked_by` lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRef {
    pub id: UserId,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MenuItem {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub price: String,
    #[serde(default = "default_true")]
    pub is_available: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub user_id: UserId,
    pub menu_item_id: i64,
    pub pickup_location: String,
    pub time_slot: String,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(with = "serde_utc")]
    pub created_at: DateTime<Utc>,
    pub menu_item: MenuItem,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: PostId,
    pub content: String,
    #[serde(default)]
    pub location_filter: Option<String>,
    pub author_id: UserId,
    #[serde(with = "serde_utc")]
    pub created_at: DateTime<Utc>,
    pub author: User,
    #[serde(default)]
    pub likes_count: u32,
    #[serde(default)]
    pub comments_count: u32,
    #[serde(default)]
    pub comments: Vec<Comment>,
    /// Whether the *viewing* user likes this post.
    #[serde(default, deserialize_with = "null_as_false")]
    pub is_liked_by_user: bool,
    /// Only populated on profile posts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub liked_by: Vec<UserRef>,
}

impl Post {
    pub fn is_profile_post(&self) -> bool {
        self.content.starts_with(PROFILE_POST_SENTINEL)
    }

    pub fn is_liked_by(&self, user_id: UserId) -> bool {
        self.liked_by.iter().any(|u| u.id == user_id)
    }

    /// Depth-first lookup through comments and their replies.
    pub fn find_comment_mut(&mut self, comment_id: CommentId) -> Option<&mut Comment> {
        find_in(&mut self.comments, comment_id)
    }

    pub fn contains_comment(&self, comment_id: CommentId) -> bool {
        fn walk(comments: &[Comment], id: CommentId) -> bool {
            comments
                .iter()
                .any(|c| c.id == id || walk(&c.replies, id))
        }
        walk(&self.comments, comment_id)
    }

    /// Remove a comment wherever it sits in the tree. Returns the removed comment.
    pub fn remove_comment(&mut self, comment_id: CommentId) -> Option<Comment> {
        remove_from(&mut self.comments, comment_id)
    }
}

fn find_in(comments: &mut [Comment], id: CommentId) -> Option<&mut Comment> {
    for comment in comments.iter_mut() {
        if comment.id == id {
            return Some(comment);
        }
        if let Some(found) = find_in(&mut comment.replies, id) {
            return Some(found);
        }
    }
    None
}

fn remove_from(comments: &mut Vec<Comment>, id: CommentId) -> Option<Comment> {
    if let Some(pos) = comments.iter().position(|c| c.id == id) {
        return Some(comments.remove(pos));
    }
    comments
        .iter_mut()
        .find_map(|c| remove_from(&mut c.replies, id))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: CommentId,
    pub content: String,
    pub author_id: UserId,
    pub post_id: PostId,
    #[serde(default)]
    pub parent_id: Option<CommentId>,
    #[serde(with = "serde_utc")]
    pub created_at: DateTime<Utc>,
    pub author: User,
    #[serde(default)]
    pub likes_count: u32,
    #[serde(default)]
    pub replies: Vec<Comment>,
    #[serde(default, deserialize_with = "null_as_false")]
    pub is_liked_by_user: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LikeResponse {
    pub liked: bool,
    pub likes_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PickupLocation {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub address: String,
}

/// Body of `POST /social/posts`.
#[derive(Debug, Clone, Serialize)]
pub struct NewPost<'a> {
    pub content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_filter: Option<&'a str>,
}

/// Body of `POST /social/posts/{id}/comments`.
#[derive(Debug, Clone, Serialize)]
pub struct NewComment<'a> {
    pub content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<CommentId>,
}

// The backend sends `"is_liked_by_user": null` for anonymous viewers.
fn null_as_false<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or(false))
}
