//! Combined location feed: order announcements merged with community posts.
//!
//! Every mutation rebuilds the whole list from fresh server data. Builds are
//! sequenced so that a slow, older build can never overwrite a newer one.

use crate::api::DataAccess;
use crate::error::FeedError;
use crate::model::{CommentId, Post, PostId, User, UserId, ALL_LOCATIONS};
use crate::timestamp::time_ago;
use anyhow::Result;
use chrono::{DateTime, Utc};
use futures_util::future::try_join_all;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

/// Maximum post/comment length accepted from the compose box.
pub const MAX_CONTENT_CHARS: usize = 500;

/// Summary used when a user at the location has no matching order on file.
pub const GENERIC_ORDER_SUMMARY: &str = "Placed an order";

/// Which slice of the community a feed shows
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedLocation {
    /// Every post, no order announcements
    All,
    /// A concrete pickup location
    Named(String),
}

impl FeedLocation {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() || raw.eq_ignore_ascii_case(ALL_LOCATIONS) {
            FeedLocation::All
        } else {
            FeedLocation::Named(raw.to_string())
        }
    }

    /// Value for the `location_filter` query parameter
    pub fn as_filter(&self) -> Option<&str> {
        match self {
            FeedLocation::All => None,
            FeedLocation::Named(name) => Some(name),
        }
    }
}

impl fmt::Display for FeedLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedLocation::All => f.write_str(ALL_LOCATIONS),
            FeedLocation::Named(name) => f.write_str(name),
        }
    }
}

/// The authenticated user looking at a feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Viewer {
    pub id: UserId,
    pub pickup_location: Option<String>,
    pub is_admin: bool,
}

impl Viewer {
    pub fn new(id: UserId, pickup_location: Option<String>) -> Self {
        Self {
            id,
            pickup_location,
            is_admin: false,
        }
    }

    pub fn from_user(user: &User) -> Self {
        Self {
            is_admin: user.is_admin,
            ..Self::new(user.id, user.pickup_location.clone())
        }
    }

    /// Authors delete their own posts; admins delete anything.
    pub fn can_delete(&self, post: &Post) -> bool {
        self.is_admin || post.author_id == self.id
    }

    /// Posting into a location feed is reserved for people picking up there.
    pub fn can_post_at(&self, location: &FeedLocation) -> bool {
        match location {
            FeedLocation::All => true,
            FeedLocation::Named(name) => self.pickup_location.as_deref() == Some(name.as_str()),
        }
    }

    /// Likes and comments only need a signed-in viewer.
    pub fn check_signed_in(viewer: Option<&Viewer>) -> Result<&Viewer, FeedError> {
        viewer.ok_or(FeedError::NotAuthenticated)
    }

    /// Capability check callers run before publishing a post.
    pub fn check_can_post(viewer: Option<&Viewer>, location: &FeedLocation) -> Result<(), FeedError> {
        let viewer = viewer.ok_or(FeedError::NotAuthenticated)?;
        if viewer.can_post_at(location) {
            Ok(())
        } else {
            Err(FeedError::LocationMismatch {
                feed: location.to_string(),
                viewer: viewer
                    .pickup_location
                    .clone()
                    .unwrap_or_else(|| "none".to_string()),
            })
        }
    }
}

/// Kind-specific payload of a feed row
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeedItemKind {
    Order { summary: String },
    Message { text: String },
}

/// A display-ready feed row. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedItem {
    /// `order-<post id>` or `msg-<post id>`
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub user: User,
    /// Source post, used for likes and comments
    pub post: Post,
    #[serde(flatten)]
    pub kind: FeedItemKind,
}

impl FeedItem {
    /// Order announcement anchored on a user's profile post.
    pub fn order(user: User, mut profile: Post, location: &str, viewer: Option<UserId>) -> Self {
        let summary = user
            .order_at(location)
            .map(|o| o.menu_item.name.clone())
            .unwrap_or_else(|| GENERIC_ORDER_SUMMARY.to_string());
        profile.is_liked_by_user = viewer.is_some_and(|id| profile.is_liked_by(id));

        Self {
            id: format!("order-{}", profile.id),
            timestamp: profile.created_at,
            user,
            post: profile,
            kind: FeedItemKind::Order { summary },
        }
    }

    /// Free-text community post. The liked flag is taken as the backend sent it.
    pub fn message(post: Post) -> Self {
        Self {
            id: format!("msg-{}", post.id),
            timestamp: post.created_at,
            user: post.author.clone(),
            kind: FeedItemKind::Message {
                text: post.content.clone(),
            },
            post,
        }
    }

    pub fn is_order(&self) -> bool {
        matches!(self.kind, FeedItemKind::Order { .. })
    }

    /// Summary for orders, body for messages
    pub fn text(&self) -> &str {
        match &self.kind {
            FeedItemKind::Order { summary } => summary,
            FeedItemKind::Message { text } => text,
        }
    }

    pub fn is_liked(&self) -> bool {
        self.post.is_liked_by_user
    }

    pub fn likes_count(&self) -> u32 {
        self.post.likes_count
    }

    pub fn comments_count(&self) -> u32 {
        self.post.comments_count
    }

    pub fn time_ago(&self, now: DateTime<Utc>) -> String {
        time_ago(self.timestamp, now)
    }
}

/// Newest first; equal timestamps keep construction order.
pub fn sort_newest_first(items: &mut [FeedItem]) {
    items.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
}

/// Trim and bound user-entered content.
pub fn validate_content(content: &str) -> Result<&str, FeedError> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(FeedError::EmptyContent);
    }
    let len = trimmed.chars().count();
    if len > MAX_CONTENT_CHARS {
        return Err(FeedError::ContentTooLong {
            len,
            max: MAX_CONTENT_CHARS,
        });
    }
    Ok(trimmed)
}

#[derive(Default)]
struct FeedState {
    items: Vec<FeedItem>,
    applied_seq: u64,
}

/// Builds and holds the feed for one location.
pub struct FeedAggregator {
    api: Arc<dyn DataAccess>,
    location: FeedLocation,
    viewer: Option<Viewer>,
    state: Mutex<FeedState>,
    issued_seq: AtomicU64,
    closed: AtomicBool,
}

impl FeedAggregator {
    pub fn new(api: Arc<dyn DataAccess>, location: FeedLocation, viewer: Option<Viewer>) -> Self {
        Self {
            api,
            location,
            viewer,
            state: Mutex::new(FeedState::default()),
            issued_seq: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn location(&self) -> &FeedLocation {
        &self.location
    }

    pub fn viewer(&self) -> Option<&Viewer> {
        self.viewer.as_ref()
    }

    fn state(&self) -> MutexGuard<'_, FeedState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Last successfully applied snapshot
    pub fn items(&self) -> Vec<FeedItem> {
        self.state().items.clone()
    }

    /// Tear down: results of builds still in flight are discarded.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Fetch and merge without touching the held snapshot.
    pub async fn collect(&self) -> Result<Vec<FeedItem>> {
        let viewer_id = self.viewer.as_ref().map(|v| v.id);
        let mut items = Vec::new();

        if let FeedLocation::Named(location) = &self.location {
            let users = self.api.fetch_users_by_location(location).await?;
            let profiles = try_join_all(
                users
                    .iter()
                    .map(|u| self.api.ensure_profile_post(u.id, location)),
            )
            .await?;

            for (user, profile) in users.into_iter().zip(profiles) {
                items.push(FeedItem::order(user, profile, location, viewer_id));
            }
        }

        let posts = self
            .api
            .fetch_posts(self.location.as_filter(), viewer_id)
            .await?;
        items.extend(
            posts
                .into_iter()
                .filter(|p| !p.is_profile_post())
                .map(FeedItem::message),
        );

        sort_newest_first(&mut items);
        Ok(items)
    }

    /// Rebuild the feed and make it the visible snapshot.
    ///
    /// On failure the previous snapshot stays in place.
    pub async fn build_feed(&self) -> Result<Vec<FeedItem>> {
        let seq = self.issued_seq.fetch_add(1, Ordering::SeqCst) + 1;

        let items = match self.collect().await {
            Ok(items) => items,
            Err(e) => {
                warn!(target: "streetmeat::feed", location = %self.location, seq, "Feed build failed: {:#}", e);
                return Err(e);
            }
        };

        if self.is_closed() {
            debug!(target: "streetmeat::feed", seq, "Discarding build for closed feed");
            return Err(FeedError::Closed.into());
        }

        let mut state = self.state();
        if seq < state.applied_seq {
            debug!(
                target: "streetmeat::feed",
                seq,
                applied = state.applied_seq,
                "Discarding stale build"
            );
            return Err(FeedError::Superseded.into());
        }
        state.applied_seq = seq;
        state.items = items.clone();
        debug!(target: "streetmeat::feed", seq, count = items.len(), "Feed applied");
        Ok(items)
    }

    /// Publish a post to this feed's location, then rebuild.
    pub async fn create_post(&self, content: &str) -> Result<Vec<FeedItem>> {
        let content = validate_content(content)?;
        self.api
            .create_post(content, self.location.as_filter())
            .await?;
        self.build_feed().await
    }

    /// Comment on a post (optionally as a reply), then rebuild.
    pub async fn add_comment(
        &self,
        post_id: PostId,
        content: &str,
        parent_id: Option<CommentId>,
    ) -> Result<Vec<FeedItem>> {
        let content = validate_content(content)?;
        self.api.create_comment(post_id, content, parent_id).await?;
        self.build_feed().await
    }

    /// Toggle the viewer's like on a post, then rebuild.
    pub async fn toggle_like(&self, post_id: PostId) -> Result<Vec<FeedItem>> {
        self.api.like_post(post_id).await?;
        self.build_feed().await
    }

    /// Toggle the viewer's like on a comment, then rebuild.
    pub async fn toggle_comment_like(
        &self,
        post_id: PostId,
        comment_id: CommentId,
    ) -> Result<Vec<FeedItem>> {
        self.api.like_comment(post_id, comment_id).await?;
        self.build_feed().await
    }

    pub async fn delete_post(&self, post_id: PostId) -> Result<Vec<FeedItem>> {
        self.api.delete_post(post_id).await?;
        self.build_feed().await
    }
}
