//! Feed synchronization strategies.
//!
//! A screen picks exactly one: [`RebuildSync`] refetches everything after a
//! mutation, [`PatchSync`] loads once and then follows pushed events.

use crate::api::DataAccess;
use crate::connection::EventSink;
use crate::error::FeedError;
use crate::feed::{validate_content, FeedAggregator, FeedItem, FeedLocation, Viewer};
use crate::model::{CommentId, Post, PostId};
use crate::protocol::FeedEvent;
use crate::reconciler::Reconciler;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

#[async_trait]
pub trait FeedSync: Send + Sync {
    /// Load (or reload) the feed from the backend.
    async fn refresh(&self) -> Result<Vec<FeedItem>>;

    /// Requires the viewer to pick up at the feed's location.
    async fn create_post(&self, content: &str) -> Result<()>;

    async fn add_comment(
        &self,
        post_id: PostId,
        content: &str,
        parent_id: Option<CommentId>,
    ) -> Result<()>;

    async fn toggle_like(&self, post_id: PostId) -> Result<()>;

    async fn toggle_comment_like(&self, post_id: PostId, comment_id: CommentId) -> Result<()>;

    /// Authors may delete their own posts, admins any post.
    async fn delete_post(&self, post_id: PostId) -> Result<()>;

    /// Current snapshot, newest first
    fn items(&self) -> Vec<FeedItem>;

    fn location(&self) -> FeedLocation;
}

/// A newer build already landed; the mutation itself went through.
fn ignore_superseded(result: Result<Vec<FeedItem>>) -> Result<()> {
    match result {
        Ok(_) => Ok(()),
        Err(e) if e.downcast_ref::<FeedError>() == Some(&FeedError::Superseded) => {
            debug!(target: "streetmeat::sync", "Rebuild superseded by a newer one");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

// Posts we have not loaded are left to the backend to authorize.
fn check_delete(viewer: &Viewer, post: Option<&Post>, post_id: PostId) -> Result<(), FeedError> {
    match post {
        Some(post) if !viewer.can_delete(post) => Err(FeedError::CannotDelete { post_id }),
        _ => Ok(()),
    }
}

/// Rebuild-on-mutation
pub struct RebuildSync {
    feed: FeedAggregator,
}

impl RebuildSync {
    pub fn new(api: Arc<dyn DataAccess>, location: FeedLocation, viewer: Option<Viewer>) -> Self {
        Self {
            feed: FeedAggregator::new(api, location, viewer),
        }
    }

    fn viewer(&self) -> Result<&Viewer, FeedError> {
        Viewer::check_signed_in(self.feed.viewer())
    }
}

#[async_trait]
impl FeedSync for RebuildSync {
    async fn refresh(&self) -> Result<Vec<FeedItem>> {
        self.feed.build_feed().await
    }

    async fn create_post(&self, content: &str) -> Result<()> {
        Viewer::check_can_post(self.feed.viewer(), self.feed.location())?;
        ignore_superseded(self.feed.create_post(content).await)
    }

    async fn add_comment(
        &self,
        post_id: PostId,
        content: &str,
        parent_id: Option<CommentId>,
    ) -> Result<()> {
        self.viewer()?;
        ignore_superseded(self.feed.add_comment(post_id, content, parent_id).await)
    }

    async fn toggle_like(&self, post_id: PostId) -> Result<()> {
        self.viewer()?;
        ignore_superseded(self.feed.toggle_like(post_id).await)
    }

    async fn toggle_comment_like(&self, post_id: PostId, comment_id: CommentId) -> Result<()> {
        self.viewer()?;
        ignore_superseded(self.feed.toggle_comment_like(post_id, comment_id).await)
    }

    async fn delete_post(&self, post_id: PostId) -> Result<()> {
        let viewer = self.viewer()?;
        let known = self.feed.items().into_iter().find(|i| i.post.id == post_id);
        check_delete(viewer, known.as_ref().map(|i| &i.post), post_id)?;
        ignore_superseded(self.feed.delete_post(post_id).await)
    }

    fn items(&self) -> Vec<FeedItem> {
        self.feed.items()
    }

    fn location(&self) -> FeedLocation {
        self.feed.location().clone()
    }
}

/// Incremental patch from pushed events
pub struct PatchSync {
    api: Arc<dyn DataAccess>,
    viewer: Viewer,
    reconciler: Mutex<Reconciler>,
}

impl PatchSync {
    pub fn new(api: Arc<dyn DataAccess>, location: FeedLocation, viewer: Viewer) -> Self {
        Self {
            api,
            reconciler: Mutex::new(Reconciler::new(viewer.id, location)),
            viewer,
        }
    }

    fn reconciler(&self) -> MutexGuard<'_, Reconciler> {
        self.reconciler.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Patch local state from one pushed event.
    pub fn apply_event(&self, event: FeedEvent) -> bool {
        self.reconciler().apply(event)
    }

    /// Follow another location: rescope, resubscribe the live channel, reload.
    pub async fn change_location(
        &self,
        location: FeedLocation,
        sink: &dyn EventSink,
    ) -> Result<Vec<FeedItem>> {
        self.reconciler().set_location(location.clone());
        sink.change_location(&location)?;
        self.refresh().await
    }
}

#[async_trait]
impl FeedSync for PatchSync {
    async fn refresh(&self) -> Result<Vec<FeedItem>> {
        let location = self.location();
        let posts = self
            .api
            .fetch_posts(location.as_filter(), Some(self.viewer.id))
            .await?;

        {
            let mut reconciler = self.reconciler();
            if reconciler.location() == &location {
                reconciler.replace_all(posts);
            } else {
                debug!(target: "streetmeat::sync", %location, "Dropping load for a previous location");
            }
        }
        Ok(self.items())
    }

    // Mutations only hit the backend; the echo arrives as a pushed event.
    async fn create_post(&self, content: &str) -> Result<()> {
        let location = self.location();
        Viewer::check_can_post(Some(&self.viewer), &location)?;
        let content = validate_content(content)?;
        self.api.create_post(content, location.as_filter()).await?;
        Ok(())
    }

    async fn add_comment(
        &self,
        post_id: PostId,
        content: &str,
        parent_id: Option<CommentId>,
    ) -> Result<()> {
        let content = validate_content(content)?;
        self.api.create_comment(post_id, content, parent_id).await?;
        Ok(())
    }

    async fn toggle_like(&self, post_id: PostId) -> Result<()> {
        self.api.like_post(post_id).await?;
        Ok(())
    }

    async fn toggle_comment_like(&self, post_id: PostId, comment_id: CommentId) -> Result<()> {
        self.api.like_comment(post_id, comment_id).await?;
        Ok(())
    }

    async fn delete_post(&self, post_id: PostId) -> Result<()> {
        let known = self.reconciler().post(post_id).cloned();
        check_delete(&self.viewer, known.as_ref(), post_id)?;
        self.api.delete_post(post_id).await?;
        Ok(())
    }

    fn items(&self) -> Vec<FeedItem> {
        self.reconciler()
            .posts()
            .iter()
            .cloned()
            .map(FeedItem::message)
            .collect()
    }

    fn location(&self) -> FeedLocation {
        self.reconciler().location().clone()
    }
}
