//! Applies server-pushed feed events to an in-memory post list.
//!
//! The list is newest-first. Each event is applied synchronously in arrival
//! order; nothing here refetches from the backend.

use crate::feed::FeedLocation;
use crate::model::{Comment, CommentId, Post, PostId, UserId};
use crate::protocol::FeedEvent;
use tracing::{debug, trace};

pub struct Reconciler {
    viewer_id: UserId,
    location: FeedLocation,
    posts: Vec<Post>,
}

impl Reconciler {
    pub fn new(viewer_id: UserId, location: FeedLocation) -> Self {
        Self {
            viewer_id,
            location,
            posts: Vec::new(),
        }
    }

    pub fn location(&self) -> &FeedLocation {
        &self.location
    }

    pub fn posts(&self) -> &[Post] {
        &self.posts
    }

    pub fn post(&self, post_id: PostId) -> Option<&Post> {
        self.posts.iter().find(|p| p.id == post_id)
    }

    /// Seed (or reseed) the list from a full fetch. Profile posts are dropped.
    pub fn replace_all(&mut self, mut posts: Vec<Post>) {
        posts.retain(|p| !p.is_profile_post());
        posts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        self.posts = posts;
    }

    /// Rescope to another location. The caller reseeds afterwards.
    pub fn set_location(&mut self, location: FeedLocation) {
        self.location = location;
        self.posts.clear();
    }

    fn post_mut(&mut self, post_id: PostId) -> Option<&mut Post> {
        self.posts.iter_mut().find(|p| p.id == post_id)
    }

    fn belongs_here(&self, post: &Post) -> bool {
        match self.location.as_filter() {
            None => true,
            Some(loc) => post.location_filter.as_deref() == Some(loc),
        }
    }

    /// Apply one event. Returns whether the visible state changed.
    pub fn apply(&mut self, event: FeedEvent) -> bool {
        let viewer_id = self.viewer_id;

        match event {
            FeedEvent::PostCreated(post) => {
                if post.is_profile_post() || !self.belongs_here(&post) {
                    trace!(target: "streetmeat::reconciler", post_id = post.id, "Ignoring post outside this feed");
                    return false;
                }
                if self.post(post.id).is_some() {
                    debug!(target: "streetmeat::reconciler", post_id = post.id, "Duplicate post_created");
                    return false;
                }
                self.posts.insert(0, *post);
                true
            }

            FeedEvent::PostDeleted { post_id } => {
                let before = self.posts.len();
                self.posts.retain(|p| p.id != post_id);
                self.posts.len() != before
            }

            FeedEvent::PostLikeToggled {
                post_id,
                liked,
                likes_count,
                actor,
            } => match self.post_mut(post_id) {
                Some(post) => {
                    post.likes_count = likes_count;
                    if actor == Some(viewer_id) {
                        post.is_liked_by_user = liked;
                    }
                    true
                }
                None => false,
            },

            FeedEvent::CommentCreated(comment) => self.insert_comment(*comment),

            FeedEvent::CommentDeleted {
                post_id,
                comment_id,
            } => match self.post_mut(post_id) {
                Some(post) => {
                    post.comments_count = post.comments_count.saturating_sub(1);
                    post.remove_comment(comment_id);
                    true
                }
                None => false,
            },

            FeedEvent::CommentLikeToggled {
                post_id,
                comment_id,
                liked,
                likes_count,
                actor,
            } => self.toggle_comment_like(post_id, comment_id, liked, likes_count, actor),

            FeedEvent::Pong
            | FeedEvent::ConnectionEstablished
            | FeedEvent::LocationChanged { .. } => false,

            FeedEvent::Unknown(event_type) => {
                trace!(target: "streetmeat::reconciler", %event_type, "Ignoring unknown event");
                false
            }
        }
    }

    fn insert_comment(&mut self, comment: Comment) -> bool {
        let Some(post) = self.post_mut(comment.post_id) else {
            return false;
        };
        if post.contains_comment(comment.id) {
            debug!(target: "streetmeat::reconciler", comment_id = comment.id, "Duplicate comment_created");
            return false;
        }

        post.comments_count += 1;
        match comment.parent_id.and_then(|parent| post.find_comment_mut(parent)) {
            Some(parent) => parent.replies.push(comment),
            None => post.comments.push(comment),
        }
        true
    }

    fn toggle_comment_like(
        &mut self,
        post_id: PostId,
        comment_id: CommentId,
        liked: bool,
        likes_count: u32,
        actor: Option<UserId>,
    ) -> bool {
        let viewer_id = self.viewer_id;
        let Some(comment) = self
            .post_mut(post_id)
            .and_then(|post| post.find_comment_mut(comment_id))
        else {
            return false;
        };

        comment.likes_count = likes_count;
        if actor == Some(viewer_id) {
            comment.is_liked_by_user = liked;
        }
        true
    }
}
