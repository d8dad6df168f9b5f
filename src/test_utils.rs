use crate::api::DataAccess;
use crate::model::{
    Comment, CommentId, LikeResponse, MenuItem, Order, PickupLocation, Post, PostId, User,
    UserId, UserRef, PROFILE_POST_SENTINEL,
};
use crate::timestamp::parse_server_timestamp;
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// One recorded call against the mock backend
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    FetchPosts(Option<String>, Option<UserId>),
    UsersByLocation(String),
    ProfilePost(UserId, String),
    CreatePost(String, Option<String>),
    CreateComment(PostId, String, Option<CommentId>),
    LikePost(PostId),
    LikeComment(PostId, CommentId),
    DeletePost(PostId),
    CurrentUser,
    PickupLocations,
}

#[derive(Default)]
struct MockState {
    users: Vec<User>,
    posts: Vec<Post>,
    profile_posts: HashMap<(UserId, String), Post>,
    next_id: PostId,
    failing: bool,
    current_user: Option<User>,
    calls: Vec<Call>,
}

/// In-memory stand-in for the REST backend
#[derive(Clone, Default)]
pub struct MockDataAccess {
    state: Arc<Mutex<MockState>>,
    /// Timestamp stamped on newly created profile posts.
    profile_created_at: Arc<Mutex<Option<String>>>,
}

impl MockDataAccess {
    pub fn new(users: Vec<User>, posts: Vec<Post>) -> Self {
        let mock = Self::default();
        {
            let mut state = mock.state.lock().expect("state lock");
            state.users = users;
            state.posts = posts;
            state.next_id = 1000;
        }
        mock
    }

    pub fn with_profile_created_at(self, ts: &str) -> Self {
        *self.profile_created_at.lock().expect("ts lock") = Some(ts.to_string());
        self
    }

    pub fn with_current_user(self, user: User) -> Self {
        self.state.lock().expect("state lock").current_user = Some(user);
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.state.lock().expect("state lock").failing = failing;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().expect("state lock").calls.clone()
    }

    pub fn posts(&self) -> Vec<Post> {
        self.state.lock().expect("state lock").posts.clone()
    }

    /// Record a like on a profile post as if `liker` had toggled it.
    pub fn like_profile_post(&self, owner: UserId, location: &str, liker: UserId) {
        let mut state = self.state.lock().expect("state lock");
        if let Some(post) = state.profile_posts.get_mut(&(owner, location.to_string())) {
            post.liked_by.push(UserRef { id: liker, name: None });
            post.likes_count += 1;
        }
    }

    fn record(&self, call: Call) -> Result<()> {
        let mut state = self.state.lock().expect("state lock");
        state.calls.push(call);
        if state.failing {
            return Err(anyhow!("mock backend unavailable"));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl DataAccess for MockDataAccess {
    async fn fetch_posts(
        &self,
        location: Option<&str>,
        viewer: Option<UserId>,
    ) -> Result<Vec<Post>> {
        self.record(Call::FetchPosts(location.map(str::to_string), viewer))?;
        let state = self.state.lock().expect("state lock");
        Ok(state
            .posts
            .iter()
            .filter(|p| match location {
                Some(loc) => p.location_filter.as_deref() == Some(loc),
                None => true,
            })
            .cloned()
            .collect())
    }

    async fn fetch_users_by_location(&self, location: &str) -> Result<Vec<User>> {
        self.record(Call::UsersByLocation(location.to_string()))?;
        let state = self.state.lock().expect("state lock");
        Ok(state
            .users
            .iter()
            .filter(|u| u.pickup_location.as_deref() == Some(location) && !u.orders.is_empty())
            .cloned()
            .collect())
    }

    async fn ensure_profile_post(&self, user_id: UserId, location: &str) -> Result<Post> {
        self.record(Call::ProfilePost(user_id, location.to_string()))?;
        let created_at = self
            .profile_created_at
            .lock()
            .expect("ts lock")
            .clone()
            .unwrap_or_else(|| "2024-05-01T11:00:00".to_string());

        let mut state = self.state.lock().expect("state lock");
        let key = (user_id, location.to_string());
        if let Some(existing) = state.profile_posts.get(&key) {
            return Ok(existing.clone());
        }

        let author = state
            .users
            .iter()
            .find(|u| u.id == user_id)
            .cloned()
            .ok_or_else(|| anyhow!("User {} not found", user_id))?;
        state.next_id += 1;
        let mut profile = post(
            state.next_id,
            user_id,
            &format!("{} {} at {}", PROFILE_POST_SENTINEL, author.name, location),
            &created_at,
        );
        profile.author = author;
        profile.location_filter = Some(location.to_string());
        state.profile_posts.insert(key, profile.clone());
        Ok(profile)
    }

    async fn create_post(&self, content: &str, location: Option<&str>) -> Result<Post> {
        self.record(Call::CreatePost(
            content.to_string(),
            location.map(str::to_string),
        ))?;
        let mut state = self.state.lock().expect("state lock");
        state.next_id += 1;
        let mut p = post(state.next_id, 1, content, "2024-05-01T12:00:00");
        p.location_filter = location.map(str::to_string);
        state.posts.push(p.clone());
        Ok(p)
    }

    async fn create_comment(
        &self,
        post_id: PostId,
        content: &str,
        parent_id: Option<CommentId>,
    ) -> Result<Comment> {
        self.record(Call::CreateComment(post_id, content.to_string(), parent_id))?;
        let mut state = self.state.lock().expect("state lock");
        state.next_id += 1;
        let mut c = comment(state.next_id, post_id, parent_id);
        c.content = content.to_string();
        if let Some(p) = state.posts.iter_mut().find(|p| p.id == post_id) {
            p.comments.push(c.clone());
            p.comments_count += 1;
        }
        Ok(c)
    }

    async fn like_post(&self, post_id: PostId) -> Result<LikeResponse> {
        self.record(Call::LikePost(post_id))?;
        let mut state = self.state.lock().expect("state lock");
        let p = state
            .posts
            .iter_mut()
            .find(|p| p.id == post_id)
            .ok_or_else(|| anyhow!("Post not found"))?;
        p.is_liked_by_user = !p.is_liked_by_user;
        if p.is_liked_by_user {
            p.likes_count += 1;
        } else {
            p.likes_count = p.likes_count.saturating_sub(1);
        }
        Ok(LikeResponse {
            liked: p.is_liked_by_user,
            likes_count: p.likes_count,
        })
    }

    async fn like_comment(&self, post_id: PostId, comment_id: CommentId) -> Result<LikeResponse> {
        self.record(Call::LikeComment(post_id, comment_id))?;
        let mut state = self.state.lock().expect("state lock");
        let c = state
            .posts
            .iter_mut()
            .find(|p| p.id == post_id)
            .and_then(|p| p.find_comment_mut(comment_id))
            .ok_or_else(|| anyhow!("Comment not found"))?;
        c.is_liked_by_user = !c.is_liked_by_user;
        if c.is_liked_by_user {
            c.likes_count += 1;
        } else {
            c.likes_count = c.likes_count.saturating_sub(1);
        }
        Ok(LikeResponse {
            liked: c.is_liked_by_user,
            likes_count: c.likes_count,
        })
    }

    async fn delete_post(&self, post_id: PostId) -> Result<()> {
        self.record(Call::DeletePost(post_id))?;
        self.state
            .lock()
            .expect("state lock")
            .posts
            .retain(|p| p.id != post_id);
        Ok(())
    }

    async fn current_user(&self) -> Result<User> {
        self.record(Call::CurrentUser)?;
        self.state
            .lock()
            .expect("state lock")
            .current_user
            .clone()
            .ok_or_else(|| anyhow!("API error 401: Not authenticated"))
    }

    async fn pickup_locations(&self) -> Result<Vec<PickupLocation>> {
        self.record(Call::PickupLocations)?;
        Ok(["Mars", "Kappa Sigma", "EVGR"]
            .iter()
            .enumerate()
            .map(|(i, name)| PickupLocation {
                id: i as i64 + 1,
                name: name.to_string(),
                address: String::new(),
            })
            .collect())
    }
}

pub fn user(id: UserId, name: &str, location: Option<&str>) -> User {
    User {
        id,
        name: name.to_string(),
        email: None,
        image_url: None,
        pickup_location: location.map(str::to_string),
        time_slot: None,
        is_admin: false,
        created_at: parse_server_timestamp("2024-04-01T10:00:00").expect("fixture ts"),
        orders: Vec::new(),
    }
}

pub fn order(id: i64, user_id: UserId, location: &str, item: &str) -> Order {
    Order {
        id,
        user_id,
        menu_item_id: id,
        pickup_location: location.to_string(),
        time_slot: "7:00 PM".to_string(),
        details: None,
        status: "pending".to_string(),
        created_at: parse_server_timestamp("2024-05-01T10:00:00").expect("fixture ts"),
        menu_item: MenuItem {
            id,
            name: item.to_string(),
            description: String::new(),
            price: "5.00".to_string(),
            is_available: true,
        },
    }
}

pub fn post(id: PostId, author_id: UserId, content: &str, created_at: &str) -> Post {
    Post {
        id,
        content: content.to_string(),
        location_filter: None,
        author_id,
        created_at: parse_server_timestamp(created_at).expect("fixture ts"),
        author: user(author_id, "Author", None),
        likes_count: 0,
        comments_count: 0,
        comments: Vec::new(),
        is_liked_by_user: false,
        liked_by: Vec::new(),
    }
}

pub fn comment(id: CommentId, post_id: PostId, parent_id: Option<CommentId>) -> Comment {
    Comment {
        id,
        content: format!("comment {}", id),
        author_id: 1,
        post_id,
        parent_id,
        created_at: parse_server_timestamp("2024-05-01T11:30:00").expect("fixture ts"),
        author: user(1, "Commenter", None),
        likes_count: 0,
        replies: Vec::new(),
        is_liked_by_user: false,
    }
}
