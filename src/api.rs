//! Data access façade over the Street Meat REST API.

use crate::config::{ClientConfig, CredentialProvider};
use crate::model::{
    CommentId, Comment, LikeResponse, NewComment, NewPost, PickupLocation, Post, PostId, User,
    UserId,
};
use anyhow::{anyhow, Result};
use reqwest::{Method, RequestBuilder, Response, Url};
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::debug;

/// Read/write capabilities the feed needs from the backend.
///
/// Abstracted so the aggregator and the sync strategies can be driven by a
/// mock in tests.
#[async_trait::async_trait]
pub trait DataAccess: Send + Sync {
    /// `GET /social/posts?location_filter=&user_id=`
    async fn fetch_posts(&self, location: Option<&str>, viewer: Option<UserId>)
        -> Result<Vec<Post>>;

    /// `GET /social/users-by-location/{location}`
    async fn fetch_users_by_location(&self, location: &str) -> Result<Vec<User>>;

    /// `POST /social/user-profile-post/{user_id}?location=` (create-or-fetch)
    async fn ensure_profile_post(&self, user_id: UserId, location: &str) -> Result<Post>;

    async fn create_post(&self, content: &str, location: Option<&str>) -> Result<Post>;

    async fn create_comment(
        &self,
        post_id: PostId,
        content: &str,
        parent_id: Option<CommentId>,
    ) -> Result<Comment>;

    async fn like_post(&self, post_id: PostId) -> Result<LikeResponse>;

    async fn like_comment(&self, post_id: PostId, comment_id: CommentId) -> Result<LikeResponse>;

    async fn delete_post(&self, post_id: PostId) -> Result<()>;

    /// `GET /auth/me`
    async fn current_user(&self) -> Result<User>;

    /// `GET /auth/pickup-locations`
    async fn pickup_locations(&self) -> Result<Vec<PickupLocation>>;
}

/// `reqwest`-backed implementation
pub struct HttpDataAccess {
    base_url: String,
    credentials: Arc<dyn CredentialProvider>,
    http: reqwest::Client,
}

impl HttpDataAccess {
    pub fn new(base_url: &str, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
            http: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.api_base(), config.credentials())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// `path` followed by one percent-encoded segment
    fn segment_url(&self, path: &str, segment: &str) -> Result<Url> {
        let mut url = Url::parse(&self.url(path))?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("Base URL {} cannot take path segments", self.base_url))?
            .push(segment);
        Ok(url)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.authorize(self.http.request(method, self.url(path)))
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match self.credentials.bearer_token() {
            Some(token) => builder.bearer_auth(token.expose_secret()),
            None => builder,
        }
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        let resp = check_status(builder.send().await?).await?;
        Ok(resp.json::<T>().await?)
    }
}

async fn check_status(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let url = resp.url().to_string();
    let body = resp.text().await.unwrap_or_default();
    Err(anyhow!("API error {} from {}: {}", status.as_u16(), url, body))
}

#[async_trait::async_trait]
impl DataAccess for HttpDataAccess {
    async fn fetch_posts(
        &self,
        location: Option<&str>,
        viewer: Option<UserId>,
    ) -> Result<Vec<Post>> {
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(loc) = location {
            query.push(("location_filter", loc.to_string()));
        }
        if let Some(id) = viewer {
            query.push(("user_id", id.to_string()));
        }
        debug!(target: "streetmeat::api", ?location, ?viewer, "fetch posts");
        self.send(self.request(Method::GET, "/social/posts").query(&query))
            .await
    }

    async fn fetch_users_by_location(&self, location: &str) -> Result<Vec<User>> {
        let url = self.segment_url("/social/users-by-location", location)?;
        self.send(self.authorize(self.http.get(url))).await
    }

    async fn ensure_profile_post(&self, user_id: UserId, location: &str) -> Result<Post> {
        let path = format!("/social/user-profile-post/{}", user_id);
        self.send(
            self.request(Method::POST, &path)
                .query(&[("location", location)]),
        )
        .await
    }

    async fn create_post(&self, content: &str, location: Option<&str>) -> Result<Post> {
        let body = NewPost {
            content,
            location_filter: location,
        };
        self.send(self.request(Method::POST, "/social/posts").json(&body))
            .await
    }

    async fn create_comment(
        &self,
        post_id: PostId,
        content: &str,
        parent_id: Option<CommentId>,
    ) -> Result<Comment> {
        let path = format!("/social/posts/{}/comments", post_id);
        let body = NewComment { content, parent_id };
        self.send(self.request(Method::POST, &path).json(&body))
            .await
    }

    async fn like_post(&self, post_id: PostId) -> Result<LikeResponse> {
        let path = format!("/social/posts/{}/like", post_id);
        self.send(self.request(Method::POST, &path)).await
    }

    async fn like_comment(&self, post_id: PostId, comment_id: CommentId) -> Result<LikeResponse> {
        let path = format!("/social/posts/{}/comments/{}/like", post_id, comment_id);
        self.send(self.request(Method::POST, &path)).await
    }

    async fn delete_post(&self, post_id: PostId) -> Result<()> {
        let path = format!("/social/posts/{}", post_id);
        check_status(self.request(Method::DELETE, &path).send().await?).await?;
        Ok(())
    }

    async fn current_user(&self) -> Result<User> {
        self.send(self.request(Method::GET, "/auth/me")).await
    }

    async fn pickup_locations(&self) -> Result<Vec<PickupLocation>> {
        self.send(self.request(Method::GET, "/auth/pickup-locations"))
            .await
    }
}
