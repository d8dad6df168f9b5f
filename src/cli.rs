//! `streetmeat` command-line surface: argument parsing, rendering and dispatch.

use crate::api::{DataAccess, HttpDataAccess};
use crate::config::ClientConfig;
use crate::connection::{Connection, ConnectionState, LiveUpdate};
use crate::error::FeedError;
use crate::feed::{FeedItem, FeedLocation, Viewer};
use crate::model::{Comment, CommentId, PostId};
use crate::sync::{FeedSync, PatchSync, RebuildSync};
use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "streetmeat", version, about = "Street Meat community feed client")]
pub struct Args {
    #[arg(long, global = true, help = "Config file (default: ~/.streetmeat/config.toml)")]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, help = "Override REST base URL")]
    pub api_url: Option<String>,

    #[arg(long, global = true, help = "Override WebSocket base URL")]
    pub ws_url: Option<String>,

    #[arg(
        short,
        long,
        global = true,
        help = "Pickup location, or \"all\" for the whole community"
    )]
    pub location: Option<String>,

    #[arg(long, global = true, help = "Print feed rows as JSON")]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Build the feed once and print it
    Feed,
    /// Follow the feed live until Ctrl-C
    Watch,
    /// Publish a post to the location feed
    Post { content: String },
    /// Comment on a post
    Comment {
        post_id: PostId,
        content: String,
        #[arg(long, value_name = "COMMENT_ID", help = "Reply to an existing comment")]
        reply_to: Option<CommentId>,
    },
    /// Toggle your like on a post
    Like { post_id: PostId },
    /// Toggle your like on a comment
    LikeComment {
        post_id: PostId,
        comment_id: CommentId,
    },
    /// Delete one of your posts
    Delete { post_id: PostId },
    /// List pickup locations
    Locations,
}

impl Args {
    /// Layer CLI overrides on top of file and environment config.
    pub fn load_config(&self) -> Result<ClientConfig> {
        let mut config = match &self.config {
            Some(path) => ClientConfig::load_from(path)?,
            None => ClientConfig::load()?,
        };
        config.apply_env();
        if let Some(url) = &self.api_url {
            config.api_url = url.clone();
        }
        if let Some(url) = &self.ws_url {
            config.ws_url = url.clone();
        }
        Ok(config)
    }
}

/// Pick the feed to show: flag, then config default, then the viewer's own
/// pickup spot, then everything.
pub fn resolve_location(
    flag: Option<&str>,
    config: &ClientConfig,
    viewer: Option<&Viewer>,
) -> FeedLocation {
    flag.or(config.default_location.as_deref())
        .map(FeedLocation::parse)
        .or_else(|| {
            viewer
                .and_then(|v| v.pickup_location.as_deref())
                .map(FeedLocation::parse)
        })
        .unwrap_or(FeedLocation::All)
}

fn heart(liked: bool) -> &'static str {
    if liked {
        "♥"
    } else {
        "♡"
    }
}

fn render_comments(comments: &[Comment], depth: usize, out: &mut Vec<String>) {
    for c in comments {
        out.push(format!(
            "{:>18}{}↳ #{} {}: {}  [{} {}]",
            "",
            "  ".repeat(depth),
            c.id,
            c.author.name,
            c.content,
            heart(c.is_liked_by_user),
            c.likes_count
        ));
        render_comments(&c.replies, depth + 1, out);
    }
}

/// One feed row followed by its comment thread.
pub fn render_row(item: &FeedItem, now: DateTime<Utc>) -> String {
    let mut lines = vec![format!(
        "{:>16}  #{:<5} {}: {}  [{} {} · {} comments]",
        item.time_ago(now),
        item.post.id,
        item.user.name,
        item.text(),
        heart(item.is_liked()),
        item.likes_count(),
        item.comments_count()
    )];
    render_comments(&item.post.comments, 0, &mut lines);
    lines.join("\n")
}

pub fn render_feed(items: &[FeedItem], now: DateTime<Utc>) -> String {
    if items.is_empty() {
        return "No posts yet. Be the first to post!".to_string();
    }
    items
        .iter()
        .map(|item| render_row(item, now))
        .collect::<Vec<_>>()
        .join("\n")
}

fn status_label(state: ConnectionState) -> &'static str {
    match state {
        ConnectionState::Disconnected => "disconnected",
        ConnectionState::Connecting => "connecting...",
        ConnectionState::Connected => "live",
        ConnectionState::Failed => "offline (gave up reconnecting)",
    }
}

/// Resolved runtime for one command
pub struct Session {
    config: ClientConfig,
    api: Arc<dyn DataAccess>,
    viewer: Option<Viewer>,
    json: bool,
}

impl Session {
    pub async fn open(config: ClientConfig, json: bool) -> Result<Self> {
        let api: Arc<dyn DataAccess> = Arc::new(HttpDataAccess::from_config(&config));
        Self::with_api(config, api, json).await
    }

    /// Resolve the viewer against an existing backend. Without a token, or if
    /// the token is rejected, the session stays anonymous.
    pub async fn with_api(config: ClientConfig, api: Arc<dyn DataAccess>, json: bool) -> Result<Self> {
        let viewer = if config.resolve_token().is_some() {
            match api.current_user().await {
                Ok(user) => {
                    info!(target: "streetmeat::cli", user = user.id, "Signed in as {}", user.name);
                    Some(Viewer::from_user(&user))
                }
                Err(e) => {
                    warn!(target: "streetmeat::cli", "Continuing anonymously: {:#}", e);
                    None
                }
            }
        } else {
            None
        };

        Ok(Self {
            config,
            api,
            viewer,
            json,
        })
    }

    fn print(&self, items: &[FeedItem]) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(items)?);
        } else {
            println!("{}", render_feed(items, Utc::now()));
        }
        Ok(())
    }

    fn rebuild_sync(&self, location: FeedLocation) -> RebuildSync {
        RebuildSync::new(self.api.clone(), location, self.viewer.clone())
    }

    pub async fn run(&self, command: &Command, location_flag: Option<&str>) -> Result<()> {
        let location = resolve_location(location_flag, &self.config, self.viewer.as_ref());

        match command {
            Command::Feed => {
                let items = self.rebuild_sync(location).refresh().await?;
                self.print(&items)
            }
            Command::Watch => self.watch(location).await,
            Command::Post { content } => {
                let sync = self.rebuild_sync(location);
                sync.create_post(content).await?;
                self.print(&sync.items())
            }
            Command::Comment {
                post_id,
                content,
                reply_to,
            } => {
                let sync = self.rebuild_sync(location);
                sync.add_comment(*post_id, content, *reply_to).await?;
                self.print(&sync.items())
            }
            Command::Like { post_id } => {
                let sync = self.rebuild_sync(location);
                sync.toggle_like(*post_id).await?;
                self.print(&sync.items())
            }
            Command::LikeComment {
                post_id,
                comment_id,
            } => {
                let sync = self.rebuild_sync(location);
                sync.toggle_comment_like(*post_id, *comment_id).await?;
                self.print(&sync.items())
            }
            Command::Delete { post_id } => {
                let sync = self.rebuild_sync(location);
                // load first so ownership can be checked locally
                sync.refresh().await?;
                sync.delete_post(*post_id).await?;
                self.print(&sync.items())
            }
            Command::Locations => {
                for loc in self.api.pickup_locations().await? {
                    if loc.address.is_empty() {
                        println!("{}", loc.name);
                    } else {
                        println!("{}  ({})", loc.name, loc.address);
                    }
                }
                Ok(())
            }
        }
    }

    async fn watch(&self, location: FeedLocation) -> Result<()> {
        let viewer = self.viewer.clone().ok_or(FeedError::NotAuthenticated)?;
        let sync = PatchSync::new(self.api.clone(), location.clone(), viewer.clone());
        self.print(&sync.refresh().await?)?;

        let mut handle = Connection::spawn(&self.config, viewer.id, location);
        self.follow(&sync, handle.updates()).await?;
        handle.shutdown().await;
        Ok(())
    }

    /// Apply live updates until the stream ends or Ctrl-C. Returns the number
    /// of re-renders.
    async fn follow(
        &self,
        sync: &PatchSync,
        updates: &mut mpsc::UnboundedReceiver<LiveUpdate>,
    ) -> Result<usize> {
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        let mut renders = 0;

        loop {
            tokio::select! {
                update = updates.recv() => match update {
                    Some(LiveUpdate::Status(state)) => eprintln!("[live] {}", status_label(state)),
                    Some(LiveUpdate::Event(event)) => {
                        if sync.apply_event(event) {
                            println!();
                            self.print(&sync.items())?;
                            renders += 1;
                        }
                    }
                    None => break,
                },
                _ = &mut ctrl_c => break,
            }
        }
        Ok(renders)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionState;
    use crate::protocol::FeedEvent;
    use crate::test_utils::{comment, post, user, MockDataAccess};
    use chrono::Duration;

    fn signed_in_config() -> ClientConfig {
        ClientConfig {
            token: Some("session-token".to_string()),
            default_location: Some("Mars".to_string()),
            ..Default::default()
        }
    }

    fn mars_backend() -> MockDataAccess {
        let mut hello = post(50, 2, "hello mars", "2024-05-01T11:59:00");
        hello.location_filter = Some("Mars".to_string());
        MockDataAccess::new(vec![user(2, "Pat Lee", Some("Mars"))], vec![hello])
    }

    #[test]
    fn test_parse_comment_reply() {
        let args = Args::try_parse_from([
            "streetmeat",
            "comment",
            "12",
            "same here",
            "--reply-to",
            "4",
            "-l",
            "Mars",
        ])
        .unwrap();
        assert_eq!(args.location.as_deref(), Some("Mars"));
        assert_eq!(
            args.command,
            Command::Comment {
                post_id: 12,
                content: "same here".to_string(),
                reply_to: Some(4)
            }
        );
    }

    #[test]
    fn test_parse_requires_subcommand() {
        assert!(Args::try_parse_from(["streetmeat"]).is_err());
        let args = Args::try_parse_from(["streetmeat", "--json", "feed"]).unwrap();
        assert!(args.json);
        assert_eq!(args.command, Command::Feed);
    }

    #[test]
    fn test_resolve_location_precedence() {
        let mut config = ClientConfig::default();
        let viewer = Viewer::new(1, Some("EVGR".to_string()));

        assert_eq!(
            resolve_location(None, &config, Some(&viewer)),
            FeedLocation::Named("EVGR".to_string())
        );
        assert_eq!(resolve_location(None, &config, None), FeedLocation::All);

        config.default_location = Some("Mars".to_string());
        assert_eq!(
            resolve_location(None, &config, Some(&viewer)),
            FeedLocation::Named("Mars".to_string())
        );
        assert_eq!(
            resolve_location(Some("all"), &config, Some(&viewer)),
            FeedLocation::All
        );
    }

    #[test]
    fn test_render_row() {
        let mut p = post(9, 2, "see you there", "2024-05-01T12:00:00");
        p.author.name = "Pat Lee".to_string();
        p.likes_count = 3;
        p.is_liked_by_user = true;
        let item = FeedItem::message(p);
        let now = item.timestamp + Duration::minutes(5);

        let row = render_row(&item, now);
        assert!(row.contains("5 minutes ago"));
        assert!(row.contains("Pat Lee: see you there"));
        assert!(row.contains("♥ 3"));
        assert_eq!(row.lines().count(), 1);
        assert_eq!(
            render_feed(&[], now),
            "No posts yet. Be the first to post!"
        );
    }

    #[test]
    fn test_parse_like_comment_and_delete() {
        let args = Args::try_parse_from(["streetmeat", "like-comment", "12", "4"]).unwrap();
        assert_eq!(
            args.command,
            Command::LikeComment {
                post_id: 12,
                comment_id: 4
            }
        );
        let args = Args::try_parse_from(["streetmeat", "delete", "12"]).unwrap();
        assert_eq!(args.command, Command::Delete { post_id: 12 });
    }

    #[test]
    fn test_render_comment_thread() {
        let mut p = post(9, 2, "see you there", "2024-05-01T12:00:00");
        let mut top = comment(10, 9, None);
        top.replies.push(comment(11, 9, Some(10)));
        p.comments.push(top);
        let item = FeedItem::message(p);

        let row = render_row(&item, item.timestamp);
        let lines: Vec<&str> = row.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].contains("↳ #10 Commenter: comment 10"));
        assert!(lines[2].contains("  ↳ #11"));
    }

    #[tokio::test]
    async fn test_session_resolves_viewer() {
        let mock = mars_backend().with_current_user(user(2, "Pat Lee", Some("Mars")));
        let session = Session::with_api(signed_in_config(), Arc::new(mock.clone()), false)
            .await
            .unwrap();
        assert_eq!(session.viewer, Some(Viewer::new(2, Some("Mars".to_string()))));

        session
            .run(&Command::Post { content: "on my way".to_string() }, None)
            .await
            .unwrap();
        assert!(mock.posts().iter().any(|p| p.content == "on my way"));
    }

    #[tokio::test]
    async fn test_session_falls_back_to_anonymous() {
        // token present but rejected
        let mock = mars_backend();
        let session = Session::with_api(signed_in_config(), Arc::new(mock.clone()), false)
            .await
            .unwrap();
        assert!(session.viewer.is_none());

        // no token: the backend is never asked who we are
        let quiet = mars_backend();
        let session = Session::with_api(ClientConfig::default(), Arc::new(quiet.clone()), false)
            .await
            .unwrap();
        assert!(session.viewer.is_none());
        assert!(quiet.calls().is_empty());

        session.run(&Command::Feed, Some("Mars")).await.unwrap();
    }

    #[tokio::test]
    async fn test_watch_requires_viewer() {
        let mock = mars_backend();
        let session = Session::with_api(ClientConfig::default(), Arc::new(mock.clone()), false)
            .await
            .unwrap();

        let err = session.run(&Command::Watch, Some("Mars")).await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<FeedError>(),
            Some(&FeedError::NotAuthenticated)
        );
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_follow_applies_events() {
        let mock = mars_backend().with_current_user(user(2, "Pat Lee", Some("Mars")));
        let session = Session::with_api(signed_in_config(), Arc::new(mock.clone()), true)
            .await
            .unwrap();
        let viewer = session.viewer.clone().unwrap();
        let sync = PatchSync::new(Arc::new(mock.clone()), FeedLocation::Named("Mars".to_string()), viewer);
        sync.refresh().await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut fresh = post(70, 3, "just arrived", "2024-05-01T12:30:00");
        fresh.location_filter = Some("Mars".to_string());
        for update in [
            LiveUpdate::Status(ConnectionState::Connected),
            LiveUpdate::Event(FeedEvent::PostCreated(Box::new(fresh))),
            LiveUpdate::Event(FeedEvent::Unknown("typing".to_string())),
            LiveUpdate::Event(FeedEvent::PostDeleted { post_id: 50 }),
        ] {
            tx.send(update).unwrap();
        }
        drop(tx);

        let renders = session.follow(&sync, &mut rx).await.unwrap();
        assert_eq!(renders, 2);
        let items = sync.items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "msg-70");
    }
}
