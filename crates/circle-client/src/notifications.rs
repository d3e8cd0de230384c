//! Notification Aggregator.
//!
//! Builds the notification feed from three sources (pending friend
//! requests, likes on the user's posts and comments on them), newest first,
//! and counts the items newer than the last-seen watermark kept in device
//! storage.  Nothing here is persisted remotely; the feed is rebuilt on
//! every load.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;

use circle_shared::constants::NOTIFICATIONS_LAST_SEEN_KEY;
use circle_shared::{FriendshipId, PostId, UserId};
use circle_store::{Comment, DeviceStorage, Friendship, Like, Post, Profile, SocialStore};

use crate::error::Result;
use crate::events::{AppEvent, EventBus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    FriendRequest,
    Like,
    Comment,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationKind::FriendRequest => "friend_request",
            NotificationKind::Like => "like",
            NotificationKind::Comment => "comment",
        }
    }

    fn id_prefix(self) -> &'static str {
        match self {
            NotificationKind::FriendRequest => "friend",
            NotificationKind::Like => "like",
            NotificationKind::Comment => "comment",
        }
    }
}

/// The row a notification was built from.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "row", rename_all = "snake_case")]
pub enum NotificationSource {
    FriendRequest(Friendship),
    Like(Like),
    Comment(Comment),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationItem {
    /// `{kind}_{row id}`, unique across kinds.
    pub id: String,
    pub kind: NotificationKind,
    pub created_at: DateTime<Utc>,
    /// User who caused the notification, when embedded.
    pub actor: Option<Profile>,
    pub post_id: Option<PostId>,
    pub source: NotificationSource,
    /// Local only; reset by every load.
    pub read: bool,
}

impl NotificationItem {
    fn new(
        kind: NotificationKind,
        row_id: impl fmt::Display,
        created_at: DateTime<Utc>,
        actor: Option<Profile>,
        post_id: Option<PostId>,
        source: NotificationSource,
    ) -> Self {
        Self {
            id: format!("{}_{row_id}", kind.id_prefix()),
            kind,
            created_at,
            actor,
            post_id,
            source,
            read: false,
        }
    }

    pub fn from_friend_request(request: Friendship) -> Self {
        Self::new(
            NotificationKind::FriendRequest,
            request.id,
            request.created_at,
            request.requester_profile.clone(),
            None,
            NotificationSource::FriendRequest(request),
        )
    }

    pub fn from_like(like: Like) -> Self {
        Self::new(
            NotificationKind::Like,
            like.id,
            like.created_at,
            like.author.clone(),
            Some(like.post_id),
            NotificationSource::Like(like),
        )
    }

    pub fn from_comment(comment: Comment) -> Self {
        Self::new(
            NotificationKind::Comment,
            comment.id,
            comment.created_at,
            comment.author.clone(),
            Some(comment.post_id),
            NotificationSource::Comment(comment),
        )
    }

    /// Friendship to accept or reject, for friend-request items.
    pub fn friendship_id(&self) -> Option<FriendshipId> {
        match &self.source {
            NotificationSource::FriendRequest(request) => Some(request.id),
            _ => None,
        }
    }
}

/// Normalise the three sources into one list, newest first.  Likes and
/// comments by `me` produce nothing.  Items with equal timestamps keep
/// kind order (requests, likes, comments), then fetch order.
pub fn aggregate(
    me: UserId,
    requests: Vec<Friendship>,
    likes: Vec<Like>,
    comments: Vec<Comment>,
) -> Vec<NotificationItem> {
    let mut items: Vec<NotificationItem> = requests
        .into_iter()
        .map(NotificationItem::from_friend_request)
        .chain(
            likes
                .into_iter()
                .filter(|like| like.user_id != me)
                .map(NotificationItem::from_like),
        )
        .chain(
            comments
                .into_iter()
                .filter(|comment| comment.user_id != me)
                .map(NotificationItem::from_comment),
        )
        .collect();
    // `sort_by` is stable.
    items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    items
}

/// Items strictly newer than `watermark`.
pub fn count_unseen(items: &[NotificationItem], watermark: DateTime<Utc>) -> usize {
    items.iter().filter(|n| n.created_at > watermark).count()
}

/// Badge text for `count`: nothing for zero, `"{cap}+"` above `cap`.
pub fn badge_label(count: u64, cap: u64) -> Option<String> {
    match count {
        0 => None,
        n if n > cap => Some(format!("{cap}+")),
        n => Some(n.to_string()),
    }
}

/// How likes and comments on the user's posts are fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FanOut {
    /// Likes and comments per post, all posts concurrently.  A post whose
    /// likes or comments cannot be fetched contributes nothing.
    PerPost,
    /// One query per kind covering every post.
    #[default]
    Batched,
}

impl fmt::Display for FanOut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FanOut::PerPost => "per-post",
            FanOut::Batched => "batched",
        })
    }
}

impl FromStr for FanOut {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "per-post" | "per_post" | "perpost" => Ok(FanOut::PerPost),
            "batched" => Ok(FanOut::Batched),
            other => Err(format!("unknown fan-out mode: {other}")),
        }
    }
}

/// Result of the last load.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationFeed {
    pub user: Option<UserId>,
    pub items: Vec<NotificationItem>,
    pub watermark: DateTime<Utc>,
    /// Sub-fetches that failed and were left out.
    pub partial_failures: usize,
}

impl Default for NotificationFeed {
    fn default() -> Self {
        Self {
            user: None,
            items: Vec::new(),
            watermark: DateTime::<Utc>::UNIX_EPOCH,
            partial_failures: 0,
        }
    }
}

impl NotificationFeed {
    pub fn unseen_count(&self) -> usize {
        count_unseen(&self.items, self.watermark)
    }
}

pub struct NotificationAggregator {
    social: SocialStore,
    storage: Arc<DeviceStorage>,
    bus: EventBus,
    fanout: FanOut,
    feed: Mutex<NotificationFeed>,
}

impl NotificationAggregator {
    pub fn new(social: SocialStore, storage: Arc<DeviceStorage>, bus: EventBus, fanout: FanOut) -> Self {
        Self {
            social,
            storage,
            bus,
            fanout,
            feed: Mutex::new(NotificationFeed::default()),
        }
    }

    fn feed(&self) -> MutexGuard<'_, NotificationFeed> {
        self.feed.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Rebuild the feed for `user` and keep it as the current feed.
    pub async fn load(&self, user: UserId) -> Result<Vec<NotificationItem>> {
        let feed = self.fetch(user).await?;
        let items = feed.items.clone();
        *self.feed() = feed;
        Ok(items)
    }

    /// Build a fresh feed for `user` without touching the current one.
    /// Failed sub-fetches are logged and left out; only a failure to read
    /// the watermark is returned.
    pub async fn fetch(&self, user: UserId) -> Result<NotificationFeed> {
        let (requests, posts) = futures::join!(
            self.social.get_friend_requests(user),
            self.social.get_user_posts(user)
        );

        let mut partial_failures = 0;
        let requests = requests.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to fetch friend requests");
            partial_failures += 1;
            Vec::new()
        });
        let posts = match posts {
            Ok(posts) => posts,
            Err(e) => {
                tracing::warn!(error = %e, "failed to fetch posts");
                partial_failures += 1;
                Vec::new()
            }
        };

        let (likes, comments, failed) = match self.fanout {
            FanOut::PerPost => self.fetch_per_post(&posts).await,
            FanOut::Batched => self.fetch_batched(&posts).await,
        };
        partial_failures += failed;

        let items = aggregate(user, requests, likes, comments);
        let watermark = self.storage.last_seen(NOTIFICATIONS_LAST_SEEN_KEY)?;
        let feed = NotificationFeed {
            user: Some(user),
            items,
            watermark,
            partial_failures,
        };
        tracing::debug!(
            items = feed.items.len(),
            unseen = feed.unseen_count(),
            partial_failures,
            "notifications loaded"
        );
        Ok(feed)
    }

    async fn fetch_per_post(&self, posts: &[Post]) -> (Vec<Like>, Vec<Comment>, usize) {
        let per_post = join_all(posts.iter().map(|post| async move {
            let (likes, comments) = futures::join!(
                self.social.get_post_likes(post.id),
                self.social.get_post_comments(post.id)
            );
            match (likes, comments) {
                (Ok(likes), Ok(comments)) => Some((likes, comments)),
                (Err(e), _) | (_, Err(e)) => {
                    tracing::warn!(post = %post.id, error = %e, "dropping post from notifications");
                    None
                }
            }
        }))
        .await;

        let mut likes = Vec::new();
        let mut comments = Vec::new();
        let mut failed = 0;
        for result in per_post {
            match result {
                Some((l, c)) => {
                    likes.extend(l);
                    comments.extend(c);
                }
                None => failed += 1,
            }
        }
        (likes, comments, failed)
    }

    async fn fetch_batched(&self, posts: &[Post]) -> (Vec<Like>, Vec<Comment>, usize) {
        let ids: Vec<PostId> = posts.iter().map(|p| p.id).collect();
        let (likes, comments) = futures::join!(
            self.social.likes_on_posts(&ids),
            self.social.comments_on_posts(&ids)
        );

        let mut failed = 0;
        let likes = likes.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to fetch likes");
            failed += 1;
            Vec::new()
        });
        let comments = comments.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to fetch comments");
            failed += 1;
            Vec::new()
        });
        (likes, comments, failed)
    }

    pub fn feed_snapshot(&self) -> NotificationFeed {
        self.feed().clone()
    }

    pub fn items(&self) -> Vec<NotificationItem> {
        self.feed().items.clone()
    }

    /// Items of the last load newer than the watermark.
    pub fn unseen_count(&self) -> usize {
        self.feed().unseen_count()
    }

    /// Watermark currently persisted on this device.
    pub fn watermark(&self) -> Result<DateTime<Utc>> {
        Ok(self.storage.last_seen(NOTIFICATIONS_LAST_SEEN_KEY)?)
    }

    /// Move the watermark to now.  It never moves backwards, even when
    /// another view wrote a later value in the meantime.
    pub fn mark_all_seen(&self) -> Result<DateTime<Utc>> {
        let watermark = self
            .storage
            .advance_last_seen(NOTIFICATIONS_LAST_SEEN_KEY, Utc::now())?;
        self.feed().watermark = watermark;
        self.bus.emit(AppEvent::NotificationsSeen);
        Ok(watermark)
    }

    /// Flip the local read flag of one item.  Returns whether it exists.
    pub fn mark_read(&self, id: &str) -> bool {
        let mut feed = self.feed();
        match feed.items.iter_mut().find(|n| n.id == id) {
            Some(item) => {
                item.read = true;
                true
            }
            None => false,
        }
    }

    pub async fn accept_request(&self, id: FriendshipId) -> Result<Vec<NotificationItem>> {
        self.social.accept_friend_request(id).await?;
        self.bus.emit(AppEvent::RefreshChatList);
        self.reload().await
    }

    pub async fn reject_request(&self, id: FriendshipId) -> Result<Vec<NotificationItem>> {
        self.social.reject_friend_request(id).await?;
        self.reload().await
    }

    async fn reload(&self) -> Result<Vec<NotificationItem>> {
        let user = self.feed().user;
        match user {
            Some(user) => self.load(user).await,
            None => Ok(Vec::new()),
        }
    }
}
