//! Profiles, friendships, posts, likes and comments.

use std::sync::Arc;

use serde_json::Value;

use circle_shared::{FriendshipId, PostId, UserId};

use crate::error::{Result, StoreError};
use crate::gateway::Gateway;
use crate::models::{
    decode, decode_all, Comment, FriendStatus, Friendship, Like, Post, Profile, AUTHOR_EMBED,
    FRIEND_EMBEDS,
};
use crate::query::{Filter, Row, Select, Table};

#[derive(Clone)]
pub struct SocialStore {
    gateway: Arc<dyn Gateway>,
}

impl SocialStore {
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        Self { gateway }
    }

    // -- Profiles -----------------------------------------------------------

    pub async fn get_profile(&self, user: UserId) -> Result<Option<Profile>> {
        let query = Select::from(Table::Profiles)
            .filter(Filter::eq("id", user))
            .limit(1);
        let rows = self.gateway.select(&query).await?;
        rows.into_iter().next().map(decode).transpose()
    }

    pub async fn create_profile(
        &self,
        user: UserId,
        username: &str,
        full_name: Option<&str>,
    ) -> Result<Profile> {
        let mut row = Row::new();
        row.insert("id".to_string(), user.into());
        row.insert("username".to_string(), Value::String(username.to_string()));
        if let Some(name) = full_name {
            row.insert("full_name".to_string(), Value::String(name.to_string()));
        }
        decode(self.gateway.insert(Table::Profiles, row, &[]).await?)
    }

    // -- Friendships --------------------------------------------------------

    /// Pending requests addressed to `user`, with both profiles embedded.
    pub async fn get_friend_requests(&self, user: UserId) -> Result<Vec<Friendship>> {
        let query = Select::from(Table::Friends)
            .filter(Filter::eq("addressee_id", user))
            .filter(Filter::eq("status", FriendStatus::Pending.as_str()))
            .embeds(&FRIEND_EMBEDS);
        decode_all(self.gateway.select(&query).await?)
    }

    /// Accepted friendships where `user` is on either side.
    pub async fn get_friends(&self, user: UserId) -> Result<Vec<Friendship>> {
        let query = Select::from(Table::Friends)
            .filter(Filter::eq("requester_id", user).or(Filter::eq("addressee_id", user)))
            .filter(Filter::eq("status", FriendStatus::Accepted.as_str()))
            .embeds(&FRIEND_EMBEDS);
        decode_all(self.gateway.select(&query).await?)
    }

    pub async fn send_friend_request(&self, from: UserId, to: UserId) -> Result<Friendship> {
        let mut row = Row::new();
        row.insert("requester_id".to_string(), from.into());
        row.insert("addressee_id".to_string(), to.into());
        row.insert(
            "status".to_string(),
            Value::String(FriendStatus::Pending.as_str().to_string()),
        );
        decode(self.gateway.insert(Table::Friends, row, &FRIEND_EMBEDS).await?)
    }

    pub async fn accept_friend_request(&self, id: FriendshipId) -> Result<Friendship> {
        self.set_friend_status(id, FriendStatus::Accepted).await
    }

    pub async fn reject_friend_request(&self, id: FriendshipId) -> Result<Friendship> {
        self.set_friend_status(id, FriendStatus::Rejected).await
    }

    async fn set_friend_status(&self, id: FriendshipId, status: FriendStatus) -> Result<Friendship> {
        let mut patch = Row::new();
        patch.insert(
            "status".to_string(),
            Value::String(status.as_str().to_string()),
        );
        let rows = self
            .gateway
            .update(Table::Friends, &Filter::eq("id", id), patch)
            .await?;
        let row = rows.into_iter().next().ok_or(StoreError::NotFound)?;
        tracing::info!(friendship = %id, status = status.as_str(), "friend request answered");
        decode(row)
    }

    pub async fn remove_friend(&self, id: FriendshipId) -> Result<()> {
        self.gateway
            .delete(Table::Friends, &Filter::eq("id", id))
            .await?;
        Ok(())
    }

    // -- Posts --------------------------------------------------------------

    /// Posts authored by `user`, newest first.
    pub async fn get_user_posts(&self, user: UserId) -> Result<Vec<Post>> {
        let query = Select::from(Table::Posts)
            .filter(Filter::eq("user_id", user))
            .order_by("created_at", false);
        decode_all(self.gateway.select(&query).await?)
    }

    pub async fn create_post(
        &self,
        user: UserId,
        content: &str,
        image_url: Option<&str>,
    ) -> Result<Post> {
        let mut row = Row::new();
        row.insert("user_id".to_string(), user.into());
        row.insert("content".to_string(), Value::String(content.to_string()));
        if let Some(url) = image_url {
            row.insert("image_url".to_string(), Value::String(url.to_string()));
        }
        decode(self.gateway.insert(Table::Posts, row, &[]).await?)
    }

    // -- Likes --------------------------------------------------------------

    pub async fn get_post_likes(&self, post: PostId) -> Result<Vec<Like>> {
        let query = Select::from(Table::Likes)
            .filter(Filter::eq("post_id", post))
            .embed(AUTHOR_EMBED);
        decode_all(self.gateway.select(&query).await?)
    }

    /// Likes on any of `posts`, with the liker embedded.
    pub async fn likes_on_posts(&self, posts: &[PostId]) -> Result<Vec<Like>> {
        if posts.is_empty() {
            return Ok(Vec::new());
        }
        let query = Select::from(Table::Likes)
            .filter(Filter::is_in("post_id", posts.iter().copied()))
            .embed(AUTHOR_EMBED);
        decode_all(self.gateway.select(&query).await?)
    }

    /// Like a post.  Liking twice returns the existing like.
    pub async fn like_post(&self, user: UserId, post: PostId) -> Result<Like> {
        let existing = Select::from(Table::Likes)
            .filter(Filter::eq("user_id", user))
            .filter(Filter::eq("post_id", post))
            .embed(AUTHOR_EMBED)
            .limit(1);
        if let Some(row) = self.gateway.select(&existing).await?.into_iter().next() {
            return decode(row);
        }

        let mut row = Row::new();
        row.insert("user_id".to_string(), user.into());
        row.insert("post_id".to_string(), post.into());
        decode(self.gateway.insert(Table::Likes, row, &[AUTHOR_EMBED]).await?)
    }

    pub async fn unlike_post(&self, user: UserId, post: PostId) -> Result<()> {
        let filter = Filter::eq("user_id", user).and(Filter::eq("post_id", post));
        self.gateway.delete(Table::Likes, &filter).await?;
        Ok(())
    }

    // -- Comments -----------------------------------------------------------

    /// Comments on a post, oldest first, with the author embedded.
    pub async fn get_post_comments(&self, post: PostId) -> Result<Vec<Comment>> {
        let query = Select::from(Table::Comments)
            .filter(Filter::eq("post_id", post))
            .order_by("created_at", true)
            .embed(AUTHOR_EMBED);
        decode_all(self.gateway.select(&query).await?)
    }

    pub async fn comments_on_posts(&self, posts: &[PostId]) -> Result<Vec<Comment>> {
        if posts.is_empty() {
            return Ok(Vec::new());
        }
        let query = Select::from(Table::Comments)
            .filter(Filter::is_in("post_id", posts.iter().copied()))
            .order_by("created_at", true)
            .embed(AUTHOR_EMBED);
        decode_all(self.gateway.select(&query).await?)
    }

    pub async fn create_comment(&self, user: UserId, post: PostId, content: &str) -> Result<Comment> {
        let mut row = Row::new();
        row.insert("user_id".to_string(), user.into());
        row.insert("post_id".to_string(), post.into());
        row.insert("content".to_string(), Value::String(content.to_string()));
        decode(self.gateway.insert(Table::Comments, row, &[AUTHOR_EMBED]).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::LocalBackend;

    async fn store_with_users() -> (SocialStore, UserId, UserId) {
        let social = SocialStore::new(Arc::new(LocalBackend::in_memory().unwrap()));
        let ada = social
            .create_profile(UserId::new(), "ada", Some("Ada Lovelace"))
            .await
            .unwrap();
        let bob = social.create_profile(UserId::new(), "bob", None).await.unwrap();
        (social, ada.id, bob.id)
    }

    #[tokio::test]
    async fn friend_request_lifecycle() {
        let (social, ada, bob) = store_with_users().await;

        let request = social.send_friend_request(ada, bob).await.unwrap();
        assert_eq!(request.status, FriendStatus::Pending);

        let pending = social.get_friend_requests(bob).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(
            pending[0].requester_profile.as_ref().unwrap().display_name(),
            "Ada Lovelace"
        );
        assert!(social.get_friend_requests(ada).await.unwrap().is_empty());
        assert!(social.get_friends(ada).await.unwrap().is_empty());

        social.accept_friend_request(request.id).await.unwrap();
        assert!(social.get_friend_requests(bob).await.unwrap().is_empty());

        let friends = social.get_friends(ada).await.unwrap();
        assert_eq!(friends.len(), 1);
        assert_eq!(friends[0].other_id(ada), bob);
        assert_eq!(social.get_friends(bob).await.unwrap().len(), 1);

        social.remove_friend(request.id).await.unwrap();
        assert!(social.get_friends(bob).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn profiles_are_looked_up_by_id() {
        let (social, ada, _) = store_with_users().await;

        let profile = social.get_profile(ada).await.unwrap().unwrap();
        assert_eq!(profile.id, ada);
        assert_eq!(profile.display_name(), "Ada Lovelace");
        assert!(social.get_profile(UserId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn answering_unknown_request_is_not_found() {
        let (social, _, _) = store_with_users().await;
        assert!(matches!(
            social.reject_friend_request(FriendshipId::new()).await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn likes_are_idempotent_and_embed_the_liker() {
        let (social, ada, bob) = store_with_users().await;
        let post = social.create_post(ada, "hello", None).await.unwrap();

        let first = social.like_post(bob, post.id).await.unwrap();
        let again = social.like_post(bob, post.id).await.unwrap();
        assert_eq!(first.id, again.id);
        assert_eq!(first.author.unwrap().id, bob);
        assert_eq!(social.get_post_likes(post.id).await.unwrap().len(), 1);

        social.unlike_post(bob, post.id).await.unwrap();
        assert!(social.get_post_likes(post.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn batched_reads_cover_all_posts() {
        let (social, ada, bob) = store_with_users().await;
        let p1 = social.create_post(ada, "one", None).await.unwrap();
        let p2 = social.create_post(ada, "two", Some("https://img")).await.unwrap();

        social.like_post(bob, p1.id).await.unwrap();
        social.like_post(bob, p2.id).await.unwrap();
        social.create_comment(bob, p2.id, "nice").await.unwrap();
        social.create_comment(ada, p2.id, "thanks").await.unwrap();

        let posts = social.get_user_posts(ada).await.unwrap();
        assert_eq!(posts.len(), 2);
        let ids: Vec<_> = posts.iter().map(|p| p.id).collect();

        assert_eq!(social.likes_on_posts(&ids).await.unwrap().len(), 2);
        let comments = social.comments_on_posts(&ids).await.unwrap();
        assert_eq!(comments.len(), 2);
        assert_eq!(comments[0].content, "nice");
        assert_eq!(
            social.get_post_comments(p2.id).await.unwrap()[1].author.as_ref().unwrap().id,
            ada
        );
        assert!(social.likes_on_posts(&[]).await.unwrap().is_empty());
    }
}
