//! Message Store Accessor: typed message operations over a [`Gateway`].

use std::sync::Arc;

use serde_json::{json, Value};

use circle_shared::constants::{MAX_MESSAGE_CHARS, RPC_MARK_MESSAGES_SEEN};
use circle_shared::validation::message_content_with_limit;
use circle_shared::{MessageId, UserId};

use crate::error::Result;
use crate::gateway::Gateway;
use crate::models::{decode, decode_all, Message, MESSAGE_EMBEDS};
use crate::query::{Filter, Row, Select, Table};

/// Rows exchanged between `a` and `b`, in either direction.
pub fn conversation_filter(a: UserId, b: UserId) -> Filter {
    Filter::eq("sender_id", a)
        .and(Filter::eq("receiver_id", b))
        .or(Filter::eq("sender_id", b).and(Filter::eq("receiver_id", a)))
}

/// Unseen messages addressed to `user`.
fn unread_filter(user: UserId) -> Filter {
    Filter::eq("receiver_id", user).and(Filter::eq("seen", false))
}

#[derive(Clone)]
pub struct MessageStore {
    gateway: Arc<dyn Gateway>,
    max_chars: usize,
}

impl MessageStore {
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        Self::with_limit(gateway, MAX_MESSAGE_CHARS)
    }

    pub fn with_limit(gateway: Arc<dyn Gateway>, max_chars: usize) -> Self {
        Self { gateway, max_chars }
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    /// Full history between two users, oldest first.  An empty vector means
    /// no messages yet.
    pub async fn get_messages(&self, a: UserId, b: UserId) -> Result<Vec<Message>> {
        let query = Select::from(Table::Messages)
            .filter(conversation_filter(a, b))
            .order_by("created_at", true)
            .embeds(&MESSAGE_EMBEDS);
        decode_all(self.gateway.select(&query).await?)
    }

    /// Insert one unseen message and return the confirmed row.
    ///
    /// The write is also echoed to every realtime subscriber of the
    /// conversation, the sender's own included.
    pub async fn send_message(
        &self,
        sender: UserId,
        receiver: UserId,
        content: &str,
    ) -> Result<Message> {
        let content = message_content_with_limit(content, self.max_chars)?;
        let mut row = Row::new();
        row.insert("sender_id".to_string(), sender.into());
        row.insert("receiver_id".to_string(), receiver.into());
        row.insert("content".to_string(), Value::String(content));
        row.insert("seen".to_string(), Value::Bool(false));

        let stored = self
            .gateway
            .insert(Table::Messages, row, &MESSAGE_EMBEDS)
            .await?;
        let message: Message = decode(stored)?;
        tracing::debug!(id = %message.id, to = %receiver, "message stored");
        Ok(message)
    }

    /// Flip `seen` on everything `sender` sent to `receiver`.  Idempotent.
    pub async fn mark_messages_as_seen(&self, sender: UserId, receiver: UserId) -> Result<()> {
        self.gateway
            .rpc(
                RPC_MARK_MESSAGES_SEEN,
                json!({ "p_sender_id": sender, "p_receiver_id": receiver }),
            )
            .await?;
        Ok(())
    }

    /// Unseen messages addressed to `user`, from anyone.
    pub async fn get_unread_count(&self, user: UserId) -> Result<u64> {
        self.gateway.count(Table::Messages, &unread_filter(user)).await
    }

    /// Unseen messages `friend` sent to `user`.
    pub async fn get_unread_count_for_friend(&self, user: UserId, friend: UserId) -> Result<u64> {
        let filter = unread_filter(user).and(Filter::eq("sender_id", friend));
        self.gateway.count(Table::Messages, &filter).await
    }

    /// Hard delete of one message.  Returns whether a row was removed.
    pub async fn delete_message(&self, id: MessageId) -> Result<bool> {
        let removed = self
            .gateway
            .delete(Table::Messages, &Filter::eq("id", id))
            .await?;
        Ok(removed > 0)
    }

    /// Hard delete of the whole conversation between two users.
    pub async fn delete_all_messages_with_friend(&self, a: UserId, b: UserId) -> Result<u64> {
        let removed = self
            .gateway
            .delete(Table::Messages, &conversation_filter(a, b))
            .await?;
        tracing::info!(peer = %b, removed, "conversation purged");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::local::LocalBackend;
    use crate::social::SocialStore;

    struct Fixture {
        messages: MessageStore,
        me: UserId,
        friend: UserId,
    }

    async fn fixture() -> Fixture {
        let backend: Arc<dyn Gateway> = Arc::new(LocalBackend::in_memory().unwrap());
        let social = SocialStore::new(backend.clone());
        let me = social.create_profile(UserId::new(), "me", None).await.unwrap().id;
        let friend = social
            .create_profile(UserId::new(), "friend", None)
            .await
            .unwrap()
            .id;
        Fixture {
            messages: MessageStore::new(backend),
            me,
            friend,
        }
    }

    #[tokio::test]
    async fn history_is_ascending_and_both_directions() {
        let f = fixture().await;
        f.messages.send_message(f.me, f.friend, "one").await.unwrap();
        f.messages.send_message(f.friend, f.me, "two").await.unwrap();
        f.messages.send_message(f.me, f.friend, "three").await.unwrap();

        let history = f.messages.get_messages(f.friend, f.me).await.unwrap();
        let contents: Vec<_> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["one", "two", "three"]);
        assert!(history[0].sender_profile.is_some());
    }

    #[tokio::test]
    async fn send_validates_content() {
        let f = fixture().await;
        let err = f.messages.send_message(f.me, f.friend, "   ").await.unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));

        let stored = f.messages.send_message(f.me, f.friend, "  hi  ").await.unwrap();
        assert_eq!(stored.content, "hi");
        assert!(!stored.seen);
    }

    #[tokio::test]
    async fn mark_seen_is_idempotent() {
        let f = fixture().await;
        f.messages.send_message(f.friend, f.me, "a").await.unwrap();
        f.messages.send_message(f.friend, f.me, "b").await.unwrap();
        f.messages.send_message(f.me, f.friend, "c").await.unwrap();

        assert_eq!(
            f.messages.get_unread_count_for_friend(f.me, f.friend).await.unwrap(),
            2
        );
        f.messages.mark_messages_as_seen(f.friend, f.me).await.unwrap();
        let once = f.messages.get_messages(f.me, f.friend).await.unwrap();
        f.messages.mark_messages_as_seen(f.friend, f.me).await.unwrap();
        let twice = f.messages.get_messages(f.me, f.friend).await.unwrap();

        assert_eq!(
            f.messages.get_unread_count_for_friend(f.me, f.friend).await.unwrap(),
            0
        );
        let seen = |ms: &[Message]| ms.iter().map(|m| m.seen).collect::<Vec<_>>();
        assert_eq!(seen(&once), seen(&twice));
        // The message I sent is still unseen by my friend.
        assert_eq!(f.messages.get_unread_count(f.friend).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn purge_empties_conversation() {
        let f = fixture().await;
        let first = f.messages.send_message(f.me, f.friend, "x").await.unwrap();
        f.messages.send_message(f.friend, f.me, "y").await.unwrap();

        assert!(f.messages.delete_message(first.id).await.unwrap());
        assert!(!f.messages.delete_message(first.id).await.unwrap());
        assert_eq!(f.messages.get_messages(f.me, f.friend).await.unwrap().len(), 1);

        assert_eq!(
            f.messages
                .delete_all_messages_with_friend(f.me, f.friend)
                .await
                .unwrap(),
            1
        );
        assert!(f.messages.get_messages(f.me, f.friend).await.unwrap().is_empty());
    }
}
