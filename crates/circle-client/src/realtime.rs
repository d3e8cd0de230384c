//! Realtime Message Subscriber.
//!
//! One subscription per conversation pair and one per user inbox.  Each
//! inserted message row is decoded and handed to the caller's callback.
//! Duplicates are not filtered here.

use std::sync::Arc;

use circle_shared::{incoming_channel_name, ConversationPair, UserId};
use circle_store::models::decode;
use circle_store::{
    conversation_filter, ChangeFilter, ChangeStream, Filter, Message, Realtime, SubscriptionId,
    Table,
};
use tokio::task::JoinHandle;

use crate::error::Result;

#[derive(Clone)]
pub struct RealtimeSubscriber {
    realtime: Arc<dyn Realtime>,
}

impl RealtimeSubscriber {
    pub fn new(realtime: Arc<dyn Realtime>) -> Self {
        Self { realtime }
    }

    /// Messages inserted between the two members of `pair`, in either
    /// direction.  Both members derive the same channel name.
    pub async fn subscribe_conversation(
        &self,
        pair: ConversationPair,
        on_insert: impl Fn(Message) + Send + 'static,
    ) -> Result<SubscriptionGuard> {
        let (a, b) = pair.members();
        let filter = ChangeFilter::inserts(Table::Messages, conversation_filter(a, b));
        self.subscribe(&pair.channel_name(), filter, on_insert).await
    }

    /// Messages addressed to `user` from anyone.
    pub async fn subscribe_incoming(
        &self,
        user: UserId,
        on_insert: impl Fn(Message) + Send + 'static,
    ) -> Result<SubscriptionGuard> {
        let filter = ChangeFilter::inserts(Table::Messages, Filter::eq("receiver_id", user));
        self.subscribe(&incoming_channel_name(user), filter, on_insert)
            .await
    }

    async fn subscribe(
        &self,
        channel: &str,
        filter: ChangeFilter,
        on_insert: impl Fn(Message) + Send + 'static,
    ) -> Result<SubscriptionGuard> {
        let ChangeStream {
            id,
            channel,
            mut rx,
        } = self.realtime.subscribe(channel, filter).await?;

        let task_channel = channel.clone();
        let task = tokio::spawn(async move {
            while let Some(change) = rx.recv().await {
                match decode::<Message>(change.record) {
                    Ok(message) => on_insert(message),
                    Err(e) => {
                        tracing::warn!(channel = %task_channel, error = %e, "undecodable realtime row")
                    }
                }
            }
            tracing::debug!(channel = %task_channel, "realtime stream closed");
        });

        Ok(SubscriptionGuard {
            id,
            channel,
            task,
            realtime: self.realtime.clone(),
        })
    }
}

/// A live subscription.  Dropping it stops callbacks and leaves the channel.
#[must_use = "dropping the guard unsubscribes"]
pub struct SubscriptionGuard {
    id: SubscriptionId,
    channel: String,
    task: JoinHandle<()>,
    realtime: Arc<dyn Realtime>,
}

impl SubscriptionGuard {
    pub fn channel(&self) -> &str {
        &self.channel
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.task.abort();
        self.realtime.unsubscribe(self.id);
        tracing::debug!(channel = %self.channel, "subscription released");
    }
}
