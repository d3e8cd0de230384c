//! Chat list: one summary per accepted friend with the last message and
//! the number of unread messages from them.

use std::cmp::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use circle_shared::constants::{CHAT_LIST_BADGE_CAP, PREVIEW_CHARS};
use circle_shared::{FriendshipId, UserId};
use circle_store::{Friendship, Message, MessageStore, Profile, SocialStore};

use crate::error::Result;
use crate::events::{AppEvent, EventBus, ListenerHandle};
use crate::notifications::badge_label;
use crate::realtime::{RealtimeSubscriber, SubscriptionGuard};

/// First [`PREVIEW_CHARS`] characters of `content`, with `...` appended when
/// anything was cut.
pub fn preview(content: &str) -> String {
    match content.char_indices().nth(PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}...", &content[..cut]),
        None => content.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationSummary {
    pub friendship: FriendshipId,
    pub friend_id: UserId,
    pub friend: Option<Profile>,
    /// `None` when there are no messages or they could not be fetched.
    pub last_message: Option<Message>,
    pub unread: u64,
}

impl ConversationSummary {
    fn from_friendship(me: UserId, friendship: &Friendship) -> Self {
        Self {
            friendship: friendship.id,
            friend_id: friendship.other_id(me),
            friend: friendship.other_profile(me).cloned(),
            last_message: None,
            unread: 0,
        }
    }

    pub fn display_name(&self) -> &str {
        self.friend
            .as_ref()
            .map(Profile::display_name)
            .unwrap_or("Unknown User")
    }

    pub fn preview(&self) -> Option<String> {
        self.last_message.as_ref().map(|m| preview(&m.content))
    }

    pub fn last_at(&self) -> Option<DateTime<Utc>> {
        self.last_message.as_ref().map(|m| m.created_at)
    }

    /// Unread badge, `9+` above nine.
    pub fn badge_label(&self) -> Option<String> {
        badge_label(self.unread, CHAT_LIST_BADGE_CAP)
    }
}

/// Conversations with messages first, newest first; the rest keep their
/// order.
pub fn sort_summaries(summaries: &mut [ConversationSummary]) {
    summaries.sort_by(|a, b| match (a.last_at(), b.last_at()) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
}

#[derive(Clone)]
pub struct ChatList {
    me: UserId,
    messages: MessageStore,
    social: SocialStore,
}

impl ChatList {
    pub fn new(me: UserId, messages: MessageStore, social: SocialStore) -> Self {
        Self {
            me,
            messages,
            social,
        }
    }

    pub fn me(&self) -> UserId {
        self.me
    }

    /// Summaries of every accepted friendship.  Only a failure to list the
    /// friends is an error; per-friend failures leave that summary empty.
    pub async fn load(&self) -> Result<Vec<ConversationSummary>> {
        let friends = self.social.get_friends(self.me).await?;
        let mut summaries = join_all(friends.iter().map(|f| self.summarize(f))).await;
        sort_summaries(&mut summaries);
        tracing::debug!(conversations = summaries.len(), "chat list loaded");
        Ok(summaries)
    }

    async fn summarize(&self, friendship: &Friendship) -> ConversationSummary {
        let mut summary = ConversationSummary::from_friendship(self.me, friendship);
        let friend = summary.friend_id;
        let (history, unread) = futures::join!(
            self.messages.get_messages(self.me, friend),
            self.messages.get_unread_count_for_friend(self.me, friend)
        );
        match history {
            Ok(mut history) => summary.last_message = history.pop(),
            Err(e) => tracing::warn!(friend = %friend, error = %e, "failed to fetch conversation"),
        }
        match unread {
            Ok(unread) => summary.unread = unread,
            Err(e) => tracing::warn!(friend = %friend, error = %e, "failed to count unread messages"),
        }
        summary
    }

    /// Purge the conversation with `friend`, then reload.
    pub async fn delete_conversation(&self, friend: UserId) -> Result<Vec<ConversationSummary>> {
        self.messages
            .delete_all_messages_with_friend(self.me, friend)
            .await?;
        self.load().await
    }

    /// Keep a live copy of the list.  See [`ChatListWatch`].
    pub async fn watch(
        self,
        subscriber: &RealtimeSubscriber,
        bus: &EventBus,
    ) -> Result<ChatListWatch> {
        let (trigger, mut triggers) = mpsc::unbounded_channel::<()>();

        let on_message = trigger.clone();
        let subscription = subscriber
            .subscribe_incoming(self.me, move |_| {
                let _ = on_message.send(());
            })
            .await?;
        let on_event = trigger.clone();
        let listener = bus.on(move |event| {
            if event == AppEvent::RefreshChatList {
                let _ = on_event.send(());
            }
        });

        let (snapshot, rx) = watch::channel(ChatListSnapshot::default());
        let snapshot = Arc::new(snapshot);
        let list = self.clone();
        let publisher = snapshot.clone();
        let task = tokio::spawn(async move {
            list.reload_into(&publisher).await;
            while triggers.recv().await.is_some() {
                // Coalesce bursts into one reload.
                while triggers.try_recv().is_ok() {}
                list.reload_into(&publisher).await;
            }
        });

        Ok(ChatListWatch {
            list: self,
            snapshot,
            rx,
            trigger,
            task,
            _subscription: subscription,
            _listener: listener,
        })
    }

    async fn reload_into(&self, snapshot: &watch::Sender<ChatListSnapshot>) {
        match self.load().await {
            Ok(conversations) => {
                snapshot.send_replace(ChatListSnapshot {
                    conversations,
                    loaded: true,
                    error: None,
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, "chat list reload failed");
                snapshot.send_modify(|s| {
                    if !s.loaded {
                        s.error = Some(e.to_string());
                    }
                });
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChatListSnapshot {
    pub conversations: Vec<ConversationSummary>,
    /// Set once the first load succeeded.
    pub loaded: bool,
    /// Error of the first load; later failures keep the previous list.
    pub error: Option<String>,
}

/// A chat list that reloads on every incoming message and every
/// [`AppEvent::RefreshChatList`].  Dropping it releases the subscription,
/// the bus listener and the reload task.
pub struct ChatListWatch {
    list: ChatList,
    snapshot: Arc<watch::Sender<ChatListSnapshot>>,
    rx: watch::Receiver<ChatListSnapshot>,
    trigger: mpsc::UnboundedSender<()>,
    task: JoinHandle<()>,
    _subscription: SubscriptionGuard,
    _listener: ListenerHandle,
}

impl ChatListWatch {
    pub fn subscribe(&self) -> watch::Receiver<ChatListSnapshot> {
        self.rx.clone()
    }

    pub fn current(&self) -> ChatListSnapshot {
        self.rx.borrow().clone()
    }

    /// Queue a reload.
    pub fn refresh(&self) {
        let _ = self.trigger.send(());
    }

    pub async fn delete_conversation(&self, friend: UserId) -> Result<()> {
        let conversations = self.list.delete_conversation(friend).await?;
        self.snapshot.send_replace(ChatListSnapshot {
            conversations,
            loaded: true,
            error: None,
        });
        Ok(())
    }
}

impl Drop for ChatListWatch {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use circle_shared::MessageId;
    use circle_store::testing::FaultyGateway;
    use circle_store::{Gateway, LocalBackend, Table};

    fn summary(last_at: Option<DateTime<Utc>>) -> ConversationSummary {
        let friend_id = UserId::new();
        ConversationSummary {
            friendship: FriendshipId::new(),
            friend_id,
            friend: None,
            last_message: last_at.map(|at| Message {
                id: MessageId::new(),
                sender_id: friend_id,
                receiver_id: UserId::new(),
                content: "hey".into(),
                created_at: at,
                updated_at: at,
                seen: false,
                sender_profile: None,
                receiver_profile: None,
            }),
            unread: 0,
        }
    }

    #[test]
    fn preview_truncates_on_characters() {
        let exact = "a".repeat(PREVIEW_CHARS);
        assert_eq!(preview(&exact), exact);
        let long = "é".repeat(PREVIEW_CHARS + 1);
        assert_eq!(preview(&long), format!("{}...", "é".repeat(PREVIEW_CHARS)));
        assert_eq!(preview(""), "");
    }

    #[test]
    fn badge_caps_at_nine() {
        let mut s = summary(None);
        assert_eq!(s.badge_label(), None);
        s.unread = 9;
        assert_eq!(s.badge_label().as_deref(), Some("9"));
        s.unread = 10;
        assert_eq!(s.badge_label().as_deref(), Some("9+"));
    }

    #[test]
    fn sort_puts_recent_conversations_first() {
        let t = Utc::now();
        let quiet_a = summary(None);
        let old = summary(Some(t - chrono::Duration::minutes(5)));
        let quiet_b = summary(None);
        let new = summary(Some(t));
        let mut list = vec![quiet_a.clone(), old.clone(), quiet_b.clone(), new.clone()];
        sort_summaries(&mut list);
        let order: Vec<_> = list.iter().map(|s| s.friend_id).collect();
        assert_eq!(
            order,
            vec![new.friend_id, old.friend_id, quiet_a.friend_id, quiet_b.friend_id]
        );
    }

    struct World {
        backend: Arc<LocalBackend>,
        faulty: Arc<FaultyGateway>,
        me: UserId,
        friends: Vec<UserId>,
    }

    impl World {
        async fn new() -> Self {
            let backend = Arc::new(LocalBackend::in_memory().unwrap());
            let social = SocialStore::new(backend.clone());
            let me = social.create_profile(UserId::new(), "me", None).await.unwrap().id;
            let mut friends = Vec::new();
            for name in ["ann", "bob", "cid"] {
                let friend = social.create_profile(UserId::new(), name, None).await.unwrap().id;
                let request = social.send_friend_request(me, friend).await.unwrap();
                social.accept_friend_request(request.id).await.unwrap();
                friends.push(friend);
            }
            Self {
                faulty: Arc::new(FaultyGateway::new(backend.clone())),
                backend,
                me,
                friends,
            }
        }

        fn list(&self) -> ChatList {
            let gateway: Arc<dyn Gateway> = self.faulty.clone();
            ChatList::new(
                self.me,
                MessageStore::new(gateway.clone()),
                SocialStore::new(gateway),
            )
        }

        fn store(&self) -> MessageStore {
            MessageStore::new(self.backend.clone())
        }
    }

    #[tokio::test]
    async fn load_orders_and_counts() {
        let w = World::new().await;
        let store = w.store();
        let (ann, bob, cid) = (w.friends[0], w.friends[1], w.friends[2]);
        store.send_message(w.me, bob, "first").await.unwrap();
        store.send_message(ann, w.me, "one").await.unwrap();
        store.send_message(ann, w.me, "two").await.unwrap();

        let list = w.list().load().await.unwrap();
        let order: Vec<_> = list.iter().map(|s| s.friend_id).collect();
        assert_eq!(order, vec![ann, bob, cid]);
        assert_eq!(list[0].unread, 2);
        assert_eq!(list[0].preview().as_deref(), Some("two"));
        assert_eq!(list[0].display_name(), "ann");
        assert_eq!(list[1].unread, 0);
        assert!(list[2].last_message.is_none());
    }

    #[tokio::test]
    async fn failed_conversation_fetch_keeps_the_friend() {
        let w = World::new().await;
        w.store().send_message(w.friends[0], w.me, "hi").await.unwrap();
        w.faulty.fail_selects_on(Table::Messages, true);

        let list = w.list().load().await.unwrap();
        assert_eq!(list.len(), 3);
        assert!(list.iter().all(|s| s.last_message.is_none()));
        assert_eq!(list.iter().map(|s| s.unread).sum::<u64>(), 1);
    }

    #[tokio::test]
    async fn failed_friend_listing_is_an_error() {
        let w = World::new().await;
        w.faulty.fail_selects_on(Table::Friends, true);
        assert!(w.list().load().await.is_err());
    }

    #[tokio::test]
    async fn delete_conversation_reloads() {
        let w = World::new().await;
        let ann = w.friends[0];
        w.store().send_message(ann, w.me, "hi").await.unwrap();

        let list = w.list().delete_conversation(ann).await.unwrap();
        let summary = list.iter().find(|s| s.friend_id == ann).unwrap();
        assert!(summary.last_message.is_none());
        assert_eq!(summary.unread, 0);
    }

    async fn wait_for(
        rx: &mut watch::Receiver<ChatListSnapshot>,
        pred: impl Fn(&ChatListSnapshot) -> bool,
    ) {
        loop {
            if pred(&rx.borrow_and_update()) {
                return;
            }
            tokio::time::timeout(Duration::from_secs(2), rx.changed())
                .await
                .expect("timed out waiting for chat list")
                .unwrap();
        }
    }

    #[tokio::test]
    async fn watch_reloads_on_messages_and_events() {
        let w = World::new().await;
        let bus = EventBus::new();
        let subscriber = RealtimeSubscriber::new(w.backend.clone());
        let watch = w.list().watch(&subscriber, &bus).await.unwrap();
        let mut rx = watch.subscribe();
        wait_for(&mut rx, |s| s.loaded).await;

        let bob = w.friends[1];
        w.store().send_message(bob, w.me, "ping").await.unwrap();
        wait_for(&mut rx, |s| s.conversations[0].friend_id == bob).await;
        assert_eq!(watch.current().conversations[0].unread, 1);

        // Outgoing messages are not on the inbox channel; the bus covers them.
        let cid = w.friends[2];
        w.store().send_message(w.me, cid, "pong").await.unwrap();
        bus.emit(AppEvent::RefreshChatList);
        wait_for(&mut rx, |s| s.conversations[0].friend_id == cid).await;

        watch.delete_conversation(cid).await.unwrap();
        assert_eq!(watch.current().conversations[0].friend_id, bob);
    }

    #[tokio::test]
    async fn dropping_the_watch_releases_everything() {
        let w = World::new().await;
        let bus = EventBus::new();
        let subscriber = RealtimeSubscriber::new(w.backend.clone());
        let watch = w.list().watch(&subscriber, &bus).await.unwrap();
        assert_eq!(w.backend.subscriber_count(), 1);
        assert_eq!(bus.listener_count(), 1);

        drop(watch);
        assert_eq!(w.backend.subscriber_count(), 0);
        assert_eq!(bus.listener_count(), 0);
    }
}
