//! Chat Session Controller.
//!
//! One [`ChatSession`] owns the history of the conversation that is open on
//! screen.  It loads the history, keeps a realtime subscription for the pair
//! while open, applies optimistic sends and merges every confirmed row
//! through [`History::reconcile`] so that each message shows up once no
//! matter which path delivered it first.
//!
//! State is published as [`SessionSnapshot`] values on a watch channel.

pub mod history;

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;

use circle_shared::validation::message_content_with_limit;
use circle_shared::{ConversationPair, TempId, UserId};
use circle_store::{Message, MessageStore, StoreError};

use crate::error::{ClientError, Result};
use crate::events::{AppEvent, EventBus};
use crate::realtime::{RealtimeSubscriber, SubscriptionGuard};

pub use history::{ChatEntry, EntryId, History, Reconciled};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionStatus {
    #[default]
    Uninitialized,
    LoadingHistory,
    Ready,
    /// Loading failed; [`ChatSession::retry`] starts over.
    Error(String),
}

/// Observable state of a session.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionSnapshot {
    pub peer: Option<UserId>,
    pub status: SessionStatus,
    pub entries: Vec<ChatEntry>,
    /// Unsent input.  Restored here when a send fails.
    pub draft: String,
    pub sending: bool,
    pub refreshing: bool,
}

#[derive(Default)]
struct State {
    /// Bumped on every open and teardown so late completions of an older
    /// conversation leave the current one alone.
    generation: u64,
    peer: Option<UserId>,
    status: SessionStatus,
    history: History,
    draft: String,
    sending: bool,
    refreshing: bool,
    /// Realtime rows that arrived while the history was loading.
    buffered: Vec<Message>,
}

impl State {
    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            peer: self.peer,
            status: self.status.clone(),
            entries: self.history.entries().to_vec(),
            draft: self.draft.clone(),
            sending: self.sending,
            refreshing: self.refreshing,
        }
    }

    /// The peer of a ready conversation.
    fn ready_peer(&self) -> Result<UserId> {
        match (self.peer, &self.status) {
            (Some(peer), SessionStatus::Ready) => Ok(peer),
            _ => Err(ClientError::NotReady),
        }
    }
}

struct Shared {
    me: UserId,
    messages: MessageStore,
    bus: EventBus,
    state: Mutex<State>,
    snapshot: watch::Sender<SessionSnapshot>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, state: &State) {
        self.snapshot.send_replace(state.snapshot());
    }

    /// Merge a realtime row into the open conversation.
    fn apply_incoming(&self, message: Message) {
        let mut state = self.state();
        let Some(peer) = state.peer else {
            return;
        };
        let mine = message.sender_id == self.me && message.receiver_id == peer;
        let theirs = message.sender_id == peer && message.receiver_id == self.me;
        if !mine && !theirs {
            tracing::debug!(id = %message.id, "ignoring row from another conversation");
            return;
        }

        if state.status == SessionStatus::LoadingHistory {
            state.buffered.push(message);
        } else if state.status == SessionStatus::Ready {
            let id = message.id;
            let outcome = state.history.reconcile(message);
            tracing::trace!(%id, ?outcome, "realtime row merged");
            self.publish(&state);
        } else {
            return;
        }
        drop(state);

        if theirs {
            self.mark_seen_in_background(peer);
        }
    }

    async fn mark_seen(&self, peer: UserId) {
        if let Err(e) = self.messages.mark_messages_as_seen(peer, self.me).await {
            tracing::warn!(peer = %peer, error = %e, "failed to mark messages seen");
        }
    }

    fn mark_seen_in_background(&self, peer: UserId) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!(peer = %peer, "no runtime; skipping mark seen");
            return;
        };
        let messages = self.messages.clone();
        let me = self.me;
        runtime.spawn(async move {
            if let Err(e) = messages.mark_messages_as_seen(peer, me).await {
                tracing::warn!(peer = %peer, error = %e, "failed to mark messages seen");
            }
        });
    }
}

/// Handle returned by [`ChatSession::begin_send`].
struct PendingSend {
    generation: u64,
    temp: TempId,
    peer: UserId,
    content: String,
}

pub struct ChatSession {
    shared: Arc<Shared>,
    subscriber: RealtimeSubscriber,
    subscription: Mutex<Option<SubscriptionGuard>>,
}

impl ChatSession {
    pub fn new(
        me: UserId,
        messages: MessageStore,
        subscriber: RealtimeSubscriber,
        bus: EventBus,
    ) -> Self {
        let (snapshot, _) = watch::channel(SessionSnapshot::default());
        Self {
            shared: Arc::new(Shared {
                me,
                messages,
                bus,
                state: Mutex::new(State::default()),
                snapshot,
            }),
            subscriber,
            subscription: Mutex::new(None),
        }
    }

    pub fn me(&self) -> UserId {
        self.shared.me
    }

    pub fn peer(&self) -> Option<UserId> {
        self.shared.state().peer
    }

    pub fn status(&self) -> SessionStatus {
        self.shared.state().status.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.state().snapshot()
    }

    /// Receiver that sees every published snapshot.
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.shared.snapshot.subscribe()
    }

    pub fn set_draft(&self, text: &str) {
        let mut state = self.shared.state();
        state.draft = text.to_string();
        self.shared.publish(&state);
    }

    fn subscription(&self) -> MutexGuard<'_, Option<SubscriptionGuard>> {
        self.subscription
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn release_subscription(&self) {
        // Drop outside the lock.
        let guard = self.subscription().take();
        drop(guard);
    }

    /// Open the conversation with `peer`.
    ///
    /// Subscribes first and buffers realtime rows while the history loads,
    /// so nothing sent in between is missed.  On success the session is
    /// `Ready` and everything the peer sent is marked seen.  On failure the
    /// session is in `Error` and holds no subscription.
    pub async fn open(&self, peer: UserId) -> Result<()> {
        let me = self.shared.me;
        let pair = ConversationPair::new(me, peer)?;
        self.release_subscription();

        let generation = {
            let mut state = self.shared.state();
            let generation = state.generation + 1;
            *state = State {
                generation,
                peer: Some(peer),
                status: SessionStatus::LoadingHistory,
                ..State::default()
            };
            self.shared.publish(&state);
            generation
        };
        tracing::debug!(peer = %peer, "opening conversation");

        let shared = self.shared.clone();
        let guard = match self
            .subscriber
            .subscribe_conversation(pair, move |message| shared.apply_incoming(message))
            .await
        {
            Ok(guard) => guard,
            Err(e) => {
                self.fail_open(generation, &e);
                return Err(e);
            }
        };

        let fetched = match self.shared.messages.get_messages(me, peer).await {
            Ok(fetched) => fetched,
            Err(e) => {
                drop(guard);
                let e = ClientError::from(e);
                self.fail_open(generation, &e);
                return Err(e);
            }
        };

        let loaded = {
            let mut state = self.shared.state();
            if state.generation != generation {
                tracing::debug!(peer = %peer, "open superseded");
                return Ok(());
            }
            let mut history = History::from_messages(fetched);
            for message in std::mem::take(&mut state.buffered) {
                history.reconcile(message);
            }
            state.history = history;
            state.status = SessionStatus::Ready;
            self.shared.publish(&state);
            state.history.len()
        };
        *self.subscription() = Some(guard);
        tracing::info!(peer = %peer, entries = loaded, "conversation ready");

        self.shared.mark_seen(peer).await;
        Ok(())
    }

    fn fail_open(&self, generation: u64, error: &ClientError) {
        let mut state = self.shared.state();
        if state.generation == generation {
            state.status = SessionStatus::Error(error.to_string());
            state.buffered.clear();
            self.shared.publish(&state);
        }
        tracing::warn!(error = %error, "failed to open conversation");
    }

    /// Open the same conversation again after a failed load.
    pub async fn retry(&self) -> Result<()> {
        let peer = self.peer().ok_or(ClientError::NotReady)?;
        self.open(peer).await
    }

    /// Send `text` to the peer.
    ///
    /// The message shows up immediately as a pending entry and the draft is
    /// cleared.  When the backend confirms, the pending entry becomes the
    /// confirmed row.  When it fails, the pending entry is removed, the
    /// draft is set back to `text` and the error is returned.
    pub async fn send_message(&self, text: &str) -> Result<Message> {
        let pending = self.begin_send(text)?;
        let result = self
            .shared
            .messages
            .send_message(self.shared.me, pending.peer, &pending.content)
            .await;
        self.finish_send(pending, text, result)
    }

    fn begin_send(&self, text: &str) -> Result<PendingSend> {
        let mut state = self.shared.state();
        let peer = state.ready_peer()?;
        if state.sending {
            return Err(ClientError::SendInFlight);
        }
        let content = message_content_with_limit(text, self.shared.messages.max_chars())?;

        let temp = TempId::next();
        state.history.push_pending(ChatEntry::pending(
            temp,
            self.shared.me,
            peer,
            content.clone(),
        ));
        state.draft.clear();
        state.sending = true;
        self.shared.publish(&state);
        tracing::debug!(temp = %temp, peer = %peer, "optimistic send");

        Ok(PendingSend {
            generation: state.generation,
            temp,
            peer,
            content,
        })
    }

    fn finish_send(
        &self,
        pending: PendingSend,
        text: &str,
        result: std::result::Result<Message, StoreError>,
    ) -> Result<Message> {
        let mut state = self.shared.state();
        let current = state.generation == pending.generation;
        if current {
            state.sending = false;
        }

        match result {
            Ok(message) => {
                if current {
                    state.history.confirm_send(pending.temp, message.clone());
                    self.shared.publish(&state);
                }
                drop(state);
                self.shared.bus.emit(AppEvent::RefreshChatList);
                Ok(message)
            }
            Err(e) => {
                if current {
                    state.history.rollback_send(pending.temp);
                    state.draft = text.to_string();
                    self.shared.publish(&state);
                }
                tracing::warn!(peer = %pending.peer, error = %e, "send failed; rolled back");
                Err(e.into())
            }
        }
    }

    /// Merge a confirmed row delivered out of band.  Rows from other
    /// conversations are ignored.
    pub fn apply_incoming(&self, message: Message) {
        self.shared.apply_incoming(message);
    }

    /// Delete a confirmed message.  The entry is removed locally only once
    /// the backend delete succeeded.  The peer's open view is not told.
    pub async fn delete_message(&self, id: EntryId) -> Result<()> {
        let (generation, message_id) = {
            let state = self.shared.state();
            state.ready_peer()?;
            let EntryId::Confirmed(message_id) = id else {
                return Err(ClientError::PendingMessage);
            };
            if state.history.get(id).is_none() {
                return Err(ClientError::UnknownMessage);
            }
            (state.generation, message_id)
        };

        if !self.shared.messages.delete_message(message_id).await? {
            tracing::debug!(id = %message_id, "message was already gone remotely");
        }

        {
            let mut state = self.shared.state();
            if state.generation == generation && state.history.remove_confirmed(message_id) {
                self.shared.publish(&state);
            }
        }
        self.shared.bus.emit(AppEvent::RefreshChatList);
        Ok(())
    }

    /// Delete the whole conversation with the peer, for both sides' future
    /// fetches.
    pub async fn delete_conversation(&self) -> Result<u64> {
        let (generation, peer) = {
            let state = self.shared.state();
            (state.generation, state.ready_peer()?)
        };

        let removed = self
            .shared
            .messages
            .delete_all_messages_with_friend(self.shared.me, peer)
            .await?;

        {
            let mut state = self.shared.state();
            if state.generation == generation {
                state.history.clear();
                self.shared.publish(&state);
            }
        }
        self.shared.bus.emit(AppEvent::RefreshChatList);
        Ok(removed)
    }

    /// Re-fetch the history.  Pending entries the fetch does not confirm
    /// yet are kept.
    pub async fn refresh(&self) -> Result<()> {
        let (generation, peer) = {
            let mut state = self.shared.state();
            let peer = state.ready_peer()?;
            if state.refreshing {
                return Ok(());
            }
            state.refreshing = true;
            self.shared.publish(&state);
            (state.generation, peer)
        };

        let result = self.shared.messages.get_messages(self.shared.me, peer).await;

        let mut state = self.shared.state();
        if state.generation != generation {
            return Ok(());
        }
        state.refreshing = false;
        match result {
            Ok(fetched) => {
                state.history.replace_keep_pending(fetched);
                self.shared.publish(&state);
                Ok(())
            }
            Err(e) => {
                self.shared.publish(&state);
                tracing::warn!(peer = %peer, error = %e, "refresh failed");
                Err(e.into())
            }
        }
    }

    /// Close the conversation: leave the realtime channel and forget the
    /// history.
    pub fn teardown(&self) {
        self.release_subscription();
        let mut state = self.shared.state();
        if let Some(peer) = state.peer {
            tracing::debug!(peer = %peer, "conversation closed");
        }
        *state = State {
            generation: state.generation + 1,
            ..State::default()
        };
        self.shared.publish(&state);
    }
}
