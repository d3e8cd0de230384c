//! In-memory conversation history and the reconciliation rules between
//! optimistic entries and confirmed rows.
//!
//! Everything here is synchronous and free of I/O.

use std::fmt;

use chrono::{DateTime, Duration, Utc};

use circle_shared::constants::RECONCILE_WINDOW_SECS;
use circle_shared::{MessageId, TempId, UserId};
use circle_store::Message;

/// Identity of one history entry: local until the backend confirms it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryId {
    Pending(TempId),
    Confirmed(MessageId),
}

impl EntryId {
    pub fn is_pending(&self) -> bool {
        matches!(self, EntryId::Pending(_))
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryId::Pending(temp) => fmt::Display::fmt(temp, f),
            EntryId::Confirmed(id) => fmt::Display::fmt(id, f),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatEntry {
    pub id: EntryId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub seen: bool,
}

impl ChatEntry {
    pub fn pending(temp: TempId, sender: UserId, receiver: UserId, content: String) -> Self {
        Self {
            id: EntryId::Pending(temp),
            sender_id: sender,
            receiver_id: receiver,
            content,
            created_at: Utc::now(),
            seen: false,
        }
    }

    /// Whether `message` could be the confirmation of this pending entry.
    fn matches_pending(&self, message: &Message) -> bool {
        self.id.is_pending()
            && self.sender_id == message.sender_id
            && self.receiver_id == message.receiver_id
            && self.content == message.content
            && (message.created_at - self.created_at).abs()
                <= Duration::seconds(RECONCILE_WINDOW_SECS)
    }
}

impl From<Message> for ChatEntry {
    fn from(message: Message) -> Self {
        Self {
            id: EntryId::Confirmed(message.id),
            sender_id: message.sender_id,
            receiver_id: message.receiver_id,
            content: message.content,
            created_at: message.created_at,
            seen: message.seen,
        }
    }
}

/// What [`History::reconcile`] did with an incoming row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    /// The row was already present and was refreshed.
    Updated,
    /// The row confirmed this pending entry, which it replaced.
    ReplacedPending(TempId),
    Inserted,
}

/// Ordered history of one conversation, oldest first.  Every confirmed
/// identity appears at most once.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct History {
    entries: Vec<ChatEntry>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// History from a fetched, already ordered list.  Repeated identities
    /// keep their first occurrence.
    pub fn from_messages(messages: Vec<Message>) -> Self {
        let mut history = Self::new();
        for message in messages {
            history.reconcile(message);
        }
        history
    }

    pub fn entries(&self) -> &[ChatEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.entries.iter().filter(|e| e.id.is_pending()).count()
    }

    pub fn get(&self, id: EntryId) -> Option<&ChatEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    fn position(&self, id: EntryId) -> Option<usize> {
        self.entries.iter().position(|e| e.id == id)
    }

    /// Append an optimistic entry.
    pub fn push_pending(&mut self, entry: ChatEntry) {
        self.entries.push(entry);
    }

    /// Insert `entry` by creation time, after equal timestamps.
    fn insert_ordered(&mut self, entry: ChatEntry) {
        let idx = self
            .entries
            .partition_point(|e| e.created_at <= entry.created_at);
        self.entries.insert(idx, entry);
    }

    /// Replace the entry at `idx` with a confirmed row, moved to the slot
    /// its server timestamp belongs in.
    fn replace_at(&mut self, idx: usize, message: Message) -> ChatEntry {
        let previous = self.entries.remove(idx);
        self.insert_ordered(message.into());
        previous
    }

    /// Merge a confirmed row, whatever its source.
    ///
    /// 1. A row whose identity is already present refreshes that entry.
    /// 2. Otherwise the oldest pending entry it could confirm (same sender,
    ///    receiver and content, close in time) is replaced.
    /// 3. Otherwise it is inserted.
    ///
    /// The merged row always lands at its creation time, after equal
    /// timestamps.
    pub fn reconcile(&mut self, message: Message) -> Reconciled {
        if let Some(idx) = self.position(EntryId::Confirmed(message.id)) {
            self.replace_at(idx, message);
            return Reconciled::Updated;
        }

        if let Some(idx) = self.entries.iter().position(|e| e.matches_pending(&message)) {
            return match self.replace_at(idx, message).id {
                EntryId::Pending(temp) => Reconciled::ReplacedPending(temp),
                EntryId::Confirmed(_) => Reconciled::Updated,
            };
        }

        self.insert_ordered(message.into());
        Reconciled::Inserted
    }

    /// Resolve the send that created `temp` with its confirmed row.
    ///
    /// Converges to a single entry whether or not the realtime echo of the
    /// same row was merged first.
    pub fn confirm_send(&mut self, temp: TempId, message: Message) {
        let pending = self.position(EntryId::Pending(temp));
        let confirmed = self.position(EntryId::Confirmed(message.id));

        match (pending, confirmed) {
            (Some(idx), None) => {
                self.replace_at(idx, message);
            }
            (Some(idx), Some(_)) => {
                // The echo was merged against a different pending entry.
                tracing::warn!(temp = %temp, id = %message.id, "send confirmed twice; dropping pending copy");
                self.entries.remove(idx);
            }
            (None, Some(idx)) => {
                self.replace_at(idx, message);
            }
            (None, None) => {
                tracing::warn!(temp = %temp, id = %message.id, "pending entry vanished before confirmation");
                self.reconcile(message);
            }
        }
    }

    /// Drop the optimistic entry of a failed send.
    pub fn rollback_send(&mut self, temp: TempId) -> Option<ChatEntry> {
        self.position(EntryId::Pending(temp))
            .map(|idx| self.entries.remove(idx))
    }

    /// Remove a confirmed entry.  Returns whether it was present.
    pub fn remove_confirmed(&mut self, id: MessageId) -> bool {
        match self.position(EntryId::Confirmed(id)) {
            Some(idx) => {
                self.entries.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Replace the confirmed part of the history with a fresh fetch.
    /// Pending entries the fetch already confirms are dropped, the rest are
    /// kept in time order.
    pub fn replace_keep_pending(&mut self, fetched: Vec<Message>) {
        let pending: Vec<ChatEntry> = self
            .entries
            .drain(..)
            .filter(|e| e.id.is_pending())
            .collect();

        let mut fresh = History::from_messages(fetched);
        let mut claimed = vec![false; fresh.entries.len()];
        for entry in pending {
            let confirmed_by = fresh.entries.iter().enumerate().position(|(i, e)| {
                !claimed[i]
                    && e.sender_id == entry.sender_id
                    && e.receiver_id == entry.receiver_id
                    && e.content == entry.content
                    && (e.created_at - entry.created_at).abs()
                        <= Duration::seconds(RECONCILE_WINDOW_SECS)
            });
            match confirmed_by {
                Some(i) => claimed[i] = true,
                None => {
                    let idx = fresh
                        .entries
                        .partition_point(|e| e.created_at <= entry.created_at);
                    fresh.entries.insert(idx, entry);
                    claimed.insert(idx, true);
                }
            }
        }
        *self = fresh;
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn confirmed(from: UserId, to: UserId, content: &str, at: DateTime<Utc>) -> Message {
        Message {
            id: MessageId::new(),
            sender_id: from,
            receiver_id: to,
            content: content.to_string(),
            created_at: at,
            updated_at: at,
            seen: false,
            sender_profile: None,
            receiver_profile: None,
        }
    }

    fn assert_unique(history: &History) {
        let mut seen = HashSet::new();
        for entry in history.entries() {
            assert!(seen.insert(entry.id), "duplicate entry {}", entry.id);
        }
    }

    #[test]
    fn echo_then_response_converges() {
        let (me, peer) = (UserId::new(), UserId::new());
        let mut history = History::new();
        let temp = TempId::next();
        history.push_pending(ChatEntry::pending(temp, me, peer, "hi".into()));

        let row = confirmed(me, peer, "hi", Utc::now());
        assert_eq!(history.reconcile(row.clone()), Reconciled::ReplacedPending(temp));
        history.confirm_send(temp, row.clone());

        assert_eq!(history.len(), 1);
        assert_eq!(history.entries()[0].id, EntryId::Confirmed(row.id));
        assert_eq!(history.pending_count(), 0);
    }

    #[test]
    fn response_then_echo_converges() {
        let (me, peer) = (UserId::new(), UserId::new());
        let mut history = History::new();
        let temp = TempId::next();
        history.push_pending(ChatEntry::pending(temp, me, peer, "hi".into()));

        let row = confirmed(me, peer, "hi", Utc::now());
        history.confirm_send(temp, row.clone());
        assert_eq!(history.reconcile(row.clone()), Reconciled::Updated);

        assert_eq!(history.len(), 1);
        assert_eq!(history.entries()[0].id, EntryId::Confirmed(row.id));
    }

    #[test]
    fn both_orderings_reach_the_same_state() {
        let (me, peer) = (UserId::new(), UserId::new());
        let earlier = confirmed(peer, me, "hello", Utc::now() - Duration::seconds(10));
        let mut base = History::from_messages(vec![earlier]);
        let temp = TempId::next();
        base.push_pending(ChatEntry::pending(temp, me, peer, "yo".into()));
        let row = confirmed(me, peer, "yo", Utc::now());

        let mut echo_first = base.clone();
        echo_first.reconcile(row.clone());
        echo_first.confirm_send(temp, row.clone());

        let mut response_first = base;
        response_first.confirm_send(temp, row.clone());
        response_first.reconcile(row);

        assert_eq!(echo_first, response_first);
        assert_unique(&echo_first);
    }

    #[test]
    fn redelivery_is_idempotent() {
        let (me, peer) = (UserId::new(), UserId::new());
        let row = confirmed(peer, me, "again", Utc::now());
        let mut history = History::new();
        history.reconcile(row.clone());
        history.reconcile(row.clone());
        history.reconcile(row);
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn peer_message_with_same_text_does_not_claim_my_pending() {
        let (me, peer) = (UserId::new(), UserId::new());
        let mut history = History::new();
        let temp = TempId::next();
        history.push_pending(ChatEntry::pending(temp, me, peer, "ok".into()));

        let theirs = confirmed(peer, me, "ok", Utc::now());
        assert_eq!(history.reconcile(theirs), Reconciled::Inserted);
        assert_eq!(history.pending_count(), 1);
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn rollback_restores_previous_history() {
        let (me, peer) = (UserId::new(), UserId::new());
        let mut history = History::from_messages(vec![confirmed(peer, me, "q", Utc::now())]);
        let before = history.clone();

        let temp = TempId::next();
        history.push_pending(ChatEntry::pending(temp, me, peer, "a".into()));
        let removed = history.rollback_send(temp).unwrap();

        assert_eq!(removed.content, "a");
        assert_eq!(history, before);
        assert!(history.rollback_send(temp).is_none());
    }

    #[test]
    fn inserts_keep_time_order() {
        let (me, peer) = (UserId::new(), UserId::new());
        let now = Utc::now();
        let mut history = History::new();
        history.reconcile(confirmed(me, peer, "3", now));
        history.reconcile(confirmed(me, peer, "1", now - Duration::seconds(2)));
        history.reconcile(confirmed(me, peer, "2", now - Duration::seconds(1)));

        let contents: Vec<_> = history.entries().iter().map(|e| e.content.as_str()).collect();
        assert_eq!(contents, ["1", "2", "3"]);
    }

    #[test]
    fn refresh_keeps_unconfirmed_pending() {
        let (me, peer) = (UserId::new(), UserId::new());
        let mut history = History::new();
        let confirmed_temp = TempId::next();
        let waiting_temp = TempId::next();
        history.push_pending(ChatEntry::pending(confirmed_temp, me, peer, "sent".into()));
        history.push_pending(ChatEntry::pending(waiting_temp, me, peer, "waiting".into()));

        let row = confirmed(me, peer, "sent", Utc::now());
        history.replace_keep_pending(vec![row.clone()]);

        assert_eq!(history.len(), 2);
        assert!(history.get(EntryId::Confirmed(row.id)).is_some());
        assert!(history.get(EntryId::Pending(waiting_temp)).is_some());
        assert!(history.get(EntryId::Pending(confirmed_temp)).is_none());

        // The late response for the dropped pending entry changes nothing.
        history.confirm_send(confirmed_temp, row);
        assert_eq!(history.len(), 2);
        assert_unique(&history);
    }

    fn assert_ascending(history: &History) {
        for pair in history.entries().windows(2) {
            assert!(
                pair[0].created_at <= pair[1].created_at,
                "{} at {} sorts before {} at {}",
                pair[0].content,
                pair[0].created_at,
                pair[1].content,
                pair[1].created_at
            );
        }
    }

    #[test]
    fn confirmation_moves_to_server_time_when_peer_wrote_in_between() {
        let (me, peer) = (UserId::new(), UserId::new());
        let temp = TempId::next();
        let pending = ChatEntry::pending(temp, me, peer, "mine".into());
        let sent_at = pending.created_at;

        let theirs = confirmed(peer, me, "theirs", sent_at + Duration::milliseconds(100));
        let mine = confirmed(me, peer, "mine", sent_at + Duration::milliseconds(300));

        let mut response_first = History::new();
        response_first.push_pending(pending.clone());
        response_first.reconcile(theirs.clone());
        response_first.confirm_send(temp, mine.clone());

        let contents: Vec<_> = response_first.entries().iter().map(|e| e.content.as_str()).collect();
        assert_eq!(contents, ["theirs", "mine"]);
        assert_ascending(&response_first);

        let mut echo_first = History::new();
        echo_first.push_pending(pending);
        echo_first.reconcile(theirs.clone());
        assert_eq!(echo_first.reconcile(mine.clone()), Reconciled::ReplacedPending(temp));
        echo_first.confirm_send(temp, mine.clone());
        assert_eq!(echo_first, response_first);

        // A refresh returns the same order.
        let mut refreshed = response_first.clone();
        refreshed.replace_keep_pending(vec![theirs, mine]);
        assert_eq!(refreshed, response_first);
    }

    #[test]
    fn remove_confirmed_only_touches_that_entry() {
        let (me, peer) = (UserId::new(), UserId::new());
        let a = confirmed(me, peer, "a", Utc::now());
        let b = confirmed(me, peer, "b", Utc::now());
        let mut history = History::from_messages(vec![a.clone(), b]);
        assert!(history.remove_confirmed(a.id));
        assert!(!history.remove_confirmed(a.id));
        assert_eq!(history.len(), 1);
    }
}
