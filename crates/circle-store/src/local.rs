//! In-process backend: a SQLite database behind the [`Gateway`] contract,
//! plus a realtime change feed fed synchronously after every write.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use circle_shared::constants::RPC_MARK_MESSAGES_SEEN;
use circle_shared::UserId;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::gateway::{ChangeFilter, ChangeKind, ChangeStream, Gateway, Realtime, RowChange, SubscriptionId};
use crate::query::{Embed, Filter, Row, Select, Table};

struct Subscriber {
    channel: String,
    filter: ChangeFilter,
    tx: mpsc::UnboundedSender<RowChange>,
}

/// Embedded backend used for tests, the demo and offline development.
pub struct LocalBackend {
    db: Mutex<Database>,
    subscribers: Mutex<HashMap<SubscriptionId, Subscriber>>,
}

impl LocalBackend {
    pub fn new(db: Database) -> Self {
        Self {
            db: Mutex::new(db),
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    pub fn open_at(path: &Path) -> Result<Self> {
        Ok(Self::new(Database::open_at(path)?))
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers().len()
    }

    fn db(&self) -> Result<MutexGuard<'_, Database>> {
        self.db
            .lock()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))
    }

    fn subscribers(&self) -> MutexGuard<'_, HashMap<SubscriptionId, Subscriber>> {
        // A panicking publisher cannot leave the map half-updated.
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Deliver `changes` to every matching subscriber.  Subscribers whose
    /// receiving end is gone are dropped.
    fn publish(&self, table: Table, kind: ChangeKind, records: Vec<Row>) {
        if records.is_empty() {
            return;
        }
        let mut subscribers = self.subscribers();
        let mut closed = Vec::new();
        for record in records {
            let change = RowChange {
                table,
                kind,
                record,
            };
            for (id, sub) in subscribers.iter() {
                if sub.filter.accepts(&change) && sub.tx.send(change.clone()).is_err() {
                    closed.push(*id);
                }
            }
        }
        for id in closed {
            if let Some(sub) = subscribers.remove(&id) {
                tracing::debug!(subscription = %id, channel = %sub.channel, "dropping closed subscriber");
            }
        }
    }

    fn mark_messages_seen(&self, args: &Value) -> Result<Value> {
        let id_arg = |name: &str| -> Result<UserId> {
            args.get(name)
                .and_then(Value::as_str)
                .ok_or_else(|| StoreError::InvalidArguments {
                    function: RPC_MARK_MESSAGES_SEEN.to_string(),
                    reason: format!("missing {name}"),
                })?
                .parse::<UserId>()
                .map_err(StoreError::from)
        };
        let sender = id_arg("p_sender_id")?;
        let receiver = id_arg("p_receiver_id")?;

        let filter = Filter::eq("sender_id", sender)
            .and(Filter::eq("receiver_id", receiver))
            .and(Filter::eq("seen", false));
        let mut patch = Row::new();
        patch.insert("seen".to_string(), Value::Bool(true));

        let updated = self.db()?.update_rows(Table::Messages, &filter, patch)?;
        let count = updated.len();
        self.publish(Table::Messages, ChangeKind::Update, updated);
        Ok(json!(count))
    }
}

#[async_trait]
impl Gateway for LocalBackend {
    async fn select(&self, query: &Select) -> Result<Vec<Row>> {
        self.db()?.select_rows(query)
    }

    async fn insert(&self, table: Table, row: Row, embeds: &[Embed]) -> Result<Row> {
        let mut stored = self.db()?.insert_row(table, row)?;
        // Subscribers see the bare row, as a change feed would deliver it.
        self.publish(table, ChangeKind::Insert, vec![stored.clone()]);
        self.db()?
            .resolve_embeds(table, std::slice::from_mut(&mut stored), embeds)?;
        Ok(stored)
    }

    async fn update(&self, table: Table, filter: &Filter, patch: Row) -> Result<Vec<Row>> {
        let updated = self.db()?.update_rows(table, filter, patch)?;
        self.publish(table, ChangeKind::Update, updated.clone());
        Ok(updated)
    }

    async fn delete(&self, table: Table, filter: &Filter) -> Result<u64> {
        let removed = self.db()?.delete_rows(table, filter)?;
        let count = removed.len() as u64;
        self.publish(table, ChangeKind::Delete, removed);
        Ok(count)
    }

    async fn count(&self, table: Table, filter: &Filter) -> Result<u64> {
        self.db()?.count_rows(table, filter)
    }

    async fn rpc(&self, function: &str, args: Value) -> Result<Value> {
        match function {
            RPC_MARK_MESSAGES_SEEN => self.mark_messages_seen(&args),
            other => Err(StoreError::UnknownFunction(other.to_string())),
        }
    }
}

#[async_trait]
impl Realtime for LocalBackend {
    async fn subscribe(&self, channel: &str, filter: ChangeFilter) -> Result<ChangeStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = SubscriptionId::next();
        self.subscribers().insert(
            id,
            Subscriber {
                channel: channel.to_string(),
                filter,
                tx,
            },
        );
        tracing::debug!(subscription = %id, channel, "subscribed");
        Ok(ChangeStream {
            id,
            channel: channel.to_string(),
            rx,
        })
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        if let Some(sub) = self.subscribers().remove(&id) {
            tracing::debug!(subscription = %id, channel = %sub.channel, "unsubscribed");
        }
    }
}
