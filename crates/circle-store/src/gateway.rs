//! The remote data gateway contract.
//!
//! [`Gateway`] covers row CRUD, scalar counts and remote procedures;
//! [`Realtime`] covers change subscriptions.  Both are object safe so the
//! client can hold `Arc<dyn Gateway>` / `Arc<dyn Realtime>` and swap the
//! REST gateway for the embedded backend in tests.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::query::{Embed, Filter, Row, Select, Table};

#[async_trait]
pub trait Gateway: Send + Sync {
    /// Rows matching `query`, in the requested order.
    async fn select(&self, query: &Select) -> Result<Vec<Row>>;

    /// Insert one row and return it as stored, with `embeds` resolved.
    async fn insert(&self, table: Table, row: Row, embeds: &[Embed]) -> Result<Row>;

    /// Apply `patch` to every row matching `filter`; returns the updated rows.
    async fn update(&self, table: Table, filter: &Filter, patch: Row) -> Result<Vec<Row>>;

    /// Hard-delete every row matching `filter`; returns the number removed.
    async fn delete(&self, table: Table, filter: &Filter) -> Result<u64>;

    /// Number of rows matching `filter`.
    async fn count(&self, table: Table, filter: &Filter) -> Result<u64>;

    /// Invoke a server-side procedure.
    async fn rpc(&self, function: &str, args: Value) -> Result<Value>;
}

/// Kind of row change carried by the realtime feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Subscription predicate: inserts into `table` whose new row matches
/// `filter`.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeFilter {
    pub table: Table,
    pub filter: Filter,
}

impl ChangeFilter {
    pub fn inserts(table: Table, filter: Filter) -> Self {
        Self { table, filter }
    }

    pub fn accepts(&self, change: &RowChange) -> bool {
        self.table == change.table
            && change.kind == ChangeKind::Insert
            && self.filter.matches(&change.record)
    }
}

/// One row change pushed by the backend.  For deletes `record` holds the
/// row as it was before removal.
#[derive(Debug, Clone, PartialEq)]
pub struct RowChange {
    pub table: Table,
    pub kind: ChangeKind,
    pub record: Row,
}

static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub fn next() -> Self {
        Self(NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Receiving end of a subscription.
#[derive(Debug)]
pub struct ChangeStream {
    pub id: SubscriptionId,
    pub channel: String,
    pub rx: mpsc::UnboundedReceiver<RowChange>,
}

#[async_trait]
pub trait Realtime: Send + Sync {
    /// Join `channel` and start receiving changes accepted by `filter`.
    async fn subscribe(&self, channel: &str, filter: ChangeFilter) -> Result<ChangeStream>;

    /// Leave a channel.  Idempotent; never blocks so it can run from `Drop`.
    fn unsubscribe(&self, id: SubscriptionId);
}
