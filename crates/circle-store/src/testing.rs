//! Failure injection for tests of code built on [`Gateway`].

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Notify;

use crate::error::{Result, StoreError};
use crate::gateway::Gateway;
use crate::query::{Embed, Filter, Row, Select, Table};

/// Delegating gateway whose calls can be made to fail on demand.
pub struct FaultyGateway {
    inner: Arc<dyn Gateway>,
    fail_inserts: AtomicBool,
    fail_deletes: AtomicBool,
    fail_rpc: AtomicBool,
    failing_selects: Mutex<HashSet<Table>>,
    held_selects: Mutex<HashMap<Table, SelectGate>>,
    rpc_calls: AtomicUsize,
}

/// Handle on a read parked by [`FaultyGateway::hold_next_select`].
#[derive(Clone, Default)]
pub struct SelectGate {
    served: Arc<Notify>,
    release: Arc<Notify>,
}

impl SelectGate {
    /// Wait until the parked read has fetched its rows.
    pub async fn served(&self) {
        self.served.notified().await;
    }

    /// Let the parked read return.
    pub fn release(&self) {
        self.release.notify_one();
    }
}

impl FaultyGateway {
    pub fn new(inner: Arc<dyn Gateway>) -> Self {
        Self {
            inner,
            fail_inserts: AtomicBool::new(false),
            fail_deletes: AtomicBool::new(false),
            fail_rpc: AtomicBool::new(false),
            failing_selects: Mutex::new(HashSet::new()),
            held_selects: Mutex::new(HashMap::new()),
            rpc_calls: AtomicUsize::new(0),
        }
    }

    pub fn fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_rpc(&self, fail: bool) {
        self.fail_rpc.store(fail, Ordering::SeqCst);
    }

    /// Make reads of `table` fail (or succeed again).
    pub fn fail_selects_on(&self, table: Table, fail: bool) {
        let mut tables = self
            .failing_selects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if fail {
            tables.insert(table);
        } else {
            tables.remove(&table);
        }
    }

    /// Park the next read of `table` after its rows are fetched, until the
    /// returned gate is released.
    pub fn hold_next_select(&self, table: Table) -> SelectGate {
        let gate = SelectGate::default();
        self.held_selects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(table, gate.clone());
        gate
    }

    /// Remote procedure calls attempted so far, failed ones included.
    pub fn rpc_calls(&self) -> usize {
        self.rpc_calls.load(Ordering::SeqCst)
    }

    fn injected(what: &str) -> StoreError {
        StoreError::Backend {
            status: 503,
            message: format!("injected {what} failure"),
        }
    }
}

#[async_trait]
impl Gateway for FaultyGateway {
    async fn select(&self, query: &Select) -> Result<Vec<Row>> {
        let failing = self
            .failing_selects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(&query.table);
        if failing {
            return Err(Self::injected("select"));
        }
        let rows = self.inner.select(query).await;
        let held = self
            .held_selects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&query.table);
        if let Some(gate) = held {
            gate.served.notify_one();
            gate.release.notified().await;
        }
        rows
    }

    async fn insert(&self, table: Table, row: Row, embeds: &[Embed]) -> Result<Row> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(Self::injected("insert"));
        }
        self.inner.insert(table, row, embeds).await
    }

    async fn update(&self, table: Table, filter: &Filter, patch: Row) -> Result<Vec<Row>> {
        self.inner.update(table, filter, patch).await
    }

    async fn delete(&self, table: Table, filter: &Filter) -> Result<u64> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(Self::injected("delete"));
        }
        self.inner.delete(table, filter).await
    }

    async fn count(&self, table: Table, filter: &Filter) -> Result<u64> {
        self.inner.count(table, filter).await
    }

    async fn rpc(&self, function: &str, args: Value) -> Result<Value> {
        self.rpc_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_rpc.load(Ordering::SeqCst) {
            return Err(Self::injected("rpc"));
        }
        self.inner.rpc(function, args).await
    }
}
