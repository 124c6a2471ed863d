//! The capability surface the apply engine drives. Real deployments back
//! this with actual heap/index operations against local storage (out of
//! scope as a product here, per the crate's external-collaborator
//! boundary); `MemoryHost` is the `HashMap`-backed double the test suite
//! drives the state machine against.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::errors::ReplicationResult;
use crate::relation::RelationDescriptor;
use crate::tuple::TupleData;

/// A materialized row, keyed by column name. A real host would materialize
/// typed values via text-input or binary-receive functions as indicated by
/// each slot's transfer kind; this representation stores the raw column
/// bytes as decoded off the wire, which is sufficient for equality-based
/// identity lookups and is what `MemoryHost` stores.
pub type LocalRow = HashMap<String, Vec<u8>>;

/// Capability surface the apply engine needs from local storage. Mutating
/// methods take `&self` (not `&mut self`) because a real host typically
/// hands back connection-pooled, internally-synchronized access; `MemoryHost`
/// wraps its state in a `Mutex` to honor that shape.
#[async_trait::async_trait]
pub trait ApplyHost: Send + Sync {
    /// Idempotent: begin a local transaction if one is not already open.
    async fn ensure_local_txn(&self) -> ReplicationResult<()>;

    async fn commit_local_txn(&self) -> ReplicationResult<()>;

    /// Abandon the open local transaction, e.g. on cancellation.
    async fn rollback_local_txn(&self) -> ReplicationResult<()>;

    /// Materialize a native row from decoded wire tuple data.
    async fn form_local_row(
        &self,
        rel: &RelationDescriptor,
        tuple: &TupleData,
    ) -> ReplicationResult<LocalRow>;

    /// Look up a row by its replica-identity key, built from the identity
    /// columns of `key_row`.
    async fn find_by_identity(
        &self,
        rel: &RelationDescriptor,
        key_row: &LocalRow,
    ) -> ReplicationResult<Option<LocalRow>>;

    /// Probe for an existing row that would collide with `candidate` on any
    /// unique index, ahead of an INSERT.
    async fn find_unique_conflict(
        &self,
        rel: &RelationDescriptor,
        candidate: &LocalRow,
    ) -> ReplicationResult<Option<LocalRow>>;

    async fn insert_row(&self, rel: &RelationDescriptor, row: LocalRow) -> ReplicationResult<()>;

    async fn update_row(
        &self,
        rel: &RelationDescriptor,
        old: &LocalRow,
        new: LocalRow,
    ) -> ReplicationResult<()>;

    async fn delete_row(&self, rel: &RelationDescriptor, row: &LocalRow) -> ReplicationResult<()>;

    /// Required around DELETE's identity lookup, which needs a snapshot
    /// visible to the apply transaction. Most hosts with MVCC storage and
    /// an already-open transaction have nothing extra to do here.
    async fn push_snapshot(&self) -> ReplicationResult<()> {
        Ok(())
    }

    async fn pop_snapshot(&self) -> ReplicationResult<()> {
        Ok(())
    }
}

fn identity_key(rel: &RelationDescriptor, row: &LocalRow) -> Vec<(String, Vec<u8>)> {
    rel.identity_columns()
        .filter_map(|c| row.get(&c.name).map(|v| (c.name.clone(), v.clone())))
        .collect()
}

/// In-memory `ApplyHost`. Tables are keyed by relation id; rows are stored
/// in insertion order inside a `Vec` since `LocalRow` isn't `Hash`.
#[derive(Default)]
pub struct MemoryHost {
    tables: Mutex<HashMap<u32, Vec<LocalRow>>>,
    txn_open: Mutex<bool>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test/inspection helper: snapshot all rows currently stored for a
    /// relation.
    pub fn rows(&self, relation_id: u32) -> Vec<LocalRow> {
        self.tables
            .lock()
            .unwrap()
            .get(&relation_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn is_txn_open(&self) -> bool {
        *self.txn_open.lock().unwrap()
    }
}

#[async_trait::async_trait]
impl ApplyHost for MemoryHost {
    async fn ensure_local_txn(&self) -> ReplicationResult<()> {
        *self.txn_open.lock().unwrap() = true;
        Ok(())
    }

    async fn commit_local_txn(&self) -> ReplicationResult<()> {
        *self.txn_open.lock().unwrap() = false;
        Ok(())
    }

    async fn rollback_local_txn(&self) -> ReplicationResult<()> {
        *self.txn_open.lock().unwrap() = false;
        Ok(())
    }

    async fn form_local_row(
        &self,
        _rel: &RelationDescriptor,
        tuple: &TupleData,
    ) -> ReplicationResult<LocalRow> {
        // `_rel` carries column names in wire order; pair them with slots.
        let mut row = LocalRow::new();
        for (col, slot) in _rel.columns.iter().zip(tuple.slots.iter()) {
            use crate::tuple::TupleSlot;
            match slot {
                TupleSlot::Null | TupleSlot::UnchangedToast => {}
                TupleSlot::Value { payload, .. } => {
                    row.insert(col.name.clone(), payload.clone());
                }
            }
        }
        Ok(row)
    }

    async fn find_by_identity(
        &self,
        rel: &RelationDescriptor,
        key_row: &LocalRow,
    ) -> ReplicationResult<Option<LocalRow>> {
        let key = identity_key(rel, key_row);
        let tables = self.tables.lock().unwrap();
        let rows = match tables.get(&rel.relation_id) {
            Some(r) => r,
            None => return Ok(None),
        };
        Ok(rows
            .iter()
            .find(|r| identity_key(rel, r) == key)
            .cloned())
    }

    async fn find_unique_conflict(
        &self,
        rel: &RelationDescriptor,
        candidate: &LocalRow,
    ) -> ReplicationResult<Option<LocalRow>> {
        self.find_by_identity(rel, candidate).await
    }

    async fn insert_row(&self, rel: &RelationDescriptor, row: LocalRow) -> ReplicationResult<()> {
        self.tables
            .lock()
            .unwrap()
            .entry(rel.relation_id)
            .or_default()
            .push(row);
        Ok(())
    }

    async fn update_row(
        &self,
        rel: &RelationDescriptor,
        old: &LocalRow,
        new: LocalRow,
    ) -> ReplicationResult<()> {
        let old_key = identity_key(rel, old);
        let mut tables = self.tables.lock().unwrap();
        let rows = tables.entry(rel.relation_id).or_default();
        if let Some(slot) = rows.iter_mut().find(|r| identity_key(rel, r) == old_key) {
            *slot = new;
        } else {
            rows.push(new);
        }
        Ok(())
    }

    async fn delete_row(&self, rel: &RelationDescriptor, row: &LocalRow) -> ReplicationResult<()> {
        let key = identity_key(rel, row);
        let mut tables = self.tables.lock().unwrap();
        if let Some(rows) = tables.get_mut(&rel.relation_id) {
            rows.retain(|r| identity_key(rel, r) != key);
        }
        Ok(())
    }
}
