//! The apply state machine: `Idle` -> `InRemoteTxn` -> (`HaveOrigin`) ->
//! `LocalOpen`, with lazy local transaction opening and atomic commit-time
//! origin advancement.
//!
//! Grounded on the global-state-turned-owned-struct design in a C apply
//! worker's main loop: `in_remote_transaction`/`in_local_transaction`/
//! `remote_origin_lsn`/`remote_origin_id` become fields here instead of
//! process globals, and the termination check becomes a shared
//! `Arc<AtomicBool>` the same way a replication server's shutdown signal
//! does.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::apply::conflict::{ConflictDecision, ConflictKind, ConflictResolver};
use crate::apply::host::{ApplyHost, LocalRow};
use crate::errors::{MissingRowOp, ReplicationError, ReplicationResult, ReportEvent};
use crate::message::{
    BeginMessage, CommitMessage, DeleteMessage, InsertMessage, OriginMessage, OuterFrame,
    ReplicationMessage, StartupParameters, UpdateMessage,
};
use crate::origin::ProgressStore;
use crate::relation::{RelationCache, RelationDescriptor};
use crate::tuple::{TupleData, TupleSlot};

/// The subset of apply-engine state worth exposing for introspection/logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyState {
    Idle,
    InRemoteTxn { have_origin: bool, local_open: bool },
}

impl fmt::Display for ApplyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApplyState::Idle => write!(f, "idle"),
            ApplyState::InRemoteTxn {
                have_origin,
                local_open,
            } => write!(
                f,
                "in_remote_txn(have_origin={have_origin}, local_open={local_open})"
            ),
        }
    }
}

struct TxnState {
    /// Recorded per §3's `TransactionFrame` but not otherwise consulted by
    /// the state machine — the wire's authoritative LSNs for commit
    /// bookkeeping are the ones carried on the COMMIT message itself.
    #[allow(dead_code)]
    final_lsn: i64,
    commit_time: i64,
    #[allow(dead_code)]
    xid: u32,
    have_origin: bool,
    local_open: bool,
    forwarded_origin: Option<(u32, i64)>,
}

/// Session accounting accumulated by the engine, surfaced through logs and
/// `Display`. Purely an observability aid — not part of the wire protocol.
#[derive(Debug, Default, Clone, Copy, serde::Serialize)]
pub struct ReplicationStats {
    pub rows_inserted: u64,
    pub rows_updated: u64,
    pub rows_deleted: u64,
    pub conflicts_resolved: u64,
    pub missing_rows: u64,
    pub relations_cached: u64,
}

impl ReplicationStats {
    /// Render as a JSON object for structured log sinks that prefer
    /// machine-parseable fields over the `Display` summary line.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

impl fmt::Display for ReplicationStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "inserted={} updated={} deleted={} conflicts={} missing={} relations={}",
            self.rows_inserted,
            self.rows_updated,
            self.rows_deleted,
            self.conflicts_resolved,
            self.missing_rows,
            self.relations_cached
        )
    }
}

/// Drives one apply session: one stream from one upstream origin, one
/// relation cache, one set of per-origin progress records.
pub struct ApplyEngine {
    host: Arc<dyn ApplyHost>,
    progress: Arc<dyn ProgressStore>,
    resolver: Box<dyn ConflictResolver>,
    relations: RelationCache,
    session_origin_id: u32,
    shutdown: Arc<AtomicBool>,
    txn: Option<TxnState>,
    origin_ids: HashMap<String, u32>,
    next_origin_id: u32,
    database_encoding: String,
    pub stats: ReplicationStats,
}

impl ApplyEngine {
    pub fn new(
        host: Arc<dyn ApplyHost>,
        progress: Arc<dyn ProgressStore>,
        resolver: Box<dyn ConflictResolver>,
        session_origin_id: u32,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            host,
            progress,
            resolver,
            relations: RelationCache::new(),
            session_origin_id,
            shutdown,
            txn: None,
            origin_ids: HashMap::new(),
            next_origin_id: session_origin_id + 1,
            database_encoding: "UTF8".to_string(),
            stats: ReplicationStats::default(),
        }
    }

    /// Override the database encoding the decoder validates an incoming
    /// STARTUP's `client_encoding` against (default `"UTF8"`), per §6's
    /// handshake rule.
    pub fn with_database_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.database_encoding = encoding.into();
        self
    }

    pub fn state(&self) -> ApplyState {
        match &self.txn {
            None => ApplyState::Idle,
            Some(t) => ApplyState::InRemoteTxn {
                have_origin: t.have_origin,
                local_open: t.local_open,
            },
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn origin_id_for(&mut self, name: &str) -> u32 {
        if let Some(id) = self.origin_ids.get(name) {
            return *id;
        }
        let id = self.next_origin_id;
        self.next_origin_id += 1;
        self.origin_ids.insert(name.to_string(), id);
        id
    }

    /// Consume one outer frame. Keepalives are accepted and ignored per the
    /// wire spec's "consume and ignore" rule; WAL frames are dispatched by
    /// inner message tag.
    pub async fn handle_frame(&mut self, frame: OuterFrame) -> ReplicationResult<()> {
        match frame {
            OuterFrame::Keepalive { .. } => Ok(()),
            OuterFrame::Wal { message, .. } => self.handle_message(message).await,
        }
    }

    async fn handle_message(&mut self, message: ReplicationMessage) -> ReplicationResult<()> {
        match message {
            ReplicationMessage::Startup(params) => self.handle_startup(params),
            ReplicationMessage::Relation(rel) => self.handle_relation(rel),
            ReplicationMessage::Begin(b) => self.handle_begin(b),
            ReplicationMessage::Origin(o) => self.handle_origin(o),
            ReplicationMessage::Commit(c) => self.handle_commit(c).await,
            ReplicationMessage::Insert(i) => self.handle_insert(i).await,
            ReplicationMessage::Update(u) => self.handle_update(u).await,
            ReplicationMessage::Delete(d) => self.handle_delete(d).await,
        }
    }

    /// Validate the encoder's advertised `client_encoding` against this
    /// session's database encoding, per §6: "The decoder MUST validate
    /// `client_encoding` matches its database encoding and reject
    /// otherwise."
    fn handle_startup(&mut self, params: StartupParameters) -> ReplicationResult<()> {
        if let Some(client_encoding) = params.get("client_encoding") {
            if client_encoding != self.database_encoding {
                return Err(ReplicationError::protocol(format!(
                    "client_encoding {client_encoding:?} does not match database encoding {:?}",
                    self.database_encoding
                )));
            }
        }
        Ok(())
    }

    fn handle_relation(&mut self, rel: RelationDescriptor) -> ReplicationResult<()> {
        if rel.flags != 0 {
            return Err(ReplicationError::unsupported(
                "unknown RELATION flag bit without negotiated capability",
            ));
        }
        debug!(relation_id = rel.relation_id, "caching relation descriptor");
        self.relations.insert(rel);
        self.stats.relations_cached += 1;
        Ok(())
    }

    /// A tuple's slot count must equal its relation's live-column count
    /// (§3's `TupleData` invariant). A mismatch means the cached descriptor
    /// no longer matches what the encoder is sending for this relation.
    fn check_schema_match(rel: &RelationDescriptor, tuple_len: usize) -> ReplicationResult<()> {
        if tuple_len != rel.columns.len() {
            return Err(ReplicationError::schema_mismatch(
                rel.relation_id,
                format!(
                    "tuple has {tuple_len} columns, cached relation descriptor has {}",
                    rel.columns.len()
                ),
            ));
        }
        Ok(())
    }

    /// §3's `'u'` marker means the column's large value wasn't re-sent
    /// because it didn't change; `form_local_row` drops such columns from
    /// `new_row` entirely, so this carries them over from the pre-image
    /// (`existing`) instead of leaving the local column gone after apply.
    fn carry_unchanged_toast(
        rel: &RelationDescriptor,
        new_tuple: &TupleData,
        existing: &LocalRow,
        new_row: &mut LocalRow,
    ) {
        for (col, slot) in rel.columns.iter().zip(new_tuple.slots.iter()) {
            if matches!(slot, TupleSlot::UnchangedToast) {
                if let Some(value) = existing.get(&col.name) {
                    new_row.insert(col.name.clone(), value.clone());
                }
            }
        }
    }

    fn handle_begin(&mut self, b: BeginMessage) -> ReplicationResult<()> {
        if b.flags != 0 {
            return Err(ReplicationError::unsupported(
                "unknown BEGIN flag bit without negotiated capability",
            ));
        }
        if self.txn.is_some() {
            return Err(ReplicationError::protocol(
                "BEGIN received while a transaction is already open",
            ));
        }
        self.txn = Some(TxnState {
            final_lsn: b.final_lsn,
            commit_time: b.commit_time,
            xid: b.xid,
            have_origin: false,
            local_open: false,
            forwarded_origin: None,
        });
        Ok(())
    }

    fn handle_origin(&mut self, o: OriginMessage) -> ReplicationResult<()> {
        if o.flags != 0 {
            return Err(ReplicationError::unsupported(
                "unknown ORIGIN flag bit without negotiated capability",
            ));
        }
        let origin_id = self.origin_id_for(&o.origin_name);
        let txn = self.txn.as_mut().ok_or_else(|| {
            ReplicationError::protocol("ORIGIN received outside a transaction")
        })?;
        if txn.have_origin || txn.local_open {
            return Err(ReplicationError::protocol(
                "ORIGIN must appear at most once, before any row change",
            ));
        }
        txn.have_origin = true;
        txn.forwarded_origin = Some((origin_id, o.origin_lsn));
        Ok(())
    }

    async fn ensure_local_open(&mut self) -> ReplicationResult<()> {
        let txn = self
            .txn
            .as_mut()
            .ok_or_else(|| ReplicationError::protocol("row change received outside a transaction"))?;
        if !txn.local_open {
            self.host.ensure_local_txn().await?;
            txn.local_open = true;
        }
        Ok(())
    }

    async fn handle_insert(&mut self, ins: InsertMessage) -> ReplicationResult<()> {
        if ins.flags != 0 {
            return Err(ReplicationError::unsupported(
                "unknown INSERT flag bit without negotiated capability",
            ));
        }
        self.ensure_local_open().await?;
        let rel = self.relations.require(ins.relation_id)?.clone();
        Self::check_schema_match(&rel, ins.new_tuple.len())?;
        let row = self.host.form_local_row(&rel, &ins.new_tuple).await?;

        match self.host.find_unique_conflict(&rel, &row).await? {
            None => {
                self.host.insert_row(&rel, row).await?;
                self.stats.rows_inserted += 1;
            }
            Some(existing) => {
                let decision = self.resolve_insert_conflict(&existing, &row);
                self.report(ReportEvent::ConflictResolved {
                    relation_id: rel.relation_id,
                    resolution: decision.tag,
                });
                self.stats.conflicts_resolved += 1;
                if decision.apply {
                    self.host
                        .update_row(&rel, &existing, decision.merged_row)
                        .await?;
                    self.stats.rows_updated += 1;
                }
            }
        }
        Ok(())
    }

    fn resolve_insert_conflict(
        &self,
        existing: &crate::apply::host::LocalRow,
        incoming: &crate::apply::host::LocalRow,
    ) -> ConflictDecision {
        let remote_commit_time = self.txn.as_ref().map(|t| t.commit_time).unwrap_or(0);
        self.resolver.resolve(
            ConflictKind::Insert,
            existing,
            None,
            incoming,
            remote_commit_time,
        )
    }

    async fn handle_update(&mut self, upd: UpdateMessage) -> ReplicationResult<()> {
        if upd.flags != 0 {
            return Err(ReplicationError::unsupported(
                "unknown UPDATE flag bit without negotiated capability",
            ));
        }
        self.ensure_local_open().await?;
        let rel = self.relations.require(upd.relation_id)?.clone();
        Self::check_schema_match(&rel, upd.new_tuple.len())?;
        let key_tuple = upd.key_tuple.as_ref().unwrap_or(&upd.new_tuple);
        Self::check_schema_match(&rel, key_tuple.len())?;
        let key_row = self.host.form_local_row(&rel, key_tuple).await?;
        let mut new_row = self.host.form_local_row(&rel, &upd.new_tuple).await?;

        match self.host.find_by_identity(&rel, &key_row).await? {
            Some(existing) => {
                Self::carry_unchanged_toast(&rel, &upd.new_tuple, &existing, &mut new_row);
                self.host.update_row(&rel, &existing, new_row).await?;
                self.stats.rows_updated += 1;
            }
            None => {
                warn!(relation_id = rel.relation_id, "UPDATE target row not found");
                self.report(ReportEvent::MissingRow {
                    relation_id: rel.relation_id,
                    op: MissingRowOp::Update,
                });
                self.stats.missing_rows += 1;
            }
        }
        Ok(())
    }

    async fn handle_delete(&mut self, del: DeleteMessage) -> ReplicationResult<()> {
        if del.flags != 0 {
            return Err(ReplicationError::unsupported(
                "unknown DELETE flag bit without negotiated capability",
            ));
        }
        self.ensure_local_open().await?;
        let rel = self.relations.require(del.relation_id)?.clone();
        Self::check_schema_match(&rel, del.key_tuple.len())?;
        let key_row = self.host.form_local_row(&rel, &del.key_tuple).await?;

        self.host.push_snapshot().await?;
        let found = self.host.find_by_identity(&rel, &key_row).await?;
        let result = match found {
            Some(existing) => {
                self.host.delete_row(&rel, &existing).await?;
                self.stats.rows_deleted += 1;
                Ok(())
            }
            None => {
                warn!(relation_id = rel.relation_id, "DELETE target row not found");
                self.report(ReportEvent::MissingRow {
                    relation_id: rel.relation_id,
                    op: MissingRowOp::Delete,
                });
                self.stats.missing_rows += 1;
                Ok(())
            }
        };
        self.host.pop_snapshot().await?;
        result
    }

    async fn handle_commit(&mut self, c: CommitMessage) -> ReplicationResult<()> {
        if c.flags != 0 {
            return Err(ReplicationError::unsupported(
                "unknown COMMIT flag bit without negotiated capability",
            ));
        }
        let txn = self
            .txn
            .take()
            .ok_or_else(|| ReplicationError::protocol("COMMIT received without a matching BEGIN"))?;

        if txn.local_open {
            self.host.commit_local_txn().await?;
        }

        self.progress
            .advance(self.session_origin_id, c.end_lsn, true)
            .await?;

        if let Some((origin_id, origin_lsn)) = txn.forwarded_origin {
            if origin_id != self.session_origin_id {
                self.progress.advance(origin_id, origin_lsn, true).await?;
            }
        }

        info!(end_lsn = c.end_lsn, stats = %self.stats, "transaction committed");
        Ok(())
    }

    fn report(&self, event: ReportEvent) {
        match event {
            ReportEvent::MissingRow { relation_id, op } => {
                debug!(relation_id, ?op, "reporting missing row");
            }
            ReportEvent::ConflictResolved {
                relation_id,
                resolution,
            } => {
                debug!(relation_id, ?resolution, "reporting resolved conflict");
            }
        }
    }

    /// Called by the driving loop when the shutdown flag is observed. Rolls
    /// back any open local transaction without advancing progress — the
    /// remote transaction is abandoned, not partially applied.
    pub async fn abandon_in_progress(&mut self) -> ReplicationResult<()> {
        if let Some(txn) = self.txn.take() {
            if txn.local_open {
                self.host.rollback_local_txn().await?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ApplyEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApplyEngine")
            .field("state", &self.state())
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apply::host::MemoryHost;
    use crate::origin::MemoryProgressStore;
    use crate::relation::ColumnDescriptor;
    use crate::tuple::{TupleData, TupleSlot};

    fn accounts() -> RelationDescriptor {
        RelationDescriptor {
            flags: 0,
            relation_id: 1,
            schema: "public".into(),
            table: "accounts".into(),
            columns: vec![
                ColumnDescriptor {
                    name: "id".into(),
                    is_replica_identity: true,
                },
                ColumnDescriptor {
                    name: "balance".into(),
                    is_replica_identity: false,
                },
            ],
        }
    }

    fn engine() -> (ApplyEngine, Arc<MemoryHost>) {
        let host = Arc::new(MemoryHost::new());
        let progress = Arc::new(MemoryProgressStore::new());
        let engine = ApplyEngine::new(
            host.clone(),
            progress,
            Box::new(crate::apply::conflict::LastWriterWinsResolver),
            0,
            Arc::new(AtomicBool::new(false)),
        );
        (engine, host)
    }

    fn tuple(id: &[u8], balance: &[u8]) -> TupleData {
        TupleData::new(vec![
            TupleSlot::Value {
                format: crate::tuple::TransferFormat::Text,
                payload: id.to_vec(),
            },
            TupleSlot::Value {
                format: crate::tuple::TransferFormat::Text,
                payload: balance.to_vec(),
            },
        ])
    }

    // Scenario A: simple INSERT inside one transaction.
    #[tokio::test]
    async fn scenario_simple_insert() {
        let (mut engine, host) = engine();
        engine.handle_relation(accounts()).unwrap();
        engine
            .handle_begin(BeginMessage {
                flags: 0,
                final_lsn: 10,
                commit_time: 0,
                xid: 1,
            })
            .unwrap();
        engine
            .handle_insert(InsertMessage {
                flags: 0,
                relation_id: 1,
                new_tuple: tuple(b"1", b"100"),
            })
            .await
            .unwrap();
        assert!(host.is_txn_open());
        engine
            .handle_commit(CommitMessage {
                flags: 0,
                commit_lsn: 10,
                end_lsn: 10,
                commit_time: 0,
            })
            .await
            .unwrap();
        assert!(!host.is_txn_open());
        assert_eq!(host.rows(1).len(), 1);
        assert_eq!(engine.stats.rows_inserted, 1);
        assert_eq!(engine.state(), ApplyState::Idle);
    }

    // Scenario C: UPDATE whose target row is missing.
    #[tokio::test]
    async fn scenario_update_missing_row() {
        let (mut engine, _host) = engine();
        engine.handle_relation(accounts()).unwrap();
        engine
            .handle_begin(BeginMessage {
                flags: 0,
                final_lsn: 10,
                commit_time: 0,
                xid: 1,
            })
            .unwrap();
        engine
            .handle_update(UpdateMessage {
                flags: 0,
                relation_id: 1,
                key_tuple: None,
                new_tuple: tuple(b"missing", b"5"),
            })
            .await
            .unwrap();
        assert_eq!(engine.stats.missing_rows, 1);
        engine
            .handle_commit(CommitMessage {
                flags: 0,
                commit_lsn: 10,
                end_lsn: 10,
                commit_time: 0,
            })
            .await
            .unwrap();
    }

    // Scenario D: forwarded origin advances a different origin's progress
    // than the session origin.
    #[tokio::test]
    async fn scenario_forwarded_origin_advances_separately() {
        let (mut engine, _host) = engine();
        engine.handle_relation(accounts()).unwrap();
        engine
            .handle_begin(BeginMessage {
                flags: 0,
                final_lsn: 10,
                commit_time: 0,
                xid: 1,
            })
            .unwrap();
        engine
            .handle_origin(OriginMessage {
                flags: 0,
                origin_lsn: 777,
                origin_name: "upstream_two".into(),
            })
            .unwrap();
        assert_eq!(
            engine.state(),
            ApplyState::InRemoteTxn {
                have_origin: true,
                local_open: false
            }
        );
        engine
            .handle_commit(CommitMessage {
                flags: 0,
                commit_lsn: 10,
                end_lsn: 20,
                commit_time: 0,
            })
            .await
            .unwrap();
        let forwarded_id = *engine.origin_ids.get("upstream_two").unwrap();
        assert_eq!(
            engine.progress.load(forwarded_id).await.unwrap(),
            Some(777)
        );
        assert_eq!(engine.progress.load(0).await.unwrap(), Some(20));
    }

    // Scenario E: protocol violation (ORIGIN after a row change).
    #[tokio::test]
    async fn scenario_origin_after_row_change_is_protocol_violation() {
        let (mut engine, _host) = engine();
        engine.handle_relation(accounts()).unwrap();
        engine
            .handle_begin(BeginMessage {
                flags: 0,
                final_lsn: 10,
                commit_time: 0,
                xid: 1,
            })
            .unwrap();
        engine
            .handle_insert(InsertMessage {
                flags: 0,
                relation_id: 1,
                new_tuple: tuple(b"1", b"100"),
            })
            .await
            .unwrap();
        let err = engine
            .handle_origin(OriginMessage {
                flags: 0,
                origin_lsn: 1,
                origin_name: "late".into(),
            })
            .unwrap_err();
        assert!(matches!(err, ReplicationError::ProtocolViolation { .. }));
    }

    #[tokio::test]
    async fn commit_without_begin_is_protocol_violation() {
        let (mut engine, _host) = engine();
        let err = engine
            .handle_commit(CommitMessage {
                flags: 0,
                commit_lsn: 1,
                end_lsn: 1,
                commit_time: 0,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ReplicationError::ProtocolViolation { .. }));
    }

    #[tokio::test]
    async fn row_change_for_unknown_relation_fails() {
        let (mut engine, _host) = engine();
        engine
            .handle_begin(BeginMessage {
                flags: 0,
                final_lsn: 10,
                commit_time: 0,
                xid: 1,
            })
            .unwrap();
        let err = engine
            .handle_insert(InsertMessage {
                flags: 0,
                relation_id: 99,
                new_tuple: tuple(b"1", b"1"),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ReplicationError::UnknownRelation { .. }));
    }

    #[tokio::test]
    async fn cancellation_abandons_open_transaction_without_commit() {
        let (mut engine, host) = engine();
        engine.handle_relation(accounts()).unwrap();
        engine
            .handle_begin(BeginMessage {
                flags: 0,
                final_lsn: 10,
                commit_time: 0,
                xid: 1,
            })
            .unwrap();
        engine
            .handle_insert(InsertMessage {
                flags: 0,
                relation_id: 1,
                new_tuple: tuple(b"1", b"1"),
            })
            .await
            .unwrap();
        assert!(host.is_txn_open());
        engine.abandon_in_progress().await.unwrap();
        assert!(!host.is_txn_open());
        assert_eq!(engine.state(), ApplyState::Idle);
    }

    // Scenario B: INSERT that collides on identity is converted to UPDATE.
    #[tokio::test]
    async fn scenario_insert_conflict_converted_to_update() {
        let (mut engine, host) = engine();
        engine.handle_relation(accounts()).unwrap();
        engine
            .handle_begin(BeginMessage {
                flags: 0,
                final_lsn: 10,
                commit_time: 0,
                xid: 1,
            })
            .unwrap();
        engine
            .handle_insert(InsertMessage {
                flags: 0,
                relation_id: 1,
                new_tuple: tuple(b"1", b"100"),
            })
            .await
            .unwrap();
        // Second INSERT with the same identity column collides.
        engine
            .handle_insert(InsertMessage {
                flags: 0,
                relation_id: 1,
                new_tuple: tuple(b"1", b"999"),
            })
            .await
            .unwrap();
        assert_eq!(engine.stats.conflicts_resolved, 1);
        assert_eq!(host.rows(1).len(), 1);
        assert_eq!(host.rows(1)[0].get("balance").unwrap(), b"999");
    }

    #[tokio::test]
    async fn startup_with_matching_client_encoding_is_accepted() {
        let (mut engine, _host) = engine();
        let mut params = StartupParameters::default();
        params.push("client_encoding", "UTF8");
        engine.handle_startup(params).unwrap();
    }

    #[tokio::test]
    async fn startup_with_mismatched_client_encoding_is_rejected() {
        let (mut engine, _host) = engine();
        let mut params = StartupParameters::default();
        params.push("client_encoding", "LATIN1");
        let err = engine.handle_startup(params).unwrap_err();
        assert!(matches!(err, ReplicationError::ProtocolViolation { .. }));
    }

    #[tokio::test]
    async fn insert_with_tuple_length_mismatch_is_schema_mismatch() {
        let (mut engine, _host) = engine();
        engine.handle_relation(accounts()).unwrap();
        engine
            .handle_begin(BeginMessage {
                flags: 0,
                final_lsn: 10,
                commit_time: 0,
                xid: 1,
            })
            .unwrap();
        let err = engine
            .handle_insert(InsertMessage {
                flags: 0,
                relation_id: 1,
                new_tuple: TupleData::new(vec![TupleSlot::Value {
                    format: crate::tuple::TransferFormat::Text,
                    payload: b"1".to_vec(),
                }]),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ReplicationError::SchemaMismatch { .. }));
    }

    #[tokio::test]
    async fn begin_with_unknown_flag_bit_is_unsupported() {
        let (mut engine, _host) = engine();
        let err = engine
            .handle_begin(BeginMessage {
                flags: 0b1,
                final_lsn: 10,
                commit_time: 0,
                xid: 1,
            })
            .unwrap_err();
        assert!(matches!(err, ReplicationError::UnsupportedFeature { .. }));
    }

    #[tokio::test]
    async fn origin_with_unknown_flag_bit_is_unsupported() {
        let (mut engine, _host) = engine();
        engine
            .handle_begin(BeginMessage {
                flags: 0,
                final_lsn: 10,
                commit_time: 0,
                xid: 1,
            })
            .unwrap();
        let err = engine
            .handle_origin(OriginMessage {
                flags: 0b1,
                origin_lsn: 1,
                origin_name: "up".into(),
            })
            .unwrap_err();
        assert!(matches!(err, ReplicationError::UnsupportedFeature { .. }));
    }

    #[tokio::test]
    async fn commit_with_unknown_flag_bit_is_unsupported() {
        let (mut engine, _host) = engine();
        engine
            .handle_begin(BeginMessage {
                flags: 0,
                final_lsn: 10,
                commit_time: 0,
                xid: 1,
            })
            .unwrap();
        let err = engine
            .handle_commit(CommitMessage {
                flags: 0b1,
                commit_lsn: 10,
                end_lsn: 10,
                commit_time: 0,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ReplicationError::UnsupportedFeature { .. }));
    }

    #[tokio::test]
    async fn relation_with_unknown_flag_bit_is_unsupported() {
        let (mut engine, _host) = engine();
        let mut rel = accounts();
        rel.flags = 0b1;
        let err = engine.handle_relation(rel).unwrap_err();
        assert!(matches!(err, ReplicationError::UnsupportedFeature { .. }));
    }

    // An UPDATE whose new-tuple marks a column unchanged-toast carries that
    // column's value over from the pre-image rather than dropping it.
    #[tokio::test]
    async fn update_with_unchanged_toast_column_preserves_pre_image_value() {
        let (mut engine, host) = engine();
        engine.handle_relation(accounts()).unwrap();
        engine
            .handle_begin(BeginMessage {
                flags: 0,
                final_lsn: 10,
                commit_time: 0,
                xid: 1,
            })
            .unwrap();
        engine
            .handle_insert(InsertMessage {
                flags: 0,
                relation_id: 1,
                new_tuple: tuple(b"1", b"50"),
            })
            .await
            .unwrap();
        engine
            .handle_update(UpdateMessage {
                flags: 0,
                relation_id: 1,
                key_tuple: Some(tuple(b"1", b"50")),
                new_tuple: TupleData::new(vec![
                    TupleSlot::Value {
                        format: crate::tuple::TransferFormat::Text,
                        payload: b"1".to_vec(),
                    },
                    TupleSlot::UnchangedToast,
                ]),
            })
            .await
            .unwrap();
        let rows = host.rows(1);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("balance").unwrap(), b"50");
        assert_eq!(engine.stats.rows_updated, 1);
    }
}
