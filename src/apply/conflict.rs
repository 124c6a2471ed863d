//! Conflict detection policy plug-point. The apply engine detects the
//! collision (see `engine::apply_insert`); this module only decides what to
//! do about it once found.

use crate::apply::host::LocalRow;
use crate::errors::ResolutionTag;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    Insert,
    /// Not yet driven by the engine (see design notes on the UPDATE
    /// conflict-resolution gap) but modeled now so the same resolver hook
    /// can be wired in without a signature change later.
    Update,
}

pub struct ConflictDecision {
    pub apply: bool,
    pub merged_row: LocalRow,
    pub tag: ResolutionTag,
}

/// Policy plug-point for resolving a row-level conflict. Not dictated by
/// the protocol; implementations are swappable the way an event-sink
/// registry picks one of several trait-object sinks by configuration.
pub trait ConflictResolver: Send + Sync {
    fn resolve(
        &self,
        kind: ConflictKind,
        local_row: &LocalRow,
        local_commit_time: Option<i64>,
        remote_row: &LocalRow,
        remote_commit_time: i64,
    ) -> ConflictDecision;
}

/// Default resolver: prefer whichever row has the later commit timestamp.
/// Without provenance on the local row (no `local_commit_time`), "last
/// write wins" can't be evaluated, so the remote row is preferred — there
/// is no basis to prefer the local one instead.
pub struct LastWriterWinsResolver;

impl ConflictResolver for LastWriterWinsResolver {
    fn resolve(
        &self,
        _kind: ConflictKind,
        _local_row: &LocalRow,
        local_commit_time: Option<i64>,
        remote_row: &LocalRow,
        remote_commit_time: i64,
    ) -> ConflictDecision {
        let prefer_remote = match local_commit_time {
            Some(local_ts) => remote_commit_time >= local_ts,
            None => true,
        };
        if prefer_remote {
            ConflictDecision {
                apply: true,
                merged_row: remote_row.clone(),
                tag: ResolutionTag::ApplyRemote,
            }
        } else {
            ConflictDecision {
                apply: false,
                merged_row: _local_row.clone(),
                tag: ResolutionTag::KeepLocal,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(v: &str) -> LocalRow {
        let mut r = LocalRow::new();
        r.insert("value".into(), v.as_bytes().to_vec());
        r
    }

    #[test]
    fn prefers_remote_when_local_timestamp_unknown() {
        let resolver = LastWriterWinsResolver;
        let decision = resolver.resolve(ConflictKind::Insert, &row("local"), None, &row("remote"), 100);
        assert!(decision.apply);
        assert_eq!(decision.tag, ResolutionTag::ApplyRemote);
    }

    #[test]
    fn prefers_later_commit_time() {
        let resolver = LastWriterWinsResolver;
        let decision = resolver.resolve(
            ConflictKind::Insert,
            &row("local"),
            Some(200),
            &row("remote"),
            100,
        );
        assert!(!decision.apply);
        assert_eq!(decision.tag, ResolutionTag::KeepLocal);
    }
}
