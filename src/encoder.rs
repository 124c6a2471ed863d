//! Upstream-side encoder: serializes decoded transaction events into the
//! wire messages defined in `message`. Grounded on the original C encoder's
//! `pglogical_write_begin`/`write_commit`/`write_origin`/`write_insert`/
//! `write_update`/`write_delete`/`write_rel` family — each `write_*`
//! function there becomes one method here building a `ReplicationMessage`
//! and handing it to `message::encode_message`.

use crate::message::{
    BeginMessage, CommitMessage, DeleteMessage, InsertMessage, OriginMessage, OuterFrame,
    ReplicationMessage, StartupParameters, UpdateMessage,
};
use crate::relation::RelationDescriptor;
use crate::tuple::TupleData;
use crate::wire::BufferWriter;
use crate::errors::ReplicationResult;

/// Negotiated startup options advertised by the encoder at session start.
#[derive(Debug, Clone)]
pub struct EncoderOptions {
    pub client_encoding: String,
    pub allow_internal_basetypes: bool,
    pub allow_binary_basetypes: bool,
    pub replication_sets: Vec<String>,
}

impl Default for EncoderOptions {
    fn default() -> Self {
        Self {
            client_encoding: "UTF8".into(),
            allow_internal_basetypes: false,
            allow_binary_basetypes: true,
            replication_sets: Vec::new(),
        }
    }
}

/// Builds wire messages for the upstream side of a session. Does not own a
/// relation cache itself — callers decide whether a RELATION message needs
/// to precede a row change (typically consulting their own `RelationCache`)
/// since that decision depends on what has already been sent, which is
/// session state the encoder doesn't need to duplicate.
pub struct Encoder {
    options: EncoderOptions,
}

impl Encoder {
    pub fn new(options: EncoderOptions) -> Self {
        Self { options }
    }

    pub fn write_startup(&self) -> ReplicationMessage {
        let mut params = StartupParameters::default();
        params.push("client_encoding", self.options.client_encoding.clone());
        params.push(
            "allow_internal_basetypes",
            self.options.allow_internal_basetypes.to_string(),
        );
        params.push(
            "allow_binary_basetypes",
            self.options.allow_binary_basetypes.to_string(),
        );
        params.push(
            "replication_sets",
            self.options.replication_sets.join(","),
        );
        ReplicationMessage::Startup(params)
    }

    pub fn write_begin(&self, final_lsn: i64, commit_time: i64, xid: u32) -> ReplicationMessage {
        ReplicationMessage::Begin(BeginMessage {
            flags: 0,
            final_lsn,
            commit_time,
            xid,
        })
    }

    pub fn write_origin(&self, origin_lsn: i64, origin_name: String) -> ReplicationMessage {
        ReplicationMessage::Origin(OriginMessage {
            flags: 0,
            origin_lsn,
            origin_name,
        })
    }

    pub fn write_commit(&self, commit_lsn: i64, end_lsn: i64, commit_time: i64) -> ReplicationMessage {
        ReplicationMessage::Commit(CommitMessage {
            flags: 0,
            commit_lsn,
            end_lsn,
            commit_time,
        })
    }

    pub fn write_relation(&self, rel: RelationDescriptor) -> ReplicationMessage {
        ReplicationMessage::Relation(rel)
    }

    pub fn write_insert(&self, relation_id: u32, new_tuple: TupleData) -> ReplicationMessage {
        ReplicationMessage::Insert(InsertMessage {
            flags: 0,
            relation_id,
            new_tuple,
        })
    }

    pub fn write_update(
        &self,
        relation_id: u32,
        key_tuple: Option<TupleData>,
        new_tuple: TupleData,
    ) -> ReplicationMessage {
        ReplicationMessage::Update(UpdateMessage {
            flags: 0,
            relation_id,
            key_tuple,
            new_tuple,
        })
    }

    pub fn write_delete(&self, relation_id: u32, key_tuple: TupleData) -> ReplicationMessage {
        ReplicationMessage::Delete(DeleteMessage {
            flags: 0,
            relation_id,
            key_tuple,
        })
    }

    /// Wrap a built message in the outer WAL-data envelope and serialize it.
    pub fn serialize_wal_frame(
        &self,
        wal_start: i64,
        wal_end: i64,
        send_time: i64,
        message: ReplicationMessage,
    ) -> ReplicationResult<Vec<u8>> {
        let frame = OuterFrame::Wal {
            wal_start,
            wal_end,
            send_time,
            message,
        };
        let mut w = BufferWriter::new();
        crate::message::encode_outer(&mut w, &frame)?;
        Ok(w.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::decode_outer;
    use crate::wire::BufferReader;

    #[test]
    fn startup_advertises_negotiated_options() {
        let enc = Encoder::new(EncoderOptions::default());
        let msg = enc.write_startup();
        match msg {
            ReplicationMessage::Startup(params) => {
                assert_eq!(params.get("client_encoding"), Some("UTF8"));
                assert_eq!(params.get("allow_binary_basetypes"), Some("true"));
            }
            _ => panic!("expected startup message"),
        }
    }

    #[test]
    fn serialized_frame_round_trips() {
        let enc = Encoder::new(EncoderOptions::default());
        let msg = enc.write_begin(100, 0, 5);
        let bytes = enc.serialize_wal_frame(10, 20, 30, msg.clone()).unwrap();
        let mut r = BufferReader::new(&bytes);
        let decoded = decode_outer(&mut r).unwrap().unwrap();
        match decoded {
            OuterFrame::Wal { message, .. } => assert_eq!(message, msg),
            _ => panic!("expected wal frame"),
        }
    }
}
