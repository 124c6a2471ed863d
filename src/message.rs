//! Protocol message layer: the action-tagged messages that travel inside the
//! outer copy-data envelope, plus the envelope itself.
//!
//! Grounded on the dispatch-by-tag-byte shape of a typical logical
//! replication message parser (one `parse_*` function per tag, switched on
//! the leading byte) and on the `XLogData`/`Keepalive` outer-frame split used
//! by a typical replication client loop.

use crate::errors::{ReplicationError, ReplicationResult};
use crate::relation::{read_relation, write_relation, RelationDescriptor};
use crate::tuple::{decode_tuple, write_tuple_data, TupleData};
use crate::wire::{BufferReader, BufferWriter};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StartupParameters {
    pub params: Vec<(String, String)>,
}

impl StartupParameters {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.params.push((key.into(), value.into()));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeginMessage {
    pub flags: u8,
    pub final_lsn: i64,
    pub commit_time: i64,
    pub xid: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginMessage {
    pub flags: u8,
    pub origin_lsn: i64,
    pub origin_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitMessage {
    pub flags: u8,
    pub commit_lsn: i64,
    pub end_lsn: i64,
    pub commit_time: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertMessage {
    pub flags: u8,
    pub relation_id: u32,
    pub new_tuple: TupleData,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateMessage {
    pub flags: u8,
    pub relation_id: u32,
    pub key_tuple: Option<TupleData>,
    pub new_tuple: TupleData,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteMessage {
    pub flags: u8,
    pub relation_id: u32,
    pub key_tuple: TupleData,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicationMessage {
    Startup(StartupParameters),
    Begin(BeginMessage),
    Origin(OriginMessage),
    Commit(CommitMessage),
    Relation(RelationDescriptor),
    Insert(InsertMessage),
    Update(UpdateMessage),
    Delete(DeleteMessage),
}

impl ReplicationMessage {
    pub fn tag(&self) -> char {
        match self {
            ReplicationMessage::Startup(_) => 'S',
            ReplicationMessage::Begin(_) => 'B',
            ReplicationMessage::Origin(_) => 'O',
            ReplicationMessage::Commit(_) => 'C',
            ReplicationMessage::Relation(_) => 'R',
            ReplicationMessage::Insert(_) => 'I',
            ReplicationMessage::Update(_) => 'U',
            ReplicationMessage::Delete(_) => 'D',
        }
    }
}

pub fn encode_message(w: &mut BufferWriter, msg: &ReplicationMessage) -> ReplicationResult<()> {
    match msg {
        ReplicationMessage::Startup(params) => {
            w.write_tag('S')?;
            w.write_u8(1)?; // format version
            for (k, v) in &params.params {
                w.write_lstr16(k)?;
                w.write_lstr16(v)?;
            }
        }
        ReplicationMessage::Begin(b) => {
            w.write_tag('B')?;
            w.write_u8(b.flags)?;
            w.write_i64(b.final_lsn)?;
            w.write_i64(b.commit_time)?;
            w.write_u32(b.xid)?;
        }
        ReplicationMessage::Origin(o) => {
            w.write_tag('O')?;
            w.write_u8(o.flags)?;
            w.write_i64(o.origin_lsn)?;
            w.write_u8(o.origin_name.len() as u8)?;
            w.write_bytes(o.origin_name.as_bytes())?;
        }
        ReplicationMessage::Commit(c) => {
            w.write_tag('C')?;
            w.write_u8(c.flags)?;
            w.write_i64(c.commit_lsn)?;
            w.write_i64(c.end_lsn)?;
            w.write_i64(c.commit_time)?;
        }
        ReplicationMessage::Relation(rel) => write_relation(w, rel)?,
        ReplicationMessage::Insert(ins) => {
            w.write_tag('I')?;
            w.write_u8(ins.flags)?;
            w.write_u32(ins.relation_id)?;
            w.write_tag('N')?;
            write_tuple_data(w, &ins.new_tuple)?;
        }
        ReplicationMessage::Update(upd) => {
            w.write_tag('U')?;
            w.write_u8(upd.flags)?;
            w.write_u32(upd.relation_id)?;
            if let Some(key) = &upd.key_tuple {
                w.write_tag('K')?;
                write_tuple_data(w, key)?;
            }
            w.write_tag('N')?;
            write_tuple_data(w, &upd.new_tuple)?;
        }
        ReplicationMessage::Delete(del) => {
            w.write_tag('D')?;
            w.write_u8(del.flags)?;
            w.write_u32(del.relation_id)?;
            w.write_tag('K')?;
            write_tuple_data(w, &del.key_tuple)?;
        }
    }
    Ok(())
}

pub fn decode_message(r: &mut BufferReader<'_>) -> ReplicationResult<ReplicationMessage> {
    let tag = r.read_tag()?;
    match tag {
        'S' => {
            let format = r.read_u8()?;
            if format != 1 {
                return Err(ReplicationError::unsupported(format!(
                    "unknown startup format {format}"
                )));
            }
            let mut params = StartupParameters::default();
            while !r.is_empty() {
                let key = r.read_lstr16()?;
                let value = r.read_lstr16()?;
                params.push(key, value);
            }
            Ok(ReplicationMessage::Startup(params))
        }
        'B' => Ok(ReplicationMessage::Begin(BeginMessage {
            flags: r.read_u8()?,
            final_lsn: r.read_i64()?,
            commit_time: r.read_i64()?,
            xid: r.read_u32()?,
        })),
        'O' => {
            let flags = r.read_u8()?;
            let origin_lsn = r.read_i64()?;
            let len = r.read_u8()? as usize;
            let name_bytes = r.read_bytes(len)?;
            let origin_name = String::from_utf8(name_bytes)?;
            Ok(ReplicationMessage::Origin(OriginMessage {
                flags,
                origin_lsn,
                origin_name,
            }))
        }
        'C' => Ok(ReplicationMessage::Commit(CommitMessage {
            flags: r.read_u8()?,
            commit_lsn: r.read_i64()?,
            end_lsn: r.read_i64()?,
            commit_time: r.read_i64()?,
        })),
        'R' => Ok(ReplicationMessage::Relation(read_relation(r)?)),
        'I' => {
            let flags = r.read_u8()?;
            let relation_id = r.read_u32()?;
            expect_tag(r, 'N')?;
            let new_tuple = decode_tuple(r)?;
            Ok(ReplicationMessage::Insert(InsertMessage {
                flags,
                relation_id,
                new_tuple,
            }))
        }
        'U' => {
            let flags = r.read_u8()?;
            let relation_id = r.read_u32()?;
            let next = r.read_tag()?;
            let (key_tuple, new_tuple) = match next {
                'K' => {
                    let key = decode_tuple(r)?;
                    expect_tag(r, 'N')?;
                    (Some(key), decode_tuple(r)?)
                }
                'N' => (None, decode_tuple(r)?),
                other => {
                    return Err(ReplicationError::malformed(format!(
                        "expected 'K' or 'N' in UPDATE, got {other:?}"
                    )));
                }
            };
            Ok(ReplicationMessage::Update(UpdateMessage {
                flags,
                relation_id,
                key_tuple,
                new_tuple,
            }))
        }
        'D' => {
            let flags = r.read_u8()?;
            let relation_id = r.read_u32()?;
            expect_tag(r, 'K')?;
            let key_tuple = decode_tuple(r)?;
            Ok(ReplicationMessage::Delete(DeleteMessage {
                flags,
                relation_id,
                key_tuple,
            }))
        }
        other => Err(ReplicationError::unsupported(format!(
            "unknown message tag {other:?}"
        ))),
    }
}

fn expect_tag(r: &mut BufferReader<'_>, expected: char) -> ReplicationResult<()> {
    let tag = r.read_tag()?;
    if tag != expected {
        return Err(ReplicationError::malformed(format!(
            "expected tag {expected:?}, got {tag:?}"
        )));
    }
    Ok(())
}

/// The outer copy-data frame every inner `ReplicationMessage` travels inside.
/// Unknown outer tags are skipped by the caller, never treated as an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OuterFrame {
    Wal {
        wal_start: i64,
        wal_end: i64,
        send_time: i64,
        message: ReplicationMessage,
    },
    Keepalive {
        end_lsn: i64,
        send_time: i64,
        reply_requested: bool,
    },
}

pub fn encode_outer(w: &mut BufferWriter, frame: &OuterFrame) -> ReplicationResult<()> {
    match frame {
        OuterFrame::Wal {
            wal_start,
            wal_end,
            send_time,
            message,
        } => {
            w.write_tag('w')?;
            w.write_i64(*wal_start)?;
            w.write_i64(*wal_end)?;
            w.write_i64(*send_time)?;
            encode_message(w, message)
        }
        OuterFrame::Keepalive {
            end_lsn,
            send_time,
            reply_requested,
        } => {
            w.write_tag('k')?;
            w.write_i64(*end_lsn)?;
            w.write_i64(*send_time)?;
            w.write_u8(if *reply_requested { 1 } else { 0 })
        }
    }
}

/// Decode one outer frame. Returns `Ok(None)` for a recognized-but-ignored
/// outer tag rather than an error, per the "skip unknown outer tags" rule.
pub fn decode_outer(r: &mut BufferReader<'_>) -> ReplicationResult<Option<OuterFrame>> {
    let tag = r.read_tag()?;
    match tag {
        'w' => {
            let wal_start = r.read_i64()?;
            let wal_end = r.read_i64()?;
            let send_time = r.read_i64()?;
            let message = decode_message(r)?;
            Ok(Some(OuterFrame::Wal {
                wal_start,
                wal_end,
                send_time,
                message,
            }))
        }
        'k' => {
            let end_lsn = r.read_i64()?;
            let send_time = r.read_i64()?;
            let reply_requested = r.read_u8()? != 0;
            Ok(Some(OuterFrame::Keepalive {
                end_lsn,
                send_time,
                reply_requested,
            }))
        }
        _ => Ok(None),
    }
}
