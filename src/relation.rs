//! Relation descriptor and the per-session metadata cache shared between
//! encoder and decoder across a RELATION ('R') message.

use std::collections::HashMap;

use crate::errors::{ReplicationError, ReplicationResult};
use crate::wire::{BufferReader, BufferWriter};

/// One column of a relation, as described on the wire. Bit 0 of the wire
/// flags byte marks replica-identity membership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    pub name: String,
    pub is_replica_identity: bool,
}

/// A serialized snapshot of the subset of a table's schema needed to
/// interpret row payloads: which columns are live, in wire order, and which
/// form the replica identity used to look rows up for UPDATE/DELETE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationDescriptor {
    /// Reserved wire flags byte (§4.3); the apply engine rejects any relation
    /// descriptor carrying a bit it doesn't recognize, the same way it does
    /// for every other message's flags byte.
    pub flags: u8,
    pub relation_id: u32,
    pub schema: String,
    pub table: String,
    pub columns: Vec<ColumnDescriptor>,
}

impl RelationDescriptor {
    pub fn identity_columns(&self) -> impl Iterator<Item = &ColumnDescriptor> {
        self.columns.iter().filter(|c| c.is_replica_identity)
    }

    pub fn has_identity(&self) -> bool {
        self.columns.iter().any(|c| c.is_replica_identity)
    }
}

/// Encode a RELATION message (`'R'` + flags + id + ATTRS block).
///
/// Unlike `§4.3`'s wire column block, the schema and table name are not part
/// of the column-block loop; they're carried ahead of the ATTRS block so the
/// decoder can identify the destination table before looking at columns.
pub fn write_relation(w: &mut BufferWriter, rel: &RelationDescriptor) -> ReplicationResult<()> {
    w.write_tag('R')?;
    w.write_u8(rel.flags)?;
    w.write_u32(rel.relation_id)?;
    w.write_lstr16(&rel.schema)?;
    w.write_lstr16(&rel.table)?;
    w.write_tag('A')?;
    w.write_u16(rel.columns.len() as u16)?;
    for col in &rel.columns {
        w.write_tag('C')?;
        w.write_u8(if col.is_replica_identity { 1 } else { 0 })?;
        w.write_tag('N')?;
        w.write_lstr16(&col.name)?;
    }
    Ok(())
}

/// Decode a RELATION message body (tag `'R'` already consumed by the
/// caller).
pub fn read_relation(r: &mut BufferReader<'_>) -> ReplicationResult<RelationDescriptor> {
    let flags = r.read_u8()?;
    let relation_id = r.read_u32()?;
    let schema = r.read_lstr16()?;
    let table = r.read_lstr16()?;

    let attrs_tag = r.read_tag()?;
    if attrs_tag != 'A' {
        return Err(ReplicationError::malformed(format!(
            "expected ATTRS block tag 'A', got {attrs_tag:?}"
        )));
    }
    let count = r.read_u16()? as usize;
    let mut columns = Vec::with_capacity(count);
    for _ in 0..count {
        let col_tag = r.read_tag()?;
        if col_tag != 'C' {
            return Err(ReplicationError::malformed(format!(
                "expected column block tag 'C', got {col_tag:?}"
            )));
        }
        let flags = r.read_u8()?;
        let name_tag = r.read_tag()?;
        if name_tag != 'N' {
            return Err(ReplicationError::malformed(format!(
                "expected column name tag 'N', got {name_tag:?}"
            )));
        }
        let name = r.read_lstr16()?;
        columns.push(ColumnDescriptor {
            name,
            is_replica_identity: flags & 0x1 != 0,
        });
    }

    Ok(RelationDescriptor {
        flags,
        relation_id,
        schema,
        table,
        columns,
    })
}

/// Per-session cache of the last RELATION descriptor sent/received for each
/// relation id. The encoder consults this to decide whether a RELATION
/// message is required before the next row change; the decoder consults it
/// to interpret row changes.
#[derive(Debug, Default)]
pub struct RelationCache {
    descriptors: HashMap<u32, RelationDescriptor>,
}

impl RelationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a freshly sent/received descriptor, replacing any prior entry.
    pub fn insert(&mut self, descriptor: RelationDescriptor) {
        self.descriptors.insert(descriptor.relation_id, descriptor);
    }

    pub fn get(&self, relation_id: u32) -> Option<&RelationDescriptor> {
        self.descriptors.get(&relation_id)
    }

    pub fn contains(&self, relation_id: u32) -> bool {
        self.descriptors.contains_key(&relation_id)
    }

    /// Drop a cached descriptor in response to an out-of-band schema-change
    /// signal. The next row change for this relation will require a fresh
    /// RELATION message.
    pub fn invalidate(&mut self, relation_id: u32) {
        self.descriptors.remove(&relation_id);
    }

    pub fn require(&self, relation_id: u32) -> ReplicationResult<&RelationDescriptor> {
        self.get(relation_id)
            .ok_or(ReplicationError::UnknownRelation { relation_id })
    }
}
