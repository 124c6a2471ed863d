use std::collections::HashMap;

/// Which of the three wire encodings a value slot carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferFormat {
    /// `'i'` — raw native-representation bytes, only safe between peers
    /// with identical type widths and byte order.
    Internal,
    /// `'b'` — the type's binary send/recv representation.
    Binary,
    /// `'t'` — textual output, always safe.
    Text,
}

/// One column's worth of tuple payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TupleSlot {
    /// `'n'` — column value is SQL NULL.
    Null,
    /// `'u'` — externally-stored large value unchanged since the last apply;
    /// only legal in an UPDATE new-tuple for a varlena column.
    UnchangedToast,
    /// `'i'`/`'b'`/`'t'` — a present value in the given transfer format.
    Value {
        format: TransferFormat,
        payload: Vec<u8>,
    },
}

impl TupleSlot {
    pub fn is_null(&self) -> bool {
        matches!(self, TupleSlot::Null)
    }

    pub fn is_unchanged_toast(&self) -> bool {
        matches!(self, TupleSlot::UnchangedToast)
    }
}

/// An ordered row of column slots, one per live column of the associated
/// relation descriptor, in schema order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TupleData {
    pub slots: Vec<TupleSlot>,
}

impl TupleData {
    pub fn new(slots: Vec<TupleSlot>) -> Self {
        Self { slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Per-type facts the tuple codec needs to pick and validate a transfer
/// format. A real deployment backs this with the upstream's type catalog;
/// the change-capture/catalog lookup mechanism itself is out of scope here,
/// so this is a capability trait the host supplies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeFacts {
    pub is_built_in: bool,
    pub is_array: bool,
    pub is_composite: bool,
    pub has_binary_receive: bool,
    pub by_value: bool,
    pub fixed_width: Option<u32>,
}

pub trait TypeCatalog {
    fn facts(&self, type_oid: u32) -> Option<TypeFacts>;
}

/// A minimal built-in catalog covering the base types exercised by tests:
/// bool, int2/int4/int8, text, bytea, timestamptz. Oids follow Postgres's
/// own well-known numbering for these so a real catalog is a drop-in
/// replacement with no codec changes required.
pub struct BuiltinTypeCatalog {
    facts: HashMap<u32, TypeFacts>,
}

pub mod oid {
    pub const BOOL: u32 = 16;
    pub const INT2: u32 = 21;
    pub const INT4: u32 = 23;
    pub const INT8: u32 = 20;
    pub const TEXT: u32 = 25;
    pub const BYTEA: u32 = 17;
    pub const TIMESTAMPTZ: u32 = 1184;
    pub const NUMERIC: u32 = 1700;
}

impl Default for BuiltinTypeCatalog {
    fn default() -> Self {
        use oid::*;
        let mut facts = HashMap::new();
        facts.insert(
            BOOL,
            TypeFacts {
                is_built_in: true,
                is_array: false,
                is_composite: false,
                has_binary_receive: true,
                by_value: true,
                fixed_width: Some(1),
            },
        );
        facts.insert(
            INT2,
            TypeFacts {
                is_built_in: true,
                is_array: false,
                is_composite: false,
                has_binary_receive: true,
                by_value: true,
                fixed_width: Some(2),
            },
        );
        facts.insert(
            INT4,
            TypeFacts {
                is_built_in: true,
                is_array: false,
                is_composite: false,
                has_binary_receive: true,
                by_value: true,
                fixed_width: Some(4),
            },
        );
        facts.insert(
            INT8,
            TypeFacts {
                is_built_in: true,
                is_array: false,
                is_composite: false,
                has_binary_receive: true,
                by_value: true,
                fixed_width: Some(8),
            },
        );
        facts.insert(
            TEXT,
            TypeFacts {
                is_built_in: true,
                is_array: false,
                is_composite: false,
                has_binary_receive: false,
                by_value: false,
                fixed_width: None,
            },
        );
        facts.insert(
            BYTEA,
            TypeFacts {
                is_built_in: true,
                is_array: false,
                is_composite: false,
                has_binary_receive: true,
                by_value: false,
                fixed_width: None,
            },
        );
        facts.insert(
            TIMESTAMPTZ,
            TypeFacts {
                is_built_in: true,
                is_array: false,
                is_composite: false,
                has_binary_receive: true,
                by_value: true,
                fixed_width: Some(8),
            },
        );
        facts.insert(
            NUMERIC,
            TypeFacts {
                is_built_in: true,
                is_array: false,
                is_composite: false,
                // numeric's binary form is version-sensitive; this catalog
                // plays it safe and always falls back to text for it.
                has_binary_receive: false,
                by_value: false,
                fixed_width: None,
            },
        );
        Self { facts }
    }
}

impl TypeCatalog for BuiltinTypeCatalog {
    fn facts(&self, type_oid: u32) -> Option<TypeFacts> {
        self.facts.get(&type_oid).copied()
    }
}
