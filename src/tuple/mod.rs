//! Per-column value codec: three transfer formats (internal-binary,
//! send/recv-binary, text), null and unchanged-large-value markers, and the
//! format-choice algorithm the encoder uses to pick among them.

mod codec;
mod types;

pub use codec::{
    choose_transfer_format, decode_tuple, encode_tuple, write_tuple_data, ColumnValue,
    TransferCapabilities,
};
pub use types::{BuiltinTypeCatalog, TransferFormat, TupleData, TupleSlot, TypeCatalog, TypeFacts};
