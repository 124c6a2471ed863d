use crate::errors::{ReplicationError, ReplicationResult};
use crate::tuple::types::{TransferFormat, TupleData, TupleSlot, TypeCatalog, TypeFacts};
use crate::wire::{BufferReader, BufferWriter};

/// Negotiated capability flags affecting which transfer formats are legal.
/// Mirrors the `allow_internal_basetypes` / `allow_binary_basetypes` startup
/// options: without a matching capability the encoder must never emit that
/// format, no matter how cheap it would be.
#[derive(Debug, Clone, Copy)]
pub struct TransferCapabilities {
    pub allow_internal: bool,
    pub allow_binary: bool,
}

impl Default for TransferCapabilities {
    fn default() -> Self {
        Self {
            allow_internal: false,
            allow_binary: true,
        }
    }
}

/// Choose the cheapest transfer format the negotiated capabilities and the
/// type's own facts allow. Internal beats binary beats text, in that order,
/// because internal requires identical peer internals, binary survives
/// minor version differences, and text always works.
pub fn choose_transfer_format(facts: &TypeFacts, caps: TransferCapabilities) -> TransferFormat {
    if caps.allow_internal && facts.is_built_in && !facts.is_array && !facts.is_composite {
        return TransferFormat::Internal;
    }
    if caps.allow_binary
        && facts.has_binary_receive
        && (facts.is_built_in || (!facts.is_composite && !facts.is_array))
    {
        return TransferFormat::Binary;
    }
    TransferFormat::Text
}

/// A single column's encoded value, prior to being wrapped in a `TupleSlot`.
pub enum ColumnValue<'a> {
    Null,
    UnchangedToast,
    /// Raw native-representation bytes, used only when the chosen format is
    /// `Internal`.
    Internal(&'a [u8]),
    /// Bytes from the type's binary send function.
    Binary(&'a [u8]),
    /// The type's textual rendering. `encode_tuple` appends the trailing
    /// NUL the wire format requires; callers pass the bare string.
    Text(&'a str),
}

/// Encode one row into wire-format `TupleData`, given the already-decided
/// format for each column (the encoder decides format once per column per
/// relation descriptor, driven by `choose_transfer_format`).
pub fn encode_tuple(columns: &[ColumnValue<'_>]) -> TupleData {
    let slots = columns
        .iter()
        .map(|c| match c {
            ColumnValue::Null => TupleSlot::Null,
            ColumnValue::UnchangedToast => TupleSlot::UnchangedToast,
            ColumnValue::Internal(bytes) => TupleSlot::Value {
                format: TransferFormat::Internal,
                payload: bytes.to_vec(),
            },
            ColumnValue::Binary(bytes) => TupleSlot::Value {
                format: TransferFormat::Binary,
                payload: bytes.to_vec(),
            },
            ColumnValue::Text(s) => {
                let mut payload = Vec::with_capacity(s.len() + 1);
                payload.extend_from_slice(s.as_bytes());
                payload.push(0);
                TupleSlot::Value {
                    format: TransferFormat::Text,
                    payload,
                }
            }
        })
        .collect();
    TupleData::new(slots)
}

/// Serialize a `TupleData` as a `'T'` message: tag, `u16` live-attribute
/// count, then one slot per attribute.
pub fn write_tuple_data(w: &mut BufferWriter, tuple: &TupleData) -> ReplicationResult<()> {
    w.write_tag('T')?;
    w.write_u16(tuple.len() as u16)?;
    for slot in &tuple.slots {
        match slot {
            TupleSlot::Null => w.write_tag('n')?,
            TupleSlot::UnchangedToast => w.write_tag('u')?,
            TupleSlot::Value { format, payload } => {
                let tag = match format {
                    TransferFormat::Internal => 'i',
                    TransferFormat::Binary => 'b',
                    TransferFormat::Text => 't',
                };
                w.write_tag(tag)?;
                w.write_blob32(payload)?;
            }
        }
    }
    Ok(())
}

/// Parse a `'T'` message body (tag already consumed by the caller).
pub fn decode_tuple(r: &mut BufferReader<'_>) -> ReplicationResult<TupleData> {
    let count = r.read_u16()? as usize;
    let mut slots = Vec::with_capacity(count);
    for _ in 0..count {
        let kind = r.read_tag()?;
        let slot = match kind {
            'n' => TupleSlot::Null,
            'u' => TupleSlot::UnchangedToast,
            'i' => TupleSlot::Value {
                format: TransferFormat::Internal,
                payload: r.read_blob32()?,
            },
            'b' => TupleSlot::Value {
                format: TransferFormat::Binary,
                payload: r.read_blob32()?,
            },
            't' => TupleSlot::Value {
                format: TransferFormat::Text,
                payload: r.read_blob32()?,
            },
            other => {
                return Err(ReplicationError::malformed(format!(
                    "unknown tuple slot kind {other:?}"
                )));
            }
        };
        slots.push(slot);
    }
    Ok(TupleData::new(slots))
}

/// Reconstruct a column's textual value from a slot, for types/paths that
/// only understand text (used by hosts without a binary-receive function
/// for a given type). Internal/binary payloads are returned as-is; callers
/// needing a typed value go through the host's `form_local_row` instead.
///
/// The wire payload includes the trailing NUL (§4.2's `'t'` length "including
/// trailing NUL"); this strips it back off before returning the string.
pub fn slot_as_text(slot: &TupleSlot) -> ReplicationResult<Option<&str>> {
    match slot {
        TupleSlot::Null | TupleSlot::UnchangedToast => Ok(None),
        TupleSlot::Value {
            format: TransferFormat::Text,
            payload,
        } => {
            let body = payload
                .split_last()
                .filter(|(&last, _)| last == 0)
                .map(|(_, rest)| rest)
                .ok_or_else(|| {
                    ReplicationError::malformed("text payload missing trailing NUL")
                })?;
            Ok(Some(
                std::str::from_utf8(body).map_err(|e| ReplicationError::malformed(e.to_string()))?,
            ))
        }
        TupleSlot::Value { .. } => Err(ReplicationError::malformed(
            "slot is not in text transfer format",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuple::types::BuiltinTypeCatalog;

    fn catalog() -> BuiltinTypeCatalog {
        BuiltinTypeCatalog::default()
    }

    #[test]
    fn format_choice_prefers_internal_then_binary_then_text() {
        let cat = catalog();
        let int4 = cat.facts(crate::tuple::types::oid::INT4).unwrap();
        let text = cat.facts(crate::tuple::types::oid::TEXT).unwrap();

        let both = TransferCapabilities {
            allow_internal: true,
            allow_binary: true,
        };
        assert_eq!(choose_transfer_format(&int4, both), TransferFormat::Internal);

        let binary_only = TransferCapabilities {
            allow_internal: false,
            allow_binary: true,
        };
        assert_eq!(
            choose_transfer_format(&int4, binary_only),
            TransferFormat::Binary
        );

        // text has no binary receive function in the built-in catalog.
        assert_eq!(
            choose_transfer_format(&text, binary_only),
            TransferFormat::Text
        );

        let neither = TransferCapabilities {
            allow_internal: false,
            allow_binary: false,
        };
        assert_eq!(choose_transfer_format(&int4, neither), TransferFormat::Text);
    }

    #[test]
    fn tuple_round_trips_through_wire() {
        let row = vec![
            ColumnValue::Null,
            ColumnValue::Text("hello"),
            ColumnValue::Internal(&42i32.to_ne_bytes()),
            ColumnValue::UnchangedToast,
        ];
        let tuple = encode_tuple(&row);
        let mut w = BufferWriter::new();
        write_tuple_data(&mut w, &tuple).unwrap();
        let bytes = w.into_bytes();

        let mut r = BufferReader::new(&bytes);
        assert_eq!(r.read_tag().unwrap(), 'T');
        let decoded = decode_tuple(&mut r).unwrap();
        assert_eq!(decoded, tuple);
        assert!(decoded.slots[0].is_null());
        assert!(decoded.slots[3].is_unchanged_toast());
    }

    #[test]
    fn text_payload_includes_trailing_nul_on_the_wire() {
        let tuple = encode_tuple(&[ColumnValue::Text("hi")]);
        match &tuple.slots[0] {
            TupleSlot::Value { payload, .. } => assert_eq!(payload, b"hi\0"),
            _ => panic!("expected a value slot"),
        }
    }

    #[test]
    fn slot_as_text_strips_trailing_nul() {
        let tuple = encode_tuple(&[ColumnValue::Text("hi")]);
        assert_eq!(slot_as_text(&tuple.slots[0]).unwrap(), Some("hi"));
    }

    #[test]
    fn slot_as_text_rejects_missing_nul() {
        let slot = TupleSlot::Value {
            format: TransferFormat::Text,
            payload: b"no-nul".to_vec(),
        };
        assert!(slot_as_text(&slot).is_err());
    }

    #[test]
    fn unknown_slot_kind_is_malformed() {
        let mut w = BufferWriter::new();
        w.write_u16(1).unwrap();
        w.write_tag('?').unwrap();
        let bytes = w.into_bytes();
        let mut r = BufferReader::new(&bytes);
        assert!(decode_tuple(&mut r).is_err());
    }
}
