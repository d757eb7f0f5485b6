//! Event payload codec.
//!
//! The protocol router emits every event as one log whose data field is a
//! double-wrapped encoding: the outer layer is a single ABI-encoded dynamic
//! `bytes` value, and the bytes it carries are the ABI-encoded field tuple
//! declared by the event's registry schema.
//!
//! Decoding is a pure function of (schema, data). Any mismatch between the
//! two is a `DecodeError`, which callers treat as a per-event failure, not
//! a fatal one.

use alloy_primitives::{Address, B256, U256};
use thiserror::Error;

const WORD: usize = 32;

#[derive(Debug, Error, PartialEq)]
pub enum DecodeError {
    #[error("payload truncated: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },
    #[error("bad dynamic offset {offset} (payload is {len} bytes)")]
    BadOffset { offset: usize, len: usize },
    #[error("invalid hex in log data: {0}")]
    BadHex(String),
    #[error("field {index} out of range for {want}")]
    OutOfRange { index: usize, want: &'static str },
    #[error("field {index} is not valid utf-8")]
    BadUtf8 { index: usize },
    #[error("field {index}: expected {want}, got {got}")]
    TypeMismatch {
        index: usize,
        want: &'static str,
        got: &'static str,
    },
    #[error("field index {0} out of bounds")]
    MissingField(usize),
}

/// Primitive field types an event schema may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Address,
    Uint256,
    Uint64,
    Int64,
    Bytes32,
    Bool,
    /// Dynamic UTF-8 string.
    Str,
}

impl FieldType {
    fn name(self) -> &'static str {
        match self {
            FieldType::Address => "address",
            FieldType::Uint256 => "uint256",
            FieldType::Uint64 => "uint64",
            FieldType::Int64 => "int64",
            FieldType::Bytes32 => "bytes32",
            FieldType::Bool => "bool",
            FieldType::Str => "string",
        }
    }
}

/// A decoded field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Address(Address),
    Uint256(U256),
    Uint64(u64),
    Int64(i64),
    Bytes32(B256),
    Bool(bool),
    Str(String),
}

impl FieldValue {
    fn type_name(&self) -> &'static str {
        match self {
            FieldValue::Address(_) => "address",
            FieldValue::Uint256(_) => "uint256",
            FieldValue::Uint64(_) => "uint64",
            FieldValue::Int64(_) => "int64",
            FieldValue::Bytes32(_) => "bytes32",
            FieldValue::Bool(_) => "bool",
            FieldValue::Str(_) => "string",
        }
    }
}

/// Typed accessors over a decoded tuple. Index errors and type mismatches
/// surface as `DecodeError` so handler code can use `?` throughout.
pub struct Fields<'a>(pub &'a [FieldValue]);

impl<'a> Fields<'a> {
    fn get(&self, index: usize) -> Result<&FieldValue, DecodeError> {
        self.0.get(index).ok_or(DecodeError::MissingField(index))
    }

    pub fn address(&self, index: usize) -> Result<Address, DecodeError> {
        match self.get(index)? {
            FieldValue::Address(a) => Ok(*a),
            other => Err(DecodeError::TypeMismatch {
                index,
                want: "address",
                got: other.type_name(),
            }),
        }
    }

    /// Address rendered the way the store keys expect it: lowercase hex.
    pub fn address_key(&self, index: usize) -> Result<String, DecodeError> {
        Ok(format!("{:#x}", self.address(index)?))
    }

    pub fn u256(&self, index: usize) -> Result<U256, DecodeError> {
        match self.get(index)? {
            FieldValue::Uint256(v) => Ok(*v),
            other => Err(DecodeError::TypeMismatch {
                index,
                want: "uint256",
                got: other.type_name(),
            }),
        }
    }

    /// uint256 rendered as the decimal string used for document ids.
    pub fn u256_key(&self, index: usize) -> Result<String, DecodeError> {
        Ok(self.u256(index)?.to_string())
    }

    /// uint256 narrowed to u128 (ledger amounts).
    pub fn amount(&self, index: usize) -> Result<u128, DecodeError> {
        self.u256(index)?
            .try_into()
            .map_err(|_| DecodeError::OutOfRange { index, want: "u128" })
    }

    pub fn u64(&self, index: usize) -> Result<u64, DecodeError> {
        match self.get(index)? {
            FieldValue::Uint64(v) => Ok(*v),
            other => Err(DecodeError::TypeMismatch {
                index,
                want: "uint64",
                got: other.type_name(),
            }),
        }
    }

    pub fn i64(&self, index: usize) -> Result<i64, DecodeError> {
        match self.get(index)? {
            FieldValue::Int64(v) => Ok(*v),
            other => Err(DecodeError::TypeMismatch {
                index,
                want: "int64",
                got: other.type_name(),
            }),
        }
    }

    pub fn b256(&self, index: usize) -> Result<B256, DecodeError> {
        match self.get(index)? {
            FieldValue::Bytes32(v) => Ok(*v),
            other => Err(DecodeError::TypeMismatch {
                index,
                want: "bytes32",
                got: other.type_name(),
            }),
        }
    }

    pub fn bool(&self, index: usize) -> Result<bool, DecodeError> {
        match self.get(index)? {
            FieldValue::Bool(v) => Ok(*v),
            other => Err(DecodeError::TypeMismatch {
                index,
                want: "bool",
                got: other.type_name(),
            }),
        }
    }

    pub fn str(&self, index: usize) -> Result<&str, DecodeError> {
        match self.get(index)? {
            FieldValue::Str(s) => Ok(s),
            other => Err(DecodeError::TypeMismatch {
                index,
                want: "string",
                got: other.type_name(),
            }),
        }
    }
}

/// Decode `0x…` log data into raw bytes.
pub fn decode_hex(data: &str) -> Result<Vec<u8>, DecodeError> {
    let stripped = data.strip_prefix("0x").unwrap_or(data);
    hex::decode(stripped).map_err(|e| DecodeError::BadHex(e.to_string()))
}

fn word(data: &[u8], at: usize) -> Result<[u8; 32], DecodeError> {
    let end = at
        .checked_add(WORD)
        .ok_or(DecodeError::BadOffset { offset: at, len: data.len() })?;
    if end > data.len() {
        return Err(DecodeError::Truncated { need: end, have: data.len() });
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&data[at..end]);
    Ok(out)
}

fn word_to_usize(w: &[u8; 32], data_len: usize) -> Result<usize, DecodeError> {
    // Offsets and lengths always fit in a usize for any payload we accept.
    if w[..24].iter().any(|b| *b != 0) {
        return Err(DecodeError::BadOffset { offset: usize::MAX, len: data_len });
    }
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&w[24..]);
    Ok(u64::from_be_bytes(buf) as usize)
}

/// Strip the outer `bytes` wrapper: [offset word][length word][payload].
fn unwrap_outer(data: &[u8]) -> Result<&[u8], DecodeError> {
    let offset = word_to_usize(&word(data, 0)?, data.len())?;
    if offset + WORD > data.len() {
        return Err(DecodeError::BadOffset { offset, len: data.len() });
    }
    let len = word_to_usize(&word(data, offset)?, data.len())?;
    let start = offset + WORD;
    let end = start
        .checked_add(len)
        .ok_or(DecodeError::BadOffset { offset, len: data.len() })?;
    if end > data.len() {
        return Err(DecodeError::Truncated { need: end, have: data.len() });
    }
    Ok(&data[start..end])
}

/// Decode the double-wrapped log data against a declared schema.
pub fn decode_payload(schema: &[FieldType], data: &[u8]) -> Result<Vec<FieldValue>, DecodeError> {
    let inner = unwrap_outer(data)?;
    decode_tuple(schema, inner)
}

/// Decode an ABI tuple: one head word per field, dynamic tails addressed by
/// offset from the start of the tuple.
fn decode_tuple(schema: &[FieldType], data: &[u8]) -> Result<Vec<FieldValue>, DecodeError> {
    let head = schema.len() * WORD;
    if data.len() < head {
        return Err(DecodeError::Truncated { need: head, have: data.len() });
    }

    let mut values = Vec::with_capacity(schema.len());
    for (index, field) in schema.iter().enumerate() {
        let w = word(data, index * WORD)?;
        let value = match field {
            FieldType::Address => {
                if w[..12].iter().any(|b| *b != 0) {
                    return Err(DecodeError::OutOfRange { index, want: "address" });
                }
                FieldValue::Address(Address::from_slice(&w[12..]))
            }
            FieldType::Uint256 => FieldValue::Uint256(U256::from_be_bytes(w)),
            FieldType::Uint64 => {
                if w[..24].iter().any(|b| *b != 0) {
                    return Err(DecodeError::OutOfRange { index, want: "uint64" });
                }
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&w[24..]);
                FieldValue::Uint64(u64::from_be_bytes(buf))
            }
            FieldType::Int64 => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&w[24..]);
                let v = i64::from_be_bytes(buf);
                // Upper words must be the sign extension of the low word.
                let fill = if v < 0 { 0xff } else { 0x00 };
                if w[..24].iter().any(|b| *b != fill) {
                    return Err(DecodeError::OutOfRange { index, want: "int64" });
                }
                FieldValue::Int64(v)
            }
            FieldType::Bytes32 => FieldValue::Bytes32(B256::from(w)),
            FieldType::Bool => {
                if w[..31].iter().any(|b| *b != 0) || w[31] > 1 {
                    return Err(DecodeError::OutOfRange { index, want: "bool" });
                }
                FieldValue::Bool(w[31] == 1)
            }
            FieldType::Str => {
                let offset = word_to_usize(&w, data.len())?;
                if offset + WORD > data.len() {
                    return Err(DecodeError::BadOffset { offset, len: data.len() });
                }
                let len = word_to_usize(&word(data, offset)?, data.len())?;
                let start = offset + WORD;
                let end = start
                    .checked_add(len)
                    .ok_or(DecodeError::BadOffset { offset, len: data.len() })?;
                if end > data.len() {
                    return Err(DecodeError::Truncated { need: end, have: data.len() });
                }
                let s = std::str::from_utf8(&data[start..end])
                    .map_err(|_| DecodeError::BadUtf8 { index })?;
                FieldValue::Str(s.to_string())
            }
        };
        values.push(value);
    }

    Ok(values)
}


#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    #[test]
    fn decodes_static_tuple() {
        let values = vec![
            FieldValue::Uint256(U256::from(901u64)),
            FieldValue::Address(address!("000000000000000000000000000000000000dEaD")),
            FieldValue::Uint64(7),
            FieldValue::Int64(-350),
            FieldValue::Bool(true),
        ];
        let schema = [
            FieldType::Uint256,
            FieldType::Address,
            FieldType::Uint64,
            FieldType::Int64,
            FieldType::Bool,
        ];
        let data = encode::payload(&values);
        let decoded = decode_payload(&schema, &data).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn decodes_dynamic_string() {
        let values = vec![
            FieldValue::Uint256(U256::from(1u64)),
            FieldValue::Str("a2f-9913-bc01".to_string()),
            FieldValue::Address(Address::ZERO),
        ];
        let schema = [FieldType::Uint256, FieldType::Str, FieldType::Address];
        let decoded = decode_payload(&schema, &encode::payload(&values)).unwrap();
        let fields = Fields(&decoded);
        assert_eq!(fields.str(1).unwrap(), "a2f-9913-bc01");
    }

    #[test]
    fn truncated_payload_is_an_error() {
        let values = vec![FieldValue::Uint256(U256::from(1u64))];
        let mut data = encode::payload(&values);
        data.truncate(data.len() - 1);
        let err = decode_payload(&[FieldType::Uint256], &data).unwrap_err();
        assert!(matches!(err, DecodeError::Truncated { .. }));
    }

    #[test]
    fn schema_wider_than_payload_is_an_error() {
        let values = vec![FieldValue::Uint256(U256::from(1u64))];
        let data = encode::payload(&values);
        let err = decode_payload(&[FieldType::Uint256, FieldType::Uint256], &data).unwrap_err();
        assert!(matches!(err, DecodeError::Truncated { .. }));
    }

    #[test]
    fn uint64_overflow_is_an_error() {
        let values = vec![FieldValue::Uint256(U256::from(u128::MAX))];
        let data = encode::payload(&values);
        let err = decode_payload(&[FieldType::Uint64], &data).unwrap_err();
        assert_eq!(err, DecodeError::OutOfRange { index: 0, want: "uint64" });
    }

    #[test]
    fn negative_int64_round_trips() {
        let values = vec![FieldValue::Int64(i64::MIN)];
        let data = encode::payload(&values);
        let decoded = decode_payload(&[FieldType::Int64], &data).unwrap();
        assert_eq!(Fields(&decoded).i64(0).unwrap(), i64::MIN);
    }

    #[test]
    fn typed_accessor_rejects_mismatch() {
        let decoded = vec![FieldValue::Bool(true)];
        let err = Fields(&decoded).u256(0).unwrap_err();
        assert_eq!(
            err,
            DecodeError::TypeMismatch { index: 0, want: "uint256", got: "bool" }
        );
    }
}
