//! Canonical CBOR decoder.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::error::{CodecError, CodecResult};
use crate::value::{cmp_canonical_keys, Value};

/// Decode a single value from CBOR bytes.
///
/// # Errors
///
/// Returns an error if the bytes are not canonical CBOR, contain
/// constructs the value model cannot hold, or carry trailing data.
pub fn from_cbor(bytes: &[u8]) -> CodecResult<Value> {
    let mut decoder = CanonicalDecoder::new(bytes);
    let value = decoder.decode()?;
    if !decoder.is_empty() {
        return Err(CodecError::TrailingBytes {
            remaining: decoder.remaining().len(),
        });
    }
    Ok(value)
}

/// A canonical CBOR decoder.
///
/// Rejects non-shortest heads, unsorted or non-text object keys,
/// indefinite lengths, tags and non-double floats.
pub struct CanonicalDecoder<'a> {
    data: &'a [u8],
    pos: usize,
}

/// Maximum element count for arrays and objects read from untrusted input.
const MAX_CONTAINER_ELEMENTS: u64 = 16 * 1024 * 1024;

/// Maximum byte/text string length read from untrusted input.
const MAX_BYTES_LENGTH: u64 = 256 * 1024 * 1024;

impl<'a> CanonicalDecoder<'a> {
    /// Create a new decoder for the given bytes.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Decode the next value.
    pub fn decode(&mut self) -> CodecResult<Value> {
        let initial_byte = self.read_byte()?;
        let major_type = initial_byte >> 5;
        let additional_info = initial_byte & 0x1f;

        match major_type {
            0 => {
                let n = self.decode_head(additional_info)?;
                i64::try_from(n)
                    .map(Value::Integer)
                    .map_err(|_| CodecError::IntegerOverflow)
            }
            1 => {
                let n = self.decode_head(additional_info)?;
                let n = i64::try_from(n).map_err(|_| CodecError::IntegerOverflow)?;
                Ok(Value::Integer(-1 - n))
            }
            2 => {
                let len = self.decode_length(additional_info, MAX_BYTES_LENGTH)?;
                Ok(Value::Bytes(self.read_bytes(len)?.to_vec()))
            }
            3 => {
                let len = self.decode_length(additional_info, MAX_BYTES_LENGTH)?;
                self.read_text(len).map(|s| Value::Text(s.to_string()))
            }
            4 => self.decode_array(additional_info),
            5 => self.decode_object(additional_info),
            6 => Err(CodecError::unsupported_type("tagged item")),
            7 => self.decode_simple(additional_info),
            _ => Err(CodecError::invalid_structure("invalid major type")),
        }
    }

    /// Check if all bytes have been consumed.
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Get remaining bytes.
    pub fn remaining(&self) -> &[u8] {
        &self.data[self.pos..]
    }

    #[inline]
    fn read_byte(&mut self) -> CodecResult<u8> {
        let byte = *self.data.get(self.pos).ok_or(CodecError::UnexpectedEof)?;
        self.pos += 1;
        Ok(byte)
    }

    #[inline]
    fn read_bytes(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        let end = self.pos.checked_add(len).ok_or(CodecError::UnexpectedEof)?;
        let bytes = self
            .data
            .get(self.pos..end)
            .ok_or(CodecError::UnexpectedEof)?;
        self.pos = end;
        Ok(bytes)
    }

    fn read_array<const N: usize>(&mut self) -> CodecResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    fn read_text(&mut self, len: usize) -> CodecResult<&'a str> {
        let bytes = self.read_bytes(len)?;
        std::str::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)
    }

    fn decode_head(&mut self, additional_info: u8) -> CodecResult<u64> {
        let (value, fits_smaller) = match additional_info {
            0..=23 => return Ok(u64::from(additional_info)),
            24 => {
                let v = u64::from(self.read_byte()?);
                (v, v < 24)
            }
            25 => {
                let v = u64::from(u16::from_be_bytes(self.read_array()?));
                (v, u8::try_from(v).is_ok())
            }
            26 => {
                let v = u64::from(u32::from_be_bytes(self.read_array()?));
                (v, u16::try_from(v).is_ok())
            }
            27 => {
                let v = u64::from_be_bytes(self.read_array()?);
                (v, u32::try_from(v).is_ok())
            }
            31 => return Err(CodecError::IndefiniteLengthForbidden),
            _ => return Err(CodecError::invalid_structure("reserved additional info")),
        };
        if fits_smaller {
            return Err(CodecError::invalid_structure(
                "non-canonical: value could be encoded in fewer bytes",
            ));
        }
        Ok(value)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn decode_length(&mut self, additional_info: u8, max_allowed: u64) -> CodecResult<usize> {
        let claimed = self.decode_head(additional_info)?;
        if claimed > max_allowed {
            return Err(CodecError::SizeLimitExceeded {
                claimed,
                max_allowed,
            });
        }
        Ok(claimed as usize)
    }

    fn decode_array(&mut self, additional_info: u8) -> CodecResult<Value> {
        let len = self.decode_length(additional_info, MAX_CONTAINER_ELEMENTS)?;
        // cap preallocation by what the input could possibly hold
        let mut items = Vec::with_capacity(len.min(self.remaining().len()));
        for _ in 0..len {
            items.push(self.decode()?);
        }
        Ok(Value::Array(items))
    }

    fn decode_object(&mut self, additional_info: u8) -> CodecResult<Value> {
        let len = self.decode_length(additional_info, MAX_CONTAINER_ELEMENTS)?;
        let mut map = BTreeMap::new();
        let mut prev_key: Option<&'a str> = None;

        for _ in 0..len {
            let head = self.read_byte()?;
            if head >> 5 != 3 {
                return Err(CodecError::invalid_structure("object key must be text"));
            }
            let key_len = self.decode_length(head & 0x1f, MAX_BYTES_LENGTH)?;
            let key = self.read_text(key_len)?;

            if let Some(prev) = prev_key {
                if cmp_canonical_keys(prev, key) != Ordering::Less {
                    return Err(CodecError::invalid_structure(
                        "non-canonical: object keys not in sorted order",
                    ));
                }
            }
            prev_key = Some(key);

            let value = self.decode()?;
            map.insert(key.to_string(), value);
        }

        Ok(Value::Object(map))
    }

    fn decode_simple(&mut self, additional_info: u8) -> CodecResult<Value> {
        match additional_info {
            20 => Ok(Value::Bool(false)),
            21 => Ok(Value::Bool(true)),
            22 => Ok(Value::Null),
            23 => Err(CodecError::unsupported_type("undefined")),
            25 | 26 => Err(CodecError::FloatWidth),
            27 => {
                let f = f64::from_bits(u64::from_be_bytes(self.read_array()?));
                if !f.is_finite() {
                    return Err(CodecError::non_finite(f));
                }
                Ok(Value::Float(f))
            }
            31 => Err(CodecError::invalid_structure("break without indefinite")),
            other => Err(CodecError::unsupported_type(format!("simple value {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::to_canonical_cbor;

    #[test]
    fn decode_scalars() {
        assert_eq!(from_cbor(&[0xf6]).unwrap(), Value::Null);
        assert_eq!(from_cbor(&[0xf5]).unwrap(), Value::Bool(true));
        assert_eq!(from_cbor(&[0x17]).unwrap(), Value::Integer(23));
        assert_eq!(from_cbor(&[0x19, 0x01, 0x00]).unwrap(), Value::Integer(256));
        assert_eq!(from_cbor(&[0x38, 99]).unwrap(), Value::Integer(-100));
        assert_eq!(
            from_cbor(&[0x43, 1, 2, 3]).unwrap(),
            Value::Bytes(vec![1, 2, 3])
        );
        assert_eq!(
            from_cbor(&[0x65, b'h', b'e', b'l', b'l', b'o']).unwrap(),
            Value::Text("hello".to_string())
        );
    }

    #[test]
    fn decode_double() {
        let mut bytes = vec![0xfb];
        bytes.extend_from_slice(&2.25f64.to_bits().to_be_bytes());
        assert_eq!(from_cbor(&bytes).unwrap(), Value::Float(2.25));
    }

    #[test]
    fn reject_narrow_floats_and_nan() {
        assert_eq!(from_cbor(&[0xf9, 0x00, 0x00]), Err(CodecError::FloatWidth));
        assert_eq!(
            from_cbor(&[0xfa, 0x00, 0x00, 0x00, 0x00]),
            Err(CodecError::FloatWidth)
        );
        let mut nan = vec![0xfb];
        nan.extend_from_slice(&f64::NAN.to_bits().to_be_bytes());
        assert!(matches!(
            from_cbor(&nan),
            Err(CodecError::NonFiniteFloat { .. })
        ));
    }

    #[test]
    fn decode_object() {
        assert_eq!(from_cbor(&[0xa0]).unwrap(), Value::empty_object());
        assert_eq!(
            from_cbor(&[0xa1, 0x61, b'a', 0x01]).unwrap(),
            Value::object([("a", Value::Integer(1))])
        );
    }

    #[test]
    fn reject_unsorted_and_non_text_keys() {
        assert!(matches!(
            from_cbor(&[0xa2, 0x61, b'b', 0x01, 0x61, b'a', 0x02]),
            Err(CodecError::InvalidStructure { .. })
        ));
        // duplicate key
        assert!(matches!(
            from_cbor(&[0xa2, 0x61, b'a', 0x01, 0x61, b'a', 0x02]),
            Err(CodecError::InvalidStructure { .. })
        ));
        // integer key
        assert!(matches!(
            from_cbor(&[0xa1, 0x01, 0x01]),
            Err(CodecError::InvalidStructure { .. })
        ));
    }

    #[test]
    fn reject_indefinite_length() {
        assert_eq!(
            from_cbor(&[0x5f, 0x41, b'a', 0xff]),
            Err(CodecError::IndefiniteLengthForbidden)
        );
        assert_eq!(
            from_cbor(&[0x9f, 0x01, 0xff]),
            Err(CodecError::IndefiniteLengthForbidden)
        );
        assert_eq!(
            from_cbor(&[0xbf, 0x61, b'a', 0x01, 0xff]),
            Err(CodecError::IndefiniteLengthForbidden)
        );
    }

    #[test]
    fn reject_non_shortest_encoding() {
        assert!(matches!(
            from_cbor(&[0x18, 23]),
            Err(CodecError::InvalidStructure { .. })
        ));
        assert!(matches!(
            from_cbor(&[0x19, 0x00, 0xff]),
            Err(CodecError::InvalidStructure { .. })
        ));
    }

    #[test]
    fn reject_out_of_range_integers() {
        // u64::MAX as unsigned
        let mut bytes = vec![0x1b];
        bytes.extend_from_slice(&u64::MAX.to_be_bytes());
        assert_eq!(from_cbor(&bytes), Err(CodecError::IntegerOverflow));
    }

    #[test]
    fn reject_tags_and_trailing_bytes() {
        assert!(matches!(
            from_cbor(&[0xc1, 0x01]),
            Err(CodecError::UnsupportedType { .. })
        ));
        assert_eq!(
            from_cbor(&[0x01, 0x02]),
            Err(CodecError::TrailingBytes { remaining: 1 })
        );
    }

    #[test]
    fn size_limit_is_enforced() {
        let mut bytes = vec![0x5b];
        bytes.extend_from_slice(&u64::from(u32::MAX).wrapping_add(1).to_be_bytes());
        assert!(matches!(
            from_cbor(&bytes),
            Err(CodecError::SizeLimitExceeded { .. })
        ));
    }

    #[test]
    fn unexpected_eof() {
        assert_eq!(from_cbor(&[]), Err(CodecError::UnexpectedEof));
        assert_eq!(from_cbor(&[0x18]), Err(CodecError::UnexpectedEof));
        assert_eq!(from_cbor(&[0x62, b'a']), Err(CodecError::UnexpectedEof));
    }

    #[test]
    fn invalid_utf8_rejected() {
        assert_eq!(from_cbor(&[0x62, 0xff, 0xfe]), Err(CodecError::InvalidUtf8));
    }

    #[test]
    fn encoded_nested_document_decodes() {
        let doc = Value::object([
            ("title", Value::from("notes")),
            ("weight", Value::Float(-12.5)),
            (
                "tags",
                Value::Array(vec![Value::from("a"), Value::Integer(-7), Value::Null]),
            ),
            ("meta", Value::object([("ok", Value::Bool(true))])),
        ]);
        let bytes = to_canonical_cbor(&doc).unwrap();
        assert_eq!(from_cbor(&bytes).unwrap(), doc);
    }
}
