//! # docsync Codec
//!
//! Document values and their canonical CBOR encoding.
//!
//! [`Value`] is the JSON data model (plus byte strings for wire payloads).
//! Canonical encoding guarantees that equal values produce identical bytes,
//! which is what revision digests and model fingerprints hash.
//!
//! ## Canonical CBOR Rules
//!
//! - Object keys are text, sorted length-first then bytewise
//! - Integers use shortest encoding
//! - Floats are finite 64-bit doubles; NaN and infinities are rejected
//! - No indefinite-length items, no tags
//!
//! ## Usage
//!
//! ```
//! use docsync_codec::{from_cbor, to_canonical_cbor, Value};
//!
//! let value = Value::object([("text", Value::from("hello")), ("i32", Value::Integer(42))]);
//! let bytes = to_canonical_cbor(&value).unwrap();
//! assert_eq!(from_cbor(&bytes).unwrap(), value);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decoder;
mod encoder;
mod error;
mod json;
mod value;

pub use decoder::{from_cbor, CanonicalDecoder};
pub use encoder::{to_canonical_cbor, CanonicalEncoder};
pub use error::{CodecError, CodecResult};
pub use json::{from_json, parse_json, to_json};
pub use value::{cmp_canonical_keys, Value};

/// Trait for types that can be encoded to canonical CBOR.
pub trait Encode {
    /// Encode this value to canonical CBOR bytes.
    fn encode(&self) -> CodecResult<Vec<u8>>;
}

/// Trait for types that can be decoded from CBOR.
pub trait Decode: Sized {
    /// Decode this value from CBOR bytes.
    fn decode(bytes: &[u8]) -> CodecResult<Self>;
}

impl Encode for Value {
    fn encode(&self) -> CodecResult<Vec<u8>> {
        to_canonical_cbor(self)
    }
}

impl Decode for Value {
    fn decode(bytes: &[u8]) -> CodecResult<Self> {
        from_cbor(bytes)
    }
}
