//! MsgPack codec using `rmp-serde`.
//!
//! Telemetry records are encoded with `to_vec_named`, so structs travel as
//! maps keyed by field name. Ground tools decode fields by name and keep
//! working when fields are added.
//!
//! # Example
//!
//! ```
//! use radiolink::codec::MsgPackCodec;
//! use radiolink::status::StatusSnapshot;
//!
//! let snap = StatusSnapshot::default();
//! let encoded = MsgPackCodec::encode(&snap).unwrap();
//! let decoded: StatusSnapshot = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, snap);
//! ```

use crate::error::Result;

/// MessagePack codec for telemetry records.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes, structs as maps.
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes cannot be deserialized to type T.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
