//! Key and record encoding
//!
//! Keys are 8-byte big-endian `u64` IDs, so the byte order of a bucket equals
//! numeric ID order and cursors walk records oldest-first. Record values are
//! JSON; unknown fields are ignored and missing `#[serde(default)]` fields are
//! filled in, which keeps older and newer records readable.

use crate::store::error::StoreError;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Width of an encoded key in bytes
pub const KEY_SIZE: usize = 8;

/// Encode an ID as a fixed-width, order-preserving key
pub fn encode_key(id: u64) -> [u8; KEY_SIZE] {
    id.to_be_bytes()
}

/// Decode a key produced by [`encode_key`]
pub fn decode_key(key: &[u8]) -> Result<u64, StoreError> {
    let bytes: [u8; KEY_SIZE] = key
        .try_into()
        .map_err(|_| StoreError::Corruption(format!("key has {} bytes, expected 8", key.len())))?;
    Ok(u64::from_be_bytes(bytes))
}

/// Serialize a record to its stored representation
pub fn encode_record<T: Serialize>(record: &T) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec(record).map_err(|e| StoreError::Corruption(format!("encode record: {}", e)))
}

/// Deserialize a stored record.
///
/// `None` input (absent key) yields `Ok(None)`; a payload that fails to parse
/// is reported as corruption.
pub fn decode_record<T: DeserializeOwned>(data: Option<&[u8]>) -> Result<Option<T>, StoreError> {
    match data {
        None => Ok(None),
        Some(bytes) => serde_json::from_slice(bytes)
            .map(Some)
            .map_err(|e| StoreError::Corruption(format!("decode record: {}", e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Rec {
        id: u64,
        #[serde(default)]
        note: String,
    }

    #[test]
    fn test_key_order_matches_numeric_order() {
        let ids = [0u64, 1, 255, 256, 65_536, u64::MAX];
        for pair in ids.windows(2) {
            assert!(encode_key(pair[0]) < encode_key(pair[1]));
        }
        assert_eq!(decode_key(&encode_key(256)).unwrap(), 256);
    }

    #[test]
    fn test_decode_key_wrong_width() {
        assert!(decode_key(&[1, 2, 3]).unwrap_err().is_corruption());
    }

    #[test]
    fn test_missing_is_not_an_error() {
        let rec: Option<Rec> = decode_record(None).unwrap();
        assert!(rec.is_none());
    }

    #[test]
    fn test_corrupt_payload_is_error() {
        let res: Result<Option<Rec>, _> = decode_record(Some(b"{not json"));
        assert!(res.unwrap_err().is_corruption());
    }

    #[test]
    fn test_forward_compatible_fields() {
        let rec: Rec = decode_record(Some(br#"{"id":3,"extra":true}"#))
            .unwrap()
            .unwrap();
        assert_eq!(rec, Rec { id: 3, note: String::new() });
    }
}
