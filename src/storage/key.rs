// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Versioned key and value encoding for RocksDB storage.
//!
//! Key format: `[escaped user key][0x00 0x00][MAX - hybrid_time : u64 BE]`
//!
//! User key bytes are escaped (`0x00` becomes `0x00 0x01`) and terminated by
//! `0x00 0x00`, so encoded keys sort in user-key byte order. The hybrid time
//! is inverted so that newer versions sort first within the same user key.
//!
//! Value format: `[tag][bytes]` where the tag distinguishes values from
//! tombstones, so empty values remain representable.

use crate::time::HybridTime;

use super::{Key, StorageError, Value};

const ESCAPE: u8 = 0x00;
const ESCAPED_ZERO: u8 = 0x01;
const TERMINATOR: [u8; 2] = [0x00, 0x00];
const HYBRID_TIME_LEN: usize = 8;

const VALUE_TAG: u8 = b'v';
const TOMBSTONE_TAG: u8 = b'd';

/// Encodes the user-key prefix shared by every version of `key`.
pub fn encode_key_prefix(key: &Key) -> Vec<u8> {
    let key_bytes = key.as_bytes();
    let mut encoded = Vec::with_capacity(key_bytes.len() + TERMINATOR.len() + HYBRID_TIME_LEN);
    for &byte in key_bytes {
        encoded.push(byte);
        if byte == ESCAPE {
            encoded.push(ESCAPED_ZERO);
        }
    }
    encoded.extend_from_slice(&TERMINATOR);
    encoded
}

/// Encodes a user key at a hybrid time.
#[inline]
pub fn encode_versioned_key(key: &Key, ht: HybridTime) -> Vec<u8> {
    let mut encoded = encode_key_prefix(key);
    encoded.extend_from_slice(&(u64::MAX - ht.to_u64()).to_be_bytes());
    encoded
}

/// Decodes an encoded key back into user key and hybrid time.
pub fn decode_versioned_key(encoded: &[u8]) -> Result<(Key, HybridTime), StorageError> {
    let mut key = Vec::with_capacity(encoded.len().saturating_sub(TERMINATOR.len() + HYBRID_TIME_LEN));
    let mut pos = 0;

    loop {
        let Some(&byte) = encoded.get(pos) else {
            return Err(StorageError::InvalidKeyEncoding(
                "missing key terminator".to_string(),
            ));
        };
        if byte != ESCAPE {
            key.push(byte);
            pos += 1;
            continue;
        }
        match encoded.get(pos + 1) {
            Some(&ESCAPED_ZERO) => {
                key.push(ESCAPE);
                pos += 2;
            }
            Some(&0x00) => {
                pos += 2;
                break;
            }
            Some(other) => {
                return Err(StorageError::InvalidKeyEncoding(format!(
                    "invalid escape byte {other:#04x} at offset {}",
                    pos + 1
                )))
            }
            None => {
                return Err(StorageError::InvalidKeyEncoding(
                    "truncated escape sequence".to_string(),
                ))
            }
        }
    }

    let suffix = &encoded[pos..];
    let inverted: [u8; HYBRID_TIME_LEN] = suffix.try_into().map_err(|_| {
        StorageError::InvalidKeyEncoding(format!(
            "expected {HYBRID_TIME_LEN} hybrid time bytes, got {}",
            suffix.len()
        ))
    })?;
    let ht = HybridTime::from_u64(u64::MAX - u64::from_be_bytes(inverted));

    Ok((Key::new(key), ht))
}

/// Encodes a value or tombstone.
pub fn encode_value(value: Option<&Value>) -> Vec<u8> {
    match value {
        Some(value) => {
            let mut encoded = Vec::with_capacity(1 + value.len());
            encoded.push(VALUE_TAG);
            encoded.extend_from_slice(value.as_bytes());
            encoded
        }
        None => vec![TOMBSTONE_TAG],
    }
}

/// Decodes the output of [`encode_value`].
pub fn decode_value(encoded: &[u8]) -> Result<Option<Value>, StorageError> {
    match encoded.split_first() {
        Some((&VALUE_TAG, rest)) => Ok(Some(Value::from(rest))),
        Some((&TOMBSTONE_TAG, [])) => Ok(None),
        Some((tag, _)) => Err(StorageError::Corruption(format!(
            "unknown value tag {tag:#04x}"
        ))),
        None => Err(StorageError::Corruption("empty stored value".to_string())),
    }
}
