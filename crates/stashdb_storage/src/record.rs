//! Log record types and framing.
//!
//! Every committed change is appended to the database log as one frame:
//!
//! ```text
//! ┌────────────┬────────────┬──────────────────────┐
//! │ len (u32)  │ crc32 (u32)│ CBOR payload (len B) │
//! └────────────┴────────────┴──────────────────────┘
//! ```
//!
//! Both integers are little-endian. The checksum covers the payload only.

use crate::error::{StorageError, StorageResult};
use crate::schema::StoreSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Size of the frame header in bytes.
pub const FRAME_HEADER_SIZE: usize = 8;

/// A single logical change recorded in the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogRecord {
    /// The database moved to a new version.
    SetVersion {
        /// New version.
        version: u32,
    },
    /// An object store was created.
    CreateStore {
        /// Store name.
        name: String,
        /// Declared schema.
        schema: StoreSchema,
    },
    /// An object store was dropped with all its records.
    DeleteStore {
        /// Store name.
        name: String,
    },
    /// A record was inserted or replaced.
    Put {
        /// Store name.
        store: String,
        /// Record key.
        key: String,
        /// Stored document.
        value: Value,
    },
    /// A record was removed.
    Delete {
        /// Store name.
        store: String,
        /// Record key.
        key: String,
    },
    /// Every record of a store was removed.
    Clear {
        /// Store name.
        store: String,
    },
}

/// Encodes a batch of records into consecutive frames.
///
/// # Errors
///
/// Returns [`StorageError::Data`] if a value cannot be encoded.
pub fn encode_frames(records: &[LogRecord]) -> StorageResult<Vec<u8>> {
    let mut buf = Vec::new();
    for record in records {
        let mut payload = Vec::new();
        ciborium::ser::into_writer(record, &mut payload)
            .map_err(|e| StorageError::Data(format!("cannot encode log record: {e}")))?;

        let len = u32::try_from(payload.len())
            .map_err(|_| StorageError::Data("log record exceeds 4 GiB".into()))?;
        buf.extend_from_slice(&len.to_le_bytes());
        buf.extend_from_slice(&compute_crc32(&payload).to_le_bytes());
        buf.extend_from_slice(&payload);
    }
    Ok(buf)
}

/// Decodes every complete frame in `data`.
///
/// A trailing partial frame is the footprint of a torn append and is
/// dropped. A complete frame whose checksum does not match is corruption.
///
/// # Errors
///
/// Returns [`StorageError::Corrupted`] on checksum or payload errors.
pub fn decode_frames(data: &[u8]) -> StorageResult<Vec<LogRecord>> {
    let mut records = Vec::new();
    let mut cursor = 0usize;

    while cursor < data.len() {
        if data.len() - cursor < FRAME_HEADER_SIZE {
            tracing::warn!(offset = cursor, "dropping torn frame header at end of log");
            break;
        }
        let len = read_u32(&data[cursor..]) as usize;
        let crc = read_u32(&data[cursor + 4..]);
        let start = cursor + FRAME_HEADER_SIZE;
        let end = start.saturating_add(len);
        if end > data.len() {
            tracing::warn!(offset = cursor, len, "dropping torn frame at end of log");
            break;
        }

        let payload = &data[start..end];
        let actual = compute_crc32(payload);
        if actual != crc {
            return Err(StorageError::Corrupted(format!(
                "checksum mismatch at offset {cursor}: expected {crc:08x}, got {actual:08x}"
            )));
        }

        let record: LogRecord = ciborium::de::from_reader(payload).map_err(|e| {
            StorageError::Corrupted(format!("undecodable record at offset {cursor}: {e}"))
        })?;
        records.push(record);
        cursor = end;
    }

    Ok(records)
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Computes CRC32 (IEEE polynomial) of the given data.
#[must_use]
pub fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Vec<LogRecord> {
        vec![
            LogRecord::SetVersion { version: 2 },
            LogRecord::CreateStore {
                name: "todos".into(),
                schema: StoreSchema::default(),
            },
            LogRecord::Put {
                store: "todos".into(),
                key: "t1".into(),
                value: json!({"title": "write docs", "done": false, "tags": ["a", 1]}),
            },
            LogRecord::Delete {
                store: "todos".into(),
                key: "t0".into(),
            },
        ]
    }

    #[test]
    fn frames_decode_in_order() {
        let bytes = encode_frames(&sample()).unwrap();
        assert_eq!(decode_frames(&bytes).unwrap(), sample());
    }

    #[test]
    fn torn_tail_is_dropped() {
        let mut bytes = encode_frames(&sample()).unwrap();
        let full = bytes.len();
        bytes.extend_from_slice(&encode_frames(&[LogRecord::Clear { store: "todos".into() }]).unwrap());
        bytes.truncate(full + 5);

        assert_eq!(decode_frames(&bytes).unwrap(), sample());
    }

    #[test]
    fn flipped_bit_is_corruption() {
        let mut bytes = encode_frames(&sample()).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;

        let err = decode_frames(&bytes).unwrap_err();
        assert_eq!(err.name(), "CorruptedError");
    }

    #[test]
    fn crc32_known_value() {
        assert_eq!(compute_crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(compute_crc32(b""), 0);
    }
}
