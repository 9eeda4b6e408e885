// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! On-disk record format.
//!
//! Records are stored back to back after the header area:
//!
//! ```text
//! ┌─────────────────┬──────────────────────┬─────────────────┐
//! │  Length (4B)    │   Payload (variable) │   CRC32 (4B)    │
//! │  little-endian  │   raw bytes          │   little-endian │
//! └─────────────────┴──────────────────────┴─────────────────┘
//! ```

use std::io::{Read, Seek, SeekFrom};

use snafu::{ResultExt, ensure};

use crate::{
    Result,
    crc::{calculate_record_crc, verify_record_crc},
    error::{CorruptedSnafu, IoSnafu, RecordTooLargeSnafu},
};

/// Size of the length prefix in bytes.
pub(crate) const RECORD_LENGTH_SIZE: usize = 4;

/// Size of the trailing CRC32 in bytes.
pub(crate) const RECORD_CRC_SIZE: usize = 4;

/// Total on-disk size of a record with the given payload length.
#[inline]
pub(crate) const fn record_disk_size(payload_len: usize) -> u64 {
    (RECORD_LENGTH_SIZE + payload_len + RECORD_CRC_SIZE) as u64
}

/// Encodes `data` into a single contiguous buffer ready for one write.
pub(crate) fn encode_record(data: &[u8]) -> Result<Vec<u8>> {
    let Ok(length) = u32::try_from(data.len()) else {
        return RecordTooLargeSnafu { len: data.len() }.fail();
    };

    let mut buf = Vec::with_capacity(RECORD_LENGTH_SIZE + data.len() + RECORD_CRC_SIZE);
    buf.extend_from_slice(&length.to_le_bytes());
    buf.extend_from_slice(data);
    buf.extend_from_slice(&calculate_record_crc(length, data).to_le_bytes());
    Ok(buf)
}

/// Reads the length prefix of the record at `offset`.
pub(crate) fn read_length<R: Read + Seek>(reader: &mut R, offset: u64) -> Result<u32> {
    reader.seek(SeekFrom::Start(offset)).context(IoSnafu)?;
    let mut length_buf = [0u8; RECORD_LENGTH_SIZE];
    reader.read_exact(&mut length_buf).context(IoSnafu)?;
    Ok(u32::from_le_bytes(length_buf))
}

/// Reads and CRC-checks the record at `offset` into `payload`.
///
/// Returns the offset of the next record.
pub(crate) fn read_record<R: Read + Seek>(
    reader: &mut R,
    offset: u64,
    limit: u64,
    payload: &mut Vec<u8>,
) -> Result<u64> {
    let length = read_length(reader, offset)?;
    let next = offset + record_disk_size(length as usize);
    ensure!(
        next <= limit,
        CorruptedSnafu {
            offset,
            reason: format!("record of {length} bytes runs past offset {limit}"),
        }
    );

    payload.resize(length as usize, 0);
    reader.read_exact(payload).context(IoSnafu)?;

    let mut crc_buf = [0u8; RECORD_CRC_SIZE];
    reader.read_exact(&mut crc_buf).context(IoSnafu)?;
    ensure!(
        verify_record_crc(length, payload, u32::from_le_bytes(crc_buf)),
        CorruptedSnafu {
            offset,
            reason: "record CRC mismatch",
        }
    );

    Ok(next)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::QueueError;

    #[test]
    fn test_record_disk_size() {
        assert_eq!(record_disk_size(0), 8);
        assert_eq!(record_disk_size(10), 18);
        assert_eq!(record_disk_size(1432), 1440);
    }

    #[test]
    fn test_read_encoded_record() {
        let mut bytes = encode_record(b"first").unwrap();
        bytes.extend(encode_record(b"second").unwrap());
        let limit = bytes.len() as u64;
        let mut cursor = Cursor::new(bytes);

        let mut payload = Vec::new();
        let next = read_record(&mut cursor, 0, limit, &mut payload).unwrap();
        assert_eq!(payload, b"first");
        assert_eq!(next, record_disk_size(5));

        let end = read_record(&mut cursor, next, limit, &mut payload).unwrap();
        assert_eq!(payload, b"second");
        assert_eq!(end, limit);
    }

    #[test]
    fn test_flipped_payload_byte_is_corruption() {
        let mut bytes = encode_record(b"payload").unwrap();
        bytes[RECORD_LENGTH_SIZE + 2] ^= 0xff;
        let limit = bytes.len() as u64;

        let err = read_record(&mut Cursor::new(bytes), 0, limit, &mut Vec::new()).unwrap_err();
        assert!(matches!(err, QueueError::Corrupted { offset: 0, .. }));
    }

    #[test]
    fn test_record_past_limit_is_corruption() {
        let bytes = encode_record(b"payload").unwrap();
        let limit = bytes.len() as u64 - 1;

        let err = read_record(&mut Cursor::new(bytes), 0, limit, &mut Vec::new()).unwrap_err();
        assert!(matches!(err, QueueError::Corrupted { .. }));
    }
}
