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

//! CRC32 checksums for records and header slots.
//!
//! Uses CRC-32 (IEEE polynomial) via crc32fast. The record CRC covers both
//! the length prefix and payload so a torn length field is detected as well
//! as a torn payload.

use crc32fast::Hasher;

/// Calculates the CRC32 of a record.
#[inline]
pub(crate) fn calculate_record_crc(length: u32, data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(&length.to_le_bytes());
    hasher.update(data);
    hasher.finalize()
}

/// Verifies a record's stored CRC32.
#[inline]
pub(crate) fn verify_record_crc(length: u32, data: &[u8], expected: u32) -> bool {
    calculate_record_crc(length, data) == expected
}

/// CRC32 over an encoded header slot body.
#[inline]
pub(crate) fn calculate_header_crc(body: &[u8]) -> u32 { crc32fast::hash(body) }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calculate_record_crc() {
        let data = br#"{"event":"Application Opened"}"#;
        let length = data.len() as u32;
        let crc = calculate_record_crc(length, data);

        assert_eq!(crc, calculate_record_crc(length, data));
        assert_ne!(crc, calculate_record_crc(length + 1, data));
    }

    #[test]
    fn test_verify_record_crc() {
        let data = br#"{"event":"Order Completed"}"#;
        let length = data.len() as u32;
        let crc = calculate_record_crc(length, data);

        assert!(verify_record_crc(length, data, crc));
        assert!(!verify_record_crc(length, data, crc ^ 1));
        assert!(!verify_record_crc(length - 1, data, crc));
        assert!(!verify_record_crc(length, b"{}", crc));
    }

    #[test]
    fn test_header_crc_detects_single_bit_flip() {
        let mut body = [7u8; 32];
        let crc = calculate_header_crc(&body);
        body[3] ^= 0x10;
        assert_ne!(crc, calculate_header_crc(&body));
    }
}
