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

//! Dual-slot queue header.
//!
//! Two fixed-size slots sit at the start of the file and commits alternate
//! between them, so at any crash point at least one slot still describes a
//! fully written set of records. The slot with the highest generation wins.

use std::io::{Read, Seek, SeekFrom, Write};

use snafu::ResultExt;

use crate::{Result, crc::calculate_header_crc, error::IoSnafu};

const MAGIC: u32 = 0x4245_4351;

/// Bytes reserved for each header slot.
pub(crate) const SLOT_SIZE: u64 = 64;

/// Offset of the first record.
pub(crate) const HEADER_SIZE: u64 = SLOT_SIZE * 2;

/// Bytes of the slot covered by the CRC.
const BODY_SIZE: usize = 32;

/// Committed queue state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Header {
    pub generation: u64,
    /// Offset of the oldest record.
    pub head:       u64,
    /// Offset one past the newest committed record.
    pub tail:       u64,
    pub count:      u32,
}

impl Header {
    pub const fn empty(generation: u64) -> Self {
        Self {
            generation,
            head: HEADER_SIZE,
            tail: HEADER_SIZE,
            count: 0,
        }
    }

    pub const fn is_empty(&self) -> bool { self.count == 0 }

    /// Next header with the same state and a bumped generation.
    pub const fn next(&self) -> Self {
        Self {
            generation: self.generation + 1,
            ..*self
        }
    }

    pub fn encode(&self) -> [u8; SLOT_SIZE as usize] {
        let mut buf = [0u8; SLOT_SIZE as usize];
        buf[0..4].copy_from_slice(&MAGIC.to_le_bytes());
        buf[4..12].copy_from_slice(&self.generation.to_le_bytes());
        buf[12..20].copy_from_slice(&self.head.to_le_bytes());
        buf[20..28].copy_from_slice(&self.tail.to_le_bytes());
        buf[28..32].copy_from_slice(&self.count.to_le_bytes());
        let crc = calculate_header_crc(&buf[..BODY_SIZE]);
        buf[32..36].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Decodes a slot, returning `None` for a torn, blank or inconsistent
    /// slot.
    pub fn decode(buf: &[u8; SLOT_SIZE as usize], file_len: u64) -> Option<Self> {
        let u32_at = |at: usize| u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);
        let u64_at = |at: usize| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&buf[at..at + 8]);
            u64::from_le_bytes(bytes)
        };

        if u32_at(0) != MAGIC || u32_at(32) != calculate_header_crc(&buf[..BODY_SIZE]) {
            return None;
        }

        let header = Self {
            generation: u64_at(4),
            head:       u64_at(12),
            tail:       u64_at(20),
            count:      u32_at(28),
        };

        let offsets_valid =
            HEADER_SIZE <= header.head && header.head <= header.tail && header.tail <= file_len;
        let count_valid = (header.count == 0) == (header.head == header.tail);
        (offsets_valid && count_valid).then_some(header)
    }
}

/// One of the two header slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Slot {
    First,
    Second,
}

impl Slot {
    pub const fn offset(self) -> u64 {
        match self {
            Self::First => 0,
            Self::Second => SLOT_SIZE,
        }
    }

    pub const fn other(self) -> Self {
        match self {
            Self::First => Self::Second,
            Self::Second => Self::First,
        }
    }
}

/// Writes `header` into `slot` and optionally syncs it to disk.
pub(crate) fn write_slot<F: Write + Seek>(
    file: &mut F,
    slot: Slot,
    header: &Header,
    sync: impl FnOnce(&mut F) -> std::io::Result<()>,
) -> Result<()> {
    file.seek(SeekFrom::Start(slot.offset())).context(IoSnafu)?;
    file.write_all(&header.encode()).context(IoSnafu)?;
    sync(file).context(IoSnafu)
}

/// Reads both slots and returns the newest valid header with its slot.
pub(crate) fn read_latest<F: Read + Seek>(file: &mut F, file_len: u64) -> Result<Option<(Header, Slot)>> {
    let mut latest: Option<(Header, Slot)> = None;
    for slot in [Slot::First, Slot::Second] {
        let mut buf = [0u8; SLOT_SIZE as usize];
        file.seek(SeekFrom::Start(slot.offset())).context(IoSnafu)?;
        file.read_exact(&mut buf).context(IoSnafu)?;

        if let Some(header) = Header::decode(&buf, file_len) {
            let newer = latest.is_none_or(|(current, _)| header.generation > current.generation);
            if newer {
                latest = Some((header, slot));
            }
        }
    }
    Ok(latest)
}
