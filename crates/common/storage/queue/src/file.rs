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

//! Single-file durable queue.
//!
//! ## Layout
//!
//! ```text
//! ┌──────────────┬──────────────┬──────────┬──────────┬─────┐
//! │ header slot  │ header slot  │ record 0 │ record 1 │ ... │
//! │ (64B)        │ (64B)        │          │          │     │
//! └──────────────┴──────────────┴──────────┴──────────┴─────┘
//! ```
//!
//! A record becomes visible only when a header naming it has been synced.
//! Appends write the record past the committed tail first and then commit a
//! new header into the slot not holding the current one, so a crash at any
//! point leaves the previous header and every record it covers intact.

use std::{
    fs::{self, File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use snafu::{OptionExt, ResultExt, ensure};
use tracing::{debug, info, trace, warn};

use crate::{
    PayloadQueue, QueueConfig, QueueError, Result,
    error::{ClosedSnafu, CorruptedSnafu, IoSnafu, RemoveOutOfRangeSnafu},
    header::{HEADER_SIZE, Header, Slot, read_latest, write_slot},
    record::{encode_record, read_length, read_record, record_disk_size},
};

fn sync_if(file: &mut File, enabled: bool) -> io::Result<()> {
    if enabled { file.sync_data() } else { Ok(()) }
}

fn compact_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".compact");
    path.with_file_name(name)
}

/// Append-only queue of length-prefixed records backed by one file.
#[derive(Debug)]
pub struct QueueFile {
    path:   PathBuf,
    file:   Option<File>,
    header: Header,
    slot:   Slot,
    config: QueueConfig,
}

impl QueueFile {
    /// Opens the queue at `config.path`, creating it when absent.
    ///
    /// Uncommitted bytes past the last valid header's tail are truncated.
    /// Fails with [`QueueError::Corrupted`] when neither header slot is valid.
    pub fn open(config: QueueConfig) -> Result<Self> {
        let path = config.path.clone();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).context(IoSnafu)?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .context(IoSnafu)?;
        let file_len = file.metadata().context(IoSnafu)?.len();

        let (header, slot) = if file_len < HEADER_SIZE {
            // No record can exist before the header area has been written.
            if file_len > 0 {
                warn!(path = ?path, file_len, "Queue file shorter than its header, reinitialising");
            }
            file.set_len(0).context(IoSnafu)?;
            file.set_len(HEADER_SIZE).context(IoSnafu)?;
            let header = Header::empty(1);
            write_slot(&mut file, Slot::First, &header, |f| f.sync_all())?;
            (header, Slot::First)
        } else {
            read_latest(&mut file, file_len)?.context(CorruptedSnafu {
                offset: 0u64,
                reason: "no valid header slot",
            })?
        };

        let mut queue = Self {
            path,
            file: Some(file),
            header,
            slot,
            config,
        };

        if queue.config.verify_on_open {
            queue.verify()?;
        }
        queue.truncate_uncommitted()?;

        info!(
            path = ?queue.path,
            count = queue.header.count,
            head = queue.header.head,
            tail = queue.header.tail,
            "Queue file opened"
        );
        Ok(queue)
    }

    /// Like [`open`](Self::open), but deletes and recreates a corrupted file.
    pub fn open_or_recreate(config: QueueConfig) -> Result<Self> {
        match Self::open(config.clone()) {
            Err(QueueError::Corrupted { offset, reason }) => {
                warn!(path = ?config.path, offset, %reason, "Queue file corrupted, recreating");
                fs::remove_file(&config.path).context(IoSnafu)?;
                Self::open(config)
            }
            other => other,
        }
    }

    pub fn path(&self) -> &Path { &self.path }

    pub const fn size(&self) -> usize { self.header.count as usize }

    pub const fn is_empty(&self) -> bool { self.header.is_empty() }

    pub const fn is_closed(&self) -> bool { self.file.is_none() }

    /// Bytes of the file covered by the committed header.
    pub const fn file_len(&self) -> u64 { self.header.tail }

    /// Appends one record. Returns once the record and the header naming it
    /// are on disk.
    pub fn append(&mut self, data: &[u8]) -> Result<()> {
        let record = encode_record(data)?;
        let sync = self.config.sync;
        let current = self.header;

        let file = self.file_mut()?;
        file.seek(SeekFrom::Start(current.tail)).context(IoSnafu)?;
        file.write_all(&record).context(IoSnafu)?;
        sync_if(file, sync).context(IoSnafu)?;

        self.commit(Header {
            tail: current.tail + record.len() as u64,
            count: current.count + 1,
            ..current.next()
        })?;

        trace!(len = data.len(), count = self.header.count, "Record appended");
        Ok(())
    }

    /// Visits records oldest first. See [`PayloadQueue::for_each`].
    pub fn for_each(&mut self, visitor: &mut dyn FnMut(&[u8]) -> bool) -> Result<usize> {
        let Header {
            head, tail, count, ..
        } = self.header;
        let file = self.file_mut()?;

        let mut offset = head;
        let mut payload = Vec::new();
        let mut accepted = 0;
        for _ in 0..count {
            offset = read_record(file, offset, tail, &mut payload)?;
            if !visitor(&payload) {
                break;
            }
            accepted += 1;
        }
        Ok(accepted)
    }

    /// Discards the oldest `n` records.
    #[allow(clippy::cast_possible_truncation)]
    pub fn remove(&mut self, n: usize) -> Result<()> {
        let current = self.header;
        let available = self.size();
        self.file_mut()?;
        ensure!(
            n <= available,
            RemoveOutOfRangeSnafu {
                requested: n,
                available,
            }
        );

        if n == 0 {
            return Ok(());
        }
        if n == available {
            return self.clear();
        }

        let file = self.file_mut()?;
        let mut head = current.head;
        for _ in 0..n {
            let length = read_length(file, head)?;
            head += record_disk_size(length as usize);
        }
        ensure!(
            head <= current.tail,
            CorruptedSnafu {
                offset: head,
                reason: "record lengths run past the committed tail",
            }
        );

        self.commit(Header {
            head,
            count: current.count - n as u32,
            ..current.next()
        })?;
        debug!(removed = n, remaining = self.header.count, "Records removed");

        self.maybe_compact();
        Ok(())
    }

    /// Removes every record and shrinks the file back to its header.
    pub fn clear(&mut self) -> Result<()> {
        let removed = self.header.count;
        self.commit(Header::empty(self.header.generation + 1))?;

        let sync = self.config.sync;
        let file = self.file_mut()?;
        file.set_len(HEADER_SIZE).context(IoSnafu)?;
        sync_if(file, sync).context(IoSnafu)?;

        debug!(removed, "Queue cleared");
        Ok(())
    }

    /// Releases the file handle. Later calls are no-ops.
    pub fn close(&mut self) -> Result<()> {
        if let Some(file) = self.file.take() {
            file.sync_all().context(IoSnafu)?;
            debug!(path = ?self.path, "Queue file closed");
        }
        Ok(())
    }

    fn file_mut(&mut self) -> Result<&mut File> { self.file.as_mut().context(ClosedSnafu) }

    /// Writes `header` into the inactive slot and makes it current.
    fn commit(&mut self, header: Header) -> Result<()> {
        let sync = self.config.sync;
        let target = self.slot.other();
        let file = self.file_mut()?;
        write_slot(file, target, &header, |f| sync_if(f, sync))?;

        self.header = header;
        self.slot = target;
        Ok(())
    }

    /// CRC-checks every committed record, cutting the queue at the first bad
    /// one.
    fn verify(&mut self) -> Result<()> {
        let current = self.header;
        let file = self.file_mut()?;

        let mut offset = current.head;
        let mut valid = 0u32;
        let mut payload = Vec::new();
        while valid < current.count {
            match read_record(file, offset, current.tail, &mut payload) {
                Ok(next) => {
                    offset = next;
                    valid += 1;
                }
                Err(QueueError::Corrupted { offset, reason }) => {
                    warn!(offset, %reason, "Unreadable record found during verification");
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        if valid == current.count && offset == current.tail {
            return Ok(());
        }

        warn!(
            dropped = current.count - valid,
            committed_tail = current.tail,
            readable_tail = offset,
            "Cutting queue at first unreadable record"
        );
        if valid == 0 {
            self.commit(Header::empty(current.generation + 1))
        } else {
            self.commit(Header {
                tail: offset,
                count: valid,
                ..current.next()
            })
        }
    }

    fn truncate_uncommitted(&mut self) -> Result<()> {
        let tail = self.header.tail;
        let file = self.file_mut()?;
        let file_len = file.metadata().context(IoSnafu)?.len();
        if file_len > tail {
            debug!(file_len, tail, "Truncating uncommitted bytes");
            file.set_len(tail).context(IoSnafu)?;
            file.sync_all().context(IoSnafu)?;
        }
        Ok(())
    }

    /// Rewrites the file without its dead prefix once the prefix is both
    /// larger than the threshold and larger than the live region.
    ///
    /// Runs after a removal has been committed, so a failure only leaves the
    /// dead prefix in place until the next attempt.
    fn maybe_compact(&mut self) {
        let current = self.header;
        let dead = current.head - HEADER_SIZE;
        let live = current.tail - current.head;
        if dead < self.config.compaction_threshold || dead <= live {
            return;
        }

        if let Err(e) = self.compact(current) {
            let tmp_path = compact_path(&self.path);
            warn!(path = ?self.path, error = %e, "Queue compaction failed, keeping dead prefix");
            match fs::remove_file(&tmp_path) {
                Err(e) if e.kind() != io::ErrorKind::NotFound => {
                    warn!(path = ?tmp_path, error = %e, "Failed to remove compaction file");
                }
                _ => {}
            }
        }
    }

    fn compact(&mut self, current: Header) -> Result<()> {
        let dead = current.head - HEADER_SIZE;
        let live = current.tail - current.head;

        let compacted = Header {
            head: HEADER_SIZE,
            tail: HEADER_SIZE + live,
            ..current.next()
        };
        let tmp_path = compact_path(&self.path);

        let mut out = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)
            .context(IoSnafu)?;
        out.set_len(HEADER_SIZE).context(IoSnafu)?;
        write_slot(&mut out, Slot::First, &compacted, |_| Ok(()))?;
        out.seek(SeekFrom::Start(HEADER_SIZE)).context(IoSnafu)?;

        let file = self.file_mut()?;
        file.seek(SeekFrom::Start(current.head)).context(IoSnafu)?;
        let copied = io::copy(&mut Read::by_ref(file).take(live), &mut out).context(IoSnafu)?;
        ensure!(
            copied == live,
            CorruptedSnafu {
                offset: current.head + copied,
                reason: "queue file ended inside the live region",
            }
        );
        out.sync_all().context(IoSnafu)?;

        fs::rename(&tmp_path, &self.path).context(IoSnafu)?;
        self.file = Some(out);
        self.header = compacted;
        self.slot = Slot::First;

        info!(path = ?self.path, reclaimed = dead, live, "Queue file compacted");
        Ok(())
    }
}

impl PayloadQueue for QueueFile {
    fn size(&self) -> usize { Self::size(self) }

    fn append(&mut self, data: &[u8]) -> Result<()> { Self::append(self, data) }

    fn for_each(&mut self, visitor: &mut dyn FnMut(&[u8]) -> bool) -> Result<usize> {
        Self::for_each(self, visitor)
    }

    fn remove(&mut self, n: usize) -> Result<()> { Self::remove(self, n) }

    fn close(&mut self) -> Result<()> { Self::close(self) }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;
    use test_case::test_case;

    use super::*;

    fn open(dir: &TempDir) -> QueueFile {
        QueueFile::open(QueueConfig::new(dir.path().join("queue"))).unwrap()
    }

    fn contents(queue: &mut QueueFile) -> Vec<String> {
        let mut out = Vec::new();
        queue
            .for_each(&mut |record| {
                out.push(String::from_utf8(record.to_vec()).unwrap());
                true
            })
            .unwrap();
        out
    }

    #[test]
    fn test_fresh_queue_is_empty() {
        let dir = TempDir::new().unwrap();
        let mut queue = open(&dir);

        assert!(queue.is_empty());
        assert_eq!(queue.file_len(), HEADER_SIZE);
        assert!(queue.peek().unwrap().is_none());
    }

    #[test]
    fn test_append_and_iterate_in_order() {
        let dir = TempDir::new().unwrap();
        let mut queue = open(&dir);

        for i in 0..10 {
            queue.append(format!("event-{i}").as_bytes()).unwrap();
        }

        assert_eq!(queue.size(), 10);
        let expected: Vec<_> = (0..10).map(|i| format!("event-{i}")).collect();
        assert_eq!(contents(&mut queue), expected);
    }

    #[test]
    fn test_for_each_stops_when_visitor_declines() {
        let dir = TempDir::new().unwrap();
        let mut queue = open(&dir);
        for i in 0..5 {
            queue.append(format!("{i}").as_bytes()).unwrap();
        }

        let mut seen = 0;
        let accepted = queue
            .for_each(&mut |_| {
                seen += 1;
                seen <= 3
            })
            .unwrap();

        assert_eq!(accepted, 3);
        assert_eq!(seen, 4);
        assert_eq!(queue.size(), 5);
    }

    #[test_case(10, 0 ; "remove nothing")]
    #[test_case(10, 3 ; "remove prefix")]
    #[test_case(10, 10 ; "remove everything")]
    fn test_remove_prefix(total: usize, removed: usize) {
        let dir = TempDir::new().unwrap();
        let mut queue = open(&dir);
        for i in 0..total {
            queue.append(format!("event-{i}").as_bytes()).unwrap();
        }

        queue.remove(removed).unwrap();

        let expected: Vec<_> = (removed..total).map(|i| format!("event-{i}")).collect();
        assert_eq!(queue.size(), total - removed);
        assert_eq!(contents(&mut queue), expected);
    }

    #[test]
    fn test_remove_more_than_available_fails() {
        let dir = TempDir::new().unwrap();
        let mut queue = open(&dir);
        queue.append(b"only").unwrap();

        let err = queue.remove(2).unwrap_err();
        assert!(matches!(
            err,
            QueueError::RemoveOutOfRange {
                requested: 2,
                available: 1
            }
        ));
        assert_eq!(queue.size(), 1);
    }

    #[test]
    fn test_remove_all_shrinks_file() {
        let dir = TempDir::new().unwrap();
        let mut queue = open(&dir);
        for _ in 0..20 {
            queue.append(&[b'x'; 100]).unwrap();
        }

        queue.remove(20).unwrap();

        let on_disk = fs::metadata(queue.path()).unwrap().len();
        assert_eq!(on_disk, HEADER_SIZE);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_compaction_keeps_live_records() {
        let dir = TempDir::new().unwrap();
        let config = QueueConfig::builder()
            .path(dir.path().join("queue"))
            .compaction_threshold(1024)
            .build();
        let mut queue = QueueFile::open(config).unwrap();
        for i in 0..40 {
            queue.append(format!("{i:0>64}").as_bytes()).unwrap();
        }

        queue.remove(30).unwrap();

        assert_eq!(queue.header.head, HEADER_SIZE);
        assert!(!compact_path(queue.path()).exists());
        let expected: Vec<_> = (30..40).map(|i| format!("{i:0>64}")).collect();
        assert_eq!(contents(&mut queue), expected);

        queue.append(b"after-compaction").unwrap();
        assert_eq!(queue.size(), 11);
    }

    #[test]
    fn test_failed_compaction_still_commits_removal() {
        let dir = TempDir::new().unwrap();
        let config = QueueConfig::builder()
            .path(dir.path().join("queue"))
            .compaction_threshold(1024)
            .build();
        let mut queue = QueueFile::open(config.clone()).unwrap();
        for i in 0..40 {
            queue.append(format!("{i:0>64}").as_bytes()).unwrap();
        }
        // A directory in the way makes the rewrite fail.
        let blocker = compact_path(queue.path());
        fs::create_dir(&blocker).unwrap();

        queue.remove(30).unwrap();

        assert_eq!(queue.size(), 10);
        assert!(queue.header.head > HEADER_SIZE);
        let expected: Vec<_> = (30..40).map(|i| format!("{i:0>64}")).collect();
        assert_eq!(contents(&mut queue), expected);

        fs::remove_dir(&blocker).unwrap();
        queue.remove(1).unwrap();
        assert_eq!(queue.header.head, HEADER_SIZE);
        assert!(!blocker.exists());
        queue.close().unwrap();

        let mut reopened = QueueFile::open(config).unwrap();
        assert_eq!(contents(&mut reopened), expected[1..].to_vec());
    }

    #[test]
    fn test_close_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut queue = open(&dir);
        queue.append(b"event").unwrap();

        queue.close().unwrap();
        queue.close().unwrap();

        assert!(queue.is_closed());
        assert!(matches!(queue.append(b"late"), Err(QueueError::Closed)));
        assert!(matches!(queue.remove(1), Err(QueueError::Closed)));
    }

    #[test]
    fn test_append_alternates_header_slots() {
        let dir = TempDir::new().unwrap();
        let mut queue = open(&dir);
        let initial = queue.slot;

        queue.append(b"a").unwrap();
        assert_eq!(queue.slot, initial.other());
        queue.append(b"b").unwrap();
        assert_eq!(queue.slot, initial);
    }
}
