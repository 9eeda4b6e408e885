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

//! Streaming writer for the `{"batch":[...], ...}` upload envelope.

use std::io::Write;

use serde_json::Value;
use snafu::ResultExt;

use crate::{
    error::{IncompleteDocumentSnafu, Result},
    payload::JsonMap,
};

const BATCH_OPEN: &[u8] = br#"{"batch":["#;

/// Writes queued records into a single JSON document.
///
/// Records are emitted verbatim after trimming surrounding whitespace; the
/// size limit is checked against their raw length.
#[derive(Debug)]
pub struct BatchWriter<W: Write> {
    out:      W,
    max_size: usize,
    size:     usize,
    count:    usize,
}

impl<W: Write> BatchWriter<W> {
    /// Starts the envelope on `out`.
    pub fn new(mut out: W, max_size: usize) -> Result<Self> {
        out.write_all(BATCH_OPEN).context(IncompleteDocumentSnafu)?;
        Ok(Self {
            out,
            max_size,
            size: 0,
            count: 0,
        })
    }

    /// Appends `record` unless it would push the batch past `max_size`.
    ///
    /// Returns `false` once the batch is full; the caller stops there.
    pub fn try_emit(&mut self, record: &[u8]) -> Result<bool> {
        let next = self.size + record.len();
        if next > self.max_size {
            return Ok(false);
        }
        if self.count > 0 {
            self.out.write_all(b",").context(IncompleteDocumentSnafu)?;
        }
        self.out
            .write_all(record.trim_ascii())
            .context(IncompleteDocumentSnafu)?;
        self.size = next;
        self.count += 1;
        Ok(true)
    }

    pub const fn count(&self) -> usize { self.count }

    pub const fn size(&self) -> usize { self.size }

    /// Closes the array, appends `metadata` as top-level keys and flushes.
    ///
    /// Returns the sink and the number of records written.
    pub fn finish(mut self, metadata: &JsonMap) -> Result<(W, usize)> {
        let mut tail = String::from("]");
        for (key, value) in metadata {
            tail.push_str(&format!(",{}:{value}", Value::from(key.as_str())));
        }
        tail.push('}');
        self.out.write_all(tail.as_bytes()).context(IncompleteDocumentSnafu)?;
        self.out.flush().context(IncompleteDocumentSnafu)?;
        Ok((self.out, self.count))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn metadata() -> JsonMap {
        let mut map = JsonMap::new();
        map.insert("sentAt".into(), json!("2024-01-01T00:00:00.000Z"));
        map
    }

    #[test]
    fn test_empty_batch() {
        let writer = BatchWriter::new(Vec::new(), 100).unwrap();
        let (out, count) = writer.finish(&metadata()).unwrap();
        assert_eq!(count, 0);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            r#"{"batch":[],"sentAt":"2024-01-01T00:00:00.000Z"}"#
        );
    }

    #[test]
    fn test_records_are_trimmed_and_joined() {
        let mut writer = BatchWriter::new(Vec::new(), 100).unwrap();
        assert!(writer.try_emit(b" {\"a\":1}\n").unwrap());
        assert!(writer.try_emit(b"{\"b\":2}").unwrap());
        let (out, count) = writer.finish(&JsonMap::new()).unwrap();

        assert_eq!(count, 2);
        let doc: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(doc, json!({"batch": [{"a": 1}, {"b": 2}]}));
    }

    #[test]
    fn test_stops_at_max_size() {
        let record = format!("{{\"pad\":\"{}\"}}", "x".repeat(1432 - 10));
        assert_eq!(record.len(), 1432);

        let mut writer = BatchWriter::new(Vec::new(), 475_000).unwrap();
        let mut accepted = 0;
        for _ in 0..500 {
            if !writer.try_emit(record.as_bytes()).unwrap() {
                break;
            }
            accepted += 1;
        }
        assert_eq!(accepted, 331);
        assert_eq!(writer.size(), 331 * 1432);

        let (out, count) = writer.finish(&metadata()).unwrap();
        assert_eq!(count, 331);
        let doc: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(doc["batch"].as_array().unwrap().len(), 331);
        assert_eq!(doc["sentAt"], "2024-01-01T00:00:00.000Z");
    }

    #[test]
    fn test_oversize_first_record_is_refused() {
        let mut writer = BatchWriter::new(Vec::new(), 4).unwrap();
        assert!(!writer.try_emit(b"{\"a\":1}").unwrap());
        assert_eq!(writer.count(), 0);
    }
}
