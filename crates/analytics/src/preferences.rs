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

//! Small persistent key/value store for identity, opt-out and app version.

use std::{
    fs,
    path::{Path, PathBuf},
};

use parking_lot::Mutex;
use serde_json::Value;
use snafu::ResultExt;
use tracing::warn;

use crate::{
    error::{PreferencesFormatSnafu, PreferencesIoSnafu, Result},
    payload::JsonMap,
};

pub(crate) fn traits_key(tag: &str) -> String { format!("traits-{tag}") }

pub(crate) fn opt_out_key(tag: &str) -> String { format!("opt-out-{tag}") }

pub(crate) const VERSION_KEY: &str = "version";
pub(crate) const BUILD_KEY: &str = "build";

pub trait Preferences: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;

    fn set(&self, key: &str, value: Value) -> Result<()>;

    fn remove(&self, key: &str) -> Result<()>;
}

/// Process-local preferences. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryPreferences {
    values: Mutex<JsonMap>,
}

impl Preferences for MemoryPreferences {
    fn get(&self, key: &str) -> Option<Value> { self.values.lock().get(key).cloned() }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        self.values.lock().insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.values.lock().remove(key);
        Ok(())
    }
}

/// Preferences kept as one JSON object on disk.
///
/// Every write replaces the file through a temporary sibling and a rename,
/// so a crash leaves either the old or the new content.
#[derive(Debug)]
pub struct FilePreferences {
    path:   PathBuf,
    values: Mutex<JsonMap>,
}

impl FilePreferences {
    /// Loads `path`, starting empty if it does not exist yet.
    ///
    /// A file that is not a JSON object is discarded with a warning.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let values = match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<Value>(&bytes) {
                Ok(Value::Object(map)) => map,
                Ok(_) | Err(_) => {
                    warn!(path = %path.display(), "discarding unreadable preferences file");
                    JsonMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => JsonMap::new(),
            Err(e) => return Err(e).context(PreferencesIoSnafu { path }),
        };
        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path { &self.path }

    fn persist(&self, values: &JsonMap) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context(PreferencesIoSnafu { path: parent })?;
        }
        let bytes = serde_json::to_vec(values).context(PreferencesFormatSnafu { path: &self.path })?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, bytes).context(PreferencesIoSnafu { path: &tmp })?;
        fs::rename(&tmp, &self.path).context(PreferencesIoSnafu { path: &self.path })
    }
}

impl Preferences for FilePreferences {
    fn get(&self, key: &str) -> Option<Value> { self.values.lock().get(key).cloned() }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut values = self.values.lock();
        values.insert(key.to_string(), value);
        self.persist(&values)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut values = self.values.lock();
        if values.remove(key).is_none() {
            return Ok(());
        }
        self.persist(&values)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_memory_preferences() {
        let prefs = MemoryPreferences::default();
        assert!(prefs.get("k").is_none());
        prefs.set("k", json!(1)).unwrap();
        assert_eq!(prefs.get("k"), Some(json!(1)));
        prefs.remove("k").unwrap();
        assert!(prefs.get("k").is_none());
    }

    #[test]
    fn test_file_preferences_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("prefs.json");

        let prefs = FilePreferences::open(&path).unwrap();
        prefs.set(&traits_key("beacon"), json!({"anonymousId": "a"})).unwrap();
        prefs.set(&opt_out_key("beacon"), json!(true)).unwrap();
        prefs.remove(&opt_out_key("beacon")).unwrap();
        drop(prefs);

        let reopened = FilePreferences::open(&path).unwrap();
        assert_eq!(
            reopened.get("traits-beacon"),
            Some(json!({"anonymousId": "a"}))
        );
        assert!(reopened.get("opt-out-beacon").is_none());
    }

    #[test]
    fn test_file_preferences_discard_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        fs::write(&path, b"not json").unwrap();

        let prefs = FilePreferences::open(&path).unwrap();
        assert!(prefs.get(VERSION_KEY).is_none());
    }
}
