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

//! Host lifecycle hooks. Platform glue calls these; nothing here knows the
//! host's callback interfaces.

use std::sync::atomic::Ordering;

use serde_json::Value;
use tracing::warn;

use crate::{
    analytics::Analytics,
    error::Result,
    payload::JsonMap,
    preferences::{BUILD_KEY, VERSION_KEY},
};

pub const APPLICATION_INSTALLED: &str = "Application Installed";
pub const APPLICATION_UPDATED: &str = "Application Updated";
pub const APPLICATION_OPENED: &str = "Application Opened";
pub const APPLICATION_BACKGROUNDED: &str = "Application Backgrounded";

/// What the previous run recorded about the app.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreviousInstall {
    pub version: Option<String>,
    pub build:   Option<i64>,
}

impl Analytics {
    /// Compares the configured app build with the one stored by the last
    /// run and tracks an install or update.
    ///
    /// The app counts as installed once either marker is stored, even when
    /// its value is null.
    pub fn on_app_created(&self) -> Result<()> {
        let preferences = &self.shared.preferences;
        let version = preferences.get(VERSION_KEY);
        let build = preferences.get(BUILD_KEY);
        let previous = (version.is_some() || build.is_some()).then(|| PreviousInstall {
            version: version.and_then(|v| v.as_str().map(str::to_string)),
            build:   build.and_then(|v| v.as_i64()),
        });
        self.on_app_created_from(previous.as_ref())
    }

    /// Same as [`on_app_created`](Self::on_app_created) with the previous
    /// run supplied by the caller. `None` means a fresh install.
    pub fn on_app_created_from(&self, previous: Option<&PreviousInstall>) -> Result<()> {
        self.ensure_running()?;
        let config = &self.shared.config;
        if !config.track_lifecycle_events {
            return Ok(());
        }

        let mut properties = self.version_properties();
        match previous {
            None => self.track(APPLICATION_INSTALLED, Some(properties))?,
            Some(previous) if previous.build != config.app_build => {
                properties.insert("previous_version".into(), Value::from(previous.version.clone()));
                properties.insert("previous_build".into(), Value::from(previous.build));
                self.track(APPLICATION_UPDATED, Some(properties))?;
            }
            Some(_) => {}
        }

        let preferences = &self.shared.preferences;
        let stored = preferences
            .set(VERSION_KEY, Value::from(config.app_version.clone()))
            .and_then(|()| preferences.set(BUILD_KEY, Value::from(config.app_build)));
        if let Err(e) = stored {
            warn!(tag = %config.tag, error = %e, "failed to store app version");
        }
        Ok(())
    }

    /// Tracks `Application Opened`. `from_background` is false only for the
    /// first call on this instance.
    pub fn on_foreground(&self) -> Result<()> {
        self.ensure_running()?;
        if !self.shared.config.track_lifecycle_events {
            return Ok(());
        }
        let from_background = self.shared.foregrounded.swap(true, Ordering::AcqRel);
        let mut properties = self.version_properties();
        properties.insert("from_background".into(), Value::Bool(from_background));
        self.track(APPLICATION_OPENED, Some(properties))
    }

    pub fn on_background(&self) -> Result<()> {
        self.ensure_running()?;
        if !self.shared.config.track_lifecycle_events {
            return Ok(());
        }
        self.track(APPLICATION_BACKGROUNDED, None)
    }

    fn version_properties(&self) -> JsonMap {
        let config = &self.shared.config;
        let mut properties = JsonMap::new();
        properties.insert("version".into(), Value::from(config.app_version.clone()));
        properties.insert("build".into(), Value::from(config.app_build));
        properties
    }
}
