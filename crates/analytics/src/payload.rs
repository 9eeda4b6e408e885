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

//! Typed event payloads.
//!
//! Payloads are plain structs throughout the SDK. They turn into a generic
//! JSON map only at the serialization boundary via [`EventPayload::to_map`].

use bon::bon;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Value, json};
use snafu::ensure;
use uuid::Uuid;

use crate::error::{InvalidArgumentSnafu, Result};

pub type JsonMap = serde_json::Map<String, Value>;

pub(crate) const ANONYMOUS_ID_KEY: &str = "anonymousId";
pub(crate) const USER_ID_KEY: &str = "userId";

fn non_empty(value: Option<&str>) -> Option<&str> { value.filter(|v| !v.trim().is_empty()) }

// ============================================================================
// Traits
// ============================================================================

/// Identity of the current user plus free-form traits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Traits {
    pub anonymous_id: String,
    pub user_id:      Option<String>,
    pub extra:        JsonMap,
}

impl Traits {
    /// Fresh identity with a random anonymous id.
    pub fn anonymous() -> Self {
        Self {
            anonymous_id: Uuid::new_v4().to_string(),
            user_id:      None,
            extra:        JsonMap::new(),
        }
    }

    /// User id when known, otherwise the anonymous id.
    pub fn current_id(&self) -> &str { self.user_id.as_deref().unwrap_or(&self.anonymous_id) }

    /// Overlays `traits` onto the stored ones. Identity keys in `traits`
    /// update the typed fields.
    pub fn merge(&mut self, traits: &JsonMap) {
        for (key, value) in traits {
            match (key.as_str(), value.as_str()) {
                (USER_ID_KEY, Some(id)) => self.user_id = Some(id.to_string()),
                (ANONYMOUS_ID_KEY, Some(id)) => self.anonymous_id = id.to_string(),
                _ => {
                    self.extra.insert(key.clone(), value.clone());
                }
            }
        }
    }

    pub fn to_map(&self) -> JsonMap {
        let mut map = self.extra.clone();
        map.insert(ANONYMOUS_ID_KEY.into(), Value::from(self.anonymous_id.clone()));
        if let Some(user_id) = &self.user_id {
            map.insert(USER_ID_KEY.into(), Value::from(user_id.clone()));
        }
        map
    }

    /// Inverse of [`to_map`](Self::to_map). `None` without an anonymous id.
    pub fn from_map(mut map: JsonMap) -> Option<Self> {
        let anonymous_id = match map.remove(ANONYMOUS_ID_KEY)? {
            Value::String(id) if !id.is_empty() => id,
            _ => return None,
        };
        let user_id = match map.remove(USER_ID_KEY) {
            Some(Value::String(id)) if !id.is_empty() => Some(id),
            _ => None,
        };
        Some(Self {
            anonymous_id,
            user_id,
            extra: map,
        })
    }
}

impl Default for Traits {
    fn default() -> Self { Self::anonymous() }
}

// ============================================================================
// Payload
// ============================================================================

/// Fraction digits of serialized timestamps. Fixed per instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimestampPrecision {
    #[default]
    Millis,
    Nanos,
}

impl TimestampPrecision {
    pub fn format(self, at: &DateTime<Utc>) -> String {
        let format = match self {
            Self::Millis => SecondsFormat::Millis,
            Self::Nanos => SecondsFormat::Nanos,
        };
        at.to_rfc3339_opts(format, true)
    }
}

/// Variant-specific part of a payload.
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    Identify {
        traits: JsonMap,
    },
    Track {
        event:      String,
        properties: JsonMap,
    },
    Group {
        group_id: String,
        traits:   JsonMap,
    },
    Screen {
        name:       Option<String>,
        category:   Option<String>,
        properties: JsonMap,
    },
    Alias {
        previous_id: String,
    },
}

impl EventKind {
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Identify { .. } => "identify",
            Self::Track { .. } => "track",
            Self::Group { .. } => "group",
            Self::Screen { .. } => "screen",
            Self::Alias { .. } => "alias",
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        match self {
            Self::Track { event, .. } => ensure!(
                !event.trim().is_empty(),
                InvalidArgumentSnafu {
                    message: "event must not be empty",
                }
            ),
            Self::Group { group_id, .. } => ensure!(
                !group_id.trim().is_empty(),
                InvalidArgumentSnafu {
                    message: "group id must not be empty",
                }
            ),
            Self::Screen { name, category, .. } => ensure!(
                non_empty(name.as_deref()).is_some() || non_empty(category.as_deref()).is_some(),
                InvalidArgumentSnafu {
                    message: "either category or name must be provided",
                }
            ),
            Self::Alias { previous_id } => ensure!(
                !previous_id.trim().is_empty(),
                InvalidArgumentSnafu {
                    message: "previous id must not be empty",
                }
            ),
            Self::Identify { .. } => {}
        }
        Ok(())
    }

    fn write_fields(&self, map: &mut JsonMap) {
        match self {
            Self::Identify { traits } => {
                map.insert("traits".into(), Value::Object(traits.clone()));
            }
            Self::Track { event, properties } => {
                map.insert("event".into(), Value::from(event.clone()));
                map.insert("properties".into(), Value::Object(properties.clone()));
            }
            Self::Group { group_id, traits } => {
                map.insert("groupId".into(), Value::from(group_id.clone()));
                map.insert("traits".into(), Value::Object(traits.clone()));
            }
            Self::Screen {
                name,
                category,
                properties,
            } => {
                if let Some(name) = name {
                    map.insert("name".into(), Value::from(name.clone()));
                }
                if let Some(category) = category {
                    map.insert("category".into(), Value::from(category.clone()));
                }
                map.insert("properties".into(), Value::Object(properties.clone()));
            }
            Self::Alias { previous_id } => {
                map.insert("previousId".into(), Value::from(previous_id.clone()));
            }
        }
    }
}

/// A single event, immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct EventPayload {
    message_id:   String,
    timestamp:    DateTime<Utc>,
    precision:    TimestampPrecision,
    context:      JsonMap,
    anonymous_id: Option<String>,
    user_id:      Option<String>,
    kind:         EventKind,
}

#[bon]
impl EventPayload {
    /// Builds a payload. Fails when neither an anonymous id nor a user id is
    /// set, or a required variant field is blank.
    #[builder]
    pub fn new(
        kind: EventKind,
        #[builder(default = Utc::now())] timestamp: DateTime<Utc>,
        #[builder(default)] precision: TimestampPrecision,
        #[builder(default)] context: JsonMap,
        #[builder(into)] anonymous_id: Option<String>,
        #[builder(into)] user_id: Option<String>,
        #[builder(default = Uuid::new_v4().to_string(), into)] message_id: String,
    ) -> Result<Self> {
        let anonymous_id = non_empty(anonymous_id.as_deref()).map(str::to_string);
        let user_id = non_empty(user_id.as_deref()).map(str::to_string);
        ensure!(
            anonymous_id.is_some() || user_id.is_some(),
            InvalidArgumentSnafu {
                message: "either anonymousId or userId must be set",
            }
        );
        kind.validate()?;

        Ok(Self {
            message_id,
            timestamp,
            precision,
            context,
            anonymous_id,
            user_id,
            kind,
        })
    }
}

impl EventPayload {
    pub fn message_id(&self) -> &str { &self.message_id }

    pub const fn timestamp(&self) -> &DateTime<Utc> { &self.timestamp }

    pub const fn kind(&self) -> &EventKind { &self.kind }

    pub fn anonymous_id(&self) -> Option<&str> { self.anonymous_id.as_deref() }

    pub fn user_id(&self) -> Option<&str> { self.user_id.as_deref() }

    pub const fn context(&self) -> &JsonMap { &self.context }

    /// Wire representation of the payload.
    pub fn to_map(&self) -> JsonMap {
        let mut map = JsonMap::new();
        map.insert("type".into(), Value::from(self.kind.type_name()));
        map.insert("messageId".into(), Value::from(self.message_id.clone()));
        map.insert(
            "timestamp".into(),
            Value::from(self.precision.format(&self.timestamp)),
        );
        map.insert("context".into(), Value::Object(self.context.clone()));
        map.insert("integrations".into(), json!({}));
        if let Some(anonymous_id) = &self.anonymous_id {
            map.insert(ANONYMOUS_ID_KEY.into(), Value::from(anonymous_id.clone()));
        }
        if let Some(user_id) = &self.user_id {
            map.insert(USER_ID_KEY.into(), Value::from(user_id.clone()));
        }
        self.kind.write_fields(&mut map);
        map
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use test_case::test_case;

    use super::*;

    fn track(event: &str) -> EventKind {
        EventKind::Track {
            event:      event.to_string(),
            properties: JsonMap::new(),
        }
    }

    #[test]
    fn test_payload_requires_an_identity() {
        let err = EventPayload::builder().kind(track("Signed Up")).build();
        assert!(err.is_err());

        let blank = EventPayload::builder()
            .kind(track("Signed Up"))
            .anonymous_id("  ")
            .build();
        assert!(blank.is_err());

        let ok = EventPayload::builder()
            .kind(track("Signed Up"))
            .user_id("user-1")
            .build();
        assert!(ok.is_ok());
    }

    #[test_case(track("") ; "track without event")]
    #[test_case(EventKind::Group { group_id: String::new(), traits: JsonMap::new() } ; "group without id")]
    #[test_case(EventKind::Screen { name: None, category: Some(" ".into()), properties: JsonMap::new() } ; "screen without name or category")]
    #[test_case(EventKind::Alias { previous_id: String::new() } ; "alias without previous id")]
    fn test_variant_validation(kind: EventKind) {
        let result = EventPayload::builder()
            .kind(kind)
            .anonymous_id("anon")
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_track_to_map() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        let mut properties = JsonMap::new();
        properties.insert("revenue".into(), json!(9.99));

        let payload = EventPayload::builder()
            .kind(EventKind::Track {
                event: "Order Completed".into(),
                properties,
            })
            .timestamp(at)
            .anonymous_id("anon-1")
            .message_id("msg-1")
            .build()
            .unwrap();

        let map = Value::Object(payload.to_map());
        assert_eq!(map["type"], "track");
        assert_eq!(map["messageId"], "msg-1");
        assert_eq!(map["timestamp"], "2024-03-01T12:30:00.000Z");
        assert_eq!(map["anonymousId"], "anon-1");
        assert_eq!(map["event"], "Order Completed");
        assert_eq!(map["properties"]["revenue"], 9.99);
        assert_eq!(map["integrations"], json!({}));
        assert!(map.get("userId").is_none());
    }

    #[test]
    fn test_nanosecond_precision() {
        let at = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        assert_eq!(
            TimestampPrecision::Nanos.format(&at),
            "2023-11-14T22:13:20.123456789Z"
        );
        assert_eq!(
            TimestampPrecision::Millis.format(&at),
            "2023-11-14T22:13:20.123Z"
        );
    }

    #[test]
    fn test_alias_and_screen_fields() {
        let alias = EventPayload::builder()
            .kind(EventKind::Alias {
                previous_id: "anon-1".into(),
            })
            .user_id("user-9")
            .build()
            .unwrap()
            .to_map();
        assert_eq!(alias["previousId"], "anon-1");
        assert_eq!(alias["userId"], "user-9");

        let screen = EventPayload::builder()
            .kind(EventKind::Screen {
                name:       Some("Checkout".into()),
                category:   None,
                properties: JsonMap::new(),
            })
            .anonymous_id("anon-1")
            .build()
            .unwrap()
            .to_map();
        assert_eq!(screen["name"], "Checkout");
        assert!(screen.get("category").is_none());
    }

    #[test]
    fn test_traits_roundtrip_through_map() {
        let mut traits = Traits::anonymous();
        let mut update = JsonMap::new();
        update.insert("userId".into(), json!("user-7"));
        update.insert("plan".into(), json!("pro"));
        traits.merge(&update);

        assert_eq!(traits.current_id(), "user-7");
        assert_eq!(traits.extra["plan"], "pro");

        let restored = Traits::from_map(traits.to_map()).unwrap();
        assert_eq!(restored, traits);
    }

    #[test]
    fn test_traits_from_map_without_anonymous_id() {
        let mut map = JsonMap::new();
        map.insert("userId".into(), json!("user-1"));
        assert!(Traits::from_map(map).is_none());
    }
}
