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

//! Server-sent actions carried in upload responses.
//!
//! A successful upload may answer with one object or a list of objects, each
//! optionally holding an `actions` array. Every object in those arrays is
//! handed to the registered [`ActionHandler`].

use serde_json::Value;

use crate::payload::JsonMap;

const ACTIONS_KEY: &str = "actions";

/// Receives actions returned by the ingestion endpoint.
pub trait ActionHandler: Send + Sync {
    fn handle_action(&self, action: JsonMap);
}

impl<F> ActionHandler for F
where
    F: Fn(JsonMap) + Send + Sync,
{
    fn handle_action(&self, action: JsonMap) { self(action) }
}

/// Collects the actions in an upload response body, in response order.
///
/// Entries that are not objects are skipped. Fails only when the body is not
/// JSON.
pub fn extract_actions(body: &str) -> serde_json::Result<Vec<JsonMap>> {
    let response: Value = serde_json::from_str(body)?;
    let entries = match response {
        Value::Array(entries) => entries,
        entry @ Value::Object(_) => vec![entry],
        _ => Vec::new(),
    };

    Ok(entries
        .into_iter()
        .filter_map(|mut entry| match entry.get_mut(ACTIONS_KEY).map(Value::take) {
            Some(Value::Array(actions)) => Some(actions),
            _ => None,
        })
        .flatten()
        .filter_map(|action| match action {
            Value::Object(action) => Some(action),
            _ => None,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use test_case::test_case;

    use super::*;

    fn names(actions: &[JsonMap]) -> Vec<&str> {
        actions
            .iter()
            .filter_map(|action| action.get("action").and_then(Value::as_str))
            .collect()
    }

    #[test]
    fn test_single_response_object() {
        let body = json!({"actions": [{"action": "overlay"}, {"action": "badge"}]}).to_string();
        let actions = extract_actions(&body).unwrap();
        assert_eq!(names(&actions), vec!["overlay", "badge"]);
    }

    #[test]
    fn test_list_of_event_responses() {
        let body = json!([
            {"actions": [{"action": "first"}]},
            {"status": "ok"},
            {"actions": null},
            {"actions": [{"action": "second"}, 7]}
        ])
        .to_string();
        let actions = extract_actions(&body).unwrap();
        assert_eq!(names(&actions), vec!["first", "second"]);
    }

    #[test_case("{}" ; "empty object")]
    #[test_case("[]" ; "empty list")]
    #[test_case("\"accepted\"" ; "plain string")]
    fn test_responses_without_actions(body: &str) {
        assert!(extract_actions(body).unwrap().is_empty());
    }

    #[test]
    fn test_malformed_body_is_an_error() {
        assert!(extract_actions("{\"actions\": [").is_err());
    }

    #[test]
    fn test_closure_is_a_handler() {
        let seen = parking_lot::Mutex::new(Vec::new());
        let handler = |action: JsonMap| seen.lock().push(action);
        handler.handle_action(JsonMap::new());
        assert_eq!(seen.lock().len(), 1);
    }
}
