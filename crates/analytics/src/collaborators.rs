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

//! Platform seams the dispatcher talks to.

use std::io;

use chrono::{DateTime, Utc};

use crate::payload::JsonMap;

/// Reports whether the network is currently reachable.
pub trait Connectivity: Send + Sync {
    fn is_available(&self) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysConnected;

impl Connectivity for AlwaysConnected {
    fn is_available(&self) -> bool { true }
}

/// Turns a payload map into JSON text. `None` drops the payload.
pub trait Serializer: Send + Sync {
    fn to_json(&self, map: &JsonMap) -> Option<String>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn to_json(&self, map: &JsonMap) -> Option<String> { serde_json::to_string(map).ok() }
}

/// Byte transform applied to each record at rest.
///
/// `decrypt(encrypt(x)) == x` must hold for every input.
pub trait Crypto: Send + Sync {
    fn encrypt(&self, plain: Vec<u8>) -> io::Result<Vec<u8>>;

    fn decrypt(&self, stored: &[u8]) -> io::Result<Vec<u8>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoCrypto;

impl Crypto for NoCrypto {
    fn encrypt(&self, plain: Vec<u8>) -> io::Result<Vec<u8>> { Ok(plain) }

    fn decrypt(&self, stored: &[u8]) -> io::Result<Vec<u8>> { Ok(stored.to_vec()) }
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> { Utc::now() }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_json_serializer() {
        let mut map = JsonMap::new();
        map.insert("event".into(), json!("Opened"));
        assert_eq!(
            JsonSerializer.to_json(&map).as_deref(),
            Some(r#"{"event":"Opened"}"#)
        );
    }

    #[test]
    fn test_no_crypto_is_identity() {
        let stored = NoCrypto.encrypt(b"payload".to_vec()).unwrap();
        assert_eq!(NoCrypto.decrypt(&stored).unwrap(), b"payload");
    }
}
