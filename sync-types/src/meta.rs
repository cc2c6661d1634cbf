//! Per-action metadata and its total order.
//!
//! Every action travels with a meta record: a raw JSON map that always
//! carries an `id` and a `time` key, plus whatever routing keys the server
//! attaches (`clients`, `channels`, `users`, `nodes`, `reasons`, `status`,
//! `subprotocol`). The parsed fields are extracted once at construction;
//! the raw map is preserved byte-for-byte for re-serialization.

use crate::error::SyncError;
use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Parsed form of the wire action id.
///
/// Wire format: `"<time-ms> <user>:<client>[:<node>] <counter>"`, e.g.
/// `"1560954012838 38:Y7bysd:O0ETfc 0"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActionId {
    raw: String,
    time: i64,
    counter: u64,
    user_id: String,
    client_id: String,
    node_id: Option<String>,
}

impl ActionId {
    /// The id exactly as it appeared on the wire.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Milliseconds since the epoch, taken from the first id segment.
    pub fn time(&self) -> i64 {
        self.time
    }

    /// Per-node action counter, the last id segment.
    pub fn counter(&self) -> u64 {
        self.counter
    }

    /// User part of the uid, e.g. `38` in `38:Y7bysd:O0ETfc`.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// User and client parts joined, e.g. `38:Y7bysd`.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Node part of the uid, absent for two-segment uids.
    pub fn node_id(&self) -> Option<&str> {
        self.node_id.as_deref()
    }
}

impl FromStr for ActionId {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || SyncError::MalformedId(s.to_string());

        let mut parts = s.split(' ');
        let time: i64 = parts
            .next()
            .and_then(|t| t.parse().ok())
            .ok_or_else(malformed)?;
        let uid = parts.next().ok_or_else(malformed)?;
        let counter: u64 = parts
            .next()
            .and_then(|c| c.parse().ok())
            .ok_or_else(malformed)?;
        if parts.next().is_some() {
            return Err(malformed());
        }

        let segments: Vec<&str> = uid.split(':').collect();
        let node_id = match segments.len() {
            2 => None,
            3 => Some(segments[2].to_string()),
            _ => return Err(malformed()),
        };

        Ok(Self {
            raw: s.to_string(),
            time,
            counter,
            user_id: segments[0].to_string(),
            client_id: format!("{}:{}", segments[0], segments[1]),
            node_id,
        })
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Bookkeeping record attached to every action.
#[derive(Debug, Clone)]
pub struct Meta {
    raw: Map<String, Value>,
    id: ActionId,
    time: i64,
}

impl Meta {
    /// Parse a meta record from its raw JSON map.
    ///
    /// Requires a string `id` in wire format and a numeric `time`.
    pub fn from_raw(raw: Map<String, Value>) -> Result<Self, SyncError> {
        let id: ActionId = raw
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| SyncError::MalformedMeta("missing or non-string id".into()))?
            .parse()?;
        let time = raw
            .get("time")
            .and_then(Value::as_i64)
            .ok_or_else(|| SyncError::MalformedMeta("missing or non-numeric time".into()))?;
        Ok(Self { raw, id, time })
    }

    /// Parse a meta record from a JSON value; non-objects are rejected.
    pub fn from_value(value: Value) -> Result<Self, SyncError> {
        match value {
            Value::Object(map) => Self::from_raw(map),
            other => Err(SyncError::MalformedMeta(format!(
                "expected object, got {other}"
            ))),
        }
    }

    /// Build a minimal meta record with just `id` and `time`.
    pub fn new(id: &str, time: i64) -> Result<Self, SyncError> {
        let mut raw = Map::new();
        raw.insert("id".into(), Value::from(id));
        raw.insert("time".into(), Value::from(time));
        Self::from_raw(raw)
    }

    /// The parsed action id.
    pub fn id(&self) -> &ActionId {
        &self.id
    }

    /// Milliseconds since the epoch from the `time` key.
    pub fn time(&self) -> i64 {
        self.time
    }

    /// User id extracted from the action id.
    pub fn user_id(&self) -> &str {
        self.id.user_id()
    }

    /// Client id (`user:client`) extracted from the action id.
    pub fn client_id(&self) -> &str {
        self.id.client_id()
    }

    /// Node id extracted from the action id, when present.
    pub fn node_id(&self) -> Option<&str> {
        self.id.node_id()
    }

    /// Subprotocol the originating client announced, when recorded.
    pub fn subprotocol(&self) -> Option<&str> {
        self.raw.get("subprotocol").and_then(Value::as_str)
    }

    /// Look up an arbitrary raw key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.raw.get(key)
    }

    /// The raw meta map as it appeared on the wire.
    pub fn raw(&self) -> &Map<String, Value> {
        &self.raw
    }

    /// Consume the meta and return the raw map.
    pub fn into_raw(self) -> Map<String, Value> {
        self.raw
    }

    /// The raw meta map as a JSON value.
    pub fn to_value(&self) -> Value {
        Value::Object(self.raw.clone())
    }
}

impl PartialEq for Meta {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.id.raw == other.id.raw
    }
}

impl Eq for Meta {}

impl PartialOrd for Meta {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Meta {
    /// Log-insertion order: `time`, then the raw id, then the timestamp
    /// embedded in the id.
    fn cmp(&self, other: &Self) -> Ordering {
        self.time
            .cmp(&other.time)
            .then_with(|| self.id.raw.cmp(&other.id.raw))
            .then_with(|| self.id.time.cmp(&other.id.time))
    }
}

impl Serialize for Meta {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.raw.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Meta {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Map::deserialize(deserializer)?;
        Meta::from_raw(raw).map_err(serde::de::Error::custom)
    }
}
