use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Last-known state of one physical sensor.  The registry holds exactly one
/// record per `id`; `connected` and `value` are the fields that churn in
/// normal operation, everything else is set once by the first full update.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SensorRecord {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub connected: bool,
    /// Unit of measure for `value` (e.g. "°C").
    #[serde(default)]
    pub unit: String,
    /// String-encoded latest reading.  Empty while the sensor is not
    /// reporting.
    #[serde(default)]
    pub value: String,
}

/// Partial update pushed by the server.  Only `id` is required; every other
/// field overlays the stored record when present and is left untouched when
/// absent.  Unrecognized extra fields on the wire are ignored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SensorUpdate {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connected: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl SensorUpdate {
    /// A bare update carrying no overlay fields (applying it re-stores the
    /// record unchanged).
    pub fn bare(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            connected: None,
            unit: None,
            value: None,
        }
    }

    /// An update that only flips the connected flag — the optimistic-toggle
    /// shape.
    pub fn connected(id: impl Into<String>, connected: bool) -> Self {
        Self {
            connected: Some(connected),
            ..Self::bare(id)
        }
    }

    /// Overlay this update onto `record`: fields present here win, absent
    /// fields keep the stored value.
    pub fn apply_to(&self, record: &mut SensorRecord) {
        record.id = self.id.clone();
        if let Some(name) = &self.name {
            record.name = name.clone();
        }
        if let Some(connected) = self.connected {
            record.connected = connected;
        }
        if let Some(unit) = &self.unit {
            record.unit = unit.clone();
        }
        if let Some(value) = &self.value {
            record.value = value.clone();
        }
    }
}

/// Verb sent to the server.  The server interprets the verb, not a
/// desired-state flag, so the verb is derived from the sensor's *current*
/// connected state: `Connect` when it is disconnected, `Disconnect` when it
/// is connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandVerb {
    Connect,
    Disconnect,
}

/// Outbound frame: `{"command":"connect","id":"…"}`.  The only command kind
/// in this protocol version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Command {
    pub command: CommandVerb,
    pub id: String,
}

impl Command {
    pub fn new(command: CommandVerb, id: impl Into<String>) -> Self {
        Self {
            command,
            id: id.into(),
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Why an inbound frame was rejected.  Rejected frames are reported and
/// discarded; they never touch the registry and never kill the session.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("frame carries no sensor id")]
    MissingId,
}

/// Decode one inbound text frame into a partial update.
///
/// A frame that parses but lacks a string `id` is rejected with
/// `FrameError::MissingId` — there is nothing to merge it into.
pub fn decode_update(text: &str) -> Result<SensorUpdate, FrameError> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    if value.get("id").and_then(|v| v.as_str()).is_none() {
        return Err(FrameError::MissingId);
    }
    Ok(serde_json::from_value(value)?)
}
