// ── WebSocket wire codec ──
//
// Every outbound operation is a `{ "req_id": n, "type": op, "params": {...} }`
// envelope; inbound frames are a tagged union on `"type"`. Stream updates
// reuse the same envelope shape as responses, so classification is by
// message type, never by the presence of `req_id`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::Error;

// ── Operations ───────────────────────────────────────────────────────

/// Outbound operation kinds accepted by the WebSocket API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum WsOperation {
    DatarefSubscribeValues,
    DatarefUnsubscribeValues,
    CommandSubscribeIsActive,
    CommandUnsubscribeIsActive,
    DatarefSetValues,
    CommandSetIsActive,
}

// ── Outbound envelope ────────────────────────────────────────────────

/// One outbound request frame.
#[derive(Debug, Serialize)]
pub struct WsRequest {
    pub req_id: u64,
    #[serde(rename = "type")]
    pub op: WsOperation,
    pub params: serde_json::Value,
}

impl WsRequest {
    pub fn encode(&self) -> Result<String, Error> {
        serde_json::to_string(self).map_err(|e| Error::Serialization(e.to_string()))
    }
}

// ── Param builders ───────────────────────────────────────────────────

/// One dataref in a subscribe/unsubscribe request. `index` narrows the
/// subscription to specific array elements; omitted means the whole value.
#[derive(Debug, Clone, Serialize)]
pub struct DatarefSpec {
    pub id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<Vec<usize>>,
}

/// One dataref write in a `dataref_set_values` request.
#[derive(Debug, Clone, Serialize)]
pub struct DatarefWrite {
    pub id: i64,
    pub value: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
}

/// One command in a subscribe/unsubscribe request.
#[derive(Debug, Clone, Serialize)]
pub struct CommandSpec {
    pub id: i64,
}

/// One command activation in a `command_set_is_active` request.
#[derive(Debug, Clone, Serialize)]
pub struct CommandActivation {
    pub id: i64,
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

pub fn dataref_params(datarefs: &[DatarefSpec]) -> serde_json::Value {
    serde_json::json!({ "datarefs": datarefs })
}

pub fn dataref_write_params(writes: &[DatarefWrite]) -> serde_json::Value {
    serde_json::json!({ "datarefs": writes })
}

pub fn command_params(commands: &[CommandSpec]) -> serde_json::Value {
    serde_json::json!({ "commands": commands })
}

pub fn command_activation_params(activations: &[CommandActivation]) -> serde_json::Value {
    serde_json::json!({ "commands": activations })
}

// ── Inbound frames ───────────────────────────────────────────────────

/// Inbound frame, classified by the `"type"` tag.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum WsMessage {
    /// Acknowledgment for a specific request id.
    #[serde(rename = "result")]
    Result(WsResult),

    /// Value changes for subscribed datarefs, keyed by wire id.
    #[serde(rename = "dataref_update_values")]
    DatarefUpdate(WsDatarefUpdate),

    /// Active-state changes for subscribed commands, keyed by wire id.
    #[serde(rename = "command_update_is_active")]
    CommandActive(WsCommandActive),

    /// Anything with a type tag this client does not understand.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WsResult {
    pub req_id: u64,
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// Update payloads key entries by wire id. The ids arrive as JSON
/// object keys, i.e. strings; parsing them back to integers is the
/// router's job.
#[derive(Debug, Clone, Deserialize)]
pub struct WsDatarefUpdate {
    pub data: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WsCommandActive {
    pub data: HashMap<String, bool>,
}

/// Decode one inbound text frame.
///
/// Unrecognized `"type"` tags decode to [`WsMessage::Unknown`]; only
/// genuinely malformed JSON is an error.
pub fn decode(text: &str) -> Result<WsMessage, Error> {
    serde_json::from_str(text).map_err(|e| Error::Deserialization {
        message: e.to_string(),
        body: text.to_string(),
    })
}
