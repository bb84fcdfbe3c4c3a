//! Flow bodies exchanged with the flow manager.
//!
//! Only the fields the reconciler reads are typed; everything else a flow
//! carries (actions, timeouts, ...) rides along in `extra` so a relocated
//! flow is reinstalled with an identical body.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Datapath id in colon-separated hex, e.g. `00:00:00:00:00:00:00:01`.
pub type SwitchId = String;

/// A flow body as stored by the flow manager and as sent for installation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct FlowEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default)]
    pub table_id: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_group: Option<String>,
    #[serde(default)]
    pub cookie: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u16>,
    #[serde(rename = "match", default, skip_serializing_if = "Option::is_none")]
    pub match_fields: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<Vec<Value>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FlowEntry {
    /// The match object, treating `{}` the same as no match.
    pub fn non_empty_match(&self) -> Option<&Value> {
        self.match_fields.as_ref().filter(|m| !is_empty_value(m))
    }
}

/// One record of the installed-flows listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstalledFlow {
    pub flow: FlowEntry,
}

impl From<FlowEntry> for InstalledFlow {
    fn from(flow: FlowEntry) -> Self {
        Self { flow }
    }
}

/// Every installed flow, keyed by switch.
pub type FlowSnapshot = BTreeMap<SwitchId, Vec<InstalledFlow>>;

/// Match key of a flow to delete.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlowDelete {
    pub cookie: u64,
    pub cookie_mask: u64,
    pub table_id: u8,
    #[serde(rename = "match", default, skip_serializing_if = "Option::is_none")]
    pub match_fields: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

/// A flow the flow manager failed to install.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlowErrorNotification {
    pub flow: FlowEntry,
    /// Set when the failure came from the flow manager itself rather than
    /// from the switch rejecting the flow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_exception: Option<String>,
}

/// `null`, `{}` and `[]` count as empty.
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}
