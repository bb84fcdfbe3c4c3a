//! Domain types for the pipeline store.
//!
//! A pipeline is the persisted assignment of owner flow-groups to table ids.
//! All types are serializable to/from JSON, both for storage in redb and for
//! the REST surface.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Unique identifier for a pipeline (32 lowercase hex characters).
pub type PipelineId = String;

/// Name of an owner application (e.g. `mef_eline`).
pub type OwnerName = String;

/// Label of a flow-group within an owner (e.g. `evpl`).
pub type FlowGroup = String;

// ── Pipeline ───────────────────────────────────────────────────────

/// Lifecycle status of a pipeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Disabled,
    Enabling,
    Enabled,
    Disabling,
    EnablingError,
    DisablingError,
}

impl PipelineStatus {
    pub const ALL: [PipelineStatus; 6] = [
        PipelineStatus::Disabled,
        PipelineStatus::Enabling,
        PipelineStatus::Enabled,
        PipelineStatus::Disabling,
        PipelineStatus::EnablingError,
        PipelineStatus::DisablingError,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStatus::Disabled => "disabled",
            PipelineStatus::Enabling => "enabling",
            PipelineStatus::Enabled => "enabled",
            PipelineStatus::Disabling => "disabling",
            PipelineStatus::EnablingError => "enabling_error",
            PipelineStatus::DisablingError => "disabling_error",
        }
    }

    /// Anything but `disabled` counts as the active pipeline.
    pub fn is_active(&self) -> bool {
        *self != PipelineStatus::Disabled
    }

    /// A reconciliation is pending or in flight.
    pub fn is_transitional(&self) -> bool {
        matches!(self, PipelineStatus::Enabling | PipelineStatus::Disabling)
    }

    pub fn is_error(&self) -> bool {
        matches!(
            self,
            PipelineStatus::EnablingError | PipelineStatus::DisablingError
        )
    }

    /// Statuses for which the pipeline's own layout is the target.
    pub fn is_enable_direction(&self) -> bool {
        matches!(
            self,
            PipelineStatus::Enabling | PipelineStatus::Enabled | PipelineStatus::EnablingError
        )
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PipelineStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PipelineStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown pipeline status: {s}"))
    }
}

/// A persisted pipeline document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Pipeline {
    pub id: PipelineId,
    pub status: PipelineStatus,
    pub multi_table: Vec<TableEntry>,
    /// Unix timestamp (seconds) when the pipeline was inserted.
    pub inserted_at: u64,
    /// Unix timestamp (seconds) of the last status change.
    pub updated_at: u64,
}

impl Pipeline {
    /// Build a fresh `disabled` pipeline from a validated document.
    pub fn from_new(id: PipelineId, new: NewPipeline, now: u64) -> Self {
        Self {
            id,
            status: PipelineStatus::Disabled,
            multi_table: new.multi_table,
            inserted_at: now,
            updated_at: now,
        }
    }

    pub fn table_ids(&self) -> Vec<u8> {
        self.multi_table.iter().map(|t| t.table_id).collect()
    }
}

/// A validated pipeline document as submitted for creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewPipeline {
    pub multi_table: Vec<TableEntry>,
}

// ── Tables ─────────────────────────────────────────────────────────

/// One OpenFlow table of a pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TableEntry {
    pub table_id: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_miss_flow: Option<MissFlowSpec>,
    /// Owner name to the flow-groups of that owner placed in this table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub napps_table_groups: Option<BTreeMap<OwnerName, Vec<FlowGroup>>>,
}

impl TableEntry {
    /// Iterate `(owner, flow_group)` pairs assigned to this table.
    pub fn groups(&self) -> impl Iterator<Item = (&str, &str)> {
        self.napps_table_groups
            .iter()
            .flat_map(|owners| owners.iter())
            .flat_map(|(owner, groups)| groups.iter().map(move |g| (owner.as_str(), g.as_str())))
    }
}

/// Table-miss flow declared by a table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MissFlowSpec {
    pub priority: u16,
    #[serde(rename = "match", default, skip_serializing_if = "Option::is_none")]
    pub match_fields: Option<MatchFields>,
    /// Opaque instruction objects; only an embedded `table_id` is inspected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<Vec<Value>>,
}

impl MissFlowSpec {
    /// Table ids referenced by goto-table style instructions.
    pub fn goto_tables(&self) -> impl Iterator<Item = u64> + '_ {
        self.instructions
            .iter()
            .flatten()
            .filter_map(|instruction| instruction.get("table_id")?.as_u64())
    }
}

// ── Match ──────────────────────────────────────────────────────────

/// VLAN match value: a plain id or a `value/mask` string.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum VlanMatch {
    Id(u16),
    Masked(String),
}

/// Flat set of OpenFlow 1.3 match fields. Every field is optional.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct MatchFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_port: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dl_src: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dl_dst: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dl_type: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dl_vlan: Option<VlanMatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dl_vlan_pcp: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nw_src: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nw_dst: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nw_proto: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tp_src: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tp_dst: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_phy_port: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_dscp: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_ecn: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub udp_src: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub udp_dst: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sctp_src: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sctp_dst: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icmpv4_type: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icmpv4_code: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arp_op: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arp_spa: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arp_tpa: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arp_sha: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arp_tha: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipv6_src: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipv6_dst: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipv6_flabel: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icmpv6_type: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icmpv6_code: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nd_tar: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nd_sll: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nd_tll: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mpls_lab: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mpls_tc: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mpls_bos: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pbb_isid: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub v6_hdr: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tun_id: Option<u64>,
}

impl MatchFields {
    pub fn is_empty(&self) -> bool {
        *self == MatchFields::default()
    }

    /// JSON object form, as carried in flow bodies.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
