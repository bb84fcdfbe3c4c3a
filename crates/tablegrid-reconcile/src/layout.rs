//! Desired layout: where each owner's flow-groups belong.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tablegrid_state::{FlowGroup, OwnerName, TableEntry};

/// `owner -> flow_group -> table_id`, flattened from a pipeline's tables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DesiredLayout(BTreeMap<OwnerName, BTreeMap<FlowGroup, u8>>);

impl DesiredLayout {
    /// Flatten table entries. A duplicate `(owner, flow_group)` pair keeps
    /// the last table that names it.
    pub fn from_tables(tables: &[TableEntry]) -> Self {
        let mut layout = BTreeMap::<OwnerName, BTreeMap<FlowGroup, u8>>::new();
        for table in tables {
            for (owner, group) in table.groups() {
                layout
                    .entry(owner.to_string())
                    .or_default()
                    .insert(group.to_string(), table.table_id);
            }
        }
        Self(layout)
    }

    pub fn table_for(&self, owner: &str, group: &str) -> Option<u8> {
        self.0.get(owner)?.get(group).copied()
    }

    pub fn contains_owner(&self, owner: &str) -> bool {
        self.0.contains_key(owner)
    }

    pub fn owners(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &BTreeMap<OwnerName, BTreeMap<FlowGroup, u8>> {
        &self.0
    }
}

/// Built-in fallback tables used while no pipeline is active.
pub fn default_tables() -> Vec<TableEntry> {
    fn table(table_id: u8, owners: Vec<(&str, Vec<&str>)>) -> TableEntry {
        TableEntry {
            table_id,
            napps_table_groups: Some(
                owners
                    .into_iter()
                    .map(|(owner, groups)| {
                        (
                            owner.to_string(),
                            groups.into_iter().map(str::to_string).collect(),
                        )
                    })
                    .collect(),
            ),
            ..Default::default()
        }
    }

    vec![
        table(
            0,
            vec![
                ("coloring", vec!["base"]),
                ("of_lldp", vec!["base"]),
                ("mef_eline", vec!["evpl", "epl"]),
            ],
        ),
        table(2, vec![("telemetry_int", vec!["evpl"])]),
        table(3, vec![("telemetry_int", vec!["epl"])]),
    ]
}
