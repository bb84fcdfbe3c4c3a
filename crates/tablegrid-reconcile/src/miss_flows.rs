//! Table-miss flows.
//!
//! Every table whose entry declares a `table_miss_flow` gets exactly one
//! miss flow per switch, owned by the engine. The plan for a switch is a
//! pure function of the declared specs and that switch's stored miss flows:
//!
//! - tables declared but not stored are installed;
//! - tables stored but no longer declared are deleted;
//! - tables in both whose body differs are deleted and reinstalled.
//!
//! With nothing stored this installs everything declared; with nothing
//! declared it deletes everything stored.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;
use tablegrid_flows::{
    is_empty_value, CookieCodec, FlowDelete, FlowEntry, InstalledFlow, InvalidSwitchId,
    COOKIE_MASK_ALL,
};
use tablegrid_state::{MissFlowSpec, TableEntry};

/// Owner tag of the flows this engine installs.
pub const ENGINE_OWNER: &str = "of_multi_table";

/// Flow-group label carried by miss flows.
pub const MISS_FLOW_GROUP: &str = "base";

/// The fields two miss flows are compared on. Cookie and table id are not
/// part of it.
#[derive(Debug, Clone, PartialEq)]
pub struct MissFlowBody {
    pub priority: u16,
    pub match_fields: Option<Value>,
    pub instructions: Option<Vec<Value>>,
}

impl MissFlowBody {
    pub fn from_spec(spec: &MissFlowSpec) -> Self {
        Self {
            priority: spec.priority,
            match_fields: spec
                .match_fields
                .as_ref()
                .filter(|m| !m.is_empty())
                .map(|m| m.to_value()),
            instructions: normalize_instructions(spec.instructions.as_deref()),
        }
    }

    pub fn from_installed(flow: &FlowEntry) -> Self {
        Self {
            priority: flow.priority.unwrap_or(0),
            match_fields: flow.non_empty_match().cloned(),
            instructions: normalize_instructions(flow.instructions.as_deref()),
        }
    }
}

/// A list whose first instruction is empty is a placeholder for "none".
fn normalize_instructions(instructions: Option<&[Value]>) -> Option<Vec<Value>> {
    instructions
        .filter(|items| items.first().is_some_and(|first| !is_empty_value(first)))
        .map(<[Value]>::to_vec)
}

/// Table ids to delete and to install on one switch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MissFlowPlan {
    pub install: BTreeSet<u8>,
    pub delete: BTreeSet<u8>,
}

impl MissFlowPlan {
    pub fn is_empty(&self) -> bool {
        self.install.is_empty() && self.delete.is_empty()
    }
}

/// Miss flows declared by a set of tables, keyed by table id.
pub fn desired_miss_flows(tables: &[TableEntry]) -> BTreeMap<u8, MissFlowBody> {
    tables
        .iter()
        .filter_map(|t| Some((t.table_id, MissFlowBody::from_spec(t.table_miss_flow.as_ref()?))))
        .collect()
}

/// Miss flows installed on one switch, keyed by table id.
pub fn stored_miss_flows(flows: &[InstalledFlow], owner: &str) -> BTreeMap<u8, MissFlowBody> {
    flows
        .iter()
        .map(|installed| &installed.flow)
        .filter(|flow| flow.owner.as_deref() == Some(owner))
        .map(|flow| (flow.table_id, MissFlowBody::from_installed(flow)))
        .collect()
}

pub fn plan_miss_flows(
    desired: &BTreeMap<u8, MissFlowBody>,
    stored: &BTreeMap<u8, MissFlowBody>,
) -> MissFlowPlan {
    let mut plan = MissFlowPlan::default();
    for (table_id, body) in desired {
        match stored.get(table_id) {
            None => {
                plan.install.insert(*table_id);
            }
            Some(current) if current != body => {
                plan.delete.insert(*table_id);
                plan.install.insert(*table_id);
            }
            Some(_) => {}
        }
    }
    plan.delete
        .extend(stored.keys().filter(|id| !desired.contains_key(id)));
    plan
}

/// Builds the miss-flow install and delete bodies for a switch.
#[derive(Debug, Clone)]
pub struct MissFlowManager {
    owner: String,
    codec: CookieCodec,
}

impl MissFlowManager {
    pub fn new(owner: impl Into<String>, codec: CookieCodec) -> Self {
        Self {
            owner: owner.into(),
            codec,
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn codec(&self) -> &CookieCodec {
        &self.codec
    }

    /// Deletes and installs that bring `switch`'s miss flows in line with
    /// `desired`.
    pub fn plan_for_switch(
        &self,
        switch: &str,
        flows: &[InstalledFlow],
        desired: &BTreeMap<u8, MissFlowBody>,
    ) -> Result<(Vec<FlowDelete>, Vec<FlowEntry>), InvalidSwitchId> {
        let stored = stored_miss_flows(flows, &self.owner);
        let plan = plan_miss_flows(desired, &stored);
        if plan.is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }

        let cookie = self.codec.cookie_for(switch)?;
        let deletes = plan
            .delete
            .iter()
            .map(|table_id| FlowDelete {
                cookie,
                cookie_mask: COOKIE_MASK_ALL,
                table_id: *table_id,
                match_fields: None,
                owner: Some(self.owner.clone()),
            })
            .collect();
        let installs = plan
            .install
            .iter()
            .filter_map(|table_id| Some(self.install_body(cookie, *table_id, desired.get(table_id)?)))
            .collect();
        Ok((deletes, installs))
    }

    fn install_body(&self, cookie: u64, table_id: u8, body: &MissFlowBody) -> FlowEntry {
        FlowEntry {
            owner: Some(self.owner.clone()),
            table_id,
            table_group: Some(MISS_FLOW_GROUP.to_string()),
            cookie,
            priority: Some(body.priority),
            match_fields: body.match_fields.clone(),
            instructions: body.instructions.clone(),
            ..Default::default()
        }
    }
}

impl Default for MissFlowManager {
    fn default() -> Self {
        Self::new(ENGINE_OWNER, CookieCodec::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SW: &str = "00:00:00:00:00:00:00:01";

    fn body(priority: u16, goto: u8) -> MissFlowBody {
        MissFlowBody {
            priority,
            match_fields: None,
            instructions: Some(vec![json!({"instruction_type": "goto_table", "table_id": goto})]),
        }
    }

    fn ids(items: &[u8]) -> BTreeSet<u8> {
        items.iter().copied().collect()
    }

    #[test]
    fn mixed_sets_install_delete_and_modify() {
        let desired = BTreeMap::from([(1, body(0, 2)), (2, body(10, 3)), (5, body(0, 6))]);
        let stored = BTreeMap::from([
            (0, body(0, 1)),
            (1, body(0, 2)),
            (2, body(0, 3)),
            (3, body(0, 4)),
        ]);
        let plan = plan_miss_flows(&desired, &stored);
        assert_eq!(plan.install, ids(&[2, 5]));
        assert_eq!(plan.delete, ids(&[0, 2, 3]));
    }

    #[test]
    fn identical_sets_are_a_noop() {
        let desired = BTreeMap::from([(1, body(0, 2)), (2, body(0, 3))]);
        let plan = plan_miss_flows(&desired, &desired.clone());
        assert!(plan.is_empty());
    }

    #[test]
    fn nothing_stored_installs_everything() {
        let desired = BTreeMap::from([(0, body(0, 1)), (1, body(0, 2))]);
        let plan = plan_miss_flows(&desired, &BTreeMap::new());
        assert_eq!(plan.install, ids(&[0, 1]));
        assert!(plan.delete.is_empty());
    }

    #[test]
    fn nothing_desired_deletes_everything() {
        let stored = BTreeMap::from([(0, body(0, 1)), (4, body(0, 5))]);
        let plan = plan_miss_flows(&BTreeMap::new(), &stored);
        assert!(plan.install.is_empty());
        assert_eq!(plan.delete, ids(&[0, 4]));
    }

    #[test]
    fn both_empty_is_a_noop() {
        assert!(plan_miss_flows(&BTreeMap::new(), &BTreeMap::new()).is_empty());
    }

    #[test]
    fn placeholder_instructions_count_as_absent() {
        let spec: MissFlowSpec =
            serde_json::from_value(json!({"priority": 5, "instructions": [{}]})).unwrap();
        let from_spec = MissFlowBody::from_spec(&spec);
        assert!(from_spec.instructions.is_none());

        let installed: FlowEntry =
            serde_json::from_value(json!({"priority": 5, "match": {}})).unwrap();
        assert_eq!(MissFlowBody::from_installed(&installed), from_spec);
    }

    #[test]
    fn missing_priority_compares_as_zero() {
        let spec: MissFlowSpec = serde_json::from_value(json!({"priority": 0})).unwrap();
        let installed = FlowEntry::default();
        assert_eq!(
            MissFlowBody::from_installed(&installed),
            MissFlowBody::from_spec(&spec)
        );
    }

    #[test]
    fn stored_flows_only_include_engine_owner() {
        let flows: Vec<InstalledFlow> = serde_json::from_value(json!([
            {"flow": {"owner": "of_multi_table", "table_id": 1, "priority": 0}},
            {"flow": {"owner": "mef_eline", "table_id": 2, "priority": 0}},
            {"flow": {"table_id": 3}}
        ]))
        .unwrap();
        let stored = stored_miss_flows(&flows, ENGINE_OWNER);
        assert_eq!(stored.keys().copied().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn switch_plan_builds_tagged_bodies() {
        let manager = MissFlowManager::default();
        let desired = BTreeMap::from([(0, body(0, 1))]);
        let stored: Vec<InstalledFlow> = serde_json::from_value(json!([
            {"flow": {"owner": "of_multi_table", "table_id": 4, "priority": 0}}
        ]))
        .unwrap();

        let (deletes, installs) = manager.plan_for_switch(SW, &stored, &desired).unwrap();
        let cookie = CookieCodec::default().cookie_for(SW).unwrap();

        assert_eq!(deletes.len(), 1);
        assert_eq!(deletes[0].table_id, 4);
        assert_eq!(deletes[0].cookie, cookie);
        assert_eq!(deletes[0].cookie_mask, u64::MAX);
        assert_eq!(deletes[0].owner.as_deref(), Some(ENGINE_OWNER));

        assert_eq!(installs.len(), 1);
        let install = &installs[0];
        assert_eq!(install.table_id, 0);
        assert_eq!(install.cookie, cookie);
        assert_eq!(install.owner.as_deref(), Some(ENGINE_OWNER));
        assert_eq!(install.table_group.as_deref(), Some(MISS_FLOW_GROUP));
        assert_eq!(install.priority, Some(0));
        assert!(install.match_fields.is_none());
    }

    #[test]
    fn installed_body_compares_equal_to_its_spec() {
        let manager = MissFlowManager::default();
        let spec: MissFlowSpec = serde_json::from_value(json!({
            "priority": 100,
            "match": {"dl_vlan": 10},
            "instructions": [{"instruction_type": "goto_table", "table_id": 2}]
        }))
        .unwrap();
        let desired = BTreeMap::from([(1, MissFlowBody::from_spec(&spec))]);

        let (_, installs) = manager.plan_for_switch(SW, &[], &desired).unwrap();
        let installed: Vec<InstalledFlow> = installs.into_iter().map(InstalledFlow::from).collect();

        let (deletes, installs) = manager.plan_for_switch(SW, &installed, &desired).unwrap();
        assert!(deletes.is_empty());
        assert!(installs.is_empty());
    }

    #[test]
    fn invalid_switch_surfaces_only_when_work_is_needed() {
        let manager = MissFlowManager::default();
        assert!(manager.plan_for_switch("nope", &[], &BTreeMap::new()).is_ok());
        let desired = BTreeMap::from([(0, body(0, 1))]);
        assert!(manager.plan_for_switch("nope", &[], &desired).is_err());
    }
}
