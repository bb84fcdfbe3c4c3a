//! Pipeline document validation.
//!
//! Incoming documents are checked in two passes. The first walks the raw
//! JSON so that range and format problems carry a dotted field path
//! (`multi_table.1.table_id`); the second runs the structural rules over the
//! typed tables. Invalid documents are never persisted.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::types::{NewPipeline, TableEntry};

/// Highest table id a pipeline may use.
pub const MAX_TABLE_ID: u64 = 254;

/// A single failing field.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ValidationIssue {
    pub path: String,
    pub message: String,
}

impl ValidationIssue {
    fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            f.write_str(&self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// A rejected pipeline document with every failing field.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid pipeline document: {}", summarize(.issues))]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

fn summarize(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl NewPipeline {
    /// Parse and validate a raw pipeline document.
    pub fn from_json(doc: &Value) -> Result<Self, ValidationError> {
        let mut doc = doc.clone();
        let mut issues = Vec::new();

        let Some(tables) = doc.get_mut("multi_table").and_then(Value::as_array_mut) else {
            return Err(ValidationError {
                issues: vec![ValidationIssue::new("multi_table", "field required (list)")],
            });
        };

        let mut parsed = Vec::with_capacity(tables.len());
        for (index, raw) in tables.iter_mut().enumerate() {
            let path = format!("multi_table.{index}");
            if !raw.is_object() {
                issues.push(ValidationIssue::new(path, "must be an object"));
                continue;
            }
            let before = issues.len();
            check_table_id(raw, &path, &mut issues);
            normalize_vlan(raw, &path, &mut issues);
            check_instruction_shapes(raw, &path, &mut issues);
            if issues.len() > before {
                continue;
            }
            match serde_json::from_value::<TableEntry>(raw.clone()) {
                Ok(entry) => parsed.push((index, entry)),
                Err(e) => issues.push(ValidationIssue::new(path, e.to_string())),
            }
        }

        if !issues.is_empty() {
            return Err(ValidationError { issues });
        }

        let pipeline = NewPipeline {
            multi_table: parsed.into_iter().map(|(_, entry)| entry).collect(),
        };
        pipeline.validate()?;
        Ok(pipeline)
    }

    /// Check the structural rules over already-typed tables.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let issues = check_tables(&self.multi_table);
        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { issues })
        }
    }
}

/// Structural rules: distinct table ids, forward-only goto-table references
/// and disjoint `(owner, flow_group)` assignments.
pub fn check_tables(tables: &[TableEntry]) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let mut seen_ids = HashSet::new();
    let mut seen_groups: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();

    for (index, table) in tables.iter().enumerate() {
        let path = format!("multi_table.{index}");
        let table_id = table.table_id;

        if u64::from(table_id) > MAX_TABLE_ID {
            issues.push(ValidationIssue::new(
                format!("{path}.table_id"),
                format!("must be between 0 and {MAX_TABLE_ID}"),
            ));
        }
        if !seen_ids.insert(table_id) {
            issues.push(ValidationIssue::new(
                format!("{path}.table_id"),
                format!("table id {table_id} repeated"),
            ));
        }

        if let Some(miss) = &table.table_miss_flow {
            for (i, instruction) in miss.instructions.iter().flatten().enumerate() {
                let field = format!("{path}.table_miss_flow.instructions.{i}.table_id");
                let target = match instruction.get("table_id") {
                    None | Some(Value::Null) => continue,
                    Some(value) => match value.as_u64() {
                        Some(target) => target,
                        None => {
                            issues.push(ValidationIssue::new(
                                field,
                                format!("goto table {value} is not a table id"),
                            ));
                            continue;
                        }
                    },
                };
                if target <= u64::from(table_id) {
                    issues.push(ValidationIssue::new(
                        field,
                        format!(
                            "table {table_id} has a lower or equal table_id {target} in instructions"
                        ),
                    ));
                }
            }
        }

        for (owner, groups) in table.napps_table_groups.iter().flatten() {
            let seen = seen_groups.entry(owner.as_str()).or_default();
            let repeated: Vec<&str> = groups
                .iter()
                .map(String::as_str)
                .filter(|g| seen.contains(g))
                .collect();
            if !repeated.is_empty() {
                issues.push(ValidationIssue::new(
                    format!("{path}.napps_table_groups.{owner}"),
                    format!(
                        "repeated {owner} table groups {repeated:?} in table id {table_id}"
                    ),
                ));
            }
            seen.extend(groups.iter().map(String::as_str));
        }
    }
    issues
}

fn check_table_id(raw: &Value, path: &str, issues: &mut Vec<ValidationIssue>) {
    let path = format!("{path}.table_id");
    match raw.get("table_id") {
        None => issues.push(ValidationIssue::new(path, "field required")),
        Some(value) => match value.as_u64() {
            Some(id) if id <= MAX_TABLE_ID => {}
            Some(_) => issues.push(ValidationIssue::new(
                path,
                format!("must be between 0 and {MAX_TABLE_ID}"),
            )),
            None if value.as_i64().is_some() => issues.push(ValidationIssue::new(
                path,
                format!("must be between 0 and {MAX_TABLE_ID}"),
            )),
            None => issues.push(ValidationIssue::new(path, "must be an integer")),
        },
    }
}

/// Turn numeric VLAN strings into integers and reject anything that is not
/// `<int>` or `<int>/<int>`.
fn normalize_vlan(raw: &mut Value, path: &str, issues: &mut Vec<ValidationIssue>) {
    let Some(vlan) = raw
        .pointer_mut("/table_miss_flow/match/dl_vlan")
        .filter(|v| !v.is_null())
    else {
        return;
    };
    let path = format!("{path}.table_miss_flow.match.dl_vlan");
    const MESSAGE: &str = "must be an integer or an integer with a mask in format vlan/mask";

    let normalized = match &*vlan {
        Value::Number(n) if n.as_u64().is_some_and(|v| v <= u64::from(u16::MAX)) => None,
        Value::String(s) => match s.trim().parse::<u16>() {
            Ok(id) => Some(Value::from(id)),
            Err(_) => {
                let masked = s
                    .split_once('/')
                    .is_some_and(|(v, m)| v.parse::<u16>().is_ok() && m.parse::<u16>().is_ok());
                if !masked {
                    issues.push(ValidationIssue::new(path, MESSAGE));
                }
                None
            }
        },
        _ => {
            issues.push(ValidationIssue::new(path, MESSAGE));
            None
        }
    };
    if let Some(value) = normalized {
        *vlan = value;
    }
}

fn check_instruction_shapes(raw: &Value, path: &str, issues: &mut Vec<ValidationIssue>) {
    let Some(instructions) = raw.pointer("/table_miss_flow/instructions") else {
        return;
    };
    match instructions {
        Value::Null => {}
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                if !item.is_object() {
                    issues.push(ValidationIssue::new(
                        format!("{path}.table_miss_flow.instructions.{i}"),
                        "must be an object",
                    ));
                }
            }
        }
        _ => issues.push(ValidationIssue::new(
            format!("{path}.table_miss_flow.instructions"),
            "must be a list",
        )),
    }
}
