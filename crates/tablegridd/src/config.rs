//! tablegrid.toml configuration.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tablegrid_flows::{CookieCodec, FlowManagerConfig, RetryPolicy};
use tablegrid_reconcile::{default_tables, MissFlowManager, DEFAULT_SUBSCRIBED_OWNERS, ENGINE_OWNER};
use tablegrid_state::TableEntry;
use tablegrid_state::validate::check_tables;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    pub listen: SocketAddr,
    pub data_dir: PathBuf,
    /// Owner name carried by the miss flows the engine installs.
    pub owner: String,
    /// Top byte of every cookie the engine installs.
    pub cookie_prefix: u8,
    pub subscribed_owners: Vec<String>,
    pub flow_manager: FlowManagerConfig,
    pub retry: RetryPolicy,
    /// Tables applied while no pipeline is active. The built-in layout is
    /// used when absent.
    pub default_pipeline: Option<Vec<TableEntry>>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8182)),
            data_dir: PathBuf::from("/var/lib/tablegrid"),
            owner: ENGINE_OWNER.to_string(),
            cookie_prefix: CookieCodec::default().owner_tag(),
            subscribed_owners: DEFAULT_SUBSCRIBED_OWNERS.iter().map(|s| s.to_string()).collect(),
            flow_manager: FlowManagerConfig::default(),
            retry: RetryPolicy::default(),
            default_pipeline: None,
        }
    }
}

impl DaemonConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("loading {}", path.display()))
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: DaemonConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(tables) = &self.default_pipeline {
            let issues = check_tables(tables);
            if !issues.is_empty() {
                let joined = issues.iter().map(|i| i.to_string()).collect::<Vec<_>>().join("; ");
                anyhow::bail!("invalid default_pipeline: {joined}");
            }
        }
        if self.retry.max_attempts == 0 {
            anyhow::bail!("retry.max_attempts must be at least 1");
        }
        Ok(())
    }

    pub fn default_tables(&self) -> Vec<TableEntry> {
        self.default_pipeline.clone().unwrap_or_else(default_tables)
    }

    pub fn miss_flow_manager(&self) -> MissFlowManager {
        MissFlowManager::new(self.owner.clone(), CookieCodec::new(self.cookie_prefix))
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("tablegrid.redb")
    }
}
