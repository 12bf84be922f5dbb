//! Compile configuration loaded from TOML
//!
//! Every section is optional. A missing file means the built-in defaults.

use anyhow::Context;
use logic::{OneShot, RuleRegistry, Settings};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use world::{ConnectionsConfig, InstanceLocs, TilingConfig};

/// Configuration for one compile
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CompileConfig {
    pub settings: Settings,
    /// Item id to instance files, by variant index
    pub instances: BTreeMap<String, Vec<String>>,
    /// Item id to custom instance name to file
    pub instances_custom: BTreeMap<String, BTreeMap<String, String>>,
    /// Category name to selector
    pub special: BTreeMap<String, String>,
    pub seed: SeedConfig,
    pub tiling: TilingConfig,
    pub connections: ConnectionsConfig,
    /// One-shot scope overrides by result name
    pub rules: BTreeMap<String, OneShot>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SeedConfig {
    /// Selector for the instances whose positions seed random choices;
    /// blank uses every instance
    pub items: String,
}

impl CompileConfig {
    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("Invalid config {}", path.display()))
    }

    /// Build the instance lookup from `[instances]`, `[instances_custom]` and `[special]`
    pub fn instance_locs(&self) -> InstanceLocs {
        let mut locs = InstanceLocs::new();
        for (item, files) in &self.instances {
            locs.add_item(item, files.as_slice());
        }
        for (item, names) in &self.instances_custom {
            for (name, file) in names {
                locs.add_custom(item, name, file);
            }
        }
        for (name, selector) in &self.special {
            locs.add_special(name, selector);
        }
        locs
    }

    /// Built-in flags and results with the `[rules]` scope overrides applied
    pub fn registry(&self) -> logic::Result<RuleRegistry> {
        let mut reg = RuleRegistry::new();
        for (name, scope) in &self.rules {
            reg.set_scope(name, *scope)?;
        }
        Ok(reg)
    }
}
