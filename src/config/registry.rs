//! Session-owned registry of configs keyed by domain

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use tracing::{debug, info, warn};

use super::Config;
use crate::host::{AssetStore, FileStore, SessionRole};
use crate::patch::ApplyReport;
use crate::sync::ConfigSnapshot;

/// Every loaded config, one per domain
#[derive(Debug, Default)]
pub struct ConfigRegistry {
    configs: BTreeMap<String, Config>,
}

impl ConfigRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `<domain>.json` definition in `dir`. A broken definition
    /// still registers (as an empty config); only I/O on the directory fails.
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize> {
        let entries = fs::read_dir(dir).context(format!("Failed to read definitions directory {}", dir.display()))?;

        let mut paths: Vec<_> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        let mut loaded = 0;
        for path in paths {
            let Some(domain) = path.file_stem().and_then(|s| s.to_str()) else {
                warn!(path = %path.display(), "Skipping definition with non UTF-8 name");
                continue;
            };

            let source = match fs::read_to_string(&path) {
                Ok(source) => source,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to read definition, skipping");
                    continue;
                }
            };

            match self.insert(Config::new(domain, &source)) {
                Ok(()) => loaded += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping definition"),
            }
        }

        info!(dir = %dir.display(), loaded, "Loaded config definitions");
        Ok(loaded)
    }

    /// Register a config. Domains are unique.
    pub fn insert(&mut self, config: Config) -> Result<()> {
        if self.configs.contains_key(config.domain()) {
            bail!("Domain '{}' is already registered", config.domain());
        }
        self.configs.insert(config.domain().to_string(), config);
        Ok(())
    }

    pub fn get(&self, domain: &str) -> Option<&Config> {
        self.configs.get(domain)
    }

    pub fn get_mut(&mut self, domain: &str) -> Option<&mut Config> {
        self.configs.get_mut(domain)
    }

    pub fn domains(&self) -> impl Iterator<Item = &str> {
        self.configs.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Config> {
        self.configs.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Config> {
        self.configs.values_mut()
    }

    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }

    pub fn set_role(&mut self, role: SessionRole) {
        for config in self.configs.values_mut() {
            config.set_role(role);
        }
    }

    /// Read every config's settings file
    pub fn read_all(&mut self, store: &dyn FileStore) {
        self.read_where(store, |_| true);
    }

    /// Read the settings file of each domain `reload` accepts. Returns how many were read.
    pub fn read_where(&mut self, store: &dyn FileStore, reload: impl Fn(&str) -> bool) -> usize {
        let mut read = 0;
        for (domain, config) in &mut self.configs {
            if !reload(domain) {
                debug!(domain = %domain, "Keeping in-memory settings, not reloading");
                continue;
            }
            config.read_from_file(store);
            read += 1;
        }
        read
    }

    /// Run every config's patches against `store`
    pub fn apply_all(&self, store: &mut dyn AssetStore) -> ApplyReport {
        let mut total = ApplyReport::default();
        for config in self.configs.values() {
            total += config.apply(store);
        }
        total
    }

    pub fn snapshots(&self) -> Vec<ConfigSnapshot> {
        self.configs.values().map(ConfigSnapshot::from).collect()
    }

    /// Replace (or add) a domain with the state received from the server
    pub fn replace_from_snapshot(&mut self, snapshot: ConfigSnapshot, role: SessionRole) {
        let config = snapshot.into_config(role);
        info!(domain = %config.domain(), settings = config.settings().len(), "Replaced config from snapshot");
        self.configs.insert(config.domain().to_string(), config);
    }
}
