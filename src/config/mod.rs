//! Per-domain configuration
//!
//! This module owns everything one mod's settings go through:
//! - **setting**: the typed value with its validation and change notification
//! - **definition**: schema parsing into settings, layout blocks and patches
//! - **document**: rendering and reading the on-disk settings file
//! - **registry**: the session-owned map of domain -> [`Config`]
//! - **watcher**: coalesced reload on settings file changes

pub mod definition;
pub mod document;
pub mod registry;
pub mod setting;
pub mod watcher;

pub use definition::{Block, BlockKind, FileFormat, parse_definition};
pub use registry::ConfigRegistry;
pub use setting::{Range, Setting, SettingType, Validation, display_scalar};
pub use watcher::ReloadWatcher;

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender};

use serde_json::Value;
use tracing::{error, info, warn};

use crate::constants::schema;
use crate::error::SettingsFileError;
use crate::host::{AssetStore, FileStore, SessionRole};
use crate::patch::{self, ApplyReport, AssetPatch};

/// Lifecycle of a [`Config`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigState {
    Uninitialized,
    Parsing,
    Loaded,
    /// The definition was rejected; the config is empty but usable
    Failed,
}

/// Notifications delivered to [`Config::subscribe`] receivers
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigEvent {
    SettingChanged { domain: String, code: String, value: Value },
    Saved { domain: String },
    Reloaded { domain: String, accepted: bool },
    Reset { domain: String },
}

/// Result of assigning a setting through its config
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    Changed,
    Unchanged,
    UnknownSetting,
    /// A client tried to change a value only the server may change
    ServerAuthoritative,
}

/// One domain's settings, layout, patches and file binding
#[derive(Debug)]
pub struct Config {
    domain: String,
    state: ConfigState,
    definition: String,
    version: i64,
    file: String,
    format: FileFormat,
    settings: HashMap<String, Setting>,
    /// Client-side settings as seen by a non-authoritative client
    client_settings: Option<HashMap<String, Setting>>,
    blocks: Vec<Block>,
    patches: Vec<AssetPatch>,
    role: SessionRole,
    events: Option<Sender<ConfigEvent>>,
}

impl Config {
    /// Build a config from its definition. A malformed definition is logged and
    /// yields an empty config in the `Failed` state instead of an error.
    pub fn new(domain: &str, definition: &str) -> Self {
        let mut config = Self {
            domain: domain.to_string(),
            state: ConfigState::Uninitialized,
            definition: definition.to_string(),
            version: schema::UNVERSIONED,
            file: definition::default_file_name(domain),
            format: FileFormat::Yaml,
            settings: HashMap::new(),
            client_settings: None,
            blocks: Vec::new(),
            patches: Vec::new(),
            role: SessionRole::Standalone,
            events: None,
        };

        config.state = ConfigState::Parsing;
        match parse_definition(domain, definition) {
            Ok(def) => {
                info!(
                    domain = %domain,
                    version = def.version,
                    settings = def.settings.len(),
                    asset_patches = def.patches.len(),
                    "Loaded config definition"
                );
                config.version = def.version;
                config.file = def.file;
                config.format = def.format;
                config.settings = def.settings;
                config.blocks = def.blocks;
                config.patches = def.patches;
                config.state = ConfigState::Loaded;
            }
            Err(e) => {
                error!(domain = %domain, error = %e, "Invalid config definition, continuing with empty settings");
                config.state = ConfigState::Failed;
            }
        }
        config
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn state(&self) -> ConfigState {
        self.state
    }

    /// Raw definition text
    pub fn definition(&self) -> &str {
        &self.definition
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    /// Settings file name within the file store
    pub fn file_name(&self) -> &str {
        &self.file
    }

    pub fn format(&self) -> FileFormat {
        self.format
    }

    pub fn role(&self) -> SessionRole {
        self.role
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn patches(&self) -> &[AssetPatch] {
        &self.patches
    }

    /// Authoritative settings
    pub fn settings(&self) -> &HashMap<String, Setting> {
        &self.settings
    }

    pub(crate) fn settings_mut(&mut self) -> &mut HashMap<String, Setting> {
        &mut self.settings
    }

    /// The settings this process may edit and persist: the client-side subset
    /// on a client, everything otherwise
    pub fn visible(&self) -> &HashMap<String, Setting> {
        self.client_settings.as_ref().unwrap_or(&self.settings)
    }

    fn visible_mut(&mut self) -> &mut HashMap<String, Setting> {
        self.client_settings.as_mut().unwrap_or(&mut self.settings)
    }

    /// Setting by code, preferring the client-visible copy
    pub fn get(&self, code: &str) -> Option<&Setting> {
        self.client_settings
            .as_ref()
            .and_then(|client| client.get(code))
            .or_else(|| self.settings.get(code))
    }

    /// Setting by display code, as used in settings files and on the command line
    pub fn find_by_display_code(&self, display_code: &str) -> Option<&Setting> {
        self.settings.values().find(|s| s.display_code() == display_code)
    }

    /// Switch session role. Becoming a client splits off the client-side settings.
    pub fn set_role(&mut self, role: SessionRole) {
        self.role = role;
        self.client_settings = match role {
            SessionRole::Client => Some(
                self.settings
                    .iter()
                    .filter(|(_, s)| s.is_client_side())
                    .map(|(code, s)| (code.clone(), s.clone()))
                    .collect(),
            ),
            SessionRole::Standalone | SessionRole::Server => None,
        };
    }

    /// Receive change events. Subscribing again replaces the previous receiver.
    pub fn subscribe(&mut self) -> Receiver<ConfigEvent> {
        let (tx, rx) = mpsc::channel();
        for setting in self.settings.values_mut() {
            setting.attach(tx.clone());
        }
        if let Some(client) = self.client_settings.as_mut() {
            for setting in client.values_mut() {
                setting.attach(tx.clone());
            }
        }
        self.events = Some(tx);
        rx
    }

    fn emit(&self, event: ConfigEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    /// Assign a value by code
    pub fn set_value(&mut self, code: &str, value: Value) -> SetOutcome {
        let client_side = self.client_settings.as_ref().map(|client| client.contains_key(code));
        let target = match client_side {
            Some(true) => self.client_settings.as_mut().and_then(|client| client.get_mut(code)),
            Some(false) if self.settings.contains_key(code) => {
                warn!(domain = %self.domain, code = %code, "Setting is server-authoritative, not changing it locally");
                return SetOutcome::ServerAuthoritative;
            }
            _ => self.settings.get_mut(code),
        };

        match target {
            Some(setting) => {
                if setting.set_value(value) {
                    SetOutcome::Changed
                } else {
                    SetOutcome::Unchanged
                }
            }
            None => SetOutcome::UnknownSetting,
        }
    }

    /// Apply a value pushed by the authoritative side, bypassing the client split
    pub fn apply_remote(&mut self, code: &str, value: Value) -> bool {
        match self.settings.get_mut(code) {
            Some(setting) => setting.set_value(value),
            None => {
                warn!(domain = %self.domain, code = %code, "Remote update for unknown setting");
                false
            }
        }
    }

    /// Render the settings file as it would be written
    pub fn render(&self) -> Result<String, SettingsFileError> {
        document::render(self.format, self.version, &self.blocks, self.visible())
    }

    /// Render the settings file with every visible setting at its default
    pub fn render_defaults(&self) -> Result<String, SettingsFileError> {
        let defaults: HashMap<String, Setting> = self
            .visible()
            .iter()
            .map(|(code, setting)| {
                let mut copy = setting.detached();
                copy.restore_default();
                (code.clone(), copy)
            })
            .collect();
        document::render(self.format, self.version, &self.blocks, &defaults)
    }

    /// Persist the visible settings. Failures are logged; returns whether the file was written.
    pub fn write_to_file(&self, store: &dyn FileStore) -> bool {
        let text = match self.render() {
            Ok(text) => text,
            Err(e) => {
                error!(domain = %self.domain, error = %e, "Failed to render settings file");
                return false;
            }
        };

        match store.write(&self.file, &text) {
            Ok(()) => {
                info!(domain = %self.domain, file = %self.file, "Saved settings");
                self.emit(ConfigEvent::Saved {
                    domain: self.domain.clone(),
                });
                true
            }
            Err(e) => {
                error!(domain = %self.domain, file = %self.file, error = ?e, "Failed to save settings");
                false
            }
        }
    }

    fn write_defaults(&self, store: &dyn FileStore) -> Option<String> {
        let text = match self.render_defaults() {
            Ok(text) => text,
            Err(e) => {
                error!(domain = %self.domain, error = %e, "Failed to render default settings file");
                return None;
            }
        };
        if let Err(e) = store.write(&self.file, &text) {
            error!(domain = %self.domain, file = %self.file, error = ?e, "Failed to write default settings file");
        }
        Some(text)
    }

    /// Load the settings file into the visible settings.
    ///
    /// A missing or unreadable file is replaced with defaults first. A file
    /// with a stale or missing version is overwritten with defaults and the
    /// settings are reset. Returns whether the file's contents were accepted.
    pub fn read_from_file(&mut self, store: &dyn FileStore) -> bool {
        let text = match store.read(&self.file) {
            Ok(Some(text)) => text,
            Ok(None) => {
                info!(domain = %self.domain, file = %self.file, "Settings file missing, creating defaults");
                match self.write_defaults(store) {
                    Some(text) => text,
                    None => return false,
                }
            }
            Err(e) => {
                warn!(domain = %self.domain, file = %self.file, error = ?e, "Settings file unreadable, recreating defaults");
                match self.write_defaults(store) {
                    Some(text) => text,
                    None => return false,
                }
            }
        };

        let map = match document::parse(self.format, &text) {
            Ok(map) => map,
            Err(e) => {
                warn!(domain = %self.domain, file = %self.file, error = %e, "Settings file is malformed, keeping current values");
                self.emit(ConfigEvent::Reloaded {
                    domain: self.domain.clone(),
                    accepted: false,
                });
                return false;
            }
        };

        if let Err(SettingsFileError::VersionMismatch { expected, found }) = document::check_version(self.version, &map) {
            info!(
                domain = %self.domain,
                expected,
                found = ?found,
                "Settings file version is stale, resetting to defaults"
            );
            self.write_defaults(store);
            self.restore_to_defaults();
            self.emit(ConfigEvent::Reloaded {
                domain: self.domain.clone(),
                accepted: false,
            });
            return false;
        }

        let changed = document::apply(&map, self.visible_mut());
        info!(domain = %self.domain, changed, "Loaded settings file");
        self.emit(ConfigEvent::Reloaded {
            domain: self.domain.clone(),
            accepted: true,
        });
        true
    }

    /// Reset every visible setting to its default. The file is left alone.
    pub fn restore_to_defaults(&mut self) {
        let mut changed = 0;
        for setting in self.visible_mut().values_mut() {
            if setting.restore_default() {
                changed += 1;
            }
        }
        info!(domain = %self.domain, changed, "Restored defaults");
        self.emit(ConfigEvent::Reset {
            domain: self.domain.clone(),
        });
    }

    /// Patch the declared assets with the current values. On a client, the
    /// local client-side values shadow the server's.
    pub fn apply(&self, store: &mut dyn AssetStore) -> ApplyReport {
        let mut layers = Vec::with_capacity(2);
        if let Some(client) = &self.client_settings {
            layers.push(client);
        }
        layers.push(&self.settings);
        patch::apply_all(&self.domain, &self.patches, &layers, store, self.role)
    }
}
