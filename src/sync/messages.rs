//! Sync message types for server ↔ client replication

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::warn;

use crate::config::{Config, Range, Setting, SettingType, Validation};
use crate::host::SessionRole;

/// Requests sent from a client to the authoritative server
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum SyncRequest {
    /// Join the session; answered with every domain's snapshot
    Hello,

    /// Snapshot of a single domain
    GetSnapshot(String),

    /// Ask the server to change a setting
    SetValue { domain: String, code: String, value: Value },

    /// Health check
    Ping,

    /// Request graceful shutdown
    Shutdown,
}

/// Responses and notifications sent from the server
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum SyncResponse {
    /// Every domain at join time (response to Hello)
    Snapshots(Vec<ConfigSnapshot>),

    /// One domain (response to GetSnapshot)
    Snapshot(ConfigSnapshot),

    /// A setting changed on the server
    SettingChanged { domain: String, code: String, value: Value },

    /// Health check response
    Pong,

    /// Acknowledgment that request was processed
    Ready,

    /// Error occurred
    Error(String),
}

/// Full replicated state of one domain
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ConfigSnapshot {
    pub domain: String,
    /// Raw definition text, needed by the receiver for layout and patches
    pub definition: String,
    pub settings: BTreeMap<String, SettingPayload>,
}

/// Wire form of one setting
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SettingPayload {
    pub value: Value,
    pub default: Value,
    #[serde(rename = "type")]
    pub kind: SettingType,
    pub display_code: String,
    #[serde(default)]
    pub mapping_key: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
    pub weight: f64,
    #[serde(default)]
    pub ingui: Option<String>,
    #[serde(default)]
    pub logarithmic: bool,
    #[serde(default)]
    pub client_side: bool,
    #[serde(default)]
    pub validation: ValidationPayload,
}

/// Validation with every part carried as an embedded JSON string
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ValidationPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapping: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<String>,
}

impl ValidationPayload {
    fn encode(validation: &Validation) -> Self {
        let embed = |v: &Value| serde_json::to_string(v).unwrap_or_default();
        let number = |n: Option<f64>| n.map(|n| embed(&Value::from(n)));

        match validation {
            Validation::None => Self::default(),
            Validation::Range(range) => Self {
                min: number(range.min),
                max: number(range.max),
                step: number(range.step),
                ..Self::default()
            },
            Validation::Mapping(map) => Self {
                mapping: Some(embed(&Value::Object(map.clone()))),
                ..Self::default()
            },
            Validation::Values(values) => Self {
                values: Some(embed(&Value::Array(values.clone()))),
                ..Self::default()
            },
        }
    }

    fn decode(&self) -> Result<Validation, serde_json::Error> {
        if let Some(mapping) = &self.mapping {
            return Ok(Validation::Mapping(serde_json::from_str::<Map<String, Value>>(mapping)?));
        }
        if let Some(values) = &self.values {
            return Ok(Validation::Values(serde_json::from_str::<Vec<Value>>(values)?));
        }

        let number = |part: &Option<String>| -> Result<Option<f64>, serde_json::Error> {
            part.as_deref().map(serde_json::from_str::<f64>).transpose()
        };
        let range = Range {
            min: number(&self.min)?,
            max: number(&self.max)?,
            step: number(&self.step)?,
        };
        if range == Range::default() {
            Ok(Validation::None)
        } else {
            Ok(Validation::Range(range))
        }
    }
}

impl From<&Setting> for SettingPayload {
    fn from(setting: &Setting) -> Self {
        Self {
            value: setting.value.clone(),
            default: setting.default.clone(),
            kind: setting.kind,
            display_code: setting.display_code.clone(),
            mapping_key: setting.mapping_key.clone(),
            comment: setting.comment.clone(),
            weight: setting.weight,
            ingui: setting.ingui.clone(),
            logarithmic: setting.logarithmic,
            client_side: setting.client_side,
            validation: ValidationPayload::encode(&setting.validation),
        }
    }
}

impl SettingPayload {
    /// Overwrite `setting` with the replicated state. Validation that fails to
    /// decode keeps the local rule.
    fn restore_into(&self, setting: &mut Setting) {
        match self.validation.decode() {
            Ok(validation) => setting.validation = validation,
            Err(e) => warn!(code = %setting.code, error = %e, "Malformed validation payload, keeping local rule"),
        }
        setting.kind = self.kind;
        setting.display_code = self.display_code.clone();
        setting.default = self.default.clone();
        setting.comment = self.comment.clone();
        setting.weight = self.weight;
        setting.ingui = self.ingui.clone();
        setting.logarithmic = self.logarithmic;
        setting.client_side = self.client_side;
        setting.value = self.value.clone();
        if self.mapping_key.is_some() {
            setting.mapping_key = self.mapping_key.clone();
        }
    }
}

impl From<&Config> for ConfigSnapshot {
    fn from(config: &Config) -> Self {
        Self {
            domain: config.domain().to_string(),
            definition: config.definition().to_string(),
            settings: config
                .settings()
                .iter()
                .map(|(code, setting)| (code.clone(), SettingPayload::from(setting)))
                .collect(),
        }
    }
}

impl ConfigSnapshot {
    /// Rebuild an equivalent config on the receiving side
    pub fn into_config(self, role: SessionRole) -> Config {
        let mut config = Config::new(&self.domain, &self.definition);

        for (code, payload) in &self.settings {
            let settings = config.settings_mut();
            match settings.get_mut(code) {
                Some(setting) => payload.restore_into(setting),
                None => {
                    warn!(domain = %self.domain, code = %code, "Snapshot carries a setting the definition lacks");
                    let mut setting = Setting::new(&self.domain, code, payload.kind, payload.default.clone());
                    payload.restore_into(&mut setting);
                    settings.insert(code.clone(), setting);
                }
            }
        }

        config.set_role(role);
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const DEFINITION: &str = r#"{
        "version": 1,
        "settings": {
            "float": { "rate": { "default": 1.5, "range": { "min": 0.5, "max": 3, "step": 0.5 }, "comment": "Spawn rate" } },
            "string": {
                "mode": { "default": "b", "mapping": { "a": 1, "b": 2 } },
                "skin": { "default": "red", "values": ["red", "blue"], "clientSide": true }
            }
        }
    }"#;

    #[test]
    fn test_snapshot_rebuilds_equivalent_config() {
        let mut server = Config::new("mod", DEFINITION);
        server.set_value("rate", json!(2.5));
        server.set_value("mode", json!("a"));

        let snapshot = ConfigSnapshot::from(&server);
        let wire = serde_json::to_string(&snapshot).unwrap();
        let received: ConfigSnapshot = serde_json::from_str(&wire).unwrap();
        assert_eq!(received, snapshot);

        let client = received.into_config(SessionRole::Client);
        assert_eq!(client.role(), SessionRole::Client);
        for (code, setting) in server.settings() {
            let mirrored = &client.settings()[code];
            assert_eq!(mirrored.value(), setting.value(), "{code}");
            assert_eq!(mirrored.validation(), setting.validation(), "{code}");
            assert_eq!(mirrored.mapping_key(), setting.mapping_key(), "{code}");
            assert_eq!(mirrored.comment(), setting.comment(), "{code}");
        }
        assert!(client.visible().contains_key("skin"));
        assert!(!client.visible().contains_key("rate"));
    }

    #[test]
    fn test_validation_parts_are_embedded_strings() {
        let server = Config::new("mod", DEFINITION);
        let snapshot = ConfigSnapshot::from(&server);

        let rate = &snapshot.settings["rate"].validation;
        assert_eq!(rate.min.as_deref(), Some("0.5"));
        assert_eq!(rate.max.as_deref(), Some("3.0"));
        assert_eq!(rate.step.as_deref(), Some("0.5"));
        assert!(rate.mapping.is_none());

        let mode = &snapshot.settings["mode"].validation;
        assert_eq!(mode.mapping.as_deref(), Some(r#"{"a":1,"b":2}"#));
    }

    #[test]
    fn test_request_wire_shape() {
        let req = SyncRequest::SetValue {
            domain: "mod".into(),
            code: "rate".into(),
            value: json!(2),
        };
        let wire = serde_json::to_value(&req).unwrap();
        assert_eq!(wire, json!({"SetValue": {"domain": "mod", "code": "rate", "value": 2}}));
    }
}
