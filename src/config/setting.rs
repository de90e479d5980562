//! One typed, validated configurable value
//!
//! A [`Setting`] owns its current value, its schema default and at most one
//! [`Validation`] rule. Every assignment goes through [`Setting::set_value`]
//! or [`Setting::set_mapping_key`], which is where validation and change
//! notification happen.

use std::fmt;
use std::sync::mpsc::Sender;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::ConfigEvent;
use crate::constants::math::EPSILON;
use crate::constants::weight;

/// Declared type of a setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingType {
    Boolean,
    Integer,
    Float,
    String,
    Color,
    Other,
    Constant,
    /// Placeholder for a setting whose entry failed to parse
    Invalid,
}

impl SettingType {
    /// Map a schema category to a type. `number` is the legacy spelling of `float`.
    pub fn from_category(category: &str) -> Option<Self> {
        match category {
            "boolean" => Some(SettingType::Boolean),
            "integer" => Some(SettingType::Integer),
            "float" | "number" => Some(SettingType::Float),
            "string" => Some(SettingType::String),
            "color" => Some(SettingType::Color),
            "other" => Some(SettingType::Other),
            _ => None,
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, SettingType::Integer | SettingType::Float)
    }

    /// Convert a loosely typed value (as read from a file or typed on the
    /// command line) to this type. Numbers are parsed culture-independently.
    pub fn coerce(self, raw: &Value) -> Option<Value> {
        match self {
            SettingType::Boolean => match raw {
                Value::Bool(b) => Some(Value::Bool(*b)),
                Value::Number(n) => n.as_f64().map(|f| Value::Bool(f.abs() > EPSILON)),
                Value::String(s) => parse_bool(s).map(Value::Bool),
                _ => None,
            },
            SettingType::Integer => match raw {
                Value::Number(n) => n
                    .as_i64()
                    .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))
                    .map(Value::from),
                Value::String(s) => {
                    let s = s.trim();
                    s.parse::<i64>()
                        .ok()
                        .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f as i64))
                        .map(Value::from)
                }
                Value::Bool(b) => Some(Value::from(i64::from(*b))),
                _ => None,
            },
            SettingType::Float => {
                let f = match raw {
                    Value::Number(n) => n.as_f64(),
                    Value::String(s) => s.trim().parse::<f64>().ok(),
                    Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
                    _ => None,
                }?;
                f.is_finite().then(|| Value::from(f))
            }
            SettingType::String | SettingType::Color => match raw {
                Value::String(s) => Some(Value::String(s.clone())),
                Value::Number(n) => Some(Value::String(n.to_string())),
                Value::Bool(b) => Some(Value::String(b.to_string())),
                _ => None,
            },
            SettingType::Other | SettingType::Constant | SettingType::Invalid => Some(raw.clone()),
        }
    }
}

impl fmt::Display for SettingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SettingType::Boolean => "boolean",
            SettingType::Integer => "integer",
            SettingType::Float => "float",
            SettingType::String => "string",
            SettingType::Color => "color",
            SettingType::Other => "other",
            SettingType::Constant => "constant",
            SettingType::Invalid => "invalid",
        };
        f.write_str(name)
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

/// Numeric bounds. Each part is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Range {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub step: Option<f64>,
}

impl Range {
    /// Clamp into `[min, max]`, then snap onto `min + k * step` without leaving the bounds
    pub fn constrain(&self, value: f64) -> f64 {
        let mut v = value;
        if let Some(min) = self.min {
            v = v.max(min);
        }
        if let Some(max) = self.max {
            v = v.min(max);
        }

        if let Some(step) = self.step.filter(|s| *s > 0.0 && s.is_finite()) {
            let base = self.min.unwrap_or(0.0);
            let mut k = ((v - base) / step).round();
            if self.min.is_some() && k < 0.0 {
                k = 0.0;
            }
            if let Some(max) = self.max
                && base + k * step > max
            {
                k -= 1.0;
            }
            v = base + k * step;
        }
        v
    }

    /// `from X to Y with step of Z`, or the parts that are declared
    pub fn hint(&self) -> Option<String> {
        let mut parts = Vec::new();
        if let Some(min) = self.min {
            parts.push(format!("from {min}"));
        }
        if let Some(max) = self.max {
            parts.push(format!("to {max}"));
        }
        if let Some(step) = self.step {
            parts.push(format!("with step of {step}"));
        }
        (!parts.is_empty()).then(|| parts.join(" "))
    }
}

/// At most one rule restricting what a setting may hold
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Validation {
    #[default]
    None,
    Range(Range),
    /// Display key -> live value. The file stores the key.
    Mapping(Map<String, Value>),
    /// Explicit allow-list
    Values(Vec<Value>),
}

impl Validation {
    /// Inline hint written after the value in the settings file
    pub fn hint(&self) -> Option<String> {
        match self {
            Validation::None => None,
            Validation::Range(range) => range.hint(),
            Validation::Mapping(map) => {
                Some(format!("value from: {}", map.keys().cloned().collect::<Vec<_>>().join(", ")))
            }
            Validation::Values(values) => Some(format!(
                "value from: {}",
                values.iter().map(display_scalar).collect::<Vec<_>>().join(", ")
            )),
        }
    }
}

/// Strings without quotes, everything else as JSON
pub fn display_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A configurable value belonging to one domain
#[derive(Debug, Clone)]
pub struct Setting {
    pub(crate) domain: String,
    pub(crate) code: String,
    pub(crate) display_code: String,
    pub(crate) kind: SettingType,
    pub(crate) value: Value,
    pub(crate) default: Value,
    pub(crate) validation: Validation,
    pub(crate) mapping_key: Option<String>,
    pub(crate) default_mapping_key: Option<String>,
    pub(crate) weight: f64,
    pub(crate) comment: Option<String>,
    pub(crate) ingui: Option<String>,
    pub(crate) client_side: bool,
    pub(crate) logarithmic: bool,
    events: Option<Sender<ConfigEvent>>,
}

impl Setting {
    /// A setting with no validation or metadata, holding its default
    pub fn new(domain: &str, code: &str, kind: SettingType, default: Value) -> Self {
        Self {
            domain: domain.to_string(),
            code: code.to_string(),
            display_code: code.to_string(),
            kind,
            value: default.clone(),
            default,
            validation: Validation::None,
            mapping_key: None,
            default_mapping_key: None,
            weight: weight::DEFAULT,
            comment: None,
            ingui: None,
            client_side: false,
            logarithmic: false,
            events: None,
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    /// Key used in the settings file
    pub fn display_code(&self) -> &str {
        &self.display_code
    }

    pub fn kind(&self) -> SettingType {
        self.kind
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn default_value(&self) -> &Value {
        &self.default
    }

    pub fn validation(&self) -> &Validation {
        &self.validation
    }

    /// Selected mapping key, for mapping-validated settings
    pub fn mapping_key(&self) -> Option<&str> {
        self.mapping_key.as_deref()
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    /// GUI label, falling back to the display code
    pub fn label(&self) -> &str {
        self.ingui.as_deref().unwrap_or(&self.display_code)
    }

    pub fn is_client_side(&self) -> bool {
        self.client_side
    }

    pub fn is_logarithmic(&self) -> bool {
        self.logarithmic
    }

    /// Copy that does not notify anyone
    pub(crate) fn detached(&self) -> Setting {
        let mut copy = self.clone();
        copy.events = None;
        copy
    }

    /// Route change notifications to `tx`
    pub(crate) fn attach(&mut self, tx: Sender<ConfigEvent>) {
        self.events = Some(tx);
    }

    /// Value as a formula operand: booleans are 0/1, numbers as-is, anything else is not numeric
    pub fn numeric_value(&self) -> Option<f64> {
        match &self.value {
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    /// What the settings file stores: the mapping key for mappings, the value otherwise
    pub fn file_value(&self) -> Value {
        match &self.mapping_key {
            Some(key) => Value::String(key.clone()),
            None => self.value.clone(),
        }
    }

    /// Assign a new value after type coercion and validation.
    ///
    /// Returns whether the stored value changed. Invalid values are logged and
    /// leave the setting untouched.
    pub fn set_value(&mut self, raw: Value) -> bool {
        if let Validation::Mapping(map) = &self.validation {
            // Accept either a key or one of the mapped values
            let key = match &raw {
                Value::String(s) if map.contains_key(s) => Some(s.clone()),
                _ => map.iter().find(|(_, v)| **v == raw).map(|(k, _)| k.clone()),
            };
            return match key {
                Some(key) => self.set_mapping_key(&key),
                None => {
                    warn!(domain = %self.domain, code = %self.code, value = %raw, "Value is not part of mapping, ignoring");
                    false
                }
            };
        }

        let Some(mut value) = self.kind.coerce(&raw) else {
            warn!(domain = %self.domain, code = %self.code, kind = %self.kind, value = %raw, "Value does not match setting type, ignoring");
            return false;
        };

        match &self.validation {
            Validation::Range(range) => {
                if let Some(f) = value.as_f64() {
                    let constrained = range.constrain(f);
                    value = match self.kind {
                        SettingType::Integer => Value::from(constrained.round() as i64),
                        _ => Value::from(constrained),
                    };
                }
            }
            Validation::Values(allowed) => {
                if !allowed.iter().any(|v| values_equal(v, &value)) {
                    warn!(domain = %self.domain, code = %self.code, value = %value, "Value is not in allowed list, ignoring");
                    return false;
                }
            }
            Validation::None | Validation::Mapping(_) => {}
        }

        self.replace(value)
    }

    /// Select a mapping key; the live value becomes the mapped value.
    /// Unknown keys are ignored and the previous value is kept.
    pub fn set_mapping_key(&mut self, key: &str) -> bool {
        let Validation::Mapping(map) = &self.validation else {
            warn!(domain = %self.domain, code = %self.code, "Setting has no mapping");
            return false;
        };
        let Some(mapped) = map.get(key).cloned() else {
            warn!(domain = %self.domain, code = %self.code, key = %key, "Unknown mapping key, keeping previous value");
            return false;
        };

        self.mapping_key = Some(key.to_string());
        self.replace(mapped)
    }

    /// Back to the schema default
    pub fn restore_default(&mut self) -> bool {
        match self.default_mapping_key.clone() {
            Some(key) => self.set_mapping_key(&key),
            None => {
                let default = self.default.clone();
                self.replace(default)
            }
        }
    }

    /// Swap in a new value; notify only when its serialized form differs
    fn replace(&mut self, value: Value) -> bool {
        if serialized(&self.value) == serialized(&value) {
            return false;
        }

        debug!(domain = %self.domain, code = %self.code, old = %self.value, new = %value, "Setting changed");
        self.value = value;

        if let Some(tx) = &self.events {
            // A dropped receiver just means nobody is listening anymore
            let _ = tx.send(ConfigEvent::SettingChanged {
                domain: self.domain.clone(),
                code: self.code.clone(),
                value: self.value.clone(),
            });
        }
        true
    }
}

fn serialized(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

/// Numbers compare by value so `2` and `2.0` are the same entry
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => (x - y).abs() <= EPSILON,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;
    use std::sync::mpsc;

    fn ranged(min: f64, max: f64, step: Option<f64>) -> Setting {
        let mut setting = Setting::new("mod", "speed", SettingType::Float, json!(min));
        setting.validation = Validation::Range(Range {
            min: Some(min),
            max: Some(max),
            step,
        });
        setting
    }

    fn mapped() -> Setting {
        let mut map = Map::new();
        map.insert("easy".to_string(), json!(0.5));
        map.insert("normal".to_string(), json!(1.0));
        map.insert("hard".to_string(), json!(2.0));
        let mut setting = Setting::new("mod", "difficulty", SettingType::String, json!(1.0));
        setting.validation = Validation::Mapping(map);
        setting.mapping_key = Some("normal".to_string());
        setting.default_mapping_key = Some("normal".to_string());
        setting
    }

    #[test]
    fn test_range_clamps_and_snaps() {
        let mut setting = ranged(0.0, 10.0, Some(2.5));
        setting.set_value(json!(11.0));
        assert_eq!(setting.value(), &json!(10.0));
        setting.set_value(json!(-4));
        assert_eq!(setting.value(), &json!(0.0));
        setting.set_value(json!(6.0));
        assert_eq!(setting.value(), &json!(5.0));
    }

    #[test]
    fn test_step_never_exceeds_max() {
        let mut setting = ranged(0.0, 1.0, Some(0.75));
        setting.set_value(json!(1.0));
        assert_eq!(setting.value(), &json!(0.75));
    }

    #[test]
    fn test_integer_range_rounds() {
        let mut setting = Setting::new("mod", "count", SettingType::Integer, json!(1));
        setting.validation = Validation::Range(Range {
            min: Some(1.0),
            max: Some(9.0),
            step: Some(2.0),
        });
        setting.set_value(json!("4"));
        assert_eq!(setting.value(), &json!(5));
    }

    #[test]
    fn test_string_coercion_is_culture_independent() {
        let mut setting = Setting::new("mod", "ratio", SettingType::Float, json!(0.0));
        assert!(setting.set_value(json!("1.25")));
        assert_eq!(setting.value(), &json!(1.25));
        assert!(!setting.set_value(json!("1,25")));
        assert_eq!(setting.value(), &json!(1.25));

        let mut flag = Setting::new("mod", "on", SettingType::Boolean, json!(false));
        assert!(flag.set_value(json!("TRUE")));
        assert_eq!(flag.value(), &json!(true));
    }

    #[test]
    fn test_values_list_rejects_outsiders() {
        let mut setting = Setting::new("mod", "mode", SettingType::String, json!("a"));
        setting.validation = Validation::Values(vec![json!("a"), json!("b")]);
        assert!(setting.set_value(json!("b")));
        assert!(!setting.set_value(json!("c")));
        assert_eq!(setting.value(), &json!("b"));
    }

    #[test]
    fn test_mapping_key_resolves_value() {
        let mut setting = mapped();
        assert!(setting.set_mapping_key("hard"));
        assert_eq!(setting.value(), &json!(2.0));
        assert_eq!(setting.mapping_key(), Some("hard"));
        assert_eq!(setting.file_value(), json!("hard"));
    }

    #[test]
    fn test_unknown_mapping_key_keeps_previous() {
        let mut setting = mapped();
        setting.set_mapping_key("easy");
        assert!(!setting.set_mapping_key("nightmare"));
        assert_eq!(setting.value(), &json!(0.5));
        assert_eq!(setting.mapping_key(), Some("easy"));
    }

    #[test]
    fn test_set_value_accepts_mapped_value() {
        let mut setting = mapped();
        assert!(setting.set_value(json!(0.5)));
        assert_eq!(setting.mapping_key(), Some("easy"));
    }

    #[test]
    fn test_restore_default_uses_default_key() {
        let mut setting = mapped();
        setting.set_mapping_key("hard");
        assert!(setting.restore_default());
        assert_eq!(setting.mapping_key(), Some("normal"));
        assert_eq!(setting.value(), &json!(1.0));
    }

    #[test]
    fn test_notification_fires_once_per_distinct_value() {
        let (tx, rx) = mpsc::channel();
        let mut setting = Setting::new("mod", "count", SettingType::Integer, json!(1));
        setting.attach(tx);

        assert!(setting.set_value(json!(2)));
        assert!(!setting.set_value(json!(2)));
        assert!(!setting.set_value(json!("2")));
        assert!(setting.set_value(json!(3)));

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[0],
            ConfigEvent::SettingChanged { code, value, .. } if code == "count" && *value == json!(2)
        ));
    }

    #[test]
    fn test_validation_hints() {
        let range = Validation::Range(Range {
            min: Some(0.0),
            max: Some(10.0),
            step: Some(0.5),
        });
        assert_eq!(range.hint().as_deref(), Some("from 0 to 10 with step of 0.5"));
        assert_eq!(mapped().validation().hint().as_deref(), Some("value from: easy, normal, hard"));
        let values = Validation::Values(vec![json!("x"), json!(2)]);
        assert_eq!(values.hint().as_deref(), Some("value from: x, 2"));
        assert_eq!(Validation::None.hint(), None);
    }

    #[test]
    fn test_numeric_value() {
        assert_eq!(Setting::new("m", "b", SettingType::Boolean, json!(true)).numeric_value(), Some(1.0));
        assert_eq!(Setting::new("m", "i", SettingType::Integer, json!(4)).numeric_value(), Some(4.0));
        assert_eq!(Setting::new("m", "s", SettingType::String, json!("4")).numeric_value(), None);
    }

    proptest! {
        #[test]
        fn prop_range_value_stays_on_grid(
            min in -1000.0f64..1000.0,
            span in 0.0f64..1000.0,
            step in 0.01f64..100.0,
            input in -5000.0f64..5000.0,
        ) {
            let range = Range { min: Some(min), max: Some(min + span), step: Some(step) };
            let v = range.constrain(input);
            prop_assert!(v >= min);
            prop_assert!(v <= min + span);
            let k = (v - min) / step;
            prop_assert!(k >= -1e-9);
            prop_assert!((k - k.round()).abs() < 1e-6);
        }
    }
}
