//! Asset patch engine
//!
//! The `patches` section of a definition is organized as
//! `category -> asset path -> in-asset address -> payload`. Parsing regroups
//! it per asset into [`AssetPatch`]es, each holding the [`ValuePatch`]es
//! that target that asset.
//!
//! Payloads by category:
//! - **boolean / integer / float / number**: a formula, evaluated with the
//!   previous value at the address bound as `value`
//! - **string / other**: a setting code to copy, or a `(cond) ? a : b` macro
//! - **const**: a literal JSON value

use std::collections::HashMap;
use std::fmt;
use std::ops::AddAssign;

use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::config::{Setting, display_scalar};
use crate::error::{PatchError, SchemaError};
use crate::expr::{
    BooleanContext, CombinedContext, Formula, MathContext, SettingsContext, ValueContext, is_truthy, resolve_ternary,
};
use crate::host::{AssetStore, SessionRole};
use crate::path::JsonPath;

/// Rule category, as named in the `patches` section
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchCategory {
    Boolean,
    Integer,
    Float,
    String,
    Other,
    Const,
}

impl PatchCategory {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "boolean" => Some(PatchCategory::Boolean),
            "integer" => Some(PatchCategory::Integer),
            "float" | "number" => Some(PatchCategory::Float),
            "string" => Some(PatchCategory::String),
            "other" => Some(PatchCategory::Other),
            "const" => Some(PatchCategory::Const),
            _ => None,
        }
    }

    /// Convert a formula result into the JSON this category writes
    fn from_number(self, x: f64) -> Result<Value, PatchError> {
        match self {
            PatchCategory::Boolean => Ok(Value::Bool(is_truthy(x))),
            PatchCategory::Integer if x.is_finite() => Ok(Value::from(x as i64)),
            PatchCategory::Integer | PatchCategory::Float => {
                serde_json::Number::from_f64(x).map(Value::Number).ok_or(PatchError::NotFinite(x))
            }
            // Textual categories never evaluate formulas
            PatchCategory::String | PatchCategory::Other | PatchCategory::Const => Ok(Value::from(x)),
        }
    }
}

impl fmt::Display for PatchCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PatchCategory::Boolean => "boolean",
            PatchCategory::Integer => "integer",
            PatchCategory::Float => "float",
            PatchCategory::String => "string",
            PatchCategory::Other => "other",
            PatchCategory::Const => "const",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub enum PatchRule {
    Formula(Formula),
    /// Setting code or ternary macro
    Text(String),
    Const(Value),
}

/// One address inside an asset and the rule producing its new value
#[derive(Debug, Clone)]
pub struct ValuePatch {
    pub path: JsonPath,
    pub category: PatchCategory,
    pub rule: PatchRule,
}

impl ValuePatch {
    pub fn new(category: PatchCategory, address: &str, payload: &Value) -> Result<Self, String> {
        let path = JsonPath::compile(address).map_err(|e| e.to_string())?;

        let rule = match category {
            PatchCategory::Const => PatchRule::Const(payload.clone()),
            PatchCategory::String | PatchCategory::Other => {
                let text = payload.as_str().ok_or("payload must be a string")?;
                PatchRule::Text(text.trim().to_string())
            }
            PatchCategory::Boolean | PatchCategory::Integer | PatchCategory::Float => {
                let text = match payload {
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    _ => return Err("payload must be a formula string".to_string()),
                };
                PatchRule::Formula(Formula::parse(&text).map_err(|e| e.to_string())?)
            }
        };

        Ok(Self { path, category, rule })
    }

    /// Write the new value at every addressed node. Returns how many were written.
    /// On error `doc` is untouched, including nodes the address would have created.
    pub fn apply_to(&self, doc: &mut Value, layers: &[&HashMap<String, Setting>]) -> Result<usize, PatchError> {
        let mut scratch = doc.clone();
        let written = self.write(&mut scratch, layers)?;
        *doc = scratch;
        Ok(written)
    }

    fn write(&self, doc: &mut Value, layers: &[&HashMap<String, Setting>]) -> Result<usize, PatchError> {
        let settings = SettingsContext::layered(layers.to_vec());
        let math = MathContext;
        let booleans = BooleanContext;

        let written = match &self.rule {
            PatchRule::Formula(formula) => {
                let targets = self.path.get_or_create(doc);

                // Every target sees its own previous value, not a sibling's result
                let mut results = Vec::with_capacity(targets.len());
                for slot in &targets {
                    let previous = ValueContext::new(numeric(slot));
                    let ctx = CombinedContext::new(vec![&previous, &settings, &math, &booleans]);
                    let x = formula.evaluate(&ctx)?;
                    results.push(self.category.from_number(x)?);
                }

                let count = results.len();
                for (slot, value) in targets.into_iter().zip(results) {
                    *slot = value;
                }
                count
            }
            PatchRule::Text(payload) => {
                let ctx = CombinedContext::new(vec![&settings, &math, &booleans]);
                let value = match resolve_ternary(payload, &ctx)? {
                    Some(literal) => self.literal(literal),
                    None => {
                        let setting = lookup(layers, payload).ok_or_else(|| PatchError::UnknownSetting(payload.clone()))?;
                        match self.category {
                            PatchCategory::String => Value::String(display_scalar(setting.value())),
                            _ => setting.value().clone(),
                        }
                    }
                };
                self.path.set(doc, value)
            }
            PatchRule::Const(value) => self.path.set(doc, value.clone()),
        };

        if written == 0 {
            return Err(PatchError::NoTarget(self.path.to_string()));
        }
        Ok(written)
    }

    fn literal(&self, text: String) -> Value {
        match self.category {
            PatchCategory::Other => serde_json::from_str(&text).unwrap_or(Value::String(text)),
            _ => Value::String(text),
        }
    }
}

fn numeric(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::Bool(b) => f64::from(u8::from(*b)),
        Value::String(s) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn lookup<'a>(layers: &[&'a HashMap<String, Setting>], code: &str) -> Option<&'a Setting> {
    layers.iter().find_map(|layer| layer.get(code))
}

/// Counts accumulated while applying patches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub assets_patched: usize,
    pub assets_skipped: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl AddAssign for ApplyReport {
    fn add_assign(&mut self, rhs: Self) {
        self.assets_patched += rhs.assets_patched;
        self.assets_skipped += rhs.assets_skipped;
        self.succeeded += rhs.succeeded;
        self.failed += rhs.failed;
    }
}

/// All value patches targeting one asset
#[derive(Debug, Clone)]
pub struct AssetPatch {
    pub asset: String,
    pub patches: Vec<ValuePatch>,
}

impl AssetPatch {
    pub fn new(asset: &str) -> Self {
        Self {
            asset: asset.to_string(),
            patches: Vec::new(),
        }
    }

    /// Patch the asset in `store`. Individual failures are counted, never fatal.
    pub fn apply(
        &self,
        layers: &[&HashMap<String, Setting>],
        store: &mut dyn AssetStore,
        role: SessionRole,
    ) -> ApplyReport {
        let mut report = ApplyReport::default();
        let asset = self.asset.as_str();

        if role == SessionRole::Client && store.server_only(asset) {
            debug!(asset = %asset, "Skipping server-only asset on client");
            report.assets_skipped = 1;
            return report;
        }

        let bytes = match store.get(asset) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                warn!(asset = %asset, "Patch target not found, skipping");
                report.assets_skipped = 1;
                return report;
            }
            Err(e) => {
                warn!(asset = %asset, error = ?e, "Failed to read patch target, skipping");
                report.assets_skipped = 1;
                return report;
            }
        };

        let mut doc: Value = match serde_json::from_slice(&bytes) {
            Ok(doc) => doc,
            Err(e) => {
                warn!(asset = %asset, error = %e, "Patch target is not valid JSON, skipping");
                report.assets_skipped = 1;
                return report;
            }
        };

        for patch in &self.patches {
            match patch.apply_to(&mut doc, layers) {
                Ok(count) => {
                    debug!(asset = %asset, path = %patch.path, count, "Applied patch");
                    report.succeeded += 1;
                }
                Err(e) => {
                    warn!(asset = %asset, path = %patch.path, category = %patch.category, error = %e, "Patch failed");
                    report.failed += 1;
                }
            }
        }

        if report.succeeded == 0 {
            report.assets_skipped = 1;
            return report;
        }

        let written = serde_json::to_vec_pretty(&doc)
            .map_err(anyhow::Error::from)
            .and_then(|bytes| store.set(asset, bytes));
        match written {
            Ok(()) => report.assets_patched = 1,
            Err(e) => {
                error!(asset = %asset, error = ?e, "Failed to write patched asset");
                report.assets_skipped = 1;
            }
        }
        report
    }
}

/// Apply every asset patch and log the totals
pub fn apply_all(
    domain: &str,
    patches: &[AssetPatch],
    layers: &[&HashMap<String, Setting>],
    store: &mut dyn AssetStore,
    role: SessionRole,
) -> ApplyReport {
    let mut total = ApplyReport::default();
    for patch in patches {
        total += patch.apply(layers, store, role);
    }

    info!(
        domain = %domain,
        assets_patched = total.assets_patched,
        assets_skipped = total.assets_skipped,
        succeeded = total.succeeded,
        failed = total.failed,
        "Applied asset patches"
    );
    total
}

/// Build asset patches from a definition's `patches` section, grouped per
/// asset in first-seen order
pub fn parse_patches(section: &Value) -> Result<Vec<AssetPatch>, SchemaError> {
    let categories = section
        .as_object()
        .ok_or_else(|| SchemaError::NotAnObject("patches".to_string()))?;

    let mut assets: Vec<AssetPatch> = Vec::new();

    for (name, targets) in categories {
        let category = PatchCategory::parse(name).ok_or_else(|| SchemaError::UnknownPatchCategory(name.clone()))?;
        let targets = targets
            .as_object()
            .ok_or_else(|| SchemaError::NotAnObject(format!("patches category '{name}'")))?;

        for (asset, rules) in targets {
            let rules = rules
                .as_object()
                .ok_or_else(|| SchemaError::NotAnObject(format!("patches for '{asset}'")))?;

            let index = match assets.iter().position(|a| a.asset == *asset) {
                Some(index) => index,
                None => {
                    assets.push(AssetPatch::new(asset));
                    assets.len() - 1
                }
            };

            for (key, payload) in rules {
                let patch = ValuePatch::new(category, key, payload).map_err(|reason| SchemaError::InvalidPatch {
                    asset: asset.clone(),
                    key: key.clone(),
                    reason,
                })?;
                assets[index].patches.push(patch);
            }
        }
    }

    Ok(assets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SettingType;
    use crate::host::MemoryAssetStore;
    use serde_json::json;

    fn settings() -> HashMap<String, Setting> {
        let mut map = HashMap::new();
        for setting in [
            Setting::new("mod", "multiplier", SettingType::Float, json!(2.0)),
            Setting::new("mod", "enableFeature", SettingType::Boolean, json!(true)),
            Setting::new("mod", "title", SettingType::String, json!("Iron Sword")),
            Setting::new("mod", "drops", SettingType::Other, json!(["a", "b"])),
        ] {
            map.insert(setting.code().to_string(), setting);
        }
        map
    }

    fn single(category: &str, asset: &str, key: &str, payload: Value) -> AssetPatch {
        let section = json!({ category: { asset: { key: payload } } });
        parse_patches(&section).unwrap().remove(0)
    }

    #[test]
    fn test_integer_formula_truncates() {
        let settings = settings();
        let mut store = MemoryAssetStore::new();
        store.insert("sword.json", r#"{"dmg": 5}"#);

        let patch = single("integer", "sword.json", "dmg", json!("value * multiplier"));
        let report = patch.apply(&[&settings], &mut store, SessionRole::Standalone);

        assert_eq!(report, ApplyReport { assets_patched: 1, assets_skipped: 0, succeeded: 1, failed: 0 });
        assert_eq!(store.json("sword.json").unwrap(), json!({"dmg": 10}));
    }

    #[test]
    fn test_integer_narrowing_is_truncation() {
        let settings = settings();
        let mut doc = json!({"n": 0});
        let patch = ValuePatch::new(PatchCategory::Integer, "n", &json!("2.9")).unwrap();
        patch.apply_to(&mut doc, &[&settings]).unwrap();
        assert_eq!(doc, json!({"n": 2}));

        let patch = ValuePatch::new(PatchCategory::Integer, "n", &json!("-2.9")).unwrap();
        patch.apply_to(&mut doc, &[&settings]).unwrap();
        assert_eq!(doc, json!({"n": -2}));
    }

    #[test]
    fn test_float_and_boolean_categories() {
        let settings = settings();
        let mut doc = json!({"speed": 1.5, "flag": false});

        ValuePatch::new(PatchCategory::Float, "speed", &json!("value * multiplier"))
            .unwrap()
            .apply_to(&mut doc, &[&settings])
            .unwrap();
        ValuePatch::new(PatchCategory::Boolean, "flag", &json!("enableFeature"))
            .unwrap()
            .apply_to(&mut doc, &[&settings])
            .unwrap();

        assert_eq!(doc, json!({"speed": 3.0, "flag": true}));
    }

    #[test]
    fn test_missing_key_is_created() {
        let settings = settings();
        let mut doc = json!({"stats": {}});
        ValuePatch::new(PatchCategory::Float, "stats/bonus", &json!("value + 1"))
            .unwrap()
            .apply_to(&mut doc, &[&settings])
            .unwrap();
        assert_eq!(doc, json!({"stats": {"bonus": 1.0}}));
    }

    #[test]
    fn test_string_copies_setting_or_resolves_ternary() {
        let settings = settings();
        let mut doc = json!({"name": "", "tier": ""});

        ValuePatch::new(PatchCategory::String, "name", &json!("title"))
            .unwrap()
            .apply_to(&mut doc, &[&settings])
            .unwrap();
        ValuePatch::new(PatchCategory::String, "tier", &json!("(enableFeature) ? gold : iron"))
            .unwrap()
            .apply_to(&mut doc, &[&settings])
            .unwrap();

        assert_eq!(doc, json!({"name": "Iron Sword", "tier": "gold"}));
    }

    #[test]
    fn test_other_and_const() {
        let settings = settings();
        let mut doc = json!({});

        ValuePatch::new(PatchCategory::Other, "loot", &json!("drops"))
            .unwrap()
            .apply_to(&mut doc, &[&settings])
            .unwrap();
        ValuePatch::new(PatchCategory::Other, "extra", &json!("(multiplier > 1) ? [1, 2] : []"))
            .unwrap()
            .apply_to(&mut doc, &[&settings])
            .unwrap();
        ValuePatch::new(PatchCategory::Const, "version", &json!({"major": 2}))
            .unwrap()
            .apply_to(&mut doc, &[&settings])
            .unwrap();

        assert_eq!(doc, json!({"loot": ["a", "b"], "extra": [1, 2], "version": {"major": 2}}));
    }

    #[test]
    fn test_failing_patch_does_not_abort_siblings() {
        let settings = settings();
        let mut store = MemoryAssetStore::new();
        store.insert("unit.json", r#"{"hp": 10, "armor": 2}"#);

        let section = json!({
            "integer": { "unit.json": { "hp": "value * missing", "armor": "value * multiplier" } }
        });
        let patches = parse_patches(&section).unwrap();
        let report = apply_all("mod", &patches, &[&settings], &mut store, SessionRole::Standalone);

        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(store.json("unit.json").unwrap(), json!({"hp": 10, "armor": 4}));
    }

    #[test]
    fn test_failed_patch_does_not_create_its_target() {
        let settings = settings();
        let mut store = MemoryAssetStore::new();
        store.insert("unit.json", r#"{"hp": 10}"#);

        let section = json!({
            "integer": { "unit.json": { "bonus": "value * missing", "hp": "value * multiplier" } }
        });
        let patches = parse_patches(&section).unwrap();
        let report = apply_all("mod", &patches, &[&settings], &mut store, SessionRole::Standalone);

        assert_eq!((report.succeeded, report.failed), (1, 1));
        assert_eq!(store.json("unit.json").unwrap(), json!({"hp": 20}));

        let mut doc = json!({"hp": 10});
        let err = ValuePatch::new(PatchCategory::String, "stats/label", &json!("unknownSetting"))
            .unwrap()
            .apply_to(&mut doc, &[&settings])
            .unwrap_err();
        assert!(matches!(err, PatchError::UnknownSetting(code) if code == "unknownSetting"));
        assert_eq!(doc, json!({"hp": 10}));
    }

    #[test]
    fn test_other_ternary_with_object_literal() {
        let settings = settings();
        let mut doc = json!({});
        ValuePatch::new(PatchCategory::Other, "extra", &json!(r#"(multiplier > 1) ? {"a": 1, "tags": ["x:y"]} : {}"#))
            .unwrap()
            .apply_to(&mut doc, &[&settings])
            .unwrap();
        assert_eq!(doc, json!({"extra": {"a": 1, "tags": ["x:y"]}}));
    }

    #[test]
    fn test_skips_missing_unparsable_and_server_only_assets() {
        let settings = settings();
        let mut store = MemoryAssetStore::new();
        store.insert("broken.json", "{not json");
        store.insert("loot.json", r#"{"n": 1}"#);
        store.mark_server_only("loot.json");

        let section = json!({
            "integer": {
                "absent.json": { "n": "1" },
                "broken.json": { "n": "1" },
                "loot.json": { "n": "5" }
            }
        });
        let patches = parse_patches(&section).unwrap();

        let client = apply_all("mod", &patches, &[&settings], &mut store, SessionRole::Client);
        assert_eq!(client.assets_skipped, 3);
        assert_eq!(client.assets_patched, 0);
        assert_eq!(store.json("loot.json").unwrap(), json!({"n": 1}));

        let server = apply_all("mod", &patches, &[&settings], &mut store, SessionRole::Server);
        assert_eq!(server.assets_patched, 1);
        assert_eq!(store.json("loot.json").unwrap(), json!({"n": 5}));
    }

    #[test]
    fn test_patches_grouped_per_asset() {
        let section = json!({
            "integer": { "a.json": { "x": "1" }, "b.json": { "y": "2" } },
            "const": { "a.json": { "z": [1] } }
        });
        let patches = parse_patches(&section).unwrap();
        assert_eq!(patches.len(), 2);
        assert_eq!(patches[0].asset, "a.json");
        assert_eq!(patches[0].patches.len(), 2);
        assert_eq!(patches[1].patches[0].category, PatchCategory::Integer);
    }

    #[test]
    fn test_schema_errors() {
        assert!(matches!(
            parse_patches(&json!({"weird": {}})),
            Err(SchemaError::UnknownPatchCategory(name)) if name == "weird"
        ));
        assert!(matches!(
            parse_patches(&json!({"float": {"a.json": {"x": "1 +"}}})),
            Err(SchemaError::InvalidPatch { .. })
        ));
    }

    #[test]
    fn test_wildcard_patch_uses_each_previous_value() {
        let settings = settings();
        let mut doc = json!({"units": {"archer": {"hp": 3}, "knight": {"hp": 7}}});
        let count = ValuePatch::new(PatchCategory::Integer, "units/@@*/hp", &json!("value * multiplier"))
            .unwrap()
            .apply_to(&mut doc, &[&settings])
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(doc, json!({"units": {"archer": {"hp": 6}, "knight": {"hp": 14}}}));
    }
}
