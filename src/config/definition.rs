//! Schema definition parsing
//!
//! A definition is a JSON document with these top-level keys:
//! - **version**: integer, `-1` or absent disables the file version check
//! - **settings**: category (`boolean`, `integer`, `float`/`number`, `string`,
//!   `color`, `other`) -> setting code -> entry
//! - **formatting**: cosmetic blocks (`separator`, `blank`) placed by weight
//! - **patches**: rule category -> asset path -> in-asset address -> payload
//! - **file**: optional settings file name (`.json` selects the JSON format)

use std::collections::HashMap;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::setting::{Range, Setting, SettingType, Validation, display_scalar};
use crate::constants::{schema, settings_file, weight};
use crate::error::SchemaError;
use crate::patch::{self, AssetPatch};

/// One entry of the weight-ordered layout
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub weight: f64,
    pub kind: BlockKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BlockKind {
    /// A setting, by code
    Setting(String),
    Separator { title: Option<String>, text: Option<String> },
    Blank,
}

/// On-disk settings format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    /// Comment-annotated YAML document
    Yaml,
    /// Flat JSON object, selected by a `.json` file name
    Json,
}

impl FileFormat {
    pub fn for_file(name: &str) -> Self {
        if name.to_ascii_lowercase().ends_with(".json") {
            FileFormat::Json
        } else {
            FileFormat::Yaml
        }
    }
}

/// Everything a definition declares, ready to be owned by a `Config`
#[derive(Debug, Clone)]
pub struct Definition {
    pub version: i64,
    pub file: String,
    pub format: FileFormat,
    pub settings: HashMap<String, Setting>,
    pub blocks: Vec<Block>,
    pub patches: Vec<AssetPatch>,
}

/// Default settings file name for a domain
pub fn default_file_name(domain: &str) -> String {
    format!("{domain}.{}", settings_file::DEFAULT_EXTENSION)
}

/// Parse a definition document for `domain`
pub fn parse_definition(domain: &str, source: &str) -> Result<Definition, SchemaError> {
    let root: Value = serde_json::from_str(source)?;
    let root = root
        .as_object()
        .ok_or_else(|| SchemaError::NotAnObject(format!("definition '{domain}'")))?;

    let version = match root.get(schema::VERSION) {
        None | Some(Value::Null) => schema::UNVERSIONED,
        Some(v) => v.as_i64().ok_or_else(|| SchemaError::InvalidField {
            code: domain.to_string(),
            field: "version",
            reason: format!("expected an integer, got {v}"),
        })?,
    };

    let file = match root.get(schema::FILE) {
        Some(Value::String(name)) if !name.trim().is_empty() => name.trim().to_string(),
        _ => default_file_name(domain),
    };

    let mut settings = HashMap::new();
    let mut blocks = Vec::new();

    if let Some(categories) = root.get(schema::SETTINGS) {
        let categories = categories
            .as_object()
            .ok_or_else(|| SchemaError::NotAnObject(schema::SETTINGS.to_string()))?;

        // Fixed category order keeps declaration order deterministic
        for category in schema::CATEGORIES {
            let Some(entries) = categories.get(*category) else {
                continue;
            };
            let kind = SettingType::from_category(category)
                .ok_or_else(|| SchemaError::NotAnObject(category.to_string()))?;
            let entries = entries
                .as_object()
                .ok_or_else(|| SchemaError::NotAnObject(format!("settings category '{category}'")))?;

            for (code, entry) in entries {
                let setting = parse_setting(domain, code, kind, entry)?;
                blocks.push(Block {
                    weight: setting.weight,
                    kind: BlockKind::Setting(code.clone()),
                });
                settings.insert(code.clone(), setting);
            }
        }

        for category in categories.keys() {
            if !schema::CATEGORIES.contains(&category.as_str()) {
                debug!(domain = %domain, category = %category, "Ignoring unknown settings category");
            }
        }
    }

    if let Some(formatting) = root.get(schema::FORMATTING) {
        let formatting = formatting
            .as_array()
            .ok_or_else(|| SchemaError::NotAnObject(schema::FORMATTING.to_string()))?;
        for (index, entry) in formatting.iter().enumerate() {
            blocks.push(parse_formatting(index, entry)?);
        }
    }

    resolve_collisions(&mut blocks);
    blocks.sort_by(|a, b| a.weight.total_cmp(&b.weight));

    for block in &blocks {
        if let BlockKind::Setting(code) = &block.kind
            && let Some(setting) = settings.get_mut(code)
        {
            setting.weight = block.weight;
        }
    }

    let patches = match root.get(schema::PATCHES) {
        Some(section) => patch::parse_patches(section)?,
        None => Vec::new(),
    };

    Ok(Definition {
        version,
        format: FileFormat::for_file(&file),
        file,
        settings,
        blocks,
        patches,
    })
}

fn parse_setting(domain: &str, code: &str, kind: SettingType, entry: &Value) -> Result<Setting, SchemaError> {
    let entry = entry
        .as_object()
        .ok_or_else(|| SchemaError::NotAnObject(format!("setting '{code}'")))?;

    let default = entry
        .get("default")
        .ok_or_else(|| SchemaError::MissingDefault { code: code.to_string() })?;

    let declared = ["mapping", "range", "values"]
        .iter()
        .filter(|key| entry.get(**key).is_some_and(|v| !v.is_null()))
        .count();
    if declared > 1 {
        return Err(SchemaError::ConflictingValidation { code: code.to_string() });
    }

    let invalid = |field: &'static str, reason: String| SchemaError::InvalidField {
        code: code.to_string(),
        field,
        reason,
    };

    let has_mapping = entry.get("mapping").is_some_and(|v| !v.is_null());
    // A mapping default is a key, not a value of the declared type
    let initial = if has_mapping {
        default.clone()
    } else {
        kind.coerce(default)
            .ok_or_else(|| invalid("default", format!("{default} is not a valid {kind}")))?
    };
    let mut setting = Setting::new(domain, code, kind, initial);

    if let Some(name) = entry.get("name").and_then(Value::as_str) {
        setting.display_code = name.to_string();
    }
    setting.comment = entry.get("comment").and_then(Value::as_str).map(str::to_string);
    setting.ingui = entry.get("ingui").and_then(Value::as_str).map(str::to_string);
    setting.client_side = entry.get("clientSide").and_then(Value::as_bool).unwrap_or(false);
    setting.logarithmic = entry.get("logarithmic").and_then(Value::as_bool).unwrap_or(false);
    setting.weight = match entry.get("weight") {
        None | Some(Value::Null) => weight::DEFAULT,
        Some(v) => v
            .as_f64()
            .filter(|w| w.is_finite())
            .ok_or_else(|| invalid("weight", format!("expected a number, got {v}")))?,
    };

    if let Some(mapping) = entry.get("mapping").filter(|v| !v.is_null()) {
        let mapping = mapping
            .as_object()
            .ok_or_else(|| invalid("mapping", "expected an object".to_string()))?;
        let key = display_scalar(default);
        let Some(mapped) = mapping.get(&key) else {
            return Err(SchemaError::MappingDefault {
                code: code.to_string(),
                key,
            });
        };
        setting.value = mapped.clone();
        setting.default = mapped.clone();
        setting.mapping_key = Some(key.clone());
        setting.default_mapping_key = Some(key);
        setting.validation = Validation::Mapping(mapping.clone());
    } else if let Some(range) = entry.get("range").filter(|v| !v.is_null()) {
        let range_obj = range
            .as_object()
            .ok_or_else(|| invalid("range", "expected an object".to_string()))?;
        let range = parse_range(range_obj).map_err(|reason| invalid("range", reason))?;
        if range_obj.get("logarithmic").and_then(Value::as_bool).unwrap_or(false) {
            setting.logarithmic = true;
        }
        if !kind.is_numeric() {
            return Err(invalid("range", format!("not applicable to {kind} settings")));
        }
        // Integer steps must land on whole numbers
        if kind == SettingType::Integer
            && let Some(step) = range.step
        {
            if step.fract() != 0.0 {
                return Err(invalid("range", format!("step {step} is not a whole number")));
            }
            if let Some(min) = range.min.filter(|min| min.fract() != 0.0) {
                return Err(invalid("range", format!("min {min} is not a whole number")));
            }
        }
        setting.validation = Validation::Range(range);
        constrain_default(&mut setting);
    } else if let Some(values) = entry.get("values").filter(|v| !v.is_null()) {
        let values = values
            .as_array()
            .ok_or_else(|| invalid("values", "expected an array".to_string()))?;
        if !values.contains(&setting.default) && !values.iter().any(|v| kind.coerce(v).as_ref() == Some(&setting.default)) {
            return Err(invalid("default", format!("{} is not one of the allowed values", setting.default)));
        }
        setting.validation = Validation::Values(values.clone());
    }

    Ok(setting)
}

fn parse_range(obj: &Map<String, Value>) -> Result<Range, String> {
    let bound = |key: &str| -> Result<Option<f64>, String> {
        match obj.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => v
                .as_f64()
                .filter(|f| f.is_finite())
                .map(Some)
                .ok_or_else(|| format!("{key} must be a finite number, got {v}")),
        }
    };

    let range = Range {
        min: bound("min")?,
        max: bound("max")?,
        step: bound("step")?,
    };

    if let (Some(min), Some(max)) = (range.min, range.max)
        && min > max
    {
        return Err(format!("min {min} is greater than max {max}"));
    }
    if let Some(step) = range.step
        && step <= 0.0
    {
        return Err(format!("step must be positive, got {step}"));
    }
    Ok(range)
}

/// Keep the default itself inside its range
fn constrain_default(setting: &mut Setting) {
    let Validation::Range(range) = &setting.validation else {
        return;
    };
    let Some(f) = setting.default.as_f64() else {
        return;
    };

    let constrained = range.constrain(f);
    if constrained != f {
        debug!(code = %setting.code, default = f, constrained, "Default adjusted to its range");
    }
    let value = match setting.kind {
        SettingType::Integer => Value::from(constrained.round() as i64),
        _ => Value::from(constrained),
    };
    setting.default = value.clone();
    setting.value = value;
}

fn parse_formatting(index: usize, entry: &Value) -> Result<Block, SchemaError> {
    let invalid = |reason: &str| SchemaError::InvalidFormatting {
        index,
        reason: reason.to_string(),
    };

    let entry = entry.as_object().ok_or_else(|| invalid("expected an object"))?;
    let weight = match entry.get("weight") {
        None | Some(Value::Null) => weight::DEFAULT,
        Some(v) => v
            .as_f64()
            .filter(|w| w.is_finite())
            .ok_or_else(|| invalid("weight must be a number"))?,
    };
    let text_of = |key: &str| entry.get(key).and_then(Value::as_str).map(str::to_string);

    let kind = match entry.get("type").and_then(Value::as_str) {
        Some("separator") => BlockKind::Separator {
            title: text_of("title"),
            text: text_of("text"),
        },
        Some("blank") => BlockKind::Blank,
        Some(_) => return Err(invalid("unknown block type")),
        None => return Err(invalid("missing type")),
    };

    Ok(Block { weight, kind })
}

/// Make weights pairwise distinct. Each collision, in first-seen order, adds a
/// strictly larger multiple of the collision step so declaration order wins ties.
pub fn resolve_collisions(blocks: &mut [Block]) {
    let mut seen: Vec<f64> = Vec::with_capacity(blocks.len());
    let mut collisions = 0u32;

    for block in blocks.iter_mut() {
        while seen.contains(&block.weight) {
            collisions = collisions.saturating_add(1);
            let mut bumped = block.weight + weight::COLLISION_STEP * f64::from(collisions);
            // Step lost to rounding at large magnitudes
            if bumped <= block.weight {
                bumped = block.weight.next_up();
            }
            if !bumped.is_finite() {
                warn!(weight = block.weight, "No larger weight left to break a tie");
                break;
            }
            block.weight = bumped;
        }
        seen.push(block.weight);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const DEFINITION: &str = r#"{
        "version": 3,
        "settings": {
            "boolean": {
                "enableFeature": { "default": true, "comment": "Turns the feature on" }
            },
            "float": {
                "multiplier": { "default": 2.0, "range": { "min": 0.5, "max": 4, "step": 0.5 }, "weight": 1 }
            },
            "string": {
                "difficulty": { "default": "normal", "mapping": { "easy": 0.5, "normal": 1, "hard": 2 }, "name": "Difficulty" }
            }
        },
        "formatting": [
            { "type": "separator", "title": "General", "weight": -1 }
        ]
    }"#;

    #[test]
    fn test_parses_settings_and_metadata() {
        let def = parse_definition("mymod", DEFINITION).unwrap();
        assert_eq!(def.version, 3);
        assert_eq!(def.file, "mymod.yaml");
        assert_eq!(def.format, FileFormat::Yaml);

        let multiplier = &def.settings["multiplier"];
        assert_eq!(multiplier.kind(), SettingType::Float);
        assert_eq!(multiplier.value(), &json!(2.0));

        let enable = &def.settings["enableFeature"];
        assert_eq!(enable.comment(), Some("Turns the feature on"));
    }

    #[test]
    fn test_mapping_default_is_resolved() {
        let def = parse_definition("mymod", DEFINITION).unwrap();
        let difficulty = &def.settings["difficulty"];
        assert_eq!(difficulty.value(), &json!(1));
        assert_eq!(difficulty.mapping_key(), Some("normal"));
        assert_eq!(difficulty.display_code(), "Difficulty");
        assert_eq!(difficulty.file_value(), json!("normal"));
    }

    #[test]
    fn test_blocks_ordered_by_weight() {
        let def = parse_definition("mymod", DEFINITION).unwrap();
        let order: Vec<String> = def
            .blocks
            .iter()
            .map(|b| match &b.kind {
                BlockKind::Setting(code) => code.clone(),
                BlockKind::Separator { .. } => "<sep>".to_string(),
                BlockKind::Blank => "<blank>".to_string(),
            })
            .collect();
        assert_eq!(order, vec!["<sep>", "enableFeature", "difficulty", "multiplier"]);
    }

    #[test]
    fn test_equal_weights_keep_declaration_order() {
        let mut blocks = vec![
            Block { weight: 0.0, kind: BlockKind::Setting("first".into()) },
            Block { weight: 0.0, kind: BlockKind::Setting("second".into()) },
            Block { weight: 0.0, kind: BlockKind::Blank },
        ];
        resolve_collisions(&mut blocks);
        assert!(blocks[0].weight < blocks[1].weight);
        assert!(blocks[1].weight < blocks[2].weight);

        let mut sorted = blocks.clone();
        sorted.sort_by(|a, b| a.weight.total_cmp(&b.weight));
        assert_eq!(sorted, blocks);
    }

    #[test]
    fn test_collisions_at_huge_weights_terminate() {
        let mut blocks = vec![
            Block { weight: 1e300, kind: BlockKind::Setting("first".into()) },
            Block { weight: 1e300, kind: BlockKind::Setting("second".into()) },
            Block { weight: 1e300, kind: BlockKind::Blank },
        ];
        resolve_collisions(&mut blocks);
        assert!(blocks[0].weight < blocks[1].weight);
        assert!(blocks[1].weight < blocks[2].weight);

        let mut top = vec![
            Block { weight: f64::MAX, kind: BlockKind::Blank },
            Block { weight: f64::MAX, kind: BlockKind::Blank },
        ];
        resolve_collisions(&mut top);
        assert_eq!(top[1].weight, f64::MAX);
    }

    #[test]
    fn test_integer_range_needs_whole_steps() {
        let src = r#"{"settings": {"integer": {"count": {"default": 0, "range": {"min": 0, "max": 10, "step": 2.5}}}}}"#;
        let err = parse_definition("m", src).unwrap_err();
        assert!(matches!(err, SchemaError::InvalidField { code, field: "range", .. } if code == "count"));

        let src = r#"{"settings": {"integer": {"count": {"default": 1, "range": {"min": 0.5, "max": 10, "step": 2}}}}}"#;
        assert!(parse_definition("m", src).is_err());

        let src = r#"{"settings": {"float": {"ratio": {"default": 0, "range": {"min": 0, "max": 10, "step": 2.5}}}}}"#;
        assert!(parse_definition("m", src).is_ok());
    }

    #[test]
    fn test_missing_default_names_setting() {
        let err = parse_definition("m", r#"{"settings": {"integer": {"count": {"range": {"min": 0}}}}}"#).unwrap_err();
        assert!(matches!(err, SchemaError::MissingDefault { code } if code == "count"));
    }

    #[test]
    fn test_conflicting_validation_rejected() {
        let src = r#"{"settings": {"integer": {"count": {"default": 1, "range": {}, "values": [1]}}}}"#;
        assert!(matches!(parse_definition("m", src), Err(SchemaError::ConflictingValidation { .. })));
    }

    #[test]
    fn test_mapping_default_must_be_a_key() {
        let src = r#"{"settings": {"string": {"mode": {"default": "x", "mapping": {"a": 1}}}}}"#;
        assert!(matches!(parse_definition("m", src), Err(SchemaError::MappingDefault { .. })));
    }

    #[test]
    fn test_number_is_float_alias() {
        let def = parse_definition("m", r#"{"settings": {"number": {"speed": {"default": 1}}}}"#).unwrap();
        assert_eq!(def.settings["speed"].kind(), SettingType::Float);
        assert_eq!(def.settings["speed"].value(), &json!(1.0));
        assert_eq!(def.version, schema::UNVERSIONED);
    }

    #[test]
    fn test_out_of_range_default_is_constrained() {
        let src = r#"{"settings": {"integer": {"count": {"default": 50, "range": {"min": 0, "max": 10}}}}}"#;
        let def = parse_definition("m", src).unwrap();
        assert_eq!(def.settings["count"].value(), &json!(10));
    }

    #[test]
    fn test_json_file_selects_json_format() {
        let def = parse_definition("m", r#"{"file": "custom.json"}"#).unwrap();
        assert_eq!(def.file, "custom.json");
        assert_eq!(def.format, FileFormat::Json);
    }

    #[test]
    fn test_invalid_json_is_schema_error() {
        assert!(matches!(parse_definition("m", "{nope"), Err(SchemaError::Json(_))));
    }
}
