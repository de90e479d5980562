//! Settings file rendering and reading
//!
//! The YAML document is generated from the block layout: a `version: N`
//! header, then every block in weight order. Settings carry their comment on
//! the preceding line and a validation hint as a trailing comment. The JSON
//! variant is a flat object with the same keys and no comments.

use std::collections::HashMap;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::definition::{Block, BlockKind, FileFormat};
use super::setting::{Setting, display_scalar};
use crate::constants::{schema, settings_file};
use crate::error::SettingsFileError;

/// Render `settings` in `format`. Settings missing from the map (for example
/// when only the client-visible subset is written) are skipped.
pub fn render(
    format: FileFormat,
    version: i64,
    blocks: &[Block],
    settings: &HashMap<String, Setting>,
) -> Result<String, SettingsFileError> {
    match format {
        FileFormat::Yaml => render_yaml(version, blocks, settings),
        FileFormat::Json => render_json(version, blocks, settings),
    }
}

fn render_yaml(version: i64, blocks: &[Block], settings: &HashMap<String, Setting>) -> Result<String, SettingsFileError> {
    let mut out = String::new();
    if version != schema::UNVERSIONED {
        out.push_str(&format!("{}: {version}\n", settings_file::VERSION_KEY));
    }

    for block in blocks {
        match &block.kind {
            BlockKind::Setting(code) => {
                let Some(setting) = settings.get(code) else {
                    continue;
                };
                render_setting(&mut out, setting)?;
            }
            BlockKind::Separator { title, text } => {
                let rule = "#".repeat(settings_file::SEPARATOR_RULE);
                out.push('\n');
                match title {
                    Some(title) => out.push_str(&format!("{rule} {title} {rule}\n")),
                    None => out.push_str(&format!("{rule}{rule}\n")),
                }
                if let Some(text) = text {
                    push_comment(&mut out, text);
                }
            }
            BlockKind::Blank => out.push('\n'),
        }
    }

    Ok(out)
}

fn render_setting(out: &mut String, setting: &Setting) -> Result<(), SettingsFileError> {
    if let Some(comment) = setting.comment() {
        push_comment(out, comment);
    }

    let key = inline(&Value::String(setting.display_code().to_string()))?;
    let hint = setting
        .validation()
        .hint()
        .map(|h| format!(" # {h}"))
        .unwrap_or_default();
    let value = setting.file_value();

    let nested = match &value {
        Value::Object(map) => !map.is_empty(),
        Value::Array(arr) => !arr.is_empty(),
        _ => false,
    };

    if nested {
        out.push_str(&format!("{key}:{hint}\n"));
        for line in serde_yaml::to_string(&value)?.lines() {
            out.push_str(&format!("  {line}\n"));
        }
    } else {
        out.push_str(&format!("{key}: {}{hint}\n", inline(&value)?));
    }
    Ok(())
}

fn push_comment(out: &mut String, text: &str) {
    for line in text.lines() {
        out.push_str(&format!("# {line}\n"));
    }
}

/// Single-line YAML form of a scalar
fn inline(value: &Value) -> Result<String, SettingsFileError> {
    Ok(serde_yaml::to_string(value)?.trim_end().to_string())
}

fn render_json(version: i64, blocks: &[Block], settings: &HashMap<String, Setting>) -> Result<String, SettingsFileError> {
    let mut map = Map::new();
    if version != schema::UNVERSIONED {
        map.insert(settings_file::VERSION_KEY.to_string(), Value::from(version));
    }
    for block in blocks {
        if let BlockKind::Setting(code) = &block.kind
            && let Some(setting) = settings.get(code)
        {
            map.insert(setting.display_code().to_string(), setting.file_value());
        }
    }
    Ok(serde_json::to_string_pretty(&Value::Object(map))?)
}

/// Parse a settings file into a generic key/value map
pub fn parse(format: FileFormat, text: &str) -> Result<Map<String, Value>, SettingsFileError> {
    let blank = text.lines().map(str::trim).all(|line| line.is_empty() || line.starts_with('#'));
    if blank {
        return Ok(Map::new());
    }

    let value: Value = match format {
        FileFormat::Yaml => serde_yaml::from_str(text)?,
        FileFormat::Json => serde_json::from_str(text)?,
    };

    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        _ => Err(SettingsFileError::NotAMapping),
    }
}

/// Reject a file whose version line is missing or differs from `expected`.
/// Unversioned schemas accept anything.
pub fn check_version(expected: i64, map: &Map<String, Value>) -> Result<(), SettingsFileError> {
    if expected == schema::UNVERSIONED {
        return Ok(());
    }

    let found = map.get(settings_file::VERSION_KEY).and_then(|v| match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    });

    if found == Some(expected) {
        Ok(())
    } else {
        Err(SettingsFileError::VersionMismatch { expected, found })
    }
}

/// Copy file values onto `settings`, matching by display code. Returns how many changed.
pub fn apply(map: &Map<String, Value>, settings: &mut HashMap<String, Setting>) -> usize {
    let mut changed = 0;
    for setting in settings.values_mut() {
        let Some(raw) = map.get(setting.display_code()) else {
            debug!(domain = %setting.domain(), code = %setting.code(), "Setting absent from file, keeping value");
            continue;
        };

        let updated = if setting.mapping_key().is_some() {
            setting.set_mapping_key(&display_scalar(raw))
        } else {
            setting.set_value(raw.clone())
        };
        if updated {
            changed += 1;
        }
    }

    for key in map.keys() {
        if key != settings_file::VERSION_KEY && !settings.values().any(|s| s.display_code() == key) {
            warn!(key = %key, "Unknown key in settings file");
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::definition::{Definition, parse_definition};
    use serde_json::json;

    const DEFINITION: &str = r#"{
        "version": 2,
        "settings": {
            "boolean": { "enabled": { "default": true, "comment": "Master switch" } },
            "integer": { "count": { "default": 3, "range": { "min": 1, "max": 9, "step": 2 } } },
            "float": { "ratio": { "default": 0.25 } },
            "string": {
                "mode": { "default": "fast", "values": ["fast", "slow"] },
                "level": { "default": "mid", "mapping": { "low": 1, "mid": 2, "high": 3 }, "name": "Level" }
            },
            "other": { "list": { "default": { "a": [1, 2] } } }
        },
        "formatting": [ { "type": "separator", "title": "Tuning", "text": "Numbers below", "weight": 0.5 } ]
    }"#;

    fn fixture() -> Definition {
        parse_definition("mod", DEFINITION).unwrap()
    }

    #[test]
    fn test_yaml_layout() {
        let def = fixture();
        let text = render(FileFormat::Yaml, def.version, &def.blocks, &def.settings).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "version: 2");
        assert_eq!(lines[1], "# Master switch");
        assert_eq!(lines[2], "enabled: true");
        assert!(text.contains("count: 3 # from 1 to 9 with step of 2"));
        assert!(text.contains("######## Tuning ########"));
        assert!(text.contains("# Numbers below"));
        assert!(text.contains("mode: fast # value from: fast, slow"));
        assert!(text.contains("Level: mid # value from: low, mid, high"));
        assert!(text.contains("list:\n  a:\n"));
    }

    #[test]
    fn test_yaml_round_trip_restores_values() {
        let def = fixture();
        let mut edited = def.settings.clone();
        edited.get_mut("count").unwrap().set_value(json!(7));
        edited.get_mut("ratio").unwrap().set_value(json!(1.5));
        edited.get_mut("level").unwrap().set_mapping_key("high");
        edited.get_mut("enabled").unwrap().set_value(json!(false));
        edited.get_mut("list").unwrap().set_value(json!({"a": [3], "b": "x"}));

        let text = render(FileFormat::Yaml, def.version, &def.blocks, &edited).unwrap();
        let map = parse(FileFormat::Yaml, &text).unwrap();
        check_version(def.version, &map).unwrap();

        let mut reloaded = def.settings.clone();
        apply(&map, &mut reloaded);
        for (code, setting) in &edited {
            assert_eq!(reloaded[code].value(), setting.value(), "{code}");
            assert_eq!(reloaded[code].mapping_key(), setting.mapping_key(), "{code}");
        }
    }

    #[test]
    fn test_json_round_trip() {
        let def = fixture();
        let mut edited = def.settings.clone();
        edited.get_mut("mode").unwrap().set_value(json!("slow"));

        let text = render(FileFormat::Json, def.version, &def.blocks, &edited).unwrap();
        let map = parse(FileFormat::Json, &text).unwrap();
        assert_eq!(map["version"], json!(2));
        assert_eq!(map["Level"], json!("mid"));

        let mut reloaded = def.settings.clone();
        assert_eq!(apply(&map, &mut reloaded), 1);
        assert_eq!(reloaded["mode"].value(), &json!("slow"));
    }

    #[test]
    fn test_version_check() {
        let map = parse(FileFormat::Yaml, "version: 1\nenabled: false\n").unwrap();
        assert!(matches!(
            check_version(2, &map),
            Err(SettingsFileError::VersionMismatch { expected: 2, found: Some(1) })
        ));
        assert!(check_version(1, &map).is_ok());
        assert!(check_version(schema::UNVERSIONED, &map).is_ok());

        let missing = parse(FileFormat::Yaml, "enabled: false\n").unwrap();
        assert!(matches!(
            check_version(1, &missing),
            Err(SettingsFileError::VersionMismatch { found: None, .. })
        ));
    }

    #[test]
    fn test_strings_parse_with_invariant_numbers() {
        let def = fixture();
        let map = parse(FileFormat::Yaml, "version: 2\nratio: '2.5'\ncount: '5'\nenabled: 'false'\n").unwrap();
        let mut settings = def.settings.clone();
        apply(&map, &mut settings);
        assert_eq!(settings["ratio"].value(), &json!(2.5));
        assert_eq!(settings["count"].value(), &json!(5));
        assert_eq!(settings["enabled"].value(), &json!(false));
    }

    #[test]
    fn test_unknown_mapping_key_in_file_is_ignored() {
        let def = fixture();
        let map = parse(FileFormat::Yaml, "version: 2\nLevel: extreme\n").unwrap();
        let mut settings = def.settings.clone();
        assert_eq!(apply(&map, &mut settings), 0);
        assert_eq!(settings["level"].value(), &json!(2));
        assert_eq!(settings["level"].mapping_key(), Some("mid"));
    }

    #[test]
    fn test_non_mapping_document_rejected() {
        assert!(matches!(parse(FileFormat::Yaml, "- 1\n- 2\n"), Err(SettingsFileError::NotAMapping)));
        assert!(parse(FileFormat::Yaml, "").unwrap().is_empty());
    }
}
