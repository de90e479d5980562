//! Settings editor component, one widget per setting in layout order

use eframe::egui;
use serde_json::{Map, Value};

use crate::config::{BlockKind, Config, Range, Setting, SettingType, Validation, display_scalar};
use crate::host::SessionRole;

use super::super::constants::{ITEM_SPACING, SECTION_SPACING, TEXT_FIELD_WIDTH};

/// A value the user entered this frame
#[derive(Debug, Clone, PartialEq)]
pub struct Edit {
    pub code: String,
    pub value: Value,
}

/// Renders every block of `config` and returns the edits made this frame.
/// Edits are applied by the caller so they go through `Config::set_value`.
pub fn ui(ui: &mut egui::Ui, config: &Config) -> Vec<Edit> {
    let mut edits = Vec::new();

    for block in config.blocks() {
        match &block.kind {
            BlockKind::Setting(code) => {
                let Some(setting) = config.get(code) else {
                    continue;
                };
                let editable = config.role() != SessionRole::Client || setting.is_client_side();
                ui.add_enabled_ui(editable, |ui| {
                    if let Some(value) = setting_row(ui, setting) {
                        edits.push(Edit {
                            code: code.clone(),
                            value,
                        });
                    }
                });
                ui.add_space(ITEM_SPACING / 2.0);
            }
            BlockKind::Separator { title, text } => {
                ui.add_space(ITEM_SPACING);
                ui.separator();
                if let Some(title) = title {
                    ui.label(egui::RichText::new(title).strong());
                }
                if let Some(text) = text {
                    ui.label(egui::RichText::new(text).small().italics());
                }
                ui.add_space(ITEM_SPACING / 2.0);
            }
            BlockKind::Blank => ui.add_space(SECTION_SPACING),
        }
    }

    edits
}

fn setting_row(ui: &mut egui::Ui, setting: &Setting) -> Option<Value> {
    ui.horizontal(|ui| {
        let label = ui.label(format!("{}:", setting.label()));
        if let Some(comment) = setting.comment() {
            label.on_hover_text(comment);
        }

        match setting.validation() {
            Validation::Mapping(mapping) => mapping_combo(ui, setting, mapping),
            Validation::Values(values) => values_combo(ui, setting, values),
            Validation::Range(range) if setting.kind().is_numeric() => numeric(ui, setting, Some(range)),
            _ => match setting.kind() {
                SettingType::Boolean => {
                    let mut checked = setting.value().as_bool().unwrap_or(false);
                    ui.checkbox(&mut checked, "").changed().then_some(Value::Bool(checked))
                }
                SettingType::Integer | SettingType::Float => numeric(ui, setting, None),
                SettingType::String => text_field(ui, setting),
                SettingType::Color => color_field(ui, setting),
                SettingType::Other | SettingType::Constant | SettingType::Invalid => {
                    let text = serde_json::to_string_pretty(setting.value()).unwrap_or_default();
                    ui.code(text);
                    None
                }
            },
        }
    })
    .inner
}

/// Slider bounds, when the range is closed on both ends
fn slider_bounds(range: &Range) -> Option<(f64, f64)> {
    match (range.min, range.max) {
        (Some(min), Some(max)) if min <= max => Some((min, max)),
        _ => None,
    }
}

fn numeric(ui: &mut egui::Ui, setting: &Setting, range: Option<&Range>) -> Option<Value> {
    let integer = setting.kind() == SettingType::Integer;
    let mut current = setting.value().as_f64().unwrap_or_default();

    let changed = match range.and_then(|r| slider_bounds(r).map(|bounds| (r, bounds))) {
        Some((range, (min, max))) => {
            let mut slider = egui::Slider::new(&mut current, min..=max).logarithmic(setting.is_logarithmic());
            if integer {
                slider = slider.integer();
            }
            if let Some(step) = range.step.filter(|s| *s > 0.0) {
                slider = slider.step_by(step);
            }
            ui.add(slider).changed()
        }
        None => {
            let mut drag = egui::DragValue::new(&mut current);
            if integer {
                drag = drag.speed(1.0).fixed_decimals(0);
            }
            if let Some(range) = range {
                drag = drag.range(range.min.unwrap_or(f64::NEG_INFINITY)..=range.max.unwrap_or(f64::INFINITY));
            }
            ui.add(drag).changed()
        }
    };

    changed.then(|| {
        if integer {
            Value::from(current.round() as i64)
        } else {
            Value::from(current)
        }
    })
}

fn mapping_combo(ui: &mut egui::Ui, setting: &Setting, mapping: &Map<String, Value>) -> Option<Value> {
    let selected = setting.mapping_key().unwrap_or_default();
    let mut picked = None;

    egui::ComboBox::from_id_salt(("mapping", setting.domain(), setting.code()))
        .selected_text(selected)
        .show_ui(ui, |ui| {
            for (key, mapped) in mapping {
                let option = ui.selectable_label(key == selected, key);
                if option.on_hover_text(display_scalar(mapped)).clicked() && key != selected {
                    picked = Some(Value::String(key.clone()));
                }
            }
        });

    picked
}

fn values_combo(ui: &mut egui::Ui, setting: &Setting, values: &[Value]) -> Option<Value> {
    let current = setting.value();
    let mut picked = None;

    egui::ComboBox::from_id_salt(("values", setting.domain(), setting.code()))
        .selected_text(display_scalar(current))
        .show_ui(ui, |ui| {
            for value in values {
                if ui.selectable_label(value == current, display_scalar(value)).clicked() && value != current {
                    picked = Some(value.clone());
                }
            }
        });

    picked
}

fn text_field(ui: &mut egui::Ui, setting: &Setting) -> Option<Value> {
    let mut text = display_scalar(setting.value());
    let edit = egui::TextEdit::singleline(&mut text).desired_width(TEXT_FIELD_WIDTH);
    ui.add(edit).changed().then_some(Value::String(text))
}

fn color_field(ui: &mut egui::Ui, setting: &Setting) -> Option<Value> {
    let mut edited = text_field(ui, setting);

    // Color picker button - parses hex string, shows picker, updates string
    if let Some(mut color) = parse_hex_color(&display_scalar(setting.value()))
        && ui.color_edit_button_srgba(&mut color).changed()
    {
        edited = Some(Value::String(format_hex_color(color)));
    }

    edited
}

/// Parse `#RRGGBB` or `#AARRGGBB`
fn parse_hex_color(hex: &str) -> Option<egui::Color32> {
    let hex = hex.trim_start_matches('#');
    let byte = |i: usize| hex.get(i..i + 2).and_then(|h| u8::from_str_radix(h, 16).ok());

    match hex.len() {
        6 => Some(egui::Color32::from_rgba_unmultiplied(byte(0)?, byte(2)?, byte(4)?, 255)),
        8 => Some(egui::Color32::from_rgba_unmultiplied(byte(2)?, byte(4)?, byte(6)?, byte(0)?)),
        _ => None,
    }
}

/// Format as `#RRGGBB`, or `#AARRGGBB` when not opaque
fn format_hex_color(color: egui::Color32) -> String {
    if color.a() == 255 {
        format!("#{:02X}{:02X}{:02X}", color.r(), color.g(), color.b())
    } else {
        format!("#{:02X}{:02X}{:02X}{:02X}", color.a(), color.r(), color.g(), color.b())
    }
}
