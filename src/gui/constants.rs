//! GUI-specific constants for layout, status colors and intervals

use egui;

/// Editor window dimensions
pub const WINDOW_WIDTH: f32 = 720.0;
pub const WINDOW_HEIGHT: f32 = 800.0;
pub const WINDOW_MIN_WIDTH: f32 = 520.0;
pub const WINDOW_MIN_HEIGHT: f32 = 480.0;

/// Domain list on the left
pub const SIDE_PANEL_WIDTH: f32 = 160.0;

/// Layout spacing
pub const PADDING: f32 = 6.0;
pub const SECTION_SPACING: f32 = 15.0;
pub const ITEM_SPACING: f32 = 8.0;

/// Width of free-text fields
pub const TEXT_FIELD_WIDTH: f32 = 180.0;

/// Status colors
pub const STATUS_OK: egui::Color32 = egui::Color32::from_rgb(0, 200, 0);
pub const STATUS_ERROR: egui::Color32 = egui::Color32::from_rgb(200, 0, 0);
pub const STATUS_PENDING: egui::Color32 = egui::Color32::from_rgb(200, 200, 0);

/// How often the settings directory watcher is polled
pub const RELOAD_CHECK_INTERVAL_MS: u64 = 500;
