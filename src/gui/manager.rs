//! Settings manager window implemented with egui/eframe

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::mpsc::Receiver;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use eframe::{CreationContext, NativeOptions, egui};
use tracing::{debug, error, info, warn};

use super::components::settings_editor;
use super::constants::*;
use crate::config::{ConfigEvent, ConfigRegistry, ConfigState, ReloadWatcher, SetOutcome};
use crate::host::{DirAssetStore, DirFileStore};

struct StatusMessage {
    text: String,
    color: egui::Color32,
}

struct ManagerApp {
    registry: ConfigRegistry,
    files: DirFileStore,
    assets: Option<DirAssetStore>,
    events: Vec<Receiver<ConfigEvent>>,
    selected: Option<String>,
    /// Domains with edits not yet saved
    unsaved: BTreeSet<String>,
    watcher: ReloadWatcher,
    status_message: Option<StatusMessage>,
}

impl ManagerApp {
    fn new(_cc: &CreationContext<'_>, mut registry: ConfigRegistry, files: DirFileStore, assets: Option<PathBuf>) -> Self {
        info!(domains = registry.len(), "Initializing settings editor");

        let events = registry.iter_mut().map(|config| config.subscribe()).collect();
        let selected = registry.domains().next().map(str::to_string);

        let mut watcher = ReloadWatcher::new(Duration::from_millis(RELOAD_CHECK_INTERVAL_MS));
        let status_message = match watcher.watch(files.root()) {
            Ok(()) => None,
            Err(err) => {
                warn!(error = ?err, "Settings directory is not watched");
                Some(StatusMessage {
                    text: format!("External edits will not be picked up: {err}"),
                    color: STATUS_PENDING,
                })
            }
        };

        Self {
            registry,
            files,
            assets: assets.map(DirAssetStore::new),
            events,
            selected,
            unsaved: BTreeSet::new(),
            watcher,
            status_message,
        }
    }

    fn set_status(&mut self, text: impl Into<String>, color: egui::Color32) {
        self.status_message = Some(StatusMessage {
            text: text.into(),
            color,
        });
    }

    fn drain_events(&mut self) {
        for rx in &self.events {
            while let Ok(event) = rx.try_recv() {
                debug!(event = ?event, "Config event");
                match event {
                    ConfigEvent::SettingChanged { domain, .. } | ConfigEvent::Reset { domain } => {
                        self.unsaved.insert(domain);
                    }
                    ConfigEvent::Saved { domain } | ConfigEvent::Reloaded { domain, .. } => {
                        self.unsaved.remove(&domain);
                    }
                }
            }
        }
    }

    fn poll_reload(&mut self) {
        if !self.watcher.poll(Instant::now()) {
            return;
        }
        // Unsaved edits win over the disk copy
        let unsaved = &self.unsaved;
        let reloaded = self.registry.read_where(&self.files, |domain| !unsaved.contains(domain));
        info!(reloaded, kept = self.unsaved.len(), "Settings files changed on disk, reloaded");
        if self.unsaved.is_empty() {
            self.set_status("Reloaded settings from disk", STATUS_PENDING);
        } else {
            self.set_status("Reloaded settings from disk, unsaved edits kept", STATUS_PENDING);
        }
    }

    fn save(&mut self, domain: &str) {
        let Some(config) = self.registry.get(domain) else {
            return;
        };
        if config.write_to_file(&self.files) {
            self.set_status(format!("Saved {}", config.file_name()), STATUS_OK);
        } else {
            self.set_status(format!("Failed to save {domain}, see log"), STATUS_ERROR);
        }
    }

    fn restore_defaults(&mut self, domain: &str) {
        if let Some(config) = self.registry.get_mut(domain) {
            config.restore_to_defaults();
            self.set_status(format!("{domain} restored to defaults (not saved)"), STATUS_PENDING);
        }
    }

    fn apply(&mut self, domain: &str) {
        let (Some(config), Some(store)) = (self.registry.get(domain), self.assets.as_mut()) else {
            return;
        };
        let report = config.apply(store);
        let color = if report.failed == 0 { STATUS_OK } else { STATUS_ERROR };
        let text = format!(
            "Patched {} asset(s): {} applied, {} failed",
            report.assets_patched, report.succeeded, report.failed
        );
        self.set_status(text, color);
    }

    fn domain_list(&mut self, ui: &mut egui::Ui) {
        ui.label(egui::RichText::new("Mods").strong());
        ui.add_space(ITEM_SPACING);

        let domains: Vec<String> = self.registry.domains().map(str::to_string).collect();
        for domain in domains {
            let label = if self.unsaved.contains(&domain) {
                format!("{domain} *")
            } else {
                domain.clone()
            };
            let selected = self.selected.as_deref() == Some(domain.as_str());
            if ui.selectable_label(selected, label).clicked() {
                self.selected = Some(domain);
            }
        }

        if self.registry.is_empty() {
            ui.label(egui::RichText::new("(No definitions found)").italics().weak());
        }
    }

    fn editor(&mut self, ui: &mut egui::Ui, domain: &str) {
        let Some(config) = self.registry.get(domain) else {
            return;
        };

        ui.heading(domain);
        if config.state() == ConfigState::Failed {
            ui.colored_label(STATUS_ERROR, "Definition could not be loaded, see log");
        }
        ui.label(egui::RichText::new(config.file_name()).small().weak());
        ui.add_space(SECTION_SPACING);

        let edits = egui::ScrollArea::vertical()
            .auto_shrink([false, false])
            .max_height(ui.available_height() - SECTION_SPACING * 3.0)
            .show(ui, |ui| settings_editor::ui(ui, config))
            .inner;

        if let Some(config) = self.registry.get_mut(domain) {
            for edit in edits {
                match config.set_value(&edit.code, edit.value) {
                    SetOutcome::Changed | SetOutcome::Unchanged => {}
                    outcome => warn!(domain = %domain, code = %edit.code, outcome = ?outcome, "Edit rejected"),
                }
            }
        }

        ui.add_space(ITEM_SPACING);
        ui.separator();
        ui.horizontal(|ui| {
            if ui.button("\u{1F4BE} Save").clicked() {
                self.save(domain);
            }
            if ui.button("\u{21BA} Restore defaults").clicked() {
                self.restore_defaults(domain);
            }
            let can_apply = self.assets.is_some();
            if ui
                .add_enabled(can_apply, egui::Button::new("\u{25B6} Apply"))
                .on_disabled_hover_text("Start with --assets to patch assets")
                .clicked()
            {
                self.apply(domain);
            }
        });

        if let Some(message) = &self.status_message {
            ui.colored_label(message.color, &message.text);
        }
    }
}

impl eframe::App for ManagerApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.drain_events();
        self.poll_reload();
        self.drain_events();

        egui::SidePanel::left("domains")
            .exact_width(SIDE_PANEL_WIDTH)
            .show(ctx, |ui| {
                ui.add_space(PADDING);
                self.domain_list(ui);
            });

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.add_space(PADDING);
            match self.selected.clone() {
                Some(domain) => self.editor(ui, &domain),
                None => {
                    ui.label("Select a mod on the left");
                }
            }
        });

        ctx.request_repaint_after(Duration::from_millis(RELOAD_CHECK_INTERVAL_MS));
    }

    fn on_exit(&mut self, _gl: Option<&eframe::glow::Context>) {
        self.drain_events();
        if !self.unsaved.is_empty() {
            warn!(domains = ?self.unsaved, "Exiting with unsaved settings");
        }
        info!("Settings editor exiting");
    }
}

pub fn run_gui(registry: ConfigRegistry, files: DirFileStore, assets: Option<PathBuf>) -> Result<()> {
    let options = NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([WINDOW_WIDTH, WINDOW_HEIGHT])
            .with_min_inner_size([WINDOW_MIN_WIDTH, WINDOW_MIN_HEIGHT])
            .with_title("Mod Settings"),
        ..Default::default()
    };

    eframe::run_native(
        "Mod Settings",
        options,
        Box::new(|cc| Ok(Box::new(ManagerApp::new(cc, registry, files, assets)))),
    )
    .map_err(|err| {
        error!(error = %err, "Failed to launch settings editor");
        anyhow!("Failed to launch settings editor: {err}")
    })
}
