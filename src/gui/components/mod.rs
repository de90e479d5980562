pub mod settings_editor;
