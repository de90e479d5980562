//! Application-wide constants
//!
//! This module contains the magic numbers and string literals shared by the
//! settings engine, the patch engine and the sync transport.

/// Numeric tolerances used by formulas and boolean coercion
pub mod math {
    /// Values within this distance of zero are false, everything else is true
    pub const EPSILON: f64 = 1e-10;
}

/// Sort weight handling for settings and formatting blocks
pub mod weight {
    /// Increment added per weight collision (multiplied by the collision count)
    pub const COLLISION_STEP: f64 = 1e-6;

    /// Weight given to entries that do not declare one
    pub const DEFAULT: f64 = 0.0;
}

/// Definition (schema) keys and categories
pub mod schema {
    pub const VERSION: &str = "version";
    pub const SETTINGS: &str = "settings";
    pub const FORMATTING: &str = "formatting";
    pub const PATCHES: &str = "patches";
    pub const FILE: &str = "file";

    /// Schema version sentinel that disables the file version check
    pub const UNVERSIONED: i64 = -1;

    /// Setting categories in the order they are parsed
    pub const CATEGORIES: &[&str] = &["boolean", "integer", "float", "number", "string", "color", "other"];
}

/// Settings file layout
pub mod settings_file {
    /// Key of the header line in the generated document
    pub const VERSION_KEY: &str = "version";

    /// Extension of the generated, comment-annotated document
    pub const DEFAULT_EXTENSION: &str = "yaml";

    /// Width of the `#` rule drawn around separator titles
    pub const SEPARATOR_RULE: usize = 8;
}

/// Default on-disk locations
pub mod paths {
    /// Directory under the platform config dir
    pub const APP_DIR: &str = "modconf";

    /// Schema definitions, one `<domain>.json` per mod
    pub const DEFINITIONS_DIR: &str = "definitions";

    /// Generated settings files
    pub const SETTINGS_DIR: &str = "settings";

    /// Socket file name used by `serve` / `join`
    pub const SOCKET_FILE: &str = "modconf/sync.sock";
}

/// Sync transport
pub mod sync {
    /// Maximum message size (10 MB) to prevent DoS via memory exhaustion
    pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;
}

/// Reload polling
pub mod reload {
    /// Default interval between pending-change polls
    pub const POLL_INTERVAL_MS: u64 = 1000;
}
