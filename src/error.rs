//! Typed errors for the settings engine
//!
//! File I/O, the sync transport and the CLI use `anyhow`; these enums cover
//! the failures callers need to tell apart.

use thiserror::Error;

/// A malformed definition. Fatal to the one config being built.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("definition is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0} must be a JSON object")]
    NotAnObject(String),

    #[error("setting '{code}' has no default value")]
    MissingDefault { code: String },

    #[error("setting '{code}' declares more than one of mapping, range and values")]
    ConflictingValidation { code: String },

    #[error("setting '{code}' default '{key}' is not a key of its mapping")]
    MappingDefault { code: String, key: String },

    #[error("setting '{code}' has an invalid {field}: {reason}")]
    InvalidField { code: String, field: &'static str, reason: String },

    #[error("unknown patch category '{0}'")]
    UnknownPatchCategory(String),

    #[error("patch '{asset}' -> '{key}': {reason}")]
    InvalidPatch { asset: String, key: String, reason: String },

    #[error("formatting block {index}: {reason}")]
    InvalidFormatting { index: usize, reason: String },
}

/// Formula parse and evaluation failures
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExprError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("Unresolvable: {0}")]
    Unresolvable(String),

    #[error("'{name}' expects {expected} argument(s), got {got}")]
    Arity { name: String, expected: String, got: usize },
}

/// Malformed path address
#[derive(Debug, Error)]
pub enum PathError {
    #[error("invalid range element '{0}'")]
    InvalidRange(String),

    #[error("invalid wildcard '{pattern}': {source}")]
    InvalidWildcard {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },
}

/// Failure of a single value patch. Counted and skipped by the asset patch.
#[derive(Debug, Error)]
pub enum PatchError {
    #[error(transparent)]
    Expr(#[from] ExprError),

    #[error("setting '{0}' does not exist")]
    UnknownSetting(String),

    #[error("formula result {0} is not a finite number")]
    NotFinite(f64),

    #[error("address '{0}' resolved to nothing")]
    NoTarget(String),
}

/// Rejected settings file contents
#[derive(Debug, Error)]
pub enum SettingsFileError {
    #[error("settings file is not valid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("settings file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("settings file must be a key/value mapping")]
    NotAMapping,

    #[error("settings file version {found:?} does not match definition version {expected}")]
    VersionMismatch { expected: i64, found: Option<i64> },
}
