//! Error taxonomy for control-total synthesis and rebalancing.

use std::io;

/// Errors raised by the core. None of them are recovered internally; a run
/// that hits one must not publish any control table.
#[derive(Debug, thiserror::Error)]
pub enum PopSynError {
    /// Malformed ranges, missing attribute columns, bad drop lists.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A stratum has no valid observations to draw from.
    #[error("Insufficient data for `{column}`: stratum {stratum} has no valid values")]
    InsufficientData { column: String, stratum: String },

    /// A record or forecast references a zone outside the configured geography.
    #[error("Unknown zone {zone} referenced by {origin}")]
    UnknownZone { zone: u32, origin: String },

    /// A person record points at a household that is not loaded.
    #[error("Person record references missing household {household_id}")]
    MissingHousehold { household_id: u64 },

    /// Rolled-up totals disagree with the finer level.
    #[error(
        "Consistency check failed at {level} level for {key}, column `{column}`: expected {expected}, got {actual}"
    )]
    Consistency {
        level: String,
        key: String,
        column: String,
        expected: f64,
        actual: f64,
    },

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl PopSynError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, PopSynError>;
