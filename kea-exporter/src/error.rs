//! Mapping errors.

use thiserror::Error;

/// Errors raised while building or applying the statistics mapping.
///
/// `DuplicateFamilyDefinition` and `InvalidRule` are table defects and are
/// only raised while the mapper is constructed. The other variants are
/// per-key diagnostics that never abort a scrape.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MappingError {
    #[error("No mapping for statistic '{0}'")]
    UnknownKey(String),

    #[error("Metric family '{name}' defined twice with different schemas: {existing} vs {requested}")]
    DuplicateFamilyDefinition {
        name: String,
        existing: String,
        requested: String,
    },

    #[error("Statistic '{key}' has non-finite value {value}")]
    NonFiniteValue { key: String, value: f64 },

    #[error("Invalid mapping rule for '{stat}': {reason}")]
    InvalidRule { stat: String, reason: String },
}
