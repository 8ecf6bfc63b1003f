//! Provider DSL errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while parsing or validating provider `.conf` files.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "details")]
pub enum ProviderError {
    /// Scanner/parser rejected the file
    #[error("Provider file {file} failed to parse: {message}")]
    Parse {
        /// File that failed to parse
        file: String,
        /// Parser error with position info
        message: String,
    },

    /// Semantic validation failed after a successful parse
    #[error("Provider file {file} is invalid: {message}")]
    Invalid {
        /// File that failed validation
        file: String,
        /// Validation error message
        message: String,
    },

    /// Two files declare the same provider name
    #[error("Duplicate provider {name} in {file} (already in {previous})")]
    Duplicate {
        /// The duplicated provider name
        name: String,
        /// File declaring the duplicate
        file: String,
        /// File that declared the name first
        previous: String,
    },

    /// Include preprocessing failed (missing file, cycle, depth)
    #[error("Include error in {file}: {message}")]
    Include {
        /// File containing the include directive
        file: String,
        /// Description of the include failure
        message: String,
    },
}
