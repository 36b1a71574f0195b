//! Error types for media-surgery

use crate::ContainerKind;
use std::io;

/// Result type for media-surgery operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while reading or rewriting a container
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Outer signature does not belong to the requested flavor
    #[error("Not a {flavor} file")]
    NotThisFormat { flavor: ContainerKind },

    /// A read ran past the end of the buffer
    #[error("Truncated at offset {offset}: needed {needed} bytes, {available} available")]
    Truncated {
        offset: u64,
        needed: u64,
        available: u64,
    },

    /// A structural invariant could not be established
    #[error("Malformed {flavor} container: {node} at offset {offset}: {reason}")]
    MalformedContainer {
        flavor: ContainerKind,
        node: String,
        offset: u64,
        reason: String,
    },

    /// Requested key has no native tag in this flavor
    #[error("Field '{key}' is not supported by {flavor}")]
    UnsupportedField { key: String, flavor: ContainerKind },

    /// Flavor has no writable metadata location
    #[error("{flavor} has no editable metadata location (editable: {})", join(supported))]
    NoEditableLocation {
        flavor: ContainerKind,
        supported: Vec<ContainerKind>,
    },

    /// Flavor has no removable metadata location
    #[error("{flavor} has no strippable metadata location (strippable: {})", join(supported))]
    NoStrippableLocation {
        flavor: ContainerKind,
        supported: Vec<ContainerKind>,
    },

    /// Data size exceeds maximum allowed
    #[error("Data too large: {size} bytes (max: {max})")]
    DataTooLarge { size: usize, max: usize },

    /// Contradictory request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// No registered container recognised the data
    #[error("Unsupported format")]
    UnsupportedFormat,
}

impl Error {
    pub(crate) fn malformed(
        flavor: ContainerKind,
        node: impl Into<String>,
        offset: u64,
        reason: impl Into<String>,
    ) -> Self {
        Error::MalformedContainer {
            flavor,
            node: node.into(),
            offset,
            reason: reason.into(),
        }
    }

    /// True for the structural errors that View tolerates and Edit/Strip do not
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Error::Truncated { .. } | Error::MalformedContainer { .. }
        )
    }
}

fn join(kinds: &[ContainerKind]) -> String {
    kinds
        .iter()
        .map(|k| k.name())
        .collect::<Vec<_>>()
        .join(", ")
}
