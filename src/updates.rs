//! Edit and strip requests, and what they report back

use crate::{
    error::{Error, Result},
    field::{FieldChange, MetadataField},
};

/// Field assignments and deletions to apply to one file
///
/// This struct uses a builder pattern where the default changes nothing. Keys are
/// matched case-insensitively; each flavor maps them to its native tag spelling.
///
/// # Example
///
/// ```
/// use media_surgery::EditRequest;
///
/// let request = EditRequest::new()
///     .set("title", "New Title")
///     .set("artist", "Someone")
///     .delete("comment")
///     .dry_run(true);
/// assert_eq!(request.assignments().len(), 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct EditRequest {
    set: Vec<(String, String)>,
    delete: Vec<String>,
    dry_run: bool,
}

impl EditRequest {
    /// Create an empty request (no changes)
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign a value; a later assignment to the same key replaces the earlier one
    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        match self.set.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(&key)) {
            Some(slot) => slot.1 = value,
            None => self.set.push((key, value)),
        }
        self
    }

    /// Remove every value stored under `key`
    pub fn delete(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        if !self.delete.iter().any(|k| k.eq_ignore_ascii_case(&key)) {
            self.delete.push(key);
        }
        self
    }

    /// Report the would-be changes without producing output bytes
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn assignments(&self) -> &[(String, String)] {
        &self.set
    }

    pub fn deletions(&self) -> &[String] {
        &self.delete
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.delete.is_empty()
    }
}

/// One resolved change, with the key already in the flavor's native spelling
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldOp {
    Set { key: String, value: String },
    Delete { key: String },
}

impl FieldOp {
    pub fn key(&self) -> &str {
        match self {
            FieldOp::Set { key, .. } | FieldOp::Delete { key } => key,
        }
    }
}

/// What to remove from one file
///
/// # Example
///
/// ```
/// use media_surgery::{StripMode, StripRequest};
///
/// assert_eq!(StripRequest::all().mode().unwrap(), StripMode::All);
/// assert_eq!(StripRequest::gps_only().mode().unwrap(), StripMode::GpsOnly);
///
/// let keep = StripRequest::keep(["Copyright", "ICC"]);
/// assert!(matches!(keep.mode().unwrap(), StripMode::Keep(_)));
/// ```
#[derive(Debug, Clone, Default)]
pub struct StripRequest {
    pub keep_keys: Vec<String>,
    pub gps_only: bool,
    pub strip_all: bool,
}

impl StripRequest {
    /// Remove every recognised metadata-bearing node
    pub fn all() -> Self {
        Self {
            strip_all: true,
            ..Self::default()
        }
    }

    /// Remove everything except fields whose key or category is listed
    pub fn keep<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keep_keys: keys.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Remove only location data
    pub fn gps_only() -> Self {
        Self {
            gps_only: true,
            ..Self::default()
        }
    }

    /// Resolve the flags into exactly one mode
    pub fn mode(&self) -> Result<StripMode> {
        let keys: Vec<String> = self
            .keep_keys
            .iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        match (self.gps_only, keys.is_empty(), self.strip_all) {
            (true, true, false) => Ok(StripMode::GpsOnly),
            (true, _, _) => Err(Error::InvalidRequest(
                "gps_only cannot be combined with strip_all or a keep list".into(),
            )),
            (false, false, _) => Ok(StripMode::Keep(keys)),
            (false, true, _) => Ok(StripMode::All),
        }
    }
}

/// Resolved form of a [`StripRequest`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StripMode {
    /// Whole-node removal of every metadata-bearing node
    All,
    /// Field-level clearing that keeps the listed keys or categories
    Keep(Vec<String>),
    /// Field-level clearing restricted to location data
    GpsOnly,
}

impl StripMode {
    /// Whether a field survives this strip
    pub fn keeps(&self, field: &MetadataField) -> bool {
        match self {
            StripMode::All => false,
            StripMode::GpsOnly => !is_location_key(&field.key),
            StripMode::Keep(keys) => keys.iter().any(|k| {
                k.eq_ignore_ascii_case(&field.key) || k.eq_ignore_ascii_case(&field.category)
            }),
        }
    }

    /// Whether a whole group (a category, alias or native node name) is kept
    pub fn keeps_group(&self, names: &[&str]) -> bool {
        match self {
            StripMode::Keep(keys) => keys
                .iter()
                .any(|k| names.iter().any(|n| k.eq_ignore_ascii_case(n))),
            _ => false,
        }
    }

    /// Whether a single key is kept (no category context)
    pub fn keeps_key(&self, key: &str) -> bool {
        match self {
            StripMode::All => false,
            StripMode::GpsOnly => !is_location_key(key),
            StripMode::Keep(keys) => keys.iter().any(|k| k.eq_ignore_ascii_case(key)),
        }
    }
}

/// Keys that carry location
pub(crate) fn is_location_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    lower.starts_with("gps") || lower == "location" || lower == "©xyz"
}

/// Result of an edit
#[derive(Debug, Clone)]
pub struct EditOutcome {
    /// Rewritten file, `None` for a dry run
    pub output: Option<Vec<u8>>,
    /// Field-level difference between input and output
    pub changes: Vec<FieldChange>,
    /// Requested keys with no native mapping in this flavor
    pub unsupported: Vec<String>,
}

/// Result of a strip
#[derive(Debug, Clone)]
pub struct StripOutcome {
    pub output: Vec<u8>,
    /// Fields present before and gone afterwards
    pub removed: Vec<MetadataField>,
}
