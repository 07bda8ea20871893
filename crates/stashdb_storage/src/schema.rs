//! Object store declarations.

use serde::{Deserialize, Serialize};

/// Creation options for an object store.
///
/// The default is an unkeyed store addressed purely by caller-supplied
/// string keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSchema {
    /// Field of the stored document that holds its key.
    pub key_path: Option<String>,
    /// Whether keys are generated when the caller supplies none.
    pub auto_increment: bool,
}

impl StoreSchema {
    /// Creates the default (unkeyed) schema.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the key path.
    #[must_use]
    pub fn key_path(mut self, path: impl Into<String>) -> Self {
        self.key_path = Some(path.into());
        self
    }

    /// Sets whether keys are generated.
    #[must_use]
    pub const fn auto_increment(mut self, value: bool) -> Self {
        self.auto_increment = value;
        self
    }
}
