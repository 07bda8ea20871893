//! In-memory image of a database rebuilt from its log.

use crate::error::{StorageError, StorageResult};
use crate::record::LogRecord;
use crate::schema::StoreSchema;
use serde_json::Value;
use std::collections::BTreeMap;

/// The materialized content of one database.
///
/// Version 0 means the database has never been created.
#[derive(Debug, Clone, Default)]
pub(crate) struct DatabaseState {
    pub version: u32,
    pub stores: BTreeMap<String, StoreData>,
}

/// The records and metadata of one object store.
#[derive(Debug, Clone, Default)]
pub(crate) struct StoreData {
    pub schema: StoreSchema,
    pub records: BTreeMap<String, Value>,
    /// Next generated key for auto-increment stores.
    pub next_key: u64,
}

impl DatabaseState {
    /// Rebuilds the state by replaying log records in order.
    pub fn replay(records: &[LogRecord]) -> Self {
        let mut state = Self::default();
        for record in records {
            state.apply(record);
        }
        state
    }

    /// Returns true once the database has been created.
    pub fn exists(&self) -> bool {
        self.version > 0
    }

    pub fn store_names(&self) -> Vec<String> {
        self.stores.keys().cloned().collect()
    }

    /// Applies one committed record.
    ///
    /// Records addressing a store that does not exist are ignored; the log
    /// only contains such records if it was written by a newer format.
    pub fn apply(&mut self, record: &LogRecord) {
        match record {
            LogRecord::SetVersion { version } => self.version = *version,
            LogRecord::CreateStore { name, schema } => {
                self.stores.insert(
                    name.clone(),
                    StoreData {
                        schema: schema.clone(),
                        records: BTreeMap::new(),
                        next_key: 1,
                    },
                );
            }
            LogRecord::DeleteStore { name } => {
                self.stores.remove(name);
            }
            LogRecord::Put { store, key, value } => {
                if let Some(data) = self.stores.get_mut(store) {
                    if let Ok(n) = key.parse::<u64>() {
                        data.next_key = data.next_key.max(n.saturating_add(1));
                    }
                    data.records.insert(key.clone(), value.clone());
                }
            }
            LogRecord::Delete { store, key } => {
                if let Some(data) = self.stores.get_mut(store) {
                    data.records.remove(key);
                }
            }
            LogRecord::Clear { store } => {
                if let Some(data) = self.stores.get_mut(store) {
                    data.records.clear();
                }
            }
        }
    }

    /// Produces the shortest record sequence that rebuilds this state.
    pub fn snapshot_records(&self) -> Vec<LogRecord> {
        let mut records = vec![LogRecord::SetVersion {
            version: self.version,
        }];
        for (name, data) in &self.stores {
            records.push(LogRecord::CreateStore {
                name: name.clone(),
                schema: data.schema.clone(),
            });
            for (key, value) in &data.records {
                records.push(LogRecord::Put {
                    store: name.clone(),
                    key: key.clone(),
                    value: value.clone(),
                });
            }
        }
        records
    }
}

impl StoreData {
    /// Determines the key a value is stored under and normalizes the value.
    ///
    /// Key-path stores read the key from the document; an explicit key must
    /// agree with it and is written into the document when the field is
    /// absent. Auto-increment stores generate a key when none is given.
    pub fn resolve_key(&self, explicit: Option<&str>, value: &mut Value) -> StorageResult<String> {
        let Some(path) = self.schema.key_path.as_deref() else {
            return match explicit {
                Some(key) => Ok(key.to_string()),
                None if self.schema.auto_increment => Ok(self.next_key.max(1).to_string()),
                None => Err(StorageError::Data(
                    "store uses out-of-line keys and no key was provided".into(),
                )),
            };
        };

        let Some(object) = value.as_object_mut() else {
            return Err(StorageError::Data(format!(
                "key path \"{path}\" requires an object value"
            )));
        };

        let inline = match object.get(path) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            Some(other) => {
                return Err(StorageError::Data(format!(
                    "key path \"{path}\" yielded an invalid key: {other}"
                )))
            }
        };

        match (inline, explicit) {
            (Some(inline), Some(key)) if inline != key => Err(StorageError::Data(format!(
                "key \"{key}\" does not match key path value \"{inline}\""
            ))),
            (Some(inline), _) => Ok(inline),
            (None, Some(key)) => {
                object.insert(path.to_string(), Value::String(key.to_string()));
                Ok(key.to_string())
            }
            (None, None) if self.schema.auto_increment => {
                let key = self.next_key.max(1).to_string();
                object.insert(path.to_string(), Value::String(key.clone()));
                Ok(key)
            }
            (None, None) => Err(StorageError::Data(format!(
                "value has no key at key path \"{path}\""
            ))),
        }
    }
}
