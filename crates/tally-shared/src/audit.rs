//! Field-level diffs for update logs.
//!
//! Each entity lists the fields it wants audited explicitly; the diff
//! compares those values by equality. Derived fields are deliberately left
//! out of the lists since they change with the calendar, not with the user.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One changed field in an update log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FieldChange {
    pub field: String,
    pub old_value: Value,
    pub new_value: Value,
}

/// Entities that expose a fixed list of audited fields.
pub trait Audited {
    fn tracked_fields(&self) -> Vec<(&'static str, Value)>;
}

/// Compare the tracked fields of two versions of an entity.
pub fn diff<T: Audited>(before: &T, after: &T) -> Vec<FieldChange> {
    before
        .tracked_fields()
        .into_iter()
        .zip(after.tracked_fields())
        .filter(|((_, old), (_, new))| old != new)
        .map(|((field, old_value), (_, new_value))| FieldChange {
            field: field.to_string(),
            old_value,
            new_value,
        })
        .collect()
}
