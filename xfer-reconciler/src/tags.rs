//! Tag merging and differencing.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::model::ServerSpec;

/// Tags injected from outside the resource declaration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TagSources {
    /// Injected by the invoking framework.
    pub system: BTreeMap<String, String>,
    /// Declared once for every resource in the stack.
    pub stack: BTreeMap<String, String>,
}

impl TagSources {
    /// Merge system, stack and resource tags. Later provenances win.
    pub fn merge_with(&self, spec: &ServerSpec) -> BTreeMap<String, String> {
        let mut merged = self.system.clone();
        merged.extend(self.stack.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged.extend(spec.tag_map());
        merged
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TagDelta {
    pub to_add: BTreeMap<String, String>,
    pub to_remove: BTreeSet<String>,
}

impl TagDelta {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// Tags to upsert and keys to drop to go from `previous` to `desired`.
pub fn diff(previous: &BTreeMap<String, String>, desired: &BTreeMap<String, String>) -> TagDelta {
    let to_add = desired
        .iter()
        .filter(|(k, v)| previous.get(*k) != Some(*v))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let to_remove = previous
        .keys()
        .filter(|k| !desired.contains_key(*k))
        .cloned()
        .collect();
    TagDelta { to_add, to_remove }
}

/// Like [`diff`], but skips the work when both sides are equal.
pub fn diff_if_changed(
    previous: &BTreeMap<String, String>,
    desired: &BTreeMap<String, String>,
) -> Option<TagDelta> {
    if previous == desired {
        return None;
    }
    Some(diff(previous, desired))
}
