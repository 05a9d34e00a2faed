// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::Error;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchKind {
    Add,
    Remove,
    Replace,
}

/// A single structural patch operation with an RFC 6901 pointer path.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PatchOperation {
    #[serde(rename = "op")]
    pub kind: PatchKind,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl PatchOperation {
    pub fn replace(path: impl Into<String>, value: Value) -> PatchOperation {
        PatchOperation { kind: PatchKind::Replace, path: path.into(), value: Some(value) }
    }

    pub fn value_str(&self) -> Option<&str> {
        self.value.as_ref().and_then(Value::as_str)
    }
}

/// The tree-diff and merge-patch engines the classifier and planner rely on.
pub trait PatchEngine: Send + Sync {
    /// Ordered operations turning `old` into `new`.
    fn create_patch(&self, old: &Value, new: &Value) -> Result<Vec<PatchOperation>, Error>;

    /// Two-way merge patch from `old` to `new`, or `None` when they are equal.
    fn create_merge_patch(&self, old: &Value, new: &Value) -> Result<Option<Value>, Error>;

    fn apply_merge_patch(&self, target: &mut Value, patch: &Value) -> Result<(), Error>;
}

/// Default engine over `serde_json` values.
///
/// Objects are compared key by key and arrays index by index; elements past the common
/// length become tail adds or removes, and anything else that differs is replaced.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonPatchEngine;

impl PatchEngine for JsonPatchEngine {
    fn create_patch(&self, old: &Value, new: &Value) -> Result<Vec<PatchOperation>, Error> {
        let mut ops = Vec::new();
        diff_values(String::new(), old, new, &mut ops);
        Ok(ops)
    }

    fn create_merge_patch(&self, old: &Value, new: &Value) -> Result<Option<Value>, Error> {
        Ok(merge_diff(old, new))
    }

    fn apply_merge_patch(&self, target: &mut Value, patch: &Value) -> Result<(), Error> {
        if !patch.is_object() {
            return Err(Error::InvalidPatch(format!("merge patch must be an object, got {}", patch)));
        }
        merge_apply(target, patch);
        Ok(())
    }
}

pub fn escape_pointer_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

pub fn unescape_pointer_token(token: &str) -> String {
    token.replace("~1", "/").replace("~0", "~")
}

fn diff_values(path: String, old: &Value, new: &Value, ops: &mut Vec<PatchOperation>) {
    match (old, new) {
        (Value::Object(old_map), Value::Object(new_map)) => {
            for (key, old_value) in old_map {
                let child = format!("{}/{}", path, escape_pointer_token(key));
                match new_map.get(key) {
                    Some(new_value) => diff_values(child, old_value, new_value, ops),
                    None => ops.push(PatchOperation { kind: PatchKind::Remove, path: child, value: None }),
                }
            }
            for (key, new_value) in new_map {
                if !old_map.contains_key(key) {
                    ops.push(PatchOperation {
                        kind: PatchKind::Add,
                        path: format!("{}/{}", path, escape_pointer_token(key)),
                        value: Some(new_value.clone()),
                    });
                }
            }
        }
        (Value::Array(old_items), Value::Array(new_items)) => {
            let common = old_items.len().min(new_items.len());
            for (i, (old_item, new_item)) in old_items.iter().zip(new_items.iter()).enumerate() {
                diff_values(format!("{}/{}", path, i), old_item, new_item, ops);
            }
            for (i, new_item) in new_items.iter().enumerate().skip(common) {
                ops.push(PatchOperation {
                    kind: PatchKind::Add,
                    path: format!("{}/{}", path, i),
                    value: Some(new_item.clone()),
                });
            }
            // Highest index first so every emitted index is still valid when applied in order.
            for i in (common..old_items.len()).rev() {
                ops.push(PatchOperation { kind: PatchKind::Remove, path: format!("{}/{}", path, i), value: None });
            }
        }
        _ if old == new => {}
        _ => ops.push(PatchOperation::replace(path, new.clone())),
    }
}

fn merge_diff(old: &Value, new: &Value) -> Option<Value> {
    match (old, new) {
        (Value::Object(old_map), Value::Object(new_map)) => {
            let mut patch = Map::new();
            for key in old_map.keys() {
                if !new_map.contains_key(key) {
                    patch.insert(key.clone(), Value::Null);
                }
            }
            for (key, new_value) in new_map {
                match old_map.get(key) {
                    Some(old_value) if old_value.is_object() && new_value.is_object() => {
                        if let Some(child) = merge_diff(old_value, new_value) {
                            patch.insert(key.clone(), child);
                        }
                    }
                    Some(old_value) if old_value == new_value => {}
                    _ => {
                        patch.insert(key.clone(), new_value.clone());
                    }
                }
            }
            if patch.is_empty() {
                None
            } else {
                Some(Value::Object(patch))
            }
        }
        _ if old == new => None,
        _ => Some(new.clone()),
    }
}

fn merge_apply(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target_map) = target {
        for (key, value) in patch_map {
            if value.is_null() {
                target_map.remove(key);
            } else {
                merge_apply(target_map.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}
