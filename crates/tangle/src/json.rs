#![forbid(unsafe_code)]

//! JSON interop: build object graphs from `serde_json` trees and export
//! them back.
//!
//! Import is total — every JSON tree maps onto a graph (numbers flatten to
//! doubles). Export walks the graph as a tree and therefore rejects
//! reference cycles with [`GraphError::CyclicValue`]; non-finite numbers
//! export as `null`, matching the usual JSON serialization of NaN.

use std::collections::HashSet;

use crate::error::GraphError;
use crate::object::Obj;
use crate::value::Value;

impl Value {
    /// Build a value graph from a JSON tree.
    ///
    /// Objects become map sources (insertion order preserved), arrays become
    /// list sources.
    #[must_use]
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Num(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::from(s.as_str()),
            serde_json::Value::Array(items) => {
                let list = Obj::list();
                for item in items {
                    let _ = list.push(Value::from_json(item));
                }
                Value::from(list)
            }
            serde_json::Value::Object(map) => {
                let obj = Obj::map();
                for (key, val) in map {
                    let _ = obj.insert(key, Value::from_json(val));
                }
                Value::from(obj)
            }
        }
    }

    /// Export this value graph as a JSON tree.
    ///
    /// # Errors
    ///
    /// [`GraphError::CyclicValue`] when the graph contains a reference
    /// cycle.
    pub fn to_json(&self) -> Result<serde_json::Value, GraphError> {
        let mut path = HashSet::new();
        to_json_inner(self, &mut path)
    }
}

fn to_json_inner(
    value: &Value,
    path: &mut HashSet<usize>,
) -> Result<serde_json::Value, GraphError> {
    match value {
        Value::Null => Ok(serde_json::Value::Null),
        Value::Bool(b) => Ok(serde_json::Value::Bool(*b)),
        Value::Num(n) => Ok(serde_json::Number::from_f64(*n)
            .map_or(serde_json::Value::Null, serde_json::Value::Number)),
        Value::Str(s) => Ok(serde_json::Value::String(s.to_string())),
        Value::Obj(reactor) => {
            let source = reactor.shuck();
            let id = source.id();
            if !path.insert(id) {
                return Err(GraphError::CyclicValue);
            }
            let out = if source.is_map() {
                let mut map = serde_json::Map::new();
                for (key, val) in source.entries() {
                    map.insert(key, to_json_inner(&val, path)?);
                }
                serde_json::Value::Object(map)
            } else {
                let mut items = Vec::with_capacity(source.len());
                for item in source.items() {
                    items.push(to_json_inner(&item, path)?);
                }
                serde_json::Value::Array(items)
            };
            path.remove(&id);
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn import_builds_nested_sources() {
        let value = Value::from_json(&json!({
            "name": "ada",
            "scores": [1, 2.5, null],
            "meta": { "active": true },
        }));
        let root = value.as_obj().unwrap().shuck();
        assert_eq!(root.keys(), vec!["name", "scores", "meta"]);
        assert_eq!(root.get("name"), Some(Value::from("ada")));

        let scores = root.get("scores").unwrap();
        let scores = scores.as_obj().unwrap().shuck();
        assert!(scores.is_list());
        assert_eq!(scores.at(1), Some(Value::from(2.5)));
        assert_eq!(scores.at(2), Some(Value::Null));
    }

    #[test]
    fn export_round_trips_trees() {
        let original = json!({
            "a": [true, "x", 3.0],
            "b": { "c": null },
        });
        let exported = Value::from_json(&original).to_json().unwrap();
        assert_eq!(exported, original);
    }

    #[test]
    fn export_rejects_cycles() {
        let root = Obj::map();
        root.insert("me", root.clone()).unwrap();
        let err = Value::from(root).to_json().unwrap_err();
        assert!(matches!(err, GraphError::CyclicValue));
    }

    #[test]
    fn shared_but_acyclic_subtrees_export_fine() {
        let shared = Obj::map();
        shared.insert("v", 1).unwrap();
        let root = Obj::map();
        root.insert("left", shared.clone()).unwrap();
        root.insert("right", shared).unwrap();

        let exported = Value::from(root).to_json().unwrap();
        assert_eq!(exported, json!({ "left": { "v": 1.0 }, "right": { "v": 1.0 } }));
    }

    #[test]
    fn non_finite_numbers_export_as_null() {
        let list = Obj::list();
        list.push(f64::NAN).unwrap();
        let exported = Value::from(list).to_json().unwrap();
        assert_eq!(exported, json!([null]));
    }
}
