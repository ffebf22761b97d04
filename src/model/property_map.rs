//! PropertyMap — the key-value store on nodes and relationships.
//!
//! Backed by `IndexMap` rather than `HashMap` so that key insertion order
//! is preserved; this matters because `Value::Map` shares the same
//! semantics and openCypher keeps map-literal key order observable in
//! things like `keys()`/`properties()` output even though map equality is
//! itself order-independent.

use super::Value;
use indexmap::IndexMap;

/// A map of property names to values.
pub type PropertyMap = IndexMap<String, Value>;

/// Convert an iterator of (key, value) pairs into a `Value::Map`.
impl<K, V> From<Vec<(K, V)>> for Value
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from(pairs: Vec<(K, V)>) -> Self {
        Value::Map(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}
