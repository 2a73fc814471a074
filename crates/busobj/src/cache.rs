//! Current property values of one exposed object, keyed by property name.

use std::collections::HashMap;

use crate::value::Value;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PropertyCache {
    values: HashMap<String, Value>,
}

impl PropertyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, property: &str) -> Option<&Value> {
        self.values.get(property)
    }

    /// Stores a value, returning the previous one.
    pub fn insert(&mut self, property: impl Into<String>, value: Value) -> Option<Value> {
        self.values.insert(property.into(), value)
    }

    pub fn remove(&mut self, property: &str) -> Option<Value> {
        self.values.remove(property)
    }

    pub fn contains(&self, property: &str) -> bool {
        self.values.contains_key(property)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}
