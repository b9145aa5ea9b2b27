//! Argument values and their wire form.
//!
//! Arguments are kept as `serde_json::Value` until dispatch. The remote side
//! expects flat form fields, so lists are comma-joined and booleans become
//! `1`/`0`.

use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValueError {
    #[error("expected a mapping of argument names to values, got {0}")]
    InvalidInput(String),
}

/// Insertion-ordered call arguments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    entries: Vec<(String, Value)>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn arg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Set `name`, replacing an earlier value in place.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(key, _)| *key == name) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        let index = self.entries.iter().position(|(key, _)| key == name)?;
        Some(self.entries.remove(index).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `defaults` overlaid with these arguments; on a shared name these win.
    pub fn with_defaults(&self, defaults: &CallArgs) -> CallArgs {
        let mut merged = defaults.clone();
        for (name, value) in &self.entries {
            merged.insert(name.clone(), value.clone());
        }
        merged
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for CallArgs {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut args = CallArgs::new();
        for (name, value) in iter {
            args.insert(name, value);
        }
        args
    }
}

impl TryFrom<Value> for CallArgs {
    type Error = ValueError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(map.into_iter().collect()),
            other => Err(ValueError::InvalidInput(type_name(&other).into())),
        }
    }
}

impl From<Map<String, Value>> for CallArgs {
    fn from(map: Map<String, Value>) -> Self {
        map.into_iter().collect()
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "mapping",
    }
}

fn element_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Number(number) => number.to_string(),
        Value::Bool(flag) => bool_text(*flag).into(),
        other => other.to_string(),
    }
}

fn bool_text(flag: bool) -> &'static str {
    if flag { "1" } else { "0" }
}

fn join_list(items: &[Value]) -> String {
    items.iter().map(element_text).collect::<Vec<_>>().join(",")
}

/// Flatten list values of a mapping into comma-joined strings.
///
/// Strings and other scalars pass through untouched; key order is kept.
/// Anything but a mapping is rejected.
pub fn stringify_values(values: &Value) -> Result<Map<String, Value>, ValueError> {
    let map = values
        .as_object()
        .ok_or_else(|| ValueError::InvalidInput(type_name(values).into()))?;

    Ok(map
        .iter()
        .map(|(key, value)| {
            let value = match value {
                Value::Array(items) => Value::String(join_list(items)),
                other => other.clone(),
            };
            (key.clone(), value)
        })
        .collect())
}

/// Typed variant of [`stringify_values`].
pub fn stringify_args(args: &CallArgs) -> CallArgs {
    args.iter()
        .map(|(key, value)| {
            let value = match value {
                Value::Array(items) => Value::String(join_list(items)),
                other => other.clone(),
            };
            (key, value)
        })
        .collect()
}

/// Form fields as sent on the wire. `null` arguments are left out.
pub fn to_form_fields(args: &CallArgs) -> Vec<(String, String)> {
    args.iter()
        .filter_map(|(key, value)| {
            let text = match value {
                Value::Null => return None,
                Value::String(text) => text.clone(),
                Value::Number(number) => number.to_string(),
                Value::Bool(flag) => bool_text(*flag).to_string(),
                Value::Array(items) => join_list(items),
                Value::Object(_) => value.to_string(),
            };
            Some((key.to_string(), text))
        })
        .collect()
}
