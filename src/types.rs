use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A cell payload. The store reports numbers separately from text, so both survive a
/// round trip; numbers always come back as `f64`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Number(f64),
    Text(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{}", n),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

/// One addressed value. `key` is `(row, col)`, both 1-based. `None` means empty,
/// and writing it clears the cell.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    pub key: (u32, u32),
    pub value: Option<Value>,
}

impl Cell {
    pub fn new(row: u32, col: u32, value: impl Into<Value>) -> Self {
        Self {
            key: (row, col),
            value: Some(value.into()),
        }
    }

    pub fn empty(row: u32, col: u32) -> Self {
        Self {
            key: (row, col),
            value: None,
        }
    }

    pub fn row(&self) -> u32 {
        self.key.0
    }

    pub fn col(&self) -> u32 {
        self.key.1
    }
}

/// Every known cell of one row, keyed by column.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub key: u32,
    pub value: BTreeMap<u32, Option<Value>>,
}

impl Row {
    pub fn new(key: u32) -> Self {
        Self {
            key,
            value: BTreeMap::new(),
        }
    }

    /// Build a row from values in column order; the first value lands in column 1.
    pub fn from_values<I, V>(key: u32, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Option<Value>>,
    {
        let value = values
            .into_iter()
            .enumerate()
            .map(|(idx, v)| (idx as u32 + 1, v.into()))
            .collect();
        Self { key, value }
    }

    pub fn with(mut self, col: u32, value: impl Into<Value>) -> Self {
        self.value.insert(col, Some(value.into()));
        self
    }
}

/// A row read through a header: field name to value.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub key: u32,
    pub value: BTreeMap<String, Option<Value>>,
}

impl Record {
    pub fn new(key: u32) -> Self {
        Self {
            key,
            value: BTreeMap::new(),
        }
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.value.insert(field.into(), Some(value.into()));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_display_drops_integral_fraction() {
        assert_eq!(Value::Number(3.0).to_string(), "3");
        assert_eq!(Value::Number(2.5).to_string(), "2.5");
        assert_eq!(Value::from("x").to_string(), "x");
    }

    #[test]
    fn test_row_from_values_is_one_based() {
        let row = Row::from_values(4, vec![Some(Value::from("a")), None, Some(Value::from(7.0))]);
        assert_eq!(row.key, 4);
        assert_eq!(row.value.keys().copied().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(row.value[&1], Some(Value::from("a")));
        assert_eq!(row.value[&2], None);
    }

    #[test]
    fn test_value_serializes_untagged() {
        let cell = Cell::new(1, 2, 4.5);
        let json = serde_json::to_string(&cell).unwrap();
        assert_eq!(json, r#"{"key":[1,2],"value":4.5}"#);
        let back: Cell = serde_json::from_str(r#"{"key":[2,1],"value":"Jed"}"#).unwrap();
        assert_eq!(back, Cell::new(2, 1, "Jed"));
    }
}
