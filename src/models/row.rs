use serde_json::Value;
use std::fmt;

/// One record as read from a delimited file. Column names are lower-cased on
/// insertion so every later lookup is case-insensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRow {
    columns: Vec<(String, String)>,
}

impl RawRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut row = Self::new();
        for (name, value) in pairs {
            row.insert(name.as_ref(), value);
        }
        row
    }

    /// Insert or overwrite a column value.
    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        let name = name.to_lowercase();
        let value = value.into();
        match self.columns.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = value,
            None => self.columns.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        let name = name.to_lowercase();
        self.columns
            .iter()
            .find(|(existing, _)| *existing == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.columns
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// True when every value is whitespace. Such rows are skipped, not validated.
    pub fn is_blank(&self) -> bool {
        self.columns.iter().all(|(_, value)| value.trim().is_empty())
    }
}

impl fmt::Display for RawRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (name, value)) in self.columns.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {:?}", name, value)?;
        }
        write!(f, "}}")
    }
}

/// A cell after preprocessing: array-typed fields are split into their elements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Scalar(String),
    List(Vec<String>),
}

impl FieldValue {
    pub fn as_scalar(&self) -> Option<&str> {
        match self {
            FieldValue::Scalar(value) => Some(value),
            FieldValue::List(_) => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            FieldValue::List(items) => Some(items),
            FieldValue::Scalar(_) => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Scalar(value) => Value::String(value.clone()),
            FieldValue::List(items) => {
                Value::Array(items.iter().cloned().map(Value::String).collect())
            }
        }
    }
}

/// A row that passed template validation. The raw row is kept alongside the
/// split fields because the CSV output is written from raw values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedRow {
    raw: RawRow,
    fields: Vec<(String, FieldValue)>,
}

impl ValidatedRow {
    pub fn new(raw: RawRow, fields: Vec<(String, FieldValue)>) -> Self {
        Self { raw, fields }
    }

    pub fn raw(&self) -> &RawRow {
        &self.raw
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        let name = name.to_lowercase();
        self.fields
            .iter()
            .find(|(existing, _)| *existing == name)
            .map(|(_, value)| value)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn into_raw(self) -> RawRow {
        self.raw
    }
}
