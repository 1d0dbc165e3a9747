//! Pointer paths used by cross-field template validators.
//!
//! A path is a list of steps such as `["&map_variable", "{variable}", "unit"]`:
//! `&name` jumps to a top-level entry of the template document, `{column}` takes
//! the current row's value for `column` (as the starting value, or as a key into
//! the value resolved so far), and any other string is a plain key lookup.

use crate::error::{ProcessingError, Result};
use crate::models::row::{FieldValue, ValidatedRow};
use serde_json::Value;
use std::borrow::Cow;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PointerStep {
    Document(String),
    RowValue(String),
    Key(String),
}

impl PointerStep {
    pub fn parse(token: &str) -> Self {
        if let Some(name) = token.strip_prefix('&') {
            PointerStep::Document(name.to_string())
        } else if token.len() >= 2 && token.starts_with('{') && token.ends_with('}') {
            PointerStep::RowValue(token[1..token.len() - 1].to_lowercase())
        } else {
            PointerStep::Key(token.to_string())
        }
    }
}

impl fmt::Display for PointerStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PointerStep::Document(name) => write!(f, "&{}", name),
            PointerStep::RowValue(column) => write!(f, "{{{}}}", column),
            PointerStep::Key(key) => write!(f, "{}", key),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointerPath {
    steps: Vec<PointerStep>,
}

impl PointerPath {
    pub fn new(steps: Vec<PointerStep>) -> Result<Self> {
        if steps.is_empty() {
            return Err(ProcessingError::schema("pointer path must not be empty"));
        }
        Ok(Self { steps })
    }

    /// Build a path from its JSON form: an array of step strings.
    pub fn from_json(value: &Value) -> Result<Self> {
        let tokens = value.as_array().ok_or_else(|| {
            ProcessingError::schema(format!("pointer path must be an array, found {}", value))
        })?;

        let steps = tokens
            .iter()
            .map(|token| {
                token.as_str().map(PointerStep::parse).ok_or_else(|| {
                    ProcessingError::schema(format!("pointer step must be a string, found {}", token))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Self::new(steps)
    }

    pub fn steps(&self) -> &[PointerStep] {
        &self.steps
    }

    /// Resolve against the template document and the current row. Failures are
    /// row faults: the same template can resolve for one row and not another.
    pub fn resolve<'a>(&self, document: &'a Value, row: &ValidatedRow) -> Result<Cow<'a, Value>> {
        let mut current: Option<Cow<'a, Value>> = None;

        for step in &self.steps {
            current = Some(match (step, current.take()) {
                (PointerStep::Document(name), _) => {
                    let entry = document.get(name).ok_or_else(|| {
                        ProcessingError::row(format!("template has no entry '{}' (pointer {})", name, self))
                    })?;
                    Cow::Borrowed(entry)
                }
                (PointerStep::RowValue(column), None) => Cow::Owned(row_value(row, column)?.to_json()),
                (PointerStep::RowValue(column), Some(value)) => {
                    let key = row_value(row, column)?.as_scalar().ok_or_else(|| {
                        ProcessingError::row(format!(
                            "column '{}' holds a list and cannot be used as a key (pointer {})",
                            column, self
                        ))
                    })?;
                    index(value, key, self)?
                }
                (PointerStep::Key(key), Some(value)) => index(value, key, self)?,
                (PointerStep::Key(key), None) => {
                    return Err(ProcessingError::row(format!(
                        "pointer {} starts with plain key '{}' and has nothing to index",
                        self, key
                    )))
                }
            });
        }

        current.ok_or_else(|| ProcessingError::row(format!("pointer {} resolved to nothing", self)))
    }
}

impl fmt::Display for PointerPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let steps: Vec<String> = self.steps.iter().map(ToString::to_string).collect();
        write!(f, "[{}]", steps.join(", "))
    }
}

fn row_value<'r>(row: &'r ValidatedRow, column: &str) -> Result<&'r FieldValue> {
    row.get(column)
        .ok_or_else(|| ProcessingError::row(format!("row has no column '{}'", column)))
}

fn index<'a>(value: Cow<'a, Value>, key: &str, path: &PointerPath) -> Result<Cow<'a, Value>> {
    let missing = || ProcessingError::row(format!("'{}' not found while resolving pointer {}", key, path));
    match value {
        Cow::Borrowed(v) => v.get(key).map(Cow::Borrowed).ok_or_else(missing),
        Cow::Owned(v) => v.get(key).cloned().map(Cow::Owned).ok_or_else(missing),
    }
}
