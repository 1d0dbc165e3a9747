use crate::error::{ProcessingError, Result};
use crate::models::template::display_json;
use serde::{Serialize, Serializer};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};

pub const VARIABLE_UNIT_KEY: &str = "variable-unit";

/// Running min/max of the time dimension. Starts at the infinite sentinels so
/// the first observation always replaces both bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeRange {
    pub min_value: f64,
    pub max_value: f64,
}

impl TimeRange {
    pub fn new(min_value: f64, max_value: f64) -> Self {
        Self {
            min_value,
            max_value,
        }
    }

    pub fn observe(&mut self, value: f64) {
        if value < self.min_value {
            self.min_value = value;
        }
        if value > self.max_value {
            self.max_value = value;
        }
    }

    pub fn merge(&mut self, other: &TimeRange) {
        self.min_value = self.min_value.min(other.min_value);
        self.max_value = self.max_value.max(other.max_value);
    }

    /// True until at least one value has been observed.
    pub fn is_empty(&self) -> bool {
        self.min_value > self.max_value
    }

    fn to_json(self) -> Value {
        json!({
            "min_value": finite_or_null(self.min_value),
            "max_value": finite_or_null(self.max_value),
        })
    }

    fn from_json(value: &Value) -> Result<Self> {
        let bound = |key: &str, sentinel: f64| -> Result<f64> {
            match value.get(key) {
                None | Some(Value::Null) => Ok(sentinel),
                Some(v) => v.as_f64().ok_or_else(|| {
                    ProcessingError::Aggregate(format!("time range '{}' is not a number: {}", key, v))
                }),
            }
        };
        Ok(Self {
            min_value: bound("min_value", f64::INFINITY)?,
            max_value: bound("max_value", f64::NEG_INFINITY)?,
        })
    }
}

impl Default for TimeRange {
    fn default() -> Self {
        Self::new(f64::INFINITY, f64::NEG_INFINITY)
    }
}

fn finite_or_null(value: f64) -> Value {
    if value.is_finite() {
        json!(value)
    } else {
        Value::Null
    }
}

/// Aggregated statistics for one validated file (or a merge of several).
///
/// Serialized as a flat JSON object: `<time>_meta` with the time range, one
/// array of distinct values per harvested column, and `variable-unit` pairs.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationMetadata {
    time_dimension: String,
    pub time_range: TimeRange,
    pub columns: BTreeMap<String, BTreeSet<String>>,
    pub variable_units: BTreeSet<(String, String)>,
}

impl ValidationMetadata {
    pub fn new(time_dimension: &str) -> Self {
        Self {
            time_dimension: time_dimension.to_lowercase(),
            time_range: TimeRange::default(),
            columns: BTreeMap::new(),
            variable_units: BTreeSet::new(),
        }
    }

    pub fn time_dimension(&self) -> &str {
        &self.time_dimension
    }

    pub fn time_meta_key(&self) -> String {
        format!("{}_meta", self.time_dimension)
    }

    pub fn column(&self, name: &str) -> Option<&BTreeSet<String>> {
        self.columns.get(name)
    }

    pub fn to_json(&self) -> Value {
        let mut object = Map::new();
        object.insert(self.time_meta_key(), self.time_range.to_json());
        for (name, values) in &self.columns {
            object.insert(name.clone(), json!(values));
        }
        let pairs: Vec<[&str; 2]> = self
            .variable_units
            .iter()
            .map(|(variable, unit)| [variable.as_str(), unit.as_str()])
            .collect();
        object.insert(VARIABLE_UNIT_KEY.to_string(), json!(pairs));
        Value::Object(object)
    }

    /// Parse metadata stored by an earlier validation run. A document without
    /// the expected time key was produced under a different schema, and the file
    /// it describes must be validated again.
    pub fn from_json(time_dimension: &str, value: &Value) -> Result<Self> {
        let mut metadata = Self::new(time_dimension);
        let time_key = metadata.time_meta_key();

        let object = value.as_object().ok_or_else(|| {
            ProcessingError::Aggregate(format!("validation metadata must be an object, found {}", value))
        })?;

        let time_meta = object
            .iter()
            .find(|(key, _)| key.to_lowercase() == time_key)
            .map(|(_, v)| v)
            .ok_or_else(|| {
                ProcessingError::Aggregate(format!("metadata has no '{}'; revalidate the file", time_key))
            })?;
        metadata.time_range = TimeRange::from_json(time_meta)?;

        for (key, entry) in object {
            let key = key.to_lowercase();
            if key == time_key {
                continue;
            }
            let items = entry.as_array().ok_or_else(|| {
                ProcessingError::Aggregate(format!("metadata entry '{}' must be an array", key))
            })?;

            if key == VARIABLE_UNIT_KEY {
                for pair in items {
                    match pair.as_array().map(Vec::as_slice) {
                        Some([variable, unit]) => {
                            metadata
                                .variable_units
                                .insert((display_json(variable), display_json(unit)));
                        }
                        _ => {
                            return Err(ProcessingError::Aggregate(format!(
                                "'{}' entries must be [variable, unit] pairs, found {}",
                                VARIABLE_UNIT_KEY, pair
                            )))
                        }
                    }
                }
            } else {
                metadata
                    .columns
                    .entry(key)
                    .or_default()
                    .extend(items.iter().map(display_json));
            }
        }

        Ok(metadata)
    }
}

impl Serialize for ValidationMetadata {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_time_range_sentinels() {
        let mut range = TimeRange::default();
        assert!(range.is_empty());

        range.observe(2010.0);
        range.observe(2000.0);
        assert!(!range.is_empty());
        assert_eq!(range, TimeRange::new(2000.0, 2010.0));
    }

    #[test]
    fn test_time_range_merge() {
        let mut first = TimeRange::new(0.0, 10.0);
        first.merge(&TimeRange::new(-5.0, 20.0));
        assert_eq!(first, TimeRange::new(-5.0, 20.0));

        let mut empty = TimeRange::default();
        empty.merge(&TimeRange::new(1.0, 2.0));
        assert_eq!(empty, TimeRange::new(1.0, 2.0));
    }

    #[test]
    fn test_json_shape() {
        let mut metadata = ValidationMetadata::new("Year");
        metadata.time_range = TimeRange::new(2000.0, 2010.0);
        metadata
            .columns
            .entry("region".to_string())
            .or_default()
            .extend(["B".to_string(), "A".to_string()]);
        metadata
            .variable_units
            .insert(("Emissions".to_string(), "Mt".to_string()));

        assert_eq!(
            metadata.to_json(),
            json!({
                "year_meta": {"min_value": 2000.0, "max_value": 2010.0},
                "region": ["A", "B"],
                "variable-unit": [["Emissions", "Mt"]]
            })
        );
    }

    #[test]
    fn test_empty_range_serializes_as_null_and_reads_back() {
        let metadata = ValidationMetadata::new("year");
        let value = metadata.to_json();
        assert_eq!(value["year_meta"], json!({"min_value": null, "max_value": null}));

        let parsed = ValidationMetadata::from_json("year", &value).unwrap();
        assert!(parsed.time_range.is_empty());
        assert_eq!(parsed, metadata);
    }

    #[test]
    fn test_from_json_accepts_numbers_and_mixed_case_keys() {
        let parsed = ValidationMetadata::from_json(
            "year",
            &json!({
                "YEAR_meta": {"min_value": 1990, "max_value": 2000},
                "Scenario": ["SSP1", 2],
                "variable-unit": [["GDP", "USD"]]
            }),
        )
        .unwrap();

        assert_eq!(parsed.time_range, TimeRange::new(1990.0, 2000.0));
        assert_eq!(
            parsed.column("scenario").unwrap().iter().collect::<Vec<_>>(),
            vec!["2", "SSP1"]
        );
        assert!(parsed
            .variable_units
            .contains(&("GDP".to_string(), "USD".to_string())));
    }

    #[test]
    fn test_missing_time_key_demands_revalidation() {
        let err = ValidationMetadata::from_json("year", &json!({"region": ["A"]})).unwrap_err();
        assert!(matches!(err, ProcessingError::Aggregate(_)));
        assert!(err.to_string().contains("revalidate"));
    }

    #[test]
    fn test_malformed_variable_unit_pair() {
        let err = ValidationMetadata::from_json(
            "year",
            &json!({"year_meta": {}, "variable-unit": [["only-one"]]}),
        )
        .unwrap_err();
        assert!(matches!(err, ProcessingError::Aggregate(_)));
    }
}
