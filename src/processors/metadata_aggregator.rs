use crate::error::{ProcessingError, Result};
use crate::models::{coerce_number, TemplateRules, ValidatedRow, ValidationMetadata};
use crate::utils::constants::HARVEST_LIMIT;
use serde_json::Value;
use std::collections::BTreeSet;

/// Per-file reducer: folds every accepted row into [`ValidationMetadata`].
///
/// Distinct-value harvesting is bounded. Once a column holds `limit` values new
/// ones are dropped silently; the column is remembered as truncated so callers
/// can report it.
pub struct MetadataCollector {
    time_dimension: String,
    variable_dimension: String,
    unit_dimension: String,
    harvest_columns: Vec<String>,
    limit: usize,
    metadata: ValidationMetadata,
    truncated: BTreeSet<String>,
}

impl MetadataCollector {
    pub fn new(rules: &TemplateRules) -> Self {
        let declarations = rules.declarations();
        let special = [
            declarations.time_dimension.as_str(),
            declarations.value_dimension.as_str(),
            declarations.variable_dimension.as_str(),
            declarations.unit_dimension.as_str(),
        ];

        let harvest_columns = rules
            .schema()
            .properties
            .iter()
            .filter(|p| !p.is_array() && !special.contains(&p.name.as_str()))
            .map(|p| p.name.clone())
            .collect();

        Self {
            time_dimension: declarations.time_dimension.clone(),
            variable_dimension: declarations.variable_dimension.clone(),
            unit_dimension: declarations.unit_dimension.clone(),
            harvest_columns,
            limit: HARVEST_LIMIT,
            metadata: ValidationMetadata::new(&declarations.time_dimension),
            truncated: BTreeSet::new(),
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn observe(&mut self, row: &ValidatedRow) -> Result<()> {
        let raw = row.raw();

        let time_cell = raw.get(&self.time_dimension).unwrap_or_default();
        let time = coerce_number(time_cell).ok_or_else(|| {
            ProcessingError::InvalidFormat(format!(
                "time dimension value '{}' reached metadata collection unvalidated",
                time_cell
            ))
        })?;
        self.metadata.time_range.observe(time);

        for column in &self.harvest_columns {
            let Some(value) = raw.get(column) else {
                continue;
            };
            let values = self.metadata.columns.entry(column.clone()).or_default();
            if values.len() < self.limit {
                values.insert(value.to_string());
            } else if !values.contains(value) {
                self.truncated.insert(column.clone());
            }
        }

        let pair = (
            raw.get(&self.variable_dimension).unwrap_or_default().to_string(),
            raw.get(&self.unit_dimension).unwrap_or_default().to_string(),
        );
        let pairs = &mut self.metadata.variable_units;
        if pairs.len() < self.limit {
            pairs.insert(pair);
        } else if !pairs.contains(&pair) {
            self.truncated.insert(crate::models::VARIABLE_UNIT_KEY.to_string());
        }

        Ok(())
    }

    pub fn metadata(&self) -> &ValidationMetadata {
        &self.metadata
    }

    pub fn truncated_columns(&self) -> impl Iterator<Item = &str> {
        self.truncated.iter().map(String::as_str)
    }

    pub fn finish(self) -> ValidationMetadata {
        self.metadata
    }
}

/// Combines per-file metadata at merge time. Sets are unioned without a cap.
pub struct MetadataAggregator {
    time_dimension: String,
}

impl MetadataAggregator {
    pub fn new(time_dimension: &str) -> Self {
        Self {
            time_dimension: time_dimension.to_lowercase(),
        }
    }

    /// Parse stored metadata documents, one per file, and merge them. A file
    /// whose document lacks the time key is named in the error.
    pub fn merge_documents<'a, I>(&self, documents: I) -> Result<ValidationMetadata>
    where
        I: IntoIterator<Item = (&'a str, &'a Value)>,
    {
        let parsed = documents
            .into_iter()
            .map(|(file, document)| {
                ValidationMetadata::from_json(&self.time_dimension, document).map_err(|e| match e {
                    ProcessingError::Aggregate(msg) => {
                        ProcessingError::Aggregate(format!("Revalidate bucket object #{}: {}", file, msg))
                    }
                    other => other,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        self.merge(&parsed)
    }

    pub fn merge(&self, items: &[ValidationMetadata]) -> Result<ValidationMetadata> {
        let mut merged = ValidationMetadata::new(&self.time_dimension);

        for item in items {
            if item.time_dimension() != self.time_dimension {
                return Err(ProcessingError::Aggregate(format!(
                    "metadata uses time dimension '{}' but '{}' was expected",
                    item.time_dimension(),
                    self.time_dimension
                )));
            }

            merged.time_range.merge(&item.time_range);
            for (column, values) in &item.columns {
                merged
                    .columns
                    .entry(column.clone())
                    .or_default()
                    .extend(values.iter().cloned());
            }
            merged
                .variable_units
                .extend(item.variable_units.iter().cloned());
        }

        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::template::fixtures::rules_document;
    use crate::models::{RawRow, TimeRange};
    use crate::processors::RowValidator;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn rules() -> TemplateRules {
        let mut doc = rules_document();
        doc["root"]["properties"]["sectors"] =
            json!({"type": "array", "x-split": "|", "items": {"type": "string"}});
        TemplateRules::from_value(1, doc).unwrap()
    }

    fn validated(rules: &TemplateRules, region: &str, year: &str) -> ValidatedRow {
        let raw = RawRow::from_pairs([
            ("region", region),
            ("variable", "GDP"),
            ("unit", "USD"),
            ("year", year),
            ("value", "1"),
            ("sectors", "a|b"),
        ]);
        RowValidator::new(rules).validate(raw).unwrap()
    }

    #[test]
    fn test_collects_range_sets_and_pairs() -> Result<()> {
        let rules = rules();
        let mut collector = MetadataCollector::new(&rules);

        collector.observe(&validated(&rules, "B", "2010"))?;
        collector.observe(&validated(&rules, "A", "2000"))?;
        collector.observe(&validated(&rules, "A", "2005"))?;

        let metadata = collector.finish();
        assert_eq!(metadata.time_range, TimeRange::new(2000.0, 2010.0));
        assert!(metadata.time_range.min_value <= metadata.time_range.max_value);
        assert_eq!(
            metadata.column("region").unwrap().iter().collect::<Vec<_>>(),
            vec!["A", "B"]
        );
        assert_eq!(metadata.variable_units.len(), 1);
        // special and array columns are not harvested
        for skipped in ["year", "value", "variable", "unit", "sectors"] {
            assert!(metadata.column(skipped).is_none(), "{} harvested", skipped);
        }
        Ok(())
    }

    #[test]
    fn test_harvest_caps_at_limit() -> Result<()> {
        let rules = rules();
        let mut collector = MetadataCollector::new(&rules);

        for i in 0..2000 {
            collector.observe(&validated(&rules, &format!("R{}", i), "2000"))?;
        }

        assert_eq!(collector.metadata().column("region").unwrap().len(), HARVEST_LIMIT);
        assert_eq!(collector.truncated_columns().collect::<Vec<_>>(), vec!["region"]);
        Ok(())
    }

    #[test]
    fn test_repeated_values_at_cap_are_not_truncation() -> Result<()> {
        let rules = rules();
        let mut collector = MetadataCollector::new(&rules).with_limit(2);

        for region in ["A", "B", "A", "B"] {
            collector.observe(&validated(&rules, region, "2000"))?;
        }
        assert_eq!(collector.truncated_columns().count(), 0);

        collector.observe(&validated(&rules, "C", "2000"))?;
        assert_eq!(collector.truncated_columns().collect::<Vec<_>>(), vec!["region"]);
        Ok(())
    }

    #[test]
    fn test_merge_time_ranges_and_union_sets() -> Result<()> {
        let aggregator = MetadataAggregator::new("year");
        let first = json!({
            "year_meta": {"min_value": 0, "max_value": 10},
            "region": ["A"],
            "variable-unit": [["GDP", "USD"]]
        });
        let second = json!({
            "year_meta": {"min_value": -5, "max_value": 20},
            "region": ["B"],
            "scenario": ["SSP2"],
            "variable-unit": [["GDP", "USD"], ["Population", "million"]]
        });

        let merged = aggregator.merge_documents([("a.csv", &first), ("b.csv", &second)])?;

        assert_eq!(merged.time_range, TimeRange::new(-5.0, 20.0));
        assert_eq!(
            merged.to_json(),
            json!({
                "year_meta": {"min_value": -5.0, "max_value": 20.0},
                "region": ["A", "B"],
                "scenario": ["SSP2"],
                "variable-unit": [["GDP", "USD"], ["Population", "million"]]
            })
        );
        Ok(())
    }

    #[test]
    fn test_merge_is_not_capped() -> Result<()> {
        let aggregator = MetadataAggregator::new("year");
        let mut parts = Vec::new();
        for chunk in 0..2 {
            let mut metadata = ValidationMetadata::new("year");
            metadata.columns.insert(
                "region".to_string(),
                (0..HARVEST_LIMIT).map(|i| format!("{}-{}", chunk, i)).collect(),
            );
            parts.push(metadata);
        }

        let merged = aggregator.merge(&parts)?;
        assert_eq!(merged.column("region").unwrap().len(), 2 * HARVEST_LIMIT);
        Ok(())
    }

    #[test]
    fn test_stale_metadata_names_file() {
        let aggregator = MetadataAggregator::new("year");
        let good = json!({"year_meta": {"min_value": 1, "max_value": 2}});
        let stale = json!({"date_meta": {"min_value": 1, "max_value": 2}});

        let err = aggregator
            .merge_documents([("inputs/a.csv", &good), ("inputs/b.csv", &stale)])
            .unwrap_err();
        assert!(matches!(err, ProcessingError::Aggregate(_)));
        assert!(err.to_string().contains("Revalidate bucket object #inputs/b.csv"));
    }
}
