use crate::error::{ProcessingError, Result};
use crate::models::schema::{coerce_number, ItemSchema, JsonType, PropertySchema};
use crate::models::template::{display_json, Condition, FieldValidator};
use crate::models::{FieldValue, RawRow, TemplateRules, ValidatedRow};
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;

/// A row that failed validation, returned with the fault that rejected it.
#[derive(Debug)]
pub struct RejectedRow {
    pub error: ProcessingError,
    pub row: RawRow,
}

/// Validates single rows against compiled template rules.
///
/// The validator is pure: it never touches running metadata. Callers feed the
/// rows it accepts into a [`MetadataCollector`](crate::processors::MetadataCollector).
pub struct RowValidator<'a> {
    rules: &'a TemplateRules,
}

impl<'a> RowValidator<'a> {
    pub fn new(rules: &'a TemplateRules) -> Self {
        Self { rules }
    }

    /// Validate one row. Non-compliant rows fail with
    /// [`ProcessingError::RowValidation`]; nothing else is returned for data faults.
    pub fn validate(&self, raw: RawRow) -> Result<ValidatedRow> {
        self.try_validate(raw).map_err(|rejected| rejected.error)
    }

    /// Like [`validate`](Self::validate), but hands a rejected row back to the
    /// caller together with the fault.
    pub fn try_validate(&self, raw: RawRow) -> std::result::Result<ValidatedRow, RejectedRow> {
        let fields = self.preprocess(&raw);
        let validated = ValidatedRow::new(raw, fields);

        match self.check(&validated) {
            Ok(()) => Ok(validated),
            Err(error) => Err(RejectedRow {
                error,
                row: validated.into_raw(),
            }),
        }
    }

    fn check(&self, row: &ValidatedRow) -> Result<()> {
        self.check_schema(row)?;
        self.check_time_dimension(row)?;
        self.check_lookup_tables(row)?;
        for validator in self.rules.validators() {
            self.check_template_validator(validator, row)?;
        }
        Ok(())
    }

    /// Split declared array fields on their delimiter. A missing or empty array
    /// cell becomes an empty list.
    fn preprocess(&self, raw: &RawRow) -> Vec<(String, FieldValue)> {
        let schema = self.rules.schema();
        let mut fields: Vec<(String, FieldValue)> = raw
            .iter()
            .map(|(name, value)| {
                let field = match schema.property(name).and_then(|p| p.split.as_deref()) {
                    Some(splitter) => split_cell(value, splitter),
                    None => FieldValue::Scalar(value.to_string()),
                };
                (name.to_string(), field)
            })
            .collect();

        for property in schema.properties.iter().filter(|p| p.is_array()) {
            if !raw.contains(&property.name) {
                fields.push((property.name.clone(), FieldValue::List(Vec::new())));
            }
        }

        fields
    }

    fn invalid(&self, detail: impl std::fmt::Display) -> ProcessingError {
        ProcessingError::row(format!(
            "Invalid data. Template id: {}. {}",
            self.rules.template_id(),
            detail
        ))
    }

    fn check_schema(&self, row: &ValidatedRow) -> Result<()> {
        let schema = self.rules.schema();

        for name in &schema.required {
            if row.get(name).is_none() {
                return Err(self.invalid(format!("'{}' is a required property", name)));
            }
        }

        if !schema.additional_properties {
            if let Some((name, _)) = row.fields().find(|(name, _)| schema.property(name).is_none()) {
                return Err(self.invalid(format!(
                    "Additional properties are not allowed ('{}' was unexpected)",
                    name
                )));
            }
        }

        for property in &schema.properties {
            match row.get(&property.name) {
                Some(FieldValue::Scalar(value)) => check_scalar(property, value)
                    .map_err(|e| self.invalid(format!("Field '{}': {}", property.name, e)))?,
                Some(FieldValue::List(items)) => check_list(property, items)
                    .map_err(|e| self.invalid(format!("Field '{}': {}", property.name, e)))?,
                None => {
                    return Err(self.invalid(format!("column '{}' is missing", property.name)));
                }
            }
        }

        Ok(())
    }

    fn check_time_dimension(&self, row: &ValidatedRow) -> Result<()> {
        let column = self.rules.time_dimension();
        let value = row.raw().get(column).unwrap_or_default();
        match coerce_number(value) {
            Some(n) if n.is_finite() => Ok(()),
            _ => Err(self.invalid(format!(
                "'{}' in time dimension '{}' is not a finite number",
                value, column
            ))),
        }
    }

    fn check_lookup_tables(&self, row: &ValidatedRow) -> Result<()> {
        for property in &self.rules.schema().properties {
            let Some(table) = self.rules.lookup_table(&property.name) else {
                continue;
            };
            let values: Vec<&str> = match row.get(&property.name) {
                Some(FieldValue::Scalar(value)) => vec![value.as_str()],
                Some(FieldValue::List(items)) => items.iter().map(String::as_str).collect(),
                None => continue,
            };
            if let Some(outsider) = values.into_iter().find(|v| !table.contains(v)) {
                return Err(ProcessingError::row(format!(
                    "'{}' must be one of [{}]",
                    outsider,
                    table.allowed().join(", ")
                )));
            }
        }
        Ok(())
    }

    fn check_template_validator(&self, validator: &FieldValidator, row: &ValidatedRow) -> Result<()> {
        let lhs = row.raw().get(&validator.field).ok_or_else(|| {
            ProcessingError::row(format!(
                "column '{}' referenced by template validators is missing",
                validator.field
            ))
        })?;
        let document = self.rules.document();

        for condition in &validator.conditions {
            match condition {
                Condition::ValueEquals(pointer) => {
                    let rhs = pointer.resolve(document, row)?;
                    if !value_equals(lhs, &rhs) {
                        return Err(ProcessingError::row(format!(
                            "{} in {} column must be equal to {}.",
                            lhs,
                            validator.field,
                            display_json(&rhs)
                        )));
                    }
                }
                Condition::IsSubsetOfMap(pointer) => {
                    let rhs = pointer.resolve(document, row)?;
                    if !is_member(lhs, &rhs) {
                        return Err(ProcessingError::row(format!(
                            "{} in {} column must be member of {}.",
                            lhs,
                            validator.field,
                            display_json(&rhs)
                        )));
                    }
                }
                Condition::Regex { template, context } => {
                    let mut resolved = HashMap::with_capacity(context.len() + 1);
                    resolved.insert("lhs", lhs.to_string());
                    for (name, pointer) in context {
                        let value = pointer.resolve(document, row)?;
                        resolved.insert(name.as_str(), display_json(value.as_ref()));
                    }
                    let pattern = format_template(template, &resolved)?;
                    let regex = Regex::new(&format!("^(?:{})", pattern)).map_err(|e| {
                        ProcessingError::row(format!("pattern {} is not a valid regex: {}", pattern, e))
                    })?;
                    if !regex.is_match(lhs.trim()) {
                        return Err(ProcessingError::row(format!(
                            "Value {} did not match pattern {}",
                            lhs, pattern
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

fn split_cell(value: &str, splitter: &str) -> FieldValue {
    if value.is_empty() {
        FieldValue::List(Vec::new())
    } else {
        FieldValue::List(value.split(splitter).map(str::to_string).collect())
    }
}

fn type_names(types: &[JsonType]) -> String {
    types
        .iter()
        .map(|t| format!("'{}'", t))
        .collect::<Vec<_>>()
        .join(", ")
}

fn enum_contains(values: &[Value], cell: &str) -> bool {
    values.iter().any(|allowed| match allowed {
        Value::String(s) => s == cell,
        Value::Number(n) => coerce_number(cell).is_some_and(|c| Some(c) == n.as_f64()),
        other => other.to_string() == cell,
    })
}

fn check_scalar(property: &PropertySchema, value: &str) -> std::result::Result<(), String> {
    if !property.types.is_empty() && !property.types.iter().any(|t| t.accepts_cell(value)) {
        return Err(format!("'{}' is not of type {}", value, type_names(&property.types)));
    }

    if let Some(allowed) = &property.enum_values {
        if !enum_contains(allowed, value) {
            let rendered: Vec<String> = allowed.iter().map(display_json).collect();
            return Err(format!("'{}' is not one of [{}]", value, rendered.join(", ")));
        }
    }

    if let Some(expected) = &property.const_value {
        if !enum_contains(std::slice::from_ref(expected), value) {
            return Err(format!("'{}' was expected", display_json(expected)));
        }
    }

    if let Some(pattern) = &property.pattern {
        if !pattern.is_match(value) {
            return Err(format!("'{}' does not match '{}'", value, pattern.as_str()));
        }
    }

    let length = value.chars().count();
    if property.min_length.is_some_and(|min| length < min) {
        return Err(format!("'{}' is too short", value));
    }
    if property.max_length.is_some_and(|max| length > max) {
        return Err(format!("'{}' is too long", value));
    }

    if let Some(number) = coerce_number(value) {
        if let Some(minimum) = property.minimum {
            if number < minimum {
                return Err(format!("{} is less than the minimum of {}", value, minimum));
            }
        }
        if let Some(maximum) = property.maximum {
            if number > maximum {
                return Err(format!("{} is greater than the maximum of {}", value, maximum));
            }
        }
        if let Some(minimum) = property.exclusive_minimum {
            if number <= minimum {
                return Err(format!(
                    "{} is less than or equal to the minimum of {}",
                    value, minimum
                ));
            }
        }
        if let Some(maximum) = property.exclusive_maximum {
            if number >= maximum {
                return Err(format!(
                    "{} is greater than or equal to the maximum of {}",
                    value, maximum
                ));
            }
        }
        if let Some(step) = property.multiple_of {
            let quotient = number / step;
            if quotient.is_finite() && quotient.fract() != 0.0 {
                return Err(format!("{} is not a multiple of {}", value, step));
            }
        }
    }

    Ok(())
}

fn check_list(property: &PropertySchema, items: &[String]) -> std::result::Result<(), String> {
    if let Some(min) = property.min_items {
        if items.len() < min {
            return Err(format!("{:?} should have at least {} items", items, min));
        }
    }
    if let Some(max) = property.max_items {
        if items.len() > max {
            return Err(format!("{:?} has more than {} items", items, max));
        }
    }
    if property.unique_items {
        let mut seen = std::collections::HashSet::with_capacity(items.len());
        if !items.iter().all(|item| seen.insert(item.as_str())) {
            return Err(format!("{:?} has non-unique elements", items));
        }
    }

    let Some(item_schema) = &property.items else {
        return Ok(());
    };
    items.iter().try_for_each(|item| check_item(item_schema, item))
}

fn check_item(schema: &ItemSchema, item: &str) -> std::result::Result<(), String> {
    if !schema.types.is_empty() && !schema.types.iter().any(|t| t.accepts_cell(item)) {
        return Err(format!("'{}' is not of type {}", item, type_names(&schema.types)));
    }
    if let Some(allowed) = &schema.enum_values {
        if !enum_contains(allowed, item) {
            let rendered: Vec<String> = allowed.iter().map(display_json).collect();
            return Err(format!("'{}' is not one of [{}]", item, rendered.join(", ")));
        }
    }
    if let Some(pattern) = &schema.pattern {
        if !pattern.is_match(item) {
            return Err(format!("'{}' does not match '{}'", item, pattern.as_str()));
        }
    }
    let length = item.chars().count();
    if schema.min_length.is_some_and(|min| length < min) {
        return Err(format!("'{}' is too short", item));
    }
    if schema.max_length.is_some_and(|max| length > max) {
        return Err(format!("'{}' is too long", item));
    }
    Ok(())
}

fn value_equals(lhs: &str, rhs: &Value) -> bool {
    match rhs {
        Value::String(s) => s == lhs,
        Value::Number(_) | Value::Bool(_) => rhs.to_string() == lhs,
        _ => false,
    }
}

fn is_member(lhs: &str, rhs: &Value) -> bool {
    match rhs {
        Value::Object(map) => map.contains_key(lhs),
        Value::Array(values) => values.iter().any(|v| v.as_str() == Some(lhs)),
        Value::String(s) => s.contains(lhs),
        _ => false,
    }
}

/// Substitute `{name}` placeholders. `{{` and `}}` produce literal braces, so
/// regex quantifiers are written `\d{{4}}` in templates.
pub fn format_template(template: &str, context: &HashMap<&str, String>) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(ch) => name.push(ch),
                        None => {
                            return Err(ProcessingError::row(format!(
                                "unterminated placeholder in pattern template '{}'",
                                template
                            )))
                        }
                    }
                }
                let value = context.get(name.as_str()).ok_or_else(|| {
                    ProcessingError::row(format!("pattern template references unknown name '{}'", name))
                })?;
                out.push_str(value);
            }
            '}' => {
                return Err(ProcessingError::row(format!(
                    "single '}}' encountered in pattern template '{}'",
                    template
                )))
            }
            other => out.push(other),
        }
    }

    Ok(out)
}
