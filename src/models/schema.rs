//! Compiled form of the template's root JSON schema.
//!
//! Only the keywords that matter for delimited rows are compiled. Annotations
//! (`title`, `description`, `format`, `$schema`, ...) are ignored; `format` is
//! annotation-only, as rows are checked without a format checker. Constraint
//! keywords this compiler cannot enforce (composition, references,
//! conditionals) are refused rather than skipped, so a template never loads
//! with constraints that would silently pass. Those, and anything else that
//! makes the schema unusable (an unknown type name, an invalid pattern, an array
//! field without a split rule), are reported as [`ProcessingError::Schema`] when
//! the template is loaded.

use crate::error::{ProcessingError, Result};
use regex::Regex;
use serde_json::{Map, Value};
use std::fmt;

/// Constraint keywords that would change which rows pass but are not compiled.
const UNSUPPORTED_KEYWORDS: &[&str] = &[
    "allOf",
    "anyOf",
    "oneOf",
    "not",
    "if",
    "then",
    "else",
    "$ref",
    "$dynamicRef",
    "dependentRequired",
    "dependentSchemas",
    "dependencies",
    "patternProperties",
    "propertyNames",
    "minProperties",
    "maxProperties",
    "unevaluatedProperties",
    "unevaluatedItems",
    "prefixItems",
    "additionalItems",
    "contains",
    "minContains",
    "maxContains",
];

fn reject_unsupported(rules: &Map<String, Value>, location: &str) -> Result<()> {
    match UNSUPPORTED_KEYWORDS.iter().find(|k| rules.contains_key(**k)) {
        Some(keyword) => Err(ProcessingError::schema(format!(
            "{}: keyword '{}' is not supported by the row validator",
            location, keyword
        ))),
        None => Ok(()),
    }
}

/// Parse a cell as a floating point number the way Python's `float()` does:
/// surrounding whitespace is ignored, `inf` and `nan` are accepted, and single
/// underscores may group digits (`1_000`).
pub fn coerce_number(value: &str) -> Option<f64> {
    let value = value.trim();
    if !value.contains('_') {
        return value.parse::<f64>().ok();
    }

    let bytes = value.as_bytes();
    let grouped = bytes.iter().enumerate().all(|(i, b)| {
        *b != b'_'
            || (i > 0
                && i + 1 < bytes.len()
                && bytes[i - 1].is_ascii_digit()
                && bytes[i + 1].is_ascii_digit())
    });
    if !grouped {
        return None;
    }
    value.replace('_', "").parse::<f64>().ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
    Null,
}

impl JsonType {
    fn parse(name: &str) -> Result<Self> {
        match name {
            "string" => Ok(JsonType::String),
            "number" => Ok(JsonType::Number),
            "integer" => Ok(JsonType::Integer),
            "boolean" => Ok(JsonType::Boolean),
            "array" => Ok(JsonType::Array),
            "object" => Ok(JsonType::Object),
            "null" => Ok(JsonType::Null),
            other => Err(ProcessingError::schema(format!(
                "unknown type '{}'",
                other
            ))),
        }
    }

    /// Whether a raw cell satisfies this type. Numbers and integers are coercible
    /// from their string encoding.
    pub fn accepts_cell(&self, value: &str) -> bool {
        match self {
            JsonType::String => true,
            JsonType::Number => coerce_number(value).is_some(),
            JsonType::Integer => {
                coerce_number(value).is_some_and(|n| n.is_finite() && n.fract() == 0.0)
            }
            JsonType::Boolean => {
                value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("false")
            }
            JsonType::Array | JsonType::Object | JsonType::Null => false,
        }
    }
}

impl fmt::Display for JsonType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JsonType::String => "string",
            JsonType::Number => "number",
            JsonType::Integer => "integer",
            JsonType::Boolean => "boolean",
            JsonType::Array => "array",
            JsonType::Object => "object",
            JsonType::Null => "null",
        };
        write!(f, "{}", name)
    }
}

/// Constraints applied to each element of a split array field.
#[derive(Debug, Clone, Default)]
pub struct ItemSchema {
    pub types: Vec<JsonType>,
    pub enum_values: Option<Vec<Value>>,
    pub pattern: Option<Regex>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct PropertySchema {
    pub name: String,
    pub types: Vec<JsonType>,
    /// Delimiter for array fields (`x-split`).
    pub split: Option<String>,
    pub enum_values: Option<Vec<Value>>,
    pub const_value: Option<Value>,
    pub pattern: Option<Regex>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub exclusive_minimum: Option<f64>,
    pub exclusive_maximum: Option<f64>,
    pub multiple_of: Option<f64>,
    pub items: Option<ItemSchema>,
    pub min_items: Option<usize>,
    pub max_items: Option<usize>,
    pub unique_items: bool,
}

impl PropertySchema {
    pub fn is_array(&self) -> bool {
        self.types.contains(&JsonType::Array)
    }

    fn compile(name: &str, rules: &Value) -> Result<Self> {
        let rules = rules.as_object().ok_or_else(|| {
            ProcessingError::schema(format!("property '{}' must be an object", name))
        })?;
        reject_unsupported(rules, &format!("property '{}'", name))?;

        let types = parse_types(rules.get("type"))
            .map_err(|e| ProcessingError::schema(format!("property '{}': {}", name, e)))?;

        let mut property = PropertySchema {
            name: name.to_lowercase(),
            types,
            split: None,
            enum_values: parse_enum(rules, name)?,
            const_value: rules.get("const").cloned(),
            pattern: parse_pattern(rules, name)?,
            min_length: parse_usize(rules, "minLength", name)?,
            max_length: parse_usize(rules, "maxLength", name)?,
            minimum: parse_f64(rules, "minimum", name)?,
            maximum: parse_f64(rules, "maximum", name)?,
            exclusive_minimum: parse_f64(rules, "exclusiveMinimum", name)?,
            exclusive_maximum: parse_f64(rules, "exclusiveMaximum", name)?,
            multiple_of: parse_f64(rules, "multipleOf", name)?,
            items: None,
            min_items: parse_usize(rules, "minItems", name)?,
            max_items: parse_usize(rules, "maxItems", name)?,
            unique_items: matches!(rules.get("uniqueItems"), Some(Value::Bool(true))),
        };

        if property.multiple_of.is_some_and(|m| m <= 0.0) {
            return Err(ProcessingError::schema(format!(
                "property '{}': 'multipleOf' must be greater than 0",
                name
            )));
        }

        if property.is_array() {
            let splitter = rules
                .get("x-split")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| {
                    ProcessingError::schema(format!(
                        "Field '{}' is an array but does not have 'x-split' rule defined in the schema.",
                        name
                    ))
                })?;

            let items = rules.get("items").and_then(Value::as_object);
            let item_type = items.and_then(|i| i.get("type")).and_then(Value::as_str);
            if item_type != Some("string") {
                return Err(ProcessingError::schema(format!(
                    "Field '{}' uses x-split but its items are not strings (found: {})",
                    name,
                    item_type.unwrap_or("none")
                )));
            }

            property.split = Some(splitter.to_string());
            if let Some(items) = items {
                reject_unsupported(items, &format!("items of property '{}'", name))?;
                property.items = Some(ItemSchema {
                    types: vec![JsonType::String],
                    enum_values: parse_enum(items, name)?,
                    pattern: parse_pattern(items, name)?,
                    min_length: parse_usize(items, "minLength", name)?,
                    max_length: parse_usize(items, "maxLength", name)?,
                });
            }
        }

        Ok(property)
    }
}

/// The root object schema: ordered properties plus object-level keywords.
#[derive(Debug, Clone)]
pub struct RootSchema {
    pub properties: Vec<PropertySchema>,
    pub required: Vec<String>,
    pub additional_properties: bool,
}

impl RootSchema {
    pub fn compile(root: &Value) -> Result<Self> {
        let root = root
            .as_object()
            .ok_or_else(|| ProcessingError::schema("'root' must be an object"))?;
        reject_unsupported(root, "root")?;

        let properties = match root.get("properties") {
            Some(Value::Object(map)) => map
                .iter()
                .map(|(name, rules)| PropertySchema::compile(name, rules))
                .collect::<Result<Vec<_>>>()?,
            Some(_) => return Err(ProcessingError::schema("'properties' must be an object")),
            None => Vec::new(),
        };

        let required = match root.get("required") {
            Some(Value::Array(names)) => names
                .iter()
                .map(|n| {
                    n.as_str().map(str::to_lowercase).ok_or_else(|| {
                        ProcessingError::schema("'required' must list property names")
                    })
                })
                .collect::<Result<Vec<_>>>()?,
            Some(_) => return Err(ProcessingError::schema("'required' must be an array")),
            None => Vec::new(),
        };

        let additional_properties = match root.get("additionalProperties") {
            None | Some(Value::Bool(true)) => true,
            Some(Value::Bool(false)) => false,
            Some(_) => {
                return Err(ProcessingError::schema(
                    "root: only boolean 'additionalProperties' is supported",
                ))
            }
        };

        Ok(Self {
            properties,
            required,
            additional_properties,
        })
    }

    pub fn property(&self, name: &str) -> Option<&PropertySchema> {
        let name = name.to_lowercase();
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn property_names(&self) -> impl Iterator<Item = &str> {
        self.properties.iter().map(|p| p.name.as_str())
    }
}

fn parse_types(value: Option<&Value>) -> Result<Vec<JsonType>> {
    match value {
        None => Ok(Vec::new()),
        Some(Value::String(name)) => Ok(vec![JsonType::parse(name)?]),
        Some(Value::Array(names)) => names
            .iter()
            .map(|n| {
                n.as_str()
                    .ok_or_else(|| ProcessingError::schema("type names must be strings"))
                    .and_then(JsonType::parse)
            })
            .collect(),
        Some(other) => Err(ProcessingError::schema(format!(
            "invalid type declaration {}",
            other
        ))),
    }
}

fn parse_enum(rules: &Map<String, Value>, name: &str) -> Result<Option<Vec<Value>>> {
    match rules.get("enum") {
        None => Ok(None),
        Some(Value::Array(values)) => Ok(Some(values.clone())),
        Some(_) => Err(ProcessingError::schema(format!(
            "property '{}': 'enum' must be an array",
            name
        ))),
    }
}

fn parse_pattern(rules: &Map<String, Value>, name: &str) -> Result<Option<Regex>> {
    match rules.get("pattern") {
        None => Ok(None),
        Some(Value::String(pattern)) => Regex::new(pattern).map(Some).map_err(|e| {
            ProcessingError::schema(format!("property '{}': invalid pattern: {}", name, e))
        }),
        Some(_) => Err(ProcessingError::schema(format!(
            "property '{}': 'pattern' must be a string",
            name
        ))),
    }
}

fn parse_usize(rules: &Map<String, Value>, keyword: &str, name: &str) -> Result<Option<usize>> {
    match rules.get(keyword) {
        None => Ok(None),
        Some(value) => value
            .as_u64()
            .map(|n| Some(n as usize))
            .ok_or_else(|| {
                ProcessingError::schema(format!(
                    "property '{}': '{}' must be a non-negative integer",
                    name, keyword
                ))
            }),
    }
}

fn parse_f64(rules: &Map<String, Value>, keyword: &str, name: &str) -> Result<Option<f64>> {
    match rules.get(keyword) {
        None => Ok(None),
        Some(value) => value.as_f64().map(Some).ok_or_else(|| {
            ProcessingError::schema(format!(
                "property '{}': '{}' must be a number",
                name, keyword
            ))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_coerce_number() {
        assert_eq!(coerce_number(" 2010 "), Some(2010.0));
        assert_eq!(coerce_number("1e3"), Some(1000.0));
        assert!(coerce_number("inf").is_some_and(f64::is_infinite));
        assert_eq!(coerce_number("twenty"), None);
        assert_eq!(coerce_number(""), None);
    }

    #[test]
    fn test_coerce_number_accepts_digit_grouping() {
        assert_eq!(coerce_number("1_000"), Some(1000.0));
        assert_eq!(coerce_number(" 1_000.2_5 "), Some(1000.25));
        assert_eq!(coerce_number("_1000"), None);
        assert_eq!(coerce_number("1000_"), None);
        assert_eq!(coerce_number("1__000"), None);
        assert_eq!(coerce_number("1_.5"), None);
    }

    #[test]
    fn test_integer_type_requires_whole_numbers() {
        assert!(JsonType::Integer.accepts_cell("2000"));
        assert!(JsonType::Integer.accepts_cell("2000.0"));
        assert!(!JsonType::Integer.accepts_cell("2000.5"));
        assert!(!JsonType::Integer.accepts_cell("nan"));
    }

    #[test]
    fn test_compile_keeps_declaration_order_and_lowercases() {
        let schema = RootSchema::compile(&json!({
            "properties": {
                "Region": {"type": "string"},
                "year": {"type": "number", "minimum": 1900},
                "tags": {"type": "array", "x-split": "|", "items": {"type": "string"}}
            },
            "required": ["Region"]
        }))
        .unwrap();

        let names: Vec<_> = schema.property_names().collect();
        assert_eq!(names, vec!["region", "year", "tags"]);
        assert_eq!(schema.required, vec!["region"]);
        assert!(schema.additional_properties);
        assert_eq!(schema.property("tags").unwrap().split.as_deref(), Some("|"));
        assert_eq!(schema.property("YEAR").unwrap().minimum, Some(1900.0));
    }

    #[test]
    fn test_array_without_split_is_schema_error() {
        let err = RootSchema::compile(&json!({
            "properties": {"tags": {"type": "array", "items": {"type": "string"}}}
        }))
        .unwrap_err();

        assert!(matches!(err, ProcessingError::Schema(_)));
        assert!(err.to_string().contains("x-split"));
    }

    #[test]
    fn test_array_with_non_string_items_is_schema_error() {
        let err = RootSchema::compile(&json!({
            "properties": {"tags": {"type": "array", "x-split": ";", "items": {"type": "number"}}}
        }))
        .unwrap_err();

        assert!(err.to_string().contains("items are not strings"));
    }

    #[test]
    fn test_unknown_type_and_bad_pattern_are_schema_errors() {
        assert!(RootSchema::compile(&json!({"properties": {"a": {"type": "decimal"}}})).is_err());
        assert!(RootSchema::compile(&json!({"properties": {"a": {"pattern": "("}}})).is_err());
    }

    #[test]
    fn test_composition_keywords_are_refused() {
        let region_any_of = RootSchema::compile(&json!({
            "properties": {"region": {"anyOf": [{"const": "AT"}, {"const": "DE"}]}}
        }))
        .unwrap_err();
        assert!(matches!(region_any_of, ProcessingError::Schema(_)));
        assert!(region_any_of.to_string().contains("property 'region': keyword 'anyOf'"));

        let root_all_of = RootSchema::compile(&json!({
            "properties": {"region": {"type": "string"}},
            "allOf": [{"not": {"properties": {"region": {"const": "FR"}}}}]
        }))
        .unwrap_err();
        assert!(root_all_of.to_string().contains("root: keyword 'allOf'"));

        let item_ref = RootSchema::compile(&json!({
            "properties": {
                "tags": {"type": "array", "x-split": "|", "items": {"type": "string", "$ref": "#/$defs/tag"}}
            }
        }))
        .unwrap_err();
        assert!(item_ref.to_string().contains("keyword '$ref'"));
    }

    #[test]
    fn test_annotations_and_format_are_accepted() {
        let schema = RootSchema::compile(&json!({
            "$schema": "https://json-schema.org/draft/2020-12/schema",
            "title": "Regional data",
            "properties": {"day": {"type": "string", "format": "date", "description": "ISO day"}}
        }))
        .unwrap();
        assert_eq!(schema.property_names().collect::<Vec<_>>(), vec!["day"]);
    }

    #[test]
    fn test_numeric_keywords_compile() {
        let schema = RootSchema::compile(&json!({
            "properties": {
                "share": {"type": "number", "exclusiveMinimum": 0, "exclusiveMaximum": 1},
                "step": {"type": "number", "multipleOf": 0.5},
                "tags": {"type": "array", "x-split": "|", "uniqueItems": true, "items": {"type": "string"}}
            }
        }))
        .unwrap();
        assert_eq!(schema.property("share").unwrap().exclusive_minimum, Some(0.0));
        assert_eq!(schema.property("step").unwrap().multiple_of, Some(0.5));
        assert!(schema.property("tags").unwrap().unique_items);

        assert!(RootSchema::compile(&json!({"properties": {"a": {"multipleOf": 0}}})).is_err());
    }

    #[test]
    fn test_additional_properties_false() {
        let schema = RootSchema::compile(&json!({
            "properties": {"a": {}},
            "additionalProperties": false
        }))
        .unwrap();
        assert!(!schema.additional_properties);
    }
}
