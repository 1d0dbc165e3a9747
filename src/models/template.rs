use crate::error::{ProcessingError, Result};
use crate::models::pointer::PointerPath;
use crate::models::schema::RootSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::warn;
use validator::Validate;

pub type TemplateId = u64;

/// Column roles declared by the template.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RootSchemaDeclarations {
    #[validate(length(min = 1))]
    pub time_dimension: String,

    #[validate(length(min = 1))]
    pub value_dimension: String,

    #[validate(length(min = 1))]
    pub unit_dimension: String,

    #[validate(length(min = 1))]
    pub variable_dimension: String,

    #[validate(length(min = 1))]
    pub region_dimension: String,

    #[serde(default)]
    pub final_dimensions_order: Option<Vec<String>>,
}

impl RootSchemaDeclarations {
    fn normalize(mut self) -> Self {
        self.time_dimension = self.time_dimension.to_lowercase();
        self.value_dimension = self.value_dimension.to_lowercase();
        self.unit_dimension = self.unit_dimension.to_lowercase();
        self.variable_dimension = self.variable_dimension.to_lowercase();
        self.region_dimension = self.region_dimension.to_lowercase();
        if let Some(order) = self.final_dimensions_order.as_mut() {
            for name in order.iter_mut() {
                *name = name.to_lowercase();
            }
        }
        self
    }

    pub fn time_meta_key(&self) -> String {
        format!("{}_meta", self.time_dimension)
    }
}

/// A `map_<field>` lookup table. Templates normally use objects; plain lists are
/// accepted and treated as their element set.
#[derive(Debug, Clone)]
pub enum LookupTable {
    Keys(Map<String, Value>),
    Values(Vec<Value>),
}

impl LookupTable {
    fn from_json(field: &str, value: &Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(LookupTable::Keys(map.clone())),
            Value::Array(values) => Ok(LookupTable::Values(values.clone())),
            other => Err(ProcessingError::schema(format!(
                "map_{} must be an object or array, found {}",
                field, other
            ))),
        }
    }

    pub fn contains(&self, value: &str) -> bool {
        match self {
            LookupTable::Keys(map) => map.contains_key(value),
            LookupTable::Values(values) => values.iter().any(|v| v.as_str() == Some(value)),
        }
    }

    pub fn allowed(&self) -> Vec<String> {
        match self {
            LookupTable::Keys(map) => map.keys().cloned().collect(),
            LookupTable::Values(values) => values.iter().map(display_json).collect(),
        }
    }
}

/// One condition of a `template_validators` entry.
#[derive(Debug, Clone)]
pub enum Condition {
    ValueEquals(PointerPath),
    IsSubsetOfMap(PointerPath),
    Regex {
        template: String,
        context: Vec<(String, PointerPath)>,
    },
}

#[derive(Debug, Clone)]
pub struct FieldValidator {
    pub field: String,
    pub conditions: Vec<Condition>,
}

impl FieldValidator {
    fn from_json(field: &str, value: &Value) -> Result<Self> {
        let object = value.as_object().ok_or_else(|| {
            ProcessingError::schema(format!("template validator for '{}' must be an object", field))
        })?;

        let mut conditions = Vec::with_capacity(object.len());
        for (name, directive) in object {
            match name.as_str() {
                "value_equals" => conditions.push(Condition::ValueEquals(PointerPath::from_json(directive)?)),
                "is_subset_of_map" => {
                    conditions.push(Condition::IsSubsetOfMap(PointerPath::from_json(directive)?))
                }
                "regex" => conditions.push(parse_regex_directive(field, directive)?),
                other => warn!(field, condition = other, "ignoring unknown template validator condition"),
            }
        }

        Ok(Self {
            field: field.to_lowercase(),
            conditions,
        })
    }
}

fn parse_regex_directive(field: &str, directive: &Value) -> Result<Condition> {
    let template = directive
        .get("regexf")
        .and_then(Value::as_str)
        .ok_or_else(|| ProcessingError::schema(format!("regex validator for '{}' needs a 'regexf' string", field)))?;

    let context = match directive.get("fcontext") {
        None => Vec::new(),
        Some(Value::Object(entries)) => entries
            .iter()
            .map(|(name, pointer)| Ok((name.clone(), PointerPath::from_json(pointer)?)))
            .collect::<Result<Vec<_>>>()?,
        Some(other) => {
            return Err(ProcessingError::schema(format!(
                "regex validator for '{}': 'fcontext' must be an object, found {}",
                field, other
            )))
        }
    };

    Ok(Condition::Regex {
        template: template.to_string(),
        context,
    })
}

/// Server-supplied rules for one dataset template, compiled once per job.
#[derive(Debug, Clone)]
pub struct TemplateRules {
    template_id: TemplateId,
    document: Value,
    declarations: RootSchemaDeclarations,
    schema: RootSchema,
    validators: Vec<FieldValidator>,
    lookups: HashMap<String, LookupTable>,
}

impl TemplateRules {
    /// Compile a rules document. Every template authoring fault surfaces here,
    /// before any row is read.
    pub fn from_value(template_id: TemplateId, document: Value) -> Result<Self> {
        if !document.is_object() {
            return Err(ProcessingError::schema(format!(
                "No dataset template rules found for dataset_template id: {}",
                template_id
            )));
        }

        let declarations: RootSchemaDeclarations = serde_json::from_value(
            document
                .get("root_schema_declarations")
                .cloned()
                .ok_or_else(|| ProcessingError::schema("'root_schema_declarations' in template is required"))?,
        )
        .map_err(|e| ProcessingError::schema(format!("invalid root_schema_declarations: {}", e)))?;
        declarations.validate()?;
        let declarations = declarations.normalize();

        let schema = RootSchema::compile(
            document
                .get("root")
                .ok_or_else(|| ProcessingError::schema("'root' schema in template is required"))?,
        )
        .map_err(|e| match e {
            ProcessingError::Schema(msg) => ProcessingError::schema(format!(
                "Schema itself is not valid with template id. Template id: {}. {}",
                template_id, msg
            )),
            other => other,
        })?;

        // variable and unit may be absent from the schema; their pair is then
        // harvested with empty cells
        for role in [&declarations.time_dimension, &declarations.value_dimension] {
            if schema.property(role).is_none() {
                return Err(ProcessingError::schema(format!(
                    "declared dimension '{}' is not a property of the root schema",
                    role
                )));
            }
        }

        let validators = match document.get("template_validators") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::String(s)) if s == "not defined" => Vec::new(),
            Some(Value::Object(entries)) => entries
                .iter()
                .map(|(field, rules)| FieldValidator::from_json(field, rules))
                .collect::<Result<Vec<_>>>()?,
            Some(other) => {
                return Err(ProcessingError::schema(format!(
                    "'template_validators' must be an object, found {}",
                    other
                )))
            }
        };

        let mut lookups = HashMap::new();
        for property in &schema.properties {
            if let Some(table) = raw_lookup(&document, &property.name) {
                lookups.insert(
                    property.name.clone(),
                    LookupTable::from_json(&property.name, table)?,
                );
            }
        }

        Ok(Self {
            template_id,
            document,
            declarations,
            schema,
            validators,
            lookups,
        })
    }

    pub fn template_id(&self) -> TemplateId {
        self.template_id
    }

    pub fn document(&self) -> &Value {
        &self.document
    }

    pub fn declarations(&self) -> &RootSchemaDeclarations {
        &self.declarations
    }

    pub fn schema(&self) -> &RootSchema {
        &self.schema
    }

    pub fn validators(&self) -> &[FieldValidator] {
        &self.validators
    }

    pub fn time_dimension(&self) -> &str {
        &self.declarations.time_dimension
    }

    pub fn value_dimension(&self) -> &str {
        &self.declarations.value_dimension
    }

    /// Lookup table constraining `field`, if the template declares one.
    pub fn lookup_table(&self, field: &str) -> Option<&LookupTable> {
        self.lookups.get(&field.to_lowercase())
    }

    /// Canonical column order of validated output: `final_dimensions_order`
    /// first, then remaining properties in declaration order, then the time and
    /// value dimensions.
    pub fn validated_headers(&self) -> Result<Vec<String>> {
        let order = self
            .declarations
            .final_dimensions_order
            .as_ref()
            .ok_or_else(|| ProcessingError::schema("'final_dimensions_order' in template is required"))?;

        let time = self.time_dimension();
        let value = self.value_dimension();
        let mut headers: Vec<String> = Vec::with_capacity(self.schema.properties.len());

        for name in order {
            if self.schema.property(name).is_some()
                && name != time
                && name != value
                && !headers.contains(name)
            {
                headers.push(name.clone());
            }
        }

        for name in self.schema.property_names() {
            if name != time && name != value && !headers.iter().any(|h| h == name) {
                headers.push(name.to_string());
            }
        }

        headers.push(time.to_string());
        headers.push(value.to_string());
        Ok(headers)
    }
}

fn raw_lookup<'a>(document: &'a Value, field: &str) -> Option<&'a Value> {
    let object = document.as_object()?;
    let wanted = format!("map_{}", field.to_lowercase());
    object
        .iter()
        .find(|(key, _)| key.to_lowercase() == wanted)
        .map(|(_, value)| value)
}

/// Render a JSON value the way messages quote it: strings bare, everything else as JSON.
pub fn display_json(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::rules_document;
    use super::*;
    use serde_json::json;

    #[test]
    fn test_compile_minimal_rules() {
        let rules = TemplateRules::from_value(4, rules_document()).unwrap();

        assert_eq!(rules.template_id(), 4);
        assert_eq!(rules.time_dimension(), "year");
        assert_eq!(rules.declarations().time_meta_key(), "year_meta");
        assert!(rules.validators().is_empty());
        assert_eq!(
            rules.validated_headers().unwrap(),
            vec!["region", "variable", "unit", "year", "value"]
        );
    }

    #[test]
    fn test_headers_append_undeclared_properties_before_time_and_value() {
        let mut doc = rules_document();
        doc["root"]["properties"]["scenario"] = json!({"type": "string"});
        doc["root_schema_declarations"]["final_dimensions_order"] = json!(["Variable", "year", "region"]);

        let rules = TemplateRules::from_value(1, doc).unwrap();
        assert_eq!(
            rules.validated_headers().unwrap(),
            vec!["variable", "region", "unit", "scenario", "year", "value"]
        );
    }

    #[test]
    fn test_missing_final_order_is_schema_error() {
        let mut doc = rules_document();
        doc["root_schema_declarations"]
            .as_object_mut()
            .unwrap()
            .remove("final_dimensions_order");

        let rules = TemplateRules::from_value(1, doc).unwrap();
        assert!(matches!(rules.validated_headers(), Err(ProcessingError::Schema(_))));
    }

    #[test]
    fn test_empty_dimension_name_is_rejected() {
        let mut doc = rules_document();
        doc["root_schema_declarations"]["region_dimension"] = json!("");
        assert!(matches!(
            TemplateRules::from_value(1, doc),
            Err(ProcessingError::Validation(_))
        ));
    }

    #[test]
    fn test_time_and_value_must_be_declared_properties() {
        let mut doc = rules_document();
        doc["root_schema_declarations"]["time_dimension"] = json!("date");
        assert!(matches!(
            TemplateRules::from_value(1, doc),
            Err(ProcessingError::Schema(_))
        ));

        let mut doc = rules_document();
        doc["root_schema_declarations"]["unit_dimension"] = json!("units");
        assert!(TemplateRules::from_value(1, doc).is_ok());
    }

    #[test]
    fn test_parse_template_validators() {
        let mut doc = rules_document();
        doc["template_validators"] = json!({
            "Unit": {
                "value_equals": ["&map_variable", "{variable}", "unit"],
                "regex": {"regexf": "^{lhs}$", "fcontext": {"v": ["{variable}"]}},
                "something_else": true
            }
        });

        let rules = TemplateRules::from_value(1, doc).unwrap();
        let validators = rules.validators();
        assert_eq!(validators.len(), 1);
        assert_eq!(validators[0].field, "unit");
        assert_eq!(validators[0].conditions.len(), 2);
    }

    #[test]
    fn test_lookup_table_is_case_insensitive_on_field() {
        let mut doc = rules_document();
        doc["map_Region"] = json!({"AT": {}, "DE": {}});

        let rules = TemplateRules::from_value(1, doc).unwrap();
        let table = rules.lookup_table("region").unwrap();
        assert!(table.contains("AT"));
        assert!(!table.contains("FR"));
        assert_eq!(table.allowed(), vec!["AT", "DE"]);
    }

    #[test]
    fn test_non_object_rules_rejected() {
        assert!(matches!(
            TemplateRules::from_value(9, Value::Null),
            Err(ProcessingError::Schema(_))
        ));
    }
}
