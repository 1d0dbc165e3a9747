pub mod metadata;
pub mod pointer;
pub mod row;
pub mod schema;
pub mod template;

pub use metadata::{TimeRange, ValidationMetadata, VARIABLE_UNIT_KEY};
pub use pointer::{PointerPath, PointerStep};
pub use row::{FieldValue, RawRow, ValidatedRow};
pub use schema::{coerce_number, ItemSchema, JsonType, PropertySchema, RootSchema};
pub use template::{
    Condition, FieldValidator, LookupTable, RootSchemaDeclarations, TemplateId, TemplateRules,
};
