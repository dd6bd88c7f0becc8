//! Row contract, validation and cleanup.

pub mod contract;
pub mod sanitize;
pub mod validator;

pub use contract::{validate_columns, SchemaType, SchemaValidation, ROW_SCHEMA, SCHEMA_VERSION};
pub use sanitize::{sanitize, SanitizeReport};
pub use validator::{
    Issue, IssueKind, Severity, ValidationContext, ValidationError, ValidationReport,
    ValidationStats, Validator,
};
