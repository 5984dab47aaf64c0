//! Configuration validation against a translated schema.
//!
//! Validates a JSON configuration record against a [`ResourceSchema`] before
//! any value extraction happens, so the host gets attribute-level
//! diagnostics instead of a failed apply.
//!
//! # Example
//!
//! ```
//! use skiff_provider::schema::{Attribute, ResourceSchema};
//! use skiff_provider::validation::validate;
//! use serde_json::json;
//!
//! let schema = ResourceSchema::new()
//!     .with_attribute("name", Attribute::required_string())
//!     .with_attribute("listen", Attribute::optional_string());
//!
//! let diagnostics = validate(&schema, &json!({"name": "main", "listen": ":8080"}));
//! assert!(diagnostics.is_empty());
//!
//! let diagnostics = validate(&schema, &json!({"listen": ":8080"}));
//! assert_eq!(diagnostics.len(), 1);
//! assert_eq!(diagnostics[0].attribute, Some("name".to_string()));
//! ```

use serde_json::Value;

use crate::coerce::dynamic_type_name;
use crate::schema::{Attribute, AttributeType, BlockSchema, Diagnostic, ResourceSchema};

/// Validate a configuration record against a schema.
///
/// Returns a list of diagnostics; an empty list means the record is valid.
///
/// Rules:
/// - required attributes must be present and non-null
/// - optional attributes may be absent or null
/// - computed-only attributes are skipped (the server sets these)
/// - present values must match the schema type
/// - a required block must be present; present blocks are validated
///   member-wise
pub fn validate(schema: &ResourceSchema, value: &Value) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    let record = match value {
        Value::Object(record) => record,
        // Null cannot be validated further; required-ness of the whole
        // record is the host's concern.
        Value::Null => return diagnostics,
        other => {
            diagnostics.push(
                Diagnostic::error("Expected object")
                    .with_detail(format!("Got {}", dynamic_type_name(other))),
            );
            return diagnostics;
        }
    };

    for (name, attr) in &schema.attributes {
        validate_attribute(attr, record.get(name), name, &mut diagnostics);
    }

    for (name, block) in &schema.blocks {
        validate_block(block, record.get(name), name, &mut diagnostics);
    }

    diagnostics
}

/// Validate and return `Ok` when no diagnostics were produced.
pub fn validate_result(schema: &ResourceSchema, value: &Value) -> Result<(), Vec<Diagnostic>> {
    let diagnostics = validate(schema, value);
    if diagnostics.is_empty() {
        Ok(())
    } else {
        Err(diagnostics)
    }
}

/// Whether a record is valid against a schema. Use [`validate`] for the
/// detailed diagnostics.
pub fn is_valid(schema: &ResourceSchema, value: &Value) -> bool {
    validate(schema, value).is_empty()
}

fn validate_attribute(
    attr: &Attribute,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    // Computed-only attributes are set by the server, not configuration.
    if attr.flags.computed && !attr.flags.optional && !attr.flags.required {
        return;
    }

    match value {
        None | Some(Value::Null) => {
            if attr.flags.required {
                diagnostics.push(
                    Diagnostic::error(format!("Missing required attribute {:?}", path))
                        .with_detail("This attribute is required and must be provided")
                        .with_attribute(path),
                );
            }
        }
        Some(value) => validate_type(&attr.attr_type, value, path, diagnostics),
    }
}

fn validate_type(
    attr_type: &AttributeType,
    value: &Value,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match attr_type {
        AttributeType::String => {
            if !value.is_string() {
                diagnostics.push(type_error(path, "string", value));
            }
        }
        AttributeType::Int64 => {
            if value.as_i64().is_none() {
                diagnostics.push(type_error(path, "int64", value));
            }
        }
        AttributeType::Float64 => {
            if !value.is_number() {
                diagnostics.push(type_error(path, "float64", value));
            }
        }
        AttributeType::Bool => {
            if !value.is_boolean() {
                diagnostics.push(type_error(path, "bool", value));
            }
        }
        AttributeType::List(element_type) => match value.as_array() {
            Some(items) => {
                for (index, item) in items.iter().enumerate() {
                    let item_path = format!("{}.{}", path, index);
                    validate_type(element_type, item, &item_path, diagnostics);
                }
            }
            None => diagnostics.push(type_error(path, "list", value)),
        },
        AttributeType::Map(value_type) => match value.as_object() {
            Some(entries) => {
                for (key, entry) in entries {
                    let entry_path = format!("{}.{}", path, key);
                    validate_type(value_type, entry, &entry_path, diagnostics);
                }
            }
            None => diagnostics.push(type_error(path, "map", value)),
        },
    }
}

fn validate_block(
    block: &BlockSchema,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let record = match value {
        None | Some(Value::Null) => {
            if block.flags.required {
                diagnostics.push(
                    Diagnostic::error(format!("Missing required block {:?}", path))
                        .with_detail("This block is required and must be provided")
                        .with_attribute(path),
                );
            }
            return;
        }
        Some(Value::Object(record)) => record,
        Some(other) => {
            diagnostics.push(type_error(path, "object", other));
            return;
        }
    };

    for (name, attr) in &block.attributes {
        let attr_path = format!("{}.{}", path, name);
        validate_attribute(attr, record.get(name), &attr_path, diagnostics);
    }
}

fn type_error(path: &str, expected: &str, value: &Value) -> Diagnostic {
    Diagnostic::error(format!("Invalid value for {:?}", path))
        .with_detail(format!(
            "Expected {}, got {}",
            expected,
            dynamic_type_name(value)
        ))
        .with_attribute_if_not_empty(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{translate, AttributeDescriptor, AttributeFlags};
    use serde_json::json;

    fn descriptor(name: &str, type_tag: &str, required: bool) -> AttributeDescriptor {
        AttributeDescriptor {
            name: name.to_string(),
            type_tag: type_tag.to_string(),
            description: String::new(),
            required,
            readonly: false,
            sensitive: false,
            reference: false,
        }
    }

    fn schema() -> ResourceSchema {
        translate(
            "httpserver",
            &[
                descriptor("listen", "string", true),
                descriptor("count", "int", false),
                descriptor("hosts", "[]string", false),
                descriptor("tls.cert", "string", true),
                descriptor("tls.key", "string", false),
            ],
        )
        .unwrap()
        .schema
    }

    #[test]
    fn test_valid_record_passes() {
        let diagnostics = validate(
            &schema(),
            &json!({
                "name": "main",
                "listen": ":8080",
                "count": 3,
                "hosts": ["a", "b"],
                "tls": {"cert": "CERT"}
            }),
        );
        assert!(diagnostics.is_empty(), "{:?}", diagnostics);
    }

    #[test]
    fn test_missing_required_attribute() {
        let diagnostics = validate(
            &schema(),
            &json!({"name": "main", "tls": {"cert": "CERT"}}),
        );
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute, Some("listen".to_string()));
    }

    #[test]
    fn test_missing_required_block() {
        let diagnostics = validate(&schema(), &json!({"name": "main", "listen": ":8080"}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute, Some("tls".to_string()));
        assert!(diagnostics[0].summary.contains("required block"));
    }

    #[test]
    fn test_missing_required_block_member() {
        let diagnostics = validate(
            &schema(),
            &json!({"name": "main", "listen": ":8080", "tls": {"key": "KEY"}}),
        );
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute, Some("tls.cert".to_string()));
    }

    #[test]
    fn test_type_mismatches_are_reported_per_path() {
        let diagnostics = validate(
            &schema(),
            &json!({
                "name": "main",
                "listen": 8080,
                "count": "three",
                "hosts": ["a", 2],
                "tls": {"cert": "CERT"}
            }),
        );
        let paths: Vec<_> = diagnostics
            .iter()
            .filter_map(|d| d.attribute.as_deref())
            .collect();
        assert!(paths.contains(&"listen"));
        assert!(paths.contains(&"count"));
        assert!(paths.contains(&"hosts.1"));
    }

    #[test]
    fn test_computed_only_attributes_are_skipped() {
        // "id" is computed; supplying nothing for it is fine, and the
        // validator does not reject a record missing it.
        let diagnostics = validate(
            &schema(),
            &json!({"name": "main", "listen": ":8080", "tls": {"cert": "C"}}),
        );
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn test_float_accepts_integers() {
        let schema = ResourceSchema::new().with_attribute(
            "ratio",
            crate::schema::Attribute::new(AttributeType::Float64, AttributeFlags::optional()),
        );
        assert!(validate(&schema, &json!({"ratio": 2})).is_empty());
        assert!(!validate(&schema, &json!({"ratio": "2"})).is_empty());
    }

    #[test]
    fn test_non_object_record() {
        assert_eq!(validate(&schema(), &json!("nope")).len(), 1);
        assert!(validate(&schema(), &Value::Null).is_empty());
    }

    #[test]
    fn test_validate_result_and_is_valid() {
        let record = json!({"name": "main", "listen": ":8080", "tls": {"cert": "C"}});
        assert!(validate_result(&schema(), &record).is_ok());
        assert!(is_valid(&schema(), &record));

        let bad = json!({"name": "main"});
        assert!(validate_result(&schema(), &bad).is_err());
        assert!(!is_valid(&schema(), &bad));
    }
}
