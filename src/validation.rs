//! Schema validation helpers.
//!
//! Two kinds of checks live here:
//!
//! - [`validate`] checks a configuration value against a [`Schema`].
//! - [`validate_provider_schema`] checks that a [`ProviderSchema`] is itself
//!   consistent, so a broken schema is caught by a unit test instead of by
//!   the host at runtime.
//!
//! # Example
//!
//! ```
//! use terraform_provider_random::schema::{Schema, Attribute};
//! use terraform_provider_random::validation::validate;
//! use serde_json::json;
//!
//! let schema = Schema::v0()
//!     .with_attribute("length", Attribute::required_int64())
//!     .with_attribute("override_special", Attribute::optional_string());
//!
//! assert!(validate(&schema, &json!({"length": 16})).is_empty());
//!
//! let diagnostics = validate(&schema, &json!({"length": "sixteen"}));
//! assert_eq!(diagnostics.len(), 1);
//! assert_eq!(diagnostics[0].attribute, Some("length".to_string()));
//! ```

use crate::schema::{Attribute, AttributeType, Diagnostic, ProviderSchema, Schema};
use serde_json::Value;

/// Validate a JSON value against a schema.
///
/// Returns a list of diagnostics for any validation errors found.
/// An empty list means the value is valid.
///
/// - Required attributes must be present and non-null
/// - Optional attributes may be absent or null
/// - Computed-only attributes are skipped (the provider sets these)
/// - Attribute types must match the schema
pub fn validate(schema: &Schema, value: &Value) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    let obj = match value {
        Value::Object(map) => map,
        Value::Null => return diagnostics,
        _ => {
            diagnostics.push(
                Diagnostic::error("Expected object")
                    .with_detail(format!("Got {}", value_type_name(value))),
            );
            return diagnostics;
        },
    };

    for name in schema.attribute_names() {
        if let Some(attr) = schema.attribute(name) {
            validate_attribute(attr, obj.get(name), name, &mut diagnostics);
        }
    }

    diagnostics
}

/// Check a provider schema for internal consistency.
///
/// - attribute and type names are `[a-z0-9_]+`
/// - an attribute is required, optional or computed (optional+computed is allowed)
/// - required attributes have no default, computed-only attributes neither
/// - defaults match the attribute type
/// - computed-only attributes cannot force replacement
/// - every resource declares a computed `id`
pub fn validate_provider_schema(schema: &ProviderSchema) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    validate_schema_definition(&schema.provider, "provider", &mut diagnostics);

    let mut resource_names: Vec<&String> = schema.resources.keys().collect();
    resource_names.sort();
    for name in resource_names {
        if !is_valid_name(name) {
            diagnostics.push(
                Diagnostic::error(format!("Invalid resource type name '{}'", name))
                    .with_detail("Names may only contain lowercase letters, digits and underscores"),
            );
        }
        let resource = &schema.resources[name];
        validate_schema_definition(resource, name, &mut diagnostics);

        match resource.attribute("id") {
            Some(id) if id.flags.computed && id.attr_type == AttributeType::String => {},
            Some(_) => diagnostics.push(
                Diagnostic::error(format!("Resource '{}' has an invalid 'id' attribute", name))
                    .with_detail("'id' must be a computed string")
                    .with_attribute(format!("{}.id", name)),
            ),
            None => diagnostics.push(
                Diagnostic::error(format!("Resource '{}' does not declare 'id'", name))
                    .with_attribute(format!("{}.id", name)),
            ),
        }
    }

    let mut data_source_names: Vec<&String> = schema.data_sources.keys().collect();
    data_source_names.sort();
    for name in data_source_names {
        if !is_valid_name(name) {
            diagnostics.push(Diagnostic::error(format!(
                "Invalid data source type name '{}'",
                name
            )));
        }
        validate_schema_definition(&schema.data_sources[name], name, &mut diagnostics);
    }

    diagnostics
}

fn validate_schema_definition(schema: &Schema, owner: &str, diagnostics: &mut Vec<Diagnostic>) {
    for name in schema.attribute_names() {
        let Some(attr) = schema.attribute(name) else {
            continue;
        };
        let path = format!("{}.{}", owner, name);
        let flags = &attr.flags;

        if !is_valid_name(name) {
            diagnostics.push(
                Diagnostic::error(format!("Invalid attribute name '{}'", name)).with_attribute(&path),
            );
        }

        if !flags.required && !flags.optional && !flags.computed {
            diagnostics.push(
                Diagnostic::error("Attribute must be required, optional or computed")
                    .with_attribute(&path),
            );
        }
        if flags.required && flags.optional {
            diagnostics.push(
                Diagnostic::error("Attribute cannot be both required and optional")
                    .with_attribute(&path),
            );
        }
        if flags.required && flags.computed {
            diagnostics.push(
                Diagnostic::error("Attribute cannot be both required and computed")
                    .with_attribute(&path),
            );
        }

        if let Some(default) = &attr.default {
            if flags.required {
                diagnostics.push(
                    Diagnostic::error("Required attribute cannot have a default")
                        .with_attribute(&path),
                );
            }
            if flags.is_computed_only() {
                diagnostics.push(
                    Diagnostic::error("Computed attribute cannot have a default")
                        .with_attribute(&path),
                );
            }
            let mut type_errors = Vec::new();
            validate_attribute_type(&attr.attr_type, default, &path, &mut type_errors);
            if !type_errors.is_empty() {
                diagnostics.push(
                    Diagnostic::error("Default value does not match the attribute type")
                        .with_attribute(&path),
                );
            }
        }

        if attr.force_new && flags.is_computed_only() {
            diagnostics.push(
                Diagnostic::error("Computed attribute cannot force replacement")
                    .with_attribute(&path),
            );
        }
    }
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

fn validate_attribute(
    attr: &Attribute,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    if attr.flags.is_computed_only() {
        return;
    }

    match value {
        None | Some(Value::Null) => {
            if attr.flags.required {
                diagnostics.push(
                    Diagnostic::error(format!("Missing required attribute '{}'", path))
                        .with_detail("This attribute is required and must be provided")
                        .with_attribute(path),
                );
            }
        },
        Some(v) => validate_attribute_type(&attr.attr_type, v, path, diagnostics),
    }
}

fn validate_attribute_type(
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
        },
        AttributeType::Int64 => {
            if !is_int64(value) {
                diagnostics.push(type_error(path, "int64", value));
            }
        },
        AttributeType::Bool => {
            if !value.is_boolean() {
                diagnostics.push(type_error(path, "bool", value));
            }
        },
        AttributeType::List(element_type) => {
            if let Some(arr) = value.as_array() {
                for (i, elem) in arr.iter().enumerate() {
                    let elem_path = format!("{}.{}", path, i);
                    validate_attribute_type(element_type, elem, &elem_path, diagnostics);
                }
            } else {
                diagnostics.push(type_error(path, "list", value));
            }
        },
        AttributeType::Map(value_type) => {
            if let Some(obj) = value.as_object() {
                for (key, val) in obj {
                    let key_path = format!("{}.{}", path, key);
                    validate_attribute_type(value_type, val, &key_path, diagnostics);
                }
            } else {
                diagnostics.push(type_error(path, "map", value));
            }
        },
    }
}

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn is_int64(value: &Value) -> bool {
    match value {
        Value::Number(n) => {
            if n.is_i64() {
                true
            } else if let Some(f) = n.as_f64() {
                f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64
            } else {
                false
            }
        },
        _ => false,
    }
}

fn type_error(path: &str, expected: &str, got: &Value) -> Diagnostic {
    Diagnostic::error(format!("Invalid type for attribute '{}'", path))
        .with_detail(format!("Expected {}, got {}", expected, value_type_name(got)))
        .with_attribute(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{AttributeFlags, ProviderSchema};
    use serde_json::json;

    #[test]
    fn test_validate_required_int() {
        let schema = Schema::v0().with_attribute("length", Attribute::required_int64());

        assert!(validate(&schema, &json!({"length": 12})).is_empty());

        let diagnostics = validate(&schema, &json!({}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute, Some("length".to_string()));

        let diagnostics = validate(&schema, &json!({"length": null}));
        assert_eq!(diagnostics.len(), 1);

        let diagnostics = validate(&schema, &json!({"length": "12"}));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("Invalid type"));
    }

    #[test]
    fn test_validate_int64_accepts_integral_floats() {
        let schema = Schema::v0().with_attribute("min", Attribute::required_int64());

        assert!(validate(&schema, &json!({"min": 42.0})).is_empty());
        assert_eq!(validate(&schema, &json!({"min": 42.5})).len(), 1);
        assert!(validate(&schema, &json!({"min": -7})).is_empty());
    }

    #[test]
    fn test_validate_optional_attribute() {
        let schema = Schema::v0().with_attribute("seed", Attribute::optional_string());

        assert!(validate(&schema, &json!({"seed": "abc"})).is_empty());
        assert!(validate(&schema, &json!({})).is_empty());
        assert!(validate(&schema, &json!({"seed": null})).is_empty());
        assert_eq!(validate(&schema, &json!({"seed": 5})).len(), 1);
    }

    #[test]
    fn test_validate_computed_attribute_skipped() {
        let schema = Schema::v0().with_attribute("result", Attribute::computed_string());

        assert!(validate(&schema, &json!({})).is_empty());
        assert!(validate(&schema, &json!({"result": 123})).is_empty());
    }

    #[test]
    fn test_validate_list() {
        let schema = Schema::v0().with_attribute(
            "input",
            Attribute::new(
                AttributeType::list(AttributeType::String),
                AttributeFlags::required(),
            ),
        );

        assert!(validate(&schema, &json!({"input": ["a", "b"]})).is_empty());
        assert!(validate(&schema, &json!({"input": []})).is_empty());

        let diagnostics = validate(&schema, &json!({"input": ["a", 1]}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute, Some("input.1".to_string()));

        assert_eq!(validate(&schema, &json!({"input": "a"})).len(), 1);
    }

    #[test]
    fn test_validate_map() {
        let schema = Schema::v0().with_attribute("keepers", Attribute::optional_string_map());

        assert!(validate(&schema, &json!({"keepers": {"ami": "ami-1"}})).is_empty());

        let diagnostics = validate(&schema, &json!({"keepers": {"ami": "ami-1", "count": 2}}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute, Some("keepers.count".to_string()));
    }

    #[test]
    fn test_validate_multiple_errors() {
        let schema = Schema::v0()
            .with_attribute("length", Attribute::required_int64())
            .with_attribute("upper", Attribute::optional_bool())
            .with_attribute("override_special", Attribute::optional_string());

        let diagnostics = validate(
            &schema,
            &json!({"length": "x", "upper": "yes", "override_special": 1}),
        );
        assert_eq!(diagnostics.len(), 3);
    }

    #[test]
    fn test_validate_root_not_object() {
        let schema = Schema::v0().with_attribute("length", Attribute::required_int64());

        let diagnostics = validate(&schema, &json!("not an object"));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("Expected object"));
    }

    fn resource(attr_name: &str, attr: Attribute) -> ProviderSchema {
        ProviderSchema::new().with_resource(
            "random_thing",
            Schema::v0()
                .with_attribute("id", Attribute::computed_string())
                .with_attribute(attr_name, attr),
        )
    }

    #[test]
    fn test_provider_schema_valid() {
        let schema = resource(
            "upper",
            Attribute::optional_bool()
                .with_default(json!(true))
                .with_force_new(),
        );
        assert!(validate_provider_schema(&schema).is_empty());
    }

    #[test]
    fn test_provider_schema_rejects_flag_conflicts() {
        let both = Attribute::new(
            AttributeType::String,
            AttributeFlags {
                required: true,
                optional: true,
                ..Default::default()
            },
        );
        let diagnostics = validate_provider_schema(&resource("name", both));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("both required and optional"));

        let neither = Attribute::new(AttributeType::String, AttributeFlags::default());
        let diagnostics = validate_provider_schema(&resource("name", neither));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute, Some("random_thing.name".to_string()));
    }

    #[test]
    fn test_provider_schema_rejects_bad_defaults() {
        let required_default = Attribute::required_int64().with_default(json!(1));
        let diagnostics = validate_provider_schema(&resource("length", required_default));
        assert_eq!(diagnostics.len(), 1);

        let wrong_type = Attribute::optional_bool().with_default(json!("yes"));
        let diagnostics = validate_provider_schema(&resource("upper", wrong_type));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("Default value"));
    }

    #[test]
    fn test_provider_schema_rejects_computed_force_new() {
        let attr = Attribute::computed_string().with_force_new();
        let diagnostics = validate_provider_schema(&resource("result", attr));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("cannot force replacement"));
    }

    #[test]
    fn test_provider_schema_requires_id() {
        let schema = ProviderSchema::new().with_resource(
            "random_thing",
            Schema::v0().with_attribute("result", Attribute::computed_string()),
        );
        let diagnostics = validate_provider_schema(&schema);
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("does not declare 'id'"));

        let schema = ProviderSchema::new().with_resource(
            "random_thing",
            Schema::v0().with_attribute("id", Attribute::required_string()),
        );
        assert_eq!(validate_provider_schema(&schema).len(), 1);
    }

    #[test]
    fn test_provider_schema_rejects_bad_names() {
        let schema = ProviderSchema::new().with_resource(
            "Random-Thing",
            Schema::v0()
                .with_attribute("id", Attribute::computed_string())
                .with_attribute("Length", Attribute::required_int64()),
        );
        let diagnostics = validate_provider_schema(&schema);
        assert_eq!(diagnostics.len(), 2);
    }
}
