//! `random_uuid`: a version 4 UUID.

use ::uuid::Uuid;
use serde_json::{json, Value};

use super::{id_attribute, keepers_attribute, set_attributes};
use crate::error::ProviderError;
use crate::schema::{Attribute, Schema};

pub(super) fn schema() -> Schema {
    Schema::v0()
        .with_description("Generates a random version 4 UUID.")
        .with_attribute("keepers", keepers_attribute())
        .with_attribute(
            "result",
            Attribute::computed_string().with_description("The generated UUID."),
        )
        .with_attribute("id", id_attribute())
}

pub(super) fn generate(config: Value) -> Value {
    with_result(config, Uuid::new_v4())
}

fn with_result(config: Value, uuid: Uuid) -> Value {
    let result = uuid.hyphenated().to_string();
    set_attributes(config, [("result", json!(result)), ("id", json!(result))])
}

/// Import an existing UUID, stored in lowercase hyphenated form.
pub(super) fn import(id: &str) -> Result<Value, ProviderError> {
    let uuid = Uuid::parse_str(id).map_err(|e| {
        ProviderError::InvalidRequest(format!("Invalid UUID '{}': {}", id, e))
    })?;
    Ok(with_result(schema().apply_defaults(&json!({})), uuid))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_v4() {
        let state = generate(json!({"keepers": null}));
        let result = state["result"].as_str().unwrap();
        assert_eq!(result.len(), 36);
        assert_eq!(result, result.to_lowercase());
        assert_eq!(Uuid::parse_str(result).unwrap().get_version_num(), 4);
        assert_eq!(state["id"], state["result"]);
    }

    #[test]
    fn test_generate_is_unique() {
        assert_ne!(generate(json!({}))["result"], generate(json!({}))["result"]);
    }

    #[test]
    fn test_import() {
        let state = import("6E9C1F58-0A5C-4B8E-9D6B-6D1F2B0C9A11").unwrap();
        assert_eq!(state["result"], json!("6e9c1f58-0a5c-4b8e-9d6b-6d1f2b0c9a11"));
        assert_eq!(state["id"], state["result"]);
        assert_eq!(state["keepers"], Value::Null);

        assert!(matches!(
            import("not-a-uuid"),
            Err(ProviderError::InvalidRequest(_))
        ));
    }
}
