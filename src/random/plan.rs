//! Planning shared by every random resource.
//!
//! All inputs force replacement, so a plan is either a create, a destroy, a
//! replacement or a no-op. In-place updates only happen for attributes that
//! are not force-new.

use serde_json::Value;

use super::set_attributes;
use crate::schema::Schema;
use crate::types::{AttributeChange, PlanResult};

/// Plan a resource change from its prior state and proposed config.
///
/// A `null` proposed state is a destroy. Computed attributes are absent from
/// the planned state whenever a new value will be generated.
pub(super) fn plan(schema: &Schema, prior: Option<Value>, proposed: Value) -> PlanResult {
    let prior = prior.filter(|v| !v.is_null());

    if proposed.is_null() {
        let changes = prior
            .as_ref()
            .and_then(Value::as_object)
            .map(|obj| {
                obj.iter()
                    .filter(|(_, v)| !v.is_null())
                    .map(|(name, v)| AttributeChange::removed(name.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default();
        return PlanResult::with_changes(Value::Null, changes, false);
    }

    let config = schema.apply_defaults(&proposed);

    let Some(prior) = prior else {
        let changes = schema
            .attribute_names()
            .into_iter()
            .filter_map(|name| {
                config
                    .get(name)
                    .filter(|v| !v.is_null())
                    .map(|v| AttributeChange::added(name, v.clone()))
            })
            .collect();
        return PlanResult::with_changes(config, changes, false);
    };

    let mut changes = Vec::new();
    let mut requires_replace = false;
    for name in schema.attribute_names() {
        let Some(attr) = schema.attribute(name) else {
            continue;
        };
        if !attr.is_configurable() {
            continue;
        }

        let before = prior.get(name).filter(|v| !v.is_null()).cloned();
        let after = config.get(name).filter(|v| !v.is_null()).cloned();
        if before == after {
            continue;
        }
        requires_replace |= attr.force_new;
        changes.push(AttributeChange::new(name, before, after));
    }

    if changes.is_empty() {
        PlanResult::no_change(prior)
    } else if requires_replace {
        PlanResult::with_changes(config, changes, true)
    } else {
        PlanResult::with_changes(carry_computed(schema, &prior, config), changes, false)
    }
}

/// Copy computed-only attributes from `prior` onto `config`.
pub(super) fn carry_computed(schema: &Schema, prior: &Value, config: Value) -> Value {
    let computed: Vec<(String, Value)> = schema
        .attribute_names()
        .into_iter()
        .filter(|name| {
            schema
                .attribute(name)
                .is_some_and(|attr| attr.flags.is_computed_only())
        })
        .filter_map(|name| prior.get(name).map(|v| (name.to_string(), v.clone())))
        .collect();
    set_attributes(config, computed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Attribute;
    use serde_json::json;

    fn schema() -> Schema {
        Schema::v0()
            .with_attribute("length", Attribute::required_int64().with_force_new())
            .with_attribute(
                "upper",
                Attribute::optional_bool()
                    .with_default(json!(true))
                    .with_force_new(),
            )
            .with_attribute("note", Attribute::optional_string())
            .with_attribute("result", Attribute::computed_string())
            .with_attribute("id", Attribute::computed_string())
    }

    #[test]
    fn test_plan_create() {
        let result = plan(&schema(), None, json!({"length": 8}));
        assert!(!result.requires_replace);
        assert_eq!(
            result.planned_state,
            json!({"length": 8, "upper": true, "note": null})
        );
        let paths: Vec<&str> = result.changes.iter().map(|c| c.path.as_str()).collect();
        assert_eq!(paths, vec!["length", "upper"]);
    }

    #[test]
    fn test_plan_destroy() {
        let prior = json!({"length": 8, "upper": true, "note": null, "result": "abc", "id": "abc"});
        let result = plan(&schema(), Some(prior), Value::Null);
        assert!(result.planned_state.is_null());
        assert_eq!(result.changes.len(), 4);
        assert!(result.changes.iter().all(|c| c.after.is_none()));
    }

    #[test]
    fn test_plan_no_change() {
        let prior = json!({"length": 8, "upper": true, "note": null, "result": "abc", "id": "abc"});
        let result = plan(&schema(), Some(prior.clone()), json!({"length": 8}));
        assert!(!result.has_changes());
        assert_eq!(result.planned_state, prior);
    }

    #[test]
    fn test_plan_force_new_change_requires_replace() {
        let prior = json!({"length": 8, "upper": true, "note": null, "result": "abc", "id": "abc"});
        let result = plan(&schema(), Some(prior), json!({"length": 10}));
        assert!(result.requires_replace);
        assert!(result.planned_state.get("result").is_none());
        assert_eq!(
            result.changes,
            vec![AttributeChange::modified("length", json!(8), json!(10))]
        );
    }

    #[test]
    fn test_plan_in_place_change_keeps_computed() {
        let prior = json!({"length": 8, "upper": true, "note": null, "result": "abc", "id": "abc"});
        let result = plan(&schema(), Some(prior), json!({"length": 8, "note": "hi"}));
        assert!(!result.requires_replace);
        assert_eq!(result.planned_state["result"], json!("abc"));
        assert_eq!(result.planned_state["note"], json!("hi"));
        assert_eq!(result.changes, vec![AttributeChange::added("note", json!("hi"))]);
    }
}
