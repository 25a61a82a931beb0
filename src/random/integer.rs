//! `random_integer`: a number in `[min, max]`.

use rand::Rng;
use serde_json::{json, Value};

use super::{get_int, get_str, id_attribute, keepers_attribute, required_int, seeded_rng, set_attributes};
use crate::error::ProviderError;
use crate::schema::{Attribute, Diagnostic, Schema};

pub(super) fn schema() -> Schema {
    Schema::v0()
        .with_description("Generates a random integer within the range [min, max].")
        .with_attribute("keepers", keepers_attribute())
        .with_attribute(
            "min",
            Attribute::required_int64()
                .with_description("The minimum inclusive value of the range.")
                .with_force_new(),
        )
        .with_attribute(
            "max",
            Attribute::required_int64()
                .with_description("The maximum inclusive value of the range.")
                .with_force_new(),
        )
        .with_attribute(
            "seed",
            Attribute::optional_string()
                .with_description("A custom seed to always produce the same value.")
                .with_force_new(),
        )
        .with_attribute(
            "result",
            Attribute::computed_int64().with_description("The random integer result."),
        )
        .with_attribute("id", id_attribute())
}

pub(super) fn validate(config: &Value) -> Vec<Diagnostic> {
    match (get_int(config, "min"), get_int(config, "max")) {
        (Some(min), Some(max)) if min > max => vec![Diagnostic::error(
            "minimum value needs to be smaller than or equal to maximum value",
        )
        .with_detail(format!("min = {}, max = {}", min, max))
        .with_attribute("min")],
        _ => vec![],
    }
}

pub(super) fn generate(config: Value) -> Result<Value, ProviderError> {
    let min = required_int(&config, "min")?;
    let max = required_int(&config, "max")?;
    if min > max {
        return Err(ProviderError::Validation(
            "minimum value needs to be smaller than or equal to maximum value".to_string(),
        ));
    }

    let result = seeded_rng(get_str(&config, "seed")).gen_range(min..=max);
    Ok(with_result(config, result))
}

fn with_result(config: Value, result: i64) -> Value {
    set_attributes(
        config,
        [("result", json!(result)), ("id", Value::String(result.to_string()))],
    )
}

/// Import from `result,min,max` or `result,min,max,seed`.
pub(super) fn import(id: &str) -> Result<Value, ProviderError> {
    let invalid = || {
        ProviderError::InvalidRequest(format!(
            "Invalid import id '{}', expected: result,min,max[,seed]",
            id
        ))
    };

    let parts: Vec<&str> = id.split(',').collect();
    if !(3..=4).contains(&parts.len()) {
        return Err(invalid());
    }
    let parse = |s: &str| s.trim().parse::<i64>().map_err(|_| invalid());
    let result = parse(parts[0])?;
    let min = parse(parts[1])?;
    let max = parse(parts[2])?;
    let seed = parts.get(3).map(|s| s.to_string());

    let config = schema().apply_defaults(&json!({
        "min": min,
        "max": max,
        "seed": seed,
    }));
    Ok(with_result(config, result))
}
