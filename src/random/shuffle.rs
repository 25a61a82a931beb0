//! `random_shuffle`: a random permutation of a list of strings.

use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::{json, Value};

use super::{
    get_int, get_str, id_attribute, keepers_attribute, seeded_rng, set_attributes, MAX_OUTPUT_LEN,
};
use crate::error::ProviderError;
use crate::schema::{Attribute, AttributeFlags, AttributeType, Diagnostic, Schema};

const SHUFFLE_ID: &str = "-";

pub(super) fn schema() -> Schema {
    let strings = || AttributeType::list(AttributeType::String);

    Schema::v0()
        .with_description("Generates a random permutation of a list of strings.")
        .with_attribute("keepers", keepers_attribute())
        .with_attribute(
            "input",
            Attribute::new(strings(), AttributeFlags::required())
                .with_description("The list of strings to shuffle.")
                .with_force_new(),
        )
        .with_attribute(
            "result_count",
            Attribute::optional_int64()
                .with_description(
                    "The number of results to return. Defaults to the number of items in the input list.",
                )
                .with_force_new(),
        )
        .with_attribute(
            "seed",
            Attribute::optional_string()
                .with_description("Arbitrary string with which to seed the random number generator.")
                .with_force_new(),
        )
        .with_attribute(
            "result",
            Attribute::new(strings(), AttributeFlags::computed())
                .with_description("Random permutation of the list of strings given in input."),
        )
        .with_attribute("id", id_attribute())
}

pub(super) fn validate(config: &Value) -> Vec<Diagnostic> {
    match get_int(config, "result_count") {
        Some(n) if n < 0 => vec![Diagnostic::error("result_count must not be negative")
            .with_detail(format!("Got {}", n))
            .with_attribute("result_count")],
        Some(n) if n > MAX_OUTPUT_LEN => vec![Diagnostic::error(format!(
            "result_count must be at most {}",
            MAX_OUTPUT_LEN
        ))
        .with_detail(format!("Got {}", n))
        .with_attribute("result_count")],
        _ => vec![],
    }
}

pub(super) fn generate(config: Value) -> Result<Value, ProviderError> {
    let input: Vec<Value> = config
        .get("input")
        .and_then(Value::as_array)
        .cloned()
        .ok_or_else(|| ProviderError::Validation("Missing required attribute 'input'".to_string()))?;
    let result_count = match get_int(&config, "result_count") {
        Some(n) if n < 0 => {
            return Err(ProviderError::Validation(
                "result_count must not be negative".to_string(),
            ))
        },
        Some(n) if n > MAX_OUTPUT_LEN => {
            return Err(ProviderError::Validation(format!(
                "result_count must be at most {}",
                MAX_OUTPUT_LEN
            )))
        },
        Some(0) | None => input.len(),
        Some(n) => usize::try_from(n).unwrap_or(input.len()),
    };

    let mut rng = seeded_rng(get_str(&config, "seed"));
    let result = shuffle(&input, result_count, &mut rng);
    Ok(set_attributes(
        config,
        [("result", Value::Array(result)), ("id", json!(SHUFFLE_ID))],
    ))
}

/// Take `count` items from successive permutations of `input`.
fn shuffle<T: Clone, R: Rng + ?Sized>(input: &[T], count: usize, rng: &mut R) -> Vec<T> {
    if input.is_empty() {
        return Vec::new();
    }

    let mut result = Vec::with_capacity(count.min(input.len()));

    let mut order: Vec<usize> = (0..input.len()).collect();
    while result.len() < count {
        order.shuffle(rng);
        let take = (count - result.len()).min(order.len());
        result.extend(order[..take].iter().map(|&i| input[i].clone()));
    }
    result
}
