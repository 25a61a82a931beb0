//! `random_string` and `random_password`.
//!
//! Both draw from the same character classes. A password's result is
//! sensitive and its id is the constant `"none"` so the secret never leaks
//! through the resource address.

use rand::rngs::OsRng;
use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::{json, Value};

use super::{
    get_bool, get_int, get_str, id_attribute, keepers_attribute, required_int, set_attributes,
    validation_error, MAX_OUTPUT_LEN,
};
use crate::error::ProviderError;
use crate::schema::{has_errors, Attribute, Diagnostic, Schema};

/// Special characters used unless `override_special` is set.
pub(super) const DEFAULT_SPECIAL: &str = "!@#$%&*()-_=+[]{}<>:?";

const UPPER: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const LOWER: &str = "abcdefghijklmnopqrstuvwxyz";
const NUMERIC: &str = "0123456789";

const PASSWORD_ID: &str = "none";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Flavor {
    String,
    Password,
}

pub(super) fn schema(flavor: Flavor) -> Schema {
    let mut result = Attribute::computed_string().with_description("The generated random string.");
    if flavor == Flavor::Password {
        result = result.sensitive();
    }

    let class = |description: &str| {
        Attribute::optional_bool()
            .with_default(json!(true))
            .with_description(description)
            .with_force_new()
    };
    let minimum = |description: &str| {
        Attribute::optional_int64()
            .with_default(json!(0))
            .with_description(description)
            .with_force_new()
    };

    Schema::new(1)
        .with_description(match flavor {
            Flavor::String => "Generates a random permutation of alphanumeric and special characters.",
            Flavor::Password => {
                "Identical to random_string with the exception that the result is treated as sensitive."
            },
        })
        .with_attribute("keepers", keepers_attribute())
        .with_attribute(
            "length",
            Attribute::required_int64()
                .with_description("The length of the string desired. The minimum value is 1.")
                .with_force_new(),
        )
        .with_attribute("upper", class("Include uppercase alphabet characters in the result."))
        .with_attribute("lower", class("Include lowercase alphabet characters in the result."))
        .with_attribute("number", class("Include numeric characters in the result."))
        .with_attribute("special", class("Include special characters in the result."))
        .with_attribute("min_upper", minimum("Minimum number of uppercase alphabet characters."))
        .with_attribute("min_lower", minimum("Minimum number of lowercase alphabet characters."))
        .with_attribute("min_numeric", minimum("Minimum number of numeric characters."))
        .with_attribute("min_special", minimum("Minimum number of special characters."))
        .with_attribute(
            "override_special",
            Attribute::optional_string()
                .with_description("Supply your own list of special characters to use.")
                .with_force_new(),
        )
        .with_attribute("result", result)
        .with_attribute("id", id_attribute())
}

/// Character classes and sizing read from a defaults-applied config.
#[derive(Debug, Clone, PartialEq, Eq)]
struct StringParams {
    length: i64,
    /// `(characters, minimum)` for each enabled class.
    classes: Vec<(Vec<char>, i64)>,
}

impl StringParams {
    fn from_config(config: &Value) -> Self {
        let special = get_str(config, "override_special").unwrap_or(DEFAULT_SPECIAL);

        let classes = [
            ("upper", "min_upper", UPPER),
            ("lower", "min_lower", LOWER),
            ("number", "min_numeric", NUMERIC),
            ("special", "min_special", special),
        ]
        .into_iter()
        .filter(|(flag, _, _)| get_bool(config, flag).unwrap_or(true))
        .map(|(_, min, chars)| (chars.chars().collect::<Vec<_>>(), get_int(config, min).unwrap_or(0)))
        .filter(|(chars, _)| !chars.is_empty())
        .collect();

        Self {
            length: get_int(config, "length").unwrap_or(0),
            classes,
        }
    }

    fn validate(&self) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        if self.length < 1 {
            diagnostics.push(
                Diagnostic::error("length must be at least 1")
                    .with_detail(format!("Got {}", self.length))
                    .with_attribute("length"),
            );
        }
        if self.length > MAX_OUTPUT_LEN {
            diagnostics.push(
                Diagnostic::error(format!("length must be at most {}", MAX_OUTPUT_LEN))
                    .with_detail(format!("Got {}", self.length))
                    .with_attribute("length"),
            );
        }
        if self.classes.is_empty() {
            diagnostics.push(
                Diagnostic::error("at least one character class must be enabled")
                    .with_detail("upper, lower, number and special are all false or empty"),
            );
        }
        if self.classes.iter().any(|(_, min)| *min < 0) {
            diagnostics.push(Diagnostic::error("minimum character counts must not be negative"));
        }
        let required = self
            .classes
            .iter()
            .try_fold(0i64, |sum, (_, min)| sum.checked_add((*min).max(0)));
        if self.length >= 1 && required.map_or(true, |required| required > self.length) {
            let detail = match required {
                Some(required) => format!(
                    "The minimums add up to {} but length is {}",
                    required, self.length
                ),
                None => format!("The minimums overflow but length is {}", self.length),
            };
            diagnostics.push(
                Diagnostic::error("minimum character counts exceed length")
                    .with_detail(detail)
                    .with_attribute("length"),
            );
        }
        diagnostics
    }

    /// Draw per-class minimums, fill up to `length` from every enabled class,
    /// then shuffle. Expects params that passed [`validate`](Self::validate).
    fn generate<R: Rng + ?Sized>(&self, rng: &mut R) -> String {
        let length = usize::try_from(self.length.clamp(0, MAX_OUTPUT_LEN)).unwrap_or(0);
        let mut out: Vec<char> = Vec::with_capacity(length);

        for (chars, min) in &self.classes {
            for _ in 0..(*min).max(0) {
                out.push(chars[rng.gen_range(0..chars.len())]);
            }
        }

        let charset: Vec<char> = self
            .classes
            .iter()
            .flat_map(|(chars, _)| chars.iter().copied())
            .collect();
        while out.len() < length && !charset.is_empty() {
            out.push(charset[rng.gen_range(0..charset.len())]);
        }

        out.shuffle(rng);
        out.into_iter().collect()
    }
}

pub(super) fn validate(config: &Value) -> Vec<Diagnostic> {
    StringParams::from_config(config).validate()
}

pub(super) fn generate(flavor: Flavor, config: Value) -> Result<Value, ProviderError> {
    required_int(&config, "length")?;
    let params = StringParams::from_config(&config);
    let diagnostics = params.validate();
    if has_errors(&diagnostics) {
        return Err(validation_error(&diagnostics));
    }
    let result = params.generate(&mut OsRng);
    Ok(with_result(flavor, config, result))
}

fn with_result(flavor: Flavor, config: Value, result: String) -> Value {
    let id = match flavor {
        Flavor::String => Value::String(result.clone()),
        Flavor::Password => Value::String(PASSWORD_ID.to_string()),
    };
    set_attributes(config, [("result", Value::String(result)), ("id", id)])
}

/// Import an existing value. Length is its character count, every other
/// input takes its default.
pub(super) fn import(flavor: Flavor, id: &str) -> Result<Value, ProviderError> {
    if id.is_empty() {
        return Err(ProviderError::InvalidRequest(
            "Import ID must be the existing value and cannot be empty".to_string(),
        ));
    }
    let config = schema(flavor).apply_defaults(&json!({ "length": id.chars().count() }));
    Ok(with_result(flavor, config, id.to_string()))
}

/// Version 0 states predate `number`; it was always on.
pub(super) fn upgrade_v0(mut state: Value) -> Value {
    if let Value::Object(map) = &mut state {
        if map.get("number").map_or(true, Value::is_null) {
            map.insert("number".to_string(), Value::Bool(true));
        }
    }
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::validate as validate_schema;

    fn config(overrides: Value) -> Value {
        schema(Flavor::String).apply_defaults(&overrides)
    }

    fn count(s: &str, set: &str) -> usize {
        s.chars().filter(|c| set.contains(*c)).count()
    }

    #[test]
    fn test_schema_is_version_one() {
        assert_eq!(schema(Flavor::String).version, 1);
        assert!(schema(Flavor::Password).attribute("result").unwrap().flags.sensitive);
        assert!(!schema(Flavor::String).attribute("result").unwrap().flags.sensitive);
    }

    #[test]
    fn test_generate_length_and_charset() {
        let state = generate(Flavor::String, config(json!({"length": 32}))).unwrap();
        let result = state["result"].as_str().unwrap();
        assert_eq!(result.chars().count(), 32);
        let allowed = format!("{}{}{}{}", UPPER, LOWER, NUMERIC, DEFAULT_SPECIAL);
        assert!(result.chars().all(|c| allowed.contains(c)));
        assert_eq!(state["id"], state["result"]);
    }

    #[test]
    fn test_generate_honours_minimums() {
        let params = StringParams::from_config(&config(json!({
            "length": 12,
            "min_upper": 3,
            "min_lower": 3,
            "min_numeric": 3,
            "min_special": 3,
        })));
        for _ in 0..20 {
            let result = params.generate(&mut OsRng);
            assert_eq!(result.chars().count(), 12);
            assert_eq!(count(&result, UPPER), 3);
            assert_eq!(count(&result, LOWER), 3);
            assert_eq!(count(&result, NUMERIC), 3);
            assert_eq!(count(&result, DEFAULT_SPECIAL), 3);
        }
    }

    #[test]
    fn test_generate_disabled_classes() {
        let params = StringParams::from_config(&config(json!({
            "length": 40,
            "upper": false,
            "number": false,
            "special": false,
        })));
        let result = params.generate(&mut OsRng);
        assert!(result.chars().all(|c| c.is_ascii_lowercase()));
    }

    #[test]
    fn test_override_special() {
        let params = StringParams::from_config(&config(json!({
            "length": 30,
            "upper": false,
            "lower": false,
            "number": false,
            "override_special": "/",
        })));
        assert_eq!(params.generate(&mut OsRng), "/".repeat(30));
    }

    #[test]
    fn test_validate_rules() {
        assert!(validate(&config(json!({"length": 8}))).is_empty());

        let diagnostics = validate(&config(json!({"length": 0})));
        assert_eq!(diagnostics[0].summary, "length must be at least 1");

        let diagnostics = validate(&config(json!({
            "length": 8,
            "upper": false,
            "lower": false,
            "number": false,
            "special": false,
        })));
        assert_eq!(diagnostics[0].summary, "at least one character class must be enabled");

        let diagnostics = validate(&config(json!({"length": 4, "min_upper": 3, "min_numeric": 2})));
        assert_eq!(diagnostics[0].summary, "minimum character counts exceed length");

        let diagnostics = validate(&config(json!({"length": 4, "min_lower": -1})));
        assert_eq!(
            diagnostics[0].summary,
            "minimum character counts must not be negative"
        );
    }

    #[test]
    fn test_huge_minimums_are_rejected() {
        let diagnostics = validate(&config(json!({
            "length": 4,
            "min_upper": i64::MAX,
            "min_lower": i64::MAX,
        })));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].summary, "minimum character counts exceed length");

        let err = generate(
            Flavor::String,
            config(json!({"length": 4, "min_upper": i64::MAX, "min_lower": i64::MAX})),
        )
        .unwrap_err();
        assert!(err.to_string().contains("exceed length"));
    }

    #[test]
    fn test_length_upper_bound() {
        let diagnostics = validate(&config(json!({"length": i64::MAX})));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute, Some("length".to_string()));
        assert!(diagnostics[0].summary.starts_with("length must be at most"));
        assert!(validate(&config(json!({"length": MAX_OUTPUT_LEN}))).is_empty());

        assert!(matches!(
            generate(Flavor::String, config(json!({"length": i64::MAX}))),
            Err(ProviderError::Validation(_))
        ));
    }

    #[test]
    fn test_password_id_is_constant() {
        let state = generate(Flavor::Password, config(json!({"length": 16}))).unwrap();
        assert_eq!(state["id"], json!("none"));
        assert_eq!(state["result"].as_str().unwrap().chars().count(), 16);
    }

    #[test]
    fn test_import() {
        let state = import(Flavor::String, "héllo").unwrap();
        assert_eq!(state["result"], json!("héllo"));
        assert_eq!(state["id"], json!("héllo"));
        assert_eq!(state["length"], json!(5));
        assert_eq!(state["special"], json!(true));
        assert_eq!(state["min_upper"], json!(0));
        assert!(validate_schema(&schema(Flavor::String), &state).is_empty());

        let state = import(Flavor::Password, "s3cret!").unwrap();
        assert_eq!(state["id"], json!("none"));
        assert_eq!(state["result"], json!("s3cret!"));

        assert!(matches!(
            import(Flavor::String, ""),
            Err(ProviderError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_upgrade_v0_adds_number() {
        let upgraded = upgrade_v0(json!({"length": 8, "result": "abcdefgh"}));
        assert_eq!(upgraded["number"], json!(true));

        let kept = upgrade_v0(json!({"length": 8, "number": false}));
        assert_eq!(kept["number"], json!(false));
    }
}
