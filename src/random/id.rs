//! `random_id`: random bytes rendered in several encodings.
//!
//! `id` is the unprefixed URL-safe base64 form. Every other output carries
//! `prefix` when one is set.

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use serde_json::{json, Value};

use super::{get_int, get_str, id_attribute, keepers_attribute, required_int, set_attributes};
use crate::error::ProviderError;
use crate::schema::{Attribute, Diagnostic, Schema};

pub(super) fn schema() -> Schema {
    let output = |description: &str| Attribute::computed_string().with_description(description);

    Schema::v0()
        .with_description("Generates random numbers intended to be used as unique identifiers.")
        .with_attribute("keepers", keepers_attribute())
        .with_attribute(
            "byte_length",
            Attribute::required_int64()
                .with_description("The number of random bytes to produce. The minimum value is 1.")
                .with_force_new(),
        )
        .with_attribute(
            "prefix",
            Attribute::optional_string()
                .with_description("Arbitrary string to prefix the output value with.")
                .with_force_new(),
        )
        .with_attribute("b64_url", output("The generated id as URL-safe base64 without padding."))
        .with_attribute("b64_std", output("The generated id as standard padded base64."))
        .with_attribute("hex", output("The generated id as lowercase hexadecimal."))
        .with_attribute("dec", output("The generated id as a decimal number."))
        .with_attribute("id", id_attribute())
}

pub(super) fn validate(config: &Value) -> Vec<Diagnostic> {
    match get_int(config, "byte_length") {
        Some(n) if n < 1 => vec![Diagnostic::error("byte_length must be at least 1")
            .with_detail(format!("Got {}", n))
            .with_attribute("byte_length")],
        _ => vec![],
    }
}

pub(super) fn generate(config: Value) -> Result<Value, ProviderError> {
    let byte_length = required_int(&config, "byte_length")?;
    let byte_length = usize::try_from(byte_length)
        .ok()
        .filter(|n| *n >= 1)
        .ok_or_else(|| ProviderError::Validation("byte_length must be at least 1".to_string()))?;

    let mut bytes = vec![0u8; byte_length];
    OsRng.fill_bytes(&mut bytes);
    Ok(with_bytes(config, &bytes))
}

fn with_bytes(config: Value, bytes: &[u8]) -> Value {
    let prefix = get_str(&config, "prefix").unwrap_or_default().to_string();
    let b64_url = URL_SAFE_NO_PAD.encode(bytes);
    let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();

    let values = [
        ("b64_url", json!(format!("{}{}", prefix, b64_url))),
        ("b64_std", json!(format!("{}{}", prefix, STANDARD.encode(bytes)))),
        ("hex", json!(format!("{}{}", prefix, hex))),
        ("dec", json!(format!("{}{}", prefix, to_decimal(bytes)))),
        ("id", json!(b64_url)),
    ];
    set_attributes(config, values)
}

/// Big-endian bytes as an unsigned decimal number.
fn to_decimal(bytes: &[u8]) -> String {
    // Little-endian base-10 digits.
    let mut digits: Vec<u8> = vec![0];
    for &byte in bytes {
        let mut carry = u32::from(byte);
        for digit in digits.iter_mut() {
            let value = u32::from(*digit) * 256 + carry;
            *digit = (value % 10) as u8;
            carry = value / 10;
        }
        while carry > 0 {
            digits.push((carry % 10) as u8);
            carry /= 10;
        }
    }
    digits.iter().rev().map(|d| char::from(b'0' + d)).collect()
}

/// Import from `b64_url` or `prefix,b64_url`.
pub(super) fn import(id: &str) -> Result<Value, ProviderError> {
    let (prefix, encoded) = match id.split_once(',') {
        Some((prefix, encoded)) => (Some(prefix), encoded),
        None => (None, id),
    };

    let bytes = URL_SAFE_NO_PAD.decode(encoded).map_err(|e| {
        ProviderError::InvalidRequest(format!(
            "Invalid import id '{}', expected [prefix,]b64_url: {}",
            id, e
        ))
    })?;
    if bytes.is_empty() {
        return Err(ProviderError::InvalidRequest(
            "Import id must encode at least one byte".to_string(),
        ));
    }

    let config = schema().apply_defaults(&json!({
        "byte_length": bytes.len(),
        "prefix": prefix,
    }));
    Ok(with_bytes(config, &bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encodings() {
        let state = with_bytes(json!({"byte_length": 4, "prefix": null}), &[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(state["b64_url"], json!("3q2-7w"));
        assert_eq!(state["b64_std"], json!("3q2+7w=="));
        assert_eq!(state["hex"], json!("deadbeef"));
        assert_eq!(state["dec"], json!("3735928559"));
        assert_eq!(state["id"], json!("3q2-7w"));
    }

    #[test]
    fn test_prefix_applies_to_outputs_but_not_id() {
        let state = with_bytes(json!({"byte_length": 1, "prefix": "srv-"}), &[0xff]);
        assert_eq!(state["b64_url"], json!("srv-_w"));
        assert_eq!(state["hex"], json!("srv-ff"));
        assert_eq!(state["dec"], json!("srv-255"));
        assert_eq!(state["id"], json!("_w"));
    }

    #[test]
    fn test_to_decimal() {
        assert_eq!(to_decimal(&[]), "0");
        assert_eq!(to_decimal(&[0, 0]), "0");
        assert_eq!(to_decimal(&[1, 0]), "256");
        assert_eq!(
            to_decimal(&[0xff; 8]),
            u64::MAX.to_string()
        );
    }

    #[test]
    fn test_generate_byte_length() {
        let state = generate(json!({"byte_length": 8, "prefix": null})).unwrap();
        let id = state["id"].as_str().unwrap();
        assert_eq!(URL_SAFE_NO_PAD.decode(id).unwrap().len(), 8);
        assert_eq!(state["hex"].as_str().unwrap().len(), 16);
    }

    #[test]
    fn test_validate_byte_length() {
        assert!(validate(&json!({"byte_length": 1})).is_empty());
        assert_eq!(
            validate(&json!({"byte_length": 0}))[0].attribute,
            Some("byte_length".to_string())
        );
        assert!(generate(json!({"byte_length": 0})).is_err());
    }

    #[test]
    fn test_import() {
        let state = import("3q2-7w").unwrap();
        assert_eq!(state["byte_length"], json!(4));
        assert_eq!(state["hex"], json!("deadbeef"));
        assert_eq!(state["prefix"], Value::Null);

        let state = import("srv-,3q2-7w").unwrap();
        assert_eq!(state["prefix"], json!("srv-"));
        assert_eq!(state["b64_std"], json!("srv-3q2+7w=="));
        assert_eq!(state["id"], json!("3q2-7w"));

        assert!(import("not base64!").is_err());
        assert!(import("").is_err());
    }
}
