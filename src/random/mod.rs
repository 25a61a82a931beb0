//! The `hashicorp/random` provider.
//!
//! Resources generate random values once, at create time, and keep them in
//! state until a force-new attribute (usually `keepers`) changes. There is no
//! remote API: read returns state unchanged and delete is a no-op.

mod id;
mod integer;
mod plan;
mod shuffle;
mod string;
mod uuid;

use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::ProviderError;
use crate::schema::{has_errors, Attribute, Diagnostic, ProviderSchema, Schema};
use crate::server::ProviderService;
use crate::types::{ImportedResource, PlanResult};
use crate::validation;

/// Registry address the provider is published under.
pub const PROVIDER_ADDRESS: &str = "hashicorp/random";

/// Upper bound on generated string lengths and shuffle result counts.
const MAX_OUTPUT_LEN: i64 = 1 << 20;

/// Create the provider.
pub fn provider() -> RandomProvider {
    RandomProvider::new()
}

/// Resource types served by this provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResourceKind {
    String,
    Password,
    Integer,
    Uuid,
    Id,
    Shuffle,
}

impl ResourceKind {
    const ALL: [ResourceKind; 6] = [
        ResourceKind::String,
        ResourceKind::Password,
        ResourceKind::Integer,
        ResourceKind::Uuid,
        ResourceKind::Id,
        ResourceKind::Shuffle,
    ];

    fn type_name(self) -> &'static str {
        match self {
            ResourceKind::String => "random_string",
            ResourceKind::Password => "random_password",
            ResourceKind::Integer => "random_integer",
            ResourceKind::Uuid => "random_uuid",
            ResourceKind::Id => "random_id",
            ResourceKind::Shuffle => "random_shuffle",
        }
    }

    fn from_type_name(name: &str) -> Result<Self, ProviderError> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.type_name() == name)
            .ok_or_else(|| ProviderError::UnknownResource(name.to_string()))
    }

    fn schema(self) -> Schema {
        match self {
            ResourceKind::String => string::schema(string::Flavor::String),
            ResourceKind::Password => string::schema(string::Flavor::Password),
            ResourceKind::Integer => integer::schema(),
            ResourceKind::Uuid => uuid::schema(),
            ResourceKind::Id => id::schema(),
            ResourceKind::Shuffle => shuffle::schema(),
        }
    }

    /// Resource rules on a defaults-applied, type-checked config.
    fn validate(self, config: &Value) -> Vec<Diagnostic> {
        match self {
            ResourceKind::String | ResourceKind::Password => string::validate(config),
            ResourceKind::Integer => integer::validate(config),
            ResourceKind::Uuid => vec![],
            ResourceKind::Id => id::validate(config),
            ResourceKind::Shuffle => shuffle::validate(config),
        }
    }

    /// Generate computed attributes on top of `config`.
    fn generate(self, config: Value) -> Result<Value, ProviderError> {
        match self {
            ResourceKind::String => string::generate(string::Flavor::String, config),
            ResourceKind::Password => string::generate(string::Flavor::Password, config),
            ResourceKind::Integer => integer::generate(config),
            ResourceKind::Uuid => Ok(uuid::generate(config)),
            ResourceKind::Id => id::generate(config),
            ResourceKind::Shuffle => shuffle::generate(config),
        }
    }

    fn import(self, id: &str) -> Result<Value, ProviderError> {
        match self {
            ResourceKind::String => string::import(string::Flavor::String, id),
            ResourceKind::Password => string::import(string::Flavor::Password, id),
            ResourceKind::Integer => integer::import(id),
            ResourceKind::Uuid => uuid::import(id),
            ResourceKind::Id => id::import(id),
            ResourceKind::Shuffle => Err(ProviderError::Unimplemented(format!(
                "Import not supported for resource type: {}",
                self.type_name()
            ))),
        }
    }

    fn check_config(self, schema: &Schema, config: &Value) -> Vec<Diagnostic> {
        let mut diagnostics = validation::validate(schema, config);
        if !has_errors(&diagnostics) {
            diagnostics.extend(self.validate(&schema.apply_defaults(config)));
        }
        diagnostics
    }
}

/// The random provider. Holds no configuration.
#[derive(Debug, Clone, Default)]
pub struct RandomProvider;

impl RandomProvider {
    /// Create a new provider instance.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl ProviderService for RandomProvider {
    fn schema(&self) -> ProviderSchema {
        ResourceKind::ALL
            .into_iter()
            .fold(ProviderSchema::new(), |schema, kind| {
                schema.with_resource(kind.type_name(), kind.schema())
            })
    }

    async fn configure(&self, _config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        debug!("Random provider configured");
        Ok(vec![])
    }

    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let kind = ResourceKind::from_type_name(resource_type)?;
        Ok(kind.check_config(&kind.schema(), &config))
    }

    async fn upgrade_resource_state(
        &self,
        resource_type: &str,
        version: i64,
        state: Value,
    ) -> Result<Value, ProviderError> {
        match ResourceKind::from_type_name(resource_type)? {
            ResourceKind::String | ResourceKind::Password if version == 0 => {
                Ok(string::upgrade_v0(state))
            },
            _ => Ok(state),
        }
    }

    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
        _config: Value,
    ) -> Result<PlanResult, ProviderError> {
        let kind = ResourceKind::from_type_name(resource_type)?;
        Ok(plan::plan(&kind.schema(), prior_state, proposed_state))
    }

    async fn create(&self, resource_type: &str, planned_state: Value) -> Result<Value, ProviderError> {
        let kind = ResourceKind::from_type_name(resource_type)?;
        let schema = kind.schema();

        let diagnostics = kind.check_config(&schema, &planned_state);
        if has_errors(&diagnostics) {
            return Err(validation_error(&diagnostics));
        }

        let state = kind.generate(schema.apply_defaults(&planned_state))?;
        info!(resource_type, "Generated random value");
        Ok(state)
    }

    async fn read(&self, _resource_type: &str, current_state: Value) -> Result<Value, ProviderError> {
        Ok(current_state)
    }

    async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        let kind = ResourceKind::from_type_name(resource_type)?;
        let schema = kind.schema();
        let config = schema.apply_defaults(&planned_state);
        Ok(plan::carry_computed(&schema, &prior_state, config))
    }

    async fn delete(&self, resource_type: &str, _current_state: Value) -> Result<(), ProviderError> {
        ResourceKind::from_type_name(resource_type)?;
        Ok(())
    }

    async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        let kind = ResourceKind::from_type_name(resource_type)?;
        let state = kind.import(id)?;
        Ok(vec![ImportedResource::new(resource_type, state)])
    }
}

fn validation_error(diagnostics: &[Diagnostic]) -> ProviderError {
    let summaries: Vec<&str> = diagnostics
        .iter()
        .filter(|d| d.is_error())
        .map(|d| d.summary.as_str())
        .collect();
    ProviderError::Validation(summaries.join("; "))
}

/// `keepers`: arbitrary values whose change forces a new random value.
fn keepers_attribute() -> Attribute {
    Attribute::optional_string_map()
        .with_description(
            "Arbitrary map of values that, when changed, will trigger recreation of the resource.",
        )
        .with_force_new()
}

fn id_attribute() -> Attribute {
    Attribute::computed_string().with_description("The ID of the resource.")
}

/// Read an integer attribute. Whole floats are accepted.
fn get_int(config: &Value, name: &str) -> Option<i64> {
    let value = config.get(name)?;
    value
        .as_i64()
        .or_else(|| value.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
}

fn get_bool(config: &Value, name: &str) -> Option<bool> {
    config.get(name).and_then(Value::as_bool)
}

/// Read a string attribute, treating `""` as unset.
fn get_str<'a>(config: &'a Value, name: &str) -> Option<&'a str> {
    config
        .get(name)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

fn required_int(config: &Value, name: &str) -> Result<i64, ProviderError> {
    get_int(config, name)
        .ok_or_else(|| ProviderError::Validation(format!("Missing required attribute '{}'", name)))
}

/// Insert computed values into a state object.
fn set_attributes<I, K>(mut state: Value, values: I) -> Value
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    if !state.is_object() {
        state = Value::Object(serde_json::Map::new());
    }
    if let Value::Object(map) = &mut state {
        for (name, value) in values {
            map.insert(name.into(), value);
        }
    }
    state
}

/// 64-bit FNV-1a.
fn fnv1a(input: &str) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    input
        .bytes()
        .fold(OFFSET, |hash, byte| (hash ^ u64::from(byte)).wrapping_mul(PRIME))
}

/// Deterministic generator for a non-empty `seed`, entropy-seeded otherwise.
fn seeded_rng(seed: Option<&str>) -> ChaCha20Rng {
    match seed {
        Some(seed) => ChaCha20Rng::seed_from_u64(fnv1a(seed)),
        None => ChaCha20Rng::from_entropy(),
    }
}
