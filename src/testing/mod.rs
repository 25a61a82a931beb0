//! Testing utilities for the provider.
//!
//! Two levels of testing are supported:
//!
//! - [`ProviderTester`] drives a `ProviderService` directly, without a gRPC
//!   server, including the host's plan/apply decision.
//! - [`harness`] serves the provider in-process and points a host working
//!   directory at it through `TF_PROVIDER_REATTACH`.
//!
//! # Example
//!
//! ```
//! use terraform_provider_random::random;
//! use terraform_provider_random::testing::ProviderTester;
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let tester = ProviderTester::new(random::provider());
//! let state = tester
//!     .apply("random_integer", None, json!({"min": 1, "max": 6}))
//!     .await
//!     .unwrap();
//! let roll = state["result"].as_i64().unwrap();
//! assert!((1..=6).contains(&roll));
//! # });
//! ```

pub mod harness;

use std::fmt;

use serde_json::Value;

use crate::error::ProviderError;
use crate::schema::{Diagnostic, ProviderSchema};
use crate::server::ProviderService;
use crate::types::{ImportedResource, PlanResult};

/// Drives a `ProviderService` the way the host would, without gRPC.
pub struct ProviderTester<P: ProviderService> {
    provider: P,
}

impl<P: ProviderService> ProviderTester<P> {
    /// Create a new tester for the given provider.
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    /// Get a reference to the underlying provider.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Get the provider's schema.
    pub fn schema(&self) -> ProviderSchema {
        self.provider.schema()
    }

    /// Get the list of resource type names.
    pub fn resource_types(&self) -> Vec<String> {
        self.provider.metadata().resources
    }

    /// Configure the provider, failing on error diagnostics.
    pub async fn configure(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.configure(config).await?;
        check_diagnostics(diagnostics)
    }

    /// Validate a resource configuration, failing on error diagnostics.
    pub async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<(), TestError> {
        let diagnostics = self
            .provider
            .validate_resource_config(resource_type, config)
            .await?;
        check_diagnostics(diagnostics)
    }

    /// Plan a resource creation (no prior state).
    pub async fn plan_create(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, None, config.clone(), config)
            .await
    }

    /// Plan a change to an existing resource.
    pub async fn plan_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        config: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, Some(prior_state), config.clone(), config)
            .await
    }

    /// Plan a resource deletion.
    pub async fn plan_delete(
        &self,
        resource_type: &str,
        prior_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, Some(prior_state), Value::Null, Value::Null)
            .await
    }

    /// Create a new resource.
    pub async fn create(
        &self,
        resource_type: &str,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider.create(resource_type, planned_state).await
    }

    /// Read the current state of a resource.
    pub async fn read(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider.read(resource_type, current_state).await
    }

    /// Update an existing resource.
    pub async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider
            .update(resource_type, prior_state, planned_state)
            .await
    }

    /// Delete a resource.
    pub async fn delete(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<(), ProviderError> {
        self.provider.delete(resource_type, current_state).await
    }

    /// Import an existing resource by id.
    pub async fn import(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        self.provider.import_resource(resource_type, id).await
    }

    /// Upgrade resource state from an older schema version.
    pub async fn upgrade_resource_state(
        &self,
        resource_type: &str,
        version: i64,
        state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider
            .upgrade_resource_state(resource_type, version, state)
            .await
    }

    /// Validate, plan and apply `config` on top of `prior_state`.
    ///
    /// Mirrors the host: no prior state creates, an unchanged plan keeps the
    /// prior state, a replacement deletes then creates, anything else updates
    /// in place. Returns the resulting state.
    pub async fn apply(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        config: Value,
    ) -> Result<Value, TestError> {
        self.validate_resource_config(resource_type, config.clone())
            .await?;

        let plan = self
            .provider
            .plan(resource_type, prior_state.clone(), config.clone(), config)
            .await?;

        let state = match prior_state {
            None => self.create(resource_type, plan.planned_state).await?,
            Some(prior) if !plan.has_changes() => prior,
            Some(prior) if plan.requires_replace => {
                self.delete(resource_type, prior).await?;
                self.create(resource_type, plan.planned_state).await?
            },
            Some(prior) => {
                self.update(resource_type, prior, plan.planned_state)
                    .await?
            },
        };
        Ok(state)
    }
}

/// Error type for test operations that may fail with diagnostics.
#[derive(Debug)]
pub enum TestError {
    /// The operation failed with diagnostics.
    Diagnostics(Vec<Diagnostic>),
    /// The operation failed with a provider error.
    Provider(ProviderError),
}

impl fmt::Display for TestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestError::Diagnostics(diags) => {
                writeln!(f, "Operation failed with {} diagnostic(s):", diags.len())?;
                for diag in diags {
                    write!(f, "  [{:?}] {}", diag.severity, diag.summary)?;
                    if let Some(detail) = &diag.detail {
                        write!(f, ": {}", detail)?;
                    }
                    if let Some(attr) = &diag.attribute {
                        write!(f, " (at {})", attr)?;
                    }
                    writeln!(f)?;
                }
                Ok(())
            },
            TestError::Provider(e) => write!(f, "Provider error: {}", e),
        }
    }
}

impl std::error::Error for TestError {}

impl From<ProviderError> for TestError {
    fn from(e: ProviderError) -> Self {
        TestError::Provider(e)
    }
}

fn check_diagnostics(diagnostics: Vec<Diagnostic>) -> Result<(), TestError> {
    let errors: Vec<_> = diagnostics.into_iter().filter(Diagnostic::is_error).collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(TestError::Diagnostics(errors))
    }
}

// =========================================================================
// Assertion Helpers
// =========================================================================

/// Assert that a plan result creates the resource.
///
/// # Panics
///
/// Panics if the plan has no changes or requires replacement.
pub fn assert_plan_creates(plan: &PlanResult) {
    assert!(
        plan.has_changes(),
        "Expected plan to have changes for create, but got no changes"
    );
    assert!(!plan.requires_replace, "Expected plan to create, not replace");
}

/// Assert that a plan result indicates no changes.
///
/// # Panics
///
/// Panics if the plan has any changes.
pub fn assert_plan_no_changes(plan: &PlanResult) {
    assert!(
        !plan.has_changes(),
        "Expected no changes, but got {} change(s): {:?}",
        plan.changes.len(),
        plan.changes.iter().map(|c| &c.path).collect::<Vec<_>>()
    );
}

/// Assert that a plan requires resource replacement.
///
/// # Panics
///
/// Panics if the plan does not require replacement.
pub fn assert_plan_replaces(plan: &PlanResult) {
    assert!(
        plan.requires_replace,
        "Expected plan to require replacement, but it does not"
    );
}

/// Assert that a plan has a change for a specific attribute path.
///
/// # Panics
///
/// Panics if the plan does not have a change for the given path.
pub fn assert_plan_changes_attribute(plan: &PlanResult, path: &str) {
    let has_change = plan.changes.iter().any(|c| c.path == path);
    assert!(
        has_change,
        "Expected plan to change attribute '{}', but it was not changed. Changed attributes: {:?}",
        path,
        plan.changes.iter().map(|c| &c.path).collect::<Vec<_>>()
    );
}

/// Assert that diagnostics contain no errors.
///
/// # Panics
///
/// Panics if there are any error diagnostics.
pub fn assert_no_errors(diagnostics: &[Diagnostic]) {
    let errors: Vec<_> = diagnostics.iter().filter(|d| d.is_error()).collect();

    assert!(
        errors.is_empty(),
        "Expected no errors, but got {} error(s): {:?}",
        errors.len(),
        errors.iter().map(|d| &d.summary).collect::<Vec<_>>()
    );
}

/// Assert that diagnostics contain an error with the given summary substring.
///
/// # Panics
///
/// Panics if no error diagnostic contains the given substring.
pub fn assert_error_contains(diagnostics: &[Diagnostic], substring: &str) {
    let has_matching_error = diagnostics
        .iter()
        .any(|d| d.is_error() && d.summary.contains(substring));

    assert!(
        has_matching_error,
        "Expected an error containing '{}', but no matching error found. Errors: {:?}",
        substring,
        diagnostics
            .iter()
            .filter(|d| d.is_error())
            .map(|d| &d.summary)
            .collect::<Vec<_>>()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::{self, RandomProvider};
    use serde_json::json;

    fn tester() -> ProviderTester<RandomProvider> {
        ProviderTester::new(random::provider())
    }

    #[tokio::test]
    async fn test_tester_configure() {
        assert!(tester().configure(json!({})).await.is_ok());
    }

    #[tokio::test]
    async fn test_tester_resource_types() {
        let types = tester().resource_types();
        assert!(types.contains(&"random_password".to_string()));
        assert!(tester().schema().resources.contains_key("random_shuffle"));
    }

    #[tokio::test]
    async fn test_tester_plan_create() {
        let plan = tester()
            .plan_create("random_string", json!({"length": 8}))
            .await
            .unwrap();

        assert_plan_creates(&plan);
        assert_plan_changes_attribute(&plan, "length");
        assert_eq!(plan.planned_state["upper"], json!(true));
    }

    #[tokio::test]
    async fn test_tester_plan_replace_and_no_change() {
        let tester = tester();
        let state = tester
            .apply("random_id", None, json!({"byte_length": 4}))
            .await
            .unwrap();

        let plan = tester
            .plan_update("random_id", state.clone(), json!({"byte_length": 4}))
            .await
            .unwrap();
        assert_plan_no_changes(&plan);

        let plan = tester
            .plan_update("random_id", state, json!({"byte_length": 6}))
            .await
            .unwrap();
        assert_plan_replaces(&plan);
        assert_plan_changes_attribute(&plan, "byte_length");
    }

    #[tokio::test]
    async fn test_tester_plan_delete() {
        let tester = tester();
        let state = tester
            .apply("random_uuid", None, json!({}))
            .await
            .unwrap();
        let plan = tester.plan_delete("random_uuid", state).await.unwrap();
        assert!(plan.planned_state.is_null());
        assert_plan_changes_attribute(&plan, "result");
    }

    #[tokio::test]
    async fn test_apply_rejects_invalid_config() {
        let err = tester()
            .apply("random_string", None, json!({"length": 2, "min_upper": 3}))
            .await
            .unwrap_err();
        match err {
            TestError::Diagnostics(diagnostics) => {
                assert_error_contains(&diagnostics, "exceed length")
            },
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_validate_resource_config() {
        let tester = tester();
        tester
            .validate_resource_config("random_shuffle", json!({"input": ["a", "b"]}))
            .await
            .unwrap();
        let diagnostics = tester
            .provider()
            .validate_resource_config("random_shuffle", json!({"input": ["a"], "result_count": 1}))
            .await
            .unwrap();
        assert_no_errors(&diagnostics);
    }

    #[tokio::test]
    async fn test_upgrade_string_state() {
        let upgraded = tester()
            .upgrade_resource_state("random_password", 0, json!({"length": 4, "result": "abcd"}))
            .await
            .unwrap();
        assert_eq!(upgraded["number"], json!(true));

        let untouched = tester()
            .upgrade_resource_state("random_password", 1, json!({"length": 4}))
            .await
            .unwrap();
        assert!(untouched.get("number").is_none());
    }

    #[tokio::test]
    async fn test_import_then_plan_is_clean() {
        let tester = tester();
        let imported = tester.import("random_integer", "4,1,6").await.unwrap();
        assert_eq!(imported.len(), 1);
        assert_eq!(imported[0].resource_type, "random_integer");

        let plan = tester
            .plan_update(
                "random_integer",
                imported[0].state.clone(),
                json!({"min": 1, "max": 6}),
            )
            .await
            .unwrap();
        assert_plan_no_changes(&plan);
    }

    #[test]
    fn test_assert_no_errors() {
        assert_no_errors(&[Diagnostic::warning("Just a warning")]);
    }

    #[test]
    #[should_panic(expected = "Expected no errors")]
    fn test_assert_no_errors_fails() {
        assert_no_errors(&[Diagnostic::error("An error")]);
    }

    #[test]
    fn test_test_error_display() {
        let err = TestError::Diagnostics(vec![
            Diagnostic::error("First error").with_attribute("length"),
            Diagnostic::error("Second error").with_detail("More info"),
        ]);

        let display = format!("{}", err);
        assert!(display.contains("First error"));
        assert!(display.contains("Second error"));
        assert!(display.contains("length"));
        assert!(display.contains("More info"));
    }
}
