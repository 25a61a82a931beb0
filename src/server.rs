//! Server helpers for running the provider.
//!
//! This module provides the `ProviderService` trait the provider implements,
//! the adapter exposing it as the generated gRPC service, and the serve paths:
//!
//! - [`serve`]: host-launched plugin serve. Checks the magic cookie,
//!   negotiates the protocol version, prints the handshake line and runs until
//!   SIGINT/SIGTERM.
//! - [`serve_with_options`] with a [`ServeTestConfig`]: in-process serve for
//!   debuggers and tests. The reattach config is delivered over a channel
//!   instead of stdout and the server runs until its token is cancelled.
//!
//! # Shutdown
//!
//! Once the shutdown trigger fires the server stops accepting connections and
//! in-flight requests get `shutdown_timeout` to finish. The provider's
//! `stop()` runs afterwards.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tracing::{debug, error, info, instrument, warn};

use crate::config::PluginEnv;
use crate::error::{ProviderError, ServeError};
use crate::reattach::ReattachConfig;
use crate::schema::{has_errors, Diagnostic, DiagnosticSeverity, ProviderSchema};
use crate::types::{handshake_line, ImportedResource, PlanResult, ProviderMetadata};

/// Printed when the binary is run by hand instead of by the host.
const NOT_LAUNCHED_BY_HOST_MESSAGE: &str = "This binary is a plugin. These are not meant to be \
executed directly. Please execute the program that consumes these plugins, which will load any \
plugins automatically";

/// Trait the provider implements.
///
/// This is a higher-level API than the raw gRPC trait: values are
/// `serde_json::Value`, errors are [`ProviderError`] and warnings or
/// validation failures are [`Diagnostic`]s.
#[async_trait::async_trait]
pub trait ProviderService: Send + Sync + 'static {
    // =========================================================================
    // Schema & Metadata
    // =========================================================================

    /// Return the provider's schema including all resources and data sources.
    fn schema(&self) -> ProviderSchema;

    /// Return provider metadata. Derived from the schema by default.
    fn metadata(&self) -> ProviderMetadata {
        let schema = self.schema();
        let mut resources: Vec<String> = schema.resources.keys().cloned().collect();
        let mut data_sources: Vec<String> = schema.data_sources.keys().cloned().collect();
        resources.sort();
        data_sources.sort();
        ProviderMetadata {
            resources,
            data_sources,
            capabilities: Default::default(),
        }
    }

    // =========================================================================
    // Provider Lifecycle
    // =========================================================================

    /// Validate the provider configuration before configuring.
    async fn validate_provider_config(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        let _ = config;
        Ok(vec![])
    }

    /// Configure the provider.
    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError>;

    /// Stop the provider gracefully.
    async fn stop(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    // =========================================================================
    // Resource Operations
    // =========================================================================

    /// Validate a resource's configuration before planning.
    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let _ = (resource_type, config);
        Ok(vec![])
    }

    /// Upgrade resource state from an older schema version.
    async fn upgrade_resource_state(
        &self,
        resource_type: &str,
        version: i64,
        state: Value,
    ) -> Result<Value, ProviderError> {
        let _ = (resource_type, version);
        Ok(state)
    }

    /// Plan changes for a resource. `proposed_state` is `null` for a destroy.
    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
        config: Value,
    ) -> Result<PlanResult, ProviderError>;

    /// Create a new resource.
    async fn create(&self, resource_type: &str, planned_state: Value) -> Result<Value, ProviderError>;

    /// Read the current state of a resource.
    async fn read(&self, resource_type: &str, current_state: Value) -> Result<Value, ProviderError>;

    /// Update an existing resource in place.
    async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError>;

    /// Delete a resource.
    async fn delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError>;

    /// Import existing state by id.
    async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        let _ = id;
        Err(ProviderError::Unimplemented(format!(
            "Import not supported for resource type: {}",
            resource_type
        )))
    }

    // =========================================================================
    // Data Source Operations
    // =========================================================================

    /// Validate a data source's configuration.
    async fn validate_data_source_config(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let _ = (data_source_type, config);
        Ok(vec![])
    }

    /// Read a data source.
    async fn read_data_source(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError> {
        let _ = config;
        Err(ProviderError::UnknownResource(format!(
            "Unknown data source type: {}",
            data_source_type
        )))
    }
}

/// Wrapper that implements the generated gRPC trait.
struct ProviderGrpcService<P: ProviderService> {
    provider: Arc<P>,
}

fn decode_json(bytes: &[u8]) -> Result<Value, tonic::Status> {
    if bytes.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_slice(bytes).map_err(|e| ProviderError::from(e).into())
}

fn encode_json(value: &Value) -> Vec<u8> {
    serde_json::to_vec(value).unwrap_or_default()
}

fn diagnostics_to_proto(diagnostics: Vec<Diagnostic>) -> Vec<crate::generated::Diagnostic> {
    diagnostics
        .into_iter()
        .map(|d| crate::generated::Diagnostic {
            severity: match d.severity {
                DiagnosticSeverity::Error => crate::generated::diagnostic::Severity::Error as i32,
                DiagnosticSeverity::Warning => {
                    crate::generated::diagnostic::Severity::Warning as i32
                },
            },
            summary: d.summary,
            detail: d.detail.unwrap_or_default(),
            attribute: d.attribute.unwrap_or_default(),
        })
        .collect()
}

fn error_to_diagnostics(err: ProviderError) -> Vec<crate::generated::Diagnostic> {
    diagnostics_to_proto(vec![Diagnostic::error(err.to_string())])
}

impl From<crate::generated::Diagnostic> for Diagnostic {
    fn from(proto: crate::generated::Diagnostic) -> Self {
        let warning = proto.severity == crate::generated::diagnostic::Severity::Warning as i32;
        Self {
            severity: if warning {
                DiagnosticSeverity::Warning
            } else {
                DiagnosticSeverity::Error
            },
            summary: proto.summary,
            detail: (!proto.detail.is_empty()).then_some(proto.detail),
            attribute: (!proto.attribute.is_empty()).then_some(proto.attribute),
        }
    }
}

fn schema_to_proto(schema: &crate::schema::Schema) -> crate::generated::Schema {
    crate::generated::Schema {
        version: schema.version as i64,
        block: Some(crate::generated::Block {
            attributes: schema
                .attribute_names()
                .into_iter()
                .filter_map(|name| schema.attribute(name).map(|attr| (name, attr)))
                .map(|(name, attr)| crate::generated::Attribute {
                    name: name.to_string(),
                    r#type: serde_json::to_vec(&attr.attr_type).unwrap_or_default(),
                    required: attr.flags.required,
                    optional: attr.flags.optional,
                    computed: attr.flags.computed,
                    sensitive: attr.flags.sensitive,
                    description: attr.description.clone().unwrap_or_default(),
                    force_new: attr.force_new,
                    default_value: attr.default.as_ref().map(encode_json).unwrap_or_default(),
                })
                .collect(),
            description: schema.block.description.clone().unwrap_or_default(),
        }),
    }
}

fn log_validation_outcome(operation: &str, type_name: &str, diagnostics: &[Diagnostic]) {
    if has_errors(diagnostics) {
        warn!(
            type_name = %type_name,
            diagnostics = diagnostics.len(),
            "{} completed with errors",
            operation
        );
    } else {
        info!(type_name = %type_name, "{} completed successfully", operation);
    }
}

#[async_trait::async_trait]
impl<P: ProviderService> crate::generated::provider_server::Provider for ProviderGrpcService<P> {
    #[instrument(skip(self, _request), name = "grpc.get_metadata")]
    async fn get_metadata(
        &self,
        _request: tonic::Request<crate::generated::GetMetadataRequest>,
    ) -> Result<tonic::Response<crate::generated::GetMetadataResponse>, tonic::Status> {
        let metadata = self.provider.metadata();
        debug!(
            resources = metadata.resources.len(),
            data_sources = metadata.data_sources.len(),
            "GetMetadata completed"
        );
        Ok(tonic::Response::new(crate::generated::GetMetadataResponse {
            server_capabilities: Some(crate::generated::ServerCapabilities {
                plan_destroy: metadata.capabilities.plan_destroy,
            }),
            resources: metadata.resources,
            data_sources: metadata.data_sources,
            diagnostics: vec![],
        }))
    }

    #[instrument(skip(self, _request), name = "grpc.get_schema")]
    async fn get_schema(
        &self,
        _request: tonic::Request<crate::generated::GetSchemaRequest>,
    ) -> Result<tonic::Response<crate::generated::GetSchemaResponse>, tonic::Status> {
        let schema = self.provider.schema();
        debug!(
            resources = schema.resources.len(),
            data_sources = schema.data_sources.len(),
            "GetSchema completed"
        );
        Ok(tonic::Response::new(crate::generated::GetSchemaResponse {
            provider: Some(schema_to_proto(&schema.provider)),
            resources: schema
                .resources
                .iter()
                .map(|(k, v)| (k.clone(), schema_to_proto(v)))
                .collect(),
            data_sources: schema
                .data_sources
                .iter()
                .map(|(k, v)| (k.clone(), schema_to_proto(v)))
                .collect(),
            diagnostics: vec![],
        }))
    }

    #[instrument(skip(self, request), name = "grpc.validate_provider_config")]
    async fn validate_provider_config(
        &self,
        request: tonic::Request<crate::generated::ValidateProviderConfigRequest>,
    ) -> Result<tonic::Response<crate::generated::ValidateProviderConfigResponse>, tonic::Status>
    {
        let config = decode_json(&request.into_inner().config)?;

        let diagnostics = match self.provider.validate_provider_config(config).await {
            Ok(diagnostics) => {
                log_validation_outcome("ValidateProviderConfig", "provider", &diagnostics);
                diagnostics_to_proto(diagnostics)
            },
            Err(e) => {
                error!(error = %e, "ValidateProviderConfig failed");
                error_to_diagnostics(e)
            },
        };
        Ok(tonic::Response::new(
            crate::generated::ValidateProviderConfigResponse { diagnostics },
        ))
    }

    #[instrument(skip(self, request), name = "grpc.configure")]
    async fn configure(
        &self,
        request: tonic::Request<crate::generated::ConfigureRequest>,
    ) -> Result<tonic::Response<crate::generated::ConfigureResponse>, tonic::Status> {
        let config = decode_json(&request.into_inner().config)?;

        let diagnostics = match self.provider.configure(config).await {
            Ok(diagnostics) => {
                log_validation_outcome("Configure", "provider", &diagnostics);
                diagnostics_to_proto(diagnostics)
            },
            Err(e) => {
                error!(error = %e, "Configure failed");
                error_to_diagnostics(e)
            },
        };
        Ok(tonic::Response::new(crate::generated::ConfigureResponse {
            diagnostics,
        }))
    }

    #[instrument(skip(self, _request), name = "grpc.stop")]
    async fn stop(
        &self,
        _request: tonic::Request<crate::generated::StopRequest>,
    ) -> Result<tonic::Response<crate::generated::StopResponse>, tonic::Status> {
        info!("Stop called");
        let error = match self.provider.stop().await {
            Ok(()) => String::new(),
            Err(e) => {
                error!(error = %e, "Stop failed");
                e.to_string()
            },
        };
        Ok(tonic::Response::new(crate::generated::StopResponse { error }))
    }

    #[instrument(skip(self, request), name = "grpc.validate_resource_config")]
    async fn validate_resource_config(
        &self,
        request: tonic::Request<crate::generated::ValidateResourceConfigRequest>,
    ) -> Result<tonic::Response<crate::generated::ValidateResourceConfigResponse>, tonic::Status>
    {
        let req = request.into_inner();
        let config = decode_json(&req.config)?;

        let diagnostics = match self
            .provider
            .validate_resource_config(&req.resource_type, config)
            .await
        {
            Ok(diagnostics) => {
                log_validation_outcome("ValidateResourceConfig", &req.resource_type, &diagnostics);
                diagnostics_to_proto(diagnostics)
            },
            Err(e) => {
                error!(resource_type = %req.resource_type, error = %e, "ValidateResourceConfig failed");
                error_to_diagnostics(e)
            },
        };
        Ok(tonic::Response::new(
            crate::generated::ValidateResourceConfigResponse { diagnostics },
        ))
    }

    #[instrument(skip(self, request), name = "grpc.upgrade_resource_state")]
    async fn upgrade_resource_state(
        &self,
        request: tonic::Request<crate::generated::UpgradeResourceStateRequest>,
    ) -> Result<tonic::Response<crate::generated::UpgradeResourceStateResponse>, tonic::Status>
    {
        let req = request.into_inner();
        let state = decode_json(&req.raw_state)?;

        match self
            .provider
            .upgrade_resource_state(&req.resource_type, req.version, state)
            .await
        {
            Ok(upgraded) => {
                debug!(resource_type = %req.resource_type, from_version = req.version, "UpgradeResourceState completed");
                Ok(tonic::Response::new(
                    crate::generated::UpgradeResourceStateResponse {
                        upgraded_state: encode_json(&upgraded),
                        diagnostics: vec![],
                    },
                ))
            },
            Err(e) => {
                error!(resource_type = %req.resource_type, version = req.version, error = %e, "UpgradeResourceState failed");
                Ok(tonic::Response::new(
                    crate::generated::UpgradeResourceStateResponse {
                        upgraded_state: vec![],
                        diagnostics: error_to_diagnostics(e),
                    },
                ))
            },
        }
    }

    #[instrument(skip(self, request), name = "grpc.plan")]
    async fn plan(
        &self,
        request: tonic::Request<crate::generated::PlanRequest>,
    ) -> Result<tonic::Response<crate::generated::PlanResponse>, tonic::Status> {
        let req = request.into_inner();
        let prior_state = Some(decode_json(&req.prior_state)?).filter(|v| !v.is_null());
        let proposed_state = decode_json(&req.proposed_state)?;
        let config = decode_json(&req.config)?;
        debug!(resource_type = %req.resource_type, is_create = prior_state.is_none(), "Plan called");

        match self
            .provider
            .plan(&req.resource_type, prior_state, proposed_state, config)
            .await
        {
            Ok(result) => {
                info!(
                    resource_type = %req.resource_type,
                    changes = result.changes.len(),
                    requires_replace = result.requires_replace,
                    "Plan completed"
                );
                Ok(tonic::Response::new(crate::generated::PlanResponse {
                    planned_state: encode_json(&result.planned_state),
                    changes: result.changes.into_iter().map(Into::into).collect(),
                    requires_replace: result.requires_replace,
                    diagnostics: vec![],
                }))
            },
            Err(e) => {
                error!(resource_type = %req.resource_type, error = %e, "Plan failed");
                Ok(tonic::Response::new(crate::generated::PlanResponse {
                    planned_state: vec![],
                    changes: vec![],
                    requires_replace: false,
                    diagnostics: error_to_diagnostics(e),
                }))
            },
        }
    }

    #[instrument(skip(self, request), name = "grpc.create")]
    async fn create(
        &self,
        request: tonic::Request<crate::generated::CreateRequest>,
    ) -> Result<tonic::Response<crate::generated::CreateResponse>, tonic::Status> {
        let req = request.into_inner();
        let planned_state = decode_json(&req.planned_state)?;

        match self.provider.create(&req.resource_type, planned_state).await {
            Ok(state) => {
                info!(resource_type = %req.resource_type, "Create completed successfully");
                Ok(tonic::Response::new(crate::generated::CreateResponse {
                    state: encode_json(&state),
                    diagnostics: vec![],
                }))
            },
            Err(e) => {
                error!(resource_type = %req.resource_type, error = %e, "Create failed");
                Ok(tonic::Response::new(crate::generated::CreateResponse {
                    state: vec![],
                    diagnostics: error_to_diagnostics(e),
                }))
            },
        }
    }

    #[instrument(skip(self, request), name = "grpc.read")]
    async fn read(
        &self,
        request: tonic::Request<crate::generated::ReadRequest>,
    ) -> Result<tonic::Response<crate::generated::ReadResponse>, tonic::Status> {
        let req = request.into_inner();
        let current_state = decode_json(&req.current_state)?;

        match self.provider.read(&req.resource_type, current_state).await {
            Ok(state) => Ok(tonic::Response::new(crate::generated::ReadResponse {
                state: encode_json(&state),
                diagnostics: vec![],
            })),
            Err(e) => {
                error!(resource_type = %req.resource_type, error = %e, "Read failed");
                Ok(tonic::Response::new(crate::generated::ReadResponse {
                    state: vec![],
                    diagnostics: error_to_diagnostics(e),
                }))
            },
        }
    }

    #[instrument(skip(self, request), name = "grpc.update")]
    async fn update(
        &self,
        request: tonic::Request<crate::generated::UpdateRequest>,
    ) -> Result<tonic::Response<crate::generated::UpdateResponse>, tonic::Status> {
        let req = request.into_inner();
        let prior_state = decode_json(&req.prior_state)?;
        let planned_state = decode_json(&req.planned_state)?;

        match self
            .provider
            .update(&req.resource_type, prior_state, planned_state)
            .await
        {
            Ok(state) => {
                info!(resource_type = %req.resource_type, "Update completed successfully");
                Ok(tonic::Response::new(crate::generated::UpdateResponse {
                    state: encode_json(&state),
                    diagnostics: vec![],
                }))
            },
            Err(e) => {
                error!(resource_type = %req.resource_type, error = %e, "Update failed");
                Ok(tonic::Response::new(crate::generated::UpdateResponse {
                    state: vec![],
                    diagnostics: error_to_diagnostics(e),
                }))
            },
        }
    }

    #[instrument(skip(self, request), name = "grpc.delete")]
    async fn delete(
        &self,
        request: tonic::Request<crate::generated::DeleteRequest>,
    ) -> Result<tonic::Response<crate::generated::DeleteResponse>, tonic::Status> {
        let req = request.into_inner();
        let current_state = decode_json(&req.current_state)?;

        let diagnostics = match self.provider.delete(&req.resource_type, current_state).await {
            Ok(()) => {
                info!(resource_type = %req.resource_type, "Delete completed successfully");
                vec![]
            },
            Err(e) => {
                error!(resource_type = %req.resource_type, error = %e, "Delete failed");
                error_to_diagnostics(e)
            },
        };
        Ok(tonic::Response::new(crate::generated::DeleteResponse {
            diagnostics,
        }))
    }

    #[instrument(skip(self, request), name = "grpc.import_resource_state")]
    async fn import_resource_state(
        &self,
        request: tonic::Request<crate::generated::ImportResourceStateRequest>,
    ) -> Result<tonic::Response<crate::generated::ImportResourceStateResponse>, tonic::Status> {
        let req = request.into_inner();

        match self.provider.import_resource(&req.resource_type, &req.id).await {
            Ok(imported) => {
                info!(
                    resource_type = %req.resource_type,
                    imported_count = imported.len(),
                    "ImportResourceState completed"
                );
                Ok(tonic::Response::new(
                    crate::generated::ImportResourceStateResponse {
                        imported: imported
                            .into_iter()
                            .map(|r| crate::generated::ImportedResource {
                                resource_type: r.resource_type,
                                state: encode_json(&r.state),
                            })
                            .collect(),
                        diagnostics: vec![],
                    },
                ))
            },
            Err(e) => {
                error!(resource_type = %req.resource_type, error = %e, "ImportResourceState failed");
                Ok(tonic::Response::new(
                    crate::generated::ImportResourceStateResponse {
                        imported: vec![],
                        diagnostics: error_to_diagnostics(e),
                    },
                ))
            },
        }
    }

    #[instrument(skip(self, request), name = "grpc.validate_data_source_config")]
    async fn validate_data_source_config(
        &self,
        request: tonic::Request<crate::generated::ValidateDataSourceConfigRequest>,
    ) -> Result<tonic::Response<crate::generated::ValidateDataSourceConfigResponse>, tonic::Status>
    {
        let req = request.into_inner();
        let config = decode_json(&req.config)?;

        let diagnostics = match self
            .provider
            .validate_data_source_config(&req.data_source_type, config)
            .await
        {
            Ok(diagnostics) => {
                log_validation_outcome("ValidateDataSourceConfig", &req.data_source_type, &diagnostics);
                diagnostics_to_proto(diagnostics)
            },
            Err(e) => {
                error!(data_source_type = %req.data_source_type, error = %e, "ValidateDataSourceConfig failed");
                error_to_diagnostics(e)
            },
        };
        Ok(tonic::Response::new(
            crate::generated::ValidateDataSourceConfigResponse { diagnostics },
        ))
    }

    #[instrument(skip(self, request), name = "grpc.read_data_source")]
    async fn read_data_source(
        &self,
        request: tonic::Request<crate::generated::ReadDataSourceRequest>,
    ) -> Result<tonic::Response<crate::generated::ReadDataSourceResponse>, tonic::Status> {
        let req = request.into_inner();
        let config = decode_json(&req.config)?;

        match self
            .provider
            .read_data_source(&req.data_source_type, config)
            .await
        {
            Ok(state) => Ok(tonic::Response::new(
                crate::generated::ReadDataSourceResponse {
                    state: encode_json(&state),
                    diagnostics: vec![],
                },
            )),
            Err(e) => {
                error!(data_source_type = %req.data_source_type, error = %e, "ReadDataSource failed");
                Ok(tonic::Response::new(
                    crate::generated::ReadDataSourceResponse {
                        state: vec![],
                        diagnostics: error_to_diagnostics(e),
                    },
                ))
            },
        }
    }
}

/// In-process serve hooks used by debug serve and the test harness.
///
/// With a test config the server skips the magic cookie check and the stdout
/// handshake. It sends its [`ReattachConfig`] on `reattach_tx`, runs until
/// `cancel` fires, and signals `close_tx` once fully stopped.
#[derive(Debug)]
pub struct ServeTestConfig {
    /// Stops the server when cancelled.
    pub cancel: CancellationToken,
    /// Receives the reattach config once the listener is bound.
    pub reattach_tx: oneshot::Sender<ReattachConfig>,
    /// Completed once the server and the provider have stopped.
    pub close_tx: oneshot::Sender<()>,
}

/// Receiving ends paired with a [`ServeTestConfig`].
#[derive(Debug)]
pub struct TestServeChannels {
    /// Yields the reattach config, or an error if the server failed first.
    pub reattach: oneshot::Receiver<ReattachConfig>,
    /// Resolves when the server is closed.
    pub closed: oneshot::Receiver<()>,
}

impl ServeTestConfig {
    /// Create a test config stopped by `cancel`, with its receiving ends.
    pub fn new(cancel: CancellationToken) -> (Self, TestServeChannels) {
        let (reattach_tx, reattach) = oneshot::channel();
        let (close_tx, closed) = oneshot::channel();
        (
            Self {
                cancel,
                reattach_tx,
                close_tx,
            },
            TestServeChannels { reattach, closed },
        )
    }
}

/// Wait for a server to publish its reattach config.
///
/// A closed channel means the server failed before binding. `timeout` of
/// `None` waits indefinitely.
pub async fn recv_reattach_config(
    reattach: oneshot::Receiver<ReattachConfig>,
    timeout: Option<Duration>,
) -> Result<ReattachConfig, ServeError> {
    let received = match timeout {
        Some(limit) => tokio::time::timeout(limit, reattach)
            .await
            .map_err(|_| {
                warn!(timeout = ?limit, "Server did not publish its reattach config");
                ServeError::ReattachTimeout(limit)
            })?,
        None => reattach.await,
    };
    received.map_err(|_| ServeError::NilReattachConfig)
}

/// Options for configuring the provider server.
#[derive(Debug)]
pub struct ServeOptions {
    /// How long in-flight requests may run once shutdown starts.
    /// Default: 30 seconds.
    pub shutdown_timeout: Duration,
    /// Fixed app protocol version, bypassing negotiation with the host.
    pub protocol_version: Option<u32>,
    /// In-process serve hooks. `None` means host-launched plugin serve.
    pub test_config: Option<ServeTestConfig>,
}

impl Default for ServeOptions {
    fn default() -> Self {
        Self {
            shutdown_timeout: Duration::from_secs(30),
            protocol_version: None,
            test_config: None,
        }
    }
}

impl ServeOptions {
    /// Create new serve options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Serve a fixed protocol version.
    pub fn with_protocol_version(mut self, version: u32) -> Self {
        self.protocol_version = Some(version);
        self
    }

    /// Serve in-process with the given test config.
    pub fn with_test_config(mut self, test_config: ServeTestConfig) -> Self {
        self.test_config = Some(test_config);
        self
    }
}

/// Wait for SIGTERM or SIGINT (CTRL+C on Windows).
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM, initiating graceful shutdown"),
                    _ = sigint.recv() => info!("Received SIGINT, initiating graceful shutdown"),
                }
            },
            (Err(e), _) | (_, Err(e)) => {
                error!(error = %e, "Failed to install signal handlers");
                std::future::pending::<()>().await;
            },
        }
    }

    #[cfg(not(unix))]
    {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received CTRL+C, initiating graceful shutdown"),
            Err(e) => {
                error!(error = %e, "Failed to install CTRL+C handler");
                std::future::pending::<()>().await;
            },
        }
    }
}

/// Serve the provider as a host-launched plugin.
///
/// Reads the plugin environment, prints the handshake line
/// (`1|<version>|tcp|<address>|grpc`) and serves until SIGINT/SIGTERM.
pub async fn serve<P: ProviderService>(provider: P) -> Result<(), ServeError> {
    serve_with_options(provider, ServeOptions::default()).await
}

/// Serve the provider with custom options, reading the process environment.
pub async fn serve_with_options<P: ProviderService>(
    provider: P,
    options: ServeOptions,
) -> Result<(), ServeError> {
    serve_with_env(provider, options, &PluginEnv::from_env()).await
}

/// Serve the provider with custom options and an explicit plugin environment.
pub async fn serve_with_env<P: ProviderService>(
    provider: P,
    options: ServeOptions,
    env: &PluginEnv,
) -> Result<(), ServeError> {
    if options.test_config.is_none() && !env.launched_by_host() {
        eprintln!("{}", NOT_LAUNCHED_BY_HOST_MESSAGE);
        return Err(ServeError::NotLaunchedByHost);
    }

    let protocol_version = options
        .protocol_version
        .unwrap_or_else(|| env.negotiate_protocol_version());
    let listener = bind_listener(env.port_range).await?;
    let addr = listener.local_addr()?;

    match options.test_config {
        None => {
            println!("{}", handshake_line(protocol_version, &addr));
            info!(address = %addr, protocol_version, "Provider server starting");
            serve_on_listener(
                provider,
                listener,
                options.shutdown_timeout,
                wait_for_shutdown_signal(),
            )
            .await
        },
        Some(ServeTestConfig {
            cancel,
            reattach_tx,
            close_tx,
        }) => {
            info!(address = %addr, protocol_version, "Provider server starting in-process");
            if reattach_tx
                .send(ReattachConfig::new(addr, protocol_version, true))
                .is_err()
            {
                debug!("Reattach config receiver dropped before the server started");
            }
            let result = serve_on_listener(
                provider,
                listener,
                options.shutdown_timeout,
                async move { cancel.cancelled().await },
            )
            .await;
            let _ = close_tx.send(());
            result
        },
    }
}

/// Bind on loopback, inside `port_range` when the host set one.
async fn bind_listener(port_range: Option<(u16, u16)>) -> Result<TcpListener, ServeError> {
    let Some((min, max)) = port_range else {
        return Ok(TcpListener::bind("127.0.0.1:0").await?);
    };

    for port in min..=max {
        match TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], port))).await {
            Ok(listener) => return Ok(listener),
            Err(e) => debug!(port, error = %e, "Port unavailable"),
        }
    }
    Err(ServeError::NoFreePort { min, max })
}

/// Serve on an already-bound listener until `shutdown` resolves.
async fn serve_on_listener<P, F>(
    provider: P,
    listener: TcpListener,
    shutdown_timeout: Duration,
    shutdown: F,
) -> Result<(), ServeError>
where
    P: ProviderService,
    F: Future<Output = ()> + Send + 'static,
{
    let provider = Arc::new(provider);
    let provider_for_shutdown = Arc::clone(&provider);

    let grpc_service = ProviderGrpcService { provider };
    let server = crate::generated::provider_server::ProviderServer::new(grpc_service);

    // Fires when the shutdown trigger does, starting the drain deadline.
    let draining = CancellationToken::new();
    let trigger = draining.clone();

    let server_future = Server::builder()
        .add_service(server)
        .serve_with_incoming_shutdown(
            tokio_stream::wrappers::TcpListenerStream::new(listener),
            async move {
                shutdown.await;
                trigger.cancel();
            },
        );
    tokio::pin!(server_future);

    let drain_deadline = async {
        draining.cancelled().await;
        tokio::time::sleep(shutdown_timeout).await;
    };

    tokio::select! {
        result = &mut server_future => match result {
            Ok(()) => info!("Server shutdown complete"),
            Err(e) => {
                error!(error = %e, "Server error");
                return Err(e.into());
            },
        },
        _ = drain_deadline => {
            warn!(timeout = ?shutdown_timeout, "Shutdown timeout exceeded, forcing shutdown");
        },
    }

    debug!("Calling provider stop()");
    if let Err(e) = provider_for_shutdown.stop().await {
        warn!(error = %e, "Provider stop() returned error");
    }

    info!("Provider shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generated::provider_client::ProviderClient;
    use crate::random::RandomProvider;
    use serde_json::json;

    async fn start(
        provider: RandomProvider,
    ) -> (
        ReattachConfig,
        CancellationToken,
        oneshot::Receiver<()>,
        tokio::task::JoinHandle<Result<(), ServeError>>,
    ) {
        let cancel = CancellationToken::new();
        let (test_config, channels) = ServeTestConfig::new(cancel.clone());
        let options = ServeOptions::new()
            .with_protocol_version(5)
            .with_shutdown_timeout(Duration::from_secs(5))
            .with_test_config(test_config);
        let handle = tokio::spawn(async move {
            serve_with_env(provider, options, &PluginEnv::default()).await
        });
        let config = recv_reattach_config(channels.reattach, Some(Duration::from_secs(2)))
            .await
            .unwrap();
        (config, cancel, channels.closed, handle)
    }

    #[tokio::test]
    async fn test_plugin_serve_requires_magic_cookie() {
        let result = serve_with_env(
            RandomProvider::new(),
            ServeOptions::default(),
            &PluginEnv::default(),
        )
        .await;
        assert!(matches!(result, Err(ServeError::NotLaunchedByHost)));
    }

    #[tokio::test]
    async fn test_recv_reattach_config_closed_channel() {
        let (tx, rx) = oneshot::channel::<ReattachConfig>();
        drop(tx);
        let result = recv_reattach_config(rx, Some(Duration::from_millis(100))).await;
        assert!(matches!(result, Err(ServeError::NilReattachConfig)));
    }

    #[tokio::test]
    async fn test_recv_reattach_config_timeout() {
        let (_tx, rx) = oneshot::channel::<ReattachConfig>();
        let result = recv_reattach_config(rx, Some(Duration::from_millis(20))).await;
        assert!(matches!(result, Err(ServeError::ReattachTimeout(_))));
        assert_eq!(
            result.unwrap_err().to_string(),
            "timeout waiting on reattach config"
        );
    }

    #[tokio::test]
    async fn test_in_process_serve_publishes_reattach_config() {
        let (config, cancel, closed, handle) = start(RandomProvider::new()).await;

        assert!(config.test);
        assert_eq!(config.protocol, "grpc");
        assert_eq!(config.protocol_version, 5);
        assert_eq!(config.pid, std::process::id());
        assert!(config.socket_addr().unwrap().ip().is_loopback());

        cancel.cancel();
        tokio_test::assert_ok!(closed.await);
        tokio_test::assert_ok!(handle.await.unwrap());
    }

    #[tokio::test]
    async fn test_grpc_round_trip() {
        let (config, cancel, closed, _handle) = start(RandomProvider::new()).await;
        let mut client = ProviderClient::connect(config.endpoint_uri()).await.unwrap();

        let metadata = client
            .get_metadata(crate::generated::GetMetadataRequest {})
            .await
            .unwrap()
            .into_inner();
        assert!(metadata.resources.contains(&"random_string".to_string()));
        assert!(metadata.data_sources.is_empty());

        let schema = client
            .get_schema(crate::generated::GetSchemaRequest {})
            .await
            .unwrap()
            .into_inner();
        let string_schema = &schema.resources["random_string"];
        assert_eq!(string_schema.version, 1);
        let block = string_schema.block.as_ref().unwrap();
        let result = block.attributes.iter().find(|a| a.name == "result").unwrap();
        assert!(result.computed);
        let upper = block.attributes.iter().find(|a| a.name == "upper").unwrap();
        assert_eq!(upper.default_value, b"true");

        let created = client
            .create(crate::generated::CreateRequest {
                resource_type: "random_integer".to_string(),
                planned_state: serde_json::to_vec(&json!({"min": 3, "max": 3})).unwrap(),
            })
            .await
            .unwrap()
            .into_inner();
        assert!(created.diagnostics.is_empty());
        let state: Value = serde_json::from_slice(&created.state).unwrap();
        assert_eq!(state["result"], json!(3));
        assert_eq!(state["id"], json!("3"));

        cancel.cancel();
        closed.await.unwrap();
    }

    #[tokio::test]
    async fn test_grpc_errors_become_diagnostics() {
        let (config, cancel, closed, _handle) = start(RandomProvider::new()).await;
        let mut client = ProviderClient::connect(config.endpoint_uri()).await.unwrap();

        let response = client
            .validate_resource_config(crate::generated::ValidateResourceConfigRequest {
                resource_type: "random_integer".to_string(),
                config: serde_json::to_vec(&json!({"min": 10, "max": 1})).unwrap(),
            })
            .await
            .unwrap()
            .into_inner();
        let diagnostics: Vec<Diagnostic> =
            response.diagnostics.into_iter().map(Into::into).collect();
        assert!(has_errors(&diagnostics));
        assert_eq!(diagnostics[0].attribute, Some("min".to_string()));

        let response = client
            .create(crate::generated::CreateRequest {
                resource_type: "random_pet".to_string(),
                planned_state: b"{}".to_vec(),
            })
            .await
            .unwrap()
            .into_inner();
        assert!(response.state.is_empty());
        assert!(response.diagnostics[0].summary.contains("random_pet"));

        cancel.cancel();
        closed.await.unwrap();
    }

    #[tokio::test]
    async fn test_grpc_rejects_malformed_json() {
        let (config, cancel, closed, _handle) = start(RandomProvider::new()).await;
        let mut client = ProviderClient::connect(config.endpoint_uri()).await.unwrap();

        let status = client
            .read(crate::generated::ReadRequest {
                resource_type: "random_uuid".to_string(),
                current_state: b"{not json".to_vec(),
            })
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);

        cancel.cancel();
        closed.await.unwrap();
    }

    #[test]
    fn test_diagnostics_to_proto_and_back() {
        let diagnostics = vec![
            Diagnostic::error("bad").with_attribute("length"),
            Diagnostic::warning("meh").with_detail("details"),
        ];
        let proto = diagnostics_to_proto(diagnostics.clone());
        assert_eq!(
            proto[0].severity,
            crate::generated::diagnostic::Severity::Error as i32
        );
        let back: Vec<Diagnostic> = proto.into_iter().map(Into::into).collect();
        assert_eq!(back, diagnostics);
    }

    #[test]
    fn test_decode_json_empty_is_null() {
        assert_eq!(decode_json(b"").unwrap(), Value::Null);
        assert_eq!(decode_json(b"{\"a\":1}").unwrap(), json!({"a": 1}));
        assert!(decode_json(b"nope").is_err());
    }
}
