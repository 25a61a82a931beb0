//! Random provider plugin
//!
//! A provider plugin that generates random values (strings, passwords,
//! integers, ids, UUIDs and shuffles) and keeps them stable in state until a
//! force-new attribute changes.
//!
//! # Overview
//!
//! - **Provider logic** ([`random`]): resource schemas, planning and generation
//! - **ProviderService trait** ([`server`]): the high-level trait the gRPC
//!   service adapts
//! - **Serve paths**: host-launched plugin serve ([`serve`]), debug serve
//!   ([`debug`]) and the in-process test harness ([`testing::harness`])
//! - **Reattach formats** ([`reattach`]): `TF_REATTACH_PROVIDERS` JSON and the
//!   `TF_PROVIDER_REATTACH` pipe form
//! - **Logging**: `tracing` to stderr, filtered by `RUST_LOG` or `TF_LOG`
//!
//! # Handshake Protocol
//!
//! When launched by the host, the provider prints a single line to stdout:
//!
//! ```text
//! 1|5|tcp|127.0.0.1:50051|grpc
//! ```
//!
//! Format: `CORE-VERSION|APP-VERSION|NETWORK|ADDRESS|PROTOCOL`
//!
//! The host connects to the address over gRPC. Everything else the provider
//! writes goes to stderr.
//!
//! # Debug Serve
//!
//! ```ignore
//! use terraform_provider_random::{debug, random};
//!
//! #[tokio::main]
//! async fn main() {
//!     debug::run_debuggable(random::provider(), random::PROVIDER_ADDRESS)
//!         .await
//!         .ok();
//! }
//! ```
//!
//! The provider prints a `TF_REATTACH_PROVIDERS` value to export in the shell
//! running the host.
//!
//! # Provider Protocol
//!
//! - **GetMetadata**: Returns provider capabilities and resource/data source names
//! - **GetSchema**: Returns full schema for provider config, resources, and data sources
//! - **ValidateProviderConfig**: Validates provider configuration
//! - **Configure**: Configures the provider
//! - **Stop**: Gracefully shuts down the provider
//! - **ValidateResourceConfig**: Validates resource configuration
//! - **UpgradeResourceState**: Migrates state from older schema versions
//! - **Plan**: Calculates required changes
//! - **Create/Read/Update/Delete**: CRUD operations for resources
//! - **ImportResourceState**: Imports existing values
//! - **ValidateDataSourceConfig**: Validates data source configuration
//! - **ReadDataSource**: Reads data sources (none are defined)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod debug;
pub mod error;
pub mod logging;
pub mod random;
pub mod reattach;
pub mod schema;
pub mod server;
pub mod testing;
pub mod types;
pub mod validation;

#[allow(missing_docs)]
#[allow(clippy::all)]
pub mod generated;

// Re-export main types at crate root
pub use config::PluginEnv;
pub use debug::{debug_serve, run_debuggable, DebugServer};
pub use error::{ProviderError, ServeError};
pub use logging::{init_logging, init_logging_with_default, try_init_logging};
pub use reattach::{ProviderReattach, ReattachConfig};
pub use schema::ProviderSchema;
pub use server::{serve, serve_with_options, ProviderService, ServeOptions, ServeTestConfig};
pub use types::{
    AttributeChange, ImportedResource, PlanResult, ProviderMetadata, ServerCapabilities,
    PROTOCOL_VERSION,
};
pub use validation::validate;

// Re-export async_trait for convenience
pub use async_trait::async_trait;
