//! Debug serve: run the provider under a debugger instead of under the host.
//!
//! The provider is started by hand, prints a `TF_REATTACH_PROVIDERS` value
//! and keeps running until interrupted. The host then attaches to it instead
//! of spawning its own copy.

use std::future::Future;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::PluginEnv;
use crate::error::ServeError;
use crate::reattach::{reattach_providers_json, ReattachConfig, REATTACH_PROVIDERS_ENV};
use crate::server::{recv_reattach_config, serve_with_env, ProviderService, ServeOptions, ServeTestConfig};

/// Handle to a debug-served provider.
#[derive(Debug)]
pub struct DebugServer {
    closed: oneshot::Receiver<()>,
    handle: tokio::task::JoinHandle<Result<(), ServeError>>,
}

impl DebugServer {
    /// Wait until the server has shut down.
    pub async fn wait(self) -> Result<(), ServeError> {
        let _ = self.closed.await;
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(ServeError::Io(std::io::Error::other(e))),
        }
    }
}

/// Serve `provider` in-process until `cancel` fires.
///
/// Returns once the server is listening, with the config the host needs to
/// attach to it.
pub async fn debug_serve<P: ProviderService>(
    provider: P,
    cancel: CancellationToken,
) -> Result<(ReattachConfig, DebugServer), ServeError> {
    let (test_config, channels) = ServeTestConfig::new(cancel);
    let options = ServeOptions::new().with_test_config(test_config);
    let env = PluginEnv::from_env();
    let handle = tokio::spawn(async move { serve_with_env(provider, options, &env).await });

    let config = match recv_reattach_config(channels.reattach, None).await {
        Ok(config) => config,
        Err(e) => {
            // Prefer the server's own failure over the closed channel.
            return match handle.await {
                Ok(Err(serve_err)) => Err(serve_err),
                _ => Err(e),
            };
        },
    };

    Ok((
        config,
        DebugServer {
            closed: channels.closed,
            handle,
        },
    ))
}

/// Run the provider in debug mode, printing reattach instructions to stdout.
pub async fn run_debuggable<P: ProviderService>(
    provider: P,
    provider_address: &str,
) -> Result<(), ServeError> {
    let cancel = CancellationToken::new();

    let (config, server) = match debug_serve(provider, cancel.clone()).await {
        Ok(started) => started,
        Err(e) => {
            println!("Error launching debug server: {}", e);
            return Err(e);
        },
    };

    tokio::spawn(cancel_on_interrupt(tokio::signal::ctrl_c(), cancel.clone()));

    let reattach = match reattach_providers_json(provider_address, &config) {
        Ok(reattach) => reattach,
        Err(e) => {
            println!("Error building reattach string: {}", e);
            cancel.cancel();
            let _ = server.wait().await;
            return Err(e.into());
        },
    };

    println!(
        "Provider server started; to attach Terraform, set {} to the following:\n{}",
        REATTACH_PROVIDERS_ENV, reattach
    );

    server.wait().await
}

/// Cancel `cancel` once `interrupt` fires, or return when it is cancelled
/// elsewhere. A failed signal handler leaves the server running.
async fn cancel_on_interrupt<F>(interrupt: F, cancel: CancellationToken)
where
    F: Future<Output = std::io::Result<()>>,
{
    let interrupted = async {
        match interrupt.await {
            Ok(()) => info!("Received interrupt, stopping debug server"),
            Err(e) => {
                error!(error = %e, "Failed to install interrupt handler");
                std::future::pending::<()>().await;
            },
        }
    };

    tokio::select! {
        _ = interrupted => cancel.cancel(),
        _ = cancel.cancelled() => debug!("Debug server cancelled"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generated::provider_client::ProviderClient;
    use crate::generated::GetMetadataRequest;
    use crate::random;
    use crate::reattach::parse_reattach_providers;
    use std::time::Duration;

    #[tokio::test]
    async fn test_debug_serve_lifecycle() {
        let cancel = CancellationToken::new();
        let (config, server) = debug_serve(random::provider(), cancel.clone())
            .await
            .unwrap();

        assert!(config.test);
        assert_eq!(config.protocol_version, 5);

        let mut client = ProviderClient::connect(config.endpoint_uri()).await.unwrap();
        let metadata = client
            .get_metadata(GetMetadataRequest {})
            .await
            .unwrap()
            .into_inner();
        assert_eq!(metadata.resources.len(), 6);

        cancel.cancel();
        tokio_test::assert_ok!(server.wait().await);
    }

    #[tokio::test]
    async fn test_interrupt_cancels_server() {
        let cancel = CancellationToken::new();
        cancel_on_interrupt(async { Ok(()) }, cancel.clone()).await;
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_failed_interrupt_handler_keeps_serving() {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(cancel_on_interrupt(
            async { Err(std::io::Error::other("no signal handler")) },
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!cancel.is_cancelled());
        assert!(!task.is_finished());

        cancel.cancel();
        tokio_test::assert_ok!(task.await);
    }

    #[tokio::test]
    async fn test_reattach_json_for_debug_config() {
        let cancel = CancellationToken::new();
        let (config, server) = debug_serve(random::provider(), cancel.clone())
            .await
            .unwrap();

        let json = reattach_providers_json(random::PROVIDER_ADDRESS, &config).unwrap();
        let parsed = parse_reattach_providers(&json).unwrap();
        assert_eq!(parsed[random::PROVIDER_ADDRESS], config);

        cancel.cancel();
        server.wait().await.unwrap();
    }
}
