//! In-process provider harness for acceptance tests.
//!
//! [`run_provider_command`] starts the provider inside the test process,
//! points a [`WorkingDir`] at it through `TF_PROVIDER_REATTACH`, runs the
//! caller's host command and tears the server down again. This lets a
//! debugger or coverage tool see provider code driven by a real host.
//!
//! With `TF_TEST_PROVIDERS_OOP` set the provider is not started and the
//! command runs against whatever provider binary the host finds.

use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::ffi::OsStr;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::PluginEnv;
use crate::error::ServeError;
use crate::reattach::{ProviderReattach, PROVIDER_REATTACH_ENV};
use crate::server::{recv_reattach_config, serve_with_env, ProviderService, ServeOptions, ServeTestConfig};
use crate::types::PROTOCOL_VERSION;

/// How long to wait for the in-process server to publish its address.
pub const REATTACH_TIMEOUT: Duration = Duration::from_secs(2);

/// Prefix stripped from plugin binary names to get the provider name.
const PLUGIN_NAME_PREFIX: &str = "terraform-provider-";

/// Registry namespace the harness assumes for providers under test.
const PROVIDER_NAMESPACE: &str = "hashicorp";

/// Errors from running a command against an in-process provider.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// The provider could not be served.
    #[error(transparent)]
    Serve(#[from] ServeError),

    /// The command itself failed.
    #[error("{0}")]
    Command(Box<dyn StdError + Send + Sync>),
}

/// A host working directory plus the environment to run host commands with.
///
/// The environment is an overlay on the process environment, so concurrent
/// tests never race on `std::env`.
#[derive(Debug, Clone)]
pub struct WorkingDir {
    dir: PathBuf,
    plugin_name: String,
    env: BTreeMap<String, String>,
}

impl WorkingDir {
    /// A working directory for the plugin binary named `plugin_name`.
    pub fn new(dir: impl Into<PathBuf>, plugin_name: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            plugin_name: plugin_name.into(),
            env: BTreeMap::new(),
        }
    }

    /// The directory host commands run in.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Name of the plugin binary, e.g. `terraform-provider-random`.
    pub fn plugin_name(&self) -> &str {
        &self.plugin_name
    }

    /// Set an environment variable for host commands.
    pub fn setenv(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.env.insert(key.into(), value.into());
    }

    /// Remove an environment variable previously set with [`setenv`](Self::setenv).
    pub fn unsetenv(&mut self, key: &str) {
        self.env.remove(key);
    }

    /// Look up an overlay variable.
    pub fn getenv(&self, key: &str) -> Option<&str> {
        self.env.get(key).map(String::as_str)
    }

    /// All overlay variables.
    pub fn env(&self) -> impl Iterator<Item = (&str, &str)> {
        self.env.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// A command running `program` in this directory with the overlay applied.
    pub fn command(&self, program: impl AsRef<OsStr>) -> tokio::process::Command {
        let mut command = tokio::process::Command::new(program);
        command.current_dir(&self.dir).envs(&self.env);
        command
    }
}

/// Provider name for a plugin binary name.
pub fn provider_name(plugin_name: &str) -> &str {
    plugin_name
        .strip_prefix(PLUGIN_NAME_PREFIX)
        .unwrap_or(plugin_name)
}

/// Serve `provider` in-process and run `f` against it.
///
/// Reads `TF_TEST_PROVIDERS_OOP` from the process environment; see
/// [`run_provider_command_with_env`].
pub async fn run_provider_command<P, F, Fut, E>(
    wd: &mut WorkingDir,
    provider: P,
    f: F,
) -> Result<(), HarnessError>
where
    P: ProviderService,
    F: FnOnce(WorkingDir) -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: Into<Box<dyn StdError + Send + Sync>>,
{
    run_provider_command_with_env(&PluginEnv::from_env(), wd, provider, f).await
}

/// Serve `provider` in-process and run `f` against it.
///
/// `f` receives a copy of `wd` with `TF_PROVIDER_REATTACH` set. The variable is
/// removed from `wd` again once the server has stopped. An error from `f` is
/// logged and returned after teardown.
pub async fn run_provider_command_with_env<P, F, Fut, E>(
    env: &PluginEnv,
    wd: &mut WorkingDir,
    provider: P,
    f: F,
) -> Result<(), HarnessError>
where
    P: ProviderService,
    F: FnOnce(WorkingDir) -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: Into<Box<dyn StdError + Send + Sync>>,
{
    if env.test_providers_oop {
        debug!("Running against an out-of-process provider");
        return f(wd.clone())
            .await
            .map_err(|e| HarnessError::Command(e.into()));
    }

    let provider_name = provider_name(wd.plugin_name()).to_string();

    let cancel = CancellationToken::new();
    let (test_config, channels) = ServeTestConfig::new(cancel.clone());
    let options = ServeOptions::new()
        .with_protocol_version(PROTOCOL_VERSION)
        .with_test_config(test_config);
    let server_env = env.clone();
    let server =
        tokio::spawn(async move { serve_with_env(provider, options, &server_env).await });

    let config = match recv_reattach_config(channels.reattach, Some(REATTACH_TIMEOUT)).await {
        Ok(config) => config,
        Err(e) => {
            cancel.cancel();
            if let Ok(Err(serve_err)) = server.await {
                warn!(error = %serve_err, "Provider server failed to start");
            }
            return Err(e.into());
        },
    };

    let reattach = ProviderReattach::new(
        format!("{}/{}", PROVIDER_NAMESPACE, provider_name),
        config,
    );
    debug!(reattach = %reattach, "Provider serving in-process");
    wd.setenv(PROVIDER_REATTACH_ENV, reattach.to_string());

    let result = f(wd.clone())
        .await
        .map_err(|e| HarnessError::Command(e.into()));
    if let Err(e) = &result {
        warn!(error = %e, "Got error running Terraform");
    }

    cancel.cancel();
    let _ = channels.closed.await;
    wd.unsetenv(PROVIDER_REATTACH_ENV);

    match server.await {
        Ok(Err(e)) => warn!(error = %e, "Provider server exited with error"),
        Err(e) => warn!(error = %e, "Provider server task failed"),
        Ok(Ok(())) => {},
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generated::provider_client::ProviderClient;
    use crate::generated::GetSchemaRequest;
    use crate::random::{self, PROVIDER_ADDRESS};

    fn working_dir() -> (tempfile::TempDir, WorkingDir) {
        let tmp = tempfile::tempdir().unwrap();
        let wd = WorkingDir::new(tmp.path(), "terraform-provider-random");
        (tmp, wd)
    }

    #[test]
    fn test_provider_name() {
        assert_eq!(provider_name("terraform-provider-random"), "random");
        assert_eq!(provider_name("random"), "random");
    }

    #[test]
    fn test_working_dir_env() {
        let (_tmp, mut wd) = working_dir();
        wd.setenv("TF_LOG", "DEBUG");
        assert_eq!(wd.getenv("TF_LOG"), Some("DEBUG"));
        assert_eq!(wd.env().collect::<Vec<_>>(), vec![("TF_LOG", "DEBUG")]);
        wd.unsetenv("TF_LOG");
        assert_eq!(wd.getenv("TF_LOG"), None);
    }

    #[tokio::test]
    async fn test_command_runs_in_working_dir() {
        let (tmp, mut wd) = working_dir();
        wd.setenv("HARNESS_CHECK", "on");
        let output = wd
            .command("sh")
            .args(["-c", "pwd; echo $HARNESS_CHECK"])
            .output()
            .await
            .unwrap();
        let stdout = String::from_utf8(output.stdout).unwrap();
        let expected = tmp.path().canonicalize().unwrap();
        let mut lines = stdout.lines();
        assert_eq!(
            Path::new(lines.next().unwrap()).canonicalize().unwrap(),
            expected
        );
        assert_eq!(lines.next(), Some("on"));
    }

    #[tokio::test]
    async fn test_reattach_points_at_live_server() {
        let (_tmp, mut wd) = working_dir();

        run_provider_command_with_env(&PluginEnv::default(), &mut wd, random::provider(), |wd| async move {
            let raw = wd
                .getenv(PROVIDER_REATTACH_ENV)
                .ok_or("TF_PROVIDER_REATTACH not set")?;
            let reattach: ProviderReattach = raw.parse()?;
            assert_eq!(reattach.provider_address, PROVIDER_ADDRESS);
            assert!(raw.ends_with("|test"));
            assert_eq!(reattach.config.protocol_version, 5);
            assert_eq!(reattach.config.pid, std::process::id());

            let mut client = ProviderClient::connect(reattach.config.endpoint_uri()).await?;
            let schema = client.get_schema(GetSchemaRequest {}).await?.into_inner();
            assert!(schema.resources.contains_key("random_uuid"));
            Ok::<(), Box<dyn StdError + Send + Sync>>(())
        })
        .await
        .unwrap();

        assert_eq!(wd.getenv(PROVIDER_REATTACH_ENV), None);
    }

    #[tokio::test]
    async fn test_command_error_is_returned_after_teardown() {
        let (_tmp, mut wd) = working_dir();

        let err = run_provider_command_with_env(&PluginEnv::default(), &mut wd, random::provider(), |_| async {
            Err::<(), _>("apply failed")
        })
        .await
        .unwrap_err();

        assert!(matches!(err, HarnessError::Command(_)));
        assert_eq!(err.to_string(), "apply failed");
        assert_eq!(wd.getenv(PROVIDER_REATTACH_ENV), None);
    }

    #[tokio::test]
    async fn test_out_of_process_skips_server() {
        let (_tmp, mut wd) = working_dir();
        let env = PluginEnv {
            test_providers_oop: true,
            ..PluginEnv::default()
        };

        run_provider_command_with_env(&env, &mut wd, random::provider(), |wd| async move {
            assert_eq!(wd.getenv(PROVIDER_REATTACH_ENV), None);
            Ok::<(), std::io::Error>(())
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_bind_failure_reports_nil_reattach_config() {
        let (_tmp, mut wd) = working_dir();
        let blocker = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = blocker.local_addr().unwrap().port();
        let env = PluginEnv {
            port_range: Some((port, port)),
            ..PluginEnv::default()
        };

        let err = run_provider_command_with_env(&env, &mut wd, random::provider(), |_| async {
            Ok::<(), std::io::Error>(())
        })
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            HarnessError::Serve(ServeError::NilReattachConfig)
        ));
        assert_eq!(err.to_string(), "nil reattach config received");
    }
}
