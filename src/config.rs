//! Environment-driven plugin configuration.
//!
//! The host tells a plugin everything it needs through environment variables
//! set before spawning it. [`PluginEnv`] collects them in one place so the
//! serve paths never read the process environment directly.
//!
//! | Variable | Meaning |
//! |---|---|
//! | `TF_PLUGIN_MAGIC_COOKIE` | proves the process was launched by the host |
//! | `PLUGIN_PROTOCOL_VERSIONS` | comma-separated app protocol versions the host speaks |
//! | `PLUGIN_MIN_PORT` / `PLUGIN_MAX_PORT` | port range to bind in |
//! | `TF_TEST_PROVIDERS_OOP` | non-empty: run acceptance tests against an out-of-process provider |

use tracing::warn;

use crate::types::{MAGIC_COOKIE_KEY, MAGIC_COOKIE_VALUE, PROTOCOL_VERSION, SUPPORTED_PROTOCOL_VERSIONS};

/// Environment variable listing the protocol versions the host supports.
pub const PLUGIN_PROTOCOL_VERSIONS_ENV: &str = "PLUGIN_PROTOCOL_VERSIONS";

/// Environment variable holding the lowest port the plugin may bind.
pub const PLUGIN_MIN_PORT_ENV: &str = "PLUGIN_MIN_PORT";

/// Environment variable holding the highest port the plugin may bind.
pub const PLUGIN_MAX_PORT_ENV: &str = "PLUGIN_MAX_PORT";

/// Environment variable that switches acceptance tests to out-of-process providers.
pub const TEST_PROVIDERS_OOP_ENV: &str = "TF_TEST_PROVIDERS_OOP";

/// Snapshot of the plugin-related environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginEnv {
    /// Value of the magic cookie variable, if set.
    pub magic_cookie: Option<String>,
    /// Protocol versions offered by the host. Empty when the host did not say.
    pub protocol_versions: Vec<u32>,
    /// Inclusive port range to bind in, when both bounds are set.
    pub port_range: Option<(u16, u16)>,
    /// Whether acceptance tests should use an out-of-process provider.
    pub test_providers_oop: bool,
}

impl PluginEnv {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary lookup function.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let protocol_versions = lookup(PLUGIN_PROTOCOL_VERSIONS_ENV)
            .map(|raw| parse_protocol_versions(&raw))
            .unwrap_or_default();

        let min_port = lookup(PLUGIN_MIN_PORT_ENV).and_then(|v| parse_port(PLUGIN_MIN_PORT_ENV, &v));
        let max_port = lookup(PLUGIN_MAX_PORT_ENV).and_then(|v| parse_port(PLUGIN_MAX_PORT_ENV, &v));
        let port_range = match (min_port, max_port) {
            (Some(min), Some(max)) if min <= max => Some((min, max)),
            (Some(min), Some(max)) => {
                warn!(min, max, "Ignoring inverted plugin port range");
                None
            }
            _ => None,
        };

        Self {
            magic_cookie: lookup(MAGIC_COOKIE_KEY),
            protocol_versions,
            port_range,
            test_providers_oop: lookup(TEST_PROVIDERS_OOP_ENV).is_some_and(|v| !v.is_empty()),
        }
    }

    /// Whether the magic cookie matches the one the host sets.
    pub fn launched_by_host(&self) -> bool {
        self.magic_cookie.as_deref() == Some(MAGIC_COOKIE_VALUE)
    }

    /// Pick the app protocol version to serve.
    ///
    /// The highest version offered by the host that this provider supports
    /// wins. Without an offer, or without overlap, the default version is used.
    pub fn negotiate_protocol_version(&self) -> u32 {
        if self.protocol_versions.is_empty() {
            return PROTOCOL_VERSION;
        }

        match self
            .protocol_versions
            .iter()
            .copied()
            .filter(|v| SUPPORTED_PROTOCOL_VERSIONS.contains(v))
            .max()
        {
            Some(version) => version,
            None => {
                warn!(
                    offered = ?self.protocol_versions,
                    supported = ?SUPPORTED_PROTOCOL_VERSIONS,
                    "No common protocol version with host, using default"
                );
                PROTOCOL_VERSION
            }
        }
    }
}

fn parse_protocol_versions(raw: &str) -> Vec<u32> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| match s.parse() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(value = s, "Ignoring malformed protocol version");
                None
            }
        })
        .collect()
}

fn parse_port(key: &str, raw: &str) -> Option<u16> {
    match raw.trim().parse() {
        Ok(port) => Some(port),
        Err(_) => {
            warn!(variable = key, value = raw, "Ignoring malformed port");
            None
        }
    }
}
