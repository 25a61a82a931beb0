//! Reattach descriptors.
//!
//! A reattach config tells the host how to reach a provider that is already
//! running instead of spawning a new one. It comes in two encodings, both
//! fixed by the host:
//!
//! - `TF_REATTACH_PROVIDERS`: a JSON object keyed by provider address, printed
//!   by debug serve for a developer to export.
//!
//!   ```text
//!   {"hashicorp/random":{"Protocol":"grpc","ProtocolVersion":5,"Pid":4242,"Test":true,"Addr":{"Network":"tcp","String":"127.0.0.1:50123"}}}
//!   ```
//!
//! - `TF_PROVIDER_REATTACH`: a pipe-delimited single-provider form set by the
//!   test harness.
//!
//!   ```text
//!   hashicorp/random=5|tcp|127.0.0.1:50123|grpc|4242|test
//!   ```

use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{NETWORK_TCP, PROTOCOL_NAME};

/// Environment variable read by the host for debug-served providers.
pub const REATTACH_PROVIDERS_ENV: &str = "TF_REATTACH_PROVIDERS";

/// Environment variable set by the test harness for in-process providers.
pub const PROVIDER_REATTACH_ENV: &str = "TF_PROVIDER_REATTACH";

/// Marker appended to the pipe form when the provider is test-managed.
const TEST_MARKER: &str = "test";

/// Network address of a running provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReattachAddr {
    /// Network type, always `tcp` for this provider.
    pub network: String,
    /// Address in `host:port` form.
    pub string: String,
}

/// Everything the host needs to attach to a running provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReattachConfig {
    /// RPC protocol, always `grpc`.
    pub protocol: String,
    /// Negotiated application protocol version.
    pub protocol_version: u32,
    /// Process id of the serving process.
    pub pid: u32,
    /// Whether the host should leave the process lifetime alone.
    pub test: bool,
    /// Where the provider listens.
    pub addr: ReattachAddr,
}

impl ReattachConfig {
    /// Describe a gRPC provider listening on `addr` in this process.
    pub fn new(addr: SocketAddr, protocol_version: u32, test: bool) -> Self {
        Self {
            protocol: PROTOCOL_NAME.to_string(),
            protocol_version,
            pid: std::process::id(),
            test,
            addr: ReattachAddr {
                network: NETWORK_TCP.to_string(),
                string: addr.to_string(),
            },
        }
    }

    /// Parse the listen address back into a socket address.
    pub fn socket_addr(&self) -> Result<SocketAddr, ReattachError> {
        self.addr
            .string
            .parse()
            .map_err(|_| ReattachError::InvalidAddress(self.addr.string.clone()))
    }

    /// URI a gRPC client can connect to.
    pub fn endpoint_uri(&self) -> String {
        format!("http://{}", self.addr.string)
    }
}

/// Reattach configs keyed by provider address (`TF_REATTACH_PROVIDERS`).
pub type ReattachProviders = BTreeMap<String, ReattachConfig>;

/// Encode a single provider as a `TF_REATTACH_PROVIDERS` value.
pub fn reattach_providers_json(
    provider_address: &str,
    config: &ReattachConfig,
) -> Result<String, serde_json::Error> {
    let mut providers = ReattachProviders::new();
    providers.insert(provider_address.to_string(), config.clone());
    serde_json::to_string(&providers)
}

/// Decode a `TF_REATTACH_PROVIDERS` value.
pub fn parse_reattach_providers(raw: &str) -> Result<ReattachProviders, serde_json::Error> {
    serde_json::from_str(raw)
}

/// Errors from parsing a reattach descriptor.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReattachError {
    /// The `provider=` prefix is missing.
    #[error("missing provider address in reattach descriptor: {0}")]
    MissingProvider(String),

    /// Wrong number of pipe-separated fields.
    #[error("expected 5 or 6 '|'-separated fields, got {0}")]
    FieldCount(usize),

    /// A numeric field did not parse.
    #[error("invalid {field} in reattach descriptor: {value}")]
    InvalidNumber {
        /// Which field was malformed.
        field: &'static str,
        /// The offending text.
        value: String,
    },

    /// The sixth field was something other than `test`.
    #[error("unexpected trailing field in reattach descriptor: {0}")]
    TrailingField(String),

    /// The address is not a socket address.
    #[error("invalid reattach address: {0}")]
    InvalidAddress(String),
}

/// A single provider's reattach descriptor in pipe form (`TF_PROVIDER_REATTACH`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderReattach {
    /// Provider address, e.g. `hashicorp/random`.
    pub provider_address: String,
    /// Connection details.
    pub config: ReattachConfig,
}

impl ProviderReattach {
    /// Pair a provider address with its reattach config.
    pub fn new(provider_address: impl Into<String>, config: ReattachConfig) -> Self {
        Self {
            provider_address: provider_address.into(),
            config,
        }
    }
}

impl fmt::Display for ProviderReattach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}={}|{}|{}|{}|{}",
            self.provider_address,
            self.config.protocol_version,
            self.config.addr.network,
            self.config.addr.string,
            self.config.protocol,
            self.config.pid,
        )?;
        if self.config.test {
            write!(f, "|{}", TEST_MARKER)?;
        }
        Ok(())
    }
}

impl FromStr for ProviderReattach {
    type Err = ReattachError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (provider_address, rest) = s
            .split_once('=')
            .filter(|(provider, _)| !provider.is_empty())
            .ok_or_else(|| ReattachError::MissingProvider(s.to_string()))?;

        let fields: Vec<&str> = rest.split('|').collect();
        let test = match fields.len() {
            5 => false,
            6 if fields[5] == TEST_MARKER => true,
            6 => return Err(ReattachError::TrailingField(fields[5].to_string())),
            n => return Err(ReattachError::FieldCount(n)),
        };

        let protocol_version = fields[0].parse().map_err(|_| ReattachError::InvalidNumber {
            field: "protocol version",
            value: fields[0].to_string(),
        })?;
        let pid = fields[4].parse().map_err(|_| ReattachError::InvalidNumber {
            field: "pid",
            value: fields[4].to_string(),
        })?;

        Ok(Self {
            provider_address: provider_address.to_string(),
            config: ReattachConfig {
                protocol: fields[3].to_string(),
                protocol_version,
                pid,
                test,
                addr: ReattachAddr {
                    network: fields[1].to_string(),
                    string: fields[2].to_string(),
                },
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(test: bool) -> ReattachConfig {
        ReattachConfig {
            protocol: "grpc".to_string(),
            protocol_version: 5,
            pid: 4242,
            test,
            addr: ReattachAddr {
                network: "tcp".to_string(),
                string: "127.0.0.1:50123".to_string(),
            },
        }
    }

    #[test]
    fn test_reattach_providers_json_layout() {
        let json = reattach_providers_json("hashicorp/random", &sample(true)).unwrap();
        assert_eq!(
            json,
            r#"{"hashicorp/random":{"Protocol":"grpc","ProtocolVersion":5,"Pid":4242,"Test":true,"Addr":{"Network":"tcp","String":"127.0.0.1:50123"}}}"#
        );
    }

    #[test]
    fn test_parse_reattach_providers() {
        let raw = r#"{"hashicorp/random":{"Protocol":"grpc","ProtocolVersion":5,"Pid":7,"Test":false,"Addr":{"Network":"tcp","String":"127.0.0.1:1"}}}"#;
        let providers = parse_reattach_providers(raw).unwrap();
        let config = &providers["hashicorp/random"];
        assert_eq!(config.pid, 7);
        assert!(!config.test);
        assert_eq!(config.socket_addr().unwrap().port(), 1);
    }

    #[test]
    fn test_pipe_format() {
        let reattach = ProviderReattach::new("hashicorp/random", sample(true));
        assert_eq!(
            reattach.to_string(),
            "hashicorp/random=5|tcp|127.0.0.1:50123|grpc|4242|test"
        );

        let reattach = ProviderReattach::new("hashicorp/random", sample(false));
        assert_eq!(
            reattach.to_string(),
            "hashicorp/random=5|tcp|127.0.0.1:50123|grpc|4242"
        );
    }

    #[test]
    fn test_pipe_format_parses_back() {
        for test in [true, false] {
            let reattach = ProviderReattach::new("hashicorp/random", sample(test));
            let parsed: ProviderReattach = reattach.to_string().parse().unwrap();
            assert_eq!(parsed, reattach);
        }
    }

    #[test]
    fn test_pipe_format_errors() {
        assert!(matches!(
            "5|tcp|127.0.0.1:1|grpc|1".parse::<ProviderReattach>(),
            Err(ReattachError::MissingProvider(_))
        ));
        assert_eq!(
            "hashicorp/random=5|tcp|127.0.0.1:1".parse::<ProviderReattach>(),
            Err(ReattachError::FieldCount(3))
        );
        assert!(matches!(
            "hashicorp/random=five|tcp|127.0.0.1:1|grpc|1".parse::<ProviderReattach>(),
            Err(ReattachError::InvalidNumber { field: "protocol version", .. })
        ));
        assert!(matches!(
            "hashicorp/random=5|tcp|127.0.0.1:1|grpc|pid".parse::<ProviderReattach>(),
            Err(ReattachError::InvalidNumber { field: "pid", .. })
        ));
        assert_eq!(
            "hashicorp/random=5|tcp|127.0.0.1:1|grpc|1|prod".parse::<ProviderReattach>(),
            Err(ReattachError::TrailingField("prod".to_string()))
        );
    }

    #[test]
    fn test_new_uses_current_process() {
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let config = ReattachConfig::new(addr, 5, true);
        assert_eq!(config.pid, std::process::id());
        assert_eq!(config.protocol, "grpc");
        assert_eq!(config.addr.network, "tcp");
        assert_eq!(config.socket_addr().unwrap(), addr);
        assert_eq!(config.endpoint_uri(), "http://127.0.0.1:9000");
    }

    #[test]
    fn test_invalid_address() {
        let mut config = sample(false);
        config.addr.string = "nowhere".to_string();
        assert_eq!(
            config.socket_addr(),
            Err(ReattachError::InvalidAddress("nowhere".to_string()))
        );
    }
}
