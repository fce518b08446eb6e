//! Typed cluster-IP settings, validated from merged option layers.

use core::fmt;
use core::net::Ipv4Addr;
use std::sync::LazyLock;

use fleetshift_common::Host;
use regex::Regex;
use serde::Deserialize;

use super::SERVICE_NAME;
use crate::error::ServiceError;
use crate::options::Options;

static CLUSTER_MAC: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^(?:[0-9A-Fa-f]{2}:){5}[0-9A-Fa-f]{2}$").ok());

/// Lowest-precedence option layer of the cluster-IP service.
#[must_use]
pub fn defaults() -> Options {
    let mut defaults = Options::new();
    defaults.insert("interface".to_owned(), "eth0".into());
    defaults.insert("clustermac".to_owned(), "01:02:03:04:05:06".into());
    defaults.insert("hashmode".to_owned(), HashMode::SourceIp.to_string().into());
    defaults
}

/// What the CLUSTERIP target hashes to pick the responsible node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum HashMode {
    #[serde(rename = "sourceip")]
    SourceIp,
    #[serde(rename = "sourceip-sourceport")]
    SourceIpSourcePort,
    #[serde(rename = "sourceip-sourceport-destport")]
    SourceIpSourcePortDestPort,
}

impl fmt::Display for HashMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match *self {
            Self::SourceIp => "sourceip",
            Self::SourceIpSourcePort => "sourceip-sourceport",
            Self::SourceIpSourcePortDestPort => "sourceip-sourceport-destport",
        })
    }
}

/// Raw shape of the merged options. Keys not listed here are kept as passthrough.
#[derive(Debug, Deserialize)]
struct RawSettings {
    ip: Option<Ipv4Addr>,
    interface: String,
    clustermac: String,
    hashmode: HashMode,
    total_nodes: Option<u32>,
    local_node: Option<u32>,
    #[serde(flatten)]
    passthrough: Options,
}

/// Validated settings of one cluster-IP instance (or of a controller, without `ip`).
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub ip: Option<Ipv4Addr>,
    pub interface: String,
    pub clustermac: String,
    pub hashmode: HashMode,
    pub total_nodes: Option<u32>,
    /// Falls back to the host's own `local_node`.
    pub local_node: Option<u32>,
    /// Keys this service does not know. Kept so they survive relocation, never interpreted.
    pub passthrough: Options,
}

impl Settings {
    /// Validates `options` for use on `host`.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::InvalidOptions`] for malformed values.
    pub fn from_options(options: &Options, host: &Host) -> Result<Self, ServiceError> {
        let raw: RawSettings = toml::Value::Table(options.clone())
            .try_into()
            .map_err(|e: toml::de::Error| invalid(e.message().to_owned()))?;

        if raw.interface.is_empty()
            || !raw
                .interface
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | ':' | '_' | '-'))
        {
            return Err(invalid(format!("'{}' is not an interface name", raw.interface)));
        }
        if !CLUSTER_MAC
            .as_ref()
            .is_some_and(|mac| mac.is_match(&raw.clustermac))
        {
            return Err(invalid(format!("'{}' is not a MAC address", raw.clustermac)));
        }
        if raw.total_nodes == Some(0) {
            return Err(invalid("total_nodes must be at least 1".to_owned()));
        }

        Ok(Self {
            ip: raw.ip,
            interface: raw.interface,
            clustermac: raw.clustermac,
            hashmode: raw.hashmode,
            total_nodes: raw.total_nodes,
            local_node: raw.local_node.or_else(|| host.local_node()),
            passthrough: raw.passthrough,
        })
    }

    /// # Errors
    ///
    /// [`ServiceError::MissingOption`] if no `ip` was given.
    pub fn ip(&self) -> Result<Ipv4Addr, ServiceError> {
        self.ip.ok_or_else(|| missing("ip"))
    }

    /// # Errors
    ///
    /// [`ServiceError::MissingOption`] if no `total_nodes` was given.
    pub fn total_nodes(&self) -> Result<u32, ServiceError> {
        self.total_nodes.ok_or_else(|| missing("total_nodes"))
    }

    /// # Errors
    ///
    /// [`ServiceError::MissingOption`] if neither the options nor the host set `local_node`.
    pub fn local_node(&self) -> Result<u32, ServiceError> {
        self.local_node.ok_or_else(|| missing("local_node"))
    }
}

fn invalid(reason: String) -> ServiceError {
    ServiceError::InvalidOptions {
        service: SERVICE_NAME.to_owned(),
        reason,
    }
}

fn missing(option: &'static str) -> ServiceError {
    ServiceError::MissingOption {
        service: SERVICE_NAME.to_owned(),
        option,
    }
}
