//! Configuration data types.

use alloc::collections::BTreeMap;

use fleetshift_common::HostSpec;
use secrecy::SecretString;
use serde::Deserialize;

use crate::options::Options;

/// Connection settings of one managed host.
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
    /// Login user. Overrides a `user@` prefix in the table key.
    #[serde(default, alias = "user")]
    pub login: Option<String>,
    /// Used for ssh login and to answer `sudo` password prompts.
    #[serde(default)]
    pub password: Option<SecretString>,
    /// ssh port.
    #[serde(default)]
    pub port: Option<u16>,
    /// Node number of this host in cluster-IP hash rings.
    #[serde(default)]
    pub local_node: Option<u32>,
}

impl NodeConfig {
    /// Builds the host identity for the node stored under `key` (`hostname` or `user@hostname`).
    #[must_use]
    pub fn host_spec(&self, key: &str) -> HostSpec {
        HostSpec::parse(key, self.login.as_deref())
            .with_password(self.password.clone())
            .with_port(self.port)
            .with_local_node(self.local_node)
    }
}

/// Root config structure.
///
/// ```toml
/// [nodes."deploy@web1"]
/// password = "secret"
/// local_node = 1
///
/// [clusterip]
/// interface = "eth1"
/// total_nodes = 2
/// ```
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Managed hosts, keyed by `hostname` or `user@hostname`.
    #[serde(default)]
    pub nodes: BTreeMap<String, NodeConfig>,
    /// Every other table: option defaults per service type, keyed by canonical type name.
    #[serde(flatten)]
    pub sections: BTreeMap<String, Options>,
}

impl Config {
    /// Option section for a service type, if the file has one.
    #[must_use]
    pub fn section(&self, service: &str) -> Option<&Options> {
        self.sections.get(service)
    }
}
