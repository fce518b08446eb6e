//! The fixed set of managed hosts.

use fleetshift_common::Host;

use crate::config::Config;
use crate::error::ServiceError;

/// Ordered, immutable collection of managed hosts, built once at startup.
#[derive(Debug, Default)]
pub struct Inventory {
    hosts: Vec<Host>,
}

impl Inventory {
    /// One host per `[nodes.*]` entry, in key order.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::from_hosts(
            config
                .nodes
                .iter()
                .map(|(key, node)| Host::new(node.host_spec(key)))
                .collect(),
        )
    }

    #[must_use]
    pub const fn from_hosts(hosts: Vec<Host>) -> Self {
        Self { hosts }
    }

    #[must_use]
    pub fn hosts(&self) -> &[Host] {
        &self.hosts
    }

    pub fn iter(&self) -> impl Iterator<Item = &Host> {
        self.hosts.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Looks a host up by hostname; `user@hostname` is accepted too.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::UnknownHost`] if no host matches.
    pub fn get(&self, name: &str) -> Result<&Host, ServiceError> {
        let hostname = name.rsplit_once('@').map_or(name, |(_, hostname)| hostname);
        self.hosts
            .iter()
            .find(|host| host.hostname() == hostname)
            .ok_or_else(|| ServiceError::UnknownHost(name.to_owned()))
    }
}

impl<'inv> IntoIterator for &'inv Inventory {
    type Item = &'inv Host;
    type IntoIter = core::slice::Iter<'inv, Host>;

    fn into_iter(self) -> Self::IntoIter {
        self.hosts.iter()
    }
}
