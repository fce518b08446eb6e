//! Shared-IP load sharing with the iptables CLUSTERIP target.
//!
//! Every node of the cluster receives every packet for the shared IP. The target hashes
//! each connection into one of `total_nodes` buckets, and a node only answers for the
//! buckets it is responsible for. Responsibility lives in
//! `/proc/net/ipt_CLUSTERIP/<ip>` and is changed with signed updates (`+N`, `-N`),
//! which is what lets buckets move between nodes for maintenance or failover.
//!
//! Three pieces of host state make up a running instance: the firewall rule, the
//! address on the interface and a non-empty responsibility set.

mod commands;
mod instance;
mod options;

pub use instance::ClusterIpInstance;
pub use options::{HashMode, Settings};

use core::net::Ipv4Addr;

use fleetshift_common::{ExecError, Host};
use tracing::{debug, warn};

use crate::error::ServiceError;
use crate::options::{self as layers, Options};
use crate::service::{ServiceController, ServiceInstance, ServiceType};

/// Canonical type name, also the config section it reads defaults from.
pub const SERVICE_NAME: &str = "clusterip";

pub const SERVICE_TYPE: ServiceType = ServiceType {
    name: SERVICE_NAME,
    defaults: options::defaults,
    controller: build_controller,
    instance: build_instance,
};

fn build_controller(
    host: &Host,
    options: Options,
) -> Result<Box<dyn ServiceController + '_>, ServiceError> {
    Ok(Box::new(ClusterIp::new(host, options)?))
}

fn build_instance(
    host: &Host,
    options: Options,
) -> Result<Box<dyn ServiceInstance + '_>, ServiceError> {
    Ok(Box::new(ClusterIpInstance::new(host, options)?))
}

const MISSING_DIR: &str = "No such file or directory";

/// Cluster-IP controller of one host.
#[derive(Debug)]
pub struct ClusterIp<'host> {
    host: &'host Host,
    options: Options,
}

impl<'host> ClusterIp<'host> {
    /// # Errors
    ///
    /// Returns an error if the options are malformed. `ip` is not needed here.
    pub fn new(host: &'host Host, options: Options) -> Result<Self, ServiceError> {
        Settings::from_options(&options, host)?;
        Ok(Self { host, options })
    }

    /// Instance for `ip` with the controller's options and `overrides`.
    ///
    /// # Errors
    ///
    /// Returns an error if the merged options are not valid.
    pub fn instance_for(
        &self,
        ip: Ipv4Addr,
        overrides: &Options,
    ) -> Result<ClusterIpInstance<'host>, ServiceError> {
        let mut identity = Options::new();
        identity.insert("ip".to_owned(), ip.to_string().into());
        ClusterIpInstance::new(
            self.host,
            layers::merge([&self.options, overrides, &identity]),
        )
    }

    /// Shared IPs with a responsibility file on the host.
    fn listed_ips(&self) -> Result<Vec<Ipv4Addr>, ServiceError> {
        let listing = match self.host.run(&commands::list_instances()) {
            Ok(Some(listing)) if !listing.contains(MISSING_DIR) => listing,
            Ok(_) => return Ok(Vec::new()),
            Err(ExecError::RemoteCommand { ref message, .. }) if message.contains(MISSING_DIR) => {
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };
        Ok(listing
            .split_whitespace()
            .filter_map(|entry| match entry.parse() {
                Ok(ip) => Some(ip),
                Err(_) => {
                    warn!(host = %self.host, %entry, "skipping entry that is not an IPv4 address");
                    None
                }
            })
            .collect())
    }
}

impl ServiceController for ClusterIp<'_> {
    fn service_name(&self) -> &'static str {
        SERVICE_NAME
    }

    fn host(&self) -> &Host {
        self.host
    }

    fn options(&self) -> &Options {
        &self.options
    }

    fn instances(&self) -> Result<Vec<Box<dyn ServiceInstance + '_>>, ServiceError> {
        let ips = self.listed_ips()?;
        debug!(host = %self.host, count = ips.len(), "found cluster IPs");
        ips.into_iter()
            .map(|ip| {
                self.instance_for(ip, &Options::new())
                    .map(|instance| Box::new(instance) as Box<dyn ServiceInstance + '_>)
            })
            .collect()
    }

    fn instance(&self, overrides: &Options) -> Result<Box<dyn ServiceInstance + '_>, ServiceError> {
        let merged = layers::merge([&self.options, overrides]);
        Ok(Box::new(ClusterIpInstance::new(self.host, merged)?))
    }
}
