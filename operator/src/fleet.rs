//! The operator session: configuration, inventory and registry, passed around together.

use alloc::collections::BTreeMap;

use fleetshift_common::Host;
use tracing::info;

use crate::config::Config;
use crate::error::ServiceError;
use crate::inventory::Inventory;
use crate::options::Options;
use crate::service::clusterip::{self, ClusterIpInstance};
use crate::service::{
    MigrateOptions, ServiceController, ServiceInstance, ServiceRegistry, Verbosity,
};

/// Everything an operator command needs, built once at startup.
#[derive(Debug)]
pub struct Fleet {
    config: Config,
    inventory: Inventory,
    registry: ServiceRegistry,
}

impl Fleet {
    #[must_use]
    pub const fn new(config: Config, inventory: Inventory, registry: ServiceRegistry) -> Self {
        Self {
            config,
            inventory,
            registry,
        }
    }

    /// Inventory from the `[nodes]` of `config`, with the built-in service types.
    #[must_use]
    pub fn from_config(config: Config) -> Self {
        let inventory = Inventory::from_config(&config);
        Self::new(config, inventory, ServiceRegistry::with_builtin())
    }

    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub const fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    #[must_use]
    pub const fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    /// # Errors
    ///
    /// [`ServiceError::UnknownHost`] if the inventory has no such host.
    pub fn host(&self, name: &str) -> Result<&Host, ServiceError> {
        self.inventory.get(name)
    }

    /// Controller of `service` on the host named `host`.
    ///
    /// # Errors
    ///
    /// Unknown host or service type, or invalid options.
    pub fn service(
        &self,
        host: &str,
        service: &str,
    ) -> Result<Box<dyn ServiceController + '_>, ServiceError> {
        self.service_with(host, service, &Options::new())
    }

    /// Like [`Fleet::service`], with call-site options layered on top.
    ///
    /// # Errors
    ///
    /// Unknown host or service type, or invalid options.
    pub fn service_with(
        &self,
        host: &str,
        service: &str,
        overrides: &Options,
    ) -> Result<Box<dyn ServiceController + '_>, ServiceError> {
        let host = self.host(host)?;
        self.registry
            .controller(service, host, &self.config, overrides)
    }

    /// A single instance of `service` on `host`. Nothing is executed.
    ///
    /// # Errors
    ///
    /// Unknown host or service type, or invalid options.
    pub fn instance(
        &self,
        host: &str,
        service: &str,
        overrides: &Options,
    ) -> Result<Box<dyn ServiceInstance + '_>, ServiceError> {
        let host = self.host(host)?;
        self.registry
            .instance(service, host, &self.config, overrides)
    }

    /// A cluster-IP instance with its bucket operations available.
    ///
    /// # Errors
    ///
    /// Unknown host, or invalid options.
    pub fn clusterip(
        &self,
        host: &str,
        overrides: &Options,
    ) -> Result<ClusterIpInstance<'_>, ServiceError> {
        let host = self.host(host)?;
        let service_type = self.registry.lookup(clusterip::SERVICE_NAME)?;
        ClusterIpInstance::new(host, service_type.merged_options(&self.config, overrides))
    }

    /// Status lines of every instance of `service`, per hostname.
    ///
    /// # Errors
    ///
    /// The first error encountered; nothing is reported partially.
    pub fn status_all(
        &self,
        service: &str,
        verbosity: Verbosity,
    ) -> Result<BTreeMap<String, Vec<String>>, ServiceError> {
        self.inventory
            .iter()
            .map(|host| -> Result<_, ServiceError> {
                let controller =
                    self.registry
                        .controller(service, host, &self.config, &Options::new())?;
                Ok((host.hostname().to_owned(), controller.status(verbosity)?))
            })
            .collect()
    }

    /// Starts an instance with `overrides` on every host, in inventory order.
    ///
    /// # Errors
    ///
    /// Stops at the first host that fails; earlier hosts stay started.
    pub fn start_all(&self, service: &str, overrides: &Options) -> Result<(), ServiceError> {
        for host in &self.inventory {
            self.registry
                .instance(service, host, &self.config, overrides)?
                .start()?;
        }
        Ok(())
    }

    /// Stops an instance with `overrides` on every host, in inventory order.
    ///
    /// # Errors
    ///
    /// Stops at the first host that fails; earlier hosts stay stopped.
    pub fn stop_all(&self, service: &str, overrides: &Options) -> Result<(), ServiceError> {
        for host in &self.inventory {
            self.registry
                .instance(service, host, &self.config, overrides)?
                .stop()?;
        }
        Ok(())
    }

    /// Migrates one instance (selected by `overrides`) from `from` to `to`.
    ///
    /// # Errors
    ///
    /// Lookup errors, or [`ServiceError::Migrate`] describing where it stopped.
    pub fn migrate(
        &self,
        service: &str,
        from: &str,
        to: &str,
        overrides: &Options,
        options: &MigrateOptions,
    ) -> Result<Box<dyn ServiceInstance + '_>, ServiceError> {
        let dst = self.host(to)?;
        let instance = self.instance(from, service, overrides)?;
        let migrated = instance.migrate(dst, options).map_err(Box::new)?;
        info!(service, from, to, instance = %migrated.identity(), "migration finished");
        Ok(migrated)
    }

    /// Migrates every instance of `service` found on `from` to `to`.
    ///
    /// # Errors
    ///
    /// Lookup errors, or [`ServiceError::Migrate`] listing what was already migrated.
    pub fn migrate_all(
        &self,
        service: &str,
        from: &str,
        to: &str,
        options: &MigrateOptions,
    ) -> Result<Vec<Box<dyn ServiceInstance + '_>>, ServiceError> {
        let dst = self.host(to)?;
        let controller = self.service(from, service)?;
        Ok(controller.migrate(dst, options).map_err(Box::new)?)
    }
}
