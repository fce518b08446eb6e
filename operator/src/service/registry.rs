//! Explicit mapping from service type names to their constructors.

use alloc::collections::BTreeMap;

use fleetshift_common::Host;
use tracing::debug;

use crate::config::Config;
use crate::error::ServiceError;
use crate::options::{self, Options};
use crate::service::{ServiceController, ServiceInstance, clusterip};

/// Builds a controller for a host from fully merged options.
pub type ControllerFactory =
    for<'host> fn(&'host Host, Options) -> Result<Box<dyn ServiceController + 'host>, ServiceError>;

/// Builds a single instance for a host from fully merged options.
pub type InstanceFactory =
    for<'host> fn(&'host Host, Options) -> Result<Box<dyn ServiceInstance + 'host>, ServiceError>;

/// Registration record of one service type.
#[derive(Clone, Copy)]
pub struct ServiceType {
    /// Canonical (lowercase, underscored) name; also the config section it reads.
    pub name: &'static str,
    /// Lowest-precedence option layer.
    pub defaults: fn() -> Options,
    pub controller: ControllerFactory,
    pub instance: InstanceFactory,
}

impl ServiceType {
    /// Defaults, then the config section named after the type, then `overrides`.
    #[must_use]
    pub fn merged_options(&self, config: &Config, overrides: &Options) -> Options {
        let defaults = (self.defaults)();
        let empty = Options::new();
        let section = config.section(self.name).unwrap_or(&empty);
        options::merge([&defaults, section, overrides])
    }
}

impl core::fmt::Debug for ServiceType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ServiceType")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Registered service types. Filled once at startup, read-only afterwards.
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    types: BTreeMap<&'static str, ServiceType>,
}

impl ServiceRegistry {
    /// A registry without any service types.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every service type shipped in this crate.
    #[must_use]
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(clusterip::SERVICE_TYPE);
        registry
    }

    /// Adds a service type, replacing one registered under the same name.
    pub fn register(&mut self, service_type: ServiceType) {
        self.types.insert(service_type.name, service_type);
    }

    /// Names of all registered types.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.types.keys().copied()
    }

    /// Resolves a type name in any case convention (`clusterip`, `Clusterip`, ...).
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::UnknownServiceType`] if nothing is registered under the name.
    pub fn lookup(&self, type_name: &str) -> Result<&ServiceType, ServiceError> {
        let canonical = options::canonical_name(type_name);
        self.types
            .get(canonical.as_str())
            .ok_or_else(|| ServiceError::UnknownServiceType(type_name.to_owned()))
    }

    /// Controller of `type_name` on `host`.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown types or options the type rejects.
    pub fn controller<'host>(
        &self,
        type_name: &str,
        host: &'host Host,
        config: &Config,
        overrides: &Options,
    ) -> Result<Box<dyn ServiceController + 'host>, ServiceError> {
        let service_type = self.lookup(type_name)?;
        debug!(service = service_type.name, %host, "building controller");
        (service_type.controller)(host, service_type.merged_options(config, overrides))
    }

    /// Single instance of `type_name` on `host`, without going through a controller.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown types or options the type rejects.
    pub fn instance<'host>(
        &self,
        type_name: &str,
        host: &'host Host,
        config: &Config,
        overrides: &Options,
    ) -> Result<Box<dyn ServiceInstance + 'host>, ServiceError> {
        let service_type = self.lookup(type_name)?;
        (service_type.instance)(host, service_type.merged_options(config, overrides))
    }
}
