//! Service framework: controllers that discover instances on a host, and the
//! instances themselves.
//!
//! To add a service type, implement [`ServiceController`] and [`ServiceInstance`] and
//! register a [`ServiceType`] with the [`ServiceRegistry`].

pub mod clusterip;
mod registry;

pub use registry::{ControllerFactory, InstanceFactory, ServiceRegistry, ServiceType};

use fleetshift_common::Host;
use tracing::{info, warn};

use crate::error::{MigrateError, MigrateStage, ServiceError};
use crate::options::Options;

/// Level of detail of a status report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Verbosity {
    /// `running` or `not running`, stopping at the first failed check.
    #[default]
    Terse,
    /// One line per failed check, all checks evaluated.
    Verbose,
}

/// Parameters for [`ServiceInstance::migrate`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrateOptions {
    /// Buckets to move. Empty means everything the source currently owns.
    /// Only meaningful for bucketed services.
    pub buckets: Vec<i32>,
}

/// One running (or startable) unit of a service type on a host.
pub trait ServiceInstance {
    /// Canonical name of the service type.
    fn service_name(&self) -> &'static str;

    fn host(&self) -> &Host;

    /// What distinguishes this instance from others of the same type on the host.
    fn identity(&self) -> String;

    /// The merged options the instance was built from.
    fn options(&self) -> &Options;

    /// # Errors
    ///
    /// Returns an error if the commands could not be executed.
    fn start(&self) -> Result<(), ServiceError>;

    /// # Errors
    ///
    /// Returns an error if the commands could not be executed.
    fn stop(&self) -> Result<(), ServiceError>;

    /// # Errors
    ///
    /// Returns the error of whichever of `stop` or `start` failed.
    fn restart(&self) -> Result<(), ServiceError> {
        self.stop()?;
        self.start()
    }

    /// # Errors
    ///
    /// Returns an error if the state could not be inspected.
    fn status(&self, verbosity: Verbosity) -> Result<String, ServiceError>;

    /// Identity and status, e.g. `10.0.0.100: running`.
    ///
    /// # Errors
    ///
    /// Same as [`ServiceInstance::status`].
    fn describe(&self, verbosity: Verbosity) -> Result<String, ServiceError> {
        Ok(format!("{}: {}", self.identity(), self.status(verbosity)?))
    }

    /// An instance with identical options on another host. Nothing is started.
    ///
    /// # Errors
    ///
    /// Returns an error if the options are not valid for `dst`.
    fn relocate<'dst>(
        &self,
        dst: &'dst Host,
    ) -> Result<Box<dyn ServiceInstance + 'dst>, ServiceError>;

    /// Moves this instance to `dst` and returns the instance there.
    ///
    /// The default stops the instance here and starts it on `dst`. This is not
    /// transactional: if the start fails the service is left stopped everywhere.
    ///
    /// # Errors
    ///
    /// A [`MigrateError`] naming the failed step.
    fn migrate<'dst>(
        &self,
        dst: &'dst Host,
        _options: &MigrateOptions,
    ) -> Result<Box<dyn ServiceInstance + 'dst>, MigrateError> {
        migrate_by_restart(self, dst)
    }
}

/// Stop on the source, then start an identical instance on `dst`.
///
/// # Errors
///
/// A [`MigrateError`] at [`MigrateStage::StopSource`] or [`MigrateStage::StartDestination`].
pub fn migrate_by_restart<'dst, I: ServiceInstance + ?Sized>(
    instance: &I,
    dst: &'dst Host,
) -> Result<Box<dyn ServiceInstance + 'dst>, MigrateError> {
    let failed = |stage, source| MigrateError {
        service: instance.service_name().to_owned(),
        instance: instance.identity(),
        from: instance.host().hostname().to_owned(),
        to: dst.hostname().to_owned(),
        stage,
        buckets: Vec::new(),
        migrated: Vec::new(),
        source: Box::new(source),
    };

    let relocated = instance
        .relocate(dst)
        .map_err(|e| failed(MigrateStage::Inspect, e))?;
    instance
        .stop()
        .map_err(|e| failed(MigrateStage::StopSource, e))?;
    if let Err(e) = relocated.start() {
        warn!(
            instance = %instance.identity(),
            from = %instance.host(),
            to = %dst,
            "start on destination failed after the source was stopped"
        );
        return Err(failed(MigrateStage::StartDestination, e));
    }
    info!(instance = %instance.identity(), from = %instance.host(), to = %dst, "migrated");
    Ok(relocated)
}

/// Per-host manager of one service type.
pub trait ServiceController {
    /// Canonical name of the service type.
    fn service_name(&self) -> &'static str;

    fn host(&self) -> &Host;

    /// Defaults, config section and call-site options, merged.
    fn options(&self) -> &Options;

    /// Instances currently present on the host.
    ///
    /// A host without any trace of the service has no instances; that is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the host could not be inspected.
    fn instances(&self) -> Result<Vec<Box<dyn ServiceInstance + '_>>, ServiceError>;

    /// Builds an instance from the controller's options and `overrides`. Nothing is started.
    ///
    /// # Errors
    ///
    /// Returns an error if the merged options are not valid.
    fn instance(&self, overrides: &Options) -> Result<Box<dyn ServiceInstance + '_>, ServiceError>;

    /// [`ServiceInstance::describe`] of every instance.
    ///
    /// # Errors
    ///
    /// Returns the first error encountered.
    fn status(&self, verbosity: Verbosity) -> Result<Vec<String>, ServiceError> {
        self.instances()?
            .iter()
            .map(|instance| instance.describe(verbosity))
            .collect()
    }

    /// Migrates every instance to `dst`, one after the other.
    ///
    /// Stops at the first failure. Instances before it have been migrated (they are listed
    /// in [`MigrateError::migrated`]), instances after it are untouched.
    ///
    /// # Errors
    ///
    /// The [`MigrateError`] of the instance that failed.
    fn migrate<'dst>(
        &self,
        dst: &'dst Host,
        options: &MigrateOptions,
    ) -> Result<Vec<Box<dyn ServiceInstance + 'dst>>, MigrateError> {
        let instances = self.instances().map_err(|e| MigrateError {
            service: self.service_name().to_owned(),
            instance: "*".to_owned(),
            from: self.host().hostname().to_owned(),
            to: dst.hostname().to_owned(),
            stage: MigrateStage::Inspect,
            buckets: options.buckets.clone(),
            migrated: Vec::new(),
            source: Box::new(e),
        })?;

        let mut migrated: Vec<Box<dyn ServiceInstance + 'dst>> =
            Vec::with_capacity(instances.len());
        for instance in instances {
            match instance.migrate(dst, options) {
                Ok(relocated) => migrated.push(relocated),
                Err(mut e) => {
                    e.migrated = migrated.iter().map(|done| done.identity()).collect();
                    return Err(e);
                }
            }
        }
        Ok(migrated)
    }
}
