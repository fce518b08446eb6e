//! Errors of the service layer.

use core::fmt;

use fleetshift_common::ExecError;
use thiserror::Error as ThisError;

/// Errors returned by service lookups and service operations.
#[derive(Debug, ThisError)]
pub enum ServiceError {
    #[error("unknown service type '{0}'")]
    UnknownServiceType(String),
    #[error("no host named '{0}' in the inventory")]
    UnknownHost(String),
    #[error("invalid options for {service}: {reason}")]
    InvalidOptions { service: String, reason: String },
    #[error("{service} needs the '{option}' option")]
    MissingOption {
        service: String,
        option: &'static str,
    },
    #[error(
        "bucket {bucket} is out of range{}",
        .total_nodes.map(|n| format!(" (1..={n})")).unwrap_or_default()
    )]
    InvalidBucket {
        bucket: i32,
        total_nodes: Option<u32>,
    },
    #[error(transparent)]
    Exec(#[from] ExecError),
    #[error(transparent)]
    Migrate(#[from] Box<MigrateError>),
}

/// Step of a migration that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrateStage {
    /// Working out what to migrate. Nothing was changed yet.
    Inspect,
    /// Stopping the instance on the source host.
    StopSource,
    /// Starting the instance on the destination host, after the source was stopped.
    StartDestination,
    /// Adding the buckets to the destination's responsibility.
    ClaimDestination,
    /// Removing the buckets from the source's responsibility, after the destination claimed them.
    ReleaseSource,
}

impl fmt::Display for MigrateStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match *self {
            Self::Inspect => "inspecting the source",
            Self::StopSource => "stopping on the source",
            Self::StartDestination => "starting on the destination",
            Self::ClaimDestination => "claiming on the destination",
            Self::ReleaseSource => "releasing on the source",
        })
    }
}

/// Whether one side holds the responsibility being migrated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    Owns,
    DoesNotOwn,
    /// A batched command failed midway, the host has to be inspected.
    Unknown,
}

impl fmt::Display for Ownership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match *self {
            Self::Owns => "owns it",
            Self::DoesNotOwn => "does not own it",
            Self::Unknown => "unknown, inspect the host",
        })
    }
}

/// Ownership of the affected responsibility on both sides of a failed migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Owners {
    pub source: Ownership,
    pub destination: Ownership,
}

/// A migration that stopped partway.
///
/// Migrations are not transactional and nothing is rolled back. The error says which
/// step failed and what that means for ownership, so the operator can retry or repair.
#[derive(Debug)]
pub struct MigrateError {
    pub service: String,
    /// Identity of the instance being migrated.
    pub instance: String,
    pub from: String,
    pub to: String,
    pub stage: MigrateStage,
    /// Buckets that were being moved, empty for whole-instance migrations.
    pub buckets: Vec<i32>,
    /// Instances of the same controller run that had already been migrated.
    pub migrated: Vec<String>,
    pub source: Box<ServiceError>,
}

impl fmt::Display for MigrateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let owners = self.owners();
        write!(
            f,
            "migrating {} {} from {} to {} failed while {} (source {}, destination {})",
            self.service,
            self.instance,
            self.from,
            self.to,
            self.stage,
            owners.source,
            owners.destination
        )
    }
}

impl core::error::Error for MigrateError {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        Some(&*self.source)
    }
}

impl MigrateError {
    /// Who holds the responsibility now, derived from the failed stage.
    #[must_use]
    pub const fn owners(&self) -> Owners {
        use Ownership as O;
        let (source, destination) = match self.stage {
            MigrateStage::Inspect => (O::Owns, O::DoesNotOwn),
            MigrateStage::StopSource => (O::Unknown, O::DoesNotOwn),
            MigrateStage::StartDestination => (O::DoesNotOwn, O::Unknown),
            MigrateStage::ClaimDestination => (O::Owns, O::Unknown),
            MigrateStage::ReleaseSource => (O::Unknown, O::Owns),
        };
        Owners {
            source,
            destination,
        }
    }

    /// Every stage can be retried once the cause is fixed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        true
    }
}
