//! Library entry for the `fleetshift` operator.
//!
//! Exposes `inner_main` so the workspace-level shim binary can call into the operator logic,
//! and the service layer (registry, controllers, instances) for use as a library.
#![cfg_attr(
    test,
    expect(
        clippy::unwrap_used,
        clippy::indexing_slicing,
        reason = "Tests may panic on unexpected results"
    )
)]

extern crate alloc;
extern crate core;

pub mod cli;
pub mod config;
mod error;
pub mod fleet;
pub mod inventory;
pub mod options;
pub mod service;

pub use error::{MigrateError, MigrateStage, Ownership, Owners, ServiceError};
pub use fleet::Fleet;
pub use inventory::Inventory;

use alloc::collections::BTreeMap;
use std::env;
use std::sync::Once;

use eyre::{Result, WrapErr as _};
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, fmt::time::ChronoLocal};

use cli::{Cli, Command, LogFormat};
use service::{MigrateOptions, Verbosity};

static INIT_TRACING: Once = Once::new();

fn init_tracing(format: LogFormat, debug: bool) {
    INIT_TRACING.call_once(move || {
        let default_level = if debug { "debug" } else { "warn" };

        let builder = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
            )
            .with_timer(ChronoLocal::rfc_3339())
            .with_writer(std::io::stderr);

        match format {
            LogFormat::Compact => builder.compact().init(),
            LogFormat::Json => builder.json().init(),
            LogFormat::Pretty => builder.pretty().init(),
        }
    });
}

/// The operator's main function; called from the shim binary.
///
/// # Errors
///
/// Returns an error if the config cannot be loaded or the command fails.
pub fn inner_main(invocation: Cli) -> Result<()> {
    init_tracing(invocation.log_format, invocation.debug);

    let config_path = match invocation.config {
        Some(path) => path,
        None => config::default_path()?,
    };
    debug!(config = %config_path.display(), version = env!("CARGO_PKG_VERSION"), "starting");
    let fleet = Fleet::from_config(config::load(&config_path)?);

    match invocation.command {
        Command::Hosts => {
            for host in fleet.inventory() {
                let place = if host.is_local() { "local" } else { "remote" };
                let node = host
                    .local_node()
                    .map_or_else(|| "-".to_owned(), |n| n.to_string());
                println!("{}\t{}\t{place}\tnode {node}", host.hostname(), host.user());
            }
        }
        Command::Status {
            service,
            host,
            verbose,
        } => {
            let verbosity = if verbose {
                Verbosity::Verbose
            } else {
                Verbosity::Terse
            };
            let report: BTreeMap<String, Vec<String>> = match host {
                Some(host) => {
                    let lines = fleet.service(&host, &service)?.status(verbosity)?;
                    [(host, lines)].into_iter().collect()
                }
                None => fleet.status_all(&service, verbosity)?,
            };
            for (host, lines) in report {
                println!("{host}:");
                for line in lines {
                    println!("  {}", line.trim_end());
                }
            }
        }
        Command::Start(args) => {
            fleet
                .instance(&args.host, &args.service, &args.overrides())?
                .start()
                .wrap_err(format!("Failed to start {} on {}", args.service, args.host))?;
        }
        Command::Stop(args) => {
            fleet
                .instance(&args.host, &args.service, &args.overrides())?
                .stop()
                .wrap_err(format!("Failed to stop {} on {}", args.service, args.host))?;
        }
        Command::Restart(args) => {
            fleet
                .instance(&args.host, &args.service, &args.overrides())?
                .restart()
                .wrap_err(format!("Failed to restart {} on {}", args.service, args.host))?;
        }
        Command::Migrate(args) => {
            let options = MigrateOptions {
                buckets: args.buckets.clone(),
            };
            let migrated = if args.ip.is_some() {
                let overrides = args.overrides();
                vec![fleet.migrate(&args.service, &args.from, &args.to, &overrides, &options)?]
            } else {
                fleet.migrate_all(&args.service, &args.from, &args.to, &options)?
            };
            for instance in &migrated {
                println!("{}: now on {}", instance.identity(), instance.host());
            }
            info!(count = migrated.len(), "migration done");
        }
        Command::Responsibility {
            host,
            ip,
            apply,
            options,
        } => {
            let instance = fleet.clusterip(&host, &cli::with_ip(options.to_options(), Some(ip)))?;
            instance.set_responsibility(&apply)?;
            let buckets: Vec<String> = instance
                .responsibility()?
                .iter()
                .map(ToString::to_string)
                .collect();
            println!("{ip}: {}", buckets.join(","));
        }
        Command::Exec { host, command } => {
            let command = command.join(" ");
            if let Some(output) = fleet.host(&host)?.run(&command)? {
                println!("{output}");
            }
        }
    }
    Ok(())
}
