//! Command-line interface definitions for the operator.

use core::net::Ipv4Addr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::options::{self, Options};
use crate::service::clusterip;

/// Top-level command-line interface definition.
#[derive(Debug, Parser)]
#[command(name = "fleetshift")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = env!("CARGO_PKG_DESCRIPTION"))]
pub struct Cli {
    /// Path to the configuration file [default: ~/.fleetshift/config.toml]
    #[arg(short, long, global = true, env = "FLEETSHIFT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Compact)]
    pub log_format: LogFormat,

    /// Log every executed command (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Compact,
    Json,
    Pretty,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// List the managed hosts.
    Hosts,

    /// Show the status of every instance, per host.
    Status {
        #[arg(long, default_value = clusterip::SERVICE_NAME)]
        service: String,
        /// Only this host
        #[arg(long)]
        host: Option<String>,
        /// One line per failed check instead of running/not running
        #[arg(short, long)]
        verbose: bool,
    },

    /// Start an instance.
    Start(InstanceArgs),

    /// Stop an instance.
    Stop(InstanceArgs),

    /// Stop, then start an instance.
    Restart(InstanceArgs),

    /// Move an instance, or its buckets, to another host.
    Migrate(MigrateArgs),

    /// Show or change the buckets a host answers for.
    Responsibility {
        #[arg(long)]
        host: String,
        #[arg(long)]
        ip: Ipv4Addr,
        /// Signed updates: +N claims bucket N, -N releases it
        #[arg(long, num_args = 1.., allow_negative_numbers = true)]
        apply: Vec<i32>,
        #[command(flatten)]
        options: OptionArgs,
    },

    /// Run a raw command on a host, prompting sudo passwords as configured.
    Exec {
        #[arg(long)]
        host: String,
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },
}

/// `-o key=value` option overrides.
#[derive(Debug, Args)]
pub struct OptionArgs {
    /// Option override, e.g. `-o interface=eth1` (repeatable)
    #[arg(short = 'o', long = "option", value_parser = options::parse_assignment)]
    pub assignments: Vec<(String, toml::Value)>,
}

impl OptionArgs {
    #[must_use]
    pub fn to_options(&self) -> Options {
        options::from_assignments(self.assignments.iter().cloned())
    }
}

/// Selects one instance on one host.
#[derive(Debug, Args)]
pub struct InstanceArgs {
    #[arg(long, default_value = clusterip::SERVICE_NAME)]
    pub service: String,
    #[arg(long)]
    pub host: String,
    /// Shared IP of a cluster-IP instance
    #[arg(long)]
    pub ip: Option<Ipv4Addr>,
    #[command(flatten)]
    pub options: OptionArgs,
}

impl InstanceArgs {
    /// The `-o` options, with `--ip` on top.
    #[must_use]
    pub fn overrides(&self) -> Options {
        with_ip(self.options.to_options(), self.ip)
    }
}

#[derive(Debug, Args)]
pub struct MigrateArgs {
    #[arg(long, default_value = clusterip::SERVICE_NAME)]
    pub service: String,
    #[arg(long)]
    pub from: String,
    #[arg(long)]
    pub to: String,
    /// Only this instance; all instances on the source otherwise
    #[arg(long)]
    pub ip: Option<Ipv4Addr>,
    /// Bucket to move (repeatable); everything the source owns otherwise
    #[arg(long = "bucket")]
    pub buckets: Vec<i32>,
    #[command(flatten)]
    pub options: OptionArgs,
}

impl MigrateArgs {
    #[must_use]
    pub fn overrides(&self) -> Options {
        with_ip(self.options.to_options(), self.ip)
    }
}

/// Adds `ip` to an option layer.
#[must_use]
pub fn with_ip(mut options: Options, ip: Option<Ipv4Addr>) -> Options {
    if let Some(ip) = ip {
        options.insert("ip".to_owned(), ip.to_string().into());
    }
    options
}
