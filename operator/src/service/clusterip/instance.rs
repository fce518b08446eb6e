//! One shared IP on one host: its firewall rule, its interface address and its buckets.

use alloc::collections::BTreeSet;
use core::net::Ipv4Addr;

use fleetshift_common::{ExecError, Host};
use regex::Regex;
use tracing::{debug, info, warn};

use super::SERVICE_NAME;
use super::commands::{self, Rule};
use super::options::Settings;
use crate::error::{MigrateError, MigrateStage, ServiceError};
use crate::options::Options;
use crate::service::{MigrateOptions, ServiceInstance, Verbosity};

const RUNNING: &str = "running";
const NOT_RUNNING: &str = "not running";

/// A cluster-IP instance, identified by its shared IP.
#[derive(Debug)]
pub struct ClusterIpInstance<'host> {
    host: &'host Host,
    options: Options,
    settings: Settings,
    ip: Ipv4Addr,
}

impl<'host> ClusterIpInstance<'host> {
    /// Validates `options` (which must contain `ip`) for `host`. Nothing is executed.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid options or a missing `ip`.
    pub fn new(host: &'host Host, options: Options) -> Result<Self, ServiceError> {
        let settings = Settings::from_options(&options, host)?;
        let ip = settings.ip()?;
        Ok(Self {
            host,
            options,
            settings,
            ip,
        })
    }

    #[must_use]
    pub const fn ip(&self) -> Ipv4Addr {
        self.ip
    }

    #[must_use]
    pub const fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Buckets this host currently answers for. An unreadable file is an empty set.
    ///
    /// # Errors
    ///
    /// Returns an error if the command could not be run at all.
    pub fn responsibility(&self) -> Result<BTreeSet<i32>, ServiceError> {
        let content = match self.host.run(&commands::read_responsibility(self.ip)) {
            Ok(content) => content,
            Err(ExecError::RemoteCommand { message, .. }) => {
                debug!(host = %self.host, ip = %self.ip, %message, "responsibility unreadable");
                None
            }
            Err(e) => return Err(e.into()),
        };
        Ok(content.as_deref().map(parse_buckets).unwrap_or_default())
    }

    /// Applies signed updates: `+N` claims bucket N, `-N` releases it.
    ///
    /// All updates go out as one command. An empty list sends nothing.
    ///
    /// # Errors
    ///
    /// [`ServiceError::InvalidBucket`] before anything is sent if a value is out of range,
    /// otherwise the execution error.
    #[tracing::instrument(skip(self), fields(host = %self.host, ip = %self.ip))]
    pub fn set_responsibility(&self, deltas: &[i32]) -> Result<(), ServiceError> {
        if deltas.is_empty() {
            return Ok(());
        }
        for &delta in deltas {
            self.check_bucket(delta)?;
        }
        self.host
            .run(&commands::write_responsibility(self.ip, deltas))?;
        Ok(())
    }

    fn check_bucket(&self, bucket: i32) -> Result<(), ServiceError> {
        let total_nodes = self.settings.total_nodes;
        let in_range = bucket != 0
            && total_nodes.is_none_or(|total| bucket.unsigned_abs() <= total);
        if in_range {
            Ok(())
        } else {
            Err(ServiceError::InvalidBucket {
                bucket,
                total_nodes,
            })
        }
    }

    fn rule(&self) -> Result<Rule<'_>, ServiceError> {
        Ok(Rule {
            ip: self.ip,
            interface: &self.settings.interface,
            clustermac: &self.settings.clustermac,
            hashmode: self.settings.hashmode,
            total_nodes: self.settings.total_nodes()?,
            local_node: self.settings.local_node()?,
        })
    }

    /// Same options on another host. The host-specific `local_node` is not carried over.
    fn relocated<'dst>(&self, dst: &'dst Host) -> Result<ClusterIpInstance<'dst>, ServiceError> {
        let mut options = self.options.clone();
        options.remove("local_node");
        ClusterIpInstance::new(dst, options)
    }

    fn rule_present(&self) -> Result<bool, ServiceError> {
        let node = |value: Option<u32>| value.map_or_else(|| r"\d+".to_owned(), |n| n.to_string());
        let pattern = format!(
            r"(?m)^{target}.*?\s{ip}(?:/|\s).*?total_nodes={total}\b.*?local_node={local}\b",
            target = commands::TARGET,
            ip = regex::escape(&self.ip.to_string()),
            total = node(self.settings.total_nodes),
            local = node(self.settings.local_node),
        );
        let listing = self.host.run(&commands::list_rules())?;
        Ok(listing.is_some_and(|listing| matches(&pattern, &listing)))
    }

    fn address_present(&self) -> Result<bool, ServiceError> {
        let pattern = format!(r"(?m)inet {}(?:/|\s|$)", regex::escape(&self.ip.to_string()));
        let listing = self
            .host
            .run(&commands::show_address(&self.settings.interface, self.ip))?;
        Ok(listing.is_some_and(|listing| matches(&pattern, &listing)))
    }

    fn failed(
        &self,
        dst: &Host,
        stage: MigrateStage,
        buckets: &[i32],
        source: ServiceError,
    ) -> MigrateError {
        MigrateError {
            service: SERVICE_NAME.to_owned(),
            instance: self.identity(),
            from: self.host.hostname().to_owned(),
            to: dst.hostname().to_owned(),
            stage,
            buckets: buckets.to_vec(),
            migrated: Vec::new(),
            source: Box::new(source),
        }
    }
}

impl ServiceInstance for ClusterIpInstance<'_> {
    fn service_name(&self) -> &'static str {
        SERVICE_NAME
    }

    fn host(&self) -> &Host {
        self.host
    }

    fn identity(&self) -> String {
        self.ip.to_string()
    }

    fn options(&self) -> &Options {
        &self.options
    }

    /// Inserts the rule and assigns the address, unless the instance is already running.
    #[tracing::instrument(skip(self), fields(host = %self.host, ip = %self.ip))]
    fn start(&self) -> Result<(), ServiceError> {
        if self.status(Verbosity::Terse)? == RUNNING {
            debug!("already running");
            return Ok(());
        }
        let command = self.rule()?.start();
        self.host.run(&command)?;
        info!("started");
        Ok(())
    }

    /// Deletes the rule and removes the address, whatever the current state.
    #[tracing::instrument(skip(self), fields(host = %self.host, ip = %self.ip))]
    fn stop(&self) -> Result<(), ServiceError> {
        let command = self.rule()?.stop();
        self.host.run(&command)?;
        info!("stopped");
        Ok(())
    }

    fn status(&self, verbosity: Verbosity) -> Result<String, ServiceError> {
        let verbose = verbosity == Verbosity::Verbose;
        let mut report = String::new();

        if !self.rule_present()? {
            if !verbose {
                return Ok(NOT_RUNNING.to_owned());
            }
            report.push_str("not running: iptables\n");
        }
        if !self.address_present()? {
            if !verbose {
                return Ok(NOT_RUNNING.to_owned());
            }
            report.push_str(&format!(
                "not running: {} on {}\n",
                self.ip, self.settings.interface
            ));
        }
        let responsibility = self.responsibility()?;
        if responsibility.is_empty() {
            if !verbose {
                return Ok(NOT_RUNNING.to_owned());
            }
            report.push_str("not responsible for any nodes\n");
        }

        if !report.is_empty() {
            return Ok(report);
        }
        Ok(if verbose {
            format!(
                "{RUNNING}, {}, responsible for {}",
                self.settings.interface,
                join_buckets(&responsibility)
            )
        } else {
            RUNNING.to_owned()
        })
    }

    fn relocate<'dst>(
        &self,
        dst: &'dst Host,
    ) -> Result<Box<dyn ServiceInstance + 'dst>, ServiceError> {
        Ok(Box::new(self.relocated(dst)?))
    }

    /// Moves buckets to the same IP on `dst`: the destination claims them first, then
    /// the source releases them. Without explicit buckets the whole current
    /// responsibility moves. The rule and address are left alone on both sides.
    #[tracing::instrument(skip(self, dst), fields(from = %self.host, to = %dst, ip = %self.ip))]
    fn migrate<'dst>(
        &self,
        dst: &'dst Host,
        options: &MigrateOptions,
    ) -> Result<Box<dyn ServiceInstance + 'dst>, MigrateError> {
        let relocated = self
            .relocated(dst)
            .map_err(|e| self.failed(dst, MigrateStage::Inspect, &options.buckets, e))?;

        let buckets: Vec<i32> = if options.buckets.is_empty() {
            self.responsibility()
                .map_err(|e| self.failed(dst, MigrateStage::Inspect, &[], e))?
                .into_iter()
                .collect()
        } else {
            options.buckets.clone()
        };
        if let Some(&bad) = buckets.iter().find(|&&bucket| bucket < 1) {
            let e = ServiceError::InvalidBucket {
                bucket: bad,
                total_nodes: self.settings.total_nodes,
            };
            return Err(self.failed(dst, MigrateStage::Inspect, &buckets, e));
        }
        if buckets.is_empty() {
            warn!("source is not responsible for any buckets, nothing to migrate");
            return Ok(Box::new(relocated));
        }

        relocated
            .set_responsibility(&buckets)
            .map_err(|e| self.failed(dst, MigrateStage::ClaimDestination, &buckets, e))?;
        let released: Vec<i32> = buckets.iter().map(|&bucket| -bucket).collect();
        if let Err(e) = self.set_responsibility(&released) {
            warn!(?buckets, "destination claimed the buckets but the source did not release them");
            return Err(self.failed(dst, MigrateStage::ReleaseSource, &buckets, e));
        }
        info!(?buckets, "migrated");
        Ok(Box::new(relocated))
    }
}

/// Comma-separated bucket numbers. Anything that is not a number is skipped.
fn parse_buckets(content: &str) -> BTreeSet<i32> {
    content
        .split(',')
        .filter_map(|item| item.trim().parse().ok())
        .collect()
}

fn join_buckets(buckets: &BTreeSet<i32>) -> String {
    buckets
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

fn matches(pattern: &str, haystack: &str) -> bool {
    match Regex::new(pattern) {
        Ok(re) => re.is_match(haystack),
        Err(e) => {
            warn!(%pattern, error = %e, "status pattern does not compile");
            false
        }
    }
}
