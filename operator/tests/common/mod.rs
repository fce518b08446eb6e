//! In-memory stand-in for the kernel state the cluster-IP service manipulates.
//!
//! It interprets the exact command lines the service sends, so tests can check the
//! effect of operations rather than only the strings.
#![allow(dead_code, reason = "Not every test binary uses every helper")]

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use fleetshift_common::mock::MockExecutor;
use fleetshift_common::{ExecError, Host, HostSpec};

const PROC_DIR: &str = "/proc/net/ipt_CLUSTERIP/";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub interface: String,
    pub clustermac: String,
    pub hashmode: String,
    pub total_nodes: u32,
    pub local_node: u32,
}

/// Firewall rules, interface addresses and responsibility files of one host.
#[derive(Debug, Default)]
pub struct Kernel {
    pub rules: BTreeMap<String, Rule>,
    /// `(interface, ip)` pairs.
    pub addresses: BTreeSet<(String, String)>,
    pub responsibility: BTreeMap<String, BTreeSet<i32>>,
    /// Commands containing this text fail with an error on the error stream.
    pub fail_on: Option<String>,
}

impl Kernel {
    /// A host already running `ip` on `eth0`, responsible for `buckets`.
    pub fn running(ip: &str, total_nodes: u32, local_node: u32, buckets: &[i32]) -> Self {
        let mut kernel = Self::default();
        kernel.rules.insert(
            ip.to_owned(),
            Rule {
                interface: "eth0".to_owned(),
                clustermac: "01:02:03:04:05:06".to_owned(),
                hashmode: "sourceip".to_owned(),
                total_nodes,
                local_node,
            },
        );
        kernel.addresses.insert(("eth0".to_owned(), ip.to_owned()));
        kernel
            .responsibility
            .insert(ip.to_owned(), buckets.iter().copied().collect());
        kernel
    }

    fn run(&mut self, line: &str) -> Result<Option<String>, ExecError> {
        if let Some(ref needle) = self.fail_on {
            if line.contains(needle.as_str()) {
                return Err(ExecError::RemoteCommand {
                    host: "fake".to_owned(),
                    message: format!("sudo: {needle}: command failed"),
                });
            }
        }
        let mut output = Vec::new();
        for command in line.split("; ") {
            if let Some(text) = self.run_one(command) {
                output.push(text);
            }
        }
        Ok((!output.is_empty()).then(|| output.join("\n")))
    }

    fn run_one(&mut self, command: &str) -> Option<String> {
        let words: Vec<&str> = command.split_whitespace().collect();
        match words.as_slice() {
            ["ls", dir] if *dir == PROC_DIR => {
                if self.responsibility.is_empty() {
                    Some(format!("ls: cannot access '{PROC_DIR}': No such file or directory"))
                } else {
                    Some(self.responsibility.keys().cloned().collect::<Vec<_>>().join("  "))
                }
            }
            ["sudo", "cat", path] => {
                let ip = path.strip_prefix(PROC_DIR)?;
                match self.responsibility.get(ip) {
                    None => Some(format!("cat: {path}: No such file or directory")),
                    Some(buckets) if buckets.is_empty() => None,
                    Some(buckets) => Some(
                        buckets
                            .iter()
                            .map(ToString::to_string)
                            .collect::<Vec<_>>()
                            .join(","),
                    ),
                }
            }
            ["echo", delta, "|", "sudo", "tee", path, ">", "/dev/null"] => {
                let ip = path.strip_prefix(PROC_DIR)?;
                let delta: i32 = delta.trim_matches('\'').parse().ok()?;
                let Some(buckets) = self.responsibility.get_mut(ip) else {
                    return Some(format!("tee: {path}: No such file or directory"));
                };
                if delta > 0 {
                    buckets.insert(delta);
                } else {
                    buckets.remove(&-delta);
                }
                None
            }
            [
                "sudo", "iptables", action, "INPUT", "-d", ip, "-i", interface, "-j", "CLUSTERIP",
                "--new", "--clustermac", clustermac, "--hashmode", hashmode, "--total-nodes",
                total_nodes, "--local-node", local_node,
            ] => {
                let rule = Rule {
                    interface: (*interface).to_owned(),
                    clustermac: (*clustermac).to_owned(),
                    hashmode: (*hashmode).to_owned(),
                    total_nodes: total_nodes.parse().ok()?,
                    local_node: local_node.parse().ok()?,
                };
                match *action {
                    "-I" => {
                        let own = i32::try_from(rule.local_node).ok()?;
                        self.responsibility
                            .insert((*ip).to_owned(), BTreeSet::from([own]));
                        self.rules.insert((*ip).to_owned(), rule);
                        None
                    }
                    "-D" if self.rules.get(*ip) == Some(&rule) => {
                        self.rules.remove(*ip);
                        self.responsibility.remove(*ip);
                        None
                    }
                    _ => Some("iptables: No chain/target/match by that name.".to_owned()),
                }
            }
            ["sudo", "iptables", "-L", "INPUT", "-n", "|", "grep", "CLUSTERIP"] => {
                let lines: Vec<String> = self
                    .rules
                    .iter()
                    .map(|(ip, rule)| {
                        format!(
                            "CLUSTERIP  all  --  0.0.0.0/0            {ip}            \
                             CLUSTERIP hashmode={} clustermac={} \
                             total_nodes={} local_node={} hash_init=0",
                            rule.hashmode, rule.clustermac, rule.total_nodes, rule.local_node
                        )
                    })
                    .collect();
                (!lines.is_empty()).then(|| lines.join("\n"))
            }
            ["sudo", "ip", "address", verb, ip, "dev", interface] => {
                let key = ((*interface).to_owned(), (*ip).to_owned());
                match *verb {
                    "add" => {
                        self.addresses.insert(key);
                    }
                    "del" => {
                        self.addresses.remove(&key);
                    }
                    _ => return Some(format!("unknown verb {verb}")),
                }
                None
            }
            ["ip", "address", "show", interface, "|", "grep", ip] => self
                .addresses
                .contains(&((*interface).to_owned(), (*ip).to_owned()))
                .then(|| format!("    inet {ip}/32 scope global {interface}")),
            _ => Some(format!("sh: unknown command: {command}")),
        }
    }
}

/// A host whose commands act on `kernel`.
pub fn host(name: &str, local_node: u32, kernel: &Rc<RefCell<Kernel>>) -> Host {
    let kernel = Rc::clone(kernel);
    Host::with_executor(
        HostSpec::parse(&format!("root@{name}"), None).with_local_node(Some(local_node)),
        MockExecutor::with_responder(move |command| kernel.borrow_mut().run(command)),
    )
}

pub fn shared(kernel: Kernel) -> Rc<RefCell<Kernel>> {
    Rc::new(RefCell::new(kernel))
}
