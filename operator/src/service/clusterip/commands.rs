//! Shell command lines issued by the cluster-IP service.

use core::net::Ipv4Addr;

use super::options::HashMode;

/// Pseudo-directory with one responsibility file per shared IP.
pub const PROC_DIR: &str = "/proc/net/ipt_CLUSTERIP/";

/// Firewall target name, also the marker filtered for in rule listings.
pub const TARGET: &str = "CLUSTERIP";

/// Everything the CLUSTERIP rule is parameterized with.
#[derive(Debug, Clone, Copy)]
pub struct Rule<'settings> {
    pub ip: Ipv4Addr,
    pub interface: &'settings str,
    pub clustermac: &'settings str,
    pub hashmode: HashMode,
    pub total_nodes: u32,
    pub local_node: u32,
}

impl Rule<'_> {
    fn iptables(&self, action: char) -> String {
        format!(
            "sudo iptables -{action} INPUT -d {ip} -i {interface} -j {TARGET} --new \
             --clustermac {clustermac} --hashmode {hashmode} \
             --total-nodes {total_nodes} --local-node {local_node}",
            ip = self.ip,
            interface = self.interface,
            clustermac = self.clustermac,
            hashmode = self.hashmode,
            total_nodes = self.total_nodes,
            local_node = self.local_node,
        )
    }

    /// Rule insertion and address assignment, batched.
    #[must_use]
    pub fn start(&self) -> String {
        format!(
            "{}; sudo ip address add {} dev {}",
            self.iptables('I'),
            self.ip,
            self.interface
        )
    }

    /// Rule deletion and address removal, batched.
    #[must_use]
    pub fn stop(&self) -> String {
        format!(
            "{}; sudo ip address del {} dev {}",
            self.iptables('D'),
            self.ip,
            self.interface
        )
    }
}

#[must_use]
pub fn list_instances() -> String {
    format!("ls {PROC_DIR}")
}

#[must_use]
pub fn read_responsibility(ip: Ipv4Addr) -> String {
    format!("sudo cat {PROC_DIR}{ip}")
}

/// One signed update per value, batched into a single command line.
#[must_use]
pub fn write_responsibility(ip: Ipv4Addr, deltas: &[i32]) -> String {
    deltas
        .iter()
        .map(|delta| format!("echo '{delta:+}' | sudo tee {PROC_DIR}{ip} > /dev/null"))
        .collect::<Vec<_>>()
        .join("; ")
}

#[must_use]
pub fn list_rules() -> String {
    format!("sudo iptables -L INPUT -n | grep {TARGET}")
}

#[must_use]
pub fn show_address(interface: &str, ip: Ipv4Addr) -> String {
    format!("ip address show {interface} | grep {ip}")
}

#[cfg(test)]
mod tests {
    use super::*;

    const IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 100);

    fn rule() -> Rule<'static> {
        Rule {
            ip: IP,
            interface: "eth0",
            clustermac: "01:02:03:04:05:06",
            hashmode: HashMode::SourceIp,
            total_nodes: 3,
            local_node: 1,
        }
    }

    #[test]
    fn start_and_stop_mirror_each_other() {
        assert_eq!(
            rule().start(),
            "sudo iptables -I INPUT -d 10.0.0.100 -i eth0 -j CLUSTERIP --new \
             --clustermac 01:02:03:04:05:06 --hashmode sourceip --total-nodes 3 --local-node 1; \
             sudo ip address add 10.0.0.100 dev eth0"
        );
        assert_eq!(
            rule().stop(),
            "sudo iptables -D INPUT -d 10.0.0.100 -i eth0 -j CLUSTERIP --new \
             --clustermac 01:02:03:04:05:06 --hashmode sourceip --total-nodes 3 --local-node 1; \
             sudo ip address del 10.0.0.100 dev eth0"
        );
    }

    #[test]
    fn responsibility_updates_are_signed_and_batched() {
        assert_eq!(
            write_responsibility(IP, &[1, -2]),
            "echo '+1' | sudo tee /proc/net/ipt_CLUSTERIP/10.0.0.100 > /dev/null; \
             echo '-2' | sudo tee /proc/net/ipt_CLUSTERIP/10.0.0.100 > /dev/null"
        );
    }

    #[test]
    fn inspection_commands() {
        assert_eq!(list_instances(), "ls /proc/net/ipt_CLUSTERIP/");
        assert_eq!(read_responsibility(IP), "sudo cat /proc/net/ipt_CLUSTERIP/10.0.0.100");
        assert_eq!(list_rules(), "sudo iptables -L INPUT -n | grep CLUSTERIP");
        assert_eq!(show_address("eth1", IP), "ip address show eth1 | grep 10.0.0.100");
    }
}
