use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::errors::{self, Result};

/// Source of traffic allowed by an ingress rule.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Source {
    Cidr(String),
    /// Peer security group, by ID.
    Group(String),
}

/// One ingress permission: a protocol, a port range,
/// and the sources allowed to reach it.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SecurityGroupRule {
    pub ip_protocol: String,
    pub from_port: i32,
    pub to_port: i32,
    pub sources: Vec<Source>,
}

impl SecurityGroupRule {
    pub fn cidrs(&self) -> Vec<&str> {
        self.sources
            .iter()
            .filter_map(|s| match s {
                Source::Cidr(c) => Some(c.as_str()),
                Source::Group(_) => None,
            })
            .collect()
    }

    pub fn groups(&self) -> Vec<&str> {
        self.sources
            .iter()
            .filter_map(|s| match s {
                Source::Group(g) => Some(g.as_str()),
                Source::Cidr(_) => None,
            })
            .collect()
    }
}

/// Operator-supplied ingress allow-list.
#[derive(Debug, Serialize, Deserialize, Eq, PartialEq, Clone)]
#[serde(rename_all = "snake_case")]
pub struct Ingress {
    /// TCP ports to open.
    #[serde(default)]
    pub ports: Vec<i32>,
    /// IPv4 CIDR blocks allowed on every port.
    #[serde(default)]
    pub cidrs: Vec<String>,
    /// Peer security group IDs allowed on every port.
    #[serde(default)]
    pub peer_groups: Vec<String>,
}

impl Ingress {
    /// Returns one TCP rule per port. Every rule allows the
    /// configured CIDRs, the network's own CIDR and the peer groups.
    pub fn rules(&self, network_cidr: &str) -> Vec<SecurityGroupRule> {
        let mut sources: Vec<Source> = Vec::new();
        for cidr in self.cidrs.iter().map(String::as_str).chain([network_cidr]) {
            let src = Source::Cidr(cidr.to_string());
            if !sources.contains(&src) {
                sources.push(src);
            }
        }
        for g in self.peer_groups.iter() {
            sources.push(Source::Group(g.clone()));
        }

        let mut rules: Vec<SecurityGroupRule> = Vec::new();
        for port in self.ports.iter() {
            if rules.iter().any(|r| r.from_port == *port) {
                continue;
            }
            rules.push(SecurityGroupRule {
                ip_protocol: String::from("tcp"),
                from_port: *port,
                to_port: *port,
                sources: sources.clone(),
            });
        }
        rules
    }

    pub fn validate(&self) -> Result<()> {
        if self.ports.is_empty() {
            return Err(errors::config("'ingress.ports' cannot be empty"));
        }
        for p in self.ports.iter() {
            if !(1..=65535).contains(p) {
                return Err(errors::config(format!(
                    "'ingress.ports' {} out of range [1, 65535]",
                    p
                )));
            }
        }
        for c in self.cidrs.iter() {
            validate_cidr(c)?;
        }
        for g in self.peer_groups.iter() {
            if !g.starts_with("sg-") {
                return Err(errors::config(format!(
                    "'ingress.peer_groups' entry '{}' is not a security group ID",
                    g
                )));
            }
        }
        Ok(())
    }
}

/// Checks the "a.b.c.d/n" IPv4 CIDR notation.
pub fn validate_cidr(cidr: &str) -> Result<()> {
    let (ip, prefix) = cidr
        .split_once('/')
        .ok_or_else(|| errors::config(format!("invalid CIDR '{}' (missing prefix)", cidr)))?;
    ip.parse::<Ipv4Addr>()
        .map_err(|e| errors::config(format!("invalid CIDR '{}' ({})", cidr, e)))?;
    match prefix.parse::<u8>() {
        Ok(n) if n <= 32 => Ok(()),
        _ => Err(errors::config(format!(
            "invalid CIDR '{}' (prefix must be 0-32)",
            cidr
        ))),
    }
}

/// RUST_LOG=debug cargo test --package spyup-aws --lib -- ingress::test_rules --exact --show-output
#[test]
fn test_rules() {
    let _ = env_logger::builder().is_test(true).try_init();

    let ingress = Ingress {
        ports: vec![22, 8081],
        cidrs: vec![String::from("1.2.3.4/32")],
        peer_groups: Vec::new(),
    };
    let rules = ingress.rules("10.42.0.0/16");
    assert_eq!(rules.len(), 2);
    assert_eq!(rules[0].from_port, 22);
    assert_eq!(rules[0].to_port, 22);
    assert_eq!(rules[1].from_port, 8081);
    for r in rules.iter() {
        assert_eq!(r.ip_protocol, "tcp");
        assert_eq!(r.cidrs(), vec!["1.2.3.4/32", "10.42.0.0/16"]);
        assert!(r.groups().is_empty());
    }
}

#[test]
fn test_rules_subnet_only_and_peers() {
    let ingress = Ingress {
        ports: vec![9090, 9090],
        cidrs: vec![String::from("10.42.0.0/16")],
        peer_groups: vec![String::from("sg-peer")],
    };
    let rules = ingress.rules("10.42.0.0/16");
    assert_eq!(rules.len(), 1);
    assert_eq!(
        rules[0].sources,
        vec![
            Source::Cidr(String::from("10.42.0.0/16")),
            Source::Group(String::from("sg-peer")),
        ]
    );
}

#[test]
fn test_validate() {
    let mut ingress = Ingress {
        ports: vec![22],
        cidrs: vec![String::from("1.2.3.4/32")],
        peer_groups: Vec::new(),
    };
    assert!(ingress.validate().is_ok());

    ingress.cidrs.push(String::from("1.2.3.4"));
    assert!(ingress.validate().unwrap_err().is_config());
    ingress.cidrs = vec![String::from("1.2.3.4/33")];
    assert!(ingress.validate().is_err());

    ingress.cidrs.clear();
    ingress.ports = vec![0];
    assert!(ingress.validate().is_err());
    ingress.ports.clear();
    assert!(ingress.validate().is_err());
}
