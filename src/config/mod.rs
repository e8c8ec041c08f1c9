//! Router configuration
//!
//! A TOML file names the interfaces and points at the route table, which
//! is a plain text file with one route per line:
//!
//! ```text
//! # prefix mask next_hop if_id
//! 10.0.0.0 255.0.0.0 192.168.1.254 0
//! 192.168.1.0 255.255.255.0 0.0.0.0 0
//! ```
//!
//! A next hop of 0.0.0.0 marks a directly connected network.

use crate::dataplane::RouteEntry;
use crate::protocol::MacAddr;
use crate::{Error, Result};
use serde::Deserialize;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

/// Top-level configuration (config.toml)
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Path to the route table file
    pub routes: PathBuf,
    #[serde(rename = "interface")]
    pub interfaces: Vec<InterfaceConfig>,
    #[serde(default)]
    pub log: LogSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InterfaceConfig {
    pub name: String,
    /// Address in CIDR notation, e.g. "192.168.1.1/24"
    pub address: String,
    /// MAC address; read from /sys/class/net/<name>/address when omitted
    pub mac: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogSection {
    pub level: String,
    pub format: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// A validated interface definition
#[derive(Debug, Clone)]
pub struct ParsedInterface {
    pub name: String,
    pub ip: Ipv4Addr,
    pub prefix_len: u8,
    pub mac: Option<MacAddr>,
}

/// Load and parse the TOML configuration
pub fn load(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content).map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
}

impl Config {
    /// Validate the interface definitions
    pub fn parse_interfaces(&self) -> Result<Vec<ParsedInterface>> {
        if self.interfaces.is_empty() {
            return Err(Error::Config("no interfaces configured".into()));
        }

        self.interfaces
            .iter()
            .map(|iface| {
                let (ip, prefix_len) = parse_cidr(&iface.address)?;
                let mac = iface
                    .mac
                    .as_deref()
                    .map(|s| {
                        s.parse::<MacAddr>().map_err(|e| {
                            Error::Config(format!("interface {}: {}", iface.name, e))
                        })
                    })
                    .transpose()?;
                Ok(ParsedInterface {
                    name: iface.name.clone(),
                    ip,
                    prefix_len,
                    mac,
                })
            })
            .collect()
    }
}

/// Parse an "a.b.c.d/len" address
pub fn parse_cidr(cidr: &str) -> Result<(Ipv4Addr, u8)> {
    let (addr, len) = cidr
        .split_once('/')
        .ok_or_else(|| Error::Config(format!("invalid CIDR: {}", cidr)))?;
    let ip: Ipv4Addr = addr
        .parse()
        .map_err(|_| Error::Config(format!("invalid address: {}", addr)))?;
    let prefix_len: u8 = len
        .parse()
        .map_err(|_| Error::Config(format!("invalid prefix length: {}", len)))?;
    if prefix_len > 32 {
        return Err(Error::Config(format!("invalid prefix length: {}", len)));
    }
    Ok((ip, prefix_len))
}

/// Load the route table file
pub fn load_routes(path: &Path) -> Result<Vec<RouteEntry>> {
    let content = std::fs::read_to_string(path)?;
    let mut entries = Vec::new();

    for (lineno, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 4 {
            return Err(Error::RouteTable(format!(
                "{}:{}: expected 'prefix mask next_hop if_id'",
                path.display(),
                lineno + 1
            )));
        }

        let parse_addr = |s: &str, what: &str| -> Result<Ipv4Addr> {
            s.parse().map_err(|_| {
                Error::RouteTable(format!(
                    "{}:{}: invalid {}: {}",
                    path.display(),
                    lineno + 1,
                    what,
                    s
                ))
            })
        };

        let prefix = parse_addr(fields[0], "prefix")?;
        let mask = parse_addr(fields[1], "mask")?;
        let next_hop = parse_addr(fields[2], "next hop")?;
        let if_id = fields[3].parse().map_err(|_| {
            Error::RouteTable(format!(
                "{}:{}: invalid interface id: {}",
                path.display(),
                lineno + 1,
                fields[3]
            ))
        })?;

        entries.push(RouteEntry {
            prefix,
            mask,
            next_hop,
            if_id,
        });
    }

    Ok(entries)
}

/// Read an interface's MAC from sysfs
pub fn read_interface_mac(name: &str) -> Result<MacAddr> {
    let path = format!("/sys/class/net/{}/address", name);
    let content = std::fs::read_to_string(&path).map_err(|_| Error::InterfaceNotFound {
        name: name.to_string(),
    })?;
    content
        .trim()
        .parse()
        .map_err(|e| Error::Config(format!("{}: {}", path, e)))
}
