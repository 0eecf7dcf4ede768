//! Configuration types for the socktun router

use std::path::{Path, PathBuf};

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Main configuration structure
///
/// One TUN device, one input route accepting packets from peers, and any
/// number of output routes dispatching packets read from the device.
/// Unknown keys are rejected so typos fail loudly at startup.
///
/// # Example Configuration
///
/// ```toml
/// [tun]
/// name = "socktun0"
///
/// [input]
/// filter = "10.0.0.0/24"
/// sock = "/run/socktun/input.sock"
///
/// [[output]]
/// filter = "10.0.1.0/24"
/// sock = "/run/peer-a.sock"
///
/// [[output]]
/// filter = "10.0.2.0/24"
/// sock = "/run/peer-b.sock"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// TUN device settings
    pub tun: TunSection,

    /// Listening side: peers connect here to inject packets
    pub input: InputRoute,

    /// Dialing side, matched in order against each packet's destination
    #[serde(default)]
    pub output: Vec<OutputRoute>,

    /// Writer queue tuning
    #[serde(default)]
    pub writer: WriterConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.tun.validate()?;

        self.input.filter_net()?;
        check_sock("input", &self.input.sock)?;

        for (i, route) in self.output.iter().enumerate() {
            route.filter_net()?;
            check_sock(&format!("output[{}]", i), &route.sock)?;
        }

        Ok(())
    }

    /// Source range accepted on the input socket
    pub fn input_filter(&self) -> Result<Ipv4Net> {
        self.input.filter_net()
    }

    /// Generate a sample configuration
    pub fn sample() -> String {
        r#"# socktun configuration

# TUN device the router reads from and writes to
[tun]
# Interface name (required)
name = "socktun0"

# MTU applied when the device is created (optional, OS default otherwise)
# mtu = 1500

# IPv4 address assigned to the device (optional)
# Leave unset when the host's network setup configures the interface.
# address = "10.0.0.1/24"

# Input route: peers connect to this socket and send raw IPv4 packets.
# Packets whose SOURCE address falls outside `filter` are discarded.
[input]
filter = "10.0.0.0/24"
sock = "/run/socktun/input.sock"

# Output routes: packets read from the device are sent to the first route
# whose `filter` contains their DESTINATION address. The router connects to
# each peer socket on demand and reconnects after failures.
[[output]]
filter = "10.0.1.0/24"
sock = "/run/socktun/peer-a.sock"

[[output]]
filter = "10.0.2.0/24"
sock = "/run/socktun/peer-b.sock"

# Writer queues (optional)
# Packets queued per connection before new ones are dropped.
# Defaults to 4 x the number of CPUs; values below 4 are raised to 4.
# [writer]
# queue_capacity = 64
"#
        .to_string()
    }
}

/// TUN device settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TunSection {
    /// Interface name
    pub name: String,

    /// MTU applied at creation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u16>,

    /// IPv4 address with prefix, e.g. "10.0.0.1/24"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl TunSection {
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::Config("tun.name is required".into()));
        }
        // Name length, MTU floor and address shape are the device's rules
        self.to_tun_config()?;
        Ok(())
    }

    /// Parsed interface address, keeping the host part
    pub fn address_net(&self) -> Result<Option<Ipv4Net>> {
        match self.address.as_deref() {
            None => Ok(None),
            Some(s) => s
                .parse::<Ipv4Net>()
                .map(Some)
                .map_err(|e| Error::Config(format!("invalid tun.address '{}': {}", s, e))),
        }
    }

    /// Device configuration for [`sock_tun::TunDevice::create`]
    pub fn to_tun_config(&self) -> Result<sock_tun::TunConfig> {
        let mut builder = sock_tun::TunConfig::builder().name(&self.name);
        if let Some(net) = self.address_net()? {
            builder = builder.address(net);
        }
        if let Some(mtu) = self.mtu {
            builder = builder.mtu(mtu);
        }
        Ok(builder.build()?)
    }
}

/// Listening socket and the source range it accepts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputRoute {
    /// Allowed source CIDR
    pub filter: String,
    /// Unix socket path to listen on
    pub sock: PathBuf,
}

impl InputRoute {
    /// Parsed source filter with host bits cleared
    pub fn filter_net(&self) -> Result<Ipv4Net> {
        parse_filter("input.filter", &self.filter)
    }
}

/// Destination range served by one peer socket
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputRoute {
    /// Destination CIDR
    pub filter: String,
    /// Unix socket path of the peer
    pub sock: PathBuf,
}

impl OutputRoute {
    /// Parsed destination filter with host bits cleared
    pub fn filter_net(&self) -> Result<Ipv4Net> {
        parse_filter("output.filter", &self.filter)
    }
}

/// Writer queue tuning
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WriterConfig {
    /// Explicit queue size for every writer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_capacity: Option<usize>,
}

fn parse_filter(field: &str, value: &str) -> Result<Ipv4Net> {
    if value.is_empty() {
        return Err(Error::Config(format!("{} is required", field)));
    }
    let net: Ipv4Net = value
        .parse()
        .map_err(|e| Error::Config(format!("invalid {} '{}': {}", field, value, e)))?;
    Ok(net.trunc())
}

fn check_sock(field: &str, sock: &Path) -> Result<()> {
    if sock.as_os_str().is_empty() {
        return Err(Error::Config(format!("{}.sock is required", field)));
    }
    Ok(())
}
