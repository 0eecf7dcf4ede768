//! TUN device settings

use ipnet::Ipv4Net;

use crate::error::{Error, Result};

/// Longest interface name the kernel accepts (IFNAMSIZ minus the NUL)
pub const MAX_NAME_LEN: usize = 15;

/// Smallest MTU an IPv4 interface may carry
pub const MIN_MTU: u16 = 68;

/// What to ask the kernel for when opening the interface
///
/// Usually only the name is set: the router moves raw packets and leaves
/// addressing to whoever owns the host's network setup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TunConfig {
    /// Kernel-chosen when absent
    pub name: Option<String>,
    /// Interface address with its prefix, e.g. `10.0.0.1/24`
    pub address: Option<Ipv4Net>,
    pub mtu: Option<u16>,
}

impl TunConfig {
    pub fn builder() -> TunConfigBuilder {
        TunConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(name) = &self.name {
            check_name(name)?;
        }
        if let Some(address) = &self.address {
            check_address(address)?;
        }
        if let Some(mtu) = self.mtu {
            check_mtu(mtu)?;
        }
        Ok(())
    }
}

fn check_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidConfig("interface name is empty".into()));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(Error::InvalidConfig(format!(
            "interface name '{}' exceeds {} bytes",
            name, MAX_NAME_LEN
        )));
    }
    if name.contains(['/', ' ']) {
        return Err(Error::InvalidConfig(format!(
            "interface name '{}' contains '/' or whitespace",
            name
        )));
    }
    Ok(())
}

// /31 and /32 have no network address to collide with
fn check_address(address: &Ipv4Net) -> Result<()> {
    if address.prefix_len() < 31 && address.addr() == address.network() {
        return Err(Error::InvalidConfig(format!(
            "{} is a network address, not a host address",
            address
        )));
    }
    Ok(())
}

fn check_mtu(mtu: u16) -> Result<()> {
    if mtu < MIN_MTU {
        return Err(Error::InvalidConfig(format!(
            "MTU {} is below the IPv4 minimum of {}",
            mtu, MIN_MTU
        )));
    }
    Ok(())
}

/// Builder for [`TunConfig`]; `build` validates
#[derive(Debug, Default)]
pub struct TunConfigBuilder {
    config: TunConfig,
}

impl TunConfigBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = Some(name.into());
        self
    }

    pub fn address(mut self, address: Ipv4Net) -> Self {
        self.config.address = Some(address);
        self
    }

    pub fn mtu(mut self, mtu: u16) -> Self {
        self.config.mtu = Some(mtu);
        self
    }

    pub fn build(self) -> Result<TunConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
