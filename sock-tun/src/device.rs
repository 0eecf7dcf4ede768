//! Async TUN device
//!
//! Wraps a `tun-rs` async device and exposes it to the router as a
//! [`TunTransport`]. One read yields one IP datagram.
//!
//! ```rust,ignore
//! let config = TunConfig::builder().name("socktun0").build()?;
//! let device = Arc::new(TunDevice::create(config).await?);
//!
//! let mut buf = vec![0u8; 65536];
//! let n = device.read(&mut buf).await?;
//! ```

use async_trait::async_trait;
use sock_packet::transport::{TunInfo, TunTransport};

use crate::config::TunConfig;
use crate::error::{Error, Result};

/// An open TUN interface
///
/// `read` and `write` take `&self`, so one device shared behind an `Arc`
/// can be read by the output loop while the input side writes to it.
pub struct TunDevice {
    device: tun_rs::AsyncDevice,
    info: TunInfo,
}

impl TunDevice {
    /// Open the interface described by `config`.
    ///
    /// Needs root or `CAP_NET_ADMIN`; on Linux the `/dev/net/tun` node must
    /// exist. The kernel picks a name when none is configured.
    pub async fn create(config: TunConfig) -> Result<Self> {
        config.validate()?;

        #[cfg(target_os = "linux")]
        {
            crate::linux::check_clone_device()?;
        }

        let requested = config.name.clone();
        let open_err = |source| Error::Open {
            name: requested.clone(),
            source,
        };

        let mut builder = tun_rs::DeviceBuilder::new();
        if let Some(name) = &config.name {
            builder = builder.name(name);
        }
        if let Some(address) = config.address {
            builder = builder.ipv4(address.addr(), address.prefix_len(), None);
        }
        if let Some(mtu) = config.mtu {
            builder = builder.mtu(mtu);
        }

        let device = builder.build_async().map_err(open_err)?;
        let info = TunInfo {
            name: device.name().map_err(open_err)?,
            mtu: device.mtu().map_err(open_err)?,
        };

        match config.address {
            Some(address) => log::info!("Opened {} (mtu {}, {})", info.name, info.mtu, address),
            None => log::info!("Opened {} (mtu {})", info.name, info.mtu),
        }

        Ok(Self { device, info })
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn mtu(&self) -> u16 {
        self.info.mtu
    }

    /// Read one datagram into `buf`, returning its length
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.device.recv(buf).await?)
    }

    /// Write one datagram, returning the bytes the kernel accepted
    pub async fn write(&self, packet: &[u8]) -> Result<usize> {
        Ok(self.device.send(packet).await?)
    }
}

#[async_trait]
impl TunTransport for TunDevice {
    async fn recv(&self, buf: &mut [u8]) -> sock_packet::Result<usize> {
        Ok(self.read(buf).await?)
    }

    async fn send(&self, buf: &[u8]) -> sock_packet::Result<usize> {
        Ok(self.write(buf).await?)
    }

    fn info(&self) -> &TunInfo {
        &self.info
    }
}

impl std::fmt::Debug for TunDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("TunDevice").field(&self.info.name).finish()
    }
}
