//! TUN device management for socktun
//!
//! Opens the virtual interface the router reads outbound packets from and
//! writes inbound packets to. The device is exposed through the shared
//! [`sock_packet::TunTransport`] trait so the engine never depends on
//! `tun-rs` directly.
//!
//! Opening a device needs root or `CAP_NET_ADMIN`. On Linux the `tun`
//! module must be loaded so that `/dev/net/tun` exists; [`TunDevice::create`]
//! checks for it before asking the kernel for an interface.
//!
//! ```ignore
//! use std::sync::Arc;
//! use sock_tun::{TunConfig, TunDevice};
//!
//! let config = TunConfig::builder()
//!     .name("socktun0")
//!     .address("10.0.0.1/24".parse()?)
//!     .build()?;
//! let device = Arc::new(TunDevice::create(config).await?);
//! log::info!("{} is up with mtu {}", device.name(), device.mtu());
//! ```

pub mod config;
pub mod device;
pub mod error;

#[cfg(target_os = "linux")]
pub mod linux;

pub use config::{TunConfig, TunConfigBuilder};
pub use device::TunDevice;
pub use error::{Error, Result};
