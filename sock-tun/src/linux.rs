//! Linux device node probe

use std::path::Path;

use crate::error::{Error, Result};

/// Clone device every TUN interface is allocated through
pub const TUN_CLONE_DEVICE: &str = "/dev/net/tun";

/// Fail early with a readable error when the tun module is absent
pub fn check_clone_device() -> Result<()> {
    if Path::new(TUN_CLONE_DEVICE).exists() {
        Ok(())
    } else {
        Err(Error::DeviceNodeMissing {
            path: TUN_CLONE_DEVICE,
        })
    }
}
