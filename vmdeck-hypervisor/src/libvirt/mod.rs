//! Libvirt daemon client.
//!
//! The native client requires the `libvirt` feature and the libvirt client
//! library on the host. Without it, [`default_connector`] returns a connector
//! whose every attempt fails with a connection error.

#[cfg(feature = "libvirt")]
mod backend;

#[cfg(feature = "libvirt")]
pub use backend::{LibvirtConnection, LibvirtConnector};

use crate::error::{HypervisorError, Result};
use crate::traits::{Connector, DaemonConnection};

/// Check if the native libvirt client is compiled in.
pub fn is_available() -> bool {
    cfg!(feature = "libvirt")
}

/// The native connector when compiled in, [`UnavailableConnector`] otherwise.
pub fn default_connector() -> Box<dyn Connector> {
    #[cfg(feature = "libvirt")]
    {
        Box::new(LibvirtConnector)
    }
    #[cfg(not(feature = "libvirt"))]
    {
        Box::new(UnavailableConnector)
    }
}

/// Connector used when the native client is not compiled in.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableConnector;

impl Connector for UnavailableConnector {
    fn connect(&self, uri: &str) -> Result<Box<dyn DaemonConnection>> {
        Err(HypervisorError::ConnectionFailed(format!(
            "cannot connect to '{}': libvirt support is not compiled in",
            uri
        )))
    }
}
