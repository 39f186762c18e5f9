//! Shared daemon connection.
//!
//! [`ConnectionManager`] owns the one connection this process holds to the
//! hypervisor daemon. It connects lazily on first use, probes liveness on every
//! acquisition and transparently reconnects when the handle has died. The
//! returned [`ConnectionGuard`] keeps the manager's lock for as long as it
//! lives, so every daemon call goes through the handle one at a time and
//! teardown can never interleave with an in-flight call.

use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, error, info, warn};

use crate::error::{HypervisorError, Result};
use crate::traits::{Connector, DaemonConnection, DomainHandle};
use crate::types::ConnectionConfig;

struct ConnectionState {
    handle: Box<dyn DaemonConnection>,
    connected: bool,
    closed: bool,
}

impl ConnectionState {
    /// Swap the held handle for the disconnected placeholder and return it.
    fn take(&mut self) -> Option<Box<dyn DaemonConnection>> {
        if !self.connected {
            return None;
        }
        self.connected = false;
        Some(std::mem::replace(&mut self.handle, Box::new(Disconnected)))
    }
}

/// Stand-in held while no daemon connection is open.
struct Disconnected;

fn not_connected<T>() -> Result<T> {
    Err(HypervisorError::ConnectionFailed("not connected".to_string()))
}

impl DaemonConnection for Disconnected {
    fn is_alive(&self) -> Result<bool> {
        Ok(false)
    }

    fn hypervisor_type(&self) -> Result<String> {
        not_connected()
    }

    fn lib_version(&self) -> Result<u32> {
        not_connected()
    }

    fn hostname(&self) -> Result<String> {
        not_connected()
    }

    fn list_domain_ids(&self) -> Result<Vec<u32>> {
        not_connected()
    }

    fn list_defined_domain_names(&self) -> Result<Vec<String>> {
        not_connected()
    }

    fn lookup_by_id(&self, _id: u32) -> Result<Box<dyn DomainHandle + '_>> {
        not_connected()
    }

    fn lookup_by_name(&self, _name: &str) -> Result<Box<dyn DomainHandle + '_>> {
        not_connected()
    }

    fn lookup_by_uuid(&self, _uuid: &str) -> Result<Box<dyn DomainHandle + '_>> {
        not_connected()
    }

    fn define_xml(&self, _xml: &str) -> Result<Box<dyn DomainHandle + '_>> {
        not_connected()
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Lazily established, auto-reconnecting daemon connection.
pub struct ConnectionManager {
    uri: String,
    connector: Box<dyn Connector>,
    state: Mutex<ConnectionState>,
    attempts: AtomicU64,
}

impl ConnectionManager {
    /// Create a manager for `uri`. No connection is attempted yet.
    pub fn new(uri: impl Into<String>, connector: impl Connector + 'static) -> Self {
        Self::with_connector(uri, Box::new(connector))
    }

    /// Create a manager over an already boxed connector.
    pub fn with_connector(uri: impl Into<String>, connector: Box<dyn Connector>) -> Self {
        let uri = uri.into();
        info!(uri = %uri, "Libvirt connection manager initialized (connecting on first use)");

        Self {
            uri,
            connector,
            state: Mutex::new(ConnectionState {
                handle: Box::new(Disconnected),
                connected: false,
                closed: false,
            }),
            attempts: AtomicU64::new(0),
        }
    }

    /// Create a manager for the configured URI using the native libvirt
    /// client, or a connector that always fails when libvirt support is not
    /// compiled in.
    pub fn from_config(config: &ConnectionConfig) -> Self {
        Self::with_connector(config.uri.clone(), crate::libvirt::default_connector())
    }

    /// The daemon URI.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Number of physical connection attempts made so far.
    pub fn connect_attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Whether a handle is currently held (no liveness probe).
    pub fn is_connected(&self) -> bool {
        self.state
            .lock()
            .map(|state| state.connected)
            .unwrap_or(false)
    }

    /// Get a live connection, connecting or reconnecting as needed.
    pub fn acquire(&self) -> Result<ConnectionGuard<'_>> {
        let mut state = self.state.lock().map_err(|_| {
            HypervisorError::Internal("Lock poisoned".to_string())
        })?;

        if state.closed {
            return Err(HypervisorError::ConnectionFailed(
                "connection manager is shut down".to_string(),
            ));
        }

        let alive = state.connected
            && state.handle.is_alive().unwrap_or_else(|e| {
                debug!(error = %e, "Liveness probe failed");
                false
            });

        if !alive {
            if let Some(mut stale) = state.take() {
                info!(uri = %self.uri, "Libvirt connection is no longer alive, reconnecting");
                if let Err(e) = stale.close() {
                    debug!(error = %e, "Failed to close stale connection");
                }
            }
            state.handle = self.open()?;
            state.connected = true;
        }

        Ok(ConnectionGuard { state })
    }

    /// Release the connection. Later acquisitions fail.
    pub fn shutdown(&self) {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };

        state.closed = true;

        if let Some(mut handle) = state.take() {
            match handle.close() {
                Ok(()) => info!(uri = %self.uri, "Closed libvirt connection"),
                Err(e) => warn!(uri = %self.uri, error = %e, "Failed to close libvirt connection"),
            }
        }
    }

    fn open(&self) -> Result<Box<dyn DaemonConnection>> {
        info!(uri = %self.uri, "Connecting to libvirt");
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let connection = self.connector.connect(&self.uri).map_err(|e| {
            error!(uri = %self.uri, error = %e, "Failed to connect to libvirt");
            match e {
                HypervisorError::ConnectionFailed(_) => e,
                other => HypervisorError::ConnectionFailed(other.to_string()),
            }
        })?;

        log_connection_details(connection.as_ref());
        Ok(connection)
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn log_connection_details(connection: &dyn DaemonConnection) {
    let hypervisor = connection.hypervisor_type().unwrap_or_else(|e| {
        debug!(error = %e, "Failed to query hypervisor type");
        "unknown".to_string()
    });
    let version = connection
        .lib_version()
        .map(format_version)
        .unwrap_or_else(|e| {
            debug!(error = %e, "Failed to query libvirt version");
            "unknown".to_string()
        });
    let hostname = connection.hostname().unwrap_or_else(|e| {
        debug!(error = %e, "Failed to query daemon hostname");
        "unknown".to_string()
    });

    info!(
        hypervisor = %hypervisor,
        version = %version,
        hostname = %hostname,
        "Connected to libvirt"
    );
}

/// Decode libvirt's `major * 1_000_000 + minor * 1_000 + micro` encoding.
pub fn format_version(version: u32) -> String {
    let major = version / 1_000_000;
    let minor = (version / 1_000) % 1_000;
    let micro = version % 1_000;
    format!("{}.{}.{}", major, minor, micro)
}

/// Exclusive access to the live connection.
pub struct ConnectionGuard<'a> {
    state: MutexGuard<'a, ConnectionState>,
}

impl Deref for ConnectionGuard<'_> {
    type Target = dyn DaemonConnection;

    fn deref(&self) -> &Self::Target {
        &*self.state.handle
    }
}
