//! Daemon client abstraction traits.
//!
//! The lifecycle core talks to the hypervisor daemon exclusively through these
//! traits so the native libvirt client can be swapped for the in-memory
//! [`MockDaemon`](crate::mock::MockDaemon) in tests and development.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │   Connector  →  DaemonConnection        │
//! │                    └─ DomainHandle      │
//! └─────────────────────┬───────────────────┘
//!                       │
//!         ┌─────────────┴─────────────┐
//!         ▼                           ▼
//! ┌───────────────────┐     ┌───────────────────┐
//! │ LibvirtConnector  │     │   MockConnector   │
//! │   (virt crate)    │     │    (in memory)    │
//! └───────────────────┘     └───────────────────┘
//! ```

use crate::error::Result;

/// `virDomainState` values as reported by the daemon.
pub mod domain_state {
    pub const NOSTATE: u32 = 0;
    pub const RUNNING: u32 = 1;
    pub const BLOCKED: u32 = 2;
    pub const PAUSED: u32 = 3;
    pub const SHUTDOWN: u32 = 4;
    pub const SHUTOFF: u32 = 5;
    pub const CRASHED: u32 = 6;
    pub const PMSUSPENDED: u32 = 7;
}

/// Raw numeric info block for one domain, as reported by the daemon.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DomainInfo {
    /// Daemon state enumeration value (`virDomainState`), if reported
    pub state: Option<u32>,
    /// Maximum memory (KiB)
    pub max_mem_kib: u64,
    /// Current memory (KiB)
    pub memory_kib: u64,
    /// Number of virtual CPUs
    pub nr_virt_cpu: u32,
    /// Cumulative CPU time (nanoseconds)
    pub cpu_time_ns: u64,
}

/// A handle to a single domain on an established connection.
pub trait DomainHandle {
    /// Domain name.
    fn name(&self) -> Result<String>;

    /// Domain UUID in canonical string form.
    fn uuid_string(&self) -> Result<String>;

    /// Numeric info block (state, memory, vCPUs, CPU time).
    fn info(&self) -> Result<DomainInfo>;

    /// Raw configuration descriptor (domain XML).
    fn xml_desc(&self) -> Result<String>;

    /// Whether the domain is currently executing.
    fn is_active(&self) -> Result<bool>;

    /// Whether the domain definition survives a stop.
    fn is_persistent(&self) -> Result<bool>;

    /// Start a defined, inactive domain.
    fn create(&self) -> Result<()>;

    /// Send a graceful shutdown request. Returns once the request is sent.
    fn shutdown(&self) -> Result<()>;

    /// Hard stop (power off).
    fn destroy(&self) -> Result<()>;

    /// Send a graceful reboot request.
    fn reboot(&self) -> Result<()>;

    /// Pause execution, keeping memory state.
    fn suspend(&self) -> Result<()>;

    /// Resume a paused domain.
    fn resume(&self) -> Result<()>;

    /// Remove the persistent definition.
    fn undefine(&self) -> Result<()>;

    /// Send a raw JSON command to the in-guest agent and return its reply.
    fn qemu_agent_command(&self, command: &str, timeout_secs: i32, flags: u32) -> Result<String>;
}

/// An established connection to the hypervisor daemon.
///
/// Implementations are not assumed to be safe for concurrent use; the
/// [`ConnectionManager`](crate::connection::ConnectionManager) serialises all
/// access.
pub trait DaemonConnection: Send {
    /// Liveness probe.
    fn is_alive(&self) -> Result<bool>;

    /// Hypervisor driver type (e.g. "QEMU").
    fn hypervisor_type(&self) -> Result<String>;

    /// Library version encoded as `major * 1_000_000 + minor * 1_000 + micro`.
    fn lib_version(&self) -> Result<u32>;

    /// Hostname of the daemon's host.
    fn hostname(&self) -> Result<String>;

    /// IDs of running domains.
    fn list_domain_ids(&self) -> Result<Vec<u32>>;

    /// Names of defined but inactive domains.
    fn list_defined_domain_names(&self) -> Result<Vec<String>>;

    fn lookup_by_id(&self, id: u32) -> Result<Box<dyn DomainHandle + '_>>;

    fn lookup_by_name(&self, name: &str) -> Result<Box<dyn DomainHandle + '_>>;

    fn lookup_by_uuid(&self, uuid: &str) -> Result<Box<dyn DomainHandle + '_>>;

    /// Register a persistent domain definition (does not start it).
    fn define_xml(&self, xml: &str) -> Result<Box<dyn DomainHandle + '_>>;

    /// Release the connection.
    fn close(&mut self) -> Result<()>;
}

/// Factory for daemon connections.
pub trait Connector: Send + Sync {
    /// Open a new connection to the daemon at `uri`.
    fn connect(&self, uri: &str) -> Result<Box<dyn DaemonConnection>>;
}
