//! Type definitions for VM descriptors, status and requests.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

use crate::error::{HypervisorError, Result};
use crate::traits::domain_state;

// =============================================================================
// CONNECTION CONFIGURATION
// =============================================================================

/// Default daemon connection URI.
pub const DEFAULT_URI: &str = "qemu:///system";

/// Settings for reaching the hypervisor daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Daemon connection URI (e.g. `qemu:///system`, `qemu+ssh://root@host/system`)
    pub uri: String,
    /// Upper bound for a single call, in seconds (enforced by the caller)
    pub timeout_secs: u64,
    /// Hypervisor executable override, emitted as the domain's `<emulator>`
    pub qemu_path: Option<String>,
    /// Domain definition template override (built-in template when unset)
    pub template_path: Option<PathBuf>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            uri: DEFAULT_URI.to_string(),
            timeout_secs: 30,
            qemu_path: None,
            template_path: None,
        }
    }
}

// =============================================================================
// VM STATUS
// =============================================================================

/// Externally documented VM status.
///
/// The numeric codes are part of the contract and must never be reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VmStatus {
    Nostate,
    Running,
    Blocked,
    Paused,
    /// Graceful shutdown in progress
    Shutdown,
    /// Fully stopped
    Shutoff,
    Crashed,
    /// Suspended by guest power management
    Pmsuspended,
}

impl VmStatus {
    /// All statuses in code order.
    pub const ALL: [VmStatus; 8] = [
        VmStatus::Nostate,
        VmStatus::Running,
        VmStatus::Blocked,
        VmStatus::Paused,
        VmStatus::Shutdown,
        VmStatus::Shutoff,
        VmStatus::Crashed,
        VmStatus::Pmsuspended,
    ];

    /// Translate a daemon `virDomainState` value.
    ///
    /// Unknown values and a missing state map to [`VmStatus::Nostate`] so
    /// states introduced by newer daemons degrade gracefully.
    pub fn from_daemon_state(state: Option<u32>) -> Self {
        match state {
            Some(domain_state::NOSTATE) => VmStatus::Nostate,
            Some(domain_state::RUNNING) => VmStatus::Running,
            Some(domain_state::BLOCKED) => VmStatus::Blocked,
            Some(domain_state::PAUSED) => VmStatus::Paused,
            Some(domain_state::SHUTDOWN) => VmStatus::Shutdown,
            Some(domain_state::SHUTOFF) => VmStatus::Shutoff,
            Some(domain_state::CRASHED) => VmStatus::Crashed,
            Some(domain_state::PMSUSPENDED) => VmStatus::Pmsuspended,
            _ => VmStatus::Nostate,
        }
    }

    /// Look up a status by its contract code, defaulting to `Nostate`.
    pub fn from_code(code: i32) -> Self {
        Self::ALL
            .iter()
            .copied()
            .find(|s| s.code() == code)
            .unwrap_or(VmStatus::Nostate)
    }

    /// Stable numeric code.
    pub fn code(&self) -> i32 {
        match self {
            VmStatus::Nostate => 0,
            VmStatus::Running => 1,
            VmStatus::Blocked => 2,
            VmStatus::Paused => 3,
            VmStatus::Shutdown => 4,
            VmStatus::Shutoff => 5,
            VmStatus::Crashed => 6,
            VmStatus::Pmsuspended => 7,
        }
    }

    /// Human readable label.
    pub fn label(&self) -> &'static str {
        match self {
            VmStatus::Nostate => "No state",
            VmStatus::Running => "Running",
            VmStatus::Blocked => "Blocked",
            VmStatus::Paused => "Paused",
            VmStatus::Shutdown => "Shutting down",
            VmStatus::Shutoff => "Shut off",
            VmStatus::Crashed => "Crashed",
            VmStatus::Pmsuspended => "Suspended (power management)",
        }
    }

    /// Contract name, as serialized.
    pub fn as_str(&self) -> &'static str {
        match self {
            VmStatus::Nostate => "NOSTATE",
            VmStatus::Running => "RUNNING",
            VmStatus::Blocked => "BLOCKED",
            VmStatus::Paused => "PAUSED",
            VmStatus::Shutdown => "SHUTDOWN",
            VmStatus::Shutoff => "SHUTOFF",
            VmStatus::Crashed => "CRASHED",
            VmStatus::Pmsuspended => "PMSUSPENDED",
        }
    }
}

impl Default for VmStatus {
    fn default() -> Self {
        Self::Nostate
    }
}

impl fmt::Display for VmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status answer for a single VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VmStatusReport {
    pub status: VmStatus,
    pub code: i32,
    pub label: &'static str,
}

impl From<VmStatus> for VmStatusReport {
    fn from(status: VmStatus) -> Self {
        Self {
            status,
            code: status.code(),
            label: status.label(),
        }
    }
}

// =============================================================================
// VM DESCRIPTOR
// =============================================================================

/// Normalized view of one domain, rebuilt from the daemon on every query.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VmDescriptor {
    pub name: String,
    pub uuid: Uuid,
    pub status: VmStatus,
    pub status_description: String,
    /// Maximum memory (bytes)
    pub max_memory: u64,
    /// Current memory (bytes)
    pub current_memory: u64,
    pub cpu_count: u32,
    /// Cumulative CPU time in milliseconds while running, 0.0 otherwise.
    ///
    /// This is NOT a utilisation percentage: a real percentage needs two
    /// samples taken a known interval apart.
    pub cpu_usage: f64,
    /// Cumulative CPU seconds per vCPU (0 when no vCPUs are reported)
    pub run_time: u64,
    pub persistent: bool,
    /// Interface device names, or MAC addresses when no device names exist
    pub network_interfaces: Vec<String>,
    /// Backing file paths in definition order
    pub disks: Vec<String>,
    pub vnc_host: Option<String>,
    /// VNC port; `-1` or `None` means unknown / not exposed
    pub vnc_port: Option<i32>,
}

// =============================================================================
// REQUESTS
// =============================================================================

/// Minimum memory accepted by [`CreateVmRequest::validate`], in MiB.
pub const MIN_MEMORY_MB: u64 = 512;

fn default_network_type() -> String {
    "nat".to_string()
}

fn default_network_name() -> String {
    "default".to_string()
}

/// Parameters for defining a new domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateVmRequest {
    pub name: String,
    #[serde(rename = "memoryMB")]
    pub memory_mb: u64,
    pub cpu_count: u32,
    pub disk_image_path: String,
    /// Accepted for compatibility; the definition is always rendered from the
    /// template and these parameters.
    #[serde(default)]
    pub xml_config_path: Option<String>,
    #[serde(default = "default_network_type")]
    pub network_type: String,
    #[serde(default = "default_network_name")]
    pub network_name: String,
}

impl CreateVmRequest {
    /// Create a request with default memory, CPU and network settings.
    pub fn new(name: impl Into<String>, disk_image_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            memory_mb: 2048,
            cpu_count: 2,
            disk_image_path: disk_image_path.into(),
            xml_config_path: None,
            network_type: default_network_type(),
            network_name: default_network_name(),
        }
    }

    /// Set the memory size in MiB.
    pub fn with_memory(mut self, memory_mb: u64) -> Self {
        self.memory_mb = memory_mb;
        self
    }

    /// Set the number of vCPUs.
    pub fn with_cpu(mut self, cpu_count: u32) -> Self {
        self.cpu_count = cpu_count;
        self
    }

    /// Set the libvirt network the NIC attaches to.
    pub fn with_network(mut self, network_name: impl Into<String>) -> Self {
        self.network_name = network_name.into();
        self
    }

    /// Check the request before any daemon call is made.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(HypervisorError::InvalidConfig("VM name must not be blank".to_string()));
        }
        if self.memory_mb < MIN_MEMORY_MB {
            return Err(HypervisorError::InvalidConfig(format!(
                "memory must be at least {} MB, got {}",
                MIN_MEMORY_MB, self.memory_mb
            )));
        }
        if self.cpu_count < 1 {
            return Err(HypervisorError::InvalidConfig("cpu count must be at least 1".to_string()));
        }
        if self.disk_image_path.trim().is_empty() {
            return Err(HypervisorError::InvalidConfig("disk image path must not be blank".to_string()));
        }
        if self.network_name.trim().is_empty() {
            return Err(HypervisorError::InvalidConfig("network name must not be blank".to_string()));
        }
        Ok(())
    }

    /// Memory in KiB, as written into the domain definition.
    pub fn memory_kib(&self) -> u64 {
        self.memory_mb * 1024
    }
}

/// Guest account password change, delivered through the guest agent.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangePasswordRequest {
    pub username: String,
    pub password: String,
    /// Password is already crypt()-encoded
    #[serde(default)]
    pub encrypted: bool,
}

impl fmt::Debug for ChangePasswordRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangePasswordRequest")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("encrypted", &self.encrypted)
            .finish()
    }
}
