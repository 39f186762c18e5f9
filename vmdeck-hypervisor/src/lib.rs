//! # vmdeck Hypervisor
//!
//! VM lifecycle management and metadata extraction over a libvirt daemon
//! connection.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │               VmService                 │
//! │  (list, create, start, shutdown, etc.)  │
//! └──────┬──────────────┬──────────────┬────┘
//!        │              │              │
//!        ▼              ▼              ▼
//!  ConnectionManager  DomainTemplate  DescriptorFacts
//!        │
//!        ▼
//!  Connector → DaemonConnection → DomainHandle
//!        │
//!   ┌────┴─────────────┐
//!   ▼                  ▼
//! LibvirtConnector   MockDaemon
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use vmdeck_hypervisor::{ConnectionManager, CreateVmRequest, DomainTemplate, MockDaemon, VmService};
//!
//! let daemon = MockDaemon::new();
//! let connections = Arc::new(ConnectionManager::new("test:///default", daemon.connector()));
//! let service = VmService::new(connections, DomainTemplate::builtin());
//!
//! let request = CreateVmRequest::new("my-vm", "/var/lib/libvirt/images/my-vm.qcow2")
//!     .with_cpu(4)
//!     .with_memory(4096);
//!
//! let vm = service.create_vm(&request)?;
//! service.start_vm(&vm.name)?;
//! ```

pub mod connection;
pub mod descriptor;
pub mod error;
pub mod guest_agent;
pub mod libvirt;
pub mod mock;
pub mod service;
pub mod template;
pub mod traits;
pub mod types;

pub use connection::{ConnectionGuard, ConnectionManager};
pub use descriptor::DescriptorFacts;
pub use error::{HypervisorError, Result};
pub use mock::{AgentCall, MockConnector, MockDaemon};
pub use service::VmService;
pub use template::DomainTemplate;
pub use traits::{Connector, DaemonConnection, DomainHandle, DomainInfo};
pub use types::*;

// Re-export the native client when available
#[cfg(feature = "libvirt")]
pub use libvirt::LibvirtConnector;
