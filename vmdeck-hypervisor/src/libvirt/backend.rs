//! Libvirt backend implementation.

use tracing::debug;
use virt::connect::Connect;
use virt::domain::Domain;
use virt::error::ErrorNumber;
use virt::sys;

use crate::error::{HypervisorError, Result};
use crate::traits::{Connector, DaemonConnection, DomainHandle, DomainInfo};

/// Translate a libvirt error into the crate taxonomy.
fn map_err(e: virt::error::Error) -> HypervisorError {
    match e.code() {
        ErrorNumber::NoDomain => HypervisorError::DomainNotFound(e.to_string()),
        ErrorNumber::OperationInvalid => HypervisorError::InvalidState(e.to_string()),
        ErrorNumber::DomExist => HypervisorError::DefinitionConflict(e.to_string()),
        _ => HypervisorError::Daemon(e.to_string()),
    }
}

/// Opens native libvirt connections.
///
/// Common URIs:
/// - `qemu:///system` - System-wide QEMU/KVM
/// - `qemu:///session` - User session QEMU
/// - `qemu+ssh://user@host/system` - Remote via SSH
#[derive(Debug, Default, Clone, Copy)]
pub struct LibvirtConnector;

impl Connector for LibvirtConnector {
    fn connect(&self, uri: &str) -> Result<Box<dyn DaemonConnection>> {
        let connection = Connect::open(Some(uri))
            .map_err(|e| HypervisorError::ConnectionFailed(e.to_string()))?;
        Ok(Box::new(LibvirtConnection { connection }))
    }
}

/// A native libvirt connection.
pub struct LibvirtConnection {
    connection: Connect,
}

impl LibvirtConnection {
    fn wrap(&self, domain: Domain) -> Box<dyn DomainHandle + '_> {
        Box::new(LibvirtDomain { domain })
    }
}

impl DaemonConnection for LibvirtConnection {
    fn is_alive(&self) -> Result<bool> {
        self.connection.is_alive().map_err(map_err)
    }

    fn hypervisor_type(&self) -> Result<String> {
        self.connection.get_type().map_err(map_err)
    }

    fn lib_version(&self) -> Result<u32> {
        self.connection.get_lib_version().map_err(map_err)
    }

    fn hostname(&self) -> Result<String> {
        self.connection.get_hostname().map_err(map_err)
    }

    fn list_domain_ids(&self) -> Result<Vec<u32>> {
        self.connection.list_domains().map_err(map_err)
    }

    fn list_defined_domain_names(&self) -> Result<Vec<String>> {
        self.connection.list_defined_domains().map_err(map_err)
    }

    fn lookup_by_id(&self, id: u32) -> Result<Box<dyn DomainHandle + '_>> {
        let domain = Domain::lookup_by_id(&self.connection, id).map_err(map_err)?;
        Ok(self.wrap(domain))
    }

    fn lookup_by_name(&self, name: &str) -> Result<Box<dyn DomainHandle + '_>> {
        let domain = Domain::lookup_by_name(&self.connection, name).map_err(map_err)?;
        Ok(self.wrap(domain))
    }

    fn lookup_by_uuid(&self, uuid: &str) -> Result<Box<dyn DomainHandle + '_>> {
        let domain = Domain::lookup_by_uuid_string(&self.connection, uuid).map_err(map_err)?;
        Ok(self.wrap(domain))
    }

    fn define_xml(&self, xml: &str) -> Result<Box<dyn DomainHandle + '_>> {
        let domain = Domain::define_xml(&self.connection, xml).map_err(map_err)?;
        Ok(self.wrap(domain))
    }

    fn close(&mut self) -> Result<()> {
        let remaining = self.connection.close().map_err(map_err)?;
        if remaining > 0 {
            debug!(references = remaining, "Libvirt connection still referenced after close");
        }
        Ok(())
    }
}

/// A native libvirt domain handle.
struct LibvirtDomain {
    domain: Domain,
}

impl DomainHandle for LibvirtDomain {
    fn name(&self) -> Result<String> {
        self.domain.get_name().map_err(map_err)
    }

    fn uuid_string(&self) -> Result<String> {
        self.domain.get_uuid_string().map_err(map_err)
    }

    fn info(&self) -> Result<DomainInfo> {
        let info = self.domain.get_info().map_err(map_err)?;
        Ok(DomainInfo {
            state: Some(info.state as u32),
            max_mem_kib: info.max_mem,
            memory_kib: info.memory,
            nr_virt_cpu: info.nr_virt_cpu,
            cpu_time_ns: info.cpu_time,
        })
    }

    fn xml_desc(&self) -> Result<String> {
        self.domain.get_xml_desc(0).map_err(map_err)
    }

    fn is_active(&self) -> Result<bool> {
        self.domain.is_active().map_err(map_err)
    }

    fn is_persistent(&self) -> Result<bool> {
        self.domain.is_persistent().map_err(map_err)
    }

    fn create(&self) -> Result<()> {
        self.domain.create().map(|_| ()).map_err(map_err)
    }

    fn shutdown(&self) -> Result<()> {
        self.domain.shutdown().map(|_| ()).map_err(map_err)
    }

    fn destroy(&self) -> Result<()> {
        self.domain.destroy().map_err(map_err)
    }

    fn reboot(&self) -> Result<()> {
        self.domain
            .reboot(sys::VIR_DOMAIN_REBOOT_DEFAULT)
            .map_err(map_err)
    }

    fn suspend(&self) -> Result<()> {
        self.domain.suspend().map(|_| ()).map_err(map_err)
    }

    fn resume(&self) -> Result<()> {
        self.domain.resume().map(|_| ()).map_err(map_err)
    }

    fn undefine(&self) -> Result<()> {
        self.domain.undefine().map_err(map_err)
    }

    fn qemu_agent_command(&self, command: &str, timeout_secs: i32, flags: u32) -> Result<String> {
        self.domain
            .qemu_agent_command(command, timeout_secs, flags)
            .map_err(map_err)
    }
}
