//! VM lifecycle service.
//!
//! Every operation takes the shared connection, resolves the domain by name
//! (or UUID) and performs exactly one lifecycle action or one read. Reads
//! rebuild the [`VmDescriptor`] from the daemon each time; nothing is cached.

use std::sync::Arc;

use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::connection::ConnectionManager;
use crate::descriptor::DescriptorFacts;
use crate::error::{HypervisorError, Result};
use crate::guest_agent;
use crate::template::DomainTemplate;
use crate::traits::DomainHandle;
use crate::types::{
    ChangePasswordRequest, ConnectionConfig, CreateVmRequest, VmDescriptor, VmStatus,
    VmStatusReport,
};

/// Lifecycle operations over the shared daemon connection.
pub struct VmService {
    connections: Arc<ConnectionManager>,
    template: DomainTemplate,
}

impl VmService {
    pub fn new(connections: Arc<ConnectionManager>, template: DomainTemplate) -> Self {
        Self {
            connections,
            template,
        }
    }

    /// Build the service and its connection manager from configuration.
    ///
    /// Loads the template override up front so a bad path fails at startup.
    pub fn from_config(config: &ConnectionConfig) -> Result<Self> {
        let template = DomainTemplate::load(config.template_path.as_deref())?
            .with_qemu_path(config.qemu_path.clone());
        let connections = Arc::new(ConnectionManager::from_config(config));
        Ok(Self::new(connections, template))
    }

    /// The shared connection manager.
    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    pub fn template(&self) -> &DomainTemplate {
        &self.template
    }

    fn with_domain<T>(
        &self,
        name: &str,
        action: impl FnOnce(&dyn DomainHandle) -> Result<T>,
    ) -> Result<T> {
        let conn = self.connections.acquire()?;
        let domain = conn.lookup_by_name(name)?;
        action(domain.as_ref())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Every domain: running ones by ID, then defined but inactive ones by
    /// name. Any failure aborts the whole listing.
    #[instrument(skip(self))]
    pub fn list_all_vms(&self) -> Result<Vec<VmDescriptor>> {
        let conn = self.connections.acquire()?;

        let ids = conn.list_domain_ids()?;
        let names = conn.list_defined_domain_names()?;
        let mut vms = Vec::with_capacity(ids.len() + names.len());

        for id in ids {
            let domain = conn.lookup_by_id(id)?;
            vms.push(project(domain.as_ref())?);
        }
        for name in &names {
            let domain = conn.lookup_by_name(name)?;
            vms.push(project(domain.as_ref())?);
        }

        debug!(count = vms.len(), "Listed VMs");
        Ok(vms)
    }

    #[instrument(skip(self))]
    pub fn get_vm_by_name(&self, name: &str) -> Result<VmDescriptor> {
        self.with_domain(name, project)
    }

    #[instrument(skip(self), fields(vm_uuid = %uuid))]
    pub fn get_vm_by_uuid(&self, uuid: &Uuid) -> Result<VmDescriptor> {
        let conn = self.connections.acquire()?;
        let domain = conn.lookup_by_uuid(&uuid.to_string())?;
        project(domain.as_ref())
    }

    /// Current status with its code and label.
    #[instrument(skip(self))]
    pub fn get_vm_status(&self, name: &str) -> Result<VmStatusReport> {
        self.with_domain(name, |domain| {
            let info = domain.info()?;
            Ok(VmStatus::from_daemon_state(info.state).into())
        })
    }

    /// Fresh descriptor for periodic monitoring.
    #[instrument(skip(self))]
    pub fn monitor_vm(&self, name: &str) -> Result<VmDescriptor> {
        let vm = self.with_domain(name, project)?;
        debug!(
            status = %vm.status,
            cpu_usage = vm.cpu_usage,
            current_memory = vm.current_memory,
            "Sampled VM"
        );
        Ok(vm)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Define a new domain from the template. The domain is not started.
    #[instrument(skip_all, fields(vm_name = %request.name))]
    pub fn create_vm(&self, request: &CreateVmRequest) -> Result<VmDescriptor> {
        request.validate()?;

        if let Some(path) = &request.xml_config_path {
            debug!(path = %path, "Ignoring xmlConfigPath; definition is rendered from the template");
        }

        let conn = self.connections.acquire()?;

        match conn.lookup_by_name(&request.name) {
            Ok(_) => {
                return Err(HypervisorError::DefinitionConflict(format!(
                    "VM '{}' already exists",
                    request.name
                )))
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        let uuid = Uuid::new_v4();
        let xml = self.template.render_definition(request, &uuid)?;
        debug!(vm_uuid = %uuid, "Rendered domain definition");

        let domain = conn.define_xml(&xml)?;
        info!(vm_uuid = %uuid, memory_mb = request.memory_mb, cpus = request.cpu_count, "VM defined");

        project(domain.as_ref())
    }

    /// Stop the domain if it is running, then remove its definition.
    #[instrument(skip(self))]
    pub fn destroy_vm(&self, name: &str) -> Result<()> {
        self.with_domain(name, |domain| {
            let persistent = domain.is_persistent()?;

            if domain.is_active()? {
                info!("Stopping VM before removal");
                domain.destroy()?;
            }
            // A stopped transient domain is already gone.
            if persistent {
                domain.undefine()?;
            }

            info!("VM destroyed");
            Ok(())
        })
    }

    #[instrument(skip(self))]
    pub fn start_vm(&self, name: &str) -> Result<()> {
        self.with_domain(name, |domain| {
            domain.create()?;
            info!("VM started");
            Ok(())
        })
    }

    /// Ask the guest to shut down. Returns once the request is sent.
    #[instrument(skip(self))]
    pub fn shutdown_vm(&self, name: &str) -> Result<()> {
        self.with_domain(name, |domain| {
            domain.shutdown()?;
            info!("Shutdown requested");
            Ok(())
        })
    }

    /// Power the domain off immediately.
    #[instrument(skip(self))]
    pub fn force_shutdown_vm(&self, name: &str) -> Result<()> {
        self.with_domain(name, |domain| {
            domain.destroy()?;
            info!("VM force stopped");
            Ok(())
        })
    }

    #[instrument(skip(self))]
    pub fn reboot_vm(&self, name: &str) -> Result<()> {
        self.with_domain(name, |domain| {
            domain.reboot()?;
            info!("Reboot requested");
            Ok(())
        })
    }

    #[instrument(skip(self))]
    pub fn suspend_vm(&self, name: &str) -> Result<()> {
        self.with_domain(name, |domain| {
            domain.suspend()?;
            info!("VM suspended");
            Ok(())
        })
    }

    #[instrument(skip(self))]
    pub fn resume_vm(&self, name: &str) -> Result<()> {
        self.with_domain(name, |domain| {
            domain.resume()?;
            info!("VM resumed");
            Ok(())
        })
    }

    /// Change a guest user's password through the in-guest agent.
    #[instrument(skip_all, fields(vm_name = %name))]
    pub fn change_guest_password(
        &self,
        name: &str,
        username: &str,
        password: &str,
        encrypted: bool,
    ) -> Result<()> {
        self.with_domain(name, |domain| {
            guest_agent::send_set_password(domain, username, password, encrypted)
        })
    }

    /// [`change_guest_password`](Self::change_guest_password) from a request.
    pub fn apply_password_change(&self, name: &str, request: &ChangePasswordRequest) -> Result<()> {
        self.change_guest_password(name, &request.username, &request.password, request.encrypted)
    }
}

/// Build the descriptor for one domain.
///
/// The info block is required; the XML descriptor is best effort.
fn project(domain: &dyn DomainHandle) -> Result<VmDescriptor> {
    let name = domain.name()?;
    let raw_uuid = domain.uuid_string()?;
    let uuid = Uuid::parse_str(&raw_uuid).map_err(|e| {
        HypervisorError::Daemon(format!("invalid UUID '{}' for {}: {}", raw_uuid, name, e))
    })?;
    let info = domain.info()?;
    let persistent = domain.is_persistent()?;

    let xml = match domain.xml_desc() {
        Ok(xml) => Some(xml),
        Err(e) => {
            debug!(vm_name = %name, error = %e, "Descriptor unavailable");
            None
        }
    };
    let facts = DescriptorFacts::parse(xml.as_deref());

    let status = VmStatus::from_daemon_state(info.state);
    let cpu_usage = if status == VmStatus::Running {
        info.cpu_time_ns as f64 / 1_000_000.0
    } else {
        0.0
    };
    let run_time = if info.nr_virt_cpu > 0 {
        info.cpu_time_ns / 1_000_000_000 / u64::from(info.nr_virt_cpu)
    } else {
        0
    };

    Ok(VmDescriptor {
        name,
        uuid,
        status,
        status_description: status.label().to_string(),
        max_memory: info.max_mem_kib.saturating_mul(1024),
        current_memory: info.memory_kib.saturating_mul(1024),
        cpu_count: info.nr_virt_cpu,
        cpu_usage,
        run_time,
        persistent,
        network_interfaces: facts.network_interfaces,
        disks: facts.disks,
        vnc_host: facts.vnc_host,
        vnc_port: facts.vnc_port,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockDaemon;
    use crate::traits::domain_state;

    fn service(daemon: &MockDaemon) -> VmService {
        let connections = Arc::new(ConnectionManager::new("test:///default", daemon.connector()));
        VmService::new(connections, DomainTemplate::builtin())
    }

    fn request(name: &str) -> CreateVmRequest {
        CreateVmRequest::new(name, format!("/var/lib/libvirt/images/{}.qcow2", name))
            .with_memory(1024)
            .with_cpu(2)
    }

    #[test]
    fn test_project_running_domain() {
        let daemon = MockDaemon::new();
        let svc = service(&daemon);
        svc.create_vm(&request("web")).unwrap();
        svc.start_vm("web").unwrap();
        daemon.set_cpu_time("web", 8_000_000_000);

        let vm = svc.get_vm_by_name("web").unwrap();
        assert_eq!(vm.status, VmStatus::Running);
        assert_eq!(vm.status_description, "Running");
        assert_eq!(vm.cpu_usage, 8_000.0);
        assert_eq!(vm.run_time, 4);
        assert_eq!(vm.current_memory, 1024 * 1024 * 1024);
        assert_eq!(vm.disks, vec!["/var/lib/libvirt/images/web.qcow2"]);
        assert_eq!(vm.vnc_port, Some(-1));
        assert_eq!(vm.vnc_host.as_deref(), Some("0.0.0.0"));
    }

    #[test]
    fn test_cpu_usage_zero_unless_running() {
        let daemon = MockDaemon::new();
        let svc = service(&daemon);
        svc.create_vm(&request("idle")).unwrap();
        svc.start_vm("idle").unwrap();
        svc.suspend_vm("idle").unwrap();
        daemon.set_cpu_time("idle", 3_000_000_000);

        let vm = svc.get_vm_by_name("idle").unwrap();
        assert_eq!(vm.status, VmStatus::Paused);
        assert_eq!(vm.cpu_usage, 0.0);
        assert_eq!(vm.run_time, 1);
    }

    #[test]
    fn test_descriptor_failure_is_tolerated() {
        let daemon = MockDaemon::new();
        let svc = service(&daemon);
        svc.create_vm(&request("opaque")).unwrap();
        daemon.set_descriptor_available("opaque", false);

        let vm = svc.get_vm_by_name("opaque").unwrap();
        assert!(vm.disks.is_empty());
        assert!(vm.network_interfaces.is_empty());
        assert_eq!(vm.vnc_port, None);
    }

    #[test]
    fn test_status_report() {
        let daemon = MockDaemon::new();
        let svc = service(&daemon);
        svc.create_vm(&request("db")).unwrap();

        let report = svc.get_vm_status("db").unwrap();
        assert_eq!(report.status, VmStatus::Shutoff);
        assert_eq!(report.code, 5);
        assert_eq!(report.label, "Shut off");

        daemon.set_domain_state("db", domain_state::CRASHED);
        assert_eq!(svc.get_vm_status("db").unwrap().status, VmStatus::Crashed);

        daemon.set_domain_state("db", 42);
        assert_eq!(svc.get_vm_status("db").unwrap().status, VmStatus::Nostate);
    }

    #[test]
    fn test_create_rejects_invalid_request_before_connecting() {
        let daemon = MockDaemon::new();
        let svc = service(&daemon);

        let err = svc.create_vm(&request("tiny").with_memory(128)).unwrap_err();
        assert!(matches!(err, HypervisorError::InvalidConfig(_)));
        assert_eq!(svc.connections().connect_attempts(), 0);
    }

    #[test]
    fn test_create_existing_name_conflicts() {
        let daemon = MockDaemon::new();
        let svc = service(&daemon);
        svc.create_vm(&request("dup")).unwrap();

        let err = svc.create_vm(&request("dup")).unwrap_err();
        assert!(matches!(err, HypervisorError::DefinitionConflict(_)));
        assert_eq!(daemon.domain_count(), 1);
    }

    #[test]
    fn test_create_with_broken_template_is_render_error() {
        let daemon = MockDaemon::new();
        let connections = Arc::new(ConnectionManager::new("test:///default", daemon.connector()));
        let svc = VmService::new(connections, DomainTemplate::from_source("<domain>{12}</domain>"));

        let err = svc.create_vm(&request("bad")).unwrap_err();
        assert!(matches!(err, HypervisorError::TemplateRender(_)));
        assert_eq!(daemon.domain_count(), 0);
    }

    #[test]
    fn test_destroy_transient_domain() {
        let daemon = MockDaemon::new();
        daemon
            .create_transient("<domain><name>scratch</name><memory>524288</memory></domain>")
            .unwrap();
        let svc = service(&daemon);

        assert!(!svc.get_vm_by_name("scratch").unwrap().persistent);
        svc.destroy_vm("scratch").unwrap();
        assert!(svc.get_vm_by_name("scratch").unwrap_err().is_not_found());
    }

    #[test]
    fn test_change_guest_password_uses_agent() {
        let daemon = MockDaemon::new();
        let svc = service(&daemon);
        svc.create_vm(&request("guest")).unwrap();

        // Agent commands need a running guest.
        let err = svc.change_guest_password("guest", "root", "pw", false).unwrap_err();
        assert!(matches!(err, HypervisorError::GuestAgent(_)));

        svc.start_vm("guest").unwrap();
        let req = ChangePasswordRequest {
            username: "root".to_string(),
            password: "pw".to_string(),
            encrypted: false,
        };
        svc.apply_password_change("guest", &req).unwrap();
        assert_eq!(daemon.agent_commands().len(), 1);
    }

    #[test]
    fn test_unknown_vm_is_not_found() {
        let daemon = MockDaemon::new();
        let svc = service(&daemon);

        assert!(svc.start_vm("ghost").unwrap_err().is_not_found());
        assert!(svc.get_vm_status("ghost").unwrap_err().is_not_found());
        assert!(svc.get_vm_by_uuid(&Uuid::new_v4()).unwrap_err().is_not_found());
    }
}
