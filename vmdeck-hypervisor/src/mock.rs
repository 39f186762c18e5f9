//! In-memory hypervisor daemon for testing and development.
//!
//! [`MockDaemon`] simulates the slice of libvirt the lifecycle core uses:
//! connections that can be dropped from the daemon side, persistent and
//! transient domains with the usual state machine, and a guest agent that
//! records every command it receives. Mock guests honour shutdown requests
//! immediately.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{HypervisorError, Result};
use crate::traits::{domain_state, Connector, DaemonConnection, DomainHandle, DomainInfo};

/// Library version reported by mock connections (9.0.0).
pub const MOCK_LIB_VERSION: u32 = 9_000_000;

const AGENT_OK_REPLY: &str = r#"{"return":{}}"#;

/// One command delivered to a mock guest agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentCall {
    pub command: String,
    pub timeout_secs: i32,
    pub flags: u32,
}

struct MockDomainRecord {
    name: String,
    uuid: String,
    xml: String,
    state: u32,
    id: Option<u32>,
    max_mem_kib: u64,
    memory_kib: u64,
    vcpus: u32,
    cpu_time_ns: u64,
    persistent: bool,
    agent_connected: bool,
    agent_reply: String,
    descriptor_available: bool,
    info_available: bool,
}

impl MockDomainRecord {
    fn is_active(&self) -> bool {
        self.id.is_some()
    }

    fn stop(&mut self) {
        self.state = domain_state::SHUTOFF;
        self.id = None;
        self.cpu_time_ns = 0;
    }
}

struct DaemonState {
    reachable: bool,
    generation: u64,
    open: usize,
    closes: u64,
    next_id: u32,
    hostname: String,
    domains: Vec<MockDomainRecord>,
    agent_calls: Vec<AgentCall>,
}

impl DaemonState {
    fn find(&self, uuid: &str) -> Result<&MockDomainRecord> {
        self.domains
            .iter()
            .find(|d| d.uuid == uuid)
            .ok_or_else(|| no_domain(&format!("uuid '{}'", uuid)))
    }

    fn find_mut(&mut self, uuid: &str) -> Result<&mut MockDomainRecord> {
        self.domains
            .iter_mut()
            .find(|d| d.uuid == uuid)
            .ok_or_else(|| no_domain(&format!("uuid '{}'", uuid)))
    }

    fn by_name_mut(&mut self, name: &str) -> Option<&mut MockDomainRecord> {
        self.domains.iter_mut().find(|d| d.name == name)
    }

    fn remove(&mut self, uuid: &str) {
        self.domains.retain(|d| d.uuid != uuid);
    }

    fn start(&mut self, uuid: &str) -> Result<()> {
        let id = self.next_id;
        let domain = self.find_mut(uuid)?;
        if domain.is_active() {
            return Err(HypervisorError::InvalidState(
                "Requested operation is not valid: domain is already running".to_string(),
            ));
        }
        domain.state = domain_state::RUNNING;
        domain.id = Some(id);
        domain.memory_kib = domain.max_mem_kib;
        self.next_id += 1;
        Ok(())
    }

    fn stop(&mut self, uuid: &str) -> Result<()> {
        let domain = self.find_mut(uuid)?;
        if !domain.is_active() {
            return Err(not_running());
        }
        domain.stop();
        if !domain.persistent {
            self.remove(uuid);
        }
        Ok(())
    }
}

fn no_domain(what: &str) -> HypervisorError {
    HypervisorError::DomainNotFound(format!(
        "Domain not found: no domain with matching {}",
        what
    ))
}

fn not_running() -> HypervisorError {
    HypervisorError::InvalidState("Requested operation is not valid: domain is not running".to_string())
}

/// Shared in-memory daemon. Clones share state.
#[derive(Clone)]
pub struct MockDaemon {
    inner: Arc<Mutex<DaemonState>>,
}

impl Default for MockDaemon {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDaemon {
    /// Create an empty, reachable daemon.
    pub fn new() -> Self {
        info!("Creating mock hypervisor daemon");
        Self {
            inner: Arc::new(Mutex::new(DaemonState {
                reachable: true,
                generation: 0,
                open: 0,
                closes: 0,
                next_id: 1,
                hostname: "mock-host".to_string(),
                domains: Vec::new(),
                agent_calls: Vec::new(),
            })),
        }
    }

    /// A connector opening connections to this daemon.
    pub fn connector(&self) -> MockConnector {
        MockConnector {
            daemon: self.clone(),
            delay: None,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, DaemonState>> {
        self.inner
            .lock()
            .map_err(|_| HypervisorError::Internal("Lock poisoned".to_string()))
    }

    // Control helpers see through a poisoned lock.
    fn state(&self) -> MutexGuard<'_, DaemonState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Accept or refuse new connections.
    pub fn set_reachable(&self, reachable: bool) {
        self.state().reachable = reachable;
    }

    /// Kill every open connection from the daemon side.
    pub fn drop_connections(&self) {
        self.state().generation += 1;
    }

    /// Connections opened and not yet closed (dead ones included).
    pub fn open_connections(&self) -> usize {
        self.state().open
    }

    /// Number of explicit connection closes.
    pub fn close_count(&self) -> u64 {
        self.state().closes
    }

    /// Register a persistent definition. Returns the domain UUID.
    pub fn define(&self, xml: &str) -> Result<String> {
        define_in(&mut *self.lock()?, xml)
    }

    /// Start a transient domain that vanishes once stopped. Returns its UUID.
    pub fn create_transient(&self, xml: &str) -> Result<String> {
        let mut state = self.lock()?;
        let uuid = define_in(&mut state, xml)?;
        state.find_mut(&uuid)?.persistent = false;
        state.start(&uuid)?;
        Ok(uuid)
    }

    /// Whether a domain with this name exists.
    pub fn is_defined(&self, name: &str) -> bool {
        self.state().domains.iter().any(|d| d.name == name)
    }

    /// Number of known domains.
    pub fn domain_count(&self) -> usize {
        self.state().domains.len()
    }

    /// Raw state value of a domain.
    pub fn domain_state(&self, name: &str) -> Option<u32> {
        self.state().domains.iter().find(|d| d.name == name).map(|d| d.state)
    }

    /// Force a raw state value, as if the guest crashed or was PM-suspended.
    pub fn set_domain_state(&self, name: &str, state: u32) -> bool {
        self.update(name, |d| d.state = state)
    }

    /// Set accumulated CPU time.
    pub fn set_cpu_time(&self, name: &str, cpu_time_ns: u64) -> bool {
        self.update(name, |d| d.cpu_time_ns = cpu_time_ns)
    }

    /// Override the descriptor the daemon returns for a domain.
    pub fn set_descriptor(&self, name: &str, xml: &str) -> bool {
        self.update(name, |d| d.xml = xml.to_string())
    }

    /// Make descriptor retrieval fail for a domain.
    pub fn set_descriptor_available(&self, name: &str, available: bool) -> bool {
        self.update(name, |d| d.descriptor_available = available)
    }

    /// Make state queries fail for a domain.
    pub fn set_info_available(&self, name: &str, available: bool) -> bool {
        self.update(name, |d| d.info_available = available)
    }

    /// Connect or disconnect the in-guest agent.
    pub fn set_agent_connected(&self, name: &str, connected: bool) -> bool {
        self.update(name, |d| d.agent_connected = connected)
    }

    /// Raw reply the guest agent answers with.
    pub fn set_agent_reply(&self, name: &str, reply: &str) -> bool {
        self.update(name, |d| d.agent_reply = reply.to_string())
    }

    /// Every command the guest agents received, in order.
    pub fn agent_commands(&self) -> Vec<String> {
        self.state()
            .agent_calls
            .iter()
            .map(|call| call.command.clone())
            .collect()
    }

    /// Every agent call with the timeout and flags it was sent with.
    pub fn agent_calls(&self) -> Vec<AgentCall> {
        self.state().agent_calls.clone()
    }

    fn update(&self, name: &str, f: impl FnOnce(&mut MockDomainRecord)) -> bool {
        match self.state().by_name_mut(name) {
            Some(domain) => {
                f(domain);
                true
            }
            None => false,
        }
    }
}

// =============================================================================
// DEFINITION PARSING
// =============================================================================

#[derive(Debug, Deserialize)]
struct DefinitionDoc {
    name: String,
    uuid: Option<String>,
    memory: Option<MemoryElement>,
    #[serde(rename = "currentMemory")]
    current_memory: Option<MemoryElement>,
    vcpu: Option<VcpuElement>,
}

#[derive(Debug, Deserialize)]
struct MemoryElement {
    #[serde(rename = "@unit")]
    unit: Option<String>,
    #[serde(rename = "$text")]
    value: u64,
}

impl MemoryElement {
    fn kib(&self) -> Result<u64> {
        let factor = match self.unit.as_deref().unwrap_or("KiB") {
            "b" | "bytes" => return Ok(self.value / 1024),
            "k" | "KiB" => 1,
            "M" | "MiB" => 1024,
            "G" | "GiB" => 1024 * 1024,
            other => {
                return Err(HypervisorError::Daemon(format!(
                    "XML error: unknown memory unit '{}'",
                    other
                )))
            }
        };
        Ok(self.value.saturating_mul(factor))
    }
}

#[derive(Debug, Deserialize)]
struct VcpuElement {
    #[serde(rename = "$text")]
    count: u32,
}

fn define_in(state: &mut DaemonState, xml: &str) -> Result<String> {
    let doc: DefinitionDoc = quick_xml::de::from_str(xml)
        .map_err(|e| HypervisorError::Daemon(format!("XML error: {}", e)))?;

    if doc.name.trim().is_empty() {
        return Err(HypervisorError::Daemon("XML error: missing domain name".to_string()));
    }

    let uuid = match doc.uuid.as_deref() {
        Some(raw) => Uuid::parse_str(raw.trim())
            .map_err(|_| HypervisorError::Daemon(format!("XML error: malformed uuid '{}'", raw)))?,
        None => Uuid::new_v4(),
    }
    .to_string();

    let max_mem_kib = match &doc.memory {
        Some(memory) => memory.kib()?,
        None => 0,
    };
    let current_kib = match &doc.current_memory {
        Some(memory) => memory.kib()?,
        None => max_mem_kib,
    };
    let vcpus = doc.vcpu.as_ref().map(|v| v.count).unwrap_or(1);

    if let Some(existing) = state.domains.iter().find(|d| d.name == doc.name && d.uuid != uuid) {
        return Err(HypervisorError::DefinitionConflict(format!(
            "operation failed: domain '{}' already exists with uuid {}",
            existing.name, existing.uuid
        )));
    }

    if let Some(existing) = state.domains.iter_mut().find(|d| d.uuid == uuid) {
        if existing.name != doc.name {
            return Err(HypervisorError::DefinitionConflict(format!(
                "operation failed: domain '{}' is already defined with uuid {}",
                existing.name, uuid
            )));
        }
        debug!(name = %doc.name, "Redefining mock domain");
        existing.xml = xml.to_string();
        existing.max_mem_kib = max_mem_kib;
        existing.vcpus = vcpus;
        existing.persistent = true;
        return Ok(uuid);
    }

    debug!(name = %doc.name, uuid = %uuid, "Defining mock domain");
    state.domains.push(MockDomainRecord {
        name: doc.name,
        uuid: uuid.clone(),
        xml: xml.to_string(),
        state: domain_state::SHUTOFF,
        id: None,
        max_mem_kib,
        memory_kib: current_kib,
        vcpus,
        cpu_time_ns: 0,
        persistent: true,
        agent_connected: true,
        agent_reply: AGENT_OK_REPLY.to_string(),
        descriptor_available: true,
        info_available: true,
    });

    Ok(uuid)
}

// =============================================================================
// CONNECTIONS
// =============================================================================

/// Opens [`MockConnection`]s to a [`MockDaemon`].
pub struct MockConnector {
    daemon: MockDaemon,
    delay: Option<Duration>,
}

impl MockConnector {
    /// Sleep this long inside every connection attempt.
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

impl Connector for MockConnector {
    fn connect(&self, uri: &str) -> Result<Box<dyn DaemonConnection>> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }

        let mut state = self.daemon.lock()?;
        if !state.reachable {
            return Err(HypervisorError::ConnectionFailed(format!(
                "Failed to connect socket to '{}': Connection refused",
                uri
            )));
        }

        state.open += 1;
        debug!(uri = %uri, open = state.open, "Mock connection opened");

        Ok(Box::new(MockConnection {
            daemon: self.daemon.clone(),
            generation: state.generation,
            closed: false,
        }))
    }
}

/// One connection to a [`MockDaemon`].
pub struct MockConnection {
    daemon: MockDaemon,
    generation: u64,
    closed: bool,
}

impl MockConnection {
    /// Daemon state, failing when this connection is dead.
    fn live(&self) -> Result<MutexGuard<'_, DaemonState>> {
        let state = self.daemon.lock()?;
        if self.closed || state.generation != self.generation {
            return Err(HypervisorError::Daemon(
                "internal error: client socket is closed".to_string(),
            ));
        }
        Ok(state)
    }

    fn handle(&self, uuid: String) -> Box<dyn DomainHandle + '_> {
        Box::new(MockDomain { conn: self, uuid })
    }
}

impl DaemonConnection for MockConnection {
    fn is_alive(&self) -> Result<bool> {
        let state = self.daemon.lock()?;
        Ok(!self.closed && state.generation == self.generation)
    }

    fn hypervisor_type(&self) -> Result<String> {
        let _state = self.live()?;
        Ok("QEMU".to_string())
    }

    fn lib_version(&self) -> Result<u32> {
        let _state = self.live()?;
        Ok(MOCK_LIB_VERSION)
    }

    fn hostname(&self) -> Result<String> {
        Ok(self.live()?.hostname.clone())
    }

    fn list_domain_ids(&self) -> Result<Vec<u32>> {
        let mut ids: Vec<u32> = self.live()?.domains.iter().filter_map(|d| d.id).collect();
        ids.sort_unstable();
        Ok(ids)
    }

    fn list_defined_domain_names(&self) -> Result<Vec<String>> {
        Ok(self
            .live()?
            .domains
            .iter()
            .filter(|d| d.persistent && !d.is_active())
            .map(|d| d.name.clone())
            .collect())
    }

    fn lookup_by_id(&self, id: u32) -> Result<Box<dyn DomainHandle + '_>> {
        let uuid = self
            .live()?
            .domains
            .iter()
            .find(|d| d.id == Some(id))
            .map(|d| d.uuid.clone())
            .ok_or_else(|| no_domain(&format!("id '{}'", id)))?;
        Ok(self.handle(uuid))
    }

    fn lookup_by_name(&self, name: &str) -> Result<Box<dyn DomainHandle + '_>> {
        let uuid = self
            .live()?
            .domains
            .iter()
            .find(|d| d.name == name)
            .map(|d| d.uuid.clone())
            .ok_or_else(|| no_domain(&format!("name '{}'", name)))?;
        Ok(self.handle(uuid))
    }

    fn lookup_by_uuid(&self, uuid: &str) -> Result<Box<dyn DomainHandle + '_>> {
        let found = self
            .live()?
            .domains
            .iter()
            .find(|d| d.uuid.eq_ignore_ascii_case(uuid))
            .map(|d| d.uuid.clone())
            .ok_or_else(|| no_domain(&format!("uuid '{}'", uuid)))?;
        Ok(self.handle(found))
    }

    fn define_xml(&self, xml: &str) -> Result<Box<dyn DomainHandle + '_>> {
        let uuid = define_in(&mut *self.live()?, xml)?;
        Ok(self.handle(uuid))
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        let mut state = self.daemon.lock()?;
        self.closed = true;
        state.open = state.open.saturating_sub(1);
        state.closes += 1;
        debug!(open = state.open, "Mock connection closed");
        Ok(())
    }
}

/// Domain handle tied to the connection it was looked up on.
struct MockDomain<'a> {
    conn: &'a MockConnection,
    uuid: String,
}

impl MockDomain<'_> {
    fn read<T>(&self, f: impl FnOnce(&MockDomainRecord) -> T) -> Result<T> {
        let state = self.conn.live()?;
        Ok(f(state.find(&self.uuid)?))
    }
}

impl DomainHandle for MockDomain<'_> {
    fn name(&self) -> Result<String> {
        self.read(|d| d.name.clone())
    }

    fn uuid_string(&self) -> Result<String> {
        Ok(self.uuid.clone())
    }

    fn info(&self) -> Result<DomainInfo> {
        let (available, info) = self.read(|d| {
            (
                d.info_available,
                DomainInfo {
                    state: Some(d.state),
                    max_mem_kib: d.max_mem_kib,
                    memory_kib: d.memory_kib,
                    nr_virt_cpu: d.vcpus,
                    cpu_time_ns: d.cpu_time_ns,
                },
            )
        })?;
        if !available {
            return Err(HypervisorError::Daemon(
                "internal error: cannot read domain state".to_string(),
            ));
        }
        Ok(info)
    }

    fn xml_desc(&self) -> Result<String> {
        let (available, xml) = self.read(|d| (d.descriptor_available, d.xml.clone()))?;
        if !available {
            return Err(HypervisorError::Daemon(
                "internal error: unable to format domain XML".to_string(),
            ));
        }
        Ok(xml)
    }

    fn is_active(&self) -> Result<bool> {
        self.read(MockDomainRecord::is_active)
    }

    fn is_persistent(&self) -> Result<bool> {
        self.read(|d| d.persistent)
    }

    fn create(&self) -> Result<()> {
        self.conn.live()?.start(&self.uuid)
    }

    fn shutdown(&self) -> Result<()> {
        self.conn.live()?.stop(&self.uuid)
    }

    fn destroy(&self) -> Result<()> {
        self.conn.live()?.stop(&self.uuid)
    }

    fn reboot(&self) -> Result<()> {
        if !self.is_active()? {
            return Err(not_running());
        }
        Ok(())
    }

    fn suspend(&self) -> Result<()> {
        let mut state = self.conn.live()?;
        let domain = state.find_mut(&self.uuid)?;
        if !domain.is_active() {
            return Err(not_running());
        }
        domain.state = domain_state::PAUSED;
        Ok(())
    }

    fn resume(&self) -> Result<()> {
        let mut state = self.conn.live()?;
        let domain = state.find_mut(&self.uuid)?;
        if !domain.is_active() {
            return Err(not_running());
        }
        if domain.state != domain_state::PAUSED {
            return Err(HypervisorError::InvalidState(
                "Requested operation is not valid: domain is not paused".to_string(),
            ));
        }
        domain.state = domain_state::RUNNING;
        Ok(())
    }

    fn undefine(&self) -> Result<()> {
        let mut state = self.conn.live()?;
        let domain = state.find_mut(&self.uuid)?;
        if !domain.persistent {
            return Err(HypervisorError::InvalidState(
                "Requested operation is not valid: cannot undefine transient domain".to_string(),
            ));
        }
        if domain.is_active() {
            // A running domain keeps running as a transient one.
            domain.persistent = false;
        } else {
            state.remove(&self.uuid);
        }
        Ok(())
    }

    fn qemu_agent_command(&self, command: &str, timeout_secs: i32, flags: u32) -> Result<String> {
        let mut state = self.conn.live()?;
        let domain = state.find(&self.uuid)?;
        if !domain.is_active() {
            return Err(not_running());
        }
        if !domain.agent_connected {
            return Err(HypervisorError::Daemon(
                "Guest agent is not responding: QEMU guest agent is not connected".to_string(),
            ));
        }
        let reply = domain.agent_reply.clone();
        state.agent_calls.push(AgentCall {
            command: command.to_string(),
            timeout_secs,
            flags,
        });
        Ok(reply)
    }
}
