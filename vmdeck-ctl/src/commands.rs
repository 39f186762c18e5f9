//! Subcommand execution.
//!
//! The lifecycle core is synchronous, so every call runs on the blocking pool
//! and is bounded by the configured timeout.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use vmdeck_hypervisor::{
    libvirt, ChangePasswordRequest, ConnectionManager, CreateVmRequest, DomainTemplate, MockDaemon,
    VmService,
};

use crate::cli::{Command, CreateArgs};
use crate::config::{Config, DaemonBackend};

/// Build the lifecycle service for the configured backend.
pub fn build_service(config: &Config) -> Result<VmService> {
    match config.backend {
        DaemonBackend::Libvirt => {
            if !libvirt::is_available() {
                warn!("Built without libvirt support; connections will fail");
            }
            VmService::from_config(&config.connection).context("Failed to initialize VM service")
        }
        DaemonBackend::Mock => {
            warn!("Using mock daemon (development mode)");
            let daemon = MockDaemon::new();
            let template = DomainTemplate::load(config.connection.template_path.as_deref())
                .context("Failed to load domain template")?
                .with_qemu_path(config.connection.qemu_path.clone());
            let connections = Arc::new(ConnectionManager::new(
                config.connection.uri.clone(),
                daemon.connector(),
            ));
            Ok(VmService::new(connections, template))
        }
    }
}

/// Runs subcommands against one service.
pub struct Runner {
    service: Arc<VmService>,
    timeout: Duration,
}

impl Runner {
    pub fn new(service: Arc<VmService>, timeout: Duration) -> Self {
        Self { service, timeout }
    }

    /// Run one core call on the blocking pool, bounded by the timeout.
    async fn call<T, F>(&self, op: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(&VmService) -> vmdeck_hypervisor::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let service = Arc::clone(&self.service);
        let task = tokio::task::spawn_blocking(move || f(&service));

        let joined = tokio::time::timeout(self.timeout, task)
            .await
            .map_err(|_| anyhow!("{} timed out after {}s", op, self.timeout.as_secs()))?;

        joined
            .with_context(|| format!("{} task failed", op))?
            .with_context(|| format!("{} failed", op))
    }

    /// Run a command and return its JSON output.
    pub async fn run(&self, command: Command) -> Result<serde_json::Value> {
        match command {
            Command::List => to_json(self.call("list", |s| s.list_all_vms()).await?),
            Command::Get { name } => {
                to_json(self.call("get", move |s| s.get_vm_by_name(&name)).await?)
            }
            Command::GetUuid { uuid } => {
                to_json(self.call("get-uuid", move |s| s.get_vm_by_uuid(&uuid)).await?)
            }
            Command::Create(args) => {
                let request = create_request(args);
                to_json(self.call("create", move |s| s.create_vm(&request)).await?)
            }
            Command::Destroy { name } => {
                self.action("destroy", name, |s, n| s.destroy_vm(n)).await
            }
            Command::Start { name } => self.action("start", name, |s, n| s.start_vm(n)).await,
            Command::Shutdown { name } => {
                self.action("shutdown", name, |s, n| s.shutdown_vm(n)).await
            }
            Command::ForceShutdown { name } => {
                self.action("force-shutdown", name, |s, n| s.force_shutdown_vm(n))
                    .await
            }
            Command::Reboot { name } => self.action("reboot", name, |s, n| s.reboot_vm(n)).await,
            Command::Suspend { name } => {
                self.action("suspend", name, |s, n| s.suspend_vm(n)).await
            }
            Command::Resume { name } => self.action("resume", name, |s, n| s.resume_vm(n)).await,
            Command::Status { name } => {
                to_json(self.call("status", move |s| s.get_vm_status(&name)).await?)
            }
            Command::Monitor {
                name,
                interval_secs,
                count,
            } => self.monitor(name, Duration::from_secs(interval_secs), count).await,
            Command::SetPassword {
                name,
                username,
                password,
                encrypted,
            } => {
                let request = ChangePasswordRequest {
                    username,
                    password,
                    encrypted,
                };
                self.action("set-password", name, move |s, n| {
                    s.apply_password_change(n, &request)
                })
                .await
            }
        }
    }

    async fn action<F>(&self, op: &'static str, name: String, f: F) -> Result<serde_json::Value>
    where
        F: FnOnce(&VmService, &str) -> vmdeck_hypervisor::Result<()> + Send + 'static,
    {
        let vm = name.clone();
        self.call(op, move |s| f(s, &vm)).await?;
        info!(vm_name = %name, action = op, "Command completed");
        Ok(json!({ "name": name, "action": op, "result": "ok" }))
    }

    async fn monitor(&self, name: String, interval: Duration, count: u32) -> Result<serde_json::Value> {
        let mut samples = Vec::new();

        for sample in 0..count.max(1) {
            if sample > 0 {
                tokio::time::sleep(interval).await;
            }
            let vm = name.clone();
            samples.push(self.call("monitor", move |s| s.monitor_vm(&vm)).await?);
        }

        to_json(samples)
    }
}

fn create_request(args: CreateArgs) -> CreateVmRequest {
    let mut request = CreateVmRequest::new(args.name, args.disk)
        .with_memory(args.memory_mb)
        .with_cpu(args.cpus)
        .with_network(args.network);
    request.xml_config_path = args.xml_config_path;
    request
}

fn to_json<T: Serialize>(value: T) -> Result<serde_json::Value> {
    serde_json::to_value(value).context("Failed to serialize result")
}
