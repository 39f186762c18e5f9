//! Integration tests for the VM lifecycle service.
//!
//! These tests drive the public API against the in-memory daemon.

use std::sync::Arc;

use vmdeck_hypervisor::{
    ConnectionManager, CreateVmRequest, DomainTemplate, HypervisorError, MockDaemon, VmService,
    VmStatus,
};

fn setup() -> (MockDaemon, VmService) {
    let daemon = MockDaemon::new();
    let connections = Arc::new(ConnectionManager::new("test:///default", daemon.connector()));
    let service = VmService::new(connections, DomainTemplate::builtin());
    (daemon, service)
}

fn request(name: &str) -> CreateVmRequest {
    CreateVmRequest::new(name, format!("/var/lib/libvirt/images/{}.qcow2", name))
        .with_memory(2048)
        .with_cpu(2)
}

/// Test that a created VM reads back with its requested shape and is not running.
#[test]
fn test_create_then_get_round_trip() {
    let (_daemon, service) = setup();

    let created = service.create_vm(&request("test-vm")).unwrap();
    let fetched = service.get_vm_by_name("test-vm").unwrap();

    assert_eq!(created, fetched);
    assert_eq!(fetched.name, "test-vm");
    assert_eq!(fetched.cpu_count, 2);
    assert_eq!(fetched.max_memory, 2048 * 1024 * 1024);
    assert_ne!(fetched.status, VmStatus::Running);
    assert!(fetched.persistent);

    let by_uuid = service.get_vm_by_uuid(&fetched.uuid).unwrap();
    assert_eq!(by_uuid.name, "test-vm");
}

/// Test the start transition.
#[test]
fn test_start_moves_shutoff_to_running() {
    let (_daemon, service) = setup();
    service.create_vm(&request("web")).unwrap();

    assert_eq!(service.get_vm_status("web").unwrap().status, VmStatus::Shutoff);
    service.start_vm("web").unwrap();
    assert_eq!(service.get_vm_status("web").unwrap().status, VmStatus::Running);

    let err = service.start_vm("web").unwrap_err();
    assert!(matches!(err, HypervisorError::InvalidState(_)));
}

/// Test the full lifecycle.
#[test]
fn test_vm_lifecycle() {
    let (_daemon, service) = setup();
    service.create_vm(&request("app")).unwrap();

    service.start_vm("app").unwrap();
    service.suspend_vm("app").unwrap();
    assert_eq!(service.get_vm_status("app").unwrap().status, VmStatus::Paused);

    service.resume_vm("app").unwrap();
    service.reboot_vm("app").unwrap();
    assert_eq!(service.get_vm_status("app").unwrap().status, VmStatus::Running);

    service.shutdown_vm("app").unwrap();
    assert_eq!(service.get_vm_status("app").unwrap().status, VmStatus::Shutoff);

    service.start_vm("app").unwrap();
    service.force_shutdown_vm("app").unwrap();
    assert_eq!(service.get_vm_status("app").unwrap().status, VmStatus::Shutoff);

    let err = service.resume_vm("app").unwrap_err();
    assert!(matches!(err, HypervisorError::InvalidState(_)));
}

/// Test that destroying a running VM stops and removes it.
#[test]
fn test_destroy_running_vm() {
    let (daemon, service) = setup();
    service.create_vm(&request("doomed")).unwrap();
    service.start_vm("doomed").unwrap();

    service.destroy_vm("doomed").unwrap();

    assert!(!daemon.is_defined("doomed"));
    let err = service.get_vm_by_name("doomed").unwrap_err();
    assert!(err.is_not_found());
}

/// Test listing running and defined VMs together.
#[test]
fn test_list_includes_running_and_defined() {
    let (_daemon, service) = setup();
    for name in ["a", "b", "c"] {
        service.create_vm(&request(name)).unwrap();
    }
    service.start_vm("b").unwrap();

    let vms = service.list_all_vms().unwrap();
    let names: Vec<&str> = vms.iter().map(|vm| vm.name.as_str()).collect();

    // Running domains come first.
    assert_eq!(names, vec!["b", "a", "c"]);
    assert_eq!(vms[0].status, VmStatus::Running);
}

/// Test that one unreadable domain fails the whole listing.
#[test]
fn test_list_fails_when_one_domain_cannot_be_read() {
    let (daemon, service) = setup();
    for name in ["a", "b", "c"] {
        service.create_vm(&request(name)).unwrap();
    }
    service.start_vm("a").unwrap();

    assert!(daemon.set_info_available("c", false));
    let err = service.list_all_vms().unwrap_err();
    assert!(matches!(err, HypervisorError::Daemon(_)));

    assert!(daemon.set_info_available("c", true));
    assert!(daemon.set_info_available("a", false));
    assert!(service.list_all_vms().is_err());

    assert!(daemon.set_info_available("a", true));
    assert_eq!(service.list_all_vms().unwrap().len(), 3);
}

/// Test that a daemon outage surfaces as a connection error and recovers.
#[test]
fn test_daemon_restart_recovers() {
    let (daemon, service) = setup();
    service.create_vm(&request("svc")).unwrap();

    daemon.drop_connections();
    daemon.set_reachable(false);
    let err = service.get_vm_by_name("svc").unwrap_err();
    assert!(matches!(err, HypervisorError::ConnectionFailed(_)));

    daemon.set_reachable(true);
    assert_eq!(service.get_vm_by_name("svc").unwrap().name, "svc");
    assert_eq!(service.connections().connect_attempts(), 3);
}

/// Test descriptor serialization field names.
#[test]
fn test_descriptor_json_shape() {
    let (_daemon, service) = setup();
    let vm = service.create_vm(&request("json")).unwrap();

    let value = serde_json::to_value(&vm).unwrap();
    assert_eq!(value["status"], "SHUTOFF");
    assert_eq!(value["statusDescription"], "Shut off");
    assert_eq!(value["cpuCount"], 2);
    assert_eq!(value["disks"][0], "/var/lib/libvirt/images/json.qcow2");
    assert!(value.get("vncPort").is_some());
}

/// Test that operations after shutdown fail cleanly.
#[test]
fn test_service_after_manager_shutdown() {
    let (daemon, service) = setup();
    service.create_vm(&request("late")).unwrap();

    service.connections().shutdown();
    assert_eq!(daemon.open_connections(), 0);

    let err = service.get_vm_by_name("late").unwrap_err();
    assert!(matches!(err, HypervisorError::ConnectionFailed(_)));
}
