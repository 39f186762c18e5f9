//! Domain descriptor scanning.
//!
//! Recovers the handful of facts the VM descriptor needs (NIC names, disk
//! backing files, VNC endpoint) from a libvirt domain XML document. The
//! document is not trusted to be well formed: every extraction runs as its own
//! pass over a streaming reader, a reader error ends only that pass, and the
//! caller always gets a value back.

use std::ops::ControlFlow;

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use tracing::debug;

/// Facts recovered from one domain descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DescriptorFacts {
    /// Interface device names, or MAC addresses when no device names exist
    pub network_interfaces: Vec<String>,
    /// `<disk><source file=…>` paths in document order
    pub disks: Vec<String>,
    /// `listen` attribute of the first VNC graphics element
    pub vnc_host: Option<String>,
    /// `port` attribute of the first VNC graphics element
    pub vnc_port: Option<i32>,
}

impl DescriptorFacts {
    /// Scan a descriptor. `None` yields empty facts.
    pub fn parse(xml: Option<&str>) -> Self {
        let Some(xml) = xml else {
            return Self::default();
        };

        let (vnc_host, vnc_port) = vnc_endpoint(xml);

        Self {
            network_interfaces: network_interfaces(xml),
            disks: disk_sources(xml),
            vnc_host,
            vnc_port,
        }
    }
}

/// Interface device names (`<target dev>`), falling back to `<mac address>`.
pub fn network_interfaces(xml: &str) -> Vec<String> {
    let mut targets = Vec::new();
    let mut macs = Vec::new();

    for_each_element(xml, b"interface", |element, inside| {
        if inside {
            match element.local_name().as_ref() {
                b"target" => push_non_empty(&mut targets, attribute(element, b"dev")),
                b"mac" => push_non_empty(&mut macs, attribute(element, b"address")),
                _ => {}
            }
        }
        ControlFlow::Continue(())
    });

    if targets.is_empty() {
        macs
    } else {
        targets
    }
}

/// Backing file of every disk, duplicates kept.
pub fn disk_sources(xml: &str) -> Vec<String> {
    let mut disks = Vec::new();

    for_each_element(xml, b"disk", |element, inside| {
        if inside && element.local_name().as_ref() == b"source" {
            push_non_empty(&mut disks, attribute(element, b"file"));
        }
        ControlFlow::Continue(())
    });

    disks
}

/// Listen host and port of the first `<graphics type='vnc'>` element.
pub fn vnc_endpoint(xml: &str) -> (Option<String>, Option<i32>) {
    let mut endpoint = (None, None);

    for_each_element(xml, b"graphics", |element, _| {
        if element.local_name().as_ref() != b"graphics" {
            return ControlFlow::Continue(());
        }
        let is_vnc = attribute(element, b"type")
            .map(|t| t.eq_ignore_ascii_case("vnc"))
            .unwrap_or(false);
        if !is_vnc {
            return ControlFlow::Continue(());
        }

        endpoint = (
            attribute(element, b"listen"),
            attribute(element, b"port").and_then(|p| p.trim().parse::<i32>().ok()),
        );
        ControlFlow::Break(())
    });

    endpoint
}

/// Visit every start/empty element, telling the visitor whether the element
/// sits inside a `block` element. An end tag always closes the innermost open
/// element, whatever name it carries.
fn for_each_element<F>(xml: &str, block: &[u8], mut visit: F)
where
    F: FnMut(&BytesStart<'_>, bool) -> ControlFlow<()>,
{
    let mut reader = Reader::from_str(xml);
    reader.check_end_names(false);

    // One entry per open element: whether it is a `block`.
    let mut open: Vec<bool> = Vec::new();
    let mut blocks = 0usize;

    loop {
        match reader.read_event() {
            Ok(Event::Start(element)) => {
                if visit(&element, blocks > 0).is_break() {
                    return;
                }
                let is_block = element.local_name().as_ref() == block;
                if is_block {
                    blocks += 1;
                }
                open.push(is_block);
            }
            Ok(Event::Empty(element)) => {
                if visit(&element, blocks > 0).is_break() {
                    return;
                }
            }
            Ok(Event::End(_)) => {
                if open.pop() == Some(true) {
                    blocks -= 1;
                }
            }
            Ok(Event::Eof) => return,
            Ok(_) => {}
            Err(e) => {
                debug!(
                    error = %e,
                    position = reader.buffer_position(),
                    "Stopping descriptor scan at malformed markup"
                );
                return;
            }
        }
    }
}

/// Value of the first attribute named `key`. Stops at the first malformed
/// attribute.
fn attribute(element: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    element
        .attributes()
        .map_while(|attr| attr.ok())
        .find(|attr| attr.key.as_ref() == key)
        .and_then(|attr| attr.unescape_value().ok().map(|v| v.into_owned()))
}

fn push_non_empty(list: &mut Vec<String>, value: Option<String>) {
    if let Some(value) = value {
        if !value.is_empty() {
            list.push(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RUNNING_DOMAIN: &str = r#"<domain type='kvm' id='3'>
  <name>web-01</name>
  <devices>
    <disk type='file' device='disk'>
      <driver name='qemu' type='qcow2'/>
      <source file='/var/lib/libvirt/images/web-01.qcow2'/>
      <target dev='vda' bus='virtio'/>
    </disk>
    <disk type='file' device='cdrom'>
      <source file="/isos/ubuntu.iso"/>
      <target dev='sda' bus='sata'/>
    </disk>
    <interface type='network'>
      <mac address='52:54:00:aa:bb:01'/>
      <source network='default'/>
      <target dev='vnet0'/>
      <model type='virtio'/>
    </interface>
    <interface type='bridge'>
      <mac address='52:54:00:aa:bb:02'/>
      <source bridge='br0'/>
      <target dev='vnet1'/>
    </interface>
    <graphics type='spice' port='5930' listen='127.0.0.1'/>
    <graphics type='VNC' port='5901' autoport='yes' listen='0.0.0.0'>
      <listen type='address' address='0.0.0.0'/>
    </graphics>
    <graphics type='vnc' port='5902' listen='10.0.0.1'/>
  </devices>
</domain>"#;

    #[test]
    fn test_running_domain_facts() {
        let facts = DescriptorFacts::parse(Some(RUNNING_DOMAIN));

        assert_eq!(facts.network_interfaces, vec!["vnet0", "vnet1"]);
        assert_eq!(
            facts.disks,
            vec!["/var/lib/libvirt/images/web-01.qcow2", "/isos/ubuntu.iso"]
        );
        assert_eq!(facts.vnc_host.as_deref(), Some("0.0.0.0"));
        assert_eq!(facts.vnc_port, Some(5901));
    }

    #[test]
    fn test_parse_is_idempotent() {
        let first = DescriptorFacts::parse(Some(RUNNING_DOMAIN));
        let second = DescriptorFacts::parse(Some(RUNNING_DOMAIN));
        assert_eq!(first, second);
    }

    #[test]
    fn test_inactive_domain_falls_back_to_mac() {
        let xml = r#"<domain>
  <devices>
    <interface type='network'>
      <mac address='52:54:00:00:00:01'/>
      <source network='default'/>
    </interface>
    <interface type='network'>
      <mac address='52:54:00:00:00:02'/>
    </interface>
  </devices>
</domain>"#;

        assert_eq!(
            network_interfaces(xml),
            vec!["52:54:00:00:00:01", "52:54:00:00:00:02"]
        );
    }

    #[test]
    fn test_interfaces_never_mix_names_and_macs() {
        // The second NIC has no target yet; only device names are returned.
        let xml = r#"<domain><devices>
    <interface type='network'><mac address='52:54:00:00:00:01'/><target dev='vnet4'/></interface>
    <interface type='network'><mac address='52:54:00:00:00:02'/></interface>
</devices></domain>"#;

        assert_eq!(network_interfaces(xml), vec!["vnet4"]);
    }

    #[test]
    fn test_targets_outside_interfaces_are_ignored() {
        let xml = r#"<domain><devices>
    <disk type='file'><source file='/a.img'/><target dev='vda'/></disk>
    <channel type='unix'><target type='virtio' name='org.qemu.guest_agent.0'/></channel>
</devices></domain>"#;

        assert!(network_interfaces(xml).is_empty());
    }

    #[test]
    fn test_duplicate_disks_are_preserved() {
        let xml = r#"<domain><devices>
    <disk type='file'><source file='/images/shared.img'/></disk>
    <disk type='file'><source file='/images/shared.img'/></disk>
    <disk type='block'><source dev='/dev/sdb'/></disk>
</devices></domain>"#;

        assert_eq!(disk_sources(xml), vec!["/images/shared.img", "/images/shared.img"]);
    }

    #[test]
    fn test_vnc_unset_port_and_empty_listen() {
        let xml = r#"<domain><devices><graphics type='vnc' port='-1' listen=''/></devices></domain>"#;
        assert_eq!(vnc_endpoint(xml), (Some(String::new()), Some(-1)));
    }

    #[test]
    fn test_vnc_unparseable_port() {
        let xml = r#"<domain><devices><graphics type='vnc' port='auto' listen='::1'/></devices></domain>"#;
        assert_eq!(vnc_endpoint(xml), (Some("::1".to_string()), None));
    }

    #[test]
    fn test_no_graphics_leaves_vnc_unset() {
        let xml = r#"<domain><devices><console type='pty'/></devices></domain>"#;
        let facts = DescriptorFacts::parse(Some(xml));
        assert_eq!(facts.vnc_host, None);
        assert_eq!(facts.vnc_port, None);
    }

    #[test]
    fn test_absent_and_empty_descriptor() {
        assert_eq!(DescriptorFacts::parse(None), DescriptorFacts::default());
        assert_eq!(DescriptorFacts::parse(Some("")), DescriptorFacts::default());
    }

    #[test]
    fn test_malformed_input_never_fails() {
        let inputs = [
            "<<<>>>",
            "not xml at all",
            "<domain><devices><disk",
            "<domain><devices><graphics type='vnc' port='5900",
            "</interface></disk></graphics>",
            "<interface><target dev=vnet0/></interface>",
            "<domain>\u{0}\u{1}</domain>",
        ];

        for input in inputs {
            let _ = DescriptorFacts::parse(Some(input));
        }
    }

    #[test]
    fn test_malformed_tail_keeps_earlier_matches() {
        let xml = r#"<domain><devices>
    <disk type='file'><source file='/images/a.img'/></disk>
    <disk type='file'><source file='/images/b.img' file='dup'/></disk>
    <disk type='file'><source file=broken"#;

        let disks = disk_sources(xml);
        assert_eq!(disks.first().map(String::as_str), Some("/images/a.img"));
    }

    #[test]
    fn test_mismatched_end_tags_are_tolerated() {
        let xml = r#"<domain><devices>
    <disk type='file'><source file='/images/a.img'/></disks>
    <interface type='network'><target dev='vnet0'/></iface>
</devices></domain>"#;

        assert_eq!(disk_sources(xml), vec!["/images/a.img"]);
        assert_eq!(network_interfaces(xml), vec!["vnet0"]);
    }

    #[test]
    fn test_mismatched_disk_close_does_not_leak_into_later_devices() {
        let xml = r#"<domain><devices>
    <disk type='file'><source file='/a.img'/></disks>
    <interface type='network'><source file='/not-a-disk'/><target dev='vnet0'/></interface>
    <hostdev mode='subsystem'><source file='/also-not'/></hostdev>
</devices></domain>"#;

        assert_eq!(disk_sources(xml), vec!["/a.img"]);
        assert_eq!(network_interfaces(xml), vec!["vnet0"]);
    }
}
