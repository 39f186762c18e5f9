//! Domain definition template.
//!
//! The template is plain libvirt XML with positional `{N}` placeholders:
//!
//! | Slot | Value |
//! |------|-------|
//! | `{0}` | VM name |
//! | `{1}` | generated UUID |
//! | `{2}` | maximum memory (KiB) |
//! | `{3}` | current memory (KiB) |
//! | `{4}` | vCPU count |
//! | `{5}` | reserved; an `<emulator>` element when a QEMU path is configured |
//! | `{6}` | disk image path |
//! | `{7}` | network name |
//!
//! Rendering is positional substitution only. Braces that do not enclose a
//! slot number are copied through untouched.

use std::path::Path;

use quick_xml::escape::escape;
use tracing::debug;
use uuid::Uuid;

use crate::error::{HypervisorError, Result};
use crate::types::CreateVmRequest;

/// Template shipped with the crate.
pub const BUILTIN_TEMPLATE: &str = include_str!("../templates/vm-template.xml");

/// A loaded domain definition template.
#[derive(Debug, Clone)]
pub struct DomainTemplate {
    source: String,
    qemu_path: Option<String>,
}

impl Default for DomainTemplate {
    fn default() -> Self {
        Self::builtin()
    }
}

impl DomainTemplate {
    /// The built-in template.
    pub fn builtin() -> Self {
        Self::from_source(BUILTIN_TEMPLATE)
    }

    /// A template from an in-memory string.
    pub fn from_source(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            qemu_path: None,
        }
    }

    /// Read a template file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path).map_err(|e| {
            HypervisorError::TemplateRender(format!("cannot read {}: {}", path.display(), e))
        })?;
        debug!(path = %path.display(), "Loaded domain template");
        Ok(Self::from_source(source))
    }

    /// Load the override at `path` when given, the built-in template otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_path(path),
            None => Ok(Self::builtin()),
        }
    }

    /// Emit an `<emulator>` element with this executable.
    pub fn with_qemu_path(mut self, qemu_path: Option<String>) -> Self {
        self.qemu_path = qemu_path.filter(|p| !p.trim().is_empty());
        self
    }

    /// Raw template text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Render the definition for `request` under `uuid`.
    pub fn render_definition(&self, request: &CreateVmRequest, uuid: &Uuid) -> Result<String> {
        let emulator = self
            .qemu_path
            .as_deref()
            .map(|path| format!("    <emulator>{}</emulator>\n", escape(path)))
            .unwrap_or_default();

        let slots = [
            escape(request.name.as_str()).into_owned(),
            uuid.to_string(),
            request.memory_kib().to_string(),
            request.memory_kib().to_string(),
            request.cpu_count.to_string(),
            emulator,
            escape(request.disk_image_path.as_str()).into_owned(),
            escape(request.network_name.as_str()).into_owned(),
        ];

        self.render(&slots)
    }

    /// Substitute `{N}` with `slots[N]`.
    pub fn render(&self, slots: &[String]) -> Result<String> {
        render_positional(&self.source, slots)
    }
}

fn render_positional(source: &str, slots: &[String]) -> Result<String> {
    let mut out = String::with_capacity(source.len() + slots.iter().map(String::len).sum::<usize>());
    let mut rest = source;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];

        let digits = after.bytes().take_while(u8::is_ascii_digit).count();
        if digits > 0 && after.as_bytes().get(digits) == Some(&b'}') {
            let index: usize = after[..digits].parse().map_err(|_| {
                HypervisorError::TemplateRender(format!("bad placeholder {{{}}}", &after[..digits]))
            })?;
            let value = slots.get(index).ok_or_else(|| {
                HypervisorError::TemplateRender(format!(
                    "placeholder {{{}}} has no value ({} supplied)",
                    index,
                    slots.len()
                ))
            })?;
            out.push_str(value);
            rest = &after[digits + 1..];
        } else {
            out.push('{');
            rest = after;
        }
    }

    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn request() -> CreateVmRequest {
        CreateVmRequest::new("web-01", "/var/lib/libvirt/images/web-01.qcow2")
            .with_memory(1024)
            .with_cpu(4)
    }

    #[test]
    fn test_builtin_template_renders_every_slot() {
        let uuid = Uuid::new_v4();
        let xml = DomainTemplate::builtin().render_definition(&request(), &uuid).unwrap();

        assert!(xml.contains("<name>web-01</name>"));
        assert!(xml.contains(&format!("<uuid>{}</uuid>", uuid)));
        assert!(xml.contains("<memory unit='KiB'>1048576</memory>"));
        assert!(xml.contains("<currentMemory unit='KiB'>1048576</currentMemory>"));
        assert!(xml.contains("<vcpu placement='static'>4</vcpu>"));
        assert!(xml.contains("<source file='/var/lib/libvirt/images/web-01.qcow2'/>"));
        assert!(xml.contains("<source network='default'/>"));
        assert!(!xml.contains("<emulator>"));
        assert!(!xml.contains("{5}"));
    }

    #[test]
    fn test_qemu_path_fills_reserved_slot() {
        let xml = DomainTemplate::builtin()
            .with_qemu_path(Some("/usr/libexec/qemu-kvm".to_string()))
            .render_definition(&request(), &Uuid::new_v4())
            .unwrap();

        assert!(xml.contains("<emulator>/usr/libexec/qemu-kvm</emulator>"));
    }

    #[test]
    fn test_values_are_xml_escaped() {
        let req = CreateVmRequest::new("a<b>&'c'", "/images/x'y.qcow2");
        let xml = DomainTemplate::builtin()
            .render_definition(&req, &Uuid::new_v4())
            .unwrap();

        assert!(xml.contains("<name>a&lt;b&gt;&amp;&apos;c&apos;</name>"));
        assert!(xml.contains("<source file='/images/x&apos;y.qcow2'/>"));
    }

    #[test]
    fn test_literal_braces_pass_through() {
        let template = DomainTemplate::from_source("{ {x} {} {0} {01}{");
        let out = template.render(&["v".to_string(), "w".to_string()]).unwrap();
        assert_eq!(out, "{ {x} {} v w{");
    }

    #[test]
    fn test_missing_slot_is_render_error() {
        let template = DomainTemplate::from_source("<name>{9}</name>");
        let err = template.render(&["only".to_string()]).unwrap_err();
        assert!(matches!(err, HypervisorError::TemplateRender(_)));
    }

    #[test]
    fn test_template_override_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "<domain><name>{{0}}</name><vcpu>{{4}}</vcpu></domain>").unwrap();

        let template = DomainTemplate::load(Some(file.path())).unwrap();
        let xml = template.render_definition(&request(), &Uuid::new_v4()).unwrap();
        assert_eq!(xml, "<domain><name>web-01</name><vcpu>4</vcpu></domain>");
    }

    #[test]
    fn test_unreadable_template_is_render_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.xml");

        let err = DomainTemplate::load(Some(&missing)).unwrap_err();
        assert!(matches!(err, HypervisorError::TemplateRender(_)));
    }
}
