//! Configuration management for vmdeck-ctl.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use vmdeck_hypervisor::ConnectionConfig;

use crate::cli::Args;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/vmdeck/vmdeck.yaml";

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Daemon connection settings
    pub connection: ConnectionConfig,
    /// Daemon backend type
    pub backend: DaemonBackend,
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(anyhow::anyhow!("Config file not found: {}", path.display()));
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| "Failed to parse config file")?;

        Ok(config)
    }

    /// Apply CLI argument overrides to the configuration.
    pub fn with_cli_overrides(mut self, args: &Args) -> Self {
        if let Some(ref uri) = args.uri {
            self.connection.uri = uri.clone();
        }

        if let Some(timeout_secs) = args.timeout_secs {
            self.connection.timeout_secs = timeout_secs;
        }

        if let Some(ref qemu_path) = args.qemu_path {
            self.connection.qemu_path = Some(qemu_path.clone());
        }

        if let Some(ref template) = args.template {
            self.connection.template_path = Some(template.clone());
        }

        if args.dev {
            self.backend = DaemonBackend::Mock;
        }

        self
    }
}

/// Daemon backend type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DaemonBackend {
    /// Native libvirt client
    #[default]
    Libvirt,
    /// In-memory daemon for development
    Mock,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.connection.uri, "qemu:///system");
        assert_eq!(config.connection.timeout_secs, 30);
        assert_eq!(config.backend, DaemonBackend::Libvirt);
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r#"
backend: mock
connection:
  uri: qemu+ssh://root@kvm-01/system
  timeout_secs: 60
  qemu_path: /usr/libexec/qemu-kvm
"#;

        let config: Config = serde_yaml::from_str(yaml).expect("Failed to parse YAML");

        assert_eq!(config.backend, DaemonBackend::Mock);
        assert_eq!(config.connection.uri, "qemu+ssh://root@kvm-01/system");
        assert_eq!(config.connection.timeout_secs, 60);
        assert_eq!(config.connection.qemu_path.as_deref(), Some("/usr/libexec/qemu-kvm"));
        assert_eq!(config.connection.template_path, None);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "connection:\n  uri: test:///default").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.connection.uri, "test:///default");
        assert_eq!(config.connection.timeout_secs, 30);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load(dir.path().join("absent.yaml")).is_err());
    }

    #[test]
    fn test_cli_overrides() {
        let args = Args::parse_from([
            "vmdeck-ctl",
            "--uri",
            "qemu:///session",
            "--timeout-secs",
            "3",
            "--template",
            "/etc/vmdeck/custom.xml",
            "--dev",
            "list",
        ]);

        let config = Config::default().with_cli_overrides(&args);

        assert_eq!(config.connection.uri, "qemu:///session");
        assert_eq!(config.connection.timeout_secs, 3);
        assert_eq!(
            config.connection.template_path.as_deref(),
            Some(Path::new("/etc/vmdeck/custom.xml"))
        );
        assert_eq!(config.connection.qemu_path, None);
        assert_eq!(config.backend, DaemonBackend::Mock);
    }
}
