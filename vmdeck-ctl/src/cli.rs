//! Command-line argument parsing.

use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};
use uuid::Uuid;

/// vmdeck - VM lifecycle control over a libvirt daemon
#[derive(Parser, Debug)]
#[command(name = "vmdeck-ctl")]
#[command(about = "vmdeck - VM lifecycle control over a libvirt daemon")]
#[command(version)]
pub struct Args {
    /// Path to configuration file (optional, defaults used if not found)
    #[arg(short, long, env = "VMDECK_CONFIG")]
    pub config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", env = "VMDECK_LOG_LEVEL")]
    pub log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    pub log_json: bool,

    /// Libvirt connection URI (e.g., qemu+ssh://root@host/system)
    #[arg(long, env = "VMDECK_URI")]
    pub uri: Option<String>,

    /// Upper bound for each daemon call, in seconds
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// QEMU executable written into new domain definitions
    #[arg(long)]
    pub qemu_path: Option<String>,

    /// Domain definition template override
    #[arg(long)]
    pub template: Option<PathBuf>,

    /// Enable development mode (in-memory mock daemon)
    #[arg(long)]
    pub dev: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// List every VM, running and defined
    List,
    /// Show one VM by name
    Get { name: String },
    /// Show one VM by UUID
    GetUuid { uuid: Uuid },
    /// Define a new VM (not started)
    Create(CreateArgs),
    /// Stop a VM if running and remove its definition
    Destroy { name: String },
    /// Start a defined VM
    Start { name: String },
    /// Ask the guest to shut down
    Shutdown { name: String },
    /// Power a VM off immediately
    ForceShutdown { name: String },
    /// Ask the guest to reboot
    Reboot { name: String },
    /// Pause a running VM
    Suspend { name: String },
    /// Resume a paused VM
    Resume { name: String },
    /// Show a VM's status code and label
    Status { name: String },
    /// Sample a VM's descriptor repeatedly
    Monitor {
        name: String,
        /// Seconds between samples
        #[arg(long, default_value = "5")]
        interval_secs: u64,
        /// Number of samples to take
        #[arg(long, default_value = "1")]
        count: u32,
    },
    /// Change a guest user's password through the guest agent
    SetPassword {
        name: String,
        #[arg(long)]
        username: String,
        #[arg(long, env = "VMDECK_GUEST_PASSWORD", hide_env_values = true)]
        password: String,
        /// Password is already crypt()-encoded
        #[arg(long)]
        encrypted: bool,
    },
}

#[derive(ClapArgs, Debug, Clone, PartialEq, Eq)]
pub struct CreateArgs {
    pub name: String,

    /// Backing disk image
    #[arg(long)]
    pub disk: String,

    /// Memory in MiB
    #[arg(long, default_value = "2048")]
    pub memory_mb: u64,

    /// Number of vCPUs
    #[arg(long, default_value = "2")]
    pub cpus: u32,

    /// Libvirt network to attach to
    #[arg(long, default_value = "default")]
    pub network: String,

    /// Accepted for compatibility; the definition is rendered from the template
    #[arg(long)]
    pub xml_config_path: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_global_flags() {
        let args = Args::parse_from([
            "vmdeck-ctl",
            "--uri",
            "qemu+ssh://root@host/system",
            "--timeout-secs",
            "5",
            "--dev",
            "list",
        ]);

        assert_eq!(args.uri.as_deref(), Some("qemu+ssh://root@host/system"));
        assert_eq!(args.timeout_secs, Some(5));
        assert!(args.dev);
        assert_eq!(args.command, Command::List);
    }

    #[test]
    fn test_parse_create() {
        let args = Args::parse_from([
            "vmdeck-ctl",
            "create",
            "web-01",
            "--disk",
            "/images/web-01.qcow2",
            "--memory-mb",
            "4096",
        ]);

        match args.command {
            Command::Create(create) => {
                assert_eq!(create.name, "web-01");
                assert_eq!(create.memory_mb, 4096);
                assert_eq!(create.cpus, 2);
                assert_eq!(create.network, "default");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_uuid_rejects_garbage() {
        assert!(Args::try_parse_from(["vmdeck-ctl", "get-uuid", "not-a-uuid"]).is_err());
    }
}
