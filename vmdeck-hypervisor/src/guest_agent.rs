//! Commands for the in-guest QEMU agent.
//!
//! The agent speaks QMP-style JSON over the domain's virtio-serial channel.
//! Commands are built with `serde_json` so any value a caller passes in is
//! escaped correctly.

use serde_json::{json, Value};
use tracing::{debug, info};

use crate::error::{HypervisorError, Result};
use crate::traits::DomainHandle;

/// How long the daemon waits for the agent to answer, in seconds.
pub const GUEST_AGENT_TIMEOUT_SECS: i32 = 10;

/// Build the `guest-set-user-password` command.
pub fn set_password_command(username: &str, password: &str, encrypted: bool) -> String {
    json!({
        "execute": "guest-set-user-password",
        "arguments": {
            "username": username,
            "password": password,
            "encrypted": encrypted,
        }
    })
    .to_string()
}

/// Change a guest user's password through the agent.
pub fn send_set_password(
    domain: &dyn DomainHandle,
    username: &str,
    password: &str,
    encrypted: bool,
) -> Result<()> {
    let command = set_password_command(username, password, encrypted);
    let reply = execute(domain, &command)?;
    debug!(reply_len = reply.len(), "Guest agent accepted password change");
    info!("Guest password changed");
    Ok(())
}

/// Send a raw command and check the reply for an agent-side error.
fn execute(domain: &dyn DomainHandle, command: &str) -> Result<String> {
    let reply = domain
        .qemu_agent_command(command, GUEST_AGENT_TIMEOUT_SECS, 0)
        .map_err(|e| HypervisorError::GuestAgent(e.to_string()))?;

    if let Some(message) = reply_error(&reply) {
        return Err(HypervisorError::GuestAgent(message));
    }

    Ok(reply)
}

/// Error description carried by an agent reply, if any.
///
/// Replies that are not JSON are passed through; the daemon already accepted
/// them.
fn reply_error(reply: &str) -> Option<String> {
    let value: Value = serde_json::from_str(reply).ok()?;
    let error = value.get("error")?;

    let class = error.get("class").and_then(Value::as_str).unwrap_or("GenericError");
    let desc = error.get("desc").and_then(Value::as_str).unwrap_or("no description");
    Some(format!("{}: {}", class, desc))
}
