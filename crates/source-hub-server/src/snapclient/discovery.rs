//! Snapserver discovery via `avahi-browse`.
//!
//! Parses the resolved-service lines of `avahi-browse -r -t -p _snapcast._tcp` and
//! filters out loopback, IPv6, and this machine's own announcements.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use source_hub_types::ServerDescriptor;
use tokio::process::Command;

pub const SNAPCAST_SERVICE: &str = "_snapcast._tcp";

/// Source of candidate snapservers.
#[async_trait]
pub trait ServerBrowser: Send + Sync {
    /// One bounded discovery pass. Never fails; an unavailable backend yields an empty list.
    async fn discover(&self) -> Vec<ServerDescriptor>;
}

pub struct AvahiBrowser {
    command: Option<PathBuf>,
    timeout: Duration,
    local_host: String,
}

impl AvahiBrowser {
    pub fn new(timeout: Duration) -> Self {
        let command = find_in_path("avahi-browse");
        match command.as_ref() {
            Some(path) => tracing::info!(path = %path.display(), "using avahi-browse for discovery"),
            None => tracing::warn!("avahi-browse not found; snapserver discovery disabled"),
        }
        Self {
            command,
            timeout,
            local_host: local_short_hostname(),
        }
    }

    #[cfg(test)]
    pub fn with_command(command: PathBuf, timeout: Duration, local_host: &str) -> Self {
        Self {
            command: Some(command),
            timeout,
            local_host: local_host.to_lowercase(),
        }
    }
}

#[async_trait]
impl ServerBrowser for AvahiBrowser {
    async fn discover(&self) -> Vec<ServerDescriptor> {
        let Some(command) = self.command.as_ref() else {
            return Vec::new();
        };
        tracing::debug!("discovering snapservers via avahi");
        let child = Command::new(command)
            .args(["-r", "-t", SNAPCAST_SERVICE, "-p"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let child = match child {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!(error = %e, path = %command.display(), "avahi-browse spawn failed");
                return Vec::new();
            }
        };

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "avahi-browse failed");
                return Vec::new();
            }
            Err(_) => {
                tracing::warn!(timeout_ms = self.timeout.as_millis() as u64, "avahi-browse timed out");
                return Vec::new();
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            tracing::warn!(
                code = ?output.status.code(),
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "avahi-browse exited with error"
            );
            if stdout.trim().is_empty() {
                return Vec::new();
            }
        }

        let servers = parse_avahi_output(&stdout, &self.local_host);
        tracing::info!(count = servers.len(), "snapserver discovery finished");
        servers
    }
}

/// Parse `avahi-browse -p` output into deduplicated descriptors sorted by name.
///
/// Resolved lines look like
/// `=;eth0;IPv4;Name;_snapcast._tcp;local;resolve;host.local;192.168.1.50;1704;txt`.
pub fn parse_avahi_output(output: &str, local_host: &str) -> Vec<ServerDescriptor> {
    let mut servers = Vec::new();
    for line in output.lines() {
        if !line.starts_with('=') {
            continue;
        }
        let parts: Vec<&str> = line.split(';').collect();
        if parts.len() < 10 {
            tracing::warn!(line = %line, "skipping avahi line with too few fields");
            continue;
        }
        if parts[2] != "IPv4" {
            continue;
        }
        let hostname = parts[7].trim();
        let address = parts[8].trim();
        if address.starts_with("127.") || is_own_host(hostname, local_host) {
            continue;
        }
        let port = match parts[9].trim().parse::<u16>() {
            Ok(port) => port,
            Err(_) => {
                tracing::warn!(line = %line, "skipping avahi line with invalid port");
                continue;
            }
        };
        servers.push(ServerDescriptor::new(address, short_hostname(hostname), port));
    }
    finalize(servers)
}

/// Dedupe by host, keeping the first occurrence, then sort by name.
pub(crate) fn finalize(servers: Vec<ServerDescriptor>) -> Vec<ServerDescriptor> {
    let mut seen = HashSet::new();
    let mut unique: Vec<ServerDescriptor> = servers
        .into_iter()
        .filter(|server| seen.insert(server.host.clone()))
        .collect();
    unique.sort_by(|a, b| a.name.cmp(&b.name));
    unique
}

/// Lowercased label before the first dot.
pub(crate) fn short_hostname(hostname: &str) -> String {
    hostname
        .split('.')
        .next()
        .unwrap_or_default()
        .to_lowercase()
}

pub(crate) fn is_own_host(hostname: &str, local_host: &str) -> bool {
    !local_host.is_empty() && short_hostname(hostname) == local_host
}

/// This machine's short hostname, lowercased.
pub(crate) fn local_short_hostname() -> String {
    let raw = gethostname::gethostname().to_string_lossy().to_string();
    let short = short_hostname(raw.trim());
    tracing::debug!(hostname = %short, "local hostname");
    short
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable_file(candidate))
}

fn is_executable_file(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}
