//! In-process mDNS discovery for snapservers.
//!
//! Browses `_snapcast._tcp.local.` for a bounded window and applies the same
//! filtering rules as the avahi backend.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use mdns_sd::{ServiceDaemon, ServiceEvent};
use source_hub_types::ServerDescriptor;

use super::discovery::{ServerBrowser, finalize, is_own_host, local_short_hostname, short_hostname};

const SERVICE_TYPE: &str = "_snapcast._tcp.local.";

pub struct MdnsBrowser {
    timeout: Duration,
    local_host: String,
}

impl MdnsBrowser {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            local_host: local_short_hostname(),
        }
    }
}

#[async_trait]
impl ServerBrowser for MdnsBrowser {
    async fn discover(&self) -> Vec<ServerDescriptor> {
        let timeout = self.timeout;
        let local_host = self.local_host.clone();
        match tokio::task::spawn_blocking(move || browse(timeout, &local_host)).await {
            Ok(servers) => {
                tracing::info!(count = servers.len(), "mdns: snapserver discovery finished");
                servers
            }
            Err(e) => {
                tracing::warn!(error = %e, "mdns: discovery task failed");
                Vec::new()
            }
        }
    }
}

fn browse(timeout: Duration, local_host: &str) -> Vec<ServerDescriptor> {
    let daemon = match ServiceDaemon::new() {
        Ok(d) => d,
        Err(e) => {
            tracing::warn!(error = %e, "mdns: failed to start daemon");
            return Vec::new();
        }
    };
    let receiver = match daemon.browse(SERVICE_TYPE) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(error = %e, "mdns: browse failed");
            let _ = daemon.shutdown();
            return Vec::new();
        }
    };

    let deadline = Instant::now() + timeout;
    let mut servers = Vec::new();
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        let Ok(event) = receiver.recv_timeout(remaining) else {
            break;
        };
        let ServiceEvent::ServiceResolved(info) = event else {
            continue;
        };
        let hostname = info.get_hostname();
        if is_own_host(hostname, local_host) {
            continue;
        }
        let addr = info.get_addresses().iter().find_map(|ip| match ip {
            mdns_sd::ScopedIp::V4(v4) if !v4.addr().is_loopback() => Some(*v4.addr()),
            _ => None,
        });
        let Some(ip) = addr else {
            tracing::debug!(fullname = %info.get_fullname(), "mdns: resolved without usable IPv4");
            continue;
        };
        tracing::debug!(
            fullname = %info.get_fullname(),
            host = %ip,
            port = info.get_port(),
            "mdns: snapserver resolved"
        );
        servers.push(ServerDescriptor::new(
            ip.to_string(),
            short_hostname(hostname),
            info.get_port(),
        ));
    }

    let _ = daemon.stop_browse(SERVICE_TYPE);
    let _ = daemon.shutdown();
    finalize(servers)
}
