use std::collections::HashMap;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::mpsc;
use std::thread;

use crate::protocol::TimeBase;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveStatus {
    Pending,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone)]
pub struct ResolveEntry {
    pub status: ResolveStatus,
    pub addresses: Vec<SocketAddr>,
}

/// Poll-driven hostname lookup. `resolve` enqueues, `update` drives
/// progress, `entry` reads the current status. Entries persist for the
/// resolver's lifetime; re-resolving a known hostname is a no-op.
pub trait Resolver {
    fn resolve(&mut self, hostname: &str);

    fn entry(&self, hostname: &str) -> Option<&ResolveEntry>;

    fn update(&mut self, time: &TimeBase);
}

/// DNS resolver backed by a worker thread. Lookups run on the worker via
/// `ToSocketAddrs`; results surface on the next `update`.
pub struct DnsResolver {
    entries: HashMap<String, ResolveEntry>,
    work_tx: mpsc::Sender<String>,
    result_rx: mpsc::Receiver<(String, Option<Vec<SocketAddr>>)>,
}

impl DnsResolver {
    pub fn new() -> Self {
        let (work_tx, work_rx) = mpsc::channel::<String>();
        let (result_tx, result_rx) = mpsc::channel();

        thread::spawn(move || {
            // exits when the resolver drops its sender
            while let Ok(hostname) = work_rx.recv() {
                let lookup = if hostname.contains(':') {
                    hostname.clone()
                } else {
                    format!("{}:0", hostname)
                };
                let result = lookup
                    .to_socket_addrs()
                    .ok()
                    .map(|addrs| addrs.collect::<Vec<_>>())
                    .filter(|addrs| !addrs.is_empty());
                if result_tx.send((hostname, result)).is_err() {
                    break;
                }
            }
        });

        Self {
            entries: HashMap::new(),
            work_tx,
            result_rx,
        }
    }
}

impl Default for DnsResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl Resolver for DnsResolver {
    fn resolve(&mut self, hostname: &str) {
        if self.entries.contains_key(hostname) {
            return;
        }
        self.entries.insert(
            hostname.to_owned(),
            ResolveEntry {
                status: ResolveStatus::Pending,
                addresses: Vec::new(),
            },
        );
        let _ = self.work_tx.send(hostname.to_owned());
    }

    fn entry(&self, hostname: &str) -> Option<&ResolveEntry> {
        self.entries.get(hostname)
    }

    fn update(&mut self, _time: &TimeBase) {
        while let Ok((hostname, result)) = self.result_rx.try_recv() {
            if let Some(entry) = self.entries.get_mut(&hostname) {
                match result {
                    Some(addresses) => {
                        entry.status = ResolveStatus::Succeeded;
                        entry.addresses = addresses;
                    }
                    None => entry.status = ResolveStatus::Failed,
                }
            }
        }
    }
}

/// Fixed-outcome resolver for deterministic tests: preset hostnames resolve
/// on the next update, everything else fails.
#[derive(Default)]
pub struct StaticResolver {
    outcomes: HashMap<String, Vec<SocketAddr>>,
    entries: HashMap<String, ResolveEntry>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, hostname: &str, address: SocketAddr) {
        self.outcomes
            .entry(hostname.to_owned())
            .or_default()
            .push(address);
    }
}

impl Resolver for StaticResolver {
    fn resolve(&mut self, hostname: &str) {
        if self.entries.contains_key(hostname) {
            return;
        }
        self.entries.insert(
            hostname.to_owned(),
            ResolveEntry {
                status: ResolveStatus::Pending,
                addresses: Vec::new(),
            },
        );
    }

    fn entry(&self, hostname: &str) -> Option<&ResolveEntry> {
        self.entries.get(hostname)
    }

    fn update(&mut self, _time: &TimeBase) {
        for (hostname, entry) in &mut self.entries {
            if entry.status != ResolveStatus::Pending {
                continue;
            }
            match self.outcomes.get(hostname) {
                Some(addresses) => {
                    entry.status = ResolveStatus::Succeeded;
                    entry.addresses = addresses.clone();
                }
                None => entry.status = ResolveStatus::Failed,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick() -> TimeBase {
        TimeBase {
            time: 0.0,
            delta_time: 1.0 / 60.0,
        }
    }

    #[test]
    fn test_static_resolver_success_and_failure() {
        let mut resolver = StaticResolver::new();
        let addr: SocketAddr = "[::1]:9000".parse().unwrap();
        resolver.add("server.example", addr);

        resolver.resolve("server.example");
        resolver.resolve("unknown.example");
        assert_eq!(
            resolver.entry("server.example").unwrap().status,
            ResolveStatus::Pending
        );

        resolver.update(&tick());
        let entry = resolver.entry("server.example").unwrap();
        assert_eq!(entry.status, ResolveStatus::Succeeded);
        assert_eq!(entry.addresses, vec![addr]);
        assert_eq!(
            resolver.entry("unknown.example").unwrap().status,
            ResolveStatus::Failed
        );
    }

    #[test]
    fn test_dns_resolver_localhost() {
        let mut resolver = DnsResolver::new();
        resolver.resolve("localhost");

        let mut status = ResolveStatus::Pending;
        for _ in 0..500 {
            resolver.update(&tick());
            status = resolver.entry("localhost").unwrap().status;
            if status != ResolveStatus::Pending {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
        assert_eq!(status, ResolveStatus::Succeeded);
        assert!(!resolver.entry("localhost").unwrap().addresses.is_empty());
    }

    #[test]
    fn test_re_resolve_is_idempotent() {
        let mut resolver = StaticResolver::new();
        let addr: SocketAddr = "[::1]:9000".parse().unwrap();
        resolver.add("server.example", addr);
        resolver.resolve("server.example");
        resolver.update(&tick());
        resolver.resolve("server.example");
        assert_eq!(
            resolver.entry("server.example").unwrap().status,
            ResolveStatus::Succeeded
        );
    }
}
