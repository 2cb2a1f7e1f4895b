//! Client identity resolution.
//!
//! Derives the address to key the limiter on. Forwarding headers are client
//! input and trivially forged, so they are honored only when the immediate
//! peer is itself a configured trusted proxy:
//!
//! - No trusted ranges configured: only the transport-level peer address is
//!   used, headers are ignored entirely.
//! - Peer outside the trusted ranges: headers ignored, peer returned.
//! - Peer inside the trusted ranges: the `X-Forwarded-For` chain is walked
//!   right to left (nearest proxy first) and the first hop that is not
//!   itself a trusted proxy is the real client.

use std::net::IpAddr;

use ipnet::IpNet;
use tracing::{debug, error};

pub struct ClientIdentityResolver {
    /// Immutable for the process lifetime; empty means trust nothing but
    /// the direct peer.
    trusted_ranges: Vec<IpNet>,
}

impl ClientIdentityResolver {
    pub fn new(trusted_ranges: Vec<IpNet>) -> Self {
        Self { trusted_ranges }
    }

    /// Parse a comma-separated CIDR list. Any malformed entry disables the
    /// whole list: a partially applied proxy configuration would silently
    /// trust headers it should not, so the failure mode is to trust nothing
    /// but the direct peer.
    pub fn from_config(trusted_proxies: &str) -> Self {
        let mut ranges = Vec::new();
        for entry in trusted_proxies.split(',') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            let parsed = entry
                .parse::<IpNet>()
                .or_else(|_| entry.parse::<IpAddr>().map(IpNet::from));
            match parsed {
                Ok(net) => ranges.push(net),
                Err(e) => {
                    error!(
                        entry = entry,
                        error = %e,
                        "invalid TRUSTED_PROXIES entry; ignoring all trusted \
                         proxy ranges and trusting only direct peers"
                    );
                    return Self::new(Vec::new());
                }
            }
        }
        Self::new(ranges)
    }

    pub fn has_trusted_ranges(&self) -> bool {
        !self.trusted_ranges.is_empty()
    }

    /// Resolve the client identity for a request.
    ///
    /// `peer_ip` is the transport-level peer address and is always trusted.
    /// `forwarded_for` is the raw `X-Forwarded-For` value (comma-separated,
    /// leftmost = original client) and `real_ip` the raw `X-Real-IP` value;
    /// either may be empty.
    pub fn resolve(&self, peer_ip: &str, forwarded_for: &str, real_ip: &str) -> String {
        if self.trusted_ranges.is_empty() {
            if !forwarded_for.is_empty() || !real_ip.is_empty() {
                debug!(
                    peer_ip = peer_ip,
                    "forwarding headers present but no trusted proxies configured; ignoring"
                );
            }
            return peer_ip.to_string();
        }

        if !self.is_trusted(peer_ip) {
            // The peer is not a known intermediary; its claims about further
            // upstream clients cannot be trusted.
            return peer_ip.to_string();
        }

        let hops: Vec<&str> = forwarded_for
            .split(',')
            .map(str::trim)
            .filter(|hop| !hop.is_empty())
            .collect();

        // Unwind nested trusted proxies: nearest proxy first, stop at the
        // first hop that is not itself one of ours.
        for hop in hops.iter().rev() {
            if !self.is_trusted(hop) {
                return (*hop).to_string();
            }
        }

        // Every hop was a trusted proxy (or the chain was empty).
        if let Some(first) = hops.first() {
            return (*first).to_string();
        }
        if !real_ip.is_empty() {
            return real_ip.trim().to_string();
        }
        peer_ip.to_string()
    }

    fn is_trusted(&self, address: &str) -> bool {
        let Ok(ip) = address.parse::<IpAddr>() else {
            return false;
        };
        self.trusted_ranges.iter().any(|net| net.contains(&ip))
    }
}
