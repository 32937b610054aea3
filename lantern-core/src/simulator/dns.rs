use crate::defaults::DNS_RESOLUTION_RTT_MULTIPLIER;
use std::collections::HashMap;

/// Per-simulation cache of resolved host names.
///
/// The first lookup of a host costs [`DNS_RESOLUTION_RTT_MULTIPLIER`] round
/// trips. A later lookup never costs more than that, and costs nothing at
/// all once the cached resolution is in the past.
#[derive(Debug, Clone)]
pub struct DnsCache {
    rtt: f64,
    resolved_at: HashMap<String, f64>,
}

impl DnsCache {
    /// `rtt` in milliseconds.
    pub fn new(rtt: f64) -> Self {
        Self {
            rtt,
            resolved_at: HashMap::new(),
        }
    }

    /// Time, in milliseconds, until `host` is resolved for a lookup issued
    /// at `requested_at`.
    ///
    /// With `update_cache` the resolution time is remembered, keeping the
    /// earliest one if the host was already known.
    pub fn time_until_resolution(&mut self, host: &str, requested_at: f64, update_cache: bool) -> f64 {
        let mut time_until_resolved = self.rtt * DNS_RESOLUTION_RTT_MULTIPLIER;
        if let Some(resolved_at) = self.resolved_at.get(host) {
            let time_until_cached_is_resolved = (resolved_at - requested_at).max(0.0);
            time_until_resolved = time_until_resolved.min(time_until_cached_is_resolved);
        }

        if update_cache {
            self.update_resolved_at(host, requested_at + time_until_resolved);
        }

        time_until_resolved
    }

    /// Force the resolution time of a host.
    pub fn set_resolved_at(&mut self, host: impl Into<String>, resolved_at: f64) {
        self.resolved_at.insert(host.into(), resolved_at);
    }

    fn update_resolved_at(&mut self, host: &str, resolved_at: f64) {
        self.resolved_at
            .entry(host.to_owned())
            .and_modify(|current| *current = current.min(resolved_at))
            .or_insert(resolved_at);
    }
}
