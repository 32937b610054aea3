use crate::measure::{Rtt, Throughput};

/// A named network and CPU throttling profile.
///
/// See [`MOBILE_SLOW_4G`] and [`DESKTOP_DENSE_4G`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThrottlingPreset {
    pub rtt: Rtt,
    pub throughput: Throughput,
    pub cpu_slowdown_multiplier: f64,
}

/// Mobile device on a slow 4G network.
///
/// This is the profile used by [`SimulationOptions::default`].
///
/// ```
/// # use lantern_core::defaults::*;
/// assert_eq!(MOBILE_SLOW_4G.rtt.to_string(), "150ms");
/// assert_eq!(MOBILE_SLOW_4G.throughput.bits_per_sec(), 1_677_721);
/// assert_eq!(MOBILE_SLOW_4G.cpu_slowdown_multiplier, 4.0);
/// ```
///
/// [`SimulationOptions::default`]: crate::simulator::SimulationOptions
pub const MOBILE_SLOW_4G: ThrottlingPreset = ThrottlingPreset {
    rtt: Rtt::from_millis(150),
    // 1.6 * 1024 kbps
    throughput: Throughput::new(1_677_721),
    cpu_slowdown_multiplier: 4.0,
};

/// Desktop on a fast, dense 4G network. No CPU throttling.
///
/// ```
/// # use lantern_core::defaults::*;
/// assert_eq!(DESKTOP_DENSE_4G.rtt.to_string(), "40ms");
/// assert_eq!(DESKTOP_DENSE_4G.throughput.to_string(), "10mbps");
/// ```
pub const DESKTOP_DENSE_4G: ThrottlingPreset = ThrottlingPreset {
    rtt: Rtt::from_millis(40),
    throughput: Throughput::from_kbps(10 * 1_024),
    cpu_slowdown_multiplier: 1.0,
};

/// Upper bound on the number of network requests in flight at once.
///
/// The effective bound is further capped by how many connections the
/// configured throughput can saturate, see
/// [`TcpConnection::maximum_saturated_connections`].
///
/// [`TcpConnection::maximum_saturated_connections`]: crate::simulator::TcpConnection::maximum_saturated_connections
pub const DEFAULT_MAXIMUM_CONCURRENT_REQUESTS: usize = 10;

/// Fraction of the CPU slowdown applied to tasks that performed layout.
///
/// Layout scales less than script execution under CPU throttling.
pub const DEFAULT_LAYOUT_TASK_MULTIPLIER: f64 = 0.5;

/// Hard cap, in milliseconds, on the simulated duration of a single CPU task.
pub const DEFAULT_MAXIMUM_CPU_TASK_DURATION_MS: f64 = 10_000.0;

/// Server response time, in milliseconds, used for origins without an
/// estimate of their own.
pub const DEFAULT_SERVER_RESPONSE_TIME_MS: f64 = 30.0;

/// Number of connections a browser keeps per origin over HTTP/1.x.
///
/// HTTP/2 origins multiplex over a single connection.
pub const CONNECTIONS_PER_ORIGIN: usize = 6;

/// The simulation gives up after this many clock advances.
pub const MAXIMUM_ITERATIONS: usize = 100_000;

/// DNS resolution of a new host costs this many round trips.
pub const DNS_RESOLUTION_RTT_MULTIPLIER: f64 = 2.0;

/// CPU tasks shorter than this, in milliseconds, are candidates for pruning
/// out of a page graph.
pub const SIGNIFICANT_TASK_DURATION_MS: f64 = 10.0;
