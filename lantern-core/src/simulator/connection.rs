//! A slow-start aware model of a single TCP (+TLS) connection.

/// Segments a fresh connection may have in flight before the first ACK.
pub const INITIAL_CONGESTION_WINDOW: u64 = 10;

/// Maximum payload of one TCP segment, in bytes.
pub const TCP_SEGMENT_SIZE: u64 = 1_460;

/// A simulated TCP connection to one origin.
///
/// The connection does not move packets: it answers how long a download of
/// a given size takes, round trip by round trip, given the handshake still
/// to be paid and the congestion window reached so far. All times are in
/// milliseconds and throughputs in bits per second.
#[derive(Debug, Clone, PartialEq)]
pub struct TcpConnection {
    warmed: bool,
    ssl: bool,
    h2: bool,

    rtt: f64,
    throughput: f64,
    server_latency: f64,

    congestion_window: u64,
    h2_overflow_bytes_downloaded: f64,
}

/// Parameters of [`TcpConnection::simulate_download_until`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DownloadOptions {
    /// Time already spent on this download in previous steps.
    pub time_already_elapsed: f64,
    /// Stop once this much time would be elapsed. Unbounded by default.
    pub maximum_time_to_elapse: f64,
    /// DNS resolution paid before the handshake of a cold connection.
    pub dns_resolution_time: f64,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            time_already_elapsed: 0.0,
            maximum_time_to_elapse: f64::INFINITY,
            dns_resolution_time: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DownloadResult {
    pub round_trips: u32,
    pub time_elapsed: f64,
    pub bytes_downloaded: f64,
    /// Bytes received past the end of the resource. Only HTTP/2
    /// connections keep them, as a head start for the next request.
    pub extra_bytes_downloaded: f64,
    pub congestion_window: u64,
}

impl TcpConnection {
    pub fn new(rtt: f64, throughput: f64, server_latency: f64, ssl: bool, h2: bool) -> Self {
        Self {
            warmed: false,
            ssl,
            h2,
            rtt,
            throughput,
            server_latency,
            congestion_window: INITIAL_CONGESTION_WINDOW,
            h2_overflow_bytes_downloaded: 0.0,
        }
    }

    /// How many connections it takes to saturate `throughput` when each of
    /// them moves a single segment per round trip.
    ///
    /// ```
    /// # use lantern_core::simulator::TcpConnection;
    /// // 100ms round trips: 10 segments per second and per connection
    /// assert_eq!(TcpConnection::maximum_saturated_connections(100.0, 1_168_000.0), 10);
    /// ```
    pub fn maximum_saturated_connections(rtt: f64, throughput: f64) -> usize {
        let round_trips_per_second = 1_000.0 / rtt;
        let bytes_per_second = round_trips_per_second * TCP_SEGMENT_SIZE as f64;
        let minimum_throughput_per_request = bytes_per_second * 8.0;
        (throughput / minimum_throughput_per_request).floor() as usize
    }

    fn maximum_congestion_window(&self) -> u64 {
        let bytes_per_second = self.throughput / 8.0;
        let seconds_per_round_trip = self.rtt / 1_000.0;
        let bytes_per_round_trip = bytes_per_second * seconds_per_round_trip;
        (bytes_per_round_trip / TCP_SEGMENT_SIZE as f64).floor() as u64
    }

    #[inline]
    pub fn is_warm(&self) -> bool {
        self.warmed
    }

    #[inline]
    pub fn is_h2(&self) -> bool {
        self.h2
    }

    #[inline]
    pub fn is_ssl(&self) -> bool {
        self.ssl
    }

    #[inline]
    pub fn rtt(&self) -> f64 {
        self.rtt
    }

    #[inline]
    pub fn throughput(&self) -> f64 {
        self.throughput
    }

    #[inline]
    pub fn server_latency(&self) -> f64 {
        self.server_latency
    }

    #[inline]
    pub fn congestion_window(&self) -> u64 {
        self.congestion_window
    }

    pub fn set_warmed(&mut self, warmed: bool) {
        self.warmed = warmed;
    }

    pub fn set_throughput(&mut self, throughput: f64) {
        self.throughput = throughput;
    }

    pub fn set_congestion_window(&mut self, congestion_window: u64) {
        self.congestion_window = congestion_window;
    }

    /// Ignored for HTTP/1.x connections.
    pub fn set_h2_overflow_bytes_downloaded(&mut self, bytes: f64) {
        if self.h2 {
            self.h2_overflow_bytes_downloaded = bytes;
        }
    }

    /// Simulate downloading `bytes_to_download` bytes, or as much of them
    /// as fits in `options.maximum_time_to_elapse`.
    ///
    /// A cold connection first pays DNS resolution, the TCP handshake and
    /// (with TLS) one more round trip. Then the congestion window doubles
    /// every round trip until it reaches what the throughput allows.
    pub fn simulate_download_until(
        &self,
        bytes_to_download: f64,
        options: DownloadOptions,
    ) -> DownloadResult {
        let DownloadOptions {
            time_already_elapsed,
            maximum_time_to_elapse,
            dns_resolution_time,
        } = options;

        let mut bytes_to_download = bytes_to_download;
        if self.warmed && self.h2 {
            bytes_to_download -= self.h2_overflow_bytes_downloaded;
        }

        let two_way_latency = self.rtt;
        let one_way_latency = two_way_latency / 2.0;
        let maximum_congestion_window = self.maximum_congestion_window();

        let handshake_and_request = if self.warmed {
            one_way_latency
        } else {
            // SYN, SYN-ACK, ACK + request, and the TLS hello exchange
            // assuming TLS false start
            dns_resolution_time
                + one_way_latency * 3.0
                + if self.ssl { two_way_latency } else { 0.0 }
        };

        let mut round_trips = (handshake_and_request / two_way_latency).ceil() as u32;
        let time_to_first_byte = if self.warmed && self.h2 {
            0.0
        } else {
            handshake_and_request + self.server_latency + one_way_latency
        };

        let time_elapsed_for_ttfb = (time_to_first_byte - time_already_elapsed).max(0.0);
        let maximum_download_time_to_elapse = maximum_time_to_elapse - time_elapsed_for_ttfb;

        let mut congestion_window = self.congestion_window.min(maximum_congestion_window);
        let mut total_bytes_downloaded = 0.0;
        if time_elapsed_for_ttfb > 0.0 {
            total_bytes_downloaded = (congestion_window * TCP_SEGMENT_SIZE) as f64;
        } else {
            round_trips = 0;
        }

        let mut download_time_elapsed = 0.0;
        let mut bytes_remaining = bytes_to_download - total_bytes_downloaded;
        while bytes_remaining > 0.0 && download_time_elapsed <= maximum_download_time_to_elapse {
            round_trips += 1;
            download_time_elapsed += two_way_latency;
            congestion_window = (congestion_window * 2).min(maximum_congestion_window).max(1);

            let bytes_in_window = (congestion_window * TCP_SEGMENT_SIZE) as f64;
            total_bytes_downloaded += bytes_in_window;
            bytes_remaining -= bytes_in_window;
        }

        let extra_bytes_downloaded = if self.h2 {
            (total_bytes_downloaded - bytes_to_download).max(0.0)
        } else {
            0.0
        };

        DownloadResult {
            round_trips,
            time_elapsed: time_elapsed_for_ttfb + download_time_elapsed,
            bytes_downloaded: total_bytes_downloaded.min(bytes_to_download).max(0.0),
            extra_bytes_downloaded,
            congestion_window,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RTT: f64 = 100.0;
    const TEN_MBPS: f64 = 10_485_760.0;

    #[test]
    fn maximum_saturated_connections() {
        assert_eq!(
            TcpConnection::maximum_saturated_connections(RTT, 1_168_000.0),
            10
        );
        assert_eq!(TcpConnection::maximum_saturated_connections(RTT, 1.0), 0);
    }

    #[test]
    fn maximum_congestion_window() {
        let connection = TcpConnection::new(RTT, TEN_MBPS, 0.0, false, false);
        // 131_072 bytes per round trip
        assert_eq!(connection.maximum_congestion_window(), 89);
    }

    #[test]
    fn cold_tls_connection_pays_the_handshake() {
        let connection = TcpConnection::new(RTT, TEN_MBPS, 0.0, true, false);
        let result = connection.simulate_download_until(7_300.0, DownloadOptions::default());

        // 3 one-way trips for TCP, one round trip for TLS, one way back
        assert_eq!(result.time_elapsed, 300.0);
        assert_eq!(result.round_trips, 3);
        assert_eq!(result.bytes_downloaded, 7_300.0);
        assert_eq!(result.extra_bytes_downloaded, 0.0);
        assert_eq!(result.congestion_window, INITIAL_CONGESTION_WINDOW);
    }

    #[test]
    fn warm_connection_skips_the_handshake() {
        let mut connection = TcpConnection::new(RTT, TEN_MBPS, 0.0, true, false);
        connection.set_warmed(true);

        let result = connection.simulate_download_until(7_300.0, DownloadOptions::default());

        assert_eq!(result.time_elapsed, 100.0);
        assert_eq!(result.round_trips, 1);
    }

    #[test]
    fn server_latency_and_dns() {
        let connection = TcpConnection::new(RTT, TEN_MBPS, 30.0, false, false);
        let result = connection.simulate_download_until(
            1_000.0,
            DownloadOptions {
                dns_resolution_time: 200.0,
                ..DownloadOptions::default()
            },
        );

        assert_eq!(result.time_elapsed, 200.0 + 150.0 + 30.0 + 50.0);
    }

    #[test]
    fn slow_start() {
        let connection = TcpConnection::new(RTT, TEN_MBPS, 0.0, false, false);
        let result = connection.simulate_download_until(50_000.0, DownloadOptions::default());

        // 14_600 bytes with the first byte, then 29_200 and 58_400
        assert_eq!(result.time_elapsed, 400.0);
        assert_eq!(result.round_trips, 4);
        assert_eq!(result.congestion_window, 40);
        assert_eq!(result.bytes_downloaded, 50_000.0);
    }

    #[test]
    fn congestion_window_is_capped_by_throughput() {
        // 14_600 bytes per round trip at most: a window of 10 segments
        let connection = TcpConnection::new(RTT, 1_168_000.0, 0.0, false, false);
        let result = connection.simulate_download_until(100_000.0, DownloadOptions::default());

        assert_eq!(result.congestion_window, 10);
    }

    #[test]
    fn stops_at_maximum_time() {
        let connection = TcpConnection::new(RTT, TEN_MBPS, 0.0, false, false);
        let result = connection.simulate_download_until(
            50_000.0,
            DownloadOptions {
                maximum_time_to_elapse: 250.0,
                ..DownloadOptions::default()
            },
        );

        // the round trip in progress at the deadline is completed
        assert_eq!(result.time_elapsed, 300.0);
        assert_eq!(result.bytes_downloaded, 43_800.0);
    }

    #[test]
    fn time_already_elapsed_counts_towards_first_byte() {
        let connection = TcpConnection::new(RTT, TEN_MBPS, 0.0, false, false);
        let result = connection.simulate_download_until(
            1_000.0,
            DownloadOptions {
                time_already_elapsed: 150.0,
                ..DownloadOptions::default()
            },
        );

        assert_eq!(result.time_elapsed, 50.0);
    }

    #[test]
    fn warm_h2_connection_uses_overflow_bytes() {
        let mut connection = TcpConnection::new(RTT, TEN_MBPS, 0.0, true, true);
        connection.set_warmed(true);
        connection.set_h2_overflow_bytes_downloaded(1_000.0);

        let result = connection.simulate_download_until(8_300.0, DownloadOptions::default());

        assert_eq!(result.time_elapsed, 100.0);
        assert_eq!(result.round_trips, 1);
        assert_eq!(result.bytes_downloaded, 7_300.0);
        assert_eq!(result.extra_bytes_downloaded, 29_200.0 - 7_300.0);
    }

    #[test]
    fn overflow_is_ignored_over_http1() {
        let mut connection = TcpConnection::new(RTT, TEN_MBPS, 0.0, false, false);
        connection.set_h2_overflow_bytes_downloaded(1_000.0);
        assert_eq!(connection.h2_overflow_bytes_downloaded, 0.0);
    }
}
