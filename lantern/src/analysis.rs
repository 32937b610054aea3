//! Per-origin network characteristics observed in a recording.
//!
//! The simulator replays every origin with the same base RTT. Origins that
//! were measurably further away, or slower to answer, get their difference
//! back through [`SimulationOptions`] overrides.

use lantern_core::{record::NetworkRecord, simulator::SimulationOptions};
use std::collections::BTreeMap;
use tracing::debug;

/// Round trip and server response time estimates, in milliseconds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetworkAnalysis {
    rtt_by_origin: BTreeMap<String, f64>,
    server_response_time_by_origin: BTreeMap<String, f64>,
}

impl NetworkAnalysis {
    pub fn analyze<'a, I>(records: I) -> Self
    where
        I: IntoIterator<Item = &'a NetworkRecord>,
    {
        let records: Vec<&NetworkRecord> = records
            .into_iter()
            .filter(|record| {
                record.timing.is_some()
                    && !record.from_disk_cache
                    && !record.from_memory_cache
                    && !record.is_non_network_protocol()
            })
            .collect();

        let mut rtt_samples: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
        for record in &records {
            let samples = connection_rtt_samples(record);
            if !samples.is_empty() {
                rtt_samples
                    .entry(record.origin.as_str())
                    .or_default()
                    .extend(samples);
            }
        }
        let rtt_by_origin: BTreeMap<String, f64> = rtt_samples
            .into_iter()
            .map(|(origin, samples)| {
                let rtt = samples.into_iter().fold(f64::INFINITY, f64::min);
                (origin.to_owned(), rtt)
            })
            .collect();
        let fallback_rtt = rtt_by_origin.values().copied().fold(f64::INFINITY, f64::min);
        let fallback_rtt = if fallback_rtt.is_finite() {
            fallback_rtt
        } else {
            0.0
        };

        let mut response_samples: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
        for record in &records {
            let Some(timing) = record.timing else {
                continue;
            };
            if timing.receive_headers_end < 0.0 || timing.send_end < 0.0 {
                continue;
            }
            let rtt = rtt_by_origin
                .get(&record.origin)
                .copied()
                .unwrap_or(fallback_rtt);
            let ttfb = timing.receive_headers_end - timing.send_end;
            response_samples
                .entry(record.origin.as_str())
                .or_default()
                .push((ttfb - rtt).max(0.0));
        }
        let server_response_time_by_origin = response_samples
            .into_iter()
            .map(|(origin, samples)| (origin.to_owned(), median(samples)))
            .collect();

        let analysis = Self {
            rtt_by_origin,
            server_response_time_by_origin,
        };
        debug!(
            origins = analysis.rtt_by_origin.len(),
            rtt = ?analysis.rtt(),
            "network analysed"
        );
        analysis
    }

    /// The fastest observed origin RTT.
    pub fn rtt(&self) -> Option<f64> {
        self.rtt_by_origin.values().copied().reduce(f64::min)
    }

    pub fn rtt_by_origin(&self) -> &BTreeMap<String, f64> {
        &self.rtt_by_origin
    }

    /// How much slower than the fastest origin each origin was.
    pub fn additional_rtt_by_origin(&self) -> BTreeMap<String, f64> {
        let Some(rtt) = self.rtt() else {
            return BTreeMap::new();
        };
        self.rtt_by_origin
            .iter()
            .map(|(origin, origin_rtt)| (origin.clone(), origin_rtt - rtt))
            .collect()
    }

    pub fn server_response_time_by_origin(&self) -> &BTreeMap<String, f64> {
        &self.server_response_time_by_origin
    }

    /// Copy the per-origin estimates into `options`, replacing any override
    /// already set for the same origin.
    pub fn apply_to(&self, options: &mut SimulationOptions) {
        options
            .additional_rtt_by_origin
            .extend(self.additional_rtt_by_origin());
        options.server_response_time_by_origin.extend(
            self.server_response_time_by_origin
                .iter()
                .map(|(origin, time)| (origin.clone(), *time)),
        );
    }
}

/// Round trips observed while opening the connection of `record`: the TCP
/// handshake and, when it is distinguishable, the TLS one.
fn connection_rtt_samples(record: &NetworkRecord) -> Vec<f64> {
    let Some(timing) = record.timing else {
        return Vec::new();
    };
    if record.connection_reused {
        return Vec::new();
    }
    let (connect_start, connect_end) = (timing.connect_start, timing.connect_end);
    let (ssl_start, ssl_end) = (timing.ssl_start, timing.ssl_end);

    if connect_start < 0.0 || connect_end < 0.0 {
        return Vec::new();
    }
    if record.protocol.starts_with("h3") {
        return vec![connect_end - connect_start];
    }
    if ssl_start >= 0.0 && ssl_end >= 0.0 && ssl_start != connect_start {
        return vec![ssl_start - connect_start, connect_end - ssl_start];
    }
    vec![connect_end - connect_start]
}

fn median(mut samples: Vec<f64>) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.sort_by(f64::total_cmp);
    let middle = samples.len() / 2;
    if samples.len() % 2 == 0 {
        (samples[middle - 1] + samples[middle]) / 2.0
    } else {
        samples[middle]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lantern_core::record::ResourceTiming;

    #[test]
    fn rtt_from_connection_timing() {
        let records = vec![
            record("1", "https://a.com/", connection(0.0, 50.0, 100.0), 110.0, 250.0),
            record("2", "https://b.com/", connection(0.0, -1.0, 80.0), 80.0, 200.0),
            reused("3", "https://b.com/x.js", 10.0, 200.0),
        ];

        let analysis = NetworkAnalysis::analyze(&records);

        assert_eq!(analysis.rtt_by_origin().get("https://a.com"), Some(&50.0));
        assert_eq!(analysis.rtt_by_origin().get("https://b.com"), Some(&80.0));
        assert_eq!(analysis.rtt(), Some(50.0));
        assert_eq!(
            analysis.additional_rtt_by_origin(),
            BTreeMap::from([
                ("https://a.com".to_owned(), 0.0),
                ("https://b.com".to_owned(), 30.0),
            ])
        );
    }

    #[test]
    fn server_response_time_is_the_median() {
        let records = vec![
            record("1", "https://a.com/", connection(0.0, -1.0, 40.0), 40.0, 100.0),
            reused("2", "https://a.com/1", 0.0, 60.0),
            reused("3", "https://a.com/2", 0.0, 240.0),
            reused("4", "https://a.com/3", 0.0, 30.0),
        ];

        let analysis = NetworkAnalysis::analyze(&records);

        // samples: 20, 20, 200 and 0 (clamped), median of four
        assert_eq!(
            analysis.server_response_time_by_origin().get("https://a.com"),
            Some(&20.0)
        );
    }

    #[test]
    fn cached_and_untimed_records_are_ignored() {
        let mut cached = record("1", "https://a.com/", connection(0.0, -1.0, 10.0), 10.0, 20.0);
        cached.from_disk_cache = true;
        let untimed = NetworkRecord::new("2", "https://b.com/").unwrap();

        let analysis = NetworkAnalysis::analyze(&[cached, untimed]);

        assert_eq!(analysis, NetworkAnalysis::default());
        assert_eq!(analysis.rtt(), None);
        assert!(analysis.additional_rtt_by_origin().is_empty());
    }

    #[test]
    fn apply_to_options() {
        let records = vec![
            record("1", "https://a.com/", connection(0.0, -1.0, 50.0), 50.0, 100.0),
            record("2", "https://b.com/", connection(0.0, -1.0, 90.0), 90.0, 200.0),
        ];
        let mut options = SimulationOptions::default();
        options
            .additional_rtt_by_origin
            .insert("https://c.com".to_owned(), 5.0);

        NetworkAnalysis::analyze(&records).apply_to(&mut options);

        assert_eq!(options.additional_rtt_by_origin.get("https://b.com"), Some(&40.0));
        assert_eq!(options.additional_rtt_by_origin.get("https://c.com"), Some(&5.0));
        assert_eq!(
            options.server_response_time_by_origin.get("https://b.com"),
            Some(&20.0)
        );
    }

    #[test]
    fn median_of_samples() {
        assert_eq!(median(vec![]), 0.0);
        assert_eq!(median(vec![3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(vec![4.0, 1.0, 2.0, 3.0]), 2.5);
    }

    fn connection(connect_start: f64, ssl_start: f64, connect_end: f64) -> ResourceTiming {
        ResourceTiming {
            connect_start,
            connect_end,
            ssl_start,
            ssl_end: if ssl_start >= 0.0 { connect_end } else { -1.0 },
            ..ResourceTiming::default()
        }
    }

    fn record(
        id: &str,
        url: &str,
        timing: ResourceTiming,
        send_end: f64,
        receive_headers_end: f64,
    ) -> NetworkRecord {
        let mut record = NetworkRecord::new(id, url).unwrap();
        record.timing = Some(ResourceTiming {
            send_start: send_end,
            send_end,
            receive_headers_end,
            ..timing
        });
        record
    }

    fn reused(id: &str, url: &str, send_end: f64, receive_headers_end: f64) -> NetworkRecord {
        let mut record = record(id, url, ResourceTiming::default(), send_end, receive_headers_end);
        record.connection_reused = true;
        record
    }
}
