use super::{SimulationError, SimulationOptions, TcpConnection};
use crate::{
    defaults::{CONNECTIONS_PER_ORIGIN, DEFAULT_SERVER_RESPONSE_TIME_MS},
    record::NetworkRecord,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Identifies one connection of a [`ConnectionPool`]: the origin and the
/// connection's index among the connections of that origin.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionKey {
    origin: String,
    index: usize,
}

impl ConnectionKey {
    pub fn origin(&self) -> &str {
        &self.origin
    }
}

/// Every simulated connection of one simulation run, grouped by origin.
///
/// Each origin gets one connection per request that did not reuse a
/// connection in the recording, and at least [`CONNECTIONS_PER_ORIGIN`]
/// (a single one for HTTP/2 origins).
#[derive(Debug, Clone)]
pub struct ConnectionPool {
    connections_by_origin: BTreeMap<String, Vec<TcpConnection>>,
    connection_reused: HashMap<String, bool>,

    connections_by_record: HashMap<String, ConnectionKey>,
    connections_in_use: BTreeSet<ConnectionKey>,
}

impl ConnectionPool {
    /// Create the pool for every network record of the simulated graph,
    /// including the ones served from a cache, which take part in the
    /// connection reuse estimate.
    pub fn new<'a, I>(records: I, options: &SimulationOptions) -> Self
    where
        I: IntoIterator<Item = &'a NetworkRecord>,
    {
        let mut records_by_origin: BTreeMap<&str, Vec<&NetworkRecord>> = BTreeMap::new();
        for record in records {
            records_by_origin
                .entry(record.origin.as_str())
                .or_default()
                .push(record);
        }

        let connection_reused = estimate_connection_reuse(&records_by_origin);

        let rtt = options.rtt.as_millis_f64();
        let throughput = options.throughput.bits_per_sec() as f64;

        let mut connections_by_origin = BTreeMap::new();
        for (origin, records) in &records_by_origin {
            let additional_rtt = options
                .additional_rtt_by_origin
                .get(*origin)
                .copied()
                .unwrap_or(0.0);
            let server_response_time = options
                .server_response_time_by_origin
                .get(*origin)
                .copied()
                .unwrap_or(DEFAULT_SERVER_RESPONSE_TIME_MS);

            let mut connections: Vec<TcpConnection> = records
                .iter()
                .filter(|record| !connection_reused.get(&record.request_id).copied().unwrap_or(false))
                .map(|record| {
                    TcpConnection::new(
                        rtt + additional_rtt,
                        throughput,
                        server_response_time,
                        record.is_secure(),
                        record.is_h2(),
                    )
                })
                .collect();

            let Some(first) = connections.first().cloned() else {
                continue;
            };
            let minimum_connections = if first.is_h2() {
                1
            } else {
                CONNECTIONS_PER_ORIGIN
            };
            while connections.len() < minimum_connections {
                connections.push(first.clone());
            }

            connections_by_origin.insert((*origin).to_owned(), connections);
        }

        Self {
            connections_by_origin,
            connection_reused,
            connections_by_record: HashMap::new(),
            connections_in_use: BTreeSet::new(),
        }
    }

    pub fn connections(&self, origin: &str) -> &[TcpConnection] {
        self.connections_by_origin
            .get(origin)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn connection(&self, key: &ConnectionKey) -> Option<&TcpConnection> {
        self.connections_by_origin
            .get(&key.origin)
            .and_then(|connections| connections.get(key.index))
    }

    fn connection_mut(&mut self, key: &ConnectionKey) -> Option<&mut TcpConnection> {
        self.connections_by_origin
            .get_mut(&key.origin)
            .and_then(|connections| connections.get_mut(key.index))
    }

    /// Whether the recording suggests `record` reused an open connection.
    pub fn connection_was_reused(&self, record: &NetworkRecord) -> bool {
        self.connection_reused
            .get(&record.request_id)
            .copied()
            .unwrap_or(false)
    }

    /// Assign an idle connection of the record's origin to `record`.
    ///
    /// Unless `ignore_connection_reused` is set, only connections whose
    /// warmth matches what was observed for the record are candidates.
    /// Among those the one with the largest congestion window wins.
    /// Returns `Ok(None)` when no connection is available right now.
    pub fn acquire(
        &mut self,
        record: &NetworkRecord,
        ignore_connection_reused: bool,
    ) -> Result<Option<ConnectionKey>, SimulationError> {
        if self.connections_by_record.contains_key(&record.request_id) {
            return Err(SimulationError::ConnectionAlreadyAcquired {
                request_id: record.request_id.clone(),
            });
        }

        let observed_reuse = self.connection_was_reused(record);
        let mut best: Option<(usize, u64)> = None;
        for (index, connection) in self.connections(&record.origin).iter().enumerate() {
            if !ignore_connection_reused && connection.is_warm() != observed_reuse {
                continue;
            }
            let key = ConnectionKey {
                origin: record.origin.clone(),
                index,
            };
            if self.connections_in_use.contains(&key) {
                continue;
            }
            if best.is_none_or(|(_, window)| connection.congestion_window() > window) {
                best = Some((index, connection.congestion_window()));
            }
        }

        let Some((index, _)) = best else {
            return Ok(None);
        };
        let key = ConnectionKey {
            origin: record.origin.clone(),
            index,
        };
        self.connections_in_use.insert(key.clone());
        self.connections_by_record
            .insert(record.request_id.clone(), key.clone());

        Ok(Some(key))
    }

    /// The connection currently assigned to `record`.
    pub fn active_connection(
        &mut self,
        record: &NetworkRecord,
    ) -> Result<&mut TcpConnection, SimulationError> {
        let missing = || SimulationError::MissingConnection {
            request_id: record.request_id.clone(),
        };
        let key = self
            .connections_by_record
            .get(&record.request_id)
            .cloned()
            .ok_or_else(missing)?;
        self.connection_mut(&key).ok_or_else(missing)
    }

    /// Hand the connection of `record` back to the pool. The connection
    /// stays in whatever state (warmth, congestion window) it reached.
    pub fn release(&mut self, record: &NetworkRecord) {
        if let Some(key) = self.connections_by_record.remove(&record.request_id) {
            self.connections_in_use.remove(&key);
        }
    }

    pub fn connections_in_use(&self) -> impl Iterator<Item = &ConnectionKey> {
        self.connections_in_use.iter()
    }

    /// Share `throughput` evenly between the connections in use.
    pub fn distribute_throughput(&mut self, throughput: f64) {
        let in_use = self.connections_in_use.len();
        if in_use == 0 {
            return;
        }
        let share = throughput / in_use as f64;
        let keys: Vec<ConnectionKey> = self.connections_in_use.iter().cloned().collect();
        for key in keys {
            if let Some(connection) = self.connection_mut(&key) {
                connection.set_throughput(share);
            }
        }
    }
}

/// Coarse estimate of which records reused a connection.
///
/// The first request of an origin never did. Any other request did if it
/// started once some request of the origin had already finished, or if
/// the origin speaks HTTP/2.
fn estimate_connection_reuse(
    records_by_origin: &BTreeMap<&str, Vec<&NetworkRecord>>,
) -> HashMap<String, bool> {
    let mut reused = HashMap::new();

    for records in records_by_origin.values() {
        let earliest_reuse_possible = records
            .iter()
            .map(|record| record.network_end_time)
            .fold(f64::INFINITY, f64::min);

        for record in records {
            reused.insert(
                record.request_id.clone(),
                record.network_request_time >= earliest_reuse_possible || record.is_h2(),
            );
        }

        let first = records.iter().copied().reduce(|first, record| {
            if record.network_request_time < first.network_request_time {
                record
            } else {
                first
            }
        });
        if let Some(first) = first {
            reused.insert(first.request_id.clone(), false);
        }
    }

    reused
}
