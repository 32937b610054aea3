use super::SimulationError;
use crate::{
    defaults::{
        DEFAULT_LAYOUT_TASK_MULTIPLIER, DEFAULT_MAXIMUM_CONCURRENT_REQUESTS, MOBILE_SLOW_4G,
        ThrottlingPreset,
    },
    measure::{Rtt, Throughput},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The throttling profile a graph is simulated under.
///
/// Use [`SimulationOptions::builder`] to start from the defaults and
/// override only what matters. The options can also be loaded from any
/// serde format, measure values being written as strings:
///
/// ```
/// # use lantern_core::simulator::SimulationOptions;
/// let options: SimulationOptions = serde_json::from_str(r#"{
///     "rtt": "40ms",
///     "throughput": "10mbps",
///     "cpu_slowdown_multiplier": 1.0
/// }"#).unwrap();
///
/// assert_eq!(options.rtt.to_string(), "40ms");
/// assert_eq!(options.maximum_concurrent_requests, 10);
/// ```
///
/// ## Defaults
///
/// | Setting | Default |
/// |---------|---------|
/// | RTT | 150ms |
/// | Throughput | 1.6 Mbit/s |
/// | Maximum concurrent requests | 10 |
/// | CPU slowdown | x4 |
/// | Layout task multiplier | 0.5 |
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationOptions {
    pub rtt: Rtt,
    pub throughput: Throughput,
    pub maximum_concurrent_requests: usize,
    pub cpu_slowdown_multiplier: f64,
    /// Fraction of [`cpu_slowdown_multiplier`](Self::cpu_slowdown_multiplier)
    /// applied to tasks that performed layout.
    pub layout_task_multiplier: f64,
    /// Extra round-trip time, in milliseconds, of the connections of an
    /// origin. Keyed by origin (`scheme://host[:port]`).
    pub additional_rtt_by_origin: BTreeMap<String, f64>,
    /// Server response time, in milliseconds, of an origin.
    pub server_response_time_by_origin: BTreeMap<String, f64>,
}

pub struct SimulationOptionsBuilder {
    options: SimulationOptions,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self::from(MOBILE_SLOW_4G)
    }
}

impl From<ThrottlingPreset> for SimulationOptions {
    fn from(preset: ThrottlingPreset) -> Self {
        Self {
            rtt: preset.rtt,
            throughput: preset.throughput,
            maximum_concurrent_requests: DEFAULT_MAXIMUM_CONCURRENT_REQUESTS,
            cpu_slowdown_multiplier: preset.cpu_slowdown_multiplier,
            layout_task_multiplier: DEFAULT_LAYOUT_TASK_MULTIPLIER,
            additional_rtt_by_origin: BTreeMap::new(),
            server_response_time_by_origin: BTreeMap::new(),
        }
    }
}

impl SimulationOptions {
    pub fn builder() -> SimulationOptionsBuilder {
        SimulationOptionsBuilder {
            options: Self::default(),
        }
    }

    /// Slowdown applied to tasks that performed layout.
    pub fn layout_slowdown_multiplier(&self) -> f64 {
        self.cpu_slowdown_multiplier * self.layout_task_multiplier
    }

    pub fn validate(&self) -> Result<(), SimulationError> {
        let invalid = |reason: String| Err(SimulationError::InvalidOptions { reason });

        if self.rtt == Rtt::ZERO {
            return invalid("the round-trip time must not be zero".to_owned());
        }
        if self.throughput.bits_per_sec() == 0 {
            return invalid("the throughput must not be zero".to_owned());
        }
        if self.maximum_concurrent_requests == 0 {
            return invalid("at least one concurrent request must be allowed".to_owned());
        }
        for (name, value) in [
            ("cpu_slowdown_multiplier", self.cpu_slowdown_multiplier),
            ("layout_task_multiplier", self.layout_task_multiplier),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return invalid(format!("{name} must be finite and positive, got {value}"));
            }
        }
        for (origin, value) in self
            .additional_rtt_by_origin
            .iter()
            .chain(&self.server_response_time_by_origin)
        {
            if !value.is_finite() || *value < 0.0 {
                return invalid(format!(
                    "per origin overrides must be finite and non negative, got {value} for {origin}"
                ));
            }
        }

        Ok(())
    }
}

impl SimulationOptionsBuilder {
    /// Start from a throttling preset instead of the default one.
    pub fn set_preset(mut self, preset: ThrottlingPreset) -> Self {
        self.options.rtt = preset.rtt;
        self.options.throughput = preset.throughput;
        self.options.cpu_slowdown_multiplier = preset.cpu_slowdown_multiplier;
        self
    }

    pub fn set_rtt(mut self, rtt: Rtt) -> Self {
        self.options.rtt = rtt;
        self
    }

    pub fn set_throughput(mut self, throughput: Throughput) -> Self {
        self.options.throughput = throughput;
        self
    }

    pub fn set_maximum_concurrent_requests(mut self, maximum_concurrent_requests: usize) -> Self {
        self.options.maximum_concurrent_requests = maximum_concurrent_requests;
        self
    }

    pub fn set_cpu_slowdown_multiplier(mut self, multiplier: f64) -> Self {
        self.options.cpu_slowdown_multiplier = multiplier;
        self
    }

    pub fn set_layout_task_multiplier(mut self, multiplier: f64) -> Self {
        self.options.layout_task_multiplier = multiplier;
        self
    }

    pub fn set_additional_rtt(mut self, origin: impl Into<String>, rtt: f64) -> Self {
        self.options
            .additional_rtt_by_origin
            .insert(origin.into(), rtt);
        self
    }

    pub fn set_server_response_time(mut self, origin: impl Into<String>, time: f64) -> Self {
        self.options
            .server_response_time_by_origin
            .insert(origin.into(), time);
        self
    }

    pub fn build(self) -> SimulationOptions {
        self.options
    }
}
