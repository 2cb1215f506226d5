//! Filter configuration parameters.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default MASTER period: 40ms, i.e. 25 frames per second.
pub const DEFAULT_FRAME_TIME: Duration = Duration::from_millis(40);

/// Timing role of a filter.
///
/// A MASTER filter paces itself on a wall-clock period and never waits for input; a
/// SLAVE filter runs cycles back to back, gated only by input availability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterRole {
    Master,
    #[default]
    Slave,
}

/// Configuration parameters for a filter.
///
/// # Parameters
///
/// * `role` - MASTER (self-paced) or SLAVE (input-driven).
/// * `frame_time` - Target period between cycle starts for a MASTER filter.
///   Serialized as `frame_time_us`.
/// * `shared_frames` - Publish one reference-counted frame to every writer queue
///   instead of filling one frame per writer.
/// * `watchdog_timeout` - Warn when a cycle does not complete within this time.
///   `None` uses the task manager default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterParams {
    pub role: FilterRole,
    #[serde(rename = "frame_time_us", with = "micros")]
    pub frame_time: Duration,
    pub shared_frames: bool,
    pub watchdog_timeout: Option<Duration>,
}

impl Default for FilterParams {
    fn default() -> Self {
        Self {
            role: FilterRole::Slave,
            frame_time: DEFAULT_FRAME_TIME,
            shared_frames: false,
            watchdog_timeout: None,
        }
    }
}

impl FilterParams {
    /// Create a new FilterParams instance with default values
    pub fn new() -> Self {
        Default::default()
    }

    /// MASTER role paced at `frame_time`.
    pub fn master(frame_time: Duration) -> Self {
        Self::new()
            .with_role(FilterRole::Master)
            .with_frame_time(frame_time)
    }

    pub fn slave() -> Self {
        Self::new().with_role(FilterRole::Slave)
    }

    /// Builder method to set the timing role
    pub fn with_role(mut self, role: FilterRole) -> Self {
        self.role = role;
        self
    }

    /// Builder method to set the MASTER period
    pub fn with_frame_time(mut self, frame_time: Duration) -> Self {
        self.frame_time = frame_time;
        self
    }

    /// Builder method to enable shared-frame fan-out
    pub fn with_shared_frames(mut self, shared: bool) -> Self {
        self.shared_frames = shared;
        self
    }

    /// Builder method to set the per-cycle watchdog timeout
    pub fn with_watchdog_timeout(mut self, timeout: Duration) -> Self {
        self.watchdog_timeout = Some(timeout);
        self
    }
}

mod micros {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_micros() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_micros)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders() {
        let params = FilterParams::master(Duration::from_millis(20)).with_shared_frames(true);
        assert_eq!(params.role, FilterRole::Master);
        assert_eq!(params.frame_time, Duration::from_millis(20));
        assert!(params.shared_frames);
        assert_eq!(FilterParams::slave().role, FilterRole::Slave);
    }

    #[test]
    fn test_deserialize_deployment_entry() {
        let params: FilterParams =
            serde_json::from_str(r#"{"role": "master", "frame_time_us": 40000}"#).unwrap();
        assert_eq!(params.role, FilterRole::Master);
        assert_eq!(params.frame_time, Duration::from_micros(40_000));
        assert!(!params.shared_frames);
        assert_eq!(params.watchdog_timeout, None);
    }

    #[test]
    fn test_serialize_uses_micros() {
        let json = serde_json::to_value(FilterParams::new()).unwrap();
        assert_eq!(json["frame_time_us"], 40_000);
        assert_eq!(json["role"], "slave");
    }
}
