//! Queue configuration parameters.

use serde::{Deserialize, Serialize};

/// Slot count used when no capacity is configured.
pub const DEFAULT_QUEUE_CAPACITY: usize = 4;

/// What a producer does when its output queue is full.
///
/// The policy in force changes end-to-end behaviour: `Block` applies backpressure
/// upstream and never loses frames, `DropOldest` keeps latency bounded by recycling
/// the oldest unread frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    #[default]
    Block,
    DropOldest,
}

/// Configuration parameters for a single frame queue.
///
/// # Parameters
///
/// * `capacity` - Number of preallocated frame slots. Fixed for the queue's life.
/// * `policy` - Behaviour when a producer finds every slot occupied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueParams {
    pub capacity: usize,
    pub policy: OverflowPolicy,
}

impl Default for QueueParams {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_QUEUE_CAPACITY,
            policy: OverflowPolicy::Block,
        }
    }
}

impl QueueParams {
    /// Create a new QueueParams instance with default values
    pub fn new() -> Self {
        Default::default()
    }

    /// Builder method to set the slot count
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Builder method to set the overflow policy
    pub fn with_policy(mut self, policy: OverflowPolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let params = QueueParams::new();
        assert_eq!(params.capacity, DEFAULT_QUEUE_CAPACITY);
        assert_eq!(params.policy, OverflowPolicy::Block);
    }

    #[test]
    fn test_deserialize_partial() {
        let params: QueueParams = serde_json::from_str(r#"{"policy": "drop_oldest"}"#).unwrap();
        assert_eq!(params.capacity, DEFAULT_QUEUE_CAPACITY);
        assert_eq!(params.policy, OverflowPolicy::DropOldest);
    }
}
