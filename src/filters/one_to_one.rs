//! One input, one output.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::filters::base::{Filter, Transform};
use crate::filters::cycle::{InputFrames, OutputFrames};
use crate::filters::params::FilterParams;
use crate::frames::{copy_frame, Frame};
use crate::queue::QueueFactory;

/// Transformation of a one-to-one filter.
#[async_trait]
pub trait OneToOneProcess: Send {
    /// Transform `input` into the pre-acquired `output` slot.
    ///
    /// Return `true` to publish `output`; `false` hands the slot back unpublished.
    async fn process(&mut self, input: &dyn Frame, output: &mut dyn Frame) -> bool;

    fn get_state(&self, _state: &mut Map<String, Value>) {}
}

impl Filter {
    /// Filter with exactly one reader and one writer.
    pub fn one_to_one<P>(
        name: impl Into<String>,
        params: FilterParams,
        factory: Arc<dyn QueueFactory>,
        process: P,
    ) -> Self
    where
        P: OneToOneProcess + 'static,
    {
        Filter::with_transform(
            name.into(),
            1,
            1,
            params,
            factory,
            Transform::OneToOne(Box::new(process)),
        )
    }
}

pub(crate) async fn apply(
    process: &mut dyn OneToOneProcess,
    inputs: &InputFrames,
    outputs: &mut OutputFrames,
) -> bool {
    let Some(input) = inputs.first() else {
        return false;
    };
    let Some(output) = outputs.first_frame_mut() else {
        return false;
    };
    process.process(input, output).await
}

/// Copies each input frame unchanged.
#[derive(Debug, Default)]
pub struct Passthrough {
    failures: u64,
}

impl Passthrough {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OneToOneProcess for Passthrough {
    async fn process(&mut self, input: &dyn Frame, output: &mut dyn Frame) -> bool {
        match copy_frame(input, output) {
            Ok(()) => true,
            Err(e) => {
                self.failures += 1;
                tracing::warn!("passthrough dropped frame {}: {}", input.id(), e);
                false
            }
        }
    }

    fn get_state(&self, state: &mut Map<String, Value>) {
        state.insert("copy_failures".to_string(), Value::from(self.failures));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::mockup::{feed, lossy_factory, mock_factory, upstream_queue, FilterMockup};
    use crate::filters::{FilterError, FilterState};
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tokio::time::Instant;

    #[tokio::test]
    async fn test_got_frame_scenario() {
        let mockup = FilterMockup::new(Duration::ZERO);
        let got_frame = mockup.got_frame();
        let mut filter = Filter::one_to_one("mock", FilterParams::slave(), mock_factory(4), mockup);

        let input = upstream_queue(8);
        filter.attach_reader(0, Arc::clone(&input)).unwrap();
        let output = filter.attach_writer(0).unwrap();

        feed(&input, 6);
        let mut published = 0;
        for cycle in 0..6 {
            let got = cycle % 2 == 0;
            got_frame.store(got, Ordering::SeqCst);
            assert_eq!(filter.process_frame().await, Ok(got));
            if got {
                published += 1;
            }
            assert_eq!(output.len(), published);
            assert!(output.len() <= output.capacity());
        }

        assert_eq!(output.len(), 3);
        assert!(input.is_empty());
        assert_eq!(filter.status().stats().frames_consumed, 6);
        assert_eq!(filter.status().stats().frames_published, 3);
    }

    #[tokio::test]
    async fn test_no_writer_means_no_output() {
        let mut filter = Filter::one_to_one(
            "sinkless",
            FilterParams::slave(),
            mock_factory(2),
            FilterMockup::new(Duration::ZERO),
        );
        let input = upstream_queue(2);
        filter.attach_reader(0, Arc::clone(&input)).unwrap();
        feed(&input, 1);

        assert_eq!(filter.process_frame().await, Ok(false));
        assert!(input.is_empty());
    }

    #[tokio::test]
    async fn test_passthrough_copies_payload() {
        let mut filter = Filter::one_to_one(
            "copy",
            FilterParams::slave(),
            mock_factory(2),
            Passthrough::new(),
        );
        let input = upstream_queue(2);
        filter.attach_reader(0, Arc::clone(&input)).unwrap();
        let output = filter.attach_writer(0).unwrap();

        feed(&input, 2);
        assert_eq!(filter.process_frame().await, Ok(true));
        assert_eq!(filter.process_frame().await, Ok(true));

        let first = output.try_read().unwrap().unwrap();
        assert_eq!(first.frame().data_buf(), Some(&[0u8][..]));
        assert_eq!(first.frame().sequence_number(), 0);
        drop(first);
        let second = output.try_read().unwrap().unwrap();
        assert_eq!(second.frame().sequence_number(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_master_pacing_converges_to_frame_time() {
        let frame_time = Duration::from_millis(40);
        let mockup = FilterMockup::new(Duration::from_millis(10));
        let stamps = mockup.stamps();
        let mut filter = Filter::one_to_one(
            "paced",
            FilterParams::master(frame_time),
            lossy_factory(4),
            mockup,
        );
        let input = upstream_queue(64);
        filter.attach_reader(0, Arc::clone(&input)).unwrap();
        filter.attach_writer(0).unwrap();
        feed(&input, 10);
        let status = filter.status();

        let worker = tokio::spawn(async move { filter.run().await });
        tokio::time::sleep(Duration::from_millis(390)).await;
        status.stop();
        worker.await.unwrap().unwrap();

        let stamps: Vec<Instant> = stamps.lock().unwrap().clone();
        assert!(stamps.len() >= 9, "only {} cycles ran", stamps.len());
        for pair in stamps.windows(2) {
            assert_eq!(pair[1] - pair[0], frame_time);
        }
        assert_eq!(status.stats().overruns, 0);
        assert_eq!(status.state(), FilterState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_master_overrun_starts_next_cycle_immediately() {
        let mockup = FilterMockup::new(Duration::from_millis(60));
        let stamps = mockup.stamps();
        let mut filter = Filter::one_to_one(
            "slow",
            FilterParams::master(Duration::from_millis(40)),
            lossy_factory(4),
            mockup,
        );
        let input = upstream_queue(16);
        filter.attach_reader(0, Arc::clone(&input)).unwrap();
        filter.attach_writer(0).unwrap();
        feed(&input, 5);
        let status = filter.status();

        let worker = tokio::spawn(async move { filter.run().await });
        tokio::time::sleep(Duration::from_millis(250)).await;
        status.stop();
        worker.await.unwrap().unwrap();

        let stamps: Vec<Instant> = stamps.lock().unwrap().clone();
        assert!(stamps.len() >= 3);
        for pair in stamps.windows(2) {
            assert_eq!(pair[1] - pair[0], Duration::from_millis(60));
        }
        assert!(status.stats().overruns >= 3);
    }

    #[tokio::test]
    async fn test_stop_before_run() {
        let mut filter = Filter::one_to_one(
            "never",
            FilterParams::slave(),
            mock_factory(2),
            Passthrough::new(),
        );
        let status = filter.status();
        assert!(status.stop());
        assert_eq!(filter.run().await, Err(FilterError::Stopped));
        assert_eq!(status.state(), FilterState::Stopped);
    }
}
