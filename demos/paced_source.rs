//! A MASTER source producing 20ms PCM blocks, a gain stage and a level meter.
//!
//! Run with `RUST_LOG` unset; the demo installs its own subscriber at debug level.

use async_trait::async_trait;
use mediaflow::filters::OneToOneProcess;
use mediaflow::task_manager::{TaskManager, TaskManagerConfig};
use mediaflow::{
    BufferQueueFactory, Filter, FilterParams, Frame, Pipeline, PipelineSink, PipelineSource,
    QueueParams,
};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const SAMPLE_RATE: usize = 16_000;
const FRAME_MS: usize = 20;
const SAMPLES_PER_FRAME: usize = SAMPLE_RATE * FRAME_MS / 1_000;

/// Scales 16-bit little-endian PCM.
struct Gain {
    factor: f32,
    clipped: u64,
}

#[async_trait]
impl OneToOneProcess for Gain {
    async fn process(&mut self, input: &dyn Frame, output: &mut dyn Frame) -> bool {
        let (Some(src), Some(dst)) = (input.data_buf(), output.data_buf_mut()) else {
            return false;
        };
        for (from, to) in src.chunks_exact(2).zip(dst.chunks_exact_mut(2)) {
            let sample = i16::from_le_bytes([from[0], from[1]]) as f32 * self.factor;
            if sample.abs() > i16::MAX as f32 {
                self.clipped += 1;
            }
            let scaled = sample.clamp(i16::MIN as f32, i16::MAX as f32) as i16;
            to.copy_from_slice(&scaled.to_le_bytes());
        }
        output.set_pts(input.pts());
        output.set_length(src.len()).is_ok()
    }

    fn get_state(&self, state: &mut Map<String, Value>) {
        state.insert("factor".to_string(), Value::from(self.factor));
        state.insert("clipped".to_string(), Value::from(self.clipped));
    }
}

fn tone_source() -> PipelineSource {
    let mut phase = 0usize;
    PipelineSource::new(move |frame| {
        let Some(buf) = frame.data_buf_mut() else {
            return false;
        };
        for chunk in buf.chunks_exact_mut(2).take(SAMPLES_PER_FRAME) {
            // 400 Hz triangle
            let period = SAMPLE_RATE / 400;
            let position = (phase % period) as i32;
            let half = (period / 2) as i32;
            let level = if position < half { position } else { 2 * half - position };
            let sample = ((level * 2 - half) * 8_000 / half) as i16;
            chunk.copy_from_slice(&sample.to_le_bytes());
            phase += 1;
        }
        frame.set_pts(Some((phase * 1_000_000_000 / SAMPLE_RATE) as u64));
        frame.set_length(SAMPLES_PER_FRAME * 2).is_ok()
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let task_manager = Arc::new(TaskManager::new(
        TaskManagerConfig::new().with_watchdog_logging(false),
    ));
    let factory = Arc::new(
        BufferQueueFactory::contiguous(SAMPLES_PER_FRAME * 2)
            .with_params(QueueParams::new().with_capacity(4)),
    );

    let mut pipeline = Pipeline::new("paced", Arc::clone(&task_manager));
    let source = pipeline.add_filter(tone_source().into_filter(
        "tone",
        FilterParams::master(Duration::from_millis(FRAME_MS as u64))
            .with_watchdog_timeout(Duration::from_millis(200)),
        factory.clone(),
    ))?;
    let gain = pipeline.add_filter(Filter::one_to_one(
        "gain",
        FilterParams::slave(),
        factory,
        Gain {
            factor: 3.5,
            clipped: 0,
        },
    ))?;
    let meter = pipeline.add_filter(
        PipelineSink::new(|_, frame: &dyn Frame| {
            let peak = frame
                .data_buf()
                .map(|buf| {
                    buf.chunks_exact(2)
                        .map(|c| i16::from_le_bytes([c[0], c[1]]).unsigned_abs())
                        .max()
                        .unwrap_or(0)
                })
                .unwrap_or(0);
            info!(
                "frame {} pts {:?}ns peak {}",
                frame.sequence_number(),
                frame.pts(),
                peak
            );
        })
        .into_filter("meter", 1, FilterParams::slave()),
    )?;
    pipeline.chain(&[source, gain, meter])?;

    for snapshot in pipeline.snapshot() {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    }

    pipeline.start().await?;
    tokio::time::sleep(Duration::from_secs(1)).await;
    pipeline.stop(Some(Duration::from_secs(1))).await?;

    for snapshot in pipeline.snapshot() {
        println!(
            "{}: {:?}, {} cycles, {} published, {} overruns",
            snapshot.name,
            snapshot.state,
            snapshot.stats.cycles,
            snapshot.stats.frames_published,
            snapshot.stats.overruns
        );
    }

    task_manager.shutdown().await?;
    Ok(())
}
