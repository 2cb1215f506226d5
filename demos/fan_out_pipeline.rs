//! Shared-frame fan-out to a fast and a slow consumer.
//!
//! The slow consumer's queue drops its oldest frame when full, so it never holds back
//! the source or the fast consumer.

use mediaflow::filters::Broadcast;
use mediaflow::task_manager::{TaskManager, TaskManagerConfig};
use mediaflow::{
    BufferQueueFactory, Filter, FilterParams, Frame, OverflowPolicy, Pipeline, PipelineSink,
    PipelineSource, QueueParams,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let task_manager = Arc::new(TaskManager::new(TaskManagerConfig::default()));
    let frames = Arc::new(
        BufferQueueFactory::contiguous(64).with_params(QueueParams::new().with_capacity(4)),
    );
    let fan_out_queues = Arc::new(
        BufferQueueFactory::contiguous(64)
            .with_params(QueueParams::new().with_capacity(4))
            .with_writer_params(
                1,
                QueueParams::new()
                    .with_capacity(2)
                    .with_policy(OverflowPolicy::DropOldest),
            ),
    );

    let mut counter = 0u32;
    let source = PipelineSource::new(move |frame| {
        counter += 1;
        frame
            .write_bytes(format!("frame {}", counter).as_bytes())
            .is_ok()
    });

    let mut pipeline = Pipeline::new("fan-out", Arc::clone(&task_manager));
    let src = pipeline.add_filter(source.into_filter(
        "source",
        FilterParams::master(Duration::from_millis(10)),
        frames,
    ))?;
    let tee = pipeline.add_filter(Filter::one_to_many(
        "tee",
        2,
        FilterParams::slave().with_shared_frames(true),
        fan_out_queues,
        Broadcast::new(),
    ))?;
    let fast = pipeline.add_filter(
        PipelineSink::new(|_, frame: &dyn Frame| {
            info!("fast  <- {}", String::from_utf8_lossy(frame.data_buf().unwrap_or_default()));
        })
        .into_filter("fast", 1, FilterParams::slave()),
    )?;
    let slow = pipeline.add_filter(
        PipelineSink::new(|_, frame: &dyn Frame| {
            info!("slow  <- {}", String::from_utf8_lossy(frame.data_buf().unwrap_or_default()));
            // blocking on purpose: this consumer cannot keep up
            std::thread::sleep(Duration::from_millis(35));
        })
        .into_filter("slow", 1, FilterParams::slave()),
    )?;

    pipeline.link(src, tee)?;
    pipeline.connect(tee, 0, fast, 0)?;
    pipeline.connect(tee, 1, slow, 0)?;

    pipeline.start().await?;
    tokio::time::sleep(Duration::from_millis(500)).await;
    pipeline.stop(Some(Duration::from_secs(1))).await?;

    for snapshot in pipeline.snapshot() {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    }

    task_manager.shutdown().await?;
    Ok(())
}
