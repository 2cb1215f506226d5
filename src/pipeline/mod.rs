//! Pipeline assembly plus ready-made source and sink filters.

pub mod pipeline;
pub mod sink;
pub mod source;

pub use pipeline::{FilterKey, Pipeline, PipelineError};
pub use sink::{PipelineSink, SinkHandler};
pub use source::{PipelineSource, SourceHandler};
