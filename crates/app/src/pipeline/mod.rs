//! The pipeline engine: an ordered graph of concurrently running stages
//! connected by bounded frame queues, with a control path that outruns data
//! for interruption.

pub mod engine;
pub mod generation;
pub mod stage;
pub mod stages;
pub mod topology;

pub use engine::{build, PipelineHandle, PipelineServices};
pub use generation::{GenerationControl, Interrupter};
pub use stage::{ControlMsg, PipelineEvent, Stage, StageContext};
pub use topology::Topology;
