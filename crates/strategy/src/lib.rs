pub mod detectors;
pub mod hours;
pub mod pipeline;
pub mod scheduler;
pub mod sizing;

pub use detectors::StrategyKind;
pub use hours::TradingHours;
pub use pipeline::{CadenceRequest, Pipeline, PipelineOutcome};
pub use scheduler::{SessionChange, SessionSchedule, SessionTracker};
