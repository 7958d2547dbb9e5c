// Scheduling engine capability and the blockout calendar built on top of it

pub mod blockout;
pub mod engine;

pub use blockout::{BlockoutEvaluator, BlockoutManager, BlockoutWindow, LookaheadConfig};
pub use engine::{InMemoryScheduler, Scheduler};
