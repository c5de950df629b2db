//! 依赖调度：步骤类型、依赖分析、有界工作池与并发执行引擎

pub mod engine;
pub mod graph;
pub mod pool;
pub mod types;

pub use engine::DependencyScheduler;
pub use graph::DependencyAnalyzer;
pub use pool::{WorkerPool, DEFAULT_MAX_WORKERS};
pub use types::*;
