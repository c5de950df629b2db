//! 核心编排层：错误、运行状态、元决策、事件、快照持久化、主控循环

pub mod error;
pub mod events;
pub mod orchestrator;
pub mod persistence;
pub mod recovery;
pub mod state;

pub use error::{EngineError, PlannerError};
pub use events::OrchestratorEvent;
pub use orchestrator::Orchestrator;
pub use persistence::SnapshotStore;
pub use recovery::{MetaAction, RecoveryPolicy, REPLAN_THRESHOLD};
pub use state::{
    OrchestratorState, RunLimits, RunSnapshot, TerminalState, TerminalStatus, TerminationReason,
};
