//! Hive - 任务编排引擎
//!
//! 模块划分：
//! - **config**: 引擎配置加载（TOML + 环境变量）
//! - **core**: 主控循环、运行状态、元决策、事件与快照
//! - **goal**: 递归目标栈（分解、完成级联、失败升级）
//! - **observability**: 日志初始化
//! - **oracle**: Planner / Executor / Verifier 抽象与 Mock 实现
//! - **workflow**: 步骤依赖分析与有界并发调度

pub mod config;
pub mod core;
pub mod goal;
pub mod observability;
pub mod oracle;
pub mod workflow;

pub use crate::core::{Orchestrator, RunLimits, TerminalState, TerminalStatus};
pub use crate::goal::GoalStack;
pub use crate::workflow::DependencyScheduler;
