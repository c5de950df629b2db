//! 引擎错误类型
//!
//! 步骤失败是数据而不是异常：EngineError 只用于调用方错误（非法上限）与基础设施故障（工作池）。

use thiserror::Error;

/// 编排引擎对外返回的错误
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid run limits: {0}")]
    InvalidLimits(String),

    #[error("Worker pool error: {0}")]
    Pool(String),
}

/// Planner 返回的错误：决定是暂停上报还是使用兜底计划
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlannerError {
    /// 明确无法产出任何计划，需要调用方介入
    #[error("Planner cannot produce a plan: {0}")]
    NoPlan(String),

    /// 临时性错误（如网络抖动），引擎以目标本身作为单步兜底计划
    #[error("Planner transient error: {0}")]
    Transient(String),
}
