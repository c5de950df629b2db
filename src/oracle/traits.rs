//! 外部决策方（Oracle）抽象
//!
//! Planner 产出步骤、Executor 执行单步、Verifier 给出判定；引擎只消费它们的类型化输入输出。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::PlannerError;
use crate::goal::SubgoalSpec;
use crate::workflow::Step;

/// Verifier 对单步结果的判定
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Completed,
    Failed,
    Uncertain,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Verdict::Completed => "SUCCESS",
            Verdict::Failed => "FAILED",
            Verdict::Uncertain => "UNCERTAIN",
        };
        f.write_str(s)
    }
}

/// Planner trait：目标 + 历史 + 禁止动作 -> 有序步骤
#[async_trait]
pub trait Planner: Send + Sync {
    /// 为目标生成完整计划
    async fn plan(
        &self,
        goal: &str,
        history: &[String],
        forbidden: &[String],
    ) -> Result<Vec<Step>, PlannerError>;

    /// 为失败步骤生成恰好一个替代步骤；默认取 plan(失败步骤描述) 的第一步
    async fn repair(
        &self,
        goal: &str,
        failed: &Step,
        history: &[String],
        forbidden: &[String],
    ) -> Result<Option<Step>, PlannerError> {
        let _ = goal;
        let steps = self.plan(&failed.description, history, forbidden).await?;
        Ok(steps.into_iter().next())
    }

    /// 将反复失败的目标拆分为子目标；默认不拆分
    async fn decompose(
        &self,
        goal: &str,
        error_context: &str,
        max_subgoals: usize,
    ) -> Result<Vec<SubgoalSpec>, PlannerError> {
        let _ = (goal, error_context, max_subgoals);
        Ok(Vec::new())
    }
}

/// Executor trait：执行单步，可能被多个工作线程并发调用
#[async_trait]
pub trait Executor: Send + Sync {
    async fn run(&self, step: &Step) -> Result<serde_json::Value, String>;
}

/// Verifier trait：判定单步结果，以及计划耗尽时确认目标是否达成
#[async_trait]
pub trait Verifier: Send + Sync {
    async fn judge(&self, step: &Step, output: &serde_json::Value, error: Option<&str>)
        -> Verdict;

    /// 默认认为计划全部成功即目标达成
    async fn confirm_goal(&self, goal: &str, history: &[String]) -> Verdict {
        let _ = (goal, history);
        Verdict::Completed
    }
}
