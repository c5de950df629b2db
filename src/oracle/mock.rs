//! Mock Oracle（用于测试与演示，无需外部服务）
//!
//! SplitPlanner 按 `;` 拆分目标为步骤，EchoExecutor 回显步骤描述，OutcomeVerifier 依据执行错误给出判定。

use async_trait::async_trait;

use crate::core::PlannerError;
use crate::goal::SubgoalSpec;
use crate::oracle::{Executor, Planner, Verdict, Verifier};
use crate::workflow::Step;

/// 按 `;` 拆分目标：每段一个步骤；段数不少于 2 时也按段分解子目标
#[derive(Debug, Default)]
pub struct SplitPlanner;

fn split_goal(goal: &str) -> Vec<String> {
    goal.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl Planner for SplitPlanner {
    async fn plan(
        &self,
        goal: &str,
        _history: &[String],
        _forbidden: &[String],
    ) -> Result<Vec<Step>, PlannerError> {
        let parts = split_goal(goal);
        if parts.is_empty() {
            return Err(PlannerError::NoPlan(format!("empty goal: {:?}", goal)));
        }
        Ok(parts
            .into_iter()
            .enumerate()
            .map(|(i, desc)| Step::new(i as u32 + 1, desc))
            .collect())
    }

    async fn decompose(
        &self,
        goal: &str,
        _error_context: &str,
        max_subgoals: usize,
    ) -> Result<Vec<SubgoalSpec>, PlannerError> {
        let parts = split_goal(goal);
        if parts.len() < 2 {
            return Ok(Vec::new());
        }
        Ok(parts
            .into_iter()
            .take(max_subgoals)
            .map(SubgoalSpec::new)
            .collect())
    }
}

/// 回显执行器：输出 {"step": id, "echo": description}
#[derive(Debug, Default)]
pub struct EchoExecutor;

#[async_trait]
impl Executor for EchoExecutor {
    async fn run(&self, step: &Step) -> Result<serde_json::Value, String> {
        Ok(serde_json::json!({ "step": step.id, "echo": step.description }))
    }
}

/// 无错误即 Completed，否则 Failed
#[derive(Debug, Default)]
pub struct OutcomeVerifier;

#[async_trait]
impl Verifier for OutcomeVerifier {
    async fn judge(
        &self,
        _step: &Step,
        _output: &serde_json::Value,
        error: Option<&str>,
    ) -> Verdict {
        if error.is_some() {
            Verdict::Failed
        } else {
            Verdict::Completed
        }
    }
}

/// 固定判定（测试防死循环用）
#[derive(Debug)]
pub struct FixedVerifier(pub Verdict);

#[async_trait]
impl Verifier for FixedVerifier {
    async fn judge(
        &self,
        _step: &Step,
        _output: &serde_json::Value,
        _error: Option<&str>,
    ) -> Verdict {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_split_planner_numbers_steps() {
        let steps = SplitPlanner.plan("open editor; write file ;", &[], &[]).await.unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].id, 1);
        assert_eq!(steps[1].description, "write file");
    }

    #[tokio::test]
    async fn test_split_planner_empty_goal_is_no_plan() {
        let err = SplitPlanner.plan("  ;  ", &[], &[]).await.unwrap_err();
        assert!(matches!(err, PlannerError::NoPlan(_)));
    }

    #[tokio::test]
    async fn test_default_repair_uses_failed_description() {
        let failed = Step::new(3, "retry this; and that");
        let step = SplitPlanner.repair("goal", &failed, &[], &[]).await.unwrap();
        assert_eq!(step.map(|s| s.description), Some("retry this".to_string()));
    }
}
