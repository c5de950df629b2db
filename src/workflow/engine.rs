//! 依赖调度执行引擎
//!
//! 反复计算就绪集（依赖均已完成的步骤），每批最多提交 max_workers 个并发执行；
//! 就绪集为空但仍有待执行步骤时强制执行一个以保证推进。结果始终按提交顺序返回，每步恰好一个。

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::future::join_all;

use crate::config::SchedulerSection;
use crate::oracle::Executor;
use crate::workflow::graph::DependencyAnalyzer;
use crate::workflow::pool::WorkerPool;
use crate::workflow::types::*;

/// 依赖调度器：持有依赖分析器、执行器与工作池
pub struct DependencyScheduler {
    analyzer: DependencyAnalyzer,
    executor: Arc<dyn Executor>,
    pool: WorkerPool,
    step_timeout: Option<Duration>,
}

impl DependencyScheduler {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self {
            analyzer: DependencyAnalyzer::default(),
            executor,
            pool: WorkerPool::default(),
            step_timeout: None,
        }
    }

    /// 从 [scheduler] 配置段创建（规则表、工作数、单步超时）
    pub fn from_config(executor: Arc<dyn Executor>, config: &SchedulerSection) -> Self {
        let step_timeout =
            (config.step_timeout_secs > 0).then(|| Duration::from_secs(config.step_timeout_secs));
        Self {
            analyzer: DependencyAnalyzer::from_config(config),
            executor,
            pool: WorkerPool::new(config.max_workers),
            step_timeout,
        }
    }

    pub fn with_analyzer(mut self, analyzer: DependencyAnalyzer) -> Self {
        self.analyzer = analyzer;
        self
    }

    pub fn with_pool(mut self, pool: WorkerPool) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = Some(timeout);
        self
    }

    /// 默认并发工作数（调用时未指定 max_workers 使用）
    pub fn default_max_workers(&self) -> usize {
        self.pool.size()
    }

    pub fn analyze(&self, steps: &[Step]) -> DependencyGraph {
        self.analyzer.analyze(steps)
    }

    /// 分析依赖并执行整批步骤
    pub async fn execute(
        &self,
        steps: &[Step],
        max_workers: Option<usize>,
        stop_on_error: bool,
    ) -> Vec<StepResult> {
        let graph = self.analyzer.analyze(steps);
        self.execute_with_graph(steps, &graph, max_workers, stop_on_error)
            .await
    }

    /// 按给定依赖图执行；返回结果与 steps 一一对应、顺序一致
    pub async fn execute_with_graph(
        &self,
        steps: &[Step],
        graph: &DependencyGraph,
        max_workers: Option<usize>,
        stop_on_error: bool,
    ) -> Vec<StepResult> {
        if steps.is_empty() {
            return Vec::new();
        }

        let workers = max_workers.unwrap_or_else(|| self.pool.size()).max(1);
        let mut results: Vec<Option<StepResult>> = vec![None; steps.len()];
        let mut pending: Vec<usize> = (0..steps.len()).collect();
        let mut finished: BTreeSet<StepId> = BTreeSet::new();

        tracing::debug!("Scheduling {} steps with {} workers", steps.len(), workers);

        while !pending.is_empty() {
            let mut ready: Vec<usize> = pending
                .iter()
                .copied()
                .filter(|&i| graph.is_ready(steps[i].id, &finished))
                .collect();

            if ready.is_empty() {
                tracing::warn!(
                    "No ready steps among {} pending (cyclic or malformed dependencies), forcing step {}",
                    pending.len(),
                    steps[pending[0]].id
                );
                ready.push(pending[0]);
            }

            let batch: Vec<usize> = ready.into_iter().take(workers).collect();
            tracing::debug!(
                "Executing batch: {:?}",
                batch.iter().map(|&i| steps[i].id).collect::<Vec<_>>()
            );

            let batch_results = self
                .run_batch(batch.iter().map(|&i| steps[i].clone()).collect())
                .await;

            let mut error_occurred = false;
            for (&idx, result) in batch.iter().zip(batch_results) {
                if result.is_failed() {
                    error_occurred = true;
                    tracing::debug!(
                        "Step {} failed: {}",
                        result.step_id,
                        result.error.as_deref().unwrap_or_default()
                    );
                }
                finished.insert(steps[idx].id);
                results[idx] = Some(result);
            }
            pending.retain(|i| !batch.contains(i));

            if error_occurred && stop_on_error {
                for &i in &pending {
                    results[i] = Some(StepResult::skipped(steps[i].id));
                }
                break;
            }
        }

        results
            .into_iter()
            .zip(steps)
            .map(|(result, step)| result.unwrap_or_else(|| StepResult::skipped(step.id)))
            .collect()
    }

    /// 并发执行一批步骤，等待全部完成（不中断已在执行中的步骤）
    async fn run_batch(&self, batch: Vec<Step>) -> Vec<StepResult> {
        let ids: Vec<StepId> = batch.iter().map(|s| s.id).collect();
        let handles: Vec<_> = batch
            .into_iter()
            .map(|step| {
                let executor = Arc::clone(&self.executor);
                let pool = self.pool.clone();
                let timeout = self.step_timeout;
                tokio::spawn(async move {
                    let _permit = match pool.acquire().await {
                        Ok(p) => p,
                        Err(e) => {
                            let now = Utc::now();
                            return StepResult::failed(step.id, e.to_string(), now, now);
                        }
                    };
                    run_step(executor.as_ref(), &step, timeout).await
                })
            })
            .collect();

        join_all(handles)
            .await
            .into_iter()
            .zip(ids)
            .map(|(joined, id)| match joined {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!("Step {} panicked: {}", id, e);
                    let now = Utc::now();
                    StepResult::failed(id, format!("step panicked: {}", e), now, now)
                }
            })
            .collect()
    }
}

/// 执行单步并记录耗时；执行器错误与超时都转为 Failed 结果
async fn run_step(executor: &dyn Executor, step: &Step, timeout: Option<Duration>) -> StepResult {
    let started_at = Utc::now();
    let outcome = match timeout {
        Some(limit) => match tokio::time::timeout(limit, executor.run(step)).await {
            Ok(r) => r,
            Err(_) => Err(format!("step timed out after {:?}", limit)),
        },
        None => executor.run(step).await,
    };
    let finished_at = Utc::now();

    match outcome {
        Ok(output) => StepResult::completed(step.id, output, started_at, finished_at),
        Err(e) => StepResult::failed(step.id, e, started_at, finished_at),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::time::sleep;

    /// 记录执行顺序与最大并发数；描述含 "fail" 则失败，含 "panic" 则 panic
    #[derive(Default)]
    struct RecordingExecutor {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        events: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Executor for RecordingExecutor {
        async fn run(&self, step: &Step) -> Result<serde_json::Value, String> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.events.lock().unwrap().push(format!("start {}", step.id));

            let delay = step.args.get("delay_ms").and_then(|v| v.as_u64()).unwrap_or(5);
            sleep(Duration::from_millis(delay)).await;

            self.events.lock().unwrap().push(format!("end {}", step.id));
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if step.description.contains("panic") {
                panic!("executor blew up");
            }
            if step.description.contains("fail") {
                return Err(format!("{} failed", step.description));
            }
            Ok(serde_json::json!(step.id))
        }
    }

    fn read_only(id: StepId, delay_ms: u64) -> Step {
        Step::new(id, format!("read {}", id))
            .with_tool("get_clipboard")
            .with_args(serde_json::json!({ "delay_ms": delay_ms }))
    }

    #[tokio::test]
    async fn test_results_follow_submission_order() {
        let executor = Arc::new(RecordingExecutor::default());
        let scheduler = DependencyScheduler::new(executor.clone());
        // 后提交的步骤更早完成
        let steps: Vec<Step> = (1..=5).map(|i| read_only(i, 60 - i as u64 * 10)).collect();

        let results = scheduler.execute(&steps, Some(8), true).await;

        assert_eq!(results.len(), 5);
        let ids: Vec<StepId> = results.iter().map(|r| r.step_id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
        assert!(results.iter().all(|r| r.status == StepStatus::Completed));
        assert!(executor.max_in_flight.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test]
    async fn test_batch_size_capped_by_max_workers() {
        let executor = Arc::new(RecordingExecutor::default());
        let scheduler = DependencyScheduler::new(executor.clone());
        let steps: Vec<Step> = (1..=6).map(|i| read_only(i, 10)).collect();

        let results = scheduler.execute(&steps, Some(2), true).await;

        assert_eq!(results.len(), 6);
        assert!(executor.max_in_flight.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_dependent_pair_runs_serially() {
        let executor = Arc::new(RecordingExecutor::default());
        let scheduler = DependencyScheduler::new(executor.clone());
        let steps = vec![
            Step::new(1, "open").with_tool("open_app"),
            Step::new(2, "click").with_tool("click"),
        ];

        scheduler.execute(&steps, None, true).await;

        let events = executor.events.lock().unwrap().clone();
        assert_eq!(events, vec!["start 1", "end 1", "start 2", "end 2"]);
        assert_eq!(executor.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stop_on_error_skips_remaining() {
        let executor = Arc::new(RecordingExecutor::default());
        let scheduler = DependencyScheduler::new(executor);
        let steps = vec![
            Step::new(1, "first"),
            Step::new(2, "second fail"),
            Step::new(3, "third"),
            Step::new(4, "fourth"),
        ];

        let results = scheduler.execute(&steps, None, true).await;

        assert_eq!(results[0].status, StepStatus::Completed);
        assert_eq!(results[1].status, StepStatus::Failed);
        assert_eq!(results[2].status, StepStatus::Skipped);
        assert_eq!(results[3].status, StepStatus::Skipped);
        assert_eq!(results[3].error.as_deref(), Some(SKIPPED_REASON));
        assert!(results[3].started_at.is_none());
    }

    #[tokio::test]
    async fn test_in_flight_batch_finishes_after_failure() {
        let executor = Arc::new(RecordingExecutor::default());
        let scheduler = DependencyScheduler::new(executor);
        let mut steps: Vec<Step> = vec![
            read_only(1, 1),
            read_only(2, 40),
            read_only(3, 5),
        ];
        steps[0].description = "read 1 fail".to_string();

        let results = scheduler.execute(&steps, Some(2), true).await;

        assert_eq!(results[0].status, StepStatus::Failed);
        // 与失败步骤同批已派发的步骤正常完成
        assert_eq!(results[1].status, StepStatus::Completed);
        assert_eq!(results[2].status, StepStatus::Skipped);
    }

    #[tokio::test]
    async fn test_without_stop_on_error_all_steps_run() {
        let executor = Arc::new(RecordingExecutor::default());
        let scheduler = DependencyScheduler::new(executor);
        let steps = vec![Step::new(1, "fail early"), Step::new(2, "still runs")];

        let results = scheduler.execute(&steps, None, false).await;

        assert_eq!(results[0].status, StepStatus::Failed);
        assert_eq!(results[1].status, StepStatus::Completed);
    }

    #[tokio::test]
    async fn test_cycle_forces_progress() {
        let executor = Arc::new(RecordingExecutor::default());
        let scheduler = DependencyScheduler::new(executor.clone());
        let steps = vec![Step::new(1, "a"), Step::new(2, "b")];
        let mut graph = DependencyGraph::new();
        graph.add_dependency(1, 2);
        graph.add_dependency(2, 1);

        let results = scheduler
            .execute_with_graph(&steps, &graph, None, true)
            .await;

        assert!(results.iter().all(|r| r.status == StepStatus::Completed));
        let events = executor.events.lock().unwrap().clone();
        assert_eq!(events[0], "start 1");
    }

    #[tokio::test]
    async fn test_timeout_and_panic_become_failures() {
        let executor = Arc::new(RecordingExecutor::default());
        let scheduler =
            DependencyScheduler::new(executor).with_step_timeout(Duration::from_millis(20));
        let steps = vec![
            Step::new(1, "slow").with_args(serde_json::json!({ "delay_ms": 200 })),
            Step::new(2, "panic now"),
        ];

        let results = scheduler.execute(&steps, None, false).await;

        assert_eq!(results[0].status, StepStatus::Failed);
        assert!(results[0].error.as_deref().unwrap().contains("timed out"));
        assert_eq!(results[1].status, StepStatus::Failed);
        assert!(results[1].error.as_deref().unwrap().starts_with("step panicked"));
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let scheduler = DependencyScheduler::new(Arc::new(RecordingExecutor::default()));
        assert!(scheduler.execute(&[], None, true).await.is_empty());
    }
}
