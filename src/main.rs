//! Hive - 任务编排引擎演示入口
//!
//! 用 Mock Oracle 驱动一个目标（按 `;` 拆分为步骤），结束后以 JSON 打印终止状态。
//!
//! 运行方式：
//! ```bash
//! cargo run -- "fetch page; parse links; store results"
//! HIVE_SNAPSHOT=workspace/run.json cargo run -- "a; b"
//! ```
//!
//! - HIVE_CONFIG：额外的配置文件路径
//! - HIVE_SNAPSHOT：快照路径；存在则续跑，未成功结束时写入快照

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use hive::config::load_config;
use hive::core::{Orchestrator, RunLimits, SnapshotStore, TerminalStatus};
use hive::observability;
use hive::oracle::{EchoExecutor, OutcomeVerifier, SplitPlanner};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let goal = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    let config_path = std::env::var("HIVE_CONFIG").ok().map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;
    let limits = RunLimits::from_config(&cfg);

    let orchestrator = Orchestrator::from_config(
        &cfg,
        Arc::new(SplitPlanner),
        Arc::new(EchoExecutor),
        Arc::new(OutcomeVerifier),
    );

    // Ctrl+C：当前轮结束后强停
    let token = orchestrator.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, stopping after current round");
            token.cancel();
        }
    });

    let store = std::env::var("HIVE_SNAPSHOT").ok().map(SnapshotStore::new);
    let snapshot = match &store {
        Some(store) => store.load().context("Failed to load snapshot")?,
        None => None,
    };

    let terminal = match snapshot {
        Some(snapshot) => {
            tracing::info!("Resuming from snapshot");
            orchestrator.resume(snapshot, limits).await?
        }
        None => {
            anyhow::ensure!(!goal.trim().is_empty(), "usage: hive <goal; step; ...>");
            orchestrator.run(&goal, limits).await?
        }
    };

    if let Some(store) = &store {
        if terminal.status == TerminalStatus::Success {
            store.clear().context("Failed to clear snapshot")?;
        } else {
            store
                .save(&terminal.to_snapshot())
                .context("Failed to save snapshot")?;
        }
    }

    println!("{}", serde_json::to_string_pretty(&terminal)?);
    Ok(())
}
