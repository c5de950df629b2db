//! 有界工作池
//!
//! 使用 Semaphore 限制并发执行的步骤数；同一调度器被多个运行共享时，许可数是全局上限。

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::core::EngineError;

/// 默认并发工作数
pub const DEFAULT_MAX_WORKERS: usize = 4;

/// 工作池：克隆后共享同一组许可
#[derive(Debug, Clone)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    pub fn new(max_workers: usize) -> Self {
        let size = max_workers.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// 许可总数
    pub fn size(&self) -> usize {
        self.size
    }

    /// 当前空闲许可数
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// 获取一个执行许可，许可随返回值 drop 归还
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, EngineError> {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| EngineError::Pool(e.to_string()))
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_WORKERS)
    }
}
