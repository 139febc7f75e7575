//! 任务调度：工具执行并发池
//!
//! 同一批工具调用并发执行，使用 Semaphore 限制同时在途的调用数。

use std::sync::Arc;

use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};

/// 任务调度器
#[derive(Clone)]
pub struct TaskScheduler {
    /// 工具并发限制（默认 3）
    tool_semaphore: Arc<Semaphore>,
    max_concurrent_tools: usize,
}

impl TaskScheduler {
    pub fn new(max_concurrent_tools: usize) -> Self {
        let max = max_concurrent_tools.max(1);
        Self {
            tool_semaphore: Arc::new(Semaphore::new(max)),
            max_concurrent_tools: max,
        }
    }

    /// 获取工具执行许可（信号量从不关闭，仅类型上可能失败）
    pub async fn acquire_tool(&self) -> Result<OwnedSemaphorePermit, AcquireError> {
        self.tool_semaphore.clone().acquire_owned().await
    }

    pub fn max_concurrent_tools(&self) -> usize {
        self.max_concurrent_tools
    }

    /// 当前空闲许可数
    pub fn available_permits(&self) -> usize {
        self.tool_semaphore.available_permits()
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new(3)
    }
}
