//! 工具池调度：限制单轮内同时运行的工具调用数
//!
//! TaskScheduler 只保存并发上限；每一轮通过 round_pool 新建自己的许可池，
//! 因此并发运行（以及同一运行的不同轮）之间不会互相占用许可。
//! 每个工具调用在执行前获取一个许可，许可随调用结束自动释放。

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// 工具并发上限（默认 4）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskScheduler {
    max_concurrent_tools: usize,
}

impl TaskScheduler {
    pub fn new(max_concurrent_tools: usize) -> Self {
        Self {
            max_concurrent_tools: max_concurrent_tools.max(1),
        }
    }

    pub fn max_concurrent_tools(&self) -> usize {
        self.max_concurrent_tools
    }

    /// 为一轮工具调用新建许可池
    pub fn round_pool(&self) -> RoundPool {
        RoundPool {
            semaphore: Arc::new(Semaphore::new(self.max_concurrent_tools)),
        }
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new(4)
    }
}

/// 单轮许可池：在本轮的各个任务间 clone 共享，轮结束即丢弃
#[derive(Debug, Clone)]
pub struct RoundPool {
    semaphore: Arc<Semaphore>,
}

impl RoundPool {
    /// 获取工具执行许可；信号量从不关闭，None 只在被外部关闭时出现
    pub async fn acquire_tool(&self) -> Option<OwnedSemaphorePermit> {
        self.semaphore.clone().acquire_owned().await.ok()
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}
