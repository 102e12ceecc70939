//! Execution substrate: configuration, task runners, worker pool and timers.

pub mod config;
pub mod env_config;
pub mod task_runner;
pub mod timer;
pub mod worker_pool;

pub use config::ExecutorConfig;
pub use env_config::ConfigError;
pub use task_runner::{InlineTaskRunner, Task, TaskRunner};
pub use timer::{TimerHandle, TimerService};
pub use worker_pool::{PoolError, WorkerPool};
