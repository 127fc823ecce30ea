use std::time::Duration;

use folio_core::config::env_or;
use folio_core::error::CoreError;

/// Worker pool and result backend settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Number of execution slots.
    pub concurrency: usize,
    /// Tasks a slot runs before it is recycled.
    pub max_tasks_per_child: u32,
    /// After this the task is asked to wind down.
    pub soft_time_limit: Duration,
    /// After this the task is aborted and marked failed.
    pub time_limit: Duration,
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    pub retry_delay: Duration,
    /// How long completed results stay queryable.
    pub result_expires: Duration,
    pub result_sweep_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_tasks_per_child: 10,
            soft_time_limit: Duration::from_secs(300),
            time_limit: Duration::from_secs(360),
            max_attempts: 3,
            retry_delay: Duration::from_secs(5),
            result_expires: Duration::from_secs(86_400),
            result_sweep_interval: Duration::from_secs(3_600),
        }
    }
}

impl EngineConfig {
    /// Load from environment variables, falling back to [`Default`].
    ///
    /// | Variable                      | Default |
    /// |-------------------------------|---------|
    /// | `WORKER_CONCURRENCY`          | `4`     |
    /// | `WORKER_MAX_TASKS_PER_CHILD`  | `10`    |
    /// | `TASK_SOFT_TIME_LIMIT_SECS`   | `300`   |
    /// | `TASK_TIME_LIMIT_SECS`        | `360`   |
    /// | `TASK_MAX_ATTEMPTS`           | `3`     |
    /// | `TASK_RETRY_DELAY_SECS`       | `5`     |
    /// | `RESULT_EXPIRES_SECS`         | `86400` |
    /// | `RESULT_SWEEP_INTERVAL_SECS`  | `3600`  |
    pub fn from_env() -> Result<Self, CoreError> {
        let defaults = Self::default();
        let secs = |key: &str, default: Duration| -> Result<Duration, CoreError> {
            env_or(key, default.as_secs()).map(Duration::from_secs)
        };

        let config = Self {
            concurrency: env_or("WORKER_CONCURRENCY", defaults.concurrency)?,
            max_tasks_per_child: env_or("WORKER_MAX_TASKS_PER_CHILD", defaults.max_tasks_per_child)?,
            soft_time_limit: secs("TASK_SOFT_TIME_LIMIT_SECS", defaults.soft_time_limit)?,
            time_limit: secs("TASK_TIME_LIMIT_SECS", defaults.time_limit)?,
            max_attempts: env_or("TASK_MAX_ATTEMPTS", defaults.max_attempts)?,
            retry_delay: secs("TASK_RETRY_DELAY_SECS", defaults.retry_delay)?,
            result_expires: secs("RESULT_EXPIRES_SECS", defaults.result_expires)?,
            result_sweep_interval: secs("RESULT_SWEEP_INTERVAL_SECS", defaults.result_sweep_interval)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.concurrency == 0 {
            return Err(CoreError::Validation(
                "WORKER_CONCURRENCY must be at least 1".to_string(),
            ));
        }
        if self.max_tasks_per_child == 0 {
            return Err(CoreError::Validation(
                "WORKER_MAX_TASKS_PER_CHILD must be at least 1".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(CoreError::Validation(
                "TASK_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        if self.soft_time_limit > self.time_limit {
            return Err(CoreError::Validation(format!(
                "TASK_SOFT_TIME_LIMIT_SECS ({}) must not exceed TASK_TIME_LIMIT_SECS ({})",
                self.soft_time_limit.as_secs(),
                self.time_limit.as_secs()
            )));
        }
        if self.result_sweep_interval.is_zero() {
            return Err(CoreError::Validation(
                "RESULT_SWEEP_INTERVAL_SECS must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
