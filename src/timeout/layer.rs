use crate::config::TimeoutConfig;
use crate::metrics::GuardMetrics;
use crate::pool::BufferPool;
use crate::timeout::service::TimeoutService;
use std::sync::Arc;
use tower::Layer;

/// Applies the timeout guard to a service.
///
/// Every service produced by one layer shares its config and buffer pool.
#[derive(Clone)]
pub struct TimeoutLayer {
    config: Arc<TimeoutConfig>,
    pool: Arc<BufferPool>,
    metrics: GuardMetrics,
}

impl TimeoutLayer {
    pub fn new(config: TimeoutConfig) -> Self {
        TimeoutLayer {
            config: Arc::new(config),
            pool: Arc::new(BufferPool::new()),
            metrics: GuardMetrics::new(),
        }
    }

    /// Shares a buffer pool with other layers.
    pub fn with_pool(mut self, pool: Arc<BufferPool>) -> Self {
        self.pool = pool;
        self
    }

    /// Records outcomes with `metrics` instead of the global meter's instruments.
    pub fn with_metrics(mut self, metrics: GuardMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &TimeoutConfig {
        &self.config
    }
}

impl Default for TimeoutLayer {
    fn default() -> Self {
        Self::new(TimeoutConfig::default())
    }
}

impl<S> Layer<S> for TimeoutLayer {
    type Service = TimeoutService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TimeoutService {
            inner,
            config: self.config.clone(),
            pool: self.pool.clone(),
            metrics: self.metrics.clone(),
        }
    }
}
