use super::{Sampler, SamplerConfig};
use crate::error::{MarlError, Result};
use crate::logger::TabularLogger;
use crate::pool::{Batch, ReplayPool};

/// Sampler that never interacts with anything. Always ready.
///
/// Useful when a pool is filled offline: give it the pool and the training
/// loop can still draw batches through the usual interface.
pub struct DummySampler {
    config: SamplerConfig,
    pool: Option<ReplayPool>,
}

impl DummySampler {
    pub fn new(batch_size: usize, max_path_length: usize) -> Result<Self> {
        let config = SamplerConfig::new(max_path_length, 0, batch_size);
        config.validate()?;
        Ok(DummySampler { config, pool: None })
    }

    pub fn with_pool(mut self, pool: ReplayPool) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }
}

impl Sampler for DummySampler {
    fn sample(&mut self) -> Result<()> {
        Ok(())
    }

    fn batch_ready(&self) -> bool {
        true
    }

    fn random_batch(&mut self, _agent: usize) -> Result<Batch> {
        match self.pool.as_mut() {
            Some(pool) => pool.random_batch(self.config.batch_size),
            None => Err(MarlError::EmptyBuffer("dummy sampler has no pool".to_string())),
        }
    }

    fn terminate(&mut self) -> Result<()> {
        Ok(())
    }

    fn log_diagnostics(&self, logger: &mut dyn TabularLogger) {
        logger.record("pool-size", self.pool.as_ref().map_or(0, ReplayPool::size) as f32);
    }
}
