use serde::{Serialize, Deserialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{MarlError, Result};

/// Exploration noise level as a function of training progress.
///
/// Starts at `initial`; every stage whose fraction of `n_epochs` has been
/// passed overrides it in list order, so a later stage wins even when its
/// threshold is lower.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct NoiseSchedule {
    pub initial: f32,
    /// `(fraction of training, level)`
    pub stages: Vec<(f32, f32)>,
}

impl Default for NoiseSchedule {
    fn default() -> Self {
        NoiseSchedule {
            initial: 1.0,
            stages: vec![(0.1, 0.1), (0.2, 0.05), (1.0 / 6.0, 0.01)],
        }
    }
}

impl NoiseSchedule {
    pub fn constant(level: f32) -> Self {
        NoiseSchedule {
            initial: level,
            stages: Vec::new(),
        }
    }

    pub fn level(&self, epoch: usize, n_epochs: usize) -> f32 {
        let progress = epoch as f32 / n_epochs.max(1) as f32;
        self.stages
            .iter()
            .filter(|(fraction, _)| progress > *fraction)
            .last()
            .map_or(self.initial, |&(_, level)| level)
    }

    pub fn validate(&self) -> Result<()> {
        let levels = std::iter::once(self.initial).chain(self.stages.iter().map(|&(_, l)| l));
        for level in levels {
            if !(level >= 0.0 && level.is_finite()) {
                return Err(MarlError::invalid_parameter(
                    "noise".to_string(),
                    format!("level {} must be finite and non-negative", level),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TrainerConfig {
    pub n_epochs: usize,
    /// Sampler ticks per epoch
    pub epoch_length: usize,
    /// Learner updates per tick once training has started
    pub n_train_repeat: usize,
    /// No updates before this epoch
    pub exploration_epochs: usize,
    pub train_graph: bool,
    /// The graph model is only trained for epochs below this
    pub graph_train_epochs: usize,
    /// Checkpoint the graph every this many epochs
    pub save_interval: usize,
    pub checkpoint_dir: Option<PathBuf>,
    pub noise: NoiseSchedule,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        TrainerConfig {
            n_epochs: 30_000,
            epoch_length: 64,
            n_train_repeat: 4,
            exploration_epochs: 1000,
            train_graph: false,
            graph_train_epochs: 1000,
            save_interval: 1000,
            checkpoint_dir: None,
            noise: NoiseSchedule::default(),
        }
    }
}

impl TrainerConfig {
    pub fn n_epochs(mut self, n_epochs: usize) -> Self {
        self.n_epochs = n_epochs;
        self
    }

    pub fn epoch_length(mut self, epoch_length: usize) -> Self {
        self.epoch_length = epoch_length;
        self
    }

    pub fn n_train_repeat(mut self, n_train_repeat: usize) -> Self {
        self.n_train_repeat = n_train_repeat;
        self
    }

    pub fn exploration_epochs(mut self, exploration_epochs: usize) -> Self {
        self.exploration_epochs = exploration_epochs;
        self
    }

    pub fn train_graph(mut self, train_graph: bool, graph_train_epochs: usize) -> Self {
        self.train_graph = train_graph;
        self.graph_train_epochs = graph_train_epochs;
        self
    }

    pub fn checkpoints<P: Into<PathBuf>>(mut self, dir: P, save_interval: usize) -> Self {
        self.checkpoint_dir = Some(dir.into());
        self.save_interval = save_interval;
        self
    }

    pub fn noise(mut self, noise: NoiseSchedule) -> Self {
        self.noise = noise;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.n_epochs == 0 {
            return Err(MarlError::invalid_parameter("n_epochs", "must be positive"));
        }
        if self.epoch_length == 0 {
            return Err(MarlError::invalid_parameter("epoch_length", "must be positive"));
        }
        if self.checkpoint_dir.is_some() && self.save_interval == 0 {
            return Err(MarlError::invalid_parameter("save_interval", "must be positive when checkpointing"));
        }
        self.noise.validate()
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config: TrainerConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}
