pub mod gradient_clipper;

use ndarray::{Array1, Array2};
use serde::{Serialize, Deserialize};

pub use gradient_clipper::GradientClipper;

/// Parameter update rule, addressed per layer so stateful optimizers can keep
/// one moment slot per layer.
pub trait Optimizer {
    fn update_weights(&mut self, layer: usize, weights: &mut Array2<f32>, gradients: &Array2<f32>, learning_rate: f32);
    fn update_biases(&mut self, layer: usize, biases: &mut Array1<f32>, gradients: &Array1<f32>, learning_rate: f32);

    /// Called once after every layer of a network has been updated.
    fn end_step(&mut self) {}
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub enum OptimizerWrapper {
    Sgd(Sgd),
    Adam(Adam),
}

impl OptimizerWrapper {
    pub fn sgd() -> Self {
        OptimizerWrapper::Sgd(Sgd::new())
    }

    pub fn adam() -> Self {
        OptimizerWrapper::Adam(Adam::default())
    }
}

impl Default for OptimizerWrapper {
    fn default() -> Self {
        Self::adam()
    }
}

impl Optimizer for OptimizerWrapper {
    fn update_weights(&mut self, layer: usize, weights: &mut Array2<f32>, gradients: &Array2<f32>, learning_rate: f32) {
        match self {
            OptimizerWrapper::Sgd(optimizer) => optimizer.update_weights(layer, weights, gradients, learning_rate),
            OptimizerWrapper::Adam(optimizer) => optimizer.update_weights(layer, weights, gradients, learning_rate),
        }
    }

    fn update_biases(&mut self, layer: usize, biases: &mut Array1<f32>, gradients: &Array1<f32>, learning_rate: f32) {
        match self {
            OptimizerWrapper::Sgd(optimizer) => optimizer.update_biases(layer, biases, gradients, learning_rate),
            OptimizerWrapper::Adam(optimizer) => optimizer.update_biases(layer, biases, gradients, learning_rate),
        }
    }

    fn end_step(&mut self) {
        match self {
            OptimizerWrapper::Sgd(optimizer) => optimizer.end_step(),
            OptimizerWrapper::Adam(optimizer) => optimizer.end_step(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Sgd;

impl Sgd {
    pub fn new() -> Sgd {
        Sgd
    }
}

impl Optimizer for Sgd {
    fn update_weights(&mut self, _layer: usize, weights: &mut Array2<f32>, gradients: &Array2<f32>, learning_rate: f32) {
        weights.zip_mut_with(gradients, |w, &g| *w -= learning_rate * g);
    }

    fn update_biases(&mut self, _layer: usize, biases: &mut Array1<f32>, gradients: &Array1<f32>, learning_rate: f32) {
        biases.zip_mut_with(gradients, |b, &g| *b -= learning_rate * g);
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
struct AdamSlot {
    m_weights: Array2<f32>,
    v_weights: Array2<f32>,
    m_biases: Array1<f32>,
    v_biases: Array1<f32>,
}

/// Adam with one lazily created moment slot per layer.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Adam {
    pub beta1: f32,
    pub beta2: f32,
    pub epsilon: f32,
    slots: Vec<Option<AdamSlot>>,
    /// Completed steps
    pub t: usize,
}

impl Adam {
    pub fn new(beta1: f32, beta2: f32, epsilon: f32) -> Self {
        Adam {
            beta1,
            beta2,
            epsilon,
            slots: Vec::new(),
            t: 0,
        }
    }

    fn slot(&mut self, layer: usize, weight_dim: (usize, usize), bias_dim: usize) -> &mut AdamSlot {
        if self.slots.len() <= layer {
            self.slots.resize(layer + 1, None);
        }
        let entry = &mut self.slots[layer];
        let fits = matches!(
            entry,
            Some(slot) if slot.m_weights.dim() == weight_dim && slot.m_biases.len() == bias_dim
        );
        if !fits {
            *entry = None;
        }
        entry.get_or_insert_with(|| AdamSlot {
            m_weights: Array2::zeros(weight_dim),
            v_weights: Array2::zeros(weight_dim),
            m_biases: Array1::zeros(bias_dim),
            v_biases: Array1::zeros(bias_dim),
        })
    }

    fn corrections(&self) -> (f32, f32) {
        let step = (self.t + 1) as i32;
        (1.0 - self.beta1.powi(step), 1.0 - self.beta2.powi(step))
    }
}

impl Default for Adam {
    fn default() -> Self {
        Self::new(0.9, 0.999, 1e-8)
    }
}

impl Optimizer for Adam {
    fn update_weights(&mut self, layer: usize, weights: &mut Array2<f32>, gradients: &Array2<f32>, learning_rate: f32) {
        let (c1, c2) = self.corrections();
        let (beta1, beta2, epsilon) = (self.beta1, self.beta2, self.epsilon);
        let bias_dim = weights.ncols();
        let slot = self.slot(layer, weights.dim(), bias_dim);

        slot.m_weights.zip_mut_with(gradients, |m, &g| *m = beta1 * *m + (1.0 - beta1) * g);
        slot.v_weights.zip_mut_with(gradients, |v, &g| *v = beta2 * *v + (1.0 - beta2) * g * g);

        ndarray::Zip::from(weights)
            .and(&slot.m_weights)
            .and(&slot.v_weights)
            .for_each(|w, &m, &v| {
                *w -= learning_rate * (m / c1) / ((v / c2).sqrt() + epsilon);
            });
    }

    fn update_biases(&mut self, layer: usize, biases: &mut Array1<f32>, gradients: &Array1<f32>, learning_rate: f32) {
        let (c1, c2) = self.corrections();
        let (beta1, beta2, epsilon) = (self.beta1, self.beta2, self.epsilon);
        let weight_dim = match self.slots.get(layer) {
            Some(Some(slot)) if slot.m_biases.len() == biases.len() => slot.m_weights.dim(),
            _ => (0, biases.len()),
        };
        let slot = self.slot(layer, weight_dim, biases.len());

        slot.m_biases.zip_mut_with(gradients, |m, &g| *m = beta1 * *m + (1.0 - beta1) * g);
        slot.v_biases.zip_mut_with(gradients, |v, &g| *v = beta2 * *v + (1.0 - beta2) * g * g);

        ndarray::Zip::from(biases)
            .and(&slot.m_biases)
            .and(&slot.v_biases)
            .for_each(|b, &m, &v| {
                *b -= learning_rate * (m / c1) / ((v / c2).sqrt() + epsilon);
            });
    }

    fn end_step(&mut self) {
        self.t += 1;
    }
}
