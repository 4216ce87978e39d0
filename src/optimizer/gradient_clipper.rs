use serde::{Serialize, Deserialize};

use crate::network::LayerGradients;

/// Gradient clipping methods
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, Default)]
pub enum GradientClipper {
    /// No clipping
    #[default]
    None,

    /// Clip every element into `[-max, max]`
    ByValue { max: f32 },

    /// Rescale all gradients together so their joint L2 norm is at most `max_norm`
    ByGlobalNorm { max_norm: f32 },
}

impl GradientClipper {
    pub fn clip(&self, gradients: &mut [LayerGradients]) {
        match *self {
            GradientClipper::None => {}
            GradientClipper::ByValue { max } => {
                for grad in gradients.iter_mut() {
                    grad.weights.mapv_inplace(|g| g.clamp(-max, max));
                    grad.biases.mapv_inplace(|g| g.clamp(-max, max));
                }
            }
            GradientClipper::ByGlobalNorm { max_norm } => {
                let norm = Self::global_norm(gradients);
                if norm > max_norm && norm > 0.0 {
                    let scale = max_norm / norm;
                    for grad in gradients.iter_mut() {
                        grad.weights.mapv_inplace(|g| g * scale);
                        grad.biases.mapv_inplace(|g| g * scale);
                    }
                }
            }
        }
    }

    /// L2 norm over every weight and bias gradient.
    pub fn global_norm(gradients: &[LayerGradients]) -> f32 {
        gradients
            .iter()
            .map(|g| {
                g.weights.iter().map(|&x| x * x).sum::<f32>()
                    + g.biases.iter().map(|&x| x * x).sum::<f32>()
            })
            .sum::<f32>()
            .sqrt()
    }
}
