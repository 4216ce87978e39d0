use ndarray::{Array2, ArrayView2};
use serde::{Serialize, Deserialize};

/// Element-wise activation applied after a dense layer.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, Default, PartialEq)]
pub enum Activation {
    #[default]
    Relu,
    Linear,
    Tanh,
    Sigmoid,
}

impl Activation {
    /// Apply the activation to a batch in place.
    pub fn apply_batch(&self, inputs: &mut Array2<f32>) {
        match self {
            Activation::Relu => inputs.mapv_inplace(|v| v.max(0.0)),
            Activation::Linear => {}
            Activation::Tanh => inputs.mapv_inplace(f32::tanh),
            Activation::Sigmoid => inputs.mapv_inplace(sigmoid),
        }
    }

    /// Derivative of the activation, evaluated at the pre-activation values.
    pub fn derivative_batch(&self, pre_activation: ArrayView2<f32>) -> Array2<f32> {
        match self {
            Activation::Relu => pre_activation.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 }),
            Activation::Linear => Array2::ones(pre_activation.dim()),
            Activation::Tanh => pre_activation.mapv(|v| {
                let t = v.tanh();
                1.0 - t * t
            }),
            Activation::Sigmoid => pre_activation.mapv(|v| {
                let s = sigmoid(v);
                s * (1.0 - s)
            }),
        }
    }
}

/// Logistic function.
#[inline]
pub fn sigmoid(v: f32) -> f32 {
    1.0 / (1.0 + (-v).exp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_relu_and_derivative() {
        let mut x = array![[-1.0, 0.5], [2.0, -0.1]];
        let pre = x.clone();
        Activation::Relu.apply_batch(&mut x);
        assert_eq!(x, array![[0.0, 0.5], [2.0, 0.0]]);
        assert_eq!(Activation::Relu.derivative_batch(pre.view()), array![[0.0, 1.0], [1.0, 0.0]]);
    }

    #[test]
    fn test_tanh_bounds() {
        let mut x = array![[-50.0, 0.0, 50.0]];
        Activation::Tanh.apply_batch(&mut x);
        assert!(x.iter().all(|v| (-1.0..=1.0).contains(v)));
        assert_eq!(x[[0, 1]], 0.0);
    }

    #[test]
    fn test_sigmoid_derivative_peak() {
        let d = Activation::Sigmoid.derivative_batch(array![[0.0]].view());
        assert!((d[[0, 0]] - 0.25).abs() < 1e-6);
    }
}
