//! Reconstruction, smoothness, and state-change losses.
//!
//! All functions are generic over `B: Backend` and return a scalar tensor of
//! shape `(1,)`. Reference arguments are detached here, so no gradient flows
//! into the value being matched.

use burn::nn::loss::{MseLoss, Reduction};
use burn::prelude::*;
use burn::tensor::activation::log_softmax;
use burn::tensor::TensorData;

/// Mean squared error between `prediction` and a fixed `reference`.
pub fn mse_loss<B: Backend>(prediction: Tensor<B, 2>, reference: Tensor<B, 2>) -> Tensor<B, 1> {
    MseLoss::new().forward(prediction, reference.detach(), Reduction::Mean)
}

/// Class-weighted cross-entropy with a weighted-mean reduction.
///
/// `loss = -Σ w[y_i] · log p(y_i | x_i) / Σ w[y_i]`
///
/// # Arguments
/// - `logits`: shape `(batch, classes)`
/// - `labels`: shape `(batch,)`, class indices
/// - `class_weights`: one weight per class, `classes` entries
pub fn weighted_cross_entropy<B: Backend>(
    logits: Tensor<B, 2>,
    labels: Tensor<B, 1, Int>,
    class_weights: &[f32],
) -> Tensor<B, 1> {
    let device = logits.device();
    let [batch, classes] = logits.dims();
    debug_assert_eq!(class_weights.len(), classes, "one weight per class");

    let weights = Tensor::<B, 1>::from_data(TensorData::new(class_weights.to_vec(), [classes]), &device);
    let sample_weights = weights.select(0, labels.clone()); // (batch,)

    let log_probs = log_softmax(logits, 1);
    let picked: Tensor<B, 1> = log_probs
        .gather(1, labels.reshape([batch, 1]))
        .reshape([batch]);

    let weighted = (picked * sample_weights.clone()).sum().neg();
    weighted / sample_weights.sum().clamp_min(1e-12)
}

/// Per-term scalar loss totals over a window or an epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LossTerms {
    /// Next-target prediction error.
    pub reconstruction: f64,
    /// Actor embedding drift across updates.
    pub actor_smoothness: f64,
    /// Target embedding drift across updates.
    pub target_smoothness: f64,
    /// Weighted state-change classification loss.
    pub state_change: f64,
}

impl LossTerms {
    pub fn total(&self) -> f64 {
        self.reconstruction + self.actor_smoothness + self.target_smoothness + self.state_change
    }

    /// Whether every term is non-negative and finite.
    pub fn is_well_formed(&self) -> bool {
        [
            self.reconstruction,
            self.actor_smoothness,
            self.target_smoothness,
            self.state_change,
        ]
        .iter()
        .all(|v| v.is_finite() && *v >= 0.0)
    }
}

impl std::ops::AddAssign for LossTerms {
    fn add_assign(&mut self, rhs: Self) {
        self.reconstruction += rhs.reconstruction;
        self.actor_smoothness += rhs.actor_smoothness;
        self.target_smoothness += rhs.target_smoothness;
        self.state_change += rhs.state_change;
    }
}
