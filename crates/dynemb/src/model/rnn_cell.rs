use burn::nn::{Linear, LinearConfig};
use burn::prelude::*;

/// Configuration for a single-step recurrent cell.
#[derive(Config, Debug)]
pub struct RnnCellConfig {
    /// Input width.
    pub d_input: usize,
    /// Hidden (embedding) width.
    pub d_hidden: usize,
}

/// Elman cell: `h' = tanh(W_x x + W_h h + b)`.
///
/// Applied once per interaction, never unrolled; the caller carries `h`.
#[derive(Module, Debug)]
pub struct RnnCell<B: Backend> {
    /// Input projection with bias, `d_input → d_hidden`.
    input: Linear<B>,
    /// Recurrent projection without bias, `d_hidden → d_hidden`.
    hidden: Linear<B>,
}

impl RnnCellConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> RnnCell<B> {
        RnnCell {
            input: LinearConfig::new(self.d_input, self.d_hidden).init(device),
            hidden: LinearConfig::new(self.d_hidden, self.d_hidden)
                .with_bias(false)
                .init(device),
        }
    }
}

impl<B: Backend> RnnCell<B> {
    /// One step. `x`: `(n, d_input)`, `h`: `(n, d_hidden)` → `(n, d_hidden)`.
    pub fn forward(&self, x: Tensor<B, 2>, h: Tensor<B, 2>) -> Tensor<B, 2> {
        let pre = self.input.forward(x) + self.hidden.forward(h);
        burn::tensor::activation::tanh(pre)
    }
}
