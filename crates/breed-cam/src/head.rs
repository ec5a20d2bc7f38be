use burn::nn::{BatchNorm, Linear, Relu};
use burn::prelude::{Backend, Module, Tensor};
use crate::norm::norm1d;

/// Maps pooled backbone features to one score per breed.
///
/// Linear -> BatchNorm1d -> ReLU -> Linear. The dropout used while training is the
/// identity at inference and is not part of the module.
#[derive(Debug, Module)]
pub struct ClassifierHead<B: Backend> {
	pub(crate) fc1: Linear<B>,
	pub(crate) norm: BatchNorm<B, 1>,
	pub(crate) activation: Relu,
	pub(crate) fc2: Linear<B>,
}

impl<B: Backend> ClassifierHead<B> {
	pub fn forward(&self, features: Tensor<B, 2>) -> Tensor<B, 2> {
		let x = self.fc1.forward(features);
		let x = norm1d(&self.norm, x);
		let x = self.activation.forward(x);

		self.fc2.forward(x)
	}
}
