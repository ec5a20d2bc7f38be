//! Batch normalization with frozen running statistics.
//!
//! `BatchNorm::forward` switches to batch statistics whenever the backend tracks
//! gradients, which would make the explainability pass disagree with plain inference.
//! These helpers always apply the stored statistics.

use burn::nn::BatchNorm;
use burn::prelude::{Backend, Tensor};

/// Affine scale and shift equivalent to the norm's running statistics, shape `[channels]`.
fn affine<B: Backend, const D: usize>(norm: &BatchNorm<B, D>) -> (Tensor<B, 1>, Tensor<B, 1>) {
	let std = norm.running_var.value().add_scalar(norm.epsilon).sqrt();
	let scale = norm.gamma.val() / std;
	let shift = norm.beta.val() - norm.running_mean.value() * scale.clone();

	(scale, shift)
}

/// Frozen `BatchNorm2d` over `[batch, channels, height, width]`.
pub fn norm2d<B: Backend>(norm: &BatchNorm<B, 2>, input: Tensor<B, 4>) -> Tensor<B, 4> {
	let (scale, shift) = affine(norm);
	let [channels] = scale.dims();

	input * scale.reshape([1, channels, 1, 1]) + shift.reshape([1, channels, 1, 1])
}

/// Frozen `BatchNorm1d` over pooled `[batch, features]` vectors.
pub fn norm1d<B: Backend>(norm: &BatchNorm<B, 1>, input: Tensor<B, 2>) -> Tensor<B, 2> {
	let (scale, shift) = affine(norm);
	let [features] = scale.dims();

	input * scale.reshape([1, features]) + shift.reshape([1, features])
}

#[cfg(test)]
mod tests {
	use super::*;
	use burn::backend::NdArray;
	use burn::module::Param;
	use burn::nn::BatchNormConfig;
	use burn::tensor::TensorData;

	type TestBackend = NdArray;

	#[test]
	fn test_default_statistics_are_identity() {
		let device = Default::default();
		let norm = BatchNormConfig::new(3).with_epsilon(0.0).init::<TestBackend, 2>(&device);
		let input = Tensor::<TestBackend, 4>::random([2, 3, 4, 4], burn::tensor::Distribution::Default, &device);

		let output = norm2d(&norm, input.clone());

		output.into_data().assert_approx_eq(&input.into_data(), 5);
	}

	#[test]
	fn test_running_statistics_are_applied() {
		let device = Default::default();
		let mut norm = BatchNormConfig::new(2).with_epsilon(0.0).init::<TestBackend, 1>(&device);
		norm.gamma = Param::from_tensor(Tensor::from_floats([2.0, 1.0], &device));
		norm.beta = Param::from_tensor(Tensor::from_floats([0.5, -1.0], &device));

		let input = Tensor::<TestBackend, 2>::from_floats([[1.0, 3.0]], &device);
		let output = norm1d(&norm, input);

		// running mean 0, running var 1
		output
			.into_data()
			.assert_approx_eq(&TensorData::from([[2.5f32, 2.0]]), 5);
	}
}
