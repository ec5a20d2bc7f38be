//! Per-call observation of a backbone layer.

use std::sync::MutexGuard;

use burn::prelude::{Backend, Tensor};

use crate::locate::LayerPath;

/// Observation point threaded through a backbone forward pass.
///
/// A passive tap returns every tensor untouched. A watching tap swaps the output of its
/// target layer for a detached leaf that requires gradients and keeps a handle to it,
/// so the backward pass yields the gradient with respect to that activation.
#[derive(Debug)]
pub struct Tap<B: Backend> {
	target: Option<LayerPath>,
	captured: Option<Tensor<B, 4>>,
}

impl<B: Backend> Tap<B> {
	pub fn passive() -> Self {
		Self {
			target: None,
			captured: None,
		}
	}

	pub fn watching(target: LayerPath) -> Self {
		Self {
			target: Some(target),
			captured: None,
		}
	}

	pub fn observe(&mut self, path: LayerPath, output: Tensor<B, 4>) -> Tensor<B, 4> {
		if self.target != Some(path) {
			return output;
		}

		log::debug!("Capturing {path} with shape {:?}", output.dims());
		let leaf = output.detach().require_grad();
		self.captured = Some(leaf.clone());
		leaf
	}

	/// Activation recorded during the last forward pass, if the target was reached.
	pub fn activation(&self) -> Option<&Tensor<B, 4>> {
		self.captured.as_ref()
	}

	pub fn is_attached(&self) -> bool {
		self.target.is_some()
	}

	fn detach(&mut self) {
		self.target = None;
		self.captured = None;
	}
}

/// Scoped instrumentation: holds the engine lock and a watching [`Tap`].
///
/// Dropping the handle detaches the tap and releases the lock, whether the pass
/// finished, returned early or unwound.
pub struct ObservationHandle<'a, B: Backend> {
	tap: Tap<B>,
	_exclusive: MutexGuard<'a, ()>,
}

impl<'a, B: Backend> ObservationHandle<'a, B> {
	pub(crate) fn attach(target: LayerPath, exclusive: MutexGuard<'a, ()>) -> Self {
		log::debug!("Attaching observation to {target}");
		Self {
			tap: Tap::watching(target),
			_exclusive: exclusive,
		}
	}

	pub fn tap(&mut self) -> &mut Tap<B> {
		&mut self.tap
	}

	pub fn activation(&self) -> Option<&Tensor<B, 4>> {
		self.tap.activation()
	}
}

impl<B: Backend> Drop for ObservationHandle<'_, B> {
	fn drop(&mut self) {
		self.tap.detach();
		log::debug!("Observation detached");
	}
}
