//! Gradient-weighted class activation mapping.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use burn::prelude::Backend;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::{ElementConversion, Tensor};
use image::{ImageBuffer, Luma};
use thiserror::Error;
use crate::locate::{LayerLocator, LayerPath};
use crate::model::ModelWrapper;
use crate::tap::ObservationHandle;

/// Why no explanation was produced. Never fatal for the request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Unavailable {
	#[error("no layer of the backbone can be observed")]
	NoTargetLayer,
	#[error("target class {class} is outside the {classes} model outputs")]
	TargetOutOfRange { class: usize, classes: usize },
	#[error("no activation or gradient captured at {0}")]
	NothingCaptured(LayerPath),
	#[error("class activation map is constant")]
	Degenerate,
	#[error("class activation map holds non-finite values")]
	NonFinite,
	#[error("instrumentation failed: {0}")]
	Instrumentation(String),
}

/// Outcome of a saliency request.
#[derive(Debug, Clone)]
pub enum Saliency {
	Available(SaliencyMap),
	Unavailable(Unavailable),
}

impl Saliency {
	pub fn map(self) -> Option<SaliencyMap> {
		match self {
			Saliency::Available(map) => Some(map),
			Saliency::Unavailable(_) => None,
		}
	}
}

/// Single channel importance map with values in `[0, 1]`, min 0 and max 1.
#[derive(Debug, Clone, PartialEq)]
pub struct SaliencyMap {
	values: ImageBuffer<Luma<f32>, Vec<f32>>,
}

impl SaliencyMap {
	/// Rescales a raw row-major map to `[0, 1]`. Constant maps are rejected.
	pub fn normalized(width: u32, height: u32, raw: Vec<f32>) -> Result<Self, Unavailable> {
		if raw.iter().any(|v| !v.is_finite()) {
			return Err(Unavailable::NonFinite);
		}

		let (min, max) = raw
			.iter()
			.fold((f32::INFINITY, f32::NEG_INFINITY), |(min, max), &v| (min.min(v), max.max(v)));
		if raw.is_empty() || max <= min {
			return Err(Unavailable::Degenerate);
		}

		let range = max - min;
		let scaled = raw.into_iter().map(|v| ((v - min) / range).clamp(0.0, 1.0)).collect();
		let values = ImageBuffer::from_raw(width, height, scaled).ok_or_else(|| {
			Unavailable::Instrumentation(format!("map does not hold {width}x{height} values"))
		})?;

		Ok(Self { values })
	}

	pub fn width(&self) -> u32 {
		self.values.width()
	}

	pub fn height(&self) -> u32 {
		self.values.height()
	}

	pub fn get(&self, x: u32, y: u32) -> f32 {
		self.values.get_pixel(x, y).0[0]
	}

	pub fn values(&self) -> &[f32] {
		self.values.as_raw()
	}

	pub fn as_image(&self) -> &ImageBuffer<Luma<f32>, Vec<f32>> {
		&self.values
	}
}

/// Grad-CAM for the first item of a batch.
///
/// * `activations` - Output of the observed layer `(batch, channels, h, w)`
/// * `gradients` - Gradient of the class score w.r.t. `activations`
pub fn grad_cam<B: Backend>(activations: Tensor<B, 4>, gradients: Tensor<B, 4>) -> Result<SaliencyMap, Unavailable> {
	let [_, _, height, width] = activations.dims();

	// Global average pool the gradients: (batch, channels, h, w) -> (batch, channels, 1, 1)
	let weights = gradients.mean_dim(3).mean_dim(2);

	// Weighted sum over channels, then ReLU: (batch, 1, h, w)
	let cam = (activations * weights).sum_dim(1).clamp_min(0.0);

	let raw: Vec<f32> = cam
		.slice([0..1, 0..1, 0..height, 0..width])
		.into_data()
		.iter::<f32>()
		.collect();

	SaliencyMap::normalized(width as u32, height as u32, raw)
}

/// Computes saliency maps against one model.
///
/// The target layer is chosen once, at construction. Passes are serialized: at most
/// one backward pass runs at a time across an engine and all of its clones. Plain
/// inference is not affected.
#[derive(Debug, Clone)]
pub struct SaliencyEngine {
	target: Option<LayerPath>,
	exclusive: Arc<Mutex<()>>,
}

impl SaliencyEngine {
	pub fn new<B: AutodiffBackend>(model: &ModelWrapper<B>, locator: &LayerLocator) -> Self {
		let target = match locator.locate(&model.structure()) {
			Some((path, strategy)) => {
				log::info!("Grad-CAM target layer {path} (strategy {strategy})");
				Some(path)
			}
			None => {
				log::warn!("No Grad-CAM target layer found, explanations disabled");
				None
			}
		};

		Self {
			target,
			exclusive: Arc::new(Mutex::new(())),
		}
	}

	pub fn target(&self) -> Option<LayerPath> {
		self.target
	}

	/// Saliency for `target_class`, or the predicted class when `None`.
	///
	/// Every failure, including a panic inside the tensor backend, comes back as
	/// [`Saliency::Unavailable`].
	pub fn explain<B: AutodiffBackend>(
		&self,
		model: &ModelWrapper<B>,
		input: Tensor<B::InnerBackend, 4>,
		target_class: Option<usize>,
	) -> Saliency {
		let Some(layer) = self.target else {
			return Saliency::Unavailable(Unavailable::NoTargetLayer);
		};

		let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.explain_at(model, input, layer, target_class)))
			.unwrap_or_else(|payload| {
				let message = payload
					.downcast_ref::<String>()
					.cloned()
					.or_else(|| payload.downcast_ref::<&str>().map(|s| s.to_string()))
					.unwrap_or_else(|| "panic".to_string());
				Err(Unavailable::Instrumentation(message))
			});

		match outcome {
			Ok(map) => Saliency::Available(map),
			Err(reason) => {
				log::warn!("Grad-CAM unavailable: {reason}");
				Saliency::Unavailable(reason)
			}
		}
	}

	fn observe<B: Backend>(&self, layer: LayerPath) -> ObservationHandle<'_, B> {
		// The lock guards no data, a poisoned lock is still usable
		let exclusive = self.exclusive.lock().unwrap_or_else(PoisonError::into_inner);
		ObservationHandle::attach(layer, exclusive)
	}

	fn explain_at<B: AutodiffBackend>(
		&self,
		model: &ModelWrapper<B>,
		input: Tensor<B::InnerBackend, 4>,
		layer: LayerPath,
		target_class: Option<usize>,
	) -> Result<SaliencyMap, Unavailable> {
		let mut handle = self.observe::<B>(layer);

		let scores = model.forward_tracked(Tensor::from_inner(input), handle.tap());
		let [_, classes] = scores.dims();

		let class = match target_class {
			Some(class) => class,
			None => scores.clone().argmax(1).into_scalar().elem::<i64>() as usize,
		};
		if class >= classes {
			return Err(Unavailable::TargetOutOfRange { class, classes });
		}
		log::debug!("Grad-CAM for class {class}");

		let score = scores.slice([0..1, class..class + 1]).sum();
		let grads = score.backward();

		let activation = handle.activation().cloned().ok_or(Unavailable::NothingCaptured(layer))?;
		let gradient = activation.grad(&grads).ok_or(Unavailable::NothingCaptured(layer))?;
		log::debug!("Activations {:?}, gradients {:?}", activation.dims(), gradient.dims());

		grad_cam(activation.inner(), gradient)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use burn::backend::NdArray;
	use burn::tensor::Distribution;
	use std::sync::TryLockError;
	use crate::locate::{LastConv, Structure};
	use crate::model::tests::{silent_head, summing_head, tiny_net, TestBackend};

	fn input() -> Tensor<NdArray, 4> {
		Tensor::random([1, 3, 96, 96], Distribution::Uniform(-2.0, 2.0), &Default::default())
	}

	#[test]
	fn test_grad_cam_weights_channels_by_mean_gradient() {
		let device = Default::default();
		// channel 0 ramps left to right, channel 1 is constant
		let activations = Tensor::<NdArray, 4>::from_floats(
			[[[[0.0, 1.0, 2.0], [0.0, 1.0, 2.0]], [[5.0, 5.0, 5.0], [5.0, 5.0, 5.0]]]],
			&device,
		);
		let gradients = Tensor::<NdArray, 4>::from_floats(
			[[[[1.0, 1.0, 1.0], [1.0, 1.0, 1.0]], [[0.0, 0.0, 0.0], [0.0, 0.0, 0.0]]]],
			&device,
		);

		let map = grad_cam(activations, gradients).unwrap();

		assert_eq!((map.width(), map.height()), (3, 2));
		assert_eq!(map.values(), [0.0, 0.5, 1.0, 0.0, 0.5, 1.0]);
	}

	#[test]
	fn test_grad_cam_drops_negative_evidence() {
		let device = Default::default();
		let activations = Tensor::<NdArray, 4>::from_floats([[[[1.0, 2.0], [3.0, 4.0]]]], &device);
		let gradients = Tensor::<NdArray, 4>::from_floats([[[[-1.0, -1.0], [-1.0, -1.0]]]], &device);

		assert_eq!(grad_cam(activations, gradients), Err(Unavailable::Degenerate));
	}

	#[test]
	fn test_normalized_rejects_constant_and_non_finite() {
		assert_eq!(SaliencyMap::normalized(2, 1, vec![0.3, 0.3]), Err(Unavailable::Degenerate));
		assert_eq!(SaliencyMap::normalized(0, 0, vec![]), Err(Unavailable::Degenerate));
		assert_eq!(SaliencyMap::normalized(2, 1, vec![0.3, f32::NAN]), Err(Unavailable::NonFinite));
	}

	#[test]
	fn test_normalized_spans_unit_interval() {
		let map = SaliencyMap::normalized(2, 2, vec![2.0, 4.0, 6.0, 10.0]).unwrap();

		assert_eq!(map.values(), [0.0, 0.25, 0.5, 1.0]);
		assert_eq!(map.get(1, 1), 1.0);
	}

	#[test]
	fn test_engine_targets_last_stage() {
		let model = ModelWrapper::new(tiny_net(3), &Default::default());
		let engine = SaliencyEngine::new(&model, &LayerLocator::default());

		assert_eq!(engine.target(), Some(LayerPath::Stage(3)));
	}

	#[test]
	fn test_engine_produces_normalized_map() {
		let model = ModelWrapper::new(summing_head(tiny_net(3)), &Default::default());
		let engine = SaliencyEngine::new(&model, &LayerLocator::default());

		let map = match engine.explain(&model, input(), None) {
			Saliency::Available(map) => map,
			Saliency::Unavailable(reason) => panic!("Expected a map, got {reason}"),
		};

		// 96 / 32
		assert_eq!((map.width(), map.height()), (3, 3));
		assert!(map.values().iter().all(|v| (0.0..=1.0).contains(v)));
		let min = map.values().iter().cloned().fold(f32::INFINITY, f32::min);
		let max = map.values().iter().cloned().fold(f32::NEG_INFINITY, f32::max);
		assert_eq!((min, max), (0.0, 1.0));
	}

	#[test]
	fn test_engine_on_stem_layer() {
		let model = ModelWrapper::new(summing_head(tiny_net(3)), &Default::default());
		let locator = LayerLocator::new(vec![Box::new(StemOnly)]);
		let engine = SaliencyEngine::new(&model, &locator);

		let map = engine.explain(&model, input(), Some(1)).map().unwrap();

		assert_eq!((map.width(), map.height()), (48, 48));
	}

	struct StemOnly;

	impl crate::locate::LocateStrategy for StemOnly {
		fn name(&self) -> &'static str {
			"stem"
		}

		fn locate(&self, structure: &Structure) -> Option<LayerPath> {
			LastConv.locate(&Structure {
				nodes: structure.nodes.iter().take(1).cloned().collect(),
				..Default::default()
			})
		}
	}

	#[test]
	fn test_silent_model_is_unavailable() {
		let model = ModelWrapper::new(silent_head(tiny_net(3)), &Default::default());
		let engine = SaliencyEngine::new(&model, &LayerLocator::default());

		assert!(matches!(
			engine.explain(&model, input(), None),
			Saliency::Unavailable(Unavailable::Degenerate)
		));
	}

	#[test]
	fn test_target_out_of_range() {
		let model = ModelWrapper::new(tiny_net(3), &Default::default());
		let engine = SaliencyEngine::new(&model, &LayerLocator::default());

		assert!(matches!(
			engine.explain(&model, input(), Some(7)),
			Saliency::Unavailable(Unavailable::TargetOutOfRange { class: 7, classes: 3 })
		));
	}

	#[test]
	fn test_no_target_layer() {
		let model = ModelWrapper::new(tiny_net(3), &Default::default());
		let engine = SaliencyEngine::new(&model, &LayerLocator::new(Vec::new()));

		assert!(matches!(
			engine.explain(&model, input(), None),
			Saliency::Unavailable(Unavailable::NoTargetLayer)
		));
	}

	#[test]
	fn test_malformed_input_degrades() {
		let model = ModelWrapper::new(summing_head(tiny_net(3)), &Default::default());
		let engine = SaliencyEngine::new(&model, &LayerLocator::default());
		let grayscale = Tensor::<NdArray, 4>::zeros([1, 1, 64, 64], &Default::default());

		assert!(matches!(
			engine.explain(&model, grayscale, None),
			Saliency::Unavailable(Unavailable::Instrumentation(_))
		));
		// the unwind released the lock and the engine keeps serving
		assert!(!matches!(engine.exclusive.try_lock(), Err(TryLockError::WouldBlock)));
		assert!(engine.explain(&model, input(), None).map().is_some());
	}

	#[test]
	fn test_clones_share_the_backward_lock() {
		let model = ModelWrapper::<TestBackend>::new(tiny_net(3), &Default::default());
		let engine = SaliencyEngine::new(&model, &LayerLocator::default());
		let worker = engine.clone();

		let handle = engine.observe::<TestBackend>(LayerPath::Stage(3));
		assert!(matches!(worker.exclusive.try_lock(), Err(TryLockError::WouldBlock)));

		drop(handle);
		assert!(worker.exclusive.try_lock().is_ok());
		assert_eq!(worker.target(), engine.target());
	}

	#[test]
	fn test_repeated_explanations_match() {
		let model = ModelWrapper::<TestBackend>::new(summing_head(tiny_net(3)), &Default::default());
		let engine = SaliencyEngine::new(&model, &LayerLocator::default());
		let x = input();

		let first = engine.explain(&model, x.clone(), None).map().unwrap();
		let second = engine.explain(&model, x, None).map().unwrap();

		assert_eq!(first, second);
	}
}
