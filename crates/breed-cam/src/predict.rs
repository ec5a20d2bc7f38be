use std::path::{Path, PathBuf};
use std::sync::Arc;
use burn::prelude::Device;
use burn::tensor::activation::softmax;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::{ElementConversion, Tensor};
use image::RgbImage;
use serde::Serialize;
use crate::artifact::UploadArtifact;
use crate::error::{ClassifyError, InputError, StartupError};
use crate::gradcam::SaliencyEngine;
use crate::imagenet::Normalizer;
use crate::locate::LayerLocator;
use crate::model::ModelWrapper;
use crate::overlay::{encode_data_uri, OverlayRenderer, DEFAULT_JPEG_QUALITY};
use crate::registry::ClassRegistry;
use crate::settings::ServiceConfig;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionResult {
	pub breed: String,
	/// Softmax probability of `breed`, in `[0, 1]`.
	pub confidence: f32,
	/// `data:image/jpeg;base64,...` overlay, absent when no explanation could be produced.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub explanation_image: Option<String>,
	#[serde(skip)]
	pub class_index: usize,
}

/// Image bytes in, breed prediction with an optional Grad-CAM overlay out.
///
/// `Classifier` is `Send` but not `Sync`: give each worker thread its own clone. Clones
/// share the weights, the registry and the Grad-CAM lock, so plain inference runs in
/// parallel while backward passes still run one at a time.
#[derive(Clone)]
pub struct Classifier<B: AutodiffBackend> {
	model: ModelWrapper<B>,
	registry: Arc<ClassRegistry>,
	engine: SaliencyEngine,
	normalizer: Normalizer<B::InnerBackend>,
	renderer: OverlayRenderer,
	jpeg_quality: u8,
	upload_dir: PathBuf,
}

impl<B: AutodiffBackend> Classifier<B> {
	pub fn new<P: Into<PathBuf>>(
		model: ModelWrapper<B>,
		registry: Arc<ClassRegistry>,
		upload_dir: P,
	) -> Result<Self, StartupError> {
		if model.num_classes() != registry.len() {
			return Err(StartupError::ClassCountMismatch {
				model: model.num_classes(),
				registry: registry.len(),
			});
		}

		let engine = SaliencyEngine::new(&model, &LayerLocator::default());
		let normalizer = Normalizer::new(model.device());

		Ok(Self {
			model,
			registry,
			engine,
			normalizer,
			renderer: OverlayRenderer::default(),
			jpeg_quality: DEFAULT_JPEG_QUALITY,
			upload_dir: upload_dir.into(),
		})
	}

	pub fn from_config(config: &ServiceConfig, device: &Device<B>) -> Result<Self, StartupError> {
		let registry = ClassRegistry::load(&config.class_index_path)?;
		log::info!("Loaded {} classes from {}", registry.len(), config.class_index_path);

		let model = ModelWrapper::load(&config.network(registry.len()), &config.weights_path, device)?;

		Ok(Self::new(model, Arc::new(registry), config.upload_dir())?
			.with_renderer(OverlayRenderer::new(config.blend))
			.with_jpeg_quality(config.jpeg_quality))
	}

	pub fn with_renderer(mut self, renderer: OverlayRenderer) -> Self {
		self.renderer = renderer;
		self
	}

	pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
		self.jpeg_quality = quality.clamp(1, 100);
		self
	}

	/// Re-runs target layer selection with a different strategy chain.
	pub fn with_locator(mut self, locator: &LayerLocator) -> Self {
		self.engine = SaliencyEngine::new(&self.model, locator);
		self
	}

	pub fn registry(&self) -> &ClassRegistry {
		&self.registry
	}

	pub fn engine(&self) -> &SaliencyEngine {
		&self.engine
	}

	/// Classifies one uploaded image.
	///
	/// The payload is staged under the upload directory and removed again before this
	/// returns, whatever the outcome. A missing explanation never fails the call.
	pub fn classify(&self, bytes: &[u8]) -> Result<PredictionResult, ClassifyError> {
		if bytes.is_empty() {
			return Err(InputError::Empty.into());
		}

		let artifact = UploadArtifact::stage(&self.upload_dir, bytes)?;
		let image = image::load_from_memory(&artifact.read()?)
			.map_err(InputError::from)?
			.into_rgb8();
		log::debug!("Decoded {}x{} upload", image.width(), image.height());

		let input = self.normalizer.transform(&image);
		let (class_index, confidence) = self.predict(input.clone());
		let breed = self.registry.label(class_index)?.to_string();
		log::info!("Predicted {breed} with confidence {confidence:.4}");

		let explanation_image = self.explanation(&image, input, class_index);

		Ok(PredictionResult {
			breed,
			confidence,
			explanation_image,
			class_index,
		})
	}

	pub fn classify_file<P: AsRef<Path>>(&self, path: P) -> Result<PredictionResult, ClassifyError> {
		let bytes = std::fs::read(path)?;
		self.classify(&bytes)
	}

	fn predict(&self, input: Tensor<B::InnerBackend, 4>) -> (usize, f32) {
		let probabilities = softmax(self.model.forward(input), 1);
		let (confidence, index) = probabilities.max_dim_with_indices(1);

		(index.into_scalar().elem::<i64>() as usize, confidence.into_scalar().elem::<f32>())
	}

	fn explanation(&self, image: &RgbImage, input: Tensor<B::InnerBackend, 4>, class: usize) -> Option<String> {
		let map = self.engine.explain(&self.model, input, Some(class)).map()?;
		let overlay = self.renderer.render(image, &map);

		match encode_data_uri(&overlay, self.jpeg_quality) {
			Ok(uri) => Some(uri),
			Err(err) => {
				log::warn!("Could not encode explanation image: {err}");
				None
			}
		}
	}
}
