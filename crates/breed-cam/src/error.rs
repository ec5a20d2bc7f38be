use burn::record::RecorderError;
use thiserror::Error;

/// The uploaded payload is not something we can classify.
#[derive(Debug, Error)]
pub enum InputError {
	#[error("Empty image payload")]
	Empty,
	#[error("Could not decode image: {0}")]
	Undecodable(#[from] image::ImageError),
}

#[derive(Debug, Error)]
pub enum RegistryError {
	#[error("Could not read class index file")]
	Io(#[from] std::io::Error),
	#[error("Malformed class index file: {0}")]
	Json(#[from] serde_json::Error),
	#[error("Class index file lists no classes")]
	Empty,
	#[error("Class {label:?} has index {index}, outside 0..{len}")]
	IndexOutOfRange { label: String, index: usize, len: usize },
	#[error("Class {0:?} is listed more than once")]
	DuplicateLabel(String),
	#[error("Classes {first:?} and {second:?} share index {index}")]
	DuplicateIndex { index: usize, first: String, second: String },
	#[error("No class registered for index {0}")]
	MissingClass(usize),
}

#[derive(Debug, Error)]
pub enum ClassifyError {
	#[error(transparent)]
	Input(#[from] InputError),
	/// Model and class registry disagree; never caused by the request itself.
	#[error("Internal invariant violated: {0}")]
	Invariant(#[from] RegistryError),
	#[error("Could not stage upload: {0}")]
	Io(#[from] std::io::Error),
}

impl ClassifyError {
	/// True when the caller sent something unusable rather than the service failing.
	pub fn is_input(&self) -> bool {
		matches!(self, ClassifyError::Input(_))
	}
}

#[derive(Debug, Error)]
pub enum StartupError {
	#[error("Could not load class registry: {0}")]
	Registry(#[from] RegistryError),
	#[error("Could not load model weights: {0}")]
	Model(#[from] RecorderError),
	#[error("Could not load breed catalog: {0}")]
	Catalog(#[source] serde_json::Error),
	#[error("Could not read file: {0}")]
	Io(#[from] std::io::Error),
	#[error("Model predicts {model} classes but the registry lists {registry}")]
	ClassCountMismatch { model: usize, registry: usize },
}
