pub mod artifact;
pub mod block;
pub mod breed_info;
pub mod config;
pub mod error;
pub mod gradcam;
pub mod head;
pub mod imagenet;
pub mod locate;
pub mod model;
pub mod norm;
pub mod overlay;
pub mod predict;
pub mod registry;
pub mod resnet;
pub mod settings;
pub mod tap;

pub use breed_info::{BreedCatalog, BreedInfo};
pub use config::{BackboneConfig, BreedNetConfig};
pub use error::{ClassifyError, InputError, RegistryError, StartupError};
pub use gradcam::{Saliency, SaliencyEngine, SaliencyMap, Unavailable};
pub use locate::{LayerLocator, LayerPath};
pub use model::{BreedNet, ModelWrapper};
pub use overlay::OverlayRenderer;
pub use predict::{Classifier, PredictionResult};
pub use registry::ClassRegistry;
pub use settings::ServiceConfig;
