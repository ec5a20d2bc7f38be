use std::path::PathBuf;
use burn::prelude::Config;
use crate::config::{BackboneConfig, BreedNetConfig};

/// Everything the classifier needs at startup, persisted as JSON.
#[derive(Debug, Config)]
pub struct ServiceConfig {
	/// Trained weights: a burn `.mpk` record, or a PyTorch `.pth` / `.pt` state dict.
	pub weights_path: String,
	/// JSON object of `breed -> class index`.
	pub class_index_path: String,
	#[config(default = "BackboneConfig::new()")]
	pub backbone: BackboneConfig,
	#[config(default = "None")]
	pub hidden: Option<usize>,
	/// Heatmap weight in the explanation overlay.
	#[config(default = 0.4)]
	pub blend: f32,
	#[config(default = 95)]
	pub jpeg_quality: u8,
	/// Where uploads are staged while a request runs. Defaults to a directory under the system temp dir.
	#[config(default = "None")]
	pub upload_dir: Option<String>,
	#[config(default = "None")]
	pub breed_info_path: Option<String>,
}

impl ServiceConfig {
	pub fn network(&self, num_classes: usize) -> BreedNetConfig {
		BreedNetConfig::new(self.backbone.clone(), num_classes).with_hidden(self.hidden)
	}

	pub fn upload_dir(&self) -> PathBuf {
		match &self.upload_dir {
			Some(dir) => PathBuf::from(dir),
			None => std::env::temp_dir().join("breed-cam-uploads"),
		}
	}
}
