use std::path::Path;
use burn::module::{AutodiffModule, Module};
use burn::nn::pool::AdaptiveAvgPool2d;
use burn::prelude::{Backend, Device};
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder, RecorderError};
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::Tensor;
use burn_import::pytorch::{LoadArgs, PyTorchFileRecorder};
use crate::config::BreedNetConfig;
use crate::head::ClassifierHead;
use crate::locate::{Introspect, Structure};
use crate::resnet::ResNet;
use crate::tap::Tap;

#[derive(Debug, Module)]
pub struct BreedNet<B: Backend> {
	pub(crate) backbone: ResNet<B>,
	pub(crate) pool: AdaptiveAvgPool2d,
	pub(crate) head: ClassifierHead<B>,
}

impl<B: Backend> BreedNet<B> {
	pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
		self.forward_observed(images, &mut Tap::passive())
	}

	/// Class scores `[batch, num_classes]`, routing every backbone layer output through `tap`.
	pub fn forward_observed(&self, images: Tensor<B, 4>, tap: &mut Tap<B>) -> Tensor<B, 2> {
		let features = self.backbone.forward_features(images, tap);

		// Global average pooling [B, C, H, W] -> [B, C]
		let pooled = self.pool.forward(features).flatten(1, 3);

		self.head.forward(pooled)
	}

	pub fn num_classes(&self) -> usize {
		let [_, num_classes] = self.head.fc2.weight.val().dims();
		num_classes
	}

	/// Reads a PyTorch `state_dict` of a wrapper laid out as `backbone` (ResNet) and
	/// `head` (`Sequential(Linear, BatchNorm1d, ReLU, Dropout, Linear)`).
	pub fn load_pytorch_record<P: AsRef<Path>>(path: P, device: &Device<B>) -> Result<BreedNetRecord<B>, RecorderError> {
		let load_args = LoadArgs::new(path.as_ref().to_path_buf())
			// Map *.downsample.0.* -> *.downsample.conv.*
			.with_key_remap("(.+)\\.downsample\\.0\\.(.+)", "$1.downsample.conv.$2")
			// Map *.downsample.1.* -> *.downsample.bn.*
			.with_key_remap("(.+)\\.downsample\\.1\\.(.+)", "$1.downsample.bn.$2")
			// Map layer[i].[j].* -> layer[i].blocks.[j].*
			.with_key_remap("(layer[1-4])\\.([0-9]+)\\.(.+)", "$1.blocks.$2.$3")
			// Sequential head indices, the dropout at index 3 has no weights
			.with_key_remap("^head\\.0\\.(.+)", "head.fc1.$1")
			.with_key_remap("^head\\.1\\.(.+)", "head.norm.$1")
			.with_key_remap("^head\\.4\\.(.+)", "head.fc2.$1");

		PyTorchFileRecorder::<FullPrecisionSettings>::new().load(load_args, device)
	}
}

/// The network shared by every request.
///
/// `frozen` lives on the inner backend and serves plain inference without any
/// gradient bookkeeping. `tracked` holds the same weights on the autodiff backend,
/// with parameters excluded from gradient computation, for the Grad-CAM pass.
///
/// Clones share parameter tensors; hand one clone to each worker thread.
#[derive(Debug, Clone)]
pub struct ModelWrapper<B: AutodiffBackend> {
	tracked: BreedNet<B>,
	frozen: BreedNet<B::InnerBackend>,
	device: Device<B>,
}

impl<B: AutodiffBackend> ModelWrapper<B> {
	pub fn new(net: BreedNet<B>, device: &Device<B>) -> Self {
		let tracked = net.no_grad();
		let frozen = tracked.valid();

		Self {
			tracked,
			frozen,
			device: device.clone(),
		}
	}

	/// Builds the network from `config` and loads its weights.
	///
	/// `.pth` and `.pt` files are imported as PyTorch state dicts, anything else is read
	/// as a named MessagePack record.
	pub fn load<P: AsRef<Path>>(config: &BreedNetConfig, weights: P, device: &Device<B>) -> Result<Self, RecorderError> {
		let weights = weights.as_ref();
		let net = config.init::<B>(device);

		let net = match weights.extension().and_then(|ext| ext.to_str()) {
			Some("pth" | "pt") => {
				log::info!("Importing PyTorch weights from {}", weights.display());
				net.load_record(BreedNet::load_pytorch_record(weights, device)?)
			}
			_ => {
				log::info!("Loading weights from {}", weights.display());
				let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
				net.load_file(weights.to_path_buf(), &recorder, device)?
			}
		};

		Ok(Self::new(net, device))
	}

	/// Plain inference.
	pub fn forward(&self, images: Tensor<B::InnerBackend, 4>) -> Tensor<B::InnerBackend, 2> {
		self.frozen.forward(images)
	}

	/// Gradient-tracking inference through an observation tap.
	pub fn forward_tracked(&self, images: Tensor<B, 4>, tap: &mut Tap<B>) -> Tensor<B, 2> {
		self.tracked.forward_observed(images, tap)
	}

	pub fn structure(&self) -> Structure {
		self.frozen.backbone.structure()
	}

	pub fn num_classes(&self) -> usize {
		self.frozen.num_classes()
	}

	pub fn device(&self) -> &Device<B> {
		&self.device
	}
}
