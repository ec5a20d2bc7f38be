use burn::nn::conv::{Conv2dConfig, Conv2d};
use burn::nn::{BatchNormConfig, Initializer, LinearConfig, PaddingConfig2d, Relu};
use burn::prelude::{Backend, Config, Device};
use std::f64::consts::SQRT_2;
use burn::nn::pool::{AdaptiveAvgPool2dConfig, MaxPool2dConfig};
use crate::block::{BasicBlock, Bottleneck, Downsample, LayerBlock, ResidualBlock};
use crate::head::ClassifierHead;
use crate::model::BreedNet;
use crate::resnet::ResNet;

fn kaiming() -> Initializer {
	Initializer::KaimingNormal {
		gain: SQRT_2, // recommended value for ReLU
		fan_out_only: true,
	}
}

fn conv<B: Backend>(config: &Conv2dConfig, device: &Device<B>) -> Conv2d<B> {
	config.clone().with_initializer(kaiming()).init(device)
}

fn conv_bn(in_channels: usize, out_channels: usize, kernel: usize, stride: usize) -> (Conv2dConfig, BatchNormConfig) {
	let padding = kernel / 2;
	let conv = Conv2dConfig::new([in_channels, out_channels], [kernel, kernel])
		.with_stride([stride, stride])
		.with_padding(PaddingConfig2d::Explicit(padding, padding))
		.with_bias(false);

	(conv, BatchNormConfig::new(out_channels))
}

fn downsample(in_channels: usize, out_channels: usize, stride: usize) -> Option<DownsampleConfig> {
	(in_channels != out_channels || stride != 1).then(|| DownsampleConfig::new(in_channels, out_channels, stride))
}

#[derive(Config)]
struct ResidualBlockConfig {
	in_channels: usize,
	out_channels: usize,
	stride: usize,
	bottleneck: bool,
}

impl ResidualBlockConfig {
	fn init<B: Backend>(&self, device: &Device<B>) -> ResidualBlock<B> {
		if self.bottleneck {
			ResidualBlock::Bottleneck(
				BottleneckConfig::new(self.in_channels, self.out_channels, self.stride)
					.init(device),
			)
		} else {
			ResidualBlock::Basic(
				BasicBlockConfig::new(self.in_channels, self.out_channels, self.stride)
					.init(device),
			)
		}
	}
}

struct BasicBlockConfig {
	conv1: (Conv2dConfig, BatchNormConfig),
	conv2: (Conv2dConfig, BatchNormConfig),
	downsample: Option<DownsampleConfig>,
}

impl BasicBlockConfig {
	fn new(in_channels: usize, out_channels: usize, stride: usize) -> Self {
		Self {
			conv1: conv_bn(in_channels, out_channels, 3, stride),
			conv2: conv_bn(out_channels, out_channels, 3, 1),
			downsample: downsample(in_channels, out_channels, stride),
		}
	}

	fn init<B: Backend>(&self, device: &Device<B>) -> BasicBlock<B> {
		BasicBlock {
			conv1: conv(&self.conv1.0, device),
			bn1: self.conv1.1.init(device),
			conv2: conv(&self.conv2.0, device),
			bn2: self.conv2.1.init(device),
			relu: Relu::new(),
			downsample: self.downsample.as_ref().map(|d| d.init(device)),
		}
	}
}

struct BottleneckConfig {
	conv1: (Conv2dConfig, BatchNormConfig),
	conv2: (Conv2dConfig, BatchNormConfig),
	conv3: (Conv2dConfig, BatchNormConfig),
	downsample: Option<DownsampleConfig>,
}

impl BottleneckConfig {
	fn new(in_channels: usize, out_channels: usize, stride: usize) -> Self {
		// Intermediate output channels w/ expansion = 4
		let inner = out_channels / 4;

		Self {
			conv1: conv_bn(in_channels, inner, 1, 1),
			conv2: conv_bn(inner, inner, 3, stride),
			conv3: conv_bn(inner, out_channels, 1, 1),
			downsample: downsample(in_channels, out_channels, stride),
		}
	}

	fn init<B: Backend>(&self, device: &Device<B>) -> Bottleneck<B> {
		Bottleneck {
			conv1: conv(&self.conv1.0, device),
			bn1: self.conv1.1.init(device),
			conv2: conv(&self.conv2.0, device),
			bn2: self.conv2.1.init(device),
			conv3: conv(&self.conv3.0, device),
			bn3: self.conv3.1.init(device),
			relu: Relu::new(),
			downsample: self.downsample.as_ref().map(|d| d.init(device)),
		}
	}
}

struct DownsampleConfig {
	conv: (Conv2dConfig, BatchNormConfig),
}

impl DownsampleConfig {
	fn new(in_channels: usize, out_channels: usize, stride: usize) -> Self {
		Self { conv: conv_bn(in_channels, out_channels, 1, stride) }
	}

	fn init<B: Backend>(&self, device: &B::Device) -> Downsample<B> {
		Downsample {
			conv: conv(&self.conv.0, device),
			bn: self.conv.1.init(device),
		}
	}
}

#[derive(Config)]
pub struct LayerBlockConfig {
	num_blocks: usize,
	in_channels: usize,
	out_channels: usize,
	stride: usize,
	bottleneck: bool,
}

impl LayerBlockConfig {
	pub fn init<B: Backend>(&self, device: &Device<B>) -> LayerBlock<B> {
		let blocks = (0..self.num_blocks)
			.map(|b| {
				// Only the first block changes width and stride
				let (in_channels, stride) = if b == 0 {
					(self.in_channels, self.stride)
				} else {
					(self.out_channels, 1)
				};
				ResidualBlockConfig::new(in_channels, self.out_channels, stride, self.bottleneck).init(device)
			})
			.collect();

		LayerBlock { blocks }
	}
}

/// Persisted description of the ResNet backbone.
#[derive(Debug, Config)]
pub struct BackboneConfig {
	/// Residual blocks per stage; `[2, 2, 2, 2]` is ResNet-18.
	#[config(default = "[2, 2, 2, 2]")]
	pub blocks: [usize; 4],
	/// 1 for basic blocks, 4 for bottleneck blocks.
	#[config(default = 1)]
	pub expansion: usize,
	/// Width of the stem and of the first stage.
	#[config(default = 64)]
	pub base_width: usize,
}

impl BackboneConfig {
	/// Number of channels in the final feature map.
	pub fn out_channels(&self) -> usize {
		self.base_width * 8 * self.expansion
	}
}

pub struct ResNetConfig {
	pub conv1: Conv2dConfig,
	pub bn1: BatchNormConfig,
	pub maxpool: MaxPool2dConfig,
	pub layer1: LayerBlockConfig,
	pub layer2: LayerBlockConfig,
	pub layer3: LayerBlockConfig,
	pub layer4: LayerBlockConfig,
}

impl ResNetConfig {
	pub fn new(backbone: &BackboneConfig) -> Self {
		let BackboneConfig { blocks, expansion, base_width } = *backbone;
		assert!(
			expansion == 1 || expansion == 4,
			"ResNet module only supports expansion values [1, 4] for residual blocks"
		);

		// 7x7 conv, /2
		let (conv1, bn1) = conv_bn(3, base_width, 7, 2);

		// 3x3 maxpool, /2
		let maxpool = MaxPool2dConfig::new([3, 3])
			.with_strides([2, 2])
			.with_padding(PaddingConfig2d::Explicit(1, 1));

		let bottleneck = expansion > 1;
		let width = |stage: usize| base_width * (1 << stage) * expansion;
		let layer1 = LayerBlockConfig::new(blocks[0], base_width, width(0), 1, bottleneck);
		let layer2 = LayerBlockConfig::new(blocks[1], width(0), width(1), 2, bottleneck);
		let layer3 = LayerBlockConfig::new(blocks[2], width(1), width(2), 2, bottleneck);
		let layer4 = LayerBlockConfig::new(blocks[3], width(2), width(3), 2, bottleneck);

		Self {
			conv1,
			bn1,
			maxpool,
			layer1,
			layer2,
			layer3,
			layer4,
		}
	}

	pub fn init<B: Backend>(self, device: &Device<B>) -> ResNet<B> {
		ResNet {
			conv1: conv(&self.conv1, device),
			bn1: self.bn1.init(device),
			relu: Relu::new(),
			maxpool: self.maxpool.init(),
			layer1: self.layer1.init(device),
			layer2: self.layer2.init(device),
			layer3: self.layer3.init(device),
			layer4: self.layer4.init(device),
		}
	}
}

/// Backbone plus classifier head, sized for a given number of breeds.
#[derive(Debug, Config)]
pub struct BreedNetConfig {
	pub backbone: BackboneConfig,
	pub num_classes: usize,
	/// Hidden width of the head. Defaults to `8 * num_classes` clamped to `[128, 512]`.
	#[config(default = "None")]
	pub hidden: Option<usize>,
}

impl BreedNetConfig {
	pub fn hidden_size(&self) -> usize {
		self.hidden
			.unwrap_or_else(|| (self.num_classes * 8).clamp(128, 512))
	}

	pub fn init<B: Backend>(&self, device: &Device<B>) -> BreedNet<B> {
		let features = self.backbone.out_channels();
		let hidden = self.hidden_size();

		BreedNet {
			backbone: ResNetConfig::new(&self.backbone).init(device),
			pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
			head: ClassifierHead {
				fc1: LinearConfig::new(features, hidden).init(device),
				norm: BatchNormConfig::new(hidden).init(device),
				activation: Relu::new(),
				fc2: LinearConfig::new(hidden, self.num_classes).init(device),
			},
		}
	}
}
